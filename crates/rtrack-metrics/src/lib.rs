//! Metric declarations for the tracker.
//!
//! Every metric is declared once in [`metric_defs`] with its name, kind,
//! unit, label keys and help text. Recording goes through the `metrics`
//! facade, which is re-exported.
//!
//! ```rust,ignore
//! rtrack_metrics::describe_metrics();
//! metrics::counter!(metric_defs::FRAMES_DECODED.name, "kind" => "telemetry").increment(1);
//! ```

pub use metrics;

use metrics::Unit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// One declared metric.
#[derive(Debug, Clone)]
pub struct Metric {
    pub name: &'static str,
    pub kind: MetricKind,
    pub unit: Option<Unit>,
    /// Label keys every recording carries.
    pub labels: &'static [&'static str],
    pub help: &'static str,
}

impl Metric {
    /// Register the unit and help text with the installed recorder.
    pub fn describe(&self) {
        metrics::with_recorder(|recorder| {
            let name = self.name.into();
            let help = self.help.into();
            match self.kind {
                MetricKind::Counter => recorder.describe_counter(name, self.unit, help),
                MetricKind::Gauge => recorder.describe_gauge(name, self.unit, help),
                MetricKind::Histogram => recorder.describe_histogram(name, self.unit, help),
            }
        });
    }
}

pub mod metric_defs {
    use super::{Metric, MetricKind, Unit};

    const fn def(
        kind: MetricKind,
        name: &'static str,
        unit: Option<Unit>,
        labels: &'static [&'static str],
        help: &'static str,
    ) -> Metric {
        Metric {
            name,
            kind,
            unit,
            labels,
            help,
        }
    }

    // ========================================================================
    // Framing and decoding
    // ========================================================================

    /// Labels: kind (prelaunch, telemetry)
    pub const FRAMES_DECODED: Metric = def(
        MetricKind::Counter,
        "rtrack.frames.decoded",
        Some(Unit::Count),
        &["kind"],
        "Frames decoded into flight records",
    );

    pub const DECODE_ERRORS: Metric = def(
        MetricKind::Counter,
        "rtrack.frames.decode_errors",
        Some(Unit::Count),
        &["kind"],
        "Frames dropped because a field failed to decode",
    );

    pub const FRAMING_DISCARDED_BYTES: Metric = def(
        MetricKind::Counter,
        "rtrack.framing.discarded_bytes",
        Some(Unit::Bytes),
        &[],
        "Bytes discarded while searching for a message header",
    );

    pub const FRAMING_OVERFLOWS: Metric = def(
        MetricKind::Counter,
        "rtrack.framing.overflows",
        Some(Unit::Count),
        &[],
        "Framing resets caused by buffer overflow",
    );

    // ========================================================================
    // Link
    // ========================================================================

    /// Phase ordinal, see `ConnectionPhase::ordinal`.
    pub const LINK_PHASE: Metric = def(
        MetricKind::Gauge,
        "rtrack.link.phase",
        None,
        &[],
        "Current connection phase ordinal",
    );

    pub const LINK_RECONNECTS: Metric = def(
        MetricKind::Counter,
        "rtrack.link.reconnects",
        Some(Unit::Count),
        &[],
        "Socket reconnect attempts",
    );

    pub const LINK_PAIR_FAILURES: Metric = def(
        MetricKind::Counter,
        "rtrack.link.pair_failures",
        Some(Unit::Count),
        &[],
        "Pairing attempts that failed",
    );

    // ========================================================================
    // Commands
    // ========================================================================

    /// Labels: kind (locator_config, receiver_config, deployment_test),
    /// outcome (ack_updated, send_failure, not_acknowledged)
    pub const COMMANDS: Metric = def(
        MetricKind::Counter,
        "rtrack.commands",
        Some(Unit::Count),
        &["kind", "outcome"],
        "Commands resolved, by outcome",
    );

    pub const COMMAND_ACK_LATENCY: Metric = def(
        MetricKind::Histogram,
        "rtrack.commands.ack_latency_ms",
        Some(Unit::Milliseconds),
        &["kind"],
        "Time from command send to acknowledgement",
    );

    pub const ALL: &[&Metric] = &[
        &FRAMES_DECODED,
        &DECODE_ERRORS,
        &FRAMING_DISCARDED_BYTES,
        &FRAMING_OVERFLOWS,
        &LINK_PHASE,
        &LINK_RECONNECTS,
        &LINK_PAIR_FAILURES,
        &COMMANDS,
        &COMMAND_ACK_LATENCY,
    ];
}

/// Describe every tracker metric. Call once, after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_definitions() {
        assert_eq!(metric_defs::FRAMES_DECODED.name, "rtrack.frames.decoded");
        assert_eq!(metric_defs::FRAMES_DECODED.labels, &["kind"]);
        assert_eq!(metric_defs::FRAMING_DISCARDED_BYTES.unit, Some(Unit::Bytes));
        assert_eq!(metric_defs::LINK_PHASE.kind, MetricKind::Gauge);
        assert_eq!(metric_defs::LINK_PHASE.unit, None);
        assert_eq!(metric_defs::COMMAND_ACK_LATENCY.kind, MetricKind::Histogram);
        assert_eq!(metric_defs::COMMANDS.labels, &["kind", "outcome"]);
    }

    #[test]
    fn test_metric_names_are_unique() {
        let mut names: Vec<_> = metric_defs::ALL.iter().map(|m| m.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), metric_defs::ALL.len());
        assert!(names.iter().all(|n| n.starts_with("rtrack.")));
        assert!(metric_defs::ALL.iter().all(|m| !m.help.is_empty()));
    }

    #[test]
    fn test_describe_without_recorder() {
        // With no recorder installed describing is a no-op.
        describe_metrics();
    }
}
