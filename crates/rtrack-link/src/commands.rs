//! Command acknowledgement tracking.
//!
//! Each [`CommandKind`] has one slot. A slot moves
//! `Idle -> SendRequested -> Sent | SendFailure`, then
//! `Sent -> AckUpdated | NotAcknowledged`, and returns to `Idle` only when
//! the presentation layer acknowledges the outcome.

use std::time::Duration;

use rtrack_metrics::metric_defs;
use rtrack_protocol::{Command, CommandKind, Message};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{LinkError, LinkResult};
use crate::phase::ConnectionPhase;

/// Lifecycle of one outstanding command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandAckState {
    #[default]
    Idle,
    SendRequested,
    Sent,
    AckUpdated,
    SendFailure,
    NotAcknowledged,
}

impl CommandAckState {
    /// True for outcomes the user must acknowledge.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CommandAckState::AckUpdated
                | CommandAckState::SendFailure
                | CommandAckState::NotAcknowledged
        )
    }

    fn outcome_label(self) -> &'static str {
        match self {
            CommandAckState::AckUpdated => "ack_updated",
            CommandAckState::SendFailure => "send_failure",
            CommandAckState::NotAcknowledged => "not_acknowledged",
            CommandAckState::Idle => "idle",
            CommandAckState::SendRequested => "send_requested",
            CommandAckState::Sent => "sent",
        }
    }
}

/// Ack state of every command kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AckStates([CommandAckState; 3]);

impl AckStates {
    pub fn get(&self, kind: CommandKind) -> CommandAckState {
        self.0[kind.index()]
    }
}

#[derive(Debug, Default)]
struct Slot {
    state: CommandAckState,
    command: Option<Command>,
    since: Option<Instant>,
}

/// Tracks one outstanding command per kind.
#[derive(Debug)]
pub struct CommandChannel {
    slots: [Slot; 3],
    ack_timeout: Duration,
}

impl CommandChannel {
    pub fn new(ack_timeout: Duration) -> Self {
        CommandChannel {
            slots: Default::default(),
            ack_timeout,
        }
    }

    pub fn state(&self, kind: CommandKind) -> CommandAckState {
        self.slots[kind.index()].state
    }

    pub fn states(&self) -> AckStates {
        AckStates([
            self.slots[0].state,
            self.slots[1].state,
            self.slots[2].state,
        ])
    }

    /// Accept a command for sending.
    ///
    /// Fails with [`LinkError::NotConnected`] unless the phase allows
    /// commands, and with [`LinkError::CommandBusy`] while a command of the
    /// same kind is unresolved. A rejected request changes nothing.
    pub fn request(
        &mut self,
        command: Command,
        phase: ConnectionPhase,
        now: Instant,
    ) -> LinkResult<Vec<u8>> {
        let kind = command.kind();
        if !phase.can_send_commands() {
            return Err(LinkError::NotConnected);
        }
        let slot = &mut self.slots[kind.index()];
        if slot.state != CommandAckState::Idle {
            debug!("Commands: rejecting {}, slot is {:?}", kind, slot.state);
            return Err(LinkError::CommandBusy(kind));
        }
        let bytes = command.encode();
        slot.state = CommandAckState::SendRequested;
        slot.command = Some(command);
        slot.since = Some(now);
        Ok(bytes)
    }

    /// The session wrote the command to the socket.
    pub fn mark_sent(&mut self, kind: CommandKind, now: Instant) {
        let slot = &mut self.slots[kind.index()];
        if slot.state == CommandAckState::SendRequested {
            slot.state = CommandAckState::Sent;
            slot.since = Some(now);
        }
    }

    /// The command could not be written.
    pub fn mark_send_failed(&mut self, kind: CommandKind) {
        let slot = &mut self.slots[kind.index()];
        if slot.state == CommandAckState::SendRequested {
            warn!("Commands: {} send failed", kind);
            resolve(kind, slot, CommandAckState::SendFailure, None);
        }
    }

    /// Check a decoded message against sent commands.
    ///
    /// A locator configuration is acknowledged by a prelaunch message that
    /// reports the requested configuration. Other commands are acknowledged
    /// by the next decoded message.
    pub fn observe(&mut self, message: &Message, now: Instant) -> bool {
        let mut changed = false;
        for kind in CommandKind::ALL {
            let slot = &mut self.slots[kind.index()];
            if slot.state != CommandAckState::Sent {
                continue;
            }
            let acked = match (&slot.command, message) {
                (Some(Command::LocatorConfig(wanted)), Message::Prelaunch(record)) => {
                    record.config == *wanted
                }
                (Some(Command::LocatorConfig(_)), Message::Telemetry(_)) => false,
                (Some(_), _) => true,
                (None, _) => false,
            };
            if acked {
                resolve(kind, slot, CommandAckState::AckUpdated, Some(now));
                changed = true;
            }
        }
        changed
    }

    /// Resolve commands that have waited longer than the ack timeout.
    pub fn poll_timeouts(&mut self, now: Instant) -> bool {
        let mut changed = false;
        for kind in CommandKind::ALL {
            let slot = &mut self.slots[kind.index()];
            let expired = slot.since.is_some_and(|t| now >= t + self.ack_timeout);
            match slot.state {
                CommandAckState::SendRequested if expired => {
                    warn!("Commands: {} never reached the socket", kind);
                    resolve(kind, slot, CommandAckState::SendFailure, None);
                    changed = true;
                }
                CommandAckState::Sent if expired => {
                    warn!("Commands: {} not acknowledged", kind);
                    resolve(kind, slot, CommandAckState::NotAcknowledged, None);
                    changed = true;
                }
                _ => {}
            }
        }
        changed
    }

    /// Earliest time a pending command can time out.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .iter()
            .filter(|s| {
                matches!(
                    s.state,
                    CommandAckState::SendRequested | CommandAckState::Sent
                )
            })
            .filter_map(|s| s.since.map(|t| t + self.ack_timeout))
            .min()
    }

    /// Clear a terminal outcome. Returns false if the slot was not terminal.
    pub fn acknowledge(&mut self, kind: CommandKind) -> bool {
        let slot = &mut self.slots[kind.index()];
        if !slot.state.is_terminal() {
            return false;
        }
        *slot = Slot::default();
        true
    }
}

fn resolve(kind: CommandKind, slot: &mut Slot, outcome: CommandAckState, now: Option<Instant>) {
    if let (Some(now), Some(since)) = (now, slot.since) {
        metrics::histogram!(metric_defs::COMMAND_ACK_LATENCY.name, "kind" => kind.name())
            .record((now - since).as_secs_f64() * 1000.0);
    }
    metrics::counter!(
        metric_defs::COMMANDS.name,
        "kind" => kind.name(),
        "outcome" => outcome.outcome_label()
    )
    .increment(1);
    debug!("Commands: {} -> {:?}", kind, outcome);
    slot.state = outcome;
    slot.since = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtrack_protocol::{
        DeployChannel, FlightState, GpsFix, LocatorConfig, TelemetryRecord,
    };

    fn telemetry() -> Message {
        Message::Telemetry(TelemetryRecord {
            gps: GpsFix::default(),
            flight_state: FlightState::WaitingForLaunch,
            agl_samples: vec![0.0],
            samples_truncated: false,
        })
    }

    fn test_command() -> Command {
        Command::DeploymentTest(DeployChannel::One)
    }

    #[test]
    fn test_gated_by_phase() {
        let mut channel = CommandChannel::new(Duration::from_secs(5));
        let now = Instant::now();
        let err = channel
            .request(test_command(), ConnectionPhase::Pairing, now)
            .unwrap_err();
        assert!(matches!(err, LinkError::NotConnected));
        assert_eq!(channel.state(CommandKind::DeploymentTest), CommandAckState::Idle);
    }

    #[test]
    fn test_second_request_while_sent_is_rejected() {
        let mut channel = CommandChannel::new(Duration::from_secs(5));
        let now = Instant::now();
        let bytes = channel
            .request(test_command(), ConnectionPhase::Connected, now)
            .unwrap();
        assert_eq!(bytes, b"TST\x01".to_vec());
        channel.mark_sent(CommandKind::DeploymentTest, now);
        assert_eq!(channel.state(CommandKind::DeploymentTest), CommandAckState::Sent);

        let err = channel
            .request(
                Command::DeploymentTest(DeployChannel::Two),
                ConnectionPhase::Connected,
                now,
            )
            .unwrap_err();
        assert!(matches!(err, LinkError::CommandBusy(CommandKind::DeploymentTest)));
        assert_eq!(channel.state(CommandKind::DeploymentTest), CommandAckState::Sent);
    }

    #[test]
    fn test_kinds_are_independent() {
        let mut channel = CommandChannel::new(Duration::from_secs(5));
        let now = Instant::now();
        channel
            .request(test_command(), ConnectionPhase::Paired, now)
            .unwrap();
        channel
            .request(
                Command::LocatorConfig(LocatorConfig::default()),
                ConnectionPhase::Paired,
                now,
            )
            .unwrap();
        assert_eq!(
            channel.state(CommandKind::LocatorConfig),
            CommandAckState::SendRequested
        );
    }

    #[test]
    fn test_next_frame_acknowledges_test_command() {
        let mut channel = CommandChannel::new(Duration::from_secs(5));
        let now = Instant::now();
        channel
            .request(test_command(), ConnectionPhase::Connected, now)
            .unwrap();

        // Not yet written: frames do not count.
        assert!(!channel.observe(&telemetry(), now));
        channel.mark_sent(CommandKind::DeploymentTest, now);
        assert!(channel.observe(&telemetry(), now));
        assert_eq!(
            channel.states().get(CommandKind::DeploymentTest),
            CommandAckState::AckUpdated
        );

        assert!(channel.acknowledge(CommandKind::DeploymentTest));
        assert_eq!(channel.state(CommandKind::DeploymentTest), CommandAckState::Idle);
        assert!(!channel.acknowledge(CommandKind::DeploymentTest));
    }

    #[test]
    fn test_locator_config_waits_for_matching_prelaunch() {
        let mut channel = CommandChannel::new(Duration::from_secs(5));
        let now = Instant::now();
        let wanted = LocatorConfig {
            deploy_delay_1: 2,
            device_name: "Kestrel".into(),
            ..LocatorConfig::default()
        };
        channel
            .request(
                Command::LocatorConfig(wanted.clone()),
                ConnectionPhase::Connected,
                now,
            )
            .unwrap();
        channel.mark_sent(CommandKind::LocatorConfig, now);

        assert!(!channel.observe(&telemetry(), now));
        assert_eq!(channel.state(CommandKind::LocatorConfig), CommandAckState::Sent);

        let prelaunch = |config: LocatorConfig| {
            Message::Prelaunch(rtrack_protocol::PrelaunchRecord {
                gps: GpsFix::default(),
                status: Default::default(),
                agl: 0.0,
                accel: Default::default(),
                config,
                battery_volts: 3.9,
            })
        };
        assert!(!channel.observe(&prelaunch(LocatorConfig::default()), now));
        assert!(channel.observe(&prelaunch(wanted), now));
        assert_eq!(
            channel.state(CommandKind::LocatorConfig),
            CommandAckState::AckUpdated
        );
    }

    #[test]
    fn test_timeouts() {
        let mut channel = CommandChannel::new(Duration::from_secs(5));
        let now = Instant::now();
        channel
            .request(test_command(), ConnectionPhase::Connected, now)
            .unwrap();
        channel.mark_sent(CommandKind::DeploymentTest, now);
        assert_eq!(channel.next_deadline(), Some(now + Duration::from_secs(5)));

        assert!(!channel.poll_timeouts(now + Duration::from_secs(4)));
        assert!(channel.poll_timeouts(now + Duration::from_secs(5)));
        assert_eq!(
            channel.state(CommandKind::DeploymentTest),
            CommandAckState::NotAcknowledged
        );
        assert_eq!(channel.next_deadline(), None);
    }

    #[test]
    fn test_send_failure() {
        let mut channel = CommandChannel::new(Duration::from_secs(5));
        let now = Instant::now();
        channel
            .request(test_command(), ConnectionPhase::Paired, now)
            .unwrap();
        channel.mark_send_failed(CommandKind::DeploymentTest);
        assert_eq!(
            channel.state(CommandKind::DeploymentTest),
            CommandAckState::SendFailure
        );
        // A late write report does not revive it.
        channel.mark_sent(CommandKind::DeploymentTest, now);
        assert_eq!(
            channel.state(CommandKind::DeploymentTest),
            CommandAckState::SendFailure
        );
    }
}
