//! Latest decoded flight data and link status, as published to readers.

use rtrack_protocol::{Message, PrelaunchRecord, TelemetryRecord};
use tokio::time::Instant;

use crate::device::DeviceHandle;
use crate::phase::ConnectionPhase;

/// Most recent record of each kind.
#[derive(Debug, Clone, Default)]
pub struct FlightSnapshot {
    pub prelaunch: Option<PrelaunchRecord>,
    pub telemetry: Option<TelemetryRecord>,
    /// When the last record arrived.
    pub last_update: Option<Instant>,
    /// Records decoded since the tracker started.
    pub records: u64,
}

impl FlightSnapshot {
    /// Fold a decoded message into the snapshot.
    pub fn apply(&mut self, message: Message, now: Instant) {
        match message {
            Message::Prelaunch(record) => self.prelaunch = Some(record),
            Message::Telemetry(record) => self.telemetry = Some(record),
        }
        self.last_update = Some(now);
        self.records += 1;
    }

    /// Whether the locator reports being in flight.
    pub fn in_flight(&self) -> bool {
        self.telemetry
            .as_ref()
            .is_some_and(|t| t.flight_state.in_flight())
    }
}

/// Connection phase plus the devices involved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStatus {
    pub phase: ConnectionPhase,
    /// The remembered device; persist this to reconnect on the next run.
    pub device: Option<DeviceHandle>,
    /// A discovered device waiting for the user to confirm or decline it.
    pub presented: Option<DeviceHandle>,
}
