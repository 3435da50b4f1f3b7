//! Connection phases.

use std::fmt;
use std::time::Duration;

use crate::config::SupervisionConfig;

/// Why Bluetooth cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnavailableReason {
    /// The user declined to turn the adapter on. Recovers if it is turned on later.
    NotEnabled,
    /// There is no adapter. Terminal for the session.
    NotSupported,
}

/// Progress of device selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectionStatus {
    InProgress,
    NoDevices,
}

/// Where the tracker is in the pairing and connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionPhase {
    #[default]
    Idle,
    Starting,
    BluetoothEnabling,
    BluetoothUnavailable(UnavailableReason),
    Enabled,
    DeviceSelection(SelectionStatus),
    Pairing,
    PairFailed,
    Paired,
    Connected,
    Disconnected,
}

impl ConnectionPhase {
    /// Stable ordinal, published as the phase gauge.
    pub fn ordinal(&self) -> u8 {
        match self {
            ConnectionPhase::Idle => 0,
            ConnectionPhase::Starting => 1,
            ConnectionPhase::BluetoothEnabling => 2,
            ConnectionPhase::BluetoothUnavailable(_) => 3,
            ConnectionPhase::Enabled => 4,
            ConnectionPhase::DeviceSelection(_) => 5,
            ConnectionPhase::Pairing => 6,
            ConnectionPhase::PairFailed => 7,
            ConnectionPhase::Paired => 8,
            ConnectionPhase::Connected => 9,
            ConnectionPhase::Disconnected => 10,
        }
    }

    /// Whether commands may be sent in this phase.
    pub fn can_send_commands(&self) -> bool {
        matches!(self, ConnectionPhase::Paired | ConnectionPhase::Connected)
    }

    /// Whether the device is bonded and a socket is wanted.
    pub fn is_linked(&self) -> bool {
        matches!(
            self,
            ConnectionPhase::Paired | ConnectionPhase::Connected | ConnectionPhase::Disconnected
        )
    }

    /// How often the supervisor re-evaluates this phase.
    pub fn supervision_interval(&self, config: &SupervisionConfig) -> Duration {
        let ms = match self {
            ConnectionPhase::Starting
            | ConnectionPhase::BluetoothEnabling
            | ConnectionPhase::Enabled
            | ConnectionPhase::DeviceSelection(_)
            | ConnectionPhase::Pairing => config.fast_ms,
            ConnectionPhase::Idle
            | ConnectionPhase::BluetoothUnavailable(_)
            | ConnectionPhase::PairFailed => config.slow_ms,
            ConnectionPhase::Paired | ConnectionPhase::Connected | ConnectionPhase::Disconnected => {
                config.steady_ms
            }
        };
        Duration::from_millis(ms)
    }
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionPhase::Idle => f.write_str("idle"),
            ConnectionPhase::Starting => f.write_str("starting"),
            ConnectionPhase::BluetoothEnabling => f.write_str("enabling bluetooth"),
            ConnectionPhase::BluetoothUnavailable(UnavailableReason::NotEnabled) => {
                f.write_str("bluetooth not enabled")
            }
            ConnectionPhase::BluetoothUnavailable(UnavailableReason::NotSupported) => {
                f.write_str("bluetooth not supported")
            }
            ConnectionPhase::Enabled => f.write_str("enabled"),
            ConnectionPhase::DeviceSelection(SelectionStatus::InProgress) => {
                f.write_str("selecting device")
            }
            ConnectionPhase::DeviceSelection(SelectionStatus::NoDevices) => {
                f.write_str("no devices found")
            }
            ConnectionPhase::Pairing => f.write_str("pairing"),
            ConnectionPhase::PairFailed => f.write_str("pair failed"),
            ConnectionPhase::Paired => f.write_str("paired"),
            ConnectionPhase::Connected => f.write_str("connected"),
            ConnectionPhase::Disconnected => f.write_str("disconnected"),
        }
    }
}
