//! Common types used in the protocol.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::*;

// ============================================================================
// Message Kinds
// ============================================================================

/// The two message kinds the receiver streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Ground status: GPS, sensors, arming and locator configuration.
    Prelaunch,
    /// Flight status: GPS, flight state and altitude samples.
    Telemetry,
}

impl MessageKind {
    /// All message kinds, in header-match order.
    pub const ALL: [MessageKind; 2] = [MessageKind::Prelaunch, MessageKind::Telemetry];

    /// The 3-byte header that introduces this kind.
    pub fn header(self) -> [u8; HEADER_LEN] {
        match self {
            MessageKind::Prelaunch => PRELAUNCH_HEADER,
            MessageKind::Telemetry => TELEMETRY_HEADER,
        }
    }

    /// Total message length, header included.
    pub fn frame_len(self) -> usize {
        match self {
            MessageKind::Prelaunch => PRELAUNCH_LEN,
            MessageKind::Telemetry => TELEMETRY_LEN,
        }
    }

    /// Match a header at the start of `bytes`.
    pub fn from_header(bytes: &[u8]) -> Option<Self> {
        let header = bytes.get(..HEADER_LEN)?;
        Self::ALL.into_iter().find(|kind| kind.header() == header)
    }

    /// Short lowercase name, used in logs and metric labels.
    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Prelaunch => "prelaunch",
            MessageKind::Telemetry => "telemetry",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Flight State
// ============================================================================

/// Flight progression reported by the locator.
///
/// Variants are declared in progression order; the derived `Ord` follows
/// that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FlightState {
    WaitingForLaunch,
    Launched,
    Burnout,
    Noseover,
    DrogueDeployed,
    DrogueBackupDeployed,
    MainDeployed,
    MainBackupDeployed,
    Landed,
    NoSignal,
}

impl FlightState {
    /// All states in progression order.
    pub const ALL: [FlightState; 10] = [
        FlightState::WaitingForLaunch,
        FlightState::Launched,
        FlightState::Burnout,
        FlightState::Noseover,
        FlightState::DrogueDeployed,
        FlightState::DrogueBackupDeployed,
        FlightState::MainDeployed,
        FlightState::MainBackupDeployed,
        FlightState::Landed,
        FlightState::NoSignal,
    ];

    /// Decode the wire byte.
    pub fn from_byte(byte: u8) -> ProtocolResult<Self> {
        Self::ALL
            .get(byte as usize)
            .copied()
            .ok_or(ProtocolError::UnknownFlightState(byte))
    }

    /// Progression index, equal to the wire byte.
    pub fn index(self) -> u8 {
        self as u8
    }

    /// True strictly between `Launched` and `Landed`.
    pub fn in_flight(self) -> bool {
        self > FlightState::Launched && self < FlightState::Landed
    }

    /// True once the flight can make no further progress.
    pub fn is_terminal(self) -> bool {
        matches!(self, FlightState::Landed | FlightState::NoSignal)
    }

    /// Number of altitude samples the locator sends per update in this state.
    pub fn sample_count(self) -> usize {
        if self.in_flight() {
            IN_FLIGHT_SAMPLE_COUNT
        } else {
            GROUND_SAMPLE_COUNT
        }
    }
}

impl fmt::Display for FlightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlightState::WaitingForLaunch => "waiting for launch",
            FlightState::Launched => "launched",
            FlightState::Burnout => "burnout",
            FlightState::Noseover => "noseover",
            FlightState::DrogueDeployed => "drogue deployed",
            FlightState::DrogueBackupDeployed => "drogue backup deployed",
            FlightState::MainDeployed => "main deployed",
            FlightState::MainBackupDeployed => "main backup deployed",
            FlightState::Landed => "landed",
            FlightState::NoSignal => "no signal",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Sensors
// ============================================================================

/// Which way the locator's X axis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    Up,
    Down,
    Side,
}

/// Raw 3-axis accelerometer sample in counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccelSample {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl AccelSample {
    /// Create a sample from raw counts.
    pub fn new(x: i16, y: i16, z: i16) -> Self {
        AccelSample { x, y, z }
    }

    /// Magnitude of the sample in g.
    pub fn g_force(&self) -> f64 {
        let x = self.x as f64;
        let y = self.y as f64;
        let z = self.z as f64;
        (x * x + y * y + z * z).sqrt() / ACCEL_COUNTS_PER_G
    }

    /// Classify the X axis against the ±0.5 thresholds.
    pub fn orientation(&self) -> Orientation {
        let g = self.g_force();
        if g == 0.0 {
            return Orientation::Side;
        }
        let ratio = (self.x as f64 / ACCEL_COUNTS_PER_G) / g;
        if ratio > ORIENTATION_THRESHOLD {
            Orientation::Up
        } else if ratio < -ORIENTATION_THRESHOLD {
            Orientation::Down
        } else {
            Orientation::Side
        }
    }
}

/// Sensor health and deploy arming, unpacked from the status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusFlags {
    pub altimeter_ok: bool,
    pub accelerometer_ok: bool,
    pub channel_1_armed: bool,
    pub channel_2_armed: bool,
}

impl StatusFlags {
    /// Unpack the status byte. Bits above bit 3 are ignored.
    pub fn from_byte(byte: u8) -> Self {
        StatusFlags {
            altimeter_ok: byte & STATUS_ALTIMETER_OK != 0,
            accelerometer_ok: byte & STATUS_ACCELEROMETER_OK != 0,
            channel_1_armed: byte & STATUS_CHANNEL_1_ARMED != 0,
            channel_2_armed: byte & STATUS_CHANNEL_2_ARMED != 0,
        }
    }

    /// Pack back into a status byte.
    pub fn to_byte(self) -> u8 {
        let mut byte = 0;
        if self.altimeter_ok {
            byte |= STATUS_ALTIMETER_OK;
        }
        if self.accelerometer_ok {
            byte |= STATUS_ACCELEROMETER_OK;
        }
        if self.channel_1_armed {
            byte |= STATUS_CHANNEL_1_ARMED;
        }
        if self.channel_2_armed {
            byte |= STATUS_CHANNEL_2_ARMED;
        }
        byte
    }

    /// Whether the given deploy channel is armed.
    pub fn is_armed(&self, channel: DeployChannel) -> bool {
        match channel {
            DeployChannel::One => self.channel_1_armed,
            DeployChannel::Two => self.channel_2_armed,
        }
    }
}

/// GPS block shared by both message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GpsFix {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Fix quality indicator (0 = no fix).
    pub fix_quality: u8,
    /// Satellites used in the fix.
    pub satellites: u8,
    /// Horizontal dilution of precision.
    pub hdop: f32,
}

impl GpsFix {
    /// Whether the receiver reports a usable fix.
    pub fn has_fix(&self) -> bool {
        self.fix_quality != 0
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// One of the locator's two deployment channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeployChannel {
    One,
    Two,
}

impl DeployChannel {
    /// Channel number as sent on the wire.
    pub fn number(self) -> u8 {
        match self {
            DeployChannel::One => 1,
            DeployChannel::Two => 2,
        }
    }

    /// Parse a channel number.
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(DeployChannel::One),
            2 => Some(DeployChannel::Two),
            _ => None,
        }
    }
}

/// Locator-side deployment configuration.
///
/// Altitudes are carried in the locator's raw units; only the measured AGL
/// fields are fixed point.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Active deploy mode selector.
    pub deploy_mode: u8,
    /// Altitude that counts as a launch.
    pub launch_detect_altitude: u16,
    /// Channel 1 delay after apogee, seconds.
    pub deploy_delay_1: u8,
    /// Channel 2 delay after apogee, seconds.
    pub deploy_delay_2: u8,
    /// Channel 1 deploy altitude.
    pub deploy_altitude_1: u16,
    /// Channel 2 deploy altitude.
    pub deploy_altitude_2: u16,
    /// How long a deploy signal is held.
    pub deploy_signal_duration: u8,
    /// Locator name, at most 12 ASCII bytes.
    pub device_name: String,
}

/// Receiver-side radio configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Radio channel.
    pub channel: u8,
    /// Name of the locator the receiver listens for.
    pub locator_name: String,
}

// ============================================================================
// Decoded Records
// ============================================================================

/// A decoded prelaunch message.
#[derive(Debug, Clone, PartialEq)]
pub struct PrelaunchRecord {
    pub gps: GpsFix,
    pub status: StatusFlags,
    /// Altitude above ground level.
    pub agl: f64,
    pub accel: AccelSample,
    pub config: LocatorConfig,
    /// Battery voltage in volts.
    pub battery_volts: f64,
}

impl PrelaunchRecord {
    /// Orientation derived from the accelerometer sample.
    pub fn orientation(&self) -> Orientation {
        self.accel.orientation()
    }
}

/// A decoded telemetry message.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub gps: GpsFix,
    pub flight_state: FlightState,
    /// Altitude-above-ground samples, oldest first, in the unit the locator
    /// sends. Unlike the prelaunch AGL these are not divided by ten.
    pub agl_samples: Vec<f32>,
    /// Set when the frame could not hold every sample the state calls for.
    pub samples_truncated: bool,
}

impl TelemetryRecord {
    /// Most recent altitude sample.
    pub fn latest_agl(&self) -> Option<f32> {
        self.agl_samples.last().copied()
    }
}
