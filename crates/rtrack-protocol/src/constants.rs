//! Protocol constants
//!
//! Headers, message lengths, field offsets and scale factors of the receiver
//! wire format. All offsets are from the first header byte.

// ============================================================================
// Headers and Lengths
// ============================================================================

/// Length of every message header.
pub const HEADER_LEN: usize = 3;

/// Header of a prelaunch message.
pub const PRELAUNCH_HEADER: [u8; HEADER_LEN] = *b"PRE";
/// Header of an in-flight telemetry message.
pub const TELEMETRY_HEADER: [u8; HEADER_LEN] = *b"TLM";

/// Total length of a prelaunch message, header included.
pub const PRELAUNCH_LEN: usize = 74;
/// Total length of a telemetry message, header included.
pub const TELEMETRY_LEN: usize = 84;

/// Capacity of the framing buffer: the longest known message.
pub const FRAME_BUFFER_CAPACITY: usize = if PRELAUNCH_LEN > TELEMETRY_LEN {
    PRELAUNCH_LEN
} else {
    TELEMETRY_LEN
};

// ============================================================================
// Common GPS Block
// ============================================================================

/// Latitude, reversed-byte double in ddmm.mmmm form.
pub const OFFSET_LATITUDE: usize = 11;
/// Longitude, reversed-byte double in dddmm.mmmm form.
pub const OFFSET_LONGITUDE: usize = 19;
/// GPS fix quality indicator (0 = no fix).
pub const OFFSET_FIX_QUALITY: usize = 27;
/// Number of satellites used in the fix.
pub const OFFSET_SATELLITES: usize = 28;
/// Horizontal dilution of precision, reversed-byte float.
pub const OFFSET_HDOP: usize = 29;

// ============================================================================
// Prelaunch Block
// ============================================================================

/// Sensor health and arming bitfield.
pub const OFFSET_STATUS: usize = 40;
/// Altitude above ground, u16 in tenths of a unit.
pub const OFFSET_PRELAUNCH_AGL: usize = 41;
/// Accelerometer X axis, i16 raw counts.
pub const OFFSET_ACCEL_X: usize = 43;
/// Accelerometer Y axis, i16 raw counts.
pub const OFFSET_ACCEL_Y: usize = 45;
/// Accelerometer Z axis, i16 raw counts.
pub const OFFSET_ACCEL_Z: usize = 47;
/// Active deploy mode selector.
pub const OFFSET_DEPLOY_MODE: usize = 49;
/// Launch detect altitude, u16.
pub const OFFSET_LAUNCH_DETECT_ALTITUDE: usize = 50;
/// Deploy channel 1 delay, u8 seconds.
pub const OFFSET_DEPLOY_DELAY_1: usize = 52;
/// Deploy channel 2 delay, u8 seconds.
pub const OFFSET_DEPLOY_DELAY_2: usize = 53;
/// Deploy channel 1 altitude, u16.
pub const OFFSET_DEPLOY_ALTITUDE_1: usize = 54;
/// Deploy channel 2 altitude, u16.
pub const OFFSET_DEPLOY_ALTITUDE_2: usize = 56;
/// Deploy signal duration, u8.
pub const OFFSET_DEPLOY_SIGNAL_DURATION: usize = 58;
/// Device name, fixed-width ASCII.
pub const OFFSET_DEVICE_NAME: usize = 59;
/// Battery voltage, u16 millivolts.
pub const OFFSET_BATTERY: usize = 71;

/// Width of the device name field.
pub const DEVICE_NAME_LEN: usize = 12;

/// Status bit: altimeter healthy.
pub const STATUS_ALTIMETER_OK: u8 = 1 << 3;
/// Status bit: accelerometer healthy.
pub const STATUS_ACCELEROMETER_OK: u8 = 1 << 2;
/// Status bit: deploy channel 1 armed.
pub const STATUS_CHANNEL_1_ARMED: u8 = 1 << 1;
/// Status bit: deploy channel 2 armed.
pub const STATUS_CHANNEL_2_ARMED: u8 = 1 << 0;

// ============================================================================
// Telemetry Block
// ============================================================================

/// Flight state byte.
pub const OFFSET_FLIGHT_STATE: usize = 40;
/// First altitude-above-ground sample.
pub const OFFSET_AGL_SAMPLES: usize = 41;
/// Width of one altitude sample.
pub const AGL_SAMPLE_WIDTH: usize = 4;
/// Samples per update while in flight.
pub const IN_FLIGHT_SAMPLE_COUNT: usize = 20;
/// Samples per update on the ground.
pub const GROUND_SAMPLE_COUNT: usize = 1;

// ============================================================================
// Scale Factors
// ============================================================================

/// Fixed-point divisor for altitude fields.
pub const ALTITUDE_SCALE: f64 = 10.0;
/// Raw accelerometer counts per g.
pub const ACCEL_COUNTS_PER_G: f64 = 2048.0;
/// Battery voltage divisor (millivolts → volts).
pub const BATTERY_SCALE: f64 = 1000.0;
/// Normalized X-axis ratio beyond which the locator counts as pointing up or down.
pub const ORIENTATION_THRESHOLD: f64 = 0.5;

// ============================================================================
// Request Headers (tracker → receiver)
// ============================================================================

/// Locator configuration request.
pub const LOCATOR_CONFIG_HEADER: [u8; HEADER_LEN] = *b"CFG";
/// Receiver configuration request.
pub const RECEIVER_CONFIG_HEADER: [u8; HEADER_LEN] = *b"RCV";
/// Deployment test request.
pub const DEPLOY_TEST_HEADER: [u8; HEADER_LEN] = *b"TST";
