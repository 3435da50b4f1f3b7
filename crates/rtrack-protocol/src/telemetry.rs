//! Translation of complete frames into flight records.

use crate::codec::*;
use crate::constants::*;
use crate::error::*;
use crate::frame::Frame;
use crate::types::*;

/// A decoded receiver message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Prelaunch(PrelaunchRecord),
    Telemetry(TelemetryRecord),
}

impl Message {
    /// Decode a framed message.
    pub fn decode(frame: &Frame) -> ProtocolResult<Self> {
        match frame.kind {
            MessageKind::Prelaunch => Ok(Message::Prelaunch(decode_prelaunch(&frame.bytes)?)),
            MessageKind::Telemetry => Ok(Message::Telemetry(decode_telemetry(&frame.bytes)?)),
        }
    }

    /// Decode raw bytes, identifying the kind from the header.
    pub fn decode_bytes(bytes: &[u8]) -> ProtocolResult<Self> {
        let kind = MessageKind::from_header(bytes).ok_or_else(|| {
            let mut header = [0u8; HEADER_LEN];
            for (dst, src) in header.iter_mut().zip(bytes) {
                *dst = *src;
            }
            ProtocolError::UnknownHeader(header)
        })?;
        match kind {
            MessageKind::Prelaunch => Ok(Message::Prelaunch(decode_prelaunch(bytes)?)),
            MessageKind::Telemetry => Ok(Message::Telemetry(decode_telemetry(bytes)?)),
        }
    }

    /// The kind of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Prelaunch(_) => MessageKind::Prelaunch,
            Message::Telemetry(_) => MessageKind::Telemetry,
        }
    }

    /// GPS block of either message kind.
    pub fn gps(&self) -> &GpsFix {
        match self {
            Message::Prelaunch(r) => &r.gps,
            Message::Telemetry(r) => &r.gps,
        }
    }
}

fn check_length(bytes: &[u8], kind: MessageKind) -> ProtocolResult<()> {
    if bytes.len() != kind.frame_len() {
        return Err(ProtocolError::LengthMismatch {
            kind: kind.name(),
            expected: kind.frame_len(),
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn decode_gps(bytes: &[u8]) -> ProtocolResult<GpsFix> {
    Ok(GpsFix {
        latitude: read_gps_coordinate(bytes, OFFSET_LATITUDE)?,
        longitude: read_gps_coordinate(bytes, OFFSET_LONGITUDE)?,
        fix_quality: read_u8(bytes, OFFSET_FIX_QUALITY)?,
        satellites: read_u8(bytes, OFFSET_SATELLITES)?,
        hdop: read_f32_reversed(bytes, OFFSET_HDOP)?,
    })
}

/// Decode the locator configuration block of a prelaunch message.
pub fn decode_locator_config(bytes: &[u8]) -> ProtocolResult<LocatorConfig> {
    Ok(LocatorConfig {
        deploy_mode: read_u8(bytes, OFFSET_DEPLOY_MODE)?,
        launch_detect_altitude: read_u16_le(bytes, OFFSET_LAUNCH_DETECT_ALTITUDE)?,
        deploy_delay_1: read_u8(bytes, OFFSET_DEPLOY_DELAY_1)?,
        deploy_delay_2: read_u8(bytes, OFFSET_DEPLOY_DELAY_2)?,
        deploy_altitude_1: read_u16_le(bytes, OFFSET_DEPLOY_ALTITUDE_1)?,
        deploy_altitude_2: read_u16_le(bytes, OFFSET_DEPLOY_ALTITUDE_2)?,
        deploy_signal_duration: read_u8(bytes, OFFSET_DEPLOY_SIGNAL_DURATION)?,
        device_name: read_ascii(bytes, OFFSET_DEVICE_NAME, DEVICE_NAME_LEN)?,
    })
}

/// Decode a 74-byte prelaunch message.
pub fn decode_prelaunch(bytes: &[u8]) -> ProtocolResult<PrelaunchRecord> {
    check_length(bytes, MessageKind::Prelaunch)?;
    Ok(PrelaunchRecord {
        gps: decode_gps(bytes)?,
        status: StatusFlags::from_byte(read_u8(bytes, OFFSET_STATUS)?),
        agl: read_altitude_u16(bytes, OFFSET_PRELAUNCH_AGL)?,
        accel: AccelSample {
            x: read_i16_le(bytes, OFFSET_ACCEL_X)?,
            y: read_i16_le(bytes, OFFSET_ACCEL_Y)?,
            z: read_i16_le(bytes, OFFSET_ACCEL_Z)?,
        },
        config: decode_locator_config(bytes)?,
        battery_volts: read_u16_le(bytes, OFFSET_BATTERY)? as f64 / BATTERY_SCALE,
    })
}

/// Decode an 84-byte telemetry message.
///
/// In flight the locator calls for 20 samples but the message only has room
/// for `(84 - 41) / 4 = 10`. The samples that fit are returned and
/// `samples_truncated` is set.
pub fn decode_telemetry(bytes: &[u8]) -> ProtocolResult<TelemetryRecord> {
    check_length(bytes, MessageKind::Telemetry)?;
    let flight_state = FlightState::from_byte(read_u8(bytes, OFFSET_FLIGHT_STATE)?)?;

    let wanted = flight_state.sample_count();
    let room = (bytes.len() - OFFSET_AGL_SAMPLES) / AGL_SAMPLE_WIDTH;
    let count = wanted.min(room);
    let agl_samples = (0..count)
        .map(|i| read_f32_reversed(bytes, OFFSET_AGL_SAMPLES + i * AGL_SAMPLE_WIDTH))
        .collect::<ProtocolResult<Vec<_>>>()?;

    Ok(TelemetryRecord {
        gps: decode_gps(bytes)?,
        flight_state,
        agl_samples,
        samples_truncated: count < wanted,
    })
}

#[cfg(test)]
pub(crate) mod test_frames {
    //! Builders for well-formed receiver messages.

    use super::*;

    pub fn gps_block(buf: &mut [u8], lat_nmea: f64, lon_nmea: f64) {
        let mut gps = Vec::new();
        write_f64_reversed(&mut gps, lat_nmea);
        write_f64_reversed(&mut gps, lon_nmea);
        gps.push(1);
        gps.push(9);
        write_f32_reversed(&mut gps, 0.9);
        buf[OFFSET_LATITUDE..OFFSET_LATITUDE + gps.len()].copy_from_slice(&gps);
    }

    pub fn prelaunch(status: u8, config: &LocatorConfig) -> Vec<u8> {
        let mut buf = vec![0u8; PRELAUNCH_LEN];
        buf[..HEADER_LEN].copy_from_slice(&PRELAUNCH_HEADER);
        gps_block(&mut buf, 4512.3456, 7530.0);
        buf[OFFSET_STATUS] = status;
        buf[OFFSET_PRELAUNCH_AGL..OFFSET_PRELAUNCH_AGL + 2].copy_from_slice(&125u16.to_le_bytes());
        buf[OFFSET_ACCEL_X..OFFSET_ACCEL_X + 2].copy_from_slice(&2048i16.to_le_bytes());
        buf[OFFSET_ACCEL_Y..OFFSET_ACCEL_Y + 2].copy_from_slice(&0i16.to_le_bytes());
        buf[OFFSET_ACCEL_Z..OFFSET_ACCEL_Z + 2].copy_from_slice(&(-100i16).to_le_bytes());
        let block = crate::commands::encode_locator_config_block(config);
        buf[OFFSET_DEPLOY_MODE..OFFSET_DEPLOY_MODE + block.len()].copy_from_slice(&block);
        buf[OFFSET_BATTERY..OFFSET_BATTERY + 2].copy_from_slice(&3700u16.to_le_bytes());
        buf
    }

    pub fn telemetry(state: FlightState, samples: &[f32]) -> Vec<u8> {
        let mut buf = vec![0u8; TELEMETRY_LEN];
        buf[..HEADER_LEN].copy_from_slice(&TELEMETRY_HEADER);
        gps_block(&mut buf, 4512.3456, 7530.0);
        buf[OFFSET_FLIGHT_STATE] = state.index();
        let mut raw = Vec::new();
        for s in samples {
            write_f32_reversed(&mut raw, *s);
        }
        buf[OFFSET_AGL_SAMPLES..OFFSET_AGL_SAMPLES + raw.len()].copy_from_slice(&raw);
        buf
    }
}
