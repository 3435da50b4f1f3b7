//! Binary field decoding and encoding.
//!
//! Every reader takes a buffer and an offset and fails with
//! [`ProtocolError::OutOfRange`] when the field does not fit. The receiver
//! mixes two byte orders:
//!
//! | Shape | Width | Encoding |
//! |-------|-------|----------|
//! | u16 / i16 | 2 | little-endian |
//! | f32 | 4 | bytes reversed, then IEEE-754 big-endian |
//! | f64 | 8 | bytes reversed, then IEEE-754 big-endian |
//! | GPS coordinate | 8 | reversed f64 in NMEA `ddmm.mmmm` packing |
//!
//! The writers produce exactly the bytes the readers consume.

use crate::constants::*;
use crate::error::*;

/// Borrow `width` bytes at `offset`.
fn field(buf: &[u8], offset: usize, width: usize) -> ProtocolResult<&[u8]> {
    let end = offset
        .checked_add(width)
        .ok_or_else(|| ProtocolError::out_of_range(offset, width, buf.len()))?;
    buf.get(offset..end)
        .ok_or_else(|| ProtocolError::out_of_range(offset, width, buf.len()))
}

/// Copy `N` bytes at `offset` in reverse order.
fn reversed<const N: usize>(buf: &[u8], offset: usize) -> ProtocolResult<[u8; N]> {
    let src = field(buf, offset, N)?;
    let mut out = [0u8; N];
    for (dst, byte) in out.iter_mut().zip(src.iter().rev()) {
        *dst = *byte;
    }
    Ok(out)
}

// ============================================================================
// Readers
// ============================================================================

/// Read a single byte.
pub fn read_u8(buf: &[u8], offset: usize) -> ProtocolResult<u8> {
    Ok(field(buf, offset, 1)?[0])
}

/// Read a little-endian u16.
pub fn read_u16_le(buf: &[u8], offset: usize) -> ProtocolResult<u16> {
    let b = field(buf, offset, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

/// Read a little-endian i16.
pub fn read_i16_le(buf: &[u8], offset: usize) -> ProtocolResult<i16> {
    let b = field(buf, offset, 2)?;
    Ok(i16::from_le_bytes([b[0], b[1]]))
}

/// Read a byte-reversed IEEE-754 single.
pub fn read_f32_reversed(buf: &[u8], offset: usize) -> ProtocolResult<f32> {
    Ok(f32::from_be_bytes(reversed::<4>(buf, offset)?))
}

/// Read a byte-reversed IEEE-754 double.
pub fn read_f64_reversed(buf: &[u8], offset: usize) -> ProtocolResult<f64> {
    Ok(f64::from_be_bytes(reversed::<8>(buf, offset)?))
}

/// Read a GPS coordinate packed as NMEA `ddmm.mmmm` and return decimal degrees.
///
/// The degree part is truncated, not rounded: `4512.3456` is 45 degrees and
/// 12.3456 minutes, giving `45.205760`.
pub fn read_gps_coordinate(buf: &[u8], offset: usize) -> ProtocolResult<f64> {
    Ok(nmea_to_degrees(read_f64_reversed(buf, offset)?))
}

/// Convert an NMEA `ddmm.mmmm` value to decimal degrees.
pub fn nmea_to_degrees(raw: f64) -> f64 {
    let degrees = (raw / 100.0).floor();
    let minutes = raw - degrees * 100.0;
    degrees + minutes / 60.0
}

/// Read a u16 fixed-point altitude and scale it.
pub fn read_altitude_u16(buf: &[u8], offset: usize) -> ProtocolResult<f64> {
    Ok(read_u16_le(buf, offset)? as f64 / ALTITUDE_SCALE)
}

/// Read a fixed-width ASCII text field.
///
/// The text ends at the first NUL; trailing spaces are trimmed. Bytes outside
/// printable ASCII read as `?`, so a damaged name never fails the message.
pub fn read_ascii(buf: &[u8], offset: usize, width: usize) -> ProtocolResult<String> {
    let raw = field(buf, offset, width)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let text: String = raw[..end]
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '?'
            }
        })
        .collect();
    Ok(text.trim_end().to_string())
}

// ============================================================================
// Writers
// ============================================================================

/// Append a little-endian u16.
pub fn write_u16_le(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Append a little-endian i16.
pub fn write_i16_le(out: &mut Vec<u8>, value: i16) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Append a byte-reversed IEEE-754 single.
pub fn write_f32_reversed(out: &mut Vec<u8>, value: f32) {
    out.extend(value.to_be_bytes().iter().rev());
}

/// Append a byte-reversed IEEE-754 double.
pub fn write_f64_reversed(out: &mut Vec<u8>, value: f64) {
    out.extend(value.to_be_bytes().iter().rev());
}

/// Append a fixed-width ASCII field, NUL padded and truncated to `width`.
pub fn write_ascii(out: &mut Vec<u8>, text: &str, width: usize) {
    let bytes = text.as_bytes();
    let n = bytes.len().min(width);
    out.extend_from_slice(&bytes[..n]);
    out.resize(out.len() + (width - n), 0);
}
