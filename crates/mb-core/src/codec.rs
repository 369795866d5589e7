//! Self-describing binary frames for timestamp and value arrays.
//!
//! Frame layout, little-endian:
//!
//! ```text
//! byte 0     : tag        (1 = U64, 2 = F32)
//! bytes 1..4 : element count N (uint32)
//! bytes 5..  : N elements, 8 bytes each for U64, 4 bytes each for F32
//! ```
//!
//! The reference encoder this was built from assigns the same tag value to
//! both frame kinds, which looks like a copy-paste bug: a client can't tell
//! a U64 frame from an F32 frame by tag alone. This codec uses two distinct
//! tags instead.

const U64_TAG: u8 = 1;
const F32_TAG: u8 = 2;

/// Encode a `u64` timestamp array as a self-describing frame.
///
/// Output length is exactly `5 + values.len() * 8`; no per-element
/// allocation beyond the output buffer.
pub fn encode_u64(values: &[u64]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(5 + values.len() * 8);
    buf.push(U64_TAG);
    buf.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

/// Encode an `f32` value array as a self-describing frame.
pub fn encode_f32(values: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(5 + values.len() * 4);
    buf.push(F32_TAG);
    buf.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame too short: need at least 5 header bytes, got {0}")]
    Truncated(usize),
    #[error("unexpected tag: expected {expected}, got {actual}")]
    WrongTag { expected: u8, actual: u8 },
    #[error("frame length mismatch: header declares {declared} elements ({expected_bytes} bytes), body has {actual_bytes} bytes")]
    LengthMismatch { declared: u32, expected_bytes: usize, actual_bytes: usize },
}

fn read_header(bytes: &[u8], expected_tag: u8, elem_size: usize) -> Result<u32, DecodeError> {
    if bytes.len() < 5 {
        return Err(DecodeError::Truncated(bytes.len()));
    }
    let tag = bytes[0];
    if tag != expected_tag {
        return Err(DecodeError::WrongTag { expected: expected_tag, actual: tag });
    }
    let count = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    let expected_bytes = 5 + count as usize * elem_size;
    if bytes.len() != expected_bytes {
        return Err(DecodeError::LengthMismatch { declared: count, expected_bytes, actual_bytes: bytes.len() });
    }
    Ok(count)
}

/// Decode a frame produced by [`encode_u64`].
pub fn decode_u64(bytes: &[u8]) -> Result<Vec<u64>, DecodeError> {
    let count = read_header(bytes, U64_TAG, 8)?;
    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let offset = 5 + i * 8;
        let chunk: [u8; 8] = bytes[offset..offset + 8].try_into().unwrap();
        out.push(u64::from_le_bytes(chunk));
    }
    Ok(out)
}

/// Decode a frame produced by [`encode_f32`].
pub fn decode_f32(bytes: &[u8]) -> Result<Vec<f32>, DecodeError> {
    let count = read_header(bytes, F32_TAG, 4)?;
    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let offset = 5 + i * 4;
        let chunk: [u8; 4] = bytes[offset..offset + 4].try_into().unwrap();
        out.push(f32::from_le_bytes(chunk));
    }
    Ok(out)
}
