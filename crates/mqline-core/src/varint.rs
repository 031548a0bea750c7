//! Variable Byte Integer encoding/decoding for MQTT.
//!
//! MQTT uses a variable-length encoding scheme for the fixed header's
//! remaining length and for several MQTT5 fields. Each byte carries 7 bits
//! of value; the high bit indicates whether more bytes follow:
//! - 0-127: 1 byte
//! - 128-16383: 2 bytes
//! - 16384-2097151: 3 bytes
//! - 2097152-268435455: 4 bytes

use crate::error::{ProtocolError, Result};

/// Largest value a variable byte integer can carry.
pub const MAX_VALUE: u32 = 268_435_455;

/// Decode a variable byte integer from a buffer.
///
/// Returns `Ok(Some((value, bytes_consumed)))` if successful,
/// `Ok(None)` if more data is needed, or `Err` if a fourth byte still has
/// the continuation bit set.
///
/// # Example
/// ```
/// use mqline_core::varint::decode;
/// let buf = [0x80, 0x01]; // Encodes 128
/// let (value, consumed) = decode(&buf).unwrap().unwrap();
/// assert_eq!(value, 128);
/// assert_eq!(consumed, 2);
/// ```
pub fn decode(buf: &[u8]) -> Result<Option<(u32, usize)>> {
    let mut value = 0u32;

    for (i, &byte) in buf.iter().enumerate() {
        value |= ((byte & 0x7F) as u32) << (7 * i);

        if (byte & 0x80) == 0 {
            return Ok(Some((value, i + 1)));
        }

        if i == 3 {
            return Err(ProtocolError::InvalidRemainingLength);
        }
    }

    // Need more bytes
    Ok(None)
}

/// Encode a value as a variable byte integer, appending to a Vec.
///
/// Uses the minimal number of bytes. Values above [`MAX_VALUE`] are rejected
/// without touching the buffer.
///
/// # Example
/// ```
/// use mqline_core::varint::encode_to_vec;
/// let mut buf = Vec::new();
/// let written = encode_to_vec(300, &mut buf).unwrap();
/// assert_eq!(written, 2);
/// assert_eq!(&buf, &[0xAC, 0x02]);
/// ```
pub fn encode_to_vec(mut value: u32, buf: &mut Vec<u8>) -> Result<usize> {
    if value > MAX_VALUE {
        return Err(ProtocolError::ValueTooLarge {
            field: "variable byte integer",
            len: value as usize,
            max: MAX_VALUE as usize,
        });
    }
    let start = buf.len();
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
    Ok(buf.len() - start)
}

/// Calculate the number of bytes needed to encode a value.
///
/// # Example
/// ```
/// use mqline_core::varint::encoded_len;
/// assert_eq!(encoded_len(0), 1);
/// assert_eq!(encoded_len(127), 1);
/// assert_eq!(encoded_len(128), 2);
/// assert_eq!(encoded_len(16383), 2);
/// assert_eq!(encoded_len(16384), 3);
/// ```
pub fn encoded_len(mut value: u32) -> usize {
    let mut len = 0;
    loop {
        len += 1;
        value /= 128;
        if value == 0 {
            break;
        }
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_boundaries() {
        assert_eq!(decode(&[0]).unwrap(), Some((0, 1)));
        assert_eq!(decode(&[0x7F]).unwrap(), Some((127, 1)));
        assert_eq!(decode(&[0x80, 0x01]).unwrap(), Some((128, 2)));
        assert_eq!(decode(&[0xFF, 0x7F]).unwrap(), Some((16383, 2)));
        assert_eq!(decode(&[0x80, 0x80, 0x01]).unwrap(), Some((16384, 3)));
        assert_eq!(
            decode(&[0xFF, 0xFF, 0xFF, 0x7F]).unwrap(),
            Some((MAX_VALUE, 4))
        );
    }

    #[test]
    fn test_decode_incomplete() {
        assert_eq!(decode(&[]).unwrap(), None);
        assert_eq!(decode(&[0x80]).unwrap(), None);
        assert_eq!(decode(&[0x80, 0x80, 0x80]).unwrap(), None);
    }

    #[test]
    fn test_decode_fifth_byte_is_error() {
        assert_eq!(
            decode(&[0x80, 0x80, 0x80, 0x80, 0x01]),
            Err(ProtocolError::InvalidRemainingLength)
        );
        // Rejected as soon as the fourth byte shows a continuation.
        assert!(decode(&[0xFF, 0xFF, 0xFF, 0xFF]).is_err());
    }

    #[test]
    fn test_encode_rejects_overflow() {
        let mut buf = vec![0xAA];
        assert!(encode_to_vec(MAX_VALUE + 1, &mut buf).is_err());
        assert_eq!(buf, vec![0xAA]);
    }

    #[test]
    fn test_encoded_len() {
        assert_eq!(encoded_len(2097151), 3);
        assert_eq!(encoded_len(2097152), 4);
        assert_eq!(encoded_len(MAX_VALUE), 4);
    }

    #[test]
    fn test_roundtrip_minimal() {
        let mut value = 0u32;
        while value <= MAX_VALUE {
            let mut buf = Vec::new();
            let written = encode_to_vec(value, &mut buf).unwrap();
            assert_eq!(written, encoded_len(value));
            let (decoded, consumed) = decode(&buf).unwrap().unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, buf.len());
            value = value * 3 + 1;
        }
    }
}
