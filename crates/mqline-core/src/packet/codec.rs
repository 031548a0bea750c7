//! Wire primitives shared by every packet body.

use bytes::Bytes;

use crate::error::{ProtocolError, Result};
use crate::varint;

/// Maximum length of a UTF-8 string or binary field.
pub const MAX_FIELD_LEN: usize = u16::MAX as usize;

/// Cursor over one complete packet body.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn incomplete(&self, needed: usize) -> ProtocolError {
        ProtocolError::IncompletePacket {
            needed,
            have: self.remaining(),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self.buf.get(self.pos).ok_or_else(|| self.incomplete(1))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(self.incomplete(len));
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Everything left in the body.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        // MQTT-1.5.4-2: UTF-8 string MUST NOT contain null character U+0000
        if bytes.contains(&0u8) {
            return Err(ProtocolError::MalformedPacket(
                "UTF-8 string must not contain null character".into(),
            ));
        }
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    pub fn read_binary(&mut self) -> Result<Bytes> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        Ok(Bytes::copy_from_slice(bytes))
    }

    pub fn read_variable_byte_integer(&mut self) -> Result<u32> {
        match varint::decode(&self.buf[self.pos..])? {
            Some((value, consumed)) => {
                self.pos += consumed;
                Ok(value)
            }
            None => Err(ProtocolError::MalformedPacket(
                "truncated variable byte integer".into(),
            )),
        }
    }

    /// Split off a sub-decoder of `len` bytes, advancing past it.
    pub fn sub(&mut self, len: usize) -> Result<Decoder<'a>> {
        Ok(Decoder::new(self.read_bytes(len)?))
    }

    /// Fail if any bytes remain after a body that has a fixed layout.
    pub fn finish(&self, packet: &'static str) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::MalformedPacket(format!(
                "{} trailing bytes after {}",
                self.remaining(),
                packet
            )))
        }
    }
}

pub fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn put_varint(buf: &mut Vec<u8>, value: u32) -> Result<()> {
    varint::encode_to_vec(value, buf).map(|_| ())
}

/// Write a length-prefixed field, refusing values that do not fit the
/// 2-byte prefix.
pub fn put_binary(buf: &mut Vec<u8>, field: &'static str, value: &[u8]) -> Result<()> {
    if value.len() > MAX_FIELD_LEN {
        return Err(ProtocolError::ValueTooLarge {
            field,
            len: value.len(),
            max: MAX_FIELD_LEN,
        });
    }
    put_u16(buf, value.len() as u16);
    buf.extend_from_slice(value);
    Ok(())
}

pub fn put_string(buf: &mut Vec<u8>, field: &'static str, value: &str) -> Result<()> {
    put_binary(buf, field, value.as_bytes())
}

/// Append the fixed header, remaining length and body to `out`.
///
/// `out` is untouched when the body cannot be framed.
pub fn frame(header: u8, body: &[u8], out: &mut Vec<u8>) -> Result<()> {
    if body.len() > varint::MAX_VALUE as usize {
        return Err(ProtocolError::PacketTooLarge {
            size: body.len(),
            max: varint::MAX_VALUE as usize,
        });
    }
    out.reserve(1 + varint::encoded_len(body.len() as u32) + body.len());
    out.push(header);
    put_varint(out, body.len() as u32)?;
    out.extend_from_slice(body);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_rejects_null() {
        let mut dec = Decoder::new(&[0x00, 0x02, b'a', 0x00]);
        assert!(dec.read_string().is_err());
    }

    #[test]
    fn test_oversized_string_leaves_buffer_untouched() {
        let mut buf = vec![1, 2, 3];
        let long = "x".repeat(70_000);
        let err = put_string(&mut buf, "topic", &long).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::ValueTooLarge {
                field: "topic",
                len: 70_000,
                max: MAX_FIELD_LEN
            }
        );
        assert_eq!(buf, vec![1, 2, 3]);
    }

    #[test]
    fn test_truncated_reads() {
        let mut dec = Decoder::new(&[0x00]);
        assert!(matches!(
            dec.read_u16(),
            Err(ProtocolError::IncompletePacket { needed: 2, have: 1 })
        ));
    }
}
