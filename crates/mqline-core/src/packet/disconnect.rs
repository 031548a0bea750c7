use super::codec::Decoder;
use super::{reason_code, ProtocolVersion};
use crate::error::{ProtocolError, Result};
use crate::property::{
    decode_properties, encode_properties, AuthProperties, DisconnectProperties, PropertySet,
};

/// DISCONNECT packet data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Disconnect {
    /// 0x00 = normal, 0x04 = with will. Not sent on 3.1.1.
    pub reason_code: u8,
    pub properties: DisconnectProperties,
}

impl Disconnect {
    pub fn new(reason_code: u8) -> Self {
        Self {
            reason_code,
            properties: DisconnectProperties::default(),
        }
    }

    pub(crate) fn decode(dec: &mut Decoder<'_>, version: ProtocolVersion) -> Result<Self> {
        let mut disconnect = Self::default();
        if version.is_v5() {
            if !dec.is_empty() {
                disconnect.reason_code = dec.read_u8()?;
            }
            if !dec.is_empty() {
                disconnect.properties = decode_properties(dec)?;
            }
        }
        dec.finish("DISCONNECT")?;
        Ok(disconnect)
    }

    pub(crate) fn encode_body(&self, version: ProtocolVersion, body: &mut Vec<u8>) -> Result<()> {
        if version.is_v5() {
            encode_reason_and_properties(self.reason_code, &self.properties, body)?;
        }
        Ok(())
    }
}

/// AUTH packet data (5.0 only).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Auth {
    pub reason_code: u8,
    pub properties: AuthProperties,
}

impl Auth {
    pub(crate) fn decode(dec: &mut Decoder<'_>, version: ProtocolVersion) -> Result<Self> {
        if !version.is_v5() {
            return Err(ProtocolError::InvalidPacketType(15));
        }
        let mut auth = Self::default();
        if !dec.is_empty() {
            auth.reason_code = dec.read_u8()?;
        }
        if !dec.is_empty() {
            auth.properties = decode_properties(dec)?;
        }
        dec.finish("AUTH")?;
        Ok(auth)
    }

    pub(crate) fn encode_body(&self, version: ProtocolVersion, body: &mut Vec<u8>) -> Result<()> {
        if !version.is_v5() {
            return Err(ProtocolError::InvalidPacketType(15));
        }
        encode_reason_and_properties(self.reason_code, &self.properties, body)
    }
}

/// Reason code and property block may both be omitted when the code is
/// success and there are no properties.
fn encode_reason_and_properties<P: PropertySet>(
    code: u8,
    properties: &P,
    body: &mut Vec<u8>,
) -> Result<()> {
    let has_properties = !properties.is_empty();
    if code != reason_code::SUCCESS || has_properties {
        body.push(code);
    }
    if has_properties {
        encode_properties(properties, body)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{decode_packet, encode_packet, Packet};
    use bytes::Bytes;

    #[test]
    fn test_disconnect_forms() {
        let mut buf = Vec::new();
        encode_packet(&Packet::Disconnect(Disconnect::new(0)), ProtocolVersion::V5, &mut buf)
            .unwrap();
        assert_eq!(buf, vec![0xE0, 0x00]);

        buf.clear();
        encode_packet(
            &Packet::Disconnect(Disconnect::new(reason_code::DISCONNECT_WITH_WILL)),
            ProtocolVersion::V5,
            &mut buf,
        )
        .unwrap();
        assert_eq!(buf, vec![0xE0, 0x01, 0x04]);

        buf.clear();
        encode_packet(
            &Packet::Disconnect(Disconnect::new(reason_code::DISCONNECT_WITH_WILL)),
            ProtocolVersion::V311,
            &mut buf,
        )
        .unwrap();
        assert_eq!(buf, vec![0xE0, 0x00]);
    }

    #[test]
    fn test_server_disconnect_with_reason_string() {
        let mut disconnect = Disconnect::new(reason_code::SERVER_SHUTTING_DOWN);
        disconnect.properties.reason_string = Some("maintenance".into());
        let packet = Packet::Disconnect(disconnect);
        let mut buf = Vec::new();
        encode_packet(&packet, ProtocolVersion::V5, &mut buf).unwrap();
        let (decoded, _) = decode_packet(&buf, ProtocolVersion::V5, 0).unwrap().unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_auth_roundtrip_and_v311_rejection() {
        let packet = Packet::Auth(Auth {
            reason_code: reason_code::CONTINUE_AUTHENTICATION,
            properties: AuthProperties {
                authentication_method: Some("SCRAM-SHA-1".into()),
                authentication_data: Some(Bytes::from_static(b"challenge")),
                ..Default::default()
            },
        });
        let mut buf = Vec::new();
        encode_packet(&packet, ProtocolVersion::V5, &mut buf).unwrap();
        let (decoded, _) = decode_packet(&buf, ProtocolVersion::V5, 0).unwrap().unwrap();
        assert_eq!(decoded, packet);

        assert!(decode_packet(&buf, ProtocolVersion::V311, 0).is_err());
        let mut out = Vec::new();
        assert!(encode_packet(&packet, ProtocolVersion::V311, &mut out).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn test_empty_auth_is_success() {
        let (packet, _) = decode_packet(&[0xF0, 0x00], ProtocolVersion::V5, 0)
            .unwrap()
            .unwrap();
        assert_eq!(packet, Packet::Auth(Auth::default()));
    }
}
