//! MQTT packet types and codec for MQTT 3.1.1 and MQTT 5.0.

pub mod codec;
mod connect;
mod disconnect;
mod publish;
mod subscribe;

pub use connect::{Connack, Connect, LastWill};
pub use disconnect::{Auth, Disconnect};
pub use publish::{PubAck, Publish};
pub use subscribe::{
    RetainHandling, Suback, Subscribe, Subscription, SubscriptionOptions, Unsuback, Unsubscribe,
};

use crate::error::{ProtocolError, Result};
use crate::varint;
use codec::Decoder;

/// MQTT Control Packet Types (4 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    Connack = 2,
    Publish = 3,
    Puback = 4,
    Pubrec = 5,
    Pubrel = 6,
    Pubcomp = 7,
    Subscribe = 8,
    Suback = 9,
    Unsubscribe = 10,
    Unsuback = 11,
    Pingreq = 12,
    Pingresp = 13,
    Disconnect = 14,
    Auth = 15,
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(PacketType::Connect),
            2 => Ok(PacketType::Connack),
            3 => Ok(PacketType::Publish),
            4 => Ok(PacketType::Puback),
            5 => Ok(PacketType::Pubrec),
            6 => Ok(PacketType::Pubrel),
            7 => Ok(PacketType::Pubcomp),
            8 => Ok(PacketType::Subscribe),
            9 => Ok(PacketType::Suback),
            10 => Ok(PacketType::Unsubscribe),
            11 => Ok(PacketType::Unsuback),
            12 => Ok(PacketType::Pingreq),
            13 => Ok(PacketType::Pingresp),
            14 => Ok(PacketType::Disconnect),
            15 => Ok(PacketType::Auth),
            _ => Err(ProtocolError::InvalidPacketType(value)),
        }
    }
}

impl PacketType {
    pub fn name(self) -> &'static str {
        match self {
            PacketType::Connect => "CONNECT",
            PacketType::Connack => "CONNACK",
            PacketType::Publish => "PUBLISH",
            PacketType::Puback => "PUBACK",
            PacketType::Pubrec => "PUBREC",
            PacketType::Pubrel => "PUBREL",
            PacketType::Pubcomp => "PUBCOMP",
            PacketType::Subscribe => "SUBSCRIBE",
            PacketType::Suback => "SUBACK",
            PacketType::Unsubscribe => "UNSUBSCRIBE",
            PacketType::Unsuback => "UNSUBACK",
            PacketType::Pingreq => "PINGREQ",
            PacketType::Pingresp => "PINGRESP",
            PacketType::Disconnect => "DISCONNECT",
            PacketType::Auth => "AUTH",
        }
    }

    /// Flags nibble every packet of this type must carry (PUBLISH excepted).
    fn required_flags(self) -> u8 {
        match self {
            PacketType::Pubrel | PacketType::Subscribe | PacketType::Unsubscribe => 0x02,
            _ => 0x00,
        }
    }
}

/// Quality of Service levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
#[allow(clippy::enum_variant_names)] // MQTT spec names
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(ProtocolError::InvalidQoS(value)),
        }
    }
}

/// Protocol level byte sent in CONNECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ProtocolVersion {
    V311 = 4,
    #[default]
    V5 = 5,
}

impl ProtocolVersion {
    pub fn is_v5(self) -> bool {
        self == ProtocolVersion::V5
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            4 => Ok(ProtocolVersion::V311),
            5 => Ok(ProtocolVersion::V5),
            _ => Err(ProtocolError::UnsupportedProtocolVersion(value)),
        }
    }
}

/// MQTT v5 Reason Codes (used in CONNACK, PUBACK, SUBACK, etc.).
/// These are constants rather than enum values since some codes have the same numeric value
/// with different semantic meanings depending on context.
#[allow(dead_code)]
pub mod reason_code {
    pub const SUCCESS: u8 = 0x00;
    pub const NORMAL_DISCONNECTION: u8 = 0x00;
    pub const GRANTED_QOS_0: u8 = 0x00;
    pub const GRANTED_QOS_1: u8 = 0x01;
    pub const GRANTED_QOS_2: u8 = 0x02;
    pub const DISCONNECT_WITH_WILL: u8 = 0x04;
    pub const NO_MATCHING_SUBSCRIBERS: u8 = 0x10;
    pub const NO_SUBSCRIPTION_EXISTED: u8 = 0x11;
    pub const CONTINUE_AUTHENTICATION: u8 = 0x18;
    pub const RE_AUTHENTICATE: u8 = 0x19;
    pub const UNSPECIFIED_ERROR: u8 = 0x80;
    pub const MALFORMED_PACKET: u8 = 0x81;
    pub const PROTOCOL_ERROR: u8 = 0x82;
    pub const IMPLEMENTATION_SPECIFIC_ERROR: u8 = 0x83;
    pub const UNSUPPORTED_PROTOCOL_VERSION: u8 = 0x84;
    pub const CLIENT_IDENTIFIER_NOT_VALID: u8 = 0x85;
    pub const BAD_USER_NAME_OR_PASSWORD: u8 = 0x86;
    pub const NOT_AUTHORIZED: u8 = 0x87;
    pub const SERVER_UNAVAILABLE: u8 = 0x88;
    pub const SERVER_BUSY: u8 = 0x89;
    pub const BANNED: u8 = 0x8A;
    pub const SERVER_SHUTTING_DOWN: u8 = 0x8B;
    pub const BAD_AUTHENTICATION_METHOD: u8 = 0x8C;
    pub const KEEP_ALIVE_TIMEOUT: u8 = 0x8D;
    pub const SESSION_TAKEN_OVER: u8 = 0x8E;
    pub const TOPIC_FILTER_INVALID: u8 = 0x8F;
    pub const TOPIC_NAME_INVALID: u8 = 0x90;
    pub const PACKET_IDENTIFIER_IN_USE: u8 = 0x91;
    pub const PACKET_IDENTIFIER_NOT_FOUND: u8 = 0x92;
    pub const RECEIVE_MAXIMUM_EXCEEDED: u8 = 0x93;
    pub const TOPIC_ALIAS_INVALID: u8 = 0x94;
    pub const PACKET_TOO_LARGE: u8 = 0x95;
    pub const MESSAGE_RATE_TOO_HIGH: u8 = 0x96;
    pub const QUOTA_EXCEEDED: u8 = 0x97;
    pub const ADMINISTRATIVE_ACTION: u8 = 0x98;
    pub const PAYLOAD_FORMAT_INVALID: u8 = 0x99;
    pub const RETAIN_NOT_SUPPORTED: u8 = 0x9A;
    pub const QOS_NOT_SUPPORTED: u8 = 0x9B;
    pub const USE_ANOTHER_SERVER: u8 = 0x9C;
    pub const SERVER_MOVED: u8 = 0x9D;
    pub const SHARED_SUBSCRIPTIONS_NOT_SUPPORTED: u8 = 0x9E;
    pub const CONNECTION_RATE_EXCEEDED: u8 = 0x9F;
    pub const MAXIMUM_CONNECT_TIME: u8 = 0xA0;
    pub const SUBSCRIPTION_IDENTIFIERS_NOT_SUPPORTED: u8 = 0xA1;
    pub const WILDCARD_SUBSCRIPTIONS_NOT_SUPPORTED: u8 = 0xA2;

    /// MQTT 3.1.1 SUBACK failure return code.
    pub const SUBACK_FAILURE: u8 = 0x80;
}

/// MQTT Packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    Connack(Connack),
    Publish(Publish),
    Puback(PubAck),
    Pubrec(PubAck),
    Pubrel(PubAck),
    Pubcomp(PubAck),
    Subscribe(Subscribe),
    Suback(Suback),
    Unsubscribe(Unsubscribe),
    Unsuback(Unsuback),
    Pingreq,
    Pingresp,
    Disconnect(Disconnect),
    Auth(Auth),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::Connack(_) => PacketType::Connack,
            Packet::Publish(_) => PacketType::Publish,
            Packet::Puback(_) => PacketType::Puback,
            Packet::Pubrec(_) => PacketType::Pubrec,
            Packet::Pubrel(_) => PacketType::Pubrel,
            Packet::Pubcomp(_) => PacketType::Pubcomp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::Suback(_) => PacketType::Suback,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::Unsuback(_) => PacketType::Unsuback,
            Packet::Pingreq => PacketType::Pingreq,
            Packet::Pingresp => PacketType::Pingresp,
            Packet::Disconnect(_) => PacketType::Disconnect,
            Packet::Auth(_) => PacketType::Auth,
        }
    }

    /// Packet identifier, for the kinds that carry one.
    pub fn packet_id(&self) -> Option<u16> {
        match self {
            Packet::Publish(p) => p.packet_id,
            Packet::Puback(a) | Packet::Pubrec(a) | Packet::Pubrel(a) | Packet::Pubcomp(a) => {
                Some(a.packet_id)
            }
            Packet::Subscribe(s) => Some(s.packet_id),
            Packet::Suback(s) => Some(s.packet_id),
            Packet::Unsubscribe(u) => Some(u.packet_id),
            Packet::Unsuback(u) => Some(u.packet_id),
            _ => None,
        }
    }
}

/// Decode the remaining length that follows the fixed header byte.
pub fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>> {
    Ok(varint::decode(buf)?.map(|(value, consumed)| (value as usize, consumed)))
}

/// Try to decode one packet from the front of `buf`.
///
/// Returns `Ok(None)` without consuming anything when the frame is not yet
/// complete. On success returns the packet and the number of bytes it
/// occupied. `max_packet_size` of 0 disables the size check.
pub fn decode_packet(
    buf: &[u8],
    version: ProtocolVersion,
    max_packet_size: u32,
) -> Result<Option<(Packet, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }

    let fixed_header = buf[0];
    let packet_type = PacketType::try_from(fixed_header >> 4)?;
    let flags = fixed_header & 0x0F;

    let Some((remaining_len, len_bytes)) = decode_remaining_length(&buf[1..])? else {
        return Ok(None);
    };

    let header_len = 1 + len_bytes;
    let total_len = header_len + remaining_len;

    if max_packet_size > 0 && total_len > max_packet_size as usize {
        return Err(ProtocolError::PacketTooLarge {
            size: total_len,
            max: max_packet_size as usize,
        });
    }

    if buf.len() < total_len {
        return Ok(None);
    }

    // MQTT-2.1.3-1: reserved flags must match the table exactly
    if packet_type != PacketType::Publish && flags != packet_type.required_flags() {
        return Err(ProtocolError::InvalidFlags {
            packet: packet_type.name(),
            flags,
        });
    }

    let mut dec = Decoder::new(&buf[header_len..total_len]);

    let packet = match packet_type {
        PacketType::Connect => Packet::Connect(Connect::decode(&mut dec)?),
        PacketType::Connack => Packet::Connack(Connack::decode(&mut dec, version)?),
        PacketType::Publish => Packet::Publish(Publish::decode(flags, &mut dec, version)?),
        PacketType::Puback => Packet::Puback(PubAck::decode(&mut dec, version)?),
        PacketType::Pubrec => Packet::Pubrec(PubAck::decode(&mut dec, version)?),
        PacketType::Pubrel => Packet::Pubrel(PubAck::decode(&mut dec, version)?),
        PacketType::Pubcomp => Packet::Pubcomp(PubAck::decode(&mut dec, version)?),
        PacketType::Subscribe => Packet::Subscribe(Subscribe::decode(&mut dec, version)?),
        PacketType::Suback => Packet::Suback(Suback::decode(&mut dec, version)?),
        PacketType::Unsubscribe => Packet::Unsubscribe(Unsubscribe::decode(&mut dec, version)?),
        PacketType::Unsuback => Packet::Unsuback(Unsuback::decode(&mut dec, version)?),
        PacketType::Pingreq => {
            dec.finish("PINGREQ")?;
            Packet::Pingreq
        }
        PacketType::Pingresp => {
            dec.finish("PINGRESP")?;
            Packet::Pingresp
        }
        PacketType::Disconnect => Packet::Disconnect(Disconnect::decode(&mut dec, version)?),
        PacketType::Auth => Packet::Auth(Auth::decode(&mut dec, version)?),
    };

    Ok(Some((packet, total_len)))
}

/// Encode a packet, appending the complete frame to `buf`.
///
/// The body is built in a scratch buffer first, so `buf` is left untouched
/// when any field exceeds a protocol limit.
pub fn encode_packet(packet: &Packet, version: ProtocolVersion, buf: &mut Vec<u8>) -> Result<()> {
    let mut body = Vec::new();
    let flags = match packet {
        Packet::Connect(c) => {
            c.encode_body(&mut body)?;
            0
        }
        Packet::Connack(c) => {
            c.encode_body(version, &mut body)?;
            0
        }
        Packet::Publish(p) => p.encode_body(version, &mut body)?,
        Packet::Puback(a) | Packet::Pubrec(a) | Packet::Pubcomp(a) => {
            a.encode_body(version, &mut body)?;
            0
        }
        Packet::Pubrel(a) => {
            a.encode_body(version, &mut body)?;
            0x02
        }
        Packet::Subscribe(s) => {
            s.encode_body(version, &mut body)?;
            0x02
        }
        Packet::Suback(s) => {
            s.encode_body(version, &mut body)?;
            0
        }
        Packet::Unsubscribe(u) => {
            u.encode_body(version, &mut body)?;
            0x02
        }
        Packet::Unsuback(u) => {
            u.encode_body(version, &mut body)?;
            0
        }
        Packet::Pingreq | Packet::Pingresp => 0,
        Packet::Disconnect(d) => {
            d.encode_body(version, &mut body)?;
            0
        }
        Packet::Auth(a) => {
            a.encode_body(version, &mut body)?;
            0
        }
    };

    let header = ((packet.packet_type() as u8) << 4) | flags;
    codec::frame(header, &body, buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(packet: &Packet, version: ProtocolVersion) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_packet(packet, version, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_incomplete_frame_consumes_nothing() {
        let frame = encode(&Packet::Puback(PubAck::new(7)), ProtocolVersion::V311);
        for cut in 0..frame.len() {
            assert_eq!(
                decode_packet(&frame[..cut], ProtocolVersion::V311, 0).unwrap(),
                None
            );
        }
        let (packet, used) = decode_packet(&frame, ProtocolVersion::V311, 0)
            .unwrap()
            .unwrap();
        assert_eq!(used, frame.len());
        assert_eq!(packet, Packet::Puback(PubAck::new(7)));
    }

    #[test]
    fn test_remaining_length_fifth_byte() {
        let buf = [0x30, 0x80, 0x80, 0x80, 0x80, 0x01];
        assert_eq!(
            decode_packet(&buf, ProtocolVersion::V5, 0),
            Err(ProtocolError::InvalidRemainingLength)
        );
    }

    #[test]
    fn test_reserved_flags_checked() {
        // PUBREL with flags 0000
        let buf = [0x60, 0x02, 0x00, 0x01];
        assert!(matches!(
            decode_packet(&buf, ProtocolVersion::V311, 0),
            Err(ProtocolError::InvalidFlags { packet: "PUBREL", flags: 0 })
        ));
        // PINGRESP with a stray flag
        let buf = [0xD1, 0x00];
        assert!(decode_packet(&buf, ProtocolVersion::V311, 0).is_err());
    }

    #[test]
    fn test_max_packet_size() {
        let frame = encode(&Packet::Pingresp, ProtocolVersion::V5);
        assert_eq!(frame, vec![0xD0, 0x00]);
        let big = [0x30, 0x7F];
        assert_eq!(
            decode_packet(&big, ProtocolVersion::V5, 64),
            Err(ProtocolError::PacketTooLarge { size: 129, max: 64 })
        );
    }

    #[test]
    fn test_invalid_packet_type() {
        assert_eq!(
            decode_packet(&[0x00, 0x00], ProtocolVersion::V5, 0),
            Err(ProtocolError::InvalidPacketType(0))
        );
    }

    #[test]
    fn test_two_frames_back_to_back() {
        let mut buf = encode(&Packet::Pingresp, ProtocolVersion::V311);
        buf.extend(encode(&Packet::Pubcomp(PubAck::new(3)), ProtocolVersion::V311));
        let (first, used) = decode_packet(&buf, ProtocolVersion::V311, 0)
            .unwrap()
            .unwrap();
        assert_eq!(first, Packet::Pingresp);
        let (second, _) = decode_packet(&buf[used..], ProtocolVersion::V311, 0)
            .unwrap()
            .unwrap();
        assert_eq!(second.packet_id(), Some(3));
    }
}
