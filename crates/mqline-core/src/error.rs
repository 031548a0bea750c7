//! Error types for the MQTT codec.

use thiserror::Error;

use crate::packet::reason_code;

/// Framing, parse and encode failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("Invalid fixed header flags {flags:#04x} for {packet}")]
    InvalidFlags { packet: &'static str, flags: u8 },

    #[error("Invalid remaining length encoding")]
    InvalidRemainingLength,

    #[error("Incomplete packet: need {needed} bytes, have {have}")]
    IncompletePacket { needed: usize, have: usize },

    #[error("Invalid protocol name: expected 'MQTT', got '{0}'")]
    InvalidProtocolName(String),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(u8),

    #[error("Invalid UTF-8 string")]
    InvalidUtf8,

    #[error("Invalid QoS: {0}")]
    InvalidQoS(u8),

    #[error("Missing mandatory field: {0}")]
    MissingField(&'static str),

    #[error("Unknown property {id:#04x} in {context}")]
    UnknownProperty { context: &'static str, id: u8 },

    #[error("Property {id:#04x} appears more than once in {context}")]
    DuplicateProperty { context: &'static str, id: u8 },

    #[error("{field} is {len} bytes, maximum is {max}")]
    ValueTooLarge {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("Packet too large: {size} bytes exceeds maximum {max}")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Invalid topic alias: {0}")]
    TopicAliasInvalid(u16),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),
}

impl ProtocolError {
    /// Reason code carried by the MQTT5 DISCONNECT sent when this error
    /// closes a connection.
    pub fn disconnect_reason(&self) -> u8 {
        match self {
            ProtocolError::InvalidPacketType(_)
            | ProtocolError::InvalidFlags { .. }
            | ProtocolError::UnsupportedProtocolVersion(_)
            | ProtocolError::UnknownProperty { .. }
            | ProtocolError::DuplicateProperty { .. } => reason_code::PROTOCOL_ERROR,
            ProtocolError::PacketTooLarge { .. } => reason_code::PACKET_TOO_LARGE,
            ProtocolError::TopicAliasInvalid(_) => reason_code::TOPIC_ALIAS_INVALID,
            _ => reason_code::MALFORMED_PACKET,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
