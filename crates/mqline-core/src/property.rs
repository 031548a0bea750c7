//! MQTT v5 properties.
//!
//! Each packet kind recognises a fixed list of property identifiers. A
//! property set is a plain struct whose fields are those slots; unset slots
//! are `None` (or empty for repeatable properties) and are omitted on encode.
//! Decoding rejects identifiers outside the packet's list and repeated
//! occurrences of a singular property.

use bytes::Bytes;

use crate::error::{ProtocolError, Result};
use crate::packet::codec::{put_binary, put_string, put_u16, put_u32, put_varint, Decoder};

/// Property identifiers defined by MQTT 5.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PropertyId {
    PayloadFormatIndicator = 0x01,
    MessageExpiryInterval = 0x02,
    ContentType = 0x03,
    ResponseTopic = 0x08,
    CorrelationData = 0x09,
    SubscriptionIdentifier = 0x0B,
    SessionExpiryInterval = 0x11,
    AssignedClientIdentifier = 0x12,
    ServerKeepAlive = 0x13,
    AuthenticationMethod = 0x15,
    AuthenticationData = 0x16,
    RequestProblemInformation = 0x17,
    WillDelayInterval = 0x18,
    RequestResponseInformation = 0x19,
    ResponseInformation = 0x1A,
    ServerReference = 0x1C,
    ReasonString = 0x1F,
    ReceiveMaximum = 0x21,
    TopicAliasMaximum = 0x22,
    TopicAlias = 0x23,
    MaximumQos = 0x24,
    RetainAvailable = 0x25,
    UserProperty = 0x26,
    MaximumPacketSize = 0x27,
    WildcardSubscriptionAvailable = 0x28,
    SubscriptionIdentifierAvailable = 0x29,
    SharedSubscriptionAvailable = 0x2A,
}

/// Wire encoding of a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Byte,
    TwoByteInteger,
    FourByteInteger,
    VariableByteInteger,
    String,
    Binary,
    StringPair,
}

impl PropertyId {
    pub fn from_u8(id: u8) -> Option<Self> {
        use PropertyId::*;
        Some(match id {
            0x01 => PayloadFormatIndicator,
            0x02 => MessageExpiryInterval,
            0x03 => ContentType,
            0x08 => ResponseTopic,
            0x09 => CorrelationData,
            0x0B => SubscriptionIdentifier,
            0x11 => SessionExpiryInterval,
            0x12 => AssignedClientIdentifier,
            0x13 => ServerKeepAlive,
            0x15 => AuthenticationMethod,
            0x16 => AuthenticationData,
            0x17 => RequestProblemInformation,
            0x18 => WillDelayInterval,
            0x19 => RequestResponseInformation,
            0x1A => ResponseInformation,
            0x1C => ServerReference,
            0x1F => ReasonString,
            0x21 => ReceiveMaximum,
            0x22 => TopicAliasMaximum,
            0x23 => TopicAlias,
            0x24 => MaximumQos,
            0x25 => RetainAvailable,
            0x26 => UserProperty,
            0x27 => MaximumPacketSize,
            0x28 => WildcardSubscriptionAvailable,
            0x29 => SubscriptionIdentifierAvailable,
            0x2A => SharedSubscriptionAvailable,
            _ => return None,
        })
    }

    pub fn kind(self) -> PropertyKind {
        use PropertyId::*;
        match self {
            PayloadFormatIndicator
            | RequestProblemInformation
            | RequestResponseInformation
            | MaximumQos
            | RetainAvailable
            | WildcardSubscriptionAvailable
            | SubscriptionIdentifierAvailable
            | SharedSubscriptionAvailable => PropertyKind::Byte,
            ServerKeepAlive | ReceiveMaximum | TopicAliasMaximum | TopicAlias => {
                PropertyKind::TwoByteInteger
            }
            MessageExpiryInterval
            | SessionExpiryInterval
            | WillDelayInterval
            | MaximumPacketSize => PropertyKind::FourByteInteger,
            SubscriptionIdentifier => PropertyKind::VariableByteInteger,
            ContentType
            | ResponseTopic
            | AssignedClientIdentifier
            | AuthenticationMethod
            | ResponseInformation
            | ServerReference
            | ReasonString => PropertyKind::String,
            CorrelationData | AuthenticationData => PropertyKind::Binary,
            UserProperty => PropertyKind::StringPair,
        }
    }

    fn field_name(self) -> &'static str {
        match self.kind() {
            PropertyKind::Binary => "binary property",
            _ => "string property",
        }
    }
}

/// A decoded property value. Integer kinds share `Int`; the identifier's
/// [`PropertyKind`] decides the width on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Int(u32),
    String(String),
    Binary(Bytes),
    Pair(String, String),
}

impl PropertyValue {
    fn read(kind: PropertyKind, dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(match kind {
            PropertyKind::Byte => PropertyValue::Int(dec.read_u8()? as u32),
            PropertyKind::TwoByteInteger => PropertyValue::Int(dec.read_u16()? as u32),
            PropertyKind::FourByteInteger => PropertyValue::Int(dec.read_u32()?),
            PropertyKind::VariableByteInteger => {
                PropertyValue::Int(dec.read_variable_byte_integer()?)
            }
            PropertyKind::String => PropertyValue::String(dec.read_string()?),
            PropertyKind::Binary => PropertyValue::Binary(dec.read_binary()?),
            PropertyKind::StringPair => {
                let key = dec.read_string()?;
                let value = dec.read_string()?;
                PropertyValue::Pair(key, value)
            }
        })
    }

    fn write(&self, id: PropertyId, buf: &mut Vec<u8>) -> Result<()> {
        buf.push(id as u8);
        match (id.kind(), self) {
            (PropertyKind::Byte, PropertyValue::Int(v)) => buf.push(*v as u8),
            (PropertyKind::TwoByteInteger, PropertyValue::Int(v)) => put_u16(buf, *v as u16),
            (PropertyKind::FourByteInteger, PropertyValue::Int(v)) => put_u32(buf, *v),
            (PropertyKind::VariableByteInteger, PropertyValue::Int(v)) => put_varint(buf, *v)?,
            (PropertyKind::String, PropertyValue::String(s)) => {
                put_string(buf, id.field_name(), s)?
            }
            (PropertyKind::Binary, PropertyValue::Binary(b)) => {
                put_binary(buf, id.field_name(), b)?
            }
            (PropertyKind::StringPair, PropertyValue::Pair(k, v)) => {
                put_string(buf, "user property key", k)?;
                put_string(buf, "user property value", v)?;
            }
            _ => {
                return Err(ProtocolError::MalformedPacket(format!(
                    "property {:?} has a value of the wrong kind",
                    id
                )))
            }
        }
        Ok(())
    }
}

/// A struct field that stores one property slot.
pub trait PropertyField {
    /// Whether the slot may occur more than once in a single block.
    const REPEATABLE: bool;

    fn store(&mut self, value: PropertyValue);

    fn emit(&self, id: PropertyId, out: &mut Vec<(PropertyId, PropertyValue)>);
}

macro_rules! int_field {
    ($ty:ty) => {
        impl PropertyField for Option<$ty> {
            const REPEATABLE: bool = false;

            fn store(&mut self, value: PropertyValue) {
                if let PropertyValue::Int(v) = value {
                    *self = Some(v as $ty);
                }
            }

            fn emit(&self, id: PropertyId, out: &mut Vec<(PropertyId, PropertyValue)>) {
                if let Some(v) = *self {
                    out.push((id, PropertyValue::Int(v as u32)));
                }
            }
        }
    };
}

int_field!(u8);
int_field!(u16);
int_field!(u32);

impl PropertyField for Option<bool> {
    const REPEATABLE: bool = false;

    fn store(&mut self, value: PropertyValue) {
        if let PropertyValue::Int(v) = value {
            *self = Some(v != 0);
        }
    }

    fn emit(&self, id: PropertyId, out: &mut Vec<(PropertyId, PropertyValue)>) {
        if let Some(v) = *self {
            out.push((id, PropertyValue::Int(v as u32)));
        }
    }
}

impl PropertyField for Option<String> {
    const REPEATABLE: bool = false;

    fn store(&mut self, value: PropertyValue) {
        if let PropertyValue::String(s) = value {
            *self = Some(s);
        }
    }

    fn emit(&self, id: PropertyId, out: &mut Vec<(PropertyId, PropertyValue)>) {
        if let Some(s) = self {
            out.push((id, PropertyValue::String(s.clone())));
        }
    }
}

impl PropertyField for Option<Bytes> {
    const REPEATABLE: bool = false;

    fn store(&mut self, value: PropertyValue) {
        if let PropertyValue::Binary(b) = value {
            *self = Some(b);
        }
    }

    fn emit(&self, id: PropertyId, out: &mut Vec<(PropertyId, PropertyValue)>) {
        if let Some(b) = self {
            out.push((id, PropertyValue::Binary(b.clone())));
        }
    }
}

impl PropertyField for Vec<(String, String)> {
    const REPEATABLE: bool = true;

    fn store(&mut self, value: PropertyValue) {
        if let PropertyValue::Pair(k, v) = value {
            self.push((k, v));
        }
    }

    fn emit(&self, id: PropertyId, out: &mut Vec<(PropertyId, PropertyValue)>) {
        for (k, v) in self {
            out.push((id, PropertyValue::Pair(k.clone(), v.clone())));
        }
    }
}

impl PropertyField for Vec<u32> {
    const REPEATABLE: bool = true;

    fn store(&mut self, value: PropertyValue) {
        if let PropertyValue::Int(v) = value {
            self.push(v);
        }
    }

    fn emit(&self, id: PropertyId, out: &mut Vec<(PropertyId, PropertyValue)>) {
        for v in self {
            out.push((id, PropertyValue::Int(*v)));
        }
    }
}

/// The recognised property slots of one packet kind.
pub trait PropertySet: Default {
    /// Packet name used in error messages.
    const CONTEXT: &'static str;

    fn accepts(id: PropertyId) -> bool;

    fn repeatable(id: PropertyId) -> bool;

    fn set(&mut self, id: PropertyId, value: PropertyValue);

    fn entries(&self, out: &mut Vec<(PropertyId, PropertyValue)>);

    fn is_empty(&self) -> bool {
        let mut out = Vec::new();
        self.entries(&mut out);
        out.is_empty()
    }
}

macro_rules! property_set {
    (
        $(#[$meta:meta])*
        pub struct $name:ident in $context:literal {
            $( $(#[$fmeta:meta])* pub $field:ident : $ty:ty = $id:ident, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )*
        }

        impl PropertySet for $name {
            const CONTEXT: &'static str = $context;

            fn accepts(id: PropertyId) -> bool {
                matches!(id, $( PropertyId::$id )|*)
            }

            fn repeatable(id: PropertyId) -> bool {
                match id {
                    $( PropertyId::$id => <$ty as PropertyField>::REPEATABLE, )*
                    #[allow(unreachable_patterns)]
                    _ => false,
                }
            }

            fn set(&mut self, id: PropertyId, value: PropertyValue) {
                match id {
                    $( PropertyId::$id => self.$field.store(value), )*
                    #[allow(unreachable_patterns)]
                    _ => {}
                }
            }

            fn entries(&self, out: &mut Vec<(PropertyId, PropertyValue)>) {
                $( self.$field.emit(PropertyId::$id, out); )*
            }
        }
    };
}

property_set! {
    /// CONNECT properties.
    pub struct ConnectProperties in "CONNECT" {
        pub session_expiry_interval: Option<u32> = SessionExpiryInterval,
        pub receive_maximum: Option<u16> = ReceiveMaximum,
        pub maximum_packet_size: Option<u32> = MaximumPacketSize,
        pub topic_alias_maximum: Option<u16> = TopicAliasMaximum,
        pub request_response_information: Option<bool> = RequestResponseInformation,
        pub request_problem_information: Option<bool> = RequestProblemInformation,
        pub user_properties: Vec<(String, String)> = UserProperty,
        pub authentication_method: Option<String> = AuthenticationMethod,
        pub authentication_data: Option<Bytes> = AuthenticationData,
    }
}

property_set! {
    /// Will properties, carried in the CONNECT payload.
    pub struct WillProperties in "will" {
        pub will_delay_interval: Option<u32> = WillDelayInterval,
        pub payload_format_indicator: Option<u8> = PayloadFormatIndicator,
        pub message_expiry_interval: Option<u32> = MessageExpiryInterval,
        pub content_type: Option<String> = ContentType,
        pub response_topic: Option<String> = ResponseTopic,
        pub correlation_data: Option<Bytes> = CorrelationData,
        pub user_properties: Vec<(String, String)> = UserProperty,
    }
}

property_set! {
    /// CONNACK properties.
    pub struct ConnackProperties in "CONNACK" {
        pub session_expiry_interval: Option<u32> = SessionExpiryInterval,
        pub receive_maximum: Option<u16> = ReceiveMaximum,
        pub maximum_qos: Option<u8> = MaximumQos,
        pub retain_available: Option<bool> = RetainAvailable,
        pub maximum_packet_size: Option<u32> = MaximumPacketSize,
        pub assigned_client_identifier: Option<String> = AssignedClientIdentifier,
        pub topic_alias_maximum: Option<u16> = TopicAliasMaximum,
        pub reason_string: Option<String> = ReasonString,
        pub user_properties: Vec<(String, String)> = UserProperty,
        pub wildcard_subscription_available: Option<bool> = WildcardSubscriptionAvailable,
        pub subscription_identifiers_available: Option<bool> = SubscriptionIdentifierAvailable,
        pub shared_subscription_available: Option<bool> = SharedSubscriptionAvailable,
        pub server_keep_alive: Option<u16> = ServerKeepAlive,
        pub response_information: Option<String> = ResponseInformation,
        pub server_reference: Option<String> = ServerReference,
        pub authentication_method: Option<String> = AuthenticationMethod,
        pub authentication_data: Option<Bytes> = AuthenticationData,
    }
}

property_set! {
    /// PUBLISH properties.
    pub struct PublishProperties in "PUBLISH" {
        pub payload_format_indicator: Option<u8> = PayloadFormatIndicator,
        pub message_expiry_interval: Option<u32> = MessageExpiryInterval,
        pub topic_alias: Option<u16> = TopicAlias,
        pub response_topic: Option<String> = ResponseTopic,
        pub correlation_data: Option<Bytes> = CorrelationData,
        pub user_properties: Vec<(String, String)> = UserProperty,
        /// Broker to client only; one per matching subscription.
        pub subscription_identifiers: Vec<u32> = SubscriptionIdentifier,
        pub content_type: Option<String> = ContentType,
    }
}

property_set! {
    /// Properties of PUBACK, PUBREC, PUBREL, PUBCOMP, SUBACK and UNSUBACK.
    pub struct AckProperties in "acknowledgement" {
        pub reason_string: Option<String> = ReasonString,
        pub user_properties: Vec<(String, String)> = UserProperty,
    }
}

property_set! {
    /// SUBSCRIBE properties.
    pub struct SubscribeProperties in "SUBSCRIBE" {
        pub subscription_identifier: Option<u32> = SubscriptionIdentifier,
        pub user_properties: Vec<(String, String)> = UserProperty,
    }
}

property_set! {
    /// UNSUBSCRIBE properties.
    pub struct UnsubscribeProperties in "UNSUBSCRIBE" {
        pub user_properties: Vec<(String, String)> = UserProperty,
    }
}

property_set! {
    /// DISCONNECT properties.
    pub struct DisconnectProperties in "DISCONNECT" {
        pub session_expiry_interval: Option<u32> = SessionExpiryInterval,
        pub reason_string: Option<String> = ReasonString,
        pub user_properties: Vec<(String, String)> = UserProperty,
        pub server_reference: Option<String> = ServerReference,
    }
}

property_set! {
    /// AUTH properties.
    pub struct AuthProperties in "AUTH" {
        pub authentication_method: Option<String> = AuthenticationMethod,
        pub authentication_data: Option<Bytes> = AuthenticationData,
        pub reason_string: Option<String> = ReasonString,
        pub user_properties: Vec<(String, String)> = UserProperty,
    }
}

/// Read a length-prefixed property block.
pub fn decode_properties<P: PropertySet>(dec: &mut Decoder<'_>) -> Result<P> {
    let len = dec.read_variable_byte_integer()? as usize;
    let mut block = dec.sub(len)?;
    let mut props = P::default();
    let mut seen = 0u64;

    while !block.is_empty() {
        let raw = block.read_u8()?;
        let id = match PropertyId::from_u8(raw) {
            Some(id) if P::accepts(id) => id,
            _ => {
                return Err(ProtocolError::UnknownProperty {
                    context: P::CONTEXT,
                    id: raw,
                })
            }
        };
        if !P::repeatable(id) {
            let bit = 1u64 << raw;
            if seen & bit != 0 {
                return Err(ProtocolError::DuplicateProperty {
                    context: P::CONTEXT,
                    id: raw,
                });
            }
            seen |= bit;
        }
        let value = PropertyValue::read(id.kind(), &mut block)?;
        props.set(id, value);
    }

    Ok(props)
}

/// Write a property set as a length-prefixed block.
pub fn encode_properties<P: PropertySet>(props: &P, buf: &mut Vec<u8>) -> Result<()> {
    let mut entries = Vec::new();
    props.entries(&mut entries);

    let mut block = Vec::new();
    for (id, value) in &entries {
        value.write(*id, &mut block)?;
    }
    put_varint(buf, block.len() as u32)?;
    buf.extend_from_slice(&block);
    Ok(())
}
