use super::codec::{put_string, put_u16, Decoder};
use super::publish::read_packet_id;
use super::{ProtocolVersion, QoS};
use crate::error::{ProtocolError, Result};
use crate::property::{
    decode_properties, encode_properties, AckProperties, SubscribeProperties,
    UnsubscribeProperties,
};

/// When the broker sends retained messages for a new subscription (5.0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RetainHandling {
    #[default]
    SendAtSubscribe = 0,
    SendAtSubscribeIfNew = 1,
    DoNotSend = 2,
}

/// Subscription options byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscriptionOptions {
    pub qos: QoS,
    pub no_local: bool,
    pub retain_as_published: bool,
    pub retain_handling: RetainHandling,
}

impl SubscriptionOptions {
    /// Parse from SUBSCRIBE options byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        if byte & 0xC0 != 0 {
            return Err(ProtocolError::MalformedPacket(format!(
                "reserved subscription option bits set: {:#04x}",
                byte
            )));
        }
        let retain_handling = match (byte >> 4) & 0x03 {
            0 => RetainHandling::SendAtSubscribe,
            1 => RetainHandling::SendAtSubscribeIfNew,
            2 => RetainHandling::DoNotSend,
            other => {
                return Err(ProtocolError::MalformedPacket(format!(
                    "invalid retain handling: {}",
                    other
                )))
            }
        };
        Ok(Self {
            qos: QoS::try_from(byte & 0x03)?,
            no_local: byte & 0x04 != 0,
            retain_as_published: byte & 0x08 != 0,
            retain_handling,
        })
    }

    /// 3.1.1 only carries the QoS bits.
    pub fn to_byte(self, version: ProtocolVersion) -> u8 {
        let mut byte = self.qos as u8;
        if version.is_v5() {
            if self.no_local {
                byte |= 0x04;
            }
            if self.retain_as_published {
                byte |= 0x08;
            }
            byte |= (self.retain_handling as u8) << 4;
        }
        byte
    }
}

/// One topic filter of a SUBSCRIBE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub filter: String,
    pub options: SubscriptionOptions,
}

impl Subscription {
    pub fn new(filter: impl Into<String>, qos: QoS) -> Self {
        Self {
            filter: filter.into(),
            options: SubscriptionOptions {
                qos,
                ..Default::default()
            },
        }
    }
}

/// SUBSCRIBE packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub subscriptions: Vec<Subscription>,
    pub properties: SubscribeProperties,
}

impl Subscribe {
    pub(crate) fn decode(dec: &mut Decoder<'_>, version: ProtocolVersion) -> Result<Self> {
        let packet_id = read_packet_id(dec)?;
        let properties = if version.is_v5() {
            decode_properties(dec)?
        } else {
            SubscribeProperties::default()
        };
        let mut subscriptions = Vec::new();
        while !dec.is_empty() {
            let filter = dec.read_string()?;
            let options = SubscriptionOptions::from_byte(dec.read_u8()?)?;
            subscriptions.push(Subscription { filter, options });
        }
        // MQTT-3.8.3-3: at least one topic filter
        if subscriptions.is_empty() {
            return Err(ProtocolError::MissingField("topic filter"));
        }
        Ok(Self {
            packet_id,
            subscriptions,
            properties,
        })
    }

    pub(crate) fn encode_body(&self, version: ProtocolVersion, body: &mut Vec<u8>) -> Result<()> {
        if self.subscriptions.is_empty() {
            return Err(ProtocolError::MissingField("topic filter"));
        }
        put_u16(body, self.packet_id);
        if version.is_v5() {
            encode_properties(&self.properties, body)?;
        }
        for sub in &self.subscriptions {
            put_string(body, "topic filter", &sub.filter)?;
            body.push(sub.options.to_byte(version));
        }
        Ok(())
    }
}

/// SUBACK packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suback {
    pub packet_id: u16,
    pub properties: AckProperties,
    /// One per requested filter: granted QoS, or a code of 0x80 and above.
    pub reason_codes: Vec<u8>,
}

impl Suback {
    pub(crate) fn decode(dec: &mut Decoder<'_>, version: ProtocolVersion) -> Result<Self> {
        let packet_id = read_packet_id(dec)?;
        let properties = if version.is_v5() {
            decode_properties(dec)?
        } else {
            AckProperties::default()
        };
        let reason_codes = dec.read_rest().to_vec();
        Ok(Self {
            packet_id,
            properties,
            reason_codes,
        })
    }

    pub(crate) fn encode_body(&self, version: ProtocolVersion, body: &mut Vec<u8>) -> Result<()> {
        put_u16(body, self.packet_id);
        if version.is_v5() {
            encode_properties(&self.properties, body)?;
        }
        body.extend_from_slice(&self.reason_codes);
        Ok(())
    }
}

/// UNSUBSCRIBE packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub filters: Vec<String>,
    pub properties: UnsubscribeProperties,
}

impl Unsubscribe {
    pub(crate) fn decode(dec: &mut Decoder<'_>, version: ProtocolVersion) -> Result<Self> {
        let packet_id = read_packet_id(dec)?;
        let properties = if version.is_v5() {
            decode_properties(dec)?
        } else {
            UnsubscribeProperties::default()
        };
        let mut filters = Vec::new();
        while !dec.is_empty() {
            filters.push(dec.read_string()?);
        }
        if filters.is_empty() {
            return Err(ProtocolError::MissingField("topic filter"));
        }
        Ok(Self {
            packet_id,
            filters,
            properties,
        })
    }

    pub(crate) fn encode_body(&self, version: ProtocolVersion, body: &mut Vec<u8>) -> Result<()> {
        if self.filters.is_empty() {
            return Err(ProtocolError::MissingField("topic filter"));
        }
        put_u16(body, self.packet_id);
        if version.is_v5() {
            encode_properties(&self.properties, body)?;
        }
        for filter in &self.filters {
            put_string(body, "topic filter", filter)?;
        }
        Ok(())
    }
}

/// UNSUBACK packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsuback {
    pub packet_id: u16,
    pub properties: AckProperties,
    /// One per filter on 5.0; always empty on 3.1.1.
    pub reason_codes: Vec<u8>,
}

impl Unsuback {
    pub(crate) fn decode(dec: &mut Decoder<'_>, version: ProtocolVersion) -> Result<Self> {
        let packet_id = read_packet_id(dec)?;
        let (properties, reason_codes) = if version.is_v5() {
            let properties = decode_properties(dec)?;
            (properties, dec.read_rest().to_vec())
        } else {
            dec.finish("UNSUBACK")?;
            (AckProperties::default(), Vec::new())
        };
        Ok(Self {
            packet_id,
            properties,
            reason_codes,
        })
    }

    pub(crate) fn encode_body(&self, version: ProtocolVersion, body: &mut Vec<u8>) -> Result<()> {
        put_u16(body, self.packet_id);
        if version.is_v5() {
            encode_properties(&self.properties, body)?;
            body.extend_from_slice(&self.reason_codes);
        }
        Ok(())
    }
}
