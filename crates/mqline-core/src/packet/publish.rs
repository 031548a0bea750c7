use bytes::Bytes;

use super::codec::{put_string, put_u16, Decoder};
use super::{reason_code, ProtocolVersion, QoS};
use crate::error::{ProtocolError, Result};
use crate::property::{
    decode_properties, encode_properties, AckProperties, PropertySet, PublishProperties,
};

/// PUBLISH packet data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    /// May be empty on 5.0 when a topic alias is set.
    pub topic: String,
    /// Present iff `qos` is above 0.
    pub packet_id: Option<u16>,
    pub properties: PublishProperties,
    pub payload: Bytes,
}

impl Publish {
    pub fn new(topic: impl Into<String>, qos: QoS, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            qos,
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub(crate) fn decode(
        flags: u8,
        dec: &mut Decoder<'_>,
        version: ProtocolVersion,
    ) -> Result<Self> {
        let dup = flags & 0x08 != 0;
        let qos = QoS::try_from((flags >> 1) & 0x03)?;
        let retain = flags & 0x01 != 0;

        // MQTT-3.3.1-2: DUP must be 0 for QoS 0
        if dup && qos == QoS::AtMostOnce {
            return Err(ProtocolError::MalformedPacket(
                "DUP flag set on QoS 0 PUBLISH".into(),
            ));
        }

        let topic = dec.read_string()?;
        let packet_id = if qos != QoS::AtMostOnce {
            Some(read_packet_id(dec)?)
        } else {
            None
        };
        let properties = if version.is_v5() {
            decode_properties(dec)?
        } else {
            PublishProperties::default()
        };
        let payload = Bytes::copy_from_slice(dec.read_rest());

        Ok(Self {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            properties,
            payload,
        })
    }

    /// Writes the body and returns the fixed header flags.
    pub(crate) fn encode_body(&self, version: ProtocolVersion, body: &mut Vec<u8>) -> Result<u8> {
        put_string(body, "topic", &self.topic)?;
        if self.qos != QoS::AtMostOnce {
            let id = self
                .packet_id
                .filter(|id| *id != 0)
                .ok_or(ProtocolError::MissingField("packet identifier"))?;
            put_u16(body, id);
        }
        if version.is_v5() {
            encode_properties(&self.properties, body)?;
        }
        body.extend_from_slice(&self.payload);

        let mut flags = (self.qos as u8) << 1;
        if self.dup {
            flags |= 0x08;
        }
        if self.retain {
            flags |= 0x01;
        }
        Ok(flags)
    }
}

/// PUBACK, PUBREC, PUBREL and PUBCOMP share one layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubAck {
    pub packet_id: u16,
    /// Always 0 on 3.1.1.
    pub reason_code: u8,
    pub properties: AckProperties,
}

impl PubAck {
    pub fn new(packet_id: u16) -> Self {
        Self::with_reason(packet_id, reason_code::SUCCESS)
    }

    pub fn with_reason(packet_id: u16, reason_code: u8) -> Self {
        Self {
            packet_id,
            reason_code,
            properties: AckProperties::default(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.reason_code >= 0x80
    }

    pub(crate) fn decode(dec: &mut Decoder<'_>, version: ProtocolVersion) -> Result<Self> {
        let packet_id = read_packet_id(dec)?;
        let mut ack = Self::new(packet_id);
        if version.is_v5() {
            // MQTT-3.4.2.1: reason code and properties may be omitted
            if !dec.is_empty() {
                ack.reason_code = dec.read_u8()?;
            }
            if !dec.is_empty() {
                ack.properties = decode_properties(dec)?;
            }
        }
        dec.finish("acknowledgement")?;
        Ok(ack)
    }

    pub(crate) fn encode_body(&self, version: ProtocolVersion, body: &mut Vec<u8>) -> Result<()> {
        put_u16(body, self.packet_id);
        if version.is_v5() {
            let has_properties = !self.properties.is_empty();
            if self.reason_code != reason_code::SUCCESS || has_properties {
                body.push(self.reason_code);
            }
            if has_properties {
                encode_properties(&self.properties, body)?;
            }
        }
        Ok(())
    }
}

pub(crate) fn read_packet_id(dec: &mut Decoder<'_>) -> Result<u16> {
    match dec.read_u16()? {
        0 => Err(ProtocolError::MissingField("packet identifier")),
        id => Ok(id),
    }
}
