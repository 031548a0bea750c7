use bytes::Bytes;

use super::codec::{put_binary, put_string, put_u16, Decoder};
use super::{ProtocolVersion, QoS};
use crate::error::{ProtocolError, Result};
use crate::property::{
    decode_properties, encode_properties, ConnackProperties, ConnectProperties, WillProperties,
};

const PROTOCOL_NAME: &str = "MQTT";

/// CONNECT packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub protocol_version: ProtocolVersion,
    /// Clean session (3.1.1) / clean start (5.0).
    pub clean_start: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<LastWill>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
    /// Ignored on 3.1.1.
    pub properties: ConnectProperties,
}

/// Will message carried in CONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub properties: WillProperties,
}

impl Connect {
    pub(crate) fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let name = dec.read_string()?;
        if name != PROTOCOL_NAME {
            return Err(ProtocolError::InvalidProtocolName(name));
        }
        let protocol_version = ProtocolVersion::try_from(dec.read_u8()?)?;
        let is_v5 = protocol_version.is_v5();

        let flags = dec.read_u8()?;
        // MQTT-3.1.2-3: reserved flag must be zero
        if flags & 0x01 != 0 {
            return Err(ProtocolError::MalformedPacket(
                "CONNECT reserved flag is set".into(),
            ));
        }
        let clean_start = flags & 0x02 != 0;
        let has_will = flags & 0x04 != 0;
        let will_qos = QoS::try_from((flags >> 3) & 0x03)?;
        let will_retain = flags & 0x20 != 0;
        let has_password = flags & 0x40 != 0;
        let has_username = flags & 0x80 != 0;

        let keep_alive = dec.read_u16()?;
        let properties = if is_v5 {
            decode_properties(dec)?
        } else {
            ConnectProperties::default()
        };

        let client_id = dec.read_string()?;

        let will = if has_will {
            let properties = if is_v5 {
                decode_properties(dec)?
            } else {
                WillProperties::default()
            };
            let topic = dec.read_string()?;
            let payload = dec.read_binary()?;
            Some(LastWill {
                topic,
                payload,
                qos: will_qos,
                retain: will_retain,
                properties,
            })
        } else {
            None
        };

        let username = if has_username {
            Some(dec.read_string()?)
        } else {
            None
        };
        let password = if has_password {
            Some(dec.read_binary()?)
        } else {
            None
        };
        dec.finish("CONNECT")?;

        Ok(Self {
            protocol_version,
            clean_start,
            keep_alive,
            client_id,
            will,
            username,
            password,
            properties,
        })
    }

    pub(crate) fn encode_body(&self, body: &mut Vec<u8>) -> Result<()> {
        let is_v5 = self.protocol_version.is_v5();

        put_string(body, "protocol name", PROTOCOL_NAME)?;
        body.push(self.protocol_version as u8);

        let mut flags = 0u8;
        if self.clean_start {
            flags |= 0x02;
        }
        if let Some(ref will) = self.will {
            flags |= 0x04;
            flags |= (will.qos as u8) << 3;
            if will.retain {
                flags |= 0x20;
            }
        }
        if self.password.is_some() {
            flags |= 0x40;
        }
        if self.username.is_some() {
            flags |= 0x80;
        }
        body.push(flags);
        put_u16(body, self.keep_alive);

        if is_v5 {
            encode_properties(&self.properties, body)?;
        }

        put_string(body, "client identifier", &self.client_id)?;

        if let Some(ref will) = self.will {
            if is_v5 {
                encode_properties(&will.properties, body)?;
            }
            put_string(body, "will topic", &will.topic)?;
            put_binary(body, "will payload", &will.payload)?;
        }
        if let Some(ref username) = self.username {
            put_string(body, "username", username)?;
        }
        if let Some(ref password) = self.password {
            put_binary(body, "password", password)?;
        }
        Ok(())
    }
}

/// CONNACK packet data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Connack {
    pub session_present: bool,
    /// 3.1.1 return code or 5.0 reason code; 0 means accepted on both.
    pub reason_code: u8,
    pub properties: ConnackProperties,
}

impl Connack {
    pub(crate) fn decode(dec: &mut Decoder<'_>, version: ProtocolVersion) -> Result<Self> {
        let ack_flags = dec.read_u8()?;
        // MQTT-3.2.2-1: bits 7-1 are reserved
        if ack_flags & 0xFE != 0 {
            return Err(ProtocolError::MalformedPacket(format!(
                "CONNACK reserved flags set: {:#04x}",
                ack_flags
            )));
        }
        let reason_code = dec.read_u8()?;
        let properties = if version.is_v5() {
            decode_properties(dec)?
        } else {
            ConnackProperties::default()
        };
        dec.finish("CONNACK")?;

        Ok(Self {
            session_present: ack_flags & 0x01 != 0,
            reason_code,
            properties,
        })
    }

    pub(crate) fn encode_body(&self, version: ProtocolVersion, body: &mut Vec<u8>) -> Result<()> {
        body.push(self.session_present as u8);
        body.push(self.reason_code);
        if version.is_v5() {
            encode_properties(&self.properties, body)?;
        }
        Ok(())
    }
}
