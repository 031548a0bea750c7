//! Will message (Last Will and Testament) support.
//!
//! Implements requirements:
//! - [MQTT-3.1.2-8] If Will Flag is set, Will Message MUST be stored and published on abnormal disconnect
//! - [MQTT-3.1.2-9] Will Topic and Will Message fields MUST be present if Will Flag is set

use std::time::Duration;

use bytes::Bytes;
use mqline_core::{LastWill, QoS, WillProperties};

/// Last Will and Testament message.
///
/// The Will Message is published by the broker if the client disconnects
/// unexpectedly (without sending DISCONNECT), or when the client disconnects
/// with `send_will` set on MQTT 5.0.
#[derive(Debug, Clone)]
pub struct Will {
    /// Topic to publish the will message to.
    pub topic: String,
    /// Will message payload.
    pub payload: Bytes,
    /// QoS level for will message delivery.
    pub qos: QoS,
    /// Whether the will message should be retained.
    pub retain: bool,
    /// MQTT 5.0 will properties; ignored on 3.1.1.
    pub properties: WillProperties,
}

impl Will {
    /// Create a new will message with QoS 0 and no retain.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
            properties: WillProperties::default(),
        }
    }

    /// Set the QoS level for the will message.
    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Set whether the will message should be retained.
    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    /// Delay publication of the will after the connection drops (5.0).
    pub fn delay(mut self, delay: Duration) -> Self {
        self.properties.will_delay_interval = Some(delay.as_secs().min(u32::MAX as u64) as u32);
        self
    }

    /// Lifetime of the will message once published (5.0).
    pub fn message_expiry(mut self, expiry: Duration) -> Self {
        self.properties.message_expiry_interval =
            Some(expiry.as_secs().min(u32::MAX as u64) as u32);
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.properties.content_type = Some(content_type.into());
        self
    }

    pub fn response_topic(mut self, topic: impl Into<String>) -> Self {
        self.properties.response_topic = Some(topic.into());
        self
    }

    pub fn correlation_data(mut self, data: impl Into<Bytes>) -> Self {
        self.properties.correlation_data = Some(data.into());
        self
    }

    pub fn user_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties
            .user_properties
            .push((key.into(), value.into()));
        self
    }

    pub(crate) fn to_packet(&self) -> LastWill {
        LastWill {
            topic: self.topic.clone(),
            payload: self.payload.clone(),
            qos: self.qos,
            retain: self.retain,
            properties: self.properties.clone(),
        }
    }
}
