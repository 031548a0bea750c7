//! Client events and connection result types.

use std::time::Duration;

use bytes::Bytes;
use mqline_core::{reason_code, AckProperties, ConnackProperties, PublishProperties, QoS};

use crate::connection::ConnectionState;

/// A message delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Topic the message was published to, with any topic alias resolved.
    pub topic: String,
    /// Message payload.
    pub payload: Bytes,
    /// Quality of Service level.
    pub qos: QoS,
    /// Whether this is a retained message.
    pub retain: bool,
    /// MQTT 5.0 properties (topic alias removed).
    pub properties: PublishProperties,
}

/// What the broker allows on this connection, from CONNACK.
///
/// On MQTT 3.1.1 every capability reads as available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerCapabilities {
    pub maximum_qos: QoS,
    pub retain_available: bool,
    /// Largest packet the broker accepts, if it set a limit.
    pub maximum_packet_size: Option<u32>,
    pub receive_maximum: u16,
    /// Outbound topic aliases the broker accepts.
    pub topic_alias_maximum: u16,
    pub wildcard_subscription_available: bool,
    pub subscription_identifiers_available: bool,
    pub shared_subscription_available: bool,
    pub session_expiry_interval: Option<u32>,
    pub response_information: Option<String>,
    pub server_reference: Option<String>,
}

impl Default for BrokerCapabilities {
    fn default() -> Self {
        Self {
            maximum_qos: QoS::ExactlyOnce,
            retain_available: true,
            maximum_packet_size: None,
            receive_maximum: u16::MAX,
            topic_alias_maximum: 0,
            wildcard_subscription_available: true,
            subscription_identifiers_available: true,
            shared_subscription_available: true,
            session_expiry_interval: None,
            response_information: None,
            server_reference: None,
        }
    }
}

impl BrokerCapabilities {
    pub(crate) fn from_connack(props: &ConnackProperties) -> Self {
        let defaults = Self::default();
        Self {
            maximum_qos: props
                .maximum_qos
                .and_then(|q| QoS::try_from(q).ok())
                .unwrap_or(defaults.maximum_qos),
            retain_available: props.retain_available.unwrap_or(true),
            maximum_packet_size: props.maximum_packet_size,
            receive_maximum: props.receive_maximum.unwrap_or(defaults.receive_maximum),
            topic_alias_maximum: props.topic_alias_maximum.unwrap_or(0),
            wildcard_subscription_available: props.wildcard_subscription_available.unwrap_or(true),
            subscription_identifiers_available: props
                .subscription_identifiers_available
                .unwrap_or(true),
            shared_subscription_available: props.shared_subscription_available.unwrap_or(true),
            session_expiry_interval: props.session_expiry_interval,
            response_information: props.response_information.clone(),
            server_reference: props.server_reference.clone(),
        }
    }
}

/// Result of a successful connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Whether the broker resumed an earlier session.
    pub session_present: bool,
    /// Keep-alive in effect: the broker's server keep-alive if it sent
    /// one, otherwise the configured value.
    pub keep_alive: u16,
    /// Assigned client identifier if the broker sent one, otherwise the
    /// configured one.
    pub client_id: String,
    pub capabilities: BrokerCapabilities,
}

/// Completion of a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    /// `None` for QoS 0.
    pub packet_id: Option<u16>,
    /// Success code from PUBACK / PUBCOMP (e.g. 0x10 no matching subscribers).
    pub reason_code: u8,
    pub properties: AckProperties,
}

impl PublishOutcome {
    pub(crate) fn fire_and_forget() -> Self {
        Self {
            packet_id: None,
            reason_code: reason_code::SUCCESS,
            properties: AckProperties::default(),
        }
    }
}

/// Per-filter result of a subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionResult {
    Granted(QoS),
    Failed(u8),
}

impl SubscriptionResult {
    pub(crate) fn from_code(code: u8) -> Self {
        match QoS::try_from(code) {
            Ok(qos) => SubscriptionResult::Granted(qos),
            Err(_) => SubscriptionResult::Failed(code),
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, SubscriptionResult::Granted(_))
    }
}

/// Per-filter result of an unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscriptionResult {
    Removed,
    /// 5.0 reason 0x11.
    NotSubscribed,
    Failed(u8),
}

impl UnsubscriptionResult {
    pub(crate) fn from_code(code: u8) -> Self {
        match code {
            reason_code::SUCCESS => UnsubscriptionResult::Removed,
            reason_code::NO_SUBSCRIPTION_EXISTED => UnsubscriptionResult::NotSubscribed,
            other => UnsubscriptionResult::Failed(other),
        }
    }
}

/// Connection-level notifications yielded by the EventLoop.
#[derive(Debug, Clone)]
pub enum Event {
    /// Connected to broker.
    Connected(ConnectionInfo),
    /// The connection closed. Carries the broker's DISCONNECT reason when
    /// it sent one, or the code this client sent.
    Disconnected {
        reason_code: Option<u8>,
        reason_string: Option<String>,
    },
    /// A reconnect attempt is scheduled.
    Reconnecting {
        /// Consecutive attempt number (1-based).
        attempt: u32,
        /// Delay before this attempt.
        delay: Duration,
    },
    /// Received a message that no subscription stream matched.
    Message(Message),
    StateChanged(ConnectionState),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_from_connack() {
        let props = ConnackProperties {
            maximum_qos: Some(1),
            retain_available: Some(false),
            maximum_packet_size: Some(1024),
            wildcard_subscription_available: Some(false),
            ..Default::default()
        };
        let caps = BrokerCapabilities::from_connack(&props);
        assert_eq!(caps.maximum_qos, QoS::AtLeastOnce);
        assert!(!caps.retain_available);
        assert_eq!(caps.maximum_packet_size, Some(1024));
        assert!(!caps.wildcard_subscription_available);
        assert!(caps.shared_subscription_available);

        let v311 = BrokerCapabilities::from_connack(&ConnackProperties::default());
        assert_eq!(v311, BrokerCapabilities::default());
    }

    #[test]
    fn test_result_codes() {
        assert_eq!(
            SubscriptionResult::from_code(1),
            SubscriptionResult::Granted(QoS::AtLeastOnce)
        );
        assert_eq!(SubscriptionResult::from_code(0x80), SubscriptionResult::Failed(0x80));
        assert_eq!(
            UnsubscriptionResult::from_code(0x11),
            UnsubscriptionResult::NotSubscribed
        );
        assert_eq!(UnsubscriptionResult::from_code(0x87), UnsubscriptionResult::Failed(0x87));
    }
}
