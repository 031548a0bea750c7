//! Inbound QoS delivery: acknowledges broker-pushed PUBLISH packets and
//! holds QoS 2 messages until their PUBREL.
//!
//! QoS 1 is acknowledged before delivery. A QoS 2 PUBLISH is stored on first
//! receipt and delivered on PUBREL, so a retransmission with the same
//! identifier is acknowledged again but never delivered twice.

use ahash::AHashMap;
use mqline_core::{reason_code, Packet, ProtocolError, PubAck, Publish, QoS};

use crate::error::Result;
use crate::events::Message;
use crate::outbox::Outbox;

/// Per-client QoS receive state.
///
/// The QoS 2 store survives reconnects when the broker resumes the session.
/// The inbound topic alias table never does.
#[derive(Debug, Default)]
pub(crate) struct QosDelivery {
    /// QoS 2 messages acknowledged with PUBREC, awaiting PUBREL.
    pending: AHashMap<u16, Message>,
    aliases: AHashMap<u16, String>,
    alias_max: u16,
}

impl QosDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connection was accepted. `alias_max` is the topic alias maximum this
    /// client advertised.
    pub fn on_connected(&mut self, session_present: bool, alias_max: u16) {
        if !session_present && !self.pending.is_empty() {
            log::debug!(
                "Session not resumed, dropping {} unreleased QoS 2 messages",
                self.pending.len()
            );
            self.pending.clear();
        }
        self.aliases.clear();
        self.alias_max = alias_max;
    }

    /// Handle an inbound PUBLISH. Returns the message when it is ready for
    /// the application.
    pub fn handle_publish(
        &mut self,
        mut publish: Publish,
        outbox: &mut Outbox,
    ) -> Result<Option<Message>> {
        let topic = self.resolve_topic(&mut publish)?;
        let message = Message {
            topic,
            payload: publish.payload,
            qos: publish.qos,
            retain: publish.retain,
            properties: publish.properties,
        };

        match (publish.qos, publish.packet_id) {
            (QoS::AtMostOnce, _) => Ok(Some(message)),
            (QoS::AtLeastOnce, Some(id)) => {
                outbox.send(&Packet::Puback(PubAck::new(id)))?;
                Ok(Some(message))
            }
            (QoS::ExactlyOnce, Some(id)) => {
                outbox.send(&Packet::Pubrec(PubAck::new(id)))?;
                if self.pending.contains_key(&id) {
                    log::debug!("Duplicate QoS 2 PUBLISH {} re-acknowledged", id);
                } else {
                    self.pending.insert(id, message);
                }
                Ok(None)
            }
            (_, None) => Err(ProtocolError::MissingField("packet identifier").into()),
        }
    }

    /// Handle an inbound PUBREL. Always answers with PUBCOMP; an unknown
    /// identifier gets reason 0x92 and nothing is delivered.
    pub fn handle_pubrel(&mut self, ack: &PubAck, outbox: &mut Outbox) -> Result<Option<Message>> {
        let id = ack.packet_id;
        match self.pending.remove(&id) {
            Some(message) => {
                outbox.send(&Packet::Pubcomp(PubAck::new(id)))?;
                Ok(Some(message))
            }
            None => {
                log::warn!("PUBREL for unknown packet {}", id);
                outbox.send(&Packet::Pubcomp(PubAck::with_reason(
                    id,
                    reason_code::PACKET_IDENTIFIER_NOT_FOUND,
                )))?;
                Ok(None)
            }
        }
    }

    /// A PUBREC no publish claimed: release it so the broker stops retrying.
    pub fn reject_pubrec(&self, ack: &PubAck, outbox: &mut Outbox) -> Result<()> {
        log::warn!("PUBREC for unknown packet {}", ack.packet_id);
        outbox.send(&Packet::Pubrel(PubAck::with_reason(
            ack.packet_id,
            reason_code::PACKET_IDENTIFIER_NOT_FOUND,
        )))
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn resolve_topic(&mut self, publish: &mut Publish) -> Result<String> {
        let topic = std::mem::take(&mut publish.topic);
        let Some(alias) = publish.properties.topic_alias.take() else {
            if topic.is_empty() {
                return Err(ProtocolError::MissingField("topic name").into());
            }
            return Ok(topic);
        };

        if alias == 0 || alias > self.alias_max {
            return Err(ProtocolError::TopicAliasInvalid(alias).into());
        }
        if topic.is_empty() {
            self.aliases
                .get(&alias)
                .cloned()
                .ok_or_else(|| ProtocolError::TopicAliasInvalid(alias).into())
        } else {
            self.aliases.insert(alias, topic.clone());
            Ok(topic)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::outbox::tests::take_packets;
    use mqline_core::ProtocolVersion;

    fn publish(qos: QoS, id: Option<u16>, payload: &'static str) -> Publish {
        Publish {
            packet_id: id,
            ..Publish::new("a/b", qos, payload)
        }
    }

    #[test]
    fn test_qos1_acks_then_delivers() {
        let mut outbox = Outbox::new(ProtocolVersion::V311);
        let mut delivery = QosDelivery::new();
        let msg = delivery
            .handle_publish(publish(QoS::AtLeastOnce, Some(7), "hello2"), &mut outbox)
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload.as_ref(), b"hello2");
        assert_eq!(take_packets(&mut outbox), vec![Packet::Puback(PubAck::new(7))]);
    }

    #[test]
    fn test_qos2_duplicate_delivered_once() {
        let mut outbox = Outbox::new(ProtocolVersion::V311);
        let mut delivery = QosDelivery::new();

        for _ in 0..2 {
            let out = delivery
                .handle_publish(publish(QoS::ExactlyOnce, Some(5), "once"), &mut outbox)
                .unwrap();
            assert!(out.is_none());
        }
        assert_eq!(
            take_packets(&mut outbox),
            vec![Packet::Pubrec(PubAck::new(5)), Packet::Pubrec(PubAck::new(5))]
        );
        assert_eq!(delivery.pending_count(), 1);

        let msg = delivery.handle_pubrel(&PubAck::new(5), &mut outbox).unwrap();
        assert_eq!(msg.unwrap().payload.as_ref(), b"once");
        assert_eq!(take_packets(&mut outbox), vec![Packet::Pubcomp(PubAck::new(5))]);

        // A retransmitted PUBREL is completed without a second delivery
        let msg = delivery.handle_pubrel(&PubAck::new(5), &mut outbox).unwrap();
        assert!(msg.is_none());
        assert_eq!(take_packets(&mut outbox).len(), 1);
    }

    #[test]
    fn test_unknown_pubrel_gets_not_found() {
        let mut outbox = Outbox::new(ProtocolVersion::V5);
        let mut delivery = QosDelivery::new();
        assert!(delivery.handle_pubrel(&PubAck::new(42), &mut outbox).unwrap().is_none());
        assert_eq!(
            take_packets(&mut outbox),
            vec![Packet::Pubcomp(PubAck::with_reason(42, 0x92))]
        );

        delivery.reject_pubrec(&PubAck::new(43), &mut outbox).unwrap();
        assert_eq!(
            take_packets(&mut outbox),
            vec![Packet::Pubrel(PubAck::with_reason(43, 0x92))]
        );
    }

    #[test]
    fn test_store_cleared_without_session() {
        let mut outbox = Outbox::new(ProtocolVersion::V311);
        let mut delivery = QosDelivery::new();
        delivery
            .handle_publish(publish(QoS::ExactlyOnce, Some(5), "x"), &mut outbox)
            .unwrap();

        delivery.on_connected(true, 0);
        assert_eq!(delivery.pending_count(), 1);
        delivery.on_connected(false, 0);
        assert_eq!(delivery.pending_count(), 0);
    }

    #[test]
    fn test_topic_aliases() {
        let mut outbox = Outbox::new(ProtocolVersion::V5);
        let mut delivery = QosDelivery::new();
        delivery.on_connected(false, 4);

        let mut first = publish(QoS::AtMostOnce, None, "1");
        first.properties.topic_alias = Some(2);
        let msg = delivery.handle_publish(first, &mut outbox).unwrap().unwrap();
        assert_eq!(msg.topic, "a/b");
        assert_eq!(msg.properties.topic_alias, None);

        let mut second = publish(QoS::AtMostOnce, None, "2");
        second.topic.clear();
        second.properties.topic_alias = Some(2);
        let msg = delivery.handle_publish(second, &mut outbox).unwrap().unwrap();
        assert_eq!(msg.topic, "a/b");

        let mut unknown = publish(QoS::AtMostOnce, None, "3");
        unknown.topic.clear();
        unknown.properties.topic_alias = Some(3);
        let err = delivery.handle_publish(unknown, &mut outbox).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::TopicAliasInvalid(3))
        ));

        let mut too_big = publish(QoS::AtMostOnce, None, "4");
        too_big.properties.topic_alias = Some(5);
        assert!(delivery.handle_publish(too_big, &mut outbox).is_err());

        // New connection forgets aliases
        delivery.on_connected(true, 4);
        let mut after = publish(QoS::AtMostOnce, None, "5");
        after.topic.clear();
        after.properties.topic_alias = Some(2);
        assert!(delivery.handle_publish(after, &mut outbox).is_err());
    }
}
