//! SUBSCRIBE / UNSUBSCRIBE exchanges.

use mqline_core::{Packet, ProtocolError, Subscribe, Unsubscribe};
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::{respond, Operation, Progress, RequestContext, Responder};
use crate::error::{ClientError, Result};
use crate::events::{SubscriptionResult, UnsubscriptionResult};

/// Waits for the SUBACK carrying its packet identifier.
pub(crate) struct SubscribeRequest {
    subscribe: Subscribe,
    deadline: Option<Instant>,
    resp: Responder<Vec<SubscriptionResult>>,
}

impl SubscribeRequest {
    pub fn new(
        subscribe: Subscribe,
        resp: oneshot::Sender<Result<Vec<SubscriptionResult>>>,
    ) -> Self {
        Self {
            subscribe,
            deadline: None,
            resp: Some(resp),
        }
    }

    fn finish(&mut self, result: Result<Vec<SubscriptionResult>>) -> Progress {
        self.deadline = None;
        respond(&mut self.resp, result);
        Progress::Done
    }

    fn send(&mut self, ctx: &mut RequestContext<'_>) -> Progress {
        match ctx.send(&Packet::Subscribe(self.subscribe.clone())) {
            Ok(()) => {
                self.deadline = Some(ctx.deadline(ctx.request_timeout));
                Progress::Pending
            }
            Err(e) => self.finish(Err(e)),
        }
    }
}

impl Operation for SubscribeRequest {
    fn name(&self) -> &'static str {
        "SUBSCRIBE"
    }

    fn needs_packet_id(&self) -> bool {
        true
    }

    fn start(&mut self, packet_id: Option<u16>, ctx: &mut RequestContext<'_>) -> Progress {
        if self.subscribe.properties.subscription_identifier.is_some()
            && !ctx.outbox.version().is_v5()
        {
            return self.finish(Err(ClientError::Unsupported(
                "subscription identifiers require MQTT 5.0",
            )));
        }
        self.subscribe.packet_id = packet_id.unwrap_or_default();
        self.send(ctx)
    }

    fn process(&mut self, packet: &Packet, _ctx: &mut RequestContext<'_>) -> Option<Progress> {
        let Packet::Suback(suback) = packet else {
            return None;
        };
        if suback.packet_id != self.subscribe.packet_id {
            return None;
        }
        let expected = self.subscribe.subscriptions.len();
        if suback.reason_codes.len() != expected {
            let err = ProtocolError::MalformedPacket(format!(
                "SUBACK has {} reason codes for {} filters",
                suback.reason_codes.len(),
                expected
            ));
            return Some(self.finish(Err(err.into())));
        }
        let results = suback
            .reason_codes
            .iter()
            .map(|&code| SubscriptionResult::from_code(code))
            .collect();
        Some(self.finish(Ok(results)))
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn on_timeout(&mut self, _ctx: &mut RequestContext<'_>) -> Progress {
        self.finish(Err(ClientError::Timeout("SUBACK")))
    }

    fn pause(&mut self) -> Progress {
        self.deadline = None;
        Progress::Pending
    }

    fn resume(&mut self, _session_present: bool, ctx: &mut RequestContext<'_>) -> Progress {
        self.send(ctx)
    }

    fn fail(&mut self, err: ClientError) {
        self.finish(Err(err));
    }
}

/// Waits for the UNSUBACK carrying its packet identifier.
pub(crate) struct UnsubscribeRequest {
    unsubscribe: Unsubscribe,
    deadline: Option<Instant>,
    resp: Responder<Vec<UnsubscriptionResult>>,
}

impl UnsubscribeRequest {
    pub fn new(
        unsubscribe: Unsubscribe,
        resp: oneshot::Sender<Result<Vec<UnsubscriptionResult>>>,
    ) -> Self {
        Self {
            unsubscribe,
            deadline: None,
            resp: Some(resp),
        }
    }

    fn finish(&mut self, result: Result<Vec<UnsubscriptionResult>>) -> Progress {
        self.deadline = None;
        respond(&mut self.resp, result);
        Progress::Done
    }

    fn send(&mut self, ctx: &mut RequestContext<'_>) -> Progress {
        match ctx.send(&Packet::Unsubscribe(self.unsubscribe.clone())) {
            Ok(()) => {
                self.deadline = Some(ctx.deadline(ctx.request_timeout));
                Progress::Pending
            }
            Err(e) => self.finish(Err(e)),
        }
    }
}

impl Operation for UnsubscribeRequest {
    fn name(&self) -> &'static str {
        "UNSUBSCRIBE"
    }

    fn needs_packet_id(&self) -> bool {
        true
    }

    fn start(&mut self, packet_id: Option<u16>, ctx: &mut RequestContext<'_>) -> Progress {
        self.unsubscribe.packet_id = packet_id.unwrap_or_default();
        self.send(ctx)
    }

    fn process(&mut self, packet: &Packet, _ctx: &mut RequestContext<'_>) -> Option<Progress> {
        let Packet::Unsuback(unsuback) = packet else {
            return None;
        };
        if unsuback.packet_id != self.unsubscribe.packet_id {
            return None;
        }
        let expected = self.unsubscribe.filters.len();
        // 3.1.1 UNSUBACK carries no per-filter codes
        let results = if unsuback.reason_codes.is_empty() {
            vec![UnsubscriptionResult::Removed; expected]
        } else if unsuback.reason_codes.len() == expected {
            unsuback
                .reason_codes
                .iter()
                .map(|&code| UnsubscriptionResult::from_code(code))
                .collect()
        } else {
            let err = ProtocolError::MalformedPacket(format!(
                "UNSUBACK has {} reason codes for {} filters",
                unsuback.reason_codes.len(),
                expected
            ));
            return Some(self.finish(Err(err.into())));
        };
        Some(self.finish(Ok(results)))
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn on_timeout(&mut self, _ctx: &mut RequestContext<'_>) -> Progress {
        self.finish(Err(ClientError::Timeout("UNSUBACK")))
    }

    fn pause(&mut self) -> Progress {
        self.deadline = None;
        Progress::Pending
    }

    fn resume(&mut self, _session_present: bool, ctx: &mut RequestContext<'_>) -> Progress {
        self.send(ctx)
    }

    fn fail(&mut self, err: ClientError) {
        self.finish(Err(err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::tests::Harness;
    use mqline_core::{
        ProtocolVersion, QoS, Suback, SubscribeProperties, Subscription, Unsuback,
        UnsubscribeProperties,
    };

    fn subscribe(identifier: Option<u32>) -> Subscribe {
        Subscribe {
            packet_id: 0,
            subscriptions: vec![
                Subscription::new("a/b", QoS::AtLeastOnce),
                Subscription::new("c/#", QoS::ExactlyOnce),
            ],
            properties: SubscribeProperties {
                subscription_identifier: identifier,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_suback_results() {
        let mut h = Harness::new(ProtocolVersion::V5);
        let (tx, mut rx) = oneshot::channel();
        let mut request = SubscribeRequest::new(subscribe(Some(3)), tx);
        assert_eq!(request.start(Some(4), &mut h.ctx()), Progress::Pending);
        match h.sent().as_slice() {
            [Packet::Subscribe(s)] => {
                assert_eq!(s.packet_id, 4);
                assert_eq!(s.properties.subscription_identifier, Some(3));
            }
            other => panic!("unexpected {:?}", other),
        }

        let suback = Packet::Suback(Suback {
            packet_id: 4,
            properties: Default::default(),
            reason_codes: vec![1, 0x97],
        });
        assert_eq!(request.process(&suback, &mut h.ctx()), Some(Progress::Done));
        assert_eq!(
            rx.try_recv().unwrap().unwrap(),
            vec![
                SubscriptionResult::Granted(QoS::AtLeastOnce),
                SubscriptionResult::Failed(0x97)
            ]
        );
    }

    #[test]
    fn test_suback_count_mismatch() {
        let mut h = Harness::new(ProtocolVersion::V311);
        let (tx, mut rx) = oneshot::channel();
        let mut request = SubscribeRequest::new(subscribe(None), tx);
        request.start(Some(4), &mut h.ctx());
        let suback = Packet::Suback(Suback {
            packet_id: 4,
            properties: Default::default(),
            reason_codes: vec![1],
        });
        request.process(&suback, &mut h.ctx());
        assert!(matches!(rx.try_recv().unwrap(), Err(ClientError::Protocol(_))));
    }

    #[test]
    fn test_subscription_identifier_needs_v5() {
        let mut h = Harness::new(ProtocolVersion::V311);
        let (tx, mut rx) = oneshot::channel();
        let mut request = SubscribeRequest::new(subscribe(Some(3)), tx);
        assert_eq!(request.start(Some(4), &mut h.ctx()), Progress::Done);
        assert!(h.outbox.is_empty());
        assert!(matches!(rx.try_recv().unwrap(), Err(ClientError::Unsupported(_))));
    }

    #[test]
    fn test_pause_clears_deadline_and_resume_rearms() {
        let mut h = Harness::new(ProtocolVersion::V311);
        let (tx, _rx) = oneshot::channel();
        let mut request = SubscribeRequest::new(subscribe(None), tx);
        request.start(Some(4), &mut h.ctx());
        h.sent();
        assert!(request.deadline().is_some());

        request.pause();
        assert_eq!(request.deadline(), None);

        h.now += std::time::Duration::from_secs(60);
        request.resume(false, &mut h.ctx());
        assert_eq!(
            request.deadline(),
            Some(h.now + std::time::Duration::from_secs(5))
        );
        assert!(matches!(h.sent().as_slice(), [Packet::Subscribe(s)] if s.packet_id == 4));
    }

    #[test]
    fn test_unsuback_v311_and_v5() {
        let unsubscribe = || Unsubscribe {
            packet_id: 0,
            filters: vec!["a/b".into(), "c".into()],
            properties: UnsubscribeProperties::default(),
        };

        let mut h = Harness::new(ProtocolVersion::V311);
        let (tx, mut rx) = oneshot::channel();
        let mut request = UnsubscribeRequest::new(unsubscribe(), tx);
        request.start(Some(2), &mut h.ctx());
        let unsuback = Packet::Unsuback(Unsuback {
            packet_id: 2,
            properties: Default::default(),
            reason_codes: vec![],
        });
        request.process(&unsuback, &mut h.ctx());
        assert_eq!(
            rx.try_recv().unwrap().unwrap(),
            vec![UnsubscriptionResult::Removed; 2]
        );

        let mut h = Harness::new(ProtocolVersion::V5);
        let (tx, mut rx) = oneshot::channel();
        let mut request = UnsubscribeRequest::new(unsubscribe(), tx);
        request.start(Some(2), &mut h.ctx());
        let unsuback = Packet::Unsuback(Unsuback {
            packet_id: 2,
            properties: Default::default(),
            reason_codes: vec![0x00, 0x11],
        });
        request.process(&unsuback, &mut h.ctx());
        assert_eq!(
            rx.try_recv().unwrap().unwrap(),
            vec![UnsubscriptionResult::Removed, UnsubscriptionResult::NotSubscribed]
        );
    }

    #[test]
    fn test_unsuback_timeout() {
        let mut h = Harness::new(ProtocolVersion::V311);
        let (tx, mut rx) = oneshot::channel();
        let mut request = UnsubscribeRequest::new(
            Unsubscribe {
                packet_id: 0,
                filters: vec!["a".into()],
                properties: UnsubscribeProperties::default(),
            },
            tx,
        );
        request.start(Some(2), &mut h.ctx());
        assert_eq!(request.on_timeout(&mut h.ctx()), Progress::Done);
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(ClientError::Timeout("UNSUBACK"))
        ));
    }
}
