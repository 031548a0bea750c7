//! Outbound PUBLISH for all three QoS levels.

use mqline_core::{Packet, PubAck, Publish, QoS};
use tokio::sync::oneshot;

use super::{respond, Operation, Progress, RequestContext, Responder};
use crate::error::{ClientError, Result};
use crate::events::PublishOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    NotStarted,
    AwaitingPuback,
    AwaitingPubrec,
    AwaitingPubcomp,
}

/// QoS 0 resolves once written; QoS 1 on PUBACK; QoS 2 on PUBCOMP after
/// answering PUBREC with PUBREL.
///
/// There is no reply deadline. Unacknowledged publishes survive reconnects
/// and are resent on the next connection.
pub(crate) struct PublishRequest {
    publish: Publish,
    stage: Stage,
    resp: Responder<PublishOutcome>,
}

impl PublishRequest {
    pub fn new(publish: Publish, resp: oneshot::Sender<Result<PublishOutcome>>) -> Self {
        Self {
            publish,
            stage: Stage::NotStarted,
            resp: Some(resp),
        }
    }

    fn packet_id(&self) -> Option<u16> {
        self.publish.packet_id
    }

    fn owns(&self, ack: &PubAck, stage: Stage) -> bool {
        self.stage == stage && self.packet_id() == Some(ack.packet_id)
    }

    fn finish(&mut self, result: Result<PublishOutcome>) -> Progress {
        respond(&mut self.resp, result);
        Progress::Done
    }

    fn complete(&mut self, packet: &'static str, ack: &PubAck) -> Progress {
        if ack.is_failure() {
            return self.finish(Err(ClientError::ServerRejected {
                packet,
                reason_code: ack.reason_code,
                reason_string: ack.properties.reason_string.clone(),
            }));
        }
        let outcome = PublishOutcome {
            packet_id: Some(ack.packet_id),
            reason_code: ack.reason_code,
            properties: ack.properties.clone(),
        };
        self.finish(Ok(outcome))
    }

    fn send_pubrel(&mut self, ctx: &mut RequestContext<'_>) -> Progress {
        let Some(id) = self.packet_id() else {
            return Progress::Done;
        };
        match ctx.send(&Packet::Pubrel(PubAck::new(id))) {
            Ok(()) => {
                self.stage = Stage::AwaitingPubcomp;
                Progress::Pending
            }
            Err(e) => self.finish(Err(e)),
        }
    }

    fn send_publish(&mut self, ctx: &mut RequestContext<'_>) -> Progress {
        match ctx.send(&Packet::Publish(self.publish.clone())) {
            Ok(()) => Progress::Pending,
            Err(e) => self.finish(Err(e)),
        }
    }
}

impl Operation for PublishRequest {
    fn name(&self) -> &'static str {
        "PUBLISH"
    }

    fn needs_packet_id(&self) -> bool {
        self.publish.qos != QoS::AtMostOnce
    }

    fn start(&mut self, packet_id: Option<u16>, ctx: &mut RequestContext<'_>) -> Progress {
        self.publish.packet_id = packet_id;
        if self.send_publish(ctx) == Progress::Done {
            return Progress::Done;
        }
        match self.publish.qos {
            QoS::AtMostOnce => self.finish(Ok(PublishOutcome::fire_and_forget())),
            QoS::AtLeastOnce => {
                self.stage = Stage::AwaitingPuback;
                Progress::Pending
            }
            QoS::ExactlyOnce => {
                self.stage = Stage::AwaitingPubrec;
                Progress::Pending
            }
        }
    }

    fn process(&mut self, packet: &Packet, ctx: &mut RequestContext<'_>) -> Option<Progress> {
        match packet {
            Packet::Puback(ack) if self.owns(ack, Stage::AwaitingPuback) => {
                Some(self.complete("PUBACK", ack))
            }
            Packet::Pubrec(ack) if self.owns(ack, Stage::AwaitingPubrec) => {
                if ack.is_failure() {
                    return Some(self.complete("PUBREC", ack));
                }
                Some(self.send_pubrel(ctx))
            }
            // Broker retransmitted PUBREC: our PUBREL was lost
            Packet::Pubrec(ack) if self.owns(ack, Stage::AwaitingPubcomp) => {
                Some(self.send_pubrel(ctx))
            }
            Packet::Pubcomp(ack) if self.owns(ack, Stage::AwaitingPubcomp) => {
                Some(self.complete("PUBCOMP", ack))
            }
            _ => None,
        }
    }

    fn pause(&mut self) -> Progress {
        Progress::Pending
    }

    fn resume(&mut self, session_present: bool, ctx: &mut RequestContext<'_>) -> Progress {
        match self.stage {
            Stage::AwaitingPuback | Stage::AwaitingPubrec => {
                // A new session has never seen this packet
                self.publish.dup = session_present;
                self.send_publish(ctx)
            }
            Stage::AwaitingPubcomp if session_present => self.send_pubrel(ctx),
            // The broker took ownership at PUBREC and the session holding
            // the PUBREL state is gone
            Stage::AwaitingPubcomp => self.finish(Ok(PublishOutcome {
                packet_id: self.packet_id(),
                ..PublishOutcome::fire_and_forget()
            })),
            Stage::NotStarted => Progress::Done,
        }
    }

    fn fail(&mut self, err: ClientError) {
        respond(&mut self.resp, Err(err));
    }
}
