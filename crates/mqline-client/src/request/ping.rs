//! Keep-alive PINGREQ.

use mqline_core::Packet;
use tokio::time::Instant;

use super::{Operation, PipelineEvent, Progress, RequestContext};
use crate::error::ClientError;

/// A missing PINGRESP means the connection is dead; the timeout closes the
/// connection instead of failing a caller.
#[derive(Default)]
pub(crate) struct PingRequest {
    deadline: Option<Instant>,
}

impl Operation for PingRequest {
    fn name(&self) -> &'static str {
        "PINGREQ"
    }

    fn privileged(&self) -> bool {
        true
    }

    fn start(&mut self, _packet_id: Option<u16>, ctx: &mut RequestContext<'_>) -> Progress {
        if let Err(e) = ctx.send(&Packet::Pingreq) {
            log::warn!("Failed to queue PINGREQ: {}", e);
            return Progress::Done;
        }
        self.deadline = Some(ctx.deadline(ctx.request_timeout));
        Progress::Pending
    }

    fn process(&mut self, packet: &Packet, _ctx: &mut RequestContext<'_>) -> Option<Progress> {
        matches!(packet, Packet::Pingresp).then_some(Progress::Done)
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn on_timeout(&mut self, ctx: &mut RequestContext<'_>) -> Progress {
        log::warn!("No PINGRESP from broker");
        ctx.emit(PipelineEvent::KeepAliveTimeout);
        Progress::Done
    }

    fn pause(&mut self) -> Progress {
        Progress::Done
    }

    fn resume(&mut self, _session_present: bool, _ctx: &mut RequestContext<'_>) -> Progress {
        Progress::Done
    }

    fn fail(&mut self, _err: ClientError) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::tests::Harness;
    use mqline_core::ProtocolVersion;

    #[test]
    fn test_ping_roundtrip_and_timeout() {
        let mut h = Harness::new(ProtocolVersion::V311);
        let mut ping = PingRequest::default();
        assert_eq!(ping.start(None, &mut h.ctx()), Progress::Pending);
        assert_eq!(h.sent(), vec![Packet::Pingreq]);
        assert_eq!(ping.process(&Packet::Pingresp, &mut h.ctx()), Some(Progress::Done));

        let mut ping = PingRequest::default();
        ping.start(None, &mut h.ctx());
        assert_eq!(ping.on_timeout(&mut h.ctx()), Progress::Done);
        assert!(matches!(h.events.as_slice(), [PipelineEvent::KeepAliveTimeout]));
    }
}
