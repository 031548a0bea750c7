//! MQTT 5.0 re-authentication on an established connection.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use mqline_core::{reason_code, Auth, AuthProperties, Packet};
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::{respond, Operation, Progress, RequestContext, Responder};
use crate::auth::AuthHandler;
use crate::error::{ClientError, Result};

/// Sends AUTH(0x19) and answers challenges until the broker reports success.
pub(crate) struct AuthRequest {
    handler: Arc<dyn AuthHandler>,
    timeout: Duration,
    deadline: Option<Instant>,
    resp: Responder<()>,
}

impl AuthRequest {
    pub fn new(
        handler: Arc<dyn AuthHandler>,
        timeout: Duration,
        resp: oneshot::Sender<Result<()>>,
    ) -> Self {
        Self {
            handler,
            timeout,
            deadline: None,
            resp: Some(resp),
        }
    }

    fn finish(&mut self, result: Result<()>) -> Progress {
        self.deadline = None;
        respond(&mut self.resp, result);
        Progress::Done
    }

    fn send(&mut self, code: u8, data: Option<Bytes>, ctx: &mut RequestContext<'_>) -> Progress {
        let auth = Auth {
            reason_code: code,
            properties: AuthProperties {
                authentication_method: Some(self.handler.method().to_string()),
                authentication_data: data,
                ..Default::default()
            },
        };
        match ctx.send(&Packet::Auth(auth)) {
            Ok(()) => {
                self.deadline = Some(ctx.deadline(self.timeout));
                Progress::Pending
            }
            Err(e) => self.finish(Err(e)),
        }
    }
}

impl Operation for AuthRequest {
    fn name(&self) -> &'static str {
        "AUTH"
    }

    fn start(&mut self, _packet_id: Option<u16>, ctx: &mut RequestContext<'_>) -> Progress {
        if !ctx.outbox.version().is_v5() {
            return self.finish(Err(ClientError::Unsupported(
                "re-authentication requires MQTT 5.0",
            )));
        }
        let data = self.handler.initial_data();
        self.send(reason_code::RE_AUTHENTICATE, data, ctx)
    }

    fn process(&mut self, packet: &Packet, ctx: &mut RequestContext<'_>) -> Option<Progress> {
        let Packet::Auth(auth) = packet else {
            return None;
        };
        let data = auth.properties.authentication_data.as_deref();
        let progress = match auth.reason_code {
            reason_code::SUCCESS => {
                let result = self.handler.on_success(data).map_err(ClientError::Auth);
                self.finish(result)
            }
            reason_code::CONTINUE_AUTHENTICATION => match self.handler.on_challenge(data) {
                Ok(reply) => self.send(reason_code::CONTINUE_AUTHENTICATION, reply, ctx),
                Err(e) => self.finish(Err(ClientError::Auth(e))),
            },
            code => self.finish(Err(ClientError::ServerRejected {
                packet: "AUTH",
                reason_code: code,
                reason_string: auth.properties.reason_string.clone(),
            })),
        };
        Some(progress)
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn on_timeout(&mut self, _ctx: &mut RequestContext<'_>) -> Progress {
        self.finish(Err(ClientError::Timeout("AUTH")))
    }

    // An exchange cannot continue on a new connection
    fn pause(&mut self) -> Progress {
        self.finish(Err(ClientError::ConnectionClosed))
    }

    fn resume(&mut self, _session_present: bool, _ctx: &mut RequestContext<'_>) -> Progress {
        Progress::Done
    }

    fn fail(&mut self, err: ClientError) {
        self.finish(Err(err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::StaticAuth;
    use crate::request::tests::Harness;
    use mqline_core::ProtocolVersion;

    fn auth_packet(code: u8, data: &'static [u8]) -> Packet {
        Packet::Auth(Auth {
            reason_code: code,
            properties: AuthProperties {
                authentication_method: Some("TEST".into()),
                authentication_data: Some(Bytes::from_static(data)),
                ..Default::default()
            },
        })
    }

    #[test]
    fn test_reauthenticate() {
        let mut h = Harness::new(ProtocolVersion::V5);
        let (tx, mut rx) = oneshot::channel();
        let handler = Arc::new(StaticAuth {
            challenge: b"c1",
            response: b"r1",
        });
        let mut request = AuthRequest::new(handler, Duration::from_secs(3), tx);
        assert_eq!(request.start(None, &mut h.ctx()), Progress::Pending);
        match h.sent().as_slice() {
            [Packet::Auth(auth)] => {
                assert_eq!(auth.reason_code, reason_code::RE_AUTHENTICATE);
                assert_eq!(auth.properties.authentication_method.as_deref(), Some("TEST"));
                assert_eq!(
                    auth.properties.authentication_data.as_deref(),
                    Some(&b"hello"[..])
                );
            }
            other => panic!("unexpected {:?}", other),
        }

        let progress = request.process(&auth_packet(0x18, b"c1"), &mut h.ctx());
        assert_eq!(progress, Some(Progress::Pending));
        assert!(matches!(h.sent().as_slice(), [Packet::Auth(a)] if a.reason_code == 0x18));

        let progress = request.process(&auth_packet(0x00, b""), &mut h.ctx());
        assert_eq!(progress, Some(Progress::Done));
        assert!(rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn test_rejected_and_unsupported() {
        let handler: Arc<dyn AuthHandler> = Arc::new(StaticAuth {
            challenge: b"c1",
            response: b"r1",
        });

        let mut h = Harness::new(ProtocolVersion::V5);
        let (tx, mut rx) = oneshot::channel();
        let mut request = AuthRequest::new(handler.clone(), Duration::from_secs(3), tx);
        request.start(None, &mut h.ctx());
        request.process(&auth_packet(reason_code::BAD_AUTHENTICATION_METHOD, b""), &mut h.ctx());
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(ClientError::ServerRejected { reason_code: 0x8C, .. })
        ));

        let mut h = Harness::new(ProtocolVersion::V311);
        let (tx, mut rx) = oneshot::channel();
        let mut request = AuthRequest::new(handler, Duration::from_secs(3), tx);
        assert_eq!(request.start(None, &mut h.ctx()), Progress::Done);
        assert!(matches!(rx.try_recv().unwrap(), Err(ClientError::Unsupported(_))));
    }
}
