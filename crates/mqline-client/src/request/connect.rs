//! CONNECT / CONNACK exchange, including enhanced authentication.

use std::sync::Arc;
use std::time::Duration;

use mqline_core::{reason_code, Auth, AuthProperties, Connack, Connect, Packet};
use tokio::time::Instant;

use super::{Operation, PipelineEvent, Progress, RequestContext};
use crate::auth::AuthHandler;
use crate::error::ClientError;
use crate::events::{BrokerCapabilities, ConnectionInfo};

/// Runs on a fresh channel before the connection is active. The outcome is
/// reported as a [`PipelineEvent`] since every connect waiter shares it.
pub(crate) struct ConnectRequest {
    connect: Connect,
    auth: Option<Arc<dyn AuthHandler>>,
    timeout: Duration,
    deadline: Option<Instant>,
}

impl ConnectRequest {
    pub fn new(connect: Connect, auth: Option<Arc<dyn AuthHandler>>, timeout: Duration) -> Self {
        Self {
            connect,
            auth,
            timeout,
            deadline: None,
        }
    }

    fn failed(&self, err: ClientError, ctx: &mut RequestContext<'_>) -> Progress {
        ctx.emit(PipelineEvent::ConnectFailed(err));
        Progress::Done
    }

    fn on_connack(&self, connack: &Connack, ctx: &mut RequestContext<'_>) -> Progress {
        if connack.reason_code != reason_code::SUCCESS {
            return self.failed(
                ClientError::ConnectionRefused {
                    reason_code: connack.reason_code,
                    reason_string: connack.properties.reason_string.clone(),
                },
                ctx,
            );
        }
        if let Some(auth) = &self.auth {
            if let Err(e) = auth.on_success(connack.properties.authentication_data.as_deref()) {
                return self.failed(ClientError::Auth(e), ctx);
            }
        }

        let props = &connack.properties;
        let info = ConnectionInfo {
            session_present: connack.session_present,
            keep_alive: props.server_keep_alive.unwrap_or(self.connect.keep_alive),
            client_id: props
                .assigned_client_identifier
                .clone()
                .unwrap_or_else(|| self.connect.client_id.clone()),
            capabilities: BrokerCapabilities::from_connack(props),
        };
        ctx.emit(PipelineEvent::Connected(info));
        Progress::Done
    }

    fn on_auth(&mut self, auth: &Auth, ctx: &mut RequestContext<'_>) -> Progress {
        let Some(handler) = self.auth.clone() else {
            return self.failed(
                ClientError::Auth("broker sent AUTH but no handler is configured".into()),
                ctx,
            );
        };
        if auth.reason_code != reason_code::CONTINUE_AUTHENTICATION {
            return self.failed(
                ClientError::ServerRejected {
                    packet: "AUTH",
                    reason_code: auth.reason_code,
                    reason_string: auth.properties.reason_string.clone(),
                },
                ctx,
            );
        }
        let data = match handler.on_challenge(auth.properties.authentication_data.as_deref()) {
            Ok(data) => data,
            Err(e) => return self.failed(ClientError::Auth(e), ctx),
        };
        let reply = Packet::Auth(Auth {
            reason_code: reason_code::CONTINUE_AUTHENTICATION,
            properties: AuthProperties {
                authentication_method: Some(handler.method().to_string()),
                authentication_data: data,
                ..Default::default()
            },
        });
        if let Err(e) = ctx.send(&reply) {
            return self.failed(e, ctx);
        }
        self.deadline = Some(ctx.deadline(self.timeout));
        Progress::Pending
    }
}

impl Operation for ConnectRequest {
    fn name(&self) -> &'static str {
        "CONNECT"
    }

    fn tolerates_inactive(&self) -> bool {
        true
    }

    fn privileged(&self) -> bool {
        true
    }

    fn start(&mut self, _packet_id: Option<u16>, ctx: &mut RequestContext<'_>) -> Progress {
        if let Err(e) = ctx.send(&Packet::Connect(self.connect.clone())) {
            return self.failed(e, ctx);
        }
        self.deadline = Some(ctx.deadline(self.timeout));
        Progress::Pending
    }

    fn process(&mut self, packet: &Packet, ctx: &mut RequestContext<'_>) -> Option<Progress> {
        match packet {
            Packet::Connack(connack) => Some(self.on_connack(connack, ctx)),
            Packet::Auth(auth) => Some(self.on_auth(auth, ctx)),
            _ => None,
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn on_timeout(&mut self, ctx: &mut RequestContext<'_>) -> Progress {
        self.failed(ClientError::Timeout("CONNACK"), ctx)
    }

    // The event loop reports a channel lost mid-handshake itself
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
    use crate::auth::tests::StaticAuth;
    use crate::request::tests::Harness;
    use bytes::Bytes;
    use mqline_core::{ConnackProperties, ConnectProperties, ProtocolVersion};

    fn connect_packet() -> Connect {
        Connect {
            protocol_version: ProtocolVersion::V5,
            clean_start: true,
            keep_alive: 60,
            client_id: String::new(),
            will: None,
            username: None,
            password: None,
            properties: ConnectProperties::default(),
        }
    }

    #[test]
    fn test_connack_fills_connection_info() {
        let mut h = Harness::new(ProtocolVersion::V5);
        let mut request = ConnectRequest::new(connect_packet(), None, Duration::from_secs(10));
        assert_eq!(request.start(None, &mut h.ctx()), Progress::Pending);
        assert!(matches!(h.sent().as_slice(), [Packet::Connect(_)]));

        let connack = Packet::Connack(Connack {
            session_present: true,
            reason_code: 0,
            properties: ConnackProperties {
                server_keep_alive: Some(20),
                assigned_client_identifier: Some("auto-1".into()),
                ..Default::default()
            },
        });
        assert_eq!(request.process(&connack, &mut h.ctx()), Some(Progress::Done));
        match h.events.as_slice() {
            [PipelineEvent::Connected(info)] => {
                assert!(info.session_present);
                assert_eq!(info.keep_alive, 20);
                assert_eq!(info.client_id, "auto-1");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_refused() {
        let mut h = Harness::new(ProtocolVersion::V5);
        let mut request = ConnectRequest::new(connect_packet(), None, Duration::from_secs(10));
        request.start(None, &mut h.ctx());
        let connack = Packet::Connack(Connack {
            reason_code: reason_code::NOT_AUTHORIZED,
            ..Default::default()
        });
        request.process(&connack, &mut h.ctx());
        assert!(matches!(
            h.events.as_slice(),
            [PipelineEvent::ConnectFailed(ClientError::ConnectionRefused {
                reason_code: 0x87,
                ..
            })]
        ));
    }

    #[test]
    fn test_auth_challenge_during_connect() {
        let mut h = Harness::new(ProtocolVersion::V5);
        let handler = Arc::new(StaticAuth {
            challenge: b"nonce",
            response: b"proof",
        });
        let mut request =
            ConnectRequest::new(connect_packet(), Some(handler), Duration::from_secs(10));
        request.start(None, &mut h.ctx());
        h.sent();

        let challenge = Packet::Auth(Auth {
            reason_code: reason_code::CONTINUE_AUTHENTICATION,
            properties: AuthProperties {
                authentication_method: Some("TEST".into()),
                authentication_data: Some(Bytes::from_static(b"nonce")),
                ..Default::default()
            },
        });
        assert_eq!(request.process(&challenge, &mut h.ctx()), Some(Progress::Pending));
        match h.sent().as_slice() {
            [Packet::Auth(reply)] => {
                assert_eq!(reply.reason_code, reason_code::CONTINUE_AUTHENTICATION);
                assert_eq!(
                    reply.properties.authentication_data.as_deref(),
                    Some(&b"proof"[..])
                );
            }
            other => panic!("unexpected {:?}", other),
        }

        let bad = Packet::Auth(Auth {
            reason_code: reason_code::CONTINUE_AUTHENTICATION,
            properties: AuthProperties {
                authentication_data: Some(Bytes::from_static(b"other")),
                ..Default::default()
            },
        });
        assert_eq!(request.process(&bad, &mut h.ctx()), Some(Progress::Done));
        assert!(matches!(
            h.events.as_slice(),
            [PipelineEvent::ConnectFailed(ClientError::Auth(_))]
        ));
    }

    #[test]
    fn test_connack_timeout() {
        let mut h = Harness::new(ProtocolVersion::V311);
        let mut request = ConnectRequest::new(connect_packet(), None, Duration::from_secs(10));
        request.start(None, &mut h.ctx());
        assert_eq!(request.deadline(), Some(h.now + Duration::from_secs(10)));
        assert_eq!(request.on_timeout(&mut h.ctx()), Progress::Done);
        assert!(matches!(
            h.events.as_slice(),
            [PipelineEvent::ConnectFailed(ClientError::Timeout("CONNACK"))]
        ));
    }
}
