//! MQTT 5.0 enhanced authentication.

use std::fmt;

use bytes::Bytes;

/// Challenge/response authentication exchange driven by AUTH packets.
///
/// The same handler serves the exchange during CONNECT and later
/// re-authentication. Returning `Err` aborts the exchange; the message is
/// surfaced as [`ClientError::Auth`](crate::ClientError::Auth).
pub trait AuthHandler: Send + Sync + fmt::Debug {
    /// Authentication method name, e.g. `SCRAM-SHA-256`.
    fn method(&self) -> &str;

    /// Data sent with CONNECT, or with the AUTH that starts re-authentication.
    fn initial_data(&self) -> Option<Bytes> {
        None
    }

    /// Answer a continue-authentication challenge from the broker.
    fn on_challenge(&self, data: Option<&[u8]>) -> Result<Option<Bytes>, String>;

    /// Called with the final server data once the broker accepts.
    fn on_success(&self, _data: Option<&[u8]>) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Expects one challenge equal to `challenge` and answers with `response`.
    #[derive(Debug)]
    pub(crate) struct StaticAuth {
        pub challenge: &'static [u8],
        pub response: &'static [u8],
    }

    impl AuthHandler for StaticAuth {
        fn method(&self) -> &str {
            "TEST"
        }

        fn initial_data(&self) -> Option<Bytes> {
            Some(Bytes::from_static(b"hello"))
        }

        fn on_challenge(&self, data: Option<&[u8]>) -> Result<Option<Bytes>, String> {
            if data == Some(self.challenge) {
                Ok(Some(Bytes::from_static(self.response)))
            } else {
                Err(format!("unexpected challenge {:?}", data))
            }
        }
    }

    #[test]
    fn test_static_auth() {
        let auth = StaticAuth {
            challenge: b"c",
            response: b"r",
        };
        assert_eq!(auth.method(), "TEST");
        assert_eq!(auth.on_challenge(Some(&b"c"[..])).unwrap().as_deref(), Some(&b"r"[..]));
        assert!(auth.on_challenge(None).is_err());
        assert!(auth.on_success(None).is_ok());
    }
}
