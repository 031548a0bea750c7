//! Client error types.

use std::io;
use std::sync::Arc;

use mqline_core::ProtocolError;
use thiserror::Error;

/// Client error type.
///
/// `Clone` so one failure can resolve every request it affects.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    #[error("Protocol error: {0}")]
    Protocol(ProtocolError),

    #[error("Connection refused: reason code {reason_code:#04x} {reason_string:?}")]
    ConnectionRefused {
        reason_code: u8,
        reason_string: Option<String>,
    },

    #[error("{packet} rejected: reason code {reason_code:#04x} {reason_string:?}")]
    ServerRejected {
        packet: &'static str,
        reason_code: u8,
        reason_string: Option<String>,
    },

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Client has been shut down")]
    Shutdown,

    #[error("Not connected")]
    NotConnected,

    #[error("{field} is {len} bytes, maximum is {max}")]
    ValueTooLarge {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("WebSocket upgrade failed with HTTP {status}: {body}")]
    WebSocket { status: u16, body: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No free packet identifiers")]
    PacketIdsExhausted,

    #[error("Not supported: {0}")]
    Unsupported(&'static str),
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        ClientError::Io(Arc::new(e))
    }
}

impl From<ProtocolError> for ClientError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::ValueTooLarge { field, len, max } => {
                ClientError::ValueTooLarge { field, len, max }
            }
            ProtocolError::PacketTooLarge { size, max } => ClientError::ValueTooLarge {
                field: "packet",
                len: size,
                max,
            },
            other => ClientError::Protocol(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_errors_become_value_too_large() {
        let err: ClientError = ProtocolError::ValueTooLarge {
            field: "topic",
            len: 70_000,
            max: 65_535,
        }
        .into();
        assert!(matches!(err, ClientError::ValueTooLarge { len: 70_000, .. }));

        let err: ClientError = ProtocolError::InvalidUtf8.into();
        assert!(matches!(err, ClientError::Protocol(ProtocolError::InvalidUtf8)));
    }
}
