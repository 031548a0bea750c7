//! Client configuration types.

mod file;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use mqline_core::{ConnectProperties, ProtocolVersion};

use crate::auth::AuthHandler;
use crate::will::Will;

pub use file::{ClientSettings, ConfigError};

pub const DEFAULT_MAX_IN_FLIGHT: usize = 20;
pub const DEFAULT_KEEP_ALIVE: u16 = 60;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RECONNECT_MIN_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(120);

/// Where and how to reach the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportAddress {
    /// `host:port`
    Tcp(String),
    /// Unix-domain socket path.
    #[cfg(unix)]
    Unix(PathBuf),
    /// `ws://host[:port]/path` or `wss://...`.
    WebSocket(String),
}

impl TransportAddress {
    /// Parse an address: `ws://` / `wss://` URLs select WebSocket,
    /// `unix://path` a Unix socket, anything else is `host:port`.
    pub fn parse(address: &str) -> Self {
        if address.starts_with("ws://") || address.starts_with("wss://") {
            return TransportAddress::WebSocket(address.to_string());
        }
        #[cfg(unix)]
        if let Some(path) = address.strip_prefix("unix://") {
            return TransportAddress::Unix(PathBuf::from(path));
        }
        TransportAddress::Tcp(address.strip_prefix("mqtt://").unwrap_or(address).to_string())
    }

    /// Host name used for TLS server name indication.
    pub(crate) fn host(&self) -> &str {
        match self {
            TransportAddress::Tcp(addr) => match addr.rsplit_once(':') {
                Some((host, _)) => host.trim_start_matches('[').trim_end_matches(']'),
                None => addr,
            },
            #[cfg(unix)]
            TransportAddress::Unix(_) => "localhost",
            TransportAddress::WebSocket(url) => {
                let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
                let authority = rest.split('/').next().unwrap_or(rest);
                match authority.rsplit_once(':') {
                    Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
                    _ => authority,
                }
            }
        }
    }
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportAddress::Tcp(addr) => write!(f, "{}", addr),
            #[cfg(unix)]
            TransportAddress::Unix(path) => write!(f, "unix://{}", path.display()),
            TransportAddress::WebSocket(url) => write!(f, "{}", url),
        }
    }
}

/// TLS configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// CA certificate (PEM). Falls back to the webpki root store.
    pub ca_cert: Option<PathBuf>,
    /// Client certificate (PEM) for mutual TLS.
    pub client_cert: Option<PathBuf>,
    /// Client private key (PEM) for mutual TLS.
    pub client_key: Option<PathBuf>,
    /// Override the server name used for SNI and verification.
    pub server_name: Option<String>,
    /// Accept any server certificate. Testing only.
    pub accept_invalid_certs: bool,
}

/// Automatic reconnection with capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub enabled: bool,
    /// Delay before the first retry; doubled per consecutive dial failure.
    pub min_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_delay: DEFAULT_RECONNECT_MIN_DELAY,
            max_delay: DEFAULT_RECONNECT_MAX_DELAY,
        }
    }
}

impl ReconnectConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// Remote broker address.
    pub address: TransportAddress,
    /// Client identifier. Empty asks an MQTT 5.0 broker to assign one.
    pub client_id: String,
    /// Username for authentication.
    pub username: Option<String>,
    /// Password for authentication.
    pub password: Option<Bytes>,
    /// Keep-alive interval in seconds (0 = disabled).
    pub keep_alive: u16,
    /// Clean session (3.1.1) / clean start (5.0).
    pub clean_session: bool,
    pub protocol_version: ProtocolVersion,
    /// Timeout for opening the transport, TLS and WebSocket handshakes
    /// included, and for the CONNACK.
    pub connect_timeout: Duration,
    /// Timeout for SUBSCRIBE, UNSUBSCRIBE and PINGREQ replies.
    pub request_timeout: Duration,
    /// Requests allowed to await a reply at once.
    pub max_in_flight: usize,
    pub tls: Option<TlsConfig>,
    pub reconnect: ReconnectConfig,
    pub will: Option<Will>,
    /// MQTT 5.0 CONNECT properties. Authentication fields are filled from
    /// `auth` when it is set.
    pub connect_properties: ConnectProperties,
    /// MQTT 5.0 enhanced authentication.
    pub auth: Option<Arc<dyn AuthHandler>>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("address", &self.address)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("keep_alive", &self.keep_alive)
            .field("clean_session", &self.clean_session)
            .field("protocol_version", &self.protocol_version)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("max_in_flight", &self.max_in_flight)
            .field("tls", &self.tls)
            .field("reconnect", &self.reconnect)
            .field("will", &self.will)
            .field("connect_properties", &self.connect_properties)
            .field("auth", &self.auth)
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: TransportAddress::Tcp("localhost:1883".to_string()),
            client_id: String::new(),
            username: None,
            password: None,
            keep_alive: DEFAULT_KEEP_ALIVE,
            clean_session: true,
            protocol_version: ProtocolVersion::V311,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            tls: None,
            reconnect: ReconnectConfig::default(),
            will: None,
            connect_properties: ConnectProperties::default(),
            auth: None,
        }
    }
}

impl ClientConfig {
    /// Create a new config with the given address.
    pub fn new(address: &str) -> Self {
        Self {
            address: TransportAddress::parse(address),
            ..Default::default()
        }
    }

    /// Set the client ID.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    /// Set username and password.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<Bytes>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set keep-alive interval in seconds.
    pub fn keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = seconds;
        self
    }

    /// Set clean session flag.
    pub fn clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Use MQTT 5.0 protocol.
    pub fn mqtt5(mut self) -> Self {
        self.protocol_version = ProtocolVersion::V5;
        self
    }

    pub fn protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    /// Set connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max.max(1);
        self
    }

    /// Enable TLS.
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn will(mut self, will: Will) -> Self {
        self.will = Some(will);
        self
    }

    pub fn session_expiry(mut self, seconds: u32) -> Self {
        self.connect_properties.session_expiry_interval = Some(seconds);
        self
    }

    pub fn receive_maximum(mut self, max: u16) -> Self {
        self.connect_properties.receive_maximum = Some(max);
        self
    }

    /// Largest packet this client accepts; larger inbound packets close the
    /// connection.
    pub fn maximum_packet_size(mut self, max: u32) -> Self {
        self.connect_properties.maximum_packet_size = Some(max);
        self
    }

    /// Number of inbound topic aliases the broker may use.
    pub fn topic_alias_maximum(mut self, max: u16) -> Self {
        self.connect_properties.topic_alias_maximum = Some(max);
        self
    }

    pub fn user_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.connect_properties
            .user_properties
            .push((key.into(), value.into()));
        self
    }

    pub fn auth(mut self, handler: Arc<dyn AuthHandler>) -> Self {
        self.auth = Some(handler);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_address_parse() {
        assert_eq!(
            TransportAddress::parse("broker:1883"),
            TransportAddress::Tcp("broker:1883".into())
        );
        assert_eq!(
            TransportAddress::parse("mqtt://broker:1883"),
            TransportAddress::Tcp("broker:1883".into())
        );
        assert_eq!(
            TransportAddress::parse("wss://broker/mqtt"),
            TransportAddress::WebSocket("wss://broker/mqtt".into())
        );
        #[cfg(unix)]
        assert_eq!(
            TransportAddress::parse("unix:///tmp/mqtt.sock"),
            TransportAddress::Unix(PathBuf::from("/tmp/mqtt.sock"))
        );
    }

    #[test]
    fn test_host_extraction() {
        assert_eq!(TransportAddress::parse("broker.local:8883").host(), "broker.local");
        assert_eq!(TransportAddress::parse("[::1]:8883").host(), "::1");
        assert_eq!(
            TransportAddress::parse("wss://broker.local:8443/mqtt").host(),
            "broker.local"
        );
        assert_eq!(TransportAddress::parse("ws://broker.local/mqtt").host(), "broker.local");
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::new("localhost:1883")
            .client_id("c1")
            .credentials("user", "pass")
            .keep_alive(30)
            .mqtt5()
            .session_expiry(3600)
            .max_in_flight(0);

        assert_eq!(config.client_id, "c1");
        assert_eq!(config.password.as_deref(), Some(&b"pass"[..]));
        assert_eq!(config.keep_alive, 30);
        assert_eq!(config.protocol_version, ProtocolVersion::V5);
        assert_eq!(config.connect_properties.session_expiry_interval, Some(3600));
        assert_eq!(config.max_in_flight, 1);
        assert!(config.reconnect.enabled);
        assert_eq!(config.reconnect.min_delay, Duration::from_secs(1));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(120));
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = ClientConfig::new("localhost:1883").credentials("user", "hunter2");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
    }
}
