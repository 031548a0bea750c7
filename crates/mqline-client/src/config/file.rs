//! File and environment configuration.
//!
//! Supports configuration from:
//! - TOML file
//! - Environment variables with `MQLINE__` prefix (double underscore for nesting)
//! - In-file variable substitution: `${VAR}` or `${VAR:-default}`
//!
//! Environment variable examples:
//! - `MQLINE__BROKER__ADDRESS=broker.local:8883`
//! - `MQLINE__SESSION__KEEP_ALIVE=30`
//! - `MQLINE__RECONNECT__ENABLED=false`
//!
//! In-file substitution examples:
//! ```toml
//! [broker]
//! address = "${MQTT_HOST:-localhost}:${MQTT_PORT:-1883}"
//! ```

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use mqline_core::{ProtocolVersion, QoS};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use super::{
    ClientConfig, ReconnectConfig, TlsConfig, TransportAddress, DEFAULT_KEEP_ALIVE,
    DEFAULT_MAX_IN_FLIGHT,
};
use crate::will::Will;

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<ConfigError> for crate::ClientError {
    fn from(e: ConfigError) -> Self {
        crate::ClientError::Config(e.to_string())
    }
}

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("static pattern is valid")
    });
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

/// Broker endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// `host:port`, `unix://path`, `ws://...` or `wss://...`.
    pub address: String,
    /// 4 = 3.1.1, 5 = 5.0.
    pub protocol_version: u8,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub max_in_flight: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            address: "localhost:1883".to_string(),
            protocol_version: 4,
            connect_timeout_secs: super::DEFAULT_CONNECT_TIMEOUT.as_secs(),
            request_timeout_secs: super::DEFAULT_REQUEST_TIMEOUT.as_secs(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

/// Session and identity.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: u16,
    pub clean_session: bool,
    pub session_expiry: Option<u32>,
    pub receive_maximum: Option<u16>,
    pub maximum_packet_size: Option<u32>,
    pub topic_alias_maximum: Option<u16>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            username: None,
            password: None,
            keep_alive: DEFAULT_KEEP_ALIVE,
            clean_session: true,
            session_expiry: None,
            receive_maximum: None,
            maximum_packet_size: None,
            topic_alias_maximum: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    pub enabled: bool,
    pub ca_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub server_name: Option<String>,
    pub accept_invalid_certs: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub enabled: bool,
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        let defaults = ReconnectConfig::default();
        Self {
            enabled: defaults.enabled,
            min_delay_secs: defaults.min_delay.as_secs(),
            max_delay_secs: defaults.max_delay.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WillSettings {
    pub topic: String,
    pub payload: String,
    pub qos: u8,
    pub retain: bool,
}

/// Root of the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub broker: BrokerSettings,
    pub session: SessionSettings,
    pub tls: TlsSettings,
    pub reconnect: ReconnectSettings,
    pub will: Option<WillSettings>,
}

impl ClientSettings {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// A missing file is not an error; defaults and environment variables
    /// still apply.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let defaults = ClientSettings::default();
        let mut builder = config::Config::builder()
            .set_default("broker.address", defaults.broker.address)?
            .set_default("broker.protocol_version", defaults.broker.protocol_version as i64)?
            .set_default("session.keep_alive", defaults.session.keep_alive as i64)?
            .set_default("session.clean_session", defaults.session.clean_session)?
            .set_default("reconnect.enabled", defaults.reconnect.enabled)?;

        let path = path.as_ref();
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let substituted = substitute_env_vars(&content);
            builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
        }

        // Override with environment variables (MQLINE__BROKER__ADDRESS, etc.)
        let cfg = builder
            .add_source(
                Environment::with_prefix("MQLINE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: ClientSettings = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let substituted = substitute_env_vars(content);
        let settings: ClientSettings = toml::from_str(&substituted)
            .map_err(|e| ConfigError::Validation(format!("TOML parse error: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ProtocolVersion::try_from(self.broker.protocol_version)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        if self.broker.max_in_flight == 0 {
            return Err(ConfigError::Validation(
                "broker.max_in_flight must be at least 1".into(),
            ));
        }
        if self.reconnect.min_delay_secs > self.reconnect.max_delay_secs {
            return Err(ConfigError::Validation(format!(
                "reconnect.min_delay_secs ({}) exceeds reconnect.max_delay_secs ({})",
                self.reconnect.min_delay_secs, self.reconnect.max_delay_secs
            )));
        }
        if self.session.password.is_some() && self.session.username.is_none() {
            return Err(ConfigError::Validation(
                "session.password requires session.username".into(),
            ));
        }
        if self.tls.client_cert.is_some() != self.tls.client_key.is_some() {
            return Err(ConfigError::Validation(
                "tls.client_cert and tls.client_key must be set together".into(),
            ));
        }
        if let Some(will) = &self.will {
            QoS::try_from(will.qos).map_err(|e| ConfigError::Validation(e.to_string()))?;
            if will.topic.is_empty() {
                return Err(ConfigError::Validation("will.topic must not be empty".into()));
            }
        }
        Ok(())
    }

    /// Build a [`ClientConfig`] from these settings.
    pub fn to_client_config(&self) -> Result<ClientConfig, ConfigError> {
        let protocol_version = ProtocolVersion::try_from(self.broker.protocol_version)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        let mut config = ClientConfig {
            address: TransportAddress::parse(&self.broker.address),
            client_id: self.session.client_id.clone(),
            username: self.session.username.clone(),
            password: self.session.password.clone().map(Into::into),
            keep_alive: self.session.keep_alive,
            clean_session: self.session.clean_session,
            protocol_version,
            connect_timeout: Duration::from_secs(self.broker.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.broker.request_timeout_secs),
            max_in_flight: self.broker.max_in_flight,
            reconnect: ReconnectConfig {
                enabled: self.reconnect.enabled,
                min_delay: Duration::from_secs(self.reconnect.min_delay_secs),
                max_delay: Duration::from_secs(self.reconnect.max_delay_secs),
            },
            ..Default::default()
        };

        config.connect_properties.session_expiry_interval = self.session.session_expiry;
        config.connect_properties.receive_maximum = self.session.receive_maximum;
        config.connect_properties.maximum_packet_size = self.session.maximum_packet_size;
        config.connect_properties.topic_alias_maximum = self.session.topic_alias_maximum;

        if self.tls.enabled {
            config.tls = Some(TlsConfig {
                ca_cert: self.tls.ca_cert.clone(),
                client_cert: self.tls.client_cert.clone(),
                client_key: self.tls.client_key.clone(),
                server_name: self.tls.server_name.clone(),
                accept_invalid_certs: self.tls.accept_invalid_certs,
            });
        }

        if let Some(will) = &self.will {
            let qos =
                QoS::try_from(will.qos).map_err(|e| ConfigError::Validation(e.to_string()))?;
            config.will = Some(
                Will::new(will.topic.clone(), will.payload.clone())
                    .qos(qos)
                    .retain(will.retain),
            );
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = ClientSettings::default();
        assert!(settings.validate().is_ok());
        let config = settings.to_client_config().unwrap();
        assert_eq!(config.max_in_flight, 20);
        assert_eq!(config.protocol_version, ProtocolVersion::V311);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            [broker]
            address = "wss://broker.example.com/mqtt"
            protocol_version = 5

            [session]
            client_id = "sensor-1"
            keep_alive = 15
            session_expiry = 600

            [reconnect]
            min_delay_secs = 2
            max_delay_secs = 30

            [will]
            topic = "sensors/1/status"
            payload = "offline"
            qos = 1
            retain = true
        "#;
        let settings = ClientSettings::parse(toml).unwrap();
        let config = settings.to_client_config().unwrap();

        assert_eq!(
            config.address,
            TransportAddress::WebSocket("wss://broker.example.com/mqtt".into())
        );
        assert_eq!(config.protocol_version, ProtocolVersion::V5);
        assert_eq!(config.client_id, "sensor-1");
        assert_eq!(config.keep_alive, 15);
        assert_eq!(config.connect_properties.session_expiry_interval, Some(600));
        assert_eq!(config.reconnect.min_delay, Duration::from_secs(2));
        let will = config.will.unwrap();
        assert_eq!(will.qos, QoS::AtLeastOnce);
        assert!(will.retain);
    }

    #[test]
    fn test_substitution_with_default() {
        std::env::set_var("MQLINE_TEST_HOST_A", "10.0.0.7");
        let toml = r#"
            [broker]
            address = "${MQLINE_TEST_HOST_A}:${MQLINE_TEST_PORT_UNSET:-1884}"
        "#;
        let settings = ClientSettings::parse(toml).unwrap();
        assert_eq!(settings.broker.address, "10.0.0.7:1884");
    }

    #[test]
    fn test_validation_errors() {
        assert!(ClientSettings::parse("[broker]\nprotocol_version = 3").is_err());
        assert!(ClientSettings::parse("[broker]\nmax_in_flight = 0").is_err());
        assert!(ClientSettings::parse(
            "[reconnect]\nmin_delay_secs = 10\nmax_delay_secs = 5"
        )
        .is_err());
        assert!(ClientSettings::parse("[tls]\nclient_cert = \"c.pem\"").is_err());
        assert!(ClientSettings::parse("[will]\ntopic = \"t\"\nqos = 3").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[broker]\naddress = \"file-broker:1883\"\n[session]\nclient_id = \"from-file\""
        )
        .unwrap();

        let settings = ClientSettings::load(file.path()).unwrap();
        assert_eq!(settings.broker.address, "file-broker:1883");
        assert_eq!(settings.session.client_id, "from-file");
        assert_eq!(settings.session.keep_alive, DEFAULT_KEEP_ALIVE);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let settings = ClientSettings::load("/nonexistent/mqline.toml").unwrap();
        assert_eq!(settings.broker.protocol_version, 4);
        assert!(settings.reconnect.enabled);
    }
}
