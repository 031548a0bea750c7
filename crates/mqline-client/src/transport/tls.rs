//! TLS layering using rustls.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::config::TlsConfig;
use crate::error::{ClientError, Result};

/// Run the TLS handshake over `stream`. The channel is only handed on once
/// the server certificate has been verified.
pub(crate) async fn connect<S>(stream: S, config: &TlsConfig, host: &str) -> Result<TlsStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let connector = TlsConnector::from(Arc::new(build_client_config(config)?));
    let name = config.server_name.as_deref().unwrap_or(host);
    let server_name = ServerName::try_from(name.to_string())
        .map_err(|_| ClientError::Tls(format!("Invalid server name: {}", name)))?;

    let stream = connector
        .connect(server_name, stream)
        .await
        .map_err(|e| ClientError::Tls(e.to_string()))?;
    log::debug!("TLS handshake with {} complete", name);
    Ok(stream)
}

/// Build a rustls ClientConfig from our TlsConfig.
pub(crate) fn build_client_config(config: &TlsConfig) -> Result<ClientConfig> {
    if config.accept_invalid_certs {
        log::warn!("TLS certificate verification is disabled");
        return Ok(ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::NoCertificateVerification))
            .with_no_client_auth());
    }

    let mut root_store = RootCertStore::empty();
    match &config.ca_cert {
        Some(ca_path) => {
            for cert in load_certs(ca_path, "CA cert")? {
                root_store
                    .add(cert)
                    .map_err(|e| ClientError::Tls(format!("Failed to add CA cert: {}", e)))?;
            }
        }
        None => root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let builder = ClientConfig::builder().with_root_certificates(root_store);

    // Mutual TLS
    let tls_config = match (&config.client_cert, &config.client_key) {
        (Some(cert_path), Some(key_path)) => {
            let certs = load_certs(cert_path, "client cert")?;
            let key = load_key(key_path)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| ClientError::Tls(format!("Failed to configure client auth: {}", e)))?
        }
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(ClientError::Tls(
                "client_cert and client_key must be set together".to_string(),
            ))
        }
    };

    Ok(tls_config)
}

fn load_certs(path: &Path, what: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| ClientError::Tls(format!("Failed to open {}: {}", what, e)))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ClientError::Tls(format!("Failed to parse {}: {}", what, e)))?;
    if certs.is_empty() {
        return Err(ClientError::Tls(format!(
            "No certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| ClientError::Tls(format!("Failed to open client key: {}", e)))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| ClientError::Tls(format!("Failed to parse client key: {}", e)))?
        .ok_or_else(|| ClientError::Tls("No private key found in file".to_string()))
}

/// Danger: A certificate verifier that accepts any certificate.
/// Only use for testing with self-signed certificates.
mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    #[derive(Debug)]
    pub struct NoCertificateVerification;

    impl ServerCertVerifier for NoCertificateVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> std::result::Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::ECDSA_NISTP521_SHA512,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
                SignatureScheme::ED25519,
            ]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_and_insecure_configs() {
        assert!(build_client_config(&TlsConfig::default()).is_ok());
        let insecure = TlsConfig {
            accept_invalid_certs: true,
            ..Default::default()
        };
        assert!(build_client_config(&insecure).is_ok());
    }

    #[test]
    fn test_bad_ca_file() {
        let missing = TlsConfig {
            ca_cert: Some("/nonexistent/ca.pem".into()),
            ..Default::default()
        };
        assert!(matches!(build_client_config(&missing), Err(ClientError::Tls(_))));

        let mut empty = tempfile::NamedTempFile::new().unwrap();
        writeln!(empty, "not a certificate").unwrap();
        let config = TlsConfig {
            ca_cert: Some(empty.path().to_path_buf()),
            ..Default::default()
        };
        assert!(matches!(build_client_config(&config), Err(ClientError::Tls(_))));
    }

    #[test]
    fn test_half_configured_mutual_tls() {
        let config = TlsConfig {
            client_cert: Some("/tmp/cert.pem".into()),
            ..Default::default()
        };
        assert!(matches!(build_client_config(&config), Err(ClientError::Tls(_))));
    }
}
