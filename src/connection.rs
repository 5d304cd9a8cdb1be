//! Connection settings for a Kafka cluster's admin and client endpoints.
//!
//! A [`ClusterConnection`] is validated once when built and is immutable
//! afterwards. TLS material is parsed as PEM at that point, so a broken
//! certificate or key fails the build rather than the first handshake. It
//! never opens a socket itself; the adapters in the `kafka` module do.

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufReader, Cursor};
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

/// Errors raised while configuring or talking to a cluster
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("cannot use given SASL mechanism: {0}")]
    UnsupportedMechanism(String),

    #[error("invalid TLS configuration: {0}")]
    TlsConfig(String),

    #[error("cannot connect to Kafka brokers {brokers}: {message}")]
    Connection { brokers: String, message: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("{operation} failed: {message}")]
    Request { operation: String, message: String },

    #[error("{operation} is not supported by this client")]
    Unsupported { operation: String },
}

impl ConnectionError {
    pub fn request(operation: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Request {
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaslMechanism {
    #[default]
    #[serde(rename = "SCRAM-SHA-512")]
    ScramSha512,
    #[serde(rename = "PLAIN")]
    Plain,
}

impl SaslMechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaslMechanism::ScramSha512 => "SCRAM-SHA-512",
            SaslMechanism::Plain => "PLAIN",
        }
    }
}

impl FromStr for SaslMechanism {
    type Err = ConnectionError;

    /// An empty string selects the default, SCRAM-SHA-512
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "SCRAM-SHA-512" => Ok(SaslMechanism::ScramSha512),
            "PLAIN" => Ok(SaslMechanism::Plain),
            other => Err(ConnectionError::UnsupportedMechanism(other.to_string())),
        }
    }
}

impl fmt::Display for SaslMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SaslCredentials {
    pub mechanism: SaslMechanism,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for SaslCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaslCredentials")
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// PEM material handed over by the secret store
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TlsMaterial {
    pub ca_cert: Vec<u8>,
    pub client_cert: Vec<u8>,
    pub client_key: Vec<u8>,
}

impl TlsMaterial {
    pub fn new(ca_cert: impl Into<Vec<u8>>) -> Self {
        Self {
            ca_cert: ca_cert.into(),
            ..Default::default()
        }
    }

    pub fn with_client_identity(mut self, cert: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        self.client_cert = cert.into();
        self.client_key = key.into();
        self
    }

    pub fn is_mutual(&self) -> bool {
        !self.client_cert.is_empty() && !self.client_key.is_empty()
    }

    fn validate(&self) -> Result<(), ConnectionError> {
        if self.ca_cert.is_empty() {
            return Err(ConnectionError::TlsConfig(
                "CA certificate is required when TLS is enabled".to_string(),
            ));
        }
        read_certificates(&self.ca_cert, "CA certificate")?;
        if self.client_cert.is_empty() != self.client_key.is_empty() {
            return Err(ConnectionError::TlsConfig(
                "client certificate and client key must be set together".to_string(),
            ));
        }
        if self.is_mutual() {
            read_certificates(&self.client_cert, "client certificate")?;
            read_private_key(&self.client_key)?;
        }
        Ok(())
    }
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_cert_bytes", &self.ca_cert.len())
            .field("mutual", &self.is_mutual())
            .finish()
    }
}

/// Decode every certificate in a PEM bundle; at least one is required
pub(crate) fn read_certificates(pem: &[u8], what: &str) -> Result<Vec<CertificateDer<'static>>, ConnectionError> {
    let mut reader = BufReader::new(Cursor::new(pem));
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| ConnectionError::TlsConfig(format!("{what} is not valid PEM: {err}")))?;
    if certs.is_empty() {
        return Err(ConnectionError::TlsConfig(format!(
            "no certificates found in {what}"
        )));
    }
    Ok(certs)
}

/// PKCS#8, PKCS#1 and SEC1 keys are accepted
pub(crate) fn read_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, ConnectionError> {
    let mut reader = BufReader::new(Cursor::new(pem));
    rustls_pemfile::private_key(&mut reader)
        .map_err(|err| ConnectionError::TlsConfig(format!("client key is not valid PEM: {err}")))?
        .ok_or_else(|| ConnectionError::TlsConfig("no private key found in client key".to_string()))
}

/// Validated connection settings for one cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConnection {
    bootstrap_servers: Vec<String>,
    sasl: Option<SaslCredentials>,
    tls: Option<TlsMaterial>,
}

impl ClusterConnection {
    pub fn builder<I, S>(bootstrap_servers: I) -> ClusterConnectionBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ClusterConnectionBuilder {
            bootstrap_servers: bootstrap_servers.into_iter().map(Into::into).collect(),
            sasl: None,
            tls_enabled: false,
            tls: TlsMaterial::default(),
        }
    }

    pub fn bootstrap_servers(&self) -> &[String] {
        &self.bootstrap_servers
    }

    pub fn sasl(&self) -> Option<&SaslCredentials> {
        self.sasl.as_ref()
    }

    pub fn tls(&self) -> Option<&TlsMaterial> {
        self.tls.as_ref()
    }

    pub fn security_protocol(&self) -> &'static str {
        match (self.sasl.is_some(), self.tls.is_some()) {
            (false, false) => "plaintext",
            (false, true) => "ssl",
            (true, false) => "sasl_plaintext",
            (true, true) => "sasl_ssl",
        }
    }

    /// librdkafka client properties for these settings.
    ///
    /// Certificates are passed inline as PEM so nothing touches the disk.
    pub fn client_properties(&self) -> Vec<(String, String)> {
        let mut props = vec![
            ("bootstrap.servers".to_string(), self.bootstrap_servers.join(",")),
            ("security.protocol".to_string(), self.security_protocol().to_string()),
        ];

        if let Some(sasl) = &self.sasl {
            props.push(("sasl.mechanism".to_string(), sasl.mechanism.to_string()));
            props.push(("sasl.username".to_string(), sasl.username.clone()));
            props.push(("sasl.password".to_string(), sasl.password.clone()));
        }

        if let Some(tls) = &self.tls {
            props.push((
                "ssl.ca.pem".to_string(),
                String::from_utf8_lossy(&tls.ca_cert).into_owned(),
            ));
            if tls.is_mutual() {
                props.push((
                    "ssl.certificate.pem".to_string(),
                    String::from_utf8_lossy(&tls.client_cert).into_owned(),
                ));
                props.push((
                    "ssl.key.pem".to_string(),
                    String::from_utf8_lossy(&tls.client_key).into_owned(),
                ));
            }
        }

        props
    }
}

pub struct ClusterConnectionBuilder {
    bootstrap_servers: Vec<String>,
    sasl: Option<(String, String, String)>,
    tls_enabled: bool,
    tls: TlsMaterial,
}

impl ClusterConnectionBuilder {
    /// SASL is only configured when both username and password are set
    pub fn sasl(
        mut self,
        mechanism: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.sasl = Some((mechanism.into(), username.into(), password.into()));
        self
    }

    pub fn tls(mut self, enabled: bool, material: TlsMaterial) -> Self {
        self.tls_enabled = enabled;
        self.tls = material;
        self
    }

    pub fn build(self) -> Result<ClusterConnection, ConnectionError> {
        let bootstrap_servers: Vec<String> = self
            .bootstrap_servers
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if bootstrap_servers.is_empty() {
            return Err(ConnectionError::Connection {
                brokers: String::new(),
                message: "bootstrap servers are empty".to_string(),
            });
        }

        let sasl = match self.sasl {
            Some((mechanism, username, password)) if !username.is_empty() && !password.is_empty() => {
                let mechanism: SaslMechanism = mechanism.parse()?;
                info!(%mechanism, "SASL configuration is applied");
                Some(SaslCredentials {
                    mechanism,
                    username,
                    password,
                })
            }
            _ => None,
        };

        let tls = if self.tls_enabled {
            self.tls.validate()?;
            info!(mutual = self.tls.is_mutual(), "TLS configuration is applied");
            Some(self.tls)
        } else {
            None
        };

        Ok(ClusterConnection {
            bootstrap_servers,
            sasl,
            tls,
        })
    }
}
