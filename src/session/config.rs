//! Per-broker session configuration.
//!
//! [`SessionConfig`] is the connection descriptor one [`Session`](super::Session)
//! is built from. Validation and transport selection are pure functions of the
//! descriptor, so they can be checked without touching the network or disk.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{AgentSettings, BrokerSettings};
use crate::session::backoff::BackoffPolicy;
use crate::utils::error::ConfigError;

pub const DEFAULT_INBOUND_CAPACITY: usize = 16;
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);
pub const DEFAULT_REGISTER_PREFIX: &str = "register";
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport chosen for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportScheme {
    /// Plain TCP.
    Plaintext,
    /// TLS with root-CA trust and a client certificate.
    Tls,
}

impl TransportScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportScheme::Plaintext => "tcp",
            TransportScheme::Tls => "ssl",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            TransportScheme::Plaintext => 1883,
            TransportScheme::Tls => 8883,
        }
    }
}

impl fmt::Display for TransportScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three TLS files, present together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub root_ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Host and port resolved from the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub scheme: TransportScheme,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Broker alias from configuration.
    pub name: String,
    /// MQTT client id; also the session identifier in status documents.
    pub client_id: String,
    /// `host:port`.
    pub endpoint: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub root_ca: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    /// Topic filter to QoS, re-subscribed on every connect.
    pub subscriptions: BTreeMap<String, u8>,
    pub keep_alive: Duration,
    pub inbound_capacity: usize,
    pub register_prefix: String,
    pub publish_timeout: Duration,
    pub reconnect: BackoffPolicy,
}

impl SessionConfig {
    pub fn new(
        name: impl Into<String>,
        client_id: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client_id: client_id.into(),
            endpoint: endpoint.into(),
            username: None,
            password: None,
            root_ca: None,
            cert: None,
            key: None,
            subscriptions: BTreeMap::new(),
            keep_alive: DEFAULT_KEEP_ALIVE,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            register_prefix: DEFAULT_REGISTER_PREFIX.to_string(),
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            reconnect: BackoffPolicy::default(),
        }
    }

    /// Builds the descriptor for broker `name` from loaded settings.
    pub fn from_settings(name: &str, broker: &BrokerSettings, agent: &AgentSettings) -> Self {
        Self {
            name: name.to_string(),
            client_id: agent.device_id.trim().to_string(),
            endpoint: broker.endpoint.trim().to_string(),
            username: non_empty(broker.username.as_deref()),
            password: non_empty(broker.password.as_deref()),
            root_ca: non_empty(broker.root_ca.as_deref()).map(PathBuf::from),
            cert: non_empty(broker.cert.as_deref()).map(PathBuf::from),
            key: non_empty(broker.key.as_deref()).map(PathBuf::from),
            subscriptions: broker.subscribe_topics.clone(),
            keep_alive: Duration::from_secs(broker.keep_alive_secs),
            inbound_capacity: broker.inbound_capacity,
            register_prefix: agent.register_prefix.clone(),
            publish_timeout: Duration::from_millis(agent.publish_timeout_ms),
            reconnect: BackoffPolicy::default(),
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_tls(
        mut self,
        root_ca: impl Into<PathBuf>,
        cert: impl Into<PathBuf>,
        key: impl Into<PathBuf>,
    ) -> Self {
        self.root_ca = Some(root_ca.into());
        self.cert = Some(cert.into());
        self.key = Some(key.into());
        self
    }

    pub fn with_subscription(mut self, topic: impl Into<String>, qos: u8) -> Self {
        self.subscriptions.insert(topic.into(), qos);
        self
    }

    /// Checks the descriptor and resolves the broker address.
    ///
    /// Fails on an empty endpoint, an empty client id, partially specified
    /// TLS material, or an endpoint that is not `host[:port]`.
    pub fn validate(&self) -> Result<BrokerAddress, ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::MissingClientId);
        }
        let scheme = self.scheme()?;
        let (host, port) = parse_endpoint(self.endpoint.trim(), scheme.default_port())?;
        Ok(BrokerAddress { scheme, host, port })
    }

    /// TLS when all three files are configured, plaintext when none are.
    pub fn scheme(&self) -> Result<TransportScheme, ConfigError> {
        Ok(match self.tls_paths()? {
            Some(_) => TransportScheme::Tls,
            None => TransportScheme::Plaintext,
        })
    }

    /// The TLS files, enforcing all-or-nothing.
    pub fn tls_paths(&self) -> Result<Option<TlsPaths>, ConfigError> {
        let root_ca = present(self.root_ca.as_deref());
        let cert = present(self.cert.as_deref());
        let key = present(self.key.as_deref());

        match (root_ca, cert, key) {
            (Some(root_ca), Some(cert), Some(key)) => Ok(Some(TlsPaths {
                root_ca: root_ca.to_path_buf(),
                cert: cert.to_path_buf(),
                key: key.to_path_buf(),
            })),
            (None, None, None) => Ok(None),
            (root_ca, cert, key) => {
                let missing = [("root_ca", root_ca), ("cert", cert), ("key", key)]
                    .into_iter()
                    .filter(|(_, path)| path.is_none())
                    .map(|(field, _)| field)
                    .collect();
                Err(ConfigError::PartialTls { missing })
            }
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn present(path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| !p.as_os_str().is_empty())
}

/// Splits `host[:port]` (or `[v6]:port`), defaulting the port.
fn parse_endpoint(endpoint: &str, default_port: u16) -> Result<(String, u16), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };

    if endpoint.contains("://") {
        return Err(invalid("expected host:port without a scheme"));
    }

    let (host, port) = if let Some(rest) = endpoint.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
        match tail.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if tail.is_empty() => (host, None),
            None => return Err(invalid("unexpected characters after IPv6 literal")),
        }
    } else {
        match endpoint.rsplit_once(':') {
            Some((host, _)) if host.contains(':') => {
                return Err(invalid("IPv6 addresses must be bracketed"));
            }
            Some((host, port)) => (host, Some(port)),
            None => (endpoint, None),
        }
    };

    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    let port = match port {
        Some(port) => port
            .parse::<u16>()
            .map_err(|_| invalid("port must be a number between 1 and 65535"))
            .and_then(|p| if p == 0 { Err(invalid("port must not be 0")) } else { Ok(p) })?,
        None => default_port,
    };
    Ok((host.to_string(), port))
}
