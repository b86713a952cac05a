//! TLS client configuration for broker sessions.
//!
//! Trust is restricted to the configured root CA and the session authenticates
//! with its client certificate. TLS 1.2 is the minimum protocol version.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};

use crate::session::config::TlsPaths;
use crate::utils::error::ConfigError;

/// Loads the three TLS files and builds a rustls client configuration.
pub fn client_config(paths: &TlsPaths) -> Result<Arc<ClientConfig>, ConfigError> {
    let mut roots = RootCertStore::empty();
    let (added, _ignored) = roots.add_parsable_certificates(load_certs(&paths.root_ca)?);
    if added == 0 {
        return Err(material(&paths.root_ca, "no CA certificates found"));
    }

    let chain = load_certs(&paths.cert)?;
    let key = load_private_key(&paths.key)?;

    let config = ClientConfig::builder_with_protocol_versions(&[
        &rustls::version::TLS13,
        &rustls::version::TLS12,
    ])
    .with_root_certificates(roots)
    .with_client_auth_cert(chain, key)
    .map_err(|e| material(&paths.cert, e.to_string()))?;

    Ok(Arc::new(config))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| material(path, e.to_string()))?;
    if certs.is_empty() {
        return Err(material(path, "no certificates found"));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| material(path, e.to_string()))?
        .ok_or_else(|| material(path, "no private key found"))
}

fn open(path: &Path) -> Result<BufReader<File>, ConfigError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| material(path, e.to_string()))
}

fn material(path: &Path, reason: impl Into<String>) -> ConfigError {
    ConfigError::TlsMaterial {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}
