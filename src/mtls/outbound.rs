//! Client-side (outbound) mTLS for upstream connection pools.
//!
//! Distinct from [`crate::mtls::config::MtlsConfig`] (inbound: the gateway as a TLS
//! server validating *client* certificates). Here the gateway is the TLS *client*,
//! presenting its own certificate to an upstream service, per §4.4.

use std::sync::Arc;

use rustls::ClientConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::mtls::cert_manager::{load_certs, load_private_key};
use crate::upstream::config::UpstreamAuthConfig;
use crate::{Error, Result};

/// Client certificate material for dialing one mTLS-protected upstream.
pub struct OutboundMtls {
    /// `reqwest`-ready identity built from the client cert/key.
    pub client_config: Arc<ClientConfig>,
}

impl OutboundMtls {
    /// Load client cert, client key, and CA bundle from the three configured paths.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolCreate`] if any file is missing or unparseable, or if the
    /// resulting rustls config cannot be built (e.g. mismatched cert/key pair).
    pub fn load(service: &str, cert_path: &str, key_path: &str, ca_path: &str) -> Result<Self> {
        let wrap = |e: Error| Error::PoolCreate {
            service: service.to_string(),
            source: e.to_string(),
        };

        let client_certs: Vec<CertificateDer<'static>> = load_certs(cert_path).map_err(wrap)?;
        let client_key: PrivateKeyDer<'static> = load_private_key(key_path).map_err(wrap)?;
        let ca_certs = load_certs(ca_path).map_err(wrap)?;

        let mut roots = rustls::RootCertStore::empty();
        for cert in ca_certs {
            roots.add(cert).map_err(|e| {
                wrap(Error::Config(format!("failed to add CA cert to trust store: {e}")))
            })?;
        }

        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_client_auth_cert(client_certs, client_key)
            .map_err(|e| wrap(Error::Config(format!("client cert/key mismatch: {e}"))))?;

        Ok(Self {
            client_config: Arc::new(config),
        })
    }

    /// Build an [`OutboundMtls`] from a service's [`UpstreamAuthConfig`], or `None` if the
    /// service does not use mTLS.
    ///
    /// # Errors
    ///
    /// See [`OutboundMtls::load`].
    pub fn from_auth_config(service: &str, auth: Option<&UpstreamAuthConfig>) -> Result<Option<Self>> {
        match auth {
            Some(UpstreamAuthConfig::Mtls {
                client_cert_path,
                client_key_path,
                ca_cert_path,
            }) => Ok(Some(Self::load(
                service,
                client_cert_path,
                client_key_path,
                ca_cert_path,
            )?)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_cert_file_surfaces_pool_create_error() {
        let err = OutboundMtls::load(
            "svc",
            "/nonexistent/cert.pem",
            "/nonexistent/key.pem",
            "/nonexistent/ca.pem",
        )
        .unwrap_err();
        match err {
            Error::PoolCreate { service, .. } => assert_eq!(service, "svc"),
            other => panic!("expected PoolCreate, got {other:?}"),
        }
    }

    #[test]
    fn from_auth_config_none_for_non_mtls_auth() {
        let auth = UpstreamAuthConfig::Bearer {
            token: crate::upstream::config::SecretSource::PlainText("x".to_string()),
        };
        let result = OutboundMtls::from_auth_config("svc", Some(&auth)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn from_auth_config_none_when_absent() {
        let result = OutboundMtls::from_auth_config("svc", None).unwrap();
        assert!(result.is_none());
    }
}
