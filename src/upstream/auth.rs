//! Builds per-request credentials for outbound upstream calls.
//!
//! Shape mirrors [`crate::gateway::auth`]'s "resolved config" pattern (resolve once at
//! registration, apply cheaply per request) but targets a `reqwest::RequestBuilder`
//! instead of inbound `axum` middleware, and resolves `secret_ref` values through
//! [`crate::secrets::SecretsCache`] instead of reading a static bearer token.

use std::sync::Arc;

use reqwest::RequestBuilder;

use crate::secrets::SecretsCache;
use crate::upstream::config::{SecretSource, UpstreamAuthConfig};
use crate::Result;

/// Per-request credential applier, resolved once at `Register` time and reused for every
/// call to a service.
pub enum Authenticator {
    /// No credentials applied.
    None,
    /// A named header or query parameter carrying an API key.
    ApiKey {
        /// Parameter name.
        param_name: String,
        /// Resolved value source.
        value: SecretSource,
    },
    /// HTTP Basic.
    Basic {
        /// Username value source.
        username: SecretSource,
        /// Password value source.
        password: SecretSource,
    },
    /// Bearer token.
    Bearer {
        /// Token value source.
        token: SecretSource,
    },
    /// mTLS carries no per-request header; credentials live in the connection itself
    /// (see [`crate::mtls::outbound::OutboundMtls`]), so this variant applies nothing.
    Mtls,
}

impl Authenticator {
    /// Build an authenticator from a service's configured auth block.
    #[must_use]
    pub fn from_config(config: Option<&UpstreamAuthConfig>) -> Self {
        match config {
            None => Self::None,
            Some(UpstreamAuthConfig::ApiKey { param_name, value }) => Self::ApiKey {
                param_name: param_name.clone(),
                value: value.clone(),
            },
            Some(UpstreamAuthConfig::Basic { username, password }) => Self::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            Some(UpstreamAuthConfig::Bearer { token }) => Self::Bearer {
                token: token.clone(),
            },
            Some(UpstreamAuthConfig::Mtls { .. }) => Self::Mtls,
        }
    }

    /// Resolve `source` to a concrete string, pulling through `secrets` for
    /// [`SecretSource::SecretRef`] values.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SecretNotFound`] if a `secret_ref` cannot be resolved.
    async fn resolve(source: &SecretSource, secrets: &SecretsCache) -> Result<String> {
        match source {
            SecretSource::PlainText(v) => Ok(v.clone()),
            SecretSource::SecretRef(id) => secrets.get(id).await,
        }
    }

    /// Apply this authenticator's credentials to an outgoing request.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SecretNotFound`] if a referenced secret cannot be resolved.
    pub async fn apply(
        &self,
        request: RequestBuilder,
        secrets: &Arc<SecretsCache>,
    ) -> Result<RequestBuilder> {
        match self {
            Self::None | Self::Mtls => Ok(request),
            Self::ApiKey { param_name, value } => {
                let resolved = Self::resolve(value, secrets).await?;
                Ok(request.header(param_name, resolved))
            }
            Self::Basic { username, password } => {
                let user = Self::resolve(username, secrets).await?;
                let pass = Self::resolve(password, secrets).await?;
                Ok(request.basic_auth(user, Some(pass)))
            }
            Self::Bearer { token } => {
                let resolved = Self::resolve(token, secrets).await?;
                Ok(request.bearer_auth(resolved))
            }
        }
    }
}
