//! Secret resolution: a pluggable provider behind a pull-through cache, plus the
//! keychain/env-var resolver the gateway previously used as its only provider.

use std::process::Command;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{Error, Result};

/// A backend capable of producing and rotating secret values.
///
/// Mirrors §6's secret provider interface exactly: `GetSecret`/`RotateSecret`, with
/// [`Error::SecretNotFound`] as the canonical not-found signal.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Fetch the current value for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SecretNotFound`] if `id` is unknown to the backend.
    async fn get_secret(&self, id: &str) -> Result<String>;

    /// Rotate `id` and return its new value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SecretNotFound`] if `id` is unknown to the backend.
    async fn rotate_secret(&self, id: &str) -> Result<String>;
}

/// Pull-through cache over a [`SecretProvider`] (§4.6).
///
/// `get` populates the cache on first success and thereafter returns the cached value
/// regardless of backend changes, until `rotate` (or an external [`SecretsCache::evict`])
/// updates it. §8 S9 is the canonical test of this behavior.
pub struct SecretsCache {
    provider: Arc<dyn SecretProvider>,
    cache: DashMap<String, String>,
}

impl SecretsCache {
    /// Wrap `provider` in a pull-through cache.
    #[must_use]
    pub fn new(provider: Arc<dyn SecretProvider>) -> Self {
        Self {
            provider,
            cache: DashMap::new(),
        }
    }

    /// Return the cached value for `id`, pulling from the provider and caching on first
    /// access.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SecretNotFound`] if `id` is unknown to the backend and was never
    /// cached.
    pub async fn get(&self, id: &str) -> Result<String> {
        if let Some(cached) = self.cache.get(id) {
            return Ok(cached.clone());
        }
        let value = self.provider.get_secret(id).await?;
        self.cache.insert(id.to_string(), value.clone());
        Ok(value)
    }

    /// Unconditionally ask the provider to rotate `id`, then update the cache with the
    /// returned value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SecretNotFound`] if `id` is unknown to the backend.
    pub async fn rotate(&self, id: &str) -> Result<String> {
        let value = self.provider.rotate_secret(id).await?;
        self.cache.insert(id.to_string(), value.clone());
        Ok(value)
    }

    /// Drop a single cached entry, forcing the next `get` to pull from the backend again.
    pub fn evict(&self, id: &str) {
        self.cache.remove(id);
    }

    /// Clear every cached entry.
    pub fn clear(&self) {
        self.cache.clear();
    }
}

/// A [`SecretProvider`] backed by the system keychain (macOS `security` / Linux
/// `secret-tool`) and environment variables, matching the gateway's original
/// `{keychain.X}` / `{env.X}` placeholder resolution.
pub struct KeychainEnvProvider;

#[async_trait]
impl SecretProvider for KeychainEnvProvider {
    async fn get_secret(&self, id: &str) -> Result<String> {
        if let Some(var) = id.strip_prefix("env:") {
            return std::env::var(var).map_err(|_| Error::SecretNotFound(id.to_string()));
        }
        if let Some(service) = id.strip_prefix("keychain:") {
            return Self::fetch_from_keychain(service);
        }
        Err(Error::SecretNotFound(id.to_string()))
    }

    async fn rotate_secret(&self, id: &str) -> Result<String> {
        // Keychain/env secrets are not rotatable by this gateway; re-read the current
        // value so `SecretsCache::rotate` still refreshes a stale cache entry.
        self.get_secret(id).await
    }
}

impl KeychainEnvProvider {
    #[cfg(target_os = "macos")]
    fn fetch_from_keychain(service: &str) -> Result<String> {
        let output = Command::new("security")
            .args(["find-generic-password", "-s", service, "-w"])
            .output()
            .map_err(|e| Error::Config(format!("Failed to access macOS Keychain: {e}")))?;

        if output.status.success() {
            let secret = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if secret.is_empty() {
                Err(Error::SecretNotFound(service.to_string()))
            } else {
                Ok(secret)
            }
        } else {
            Err(Error::SecretNotFound(service.to_string()))
        }
    }

    #[cfg(target_os = "linux")]
    fn fetch_from_keychain(service: &str) -> Result<String> {
        let output = Command::new("secret-tool")
            .args(["lookup", "service", service])
            .output()
            .map_err(|e| {
                Error::Config(format!("Failed to access Linux secret service: {e}. Is libsecret installed?"))
            })?;

        if output.status.success() {
            let secret = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if secret.is_empty() {
                Err(Error::SecretNotFound(service.to_string()))
            } else {
                Ok(secret)
            }
        } else {
            Err(Error::SecretNotFound(service.to_string()))
        }
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    fn fetch_from_keychain(service: &str) -> Result<String> {
        Err(Error::Config(format!(
            "Keychain access is only supported on macOS and Linux; cannot resolve '{service}'. Use env: instead."
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingProvider {
        calls: AtomicU32,
        value_prefix: &'static str,
    }

    #[async_trait]
    impl SecretProvider for CountingProvider {
        async fn get_secret(&self, id: &str) -> Result<String> {
            if id == "missing" {
                return Err(Error::SecretNotFound(id.to_string()));
            }
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{}-{n}", self.value_prefix))
        }

        async fn rotate_secret(&self, id: &str) -> Result<String> {
            if id == "missing" {
                return Err(Error::SecretNotFound(id.to_string()));
            }
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{}-rotated-{n}", self.value_prefix))
        }
    }

    #[tokio::test]
    async fn s9_get_is_cached_until_rotate() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            value_prefix: "v1",
        });
        let cache = SecretsCache::new(provider);

        let first = cache.get("k").await.unwrap();
        let second = cache.get("k").await.unwrap();
        assert_eq!(first, second);

        let rotated = cache.rotate("k").await.unwrap();
        assert_ne!(rotated, first);
        let after_rotate = cache.get("k").await.unwrap();
        assert_eq!(after_rotate, rotated);
    }

    #[tokio::test]
    async fn missing_secret_not_found() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            value_prefix: "v1",
        });
        let cache = SecretsCache::new(provider);
        let err = cache.get("missing").await.unwrap_err();
        assert!(matches!(err, Error::SecretNotFound(_)));
    }

    #[tokio::test]
    async fn evict_forces_refresh() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            value_prefix: "v1",
        });
        let cache = SecretsCache::new(provider);
        let first = cache.get("k").await.unwrap();
        cache.evict("k");
        let second = cache.get("k").await.unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn keychain_env_provider_resolves_env() {
        // Synchronous smoke test without a runtime; env:PATH is always set.
        let provider = KeychainEnvProvider;
        let fut = provider.get_secret("env:PATH");
        let result = futures::executor::block_on(fut);
        assert!(result.is_ok());
    }
}
