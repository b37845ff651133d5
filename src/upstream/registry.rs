//! Service registry (§4.1): the single source of truth for which upstreams are configured,
//! what their last registration error (if any) was, and what their tools/resources/prompts
//! are.
//!
//! Grounded on [`crate::backend`]'s `Arc`-of-shared-state idiom and on
//! [`crate::gateway::server`]'s health-check `tokio::spawn` + `tokio::time::interval` +
//! `tokio::select!` loop (there driven by a broadcast `shutdown_rx`, here by a
//! [`CancellationToken`] since health checks are per-service rather than global).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::managers::{PromptManager, ResourceManager, ToolManager};
use crate::upstream::config::ServiceConfig;
use crate::{Error, Result};

/// What the registry needs from an upstream adapter (§6 "upstream adapter interface").
#[async_trait]
pub trait UpstreamAdapter: Send + Sync {
    /// Register `config`'s tools/resources/prompts into the given managers.
    ///
    /// `is_reload` is `true` when this call is re-registering a service that was already
    /// registered under a (possibly different) name; adapters that derive ids purely from
    /// `config` need not act on it themselves — [`ServiceRegistry::register_service`] is
    /// what uses it to clear the previous generation's entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the service's address/config is invalid or its connection pool
    /// could not be built; per §7 this is a configuration error and blocks the service
    /// (the registry still records the attempt).
    async fn register(
        &self,
        config: &ServiceConfig,
        tool_manager: &dyn ToolManager,
        resource_manager: &dyn ResourceManager,
        prompt_manager: &dyn PromptManager,
        is_reload: bool,
    ) -> Result<Vec<String>>;

    /// Release any resources (pools, background tasks) held for this service.
    async fn shutdown(&self) -> Result<()>;

    /// Optional liveness probe, polled by [`ServiceRegistry::start_health_checks`].
    async fn check_health(&self) -> Result<()> {
        Ok(())
    }
}

/// Point-in-time snapshot of one service's registration state, returned by
/// [`ServiceRegistry::get_service_info`]/[`ServiceRegistry::get_all_services`].
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    /// Sanitized service id.
    pub id: String,
    /// The service's current configuration.
    pub config: ServiceConfig,
    /// Last registration or health-check error, if any.
    pub last_error: Option<String>,
    /// Number of tools currently registered under this service id.
    pub tool_count: usize,
}

struct Entry {
    config: ServiceConfig,
    adapter: Option<Arc<dyn UpstreamAdapter>>,
    error: Option<String>,
}

/// Central registry of configured upstream services (§4.1).
///
/// Invariants: every public method acquires the single `RwLock`; reads take it shared,
/// writes take it exclusive; no method calls back into the registry while holding the
/// lock (deadlock prevention, per §4.1's closing invariant).
pub struct ServiceRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    tool_manager: Arc<dyn ToolManager>,
    resource_manager: Arc<dyn ResourceManager>,
    prompt_manager: Arc<dyn PromptManager>,
}

impl ServiceRegistry {
    /// Build a registry backed by `tool_manager`/`resource_manager`/`prompt_manager`.
    #[must_use]
    pub fn new(
        tool_manager: Arc<dyn ToolManager>,
        resource_manager: Arc<dyn ResourceManager>,
        prompt_manager: Arc<dyn PromptManager>,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            tool_manager,
            resource_manager,
            prompt_manager,
        }
    }

    /// Register (or reload-register) a service.
    ///
    /// Computes the sanitized id, persists `config` under it regardless of whether
    /// `adapter.register` succeeds, and clears any tools/resources/prompts left behind by
    /// a prior registration before the adapter adds its new ones (§8 invariant 2: a
    /// reload leaves no entries from the previous generation).
    ///
    /// `old_id` names the id of a prior registration of this same logical service — pass
    /// it on a reload (including one that renamed the service) so the previous
    /// generation's tools/resources/prompts and registry entry are cleared even though
    /// the new id (derived from the possibly-changed name) differs from it. `is_reload`,
    /// passed to the adapter, is simply `old_id.is_some()`.
    ///
    /// # Errors
    ///
    /// Returns whatever error `adapter.register` produced. The service is still recorded
    /// (config persisted, error stored) even on failure; this return value mirrors what
    /// callers can also retrieve later via [`ServiceRegistry::get_service_info`].
    pub async fn register_service(
        &self,
        mut config: ServiceConfig,
        adapter: Arc<dyn UpstreamAdapter>,
        old_id: Option<&str>,
    ) -> Result<(String, Vec<String>)> {
        if config.name.trim().is_empty() {
            return Err(Error::AddressRequired);
        }
        let id = ServiceConfig::compute_id(&config.name);
        let sanitized = ServiceConfig::sanitize_name(&config.name);
        config.id = Some(id.clone());
        config.sanitized_name = Some(sanitized);
        let is_reload = old_id.is_some();

        // Clear tools/resources/prompts from any prior generation before the adapter
        // registers its new ones, so a failed re-register never leaves stale entries.
        // A rename changes `id`, so the previous generation must be cleared by `old_id`,
        // not by the freshly computed `id` (§8 invariant 2).
        self.tool_manager.clear_tools_for_service(&id);
        self.resource_manager.clear_resources_for_service(&id);
        self.prompt_manager.clear_prompts_for_service(&id);
        if let Some(old_id) = old_id {
            if old_id != id {
                self.tool_manager.clear_tools_for_service(old_id);
                self.resource_manager.clear_resources_for_service(old_id);
                self.prompt_manager.clear_prompts_for_service(old_id);
            }
        }

        let result = adapter
            .register(
                &config,
                self.tool_manager.as_ref(),
                self.resource_manager.as_ref(),
                self.prompt_manager.as_ref(),
                is_reload,
            )
            .await;

        let mut entries = self.entries.write();
        if let Some(old_id) = old_id {
            if old_id != id {
                entries.remove(old_id);
            }
        }
        match &result {
            Ok(_) => {
                entries.insert(
                    id.clone(),
                    Entry {
                        config,
                        adapter: Some(adapter),
                        error: None,
                    },
                );
            }
            Err(e) => {
                entries.insert(
                    id.clone(),
                    Entry {
                        config,
                        adapter: Some(adapter),
                        error: Some(e.to_string()),
                    },
                );
            }
        }
        drop(entries);

        result.map(|tools| (id, tools))
    }

    /// Deregister a service: clears its tools/resources/prompts, shuts its adapter down,
    /// and removes its config/error entry.
    ///
    /// # Errors
    ///
    /// Returns whatever error the adapter's `shutdown` produced; the entry is removed
    /// regardless.
    pub async fn deregister_service(&self, id: &str) -> Result<()> {
        self.tool_manager.clear_tools_for_service(id);
        self.resource_manager.clear_resources_for_service(id);
        self.prompt_manager.clear_prompts_for_service(id);
        let adapter = {
            let mut entries = self.entries.write();
            entries.remove(id).and_then(|e| e.adapter)
        };
        if let Some(adapter) = adapter {
            adapter.shutdown().await?;
        }
        Ok(())
    }

    /// Deep-clone snapshot of one service's registration state.
    #[must_use]
    pub fn get_service_info(&self, id: &str) -> Option<ServiceInfo> {
        let entries = self.entries.read();
        let entry = entries.get(id)?;
        let tool_count = self
            .tool_manager
            .list_tools()
            .iter()
            .filter(|t| t.service_id == id)
            .count();
        Some(ServiceInfo {
            id: id.to_string(),
            config: entry.config.clone(),
            last_error: entry.error.clone(),
            tool_count,
        })
    }

    /// Deep-clone snapshot of every registered service, including ones whose last
    /// registration attempt failed.
    #[must_use]
    pub fn get_all_services(&self) -> Vec<ServiceInfo> {
        let entries = self.entries.read();
        entries
            .keys()
            .filter_map(|id| {
                let entry = entries.get(id)?;
                let tool_count = self
                    .tool_manager
                    .list_tools()
                    .iter()
                    .filter(|t| &t.service_id == id)
                    .count();
                Some(ServiceInfo {
                    id: id.clone(),
                    config: entry.config.clone(),
                    last_error: entry.error.clone(),
                    tool_count,
                })
            })
            .collect()
    }

    /// Start a background health-check task per registered upstream that wants one.
    /// Each task polls `check_health` every `interval`, recording failures and clearing
    /// them on subsequent success, and exits when `cancel` fires.
    pub fn start_health_checks(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let adapters: Vec<(String, Arc<dyn UpstreamAdapter>)> = {
                            let entries = registry.entries.read();
                            entries
                                .iter()
                                .filter_map(|(id, e)| e.adapter.clone().map(|a| (id.clone(), a)))
                                .collect()
                        };
                        for (id, adapter) in adapters {
                            match adapter.check_health().await {
                                Ok(()) => {
                                    let mut entries = registry.entries.write();
                                    if let Some(entry) = entries.get_mut(&id) {
                                        entry.error = None;
                                    }
                                }
                                Err(e) => {
                                    warn!(service = %id, error = %e, "health check failed");
                                    let mut entries = registry.entries.write();
                                    if let Some(entry) = entries.get_mut(&id) {
                                        entry.error = Some(e.to_string());
                                    }
                                }
                            }
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::{InMemoryPromptManager, InMemoryResourceManager, InMemoryToolManager};
    use crate::upstream::config::{HttpServiceConfig, UpstreamKind};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    fn new_registry() -> ServiceRegistry {
        ServiceRegistry::new(
            Arc::new(InMemoryToolManager::new()),
            Arc::new(InMemoryResourceManager::new()),
            Arc::new(InMemoryPromptManager::new()),
        )
    }

    fn config(name: &str) -> ServiceConfig {
        ServiceConfig {
            name: name.to_string(),
            sanitized_name: None,
            id: None,
            upstream: UpstreamKind::Http(HttpServiceConfig {
                address: "https://example.com".to_string(),
                ..HttpServiceConfig::default()
            }),
            upstream_auth: None,
            connection_pool: Default::default(),
            resilience: Default::default(),
            tool_export_policy: Default::default(),
            resource_export_policy: Default::default(),
            prompt_export_policy: Default::default(),
            call_policies: Vec::new(),
        }
    }

    struct FailingAdapter;
    #[async_trait]
    impl UpstreamAdapter for FailingAdapter {
        async fn register(
            &self,
            _config: &ServiceConfig,
            _tm: &dyn ToolManager,
            _rm: &dyn ResourceManager,
            _pm: &dyn PromptManager,
            _is_reload: bool,
        ) -> Result<Vec<String>> {
            Err(Error::ConnectFailed)
        }
        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
    }

    struct OkAdapter;
    #[async_trait]
    impl UpstreamAdapter for OkAdapter {
        async fn register(
            &self,
            _config: &ServiceConfig,
            _tm: &dyn ToolManager,
            _rm: &dyn ResourceManager,
            _pm: &dyn PromptManager,
            _is_reload: bool,
        ) -> Result<Vec<String>> {
            Ok(vec!["tool_a".to_string()])
        }
        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_registration_is_still_recorded() {
        let registry = new_registry();
        let result = registry.register_service(config("svc"), Arc::new(FailingAdapter), None).await;
        assert!(result.is_err());

        let id = ServiceConfig::compute_id("svc");
        let info = registry.get_service_info(&id).expect("service recorded despite error");
        assert!(info.last_error.is_some());
    }

    #[tokio::test]
    async fn get_all_services_includes_failed_registrations() {
        let registry = new_registry();
        let _ = registry.register_service(config("svc"), Arc::new(FailingAdapter), None).await;
        assert_eq!(registry.get_all_services().len(), 1);
    }

    #[tokio::test]
    async fn successful_registration_clears_error() {
        let registry = new_registry();
        let (id, tools) = registry
            .register_service(config("svc"), Arc::new(OkAdapter), None)
            .await
            .unwrap();
        assert_eq!(tools, vec!["tool_a".to_string()]);
        let info = registry.get_service_info(&id).unwrap();
        assert!(info.last_error.is_none());
    }

    #[tokio::test]
    async fn deregister_removes_entry() {
        let registry = new_registry();
        let (id, _) = registry
            .register_service(config("svc"), Arc::new(OkAdapter), None)
            .await
            .unwrap();
        registry.deregister_service(&id).await.unwrap();
        assert!(registry.get_service_info(&id).is_none());
    }

    #[tokio::test]
    async fn reload_with_new_name_clears_previous_generation() {
        let registry = new_registry();
        let (old_id, _) = registry
            .register_service(config("A"), Arc::new(OkAdapter), None)
            .await
            .unwrap();
        let (new_id, tools) = registry
            .register_service(config("B"), Arc::new(OkAdapter), Some(&old_id))
            .await
            .unwrap();
        assert_ne!(old_id, new_id);
        assert_eq!(tools, vec!["tool_a".to_string()]);
        assert!(registry.get_service_info(&old_id).is_none());
        assert!(registry.get_service_info(&new_id).is_some());
    }

    #[tokio::test]
    async fn health_check_loop_records_and_clears_failures() {
        struct FlakyAdapter {
            healthy: AtomicBool,
            calls: AtomicU32,
        }
        #[async_trait]
        impl UpstreamAdapter for FlakyAdapter {
            async fn register(
                &self,
                _config: &ServiceConfig,
                _tm: &dyn ToolManager,
                _rm: &dyn ResourceManager,
                _pm: &dyn PromptManager,
                _is_reload: bool,
            ) -> Result<Vec<String>> {
                Ok(vec![])
            }
            async fn shutdown(&self) -> Result<()> {
                Ok(())
            }
            async fn check_health(&self) -> Result<()> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if self.healthy.load(Ordering::SeqCst) {
                    Ok(())
                } else {
                    Err(Error::HealthCheckFailed)
                }
            }
        }

        let registry = Arc::new(new_registry());
        let adapter = Arc::new(FlakyAdapter {
            healthy: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        });
        let (id, _) = registry
            .register_service(config("svc"), Arc::clone(&adapter) as Arc<dyn UpstreamAdapter>, None)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        registry.start_health_checks(Duration::from_millis(10), cancel.clone());

        tokio::time::sleep(Duration::from_millis(35)).await;
        assert!(registry.get_service_info(&id).unwrap().last_error.is_some());

        adapter.healthy.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(35)).await;
        assert!(registry.get_service_info(&id).unwrap().last_error.is_none());

        cancel.cancel();
    }
}
