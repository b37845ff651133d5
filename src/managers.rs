//! Default in-memory tool/resource/prompt managers (§6 "what adapters consume").
//!
//! Shape mirrors [`crate::provider::ProviderRegistry`]: a thin `DashMap` wrapper with a
//! narrow, trait-bounded API, used here as the sink upstream adapters register their
//! generated capabilities into.

use std::sync::Arc;

use dashmap::DashMap;

use crate::protocol::types::{Prompt, Resource, Tool};
use crate::Result;

/// One runtime tool: its advertised MCP shape plus the service that owns it.
#[derive(Clone)]
pub struct RegisteredTool {
    /// MCP tool shape advertised to clients.
    pub tool: Tool,
    /// Owning service id, used for `ClearToolsForService` and `ToolCount`.
    pub service_id: String,
    /// The invocable behind this tool, erased to a trait object so the manager does not
    /// need to know about HTTP/GraphQL/bundle specifics.
    pub invoker: Arc<dyn ToolInvoker>,
}

/// What a tool actually does when called, independent of how it was registered.
#[async_trait::async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Execute the tool with the given arguments.
    ///
    /// # Errors
    ///
    /// Returns whatever error the underlying adapter produced (network, policy, etc).
    async fn invoke(&self, arguments: serde_json::Value) -> Result<serde_json::Value>;
}

/// Registers and looks up runtime tools, as consumed by the HTTP/GraphQL upstream
/// adapters during `Register` (§6).
pub trait ToolManager: Send + Sync {
    /// Add a tool. Names are not deduplicated here; callers are responsible for only
    /// calling this once per tool id.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool cannot be registered (the default implementation
    /// never fails).
    fn add_tool(&self, id: String, tool: RegisteredTool) -> Result<()>;
    /// Look up a tool by id.
    fn get_tool(&self, id: &str) -> Option<RegisteredTool>;
    /// All registered tools.
    fn list_tools(&self) -> Vec<RegisteredTool>;
    /// Remove every tool owned by `service_id`.
    fn clear_tools_for_service(&self, service_id: &str);
}

/// Registers resources, as consumed by the HTTP/GraphQL upstream adapters.
pub trait ResourceManager: Send + Sync {
    /// Add a resource.
    fn add_resource(&self, id: String, service_id: String, resource: Resource);
    /// All registered resources.
    fn list_resources(&self) -> Vec<Resource>;
    /// Remove every resource owned by `service_id`.
    fn clear_resources_for_service(&self, service_id: &str);
}

/// Registers prompts, as consumed by the HTTP/GraphQL upstream adapters.
pub trait PromptManager: Send + Sync {
    /// Add a prompt.
    fn add_prompt(&self, id: String, service_id: String, prompt: Prompt);
    /// All registered prompts.
    fn list_prompts(&self) -> Vec<Prompt>;
    /// Remove every prompt owned by `service_id`.
    fn clear_prompts_for_service(&self, service_id: &str);
}

/// `DashMap`-backed default [`ToolManager`].
#[derive(Default)]
pub struct InMemoryToolManager {
    tools: DashMap<String, RegisteredTool>,
}

impl InMemoryToolManager {
    /// Construct an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ToolManager for InMemoryToolManager {
    fn add_tool(&self, id: String, tool: RegisteredTool) -> Result<()> {
        self.tools.insert(id, tool);
        Ok(())
    }

    fn get_tool(&self, id: &str) -> Option<RegisteredTool> {
        self.tools.get(id).map(|e| e.value().clone())
    }

    fn list_tools(&self) -> Vec<RegisteredTool> {
        self.tools.iter().map(|e| e.value().clone()).collect()
    }

    fn clear_tools_for_service(&self, service_id: &str) {
        self.tools.retain(|_, t| t.service_id != service_id);
    }
}

struct OwnedResource {
    service_id: String,
    resource: Resource,
}

/// `DashMap`-backed default [`ResourceManager`].
#[derive(Default)]
pub struct InMemoryResourceManager {
    resources: DashMap<String, OwnedResource>,
}

impl InMemoryResourceManager {
    /// Construct an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResourceManager for InMemoryResourceManager {
    fn add_resource(&self, id: String, service_id: String, resource: Resource) {
        self.resources.insert(id, OwnedResource { service_id, resource });
    }

    fn list_resources(&self) -> Vec<Resource> {
        self.resources.iter().map(|e| e.value().resource.clone()).collect()
    }

    fn clear_resources_for_service(&self, service_id: &str) {
        self.resources.retain(|_, r| r.service_id != service_id);
    }
}

struct OwnedPrompt {
    service_id: String,
    prompt: Prompt,
}

/// `DashMap`-backed default [`PromptManager`].
#[derive(Default)]
pub struct InMemoryPromptManager {
    prompts: DashMap<String, OwnedPrompt>,
}

impl InMemoryPromptManager {
    /// Construct an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PromptManager for InMemoryPromptManager {
    fn add_prompt(&self, id: String, service_id: String, prompt: Prompt) {
        self.prompts.insert(id, OwnedPrompt { service_id, prompt });
    }

    fn list_prompts(&self) -> Vec<Prompt> {
        self.prompts.iter().map(|e| e.value().prompt.clone()).collect()
    }

    fn clear_prompts_for_service(&self, service_id: &str) {
        self.prompts.retain(|_, p| p.service_id != service_id);
    }
}
