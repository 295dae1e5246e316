//! The server side of the protocol: registration, per-connection sessions and transports.
//!
//! A [`Server`] collects tools, resources and prompts, then hands each connection its own
//! [`Session`] holding a snapshot of that registry.

mod capabilities;
pub mod completion;
mod context;
mod prompt;
mod resource;
#[allow(clippy::module_inception)]
mod server;
mod session;
pub(crate) mod sse;
mod tool;
pub mod uri_template;

pub use completion::{fuzzy_complete, Argument, Completer};
pub use context::{Context, Logger};
pub use prompt::Prompt;
pub use resource::{Resource, ResourceOutput, ResourceTemplate};
pub use server::Server;
pub use session::{Session, SessionState};
pub use sse::AuthRequest;
pub use tool::{Tool, ToolOutput, ToolParameters};
pub use uri_template::UriTemplate;

use crate::types::{
    CompleteParams, CompleteResult, CompletionReference, ErrorData, GetPromptParams,
    GetPromptResult, ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult,
    ListToolsResult, ReadResourceResult,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

pub(crate) type BoxedFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Everything a server exposes. Sessions get a cheap clone at creation time, so later
/// registrations are not seen by sessions that already exist.
pub(crate) struct Registry<A> {
    pub(crate) tools: Vec<Arc<Tool<A>>>,
    pub(crate) resources: Vec<Arc<Resource>>,
    pub(crate) templates: Vec<Arc<ResourceTemplate>>,
    pub(crate) prompts: Vec<Arc<Prompt>>,
}

impl<A> Default for Registry<A> {
    fn default() -> Self {
        Self {
            tools: Vec::new(),
            resources: Vec::new(),
            templates: Vec::new(),
            prompts: Vec::new(),
        }
    }
}

impl<A> Clone for Registry<A> {
    fn clone(&self) -> Self {
        Self {
            tools: self.tools.clone(),
            resources: self.resources.clone(),
            templates: self.templates.clone(),
            prompts: self.prompts.clone(),
        }
    }
}

impl<A: Send + Sync + 'static> Registry<A> {
    pub(crate) fn find_tool(&self, name: &str) -> Option<&Arc<Tool<A>>> {
        self.tools.iter().find(|tool| tool.name() == name)
    }

    pub(crate) fn list_tools(&self) -> ListToolsResult {
        ListToolsResult {
            tools: self.tools.iter().map(|tool| tool.info()).collect(),
        }
    }
}

impl<A> Registry<A> {
    pub(crate) fn list_resources(&self) -> ListResourcesResult {
        ListResourcesResult {
            resources: self.resources.iter().map(|r| r.info()).collect(),
        }
    }

    pub(crate) fn list_resource_templates(&self) -> ListResourceTemplatesResult {
        ListResourceTemplatesResult {
            resource_templates: self.templates.iter().map(|t| t.info()).collect(),
        }
    }

    pub(crate) fn list_prompts(&self) -> ListPromptsResult {
        ListPromptsResult {
            prompts: self.prompts.iter().map(|p| p.info()).collect(),
        }
    }

    /// Exact URIs win over templates; templates are tried in registration order.
    pub(crate) async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, ErrorData> {
        if let Some(resource) = self.resources.iter().find(|r| r.uri() == uri) {
            return Ok(ReadResourceResult {
                contents: resource.read().await?,
            });
        }
        for template in &self.templates {
            if let Some(result) = template.read(uri).await {
                return Ok(ReadResourceResult {
                    contents: vec![result?],
                });
            }
        }
        Err(ErrorData::method_not_found(format!("Unknown resource: {}", uri)))
    }

    pub(crate) async fn get_prompt(
        &self,
        params: GetPromptParams,
    ) -> Result<GetPromptResult, ErrorData> {
        let prompt = self
            .prompts
            .iter()
            .find(|p| p.name() == params.name)
            .ok_or_else(|| ErrorData::method_not_found(format!("Unknown prompt: {}", params.name)))?;
        prompt.get(params.arguments.unwrap_or_default()).await
    }

    pub(crate) async fn complete(&self, params: CompleteParams) -> Result<CompleteResult, ErrorData> {
        let argument = &params.argument;
        let completion = match &params.reference {
            CompletionReference::Prompt { name } => {
                let prompt = self
                    .prompts
                    .iter()
                    .find(|p| p.name() == name)
                    .ok_or_else(|| ErrorData::internal_error(format!("Unknown prompt: {}", name)))?;
                let table = prompt.completions();
                if !table.supports_completion() {
                    return Err(ErrorData::internal_error("Prompt does not support completion"));
                }
                table.complete(&argument.name, &argument.value).await
            }
            CompletionReference::Resource { uri } => {
                if let Some(template) = self
                    .templates
                    .iter()
                    .find(|t| t.uri_template().as_str() == uri)
                {
                    let table = template.completions();
                    if !table.supports_completion() {
                        return Err(ErrorData::internal_error(
                            "Resource does not support completion",
                        ));
                    }
                    table.complete(&argument.name, &argument.value).await
                } else if let Some(resource) = self.resources.iter().find(|r| r.uri() == uri) {
                    let completer = resource.completion().ok_or_else(|| {
                        ErrorData::internal_error("Resource does not support completion")
                    })?;
                    completer.complete(&argument.value).await
                } else {
                    return Err(ErrorData::internal_error(format!("Unknown resource: {}", uri)));
                }
            }
        };
        let completion = completion.map_err(|e| ErrorData::internal_error(e.to_string()))?;
        if completion.values.len() > crate::types::MAX_COMPLETION_VALUES {
            return Err(ErrorData::internal_error(format!(
                "Completion returned {} values, more than the allowed {}",
                completion.values.len(),
                crate::types::MAX_COMPLETION_VALUES
            )));
        }
        Ok(CompleteResult { completion })
    }
}
