//! Prompt templates rendered into a single user message.

use super::completion::{Argument, CompletionTable};
use super::BoxedFuture;
use crate::types::{
    Content, ErrorData, GetPromptResult, PromptArgumentInfo, PromptInfo, PromptMessage, Role,
};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type LoadFn = dyn Fn(HashMap<String, String>) -> BoxedFuture<anyhow::Result<String>> + Send + Sync;

#[derive(Clone)]
pub struct Prompt {
    name: String,
    description: Option<String>,
    arguments: Vec<Argument>,
    completions: CompletionTable,
    load: Arc<LoadFn>,
}

impl Prompt {
    pub fn new<F, Fut>(name: impl Into<String>, load: F) -> Self
    where
        F: Fn(HashMap<String, String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            arguments: Vec::new(),
            completions: CompletionTable::default(),
            load: Arc::new(move |args| Box::pin(load(args))),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn argument(mut self, argument: Argument) -> Self {
        self.arguments.push(argument);
        self.completions = CompletionTable::resolve(&self.arguments);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn completions(&self) -> &CompletionTable {
        &self.completions
    }

    pub(crate) fn info(&self) -> PromptInfo {
        PromptInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            arguments: self
                .arguments
                .iter()
                .map(|arg| PromptArgumentInfo {
                    name: arg.name.clone(),
                    description: arg.description.clone(),
                    required: arg.required.then_some(true),
                })
                .collect(),
        }
    }

    pub(crate) async fn get(
        &self,
        arguments: HashMap<String, String>,
    ) -> Result<GetPromptResult, ErrorData> {
        if let Some(missing) = self
            .arguments
            .iter()
            .find(|arg| arg.required && !arguments.contains_key(&arg.name))
        {
            return Err(ErrorData::invalid_request(format!(
                "Missing required argument: {}",
                missing.name
            )));
        }

        let text = (self.load)(arguments)
            .await
            .map_err(|e| ErrorData::internal_error(format!("Error loading prompt: {}", e)))?;

        Ok(GetPromptResult {
            description: self.description.clone(),
            messages: vec![PromptMessage {
                role: Role::User,
                content: Content::Text { text },
            }],
        })
    }
}

impl fmt::Debug for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prompt")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("arguments", &self.arguments)
            .finish()
    }
}
