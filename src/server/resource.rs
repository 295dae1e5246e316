//! Concrete resources and URI-template resources.

use super::completion::{Argument, Completer, CompletionTable};
use super::uri_template::UriTemplate;
use super::BoxedFuture;
use crate::error::Result;
use crate::types::{ErrorData, ResourceBody, ResourceContents, ResourceInfo, ResourceTemplateInfo};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type LoadFn = dyn Fn() -> BoxedFuture<anyhow::Result<ResourceOutput>> + Send + Sync;
type TemplateLoadFn =
    dyn Fn(HashMap<String, String>) -> BoxedFuture<anyhow::Result<ResourceBody>> + Send + Sync;

impl ResourceBody {
    pub fn text(text: impl Into<String>) -> Self {
        ResourceBody::Text { text: text.into() }
    }

    /// Base64-encodes binary content.
    pub fn blob(bytes: impl AsRef<[u8]>) -> Self {
        ResourceBody::Blob {
            blob: BASE64.encode(bytes),
        }
    }
}

/// What a concrete resource loader returns.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceOutput {
    Single(ResourceBody),
    /// Each body becomes its own entry, all under the resource's URI.
    Many(Vec<ResourceBody>),
}

impl From<ResourceBody> for ResourceOutput {
    fn from(body: ResourceBody) -> Self {
        ResourceOutput::Single(body)
    }
}

impl From<Vec<ResourceBody>> for ResourceOutput {
    fn from(bodies: Vec<ResourceBody>) -> Self {
        ResourceOutput::Many(bodies)
    }
}

impl From<String> for ResourceOutput {
    fn from(text: String) -> Self {
        ResourceOutput::Single(ResourceBody::text(text))
    }
}

impl From<&str> for ResourceOutput {
    fn from(text: &str) -> Self {
        ResourceOutput::Single(ResourceBody::text(text))
    }
}

/// A resource readable at one fixed URI.
#[derive(Clone)]
pub struct Resource {
    uri: String,
    name: String,
    mime_type: Option<String>,
    load: Arc<LoadFn>,
    complete: Option<Completer>,
}

impl Resource {
    pub fn new<F, Fut, O>(uri: impl Into<String>, name: impl Into<String>, load: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
        O: Into<ResourceOutput>,
    {
        Self {
            uri: uri.into(),
            name: name.into(),
            mime_type: None,
            load: Arc::new(move || {
                let pending = load();
                Box::pin(async move { pending.await.map(Into::into) })
            }),
            complete: None,
        }
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Completes values for `ref/resource` requests naming this exact URI.
    pub fn completer(mut self, completer: Completer) -> Self {
        self.complete = Some(completer);
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub(crate) fn completion(&self) -> Option<&Completer> {
        self.complete.as_ref()
    }

    pub(crate) fn info(&self) -> ResourceInfo {
        ResourceInfo {
            uri: self.uri.clone(),
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
        }
    }

    pub(crate) async fn read(&self) -> std::result::Result<Vec<ResourceContents>, ErrorData> {
        let output = (self.load)()
            .await
            .map_err(|e| read_failure(&self.uri, &e))?;
        let bodies = match output {
            ResourceOutput::Single(body) => vec![body],
            ResourceOutput::Many(bodies) => bodies,
        };
        Ok(bodies
            .into_iter()
            .map(|body| ResourceContents {
                uri: self.uri.clone(),
                mime_type: self.mime_type.clone(),
                name: Some(self.name.clone()),
                body,
            })
            .collect())
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("uri", &self.uri)
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// A family of resources addressed by an RFC 6570 URI template.
#[derive(Clone)]
pub struct ResourceTemplate {
    uri_template: UriTemplate,
    name: String,
    mime_type: Option<String>,
    arguments: Vec<Argument>,
    completions: CompletionTable,
    load: Arc<TemplateLoadFn>,
}

impl ResourceTemplate {
    /// Fails when `uri_template` is not a valid template.
    pub fn new<F, Fut, O>(uri_template: &str, name: impl Into<String>, load: F) -> Result<Self>
    where
        F: Fn(HashMap<String, String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
        O: Into<ResourceBody>,
    {
        Ok(Self {
            uri_template: UriTemplate::parse(uri_template)?,
            name: name.into(),
            mime_type: None,
            arguments: Vec::new(),
            completions: CompletionTable::default(),
            load: Arc::new(move |vars| {
                let pending = load(vars);
                Box::pin(async move { pending.await.map(Into::into) })
            }),
        })
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Declares a template variable's completion behavior.
    pub fn argument(mut self, argument: Argument) -> Self {
        self.arguments.push(argument);
        self.completions = CompletionTable::resolve(&self.arguments);
        self
    }

    pub fn uri_template(&self) -> &UriTemplate {
        &self.uri_template
    }

    pub(crate) fn completions(&self) -> &CompletionTable {
        &self.completions
    }

    pub(crate) fn info(&self) -> ResourceTemplateInfo {
        ResourceTemplateInfo {
            name: self.name.clone(),
            uri_template: self.uri_template.as_str().to_string(),
        }
    }

    /// Reads `uri` if this template matches it. `None` means no match.
    pub(crate) async fn read(
        &self,
        uri: &str,
    ) -> Option<std::result::Result<ResourceContents, ErrorData>> {
        let vars = self.uri_template.match_uri(uri)?;
        let result = (self.load)(vars).await.map(|body| ResourceContents {
            uri: uri.to_string(),
            mime_type: self.mime_type.clone(),
            name: Some(self.name.clone()),
            body,
        });
        Some(result.map_err(|e| read_failure(uri, &e)))
    }
}

impl fmt::Debug for ResourceTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceTemplate")
            .field("uri_template", &self.uri_template.as_str())
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

impl From<String> for ResourceBody {
    fn from(text: String) -> Self {
        ResourceBody::text(text)
    }
}

impl From<&str> for ResourceBody {
    fn from(text: &str) -> Self {
        ResourceBody::text(text)
    }
}

fn read_failure(uri: &str, err: &anyhow::Error) -> ErrorData {
    ErrorData::internal_error(format!("Error reading resource: {}", err))
        .with_data(json!({ "uri": uri }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::INTERNAL_ERROR;

    #[tokio::test]
    async fn test_concrete_resource_maps_each_body() {
        let resource = Resource::new("file:///logs/app.log", "Application Logs", || async {
            Ok(vec![ResourceBody::text("line 1"), ResourceBody::blob(b"\x00\x01")])
        })
        .mime_type("text/plain");

        let contents = resource.read().await.unwrap();
        assert_eq!(contents.len(), 2);
        assert!(contents.iter().all(|c| c.uri == "file:///logs/app.log"));
        assert!(contents
            .iter()
            .all(|c| c.name.as_deref() == Some("Application Logs")));
        assert_eq!(contents[1].body, ResourceBody::Blob { blob: "AAE=".to_string() });
    }

    #[tokio::test]
    async fn test_load_failure_is_internal_error_with_uri() {
        let resource = Resource::new("file:///missing", "Missing", || async {
            Err::<String, _>(anyhow::anyhow!("disk gone"))
        });
        let err = resource.read().await.unwrap_err();
        assert_eq!(err.code, INTERNAL_ERROR);
        assert_eq!(err.message, "Error reading resource: disk gone");
        assert_eq!(err.data, Some(json!({ "uri": "file:///missing" })));
    }

    #[tokio::test]
    async fn test_template_binds_variables() {
        let template = ResourceTemplate::new(
            "file:///logs/{name}.log",
            "Logs",
            |vars: HashMap<String, String>| async move {
                Ok(format!("Example log content for {}", vars["name"]))
            },
        )
        .unwrap();

        let contents = template.read("file:///logs/app.log").await.unwrap().unwrap();
        assert_eq!(contents.name.as_deref(), Some("Logs"));
        assert_eq!(contents.body, ResourceBody::text("Example log content for app"));
        assert!(template.read("file:///other/app.log").await.is_none());
    }

    #[test]
    fn test_invalid_template_is_rejected() {
        let result = ResourceTemplate::new("file:///{unclosed", "Broken", |_| async {
            Ok::<_, anyhow::Error>("never")
        });
        assert!(result.is_err());
    }
}
