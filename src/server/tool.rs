//! Tool registration, invocation and result normalization.

use super::context::Context;
use super::BoxedFuture;
use crate::error::{Error, Result, UserError};
use crate::types::{CallToolResult, Content, ErrorData, ToolInfo};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Describes a parameter struct as a JSON Schema object.
///
/// Usually derived with `#[derive(ToolParameters)]` alongside `serde::Deserialize`.
pub trait ToolParameters {
    fn input_schema() -> Value;
}

/// Validates raw arguments and, on success, returns the pending tool body.
type InvokeFn<A> = dyn Fn(Value, Context<A>) -> std::result::Result<BoxedFuture<anyhow::Result<ToolOutput>>, String>
    + Send
    + Sync;

/// A named, optionally schema-validated callable exposed to clients.
pub struct Tool<A = ()> {
    name: String,
    description: Option<String>,
    input_schema: Option<Value>,
    invoke: Arc<InvokeFn<A>>,
}

impl<A: Send + Sync + 'static> Tool<A> {
    /// A tool without declared parameters. Any supplied arguments are ignored.
    pub fn new<F, Fut, O>(name: impl Into<String>, execute: F) -> Self
    where
        F: Fn(Context<A>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
        O: Into<ToolOutput>,
    {
        Self {
            name: name.into(),
            description: None,
            input_schema: None,
            invoke: Arc::new(move |_args, ctx| {
                let pending = execute(ctx);
                Ok(Box::pin(async move { pending.await.map(Into::into) }))
            }),
        }
    }

    /// A tool whose arguments deserialize into `P`. Arguments that do not deserialize
    /// are rejected before the body runs.
    pub fn with_parameters<P, F, Fut, O>(name: impl Into<String>, execute: F) -> Self
    where
        P: ToolParameters + DeserializeOwned + Send + 'static,
        F: Fn(P, Context<A>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
        O: Into<ToolOutput>,
    {
        Self {
            name: name.into(),
            description: None,
            input_schema: Some(P::input_schema()),
            invoke: Arc::new(move |args, ctx| {
                let params: P = serde_json::from_value(args).map_err(|e| e.to_string())?;
                let pending = execute(params, ctx);
                Ok(Box::pin(async move { pending.await.map(Into::into) }))
            }),
        }
    }

    /// A tool validated against a hand-written JSON Schema.
    pub fn with_schema<F, Fut, O>(name: impl Into<String>, schema: Value, execute: F) -> Result<Self>
    where
        F: Fn(Value, Context<A>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
        O: Into<ToolOutput>,
    {
        let validator =
            jsonschema::validator_for(&schema).map_err(|e| Error::InvalidSchema(e.to_string()))?;
        Ok(Self {
            name: name.into(),
            description: None,
            input_schema: Some(schema),
            invoke: Arc::new(move |args, ctx| {
                let problems: Vec<String> =
                    validator.iter_errors(&args).map(|e| e.to_string()).collect();
                if !problems.is_empty() {
                    return Err(problems.join("; "));
                }
                let pending = execute(args, ctx);
                Ok(Box::pin(async move { pending.await.map(Into::into) }))
            }),
        })
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn info(&self) -> ToolInfo {
        ToolInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }

    /// Runs the tool for one `tools/call`.
    ///
    /// Invalid arguments are a protocol error. Everything that goes wrong after
    /// validation, panics included, comes back as an error-flagged result.
    pub(crate) async fn call(
        &self,
        arguments: Option<Value>,
        ctx: Context<A>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        let arguments = match arguments {
            None | Some(Value::Null) => json!({}),
            Some(args) => args,
        };

        let pending = (self.invoke)(arguments, ctx).map_err(|details| {
            debug!(tool = %self.name, %details, "[Tool] Rejected arguments");
            ErrorData::invalid_params(format!("Invalid {} parameters", self.name))
                .with_data(json!({ "details": details }))
        })?;

        let outcome = match tokio::spawn(pending).await {
            Ok(result) => result.and_then(|output| output.normalize().map_err(anyhow::Error::msg)),
            Err(join_error) => Err(anyhow::anyhow!("tool panicked: {}", join_error)),
        };

        Ok(outcome.unwrap_or_else(|err| {
            warn!(tool = %self.name, error = %err, "[Tool] Execution failed");
            failure_result(&err)
        }))
    }
}

impl<A> fmt::Debug for Tool<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish()
    }
}

/// A user-facing error keeps its message verbatim; anything else is prefixed.
fn failure_result(err: &anyhow::Error) -> CallToolResult {
    match err.downcast_ref::<UserError>() {
        Some(user) => CallToolResult::error(user.message.clone()),
        None => CallToolResult::error(format!("Error: {}", err)),
    }
}

/// What a tool body may return.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// Becomes a single text item.
    Text(String),
    /// Becomes a one-item content list.
    Content(Content),
    /// Used as-is after validation.
    Result(CallToolResult),
}

impl ToolOutput {
    /// Classifies loosely shaped JSON returned by a tool.
    ///
    /// A string is text, an object carrying `type` is one content item, and anything
    /// else must be a complete result.
    pub fn detect(value: Value) -> serde_json::Result<Self> {
        match value {
            Value::String(text) => Ok(ToolOutput::Text(text)),
            Value::Object(ref map) if map.contains_key("type") => {
                serde_json::from_value(value).map(ToolOutput::Content)
            }
            other => serde_json::from_value(other).map(ToolOutput::Result),
        }
    }

    pub fn normalize(self) -> std::result::Result<CallToolResult, String> {
        let result = match self {
            ToolOutput::Text(text) => CallToolResult {
                content: vec![Content::Text { text }],
                is_error: None,
            },
            ToolOutput::Content(item) => CallToolResult {
                content: vec![item],
                is_error: None,
            },
            ToolOutput::Result(result) => result,
        };
        for item in &result.content {
            if let Content::Image { data, mime_type } = item {
                if mime_type.is_empty() {
                    return Err("image content is missing its mimeType".to_string());
                }
                BASE64
                    .decode(data)
                    .map_err(|e| format!("image content is not valid base64: {}", e))?;
            }
        }
        Ok(result)
    }
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        ToolOutput::Text(text)
    }
}

impl From<&str> for ToolOutput {
    fn from(text: &str) -> Self {
        ToolOutput::Text(text.to_string())
    }
}

impl From<Content> for ToolOutput {
    fn from(item: Content) -> Self {
        ToolOutput::Content(item)
    }
}

impl From<Vec<Content>> for ToolOutput {
    fn from(content: Vec<Content>) -> Self {
        ToolOutput::Result(CallToolResult {
            content,
            is_error: None,
        })
    }
}

impl From<CallToolResult> for ToolOutput {
    fn from(result: CallToolResult) -> Self {
        ToolOutput::Result(result)
    }
}

impl Content {
    /// Encodes raw image bytes, detecting PNG, JPEG, GIF and WebP from their signatures.
    pub fn image_bytes(bytes: &[u8]) -> Result<Content> {
        let mime_type = sniff_image_type(bytes)
            .ok_or_else(|| Error::Other("unrecognized image format".to_string()))?;
        Ok(Content::image(BASE64.encode(bytes), mime_type))
    }

    pub async fn image_file(path: impl AsRef<Path>) -> Result<Content> {
        let bytes = tokio::fs::read(path).await?;
        Content::image_bytes(&bytes)
    }
}

fn sniff_image_type(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some("image/png"),
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some("image/gif"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("image/webp"),
        _ => None,
    }
}
