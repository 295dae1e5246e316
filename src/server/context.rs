//! The execution context handed to every tool body.

use super::session::ConnectionHandle;
use crate::error::Result;
use crate::types::{LoggingLevel, LoggingMessageParams, ProgressParams, ProgressToken};
use serde_json::{Map, Value};
use tracing::warn;

/// Per-call access to the session: its auth identity, progress reporting and client logs.
pub struct Context<A> {
    auth: Option<A>,
    progress_token: Option<ProgressToken>,
    handle: ConnectionHandle,
    log: Logger,
}

impl<A> Context<A> {
    pub(crate) fn new(
        auth: Option<A>,
        progress_token: Option<ProgressToken>,
        handle: ConnectionHandle,
    ) -> Self {
        Self {
            auth,
            progress_token,
            log: Logger {
                handle: handle.clone(),
            },
            handle,
        }
    }

    /// The identity produced by the server's authentication hook, if any.
    pub fn auth(&self) -> Option<&A> {
        self.auth.as_ref()
    }

    pub fn progress_token(&self) -> Option<&ProgressToken> {
        self.progress_token.as_ref()
    }

    /// Sends a `notifications/progress` tagged with this call's progress token.
    ///
    /// The notification is sent even when the client supplied no token; it is then
    /// ignorable on the client side.
    pub fn report_progress(&self, progress: f64, total: Option<f64>) -> Result<()> {
        self.handle.send_notification(
            "notifications/progress",
            ProgressParams {
                progress_token: self.progress_token.clone(),
                progress,
                total,
            },
        )
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }
}

/// Emits `notifications/message` log lines to the client, independent of the call result.
#[derive(Clone)]
pub struct Logger {
    handle: ConnectionHandle,
}

impl Logger {
    pub fn debug(&self, message: impl Into<String>) {
        self.log(LoggingLevel::Debug, message, None);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LoggingLevel::Info, message, None);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LoggingLevel::Warning, message, None);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LoggingLevel::Error, message, None);
    }

    /// Sends one log line with optional structured context. Delivery failures are traced,
    /// never returned.
    pub fn log(&self, level: LoggingLevel, message: impl Into<String>, context: Option<Value>) {
        let mut data = Map::new();
        data.insert("message".to_string(), Value::String(message.into()));
        if let Some(context) = context {
            data.insert("context".to_string(), context);
        }
        let params = LoggingMessageParams {
            level,
            logger: None,
            data: Value::Object(data),
        };
        if let Err(e) = self.handle.send_notification("notifications/message", params) {
            warn!(error = %e, "[Session] Dropped client log notification");
        }
    }
}
