//! Derives the capabilities advertised during `initialize` from what is registered.

use super::Registry;
use crate::types::{ListChangedCapability, LoggingCapability, ServerCapabilities};

pub(crate) fn server_capabilities<A>(registry: &Registry<A>) -> ServerCapabilities {
    let advertise = |present: bool| present.then(ListChangedCapability::default);
    ServerCapabilities {
        tools: advertise(!registry.tools.is_empty()),
        resources: advertise(!registry.resources.is_empty() || !registry.templates.is_empty()),
        prompts: advertise(!registry.prompts.is_empty()),
        logging: Some(LoggingCapability {}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{ResourceTemplate, Tool};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_empty_registry_only_offers_logging() {
        let caps = server_capabilities(&Registry::<()>::default());
        assert_eq!(serde_json::to_value(caps).unwrap(), json!({ "logging": {} }));
    }

    #[test]
    fn test_templates_alone_advertise_resources() {
        let mut registry = Registry::<()>::default();
        registry.tools.push(Arc::new(Tool::new("t", |_| async { Ok("") })));
        registry.templates.push(Arc::new(
            ResourceTemplate::new("db://{table}", "tables", |_| async { Ok("") }).unwrap(),
        ));
        let caps = server_capabilities(&registry);
        assert!(caps.tools.is_some());
        assert!(caps.resources.is_some());
        assert!(caps.prompts.is_none());
    }
}
