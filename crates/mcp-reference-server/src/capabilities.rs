//! Capability Manager
//!
//! Holds the capability map the server declares in the initialize handshake
//! and, after the handshake, the client's negotiated map. Dispatch of
//! capability-gated methods and emission of capability-gated notifications
//! both consult this module. Checks are pure map walks with no I/O.

// Layer 1: Standard library imports
use std::sync::RwLock;

// Layer 2: Third-party crate imports
use serde_json::{json, Value};

// Layer 3: Internal module imports
use crate::protocol::{methods, notifications, JsonRpcError};

/// Method name → capability path required on the server side.
const METHOD_CAPABILITIES: &[(&str, &str)] = &[
    (methods::TOOLS_LIST, "tools"),
    (methods::TOOLS_CALL, "tools"),
    (methods::RESOURCES_LIST, "resources"),
    (methods::RESOURCES_READ, "resources"),
    (methods::RESOURCES_SUBSCRIBE, "resources.subscribe"),
    (methods::RESOURCES_UNSUBSCRIBE, "resources.subscribe"),
    (methods::PROMPTS_LIST, "prompts"),
    (methods::PROMPTS_GET, "prompts"),
    (methods::COMPLETION_COMPLETE, "completions"),
    (methods::LOGGING_SET_LEVEL, "logging"),
];

/// Notification name → capability path required on the client side.
const NOTIFICATION_CAPABILITIES: &[(&str, &str)] =
    &[(notifications::ROOTS_LIST_CHANGED, "roots.listChanged")];

/// Declared server capabilities plus the negotiated client map.
#[derive(Debug)]
pub struct CapabilityManager {
    server_capabilities: Value,
    client_capabilities: RwLock<Value>,
}

impl CapabilityManager {
    /// Create a manager from the declared server capability map.
    pub fn new(server_capabilities: Value) -> Self {
        Self {
            server_capabilities,
            client_capabilities: RwLock::new(json!({})),
        }
    }

    /// Default capability map for this server: tools with list-change
    /// notifications, logging and completions.
    pub fn default_server_capabilities() -> Value {
        json!({
            "tools": { "listChanged": true },
            "logging": {},
            "completions": {}
        })
    }

    /// The declared server capability map.
    pub fn server_capabilities(&self) -> &Value {
        &self.server_capabilities
    }

    /// Record the client capability map negotiated in the handshake.
    pub fn set_client_capabilities(&self, capabilities: Value) {
        let mut guard = match self.client_capabilities.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = capabilities;
    }

    /// Walk a dot-separated path through a capability map.
    ///
    /// Any present value other than `false` counts as present; an empty
    /// object declares the capability.
    pub fn has_capability(map: &Value, path: &str) -> bool {
        let mut current = map;
        for segment in path.split('.') {
            match current.get(segment) {
                Some(next) => current = next,
                None => return false,
            }
        }
        !matches!(current, Value::Bool(false))
    }

    /// Check that the server declares the capability the method requires.
    ///
    /// Methods without a table entry are not capability-gated.
    pub fn validate_method_capability(&self, method: &str) -> Result<(), JsonRpcError> {
        let Some((_, path)) = METHOD_CAPABILITIES.iter().find(|(m, _)| *m == method) else {
            return Ok(());
        };
        if Self::has_capability(&self.server_capabilities, path) {
            Ok(())
        } else {
            Err(JsonRpcError::invalid_request(format!(
                "method {method} requires server capability {path}"
            )))
        }
    }

    /// Check that the client declared the capability an outgoing
    /// notification requires.
    pub fn validate_notification_capability(&self, notification: &str) -> Result<(), JsonRpcError> {
        let Some((_, path)) = NOTIFICATION_CAPABILITIES
            .iter()
            .find(|(n, _)| *n == notification)
        else {
            return Ok(());
        };
        let guard = match self.client_capabilities.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if Self::has_capability(&guard, path) {
            Ok(())
        } else {
            Err(JsonRpcError::invalid_request(format!(
                "notification {notification} requires client capability {path}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_path_walk() {
        let map = json!({ "tools": { "listChanged": true }, "logging": {} });
        assert!(CapabilityManager::has_capability(&map, "tools"));
        assert!(CapabilityManager::has_capability(&map, "tools.listChanged"));
        assert!(CapabilityManager::has_capability(&map, "logging"));
        assert!(!CapabilityManager::has_capability(&map, "resources"));
        assert!(!CapabilityManager::has_capability(&map, "tools.missing"));
    }

    #[test]
    fn empty_object_counts_as_present() {
        let map = json!({ "completions": {} });
        assert!(CapabilityManager::has_capability(&map, "completions"));
    }

    #[test]
    fn explicit_false_counts_as_absent() {
        let map = json!({ "tools": { "listChanged": false } });
        assert!(!CapabilityManager::has_capability(&map, "tools.listChanged"));
        assert!(CapabilityManager::has_capability(&map, "tools"));
    }

    #[test]
    fn gated_method_requires_declared_capability() {
        let manager = CapabilityManager::new(json!({ "logging": {} }));
        assert!(manager.validate_method_capability("logging/setLevel").is_ok());

        let error = manager.validate_method_capability("tools/call").unwrap_err();
        assert_eq!(error.code, -32600);
        assert!(error.message.contains("tools"));
    }

    #[test]
    fn nested_capability_gate() {
        let manager = CapabilityManager::new(json!({ "resources": {} }));
        assert!(manager.validate_method_capability("resources/list").is_ok());
        assert!(manager
            .validate_method_capability("resources/subscribe")
            .is_err());
    }

    #[test]
    fn ungated_method_passes() {
        let manager = CapabilityManager::new(json!({}));
        assert!(manager.validate_method_capability("ping").is_ok());
    }

    #[test]
    fn notification_gate_consults_client_map() {
        let manager = CapabilityManager::new(json!({}));
        assert!(manager
            .validate_notification_capability("notifications/roots/listChanged")
            .is_err());

        manager.set_client_capabilities(json!({ "roots": { "listChanged": true } }));
        assert!(manager
            .validate_notification_capability("notifications/roots/listChanged")
            .is_ok());
    }
}
