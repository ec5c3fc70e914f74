//! Scope Manager
//!
//! Scope parsing, the inheritance hierarchy, the per-method scope policy and
//! RFC 6750 `WWW-Authenticate` composition for insufficient-scope failures.
//!
//! Inheritance applies to the final colon-separated segment with the prefix
//! preserved (`mcp:admin` implies `mcp:write` and `mcp:read`, bare `admin`
//! implies `write` and `read`). Tool scopes (`tool:<name>`) never inherit.

// Layer 1: Standard library imports
use std::collections::HashMap;

// Layer 2: Third-party crate imports
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

// Layer 3: Internal module imports
use crate::protocol::methods;

/// Prefix marking tool-specific scopes, excluded from inheritance.
const TOOL_SCOPE_PREFIX: &str = "tool:";

/// Default method → required-scope policy.
const DEFAULT_METHOD_SCOPES: &[(&str, &str)] = &[
    (methods::TOOLS_LIST, "mcp:read"),
    (methods::TOOLS_CALL, "mcp:write"),
    (methods::RESOURCES_LIST, "mcp:read"),
    (methods::RESOURCES_READ, "mcp:read"),
    (methods::RESOURCES_SUBSCRIBE, "mcp:write"),
    (methods::RESOURCES_UNSUBSCRIBE, "mcp:write"),
    (methods::PROMPTS_LIST, "mcp:read"),
    (methods::PROMPTS_GET, "mcp:read"),
    (methods::COMPLETION_COMPLETE, "mcp:read"),
    (methods::LOGGING_SET_LEVEL, "mcp:write"),
    (methods::SERVER_SHUTDOWN, "mcp:admin"),
];

/// Raised when a token's scopes do not satisfy a method's requirements.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct InsufficientScopeError {
    /// Scopes the method requires
    pub required: Vec<String>,
    /// Scopes the token carried
    pub actual: Vec<String>,
    /// Human-readable description (never contains token material)
    pub message: String,
}

/// Scope manager configuration errors.
#[derive(Debug, Error, PartialEq)]
pub enum ScopeConfigError {
    /// 403 responses need a resource metadata URL for `WWW-Authenticate`
    #[error("resource_metadata_url is not configured")]
    MissingResourceMetadataUrl,
}

/// Outcome of a scope check.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeCheck {
    /// Whether every required scope is satisfied under inheritance
    pub allowed: bool,
    /// Required scopes left unsatisfied
    pub missing: Vec<String>,
    /// Human-readable summary
    pub message: String,
}

/// Configuration for the scope manager.
#[derive(Debug, Clone)]
pub struct ScopeManagerConfig {
    /// Per-method overrides; entries replace the default for that method
    /// while the rest of the defaults stay in force.
    pub method_scopes: HashMap<String, Vec<String>>,
    /// Whether `tools/call` additionally requires `tool:<name>`.
    pub require_tool_scope: bool,
    /// RFC 9728 metadata URL advertised in `WWW-Authenticate`.
    pub resource_metadata_url: Option<String>,
}

impl Default for ScopeManagerConfig {
    fn default() -> Self {
        Self {
            method_scopes: HashMap::new(),
            require_tool_scope: true,
            resource_metadata_url: None,
        }
    }
}

/// Scope parsing, inheritance and per-method policy enforcement.
#[derive(Debug, Clone)]
pub struct ScopeManager {
    config: ScopeManagerConfig,
}

impl ScopeManager {
    /// Create a manager with the given configuration.
    pub fn new(config: ScopeManagerConfig) -> Self {
        Self { config }
    }

    /// Create a manager with the default policy.
    pub fn with_defaults() -> Self {
        Self::new(ScopeManagerConfig::default())
    }

    /// Split a space-delimited scope string, dropping empty tokens.
    pub fn parse_scopes(raw: &str) -> Vec<String> {
        raw.split_whitespace().map(str::to_string).collect()
    }

    /// Join scopes back into the space-delimited wire form.
    pub fn scopes_to_string(scopes: &[String]) -> String {
        scopes.join(" ")
    }

    /// Whether the token scopes satisfy `required`, directly or through
    /// inheritance.
    pub fn has_scope_with_inheritance(token_scopes: &[String], required: &str) -> bool {
        if token_scopes.iter().any(|s| s == required) {
            return true;
        }
        token_scopes
            .iter()
            .any(|scope| implied_scopes(scope).iter().any(|i| i == required))
    }

    /// Check every required scope under inheritance.
    pub fn check_scopes(token_scopes: &[String], required: &[String]) -> ScopeCheck {
        let missing: Vec<String> = required
            .iter()
            .filter(|r| !Self::has_scope_with_inheritance(token_scopes, r))
            .cloned()
            .collect();

        if missing.is_empty() {
            ScopeCheck {
                allowed: true,
                missing,
                message: "access granted".to_string(),
            }
        } else {
            let message = format!("missing required scope(s): {}", missing.join(" "));
            ScopeCheck {
                allowed: false,
                missing,
                message,
            }
        }
    }

    /// Required scopes for a method. `tools/call` additionally requires the
    /// tool-specific scope when a tool name is supplied and the toggle is
    /// on. Methods without a policy entry are unrestricted.
    pub fn required_scopes(&self, method: &str, tool_name: Option<&str>) -> Vec<String> {
        let mut required: Vec<String> = match self.config.method_scopes.get(method) {
            Some(scopes) => scopes.clone(),
            None => DEFAULT_METHOD_SCOPES
                .iter()
                .filter(|(m, _)| *m == method)
                .map(|(_, s)| s.to_string())
                .collect(),
        };

        if method == methods::TOOLS_CALL && self.config.require_tool_scope {
            if let Some(name) = tool_name {
                required.push(format!("{TOOL_SCOPE_PREFIX}{name}"));
            }
        }

        required
    }

    /// Enforce the method policy for the given token scopes.
    pub fn validate_method_access(
        &self,
        token_scopes: &[String],
        method: &str,
        tool_name: Option<&str>,
    ) -> Result<(), InsufficientScopeError> {
        let required = self.required_scopes(method, tool_name);
        if required.is_empty() {
            return Ok(());
        }

        let check = Self::check_scopes(token_scopes, &required);
        if check.allowed {
            Ok(())
        } else {
            debug!(method, missing = ?check.missing, "insufficient scope");
            Err(InsufficientScopeError {
                required,
                actual: token_scopes.to_vec(),
                message: check.message,
            })
        }
    }

    /// RFC 6750 `WWW-Authenticate` challenge for an insufficient-scope
    /// failure.
    pub fn www_authenticate(&self, error: &InsufficientScopeError) -> Option<String> {
        let metadata_url = self.config.resource_metadata_url.as_ref()?;
        Some(format!(
            r#"Bearer resource_metadata="{metadata_url}", error="insufficient_scope", error_description="{}", scope="{}""#,
            error.message,
            error.required.join(" ")
        ))
    }

    /// Full 403 response for an insufficient-scope failure. Requires a
    /// configured resource metadata URL.
    pub fn build_403_response(
        &self,
        error: &InsufficientScopeError,
    ) -> Result<Response, ScopeConfigError> {
        let challenge = self
            .www_authenticate(error)
            .ok_or(ScopeConfigError::MissingResourceMetadataUrl)?;

        let body = json!({
            "error": "insufficient_scope",
            "error_description": error.message,
            "required_scope": error.required.join(" "),
        });

        let mut response = (StatusCode::FORBIDDEN, Json(body)).into_response();
        if let Ok(value) = HeaderValue::from_str(&challenge) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, value);
        }
        Ok(response)
    }
}

/// Scopes implied by a held scope through inheritance. Tool scopes imply
/// nothing.
fn implied_scopes(scope: &str) -> Vec<String> {
    if scope.starts_with(TOOL_SCOPE_PREFIX) {
        return Vec::new();
    }

    let (prefix, name) = match scope.rsplit_once(':') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, scope),
    };

    let implied: &[&str] = match name {
        "admin" => &["write", "read"],
        "write" => &["read"],
        _ => &[],
    };

    implied
        .iter()
        .map(|name| match prefix {
            Some(prefix) => format!("{prefix}:{name}"),
            None => (*name).to_string(),
        })
        .collect()
}
