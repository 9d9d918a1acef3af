//! Agent profile: the active configuration a run executes under.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Tool enablement entry. Configuration stores either a bare flag or
/// an object with an `enabled` field; both deserialize here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ToolEnablement {
    Flag(bool),
    Detailed { enabled: bool },
}

impl ToolEnablement {
    pub fn enabled(&self) -> bool {
        match self {
            Self::Flag(flag) => *flag,
            Self::Detailed { enabled } => *enabled,
        }
    }
}

/// Raw configuration for one externally sourced tool endpoint, as it
/// arrives from stored configuration. Normalized into
/// [`ExternalToolSource`](crate::catalog::ExternalToolSource) once
/// during setup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExternalToolConfig {
    pub name: String,
    /// Transport or vendor kind (`"sse"`, `"http"`, a credentialed
    /// vendor slug). Absent for pre-configured endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Fully qualified name for pre-configured endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualified_name: Option<String>,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub enabled_tools: Vec<String>,
    /// Marks endpoints that authenticate through a stored credential
    /// profile rather than inline configuration.
    #[serde(default)]
    pub credentialed: bool,
    /// Credential profile reference, for credentialed endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
}

/// The active configuration for a run. Immutable for the run's
/// lifetime; resolved once during setup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Replaces the default system prompt when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Builder mode adds builder instructions as an ephemeral,
    /// per-turn addendum instead of rewriting the system prompt.
    #[serde(default)]
    pub builder_mode: bool,
    /// Per-tool enablement. Tools absent from the map default to
    /// enabled.
    #[serde(default)]
    pub tools: HashMap<String, ToolEnablement>,
    /// Externally sourced tool endpoints.
    #[serde(default)]
    pub external_tools: Vec<ExternalToolConfig>,
    /// Model override for this profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl AgentProfile {
    /// Whether a tool is enabled under this profile.
    pub fn tool_enabled(&self, name: &str) -> bool {
        self.tools.get(name).map_or(true, ToolEnablement::enabled)
    }
}
