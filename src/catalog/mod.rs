//! Capability registry: the immutable tool catalog a run executes
//! with.
//!
//! Built exactly once during run setup from three inputs: the static
//! built-in set, conditional built-ins, and dynamically fetched
//! external tool descriptors. The resulting [`ToolCatalog`] is passed
//! by reference into the loop and to prompt construction; nothing
//! mutates it afterwards.

pub mod external;

pub use external::{
    normalize_source, resolve_endpoints, ExternalEndpoint, ExternalToolProvider,
    ExternalToolSource,
};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::Result;
use crate::types::AgentProfile;

/// Tools that only make sense alongside another tool: disabling the
/// first column disables the second as well.
const DEPENDENT_TOOLS: &[(&str, &str)] =
    &[("sb_presentation_tool", "sb_presentation_outline_tool")];

/// Instruction block appended to the prompt whenever externally
/// sourced tools are in the catalog. External tool output is the sole
/// source of truth for anything the model reports after calling one.
pub const EXTERNAL_TOOL_INSTRUCTIONS: &str = "\
--- External Tools ---
When you call any externally sourced tool, its output is your only \
source of truth for the facts you report afterwards. Cite only URLs, \
sources, and data present in the actual tool result; never supplement \
it from prior knowledge or invent sources. If the result is \
insufficient, say so or call the tool again with different parameters.";

/// One callable tool, as exposed to the completion engine and to
/// prompt construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema object describing the parameters.
    pub parameters: serde_json::Value,
    pub enabled: bool,
    /// Present only for externally sourced tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ExternalToolSource>,
}

impl ToolDescriptor {
    pub fn builtin(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            enabled: true,
            source: None,
        }
    }

    /// Parameter names, in schema order.
    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters
            .get("properties")
            .and_then(|props| props.as_object())
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Row of the catalog's prompt-construction surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
    pub parameter_names: Vec<String>,
}

/// Immutable catalog of the tools callable within one run.
#[derive(Debug, Clone)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
}

impl ToolCatalog {
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn has_external_tools(&self) -> bool {
        self.tools.iter().any(|t| t.source.is_some())
    }

    /// The `{name, description, parameter_names}` listing consumed by
    /// prompt construction.
    pub fn prompt_summary(&self) -> Vec<ToolSummary> {
        self.tools
            .iter()
            .map(|t| ToolSummary {
                name: t.name.clone(),
                description: t.description.clone(),
                parameter_names: t.parameter_names(),
            })
            .collect()
    }

    /// Instruction block for prompt construction; empty when no
    /// external tools are present.
    pub fn prompt_instructions(&self) -> &'static str {
        if self.has_external_tools() {
            EXTERNAL_TOOL_INSTRUCTIONS
        } else {
            ""
        }
    }
}

/// Builds the catalog for one run.
pub struct CatalogBuilder<'a> {
    profile: &'a AgentProfile,
    data_providers_available: bool,
    extra_builtins: Vec<ToolDescriptor>,
}

impl<'a> CatalogBuilder<'a> {
    pub fn new(profile: &'a AgentProfile) -> Self {
        Self {
            profile,
            data_providers_available: false,
            extra_builtins: Vec::new(),
        }
    }

    /// Enable the data-providers tool (conditional on a configured
    /// provider key).
    pub fn with_data_providers(mut self, available: bool) -> Self {
        self.data_providers_available = available;
        self
    }

    /// Register additional built-in descriptors supplied by the host.
    pub fn with_builtin(mut self, descriptor: ToolDescriptor) -> Self {
        self.extra_builtins.push(descriptor);
        self
    }

    /// Assemble the immutable catalog. External descriptor fetch
    /// failures degrade to built-ins only.
    pub async fn build(
        self,
        external: Option<&dyn ExternalToolProvider>,
    ) -> Result<ToolCatalog> {
        let mut disabled_count = 0usize;
        let mut tools = Vec::new();

        let mut candidates = builtin_descriptors();
        if self.data_providers_available {
            candidates.push(data_providers_descriptor());
        }
        candidates.extend(self.extra_builtins);

        for descriptor in candidates {
            if self.profile.tool_enabled(&descriptor.name) {
                tools.push(descriptor);
            } else {
                disabled_count += 1;
                debug!(tool = %descriptor.name, "tool disabled by profile");
            }
        }

        // A disabled tool takes its dependents with it.
        for (tool, dependent) in DEPENDENT_TOOLS {
            if !self.profile.tool_enabled(tool) {
                tools.retain(|t| t.name != *dependent);
            }
        }

        if !self.profile.external_tools.is_empty() {
            let endpoints = resolve_endpoints(&self.profile.external_tools);
            if let Some(provider) = external {
                match provider.fetch_tools(&endpoints).await {
                    Ok(fetched) => {
                        for mut descriptor in fetched {
                            if !endpoint_allows(&endpoints, &descriptor) {
                                debug!(
                                    tool = %descriptor.name,
                                    "tool not in its endpoint's enabled list"
                                );
                                continue;
                            }
                            descriptor.enabled = true;
                            tools.push(descriptor);
                        }
                    }
                    Err(err) => {
                        error!(error = %err, "failed to fetch external tools");
                    }
                }
            }
        }

        debug!(
            tool_count = tools.len(),
            disabled = disabled_count,
            "tool catalog built"
        );
        Ok(ToolCatalog { tools })
    }
}

/// Whether a fetched descriptor passes its endpoint's `enabled_tools`
/// restriction. An empty list, or a descriptor whose source matches
/// no resolved endpoint, passes through.
fn endpoint_allows(endpoints: &[ExternalEndpoint], descriptor: &ToolDescriptor) -> bool {
    let Some(source) = &descriptor.source else {
        return true;
    };
    endpoints
        .iter()
        .find(|e| e.source.qualified_name() == source.qualified_name())
        .map_or(true, |e| {
            e.enabled_tools.is_empty() || e.enabled_tools.contains(&descriptor.name)
        })
}

fn object_schema(params: &[(&str, &str)]) -> serde_json::Value {
    let properties: BTreeMap<&str, serde_json::Value> = params
        .iter()
        .map(|(name, description)| {
            (
                *name,
                serde_json::json!({"type": "string", "description": description}),
            )
        })
        .collect();
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": [],
    })
}

fn data_providers_descriptor() -> ToolDescriptor {
    ToolDescriptor::builtin(
        "data_providers_tool",
        "Query structured data providers",
        object_schema(&[("provider", "Provider name"), ("query", "Query payload")]),
    )
}

/// The static built-in set. Concrete implementations live with the
/// host; the catalog only carries their callable surface.
fn builtin_descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::builtin(
            "message_tool",
            "Ask the user a question or mark the task complete",
            object_schema(&[("text", "Message text")]),
        ),
        ToolDescriptor::builtin(
            "expand_msg_tool",
            "Expand a truncated message by id",
            object_schema(&[("message_id", "Id of the message to expand")]),
        ),
        ToolDescriptor::builtin(
            "task_list_tool",
            "Create and update the task list",
            object_schema(&[("tasks", "Task list payload")]),
        ),
        ToolDescriptor::builtin(
            "sb_shell_tool",
            "Run shell commands in the sandbox",
            object_schema(&[("command", "Command line to execute")]),
        ),
        ToolDescriptor::builtin(
            "sb_files_tool",
            "Create, read and edit sandbox files",
            object_schema(&[("path", "File path"), ("content", "File content")]),
        ),
        ToolDescriptor::builtin(
            "sb_deploy_tool",
            "Deploy the sandbox project",
            object_schema(&[("name", "Deployment name")]),
        ),
        ToolDescriptor::builtin(
            "sb_expose_tool",
            "Expose a sandbox port publicly",
            object_schema(&[("port", "Port to expose")]),
        ),
        ToolDescriptor::builtin(
            "web_search_tool",
            "Search the web",
            object_schema(&[("query", "Search query")]),
        ),
        ToolDescriptor::builtin(
            "sb_vision_tool",
            "Inspect an image",
            object_schema(&[("file_path", "Image path")]),
        ),
        ToolDescriptor::builtin(
            "sb_image_edit_tool",
            "Edit or generate images",
            object_schema(&[("prompt", "Edit instruction")]),
        ),
        ToolDescriptor::builtin(
            "sb_presentation_outline_tool",
            "Draft a presentation outline",
            object_schema(&[("topic", "Presentation topic")]),
        ),
        ToolDescriptor::builtin(
            "sb_presentation_tool",
            "Build presentation slides",
            object_schema(&[("outline", "Outline to build from")]),
        ),
        ToolDescriptor::builtin(
            "sb_sheets_tool",
            "Create and edit spreadsheets",
            object_schema(&[("path", "Spreadsheet path")]),
        ),
        ToolDescriptor::builtin(
            "sb_web_dev_tool",
            "Scaffold and serve web projects",
            object_schema(&[("action", "Web dev action")]),
        ),
        ToolDescriptor::builtin(
            "sb_upload_file_tool",
            "Upload a file for the user",
            object_schema(&[("path", "File to upload")]),
        ),
        ToolDescriptor::builtin(
            "browser_tool",
            "Drive a browser session",
            object_schema(&[("action", "Browser action"), ("url", "Target URL")]),
        ),
    ]
}
