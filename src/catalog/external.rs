//! Externally sourced tools: origin normalization and the fetch seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ToolDescriptor;
use crate::error::Result;
use crate::types::ExternalToolConfig;

/// Normalized origin of an externally sourced tool endpoint.
///
/// Built once during setup by [`normalize_source`]; the loop never
/// re-inspects raw configuration after that.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum ExternalToolSource {
    /// Endpoint registered in the platform catalog under a known
    /// qualified name.
    Preconfigured { qualified_name: String },
    /// User-supplied endpoint reached over a generic transport.
    CustomGeneric {
        kind: String,
        qualified_name: String,
        config: serde_json::Value,
    },
    /// User-supplied endpoint that authenticates through a stored
    /// credential profile.
    CustomCredentialed {
        vendor: String,
        qualified_name: String,
        profile_id: Option<String>,
    },
}

impl ExternalToolSource {
    pub fn qualified_name(&self) -> &str {
        match self {
            Self::Preconfigured { qualified_name }
            | Self::CustomGeneric { qualified_name, .. }
            | Self::CustomCredentialed { qualified_name, .. } => qualified_name,
        }
    }
}

/// One resolved external endpoint, ready for descriptor fetching.
#[derive(Debug, Clone)]
pub struct ExternalEndpoint {
    pub name: String,
    pub source: ExternalToolSource,
    /// When non-empty, restricts which of the endpoint's tools enter
    /// the catalog.
    pub enabled_tools: Vec<String>,
}

fn slugify(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

/// Convert one raw endpoint configuration into its normalized source.
pub fn normalize_source(config: &ExternalToolConfig) -> ExternalToolSource {
    if config.credentialed {
        let vendor = config.kind.clone().unwrap_or_else(|| "custom".to_string());
        let qualified_name = config
            .qualified_name
            .clone()
            .unwrap_or_else(|| format!("{}.{}", vendor, slugify(&config.name)));
        return ExternalToolSource::CustomCredentialed {
            vendor,
            qualified_name,
            profile_id: config.profile_id.clone(),
        };
    }

    match (&config.qualified_name, &config.kind) {
        (Some(qualified_name), None) => ExternalToolSource::Preconfigured {
            qualified_name: qualified_name.clone(),
        },
        (qualified, kind) => {
            let kind = kind.clone().unwrap_or_else(|| "sse".to_string());
            let qualified_name = qualified
                .clone()
                .unwrap_or_else(|| format!("custom_{}_{}", kind, slugify(&config.name)));
            ExternalToolSource::CustomGeneric {
                kind,
                qualified_name,
                config: config.config.clone(),
            }
        }
    }
}

/// Resolve every raw endpoint config in one pass.
pub fn resolve_endpoints(configs: &[ExternalToolConfig]) -> Vec<ExternalEndpoint> {
    configs
        .iter()
        .map(|config| ExternalEndpoint {
            name: config.name.clone(),
            source: normalize_source(config),
            enabled_tools: config.enabled_tools.clone(),
        })
        .collect()
}

/// Collaborator that fetches tool descriptors from external endpoints
/// (an MCP client, a vendor registry). A fetch failure degrades the
/// run to built-ins only; it never fails setup.
#[async_trait]
pub trait ExternalToolProvider: Send + Sync {
    async fn fetch_tools(&self, endpoints: &[ExternalEndpoint]) -> Result<Vec<ToolDescriptor>>;
}
