/// Configuration management for the resqflow engine
///
/// Handles server, storage, collaborator endpoints and workflow rule settings.
/// Every value can be overridden with a `RESQFLOW_*` environment variable.

use crate::runtime::EngineConfig;
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// External collaborator endpoints
    pub collaborators: CollaboratorConfig,
    /// Workflow rule settings
    pub workflow: WorkflowConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration for tenant-isolated storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Base directory for all tenant databases (default: "data")
    /// Creates: {tenant}/runs.db, catalog.db
    pub data_dir: String,
}

/// Base URLs of the collaborator services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorConfig {
    pub classifier_url: String,
    pub reasoning_url: String,
    pub action_url: String,
    pub memory_url: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub max_clarification_attempts: u32,
    /// Minimum knowledge-graph corroboration (source_A)
    pub knowledge_graph_min_evidence: u32,
    /// Minimum document-retrieval corroboration (source_B)
    pub document_retrieval_min_evidence: u32,
    /// Optional JSON file replacing the built-in intent catalog
    pub intent_catalog_path: Option<String>,
}

impl WorkflowConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_clarification_attempts: self.max_clarification_attempts,
            knowledge_graph_min_evidence: self.knowledge_graph_min_evidence,
            document_retrieval_min_evidence: self.document_retrieval_min_evidence,
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        let defaults = EngineConfig::default();
        Self {
            server: ServerConfig {
                host: env_or("RESQFLOW_HOST", "0.0.0.0".to_string()),
                port: env_or("RESQFLOW_PORT", 3004),
            },
            database: DatabaseConfig {
                data_dir: env_or("RESQFLOW_DATA_DIR", "data".to_string()),
            },
            collaborators: CollaboratorConfig {
                classifier_url: env_or("RESQFLOW_CLASSIFIER_URL", "http://127.0.0.1:8081".to_string()),
                reasoning_url: env_or("RESQFLOW_REASONING_URL", "http://127.0.0.1:8082".to_string()),
                action_url: env_or("RESQFLOW_ACTION_URL", "http://127.0.0.1:8083".to_string()),
                memory_url: env_or("RESQFLOW_MEMORY_URL", "http://127.0.0.1:8084".to_string()),
                timeout_secs: env_or("RESQFLOW_COLLABORATOR_TIMEOUT_SECS", 30),
            },
            workflow: WorkflowConfig {
                max_clarification_attempts: env_or(
                    "RESQFLOW_MAX_CLARIFICATION_ATTEMPTS",
                    defaults.max_clarification_attempts,
                ),
                knowledge_graph_min_evidence: env_or(
                    "RESQFLOW_KG_MIN_EVIDENCE",
                    defaults.knowledge_graph_min_evidence,
                ),
                document_retrieval_min_evidence: env_or(
                    "RESQFLOW_DOC_MIN_EVIDENCE",
                    defaults.document_retrieval_min_evidence,
                ),
                intent_catalog_path: std::env::var("RESQFLOW_INTENT_CATALOG").ok(),
            },
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    parse_or(std::env::var(key).ok().as_deref(), default)
}

/// Parse an optional raw value, keeping the default when it is absent or malformed
fn parse_or<T: std::str::FromStr>(raw: Option<&str>, default: T) -> T {
    raw.and_then(|value| value.trim().parse().ok()).unwrap_or(default)
}
