/// Intent schema catalog
///
/// Maps intent names to their declared required fields. Built once at startup
/// (built-in defaults or a JSON file) and handed to the engine by value; it is
/// never mutated afterwards.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Declared schema for one intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentSchema {
    pub intent_name: String,
    /// Required parameter names, in the order clarification prompts list them
    pub required_fields: Vec<String>,
}

/// Immutable intent-name -> schema table
#[derive(Debug, Clone)]
pub struct IntentCatalog {
    schemas: HashMap<String, IntentSchema>,
}

impl IntentCatalog {
    /// Build a catalog, rejecting duplicate intents and blank field names
    pub fn new(schemas: Vec<IntentSchema>) -> Result<Self> {
        let mut table = HashMap::new();
        for schema in schemas {
            if schema.intent_name.trim().is_empty() {
                anyhow::bail!("Intent schema with empty intent name");
            }
            if schema.required_fields.iter().any(|f| f.trim().is_empty()) {
                anyhow::bail!("Intent '{}' declares an empty field name", schema.intent_name);
            }
            let name = schema.intent_name.clone();
            if table.insert(name.clone(), schema).is_some() {
                anyhow::bail!("Duplicate intent schema: {}", name);
            }
        }
        Ok(Self { schemas: table })
    }

    /// Load schemas from a JSON array of `{intent_name, required_fields}` objects
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read intent catalog '{}'", path.display()))?;
        let schemas: Vec<IntentSchema> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse intent catalog '{}'", path.display()))?;
        let catalog = Self::new(schemas)?;
        tracing::info!("📚 Loaded {} intent schemas from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    /// Built-in schemas for the emergency-response domain
    pub fn builtin() -> Self {
        let schema = |name: &str, fields: &[&str]| IntentSchema {
            intent_name: name.to_string(),
            required_fields: fields.iter().map(|f| f.to_string()).collect(),
        };
        let schemas = vec![
            schema("rescue_request", &["location", "count"]),
            schema("supply_request", &["location", "supplies"]),
            schema("evacuation_request", &["location", "destination"]),
            schema("hazard_report", &["location", "hazard_type"]),
        ];
        let schemas = schemas
            .into_iter()
            .map(|s| (s.intent_name.clone(), s))
            .collect();
        Self { schemas }
    }

    /// Required fields for an intent; unknown intents require nothing
    pub fn required_fields(&self, intent_name: &str) -> &[String] {
        self.schemas
            .get(intent_name)
            .map(|s| s.required_fields.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains(&self, intent_name: &str) -> bool {
        self.schemas.contains_key(intent_name)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

impl Default for IntentCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
