/// Slot validation and clarification merging
///
/// Checks a parameter set against the intent catalog and drives the bounded
/// clarification loop. The attempt counter is an explicit field of the outcome,
/// so the bound survives suspend/resume and process restarts.

use crate::error::EngineError;
use crate::workflow::catalog::IntentCatalog;
use crate::workflow::types::{ValidationOutcome, ValidationStatus};
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SlotValidator {
    catalog: Arc<IntentCatalog>,
    max_attempts: u32,
}

impl SlotValidator {
    pub fn new(catalog: Arc<IntentCatalog>, max_attempts: u32) -> Self {
        Self { catalog, max_attempts }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Validate `parameters` for `intent_name`
    ///
    /// `previous_attempts` is the attempt count of the last outcome (0 on the
    /// first pass). An invalid result increments it; once it has reached the
    /// maximum, a further incomplete parameter set yields `failed`.
    pub fn validate(
        &self,
        intent_name: &str,
        parameters: &Map<String, Value>,
        previous_attempts: u32,
        round: u32,
    ) -> ValidationOutcome {
        let missing_fields: Vec<String> = self
            .catalog
            .required_fields(intent_name)
            .iter()
            .filter(|field| !is_present(parameters.get(field.as_str())))
            .cloned()
            .collect();

        if missing_fields.is_empty() {
            return ValidationOutcome {
                status: ValidationStatus::Valid,
                missing_fields,
                attempt_count: previous_attempts,
                clarification_prompt: None,
                round,
            };
        }

        if previous_attempts >= self.max_attempts {
            tracing::warn!(
                "🛑 Clarification attempts exhausted for intent '{}' ({} of {}), still missing: {:?}",
                intent_name,
                previous_attempts,
                self.max_attempts,
                missing_fields
            );
            return ValidationOutcome {
                status: ValidationStatus::Failed,
                missing_fields,
                attempt_count: previous_attempts,
                clarification_prompt: None,
                round,
            };
        }

        let prompt = clarification_prompt(intent_name, &missing_fields);
        ValidationOutcome {
            status: ValidationStatus::Invalid,
            missing_fields,
            attempt_count: previous_attempts + 1,
            clarification_prompt: Some(prompt),
            round,
        }
    }
}

/// Merge a clarification answer into the working parameters
///
/// Only fields listed in `missing_fields` are written. Anything else in the
/// answer is ignored and unrelated parameters stay exactly as they were.
/// Returns the names of the fields that were filled in.
pub fn merge_clarification(
    parameters: &mut Map<String, Value>,
    missing_fields: &[String],
    answer: &Value,
) -> Result<Vec<String>, EngineError> {
    let answer = answer.as_object().ok_or_else(|| {
        EngineError::InvalidInput("clarification answer must be a JSON object of field values".to_string())
    })?;

    let mut merged = Vec::new();
    for field in missing_fields {
        if let Some(value) = answer.get(field) {
            if is_present(Some(value)) {
                parameters.insert(field.clone(), value.clone());
                merged.push(field.clone());
            }
        }
    }

    let ignored: Vec<&String> = answer.keys().filter(|k| !missing_fields.contains(k)).collect();
    if !ignored.is_empty() {
        tracing::debug!("🙈 Ignoring clarification fields that were not requested: {:?}", ignored);
    }

    Ok(merged)
}

fn clarification_prompt(intent_name: &str, missing_fields: &[String]) -> String {
    format!(
        "To continue with your {} we still need: {}. Please provide {}.",
        intent_name.replace('_', " "),
        missing_fields.join(", "),
        if missing_fields.len() == 1 { "it" } else { "them" }
    )
}

/// A value counts as present unless it is null, blank, or an empty collection
fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(_) => true,
    }
}
