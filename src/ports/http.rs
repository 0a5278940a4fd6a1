/// JSON-over-HTTP collaborator clients
///
/// Each deployed collaborator exposes a POST endpoint under a base URL:
/// - classifier: `{base}/classify`
/// - reasoning: `{base}/risk`, `{base}/plan`
/// - actions: `{base}/actions`
/// - memory: `{base}/memories`
///
/// Connection failures, timeouts and 5xx answers map to `PortError::Unavailable`;
/// any other non-success status or an unparseable body maps to `PortError::Rejected`.

use crate::error::PortError;
use crate::ports::{
    ActionPlan, ActionPort, ActionRequest, Classification, ClassifierPort, MemoryAck, MemoryStorePort,
    MemoryWrite, ReasoningPort, ReasoningQuery, RiskAssessment,
};
use crate::workflow::types::ActionReceipt;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use std::time::Duration;

/// Shared reqwest client bound to one collaborator base URL
#[derive(Debug, Clone)]
pub struct HttpCollaborator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCollaborator {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, PortError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PortError::Unavailable(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, PortError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("🌍 POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| PortError::Unavailable(format!("POST {} failed: {}", url, e)))?;

        let status = response.status();
        tracing::debug!("📡 {} answered {}", url, status);

        if status.is_server_error() {
            return Err(PortError::Unavailable(format!("{} answered {}", url, status)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PortError::Rejected(format!("{} answered {}: {}", url, status, text)));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| PortError::Rejected(format!("Unparseable response from {}: {}", url, e)))
    }
}

#[derive(Debug, Clone)]
pub struct HttpClassifier(pub HttpCollaborator);

#[async_trait]
impl ClassifierPort for HttpClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, PortError> {
        let classification: Classification = self.0.post("/classify", &json!({ "text": text })).await?;
        if classification.intent_name.trim().is_empty() {
            return Err(PortError::Rejected("classifier returned an empty intent name".to_string()));
        }
        if !(0.0..=1.0).contains(&classification.confidence) {
            return Err(PortError::Rejected(format!(
                "classifier confidence out of range: {}",
                classification.confidence
            )));
        }
        Ok(classification)
    }
}

#[derive(Debug, Clone)]
pub struct HttpReasoning(pub HttpCollaborator);

#[async_trait]
impl ReasoningPort for HttpReasoning {
    async fn assess_risk(&self, query: &ReasoningQuery) -> Result<RiskAssessment, PortError> {
        self.0.post("/risk", query).await
    }

    async fn generate_plan(&self, query: &ReasoningQuery, risk: &RiskAssessment) -> Result<ActionPlan, PortError> {
        self.0.post("/plan", &json!({ "query": query, "risk": risk })).await
    }
}

#[derive(Debug, Clone)]
pub struct HttpActionPort(pub HttpCollaborator);

#[async_trait]
impl ActionPort for HttpActionPort {
    async fn execute(&self, request: &ActionRequest) -> Result<ActionReceipt, PortError> {
        self.0.post("/actions", request).await
    }
}

#[derive(Debug, Clone)]
pub struct HttpMemoryStore(pub HttpCollaborator);

#[async_trait]
impl MemoryStorePort for HttpMemoryStore {
    async fn write_many(&self, items: &[MemoryWrite]) -> Result<Vec<MemoryAck>, PortError> {
        self.0.post("/memories", &json!({ "items": items })).await
    }
}
