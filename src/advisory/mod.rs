/// AI advisory collaborator
///
/// Advice is read-only guidance over the latest snapshot. The engine never
/// interprets it or acts on it, and lifecycle operations never wait on it.

use crate::error::{EngineError, EngineResult};
use crate::workflow::types::{AxisId, Snapshot, WorkflowId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdviceKind {
    /// How to answer an axis well
    #[default]
    Guidance,
    /// Contradictions between answers and scores
    ConsistencyCheck,
    /// Questions or axes that still need evidence
    GapAnalysis,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdvisoryRequest {
    pub workflow_id: WorkflowId,
    pub kind: AdviceKind,
    pub axis_id: Option<AxisId>,
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advice {
    pub kind: AdviceKind,
    pub text: String,
    #[serde(default)]
    pub suggestions: Vec<Value>,
}

#[async_trait]
pub trait Advisor: Send + Sync {
    async fn advise(&self, request: &AdvisoryRequest) -> EngineResult<Advice>;
}

/// Used when no advisory endpoint is configured
#[derive(Debug, Clone, Default)]
pub struct DisabledAdvisor;

#[async_trait]
impl Advisor for DisabledAdvisor {
    async fn advise(&self, _request: &AdvisoryRequest) -> EngineResult<Advice> {
        Err(EngineError::Advisory("no advisory service configured".to_string()))
    }
}

/// Posts the request as JSON to an external advisory endpoint
///
/// The endpoint answers with `{ "text": ..., "suggestions": [...] }`; a plain
/// text body is taken as the advice text.
#[derive(Debug, Clone)]
pub struct HttpAdvisor {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct AdvisoryReply {
    text: String,
    #[serde(default)]
    suggestions: Vec<Value>,
}

impl HttpAdvisor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Advisor for HttpAdvisor {
    async fn advise(&self, request: &AdvisoryRequest) -> EngineResult<Advice> {
        tracing::debug!("🤖 Requesting {:?} advice for workflow {}", request.kind, request.workflow_id);

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| EngineError::Advisory(format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EngineError::Advisory(format!("failed to read response body: {}", e)))?;
        if !status.is_success() {
            tracing::warn!("⚠️ Advisory service answered {}", status);
            return Err(EngineError::Advisory(format!("advisory service answered {}", status)));
        }

        let reply = serde_json::from_str::<AdvisoryReply>(&body).unwrap_or(AdvisoryReply {
            text: body,
            suggestions: Vec::new(),
        });
        Ok(Advice {
            kind: request.kind,
            text: reply.text,
            suggestions: reply.suggestions,
        })
    }
}
