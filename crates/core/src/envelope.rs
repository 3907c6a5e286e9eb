//! Response envelope returned to the caller

use std::collections::BTreeMap;

use serde::Serialize;

use crate::citation::Citation;

/// Guardrail verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Answerable,
    Refused,
}

/// Why an IDK response was returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdkReason {
    LowConfidence,
    NoResults,
    OffDomain,
    Policy,
}

impl IdkReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdkReason::LowConfidence => "low_confidence",
            IdkReason::NoResults => "no_results",
            IdkReason::OffDomain => "off_domain",
            IdkReason::Policy => "policy",
        }
    }
}

/// Structured refusal returned in lieu of a synthesised answer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdkResponse {
    pub message: String,
    pub reason_code: IdkReason,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

/// Guardrail summary attached to every response, accepted or refused.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailReport {
    pub decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<IdkReason>,
    pub confidence: f32,
    /// Names of criteria that failed, e.g. `meanScore`. Never content.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_criteria: Vec<String>,
}

/// A context chunk as exposed in the envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedChunk {
    pub id: String,
    pub doc_id: String,
    pub content: String,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_path: Option<String>,
    /// Set on reconstructed sections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completeness: Option<f32>,
}

/// Per-stage telemetry in the envelope.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageMetric {
    pub elapsed_ms: u64,
    pub count: usize,
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_score: Option<f32>,
}

/// Ordered map keyed by stage name; BTreeMap keeps envelope output stable.
pub type StageMetrics = BTreeMap<String, StageMetric>;

/// What `/ask` returns on a 200.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idk: Option<IdkResponse>,
    pub citations: Vec<Citation>,
    pub retrieved: Vec<RetrievedChunk>,
    pub guardrail: GuardrailReport,
    pub stage_metrics: StageMetrics,
    pub request_id: String,
}

impl AnswerEnvelope {
    pub fn is_refusal(&self) -> bool {
        self.idk.is_some()
    }
}
