//! Answerability guardrail
//!
//! Multi-criterion gate in front of synthesis. A single strong chunk is
//! not enough: the packed context as a whole has to look answerable, or
//! the caller gets a structured refusal instead of a confident guess.

use ragline_config::{GuardrailPolicy, TenantConfig};
use ragline_core::{Decision, GuardrailReport, IdkReason, IdkResponse};

/// Guardrail verdict plus the refusal payload when refused.
#[derive(Debug, Clone)]
pub struct GuardrailOutcome {
    pub report: GuardrailReport,
    pub idk: Option<IdkResponse>,
}

impl GuardrailOutcome {
    pub fn is_answerable(&self) -> bool {
        self.report.decision == Decision::Answerable
    }
}

pub struct Guardrail {
    policy: GuardrailPolicy,
    bypass: bool,
    idk_templates_enabled: bool,
    suggestions: Vec<String>,
}

impl Guardrail {
    /// Build from tenant config; a per-query threshold override replaces
    /// only the minimum confidence.
    pub fn from_tenant(config: &TenantConfig, threshold_override: Option<f32>) -> Self {
        let mut policy = config.guardrail_policy();
        if let Some(threshold) = threshold_override {
            policy.min_confidence = threshold.clamp(0.0, 1.0);
        }
        Self {
            policy,
            bypass: config.guardrail_bypass,
            idk_templates_enabled: config.guardrail_idk_templates_enabled,
            suggestions: config.idk_suggestions.clone(),
        }
    }

    pub fn policy(&self) -> GuardrailPolicy {
        self.policy
    }

    /// Decide answerable vs. refuse over the packed context's final
    /// scores and the model's overall confidence.
    pub fn evaluate(&self, confidence: f32, packed_scores: &[f32]) -> GuardrailOutcome {
        let count = packed_scores.len();
        let top = packed_scores
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
        let top = if top.is_finite() { top } else { 0.0 };
        let mean = if count == 0 {
            0.0
        } else {
            packed_scores.iter().sum::<f32>() / count as f32
        };
        let std_dev = if count == 0 {
            0.0
        } else {
            (packed_scores
                .iter()
                .map(|s| (s - mean).powi(2))
                .sum::<f32>()
                / count as f32)
                .sqrt()
        };

        let mut failed: Vec<String> = Vec::new();
        if confidence < self.policy.min_confidence {
            failed.push("confidence".into());
        }
        if top < self.policy.min_top_score {
            failed.push("topScore".into());
        }
        if mean < self.policy.min_mean_score {
            failed.push("meanScore".into());
        }
        if std_dev > self.policy.max_std_dev {
            failed.push("stdDev".into());
        }
        if count < self.policy.min_result_count {
            failed.push("resultCount".into());
        }

        if failed.is_empty() || self.bypass {
            if self.bypass && !failed.is_empty() {
                tracing::warn!(
                    failed = ?failed,
                    "guardrail bypass active; answering despite failed criteria"
                );
            }
            return GuardrailOutcome {
                report: GuardrailReport {
                    decision: Decision::Answerable,
                    reason_code: None,
                    confidence,
                    failed_criteria: if self.bypass { failed } else { Vec::new() },
                },
                idk: None,
            };
        }

        let reason_code = if count == 0 {
            IdkReason::NoResults
        } else if top < self.policy.min_top_score * 0.5 {
            // Nothing even close to relevant: the corpus does not cover
            // this topic.
            IdkReason::OffDomain
        } else {
            IdkReason::LowConfidence
        };

        let suggestions = if self.idk_templates_enabled {
            self.suggestions.clone()
        } else {
            Vec::new()
        };

        GuardrailOutcome {
            report: GuardrailReport {
                decision: Decision::Refused,
                reason_code: Some(reason_code),
                confidence,
                failed_criteria: failed,
            },
            idk: Some(IdkResponse {
                message: idk_message(reason_code),
                reason_code,
                suggestions,
            }),
        }
    }
}

fn idk_message(reason: IdkReason) -> String {
    match reason {
        IdkReason::NoResults => {
            "I don't know. I couldn't find any relevant material for that question.".to_string()
        }
        IdkReason::OffDomain => {
            "I don't know. That question seems to be outside what this knowledge base covers."
                .to_string()
        }
        IdkReason::LowConfidence => {
            "I don't know. The material I found isn't solid enough to answer confidently."
                .to_string()
        }
        IdkReason::Policy => "I can't answer that question here.".to_string(),
    }
}
