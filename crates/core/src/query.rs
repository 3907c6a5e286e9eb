//! Query types

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn default_k() -> usize {
    8
}

/// A natural-language question plus result sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    /// The question text.
    pub text: String,
    /// Final result count after reranking.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Optional per-query tuning.
    #[serde(default)]
    pub overrides: Option<QueryOverrides>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            k: default_k(),
            overrides: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(Error::InvalidRequest("query text is empty".into()));
        }
        if self.k == 0 || self.k > 100 {
            return Err(Error::InvalidRequest(format!(
                "k must be in 1..=100, got {}",
                self.k
            )));
        }
        Ok(())
    }
}

/// Per-query tuning knobs.
///
/// A `tenant` override is only accepted when it matches the authenticated
/// caller's tenant; anything else is rejected by the filter builder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QueryOverrides {
    /// Requested tenant; must equal the caller's tenant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    /// Fusion strategy name (see configuration surface).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fusion_strategy: Option<String>,
    /// Vector-side fusion weight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_weight: Option<f32>,
    /// Keyword-side fusion weight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword_weight: Option<f32>,
    /// Guardrail minimum confidence for this query only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardrail_threshold: Option<f32>,
}
