//! Stage signals and tagged stage outcomes

use serde::Serialize;

use crate::error::Error;

/// Pipeline stages the confidence model tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Vector,
    Keyword,
    Fusion,
    Domainless,
    Rerank,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Vector => "vector",
            Stage::Keyword => "keyword",
            Stage::Fusion => "fusion",
            Stage::Domainless => "domainless",
            Stage::Rerank => "rerank",
        }
    }
}

/// Summary statistics of one stage's output.
///
/// Signals are attached in pipeline order and never mutated afterwards.
/// `quality_preservation` is the ratio of this stage's quality to the best
/// upstream quality; values well below 1.0 mark a destructive stage.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSignal {
    pub stage: Stage,
    pub confidence: f32,
    pub quality: f32,
    pub top: f32,
    pub mean: f32,
    pub std_dev: f32,
    pub count: usize,
    pub quality_preservation: f32,
    pub degraded: bool,
}

impl StageSignal {
    /// Build a signal from a stage's score list. `best_upstream_quality`
    /// is `None` for the first scored stages.
    pub fn from_scores(stage: Stage, scores: &[f32], best_upstream_quality: Option<f32>) -> Self {
        let count = scores.len();
        let top = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let top = if top.is_finite() { top } else { 0.0 };
        let mean = if count == 0 {
            0.0
        } else {
            scores.iter().sum::<f32>() / count as f32
        };
        let variance = if count == 0 {
            0.0
        } else {
            scores.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / count as f32
        };
        let std_dev = variance.sqrt();

        // Quality blends the peak with the mass of the list; a single strong
        // hit should not be drowned by a long weak tail.
        let quality = if count == 0 { 0.0 } else { 0.7 * top + 0.3 * mean };
        let confidence = quality.clamp(0.0, 1.0);

        let quality_preservation = match best_upstream_quality {
            Some(upstream) if upstream > f32::EPSILON => quality / upstream,
            _ => 1.0,
        };

        Self {
            stage,
            confidence,
            quality,
            top,
            mean,
            std_dev,
            count,
            quality_preservation,
            degraded: false,
        }
    }

    /// Signal for a stage that produced nothing (cancelled or failed soft).
    pub fn degraded(stage: Stage) -> Self {
        Self {
            stage,
            confidence: 0.0,
            quality: 0.0,
            top: 0.0,
            mean: 0.0,
            std_dev: 0.0,
            count: 0,
            quality_preservation: 0.0,
            degraded: true,
        }
    }
}

/// Why a stage was allowed to degrade rather than fail the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeReason {
    Timeout,
    ServiceError,
    Disabled,
    Skipped,
}

/// How a stage finished. The orchestrator pattern-matches on this; the
/// request path never uses panics or exceptions for control flow.
#[derive(Debug)]
pub enum StageOutcome<T> {
    Ok(T),
    Degraded(T, DegradeReason),
    Failed(Error),
}

impl<T> StageOutcome<T> {
    pub fn is_degraded(&self) -> bool {
        matches!(self, StageOutcome::Degraded(..))
    }

    /// The carried value, if the stage produced one.
    pub fn value(self) -> Option<(T, bool)> {
        match self {
            StageOutcome::Ok(v) => Some((v, false)),
            StageOutcome::Degraded(v, _) => Some((v, true)),
            StageOutcome::Failed(_) => None,
        }
    }
}

/// Alert severity for quality degradation between stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

/// Emitted when a stage destroys upstream quality beyond the threshold.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradationAlert {
    pub stage: Stage,
    pub severity: Severity,
    pub previous: f32,
    pub current: f32,
}
