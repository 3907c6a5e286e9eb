//! Source-aware confidence model
//!
//! Tracks per-stage signals and computes the final confidence. The
//! contract that shaped this component: a strong upstream signal must
//! never be silently erased by a weak downstream stage. Naive averaging
//! did exactly that after rank-only fusion, so strategy selection watches
//! quality preservation across stages.

use ragline_core::{DegradationAlert, Severity, Stage, StageSignal};
use serde::Serialize;

/// Strategy the model settled on for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceStrategy {
    /// A strong stage exists and a later stage degraded it: trust the max.
    MaxConfidence,
    /// Default: stage weights tempered by quality preservation.
    AdaptiveWeighted,
    /// Everything is weak: trust the min.
    Conservative,
}

/// Final confidence plus the evidence behind it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceReport {
    pub confidence: f32,
    pub strategy: ConfidenceStrategy,
    pub alerts: Vec<DegradationAlert>,
}

/// Model configuration.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceConfig {
    /// Stage confidence at which the max-confidence escape hatch arms.
    pub max_confidence_threshold: f32,
    /// Preservation loss beyond which a stage counts as destructive.
    pub degradation_threshold: f32,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            max_confidence_threshold: 0.8,
            degradation_threshold: 0.3,
        }
    }
}

/// Per-request confidence accumulator. Signals are appended in pipeline
/// order and never mutated.
#[derive(Debug, Default)]
pub struct ConfidenceModel {
    config: ConfidenceConfig,
    signals: Vec<StageSignal>,
}

impl ConfidenceModel {
    pub fn new(config: ConfidenceConfig) -> Self {
        Self {
            config,
            signals: Vec::new(),
        }
    }

    /// Record a stage's score distribution.
    pub fn record(&mut self, stage: Stage, scores: &[f32]) -> StageSignal {
        let best_upstream = self.best_upstream_quality();
        let signal = StageSignal::from_scores(stage, scores, best_upstream);
        self.signals.push(signal);
        signal
    }

    /// Record a stage that produced nothing (failed soft or cancelled).
    pub fn record_degraded(&mut self, stage: Stage) -> StageSignal {
        let signal = StageSignal::degraded(stage);
        self.signals.push(signal);
        signal
    }

    pub fn signals(&self) -> &[StageSignal] {
        &self.signals
    }

    fn best_upstream_quality(&self) -> Option<f32> {
        self.signals
            .iter()
            .filter(|s| !s.degraded)
            .map(|s| s.quality)
            .fold(None, |acc, q| Some(acc.map_or(q, |a: f32| a.max(q))))
    }

    /// Degradation alerts between consecutive scored stages.
    pub fn alerts(&self) -> Vec<DegradationAlert> {
        let threshold = self.config.degradation_threshold;
        let scored: Vec<&StageSignal> = self.signals.iter().filter(|s| !s.degraded).collect();
        scored
            .windows(2)
            .filter_map(|pair| {
                let (previous, current) = (pair[0], pair[1]);
                if current.quality < (1.0 - threshold) * previous.quality {
                    let severity = if previous.quality > 0.0
                        && current.quality / previous.quality < threshold
                    {
                        Severity::Critical
                    } else {
                        Severity::Warning
                    };
                    Some(DegradationAlert {
                        stage: current.stage,
                        severity,
                        previous: previous.quality,
                        current: current.quality,
                    })
                } else {
                    None
                }
            })
            .collect()
    }

    /// Final confidence for the request.
    pub fn finalize(&self) -> ConfidenceReport {
        let alerts = self.alerts();
        let scored: Vec<&StageSignal> = self.signals.iter().filter(|s| !s.degraded).collect();

        if scored.is_empty() {
            return ConfidenceReport {
                confidence: 0.0,
                strategy: ConfidenceStrategy::Conservative,
                alerts,
            };
        }

        let strategy = self.pick_strategy(&scored);
        let confidence = match strategy {
            ConfidenceStrategy::MaxConfidence => scored
                .iter()
                .map(|s| s.confidence)
                .fold(0.0f32, f32::max),
            ConfidenceStrategy::Conservative => scored
                .iter()
                .map(|s| s.confidence)
                .fold(1.0f32, f32::min),
            ConfidenceStrategy::AdaptiveWeighted => {
                let mut weighted = 0.0f32;
                let mut weight_sum = 0.0f32;
                for signal in &scored {
                    let base = match signal.stage {
                        Stage::Vector => 0.4,
                        Stage::Keyword => 0.2,
                        Stage::Fusion => 0.2,
                        Stage::Rerank => 0.2,
                        // The domain-less pass refines fusion; it carries
                        // no weight of its own in the blend.
                        Stage::Domainless => 0.0,
                    };
                    if base == 0.0 {
                        continue;
                    }
                    let temper = signal.quality_preservation.clamp(0.25, 1.0);
                    weighted += base * temper * signal.confidence;
                    weight_sum += base * temper;
                }
                if weight_sum > 0.0 {
                    weighted / weight_sum
                } else {
                    0.0
                }
            }
        };

        ConfidenceReport {
            confidence: confidence.clamp(0.0, 1.0),
            strategy,
            alerts,
        }
    }

    fn pick_strategy(&self, scored: &[&StageSignal]) -> ConfidenceStrategy {
        let all_weak = scored.iter().all(|s| s.confidence < 0.3);
        if all_weak {
            return ConfidenceStrategy::Conservative;
        }

        let has_strong = scored
            .iter()
            .any(|s| s.confidence >= self.config.max_confidence_threshold);
        let has_destruction = scored
            .iter()
            .any(|s| s.quality_preservation < 1.0 - self.config.degradation_threshold);
        if has_strong && has_destruction {
            return ConfidenceStrategy::MaxConfidence;
        }

        ConfidenceStrategy::AdaptiveWeighted
    }
}
