//! Context packer
//!
//! Selects the final candidate sequence for the synthesiser under a token
//! budget. Rank order is preserved; a candidate earns its slot by adding
//! novelty or by carrying an answerability bonus. The packer never decides
//! refusal: when any candidate exists, at least one is admitted so the
//! guardrail makes that call.

use std::collections::HashSet;

use ragline_config::TenantConfig;
use ragline_core::{estimate_tokens, CandidateArena, Ranked};

/// Packing parameters.
#[derive(Debug, Clone)]
pub struct PackerConfig {
    pub enabled: bool,
    pub max_context_tokens: usize,
    /// Minimum novelty (1 − max Jaccard against packed content) to admit
    /// a candidate without a bonus.
    pub novelty_floor: f32,
    /// Stage confidence above which a candidate is admitted regardless of
    /// novelty.
    pub answerability_confidence: f32,
}

impl PackerConfig {
    pub fn from_tenant(config: &TenantConfig) -> Self {
        Self {
            enabled: config.context_packing_enabled,
            max_context_tokens: config.max_context_tokens,
            novelty_floor: 0.2,
            answerability_confidence: 0.6,
        }
    }
}

/// Packed context handed to synthesis.
#[derive(Debug)]
pub struct PackedContext {
    /// Selected candidates, input order preserved.
    pub selected: Vec<Ranked>,
    pub total_tokens: usize,
    pub skipped_budget: usize,
    pub skipped_novelty: usize,
}

pub struct ContextPacker {
    config: PackerConfig,
}

impl ContextPacker {
    pub fn new(config: PackerConfig) -> Self {
        Self { config }
    }

    pub fn pack(&self, arena: &mut CandidateArena, ranked: &[Ranked]) -> PackedContext {
        let mut selected: Vec<Ranked> = Vec::new();
        let mut packed_shingles: Vec<HashSet<u64>> = Vec::new();
        let mut total_tokens = 0usize;
        let mut skipped_budget = 0usize;
        let mut skipped_novelty = 0usize;

        for r in ranked {
            let candidate = arena.get(r.idx);
            if candidate.consumed {
                continue;
            }
            let tokens = estimate_tokens(&candidate.content);

            if total_tokens + tokens > self.config.max_context_tokens {
                skipped_budget += 1;
                continue;
            }

            if self.config.enabled && !selected.is_empty() {
                let shingles = shingle_set(&candidate.content);
                let max_overlap = packed_shingles
                    .iter()
                    .map(|packed| jaccard(&shingles, packed))
                    .fold(0.0f32, f32::max);
                let novelty = 1.0 - max_overlap;

                let bonus = candidate.is_reconstructed()
                    || best_stage_confidence(arena, r) >= self.config.answerability_confidence;

                if novelty < self.config.novelty_floor && !bonus {
                    skipped_novelty += 1;
                    continue;
                }
                packed_shingles.push(shingles);
            } else if self.config.enabled {
                packed_shingles.push(shingle_set(&candidate.content));
            }

            total_tokens += tokens;
            selected.push(*r);
        }

        // The guardrail, not the packer, decides refusal: when everything
        // was skipped but candidates exist, admit the best one, trimmed to
        // the budget if it alone overflows it.
        if selected.is_empty() {
            if let Some(first) = ranked.iter().find(|r| !arena.get(r.idx).consumed) {
                let candidate = arena.get_mut(first.idx);
                let mut keep_chars = self.config.max_context_tokens.saturating_mul(4);
                while estimate_tokens(&candidate.content) > self.config.max_context_tokens
                    && keep_chars > 0
                {
                    if let Some((cut, _)) = candidate.content.char_indices().nth(keep_chars) {
                        candidate.content.truncate(cut);
                    }
                    keep_chars /= 2;
                }
                total_tokens = estimate_tokens(&arena.get(first.idx).content);
                selected.push(*first);
            }
        }

        PackedContext {
            selected,
            total_tokens,
            skipped_budget,
            skipped_novelty,
        }
    }
}

fn best_stage_confidence(arena: &CandidateArena, r: &Ranked) -> f32 {
    let scores = &arena.get(r.idx).scores;
    [scores.vector, scores.keyword, scores.fusion, scores.rerank]
        .into_iter()
        .flatten()
        .fold(r.score, f32::max)
}

/// 3-token shingles, hashed for cheap set ops.
fn shingle_set(content: &str) -> HashSet<u64> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let tokens: Vec<&str> = content.split_whitespace().collect();
    if tokens.len() < 3 {
        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        return HashSet::from([hasher.finish()]);
    }
    tokens
        .windows(3)
        .map(|w| {
            let mut hasher = DefaultHasher::new();
            w.hash(&mut hasher);
            hasher.finish()
        })
        .collect()
}

fn jaccard(a: &HashSet<u64>, b: &HashSet<u64>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f32;
    let union = (a.len() + b.len()) as f32 - intersection;
    intersection / union
}
