//! Rank fusion
//!
//! Combines the vector and keyword candidate lists into one ranked list
//! under a selectable strategy. The default is score-preserving: rank-only
//! RRF with a large k compresses an 0.88 vector similarity into noise,
//! which then poisons the guardrail into false refusals. Every strategy
//! normalises per-list scores into [0, 1] via min-max first.

use std::cmp::Ordering;
use std::collections::HashMap;

use ragline_config::FusionStrategyName;
use ragline_core::{CandidateArena, CandidateIdx, Ranked};

/// Fusion tuning for one request.
#[derive(Debug, Clone)]
pub struct FusionParams {
    pub strategy: FusionStrategyName,
    pub vector_weight: f32,
    pub keyword_weight: f32,
    /// Rank discount for the rank-based strategies. Small on purpose.
    pub k_param: f32,
    /// Keep only the best-scoring chunk per document. Disabled when
    /// section reconstruction will re-merge sibling chunks later.
    pub dedup_by_doc: bool,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            strategy: FusionStrategyName::WeightedAverage,
            vector_weight: 0.7,
            keyword_weight: 0.3,
            k_param: 5.0,
            dedup_by_doc: true,
        }
    }
}

/// Fusion result.
#[derive(Debug)]
pub struct FusionOutcome {
    /// Fused ranking, best first.
    pub ranked: Vec<Ranked>,
    pub strategy: FusionStrategyName,
}

/// Per-candidate view assembled from both input lists.
struct FusedEntry {
    idx: CandidateIdx,
    norm_vector: Option<f32>,
    norm_keyword: Option<f32>,
    vector_rank: Option<usize>,
    keyword_rank: Option<usize>,
}

/// Min-max normalise a score list into [0, 1]. A degenerate list (all
/// scores equal) normalises to 1.0 when those scores carry any signal;
/// an all-zero list stays zero, so a wall of irrelevant hits cannot
/// manufacture relevance.
fn min_max(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }
    let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if (max - min).abs() < f32::EPSILON {
        let value = if max > 0.0 { 1.0 } else { 0.0 };
        return vec![value; scores.len()];
    }
    scores.iter().map(|s| (s - min) / (max - min)).collect()
}

/// Sort a list by score descending with deterministic id tie-breaks, so
/// fusion output does not depend on the arrival order of equal scores.
fn sorted_by_score(arena: &CandidateArena, list: &[Ranked]) -> Vec<Ranked> {
    let mut sorted = list.to_vec();
    sorted.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| arena.get(a.idx).id.cmp(&arena.get(b.idx).id))
    });
    sorted
}

/// Fuse the two candidate lists. Writes fusion scores back into the arena
/// and returns the fused ranking.
pub fn fuse(
    arena: &mut CandidateArena,
    vector: &[Ranked],
    keyword: &[Ranked],
    params: &FusionParams,
) -> FusionOutcome {
    let vector = sorted_by_score(arena, vector);
    let keyword = sorted_by_score(arena, keyword);

    let norm_vec = min_max(&vector.iter().map(|r| r.score).collect::<Vec<_>>());
    let norm_key = min_max(&keyword.iter().map(|r| r.score).collect::<Vec<_>>());

    let mut entries: HashMap<CandidateIdx, FusedEntry> = HashMap::new();
    for (rank, (ranked, norm)) in vector.iter().zip(&norm_vec).enumerate() {
        let entry = entries.entry(ranked.idx).or_insert_with(|| FusedEntry {
            idx: ranked.idx,
            norm_vector: None,
            norm_keyword: None,
            vector_rank: None,
            keyword_rank: None,
        });
        entry.norm_vector = Some(*norm);
        entry.vector_rank = Some(rank + 1);
    }
    for (rank, (ranked, norm)) in keyword.iter().zip(&norm_key).enumerate() {
        let entry = entries.entry(ranked.idx).or_insert_with(|| FusedEntry {
            idx: ranked.idx,
            norm_vector: None,
            norm_keyword: None,
            vector_rank: None,
            keyword_rank: None,
        });
        entry.norm_keyword = Some(*norm);
        entry.keyword_rank = Some(rank + 1);
    }

    let w_v = params.vector_weight;
    let w_k = params.keyword_weight;
    let k = params.k_param.max(1.0);

    let mut fused: Vec<(FusedEntry, f32)> = entries
        .into_values()
        .map(|entry| {
            let n_vec = entry.norm_vector.unwrap_or(0.0);
            let n_key = entry.norm_keyword.unwrap_or(0.0);
            let score = match params.strategy {
                FusionStrategyName::WeightedAverage => w_v * n_vec + w_k * n_key,
                FusionStrategyName::ScoreWeightedRrf => {
                    let vec_part = entry
                        .vector_rank
                        .map(|r| w_v * n_vec / (k + r as f32))
                        .unwrap_or(0.0);
                    let key_part = entry
                        .keyword_rank
                        .map(|r| w_k * n_key / (k + r as f32))
                        .unwrap_or(0.0);
                    vec_part + key_part
                }
                FusionStrategyName::MaxConfidence => n_vec.max(n_key),
                FusionStrategyName::BordaRank => {
                    let vec_part = entry
                        .vector_rank
                        .map(|r| w_v / (k + r as f32))
                        .unwrap_or(0.0);
                    let key_part = entry
                        .keyword_rank
                        .map(|r| w_k / (k + r as f32))
                        .unwrap_or(0.0);
                    vec_part + key_part
                }
            };
            (entry, score)
        })
        .collect();

    // Ties break by original vector rank, then docId, then chunk id.
    fused.sort_by(|(ea, sa), (eb, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                let ra = ea.vector_rank.unwrap_or(usize::MAX);
                let rb = eb.vector_rank.unwrap_or(usize::MAX);
                ra.cmp(&rb)
            })
            .then_with(|| {
                arena
                    .get(ea.idx)
                    .payload
                    .doc_id
                    .cmp(&arena.get(eb.idx).payload.doc_id)
            })
            .then_with(|| arena.get(ea.idx).id.cmp(&arena.get(eb.idx).id))
    });

    let mut ranked = Vec::with_capacity(fused.len());
    let mut seen_docs: HashMap<String, ()> = HashMap::new();
    for (entry, score) in fused {
        if params.dedup_by_doc {
            let doc_id = arena.get(entry.idx).payload.doc_id.clone();
            if seen_docs.insert(doc_id, ()).is_some() {
                continue;
            }
        }
        let candidate = arena.get_mut(entry.idx);
        candidate.scores.fusion = Some(score);
        candidate.scores.final_score = score;
        candidate.vector_rank = entry.vector_rank;
        candidate.keyword_rank = entry.keyword_rank;
        ranked.push(Ranked::new(entry.idx, score));
    }

    FusionOutcome {
        ranked,
        strategy: params.strategy,
    }
}
