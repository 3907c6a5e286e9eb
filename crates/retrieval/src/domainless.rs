//! Domain-less keyword reranker
//!
//! Re-scores post-fusion candidates with corpus-derived, language-agnostic
//! features only: IDF term weighting, field-weighted match strength,
//! position and proximity, phrase coverage and PMI-derived exclusivity.
//! No hard-coded domain lexicons; everything tunable comes from tenant
//! configuration, and the stage is an exact no-op when disabled.

use std::cmp::Ordering;

use ragline_config::{FieldWeights, TenantConfig};
use ragline_core::{Candidate, CandidateArena, Ranked};

use crate::analyzer::QueryAnalysis;
use crate::stats::{tokenize, CorpusStats};

/// How strongly a term matched, best match wins per field.
const STRENGTH_EXACT: f32 = 1.0;
const STRENGTH_LEMMA: f32 = 0.7;
const STRENGTH_FUZZY: f32 = 0.4;

#[derive(Debug, Clone)]
pub struct DomainlessReranker {
    enabled: bool,
    lambda: f32,
    idf_gamma: f32,
    rank_decay: f32,
    field_weights: FieldWeights,
    body_sat_c: f32,
    early_pos_tokens: usize,
    early_pos_nudge: f32,
    prox_win: usize,
    proximity_beta: f32,
    coverage_alpha: f32,
    exclusivity_gamma: f32,
    clamp_kw_norm: f32,
    topk_coverage: usize,
}

impl DomainlessReranker {
    pub fn from_tenant(config: &TenantConfig) -> Self {
        Self {
            enabled: config.kw_points_enabled,
            lambda: config.kw_lambda,
            idf_gamma: config.kw_idf_gamma,
            rank_decay: config.kw_rank_decay,
            field_weights: config.kw_field_weights,
            body_sat_c: config.kw_body_sat_c,
            early_pos_tokens: config.kw_early_pos_tokens,
            early_pos_nudge: config.kw_early_pos_nudge,
            prox_win: config.kw_prox_win,
            proximity_beta: config.kw_proximity_beta,
            coverage_alpha: config.kw_coverage_alpha,
            exclusivity_gamma: config.kw_exclusivity_gamma,
            clamp_kw_norm: config.kw_clamp_kw_norm,
            topk_coverage: config.kw_topk_coverage,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Re-score the fused list. Returns the (possibly re-ordered) ranking;
    /// when disabled the input comes back untouched.
    pub fn rescore(
        &self,
        arena: &mut CandidateArena,
        ranked: &[Ranked],
        analysis: &QueryAnalysis,
        stats: &CorpusStats,
    ) -> Vec<Ranked> {
        if !self.enabled || ranked.is_empty() {
            return ranked.to_vec();
        }

        let terms = self.weighted_terms(analysis, stats);
        if terms.is_empty() {
            return ranked.to_vec();
        }

        let raw: Vec<f32> = ranked
            .iter()
            .map(|r| self.raw_score(arena.get(r.idx), &terms, analysis, stats))
            .collect();

        // Per-query normalisation against the median raw score.
        let mut sorted_raw = raw.clone();
        sorted_raw.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let median = sorted_raw[sorted_raw.len() / 2];
        let epsilon = 1e-3;

        let mut rescored: Vec<Ranked> = ranked
            .iter()
            .zip(&raw)
            .map(|(r, raw_score)| {
                let kw_norm = (raw_score / (median + epsilon)).min(self.clamp_kw_norm);
                let fusion = arena.get(r.idx).scores.fusion.unwrap_or(r.score);
                let blended = fusion + self.lambda * kw_norm;

                let candidate = arena.get_mut(r.idx);
                candidate.scores.domainless = Some(blended);
                candidate.scores.final_score = blended;
                Ranked::new(r.idx, blended)
            })
            .collect();

        rescored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| arena.get(a.idx).id.cmp(&arena.get(b.idx).id))
        });
        rescored
    }

    /// Query terms ordered by weight `IDF^γ · phraseBonus`, decayed by
    /// list rank.
    fn weighted_terms(&self, analysis: &QueryAnalysis, stats: &CorpusStats) -> Vec<(String, f32)> {
        let mut terms: Vec<(String, f32)> = Vec::new();
        for phrase in &analysis.keyphrases {
            let phrase_bonus = if phrase.terms.len() > 1 { 1.2 } else { 1.0 };
            for term in &phrase.terms {
                if terms.iter().any(|(t, _)| t == term) {
                    continue;
                }
                let weight = stats.idf(term).powf(self.idf_gamma) * phrase_bonus;
                terms.push((term.clone(), weight));
            }
        }
        terms.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        for (rank, term) in terms.iter_mut().enumerate() {
            term.1 *= self.rank_decay.powi(rank as i32);
        }
        terms
    }

    fn raw_score(
        &self,
        candidate: &Candidate,
        terms: &[(String, f32)],
        analysis: &QueryAnalysis,
        stats: &CorpusStats,
    ) -> f32 {
        let body_tokens = tokenize(&candidate.content);
        let title_tokens = candidate
            .payload
            .title()
            .map(tokenize)
            .unwrap_or_default();
        let header_tokens: Vec<String> = candidate
            .payload
            .headers
            .iter()
            .flat_map(|h| tokenize(h))
            .collect();
        let section_tokens = candidate
            .payload
            .section_path
            .as_deref()
            .map(tokenize)
            .unwrap_or_default();
        let doc_id_tokens = tokenize(&candidate.payload.doc_id);

        let mut score = 0.0f32;
        let mut first_match_pos: Option<usize> = None;
        let mut matched_positions: Vec<(usize, usize)> = Vec::new(); // (term rank, body pos)

        for (term_rank, (term, weight)) in terms.iter().enumerate() {
            let mut field_score = 0.0f32;

            // Body: hit count saturates so walls of repetition stop paying.
            let body_hits: Vec<usize> = body_tokens
                .iter()
                .enumerate()
                .filter(|(_, t)| match_strength(term, t) >= STRENGTH_EXACT)
                .map(|(pos, _)| pos)
                .collect();
            let body_strength = best_strength(term, &body_tokens);
            if body_strength > 0.0 {
                let hits = if body_hits.is_empty() { 1 } else { body_hits.len() };
                let saturation = 1.0 - (-self.body_sat_c * hits as f32).exp();
                field_score += self.field_weights.body * body_strength * saturation;

                if let Some(&pos) = body_hits.first() {
                    first_match_pos = Some(first_match_pos.map_or(pos, |p: usize| p.min(pos)));
                    matched_positions.push((term_rank, pos));
                }
            }

            field_score += self.field_weights.title * best_strength(term, &title_tokens);
            field_score += self.field_weights.header * best_strength(term, &header_tokens);
            field_score += self.field_weights.section_path * best_strength(term, &section_tokens);
            field_score += self.field_weights.doc_id * best_strength(term, &doc_id_tokens);

            score += weight * field_score;
        }

        // Early-position nudge.
        if first_match_pos.is_some_and(|p| p < self.early_pos_tokens) {
            score *= self.early_pos_nudge;
        }

        // Proximity over the top-2/3 terms: the tighter the span, the
        // bigger the bonus.
        let top_positions: Vec<usize> = matched_positions
            .iter()
            .filter(|(rank, _)| *rank < 3)
            .map(|(_, pos)| *pos)
            .collect();
        if let (Some(&first), Some(&last)) =
            (top_positions.iter().min(), top_positions.iter().max())
        {
            if top_positions.len() >= 2 {
                let span = last - first;
                if span < self.prox_win {
                    let bonus = 1.0
                        + self.proximity_beta * (1.0 - span as f32 / self.prox_win as f32);
                    score *= bonus;
                }
            }
        }

        // Coverage: all top-K keyphrases present somewhere.
        let top_phrases = analysis.keyphrases.iter().take(self.topk_coverage);
        let mut phrase_count = 0usize;
        let mut phrases_present = 0usize;
        for phrase in top_phrases {
            phrase_count += 1;
            let present = phrase
                .terms
                .iter()
                .all(|t| best_strength(t, &body_tokens) > 0.0 || best_strength(t, &title_tokens) > 0.0);
            if present {
                phrases_present += 1;
            }
        }
        if phrase_count > 0 && phrases_present == phrase_count {
            score *= 1.0 + self.coverage_alpha;
        }

        // Soft exclusivity penalty: a candidate matching two
        // corpus-exclusive terms is probably straddling topics.
        let matched_terms: Vec<&String> = terms
            .iter()
            .filter(|(t, _)| best_strength(t, &body_tokens) > 0.0)
            .map(|(t, _)| t)
            .collect();
        'outer: for i in 0..matched_terms.len() {
            for j in (i + 1)..matched_terms.len() {
                if stats.is_exclusive_pair(matched_terms[i], matched_terms[j]) {
                    score *= 1.0 - self.exclusivity_gamma;
                    break 'outer;
                }
            }
        }

        score
    }
}

/// Best match strength of `term` against a token list.
fn best_strength(term: &str, tokens: &[String]) -> f32 {
    let mut best = 0.0f32;
    for token in tokens {
        let strength = match_strength(term, token);
        if strength > best {
            best = strength;
        }
        if best >= STRENGTH_EXACT {
            break;
        }
    }
    best
}

fn match_strength(term: &str, token: &str) -> f32 {
    if term == token {
        STRENGTH_EXACT
    } else if lemma(term) == lemma(token) {
        STRENGTH_LEMMA
    } else if within_edit_distance_one(term, token) {
        STRENGTH_FUZZY
    } else {
        0.0
    }
}

/// Crude suffix-stripping lemmatiser; deterministic and language-pack free.
fn lemma(word: &str) -> &str {
    for suffix in ["ing", "ies", "ed", "es", "s"] {
        if let Some(stripped) = word.strip_suffix(suffix) {
            if stripped.len() >= 3 {
                return stripped;
            }
        }
    }
    word
}

/// Edit distance ≤ 1 without building the full DP table.
fn within_edit_distance_one(a: &str, b: &str) -> bool {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let (short, long) = if a_chars.len() <= b_chars.len() {
        (&a_chars, &b_chars)
    } else {
        (&b_chars, &a_chars)
    };
    match long.len() - short.len() {
        0 => {
            let diffs = short.iter().zip(long.iter()).filter(|(x, y)| x != y).count();
            diffs <= 1
        }
        1 => {
            // One insertion: everything matches around a single skip.
            let mut i = 0;
            let mut j = 0;
            let mut skipped = false;
            while i < short.len() && j < long.len() {
                if short[i] == long[j] {
                    i += 1;
                    j += 1;
                } else if skipped {
                    return false;
                } else {
                    skipped = true;
                    j += 1;
                }
            }
            true
        }
        _ => false,
    }
}
