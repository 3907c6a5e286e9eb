//! Section reconstruction
//!
//! Answers often live in structured sections (tables, enumerated lists)
//! that ingestion split across chunks. When a high-confidence candidate
//! sits inside such a section, its sibling parts are fetched and the
//! section reassembled into one virtual candidate that replaces the
//! scattered chunks downstream.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;

use ragline_config::{SectionMergeStrategy, TenantConfig};
use ragline_core::{
    Candidate, CandidateArena, Ranked, ReconstructedInfo, StructureType,
};

use crate::filter::AccessFilter;
use crate::store::{DocumentStore, ScoredPoint};

/// `.../part_3`, `.../row3`, `.../3` — the shapes ingestion emits for
/// multi-part sections.
static PART_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|/)(?:part[_-]?|row[_-]?|item[_-]?)?(\d+)$").unwrap());

/// Reconstruction tuning.
#[derive(Debug, Clone)]
pub struct SectionConfig {
    pub enabled: bool,
    pub min_trigger_confidence: f32,
    pub max_sections_per_query: usize,
    pub max_parts: usize,
    pub merge_strategy: SectionMergeStrategy,
    pub completion_timeout: Duration,
    /// Reconstructed sections below this completeness are discarded.
    pub min_completeness: f32,
}

impl SectionConfig {
    pub fn from_tenant(config: &TenantConfig) -> Self {
        Self {
            enabled: config.section_aware_enabled,
            min_trigger_confidence: config.section_min_trigger_confidence,
            max_sections_per_query: config.section_max_sections_per_query,
            max_parts: config.section_max_parts,
            merge_strategy: config.section_merge_strategy,
            completion_timeout: Duration::from_millis(config.section_completion_timeout),
            min_completeness: 0.3,
        }
    }
}

/// Stage result.
#[derive(Debug)]
pub struct SectionOutcome {
    pub ranked: Vec<Ranked>,
    /// Sections successfully reassembled.
    pub reconstructed: usize,
    /// True when the stage timed out and emitted the input unchanged.
    pub timed_out: bool,
}

pub struct SectionReconstructor {
    store: Arc<dyn DocumentStore>,
    config: SectionConfig,
}

impl SectionReconstructor {
    pub fn new(store: Arc<dyn DocumentStore>, config: SectionConfig) -> Self {
        Self { store, config }
    }

    /// Reassemble structured sections around the strongest candidates.
    /// On timeout the original ranking comes back unchanged.
    pub async fn reconstruct(
        &self,
        arena: &mut CandidateArena,
        ranked: &[Ranked],
        filter: &AccessFilter,
    ) -> SectionOutcome {
        if !self.config.enabled || ranked.is_empty() {
            return SectionOutcome {
                ranked: ranked.to_vec(),
                reconstructed: 0,
                timed_out: false,
            };
        }

        let triggers = self.find_triggers(arena, ranked);
        if triggers.is_empty() {
            return SectionOutcome {
                ranked: ranked.to_vec(),
                reconstructed: 0,
                timed_out: false,
            };
        }

        // Bounded fan-out over sections, all under the hard stage timeout.
        let fetches = triggers.iter().map(|trigger| {
            let store = Arc::clone(&self.store);
            let store_filter = filter.to_store();
            let doc_id = trigger.doc_id.clone();
            let prefix = trigger.prefix.clone();
            let max_parts = self.config.max_parts;
            async move {
                store
                    .fetch_siblings(&doc_id, &prefix, max_parts, &store_filter)
                    .await
            }
        });

        let fetched =
            match tokio::time::timeout(self.config.completion_timeout, join_all(fetches)).await {
                Ok(results) => results,
                Err(_) => {
                    tracing::warn!("section completion timed out; emitting original candidates");
                    return SectionOutcome {
                        ranked: ranked.to_vec(),
                        reconstructed: 0,
                        timed_out: true,
                    };
                }
            };

        let mut out = ranked.to_vec();
        let mut reconstructed = 0usize;

        for (trigger, siblings) in triggers.into_iter().zip(fetched) {
            let siblings = match siblings {
                Ok(parts) => parts,
                Err(e) => {
                    tracing::warn!(error = %e, section = %trigger.prefix, "sibling fetch failed; skipping section");
                    continue;
                }
            };

            // Defense in depth: every sibling re-passes the in-process filter.
            let siblings: Vec<ScoredPoint> = siblings
                .into_iter()
                .filter(|p| filter.allows(&p.payload))
                .collect();

            if let Some(section) = self.assemble(arena, &trigger, siblings) {
                out = self.merge_into_ranking(arena, out, section, &trigger);
                reconstructed += 1;
            }
        }

        SectionOutcome {
            ranked: out,
            reconstructed,
            timed_out: false,
        }
    }

    /// Candidates strong enough to pay for a sibling fetch, one per
    /// section prefix, best first.
    fn find_triggers(&self, arena: &CandidateArena, ranked: &[Ranked]) -> Vec<Trigger> {
        let mut seen_prefixes = HashSet::new();
        let mut triggers = Vec::new();

        for r in ranked {
            if triggers.len() >= self.config.max_sections_per_query {
                break;
            }
            let candidate = arena.get(r.idx);
            if candidate.is_reconstructed() || candidate.consumed {
                continue;
            }
            let confidence = candidate
                .scores
                .rerank
                .or(candidate.scores.domainless)
                .or(candidate.scores.fusion)
                .unwrap_or(r.score);
            if confidence < self.config.min_trigger_confidence {
                continue;
            }
            let Some(section_path) = candidate.payload.section_path.as_deref() else {
                continue;
            };
            let Some(prefix) = section_prefix(section_path) else {
                continue;
            };
            if !seen_prefixes.insert(prefix.clone()) {
                continue;
            }
            triggers.push(Trigger {
                ranked: *r,
                doc_id: candidate.payload.doc_id.clone(),
                prefix,
                score: r.score,
            });
        }
        triggers
    }

    /// Build the virtual candidate from fetched parts; `None` when the
    /// section is too incomplete to trust.
    fn assemble(
        &self,
        arena: &mut CandidateArena,
        trigger: &Trigger,
        siblings: Vec<ScoredPoint>,
    ) -> Option<Ranked> {
        if siblings.is_empty() {
            return None;
        }

        let mut parts: Vec<(usize, ScoredPoint)> = siblings
            .into_iter()
            .filter_map(|p| {
                let index = p
                    .payload
                    .section_path
                    .as_deref()
                    .and_then(part_index)?;
                Some((index, p))
            })
            .collect();
        parts.sort_by_key(|(index, _)| *index);
        parts.dedup_by_key(|(index, _)| *index);
        parts.truncate(self.config.max_parts);

        if parts.is_empty() {
            return None;
        }

        let expected = parts.iter().map(|(i, _)| i + 1).max().unwrap_or(1);
        let completeness = parts.len() as f32 / expected as f32;
        if completeness < self.config.min_completeness {
            tracing::debug!(
                section = %trigger.prefix,
                completeness,
                "section too incomplete; keeping original chunks"
            );
            return None;
        }

        let structure = detect_structure(&parts);
        let merged = merge_content(structure, &parts);

        let original_chunk_ids: Vec<String> =
            parts.iter().map(|(_, p)| p.id.clone()).collect();

        // The virtual candidate inherits the trigger chunk's payload and
        // scores; its section path is the common prefix.
        let trigger_candidate = arena.get(trigger.ranked.idx).clone();
        let mut payload = trigger_candidate.payload.clone();
        payload.section_path = Some(trigger.prefix.clone());

        let section_id = format!("section::{}::{}", trigger.doc_id, trigger.prefix);
        let mut virtual_candidate = Candidate::new(section_id, merged, payload);
        virtual_candidate.scores = trigger_candidate.scores;
        virtual_candidate.section = Some(ReconstructedInfo {
            section_path: trigger.prefix.clone(),
            structure_type: structure,
            original_chunk_ids: original_chunk_ids.clone(),
            completeness,
        });

        let idx = arena.insert(virtual_candidate);

        // The section absorbs the identity of its constituents.
        for chunk_id in &original_chunk_ids {
            if let Some(chunk_idx) = arena.idx_of(chunk_id) {
                arena.get_mut(chunk_idx).consumed = true;
            }
        }
        arena.get_mut(trigger.ranked.idx).consumed = true;

        Some(Ranked::new(idx, trigger.score))
    }

    /// Apply the merge policy, always dropping consumed chunks.
    fn merge_into_ranking(
        &self,
        arena: &CandidateArena,
        ranked: Vec<Ranked>,
        section: Ranked,
        trigger: &Trigger,
    ) -> Vec<Ranked> {
        let trigger_pos = ranked.iter().position(|r| r.idx == trigger.ranked.idx);
        let mut out: Vec<Ranked> = ranked
            .into_iter()
            .filter(|r| !arena.get(r.idx).consumed)
            .collect();

        match self.config.merge_strategy {
            SectionMergeStrategy::Replace => {
                let pos = trigger_pos.unwrap_or(out.len()).min(out.len());
                out.insert(pos, section);
            }
            SectionMergeStrategy::Append => {
                out.push(section);
            }
            SectionMergeStrategy::Interleave => {
                out.push(section);
                out.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(Ordering::Equal)
                        .then_with(|| arena.get(a.idx).id.cmp(&arena.get(b.idx).id))
                });
            }
        }
        out
    }
}

struct Trigger {
    ranked: Ranked,
    doc_id: String,
    prefix: String,
    score: f32,
}

/// Parent prefix of a part path: `block_9/part_3` → `block_9`.
fn section_prefix(section_path: &str) -> Option<String> {
    if !PART_SUFFIX.is_match(section_path) {
        return None;
    }
    section_path
        .rsplit_once('/')
        .map(|(prefix, _)| prefix.to_string())
}

/// Ordinal of a part path, e.g. `block_9/part_3` → 3.
fn part_index(section_path: &str) -> Option<usize> {
    PART_SUFFIX
        .captures(section_path)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Structure detection over the assembled parts' contents.
fn detect_structure(parts: &[(usize, ScoredPoint)]) -> StructureType {
    let table_rows = parts
        .iter()
        .filter(|(_, p)| p.content.contains('|') || p.content.contains('\t'))
        .count();
    if table_rows * 2 > parts.len() {
        return StructureType::Table;
    }

    static LIST_LINE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?m)^\s*(?:[-*•]|\d+[.)])\s+").unwrap());
    let list_parts = parts
        .iter()
        .filter(|(_, p)| LIST_LINE.is_match(&p.content))
        .count();
    if list_parts * 2 > parts.len() {
        return StructureType::List;
    }

    let nested = parts.iter().any(|(_, p)| {
        p.payload
            .section_path
            .as_deref()
            .is_some_and(|path| path.matches('/').count() >= 2)
            || p.payload.headers.len() >= 2
    });
    if nested {
        return StructureType::Hierarchy;
    }

    StructureType::Sequence
}

/// Structure-aware merge of ordered parts.
fn merge_content(structure: StructureType, parts: &[(usize, ScoredPoint)]) -> String {
    match structure {
        StructureType::Table => {
            // Keep the first part's header block; later parts contribute
            // only rows not already present.
            let mut lines: Vec<String> = Vec::new();
            for (part_pos, (_, part)) in parts.iter().enumerate() {
                for line in part.content.lines() {
                    let trimmed = line.trim_end();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if part_pos > 0 && lines.iter().any(|l| l == trimmed) {
                        continue;
                    }
                    lines.push(trimmed.to_string());
                }
            }
            lines.join("\n")
        }
        StructureType::Hierarchy => {
            // Preserve nesting by prefixing each part with its heading trail.
            parts
                .iter()
                .map(|(_, p)| {
                    if p.payload.headers.is_empty() {
                        p.content.trim().to_string()
                    } else {
                        format!("{}\n{}", p.payload.headers.join(" > "), p.content.trim())
                    }
                })
                .collect::<Vec<_>>()
                .join("\n\n")
        }
        // Lists keep ordinal order; unknown shapes concatenate in part
        // order, which is already sorted.
        StructureType::List | StructureType::Sequence => parts
            .iter()
            .map(|(_, p)| p.content.trim())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryDoc, MemoryStore};
    use ragline_core::{CallerContext, Payload};

    fn payload(section: &str) -> Payload {
        Payload {
            tenant: "tenantA".into(),
            acl: vec!["g.readers".into()],
            lang: "en".into(),
            doc_id: "doc-skills".into(),
            section_path: Some(section.into()),
            ..Default::default()
        }
    }

    fn filter() -> AccessFilter {
        let caller = CallerContext {
            user_id: "u1".into(),
            tenant_id: "tenantA".into(),
            group_ids: vec!["g.readers".into()],
            languages: vec!["en".into()],
        };
        AccessFilter::from_caller(&caller, None).unwrap()
    }

    fn seeded_store(parts: usize) -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        let tiers = ["Novice", "Apprentice", "Adept", "Expert", "Master", "Grandmaster", "Mythic"];
        for part in 0..parts {
            store.insert(MemoryDoc {
                id: format!("chunk-{part}"),
                content: format!("| {} | tier {} |", tiers[part % tiers.len()], part),
                vector: vec![0.0, 1.0],
                payload: payload(&format!("block_9/part_{part}")),
            });
        }
        Arc::new(store)
    }

    fn config() -> SectionConfig {
        SectionConfig::from_tenant(&TenantConfig::default())
    }

    fn seed_trigger(arena: &mut CandidateArena, score: f32) -> Ranked {
        let idx = arena.insert(Candidate::new(
            "chunk-0",
            "| Novice | tier 0 |",
            payload("block_9/part_0"),
        ));
        arena.get_mut(idx).scores.rerank = Some(score);
        arena.get_mut(idx).scores.final_score = score;
        Ranked::new(idx, score)
    }

    #[test]
    fn test_part_index_and_prefix() {
        assert_eq!(part_index("block_9/part_3"), Some(3));
        assert_eq!(part_index("block_9/row_12"), Some(12));
        assert_eq!(part_index("chapter/intro"), None);
        assert_eq!(section_prefix("block_9/part_3"), Some("block_9".into()));
        assert_eq!(section_prefix("freeform"), None);
    }

    #[tokio::test]
    async fn test_reconstructs_complete_table_section() {
        let store = seeded_store(7);
        let reconstructor = SectionReconstructor::new(store, config());
        let mut arena = CandidateArena::new();
        let trigger = seed_trigger(&mut arena, 0.9);

        let outcome = reconstructor
            .reconstruct(&mut arena, &[trigger], &filter())
            .await;

        assert_eq!(outcome.reconstructed, 1);
        assert!(!outcome.timed_out);
        assert_eq!(outcome.ranked.len(), 1);

        let section = arena.get(outcome.ranked[0].idx);
        assert!(section.is_reconstructed());
        let info = section.section.as_ref().unwrap();
        assert_eq!(info.structure_type, StructureType::Table);
        assert!((info.completeness - 1.0).abs() < f32::EPSILON);
        assert_eq!(info.original_chunk_ids.len(), 7);
        assert!(section.content.contains("Mythic"));

        // Constituents are consumed and gone from the ranking.
        let trigger_candidate = arena.get(trigger.idx);
        assert!(trigger_candidate.consumed);
    }

    #[tokio::test]
    async fn test_below_trigger_confidence_is_untouched() {
        let store = seeded_store(7);
        let reconstructor = SectionReconstructor::new(store, config());
        let mut arena = CandidateArena::new();
        let trigger = seed_trigger(&mut arena, 0.2);

        let outcome = reconstructor
            .reconstruct(&mut arena, &[trigger], &filter())
            .await;
        assert_eq!(outcome.reconstructed, 0);
        assert_eq!(outcome.ranked, vec![trigger]);
    }

    #[tokio::test]
    async fn test_disabled_is_noop() {
        let store = seeded_store(7);
        let mut cfg = config();
        cfg.enabled = false;
        let reconstructor = SectionReconstructor::new(store, cfg);
        let mut arena = CandidateArena::new();
        let trigger = seed_trigger(&mut arena, 0.9);

        let outcome = reconstructor
            .reconstruct(&mut arena, &[trigger], &filter())
            .await;
        assert_eq!(outcome.reconstructed, 0);
        assert_eq!(outcome.ranked, vec![trigger]);
    }

    #[tokio::test]
    async fn test_incomplete_section_rejected() {
        // Parts 0 and 9 exist: completeness 2/10 = 0.2 < 0.3.
        let store = MemoryStore::new();
        for part in [0usize, 9] {
            store.insert(MemoryDoc {
                id: format!("chunk-{part}"),
                content: format!("| row {part} |"),
                vector: vec![0.0],
                payload: payload(&format!("block_9/part_{part}")),
            });
        }
        let reconstructor = SectionReconstructor::new(Arc::new(store), config());
        let mut arena = CandidateArena::new();
        let trigger = seed_trigger(&mut arena, 0.9);

        let outcome = reconstructor
            .reconstruct(&mut arena, &[trigger], &filter())
            .await;
        assert_eq!(outcome.reconstructed, 0);
    }

    #[test]
    fn test_detect_structure_list() {
        let parts: Vec<(usize, ScoredPoint)> = (0..3)
            .map(|i| {
                (
                    i,
                    ScoredPoint {
                        id: format!("p{i}"),
                        score: 0.0,
                        content: format!("- item {i}"),
                        payload: payload(&format!("sec/part_{i}")),
                    },
                )
            })
            .collect();
        assert_eq!(detect_structure(&parts), StructureType::List);
    }
}
