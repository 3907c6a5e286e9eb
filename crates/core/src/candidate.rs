//! Candidates and the per-request arena
//!
//! Stages never exchange candidate values; they exchange `Ranked` index
//! lists into a request-scoped `CandidateArena`. This keeps sharing between
//! stage outputs, stage signals and reconstructed sections cycle-free.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::section::ReconstructedInfo;

/// Index of a candidate inside its request arena.
pub type CandidateIdx = usize;

/// Store payload carried by every chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    /// Owning tenant. Checked against the caller on every entry path.
    pub tenant: String,
    /// Principals allowed to read the document.
    #[serde(default)]
    pub acl: Vec<String>,
    /// Document language.
    #[serde(default)]
    pub lang: String,
    /// Logical document id (several chunks share one).
    pub doc_id: String,
    /// Hierarchical section path, e.g. `block_9/part_3`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_path: Option<String>,
    /// Heading trail from the document root down to this chunk.
    #[serde(default)]
    pub headers: Vec<String>,
    /// Source URL, when the document has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Document timestamp, seconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Custom metadata.
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl Payload {
    /// Best-effort document title: explicit metadata first, then the
    /// outermost header.
    pub fn title(&self) -> Option<&str> {
        self.extra
            .get("title")
            .map(String::as_str)
            .or_else(|| self.headers.first().map(String::as_str))
    }
}

/// Scores a candidate accumulates as it passes through stages.
///
/// Earlier scores are retained for telemetry and the confidence model.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageScores {
    pub vector: Option<f32>,
    pub keyword: Option<f32>,
    pub fusion: Option<f32>,
    pub domainless: Option<f32>,
    pub rerank: Option<f32>,
    /// The score the current stage ranks by.
    pub final_score: f32,
}

/// The unit of retrieval.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Unique across the store.
    pub id: String,
    /// Chunk text.
    pub content: String,
    pub payload: Payload,
    pub scores: StageScores,
    /// Rank in the original vector result list (fusion tie-break).
    pub vector_rank: Option<usize>,
    /// Rank in the original keyword result list.
    pub keyword_rank: Option<usize>,
    /// Set when this chunk was absorbed into a reconstructed section; a
    /// consumed chunk must not reappear in later stages.
    pub consumed: bool,
    /// Present on virtual candidates produced by section reconstruction.
    pub section: Option<ReconstructedInfo>,
}

impl Candidate {
    pub fn new(id: impl Into<String>, content: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            payload,
            scores: StageScores::default(),
            vector_rank: None,
            keyword_rank: None,
            consumed: false,
            section: None,
        }
    }

    pub fn is_reconstructed(&self) -> bool {
        self.section.is_some()
    }
}

/// A scored reference into the arena; what stages pass to each other.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ranked {
    pub idx: CandidateIdx,
    pub score: f32,
}

impl Ranked {
    pub fn new(idx: CandidateIdx, score: f32) -> Self {
        Self { idx, score }
    }
}

/// Request-scoped candidate storage, indexed by chunk id.
#[derive(Debug, Default)]
pub struct CandidateArena {
    items: Vec<Candidate>,
    by_id: HashMap<String, CandidateIdx>,
}

impl CandidateArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a candidate, returning its index. A candidate with an id
    /// already present is not inserted twice; the existing index comes
    /// back and the caller merges scores onto it.
    pub fn insert(&mut self, candidate: Candidate) -> CandidateIdx {
        if let Some(&idx) = self.by_id.get(&candidate.id) {
            return idx;
        }
        let idx = self.items.len();
        self.by_id.insert(candidate.id.clone(), idx);
        self.items.push(candidate);
        idx
    }

    pub fn get(&self, idx: CandidateIdx) -> &Candidate {
        &self.items[idx]
    }

    pub fn get_mut(&mut self, idx: CandidateIdx) -> &mut Candidate {
        &mut self.items[idx]
    }

    pub fn idx_of(&self, id: &str) -> Option<CandidateIdx> {
        self.by_id.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.items.iter()
    }
}
