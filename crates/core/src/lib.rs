//! Core types for the ragline query engine
//!
//! This crate provides the foundational types shared by all other crates:
//! - Caller identity and per-request query types
//! - The candidate arena that stages exchange index lists over
//! - Stage signals and tagged stage outcomes for the confidence model
//! - Reconstructed sections, citations and the response envelope
//! - The request-level error taxonomy

pub mod candidate;
pub mod caller;
pub mod citation;
pub mod envelope;
pub mod error;
pub mod query;
pub mod section;
pub mod signal;
pub mod tokens;

pub use caller::CallerContext;
pub use candidate::{Candidate, CandidateArena, CandidateIdx, Payload, Ranked, StageScores};
pub use citation::{Citation, Freshness, FreshnessInfo};
pub use envelope::{
    AnswerEnvelope, Decision, GuardrailReport, IdkReason, IdkResponse, RetrievedChunk, StageMetric,
    StageMetrics,
};
pub use error::{Error, Result};
pub use query::{Query, QueryOverrides};
pub use section::{ReconstructedInfo, StructureType};
pub use signal::{DegradeReason, DegradationAlert, Severity, Stage, StageOutcome, StageSignal};
pub use tokens::estimate_tokens;
