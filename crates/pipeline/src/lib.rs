//! Request orchestration
//!
//! The state machine that drives a question from caller identity to
//! answer envelope: filtering, analysis, parallel retrieval, fusion,
//! re-scoring, reranking, section reconstruction, packing, confidence,
//! guardrail, synthesis and citation extraction — with per-stage
//! deadlines, fallbacks and telemetry.

pub mod audit;
pub mod citations;
pub mod deadline;
pub mod metrics;
pub mod orchestrator;

pub use citations::extract_citations;
pub use deadline::Deadline;
pub use orchestrator::{AskRequest, EngineDeps, Orchestrator};
