//! Pipeline orchestrator
//!
//! Drives one request through the staged state machine:
//! filter → analyze → embed → (vector ∥ keyword) → fuse → keyword-rescore
//! → rerank → reconstruct → pack → score → guard → synthesize → cite.
//!
//! The orchestrator owns the request deadline and all fallback policy:
//! soft failures degrade and continue, hard failures abort with one
//! structured error, and no stage ever runs past the remaining budget.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ragline_config::{FusionStrategyName, TenantConfig, TenantRegistry};
use ragline_core::{
    AnswerEnvelope, CallerContext, CandidateArena, Error, Query, Ranked, Result, RetrievedChunk,
    Stage, StageMetric, StageMetrics,
};
use ragline_llm::{ContextChunk, Synthesizer, SynthesizerConfig};
use ragline_retrieval::{
    fuse, rerank_stage, AccessFilter, ConfidenceConfig, ConfidenceModel, ContextPacker,
    CorpusStatsHandle, DocumentStore, DomainlessReranker, Embedder, FusionParams, Guardrail,
    PackedContext, PackerConfig, QueryAnalysis, QueryAnalyzer, QueryIntent, Reranker,
    ScoredPoint, SectionConfig, SectionReconstructor,
};

use crate::audit::{audit_decision, audit_security_event};
use crate::citations::{extract_citations, CitationSource};
use crate::deadline::Deadline;
use crate::metrics as stage_metrics;

/// Candidates requested from each search arm.
const SEARCH_TOP_K: usize = 20;
/// Search-arm depth when the domain-less reranker needs headroom.
const DOMAINLESS_SEARCH_TOP_K: usize = 50;
/// Candidates handed to the cross-encoder.
const RERANK_INPUT_K: usize = 20;

/// Everything the orchestrator composes.
pub struct EngineDeps {
    pub store: Arc<dyn DocumentStore>,
    pub embedder: Arc<dyn Embedder>,
    pub reranker: Arc<dyn Reranker>,
    pub synthesizer: Arc<Synthesizer>,
    pub stats: CorpusStatsHandle,
    pub tenants: Arc<TenantRegistry>,
    /// HNSW ef override pushed down on k-NN searches.
    pub ef_search: Option<u64>,
    /// Stream tokens from the LLM (still consolidated before return).
    pub llm_stream: bool,
}

/// One `/ask` invocation.
#[derive(Debug, Clone)]
pub struct AskRequest {
    pub caller: CallerContext,
    pub query: Query,
}

pub struct Orchestrator {
    deps: EngineDeps,
}

impl Orchestrator {
    pub fn new(deps: EngineDeps) -> Self {
        Self { deps }
    }

    /// Run the full pipeline for one request.
    pub async fn ask(&self, request: AskRequest) -> Result<AnswerEnvelope> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        let result = self.ask_inner(&request, &request_id).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(envelope) if envelope.is_refusal() => {
                stage_metrics::record_request("refused", elapsed_ms)
            }
            Ok(_) => stage_metrics::record_request("answered", elapsed_ms),
            Err(e) => {
                if e.is_security_event() {
                    audit_security_event(&request_id, &request.caller, &e.to_string());
                }
                stage_metrics::record_request(e.code(), elapsed_ms)
            }
        }
        result
    }

    async fn ask_inner(&self, request: &AskRequest, request_id: &str) -> Result<AnswerEnvelope> {
        request.query.validate()?;

        // Identity filter: push-down and in-process forms from one source.
        let filter = AccessFilter::from_caller(&request.caller, request.query.overrides.as_ref())?;

        let tenant_cfg = self.deps.tenants.get(&request.caller.tenant_id);
        let stats = self.deps.stats.snapshot();
        let deadline = Deadline::new(Duration::from_millis(tenant_cfg.overall_timeout));

        let mut metrics = StageMetrics::new();
        let mut confidence = ConfidenceModel::new(ConfidenceConfig::default());

        // Query analysis is pure CPU and fast; no timeout needed.
        let stage_start = Instant::now();
        let analysis =
            QueryAnalyzer::new().analyze(&request.query.text, &request.caller.languages, &stats);
        record_metric(&mut metrics, "analyze", stage_start, analysis.keyphrases.len(), false, None);
        tracing::debug!(
            request_id,
            intent = ?analysis.intent,
            keyphrases = analysis.keyphrases.len(),
            "query analyzed"
        );

        // Embedding; fatal on failure.
        let stage_start = Instant::now();
        let embed_timeout =
            deadline.stage_timeout(Duration::from_millis(tenant_cfg.embedding_timeout));
        let query_vector = match tokio::time::timeout(
            embed_timeout,
            self.deps.embedder.embed(std::slice::from_ref(&request.query.text)),
        )
        .await
        {
            Ok(Ok(mut vectors)) if !vectors.is_empty() => vectors.remove(0),
            Ok(Ok(_)) => return Err(Error::EmbeddingUnavailable("empty response".into())),
            Ok(Err(e)) => return Err(Error::EmbeddingUnavailable(e.to_string())),
            Err(_) => return Err(Error::EmbeddingUnavailable("request timed out".into())),
        };
        record_metric(&mut metrics, "embedding", stage_start, 1, false, None);

        // Vector and keyword search run in parallel under their own timeouts.
        let search_top_k = if tenant_cfg.kw_points_enabled {
            DOMAINLESS_SEARCH_TOP_K
        } else {
            SEARCH_TOP_K
        };
        let store_filter = filter.to_store();
        let terms = analysis.search_terms();

        let stage_start = Instant::now();
        let vector_fut = tokio::time::timeout(
            deadline.stage_timeout(Duration::from_millis(tenant_cfg.vector_search_timeout)),
            self.deps
                .store
                .knn_search(&query_vector, search_top_k, &store_filter, self.deps.ef_search),
        );
        let keyword_fut = tokio::time::timeout(
            deadline.stage_timeout(Duration::from_millis(tenant_cfg.keyword_search_timeout)),
            self.deps.store.text_search(&terms, search_top_k, &store_filter),
        );
        let (vector_result, keyword_result) = tokio::join!(vector_fut, keyword_fut);

        let vector_points = flatten_search("vector", vector_result);
        let keyword_points = flatten_search("keyword", keyword_result);
        if vector_points.is_none() && keyword_points.is_none() {
            return Err(Error::RetrievalUnavailable(
                "both vector and keyword search failed".into(),
            ));
        }

        let mut arena = CandidateArena::new();
        let vector_ranked = self.admit_arm(
            &mut arena,
            vector_points,
            &filter,
            request,
            request_id,
            ArmKind::Vector,
            &mut confidence,
            &mut metrics,
            stage_start,
        );
        let keyword_ranked = self.admit_arm(
            &mut arena,
            keyword_points,
            &filter,
            request,
            request_id,
            ArmKind::Keyword,
            &mut confidence,
            &mut metrics,
            stage_start,
        );

        // Fusion. Never network-bound; an error here is a bug.
        let stage_start = Instant::now();
        let params = FusionParams {
            strategy: resolve_strategy(&tenant_cfg, request.query.overrides.as_ref())?,
            vector_weight: resolve_vector_weight(&tenant_cfg, &analysis, request.query.overrides.as_ref()),
            keyword_weight: resolve_keyword_weight(&tenant_cfg, &analysis, request.query.overrides.as_ref()),
            k_param: tenant_cfg.fusion_k_param as f32,
            dedup_by_doc: !tenant_cfg.section_aware_enabled,
        };
        let fusion_outcome = fuse(&mut arena, &vector_ranked, &keyword_ranked, &params);
        let mut ranked = fusion_outcome.ranked;
        let fusion_scores: Vec<f32> = ranked.iter().map(|r| r.score).collect();
        let signal = confidence.record(Stage::Fusion, &fusion_scores);
        record_metric(
            &mut metrics,
            "fusion",
            stage_start,
            ranked.len(),
            false,
            Some(signal.top),
        );

        // Domain-less keyword re-scoring; feature-flagged no-op.
        let domainless = DomainlessReranker::from_tenant(&tenant_cfg);
        if domainless.is_enabled() {
            let stage_start = Instant::now();
            ranked = domainless.rescore(&mut arena, &ranked, &analysis, &stats);
            let scores: Vec<f32> = ranked.iter().map(|r| r.score).collect();
            let signal = confidence.record(Stage::Domainless, &scores);
            record_metric(
                &mut metrics,
                "domainless",
                stage_start,
                ranked.len(),
                false,
                Some(signal.top),
            );
        }

        // Cross-encoder rerank; falls back to the fusion ordering.
        let final_k = request.query.k;
        if tenant_cfg.reranker_enabled {
            let stage_start = Instant::now();
            let rerank_timeout =
                deadline.stage_timeout(Duration::from_millis(tenant_cfg.reranker_timeout));
            let reranked = tokio::time::timeout(
                rerank_timeout,
                rerank_stage(
                    self.deps.reranker.as_ref(),
                    &request.query.text,
                    &mut arena,
                    &ranked,
                    RERANK_INPUT_K,
                    final_k,
                ),
            )
            .await;

            let failure = match reranked {
                Ok(Ok(rescored)) => {
                    let scores: Vec<f32> = rescored.iter().map(|r| r.score).collect();
                    let signal = confidence.record(Stage::Rerank, &scores);
                    record_metric(
                        &mut metrics,
                        "rerank",
                        stage_start,
                        rescored.len(),
                        false,
                        Some(signal.top),
                    );
                    ranked = rescored;
                    None
                }
                Ok(Err(e)) if !tenant_cfg.reranker_fallback_enabled => {
                    return Err(Error::RetrievalUnavailable(format!(
                        "rerank failed with fallback disabled: {e}"
                    )));
                }
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("timed out".to_string()),
            };
            if let Some(reason) = failure {
                tracing::warn!(request_id, reason, "rerank degraded; using fusion order");
                confidence.record_degraded(Stage::Rerank);
                record_metric(&mut metrics, "rerank", stage_start, 0, true, None);
                ranked.truncate(final_k);
            }
        } else {
            ranked.truncate(final_k);
        }

        // Section reconstruction; skip on timeout.
        let stage_start = Instant::now();
        let mut section_config = SectionConfig::from_tenant(&tenant_cfg);
        section_config.completion_timeout =
            deadline.stage_timeout(section_config.completion_timeout);
        let reconstructor =
            SectionReconstructor::new(Arc::clone(&self.deps.store), section_config);
        let section_outcome = reconstructor.reconstruct(&mut arena, &ranked, &filter).await;
        record_metric(
            &mut metrics,
            "section",
            stage_start,
            section_outcome.reconstructed,
            section_outcome.timed_out,
            None,
        );
        ranked = section_outcome.ranked;

        // Token-budgeted context packing.
        let stage_start = Instant::now();
        let packer = ContextPacker::new(PackerConfig::from_tenant(&tenant_cfg));
        let packed = packer.pack(&mut arena, &ranked);
        record_metric(
            &mut metrics,
            "packing",
            stage_start,
            packed.selected.len(),
            false,
            None,
        );

        // Defense in depth at the guardrail boundary (tenant + ACL re-check).
        for r in &packed.selected {
            let candidate = arena.get(r.idx);
            filter.verify_candidate(&candidate.payload, &candidate.id)?;
        }

        // Final confidence.
        let report = confidence.finalize();
        for alert in &report.alerts {
            tracing::warn!(
                request_id,
                stage = alert.stage.name(),
                previous = alert.previous,
                current = alert.current,
                severity = ?alert.severity,
                "stage degraded upstream quality"
            );
            stage_metrics::record_degradation_alert(alert.stage.name());
        }

        // Answerability guardrail.
        let guardrail = Guardrail::from_tenant(
            &tenant_cfg,
            request.query.overrides.as_ref().and_then(|o| o.guardrail_threshold),
        );
        let packed_scores: Vec<f32> = packed
            .selected
            .iter()
            .map(|r| arena.get(r.idx).scores.final_score)
            .collect();
        let outcome = guardrail.evaluate(report.confidence, &packed_scores);

        if tenant_cfg.guardrail_audit_enabled {
            audit_decision(
                "/ask",
                request_id,
                &request.caller,
                &request.query.text,
                &outcome.report,
            );
        }

        let retrieved = retrieved_view(&arena, &packed);

        if let Some(idk) = outcome.idk {
            stage_metrics::record_decision("refused", idk.reason_code.as_str().into());
            return Ok(AnswerEnvelope {
                answer: None,
                idk: Some(idk),
                citations: Vec::new(),
                retrieved,
                guardrail: outcome.report,
                stage_metrics: metrics,
                request_id: request_id.to_string(),
            });
        }
        stage_metrics::record_decision("answerable", None);

        // Synthesis. The deadline owns this stage too: running out of
        // budget here is a hard 408, never a partial answer.
        if deadline.exceeded() {
            return Err(Error::DeadlineExceeded { stage: "synthesis" });
        }
        let stage_start = Instant::now();
        let synth_config = SynthesizerConfig::from_tenant(&tenant_cfg, self.deps.llm_stream);
        let context_chunks: Vec<ContextChunk> = packed
            .selected
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let candidate = arena.get(r.idx);
                ContextChunk {
                    number: i + 1,
                    doc_id: candidate.payload.doc_id.clone(),
                    content: candidate.content.clone(),
                }
            })
            .collect();
        let tenant_prompt = tenant_cfg
            .resolve_system_prompt(&request.caller.languages)
            .map(String::from);

        let synth_timeout = deadline.stage_timeout(synth_config.timeout);
        let deadline_bound = synth_timeout < synth_config.timeout;
        let chat = self
            .deps
            .synthesizer
            .synthesize(
                &synth_config,
                tenant_prompt,
                &context_chunks,
                &request.query.text,
                synth_timeout,
            )
            .await
            .map_err(|e| {
                // A timeout caused by the request budget is a deadline
                // failure, not a provider failure.
                if matches!(e, ragline_llm::LlmError::Timeout)
                    && (deadline_bound || deadline.exceeded())
                {
                    Error::DeadlineExceeded { stage: "synthesis" }
                } else {
                    Error::SynthesisUnavailable(e.to_string())
                }
            })?;
        record_metric(&mut metrics, "synthesis", stage_start, chat.tokens, false, None);

        // Citation extraction over the packed context.
        let stage_start = Instant::now();
        let sources: Vec<CitationSource> = packed
            .selected
            .iter()
            .zip(&retrieved)
            .map(|(r, chunk)| {
                let candidate = arena.get(r.idx);
                CitationSource {
                    chunk: chunk.clone(),
                    source_url: candidate.payload.url.clone(),
                    timestamp: candidate.payload.timestamp,
                }
            })
            .collect();
        let extracted = extract_citations(&chat.text, &sources, chrono::Utc::now());
        record_metric(
            &mut metrics,
            "citations",
            stage_start,
            extracted.citations.len(),
            false,
            None,
        );

        Ok(AnswerEnvelope {
            answer: Some(extracted.answer),
            idk: None,
            citations: extracted.citations,
            retrieved,
            guardrail: outcome.report,
            stage_metrics: metrics,
            request_id: request_id.to_string(),
        })
    }

    /// Admit one search arm's points into the arena, enforcing the tenant
    /// invariant. A cross-tenant point voids the whole arm and raises a
    /// security event; the request continues on the other arm.
    #[allow(clippy::too_many_arguments)]
    fn admit_arm(
        &self,
        arena: &mut CandidateArena,
        points: Option<Vec<ScoredPoint>>,
        filter: &AccessFilter,
        request: &AskRequest,
        request_id: &str,
        kind: ArmKind,
        confidence: &mut ConfidenceModel,
        metrics: &mut StageMetrics,
        stage_start: Instant,
    ) -> Vec<Ranked> {
        let stage = kind.stage();
        let Some(points) = points else {
            confidence.record_degraded(stage);
            record_metric(metrics, stage.name(), stage_start, 0, true, None);
            return Vec::new();
        };

        let leak = points
            .iter()
            .find(|p| p.payload.tenant != filter.tenant());
        if let Some(leaked) = leak {
            audit_security_event(
                request_id,
                &request.caller,
                &format!(
                    "{} search returned chunk {} from tenant {}",
                    stage.name(),
                    leaked.id,
                    leaked.payload.tenant
                ),
            );
            tracing::error!(
                request_id,
                arm = stage.name(),
                "cross-tenant leak detected; discarding entire result set"
            );
            confidence.record_degraded(stage);
            record_metric(metrics, stage.name(), stage_start, 0, true, None);
            return Vec::new();
        }

        let mut ranked = Vec::with_capacity(points.len());
        let mut scores = Vec::with_capacity(points.len());
        for point in points {
            // ACL and language re-check; the push-down filter should have
            // handled this, so a mismatch is only dropped and logged.
            if !filter.allows(&point.payload) {
                tracing::warn!(request_id, chunk = %point.id, "candidate failed in-process filter re-check");
                continue;
            }
            let mut candidate =
                ragline_core::Candidate::new(point.id, point.content, point.payload);
            match kind {
                ArmKind::Vector => candidate.scores.vector = Some(point.score),
                ArmKind::Keyword => candidate.scores.keyword = Some(point.score),
            }
            candidate.scores.final_score = point.score;
            let idx = arena.insert(candidate);
            // A chunk surfacing in both arms keeps both stage scores.
            match kind {
                ArmKind::Vector => arena.get_mut(idx).scores.vector = Some(point.score),
                ArmKind::Keyword => arena.get_mut(idx).scores.keyword = Some(point.score),
            }
            scores.push(point.score);
            ranked.push(Ranked::new(idx, point.score));
        }

        let signal = confidence.record(stage, &scores);
        record_metric(
            metrics,
            stage.name(),
            stage_start,
            ranked.len(),
            false,
            Some(signal.top),
        );
        ranked
    }
}

#[derive(Debug, Clone, Copy)]
enum ArmKind {
    Vector,
    Keyword,
}

impl ArmKind {
    fn stage(&self) -> Stage {
        match self {
            ArmKind::Vector => Stage::Vector,
            ArmKind::Keyword => Stage::Keyword,
        }
    }
}

fn flatten_search(
    arm: &'static str,
    result: std::result::Result<
        std::result::Result<Vec<ScoredPoint>, ragline_retrieval::StoreError>,
        tokio::time::error::Elapsed,
    >,
) -> Option<Vec<ScoredPoint>> {
    match result {
        Ok(Ok(points)) => Some(points),
        Ok(Err(e)) => {
            tracing::warn!(arm, error = %e, "search arm failed; continuing degraded");
            None
        }
        Err(_) => {
            tracing::warn!(arm, "search arm timed out; continuing degraded");
            None
        }
    }
}

fn resolve_strategy(
    tenant: &TenantConfig,
    overrides: Option<&ragline_core::QueryOverrides>,
) -> Result<FusionStrategyName> {
    match overrides.and_then(|o| o.fusion_strategy.as_deref()) {
        Some(name) => name
            .parse()
            .map_err(|e: ragline_config::ConfigError| Error::InvalidRequest(e.to_string())),
        None => Ok(tenant.fusion_strategy),
    }
}

/// Weight precedence: per-query override, then the analyzer's intent
/// choice, with the tenant defaults backing the analyzer's fall-through
/// (exploratory) class.
fn resolve_vector_weight(
    tenant: &TenantConfig,
    analysis: &QueryAnalysis,
    overrides: Option<&ragline_core::QueryOverrides>,
) -> f32 {
    if let Some(weight) = overrides.and_then(|o| o.vector_weight) {
        return weight;
    }
    if analysis.intent == QueryIntent::Exploratory {
        return tenant.hybrid_vector_weight;
    }
    analysis.vector_weight
}

fn resolve_keyword_weight(
    tenant: &TenantConfig,
    analysis: &QueryAnalysis,
    overrides: Option<&ragline_core::QueryOverrides>,
) -> f32 {
    if let Some(weight) = overrides.and_then(|o| o.keyword_weight) {
        return weight;
    }
    if analysis.intent == QueryIntent::Exploratory {
        return tenant.hybrid_keyword_weight;
    }
    analysis.keyword_weight
}

fn retrieved_view(arena: &CandidateArena, packed: &PackedContext) -> Vec<RetrievedChunk> {
    packed
        .selected
        .iter()
        .map(|r| {
            let candidate = arena.get(r.idx);
            RetrievedChunk {
                id: candidate.id.clone(),
                doc_id: candidate.payload.doc_id.clone(),
                content: candidate.content.clone(),
                score: candidate.scores.final_score,
                section_path: candidate.payload.section_path.clone(),
                completeness: candidate.section.as_ref().map(|s| s.completeness),
            }
        })
        .collect()
}

fn record_metric(
    metrics: &mut StageMetrics,
    stage: &'static str,
    started: Instant,
    count: usize,
    degraded: bool,
    top_score: Option<f32>,
) {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    metrics.insert(
        stage.to_string(),
        StageMetric {
            elapsed_ms,
            count,
            degraded,
            top_score,
        },
    );
    stage_metrics::record_stage(stage, elapsed_ms, count, degraded);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_strategy_override_wins() {
        let tenant = TenantConfig::default();
        let overrides = ragline_core::QueryOverrides {
            fusion_strategy: Some("borda_rank".into()),
            ..Default::default()
        };
        assert_eq!(
            resolve_strategy(&tenant, Some(&overrides)).unwrap(),
            FusionStrategyName::BordaRank
        );
        assert_eq!(
            resolve_strategy(&tenant, None).unwrap(),
            FusionStrategyName::WeightedAverage
        );
    }

    #[test]
    fn test_resolve_strategy_rejects_unknown() {
        let overrides = ragline_core::QueryOverrides {
            fusion_strategy: Some("nonsense".into()),
            ..Default::default()
        };
        assert!(matches!(
            resolve_strategy(&TenantConfig::default(), Some(&overrides)),
            Err(Error::InvalidRequest(_))
        ));
    }
}
