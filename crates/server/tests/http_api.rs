//! HTTP surface tests: routing, status-code mapping and envelope shapes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use ragline_config::{Settings, TenantConfig, TenantRegistry};
use ragline_llm::{ChatBackend, ChatRequest, ChatResult, FinishReason, Synthesizer};
use ragline_pipeline::{EngineDeps, Orchestrator};
use ragline_retrieval::{
    CorpusStats, CorpusStatsHandle, Embedder, MemoryDoc, MemoryStore, Reranker, RetrievalError,
};
use ragline_server::{create_router, AppState, ProbeStatus, Readiness};

struct ZeroEmbedder;

#[async_trait]
impl Embedder for ZeroEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
    }
}

struct DownEmbedder;

#[async_trait]
impl Embedder for DownEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        Err(RetrievalError::Embedding("connection refused".into()))
    }
}

struct FlatReranker;

#[async_trait]
impl Reranker for FlatReranker {
    async fn rerank(
        &self,
        _query: &str,
        docs: &[(String, String)],
    ) -> Result<Vec<f32>, RetrievalError> {
        Ok(vec![0.8; docs.len()])
    }
}

struct CannedLlm;

#[async_trait]
impl ChatBackend for CannedLlm {
    async fn generate(&self, _request: &ChatRequest) -> Result<ChatResult, ragline_llm::LlmError> {
        Ok(ChatResult {
            text: "An answer. [^1]".into(),
            tokens: 3,
            total_time_ms: 1,
            finish_reason: FinishReason::Stop,
        })
    }

    async fn generate_stream(
        &self,
        request: &ChatRequest,
        _tx: tokio::sync::mpsc::Sender<String>,
    ) -> Result<ChatResult, ragline_llm::LlmError> {
        self.generate(request).await
    }

    async fn probe(&self) -> bool {
        true
    }
}

fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert(MemoryDoc {
        id: "c1".into(),
        content: "the answer to the riddle is the number seven".into(),
        vector: vec![1.0, 0.0, 0.0],
        payload: ragline_core::Payload {
            tenant: "tenantA".into(),
            acl: vec!["g.readers".into()],
            lang: "en".into(),
            doc_id: "doc-1".into(),
            ..Default::default()
        },
    });
    store
}

fn app(embedder: Arc<dyn Embedder>, store: MemoryStore, loaded_stats: bool) -> axum::Router {
    let contents = vec!["the answer to the riddle is the number seven".to_string()];
    let stats = if loaded_stats {
        CorpusStatsHandle::new(CorpusStats::build(&contents, 1))
    } else {
        CorpusStatsHandle::default()
    };

    let orchestrator = Arc::new(Orchestrator::new(EngineDeps {
        store: Arc::new(store),
        embedder,
        reranker: Arc::new(FlatReranker),
        synthesizer: Arc::new(Synthesizer::new(Arc::new(CannedLlm))),
        stats: stats.clone(),
        tenants: Arc::new(TenantRegistry::new(TenantConfig::default())),
        ef_search: None,
        llm_stream: false,
    }));

    let readiness = Arc::new(Readiness::new(stats.clone()));
    if loaded_stats {
        readiness.update(ProbeStatus {
            store: true,
            embedding: true,
            llm: true,
        });
    }

    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .build_recorder()
        .handle();
    let state = AppState::new(Settings::default(), orchestrator, readiness, stats, handle);
    create_router(state)
}

fn ask_body(tenant: &str, overrides: Option<&str>) -> String {
    let overrides = overrides
        .map(|o| format!(r#","overrides":{o}"#))
        .unwrap_or_default();
    format!(
        r#"{{"query":"what is the answer to the riddle","userContext":{{"id":"u1","tenantId":"{tenant}","groupIds":["g.readers"],"languages":["en"]}}{overrides}}}"#
    )
}

async fn post_ask(router: axum::Router, body: String) -> (StatusCode, serde_json::Value) {
    let response = router
        .oneshot(
            Request::post("/ask")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn ask_returns_answer_envelope() {
    let router = app(Arc::new(ZeroEmbedder), seeded_store(), true);
    let (status, json) = post_ask(router, ask_body("tenantA", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.get("guardrail").is_some());
    assert!(json.get("stageMetrics").is_some());
    assert!(json.get("requestId").is_some());
}

#[tokio::test]
async fn ask_refusal_is_200_with_idk() {
    // Empty corpus for this tenant.
    let router = app(Arc::new(ZeroEmbedder), MemoryStore::new(), true);
    let (status, json) = post_ask(router, ask_body("tenantA", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["idk"]["reasonCode"], "no_results");
    assert_eq!(json["citations"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn missing_tenant_is_unauthorized() {
    let router = app(Arc::new(ZeroEmbedder), seeded_store(), true);
    let (status, json) = post_ask(router, ask_body("", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "invalid_caller");
    assert!(json.get("stack").is_none());
}

#[tokio::test]
async fn foreign_tenant_override_is_forbidden() {
    let router = app(Arc::new(ZeroEmbedder), seeded_store(), true);
    let (status, json) = post_ask(
        router,
        ask_body("tenantA", Some(r#"{"tenant":"tenantB"}"#)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], "invalid_caller");
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let router = app(Arc::new(ZeroEmbedder), seeded_store(), true);
    let (status, _) = post_ask(router, "{not json".into()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn embedding_down_maps_to_503() {
    let router = app(Arc::new(DownEmbedder), seeded_store(), true);
    let (status, json) = post_ask(router, ask_body("tenantA", None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["code"], "embedding_unavailable");
}

#[tokio::test]
async fn healthz_is_always_ok() {
    let router = app(Arc::new(ZeroEmbedder), seeded_store(), false);
    let response = router
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn readyz_gates_on_stats_and_probes() {
    let not_ready = app(Arc::new(ZeroEmbedder), seeded_store(), false);
    let response = not_ready
        .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let ready = app(Arc::new(ZeroEmbedder), seeded_store(), true);
    let response = ready
        .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn metrics_endpoint_renders() {
    let router = app(Arc::new(ZeroEmbedder), seeded_store(), true);
    let response = router
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn concurrent_requests_within_admission_limit() {
    let router = app(Arc::new(ZeroEmbedder), seeded_store(), true);
    let mut handles = Vec::new();
    for _ in 0..4 {
        let router = router.clone();
        handles.push(tokio::spawn(async move {
            post_ask(router, ask_body("tenantA", None)).await.0
        }));
    }
    for handle in handles {
        let status = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, StatusCode::OK);
    }
}
