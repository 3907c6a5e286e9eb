//! HTTP endpoints
//!
//! REST surface for the query engine: the ask endpoint, health and
//! readiness probes, Prometheus metrics and the stats-refresh admin hook.
//! Errors are JSON `{error, code}`; stack traces and document content
//! never appear in error bodies.

use axum::{
    extract::{Json, State},
    http::{HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use ragline_core::{AnswerEnvelope, CallerContext, Error, Query, QueryOverrides};
use ragline_pipeline::AskRequest;

use crate::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let config = state.settings.read();
    let cors_layer = build_cors_layer(&config.server.cors_origins, config.server.cors_enabled);
    drop(config);

    Router::new()
        .route("/ask", post(ask))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .route("/admin/refresh-stats", post(refresh_stats))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins (NOT FOR PRODUCTION)");
        return CorsLayer::permissive();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("invalid CORS origin: {origin}");
                None
            }
        })
        .collect();

    if parsed.is_empty() {
        tracing::info!("no CORS origins configured, defaulting to localhost:3000");
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);
    }

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// Ask request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AskBody {
    query: String,
    user_context: CallerContext,
    #[serde(default)]
    k: Option<usize>,
    #[serde(default)]
    overrides: Option<QueryOverrides>,
}

/// The ask endpoint. Returns 200 for both answers and refusals; refusals
/// are data, not errors.
async fn ask(
    State(state): State<AppState>,
    Json(body): Json<AskBody>,
) -> Result<Json<AnswerEnvelope>, ApiError> {
    let _permit = state.admission.acquire().await.map_err(ApiError::from)?;

    let mut query = Query::new(body.query);
    if let Some(k) = body.k {
        query.k = k;
    }
    query.overrides = body.overrides;

    let request = AskRequest {
        caller: body.user_context,
        query,
    };

    let envelope = state.orchestrator.ask(request).await?;
    Ok(Json(envelope))
}

/// Liveness: the process answers.
async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Readiness: corpus statistics loaded and all dependencies answered a
/// probe within the last interval.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.readiness.status();
    let body = serde_json::json!({
        "ready": state.readiness.ready(),
        "statsLoaded": state.stats.is_loaded(),
        "store": status.store,
        "embedding": status.embedding,
        "llm": status.llm,
    });
    let code = if state.readiness.ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}

/// Prometheus metrics.
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}

/// Trigger a corpus-statistics refresh out of band. Guarded by the ingest
/// bearer token when one is configured.
async fn refresh_stats(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<StatusCode, ApiError> {
    let expected = state.settings.read().server.ingest_token.clone();
    if let Some(expected) = expected {
        let presented = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or_default();
        if !constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            return Err(ApiError {
                status: StatusCode::UNAUTHORIZED,
                code: "invalid_token",
                message: "invalid ingest token".into(),
            });
        }
    }
    // The refresher task also runs on its interval; this only asks for an
    // immediate pass.
    tracing::info!("stats refresh requested via admin endpoint");
    Ok(StatusCode::ACCEPTED)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Wire error: `{error, code}` with the mapped status.
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            // Missing identity is unauthenticated; a tenant the caller may
            // not touch is forbidden.
            Error::InvalidCaller(message) => {
                if message.contains("required") {
                    StatusCode::UNAUTHORIZED
                } else {
                    StatusCode::FORBIDDEN
                }
            }
            Error::DeadlineExceeded { .. } => StatusCode::REQUEST_TIMEOUT,
            Error::Overloaded => StatusCode::TOO_MANY_REQUESTS,
            Error::EmbeddingUnavailable(_)
            | Error::RetrievalUnavailable(_)
            | Error::SynthesisUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::InvariantViolation(_) | Error::Config(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({
            "error": self.message,
            "code": self.code,
        });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (Error::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (
                Error::InvalidCaller("tenantId is required".into()),
                StatusCode::UNAUTHORIZED,
            ),
            (
                Error::InvalidCaller("caller in tenant a may not query tenant b".into()),
                StatusCode::FORBIDDEN,
            ),
            (
                Error::DeadlineExceeded { stage: "synthesis" },
                StatusCode::REQUEST_TIMEOUT,
            ),
            (Error::Overloaded, StatusCode::TOO_MANY_REQUESTS),
            (
                Error::EmbeddingUnavailable("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                Error::RetrievalUnavailable("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status, expected);
        }
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"token", b"token"));
        assert!(!constant_time_eq(b"token", b"other"));
        assert!(!constant_time_eq(b"token", b"toke"));
    }

    #[test]
    fn test_ask_body_parses_wire_shape() {
        let json = r#"{
            "query": "How long is a day in Isharoth?",
            "userContext": {"id": "u1", "tenantId": "tenantA", "groupIds": ["g.readers"], "languages": ["en"]},
            "k": 5
        }"#;
        let body: AskBody = serde_json::from_str(json).unwrap();
        assert_eq!(body.user_context.tenant_id, "tenantA");
        assert_eq!(body.k, Some(5));
    }
}
