//! HTTP server for the ragline query engine

pub mod http;
pub mod state;

pub use http::create_router;
pub use state::{Admission, AppState, ProbeStatus, Readiness};

use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use ragline_llm::Synthesizer;
use ragline_retrieval::{DocumentStore, Embedder};

/// Install the Prometheus recorder; the handle renders `/metrics`.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Background prober feeding `/readyz`: every dependency must answer
/// within the last interval for the process to report ready.
pub fn spawn_prober(
    readiness: Arc<Readiness>,
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn Embedder>,
    synthesizer: Arc<Synthesizer>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let store_up = store.probe().await;
            let embedding_up = embedder.probe_dimension().await.is_ok();
            let llm_up = synthesizer.probe().await;
            let status = ProbeStatus {
                store: store_up,
                embedding: embedding_up,
                llm: llm_up,
            };
            if !status.all_up() {
                tracing::warn!(
                    store = store_up,
                    embedding = embedding_up,
                    llm = llm_up,
                    "dependency probe failed"
                );
            }
            readiness.update(status);
        }
    })
}
