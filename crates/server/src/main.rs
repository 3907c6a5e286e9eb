//! ragline server entry point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use ragline_config::{load_settings, load_tenant_file, Settings, StoreBackend, TenantRegistry};
use ragline_llm::{OpenAiCompatBackend, OpenAiCompatConfig, Synthesizer};
use ragline_pipeline::{EngineDeps, Orchestrator};
use ragline_retrieval::{
    CorpusStatsHandle, DocumentStore, Embedder, EmbedderConfig, HttpEmbedder, HttpReranker,
    MemoryStore, QdrantConfig, QdrantStore, RerankerClientConfig, StatsRefresher,
};
use ragline_server::{create_router, init_metrics, spawn_prober, AppState, Readiness};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults.
    let env = std::env::var("RAGLINE_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing not yet initialised; eprintln for early logging.
            eprintln!("warning: failed to load config: {e}. Using defaults.");
            Settings::default()
        }
    };

    init_tracing(&settings);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?settings.environment,
        "starting ragline server"
    );

    let metrics_handle = init_metrics()?;
    tracing::info!("Prometheus metrics at /metrics");

    // Document store.
    let store: Arc<dyn DocumentStore> = match settings.store.backend {
        StoreBackend::Qdrant => {
            let store = QdrantStore::new(QdrantConfig {
                endpoint: settings.store.endpoint.clone(),
                collection: settings.store.collection.clone(),
                api_key: settings.store.api_key.clone(),
                ef_search: settings.store.ef_search,
            })?;
            if let Err(e) = store.ensure_payload_indexes().await {
                tracing::warn!(error = %e, "payload index maintenance failed");
            }
            Arc::new(store)
        }
        StoreBackend::Memory => {
            tracing::warn!("memory store backend selected; data will not persist");
            Arc::new(MemoryStore::new())
        }
    };

    // Embedding client plus the startup dimension handshake: a mismatch
    // with the collection is fatal, an unreachable service is only
    // not-ready.
    let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(EmbedderConfig {
        endpoint: settings.embedding.endpoint.clone(),
        model: settings.embedding.model.clone(),
        timeout: settings.embedding.timeout(),
        max_retries: settings.embedding.max_retries,
        initial_backoff: Duration::from_millis(settings.embedding.initial_backoff_ms),
    })?);
    match embedder.probe_dimension().await {
        Ok(dimension) if dimension != settings.store.vector_dim => {
            return Err(format!(
                "embedding dimension mismatch: service produces {dimension}, store expects {}",
                settings.store.vector_dim
            )
            .into());
        }
        Ok(dimension) => tracing::info!(dimension, "embedding dimension verified"),
        Err(e) => tracing::warn!(error = %e, "embedding probe failed at startup; readiness will gate"),
    }

    let reranker = Arc::new(HttpReranker::new(RerankerClientConfig {
        endpoint: settings.reranker.endpoint.clone(),
        model: settings.reranker.model.clone(),
        timeout: settings.reranker.timeout(),
    })?);

    // Tenant configuration: defaults plus per-tenant overrides from the
    // dedicated file.
    let tenant_file = load_tenant_file(&settings.tenant_config_path)?;
    let llm_client_timeout = Duration::from_millis(tenant_file.defaults.llm_timeout);
    let tenants = Arc::new(TenantRegistry::new(tenant_file.defaults));
    tenants.load_all(tenant_file.tenants)?;
    tracing::info!(tenants = tenants.len(), "tenant configuration loaded");

    let backend = OpenAiCompatBackend::new(OpenAiCompatConfig {
        endpoint: settings.llm.endpoint.clone(),
        api_key: settings.llm.api_key.clone(),
        timeout: llm_client_timeout,
        max_retries: settings.llm.max_retries,
        initial_backoff: Duration::from_millis(settings.llm.initial_backoff_ms),
    })?;
    let synthesizer = Arc::new(Synthesizer::new(Arc::new(backend)));

    // Corpus statistics: one refresh up front, then on the interval.
    let stats = CorpusStatsHandle::default();
    let refresher = StatsRefresher::new(
        Arc::clone(&store),
        stats.clone(),
        settings.stats.sample_size,
        Duration::from_secs(settings.stats.refresh_interval_secs),
    );
    refresher.refresh_once().await;
    tokio::spawn(refresher.run());

    // Readiness probing.
    let readiness = Arc::new(Readiness::new(stats.clone()));
    spawn_prober(
        Arc::clone(&readiness),
        Arc::clone(&store),
        Arc::clone(&embedder),
        Arc::clone(&synthesizer),
        Duration::from_secs(settings.probes.interval_secs),
    );

    let orchestrator = Arc::new(Orchestrator::new(EngineDeps {
        store,
        embedder,
        reranker,
        synthesizer,
        stats: stats.clone(),
        tenants,
        ef_search: settings.store.ef_search,
        llm_stream: settings.llm.stream,
    }));

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    let state = AppState::new(settings, orchestrator, readiness, stats, metrics_handle);
    let router = create_router(state);

    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = if settings.environment.is_production() {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
