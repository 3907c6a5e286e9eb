//! Global settings
//!
//! Loaded once at startup from files plus environment, validated, then
//! shared behind a snapshot lock for hot reload.

use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{endpoints, server, timeouts};
use crate::ConfigError;

/// Runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Relaxed validation, warnings only.
    #[default]
    Development,
    Staging,
    /// All validations enforced.
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_enabled: bool,
    pub cors_origins: Vec<String>,
    /// Concurrent in-flight requests before admission control rejects.
    pub max_concurrent_requests: usize,
    pub admission_queue_limit: usize,
    /// Bearer token required on ingestion-adjacent admin routes.
    pub ingest_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: server::HOST.to_string(),
            port: server::PORT,
            cors_enabled: true,
            cors_origins: Vec::new(),
            max_concurrent_requests: server::MAX_CONCURRENT_REQUESTS,
            admission_queue_limit: server::ADMISSION_QUEUE_LIMIT,
            ingest_token: None,
        }
    }
}

/// Which document-store backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Qdrant,
    /// In-process store for tests and local development.
    Memory,
}

/// Document store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub endpoint: String,
    pub collection: String,
    pub api_key: Option<String>,
    /// Embedding dimension the collection was created with. Checked
    /// against the embedding service at startup; mismatch is fatal.
    pub vector_dim: usize,
    /// Optional HNSW ef override pushed down on k-NN searches.
    pub ef_search: Option<u64>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            endpoint: endpoints::QDRANT_DEFAULT.to_string(),
            collection: "ragline_chunks".to_string(),
            api_key: None,
            vector_dim: 384,
            ef_search: None,
        }
    }
}

/// Embedding service client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub endpoint: String,
    pub model: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            endpoint: endpoints::EMBEDDING_DEFAULT.to_string(),
            model: "e5-multilingual".to_string(),
            timeout_ms: timeouts::EMBEDDING_MS,
            max_retries: 2,
            initial_backoff_ms: 100,
        }
    }
}

impl EmbeddingSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Cross-encoder reranker client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerSettings {
    pub endpoint: String,
    pub model: String,
    pub timeout_ms: u64,
}

impl Default for RerankerSettings {
    fn default() -> Self {
        Self {
            endpoint: endpoints::RERANKER_DEFAULT.to_string(),
            model: "bge-reranker-v2-m3".to_string(),
            timeout_ms: timeouts::RERANK_MS,
        }
    }
}

impl RerankerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// LLM provider connection settings (per-tenant model/temperature live in
/// `TenantConfig`; this is the transport).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub stream: bool,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: endpoints::LLM_DEFAULT.to_string(),
            api_key: None,
            stream: true,
            max_retries: 2,
            initial_backoff_ms: 100,
        }
    }
}

/// Corpus statistics refresh settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsSettings {
    pub refresh_interval_secs: u64,
    /// Chunks sampled from the store per refresh.
    pub sample_size: usize,
}

impl Default for StatsSettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 900,
            sample_size: 5_000,
        }
    }
}

/// Dependency probing for readiness.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub interval_secs: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

fn default_tenant_config_path() -> String {
    "config/tenants.yaml".to_string()
}

/// Main application settings.
///
/// Per-tenant configuration lives in its own YAML file (see
/// [`crate::tenant::load_tenant_file`]): the file/env layering below
/// folds keys to lowercase, which would mangle the camelCase tenant
/// option names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub environment: RuntimeEnvironment,
    pub server: ServerConfig,
    pub store: StoreSettings,
    pub embedding: EmbeddingSettings,
    pub reranker: RerankerSettings,
    pub llm: LlmSettings,
    pub stats: StatsSettings,
    pub probes: ProbeSettings,
    /// Path to the tenant configuration file (defaults + per-tenant).
    pub tenant_config_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: RuntimeEnvironment::default(),
            server: ServerConfig::default(),
            store: StoreSettings::default(),
            embedding: EmbeddingSettings::default(),
            reranker: RerankerSettings::default(),
            llm: LlmSettings::default(),
            stats: StatsSettings::default(),
            probes: ProbeSettings::default(),
            tenant_config_path: default_tenant_config_path(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.vector_dim == 0 {
            return Err(ConfigError::Invalid("store.vector_dim must be positive".into()));
        }
        if self.server.max_concurrent_requests == 0 {
            return Err(ConfigError::Invalid(
                "server.max_concurrent_requests must be positive".into(),
            ));
        }
        if self.environment.is_strict() && self.server.cors_enabled && self.server.cors_origins.is_empty()
        {
            tracing::warn!("CORS enabled with no origins configured; only localhost is allowed");
        }
        Ok(())
    }
}

/// Load settings from files and environment.
///
/// Priority: env vars (`RAGLINE_`, `__` separator) > `config/{env}.yaml`
/// > `config/default.yaml` > built-in defaults.
pub fn load_settings(env_name: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder().add_source(File::with_name("config/default").required(false));

    if let Some(env) = env_name {
        builder = builder.add_source(File::with_name(&format!("config/{env}")).required(false));
    }

    let raw = builder
        .add_source(Environment::with_prefix("RAGLINE").separator("__"))
        .build()?;

    let settings: Settings = raw.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}
