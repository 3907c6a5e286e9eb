//! Configuration management for the ragline query engine
//!
//! Supports loading configuration from:
//! - YAML/TOML files (`config/default.yaml`, then `config/{env}.yaml`)
//! - Environment variables (RAGLINE_ prefix, `__` separator)
//!
//! Global engine settings live in [`Settings`]; everything a tenant may
//! override lives in [`TenantConfig`], which rejects unknown fields at
//! load so typos fail loudly instead of silently using defaults.

pub mod constants;
pub mod settings;
pub mod tenant;

pub use settings::{
    load_settings, EmbeddingSettings, LlmSettings, ProbeSettings, RerankerSettings,
    RuntimeEnvironment, ServerConfig, Settings, StatsSettings, StoreBackend, StoreSettings,
};
pub use tenant::{
    load_tenant_file, FieldWeights, FusionStrategyName, GuardrailPolicy, GuardrailPreset,
    GuardrailThreshold, SectionMergeStrategy, TenantConfig, TenantConfigFile, TenantRegistry,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

impl From<ConfigError> for ragline_core::Error {
    fn from(err: ConfigError) -> Self {
        ragline_core::Error::Config(err.to_string())
    }
}
