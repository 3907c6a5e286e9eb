//! Per-tenant configuration
//!
//! `TenantConfig` is the complete per-tenant option surface. Unknown keys
//! are rejected at load; a typo in a tenant file is a startup error, not a
//! silently-applied default.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::constants::{retrieval, timeouts};
use crate::ConfigError;

/// Fusion strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategyName {
    /// Score-preserving weighted average of normalised scores.
    #[default]
    WeightedAverage,
    /// Rank-discounted combination that still carries scores.
    ScoreWeightedRrf,
    /// Take the stronger normalised signal per candidate.
    MaxConfidence,
    /// Legacy rank-only RRF; retained for A/B and rollback.
    BordaRank,
}

impl std::str::FromStr for FusionStrategyName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weighted_average" => Ok(Self::WeightedAverage),
            "score_weighted_rrf" => Ok(Self::ScoreWeightedRrf),
            "max_confidence" => Ok(Self::MaxConfidence),
            "borda_rank" => Ok(Self::BordaRank),
            other => Err(ConfigError::Invalid(format!(
                "unknown fusion strategy: {other}"
            ))),
        }
    }
}

/// How a reconstructed section is merged back into the result list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SectionMergeStrategy {
    /// Swap constituent parts for the assembled section in place.
    Replace,
    /// Append assembled sections after the originals.
    Append,
    /// Insert sections and re-sort everything by score.
    #[default]
    Interleave,
}

/// Named guardrail strictness presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardrailPreset {
    Permissive,
    Moderate,
    Strict,
    Paranoid,
}

/// `guardrailThreshold` accepts either a preset name or a bare minimum
/// confidence (which keeps the moderate preset's other criteria).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GuardrailThreshold {
    Named(GuardrailPreset),
    Value(f32),
}

impl Default for GuardrailThreshold {
    fn default() -> Self {
        GuardrailThreshold::Named(GuardrailPreset::Moderate)
    }
}

/// Fully-resolved guardrail criteria.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailPolicy {
    pub min_confidence: f32,
    pub min_top_score: f32,
    pub min_mean_score: f32,
    pub max_std_dev: f32,
    pub min_result_count: usize,
}

impl GuardrailPolicy {
    pub fn from_preset(preset: GuardrailPreset) -> Self {
        match preset {
            GuardrailPreset::Permissive => Self {
                min_confidence: 0.2,
                min_top_score: 0.25,
                min_mean_score: 0.10,
                max_std_dev: 0.45,
                min_result_count: 1,
            },
            GuardrailPreset::Moderate => Self {
                min_confidence: 0.3,
                min_top_score: 0.35,
                min_mean_score: 0.15,
                max_std_dev: 0.40,
                min_result_count: 1,
            },
            GuardrailPreset::Strict => Self {
                min_confidence: 0.5,
                min_top_score: 0.50,
                min_mean_score: 0.25,
                max_std_dev: 0.35,
                min_result_count: 2,
            },
            GuardrailPreset::Paranoid => Self {
                min_confidence: 0.7,
                min_top_score: 0.65,
                min_mean_score: 0.40,
                max_std_dev: 0.30,
                min_result_count: 3,
            },
        }
    }

    pub fn from_threshold(threshold: GuardrailThreshold) -> Self {
        match threshold {
            GuardrailThreshold::Named(preset) => Self::from_preset(preset),
            GuardrailThreshold::Value(min_confidence) => Self {
                min_confidence,
                ..Self::from_preset(GuardrailPreset::Moderate)
            },
        }
    }
}

/// Field weights for the domain-less keyword reranker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FieldWeights {
    pub body: f32,
    pub title: f32,
    pub header: f32,
    pub section_path: f32,
    pub doc_id: f32,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            body: 3.0,
            title: 2.2,
            header: 1.8,
            section_path: 1.3,
            doc_id: 1.1,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_fusion_k_param() -> u32 {
    5
}
fn default_vector_weight() -> f32 {
    0.7
}
fn default_keyword_weight() -> f32 {
    0.3
}
fn default_kw_lambda() -> f32 {
    0.25
}
fn default_kw_idf_gamma() -> f32 {
    1.2
}
fn default_kw_rank_decay() -> f32 {
    0.85
}
fn default_kw_body_sat_c() -> f32 {
    0.6
}
fn default_kw_early_pos_tokens() -> usize {
    250
}
fn default_kw_early_pos_nudge() -> f32 {
    1.08
}
fn default_kw_prox_win() -> usize {
    30
}
fn default_kw_proximity_beta() -> f32 {
    0.35
}
fn default_kw_coverage_alpha() -> f32 {
    0.25
}
fn default_kw_exclusivity_gamma() -> f32 {
    0.2
}
fn default_kw_clamp() -> f32 {
    2.0
}
fn default_kw_topk_coverage() -> usize {
    3
}
fn default_reranker_timeout() -> u64 {
    timeouts::RERANK_MS
}
fn default_max_sections() -> usize {
    2
}
fn default_max_parts() -> usize {
    10
}
fn default_section_timeout() -> u64 {
    timeouts::SECTION_COMPLETION_MS
}
fn default_section_trigger() -> f32 {
    0.7
}
fn default_max_context_tokens() -> usize {
    retrieval::MAX_CONTEXT_TOKENS
}
fn default_llm_provider() -> String {
    "openai_compatible".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_max_tokens() -> usize {
    1024
}
fn default_llm_temperature() -> f32 {
    0.1
}
fn default_llm_timeout() -> u64 {
    timeouts::LLM_MS
}
fn default_overall_timeout() -> u64 {
    timeouts::OVERALL_MS
}
fn default_vector_timeout() -> u64 {
    timeouts::VECTOR_SEARCH_MS
}
fn default_keyword_timeout() -> u64 {
    timeouts::KEYWORD_SEARCH_MS
}
fn default_embedding_timeout() -> u64 {
    timeouts::EMBEDDING_MS
}

/// Everything a tenant may tune. Field names are the recognised option
/// names of the public configuration surface; all timeouts are
/// milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct TenantConfig {
    // Fusion
    pub fusion_strategy: FusionStrategyName,
    /// Rank discount; only meaningful for rank-based strategies.
    pub fusion_k_param: u32,
    /// Vector-side weight when the analyzer does not override.
    pub hybrid_vector_weight: f32,
    pub hybrid_keyword_weight: f32,

    // Domain-less keyword reranker
    pub kw_points_enabled: bool,
    pub kw_lambda: f32,
    pub kw_idf_gamma: f32,
    pub kw_rank_decay: f32,
    pub kw_field_weights: FieldWeights,
    pub kw_body_sat_c: f32,
    pub kw_early_pos_tokens: usize,
    pub kw_early_pos_nudge: f32,
    pub kw_prox_win: usize,
    pub kw_proximity_beta: f32,
    pub kw_coverage_alpha: f32,
    pub kw_exclusivity_gamma: f32,
    pub kw_clamp_kw_norm: f32,
    pub kw_topk_coverage: usize,

    // Cross-encoder reranker
    pub reranker_enabled: bool,
    pub reranker_timeout: u64,
    pub reranker_fallback_enabled: bool,

    // Section reconstruction
    pub section_aware_enabled: bool,
    pub section_max_sections_per_query: usize,
    pub section_max_parts: usize,
    pub section_completion_timeout: u64,
    pub section_merge_strategy: SectionMergeStrategy,
    pub section_min_trigger_confidence: f32,

    // Context packing
    pub max_context_tokens: usize,
    pub context_packing_enabled: bool,

    // Guardrail
    pub guardrail_threshold: GuardrailThreshold,
    pub guardrail_audit_enabled: bool,
    pub guardrail_idk_templates_enabled: bool,
    /// Testing escape hatch; bypassed decisions are still audited.
    pub guardrail_bypass: bool,
    /// Suggestions attached to IDK responses when templates are enabled.
    pub idk_suggestions: Vec<String>,

    // Synthesis
    pub llm_provider: String,
    pub llm_model: String,
    pub llm_max_tokens: usize,
    pub llm_temperature: f32,
    pub llm_timeout: u64,
    /// Tenant-wide system prompt; `systemPrompts` maps language → prompt
    /// and wins over this for matching callers.
    pub system_prompt: Option<String>,
    pub system_prompts: std::collections::HashMap<String, String>,

    // Stage timeouts
    pub overall_timeout: u64,
    pub vector_search_timeout: u64,
    pub keyword_search_timeout: u64,
    pub embedding_timeout: u64,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            fusion_strategy: FusionStrategyName::default(),
            fusion_k_param: default_fusion_k_param(),
            hybrid_vector_weight: default_vector_weight(),
            hybrid_keyword_weight: default_keyword_weight(),
            kw_points_enabled: false,
            kw_lambda: default_kw_lambda(),
            kw_idf_gamma: default_kw_idf_gamma(),
            kw_rank_decay: default_kw_rank_decay(),
            kw_field_weights: FieldWeights::default(),
            kw_body_sat_c: default_kw_body_sat_c(),
            kw_early_pos_tokens: default_kw_early_pos_tokens(),
            kw_early_pos_nudge: default_kw_early_pos_nudge(),
            kw_prox_win: default_kw_prox_win(),
            kw_proximity_beta: default_kw_proximity_beta(),
            kw_coverage_alpha: default_kw_coverage_alpha(),
            kw_exclusivity_gamma: default_kw_exclusivity_gamma(),
            kw_clamp_kw_norm: default_kw_clamp(),
            kw_topk_coverage: default_kw_topk_coverage(),
            reranker_enabled: true,
            reranker_timeout: default_reranker_timeout(),
            reranker_fallback_enabled: true,
            section_aware_enabled: true,
            section_max_sections_per_query: default_max_sections(),
            section_max_parts: default_max_parts(),
            section_completion_timeout: default_section_timeout(),
            section_merge_strategy: SectionMergeStrategy::default(),
            section_min_trigger_confidence: default_section_trigger(),
            max_context_tokens: default_max_context_tokens(),
            context_packing_enabled: true,
            guardrail_threshold: GuardrailThreshold::default(),
            guardrail_audit_enabled: true,
            guardrail_idk_templates_enabled: true,
            guardrail_bypass: false,
            idk_suggestions: Vec::new(),
            llm_provider: default_llm_provider(),
            llm_model: default_llm_model(),
            llm_max_tokens: default_llm_max_tokens(),
            llm_temperature: default_llm_temperature(),
            llm_timeout: default_llm_timeout(),
            system_prompt: None,
            system_prompts: std::collections::HashMap::new(),
            overall_timeout: default_overall_timeout(),
            vector_search_timeout: default_vector_timeout(),
            keyword_search_timeout: default_keyword_timeout(),
            embedding_timeout: default_embedding_timeout(),
        }
    }
}

impl TenantConfig {
    /// Resolved guardrail criteria for this tenant.
    pub fn guardrail_policy(&self) -> GuardrailPolicy {
        GuardrailPolicy::from_threshold(self.guardrail_threshold)
    }

    /// System prompt for a caller: language match first, then the tenant
    /// prompt; `None` falls through to the global preamble.
    pub fn resolve_system_prompt(&self, languages: &[String]) -> Option<&str> {
        for lang in languages {
            if let Some(prompt) = self.system_prompts.get(lang) {
                return Some(prompt);
            }
        }
        self.system_prompt.as_deref()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let weight_sum = self.hybrid_vector_weight + self.hybrid_keyword_weight;
        if !(0.99..=1.01).contains(&weight_sum) {
            return Err(ConfigError::Invalid(format!(
                "hybridVectorWeight + hybridKeywordWeight must be 1.0, got {weight_sum}"
            )));
        }
        if self.max_context_tokens == 0 {
            return Err(ConfigError::Invalid(
                "maxContextTokens must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.section_min_trigger_confidence) {
            return Err(ConfigError::Invalid(
                "sectionMinTriggerConfidence must be in [0, 1]".into(),
            ));
        }
        if self.overall_timeout == 0 {
            return Err(ConfigError::Invalid("overallTimeout must be positive".into()));
        }
        Ok(())
    }
}

/// On-disk shape of the tenant configuration file: engine-wide defaults
/// plus per-tenant overrides. Kept outside the main settings layering so
/// the camelCase option names survive loading verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TenantConfigFile {
    pub defaults: TenantConfig,
    pub tenants: std::collections::HashMap<String, TenantConfig>,
}

/// Load and validate the tenant configuration file. A missing file is
/// not an error: built-in defaults apply to every tenant.
pub fn load_tenant_file(path: &str) -> Result<TenantConfigFile, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path, "no tenant configuration file; using defaults");
            return Ok(TenantConfigFile::default());
        }
        Err(e) => return Err(ConfigError::FileNotFound(format!("{path}: {e}"))),
    };

    let file: TenantConfigFile =
        serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse(format!("{path}: {e}")))?;

    file.defaults.validate()?;
    for (tenant_id, config) in &file.tenants {
        config
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("tenant {tenant_id}: {e}")))?;
    }
    Ok(file)
}

/// Process-wide tenant registry. Readers grab an `Arc` snapshot per
/// request; reloads replace entries without touching in-flight requests.
#[derive(Debug, Default)]
pub struct TenantRegistry {
    tenants: DashMap<String, Arc<TenantConfig>>,
    fallback: Arc<TenantConfig>,
}

impl TenantRegistry {
    pub fn new(fallback: TenantConfig) -> Self {
        Self {
            tenants: DashMap::new(),
            fallback: Arc::new(fallback),
        }
    }

    /// Snapshot for one tenant; the fallback applies to unknown tenants.
    pub fn get(&self, tenant_id: &str) -> Arc<TenantConfig> {
        self.tenants
            .get(tenant_id)
            .map(|entry| Arc::clone(entry.value()))
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    pub fn upsert(&self, tenant_id: impl Into<String>, config: TenantConfig) {
        self.tenants.insert(tenant_id.into(), Arc::new(config));
    }

    pub fn load_all(
        &self,
        configs: impl IntoIterator<Item = (String, TenantConfig)>,
    ) -> Result<(), ConfigError> {
        for (tenant_id, config) in configs {
            config.validate()?;
            self.upsert(tenant_id, config);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}
