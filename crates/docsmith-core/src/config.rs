use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18890;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Top-level config (docsmith.toml + DOCSMITH_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocsmithConfig {
    pub server: ServerConfig,
    pub tenant: TenantConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub docindex: DocIndexConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer token required on state-mutating review endpoints.
    pub admin_token: String,
}

/// Per-tenant identity and documentation target. One pipeline instance
/// serves one tenant; the id partitions every stored entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub tenant_id: String,
    pub project_name: String,
    #[serde(default)]
    pub project_description: String,
    #[serde(default)]
    pub doc_purpose: String,
    #[serde(default)]
    pub target_audience: String,
    #[serde(default)]
    pub style_guide: String,
    pub documentation_git_url: String,
    #[serde(default = "default_git_branch")]
    pub documentation_git_branch: String,
    #[serde(default)]
    pub pr_target_fork_url: String,
    /// Local checkout of the documentation snapshot the doc index scans.
    pub docs_path: String,
    /// Commit hash of the snapshot at `docs_path` — half of the doc-index
    /// cache key. Updated by the operator's doc sync.
    #[serde(default = "default_documentation_commit")]
    pub documentation_commit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Batch-processing tunables. Defaults follow the 24-hour-window design.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_batch_window_hours")]
    pub batch_window_hours: u32,
    #[serde(default = "default_context_window_hours")]
    pub context_window_hours: u32,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_conversation_time_window_minutes")]
    pub conversation_time_window_minutes: u32,
    #[serde(default = "default_min_conversation_gap_minutes")]
    pub min_conversation_gap_minutes: u32,
    #[serde(default = "default_max_conversation_size")]
    pub max_conversation_size: usize,
    #[serde(default = "default_rag_top_k")]
    pub rag_top_k: usize,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Batch-level retries before a message is marked FAILED and skipped.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    /// Swap REJECTION_RULES ahead of REVIEW_MODIFICATIONS.
    #[serde(default)]
    pub ruleset_reject_before_modify: bool,
    /// Adapters pause polling when a stream's PENDING backlog exceeds this.
    #[serde(default = "default_backpressure_threshold")]
    pub backpressure_threshold: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_window_hours: default_batch_window_hours(),
            context_window_hours: default_context_window_hours(),
            max_batch_size: default_max_batch_size(),
            conversation_time_window_minutes: default_conversation_time_window_minutes(),
            min_conversation_gap_minutes: default_min_conversation_gap_minutes(),
            max_conversation_size: default_max_conversation_size(),
            rag_top_k: default_rag_top_k(),
            min_confidence: default_min_confidence(),
            max_failures: default_max_failures(),
            ruleset_reject_before_modify: false,
            backpressure_threshold: default_backpressure_threshold(),
        }
    }
}

/// One model tier: concrete model id plus generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// Batch classification.
    pub fast: TierConfig,
    /// Proposal generation.
    pub strong: TierConfig,
    /// Ruleset review and condensation.
    pub strong_alt: TierConfig,
    #[serde(default = "default_llm_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
    #[serde(default = "default_embedding_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Doc-index filter configuration. Participates in the cache key, so field
/// order in the canonical JSON form must stay stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocIndexConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub exclude_titles: Vec<String>,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_max_sections_per_page")]
    pub max_sections_per_page: usize,
    #[serde(default = "default_max_summary_length")]
    pub max_summary_length: usize,
    #[serde(default)]
    pub compact_format: CompactFormatConfig,
}

impl Default for DocIndexConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            exclude_titles: Vec::new(),
            max_pages: default_max_pages(),
            max_sections_per_page: default_max_sections_per_page(),
            max_summary_length: default_max_summary_length(),
            compact_format: CompactFormatConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactFormatConfig {
    #[serde(default = "bool_true")]
    pub include_summaries: bool,
    #[serde(default = "bool_true")]
    pub include_sections: bool,
    #[serde(default = "default_max_sections_in_compact")]
    pub max_sections_in_compact: usize,
}

impl Default for CompactFormatConfig {
    fn default() -> Self {
        Self {
            include_summaries: true,
            include_sections: true,
            max_sections_in_compact: default_max_sections_in_compact(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    #[serde(default = "bool_true")]
    pub stream_scheduling_enabled: bool,
    /// Seconds-resolution cron expression for the batch-processor tick.
    #[serde(default = "default_batch_tick_cron")]
    pub batch_tick_cron: String,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            stream_scheduling_enabled: true,
            batch_tick_cron: default_batch_tick_cron(),
        }
    }
}

/// Outbound networking knobs shared by adapters and the LLM gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Bind outbound sockets to 0.0.0.0 so dual-stack hosts without a
    /// routable IPv6 path still reach providers that publish AAAA records.
    #[serde(default)]
    pub prefer_ipv4: bool,
    #[serde(default = "default_adapter_fetch_timeout_secs")]
    pub adapter_fetch_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            prefer_ipv4: false,
            adapter_fetch_timeout_secs: default_adapter_fetch_timeout_secs(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_git_branch() -> String {
    "main".to_string()
}
fn default_documentation_commit() -> String {
    "workdir".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.docsmith/docsmith.db", home)
}
fn default_batch_window_hours() -> u32 {
    24
}
fn default_context_window_hours() -> u32 {
    24
}
fn default_max_batch_size() -> usize {
    500
}
fn default_conversation_time_window_minutes() -> u32 {
    15
}
fn default_min_conversation_gap_minutes() -> u32 {
    5
}
fn default_max_conversation_size() -> usize {
    20
}
fn default_rag_top_k() -> usize {
    5
}
fn default_min_confidence() -> f64 {
    0.7
}
fn default_max_failures() -> u32 {
    5
}
fn default_backpressure_threshold() -> usize {
    10_000
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.2
}
fn default_llm_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_embedding_dimension() -> usize {
    768
}
fn default_embedding_timeout_secs() -> u64 {
    20
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}
fn default_max_pages() -> usize {
    200
}
fn default_max_sections_per_page() -> usize {
    20
}
fn default_max_summary_length() -> usize {
    240
}
fn default_max_sections_in_compact() -> usize {
    8
}
fn default_batch_tick_cron() -> String {
    // sec min hour dom mon dow — every 30 minutes
    "0 */30 * * * *".to_string()
}
fn default_adapter_fetch_timeout_secs() -> u64 {
    30
}

impl DocsmithConfig {
    /// Load config from a TOML file with DOCSMITH_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: DocsmithConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("DOCSMITH_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configs the daemon cannot run with. Fatal at load (exit ≠ 0).
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.tenant.tenant_id.trim().is_empty() {
            return Err(crate::error::CoreError::Config(
                "tenant.tenant_id must not be empty".to_string(),
            ));
        }
        if self.pipeline.batch_window_hours == 0 {
            return Err(crate::error::CoreError::Config(
                "pipeline.batch_window_hours must be >= 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.pipeline.min_confidence) {
            return Err(crate::error::CoreError::Config(
                "pipeline.min_confidence must be within [0, 1]".to_string(),
            ));
        }
        if self.embedding.dimension == 0 {
            return Err(crate::error::CoreError::Config(
                "embedding.dimension must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.docsmith/docsmith.toml", home)
}
