use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    3000
}
fn default_chunk_overlap() -> usize {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Upper bound on documents processed concurrently by each worker kind.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub embed_max_attempts: i64,
    #[serde(default = "default_max_attempts")]
    pub summary_max_attempts: i64,
    /// A PROCESSING row older than this is presumed abandoned.
    #[serde(default = "default_stale_threshold_minutes")]
    pub stale_threshold_minutes: i64,
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            embed_max_attempts: default_max_attempts(),
            summary_max_attempts: default_max_attempts(),
            stale_threshold_minutes: default_stale_threshold_minutes(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}

fn default_concurrency() -> usize {
    10
}
fn default_max_attempts() -> i64 {
    5
}
fn default_stale_threshold_minutes() -> i64 {
    5
}
fn default_maintenance_interval_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummaryConfig {
    /// Head-truncation budget for summary input. Not mid-word safe.
    #[serde(default = "default_summary_max_chars")]
    pub max_chars: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            max_chars: default_summary_max_chars(),
        }
    }
}

fn default_summary_max_chars() -> usize {
    200_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_client_similarity")]
    pub client_similarity: f64,
    #[serde(default = "default_client_limit")]
    pub client_limit: usize,
    /// Storage-level similarity threshold, tuned for recall. A stricter
    /// floor is applied again by the search service.
    #[serde(default = "default_document_similarity")]
    pub document_similarity: f64,
    #[serde(default = "default_document_limit")]
    pub document_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            client_similarity: default_client_similarity(),
            client_limit: default_client_limit(),
            document_similarity: default_document_similarity(),
            document_limit: default_document_limit(),
        }
    }
}

fn default_client_similarity() -> f64 {
    0.55
}
fn default_client_limit() -> usize {
    50
}
fn default_document_similarity() -> f64 {
    0.72
}
fn default_document_limit() -> usize {
    20
}

/// Per-capability rate budgets, both tracked over a rolling minute.
/// A cost budget of 0 means the cost window is unlimited.
#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_rpm")]
    pub chat_rpm: u32,
    #[serde(default)]
    pub chat_cost_per_min: u64,
    #[serde(default = "default_rpm")]
    pub embedding_rpm: u32,
    #[serde(default = "default_embedding_cost")]
    pub embedding_cost_per_min: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            chat_rpm: default_rpm(),
            chat_cost_per_min: 0,
            embedding_rpm: default_rpm(),
            embedding_cost_per_min: default_embedding_cost(),
        }
    }
}

fn default_rpm() -> u32 {
    12
}
fn default_embedding_cost() -> u64 {
    500_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dims")]
    pub embedding_dims: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            embedding_dims: default_embedding_dims(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_embedding_dims() -> usize {
    1536
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be < chunking.chunk_size");
    }

    if config.worker.concurrency == 0 {
        anyhow::bail!("worker.concurrency must be >= 1");
    }
    if config.worker.embed_max_attempts < 1 || config.worker.summary_max_attempts < 1 {
        anyhow::bail!("worker max attempts must be >= 1");
    }
    if config.worker.stale_threshold_minutes < 1 {
        anyhow::bail!("worker.stale_threshold_minutes must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.search.client_similarity) {
        anyhow::bail!("search.client_similarity must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.search.document_similarity) {
        anyhow::bail!("search.document_similarity must be in [0.0, 1.0]");
    }
    if config.search.client_limit == 0 || config.search.document_limit == 0 {
        anyhow::bail!("search result limits must be >= 1");
    }

    if config.limits.chat_rpm == 0 || config.limits.embedding_rpm == 0 {
        anyhow::bail!("rate limits must allow at least one request per minute");
    }

    if config.provider.embedding_dims == 0 {
        anyhow::bail!("provider.embedding_dims must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"/tmp/dossier.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.chunk_size, 3000);
        assert_eq!(config.chunking.chunk_overlap, 300);
        assert_eq!(config.worker.embed_max_attempts, 5);
        assert_eq!(config.limits.embedding_cost_per_min, 500_000);
        assert_eq!(config.limits.chat_cost_per_min, 0);
        assert!((config.search.client_similarity - 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_overlap_not_below_size() {
        let err = parse(
            "[db]\npath = \"/tmp/d.sqlite\"\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_rejects_threshold_out_of_range() {
        let err = parse("[db]\npath = \"/tmp/d.sqlite\"\n[search]\nclient_similarity = 1.5\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let err = parse("[db]\npath = \"/tmp/d.sqlite\"\n[worker]\nconcurrency = 0\n");
        assert!(err.is_err());
    }
}
