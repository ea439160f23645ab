//! TOML configuration parsing and validation.
//!
//! Every section carries serde defaults, so an empty file yields a working
//! (offline, embeddings disabled) configuration. [`load_config`] rejects
//! settings the core cannot run with; those errors are fatal at startup.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            collection: default_collection(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/index.sqlite")
}
fn default_collection() -> String {
    "codebase_embeddings".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScannerConfig {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_skip_dirs")]
    pub skip_dirs: Vec<String>,
    #[serde(default = "default_hidden_prefix")]
    pub hidden_prefix: String,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            max_file_size: default_max_file_size(),
            skip_dirs: default_skip_dirs(),
            hidden_prefix: default_hidden_prefix(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_extensions() -> Vec<String> {
    [
        ".py", ".js", ".ts", ".java", ".cpp", ".c", ".h", ".hpp", ".cs", ".go", ".rs", ".php",
        ".rb", ".swift", ".kt", ".scala", ".dart", ".r", ".m", ".pl", ".sh", ".sql", ".html",
        ".css", ".xml", ".json", ".yaml", ".yml", ".md", ".txt",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}
fn default_skip_dirs() -> Vec<String> {
    [
        "node_modules",
        "__pycache__",
        ".git",
        "target",
        "build",
        "dist",
        "venv",
        ".venv",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_hidden_prefix() -> String {
    ".".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,
    #[serde(default = "default_suspicious_keywords")]
    pub suspicious_keywords: Vec<String>,
    #[serde(default = "default_allowed_base_dirs")]
    pub allowed_base_dirs: Vec<PathBuf>,
    #[serde(default = "default_denied_extensions")]
    pub denied_extensions: Vec<String>,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_query_chars: default_max_query_chars(),
            suspicious_keywords: default_suspicious_keywords(),
            allowed_base_dirs: default_allowed_base_dirs(),
            denied_extensions: default_denied_extensions(),
            rate_limit_per_minute: default_rate_limit(),
        }
    }
}

fn default_max_query_chars() -> usize {
    1000
}
fn default_suspicious_keywords() -> Vec<String> {
    [
        "password",
        "secret",
        "key",
        "token",
        "credential",
        "admin",
        "root",
        "sudo",
        "privilege",
        "elevate",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_allowed_base_dirs() -> Vec<PathBuf> {
    ["/home", "/Users", "/tmp", "/var/tmp"]
        .iter()
        .map(PathBuf::from)
        .collect()
}
fn default_denied_extensions() -> Vec<String> {
    [".exe", ".bat", ".cmd", ".sh", ".ps1"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_rate_limit() -> usize {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
            url: None,
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_llm_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4000
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssistantConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
    #[serde(default = "default_answer_timeout_secs")]
    pub answer_timeout_secs: u64,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            history_cap: default_history_cap(),
            preview_chars: default_preview_chars(),
            answer_timeout_secs: default_answer_timeout_secs(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_history_cap() -> usize {
    20
}
fn default_preview_chars() -> usize {
    500
}
fn default_answer_timeout_secs() -> u64 {
    60
}
fn default_session_ttl_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.max_chars == 0 {
        bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        bail!(
            "chunking.overlap_chars ({}) must be smaller than chunking.max_chars ({})",
            config.chunking.overlap_chars,
            config.chunking.max_chars
        );
    }

    // Validate assistant
    if config.assistant.top_k < 1 {
        bail!("assistant.top_k must be >= 1");
    }
    if config.security.max_query_chars == 0 {
        bail!("security.max_query_chars must be > 0");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hash" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, openai, or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.provider != "hash" && config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
    }

    // Validate language model
    match config.llm.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        bail!("llm.temperature must be in [0.0, 2.0]");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.chunking.max_chars, 1000);
        assert_eq!(config.chunking.overlap_chars, 200);
        assert_eq!(config.scanner.max_file_size, 10_485_760);
        assert_eq!(config.security.rate_limit_per_minute, 60);
        assert_eq!(config.index.collection, "codebase_embeddings");
        assert_eq!(config.assistant.top_k, 5);
        assert!(!config.embedding.is_enabled());
        assert!(!config.llm.is_enabled());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_max() {
        let err = parse_config("[chunking]\nmax_chars = 100\noverlap_chars = 100\n").unwrap_err();
        assert!(err.to_string().contains("overlap_chars"));
    }

    #[test]
    fn test_enabled_embedding_requires_dims() {
        let err = parse_config("[embedding]\nprovider = \"openai\"\nmodel = \"m\"\n").unwrap_err();
        assert!(err.to_string().contains("dims"));
    }

    #[test]
    fn test_hash_embedding_needs_no_model() {
        let config = parse_config("[embedding]\nprovider = \"hash\"\ndims = 64\n").unwrap();
        assert!(config.embedding.is_enabled());
    }

    #[test]
    fn test_unknown_llm_provider_rejected() {
        assert!(parse_config("[llm]\nprovider = \"carrier-pigeon\"\n").is_err());
    }
}
