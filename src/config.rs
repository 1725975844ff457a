//! TOML configuration.
//!
//! Only `[db]` is required; every other section falls back to defaults.
//! [`load_config`] parses and validates the file in one step.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub catalogue: CatalogueConfig,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub commits: CommitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_tokens: None,
            temperature: None,
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_five_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_five_secs")]
    pub failure_backoff_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            failure_backoff_secs: 5,
        }
    }
}

fn default_five_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlannerConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_backoff_base_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_max_file_chars")]
    pub max_file_chars: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_file_chars: default_max_file_chars(),
        }
    }
}

fn default_max_concurrency() -> usize {
    3
}
fn default_max_file_chars() -> usize {
    20_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogueConfig {
    #[serde(default = "default_smart_filter_threshold")]
    pub smart_filter_threshold: usize,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for CatalogueConfig {
    fn default() -> Self {
        Self {
            smart_filter_threshold: default_smart_filter_threshold(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_smart_filter_threshold() -> usize {
    800
}

#[derive(Debug, Deserialize, Clone)]
pub struct AcquisitionConfig {
    #[serde(default = "default_repositories_dir")]
    pub repositories_dir: PathBuf,
    #[serde(default = "default_true")]
    pub shallow: bool,
    #[serde(default)]
    pub token_env: Option<String>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            repositories_dir: default_repositories_dir(),
            shallow: true,
            token_env: None,
        }
    }
}

fn default_repositories_dir() -> PathBuf {
    PathBuf::from("./data/repositories")
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct CommitsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_commits")]
    pub max_commits: usize,
}

impl Default for CommitsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_commits: default_max_commits(),
        }
    }
}

fn default_max_commits() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.generator.max_concurrency == 0 {
        anyhow::bail!("generator.max_concurrency must be >= 1");
    }

    if config.planner.max_attempts == 0 {
        anyhow::bail!("planner.max_attempts must be >= 1");
    }

    if config.generation.timeout_secs == 0 {
        anyhow::bail!("generation.timeout_secs must be > 0");
    }

    match config.generation.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if config.generation.model.is_none() {
                anyhow::bail!("generation.model must be specified when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}
