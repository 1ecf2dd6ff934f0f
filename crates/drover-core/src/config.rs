use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DroverError, Result};

/// Top-level Drover configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub invoke: InvokeConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub intent: IntentConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub embedding: Option<EmbeddingConfig>,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }

/// Default budget for model invocations.
///
/// `max_retries` counts retries after the first attempt, so the default of 2
/// gives three attempts in total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for InvokeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl InvokeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn default_timeout_secs() -> u64 { 300 }
fn default_max_retries() -> u32 { 2 }
fn default_retry_delay_ms() -> u64 { 20_000 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String { "~/.drover/drover.db".to_string() }

/// Intent recognition tuning and datasets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentConfig {
    /// Number of nearest labelled examples to tally.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// An intent is clear when its share strictly exceeds this value.
    #[serde(default = "default_clarity_threshold")]
    pub clarity_threshold: f64,
    #[serde(default)]
    pub customer_dataset: Option<String>,
    #[serde(default)]
    pub driver_dataset: Option<String>,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            clarity_threshold: default_clarity_threshold(),
            customer_dataset: None,
            driver_dataset: None,
        }
    }
}

fn default_top_k() -> usize { 15 }
fn default_clarity_threshold() -> f64 { 0.6 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Upper bound on think steps before the loop is forced to finish.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_max_iterations() -> usize { 8 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    #[serde(default = "default_embedding_dims")]
    pub dimensions: usize,
}

fn default_embedding_dims() -> usize { 1024 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_coupon_base_url")]
    pub coupon_base_url: String,
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            coupon_base_url: default_coupon_base_url(),
            timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_coupon_base_url() -> String { "http://localhost:8511".to_string() }
fn default_tool_timeout_secs() -> u64 { 10 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| DroverError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| DroverError::Config(e.to_string()))
    }

    /// Resolve the record store path (expand ~).
    pub fn store_path(&self) -> PathBuf {
        expand_home(&self.store.path)
    }

    /// Resolve a dataset path (expand ~).
    pub fn resolve_path(raw: &str) -> PathBuf {
        expand_home(raw)
    }
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep original if env var not set
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
