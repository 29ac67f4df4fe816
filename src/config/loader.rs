//! Configuration Loader
//!
//! Builds a [`ClientConfig`] from built-in defaults, JSON files and the
//! environment. Later sources override earlier ones field by field.

use crate::client::http::{RetryingSender, DEFAULT_CONNECT_TIMEOUT, DEFAULT_TIMEOUT};
use crate::client::metrics::MetricsSink;
use crate::client::retry::{
    RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES,
    DEFAULT_RANDOMIZATION_FACTOR,
};
use crate::config::endpoint::{insert_header, join_url, Endpoint, EndpointProvider};
use crate::error::{ResponsesError, Result};
use crate::stream::orchestrator::StreamOptions;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Environment variable naming an extra config file
pub const CONFIG_PATH_ENV: &str = "RESPONSES_SSE_CONFIG";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL every API path is joined to
    pub base_url: String,

    /// Environment variable that overrides `base_url` when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url_env: Option<String>,

    /// Environment variable holding a bearer token for `Authorization`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Static headers sent with every request
    pub headers: HashMap<String, String>,

    /// Header name to the environment variable holding its value
    pub header_env: HashMap<String, String>,

    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub pool_max_idle_per_host: usize,

    /// Retries after the first attempt
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,

    /// Backoff randomization factor, 0 disables jitter
    pub retry_jitter: f64,

    /// Channel capacity between the stream reader and its consumer
    pub stream_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            base_url_env: Some("OPENAI_BASE_URL".to_string()),
            api_key_env: Some(DEFAULT_API_KEY_ENV.to_string()),
            headers: HashMap::new(),
            header_env: HashMap::new(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            pool_max_idle_per_host: 10,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_BASE_DELAY.as_millis() as u64,
            retry_max_delay_ms: DEFAULT_MAX_DELAY.as_millis() as u64,
            retry_jitter: DEFAULT_RANDOMIZATION_FACTOR,
            stream_buffer: 1,
        }
    }
}

impl ClientConfig {
    /// Config pointing at `base_url` with no environment lookups
    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            base_url_env: None,
            api_key_env: None,
            ..Self::default()
        }
    }

    /// Check values that serde alone cannot
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(ResponsesError::Config("base_url must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return Err(ResponsesError::Config(format!(
                "retry_jitter must be within 0..=1, got {}",
                self.retry_jitter
            )));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ResponsesError::Config(
                "retry_base_delay_ms must not exceed retry_max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Base URL after the environment override
    pub fn resolved_base_url(&self) -> String {
        self.base_url_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| self.base_url.clone())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_retries(self.max_retries)
            .with_base_delay(Duration::from_millis(self.retry_base_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry_max_delay_ms))
            .with_randomization_factor(self.retry_jitter)
    }

    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions::default()
            .with_timeout(self.timeout())
            .with_buffer(self.stream_buffer)
    }

    /// Build a sender from these settings
    pub fn build_sender(&self, metrics: Arc<dyn MetricsSink>) -> Result<RetryingSender> {
        self.validate()?;
        let sender = RetryingSender::with_timeouts(
            self.timeout(),
            Duration::from_secs(self.connect_timeout_secs),
            self.pool_max_idle_per_host,
        )?;

        Ok(sender
            .with_policy(self.retry_policy())
            .with_metrics(metrics))
    }

    fn resolve_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        for (name, value) in &self.headers {
            insert_header(&mut headers, name, value)?;
        }

        for (name, var) in &self.header_env {
            match std::env::var(var) {
                Ok(value) => insert_header(&mut headers, name, &value)?,
                Err(_) => debug!(header = %name, env = %var, "header environment variable not set"),
            }
        }

        if let Some(var) = &self.api_key_env {
            match std::env::var(var) {
                Ok(key) if !key.is_empty() => {
                    insert_header(&mut headers, AUTHORIZATION.as_str(), &format!("Bearer {}", key))?
                }
                _ => debug!(env = %var, "API key environment variable not set"),
            }
        }

        Ok(headers)
    }
}

impl EndpointProvider for ClientConfig {
    fn endpoint(&self, path: &str) -> Result<Endpoint> {
        Ok(Endpoint {
            url: join_url(&self.resolved_base_url(), path),
            headers: self.resolve_headers()?,
        })
    }
}

/// Configuration loader with support for multiple sources
pub struct ConfigLoader {
    /// Merged JSON of every layer loaded so far
    merged: Value,

    config: ClientConfig,
}

impl ConfigLoader {
    /// Load `.env`, then every default config path that exists
    pub fn new() -> Result<Self> {
        load_dotenv();

        let mut loader = Self::defaults()?;
        loader.load_from_default_paths()?;
        Ok(loader)
    }

    /// Load `.env`, then a single config file over the defaults
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        load_dotenv();

        let mut loader = Self::defaults()?;
        loader.load_from_file(path)?;
        Ok(loader)
    }

    fn defaults() -> Result<Self> {
        let config = ClientConfig::default();
        Ok(Self {
            merged: serde_json::to_value(&config)?,
            config,
        })
    }

    fn load_from_default_paths(&mut self) -> Result<()> {
        for path in Self::config_paths() {
            if path.exists() {
                self.load_from_file(&path)?;
            }
        }
        Ok(())
    }

    /// Candidate config files, lowest precedence first
    pub fn config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".responses-sse").join("config.json"));
        }

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("responses-sse").join("config.json"));
        }

        paths.push(PathBuf::from("responses-sse.json"));

        if let Ok(custom_path) = std::env::var(CONFIG_PATH_ENV) {
            paths.push(PathBuf::from(custom_path));
        }

        paths
    }

    /// Merge one JSON file
    pub fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ResponsesError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let layer: Value = serde_json::from_str(&content).map_err(|e| {
            ResponsesError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        self.merge_json(layer)
            .map_err(|e| ResponsesError::Config(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "loaded config file");
        Ok(())
    }

    /// Merge a JSON object over the current configuration
    pub fn merge_json(&mut self, layer: Value) -> Result<()> {
        if !layer.is_object() {
            return Err(ResponsesError::Config(
                "config layer must be a JSON object".to_string(),
            ));
        }

        let mut merged = self.merged.clone();
        merge_value(&mut merged, layer);

        let config: ClientConfig = serde_json::from_value(merged.clone())
            .map_err(|e| ResponsesError::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;

        self.merged = merged;
        self.config = config;
        Ok(())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn into_config(self) -> ClientConfig {
        self.config
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self {
            merged: Value::Object(Default::default()),
            config: ClientConfig::default(),
        })
    }
}

fn load_dotenv() {
    if let Ok(path) = dotenvy::dotenv() {
        debug!(path = %path.display(), "loaded .env");
    }
}

/// Objects merge key by key; anything else replaces
fn merge_value(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
