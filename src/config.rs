//! Config loader (A1): YAML with `${NAME:default}` environment-variable
//! expansion, deserialized and validated before the server starts.

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_read_timeout() -> u64 {
    30
}
fn default_write_timeout() -> u64 {
    30
}
fn default_idle_timeout() -> u64 {
    120
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitDefaults {
    pub requests_per_second: f64,
    #[serde(default)]
    pub capacity: Option<i64>,
}

impl Default for RateLimitDefaults {
    fn default() -> Self {
        Self { requests_per_second: 1.0, capacity: Some(1) }
    }
}

impl RateLimitDefaults {
    /// The configured capacity, or `⌈2 · rate⌉` if the config left it unset.
    pub fn effective_capacity(&self) -> i64 {
        self.capacity.unwrap_or_else(|| default_burst_capacity(self.requests_per_second))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DomainRateLimit {
    pub domain: String,
    pub requests_per_second: f64,
    #[serde(default)]
    pub capacity: Option<i64>,
    pub target_url: String,
}

impl DomainRateLimit {
    /// The configured capacity, or `⌈2 · rate⌉` if the config left it unset.
    pub fn effective_capacity(&self) -> i64 {
        self.capacity.unwrap_or_else(|| default_burst_capacity(self.requests_per_second))
    }
}

/// Default burst capacity per §3: `⌈2 · rate⌉`.
fn default_burst_capacity(requests_per_second: f64) -> i64 {
    (2.0 * requests_per_second).ceil() as i64
}

#[derive(Debug, Clone, Deserialize)]
pub struct DynamicRateLimitConfig {
    #[serde(default = "default_true")]
    pub use_headers: bool,
    #[serde(default = "default_true")]
    pub header_fallback: bool,
    #[serde(default = "default_header_timeout_secs")]
    pub header_timeout_secs: u64,
    #[serde(default = "default_reset_buffer_ms")]
    pub reset_buffer_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_header_timeout_secs() -> u64 {
    300
}
fn default_reset_buffer_ms() -> u64 {
    100
}

impl Default for DynamicRateLimitConfig {
    fn default() -> Self {
        Self { use_headers: true, header_fallback: true, header_timeout_secs: 300, reset_buffer_ms: 100 }
    }
}

impl DynamicRateLimitConfig {
    pub fn reset_buffer(&self) -> Duration {
        Duration::from_millis(self.reset_buffer_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CerebrasLimitsConfig {
    pub rpm_limit: i64,
    pub tpm_limit: i64,
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_priority_threshold")]
    pub priority_threshold: f64,
    #[serde(default)]
    pub rate_limits: DynamicRateLimitConfig,
    pub upstream_base_url: String,
    #[serde(default = "default_llm_hosts")]
    pub llm_hosts: Vec<String>,
}

fn default_max_queue_depth() -> usize {
    100
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_priority_threshold() -> f64 {
    0.7
}
fn default_llm_hosts() -> Vec<String> {
    vec!["api.cerebras.ai".to_string(), "inference.cerebras.ai".to_string()]
}

impl CerebrasLimitsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub default_rate_limit: RateLimitDefaults,
    #[serde(default)]
    pub rate_limits: Vec<DomainRateLimit>,
    pub cerebras_limits: CerebrasLimitsConfig,
    /// Model name → target base URL, consulted by the LLM handler before it
    /// falls back to `cerebras_limits.upstream_base_url`.
    #[serde(default)]
    pub model_routes: HashMap<String, String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            read_timeout_secs: default_read_timeout(),
            write_timeout_secs: default_write_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub detail: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration error: {}", self.detail)
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    fn new(detail: impl Into<String>) -> Self {
        Self { detail: detail.into() }
    }
}

/// Reads `path`, expands `${NAME:default}`/`${NAME}` env-var references in
/// the raw text, parses as YAML, and validates the result.
pub fn load(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::new(format!("reading {}: {e}", path.display())))?;
    load_from_str(&raw)
}

pub fn load_from_str(raw: &str) -> Result<ProxyConfig, ConfigError> {
    let expanded = expand_env_vars(raw)?;
    let config: ProxyConfig =
        serde_yaml::from_str(&expanded).map_err(|e| ConfigError::new(format!("parsing YAML: {e}")))?;
    validate(&config)?;
    Ok(config)
}

/// Expands every `${NAME}`/`${NAME:default}` occurrence in `input`. `${NAME}`
/// without a default is an error if `NAME` is unset.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let end = after_open
            .find('}')
            .ok_or_else(|| ConfigError::new("unterminated ${...} in config"))?;
        let expr = &after_open[..end];

        let (name, default) = match expr.split_once(':') {
            Some((n, d)) => (n, Some(d)),
            None => (expr, None),
        };

        let value = match std::env::var(name) {
            Ok(v) => v,
            Err(_) => default.map(str::to_string).ok_or_else(|| {
                ConfigError::new(format!("environment variable {name} is not set and no default was given"))
            })?,
        };

        out.push_str(&value);
        rest = &after_open[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn validate(config: &ProxyConfig) -> Result<(), ConfigError> {
    if config.server.bind_addr.trim().is_empty() {
        return Err(ConfigError::new("server.bind_addr must not be empty"));
    }
    if config.default_rate_limit.requests_per_second <= 0.0 {
        return Err(ConfigError::new("default_rate_limit.requests_per_second must be positive"));
    }
    if let Some(capacity) = config.default_rate_limit.capacity {
        if capacity <= 0 {
            return Err(ConfigError::new("default_rate_limit.capacity must be positive"));
        }
    }
    for rl in &config.rate_limits {
        if rl.requests_per_second <= 0.0 {
            return Err(ConfigError::new(format!("rate_limits[{}].requests_per_second must be positive", rl.domain)));
        }
        if let Some(capacity) = rl.capacity {
            if capacity <= 0 {
                return Err(ConfigError::new(format!("rate_limits[{}].capacity must be positive", rl.domain)));
            }
        }
    }
    if config.cerebras_limits.rpm_limit <= 0 {
        return Err(ConfigError::new("cerebras_limits.rpm_limit must be positive"));
    }
    if config.cerebras_limits.tpm_limit <= 0 {
        return Err(ConfigError::new("cerebras_limits.tpm_limit must be positive"));
    }
    if config.cerebras_limits.max_queue_depth == 0 {
        return Err(ConfigError::new("cerebras_limits.max_queue_depth must be positive"));
    }
    if config.cerebras_limits.upstream_base_url.trim().is_empty() {
        return Err(ConfigError::new("cerebras_limits.upstream_base_url must not be empty"));
    }
    Ok(())
}
