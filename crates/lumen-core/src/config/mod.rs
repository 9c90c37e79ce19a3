//! Gateway configuration with layered loading.
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: hardcoded in the struct `Default` impls
//! 2. **Config file**: TOML file named by the `LUMEN_CONFIG` env var
//! 3. **Environment variables**: `LUMEN_*` overrides for specific fields
//!
//! Invalid configurations (no endpoints, unparseable URLs, zero timeouts)
//! are rejected at load time rather than failing at first use.
//!
//! ```toml
//! [endpoints.proxy]
//! name = "proxy"
//! url = "https://app.example.com/api/llm"
//!
//! [[endpoints.direct]]
//! name = "primary"
//! url = "https://api.openai.com/v1"
//!
//! [[endpoints.direct]]
//! name = "mirror"
//! url = "https://mirror.example.net/v1"
//!
//! [key_pool]
//! keys = ["sk-prod-..."]
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::gateway::keypool::CredentialRule;
use crate::gateway::registry::BreakerPolicy;

/// Whether an endpoint is the same-origin proxy or a direct provider URL.
///
/// The proxy sits in front of the provider on the application's own origin,
/// so the credential never crosses to a third party; direct endpoints are
/// the fallback when the proxy tier is down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointRole {
    Proxy,
    Direct,
}

/// One callable endpoint. Static configuration, never mutated at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    /// Base URL; the chat and models paths from [`HttpConfig`] are appended.
    pub url: String,
    #[serde(default = "default_role")]
    pub role: EndpointRole,
}

fn default_role() -> EndpointRole {
    EndpointRole::Direct
}

/// Ordered endpoint set: proxy first, then directs in listed order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub proxy: Option<EndpointConfig>,
    pub direct: Vec<EndpointConfig>,
}

impl EndpointsConfig {
    /// Candidates in priority order with roles normalized.
    #[must_use]
    pub fn candidates(&self) -> Vec<EndpointConfig> {
        let mut out = Vec::with_capacity(self.direct.len() + 1);
        if let Some(proxy) = &self.proxy {
            out.push(EndpointConfig { role: EndpointRole::Proxy, ..proxy.clone() });
        }
        for ep in &self.direct {
            out.push(EndpointConfig { role: EndpointRole::Direct, ..ep.clone() });
        }
        out
    }
}

/// Outer retry loop policy for the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Extra passes over the endpoint list after the first.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 2, backoff_base_ms: 1000, backoff_cap_ms: 8000 }
    }
}

impl RetryPolicy {
    /// Backoff before retry pass `attempt` (1-based): doubles each pass,
    /// capped.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let ms = self.backoff_base_ms.saturating_mul(1_u64 << exp);
        Duration::from_millis(ms.min(self.backoff_cap_ms))
    }
}

/// HTTP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-attempt timeout for production calls, seconds.
    pub request_timeout_secs: u64,
    /// Per-probe timeout, seconds.
    pub probe_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Ceiling on concurrent in-flight requests across all logical sends.
    pub concurrent_limit: usize,
    /// Path appended to an endpoint base URL for completions.
    pub chat_path: String,
    /// Path appended to an endpoint base URL for the probe's model listing.
    pub models_path: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            probe_timeout_secs: 6,
            connect_timeout_secs: 5,
            concurrent_limit: 64,
            chat_path: "/chat/completions".to_string(),
            models_path: "/models".to_string(),
        }
    }
}

impl HttpConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Initial credential pool and its validity rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyPoolConfig {
    pub keys: Vec<String>,
    pub rule: CredentialRule,
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub endpoints: EndpointsConfig,
    pub key_pool: KeyPoolConfig,
    pub breaker: BreakerPolicy,
    pub retry: RetryPolicy,
    pub http: HttpConfig,
}

impl GatewayConfig {
    /// Loads configuration from defaults, the optional file named by
    /// `LUMEN_CONFIG`, and `LUMEN_*` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Ok(path) = std::env::var("LUMEN_CONFIG") {
            builder = builder.add_source(File::from(Path::new(&path)));
        }
        let settings: Self = builder
            .add_source(
                Environment::with_prefix("LUMEN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate().map_err(ConfigError::Message)?;
        Ok(settings)
    }

    /// Loads configuration from an explicit TOML file plus env overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let settings: Self = Config::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix("LUMEN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate().map_err(ConfigError::Message)?;
        Ok(settings)
    }

    /// Structural validation, applied after every load path.
    pub fn validate(&self) -> Result<(), String> {
        let candidates = self.endpoints.candidates();
        if candidates.is_empty() {
            return Err("at least one endpoint (proxy or direct) is required".to_string());
        }
        for ep in &candidates {
            url::Url::parse(&ep.url)
                .map_err(|e| format!("endpoint '{}' has invalid url '{}': {e}", ep.name, ep.url))?;
        }
        if self.http.request_timeout_secs == 0 || self.http.probe_timeout_secs == 0 {
            return Err("timeouts must be positive".to_string());
        }
        if self.breaker.default_threshold == 0 || self.breaker.complex_threshold == 0 {
            return Err("breaker thresholds must be at least 1".to_string());
        }
        if self.breaker.tuning.success_threshold == 0 {
            return Err("breaker success threshold must be at least 1".to_string());
        }
        Ok(())
    }
}
