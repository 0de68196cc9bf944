//! Config schema: server binding, identity service, upstream calls, module
//! registry refresh and rate limiting.

use {
    secrecy::Secret,
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GatehouseConfig {
    pub server: ServerConfig,
    pub identity: IdentityConfig,
    pub upstream: UpstreamConfig,
    pub http: HttpConfig,
    pub registry: RegistryConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 7272,
        }
    }
}

/// The identity service validates client tokens and also serves the module
/// directory (`GET /modules`).
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub base_url: String,
    /// Sent as `Authorization: Bearer ...` on every identity request.
    pub api_token: Option<Secret<String>>,
    pub timeout_secs: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_token: None,
            timeout_secs: 10,
        }
    }
}

/// Calls forwarded to modules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: "LAE-Gateway".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub refresh_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 60,
        }
    }
}

/// Where per-user counters live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterBackend {
    /// Shared Redis instance; throttling is global across gateway processes.
    #[default]
    Redis,
    /// Process-local counters. Only correct with a single gateway process.
    Memory,
}

/// What a throttled client gets back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectMode {
    /// Drop the message without replying.
    #[default]
    Silent,
    /// Reply `{code: 429, msg: "Too Many Requests"}`.
    Reply,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub backend: CounterBackend,
    pub redis_url: Option<String>,
    /// Accepted messages per user per window.
    pub limit: u32,
    pub window_secs: u64,
    pub reject: RejectMode,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backend: CounterBackend::Redis,
            redis_url: Some("redis://127.0.0.1:6379".into()),
            limit: 20,
            window_secs: 60,
            reject: RejectMode::Silent,
        }
    }
}
