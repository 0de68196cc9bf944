//! Configuration loading for the gateway.
//!
//! Files are TOML, YAML or JSON. `${VAR}` placeholders are expanded before
//! parsing and `GATEHOUSE_*` variables override the parsed values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{apply_env_overrides, find_config_file, load, load_config},
    schema::{
        CounterBackend, GatehouseConfig, HttpConfig, IdentityConfig, RateLimitConfig,
        RegistryConfig, RejectMode, ServerConfig, UpstreamConfig,
    },
    validate::ConfigError,
};
