use std::path::{Path, PathBuf};

use {
    anyhow::Context,
    secrecy::Secret,
    tracing::{debug, info},
};

use crate::{env_subst::substitute_env, schema::GatehouseConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "gatehouse.toml",
    "gatehouse.yaml",
    "gatehouse.yml",
    "gatehouse.json",
];

/// Environment variables that override file values after loading.
pub const ENV_IDENTITY_URL: &str = "GATEHOUSE_IDENTITY_URL";
pub const ENV_IDENTITY_TOKEN: &str = "GATEHOUSE_IDENTITY_TOKEN";
pub const ENV_REDIS_URL: &str = "GATEHOUSE_REDIS_URL";

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<GatehouseConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path).with_context(|| format!("failed to parse {}", path.display()))
}

/// Resolve the effective configuration.
///
/// Uses `explicit` when given, otherwise the first file found by
/// [`find_config_file`], otherwise built-in defaults. Environment overrides
/// are applied last and the result is validated.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<GatehouseConfig> {
    let mut config = match explicit {
        Some(path) => load_config(path)?,
        None => match find_config_file() {
            Some(path) => {
                debug!(path = %path.display(), "loading config");
                load_config(&path)?
            },
            None => {
                info!("no config file found, using defaults and environment");
                GatehouseConfig::default()
            },
        },
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config.validate()?;
    Ok(config)
}

/// Find the first config file in standard locations.
///
/// Search order:
/// 1. `./gatehouse.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/gatehouse/gatehouse.{toml,yaml,yml,json}` (user-global)
pub fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

/// Returns `~/.config/gatehouse/` on all platforms.
pub fn config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().join(".config").join("gatehouse"))
}

/// Apply `GATEHOUSE_*` overrides. Empty values are ignored.
pub fn apply_env_overrides(
    config: &mut GatehouseConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(url) = get(ENV_IDENTITY_URL) {
        config.identity.base_url = url;
    }
    if let Some(token) = get(ENV_IDENTITY_TOKEN) {
        config.identity.api_token = Some(Secret::new(token));
    }
    if let Some(url) = get(ENV_REDIS_URL) {
        config.rate_limit.redis_url = Some(url);
    }
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<GatehouseConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
