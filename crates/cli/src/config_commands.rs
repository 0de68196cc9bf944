use std::{fmt::Write, path::PathBuf, time::Duration};

use {
    anyhow::Result,
    clap::Subcommand,
    gatehouse_config::GatehouseConfig,
    gatehouse_gateway::{
        identity::IdentityClient,
        registry::{ModuleRegistry, RefreshError},
    },
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Load and validate the config, then print the resolved values.
    Check {
        /// Config file (defaults to discovery).
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

pub fn handle_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Check { config } => {
            let cfg = gatehouse_config::load(config.as_deref())?;
            print!("{}", describe(&cfg));
            println!("config ok");
            Ok(())
        },
    }
}

/// Fetch the module directory once and print the ids it would publish.
pub async fn list_modules(config: Option<PathBuf>) -> Result<()> {
    let cfg = gatehouse_config::load(config.as_deref())?;
    let identity = IdentityClient::from_config(&cfg.identity, &cfg.http)?;
    let registry = ModuleRegistry::new();
    match registry.refresh(&identity).await {
        Ok(count) => {
            let snapshot = registry.snapshot().await;
            for id in snapshot.ids() {
                if let Some(module) = snapshot.get(id) {
                    println!("{id}\t{}", module.base_url);
                }
            }
            println!("{count} module(s)");
            Ok(())
        },
        Err(RefreshError::Empty) => {
            println!("directory returned no usable modules");
            Ok(())
        },
        Err(e) => Err(e.into()),
    }
}

/// Human-readable summary of the resolved config. Secrets are never printed.
pub fn describe(cfg: &GatehouseConfig) -> String {
    let secret = |set: bool| if set { "[redacted]" } else { "(unset)" };
    let secs = |s: u64| format!("{:?}", Duration::from_secs(s));

    let mut out = String::new();
    let _ = writeln!(out, "server.bind            = {}", cfg.server.bind);
    let _ = writeln!(out, "server.port            = {}", cfg.server.port);
    let _ = writeln!(out, "identity.base_url      = {}", cfg.identity.base_url);
    let _ = writeln!(
        out,
        "identity.api_token     = {}",
        secret(cfg.identity.api_token.is_some())
    );
    let _ = writeln!(out, "identity.timeout       = {}", secs(cfg.identity.timeout_secs));
    let _ = writeln!(out, "upstream.timeout       = {}", secs(cfg.upstream.timeout_secs));
    let _ = writeln!(out, "http.user_agent        = {}", cfg.http.user_agent);
    let _ = writeln!(
        out,
        "registry.refresh       = {}",
        secs(cfg.registry.refresh_interval_secs)
    );
    let _ = writeln!(out, "rate_limit.backend     = {:?}", cfg.rate_limit.backend);
    let _ = writeln!(
        out,
        "rate_limit.redis_url   = {}",
        secret(cfg.rate_limit.redis_url.is_some())
    );
    let _ = writeln!(out, "rate_limit.limit       = {}", cfg.rate_limit.limit);
    let _ = writeln!(out, "rate_limit.window      = {}", secs(cfg.rate_limit.window_secs));
    let _ = writeln!(out, "rate_limit.reject      = {:?}", cfg.rate_limit.reject);
    out
}
