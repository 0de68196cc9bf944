//! Module registry: an immutable snapshot of known modules, swapped wholesale
//! on refresh.

use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    serde_json::Value,
    tokio::{sync::RwLock, task::JoinHandle, time::Instant},
    tracing::{debug, warn},
};

use gatehouse_protocol::message::id_key;

use crate::identity::{IdentityClient, IdentityError};

// ── Module ───────────────────────────────────────────────────────────────────

/// A backend the gateway forwards requests to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub id: String,
    pub base_url: String,
    pub api_token: String,
}

impl Module {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            api_token: api_token.into(),
        }
    }

    /// `{base_url}/remote/functions/{path}`, tolerant of stray slashes on
    /// either side of the join.
    pub fn function_url(&self, path: &str) -> String {
        format!(
            "{}/remote/functions/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Build a module from one directory entry (`{id, url, api_token, ...}`).
    fn from_entry(entry: &Value) -> Option<Self> {
        let id = entry.get("id").and_then(id_key)?;
        let base_url = entry
            .get("url")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())?;
        let api_token = match entry.get("api_token") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        Some(Self::new(id, base_url, api_token))
    }
}

// ── Snapshot ─────────────────────────────────────────────────────────────────

/// One published view of the registry. Never mutated after construction.
#[derive(Debug, Default)]
pub struct ModuleSnapshot {
    modules: HashMap<String, Arc<Module>>,
}

impl ModuleSnapshot {
    pub fn from_modules(modules: impl IntoIterator<Item = Module>) -> Self {
        Self {
            modules: modules
                .into_iter()
                .map(|m| (m.id.clone(), Arc::new(m)))
                .collect(),
        }
    }

    /// Build from raw directory entries, skipping unusable ones. Later
    /// duplicates of an id replace earlier ones.
    pub fn from_entries(entries: &[Value]) -> Self {
        let modules = entries.iter().filter_map(|entry| {
            let module = Module::from_entry(entry);
            if module.is_none() {
                warn!(entry = %entry, "skipping module entry without id or url");
            }
            module
        });
        Self::from_modules(modules)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Module>> {
        self.modules.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error(transparent)]
    Directory(#[from] IdentityError),
    #[error("module directory returned no usable modules")]
    Empty,
}

/// Holds the currently published snapshot. Readers clone the `Arc` and never
/// observe a partially built map.
pub struct ModuleRegistry {
    current: RwLock<Arc<ModuleSnapshot>>,
    refreshed_at: RwLock<Option<Instant>>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::with_snapshot(ModuleSnapshot::default())
    }

    pub fn with_snapshot(snapshot: ModuleSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            refreshed_at: RwLock::new(None),
        }
    }

    pub async fn snapshot(&self) -> Arc<ModuleSnapshot> {
        Arc::clone(&*self.current.read().await)
    }

    pub async fn lookup(&self, id: &str) -> Option<Arc<Module>> {
        self.current.read().await.get(id)
    }

    /// Replace the snapshot in one step.
    pub async fn publish(&self, snapshot: ModuleSnapshot) {
        *self.current.write().await = Arc::new(snapshot);
        *self.refreshed_at.write().await = Some(Instant::now());
    }

    pub async fn refreshed_at(&self) -> Option<Instant> {
        *self.refreshed_at.read().await
    }

    /// Pull the directory and publish it. On any failure the previous
    /// snapshot stays in place.
    pub async fn refresh(&self, identity: &IdentityClient) -> Result<usize, RefreshError> {
        let entries = identity.fetch_modules().await?;
        let snapshot = ModuleSnapshot::from_entries(&entries);
        if snapshot.is_empty() {
            return Err(RefreshError::Empty);
        }
        let count = snapshot.len();
        self.publish(snapshot).await;
        Ok(count)
    }
}

/// Refresh once immediately, then every `every`. Runs until aborted.
pub fn spawn_refresh_loop(
    registry: Arc<ModuleRegistry>,
    identity: Arc<IdentityClient>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match registry.refresh(&identity).await {
                Ok(count) => debug!(modules = count, "module registry refreshed"),
                Err(e) => {
                    let kept = registry.snapshot().await.len();
                    warn!(error = %e, kept, "module refresh failed, keeping previous snapshot");
                },
            }
        }
    })
}
