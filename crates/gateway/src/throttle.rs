//! Per-user rate limiting over a shared counter store.
//!
//! A user's counter lives at `throttle:{user_id}`. Admission reads the
//! counter, refuses once it has reached the limit, otherwise increments it
//! and pushes its expiry out to one full window. Completed requests give
//! their slot back, so under steady load the counter approximates the number
//! of requests in flight rather than a pure request count.

use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    tokio::{sync::Mutex, time::Instant},
    tracing::{debug, warn},
};

#[derive(Debug, thiserror::Error)]
pub enum CounterStoreError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Storage for rate counters. Implementations must make `try_acquire`
/// atomic with respect to concurrent callers on the same key.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` unless it already holds `limit` or more. Returns the
    /// new count, or `None` when the limit was reached (nothing changes).
    async fn try_acquire(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<Option<i64>, CounterStoreError>;

    /// Decrement `key`, never below zero.
    async fn release(&self, key: &str) -> Result<(), CounterStoreError>;

    /// Current value, zero when absent or expired.
    async fn current(&self, key: &str) -> Result<i64, CounterStoreError>;
}

// ── Redis ────────────────────────────────────────────────────────────────────

const ACQUIRE_SCRIPT: &str = r"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current >= tonumber(ARGV[1]) then
    return -1
end
local count = redis.call('INCR', KEYS[1])
redis.call('EXPIRE', KEYS[1], ARGV[2])
return count
";

const RELEASE_SCRIPT: &str = r"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current > 0 then
    return redis.call('DECR', KEYS[1])
end
return 0
";

/// Counters shared by every gateway process pointed at the same Redis.
pub struct RedisCounterStore {
    conn: redis::aio::ConnectionManager,
    acquire: redis::Script,
    release: redis::Script,
}

impl RedisCounterStore {
    /// Connect to Redis server. Supports both `redis://` and `rediss://` URLs.
    pub async fn connect(url: &str) -> Result<Self, CounterStoreError> {
        let client = redis::Client::open(url)?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            acquire: redis::Script::new(ACQUIRE_SCRIPT),
            release: redis::Script::new(RELEASE_SCRIPT),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn try_acquire(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<Option<i64>, CounterStoreError> {
        let mut conn = self.conn.clone();
        let count: i64 = self
            .acquire
            .key(key)
            .arg(limit)
            .arg(window.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?;
        Ok((count >= 0).then_some(count))
    }

    async fn release(&self, key: &str) -> Result<(), CounterStoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = self.release.key(key).invoke_async(&mut conn).await?;
        Ok(())
    }

    async fn current(&self, key: &str) -> Result<i64, CounterStoreError> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value.unwrap_or(0))
    }
}

// ── In-memory ────────────────────────────────────────────────────────────────

/// Stale keys are swept at most once per doubling of the map, with this
/// floor.
const SWEEP_FLOOR: usize = 1024;

struct Slot {
    count: i64,
    expires_at: Instant,
}

#[derive(Default)]
struct Slots {
    map: HashMap<String, Slot>,
    sweep_at: usize,
}

impl Slots {
    /// Drop `key` if its window has lapsed. Other expired keys go in a full
    /// sweep once the map has doubled since the last one.
    fn evict_expired(&mut self, key: &str, now: Instant) {
        if self.map.get(key).is_some_and(|s| s.expires_at <= now) {
            self.map.remove(key);
        }
        if self.map.len() >= self.sweep_at {
            self.map.retain(|_, s| s.expires_at > now);
            self.sweep_at = (self.map.len() * 2).max(SWEEP_FLOOR);
        }
    }
}

/// Process-local counters with the same semantics as the Redis store.
#[derive(Default)]
pub struct MemoryCounterStore {
    slots: Mutex<Slots>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn try_acquire(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<Option<i64>, CounterStoreError> {
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        slots.evict_expired(key, now);
        let slots = &mut slots.map;

        let current = slots.get(key).map_or(0, |s| s.count);
        if current >= i64::from(limit) {
            return Ok(None);
        }
        let slot = slots.entry(key.to_string()).or_insert(Slot {
            count: 0,
            expires_at: now,
        });
        slot.count += 1;
        slot.expires_at = now + window;
        Ok(Some(slot.count))
    }

    async fn release(&self, key: &str) -> Result<(), CounterStoreError> {
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.map.get_mut(key)
            && slot.expires_at > now
            && slot.count > 0
        {
            slot.count -= 1;
        }
        Ok(())
    }

    async fn current(&self, key: &str) -> Result<i64, CounterStoreError> {
        let now = Instant::now();
        let slots = self.slots.lock().await;
        Ok(slots
            .map
            .get(key)
            .filter(|s| s.expires_at > now)
            .map_or(0, |s| s.count))
    }
}

// ── Limiter ──────────────────────────────────────────────────────────────────

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Counted against the user's window; must be released on completion.
    Admitted,
    /// Over the limit; the message must not be processed.
    Throttled,
    /// The counter store failed and the message was let through uncounted.
    Unmetered,
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, limit: u32, window: Duration) -> Self {
        Self {
            store,
            limit,
            window,
        }
    }

    pub fn key(user_id: &str) -> String {
        format!("throttle:{user_id}")
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub async fn admit(&self, user_id: &str) -> Admission {
        match self
            .store
            .try_acquire(&Self::key(user_id), self.limit, self.window)
            .await
        {
            Ok(Some(count)) => {
                debug!(user_id, count, limit = self.limit, "request admitted");
                Admission::Admitted
            },
            Ok(None) => Admission::Throttled,
            Err(e) => {
                warn!(user_id, error = %e, "rate counter unavailable, admitting uncounted");
                Admission::Unmetered
            },
        }
    }

    pub async fn should_throttle(&self, user_id: &str) -> bool {
        self.admit(user_id).await == Admission::Throttled
    }

    /// Give back one slot. Failures are logged and swallowed.
    pub async fn release(&self, user_id: &str) {
        if let Err(e) = self.store.release(&Self::key(user_id)).await {
            warn!(user_id, error = %e, "failed to release rate counter");
        }
    }

    pub async fn current(&self, user_id: &str) -> i64 {
        self.store.current(&Self::key(user_id)).await.unwrap_or(0)
    }
}
