//! Fast counter store abstraction.
//!
//! Hides the specific KV backend behind the small capability set the request path
//! actually needs: atomic increments, sorted-set membership for the RPM sliding window,
//! hash-field increments for the daily usage rollup, and plain get/set. Every caller on
//! the request path is written against this trait, not against a concrete client, so
//! correctness does not depend on process-local state (multiple gateway replicas share
//! one backing store).

use crate::error::CounterResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Capability set a counter store backend must provide.
///
/// Implementations: [`MemoryCounterStore`] for tests and single-process deployments,
/// [`RedisCounterStore`] for multi-replica deployments.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key` by 1, returning the new value. Creates the key at 1
    /// if absent.
    async fn incr(&self, key: &str) -> CounterResult<i64>;

    /// Atomically increment `key` by `delta`, returning the new value.
    async fn incr_by(&self, key: &str, delta: i64) -> CounterResult<i64>;

    /// Set a TTL on `key`. A no-op if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> CounterResult<()>;

    /// Add `member` to the sorted set at `key` with the given `score`.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> CounterResult<()>;

    /// Remove every member of the sorted set at `key` with score in `[min, max]`.
    async fn zrem_by_score(&self, key: &str, min: f64, max: f64) -> CounterResult<()>;

    /// Count members of the sorted set at `key`.
    async fn zcard(&self, key: &str) -> CounterResult<i64>;

    /// Fetch all fields of the hash at `key`.
    async fn hgetall(&self, key: &str) -> CounterResult<HashMap<String, i64>>;

    /// Atomically increment hash field `field` at `key` by `delta`.
    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> CounterResult<i64>;

    /// Fetch the plain value at `key`, if any.
    async fn get(&self, key: &str) -> CounterResult<Option<String>>;

    /// Set the plain value at `key`, with an optional TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CounterResult<()>;

    /// Add `member` to a plain set, used for the active-user rolling set.
    async fn sadd(&self, key: &str, member: &str, ttl: Duration) -> CounterResult<()>;

    /// Backend name, for logging and health reporting.
    fn name(&self) -> &'static str;
}

/// In-memory counter store backing unit tests and single-process deployments.
///
/// TTLs are recorded but not actively swept; expired keys are treated as absent on next
/// read, matching the observable behavior callers rely on without running a background
/// reaper.
pub struct MemoryCounterStore {
    integers: parking_lot::Mutex<HashMap<String, (i64, Option<std::time::Instant>)>>,
    sorted_sets: parking_lot::Mutex<HashMap<String, Vec<(String, f64)>>>,
    hashes: parking_lot::Mutex<HashMap<String, HashMap<String, i64>>>,
    strings: parking_lot::Mutex<HashMap<String, (String, Option<std::time::Instant>)>>,
    sets: parking_lot::Mutex<HashMap<String, (Vec<String>, std::time::Instant)>>,
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCounterStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            integers: parking_lot::Mutex::new(HashMap::new()),
            sorted_sets: parking_lot::Mutex::new(HashMap::new()),
            hashes: parking_lot::Mutex::new(HashMap::new()),
            strings: parking_lot::Mutex::new(HashMap::new()),
            sets: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn is_expired(expiry: Option<std::time::Instant>) -> bool {
        expiry.is_some_and(|at| at <= std::time::Instant::now())
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str) -> CounterResult<i64> {
        self.incr_by(key, 1).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> CounterResult<i64> {
        let mut guard = self.integers.lock();
        let entry = guard.entry(key.to_string()).or_insert((0, None));
        if Self::is_expired(entry.1) {
            entry.0 = 0;
            entry.1 = None;
        }
        entry.0 += delta;
        Ok(entry.0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CounterResult<()> {
        if let Some(entry) = self.integers.lock().get_mut(key) {
            entry.1 = Some(std::time::Instant::now() + ttl);
        }
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> CounterResult<()> {
        let mut guard = self.sorted_sets.lock();
        let set = guard.entry(key.to_string()).or_default();
        set.retain(|(m, _)| m != member);
        set.push((member.to_string(), score));
        Ok(())
    }

    async fn zrem_by_score(&self, key: &str, min: f64, max: f64) -> CounterResult<()> {
        if let Some(set) = self.sorted_sets.lock().get_mut(key) {
            set.retain(|(_, score)| *score < min || *score > max);
        }
        Ok(())
    }

    async fn zcard(&self, key: &str) -> CounterResult<i64> {
        Ok(self
            .sorted_sets
            .lock()
            .get(key)
            .map_or(0, |set| set.len() as i64))
    }

    async fn hgetall(&self, key: &str) -> CounterResult<HashMap<String, i64>> {
        Ok(self.hashes.lock().get(key).cloned().unwrap_or_default())
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> CounterResult<i64> {
        let mut guard = self.hashes.lock();
        let hash = guard.entry(key.to_string()).or_default();
        let value = hash.entry(field.to_string()).or_insert(0);
        *value += delta;
        Ok(*value)
    }

    async fn get(&self, key: &str) -> CounterResult<Option<String>> {
        let guard = self.strings.lock();
        match guard.get(key) {
            Some((value, expiry)) if !Self::is_expired(*expiry) => Ok(Some(value.clone())),
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CounterResult<()> {
        let expiry = ttl.map(|ttl| std::time::Instant::now() + ttl);
        self.strings
            .lock()
            .insert(key.to_string(), (value.to_string(), expiry));
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str, ttl: Duration) -> CounterResult<()> {
        let mut guard = self.sets.lock();
        let expiry = std::time::Instant::now() + ttl;
        let entry = guard
            .entry(key.to_string())
            .or_insert_with(|| (Vec::new(), expiry));
        if !entry.0.contains(&member.to_string()) {
            entry.0.push(member.to_string());
        }
        entry.1 = expiry;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Redis-backed counter store for multi-replica deployments.
///
/// Uses a `redis::aio::ConnectionManager`, which transparently reconnects on connection
/// loss, so a transient network blip does not require the caller to re-establish a
/// client.
pub struct RedisCounterStore {
    connection: redis::aio::ConnectionManager,
}

impl RedisCounterStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// # Errors
    /// Returns a [`crate::error::CounterError`] if the initial connection fails.
    pub async fn connect(url: &str) -> CounterResult<Self> {
        let client = redis::Client::open(url).map_err(crate::error::CounterError::from)?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(crate::error::CounterError::from)?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str) -> CounterResult<i64> {
        let mut conn = self.connection.clone();
        redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(Into::into)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> CounterResult<i64> {
        let mut conn = self.connection.clone();
        redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async(&mut conn)
            .await
            .map_err(Into::into)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CounterResult<()> {
        let mut conn = self.connection.clone();
        let _: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> CounterResult<()> {
        let mut conn = self.connection.clone();
        let _: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn zrem_by_score(&self, key: &str, min: f64, max: f64) -> CounterResult<()> {
        let mut conn = self.connection.clone();
        let _: i64 = redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(min)
            .arg(max)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn zcard(&self, key: &str) -> CounterResult<i64> {
        let mut conn = self.connection.clone();
        redis::cmd("ZCARD")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(Into::into)
    }

    async fn hgetall(&self, key: &str) -> CounterResult<HashMap<String, i64>> {
        let mut conn = self.connection.clone();
        redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(Into::into)
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> CounterResult<i64> {
        let mut conn = self.connection.clone();
        redis::cmd("HINCRBY")
            .arg(key)
            .arg(field)
            .arg(delta)
            .query_async(&mut conn)
            .await
            .map_err(Into::into)
    }

    async fn get(&self, key: &str) -> CounterResult<Option<String>> {
        let mut conn = self.connection.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(Into::into)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CounterResult<()> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs());
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str, ttl: Duration) -> CounterResult<()> {
        let mut conn = self.connection.clone();
        let _: i64 = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        let _: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Shared handle to a counter store, as threaded through the quota/budget gates,
/// endpoint selector, and reconciler.
pub type SharedCounterStore = Arc<dyn CounterStore>;
