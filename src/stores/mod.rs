//! # Cache Stores
//!
//! The two storage tiers: a local in-process store and a remote provider
//! abstraction over an external key-value service. The remote side is a
//! trait so the orchestrator can run against a real Redis deployment, a
//! test double, or nothing at all.

pub mod memory;
pub mod redis_store;

pub use memory::{InMemoryCache, MemoryStats};
pub use redis_store::RedisProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Remote tier provider contract.
///
/// Every method is infallible by design: transport failures are caught at
/// this boundary, counted, logged, and converted to a safe default. The
/// orchestrator must be able to run with the remote tier entirely absent
/// or unreachable.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Fetch the JSON payload stored under `key`, if any.
    async fn get(&self, key: &str) -> Option<String>;

    /// Store a JSON payload, optionally with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool;

    /// Store a JSON payload and register it under each tag for later
    /// tag-based deletion.
    async fn set_with_tags(&self, key: &str, value: &str, ttl: Duration, tags: &[String]) -> bool;

    /// Delete a key; true when something was removed.
    async fn delete(&self, key: &str) -> bool;

    /// Delete every key matching a glob pattern; returns keys removed.
    async fn delete_by_pattern(&self, pattern: &str) -> u64;

    /// Delete every key registered under any of the tags; returns keys
    /// removed (tag bookkeeping keys are not counted).
    async fn delete_by_tags(&self, tags: &[String]) -> u64;

    async fn exists(&self, key: &str) -> bool;

    /// Remaining TTL in seconds; -1 when unknown or on error.
    async fn ttl(&self, key: &str) -> i64;

    async fn ping(&self) -> bool;

    async fn get_stats(&self) -> ProviderStats;

    /// Remove every key in the store.
    async fn clear(&self) -> bool;

    async fn disconnect(&self);
}

/// Cumulative remote tier statistics. Counters are process-lifetime
/// monotonic, not a point-in-time snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderStats {
    pub connected: bool,
    pub hit_count: u64,
    pub miss_count: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub memory_usage: Option<u64>,
    pub key_count: Option<u64>,
}
