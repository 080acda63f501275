//! # Redis Cache Provider
//!
//! Remote tier implementation backed by the `redis` crate's connection
//! manager. Every operation is bounded by a command timeout and every
//! transport failure is converted to a safe default at this boundary - the
//! orchestrator never sees a Redis error. Tag-based deletion is supported
//! through auxiliary per-tag sets whose expiry outlives their members, so
//! orphaned tag sets cannot accumulate.

use super::{CacheProvider, ProviderStats};
use crate::core::config::RedisSettings;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Seconds a tag set outlives the entries registered under it.
const TAG_SET_TTL_MARGIN: u64 = 300;

/// Redis-backed remote tier provider
pub struct RedisProvider {
    settings: RedisSettings,

    /// Cloned per command; `None` when the initial connection failed
    manager: RwLock<Option<ConnectionManager>>,

    connected: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl RedisProvider {
    /// Connect to Redis. A failed connection does not error - the provider
    /// starts in a disconnected state and every operation returns its safe
    /// default until the service becomes reachable again.
    pub async fn connect(settings: RedisSettings) -> Self {
        let provider = Self {
            manager: RwLock::new(None),
            connected: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_error: Mutex::new(None),
            settings,
        };

        match provider.open_manager().await {
            Ok(manager) => {
                *provider.manager.write() = Some(manager);
                provider.connected.store(true, Ordering::Relaxed);
                info!("Redis cache connected to {}", provider.settings.url);
            }
            Err(message) => {
                provider.record_error(&message);
                warn!("Redis unavailable at startup: {}", message);
            }
        }

        provider
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn open_manager(&self) -> Result<ConnectionManager, String> {
        let client = Client::open(self.settings.url.as_str()).map_err(|e| e.to_string())?;
        match timeout(
            self.settings.connection_timeout,
            ConnectionManager::new(client),
        )
        .await
        {
            Ok(Ok(manager)) => Ok(manager),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "connection attempt timed out after {:?}",
                self.settings.connection_timeout
            )),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.settings.key_prefix, key)
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}tags:{}", self.settings.key_prefix, tag)
    }

    fn connection(&self) -> Option<ConnectionManager> {
        self.manager.read().clone()
    }

    fn record_error(&self, message: &str) {
        self.connected.store(false, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(message.to_string());
    }

    fn record_success(&self) {
        self.connected.store(true, Ordering::Relaxed);
    }

    /// Run a Redis command with the configured timeout, flattening timeout
    /// and transport failures into one error path.
    async fn run<T, F>(&self, op: &str, fut: F) -> Option<T>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        match timeout(self.settings.command_timeout, fut).await {
            Ok(Ok(value)) => {
                self.record_success();
                Some(value)
            }
            Ok(Err(e)) => {
                let message = format!("{} failed: {}", op, e);
                warn!("Redis {}", message);
                self.record_error(&message);
                None
            }
            Err(_) => {
                let message = format!("{} timed out", op);
                warn!("Redis {}", message);
                self.record_error(&message);
                None
            }
        }
    }
}

#[async_trait]
impl CacheProvider for RedisProvider {
    async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.connection()?;
        let full_key = self.full_key(key);

        let value: Option<String> = self
            .run("GET", conn.get::<_, Option<String>>(&full_key))
            .await?;

        match value {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Redis cache hit for key: {}", key);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Redis cache miss for key: {}", key);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool {
        let Some(mut conn) = self.connection() else {
            return false;
        };
        let full_key = self.full_key(key);

        let result = match ttl {
            Some(ttl) => {
                self.run(
                    "SETEX",
                    conn.set_ex::<_, _, ()>(&full_key, value, ttl.as_secs()),
                )
                .await
            }
            None => self.run("SET", conn.set::<_, _, ()>(&full_key, value)).await,
        };

        result.is_some()
    }

    async fn set_with_tags(&self, key: &str, value: &str, ttl: Duration, tags: &[String]) -> bool {
        if !self.set(key, value, Some(ttl)).await {
            return false;
        }
        if tags.is_empty() {
            return true;
        }

        let Some(mut conn) = self.connection() else {
            return false;
        };
        let full_key = self.full_key(key);

        // Tag sets expire a little later than the entries they index so a
        // set never outlives its members by much, and never orphans them.
        let tag_ttl = (ttl.as_secs() + TAG_SET_TTL_MARGIN) as i64;
        let mut pipe = redis::pipe();
        for tag in tags {
            let tag_key = self.tag_key(tag);
            pipe.sadd(&tag_key, &full_key).ignore();
            pipe.cmd("EXPIRE").arg(&tag_key).arg(tag_ttl).ignore();
        }

        self.run("tag pipeline", pipe.query_async::<_, ()>(&mut conn))
            .await
            .is_some()
    }

    async fn delete(&self, key: &str) -> bool {
        let Some(mut conn) = self.connection() else {
            return false;
        };
        let full_key = self.full_key(key);

        match self.run("DEL", conn.del::<_, i64>(&full_key)).await {
            Some(count) => count > 0,
            None => false,
        }
    }

    async fn delete_by_pattern(&self, pattern: &str) -> u64 {
        let Some(mut conn) = self.connection() else {
            return 0;
        };
        let full_pattern = self.full_key(pattern);

        let keys: Vec<String> = match self
            .run("KEYS", conn.keys::<_, Vec<String>>(&full_pattern))
            .await
        {
            Some(keys) => keys,
            None => return 0,
        };
        if keys.is_empty() {
            return 0;
        }

        match self.run("DEL", conn.del::<_, i64>(&keys)).await {
            Some(count) => count.max(0) as u64,
            None => 0,
        }
    }

    async fn delete_by_tags(&self, tags: &[String]) -> u64 {
        let Some(mut conn) = self.connection() else {
            return 0;
        };

        let mut deleted = 0u64;
        for tag in tags {
            let tag_key = self.tag_key(tag);

            let members: Vec<String> = match self
                .run("SMEMBERS", conn.smembers::<_, Vec<String>>(&tag_key))
                .await
            {
                Some(members) => members,
                None => continue,
            };

            if !members.is_empty() {
                if let Some(count) = self.run("DEL", conn.del::<_, i64>(&members)).await {
                    deleted += count.max(0) as u64;
                }
            }

            // The tag set itself is bookkeeping, not a cached value.
            self.run("DEL", conn.del::<_, i64>(&tag_key)).await;
        }

        deleted
    }

    async fn exists(&self, key: &str) -> bool {
        let Some(mut conn) = self.connection() else {
            return false;
        };
        let full_key = self.full_key(key);

        self.run("EXISTS", conn.exists::<_, bool>(&full_key))
            .await
            .unwrap_or(false)
    }

    async fn ttl(&self, key: &str) -> i64 {
        let Some(mut conn) = self.connection() else {
            return -1;
        };
        let full_key = self.full_key(key);

        self.run("TTL", conn.ttl::<_, i64>(&full_key))
            .await
            .unwrap_or(-1)
    }

    async fn ping(&self) -> bool {
        let Some(mut conn) = self.connection() else {
            return false;
        };

        match self
            .run(
                "PING",
                redis::cmd("PING").query_async::<_, String>(&mut conn),
            )
            .await
        {
            Some(response) => response == "PONG",
            None => false,
        }
    }

    async fn get_stats(&self) -> ProviderStats {
        let mut stats = ProviderStats {
            connected: self.is_connected(),
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            error_count: self.errors.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
            memory_usage: None,
            key_count: None,
        };

        let Some(mut conn) = self.connection() else {
            return stats;
        };

        if let Some(info) = self
            .run(
                "INFO",
                redis::cmd("INFO")
                    .arg("memory")
                    .query_async::<_, String>(&mut conn),
            )
            .await
        {
            stats.memory_usage = info
                .lines()
                .find(|line| line.starts_with("used_memory:"))
                .and_then(|line| line.split(':').nth(1))
                .and_then(|value| value.trim().parse::<u64>().ok());
        }

        stats.key_count = self
            .run(
                "DBSIZE",
                redis::cmd("DBSIZE").query_async::<_, u64>(&mut conn),
            )
            .await;

        stats
    }

    async fn clear(&self) -> bool {
        let Some(mut conn) = self.connection() else {
            return false;
        };

        let cleared = self
            .run(
                "FLUSHDB",
                redis::cmd("FLUSHDB").query_async::<_, ()>(&mut conn),
            )
            .await
            .is_some();
        if cleared {
            info!("Flushed Redis cache database");
        }
        cleared
    }

    async fn disconnect(&self) {
        *self.manager.write() = None;
        self.connected.store(false, Ordering::Relaxed);
        info!("Redis cache disconnected");
    }
}
