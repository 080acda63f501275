//! # Cache Configuration
//!
//! Configuration for every layer of the cache: remote tier connection,
//! local tier bounds, per-calculation-type TTLs, invalidation limits,
//! warming schedule, and monitoring. Defaults mirror a production
//! deployment with the remote tier disabled until explicitly turned on.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::{CacheError, CacheResult};

/// Top-level cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheLayerConfig {
    /// Remote tier (Redis) settings
    pub redis: RedisSettings,

    /// Local in-process tier settings
    pub memory: MemorySettings,

    /// TTL selection per calculation type
    pub ttl: TtlSettings,

    /// Dependency-based invalidation settings
    pub invalidation: InvalidationSettings,

    /// Cache warming settings
    pub warming: WarmingSettings,

    /// Metrics collection settings
    pub monitoring: MonitoringSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    /// Enable the remote tier
    pub enabled: bool,

    /// Keep serving from the local tier when Redis is unreachable
    pub fallback_to_memory: bool,

    /// Redis connection URL
    pub url: String,

    /// Key prefix for all cache entries
    pub key_prefix: String,

    /// Connection establishment timeout
    pub connection_timeout: Duration,

    /// Per-command timeout; bounds every remote call so the local
    /// fallback path is never blocked indefinitely
    pub command_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySettings {
    /// Approximate memory ceiling in megabytes
    pub max_memory_mb: usize,

    /// Maximum number of entries
    pub max_entries: usize,
}

/// TTLs in seconds, chosen by substring classification of the service name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlSettings {
    /// Financial calculations (tax, currency)
    pub financial: u64,

    /// Inventory calculations
    pub inventory: u64,

    /// Vendor metrics
    pub vendor: u64,

    /// Everything else
    pub default: u64,
}

impl TtlSettings {
    /// Select a TTL for a service by name. Classification is a plain
    /// case-insensitive substring match, so unknown service names fall
    /// back to the default TTL rather than failing.
    pub fn for_service(&self, service: &str) -> Duration {
        let lower = service.to_lowercase();
        let seconds = if lower.contains("financial") {
            self.financial
        } else if lower.contains("inventory") {
            self.inventory
        } else if lower.contains("vendor") {
            self.vendor
        } else {
            self.default
        };
        Duration::from_secs(seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationSettings {
    /// Enable dependency tracking and invalidation
    pub enabled: bool,

    /// Keys deleted per batch during an invalidation pass
    pub batch_size: usize,

    /// Maximum dependencies tracked per cached value; extras are dropped
    pub max_dependencies: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmingSettings {
    /// Enable cache warming
    pub enabled: bool,

    /// Run a warming pass when the service starts
    pub on_startup: bool,

    /// Hours between scheduled warming passes; 0 disables the timer
    pub schedule_interval_hours: u64,

    /// Warming tasks executed concurrently per batch
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSettings {
    /// Enable the periodic metrics log line
    pub enabled: bool,

    /// Interval between metrics log lines
    pub metrics_interval: Duration,
}

impl Default for CacheLayerConfig {
    fn default() -> Self {
        Self {
            redis: RedisSettings {
                enabled: false,
                fallback_to_memory: true,
                url: "redis://localhost:6379".to_string(),
                key_prefix: "calc:cache:".to_string(),
                connection_timeout: Duration::from_secs(5),
                command_timeout: Duration::from_secs(2),
            },
            memory: MemorySettings {
                max_memory_mb: 100,
                max_entries: 5000,
            },
            ttl: TtlSettings {
                financial: 300,
                inventory: 600,
                vendor: 1800,
                default: 300,
            },
            invalidation: InvalidationSettings {
                enabled: true,
                batch_size: 100,
                max_dependencies: 50,
            },
            warming: WarmingSettings {
                enabled: false,
                on_startup: false,
                schedule_interval_hours: 0,
                batch_size: 5,
            },
            monitoring: MonitoringSettings {
                enabled: false,
                metrics_interval: Duration::from_secs(60),
            },
        }
    }
}

impl CacheLayerConfig {
    /// Validate the configuration before constructing an orchestrator.
    pub fn validate(&self) -> CacheResult<()> {
        if self.memory.max_entries == 0 {
            return Err(CacheError::Configuration {
                message: "memory.max_entries must be at least 1".to_string(),
            });
        }
        if self.memory.max_memory_mb == 0 {
            return Err(CacheError::Configuration {
                message: "memory.max_memory_mb must be at least 1".to_string(),
            });
        }
        if self.invalidation.batch_size == 0 {
            return Err(CacheError::Configuration {
                message: "invalidation.batch_size must be at least 1".to_string(),
            });
        }
        if self.warming.batch_size == 0 {
            return Err(CacheError::Configuration {
                message: "warming.batch_size must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
