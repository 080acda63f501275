//! # Metrics & Health
//!
//! Merged view over both tiers' statistics, and the health classifier that
//! collapses them into a single verdict. Error conditions are checked
//! before degraded conditions, so an unreachable remote tier always wins
//! over a poor hit rate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Remote error count above which the cache reports an error verdict.
pub const ERROR_COUNT_THRESHOLD: u64 = 10;

/// Overall hit rate (percent) below which the cache reports degraded.
pub const DEGRADED_HIT_RATE: f64 = 50.0;

/// Average response time (ms) above which the cache reports degraded.
pub const DEGRADED_RESPONSE_TIME_MS: f64 = 1000.0;

/// Merged cache metrics across both tiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub redis: RedisTierMetrics,
    pub memory: MemoryTierMetrics,
    pub combined: CombinedMetrics,
    pub invalidation: InvalidationMetrics,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedisTierMetrics {
    pub connected: bool,
    pub hit_count: u64,
    pub miss_count: u64,
    pub error_count: u64,
    pub hit_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryTierMetrics {
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate: f64,
    pub total_entries: usize,
    pub memory_usage: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CombinedMetrics {
    pub total_hits: u64,
    pub total_misses: u64,
    pub overall_hit_rate: f64,
    pub average_response_time_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvalidationMetrics {
    pub total_invalidations: u64,
    pub keys_invalidated: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_invalidation: Option<DateTime<Utc>>,
}

/// Health verdict for the cache subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Error,
}

/// Health report exposed to operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub redis: RedisTierMetrics,
    pub memory: MemoryHealth,
    pub performance: PerformanceHealth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHealth {
    pub usage: usize,
    pub max_usage: usize,
    pub entry_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceHealth {
    pub hit_rate: f64,
    pub average_response_time_ms: f64,
}

/// Hit rate as a percentage rounded to two decimals; 0 with no samples.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        return 0.0;
    }
    (hits as f64 / total as f64 * 100.0 * 100.0).round() / 100.0
}

/// Classify overall cache health.
///
/// Order matters: error conditions first (remote tier enabled but
/// unreachable, or remote error count over threshold), then degraded
/// (low hit rate or slow responses), else healthy. The hit-rate check
/// only applies once at least one lookup has been served, so a freshly
/// started cache is not reported degraded.
pub fn classify(metrics: &CacheMetrics, redis_enabled: bool) -> HealthState {
    if redis_enabled && !metrics.redis.connected {
        return HealthState::Error;
    }
    if metrics.redis.error_count > ERROR_COUNT_THRESHOLD {
        return HealthState::Error;
    }

    let samples = metrics.combined.total_hits + metrics.combined.total_misses;
    if samples > 0 && metrics.combined.overall_hit_rate < DEGRADED_HIT_RATE {
        return HealthState::Degraded;
    }
    if metrics.combined.average_response_time_ms > DEGRADED_RESPONSE_TIME_MS {
        return HealthState::Degraded;
    }

    HealthState::Healthy
}
