//! # Calculation Cache
//!
//! A two-tier cache for expensive business calculations, with
//! dependency-based invalidation and priority-ordered warming.
//!
//! ## Architecture
//!
//! - **Remote tier** (Redis, optional): shared across processes, consulted
//!   first on reads. Transport failures are swallowed at the provider
//!   boundary, so an unreachable Redis degrades the cache instead of
//!   breaking callers.
//! - **Local tier** (in-process): bounded LRU store with per-entry TTL,
//!   always present, serves as the fallback when the remote tier is
//!   disabled or down.
//! - **Dependency index**: bidirectional map from cache keys to the
//!   upstream data they were derived from, driving targeted invalidation.
//!
//! ## Usage
//!
//! ```no_run
//! use calculation_cache::{
//!     CacheLayerConfig, CacheOrchestrator, CalculationResult, Dependency,
//! };
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = CacheOrchestrator::new(CacheLayerConfig::default()).await?;
//!
//! let result: CalculationResult<serde_json::Value> = cache
//!     .get_or_compute(
//!         "FinancialCalculations",
//!         "calculateTax",
//!         &json!({"amount": 100, "region": "CA"}),
//!         || async { Ok(CalculationResult::new(json!({"total": 108.25}), "tax-1")) },
//!         &[Dependency::table("tax_rates")],
//!         None,
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod dependencies;
pub mod keys;
pub mod metrics;
pub mod orchestrator;
pub mod service;
pub mod stores;

pub use crate::core::config::{
    CacheLayerConfig, InvalidationSettings, MemorySettings, MonitoringSettings, RedisSettings,
    TtlSettings, WarmingSettings,
};
pub use crate::core::error::{CacheError, CacheResult};
pub use crate::core::types::{
    CalculationResult, ComputeFuture, Dependency, DependencyKind, InvalidationEvent, WarmingTask,
};
pub use dependencies::DependencyIndex;
pub use keys::canonical_key;
pub use metrics::{CacheMetrics, HealthState, HealthStatus};
pub use orchestrator::{CacheOrchestrator, WarmingReport};
pub use service::{
    CalculationCacheService, DomainInvalidation, InvalidationRequest, InvalidationSummary,
};
pub use stores::{CacheProvider, InMemoryCache, ProviderStats, RedisProvider};
