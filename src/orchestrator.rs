//! # Cache Orchestrator
//!
//! The get-or-compute entry point over both tiers. Reads go remote tier
//! first, then local, then the compute function; writes go through both
//! tiers. Dependencies are registered in the index at write time and
//! resolved at invalidation time. The orchestrator also runs the warming
//! scheduler and merges tier statistics into one metrics view.
//!
//! Two asymmetries are intentional and preserved from the original
//! design: a remote hit does not populate the local tier (remote is
//! primary), while a local hit does re-populate the remote tier; and
//! concurrent misses on the same key each run the compute function
//! (no single-flight coalescing).

use crate::core::config::CacheLayerConfig;
use crate::core::error::{CacheError, CacheResult};
use crate::core::types::{CalculationResult, Dependency, InvalidationEvent, WarmingTask};
use crate::dependencies::DependencyIndex;
use crate::keys::canonical_key;
use crate::metrics::{
    self, CacheMetrics, CombinedMetrics, InvalidationMetrics, MemoryTierMetrics, RedisTierMetrics,
};
use crate::stores::{CacheProvider, InMemoryCache, RedisProvider};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome tally of a warming pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmingReport {
    pub warmed: usize,
    pub failed: usize,
}

/// Two-tier cache orchestrator
pub struct CacheOrchestrator {
    config: CacheLayerConfig,
    memory: InMemoryCache,
    provider: Option<Arc<dyn CacheProvider>>,
    index: DependencyIndex,

    response_time_total_ms: AtomicU64,
    response_time_samples: AtomicU64,

    invalidation_events: AtomicU64,
    keys_invalidated: AtomicU64,
    last_invalidation: Mutex<Option<chrono::DateTime<chrono::Utc>>>,
}

impl CacheOrchestrator {
    /// Build an orchestrator, connecting the remote tier when enabled.
    /// An unreachable remote service is only an error when
    /// `fallback_to_memory` is off.
    pub async fn new(config: CacheLayerConfig) -> CacheResult<Self> {
        config.validate()?;

        let provider: Option<Arc<dyn CacheProvider>> = if config.redis.enabled {
            let provider = RedisProvider::connect(config.redis.clone()).await;
            if !provider.is_connected() && !config.redis.fallback_to_memory {
                return Err(CacheError::Configuration {
                    message: format!(
                        "Redis at {} is unreachable and fallback_to_memory is disabled",
                        config.redis.url
                    ),
                });
            }
            Some(Arc::new(provider))
        } else {
            None
        };

        Ok(Self::assemble(config, provider))
    }

    /// Build an orchestrator around an externally supplied remote
    /// provider. Used by tests and by deployments with a custom store.
    pub fn with_provider(
        config: CacheLayerConfig,
        provider: Arc<dyn CacheProvider>,
    ) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self::assemble(config, Some(provider)))
    }

    fn assemble(config: CacheLayerConfig, provider: Option<Arc<dyn CacheProvider>>) -> Self {
        let memory = InMemoryCache::new(&config.memory);
        Self {
            config,
            memory,
            provider,
            index: DependencyIndex::new(),
            response_time_total_ms: AtomicU64::new(0),
            response_time_samples: AtomicU64::new(0),
            invalidation_events: AtomicU64::new(0),
            keys_invalidated: AtomicU64::new(0),
            last_invalidation: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CacheLayerConfig {
        &self.config
    }

    pub fn dependency_index(&self) -> &DependencyIndex {
        &self.index
    }

    /// Serve a calculation from cache or run it.
    ///
    /// Read order: remote tier, local tier, compute. On a full miss the
    /// result is written through both tiers and the key is registered
    /// against its dependencies (capped at `invalidation.max_dependencies`).
    /// Compute errors propagate to the caller untouched - caching never
    /// hides a calculation failure.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        service: &str,
        method: &str,
        inputs: &Value,
        compute: F,
        dependencies: &[Dependency],
        actor: Option<&str>,
    ) -> CacheResult<CalculationResult<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<CalculationResult<T>>>,
    {
        let started = Instant::now();
        let key = canonical_key(service, method, inputs);
        let ttl = self.config.ttl.for_service(service);
        let tags: Vec<String> = dependencies.iter().map(Dependency::tag).collect();

        // Remote tier first. A remote hit is returned as-is; the local
        // tier is deliberately not populated from it.
        if let Some(provider) = &self.provider {
            if let Some(json) = provider.get(&key).await {
                match serde_json::from_str::<CalculationResult<T>>(&json) {
                    Ok(result) => {
                        self.record_response_time(started);
                        return Ok(result);
                    }
                    Err(e) => {
                        warn!("Discarding undecodable remote entry for {}: {}", key, e);
                        provider.delete(&key).await;
                    }
                }
            }
        }

        // Local tier next; a hit re-populates the remote tier best-effort.
        if let Some(json) = self.memory.get(&key) {
            match serde_json::from_str::<CalculationResult<T>>(&json) {
                Ok(result) => {
                    if let Some(provider) = &self.provider {
                        provider.set_with_tags(&key, &json, ttl, &tags).await;
                    }
                    self.record_response_time(started);
                    return Ok(result);
                }
                Err(e) => {
                    warn!("Discarding undecodable local entry for {}: {}", key, e);
                    self.memory.delete(&key);
                }
            }
        }

        // Full miss: run the calculation. No single-flight guard here -
        // concurrent callers missing on the same key each compute, and
        // the tiers resolve it as last-write-wins.
        debug!(
            "Cache miss for {}.{} (key {}), computing{}",
            service,
            method,
            key,
            actor.map(|a| format!(" for {}", a)).unwrap_or_default()
        );

        let result = compute().await.map_err(CacheError::Computation)?;

        let json = serde_json::to_string(&result)?;
        self.memory.set(&key, json.clone(), ttl, tags.clone());
        if let Some(provider) = &self.provider {
            provider.set_with_tags(&key, &json, ttl, &tags).await;
        }

        if self.config.invalidation.enabled && !dependencies.is_empty() {
            self.index
                .register(&key, dependencies, self.config.invalidation.max_dependencies);
        }

        self.record_response_time(started);
        Ok(result)
    }

    /// Delete every cache entry derived from the event's dependencies.
    ///
    /// Affected keys are resolved through the dependency index and deleted
    /// from both tiers in fixed-size batches; the two tiers are deleted
    /// concurrently within a batch, batches run strictly in sequence.
    /// Returns the number of keys invalidated.
    pub async fn invalidate_by_dependencies(&self, event: &InvalidationEvent) -> usize {
        if !self.config.invalidation.enabled {
            return 0;
        }
        let started = Instant::now();

        let mut affected: HashSet<String> = HashSet::new();
        for dependency in &event.dependencies {
            affected.extend(self.index.resolve(dependency));
        }
        if affected.is_empty() {
            debug!("No cached keys affected by invalidation: {}", event.reason);
            return 0;
        }

        let keys: Vec<String> = affected.into_iter().collect();
        let mut total = 0usize;

        for batch in keys.chunks(self.config.invalidation.batch_size) {
            let remote = async {
                if let Some(provider) = &self.provider {
                    join_all(batch.iter().map(|key| provider.delete(key))).await;
                }
            };
            let local = async {
                for key in batch {
                    self.memory.delete(key);
                }
            };
            tokio::join!(remote, local);
            total += batch.len();
        }

        for key in &keys {
            self.index.remove(key);
        }

        self.invalidation_events.fetch_add(1, Ordering::Relaxed);
        self.keys_invalidated.fetch_add(total as u64, Ordering::Relaxed);
        *self.last_invalidation.lock() = Some(event.timestamp);

        info!(
            "Invalidated {} keys in {}ms ({}{})",
            total,
            started.elapsed().as_millis(),
            event.reason,
            event
                .actor
                .as_deref()
                .map(|a| format!(", by {}", a))
                .unwrap_or_default()
        );
        total
    }

    /// Execute a batch of warming tasks in priority order.
    ///
    /// Tasks run in bounded concurrent batches; a batch settles fully
    /// before the next one starts. Individual task failures are tallied
    /// and logged - this function never errors, even when every task
    /// fails, because warming is a best-effort optimization.
    pub async fn warm_cache(&self, mut tasks: Vec<WarmingTask>) -> WarmingReport {
        // Stable sort keeps submission order between equal priorities.
        tasks.sort_by_key(|task| std::cmp::Reverse(task.priority));

        info!("Starting cache warming with {} tasks", tasks.len());
        let mut report = WarmingReport::default();

        for batch in tasks.chunks(self.config.warming.batch_size) {
            let outcomes = join_all(batch.iter().map(|task| async {
                self.get_or_compute::<Value, _, _>(
                    &task.service,
                    &task.method,
                    &task.inputs,
                    || (task.compute)(),
                    &task.dependencies,
                    None,
                )
                .await
                .map_err(|e| (task.service.clone(), task.method.clone(), e))
            }))
            .await;

            for outcome in outcomes {
                match outcome {
                    Ok(_) => report.warmed += 1,
                    Err((service, method, e)) => {
                        warn!("Failed to warm cache for {}.{}: {}", service, method, e);
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            "Cache warming completed: {} warmed, {} failed",
            report.warmed, report.failed
        );
        report
    }

    /// Merged statistics across both tiers.
    pub async fn get_metrics(&self) -> CacheMetrics {
        let provider_stats = match &self.provider {
            Some(provider) => provider.get_stats().await,
            None => Default::default(),
        };
        let memory_stats = self.memory.stats();

        let redis = RedisTierMetrics {
            connected: provider_stats.connected,
            hit_count: provider_stats.hit_count,
            miss_count: provider_stats.miss_count,
            error_count: provider_stats.error_count,
            hit_rate: metrics::hit_rate(provider_stats.hit_count, provider_stats.miss_count),
            memory_usage: provider_stats.memory_usage,
            key_count: provider_stats.key_count,
        };
        let memory = MemoryTierMetrics {
            hit_count: memory_stats.hits,
            miss_count: memory_stats.misses,
            hit_rate: metrics::hit_rate(memory_stats.hits, memory_stats.misses),
            total_entries: memory_stats.entries,
            memory_usage: memory_stats.memory_usage,
        };

        let total_hits = redis.hit_count + memory.hit_count;
        let total_misses = redis.miss_count + memory.miss_count;
        let samples = self.response_time_samples.load(Ordering::Relaxed);
        let average_response_time_ms = if samples == 0 {
            0.0
        } else {
            self.response_time_total_ms.load(Ordering::Relaxed) as f64 / samples as f64
        };

        CacheMetrics {
            redis,
            memory,
            combined: CombinedMetrics {
                total_hits,
                total_misses,
                overall_hit_rate: metrics::hit_rate(total_hits, total_misses),
                average_response_time_ms,
            },
            invalidation: InvalidationMetrics {
                total_invalidations: self.invalidation_events.load(Ordering::Relaxed),
                keys_invalidated: self.keys_invalidated.load(Ordering::Relaxed),
                last_invalidation: *self.last_invalidation.lock(),
            },
        }
    }

    /// Clear both tiers, the dependency index, and all counters.
    pub async fn clear_all(&self) -> bool {
        let remote_ok = match &self.provider {
            Some(provider) => provider.clear().await,
            None => true,
        };

        self.memory.clear();
        self.index.clear();
        self.response_time_total_ms.store(0, Ordering::Relaxed);
        self.response_time_samples.store(0, Ordering::Relaxed);
        self.invalidation_events.store(0, Ordering::Relaxed);
        self.keys_invalidated.store(0, Ordering::Relaxed);
        *self.last_invalidation.lock() = None;

        info!("All cache tiers cleared");
        remote_ok
    }

    /// Disconnect the remote tier.
    pub async fn shutdown(&self) {
        if let Some(provider) = &self.provider {
            provider.disconnect().await;
        }
    }

    fn record_response_time(&self, started: Instant) {
        self.response_time_total_ms
            .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);
        self.response_time_samples.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn memory_only_config() -> CacheLayerConfig {
        CacheLayerConfig::default()
    }

    async fn orchestrator() -> CacheOrchestrator {
        CacheOrchestrator::new(memory_only_config()).await.unwrap()
    }

    #[tokio::test]
    async fn test_second_call_served_from_cache() {
        let cache = orchestrator().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let inputs = json!({"amount": 100, "rate": 10});

        for _ in 0..2 {
            let calls = calls.clone();
            let result: CalculationResult<Value> = cache
                .get_or_compute(
                    "FinancialCalculations",
                    "calculateTax",
                    &inputs,
                    || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(CalculationResult::new(json!({"total": 110.0}), "tax-1"))
                    },
                    &[],
                    None,
                )
                .await
                .unwrap();
            assert_eq!(result.value, json!({"total": 110.0}));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_compute_error_propagates() {
        let cache = orchestrator().await;

        let result = cache
            .get_or_compute::<Value, _, _>(
                "FinancialCalculations",
                "calculateTax",
                &json!({"amount": 1}),
                || async { Err(anyhow::anyhow!("tax table missing")) },
                &[],
                None,
            )
            .await;

        match result {
            Err(CacheError::Computation(e)) => {
                assert_eq!(e.to_string(), "tax table missing")
            }
            other => panic!("expected computation error, got {:?}", other.map(|r| r.value)),
        }
        // A failed computation must not leave a cache entry behind.
        assert!(cache.memory.is_empty());
    }

    #[tokio::test]
    async fn test_invalidation_forces_recompute() {
        let cache = orchestrator().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let inputs = json!({"itemId": "item-1"});
        let deps = vec![Dependency::entity("item-1")];

        let compute = |calls: Arc<AtomicUsize>| {
            move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(CalculationResult::new(json!(42), "calc-1"))
                }
            }
        };

        cache
            .get_or_compute::<Value, _, _>(
                "InventoryCalculations",
                "stockValue",
                &inputs,
                compute(calls.clone()),
                &deps,
                None,
            )
            .await
            .unwrap();

        let count = cache
            .invalidate_by_dependencies(&InvalidationEvent::new(
                vec![Dependency::entity("item-1")],
                "Stock levels updated",
            ))
            .await;
        assert_eq!(count, 1);

        cache
            .get_or_compute::<Value, _, _>(
                "InventoryCalculations",
                "stockValue",
                &inputs,
                compute(calls.clone()),
                &deps,
                None,
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidating_unrelated_dependency_keeps_entry() {
        let cache = orchestrator().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let inputs = json!({"itemId": "item-1"});

        for _ in 0..2 {
            let calls = calls.clone();
            cache
                .get_or_compute::<Value, _, _>(
                    "InventoryCalculations",
                    "stockValue",
                    &inputs,
                    || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(CalculationResult::new(json!(1), "c"))
                    },
                    &[Dependency::entity("item-1")],
                    None,
                )
                .await
                .unwrap();

            cache
                .invalidate_by_dependencies(&InvalidationEvent::new(
                    vec![Dependency::entity("item-2")],
                    "Unrelated change",
                ))
                .await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dependency_cap_is_enforced() {
        let mut config = memory_only_config();
        config.invalidation.max_dependencies = 20;
        let cache = CacheOrchestrator::new(config).await.unwrap();

        let deps: Vec<Dependency> = (0..100)
            .map(|i| Dependency::entity(format!("item-{}", i)))
            .collect();

        cache
            .get_or_compute::<Value, _, _>(
                "InventoryCalculations",
                "bulkValuation",
                &json!({"all": true}),
                || async { Ok(CalculationResult::new(json!(0), "c")) },
                &deps,
                None,
            )
            .await
            .unwrap();

        let key = canonical_key("InventoryCalculations", "bulkValuation", &json!({"all": true}));
        assert_eq!(cache.dependency_index().dependencies_for(&key).unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_batch_invalidation_reports_key_count() {
        let cache = orchestrator().await;
        let dep = Dependency::table("items");

        for i in 0..5 {
            cache
                .get_or_compute::<Value, _, _>(
                    "InventoryCalculations",
                    "stockValue",
                    &json!({"itemId": format!("item-{}", i)}),
                    || async { Ok(CalculationResult::new(json!(1), "c")) },
                    &[dep.clone()],
                    None,
                )
                .await
                .unwrap();
        }

        let count = cache
            .invalidate_by_dependencies(&InvalidationEvent::new(
                vec![dep],
                "Items table rewritten",
            ))
            .await;

        assert_eq!(count, 5);
        assert_eq!(cache.dependency_index().tracked_keys(), 0);
    }

    #[tokio::test]
    async fn test_warming_runs_high_priority_first() {
        // Batch size 1 forces strictly sequential execution so the order
        // of compute calls is observable.
        let mut config = memory_only_config();
        config.warming.batch_size = 1;
        let cache = CacheOrchestrator::new(config).await.unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let task = |name: &'static str, priority: i32, order: Arc<Mutex<Vec<&'static str>>>| {
            WarmingTask::new(
                "VendorMetrics",
                name,
                json!({"vendor": name}),
                move || {
                    let order = order.clone();
                    Box::pin(async move {
                        order.lock().push(name);
                        Ok(CalculationResult::new(json!(1), name))
                    }) as crate::core::types::ComputeFuture
                },
            )
            .with_priority(priority)
        };

        let report = cache
            .warm_cache(vec![
                task("low", 1, order.clone()),
                task("high", 3, order.clone()),
            ])
            .await;

        assert_eq!(report, WarmingReport { warmed: 2, failed: 0 });
        assert_eq!(*order.lock(), vec!["high", "low"]);
    }

    #[tokio::test]
    async fn test_warming_tolerates_task_failure() {
        let cache = orchestrator().await;

        let ok = WarmingTask::new("VendorMetrics", "ok", json!({"v": 1}), || {
            Box::pin(async { Ok(CalculationResult::new(json!(1), "c")) })
                as crate::core::types::ComputeFuture
        });
        let bad = WarmingTask::new("VendorMetrics", "bad", json!({"v": 2}), || {
            Box::pin(async { Err(anyhow::anyhow!("no data")) })
                as crate::core::types::ComputeFuture
        });

        let report = cache.warm_cache(vec![ok, bad]).await;

        assert_eq!(report, WarmingReport { warmed: 1, failed: 1 });
    }

    #[tokio::test]
    async fn test_metrics_track_hits_and_misses() {
        let cache = orchestrator().await;
        let inputs = json!({"amount": 1});

        for _ in 0..3 {
            cache
                .get_or_compute::<Value, _, _>(
                    "FinancialCalculations",
                    "calculateTax",
                    &inputs,
                    || async { Ok(CalculationResult::new(json!(1), "c")) },
                    &[],
                    None,
                )
                .await
                .unwrap();
        }

        let metrics = cache.get_metrics().await;
        assert_eq!(metrics.memory.hit_count, 2);
        assert_eq!(metrics.memory.miss_count, 1);
        assert_eq!(metrics.combined.overall_hit_rate, 66.67);
        assert_eq!(metrics.invalidation.total_invalidations, 0);
    }

    #[tokio::test]
    async fn test_clear_all_resets_everything() {
        let cache = orchestrator().await;

        cache
            .get_or_compute::<Value, _, _>(
                "FinancialCalculations",
                "calculateTax",
                &json!({"a": 1}),
                || async { Ok(CalculationResult::new(json!(1), "c")) },
                &[Dependency::table("tax_rates")],
                None,
            )
            .await
            .unwrap();

        assert!(cache.clear_all().await);

        let metrics = cache.get_metrics().await;
        assert_eq!(metrics.memory.total_entries, 0);
        assert_eq!(metrics.combined.total_hits + metrics.combined.total_misses, 0);
        assert_eq!(cache.dependency_index().tracked_keys(), 0);
    }
}
