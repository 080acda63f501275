//! # Calculation Cache Service
//!
//! Domain-facing surface over the orchestrator: per-domain invalidation
//! (financial, inventory, vendor), guarded full warming passes, the
//! scheduled warming and metrics timers, and the operator health report.
//! The service owns its background tasks and aborts them on shutdown.

use crate::core::config::CacheLayerConfig;
use crate::core::error::{CacheError, CacheResult};
use crate::core::types::{Dependency, InvalidationEvent, WarmingTask};
use crate::metrics::{self, HealthStatus, MemoryHealth, PerformanceHealth};
use crate::orchestrator::{CacheOrchestrator, WarmingReport};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Per-domain invalidation request. Each populated section invalidates one
/// calculation domain; absent sections are untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvalidationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub financial: Option<DomainInvalidation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<DomainInvalidation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<DomainInvalidation>,
}

/// One domain's slice of an invalidation request. An empty `ids` list
/// means the whole domain, not nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainInvalidation {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

impl DomainInvalidation {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            ids: Vec::new(),
            actor: None,
        }
    }

    pub fn with_ids(mut self, ids: Vec<String>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

/// Keys invalidated per domain by one `invalidate_caches` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub financial: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<usize>,
    pub total: usize,
}

/// Domain-facing cache service
pub struct CalculationCacheService {
    cache: Arc<CacheOrchestrator>,
    warming_in_progress: AtomicBool,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
    warming_task: Mutex<Option<JoinHandle<()>>>,
}

impl CalculationCacheService {
    pub async fn new(config: CacheLayerConfig) -> CacheResult<Self> {
        let cache = Arc::new(CacheOrchestrator::new(config).await?);
        Ok(Self::wrap(cache))
    }

    /// Build the service around an existing orchestrator.
    pub fn wrap(cache: Arc<CacheOrchestrator>) -> Self {
        Self {
            cache,
            warming_in_progress: AtomicBool::new(false),
            monitor_task: Mutex::new(None),
            warming_task: Mutex::new(None),
        }
    }

    /// The underlying orchestrator, for direct `get_or_compute` access.
    pub fn cache(&self) -> &Arc<CacheOrchestrator> {
        &self.cache
    }

    /// Invalidate the domains named in the request.
    ///
    /// Every populated section must carry a non-empty reason; a blank
    /// reason rejects the whole request before anything is invalidated,
    /// so partial application cannot occur.
    pub async fn invalidate_caches(
        &self,
        request: InvalidationRequest,
    ) -> CacheResult<InvalidationSummary> {
        for (domain, section) in [
            ("financial", &request.financial),
            ("inventory", &request.inventory),
            ("vendor", &request.vendor),
        ] {
            if let Some(section) = section {
                if section.reason.trim().is_empty() {
                    return Err(CacheError::Configuration {
                        message: format!("{} invalidation requires a reason", domain),
                    });
                }
            }
        }

        let mut summary = InvalidationSummary::default();

        if let Some(section) = &request.financial {
            let count = self
                .invalidate_domain(financial_dependencies(), section)
                .await;
            summary.financial = Some(count);
            summary.total += count;
        }
        if let Some(section) = &request.inventory {
            let count = self
                .invalidate_domain(inventory_dependencies(&section.ids), section)
                .await;
            summary.inventory = Some(count);
            summary.total += count;
        }
        if let Some(section) = &request.vendor {
            let count = self
                .invalidate_domain(vendor_dependencies(&section.ids), section)
                .await;
            summary.vendor = Some(count);
            summary.total += count;
        }

        Ok(summary)
    }

    async fn invalidate_domain(
        &self,
        dependencies: Vec<Dependency>,
        section: &DomainInvalidation,
    ) -> usize {
        let mut event = InvalidationEvent::new(dependencies, section.reason.clone());
        if let Some(actor) = &section.actor {
            event = event.with_actor(actor.clone());
        }
        self.cache.invalidate_by_dependencies(&event).await
    }

    /// Run a full warming pass. Only one pass may run at a time; a second
    /// call while one is in flight fails with `WarmingInProgress` instead
    /// of queueing.
    pub async fn warm_all_caches(&self, tasks: Vec<WarmingTask>) -> CacheResult<WarmingReport> {
        if self
            .warming_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CacheError::WarmingInProgress);
        }

        let report = self.cache.warm_cache(tasks).await;
        self.warming_in_progress.store(false, Ordering::SeqCst);
        Ok(report)
    }

    /// Start the periodic metrics log line. No-op when monitoring is
    /// disabled; calling again replaces the previous timer.
    pub fn start_monitoring(&self) {
        let config = self.cache.config();
        if !config.monitoring.enabled {
            return;
        }
        let interval = config.monitoring.metrics_interval;
        let cache = self.cache.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so the first log
            // line carries a full interval of data.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let m = cache.get_metrics().await;
                info!(
                    "Cache metrics: hit_rate={}% hits={} misses={} avg_ms={:.1} entries={} invalidations={}",
                    m.combined.overall_hit_rate,
                    m.combined.total_hits,
                    m.combined.total_misses,
                    m.combined.average_response_time_ms,
                    m.memory.total_entries,
                    m.invalidation.total_invalidations,
                );
            }
        });

        if let Some(previous) = self.monitor_task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Start scheduled warming. The supplier is called before each pass so
    /// task lists can reflect current data. Runs immediately when
    /// `warming.on_startup` is set, then on the configured interval; an
    /// interval of zero hours means startup-only.
    pub fn start_scheduled_warming<S>(self: &Arc<Self>, supplier: S)
    where
        S: Fn() -> Vec<WarmingTask> + Send + Sync + 'static,
    {
        let config = self.cache.config();
        if !config.warming.enabled {
            return;
        }
        let on_startup = config.warming.on_startup;
        let interval_hours = config.warming.schedule_interval_hours;
        if !on_startup && interval_hours == 0 {
            return;
        }
        let service = self.clone();

        let handle = tokio::spawn(async move {
            if on_startup {
                service.run_warming_pass(&supplier).await;
            }
            if interval_hours == 0 {
                return;
            }
            let mut ticker =
                tokio::time::interval(Duration::from_secs(interval_hours * 60 * 60));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                service.run_warming_pass(&supplier).await;
            }
        });

        if let Some(previous) = self.warming_task.lock().replace(handle) {
            previous.abort();
        }
    }

    async fn run_warming_pass<S>(&self, supplier: &S)
    where
        S: Fn() -> Vec<WarmingTask>,
    {
        match self.warm_all_caches(supplier()).await {
            Ok(report) if report.failed > 0 => {
                warn!(
                    "Scheduled warming finished with failures: {} warmed, {} failed",
                    report.warmed, report.failed
                );
            }
            Ok(_) => {}
            Err(e) => error!("Scheduled warming pass skipped: {}", e),
        }
    }

    pub async fn get_metrics(&self) -> crate::metrics::CacheMetrics {
        self.cache.get_metrics().await
    }

    /// Clear both tiers and all bookkeeping. True when the remote tier
    /// (if enabled) acknowledged the flush.
    pub async fn clear_all_caches(&self) -> bool {
        self.cache.clear_all().await
    }

    /// Operator health report: the classified verdict plus the tier and
    /// performance numbers it was derived from.
    pub async fn get_health_status(&self) -> HealthStatus {
        let m = self.cache.get_metrics().await;
        let config = self.cache.config();
        let status = metrics::classify(&m, config.redis.enabled);

        HealthStatus {
            status,
            redis: m.redis,
            memory: MemoryHealth {
                usage: m.memory.memory_usage,
                max_usage: config.memory.max_memory_mb * 1024 * 1024,
                entry_count: m.memory.total_entries,
            },
            performance: PerformanceHealth {
                hit_rate: m.combined.overall_hit_rate,
                average_response_time_ms: m.combined.average_response_time_ms,
            },
        }
    }

    /// Stop background tasks and disconnect the remote tier.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.monitor_task.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.warming_task.lock().take() {
            handle.abort();
        }
        self.cache.shutdown().await;
        info!("Calculation cache service shut down");
    }
}

/// Dependencies covering the financial calculation domain.
fn financial_dependencies() -> Vec<Dependency> {
    vec![
        Dependency::table("tax_rates"),
        Dependency::table("currency_rates"),
        Dependency::external("exchange-rates"),
    ]
}

/// Dependencies covering inventory calculations; specific item ids narrow
/// the invalidation, no ids means the whole items table.
fn inventory_dependencies(ids: &[String]) -> Vec<Dependency> {
    if ids.is_empty() {
        vec![Dependency::table("items")]
    } else {
        ids.iter()
            .map(|id| Dependency::entity(format!("item-{}", id)))
            .collect()
    }
}

/// Dependencies covering vendor metrics; same narrowing rule as inventory.
fn vendor_dependencies(ids: &[String]) -> Vec<Dependency> {
    if ids.is_empty() {
        vec![Dependency::table("vendors")]
    } else {
        ids.iter()
            .map(|id| Dependency::entity(format!("vendor-{}", id)))
            .collect()
    }
}
