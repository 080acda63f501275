//! # Core Types
//!
//! Shared data types for the calculation cache: the calculation result
//! envelope, dependency descriptors used for invalidation, invalidation
//! events, and warming tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

/// Result envelope produced by every calculation service. The cache treats
/// `value` as opaque - it is serialized, stored, and handed back without
/// ever inspecting its shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalculationResult<T> {
    pub value: T,

    /// When the calculation actually ran (not when it was served from cache)
    pub calculated_at: DateTime<Utc>,

    /// Identifier assigned by the calculation service
    pub calculation_id: String,

    /// Confidence score in [0, 1]
    pub confidence: f64,
}

impl<T> CalculationResult<T> {
    pub fn new(value: T, calculation_id: impl Into<String>) -> Self {
        Self {
            value,
            calculated_at: Utc::now(),
            calculation_id: calculation_id.into(),
            confidence: 1.0,
        }
    }

    /// Envelope with a freshly generated calculation id, for services that
    /// do not assign their own.
    pub fn generated(value: T) -> Self {
        Self::new(value, Uuid::new_v4().to_string())
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

/// Kind of upstream data source a cached value was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Entity,
    Table,
    Field,
    External,
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DependencyKind::Entity => "entity",
            DependencyKind::Table => "table",
            DependencyKind::Field => "field",
            DependencyKind::External => "external",
        };
        f.write_str(name)
    }
}

/// A logical upstream data source whose change invalidates derived entries.
///
/// Equality and hashing cover only `kind` and `identifier`; `version` is
/// informational and never used for index matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    #[serde(rename = "type")]
    pub kind: DependencyKind,
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Dependency {
    pub fn new(kind: DependencyKind, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            version: None,
        }
    }

    pub fn entity(identifier: impl Into<String>) -> Self {
        Self::new(DependencyKind::Entity, identifier)
    }

    pub fn table(identifier: impl Into<String>) -> Self {
        Self::new(DependencyKind::Table, identifier)
    }

    pub fn field(identifier: impl Into<String>) -> Self {
        Self::new(DependencyKind::Field, identifier)
    }

    pub fn external(identifier: impl Into<String>) -> Self {
        Self::new(DependencyKind::External, identifier)
    }

    /// Composite lookup key, `type:identifier`. Doubles as the tag written
    /// to the remote tier.
    pub fn tag(&self) -> String {
        format!("{}:{}", self.kind, self.identifier)
    }
}

impl PartialEq for Dependency {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.identifier == other.identifier
    }
}

impl Eq for Dependency {}

impl std::hash::Hash for Dependency {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.identifier.hash(state);
    }
}

/// Transient invalidation request: constructed by a caller, consumed once
/// by the orchestrator, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub dependencies: Vec<Dependency>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

impl InvalidationEvent {
    pub fn new(dependencies: Vec<Dependency>, reason: impl Into<String>) -> Self {
        Self {
            dependencies,
            reason: reason.into(),
            timestamp: Utc::now(),
            actor: None,
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

/// Boxed future returned by a warming task's compute function.
pub type ComputeFuture =
    Pin<Box<dyn Future<Output = anyhow::Result<CalculationResult<Value>>> + Send>>;

/// A single cache warming task. Tasks are sorted by descending priority
/// before execution; ties keep their submission order.
pub struct WarmingTask {
    pub service: String,
    pub method: String,
    pub inputs: Value,
    pub compute: Box<dyn Fn() -> ComputeFuture + Send + Sync>,
    pub dependencies: Vec<Dependency>,
    pub priority: i32,
}

impl WarmingTask {
    pub fn new<F>(
        service: impl Into<String>,
        method: impl Into<String>,
        inputs: Value,
        compute: F,
    ) -> Self
    where
        F: Fn() -> ComputeFuture + Send + Sync + 'static,
    {
        Self {
            service: service.into(),
            method: method.into(),
            inputs,
            compute: Box::new(compute),
            dependencies: Vec::new(),
            priority: 0,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<Dependency>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl fmt::Debug for WarmingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmingTask")
            .field("service", &self.service)
            .field("method", &self.method)
            .field("priority", &self.priority)
            .field("dependencies", &self.dependencies.len())
            .finish()
    }
}
