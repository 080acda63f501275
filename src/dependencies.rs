//! # Dependency Index
//!
//! Bidirectional map between cache keys and the upstream dependencies
//! their values were computed from. Both directions live behind a single
//! lock and are only ever mutated together through `register`, `remove`,
//! and `clear`, which keeps the invariant by construction: every
//! `(key, dep)` pair present in the forward map appears in the reverse
//! map, and vice versa.

use crate::core::types::Dependency;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Default)]
struct IndexState {
    /// cache key -> dependencies it was cached with
    key_to_deps: HashMap<String, HashSet<Dependency>>,

    /// "type:identifier" -> cache keys derived from that dependency
    dep_to_keys: HashMap<String, HashSet<String>>,
}

/// Bidirectional dependency index
#[derive(Default)]
pub struct DependencyIndex {
    state: RwLock<IndexState>,
}

impl DependencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key against its dependencies, keeping at most `cap` of
    /// them. Extras past the cap are dropped silently - a deliberate
    /// precision/memory tradeoff, not an error. Returns how many were
    /// actually tracked. Re-registering a key replaces its previous set.
    pub fn register(&self, key: &str, dependencies: &[Dependency], cap: usize) -> usize {
        if dependencies.is_empty() || cap == 0 {
            return 0;
        }

        let mut state = self.state.write();
        Self::remove_locked(&mut state, key);

        if dependencies.len() > cap {
            debug!(
                "Dependency cap reached for key {}: tracking {} of {}",
                key,
                cap,
                dependencies.len()
            );
        }

        let mut tracked: HashSet<Dependency> = HashSet::with_capacity(cap.min(dependencies.len()));
        for dep in dependencies.iter().take(cap) {
            tracked.insert(dep.clone());
        }

        for dep in &tracked {
            state
                .dep_to_keys
                .entry(dep.tag())
                .or_default()
                .insert(key.to_string());
        }
        let count = tracked.len();
        state.key_to_deps.insert(key.to_string(), tracked);
        count
    }

    /// Cache keys affected by a dependency change.
    pub fn resolve(&self, dependency: &Dependency) -> Vec<String> {
        let state = self.state.read();
        state
            .dep_to_keys
            .get(&dependency.tag())
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove a key from both directions. A dependency left with no keys
    /// is dropped entirely from the reverse map.
    pub fn remove(&self, key: &str) {
        let mut state = self.state.write();
        Self::remove_locked(&mut state, key);
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.key_to_deps.clear();
        state.dep_to_keys.clear();
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.state.read().key_to_deps.len()
    }

    /// Number of distinct dependencies currently tracked.
    pub fn tracked_dependencies(&self) -> usize {
        self.state.read().dep_to_keys.len()
    }

    /// Dependencies tracked for a specific key, if any.
    pub fn dependencies_for(&self, key: &str) -> Option<Vec<Dependency>> {
        self.state
            .read()
            .key_to_deps
            .get(key)
            .map(|deps| deps.iter().cloned().collect())
    }

    fn remove_locked(state: &mut IndexState, key: &str) {
        let Some(deps) = state.key_to_deps.remove(key) else {
            return;
        };
        for dep in deps {
            let tag = dep.tag();
            if let Some(keys) = state.dep_to_keys.get_mut(&tag) {
                keys.remove(key);
                if keys.is_empty() {
                    state.dep_to_keys.remove(&tag);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_resolve() {
        let index = DependencyIndex::new();
        let deps = vec![Dependency::entity("item-1"), Dependency::table("items")];

        assert_eq!(index.register("key-a", &deps, 50), 2);

        assert_eq!(index.resolve(&Dependency::entity("item-1")), vec!["key-a"]);
        assert_eq!(index.resolve(&Dependency::table("items")), vec!["key-a"]);
        assert!(index.resolve(&Dependency::entity("item-2")).is_empty());
    }

    #[test]
    fn test_remove_drops_both_directions() {
        let index = DependencyIndex::new();
        index.register("key-a", &[Dependency::entity("item-1")], 50);
        index.register("key-b", &[Dependency::entity("item-1")], 50);

        index.remove("key-a");

        assert_eq!(index.tracked_keys(), 1);
        assert_eq!(index.resolve(&Dependency::entity("item-1")), vec!["key-b"]);

        index.remove("key-b");

        // A dependency with no remaining keys disappears entirely.
        assert_eq!(index.tracked_keys(), 0);
        assert_eq!(index.tracked_dependencies(), 0);
    }

    #[test]
    fn test_cap_drops_extra_dependencies() {
        let index = DependencyIndex::new();
        let deps: Vec<Dependency> = (0..100)
            .map(|i| Dependency::entity(format!("item-{}", i)))
            .collect();

        let tracked = index.register("key-a", &deps, 20);

        assert_eq!(tracked, 20);
        assert_eq!(index.dependencies_for("key-a").unwrap().len(), 20);
        assert_eq!(index.tracked_dependencies(), 20);
    }

    #[test]
    fn test_reregistering_replaces_previous_set() {
        let index = DependencyIndex::new();
        index.register("key-a", &[Dependency::entity("item-1")], 50);
        index.register("key-a", &[Dependency::entity("item-2")], 50);

        assert!(index.resolve(&Dependency::entity("item-1")).is_empty());
        assert_eq!(index.resolve(&Dependency::entity("item-2")), vec!["key-a"]);
        assert_eq!(index.tracked_dependencies(), 1);
    }

    #[test]
    fn test_duplicate_dependencies_collapse() {
        let index = DependencyIndex::new();
        let mut versioned = Dependency::entity("item-1");
        versioned.version = Some("3".to_string());

        // Same type+identifier; version is informational only.
        let tracked = index.register("key-a", &[Dependency::entity("item-1"), versioned], 50);

        assert_eq!(tracked, 1);
    }

    #[test]
    fn test_fan_out_across_keys() {
        let index = DependencyIndex::new();
        for i in 0..5 {
            index.register(
                &format!("key-{}", i),
                &[Dependency::table("items")],
                50,
            );
        }

        let mut keys = index.resolve(&Dependency::table("items"));
        keys.sort();
        assert_eq!(keys.len(), 5);
        assert_eq!(keys[0], "key-0");
    }
}
