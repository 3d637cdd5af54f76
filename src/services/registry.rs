//! Registry of tracking records keyed by entity
//!
//! Records are created lazily on first sight and live until `reset`. There
//! is no eviction: an entity that stops reporting stays resident and is
//! reported `Stale`. Create-if-absent runs under one map lock; each record
//! carries its own lock so distinct entities can be processed in parallel.

use crate::domain::types::EntityId;
use crate::services::record::TrackerRecord;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::debug;

pub type RecordHandle = Arc<Mutex<TrackerRecord>>;

pub struct TrackerRegistry {
    records: Mutex<FxHashMap<EntityId, RecordHandle>>,
    raw_window: usize,
    trend_capacity: usize,
}

impl TrackerRegistry {
    pub fn new(raw_window: usize, trend_capacity: usize) -> Self {
        Self { records: Mutex::new(FxHashMap::default()), raw_window, trend_capacity }
    }

    /// Existing record for `entity_id`, or a new empty one
    pub fn resolve(&self, entity_id: &EntityId) -> RecordHandle {
        let mut records = self.records.lock();
        if let Some(handle) = records.get(entity_id) {
            return handle.clone();
        }
        debug!(entity = %entity_id, total = records.len() + 1, "tracker_created");
        let handle = Arc::new(Mutex::new(TrackerRecord::new(
            entity_id.clone(),
            self.raw_window,
            self.trend_capacity,
        )));
        records.insert(entity_id.clone(), handle.clone());
        handle
    }

    pub fn get(&self, entity_id: &EntityId) -> Option<RecordHandle> {
        self.records.lock().get(entity_id).cloned()
    }

    /// All records ordered by entity id
    pub fn records(&self) -> Vec<(EntityId, RecordHandle)> {
        let records = self.records.lock();
        let mut all: Vec<_> = records.iter().map(|(id, h)| (id.clone(), h.clone())).collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Drop every record (explicit end of the tracking session)
    pub fn reset(&self) {
        let mut records = self.records.lock();
        debug!(dropped = records.len(), "registry_reset");
        records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_resolve_is_idempotent() {
        let registry = TrackerRegistry::new(1, 30);
        let a = registry.resolve(&EntityId::new("An"));
        let b = registry.resolve(&EntityId::new("An"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_entities_get_distinct_records() {
        let registry = TrackerRegistry::new(1, 30);
        let a = registry.resolve(&EntityId::new("An"));
        let b = registry.resolve(&EntityId::new("Binh"));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.lock().entity_id().as_str(), "Binh");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_records_sorted() {
        let registry = TrackerRegistry::new(1, 30);
        for name in ["Dung", "An", "Cuong"] {
            registry.resolve(&EntityId::new(name));
        }
        let ids: Vec<String> = registry.records().into_iter().map(|(id, _)| id.0).collect();
        assert_eq!(ids, vec!["An", "Cuong", "Dung"]);
    }

    #[test]
    fn test_reset_clears() {
        let registry = TrackerRegistry::new(1, 30);
        registry.resolve(&EntityId::new("An"));
        assert!(!registry.is_empty());
        registry.reset();
        assert!(registry.is_empty());
        assert!(registry.get(&EntityId::new("An")).is_none());
    }

    #[test]
    fn test_concurrent_resolve_creates_once() {
        let registry = Arc::new(TrackerRegistry::new(1, 30));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.resolve(&EntityId::new("An")))
            })
            .collect();
        let resolved: Vec<RecordHandle> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(registry.len(), 1);
        for handle in &resolved[1..] {
            assert!(Arc::ptr_eq(&resolved[0], handle));
        }
    }
}
