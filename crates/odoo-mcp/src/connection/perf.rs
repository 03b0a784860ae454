//! Operation timing and the bounded record cache.
//!
//! Timing is observability only; nothing here may influence the outcome of
//! an operation. The record cache is invalidated by the write paths and
//! serves only whole-record reads.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;

/// Upper bound on cached records across all models.
const RECORD_CACHE_CAP: usize = 256;

/// Timing guard: logs the elapsed time of one named operation on drop.
pub struct OperationTimer {
    name: &'static str,
    started: Instant,
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        tracing::debug!(
            operation = self.name,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "operation timing"
        );
    }
}

/// Performance tracker owning the record cache.
pub struct PerfTracker {
    records: Mutex<RecordCache>,
}

struct RecordCache {
    entries: HashMap<(String, i64), Value>,
    order: VecDeque<(String, i64)>,
}

impl PerfTracker {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(RecordCache {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Start timing a named operation.
    pub fn track(&self, name: &'static str) -> OperationTimer {
        OperationTimer {
            name,
            started: Instant::now(),
        }
    }

    /// Cache a whole record.
    pub fn cache_record(&self, model: &str, id: i64, record: Value) {
        let mut cache = self.records.lock();
        let key = (model.to_string(), id);
        if cache.entries.insert(key.clone(), record).is_none() {
            cache.order.push_back(key);
        }
        while cache.order.len() > RECORD_CACHE_CAP {
            if let Some(oldest) = cache.order.pop_front() {
                cache.entries.remove(&oldest);
            }
        }
    }

    /// Fetch a cached record, if present.
    pub fn cached_record(&self, model: &str, id: i64) -> Option<Value> {
        self.records
            .lock()
            .entries
            .get(&(model.to_string(), id))
            .cloned()
    }

    /// Drop every cached record of one model (after `create`).
    pub fn invalidate_model(&self, model: &str) {
        let mut cache = self.records.lock();
        cache.entries.retain(|(m, _), _| m != model);
        cache.order.retain(|(m, _)| m != model);
    }

    /// Drop specific records (after `write` / `unlink`).
    pub fn invalidate_ids(&self, model: &str, ids: &[i64]) {
        let mut cache = self.records.lock();
        for id in ids {
            cache.entries.remove(&(model.to_string(), *id));
        }
        cache
            .order
            .retain(|(m, id)| m != model || !ids.contains(id));
    }

    /// Drop everything (reconnect).
    pub fn clear(&self) {
        let mut cache = self.records.lock();
        cache.entries.clear();
        cache.order.clear();
    }
}

impl Default for PerfTracker {
    fn default() -> Self {
        Self::new()
    }
}
