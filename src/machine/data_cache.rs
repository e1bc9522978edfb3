use crate::machine::metrics::CsmMetrics;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

struct CacheInner {
    entries: HashMap<u64, Bytes>,
    // Insertion order, oldest first. Eviction is FIFO regardless of access
    // pattern: followers consume entries roughly in index order, so the
    // oldest payload is the one least likely to be needed again.
    insertion_order: VecDeque<u64>,
    total_bytes: u64,
}

/// Byte-bounded FIFO cache from log index to WriteChunk payload.
///
/// Admission charges the payload length against the budget; once the budget
/// is exceeded the oldest entries are evicted (each eviction increments the
/// eviction metric). The cache is only populated on the leader, to serve
/// payload reads for followers that are catching up.
pub(crate) struct StateMachineDataCache {
    inner: Mutex<CacheInner>,
    capacity_bytes: u64,
    metrics: Arc<CsmMetrics>,
}

impl StateMachineDataCache {
    pub(crate) fn new(capacity_bytes: u64, metrics: Arc<CsmMetrics>) -> Self {
        StateMachineDataCache {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                insertion_order: VecDeque::new(),
                total_bytes: 0,
            }),
            capacity_bytes,
            metrics,
        }
    }

    pub(crate) fn put(&self, index: u64, data: Bytes) {
        let mut inner = self.lock();
        if let Some(previous) = inner.entries.insert(index, data.clone()) {
            // Replaced in place; only adjust the byte accounting.
            inner.total_bytes -= previous.len() as u64;
        } else {
            inner.insertion_order.push_back(index);
        }
        inner.total_bytes += data.len() as u64;

        while inner.total_bytes > self.capacity_bytes {
            let Some(oldest) = inner.insertion_order.pop_front() else {
                break;
            };
            if let Some(evicted) = inner.entries.remove(&oldest) {
                inner.total_bytes -= evicted.len() as u64;
                self.metrics.inc_num_evicted_cache_entries();
            }
        }
    }

    pub(crate) fn get(&self, index: u64) -> Option<Bytes> {
        self.lock().entries.get(&index).cloned()
    }

    /// Drop every entry with index <= `index`.
    pub(crate) fn remove_up_to(&self, index: u64) {
        self.remove_where(|i| i <= index);
    }

    /// Drop every entry with index > `index`. Used on log truncation.
    pub(crate) fn remove_above(&self, index: u64) {
        self.remove_where(|i| i > index);
    }

    pub(crate) fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.insertion_order.clear();
        inner.total_bytes = 0;
    }

    fn remove_where(&self, predicate: impl Fn(u64) -> bool) {
        let mut guard = self.lock();
        let CacheInner {
            entries,
            insertion_order,
            total_bytes,
        } = &mut *guard;
        insertion_order.retain(|i| {
            if predicate(*i) {
                if let Some(data) = entries.remove(i) {
                    *total_bytes -= data.len() as u64;
                }
                false
            } else {
                true
            }
        });
    }

    #[cfg(test)]
    fn total_bytes(&self) -> u64 {
        self.lock().total_bytes
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().entries.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner
            .lock()
            .expect("StateMachineDataCache mutex guard poison")
    }
}
