//! In-memory LRU cache for model buffers.
//!
//! Bounded by a global cost budget, evicting least-recently-used entries
//! when an insert would exceed it. Cost is roughly kilobytes:
//! `(buffer bytes + name bytes) / 1000` summed over an entry's buffers.

use crate::device::SystemInfo;
use crate::io::NamedBuffers;
use lru::LruCache;
use parking_lot::Mutex;
use std::sync::Arc;

struct CacheEntry {
    buffers: Arc<NamedBuffers>,
    cost: u64,
}

/// Recency order is kept by the LRU map; the cost budget is enforced here.
struct CacheState {
    entries: LruCache<String, CacheEntry>,
    total_cost: u64,
}

impl CacheState {
    fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
            total_cost: 0,
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        let Some(entry) = self.entries.pop(key) else {
            return false;
        };
        self.total_cost -= entry.cost;
        true
    }
}

pub struct ModelCache {
    state: Mutex<CacheState>,
    max_cost: u64,
}

impl ModelCache {
    pub fn with_budget(max_cost: u64) -> Self {
        Self {
            state: Mutex::new(CacheState::new()),
            max_cost,
        }
    }

    /// Budget a `fraction` of the host's RAM.
    pub fn for_system(system: &SystemInfo, fraction: f32) -> Self {
        let budget = system.ram_total * 1_000_000.0 * fraction as f64;
        Self::with_budget(budget.max(0.0) as u64)
    }

    pub fn cost_of(buffers: &NamedBuffers) -> u64 {
        buffers
            .iter()
            .map(|(name, data)| ((data.len() + name.len()) / 1000) as u64)
            .sum()
    }

    /// Insert an entry, evicting LRU entries to make room.
    ///
    /// Returns `false` if the key is already cached or the entry alone
    /// exceeds the budget; the cache is left untouched in both cases.
    pub fn add(&self, key: impl Into<String>, buffers: Arc<NamedBuffers>) -> bool {
        let key = key.into();
        let cost = Self::cost_of(&buffers);
        let mut state = self.state.lock();
        if state.entries.contains(&key) || cost > self.max_cost {
            return false;
        }

        while state.total_cost + cost > self.max_cost {
            let Some((oldest, entry)) = state.entries.pop_lru() else {
                break;
            };
            tracing::debug!(key = %oldest, "Evicting cached model");
            state.total_cost -= entry.cost;
        }

        state.total_cost += cost;
        state.entries.put(key, CacheEntry { buffers, cost });
        true
    }

    /// Get cached buffers, marking the entry most recently used.
    pub fn fetch(&self, key: &str) -> Option<Arc<NamedBuffers>> {
        let mut state = self.state.lock();
        state.entries.get(key).map(|e| Arc::clone(&e.buffers))
    }

    pub fn remove(&self, key: &str) -> bool {
        self.state.lock().remove(key)
    }

    /// Membership check. Does not change recency.
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn clear(&self) {
        *self.state.lock() = CacheState::new();
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len(),
            total_cost: state.total_cost,
            max_cost: self.max_cost,
        }
    }

    pub fn log_stats(&self) {
        let stats = self.stats();
        tracing::info!(
            max = stats.max_cost,
            total = stats.total_cost,
            available = stats.available(),
            count = stats.entries,
            "Model cache"
        );
    }
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_cost: u64,
    pub max_cost: u64,
}

impl CacheStats {
    pub fn available(&self) -> u64 {
        self.max_cost.saturating_sub(self.total_cost)
    }

    /// Budget use (0.0 - 1.0).
    pub fn fill(&self) -> f32 {
        if self.max_cost == 0 {
            0.0
        } else {
            self.total_cost as f32 / self.max_cost as f32
        }
    }
}
