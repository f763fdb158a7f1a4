//! Bloom + sold-out cache
//!
//! First gate of the admission pipeline: reject requests for unknown
//! or exhausted activities before any network I/O. The filter is a
//! *counting* bloom so activities can leave and re-enter (sold out,
//! restocked, prewarmed again) without poisoning neighboring entries;
//! the sold-out marker is a local TTL cache so a finished sale stops
//! costing hot-store round-trips at all.
//!
//! `is_available` returning false is authoritative; true is only a
//! hint that the rest of the pipeline must still verify.

use crate::core_types::ActivityId;
use cached::{Cached, TimedCache};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

/// Counting bloom filter with u16 counters and double hashing.
///
/// Sized from the expected item count and target false-positive rate.
/// Saturated counters are never decremented, so a pathological number
/// of re-adds degrades accuracy but never produces a false negative
/// for a present item.
struct CountingBloom {
    counters: Vec<u16>,
    hashes: u32,
}

impl CountingBloom {
    fn new(expected_items: usize, fp_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = fp_rate.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let m = (-(n * p.ln()) / (ln2 * ln2)).ceil().max(8.0) as usize;
        let k = ((m as f64 / n) * ln2).round().max(1.0) as u32;
        Self {
            counters: vec![0u16; m],
            hashes: k,
        }
    }

    fn indexes(&self, item: ActivityId) -> impl Iterator<Item = usize> + '_ {
        let mut h1 = DefaultHasher::new();
        item.hash(&mut h1);
        let h1 = h1.finish();
        let mut h2 = DefaultHasher::new();
        (item, 0x5eed_u64).hash(&mut h2);
        let h2 = h2.finish() | 1; // odd so strides cover the table
        let m = self.counters.len() as u64;
        (0..self.hashes as u64).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % m) as usize)
    }

    fn add(&mut self, item: ActivityId) {
        let slots: Vec<usize> = self.indexes(item).collect();
        for idx in slots {
            self.counters[idx] = self.counters[idx].saturating_add(1);
        }
    }

    fn remove(&mut self, item: ActivityId) {
        let slots: Vec<usize> = self.indexes(item).collect();
        for idx in slots {
            let c = self.counters[idx];
            // Saturated counters are stuck: decrementing one would
            // underestimate every entry sharing it
            if c > 0 && c < u16::MAX {
                self.counters[idx] = c - 1;
            }
        }
    }

    fn contains(&self, item: ActivityId) -> bool {
        self.indexes(item).all(|idx| self.counters[idx] > 0)
    }
}

/// Filter plus the membership ledger that keeps add/remove balanced.
/// A remove is only applied for an id previously added; without the
/// ledger, repeated sold-out cycles would decrement counters shared
/// with neighboring ids below their true count.
struct FilterInner {
    bloom: CountingBloom,
    members: rustc_hash::FxHashSet<ActivityId>,
}

/// The pipeline-facing fast negative gate
pub struct AvailabilityFilter {
    inner: Mutex<FilterInner>,
    sold_out: Mutex<TimedCache<ActivityId, ()>>,
}

impl AvailabilityFilter {
    /// `sold_out_ttl_secs` bounds how long a sold-out marker silences
    /// an activity locally; after that the hot store decides again.
    pub fn new(expected_items: usize, fp_rate: f64, sold_out_ttl_secs: u64) -> Self {
        Self {
            inner: Mutex::new(FilterInner {
                bloom: CountingBloom::new(expected_items, fp_rate),
                members: rustc_hash::FxHashSet::default(),
            }),
            sold_out: Mutex::new(TimedCache::with_lifespan(sold_out_ttl_secs)),
        }
    }

    /// Register an activity on warm-up
    pub fn add(&self, activity_id: ActivityId) {
        self.sold_out.lock().unwrap().cache_remove(&activity_id);
        let mut inner = self.inner.lock().unwrap();
        if inner.members.insert(activity_id) {
            inner.bloom.add(activity_id);
        }
    }

    /// Stock hit zero: set the marker and remove from the filter
    pub fn mark_sold_out(&self, activity_id: ActivityId) {
        self.sold_out.lock().unwrap().cache_set(activity_id, ());
        let mut inner = self.inner.lock().unwrap();
        if inner.members.remove(&activity_id) {
            inner.bloom.remove(activity_id);
        }
    }

    /// Restock/repair path: lift the marker and re-register
    pub fn clear_sold_out(&self, activity_id: ActivityId) {
        self.add(activity_id);
    }

    /// False is authoritative: the caller rejects immediately.
    /// True only means "maybe"; stock is still checked downstream.
    pub fn is_available(&self, activity_id: ActivityId) -> bool {
        if self
            .sold_out
            .lock()
            .unwrap()
            .cache_get(&activity_id)
            .is_some()
        {
            return false;
        }
        self.inner.lock().unwrap().bloom.contains(activity_id)
    }
}
