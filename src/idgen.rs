//! Snowflake ID generator
//!
//! 64-bit ids for orders and order numbers:
//! 41 bits of milliseconds since a fixed epoch, 10 bits of node id,
//! 12 bits of per-millisecond step. Monotonic per process; the step
//! overflowing within one millisecond spins to the next, and a clock
//! that runs backwards is waited out rather than reused.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// 2024-01-01T00:00:00Z in unix milliseconds
const EPOCH_MS: u64 = 1_704_067_200_000;

const NODE_BITS: u64 = 10;
const STEP_BITS: u64 = 12;
const NODE_MAX: u64 = (1 << NODE_BITS) - 1;
const STEP_MASK: u64 = (1 << STEP_BITS) - 1;
const TIME_SHIFT: u64 = NODE_BITS + STEP_BITS;

struct State {
    last_ms: u64,
    step: u64,
}

/// Process-wide order id source
pub struct IdGenerator {
    node_id: u64,
    state: Mutex<State>,
}

impl IdGenerator {
    /// `node_id` must fit in 10 bits
    pub fn new(node_id: u64) -> Self {
        assert!(node_id <= NODE_MAX, "node_id must fit in 10 bits");
        Self {
            node_id,
            state: Mutex::new(State { last_ms: 0, step: 0 }),
        }
    }

    /// Generate the next id. Never returns the same value twice within
    /// a process.
    pub fn next_id(&self) -> i64 {
        let mut state = self.state.lock().unwrap();

        let mut now = Self::now_ms();
        // Clock regression: hold the line until real time catches up
        if now < state.last_ms {
            now = state.last_ms;
        }

        if now == state.last_ms {
            state.step = (state.step + 1) & STEP_MASK;
            if state.step == 0 {
                // Step exhausted for this millisecond
                while now <= state.last_ms {
                    std::hint::spin_loop();
                    now = Self::now_ms();
                }
            }
        } else {
            state.step = 0;
        }
        state.last_ms = now;

        let id = ((now - EPOCH_MS) << TIME_SHIFT) | (self.node_id << STEP_BITS) | state.step;
        id as i64
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(EPOCH_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_bit_layout() {
        let id_gen = IdGenerator::new(NODE_MAX);
        let id = id_gen.next_id() as u64;
        let node = (id >> STEP_BITS) & NODE_MAX;
        assert_eq!(node, NODE_MAX);
        // Timestamp part decodes to roughly now
        let ts = (id >> TIME_SHIFT) + EPOCH_MS;
        let now = IdGenerator::now_ms();
        assert!(now >= ts && now - ts < 1000);
    }

    #[test]
    fn test_monotonic_and_unique() {
        let id_gen = IdGenerator::new(1);
        let mut prev = 0i64;
        for _ in 0..10_000 {
            let id = id_gen.next_id();
            assert!(id > prev);
            prev = id;
        }
    }

    #[test]
    fn test_unique_across_threads() {
        let id_gen = Arc::new(IdGenerator::new(1));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let id_gen = id_gen.clone();
            handles.push(std::thread::spawn(move || {
                (0..5_000).map(|_| id_gen.next_id()).collect::<Vec<_>>()
            }));
        }
        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(seen.len(), 20_000);
    }

    #[test]
    #[should_panic(expected = "node_id must fit in 10 bits")]
    fn test_node_id_range() {
        IdGenerator::new(NODE_MAX + 1);
    }
}
