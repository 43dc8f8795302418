//! Lock token generator
//!
//! Tokens are snowflake ids: milliseconds since a custom epoch in the high
//! bits, then datacenter id, worker id and a per-millisecond sequence. They
//! are unique within a process and ordered by creation time.

use chrono::Utc;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tracing::error;

use crate::domain::locking::{LockError, LockResult};

/// Custom epoch (2018-05-07T15:05:33Z) in milliseconds
pub const EPOCH_MILLIS: i64 = 1_525_705_533_000;

const WORKER_ID_BITS: u32 = 5;
const DATACENTER_ID_BITS: u32 = 5;
const SEQUENCE_BITS: u32 = 12;

/// Largest accepted worker id
pub const MAX_WORKER_ID: i64 = (1 << WORKER_ID_BITS) - 1;
/// Largest accepted datacenter id
pub const MAX_DATACENTER_ID: i64 = (1 << DATACENTER_ID_BITS) - 1;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;

const WORKER_SHIFT: u32 = SEQUENCE_BITS;
const DATACENTER_SHIFT: u32 = SEQUENCE_BITS + WORKER_ID_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + WORKER_ID_BITS + DATACENTER_ID_BITS;

type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

#[derive(Debug, Default)]
struct GeneratorState {
    last_millis: i64,
    sequence: i64,
}

/// Thread-safe, monotonic lock token generator
pub struct TokenGenerator {
    worker_id: i64,
    datacenter_id: i64,
    clock: Clock,
    state: Mutex<GeneratorState>,
}

impl fmt::Debug for TokenGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGenerator")
            .field("worker_id", &self.worker_id)
            .field("datacenter_id", &self.datacenter_id)
            .finish_non_exhaustive()
    }
}

impl Default for TokenGenerator {
    fn default() -> Self {
        Self {
            worker_id: 0,
            datacenter_id: 0,
            clock: Box::new(|| Utc::now().timestamp_millis()),
            state: Mutex::new(GeneratorState::default()),
        }
    }
}

impl TokenGenerator {
    /// Create a generator for the given worker and datacenter ids
    pub fn new(worker_id: i64, datacenter_id: i64) -> LockResult<Self> {
        if !(0..=MAX_WORKER_ID).contains(&worker_id) {
            return Err(LockError::InvalidState(format!(
                "worker id {} outside 0..={}",
                worker_id, MAX_WORKER_ID
            )));
        }
        if !(0..=MAX_DATACENTER_ID).contains(&datacenter_id) {
            return Err(LockError::InvalidState(format!(
                "datacenter id {} outside 0..={}",
                datacenter_id, MAX_DATACENTER_ID
            )));
        }

        Ok(Self {
            worker_id,
            datacenter_id,
            ..Self::default()
        })
    }

    /// Replace the millisecond clock
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Mint the next id
    ///
    /// Blocks (spinning on the clock) when the sequence space of the current
    /// millisecond is exhausted.
    pub fn next_id(&self) -> LockResult<i64> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut now = (self.clock)();

        if now < state.last_millis {
            error!(
                last_millis = state.last_millis,
                now_millis = now,
                "Clock moved backwards, refusing to mint lock token"
            );
            return Err(LockError::ClockMovedBackwards {
                last: state.last_millis,
                now,
            });
        }

        if now == state.last_millis {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                while now <= state.last_millis {
                    std::hint::spin_loop();
                    now = (self.clock)();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_millis = now;

        Ok(((now - EPOCH_MILLIS) << TIMESTAMP_SHIFT)
            | (self.datacenter_id << DATACENTER_SHIFT)
            | (self.worker_id << WORKER_SHIFT)
            | state.sequence)
    }

    /// Mint the next token as a decimal string
    pub fn next_token(&self) -> LockResult<String> {
        self.next_id().map(|id| id.to_string())
    }
}

/// Split a generated id into (timestamp millis, datacenter id, worker id, sequence)
pub fn decompose(id: i64) -> (i64, i64, i64, i64) {
    (
        (id >> TIMESTAMP_SHIFT) + EPOCH_MILLIS,
        (id >> DATACENTER_SHIFT) & MAX_DATACENTER_ID,
        (id >> WORKER_SHIFT) & MAX_WORKER_ID,
        id & MAX_SEQUENCE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let generator = TokenGenerator::default();
        let mut last = 0;
        let mut seen = HashSet::new();

        for _ in 0..10_000 {
            let id = generator.next_id().unwrap();
            assert!(id > last);
            assert!(seen.insert(id));
            last = id;
        }
    }

    #[test]
    fn test_worker_and_datacenter_are_encoded() {
        let generator = TokenGenerator::new(7, 3).unwrap();
        let id = generator.next_id().unwrap();
        let (millis, datacenter, worker, _) = decompose(id);

        assert_eq!(datacenter, 3);
        assert_eq!(worker, 7);
        assert!(millis > EPOCH_MILLIS);
    }

    #[test]
    fn test_invalid_ids_rejected() {
        assert!(TokenGenerator::new(MAX_WORKER_ID + 1, 0).is_err());
        assert!(TokenGenerator::new(0, -1).is_err());
    }

    #[test]
    fn test_sequence_within_same_millisecond() {
        let generator = TokenGenerator::default().with_clock(|| EPOCH_MILLIS + 1_000);

        let first = generator.next_id().unwrap();
        let second = generator.next_id().unwrap();

        assert_eq!(decompose(first).3, 0);
        assert_eq!(decompose(second).3, 1);
    }

    #[test]
    fn test_sequence_exhaustion_waits_for_next_millisecond() {
        let calls = Arc::new(AtomicI64::new(0));
        let counter = calls.clone();
        // Frozen for the whole sequence space, then moves forward
        let generator = TokenGenerator::default().with_clock(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n <= MAX_SEQUENCE + 1 {
                EPOCH_MILLIS + 5
            } else {
                EPOCH_MILLIS + 6
            }
        });

        let mut ids = Vec::new();
        for _ in 0..=MAX_SEQUENCE + 1 {
            ids.push(generator.next_id().unwrap());
        }

        let last = *ids.last().unwrap();
        assert_eq!(decompose(last).0, EPOCH_MILLIS + 6);
        assert_eq!(decompose(last).3, 0);
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), ids.len());
    }

    #[test]
    fn test_clock_regression_is_an_error() {
        let now = Arc::new(AtomicI64::new(EPOCH_MILLIS + 100));
        let clock = now.clone();
        let generator = TokenGenerator::default().with_clock(move || clock.load(Ordering::SeqCst));

        generator.next_id().unwrap();
        now.store(EPOCH_MILLIS + 50, Ordering::SeqCst);

        let err = generator.next_token().unwrap_err();
        assert!(matches!(err, LockError::ClockMovedBackwards { .. }));
    }

    #[test]
    fn test_concurrent_callers_get_distinct_tokens() {
        let generator = Arc::new(TokenGenerator::default());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = generator.clone();
                std::thread::spawn(move || {
                    (0..2_000)
                        .map(|_| generator.next_token().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for token in handle.join().unwrap() {
                assert!(all.insert(token));
            }
        }
        assert_eq!(all.len(), 8_000);
    }
}
