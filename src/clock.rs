use serde::{Deserialize, Serialize};

/// Hybrid logical timestamp: wall-clock milliseconds plus a logical counter.
/// Orders events across replicas without synchronized clocks; the counter
/// absorbs wall-clock collisions and regressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HybridTimestamp {
    pub wall_ms: u64,
    pub counter: u64,
}

impl HybridTimestamp {
    pub fn new(wall_ms: u64, counter: u64) -> Self {
        Self { wall_ms, counter }
    }
}

/// Per-replica source of hybrid timestamps.
///
/// Invariant: every value returned by `next()` is strictly greater than all
/// values previously issued or observed on this replica. The facade owns one
/// clock per store and serializes access through `&mut self`; a replica with
/// concurrent writers must wrap it in a mutex.
#[derive(Debug, Default)]
pub struct HybridClock {
    last: Option<HybridTimestamp>,
    frozen_wall_ms: Option<u64>,
}

impl HybridClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from the newest timestamp found in durable history, so a
    /// reopened replica never re-issues a value it already used.
    pub fn resume_from(latest: Option<HybridTimestamp>) -> Self {
        Self { last: latest, frozen_wall_ms: None }
    }

    /// Pin the wall clock, for tests and deterministic replay drivers.
    /// `next()` keeps advancing through the counter while pinned.
    pub fn freeze_at(&mut self, wall_ms: u64) {
        self.frozen_wall_ms = Some(wall_ms);
    }

    pub fn next(&mut self) -> HybridTimestamp {
        let now = self.frozen_wall_ms.unwrap_or_else(now_millis);
        let issued = match self.last {
            Some(last) if now <= last.wall_ms => HybridTimestamp::new(last.wall_ms, last.counter + 1),
            _ => HybridTimestamp::new(now, 0),
        };
        self.last = Some(issued);
        issued
    }

    /// Advance past a timestamp received from a peer so subsequent `next()`
    /// calls exceed it.
    pub fn observe(&mut self, remote: HybridTimestamp) {
        if self.last.map_or(true, |last| last < remote) {
            self.last = Some(remote);
        }
    }

    pub fn observe_all<I: IntoIterator<Item = HybridTimestamp>>(&mut self, remotes: I) {
        for remote in remotes {
            self.observe(remote);
        }
    }

    pub fn latest(&self) -> Option<HybridTimestamp> {
        self.last
    }
}

pub fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_same_wall_time_bumps_counter() {
        let mut clock = HybridClock::new();
        clock.freeze_at(1_000);

        let a = clock.next();
        let b = clock.next();
        let c = clock.next();

        assert_eq!(a, HybridTimestamp::new(1_000, 0));
        assert_eq!(b, HybridTimestamp::new(1_000, 1));
        assert_eq!(c, HybridTimestamp::new(1_000, 2));
    }

    #[test]
    fn test_wall_regression_keeps_monotonic() {
        let mut clock = HybridClock::new();
        clock.freeze_at(2_000);
        let a = clock.next();

        // wall clock steps backwards, e.g. NTP adjustment
        clock.freeze_at(1_500);
        let b = clock.next();

        assert!(b > a);
        assert_eq!(b.wall_ms, 2_000);
    }

    #[test]
    fn test_observe_advances_past_remote() {
        let mut clock = HybridClock::new();
        clock.freeze_at(1_000);
        clock.next();

        clock.observe(HybridTimestamp::new(5_000, 3));
        let issued = clock.next();
        assert!(issued > HybridTimestamp::new(5_000, 3));
    }

    #[test]
    fn test_observe_older_is_ignored() {
        let mut clock = HybridClock::new();
        clock.freeze_at(5_000);
        let a = clock.next();

        clock.observe(HybridTimestamp::new(1_000, 99));
        let b = clock.next();
        assert!(b > a);
        assert_eq!(b.wall_ms, 5_000);
    }

    #[test]
    fn test_resume_from_history() {
        let mut clock = HybridClock::resume_from(Some(HybridTimestamp::new(9_000, 7)));
        clock.freeze_at(9_000);
        assert_eq!(clock.next(), HybridTimestamp::new(9_000, 8));
    }

    proptest! {
        // Every next() is strictly greater than everything issued or observed
        // before it, for any interleaving of local ticks and remote observations.
        #[test]
        fn prop_next_is_strictly_monotonic(
            ops in prop::collection::vec((0u64..10_000, 0u64..100, prop::bool::ANY), 1..50)
        ) {
            let mut clock = HybridClock::new();
            let mut high_water: Option<HybridTimestamp> = None;

            for (wall, counter, is_observe) in ops {
                if is_observe {
                    clock.observe(HybridTimestamp::new(wall, counter));
                } else {
                    clock.freeze_at(wall);
                    let issued = clock.next();
                    if let Some(prev) = high_water {
                        prop_assert!(issued > prev);
                    }
                    high_water = Some(issued);
                }
            }
        }
    }
}
