//! Stream alignment: strict ordinal joins within a channel group and a
//! latest-value join across groups.
//!
//! * [`StrictJoin`] pairs the Nth item of every source and nothing else. It
//!   holds at most `max_pending` items per source; on overflow the oldest
//!   incomplete ordinal is evicted from every source, so a stalled
//!   sub-channel costs whole ticks but never misaligns later ones.
//! * [`optical_tick`] / [`electrical_tick`] turn one joined tuple into a tick.
//! * [`LatestJoin`] keeps the last tick of each group and emits a
//!   [`CombinedInstant`] whenever either group updates, once both have
//!   produced at least one tick.

use std::collections::VecDeque;
use std::sync::Arc;

use log::warn;

use crate::types::{CombinedInstant, ElectricalReading, ElectricalTick, OpticalReading, OpticalTick};

/// Default per-source buffer depth for strict joins.
pub const DEFAULT_MAX_PENDING: usize = 64;

// ── StrictJoin ────────────────────────────────────────────────────────────────

/// Ordinal-keyed join over `N` sources.
#[derive(Debug)]
pub struct StrictJoin<T, const N: usize> {
    buffers: [VecDeque<T>; N],
    /// Items seen per source; the next arrival on source `i` has ordinal `received[i]`.
    received: [u64; N],
    /// Lowest ordinal not yet emitted or evicted.
    next: u64,
    max_pending: usize,
    dropped: u64,
}

impl<T, const N: usize> StrictJoin<T, N> {
    /// `max_pending` is clamped to at least 1.
    pub fn new(max_pending: usize) -> Self {
        Self {
            buffers: std::array::from_fn(|_| VecDeque::new()),
            received: [0; N],
            next: 0,
            max_pending: max_pending.max(1),
            dropped: 0,
        }
    }

    /// Add the next item from `source`.
    ///
    /// Returns the complete tuple for the oldest pending ordinal when this
    /// item completes it.
    ///
    /// # Panics
    /// Panics if `source >= N`.
    pub fn push(&mut self, source: usize, item: T) -> Option<[T; N]> {
        let ordinal = self.received[source];
        self.received[source] += 1;

        if ordinal < self.next {
            // Ordinal was evicted while this source lagged behind.
            return None;
        }
        self.buffers[source].push_back(item);

        if self.buffers.iter().all(|b| !b.is_empty()) {
            self.next += 1;
            let tuple: Vec<T> = self.buffers.iter_mut().filter_map(|b| b.pop_front()).collect();
            return tuple.try_into().ok();
        }

        if self.buffers[source].len() > self.max_pending {
            for b in &mut self.buffers {
                b.pop_front();
            }
            self.next += 1;
            self.dropped += 1;
            warn!(
                "strict join: source {source} is {} items ahead, dropped ordinal {} ({} dropped so far)",
                self.max_pending,
                self.next - 1,
                self.dropped
            );
        }
        None
    }

    /// Number of ordinals evicted because a source overflowed.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Items currently buffered for `source`.
    pub fn pending(&self, source: usize) -> usize {
        self.buffers[source].len()
    }
}

// ── Tick builders ─────────────────────────────────────────────────────────────

/// Build an optical tick from `[ambient, infrared, red]` readings.
///
/// Samples are paired by position; the tick is as long as the shortest reading.
pub fn optical_tick([ambient, infrared, red]: [OpticalReading; 3]) -> OpticalTick {
    let n = ambient
        .samples
        .len()
        .min(infrared.samples.len())
        .min(red.samples.len());
    let ambient: Vec<u32> = ambient.samples.into_iter().take(n).collect();
    let infrared: Vec<u32> = infrared.samples.into_iter().take(n).collect();
    let red: Vec<u32> = red.samples.into_iter().take(n).collect();

    let ir_corrected = infrared
        .iter()
        .zip(&ambient)
        .map(|(&ir, &amb)| ir as i64 - amb as i64)
        .collect();
    let red_corrected = red
        .iter()
        .zip(&ambient)
        .map(|(&r, &amb)| r as i64 - amb as i64)
        .collect();

    OpticalTick {
        ambient,
        infrared,
        red,
        ir_corrected,
        red_corrected,
    }
}

/// Build an electrical tick from `[TP9, AF7, AF8, TP10]` readings.
pub fn electrical_tick([tp9, af7, af8, tp10]: [ElectricalReading; 4]) -> ElectricalTick {
    let n = [&tp9, &af7, &af8, &tp10]
        .iter()
        .map(|r| r.samples.len())
        .min()
        .unwrap_or(0);
    let take = |r: ElectricalReading| -> Vec<f64> { r.samples.into_iter().take(n).collect() };
    ElectricalTick {
        tp9: take(tp9),
        af7: take(af7),
        af8: take(af8),
        tp10: take(tp10),
    }
}

// ── LatestJoin ────────────────────────────────────────────────────────────────

/// Tick from one channel group, on its way to the [`LatestJoin`].
#[derive(Debug, Clone)]
pub enum GroupTick {
    Optical(OpticalTick),
    Electrical(ElectricalTick),
}

/// Last-known-value join between the optical and electrical groups.
///
/// Owned by a single task, so every combined instant leaves in the order
/// the ticks were applied and neither group ever goes backwards.
#[derive(Debug, Default)]
pub struct LatestJoin {
    optical: Option<Arc<OpticalTick>>,
    electrical: Option<Arc<ElectricalTick>>,
}

impl LatestJoin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a tick from either group.
    pub fn update(&mut self, tick: GroupTick) -> Option<CombinedInstant> {
        match tick {
            GroupTick::Optical(t) => self.update_optical(t),
            GroupTick::Electrical(t) => self.update_electrical(t),
        }
    }

    pub fn update_optical(&mut self, tick: OpticalTick) -> Option<CombinedInstant> {
        let optical = Arc::new(tick);
        self.optical = Some(Arc::clone(&optical));
        self.electrical.as_ref().map(|electrical| CombinedInstant {
            optical,
            electrical: Arc::clone(electrical),
        })
    }

    pub fn update_electrical(&mut self, tick: ElectricalTick) -> Option<CombinedInstant> {
        let electrical = Arc::new(tick);
        self.electrical = Some(Arc::clone(&electrical));
        self.optical.as_ref().map(|optical| CombinedInstant {
            optical: Arc::clone(optical),
            electrical,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn optical(channel: usize, samples: Vec<u32>) -> OpticalReading {
        OpticalReading { index: 0, channel, samples }
    }

    fn electrical(electrode: usize, samples: Vec<f64>) -> ElectricalReading {
        ElectricalReading { index: 0, electrode, samples }
    }

    #[test]
    fn test_strict_join_bounded_by_shortest_source() {
        let mut join: StrictJoin<u32, 3> = StrictJoin::new(16);
        let mut out = Vec::new();

        for i in 0..5 {
            out.extend(join.push(0, 100 + i));
            out.extend(join.push(1, 200 + i));
        }
        for i in 0..3 {
            out.extend(join.push(2, 300 + i));
        }

        assert_eq!(out.len(), 3);
        for (n, tuple) in out.iter().enumerate() {
            let n = n as u32;
            assert_eq!(*tuple, [100 + n, 200 + n, 300 + n]);
        }
        assert_eq!(join.pending(0), 2);
        assert_eq!(join.pending(2), 0);
    }

    #[test]
    fn test_strict_join_waits_for_every_source() {
        let mut join: StrictJoin<&str, 4> = StrictJoin::new(8);
        assert!(join.push(0, "a").is_none());
        assert!(join.push(1, "b").is_none());
        assert!(join.push(3, "d").is_none());
        assert_eq!(join.push(2, "c"), Some(["a", "b", "c", "d"]));
    }

    #[test]
    fn test_strict_join_evicts_oldest_on_overflow() {
        let mut join: StrictJoin<u32, 2> = StrictJoin::new(2);

        // Source 0 runs three items ahead; ordinal 0 is evicted.
        assert!(join.push(0, 0).is_none());
        assert!(join.push(0, 1).is_none());
        assert!(join.push(0, 2).is_none());
        assert_eq!(join.dropped(), 1);
        assert_eq!(join.pending(0), 2);

        // Source 1's ordinal 0 arrives late and is discarded.
        assert!(join.push(1, 10).is_none());
        // Ordinals stay aligned: 1 pairs with 1.
        assert_eq!(join.push(1, 11), Some([1, 11]));
        assert_eq!(join.push(1, 12), Some([2, 12]));
    }

    #[test]
    fn test_optical_tick_corrects_ambient() {
        let tick = optical_tick([
            optical(0, vec![100, 200]),
            optical(1, vec![150, 150]),
            optical(2, vec![400, 50]),
        ]);
        assert_eq!(tick.ir_corrected, vec![50, -50]);
        assert_eq!(tick.red_corrected, vec![300, -150]);
        assert_eq!(tick.ambient, vec![100, 200]);
    }

    #[test]
    fn test_optical_tick_uses_shortest_reading() {
        let tick = optical_tick([
            optical(0, vec![1, 2, 3]),
            optical(1, vec![5, 6]),
            optical(2, vec![7, 8, 9]),
        ]);
        assert_eq!(tick.infrared, vec![5, 6]);
        assert_eq!(tick.red, vec![7, 8]);
        assert_eq!(tick.ir_corrected.len(), 2);
    }

    #[test]
    fn test_electrical_tick_keeps_lead_order() {
        let tick = electrical_tick([
            electrical(0, vec![1.0]),
            electrical(1, vec![2.0]),
            electrical(2, vec![3.0]),
            electrical(3, vec![4.0]),
        ]);
        assert_eq!(tick.leads(), [&[1.0][..], &[2.0][..], &[3.0][..], &[4.0][..]]);
        assert_eq!(tick.len(), 1);
    }

    #[test]
    fn test_latest_join_needs_both_groups() {
        let mut join = LatestJoin::new();
        let o = optical_tick([optical(0, vec![0]), optical(1, vec![1]), optical(2, vec![2])]);
        assert!(join.update_optical(o.clone()).is_none());

        let e = electrical_tick([
            electrical(0, vec![0.0]),
            electrical(1, vec![0.0]),
            electrical(2, vec![0.0]),
            electrical(3, vec![0.0]),
        ]);
        let first = join.update_electrical(e.clone()).unwrap();
        assert_eq!(*first.optical, o);

        // Each further update re-emits with the other group's last value.
        let second = join.update_electrical(e).unwrap();
        assert!(Arc::ptr_eq(&first.optical, &second.optical));
        let third = join.update_optical(o).unwrap();
        assert!(Arc::ptr_eq(&second.electrical, &third.electrical));
    }

    #[test]
    fn test_latest_join_update_dispatches_by_group() {
        let mut join = LatestJoin::new();
        let o = optical_tick([optical(0, vec![0]), optical(1, vec![7]), optical(2, vec![9])]);
        let e = electrical_tick([
            electrical(0, vec![1.0]),
            electrical(1, vec![2.0]),
            electrical(2, vec![3.0]),
            electrical(3, vec![4.0]),
        ]);
        assert!(join.update(GroupTick::Electrical(e.clone())).is_none());
        let instant = join.update(GroupTick::Optical(o.clone())).unwrap();
        assert_eq!(*instant.optical, o);
        assert_eq!(*instant.electrical, e);
    }
}
