//! Event flavors and the time-ordered queue
//!
//! Events come in five flavors: the periodic step event, which owns an
//! intrusive queue of all parts sharing its period, and four one-shot spike
//! flavors (single/multi target, full delivery or latch-only). Heap entries
//! are ordered by `(t, seq)` with a monotonic sequence number, so events at
//! the same instant pop in the order they were pushed.

use std::cmp::Ordering;

use crate::ids::{PartId, StepId};

/// Work item dispatched by the simulator loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EventKind {
    /// Periodic step event; state lives in the step registry
    Step(StepId),
    /// One-shot spike delivered to a single part
    SpikeSingle {
        /// Targeted part
        target: PartId,
        /// Latch index stamped on the target
        latch: usize,
    },
    /// Latch-only variant of [`EventKind::SpikeSingle`]
    SpikeSingleLatch {
        /// Targeted part
        target: PartId,
        /// Latch index stamped on the target
        latch: usize,
    },
    /// One-shot spike delivered to a list of parts
    SpikeMulti {
        /// Targeted parts; compacted at delivery
        targets: Vec<PartId>,
        /// Latch index stamped on each survivor
        latch: usize,
    },
    /// Latch-only variant of [`EventKind::SpikeMulti`]
    SpikeMultiLatch {
        /// Targeted parts; compacted at delivery
        targets: Vec<PartId>,
        /// Latch index stamped on each survivor
        latch: usize,
    },
}

/// Entry in the event priority queue
#[derive(Debug, Clone)]
pub(crate) struct QueueEntry {
    /// Simulated firing time
    pub t: f64,
    /// Monotonic push counter; breaks ties at equal `t` in push order
    pub seq: u64,
    /// The event to run
    pub kind: EventKind,
}

// Ordering is reversed so std's max-heap pops the earliest (t, seq) first.
// Times in the queue are never NaN (scheduling validates them), so total_cmp
// agrees with the arithmetic order.
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .t
            .total_cmp(&self.t)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

/// State of a live periodic step event.
///
/// `head` is the intrusive queue of enqueued parts; `cursor` is the walk
/// position used by the visitor (`INVALID` = at the queue sentinel), kept
/// here so a part dequeuing mid-walk can nudge it.
#[derive(Debug)]
pub(crate) struct StepSlot {
    pub t: f64,
    pub dt: f64,
    pub head: PartId,
    pub cursor: PartId,
}

impl StepSlot {
    pub fn new(t: f64, dt: f64) -> Self {
        Self {
            t,
            dt,
            head: PartId::INVALID,
            cursor: PartId::INVALID,
        }
    }
}

/// Record of the event currently being run.
///
/// For step events `step` is valid and `t`/`dt` are read through the step
/// slot (integrators mutate them mid-run). Spike events carry their own `t`,
/// report `dt` 0, and name their target(s) here.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CurrentEvent {
    pub t: f64,
    pub dt: f64,
    pub step: StepId,
    pub target: PartId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    fn entry(t: f64, seq: u64) -> QueueEntry {
        QueueEntry {
            t,
            seq,
            kind: EventKind::SpikeSingle {
                target: PartId::INVALID,
                latch: 0,
            },
        }
    }

    #[test]
    fn test_time_ordering() {
        let mut heap = BinaryHeap::new();
        heap.push(entry(3.0, 1));
        heap.push(entry(1.0, 2));
        heap.push(entry(2.0, 3));

        assert_eq!(heap.pop().unwrap().t, 1.0);
        assert_eq!(heap.pop().unwrap().t, 2.0);
        assert_eq!(heap.pop().unwrap().t, 3.0);
    }

    #[test]
    fn test_fifo_at_same_time() {
        let mut heap = BinaryHeap::new();
        for seq in 1..=5 {
            heap.push(entry(5.0, seq));
        }

        let mut seqs = Vec::new();
        while let Some(e) = heap.pop() {
            seqs.push(e.seq);
        }
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_mixed_ordering() {
        let mut heap = BinaryHeap::new();
        heap.push(entry(50.0, 1));
        heap.push(entry(10.0, 2));
        heap.push(entry(10.0, 3));
        heap.push(entry(30.0, 4));
        heap.push(entry(10.0, 5));

        let mut popped = Vec::new();
        while let Some(e) = heap.pop() {
            popped.push((e.t, e.seq));
        }
        for window in popped.windows(2) {
            let (a, b) = (window[0], window[1]);
            assert!(
                a.0 < b.0 || (a.0 == b.0 && a.1 < b.1),
                "events out of order: {:?} vs {:?}",
                a,
                b
            );
        }
    }
}
