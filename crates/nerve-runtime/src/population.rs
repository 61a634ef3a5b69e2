//! Populations: homogeneous part collections with recycling and matching
//!
//! A population owns its parts through two intrusive structures kept in the
//! simulator's arena: a circular live ring (newest at the head, with an
//! `old` marker separating parts born since the last matching pass) and a
//! singly-linked dead chain of removed parts awaiting recycling.
//!
//! Connection populations bind pairs of parts from two endpoint populations.
//! The matching pass scans new parts against candidate partners, drawing
//! acceptance from the sampling service and respecting maximum degree
//! bounds. Minimum-degree back-fill and spatial (k-nearest / radius)
//! pruning are declared on the trait but not yet driven by the pass.

use std::any::Any;

use crate::{
    ids::{PartId, PopId},
    part::{Part, PartSlot},
    simulator::Simulator,
};

/// A homogeneous collection of parts.
///
/// Implementations provide the part factory and, for connection
/// populations, the endpoint wiring and degree bounds. Membership
/// bookkeeping (the live ring and dead chain) is handled by the simulator;
/// the `add`/`remove`/`clear_new` hooks let a population maintain its own
/// counters alongside.
pub trait Population: Any {
    /// Upcast for downcasting to the concrete population type
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting to the concrete population type
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Construct a fresh part
    fn create(&mut self) -> Box<dyn Part>;

    /// Endpoint population `i` of a connection population (0 = source,
    /// 1 = destination); `INVALID` for ordinary populations
    fn get_target(&self, _i: usize) -> PopId {
        PopId::INVALID
    }

    /// Minimum connections per endpoint-`i` part (0 = no minimum)
    fn get_min(&self, _i: usize) -> usize {
        0
    }

    /// Maximum connections per endpoint-`i` part (0 = unlimited)
    fn get_max(&self, _i: usize) -> usize {
        0
    }

    /// Nearest-neighbor candidate count for endpoint `i` (0 = unlimited)
    fn get_k(&self, _i: usize) -> usize {
        0
    }

    /// Candidate search radius around endpoint `i` (0 = unlimited)
    fn get_radius(&self, _i: usize) -> f64 {
        0.0
    }

    /// Bookkeeping hook: a part has been linked into the live ring
    fn add(&mut self, _part: PartId) {}

    /// Bookkeeping hook: a part has been moved to the dead chain
    fn remove(&mut self, _part: PartId) {}

    /// Bookkeeping hook: the "new parts" window has been closed
    fn clear_new(&mut self) {}
}

/// Registry slot: population behavior plus membership state
pub(crate) struct PopSlot {
    pub behavior: Option<Box<dyn Population>>,
    /// Newest live part (the ring position right after the sentinel)
    pub first: PartId,
    /// Oldest live part (the ring position right before the sentinel)
    pub last: PartId,
    /// First part that predates the last matching pass; `INVALID` (the
    /// sentinel) while every live part is still new
    pub old: PartId,
    /// Head of the dead chain
    pub dead: PartId,
    /// Live part count
    pub n_live: usize,
}

impl PopSlot {
    fn new(behavior: Box<dyn Population>) -> Self {
        Self {
            behavior: Some(behavior),
            first: PartId::INVALID,
            last: PartId::INVALID,
            old: PartId::INVALID,
            dead: PartId::INVALID,
            n_live: 0,
        }
    }
}

impl Simulator {
    pub(crate) fn pop_slot(&self, pop: PopId) -> &PopSlot {
        &self.pops[pop.index()]
    }

    pub(crate) fn pop_slot_mut(&mut self, pop: PopId) -> &mut PopSlot {
        &mut self.pops[pop.index()]
    }

    /// Register a population and return its handle
    pub fn register_population(&mut self, behavior: Box<dyn Population>) -> PopId {
        let id = PopId::new(self.pops.len() as u32);
        self.pops.push(PopSlot::new(behavior));
        id
    }

    /// Borrow a population's behavior
    pub fn population(&self, pop: PopId) -> Option<&dyn Population> {
        self.pops.get(pop.index())?.behavior.as_deref()
    }

    /// Mutably borrow a population's behavior
    pub fn population_mut(&mut self, pop: PopId) -> Option<&mut dyn Population> {
        match self.pops.get_mut(pop.index()) {
            Some(slot) => slot.behavior.as_deref_mut(),
            None => None,
        }
    }

    /// Number of live parts in a population
    pub fn live_count(&self, pop: PopId) -> usize {
        self.pop_slot(pop).n_live
    }

    /// Live parts of a population, newest first
    pub fn live_parts(&self, pop: PopId) -> Vec<PartId> {
        let mut result = Vec::new();
        let mut id = self.pop_slot(pop).first;
        while id.is_valid() {
            result.push(id);
            id = self.slot(id).after;
        }
        result
    }

    /// Obtain a cleared part linked into the live ring: recycle the first
    /// free part from the dead chain, or create a fresh one.
    pub fn allocate(&mut self, pop: PopId) -> PartId {
        // Scan the dead chain for a recyclable part.
        let mut prev = PartId::INVALID;
        let mut cur = self.pop_slot(pop).dead;
        while cur.is_valid() {
            let free = self
                .slot(cur)
                .part
                .as_ref()
                .map(|part| part.is_free())
                .unwrap_or(false);
            if free {
                let next = self.slot(cur).next;
                if prev.is_valid() {
                    self.slot_mut(prev).next = next;
                } else {
                    self.pop_slot_mut(pop).dead = next;
                }
                self.slot_mut(cur).next = PartId::INVALID;
                if let Some(part) = self.slot_mut(cur).part.as_mut() {
                    part.clear();
                }
                self.insert_live(pop, cur);
                if let Some(behavior) = self.pop_slot_mut(pop).behavior.as_mut() {
                    behavior.add(cur);
                }
                return cur;
            }
            prev = cur;
            cur = self.slot(cur).next;
        }

        // Nothing to recycle.
        let Some(mut behavior) = self.pop_slot_mut(pop).behavior.take() else {
            panic!("population {pop} has no behavior registered");
        };
        let part = behavior.create();
        let id = self.insert_slot(pop, part);
        self.insert_live(pop, id);
        behavior.add(id);
        self.pop_slot_mut(pop).behavior = Some(behavior);
        id
    }

    /// Move a live part to its population's dead chain
    pub fn remove(&mut self, id: PartId) {
        let pop = self.slot(id).pop;
        self.unlink_live(pop, id);
        if let Some(behavior) = self.pop_slot_mut(pop).behavior.as_mut() {
            behavior.remove(id);
        }
        let dead = self.pop_slot(pop).dead;
        self.slot_mut(id).next = dead;
        self.pop_slot_mut(pop).dead = id;
    }

    /// Run a part's `enter_simulation` hook and mark it in-simulation
    pub fn enter_simulation(&mut self, id: PartId) {
        if let Some(part) = self.slot_mut(id).part.as_mut() {
            part.enter_simulation();
        }
        self.slot_mut(id).in_sim = true;
    }

    /// Finalize-driven exit: hook, flag, and return to the population
    pub(crate) fn leave_part(&mut self, id: PartId) {
        if let Some(part) = self.slot_mut(id).part.as_mut() {
            part.leave_simulation();
        }
        self.slot_mut(id).in_sim = false;
        self.remove(id);
    }

    pub(crate) fn insert_slot(&mut self, pop: PopId, part: Box<dyn Part>) -> PartId {
        let id = PartId::new(self.slots.len() as u32);
        self.slots.push(PartSlot::new(part, pop));
        id
    }

    /// Link a part at the head of the live ring (the "new" end)
    fn insert_live(&mut self, pop: PopId, id: PartId) {
        let first = self.pop_slot(pop).first;
        {
            let slot = self.slot_mut(id);
            slot.before = PartId::INVALID;
            slot.after = first;
        }
        if first.is_valid() {
            self.slot_mut(first).before = id;
        } else {
            self.pop_slot_mut(pop).last = id;
        }
        self.pop_slot_mut(pop).first = id;
        self.pop_slot_mut(pop).n_live += 1;
    }

    fn unlink_live(&mut self, pop: PopId, id: PartId) {
        // Keep the old marker on a part that stays in the ring.
        if self.pop_slot(pop).old == id {
            let after = self.slot(id).after;
            self.pop_slot_mut(pop).old = after;
        }
        let before = self.slot(id).before;
        let after = self.slot(id).after;
        if before.is_valid() {
            self.slot_mut(before).after = after;
        } else {
            self.pop_slot_mut(pop).first = after;
        }
        if after.is_valid() {
            self.slot_mut(after).before = before;
        } else {
            self.pop_slot_mut(pop).last = before;
        }
        let slot = self.slot_mut(id);
        slot.before = PartId::INVALID;
        slot.after = PartId::INVALID;
        self.pop_slot_mut(pop).n_live -= 1;
    }

    /// Ring successor, skipping the sentinel (wraps to the head)
    fn next_live(&self, pop: PopId, id: PartId) -> PartId {
        let next = if id.is_valid() {
            self.slot(id).after
        } else {
            self.pop_slot(pop).first
        };
        if next.is_valid() {
            next
        } else {
            self.pop_slot(pop).first
        }
    }

    /// Ring predecessor, skipping the sentinel (wraps to the tail)
    fn prev_live(&self, pop: PopId, id: PartId) -> PartId {
        let prev = if id.is_valid() {
            self.slot(id).before
        } else {
            self.pop_slot(pop).last
        };
        if prev.is_valid() {
            prev
        } else {
            self.pop_slot(pop).last
        }
    }

    /// Deferred resize: grow with freshly initialized parts on the current
    /// event's step, or ask the newest surplus parts to die.
    pub(crate) fn apply_resize(&mut self, pop: PopId, n: usize) {
        let current = self.pop_slot(pop).n_live;
        if n > current {
            for _ in current..n {
                let id = self.allocate(pop);
                self.enter_simulation(id);
                let step = self.current.step;
                if step.is_valid() {
                    self.enqueue_on_step(step, id);
                }
                self.init_part(id);
            }
        } else {
            let mut id = self.pop_slot(pop).first;
            let mut excess = current - n;
            while excess > 0 && id.is_valid() {
                let next = self.slot(id).after;
                if let Some(part) = self.slot_mut(id).part.as_mut() {
                    part.die();
                }
                id = next;
                excess -= 1;
            }
        }
    }

    /// Deferred new-window closure: every live part becomes "old"
    pub(crate) fn apply_clear_new(&mut self, pop: PopId) {
        let first = self.pop_slot(pop).first;
        self.pop_slot_mut(pop).old = first;
        if let Some(behavior) = self.pop_slot_mut(pop).behavior.as_mut() {
            behavior.clear_new();
        }
    }

    /// Place an accepted connection part into the arena and the simulation,
    /// scheduled on `anchor`'s step event (or the current one).
    fn materialize_connection(
        &mut self,
        pop: PopId,
        part: Box<dyn Part>,
        anchor: PartId,
    ) -> PartId {
        let id = self.insert_slot(pop, part);
        self.insert_live(pop, id);
        self.enter_simulation(id);
        let step = if self.slot(anchor).step.is_valid() {
            self.slot(anchor).step
        } else {
            self.current.step
        };
        if step.is_valid() {
            self.enqueue_on_step(step, id);
        }
        self.init_part(id);
        id
    }

    /// Deferred connection-matching pass.
    ///
    /// Scans new parts of the endpoint populations against candidate
    /// partners: first new A against all of B (round-robin resumption via
    /// `b_last` so successive A parts spread over B), then new B against old
    /// A only, since new-with-new was covered by the first pass. A candidate
    /// pair is proposed at most once per pass. Acceptance takes one uniform
    /// draw unless the probability is 0 or saturates at 1.
    pub(crate) fn run_connect(&mut self, pop: PopId) {
        let (a_pop, b_pop, amin, amax, bmin, bmax) = {
            let Some(behavior) = self.pops[pop.index()].behavior.as_ref() else {
                debug_assert!(false, "connect on population {pop} with no behavior");
                return;
            };
            (
                behavior.get_target(0),
                behavior.get_target(1),
                behavior.get_min(0),
                behavior.get_max(0),
                behavior.get_min(1),
                behavior.get_max(1),
            )
        };
        // Nothing to connect without both endpoints; a unary connection
        // population is legal but never matched here.
        if !a_pop.is_valid() || !b_pop.is_valid() {
            return;
        }
        // Only proceed if some part is new on either side. Pairs among old
        // parts were already tested by an earlier pass.
        if self.pop_slot(a_pop).old == self.pop_slot(a_pop).first
            && self.pop_slot(b_pop).old == self.pop_slot(b_pop).first
        {
            return;
        }

        let Some(mut behavior) = self.pop_slot_mut(pop).behavior.take() else {
            return;
        };
        let mut c = behavior.create();

        // New A against all of B.
        if self.pop_slot(b_pop).first.is_valid() {
            let mut b_last = self.pop_slot(b_pop).first;
            let mut a = self.pop_slot(a_pop).first;
            while a != self.pop_slot(a_pop).old {
                c.set_part(0, a);
                let mut a_count = if amax > 0 || amin > 0 {
                    c.get_count(0, self)
                } else {
                    0
                };
                if amax > 0 && a_count >= amax {
                    // Already full; skip this A.
                    a = self.slot(a).after;
                    continue;
                }

                let mut b_next = self.prev_live(b_pop, b_last);
                let mut b = b_last;
                'scan: loop {
                    b = self.next_live(b_pop, b);
                    'candidate: {
                        c.set_part(1, b);
                        if bmax > 0 && c.get_count(1, self) >= bmax {
                            break 'candidate; // no room in this B
                        }
                        let p = c.get_p(self);
                        // No draw when p is exactly 0 or saturates at 1.
                        if p <= 0.0 || (p < 1.0 && p < self.sampler.uniform()) {
                            break 'candidate;
                        }
                        let accepted = std::mem::replace(&mut c, behavior.create());
                        let id = self.materialize_connection(pop, accepted, a);
                        behavior.add(id);
                        c.set_part(0, a);
                        b_next = b;
                        if amax > 0 {
                            a_count += 1;
                            if a_count >= amax {
                                break 'scan; // this A is full
                            }
                        }
                    }
                    if b == b_last {
                        break;
                    }
                }
                b_last = b_next;

                a = self.slot(a).after;
            }
        }

        // New B against old A; new-with-new is already covered above.
        if self.pop_slot(a_pop).old.is_valid() {
            let mut a_last = self.pop_slot(a_pop).old;
            let mut b = self.pop_slot(b_pop).first;
            while b != self.pop_slot(b_pop).old {
                c.set_part(1, b);
                let mut b_count = if bmax > 0 || bmin > 0 {
                    c.get_count(1, self)
                } else {
                    0
                };
                if bmax > 0 && b_count >= bmax {
                    b = self.slot(b).after;
                    continue;
                }

                let mut a_next = if a_last == self.pop_slot(a_pop).old {
                    self.pop_slot(a_pop).last
                } else {
                    self.slot(a_last).before
                };
                let mut a = a_last;
                'scan: loop {
                    // Advance within the old region, wrapping from the tail
                    // back to the old boundary.
                    let next = self.slot(a).after;
                    a = if next.is_valid() {
                        next
                    } else {
                        self.pop_slot(a_pop).old
                    };
                    'candidate: {
                        c.set_part(0, a);
                        if amax > 0 && c.get_count(0, self) >= amax {
                            break 'candidate;
                        }
                        let p = c.get_p(self);
                        if p <= 0.0 || (p < 1.0 && p < self.sampler.uniform()) {
                            break 'candidate;
                        }
                        let accepted = std::mem::replace(&mut c, behavior.create());
                        let id = self.materialize_connection(pop, accepted, b);
                        behavior.add(id);
                        c.set_part(1, b);
                        a_next = a;
                        if bmax > 0 {
                            b_count += 1;
                            if b_count >= bmax {
                                break 'scan;
                            }
                        }
                    }
                    if a == a_last {
                        break;
                    }
                }
                a_last = a_next;

                b = self.slot(b).after;
            }
        }

        self.pop_slot_mut(pop).behavior = Some(behavior);
        // The final scratch candidate drops here, never materialized.
    }
}
