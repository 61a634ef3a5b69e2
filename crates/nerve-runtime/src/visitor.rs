//! Iteration over the part set an event targets
//!
//! Step events walk an intrusive singly-linked queue with a cursor that
//! lives in the step slot. The cursor names the part BEFORE the one being
//! visited (`INVALID` = the queue sentinel), and after a hook runs it only
//! advances if the cursor's `next` still names the visited part. That one
//! rule lets a hook dequeue the visited part (or its neighbors) without
//! corrupting the walk. Spike events visit either a single part or the
//! event's compacted target list.

use crate::{
    ids::{PartId, StepId},
    part::{Context, Part},
    simulator::Simulator,
};

impl Simulator {
    /// Part after `cursor` in a step queue (`INVALID` cursor = head)
    fn queue_next(&self, step: StepId, cursor: PartId) -> PartId {
        if cursor.is_valid() {
            self.slot(cursor).next
        } else {
            self.step_slot(step).head
        }
    }

    /// Run `f` on one part, moving its behavior out of the slot for the
    /// duration so the hook can reach the simulator freely.
    pub(crate) fn visit_one(
        &mut self,
        id: PartId,
        f: &mut dyn FnMut(&mut dyn Part, &mut Context),
    ) {
        let Some(mut part) = self.slot_mut(id).part.take() else {
            debug_assert!(false, "re-entrant visit of part {id}");
            return;
        };
        {
            let mut ctx = Context::new(self, id);
            f(part.as_mut(), &mut ctx);
        }
        self.slot_mut(id).part = Some(part);
    }

    /// Walk a step event's queue, tolerating mid-walk dequeues
    pub(crate) fn visit_step(
        &mut self,
        step: StepId,
        f: &mut dyn FnMut(&mut dyn Part, &mut Context),
    ) {
        self.step_slot_mut(step).cursor = PartId::INVALID;
        loop {
            let cursor = self.step_slot(step).cursor;
            let part = self.queue_next(step, cursor);
            if !part.is_valid() {
                break;
            }
            self.visit_one(part, f);
            // Re-read: the hook may have nudged the cursor by dequeuing.
            let cursor = self.step_slot(step).cursor;
            if self.queue_next(step, cursor) == part {
                self.step_slot_mut(step).cursor = part;
            }
        }
    }

    /// Walk the part set of the event currently being run
    pub(crate) fn visit_current(&mut self, f: &mut dyn FnMut(&mut dyn Part, &mut Context)) {
        let step = self.current.step;
        if step.is_valid() {
            self.visit_step(step, f);
        } else if !self.current_targets.is_empty() {
            let targets = std::mem::take(&mut self.current_targets);
            for &id in &targets {
                self.visit_one(id, f);
            }
            self.current_targets = targets;
        } else if self.current.target.is_valid() {
            self.visit_one(self.current.target, f);
        }
    }

    /// Finalize walk for a step event: parts whose `finalize` returns false
    /// are unlinked from the queue and leave the simulation.
    pub(crate) fn finalize_step_pass(&mut self, step: StepId) {
        self.step_slot_mut(step).cursor = PartId::INVALID;
        loop {
            let cursor = self.step_slot(step).cursor;
            let part = self.queue_next(step, cursor);
            if !part.is_valid() {
                break;
            }

            let keep = self.visit_finalize(part);
            if !keep {
                // The hook may have dequeued the part itself; only unlink
                // while it is still on this queue.
                if self.slot(part).step == step {
                    debug_assert_eq!(self.slot(part).previous, cursor);
                    let next = self.slot(part).next;
                    let back = self.slot(part).previous;
                    if next.is_valid() {
                        self.slot_mut(next).previous = back;
                    }
                    if back.is_valid() {
                        self.slot_mut(back).next = next;
                    } else {
                        self.step_slot_mut(step).head = next;
                    }
                    let slot = self.slot_mut(part);
                    slot.next = PartId::INVALID;
                    slot.previous = PartId::INVALID;
                    slot.step = StepId::INVALID;
                }
                self.leave_part(part);
            }

            let cursor = self.step_slot(step).cursor;
            if self.queue_next(step, cursor) == part {
                self.step_slot_mut(step).cursor = part;
            }
        }
    }

    fn visit_finalize(&mut self, id: PartId) -> bool {
        let Some(mut part) = self.slot_mut(id).part.take() else {
            debug_assert!(false, "re-entrant visit of part {id}");
            return true;
        };
        let keep = {
            let mut ctx = Context::new(self, id);
            part.finalize(&mut ctx)
        };
        self.slot_mut(id).part = Some(part);
        keep
    }

    /// Head-insert a part into a step event's queue
    pub(crate) fn enqueue_on_step(&mut self, step: StepId, id: PartId) {
        let head = self.step_slot(step).head;
        {
            let slot = self.slot_mut(id);
            slot.step = step;
            slot.previous = PartId::INVALID;
            slot.next = head;
        }
        if head.is_valid() {
            self.slot_mut(head).previous = id;
        }
        self.step_slot_mut(step).head = id;
    }

    /// Unlink a part from its step event's queue, nudging the walk cursor
    /// when that queue is the one currently being visited.
    pub(crate) fn dequeue_part(&mut self, id: PartId) {
        let step = self.slot(id).step;
        if !step.is_valid() {
            return;
        }
        if self.current.step == step && self.step_slot(step).cursor == id {
            let next = self.slot(id).next;
            self.step_slot_mut(step).cursor = next;
        }
        let next = self.slot(id).next;
        let back = self.slot(id).previous;
        if next.is_valid() {
            self.slot_mut(next).previous = back;
        }
        if back.is_valid() {
            self.slot_mut(back).next = next;
        } else {
            self.step_slot_mut(step).head = next;
        }
        let slot = self.slot_mut(id);
        slot.next = PartId::INVALID;
        slot.previous = PartId::INVALID;
        slot.step = StepId::INVALID;
    }
}
