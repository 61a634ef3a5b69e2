//! The event loop: priority queue, period registry, and deferred work
//!
//! The simulator pops the earliest event, records it as current, and
//! dispatches on its flavor. Step events integrate, update, and finalize
//! their part queue, drain deferred population work, and re-enter the heap;
//! spike events stamp latches and deliver to their targets, then simply
//! drop. Equal-time events fire in the order they were pushed.

use std::collections::{BTreeSet, BinaryHeap, VecDeque};

use nerve_math::{sampler::DEFAULT_SEED, Sampler};

use crate::{
    config::SimulatorConfig,
    error::{Result, RuntimeError},
    event::{CurrentEvent, EventKind, QueueEntry, StepSlot},
    ids::{PartId, PopId, StepId},
    integrator::Integrator,
    part::{Part, PartSlot},
    population::PopSlot,
    DEFAULT_TIMESTEP,
};

/// The simulation engine.
///
/// Owns the part arena, the registered populations, all live step events,
/// and the event queue. Constructed once per simulation and threaded through
/// part hooks as [`Context`](crate::Context).
pub struct Simulator {
    pub(crate) slots: Vec<PartSlot>,
    pub(crate) pops: Vec<PopSlot>,
    pub(crate) steps: Vec<StepSlot>,
    free_steps: Vec<StepId>,
    /// Live step events sorted ascending by period
    periods: Vec<StepId>,
    queue: BinaryHeap<QueueEntry>,
    seq: u64,
    pub(crate) current: CurrentEvent,
    pub(crate) current_targets: Vec<PartId>,
    pub(crate) integrator: Integrator,
    pub(crate) sampler: Sampler,
    queue_resize: Vec<(PopId, usize)>,
    queue_connect: VecDeque<PopId>,
    queue_clear_new: BTreeSet<PopId>,
    stop: bool,
}

impl Simulator {
    /// Create a new simulator from a configuration
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            slots: Vec::new(),
            pops: Vec::new(),
            steps: Vec::new(),
            free_steps: Vec::new(),
            periods: Vec::new(),
            queue: BinaryHeap::new(),
            seq: 0,
            current: CurrentEvent {
                t: 0.0,
                dt: DEFAULT_TIMESTEP,
                step: StepId::INVALID,
                target: PartId::INVALID,
            },
            current_targets: Vec::new(),
            integrator: config.integrator,
            sampler: Sampler::new(config.random_seed.unwrap_or(DEFAULT_SEED)),
            queue_resize: Vec::new(),
            queue_connect: VecDeque::new(),
            queue_clear_new: BTreeSet::new(),
            stop: false,
        }
    }

    // -- slot access ---------------------------------------------------

    pub(crate) fn slot(&self, id: PartId) -> &PartSlot {
        &self.slots[id.index()]
    }

    pub(crate) fn slot_mut(&mut self, id: PartId) -> &mut PartSlot {
        &mut self.slots[id.index()]
    }

    pub(crate) fn step_slot(&self, id: StepId) -> &StepSlot {
        &self.steps[id.index()]
    }

    pub(crate) fn step_slot_mut(&mut self, id: StepId) -> &mut StepSlot {
        &mut self.steps[id.index()]
    }

    // -- event loop ----------------------------------------------------

    /// Run until the event queue is empty or [`Simulator::stop`] is called
    pub fn run(&mut self) {
        log::info!(
            "event loop starting: {} pending events, {} periods",
            self.queue.len(),
            self.periods.len()
        );

        while !self.stop {
            let Some(entry) = self.queue.pop() else { break };
            match entry.kind {
                EventKind::Step(step) => {
                    let (t, dt) = {
                        let slot = self.step_slot(step);
                        (slot.t, slot.dt)
                    };
                    self.current = CurrentEvent {
                        t,
                        dt,
                        step,
                        target: PartId::INVALID,
                    };
                    self.run_step(step);
                }
                EventKind::SpikeSingle { target, latch } => {
                    self.current = CurrentEvent {
                        t: entry.t,
                        dt: 0.0,
                        step: StepId::INVALID,
                        target,
                    };
                    self.run_spike_single(target, latch);
                }
                EventKind::SpikeSingleLatch { target, latch } => {
                    self.current = CurrentEvent {
                        t: entry.t,
                        dt: 0.0,
                        step: StepId::INVALID,
                        target,
                    };
                    if let Some(part) = self.slot_mut(target).part.as_mut() {
                        part.set_latch(latch);
                    }
                }
                EventKind::SpikeMulti { targets, latch } => {
                    self.current = CurrentEvent {
                        t: entry.t,
                        dt: 0.0,
                        step: StepId::INVALID,
                        target: PartId::INVALID,
                    };
                    self.run_spike_multi(targets, latch, false);
                }
                EventKind::SpikeMultiLatch { targets, latch } => {
                    self.current = CurrentEvent {
                        t: entry.t,
                        dt: 0.0,
                        step: StepId::INVALID,
                        target: PartId::INVALID,
                    };
                    self.run_spike_multi(targets, latch, true);
                }
            }
        }

        log::info!("event loop finished at t={}", self.time());
    }

    fn run_step(&mut self, step: StepId) {
        self.integrate_current();
        self.visit_current(&mut |part, ctx| part.update(ctx));
        self.finalize_step_pass(step);
        self.update_populations();
        self.requeue(step);
    }

    fn run_spike_single(&mut self, target: PartId, latch: usize) {
        if let Some(part) = self.slot_mut(target).part.as_mut() {
            part.set_latch(latch);
        }
        self.integrate_current();
        self.visit_one(target, &mut |part, ctx| {
            part.update(ctx);
            // A part may elect to die here, but it waits for its next step
            // event to leave the queue.
            let _ = part.finalize(ctx);
            part.finalize_event();
        });
    }

    fn run_spike_multi(&mut self, mut targets: Vec<PartId>, latch: usize, latch_only: bool) {
        // Compact in place: drop targets that have left the simulation and
        // stamp the latch on every survivor.
        let mut i = 0;
        let mut len = targets.len();
        while i < len {
            let id = targets[i];
            if id.is_valid() && self.slot(id).in_sim {
                if let Some(part) = self.slot_mut(id).part.as_mut() {
                    part.set_latch(latch);
                }
                i += 1;
            } else {
                len -= 1;
                targets.swap(i, len);
            }
        }
        targets.truncate(len);

        if latch_only {
            return;
        }

        self.current_targets = targets;
        self.integrate_current();
        self.visit_current(&mut |part, ctx| part.update(ctx));
        self.visit_current(&mut |part, ctx| {
            let _ = part.finalize(ctx);
            part.finalize_event();
        });
        self.current_targets.clear();
    }

    /// Re-arm a step event after it fires, or retire it when drained
    fn requeue(&mut self, step: StepId) {
        if self.step_slot(step).head.is_valid() {
            let t = {
                let slot = self.step_slot_mut(step);
                slot.t += slot.dt;
                slot.t
            };
            self.push_event(t, EventKind::Step(step));
        } else {
            self.remove_period(step);
        }
    }

    /// Drop an empty step event from the period registry
    fn remove_period(&mut self, step: StepId) {
        log::debug!("retiring period dt={}", self.step_slot(step).dt);
        self.periods.retain(|&s| s != step);
        self.free_steps.push(step);
    }

    pub(crate) fn push_event(&mut self, t: f64, kind: EventKind) {
        self.seq += 1;
        self.queue.push(QueueEntry {
            t,
            seq: self.seq,
            kind,
        });
    }

    // -- scheduling ----------------------------------------------------

    /// Enqueue a part under the step event with period `dt`, creating that
    /// event (first firing at `current time + dt`) if it does not exist.
    pub fn enqueue(&mut self, part: PartId, dt: f64) -> Result<()> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(RuntimeError::invalid_parameter(
                "dt",
                dt.to_string(),
                "> 0",
            ));
        }
        debug_assert!(
            !self.slot(part).step.is_valid(),
            "part {part} is already enqueued"
        );

        let mut index = 0;
        while index < self.periods.len() && self.step_slot(self.periods[index]).dt < dt {
            index += 1;
        }

        let step = if index < self.periods.len() && self.step_slot(self.periods[index]).dt == dt {
            self.periods[index]
        } else {
            let t = self.time() + dt;
            let step = self.create_step(t, dt);
            self.periods.insert(index, step);
            self.push_event(t, EventKind::Step(step));
            log::debug!("new period dt={} first firing at t={}", dt, t);
            step
        };
        self.enqueue_on_step(step, part);
        Ok(())
    }

    /// Move a part to the step event with period `dt`
    pub fn set_period(&mut self, part: PartId, dt: f64) -> Result<()> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(RuntimeError::invalid_parameter(
                "dt",
                dt.to_string(),
                "> 0",
            ));
        }
        self.dequeue_part(part);
        self.enqueue(part, dt)
    }

    fn create_step(&mut self, t: f64, dt: f64) -> StepId {
        if let Some(step) = self.free_steps.pop() {
            *self.step_slot_mut(step) = StepSlot::new(t, dt);
            step
        } else {
            let step = StepId::new(self.steps.len() as u32);
            self.steps.push(StepSlot::new(t, dt));
            step
        }
    }

    fn check_spike_time(&self, t: f64) -> Result<()> {
        if t.is_finite() {
            Ok(())
        } else {
            Err(RuntimeError::invalid_parameter(
                "t",
                t.to_string(),
                "finite",
            ))
        }
    }

    /// Schedule a one-shot spike delivered to a single part at time `t`
    pub fn schedule_spike_single(&mut self, t: f64, target: PartId, latch: usize) -> Result<()> {
        self.check_spike_time(t)?;
        self.push_event(t, EventKind::SpikeSingle { target, latch });
        Ok(())
    }

    /// Schedule a latch-only spike for a single part at time `t`
    pub fn schedule_spike_single_latch(
        &mut self,
        t: f64,
        target: PartId,
        latch: usize,
    ) -> Result<()> {
        self.check_spike_time(t)?;
        self.push_event(t, EventKind::SpikeSingleLatch { target, latch });
        Ok(())
    }

    /// Schedule a one-shot spike delivered to a list of parts at time `t`
    pub fn schedule_spike_multi(
        &mut self,
        t: f64,
        targets: Vec<PartId>,
        latch: usize,
    ) -> Result<()> {
        self.check_spike_time(t)?;
        self.push_event(t, EventKind::SpikeMulti { targets, latch });
        Ok(())
    }

    /// Schedule a latch-only spike for a list of parts at time `t`
    pub fn schedule_spike_multi_latch(
        &mut self,
        t: f64,
        targets: Vec<PartId>,
        latch: usize,
    ) -> Result<()> {
        self.check_spike_time(t)?;
        self.push_event(t, EventKind::SpikeMultiLatch { targets, latch });
        Ok(())
    }

    // -- deferred population work ---------------------------------------

    /// Request that a population grow or shrink to `n` live parts at the end
    /// of the current step event
    pub fn resize(&mut self, pop: PopId, n: usize) {
        self.queue_resize.push((pop, n));
    }

    /// Request a connection-matching pass over a connection population at
    /// the end of the current step event
    pub fn connect(&mut self, pop: PopId) {
        self.queue_connect.push_back(pop);
    }

    /// Request that a population's "new parts" window be closed at the end
    /// of the current step event
    pub fn clear_new(&mut self, pop: PopId) {
        self.queue_clear_new.insert(pop);
    }

    /// Drain deferred population work: resizes, then connects in request
    /// order, then new-window closures.
    pub fn update_populations(&mut self) {
        let resizes: Vec<(PopId, usize)> = self.queue_resize.drain(..).collect();
        for (pop, n) in resizes {
            self.apply_resize(pop, n);
        }

        while let Some(pop) = self.queue_connect.pop_front() {
            self.run_connect(pop);
        }

        let clears: Vec<PopId> = std::mem::take(&mut self.queue_clear_new)
            .into_iter()
            .collect();
        for pop in clears {
            self.apply_clear_new(pop);
        }
    }

    // -- observation ---------------------------------------------------

    /// Current simulated time
    pub fn time(&self) -> f64 {
        if self.current.step.is_valid() {
            self.step_slot(self.current.step).t
        } else {
            self.current.t
        }
    }

    /// Time step of the current event (0 while a spike event runs)
    pub fn dt(&self) -> f64 {
        if self.current.step.is_valid() {
            self.step_slot(self.current.step).dt
        } else {
            self.current.dt
        }
    }

    /// Ask the event loop to exit after the current event completes
    pub fn stop(&mut self) {
        self.stop = true;
    }

    /// Whether a stop has been requested
    pub fn stopped(&self) -> bool {
        self.stop
    }

    /// The sampling service
    pub fn sampler_mut(&mut self) -> &mut Sampler {
        &mut self.sampler
    }

    /// Borrow a part's behavior. Returns None while a hook is running on
    /// that same part.
    pub fn part(&self, id: PartId) -> Option<&dyn Part> {
        self.slots.get(id.index())?.part.as_deref()
    }

    /// Mutably borrow a part's behavior. Returns None while a hook is
    /// running on that same part.
    pub fn part_mut(&mut self, id: PartId) -> Option<&mut dyn Part> {
        match self.slots.get_mut(id.index()) {
            Some(slot) => slot.part.as_deref_mut(),
            None => None,
        }
    }

    /// Run a part's `init` hook
    pub fn init_part(&mut self, id: PartId) {
        self.visit_one(id, &mut |part, ctx| part.init(ctx));
    }

    /// Whether a part is currently inside the simulation
    pub fn in_simulation(&self, id: PartId) -> bool {
        self.slots
            .get(id.index())
            .map(|slot| slot.in_sim)
            .unwrap_or(false)
    }

    /// Number of events waiting in the queue
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Number of live periodic step events
    pub fn period_count(&self) -> usize {
        self.periods.len()
    }

    /// Parts enqueued under the step event with period `dt`, in queue order
    pub fn period_parts(&self, dt: f64) -> Vec<PartId> {
        let mut result = Vec::new();
        for &step in &self.periods {
            if self.step_slot(step).dt == dt {
                let mut id = self.step_slot(step).head;
                while id.is_valid() {
                    result.push(id);
                    id = self.slot(id).next;
                }
                break;
            }
        }
        result
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::population::Population;
    use std::any::Any;

    #[derive(Default)]
    struct Probe {
        latches: Vec<usize>,
    }

    impl Part for Probe {
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
        fn set_latch(&mut self, i: usize) {
            self.latches.push(i);
        }
    }

    struct Probes;

    impl Population for Probes {
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
        fn create(&mut self) -> Box<dyn Part> {
            Box::new(Probe::default())
        }
    }

    fn probe_latches(sim: &Simulator, id: PartId) -> Vec<usize> {
        sim.part(id)
            .unwrap()
            .as_any()
            .downcast_ref::<Probe>()
            .unwrap()
            .latches
            .clone()
    }

    #[test]
    fn test_spike_ties_fire_in_push_order() {
        let mut sim = Simulator::default();
        let pop = sim.register_population(Box::new(Probes));
        let p = sim.allocate(pop);
        sim.enter_simulation(p);

        sim.schedule_spike_single_latch(5.0, p, 1).unwrap();
        sim.schedule_spike_single_latch(5.0, p, 2).unwrap();
        sim.schedule_spike_single_latch(5.0, p, 3).unwrap();
        sim.run();

        assert_eq!(probe_latches(&sim, p), vec![1, 2, 3]);
    }

    #[test]
    fn test_spikes_fire_in_time_order() {
        let mut sim = Simulator::default();
        let pop = sim.register_population(Box::new(Probes));
        let p = sim.allocate(pop);
        sim.enter_simulation(p);

        sim.schedule_spike_single_latch(3.0, p, 3).unwrap();
        sim.schedule_spike_single_latch(1.0, p, 1).unwrap();
        sim.schedule_spike_single_latch(2.0, p, 2).unwrap();
        sim.run();

        assert_eq!(probe_latches(&sim, p), vec![1, 2, 3]);
    }

    #[test]
    fn test_multi_latch_drops_dead_targets() {
        let mut sim = Simulator::default();
        let pop = sim.register_population(Box::new(Probes));
        let alive = sim.allocate(pop);
        sim.enter_simulation(alive);
        let dead = sim.allocate(pop);
        // `dead` never enters the simulation, so delivery skips it.

        sim.schedule_spike_multi_latch(1.0, vec![alive, dead, PartId::INVALID], 7)
            .unwrap();
        sim.run();

        assert_eq!(probe_latches(&sim, alive), vec![7]);
        assert_eq!(probe_latches(&sim, dead), Vec::<usize>::new());
    }

    #[test]
    fn test_enqueue_rejects_bad_dt() {
        let mut sim = Simulator::default();
        let pop = sim.register_population(Box::new(Probes));
        let p = sim.allocate(pop);

        assert!(sim.enqueue(p, 0.0).is_err());
        assert!(sim.enqueue(p, -1.0).is_err());
        assert!(sim.enqueue(p, f64::NAN).is_err());
        assert!(sim.enqueue(p, 1e-3).is_ok());
    }

    #[test]
    fn test_periods_sorted_and_deduped() {
        let mut sim = Simulator::default();
        let pop = sim.register_population(Box::new(Probes));
        let a = sim.allocate(pop);
        let b = sim.allocate(pop);
        let c = sim.allocate(pop);

        sim.enqueue(a, 1e-2).unwrap();
        sim.enqueue(b, 1e-3).unwrap();
        sim.enqueue(c, 1e-2).unwrap();

        // Two distinct periods; parts a and c share one step event.
        assert_eq!(sim.period_count(), 2);
        assert_eq!(sim.period_parts(1e-2), vec![c, a]);
        assert_eq!(sim.period_parts(1e-3), vec![b]);
    }

    #[test]
    fn test_stop_flag() {
        let mut sim = Simulator::default();
        let pop = sim.register_population(Box::new(Probes));
        let p = sim.allocate(pop);
        sim.enter_simulation(p);
        sim.schedule_spike_single_latch(1.0, p, 0).unwrap();
        sim.schedule_spike_single_latch(2.0, p, 1).unwrap();

        sim.stop();
        sim.run();

        // Loop exits before popping anything.
        assert_eq!(sim.pending_events(), 2);
        assert!(sim.stopped());
    }
}
