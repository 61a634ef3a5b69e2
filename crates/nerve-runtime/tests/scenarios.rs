//! End-to-end scenarios for the event loop, populations, and matching

use std::any::Any;

use nerve_runtime::{
    Context, Integrator, Part, PartId, PopId, Population, Simulator, SimulatorConfig,
};

// -- fixtures ------------------------------------------------------------

/// Part that logs every lifecycle call with the time it happened at, and
/// leaves the simulation after a fixed number of step finalizes.
struct Recorder {
    log: Vec<(&'static str, f64)>,
    steps_allowed: u32,
    steps_done: u32,
    period_change: Option<f64>,
    stop_when_done: bool,
}

impl Recorder {
    fn new(steps_allowed: u32) -> Self {
        Self {
            log: Vec::new(),
            steps_allowed,
            steps_done: 0,
            period_change: None,
            stop_when_done: false,
        }
    }
}

impl Part for Recorder {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn integrate(&mut self, ctx: &mut Context) {
        self.log.push(("integrate", ctx.time()));
    }
    fn update(&mut self, ctx: &mut Context) {
        let phase = if ctx.dt() > 0.0 { "update" } else { "spike" };
        self.log.push((phase, ctx.time()));
        if let Some(dt) = self.period_change.take() {
            ctx.set_period(dt).unwrap();
        }
    }
    fn finalize(&mut self, ctx: &mut Context) -> bool {
        if ctx.dt() == 0.0 {
            return true; // spike delivery; dying waits for a step event
        }
        self.log.push(("finalize", ctx.time()));
        self.steps_done += 1;
        if self.stop_when_done {
            ctx.sim().stop();
        }
        self.steps_done < self.steps_allowed
    }
}

struct Recorders {
    steps_allowed: u32,
}

impl Population for Recorders {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn create(&mut self) -> Box<dyn Part> {
        Box::new(Recorder::new(self.steps_allowed))
    }
}

fn recorder_log(sim: &Simulator, id: PartId) -> Vec<(&'static str, f64)> {
    sim.part(id)
        .unwrap()
        .as_any()
        .downcast_ref::<Recorder>()
        .unwrap()
        .log
        .clone()
}

fn spawn(sim: &mut Simulator, pop: PopId, dt: f64) -> PartId {
    let id = sim.allocate(pop);
    sim.enter_simulation(id);
    sim.enqueue(id, dt).unwrap();
    id
}

// -- S1: single periodic part --------------------------------------------

#[test]
fn single_periodic_part_runs_ten_steps() {
    let mut sim = Simulator::default();
    let pop = sim.register_population(Box::new(Recorders { steps_allowed: 10 }));
    let id = spawn(&mut sim, pop, 1e-3);

    sim.run();

    let log = recorder_log(&sim, id);
    assert_eq!(log.len(), 30);
    for (step, chunk) in log.chunks(3).enumerate() {
        let expected_t = 1e-3 * (step + 1) as f64;
        assert_eq!(chunk[0].0, "integrate");
        assert_eq!(chunk[1].0, "update");
        assert_eq!(chunk[2].0, "finalize");
        for &(_, t) in chunk {
            assert!((t - expected_t).abs() < 1e-12, "step {} at t={}", step, t);
        }
    }

    // The step event died with its last part.
    assert_eq!(sim.period_count(), 0);
    assert_eq!(sim.pending_events(), 0);
    assert!(!sim.in_simulation(id));
}

// -- S2: spike reordering ------------------------------------------------

#[test]
fn spike_fires_between_step_events() {
    let mut sim = Simulator::default();
    let pop = sim.register_population(Box::new(Recorders { steps_allowed: 2 }));
    let id = spawn(&mut sim, pop, 1.0);

    // Step firings land at t=1 and t=2; the spike goes in between.
    sim.schedule_spike_single(1.5, id, 0).unwrap();
    sim.run();

    let phases: Vec<(&str, f64)> = recorder_log(&sim, id)
        .into_iter()
        .filter(|(phase, _)| *phase == "update" || *phase == "spike")
        .collect();
    assert_eq!(phases, vec![("update", 1.0), ("spike", 1.5), ("update", 2.0)]);
}

// -- S3: mid-walk death --------------------------------------------------

#[test]
fn middle_part_dies_without_corrupting_walk() {
    let mut sim = Simulator::default();
    let pop = sim.register_population(Box::new(Recorders { steps_allowed: 2 }));
    let p1 = spawn(&mut sim, pop, 1.0);
    let p2 = spawn(&mut sim, pop, 1.0);
    let p3 = spawn(&mut sim, pop, 1.0);

    // Visit order is newest first: p3, p2, p1. Kill the middle one on the
    // first step.
    sim.part_mut(p2)
        .unwrap()
        .as_any_mut()
        .downcast_mut::<Recorder>()
        .unwrap()
        .steps_allowed = 1;

    sim.run();

    // All three were updated on the first step.
    for id in [p1, p2, p3] {
        let updates: Vec<f64> = recorder_log(&sim, id)
            .into_iter()
            .filter(|(phase, _)| *phase == "update")
            .map(|(_, t)| t)
            .collect();
        assert!((updates[0] - 1.0).abs() < 1e-12);
        if id == p2 {
            assert_eq!(updates.len(), 1);
        } else {
            assert_eq!(updates.len(), 2);
        }
    }
    assert!(!sim.in_simulation(p2));
    assert!(!sim.in_simulation(p1) && !sim.in_simulation(p3));
}

#[test]
fn survivors_stay_linked_after_middle_death() {
    let mut sim = Simulator::default();
    let pop = sim.register_population(Box::new(Recorders { steps_allowed: 9 }));
    let p1 = spawn(&mut sim, pop, 1.0);
    let p2 = spawn(&mut sim, pop, 1.0);
    let p3 = spawn(&mut sim, pop, 1.0);

    sim.part_mut(p2)
        .unwrap()
        .as_any_mut()
        .downcast_mut::<Recorder>()
        .unwrap()
        .steps_allowed = 1;
    // p1 is visited last; have it halt the loop after the first firing.
    sim.part_mut(p1)
        .unwrap()
        .as_any_mut()
        .downcast_mut::<Recorder>()
        .unwrap()
        .stop_when_done = true;

    assert_eq!(sim.period_parts(1.0), vec![p3, p2, p1]);
    sim.run();

    // After one firing the dead middle part is unlinked; the survivors
    // remain in walk order.
    assert_eq!(sim.period_parts(1.0), vec![p3, p1]);
}

// -- S5: tie-breaking ----------------------------------------------------

#[derive(Default)]
struct LatchOrder {
    latches: Vec<usize>,
}

impl Part for LatchOrder {
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

struct LatchOrders;

impl Population for LatchOrders {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn create(&mut self) -> Box<dyn Part> {
        Box::new(LatchOrder::default())
    }
}

#[test]
fn equal_time_latches_observed_in_push_order() {
    let mut sim = Simulator::default();
    let pop = sim.register_population(Box::new(LatchOrders));
    let id = sim.allocate(pop);
    sim.enter_simulation(id);

    sim.schedule_spike_single_latch(5.0, id, 1).unwrap();
    sim.schedule_spike_single_latch(5.0, id, 2).unwrap();
    sim.schedule_spike_single_latch(5.0, id, 3).unwrap();
    sim.run();

    let latches = sim
        .part(id)
        .unwrap()
        .as_any()
        .downcast_ref::<LatchOrder>()
        .unwrap()
        .latches
        .clone();
    assert_eq!(latches, vec![1, 2, 3]);
}

// -- period changes mid-walk ---------------------------------------------

#[test]
fn set_period_during_own_visit_keeps_walk_intact() {
    let mut sim = Simulator::default();
    let pop = sim.register_population(Box::new(Recorders { steps_allowed: 3 }));
    let p1 = spawn(&mut sim, pop, 1.0);
    let p2 = spawn(&mut sim, pop, 1.0);
    let p3 = spawn(&mut sim, pop, 1.0);

    // p2 re-periods itself during the first step's update pass.
    sim.part_mut(p2)
        .unwrap()
        .as_any_mut()
        .downcast_mut::<Recorder>()
        .unwrap()
        .period_change = Some(3.0);

    sim.run();

    // Every part got its first update at t=1 (the walk survived the
    // mid-visit dequeue), and p2's later updates came at its new period.
    for id in [p1, p3] {
        let updates: Vec<f64> = recorder_log(&sim, id)
            .into_iter()
            .filter(|(phase, _)| *phase == "update")
            .map(|(_, t)| t)
            .collect();
        assert_eq!(updates, vec![1.0, 2.0, 3.0]);
    }
    let p2_updates: Vec<f64> = recorder_log(&sim, p2)
        .into_iter()
        .filter(|(phase, _)| *phase == "update")
        .map(|(_, t)| t)
        .collect();
    // Dequeued mid-walk, so the dt=1 finalize never saw it; re-enqueued at
    // t=1 under dt=3 it finalizes at 4, 7, and 10.
    assert_eq!(p2_updates, vec![1.0, 4.0, 7.0, 10.0]);
}

// -- S6: RK4 free fall ---------------------------------------------------

struct FreeFall {
    v: f64,
    dv: f64,
    base: Option<f64>,
    stack: f64,
    steps_left: u32,
}

impl FreeFall {
    const G: f64 = -9.8;
}

impl Part for FreeFall {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn integrate(&mut self, ctx: &mut Context) {
        match self.base {
            Some(base) => self.v = base + self.dv * ctx.dt(),
            None => self.v += self.dv * ctx.dt(),
        }
    }
    fn update(&mut self, _ctx: &mut Context) {}
    fn finalize(&mut self, _ctx: &mut Context) -> bool {
        self.steps_left -= 1;
        self.steps_left > 0
    }
    fn update_derivative(&mut self, _ctx: &mut Context) {}
    fn finalize_derivative(&mut self) {
        self.dv = Self::G;
    }
    fn snapshot(&mut self) {
        self.base = Some(self.v);
    }
    fn restore(&mut self) {
        self.base = None;
    }
    fn push_derivative(&mut self) {
        self.stack = self.dv;
    }
    fn multiply_add_to_stack(&mut self, scalar: f64) {
        self.stack += self.dv * scalar;
    }
    fn multiply(&mut self, scalar: f64) {
        self.dv *= scalar;
    }
    fn add_to_members(&mut self) {
        self.dv += self.stack;
        self.stack = 0.0;
    }
}

struct FreeFalls;

impl Population for FreeFalls {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn create(&mut self) -> Box<dyn Part> {
        Box::new(FreeFall {
            v: 0.0,
            dv: FreeFall::G,
            base: None,
            stack: 0.0,
            steps_left: 10,
        })
    }
}

#[test]
fn rk4_free_fall_ten_steps() {
    let config = SimulatorConfig::default().with_integrator(Integrator::RungeKutta);
    let mut sim = Simulator::new(config);
    let pop = sim.register_population(Box::new(FreeFalls));
    let id = spawn(&mut sim, pop, 0.1);

    sim.run();

    let v = sim
        .part(id)
        .unwrap()
        .as_any()
        .downcast_ref::<FreeFall>()
        .unwrap()
        .v;
    assert!((v - (-9.8)).abs() < 1e-6, "v after 1s of free fall: {}", v);
}

// -- S4 and boundary cases: connection matching --------------------------

#[derive(Default)]
struct Node {
    degree: usize,
}

impl Part for Node {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct Nodes;

impl Population for Nodes {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn create(&mut self) -> Box<dyn Part> {
        Box::new(Node::default())
    }
}

struct Link {
    ends: [PartId; 2],
    p: f64,
}

impl Part for Link {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn init(&mut self, ctx: &mut Context) {
        for end in self.ends {
            if let Some(node) = ctx.sim().part_mut(end) {
                if let Some(node) = node.as_any_mut().downcast_mut::<Node>() {
                    node.degree += 1;
                }
            }
        }
    }
    fn set_part(&mut self, i: usize, part: PartId) {
        self.ends[i] = part;
    }
    fn get_part(&self, i: usize) -> PartId {
        self.ends[i]
    }
    fn get_count(&self, i: usize, sim: &Simulator) -> usize {
        sim.part(self.ends[i])
            .and_then(|part| part.as_any().downcast_ref::<Node>())
            .map(|node| node.degree)
            .unwrap_or(0)
    }
    fn get_p(&mut self, _sim: &mut Simulator) -> f64 {
        self.p
    }
}

struct Links {
    a: PopId,
    b: PopId,
    p: f64,
    amax: usize,
    bmax: usize,
}

impl Population for Links {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn create(&mut self) -> Box<dyn Part> {
        Box::new(Link {
            ends: [PartId::INVALID; 2],
            p: self.p,
        })
    }
    fn get_target(&self, i: usize) -> PopId {
        match i {
            0 => self.a,
            1 => self.b,
            _ => PopId::INVALID,
        }
    }
    fn get_max(&self, i: usize) -> usize {
        match i {
            0 => self.amax,
            1 => self.bmax,
            _ => 0,
        }
    }
}

fn link_pairs(sim: &Simulator, links: PopId) -> Vec<(PartId, PartId)> {
    sim.live_parts(links)
        .into_iter()
        .map(|id| {
            let link = sim
                .part(id)
                .unwrap()
                .as_any()
                .downcast_ref::<Link>()
                .unwrap();
            (link.ends[0], link.ends[1])
        })
        .collect()
}

fn connect_setup(n: usize, p: f64, amax: usize, bmax: usize) -> (Simulator, PopId, PopId, PopId) {
    let mut sim = Simulator::default();
    let a = sim.register_population(Box::new(Nodes));
    let b = sim.register_population(Box::new(Nodes));
    let links = sim.register_population(Box::new(Links {
        a,
        b,
        p,
        amax,
        bmax,
    }));
    for _ in 0..n {
        let id = sim.allocate(a);
        sim.enter_simulation(id);
        let id = sim.allocate(b);
        sim.enter_simulation(id);
    }
    (sim, a, b, links)
}

#[test]
fn full_bipartite_match_with_p_one() {
    let (mut sim, a, b, links) = connect_setup(2, 1.0, 0, 0);

    sim.connect(links);
    sim.update_populations();

    let mut pairs = link_pairs(&sim, links);
    assert_eq!(pairs.len(), 4);
    pairs.sort();
    pairs.dedup();
    assert_eq!(pairs.len(), 4, "every (a, b) pair appears exactly once");

    // Closing the new windows makes a second pass a no-op.
    sim.clear_new(a);
    sim.clear_new(b);
    sim.update_populations();
    sim.connect(links);
    sim.update_populations();
    assert_eq!(sim.live_count(links), 4);
}

#[test]
fn zero_probability_makes_no_connections() {
    let (mut sim, _a, _b, links) = connect_setup(3, 0.0, 0, 0);

    sim.connect(links);
    sim.update_populations();

    assert_eq!(sim.live_count(links), 0);
}

#[test]
fn unit_caps_give_perfect_matching() {
    let n = 5;
    let (mut sim, _a, _b, links) = connect_setup(n, 1.0, 1, 1);

    sim.connect(links);
    sim.update_populations();

    let pairs = link_pairs(&sim, links);
    assert_eq!(pairs.len(), n);
    let mut sources: Vec<PartId> = pairs.iter().map(|&(a, _)| a).collect();
    let mut dests: Vec<PartId> = pairs.iter().map(|&(_, b)| b).collect();
    sources.sort();
    sources.dedup();
    dests.sort();
    dests.dedup();
    assert_eq!(sources.len(), n, "each A connected at most once");
    assert_eq!(dests.len(), n, "each B connected to a distinct A");
}

#[test]
fn new_parts_connect_to_old_parts_after_window_close() {
    let (mut sim, a, b, links) = connect_setup(2, 1.0, 0, 0);

    sim.connect(links);
    sim.update_populations();
    assert_eq!(sim.live_count(links), 4);

    sim.clear_new(a);
    sim.clear_new(b);
    sim.update_populations();

    // One new B part: it must pair with both (now old) A parts, and only
    // with them.
    let newcomer = sim.allocate(b);
    sim.enter_simulation(newcomer);
    sim.connect(links);
    sim.update_populations();

    assert_eq!(sim.live_count(links), 6);
    let with_newcomer = link_pairs(&sim, links)
        .into_iter()
        .filter(|&(_, dest)| dest == newcomer)
        .count();
    assert_eq!(with_newcomer, 2);
}
