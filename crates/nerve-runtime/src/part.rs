//! The part contract: lifecycle, integration, and event hooks
//!
//! A part is one simulation unit. Concrete types implement [`Part`] and
//! override only the hooks they need; everything defaults to a no-op. Hooks
//! that interact with the running simulation receive a [`Context`], which
//! borrows the simulator and knows the part's own id.

use std::any::Any;

use nerve_math::{Sampler, Vector3};

use crate::{
    error::Result,
    ids::{PartId, PopId, StepId},
    simulator::Simulator,
};

/// A simulation unit with state and behavior.
///
/// Parts live in an arena owned by the [`Simulator`]; the simulator moves a
/// part's behavior out of its slot while a hook runs, so hooks may freely
/// reach other parts and simulator operations through the [`Context`].
/// Reading another part's concrete state goes through [`Part::as_any`]
/// downcasting.
pub trait Part: Any {
    /// Upcast for downcasting to the concrete part type
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting to the concrete part type
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Reset state so a recycled part is indistinguishable from a fresh one
    fn clear(&mut self) {}

    /// One-time setup after the part is placed in the simulation
    fn init(&mut self, _ctx: &mut Context) {}

    /// Advance state variables by the current time step
    fn integrate(&mut self, _ctx: &mut Context) {}

    /// Compute updated values from the integrated state
    fn update(&mut self, _ctx: &mut Context) {}

    /// Latch updated values. Returning false asks the owning step event to
    /// remove this part from the simulation.
    fn finalize(&mut self, _ctx: &mut Context) -> bool {
        true
    }

    /// Compute updated derivative values (midpoint passes of higher-order
    /// integrators)
    fn update_derivative(&mut self, _ctx: &mut Context) {}

    /// Latch updated derivative values
    fn finalize_derivative(&mut self) {}

    /// Preserve state that integration will overwrite
    fn snapshot(&mut self) {}

    /// Release state preserved by [`Part::snapshot`]
    fn restore(&mut self) {}

    /// Push the current derivative onto the accumulation stack
    fn push_derivative(&mut self) {}

    /// Scale the current derivative by `scalar` and add it to the stack
    fn multiply_add_to_stack(&mut self, _scalar: f64) {}

    /// Scale the current derivative by `scalar`
    fn multiply(&mut self, _scalar: f64) {}

    /// Fold the accumulation stack back into the derivative, emptying it
    fn add_to_members(&mut self) {}

    /// Request that this part exit the simulation at its next opportunity
    fn die(&mut self) {}

    /// Notification that the part has been placed in the simulation
    fn enter_simulation(&mut self) {}

    /// Notification that the part has been removed from the simulation
    fn leave_simulation(&mut self) {}

    /// Whether a dead part may be recycled by its population
    fn is_free(&self) -> bool {
        true
    }

    /// Bind endpoint `i` of a connection part
    fn set_part(&mut self, _i: usize, _part: PartId) {}

    /// Endpoint `i` of a connection part
    fn get_part(&self, _i: usize) -> PartId {
        PartId::INVALID
    }

    /// Number of connections already accounted to endpoint `i`
    fn get_count(&self, _i: usize, _sim: &Simulator) -> usize {
        0
    }

    /// Project endpoint `i`'s position into endpoint `j`'s coordinate frame
    fn project(&self, _i: usize, _j: usize, _sim: &Simulator) -> Vector3 {
        [0.0; 3]
    }

    /// Liveness as a simulated quantity (1 = alive)
    fn get_live(&self) -> f64 {
        1.0
    }

    /// Probability that this candidate connection should exist
    fn get_p(&mut self, _sim: &mut Simulator) -> f64 {
        1.0
    }

    /// Spatial position of this part
    fn get_xyz(&self) -> Vector3 {
        [0.0; 3]
    }

    /// Whether event channel `i` should fire for this part
    fn event_test(&self, _i: usize) -> bool {
        false
    }

    /// Delivery delay for event channel `i`; negative means "no preference"
    fn event_delay(&self, _i: usize) -> f64 {
        -1.0
    }

    /// Stamp latch `i`, marking that a spike event has arrived
    fn set_latch(&mut self, _i: usize) {}

    /// Clear latches after a spike event's finalize pass
    fn finalize_event(&mut self) {}
}

/// Hook context: the borrowed simulator plus the identity of the part the
/// hook is running on.
pub struct Context<'a> {
    sim: &'a mut Simulator,
    id: PartId,
}

impl<'a> Context<'a> {
    pub(crate) fn new(sim: &'a mut Simulator, id: PartId) -> Self {
        Self { sim, id }
    }

    /// The part this hook is running on
    pub fn id(&self) -> PartId {
        self.id
    }

    /// Current simulated time
    pub fn time(&self) -> f64 {
        self.sim.time()
    }

    /// Time step of the current event (0 for spike events)
    pub fn dt(&self) -> f64 {
        self.sim.dt()
    }

    /// The sampling service
    pub fn sampler(&mut self) -> &mut Sampler {
        self.sim.sampler_mut()
    }

    /// Full simulator access for scheduling, deferred work, and reading
    /// other parts
    pub fn sim(&mut self) -> &mut Simulator {
        self.sim
    }

    /// Remove this part from its step event's queue.
    ///
    /// Safe to call while the queue is being walked; the walk cursor is
    /// nudged so iteration continues with the next part.
    pub fn dequeue(&mut self) {
        self.sim.dequeue_part(self.id);
    }

    /// Move this part to the step event with period `dt`, creating that
    /// event if it does not exist yet
    pub fn set_period(&mut self, dt: f64) -> Result<()> {
        self.sim.set_period(self.id, dt)
    }
}

/// Arena slot: the part behavior plus its intrusive links.
///
/// `next` serves both the step-event queue and the population dead chain (a
/// part is never on both at once). `previous` is the queue back link, with
/// `INVALID` meaning "head of queue". `before`/`after` form the population
/// live ring, `INVALID` playing the sentinel.
pub(crate) struct PartSlot {
    pub part: Option<Box<dyn Part>>,
    pub next: PartId,
    pub previous: PartId,
    pub step: StepId,
    pub before: PartId,
    pub after: PartId,
    pub pop: PopId,
    pub in_sim: bool,
}

impl PartSlot {
    pub fn new(part: Box<dyn Part>, pop: PopId) -> Self {
        Self {
            part: Some(part),
            next: PartId::INVALID,
            previous: PartId::INVALID,
            step: StepId::INVALID,
            before: PartId::INVALID,
            after: PartId::INVALID,
            pop,
            in_sim: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Inert;

    impl Part for Inert {
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn test_default_hooks() {
        let mut part = Inert;
        assert!(part.is_free());
        assert_eq!(part.get_live(), 1.0);
        assert_eq!(part.get_part(0), PartId::INVALID);
        assert_eq!(part.event_delay(3), -1.0);
        assert!(!part.event_test(0));
        assert_eq!(part.get_xyz(), [0.0; 3]);
        part.set_latch(0);
        part.finalize_event();
    }

    #[test]
    fn test_downcast() {
        let part: Box<dyn Part> = Box::new(Inert);
        assert!(part.as_any().downcast_ref::<Inert>().is_some());
    }
}
