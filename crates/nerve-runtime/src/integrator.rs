//! Numerical integrators applied per event
//!
//! The integrator re-walks the current event's part set; the parts
//! themselves implement the state arithmetic through their derivative
//! hooks. Euler makes a single pass. Classical Runge-Kutta makes the full
//! four-stage sweep, temporarily halving the step's `dt` and rewinding `t`
//! for the midpoint evaluations; both are restored bit-identical before
//! the event requeues.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::simulator::Simulator;

/// Strategy for advancing part state during an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Integrator {
    /// Forward Euler: one `integrate` pass per event
    #[default]
    Euler,
    /// Classical fourth-order Runge-Kutta
    RungeKutta,
}

impl Simulator {
    /// Run the configured integrator over the current event's part set
    pub(crate) fn integrate_current(&mut self) {
        match self.integrator {
            Integrator::Euler => {
                self.visit_current(&mut |part, ctx| part.integrate(ctx));
            }
            Integrator::RungeKutta => self.run_rk4(),
        }
    }

    fn run_rk4(&mut self) {
        // k1
        self.visit_current(&mut |part, _| {
            part.snapshot();
            part.push_derivative();
        });

        // k2 and k3 evaluate at the midpoint: half the step, and look
        // backward half a timestep since t is the end of the interval.
        let step = self.current.step;
        let saved = if step.is_valid() {
            let slot = self.step_slot_mut(step);
            let (t, dt) = (slot.t, slot.dt);
            slot.dt = dt / 2.0;
            slot.t -= slot.dt;
            Some((t, dt))
        } else {
            None
        };
        for _ in 0..2 {
            self.visit_current(&mut |part, ctx| part.integrate(ctx));
            self.visit_current(&mut |part, ctx| part.update_derivative(ctx));
            self.visit_current(&mut |part, _| {
                part.finalize_derivative();
                part.multiply_add_to_stack(2.0);
            });
        }
        if let Some((t, dt)) = saved {
            let slot = self.step_slot_mut(step);
            slot.t = t;
            slot.dt = dt;
        }

        // k4
        self.visit_current(&mut |part, ctx| part.integrate(ctx));
        self.visit_current(&mut |part, ctx| part.update_derivative(ctx));
        self.visit_current(&mut |part, _| {
            part.finalize_derivative();
            part.add_to_members(); // empties the derivative stack
        });

        // finish
        self.visit_current(&mut |part, _| part.multiply(1.0 / 6.0));
        self.visit_current(&mut |part, ctx| part.integrate(ctx));
        self.visit_current(&mut |part, _| part.restore());
    }
}
