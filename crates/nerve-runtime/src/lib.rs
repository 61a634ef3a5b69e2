//! Event-driven simulation core for networks of dynamical parts
//!
//! This crate provides the scheduling engine for discrete-event simulation
//! of populations of stateful units ("parts"): a time-ordered event queue
//! with periodic step events and one-shot spike events, Euler and classical
//! Runge-Kutta integrators, intrusive part queues that tolerate mutation
//! mid-walk, and probabilistic connection matching between populations.
//!
//! Concrete part and population types implement the [`Part`] and
//! [`Population`] traits; the [`Simulator`] owns the arena of part slots and
//! drives everything from its event loop.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
mod event;
pub mod ids;
pub mod integrator;
pub mod part;
pub mod population;
pub mod simulator;
mod visitor;

pub use config::SimulatorConfig;
pub use error::{Result, RuntimeError};
pub use ids::{PartId, PopId, StepId};
pub use integrator::Integrator;
pub use part::{Context, Part};
pub use population::Population;
pub use simulator::Simulator;

// Re-export the sampling service so downstream crates need only one import.
pub use nerve_math::{Sampler, Vector3};

/// Runtime crate version for compatibility checking
pub const RUNTIME_VERSION: u32 = 1;

/// Ambient time step reported before any event has run (100 microseconds)
pub const DEFAULT_TIMESTEP: f64 = 1e-4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_integration() {
        // All components importable and a simulator constructible.
        let config = SimulatorConfig::default().with_seed(7);
        let sim = Simulator::new(config);
        assert_eq!(sim.time(), 0.0);
        assert_eq!(sim.dt(), DEFAULT_TIMESTEP);
        assert_eq!(sim.pending_events(), 0);
    }
}
