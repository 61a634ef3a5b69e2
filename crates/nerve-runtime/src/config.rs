//! Simulator configuration

use crate::integrator::Integrator;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for constructing a [`Simulator`](crate::Simulator)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimulatorConfig {
    /// Numerical integrator applied per step event
    pub integrator: Integrator,
    /// Seed for the sampling service (None = default seed)
    pub random_seed: Option<u64>,
}

impl SimulatorConfig {
    /// Select the integrator
    pub fn with_integrator(mut self, integrator: Integrator) -> Self {
        self.integrator = integrator;
        self
    }

    /// Set the random seed for reproducibility
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimulatorConfig::default();
        assert_eq!(config.integrator, Integrator::Euler);
        assert_eq!(config.random_seed, None);
    }

    #[test]
    fn test_builders() {
        let config = SimulatorConfig::default()
            .with_integrator(Integrator::RungeKutta)
            .with_seed(1234);
        assert_eq!(config.integrator, Integrator::RungeKutta);
        assert_eq!(config.random_seed, Some(1234));
    }
}
