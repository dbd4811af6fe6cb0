use rand::{Rng as _, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::models::FlightStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of simulated oracles. Zero disables the relay.
    pub oracles: usize,
    /// Seeds both the oracle identities and the status draws.
    pub seed: u64,
    pub strategy: ResponseStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            oracles: 20,
            seed: 1_000_000,
            strategy: ResponseStrategy::Random,
        }
    }
}

/// How simulated oracles pick the status they report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStrategy {
    /// Any status code, uniformly.
    Random,
    Fixed(FlightStatus),
}

impl ResponseStrategy {
    pub(crate) fn pick(&self, rng: &mut StdRng) -> FlightStatus {
        match self {
            Self::Random => FlightStatus::ALL[rng.random_range(0..FlightStatus::ALL.len())],
            Self::Fixed(status) => *status,
        }
    }
}
