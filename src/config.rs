//! Evolution configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cost::Cost;
use crate::genome::CreatureConfig;
use crate::mutation::MutationConfig;
use crate::network::TrainConfig;
use crate::selection::Selection;

/// Rejected configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("population must hold at least 2 creatures, got {0}")]
    PopulationTooSmall(usize),
    #[error("elitism {elitism} must be smaller than the population {population}")]
    ElitismTooLarge { elitism: usize, population: usize },
    #[error("at least one worker is required")]
    NoWorkers,
    #[error("training rate bounds [{min}, {max}] are inverted or not positive")]
    RateBounds { min: f32, max: f32 },
    #[error("{field} must be in {range}, got {value}")]
    OutOfRange {
        field: &'static str,
        range: &'static str,
        value: f32,
    },
    #[error("creatures need at least one input and one output")]
    EmptyShape,
    #[error("no stop condition: set an iteration budget or a timeout")]
    Unbounded,
}

/// Parameters of an evolution run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolveConfig {
    /// Creatures per generation.
    pub population: usize,
    /// Top creatures copied unchanged into the next generation.
    pub elitism: usize,
    /// Probability that a bred child is mutated.
    pub mutation_rate: f32,
    /// Mutations applied to a child chosen for mutation.
    pub mutation_amount: usize,
    pub selection: Selection,
    /// Treat parents as equally fit during crossover.
    pub equal: bool,
    /// Score penalty per unit of complexity.
    pub growth: f32,
    /// Stop once the best mean error is at or below this.
    pub target_error: f32,
    /// Generation budget.
    pub iterations: Option<usize>,
    /// Wall-clock budget, checked once per generation.
    pub timeout: Option<Duration>,
    pub workers: usize,
    /// Best creatures sent for background training each generation.
    pub train_count: usize,
    /// Lower bound for the adaptive training rate.
    pub min_rate: f32,
    /// Upper bound for the adaptive training rate.
    pub max_rate: f32,
    /// Fine-tuned children per generation.
    pub fine_tune: usize,
    /// Regeneration attempts for a duplicate creature.
    pub dedup_retries: usize,
    /// Directory of the persisted experiment store.
    pub experiment_dir: Option<PathBuf>,
    pub seed: u64,
    pub cost: Cost,
    pub creature: CreatureConfig,
    pub mutation: MutationConfig,
    pub train: TrainConfig,
}

impl Default for EvolveConfig {
    fn default() -> Self {
        Self {
            population: 50,
            elitism: 1,
            mutation_rate: 0.3,
            mutation_amount: 1,
            selection: Selection::default(),
            equal: false,
            growth: 0.0001,
            target_error: 0.05,
            iterations: Some(1000),
            timeout: None,
            workers: std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
            train_count: 0,
            min_rate: 0.001,
            max_rate: 1.0,
            fine_tune: 0,
            dedup_retries: 12,
            experiment_dir: None,
            seed: 42,
            cost: Cost::Mse,
            creature: CreatureConfig::default(),
            mutation: MutationConfig::default(),
            train: TrainConfig::default(),
        }
    }
}

impl EvolveConfig {
    /// Default run for creatures of the given shape.
    #[must_use]
    pub fn new(inputs: usize, outputs: usize) -> Self {
        Self {
            creature: CreatureConfig::new(inputs, outputs),
            ..Default::default()
        }
    }

    /// Default run over feed-forward creatures only.
    #[must_use]
    pub fn feed_forward(inputs: usize, outputs: usize) -> Self {
        Self {
            creature: CreatureConfig::new(inputs, outputs),
            mutation: MutationConfig::feed_forward(),
            ..Default::default()
        }
    }

    /// Check the configuration for inconsistent settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.population < 2 {
            return Err(ConfigError::PopulationTooSmall(self.population));
        }
        if self.elitism >= self.population {
            return Err(ConfigError::ElitismTooLarge {
                elitism: self.elitism,
                population: self.population,
            });
        }
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.creature.inputs == 0 || self.creature.outputs == 0 {
            return Err(ConfigError::EmptyShape);
        }
        if !(self.min_rate > 0.0 && self.min_rate <= self.max_rate) {
            return Err(ConfigError::RateBounds {
                min: self.min_rate,
                max: self.max_rate,
            });
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return Err(ConfigError::OutOfRange {
                field: "mutation_rate",
                range: "[0, 1]",
                value: self.mutation_rate,
            });
        }
        if !(self.growth >= 0.0 && self.growth.is_finite()) {
            return Err(ConfigError::OutOfRange {
                field: "growth",
                range: "[0, inf)",
                value: self.growth,
            });
        }
        if !(self.target_error >= 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "target_error",
                range: "[0, inf)",
                value: self.target_error,
            });
        }
        if self.iterations.is_none() && self.timeout.is_none() {
            return Err(ConfigError::Unbounded);
        }
        Ok(())
    }
}
