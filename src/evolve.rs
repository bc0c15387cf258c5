//! The generational loop.
//!
//! Each generation:
//!
//! 1. the best few creatures go to workers for background training,
//! 2. every unscored creature is scored (experiment store first, then the
//!    worker pool),
//! 3. trained creatures come back, adapt the training rate and join the
//!    population,
//! 4. the population is sorted best-first and the stop conditions checked,
//! 5. elitists are carried over, flooded creatures are dropped from the
//!    parent pool, fine-tuned children and bred children fill the rest,
//! 6. the new generation is deduplicated.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, EvolveConfig};
use crate::dataset::{DataSetDir, DataSetError};
use crate::dedup::deduplicate;
use crate::experiment::{ExperimentStore, StoreError};
use crate::fine_tune::fine_tune;
use crate::fitness;
use crate::genome::{Creature, CreatureError};
use crate::network::TrainConfig;
use crate::population::{anti_flood, elitists, mark_prior, sort};
use crate::worker::{TaskId, WorkerError, WorkerPool};

/// Errors that end an evolution run.
#[derive(Debug, thiserror::Error)]
pub enum EvolveError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    DataSet(#[from] DataSetError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Creature(#[from] CreatureError),
    #[error("creatures are {inputs}x{outputs} but the dataset is {data_inputs}x{data_outputs}")]
    Shape {
        inputs: usize,
        outputs: usize,
        data_inputs: usize,
        data_outputs: usize,
    },
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    TargetReached,
    MaxIterations,
    Timeout,
}

/// Outcome of a run.
#[derive(Debug, Clone)]
pub struct EvolveResult {
    /// Best creature of the last generation.
    pub best: Creature,
    /// Its mean error.
    pub error: f32,
    pub generations: usize,
    pub stop_reason: StopReason,
    pub elapsed: Duration,
}

/// Per-generation progress report.
#[derive(Debug)]
pub struct Progress<'a> {
    pub generation: usize,
    pub best: &'a Creature,
    pub error: f32,
    pub population: usize,
    /// Current background training rate.
    pub rate: f32,
    pub elapsed: Duration,
}

/// An evolution run in progress.
#[derive(Debug)]
pub struct Evolution {
    config: EvolveConfig,
    population: Vec<Creature>,
    rng: ChaCha8Rng,
    rate: f32,
    last_best: Option<Creature>,
    previous_best: Option<Creature>,
}

impl Evolution {
    /// Start a run with a random initial population.
    pub fn new(config: EvolveConfig) -> Result<Self, EvolveError> {
        config.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let population = (0..config.population)
            .map(|_| Creature::new(&config.creature, &mut rng))
            .collect();
        let rate = config.train.rate.clamp(config.min_rate, config.max_rate);
        Ok(Self {
            config,
            population,
            rng,
            rate,
            last_best: None,
            previous_best: None,
        })
    }

    /// Replace the initial population.
    ///
    /// `seeds` are cycled (with mutation after the first round) to reach
    /// the configured population size.
    pub fn with_population(mut self, seeds: Vec<Creature>) -> Result<Self, EvolveError> {
        let shape = (self.config.creature.inputs, self.config.creature.outputs);
        if let Some(bad) = seeds
            .iter()
            .find(|c| (c.input_count(), c.output_count()) != shape)
        {
            return Err(CreatureError::Invalid(format!(
                "seed is {}x{}, expected {}x{}",
                bad.input_count(),
                bad.output_count(),
                shape.0,
                shape.1
            ))
            .into());
        }
        if seeds.is_empty() {
            return Ok(self);
        }

        let target = self.config.population;
        let mut population = Vec::with_capacity(target);
        for i in 0..target {
            let mut creature = seeds[i % seeds.len()].clone();
            if i >= seeds.len() {
                creature.mutate_random(
                    &self.config.mutation,
                    self.config.mutation_amount.max(1),
                    &mut self.rng,
                )?;
            }
            population.push(creature);
        }
        self.population = population;
        Ok(self)
    }

    #[must_use]
    pub fn config(&self) -> &EvolveConfig {
        &self.config
    }

    /// Current population; sorted best-first after each scored generation.
    #[must_use]
    pub fn population(&self) -> &[Creature] {
        &self.population
    }

    /// Current background training rate.
    #[must_use]
    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// Evolve against `dataset` until a stop condition holds.
    pub fn run(&mut self, dataset: &DataSetDir) -> Result<EvolveResult, EvolveError> {
        self.run_with_callback(dataset, |_| {})
    }

    /// Evolve against `dataset`, reporting each generation to `callback`.
    pub fn run_with_callback<F>(
        &mut self,
        dataset: &DataSetDir,
        mut callback: F,
    ) -> Result<EvolveResult, EvolveError>
    where
        F: FnMut(&Progress<'_>),
    {
        let (inputs, outputs) = (self.config.creature.inputs, self.config.creature.outputs);
        if dataset.input_size() != inputs || dataset.output_size() != outputs {
            return Err(EvolveError::Shape {
                inputs,
                outputs,
                data_inputs: dataset.input_size(),
                data_outputs: dataset.output_size(),
            });
        }

        let mut pool = WorkerPool::new(self.config.workers, dataset, self.config.cost)?;
        let mut store = self
            .config
            .experiment_dir
            .as_ref()
            .map(ExperimentStore::open)
            .transpose()?;
        let start = Instant::now();
        let mut generation = 0;

        loop {
            generation += 1;

            let training = self.dispatch_training(&mut pool)?;
            fitness::calculate(
                &mut pool,
                &mut self.population,
                self.config.growth,
                store.as_mut(),
            )?;
            self.reconcile_training(&mut pool, &training, store.as_mut())?;

            sort(&mut self.population);
            let Some(best) = self.population.first() else {
                return Err(CreatureError::Invalid("population is empty".to_string()).into());
            };
            let error = fitness::error_of(best, self.config.growth).unwrap_or(f32::INFINITY);
            let elapsed = start.elapsed();

            log::info!(
                "generation {generation}: score {:.6} error {error:.6} nodes {} connections {} population {}",
                best.score.unwrap_or(f32::NEG_INFINITY),
                best.node_count(),
                best.connection_count(),
                self.population.len()
            );
            callback(&Progress {
                generation,
                best,
                error,
                population: self.population.len(),
                rate: self.rate,
                elapsed,
            });

            let stop = if error <= self.config.target_error {
                Some(StopReason::TargetReached)
            } else if self.config.iterations.is_some_and(|n| generation >= n) {
                Some(StopReason::MaxIterations)
            } else if self.config.timeout.is_some_and(|t| elapsed >= t) {
                Some(StopReason::Timeout)
            } else {
                None
            };
            if let Some(stop_reason) = stop {
                log::info!("stopping after {generation} generations: {stop_reason:?}");
                return Ok(EvolveResult {
                    best: best.clone(),
                    error,
                    generations: generation,
                    stop_reason,
                    elapsed,
                });
            }

            self.track_best();
            self.next_generation(store.as_mut())?;
        }
    }

    /// Send the best scored creatures for background training.
    fn dispatch_training(&mut self, pool: &mut WorkerPool) -> Result<HashMap<TaskId, f32>, EvolveError> {
        let mut training = HashMap::new();
        if self.config.train_count == 0 {
            return Ok(training);
        }
        let config = TrainConfig {
            rate: self.rate,
            ..self.config.train.clone()
        };
        let scored = self
            .population
            .iter()
            .filter(|c| c.score.is_some_and(f32::is_finite))
            .take(self.config.train_count);
        for (i, creature) in scored.enumerate() {
            let task = pool.train(i % pool.len(), creature, &config)?;
            training.insert(task, creature.score.unwrap_or(f32::NEG_INFINITY));
        }
        Ok(training)
    }

    /// Collect trained creatures, adapt the rate and add them, scored, to
    /// the population.
    fn reconcile_training(
        &mut self,
        pool: &mut WorkerPool,
        training: &HashMap<TaskId, f32>,
        store: Option<&mut ExperimentStore>,
    ) -> Result<(), EvolveError> {
        if training.is_empty() {
            return Ok(());
        }
        let trained = pool.collect_trained()?;
        if trained.is_empty() {
            return Ok(());
        }

        let improved = trained.iter().filter(|t| t.after < t.before).count();
        let factor = if improved * 2 > trained.len() { 1.1 } else { 0.9 };
        let rate = (self.rate * factor).clamp(self.config.min_rate, self.config.max_rate);
        log::debug!(
            "training improved {improved}/{}; rate {} -> {rate}",
            trained.len(),
            self.rate
        );
        self.rate = rate;

        let mut refined: Vec<Creature> = trained
            .into_iter()
            .map(|t| {
                let mut creature = t.creature;
                let prior = training.get(&t.task).copied().unwrap_or(f32::NEG_INFINITY);
                creature.score = None;
                mark_prior(&mut creature, "trained", prior);
                creature
            })
            .collect();
        fitness::calculate(pool, &mut refined, self.config.growth, store)?;
        self.population.extend(refined);
        Ok(())
    }

    fn track_best(&mut self) {
        let Some(best) = self.population.first() else {
            return;
        };
        let changed = self
            .last_best
            .as_ref()
            .map_or(true, |last| last.identity() != best.identity());
        if changed {
            self.previous_best = self.last_best.replace(best.clone());
        }
    }

    fn next_generation(&mut self, mut store: Option<&mut ExperimentStore>) -> Result<(), EvolveError> {
        let size = self.config.population;
        let mut next = elitists(&self.population, self.config.elitism);
        let keep = next.len();

        let mut parents = std::mem::take(&mut self.population);
        anti_flood(&mut parents);
        parents.truncate(size);

        if self.config.fine_tune > 0 {
            if let (Some(best), Some(previous)) = (&self.last_best, &self.previous_best) {
                let room = size.saturating_sub(next.len()).min(self.config.fine_tune);
                next.extend(fine_tune(best, previous, room, &mut self.rng));
            }
        }

        while next.len() < size {
            let (Some(a), Some(b)) = (
                self.config.selection.select(&parents, &mut self.rng),
                self.config.selection.select(&parents, &mut self.rng),
            ) else {
                break;
            };
            let mut child = Creature::cross_over(a, b, self.config.equal, &mut self.rng)?;
            if self.rng.random_bool(f64::from(self.config.mutation_rate)) {
                child.mutate_random(&self.config.mutation, self.config.mutation_amount, &mut self.rng)?;
            }
            child.score = None;
            next.push(child);
        }

        let stats = deduplicate(
            &mut next,
            keep,
            store.as_deref_mut(),
            &self.config.mutation,
            self.config.dedup_retries,
            &mut self.rng,
        )?;
        if stats.collisions > 0 {
            log::debug!(
                "dedup regenerated {} creatures ({} exhausted)",
                stats.collisions,
                stats.exhausted
            );
        }
        self.population = next;
        Ok(())
    }
}
