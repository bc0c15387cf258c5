//! Population scoring over a worker pool.

use std::collections::{HashMap, VecDeque};

use crate::experiment::ExperimentStore;
use crate::genome::Creature;
use crate::worker::{TaskId, TaskKind, WorkerError, WorkerPool, WorkerResponse};

/// Complexity-regularised fitness: `-error - growth * complexity`.
///
/// Non-finite results become negative infinity.
#[must_use]
pub fn score(error: f32, complexity: usize, growth: f32) -> f32 {
    let score = -error - growth * complexity as f32;
    if score.is_finite() {
        score
    } else {
        log::warn!("non-finite score for error {error}, coercing to -inf");
        f32::NEG_INFINITY
    }
}

/// Mean error recovered from a creature's score.
#[must_use]
pub fn error_of(creature: &Creature, growth: f32) -> Option<f32> {
    let score = creature.score?;
    if score.is_finite() {
        Some(-score - growth * creature.complexity() as f32)
    } else {
        Some(f32::INFINITY)
    }
}

/// Score every creature in `population` that has no score yet.
///
/// Creatures whose identity is in `store` take the recorded score without
/// being evaluated. The rest are dispatched to idle workers one at a time
/// and scored as results come back, in whatever order workers finish.
/// Training results that arrive meanwhile are stashed on the pool.
///
/// Returns how many creatures were evaluated by workers.
pub fn calculate(
    pool: &mut WorkerPool,
    population: &mut [Creature],
    growth: f32,
    mut store: Option<&mut ExperimentStore>,
) -> Result<usize, WorkerError> {
    let mut queue: VecDeque<usize> = VecDeque::new();
    let mut identities: HashMap<usize, String> = HashMap::new();

    for (index, creature) in population.iter_mut().enumerate() {
        if creature.score.is_some() {
            continue;
        }
        if let Some(store) = store.as_deref_mut() {
            let identity = creature.identity();
            match store.lookup(&identity) {
                Ok(Some(recorded)) => {
                    creature.score = Some(recorded);
                    continue;
                }
                Ok(None) => {}
                Err(e) => log::warn!("experiment store lookup failed: {e}"),
            }
            identities.insert(index, identity);
        }
        queue.push_back(index);
    }

    let mut in_flight: HashMap<TaskId, usize> = HashMap::new();
    let mut evaluated = 0;

    while !queue.is_empty() || !in_flight.is_empty() {
        while let Some(worker) = pool.idle_worker() {
            let Some(index) = queue.pop_front() else {
                break;
            };
            let task = pool.evaluate(worker, &population[index])?;
            in_flight.insert(task, index);
        }

        let response = pool.recv()?;
        let task = response.task();
        let result = match response {
            other @ (WorkerResponse::Trained { .. }
            | WorkerResponse::Failed {
                kind: TaskKind::Train,
                ..
            }) => {
                pool.stash(other);
                continue;
            }
            WorkerResponse::Evaluated { error, .. } if in_flight.contains_key(&task) => {
                Some(error)
            }
            WorkerResponse::Failed {
                worker, message, ..
            } if in_flight.contains_key(&task) => {
                log::error!("evaluation task {task} failed on worker {worker}: {message}");
                None
            }
            _ => return Err(WorkerError::UnknownTask(task)),
        };
        let index = in_flight
            .remove(&task)
            .ok_or(WorkerError::UnknownTask(task))?;

        let creature = &mut population[index];
        let value = match result {
            Some(error) => score(error, creature.complexity(), growth),
            None => f32::NEG_INFINITY,
        };
        creature.score = Some(value);
        evaluated += 1;

        if let (Some(store), Some(identity)) = (store.as_deref_mut(), identities.get(&index)) {
            if let Err(e) = store.record(identity, value) {
                log::warn!("experiment store record failed: {e}");
            }
        }
    }

    Ok(evaluated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::Cost;
    use crate::dataset::{partition, DataSetDir, Sample};
    use crate::genome::CreatureConfig;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn test_rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    fn dataset(dir: &std::path::Path) -> DataSetDir {
        let samples = vec![
            Sample::new(vec![0.0, 0.0], vec![0.0]),
            Sample::new(vec![0.0, 1.0], vec![1.0]),
            Sample::new(vec![1.0, 0.0], vec![1.0]),
            Sample::new(vec![1.0, 1.0], vec![0.0]),
        ];
        DataSetDir::open(partition(&samples, dir, 3).unwrap()).unwrap()
    }

    #[test]
    fn test_score_penalises_growth() {
        assert_eq!(score(0.5, 0, 0.1), -0.5);
        assert!((score(0.5, 10, 0.01) - -0.6).abs() < 1e-6);
        assert_eq!(score(f32::NAN, 3, 0.0), f32::NEG_INFINITY);
        assert_eq!(score(f32::INFINITY, 3, 0.0), f32::NEG_INFINITY);
    }

    #[test]
    fn test_calculate_scores_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let data = dataset(tmp.path());
        let mut rng = test_rng();
        let config = CreatureConfig::new(2, 1);
        let mut population: Vec<Creature> =
            (0..7).map(|_| Creature::new(&config, &mut rng)).collect();
        population[3].score = Some(-0.01);

        let mut pool = WorkerPool::new(3, &data, Cost::Mse).unwrap();
        let evaluated = calculate(&mut pool, &mut population, 0.001, None).unwrap();
        assert_eq!(evaluated, 6);
        assert!(population.iter().all(|c| c.score.is_some()));
        assert_eq!(population[3].score, Some(-0.01));
        for creature in &population {
            let error = error_of(creature, 0.001).unwrap();
            assert!(error >= 0.0);
        }
    }

    #[test]
    fn test_store_skips_known_genomes() {
        let tmp = tempfile::tempdir().unwrap();
        let data = dataset(&tmp.path().join("data"));
        let mut store = ExperimentStore::open(tmp.path().join("store")).unwrap();
        let mut rng = test_rng();
        let creature = Creature::new(&CreatureConfig::new(2, 1), &mut rng);
        store.record(&creature.identity(), -42.0).unwrap();

        let mut population = vec![creature.clone(), Creature::new(&CreatureConfig::new(2, 1), &mut rng)];
        let mut pool = WorkerPool::new(1, &data, Cost::Mse).unwrap();
        let evaluated = calculate(&mut pool, &mut population, 0.0, Some(&mut store)).unwrap();
        assert_eq!(evaluated, 1);
        assert_eq!(population[0].score, Some(-42.0));
        assert!(store.contains(&population[1].identity()).unwrap());
    }
}
