//! Integration tests for symbios-creatures.

use std::collections::HashSet;

use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use symbios_creatures::{
    deduplicate, partition, Activation, Cost, Creature, CreatureConfig, CreatureExport,
    DataSetDir, EvolveConfig, Evolution, Mutation, MutationConfig, Sample, StopReason,
    TrainConfig,
};

fn grown(seed: u64, steps: usize) -> Creature {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut creature = Creature::new(&CreatureConfig::new(3, 2), &mut rng);
    creature
        .mutate_random(&MutationConfig::default(), steps, &mut rng)
        .unwrap();
    creature
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_mutations_preserve_invariants(
        seed in any::<u64>(),
        ops in prop::collection::vec(0usize..Mutation::ALL.len(), 1..60),
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut creature = Creature::new(&CreatureConfig::new(2, 2), &mut rng);
        let config = MutationConfig::default();
        for op in ops {
            creature.mutate(Mutation::ALL[op], &config, &mut rng).unwrap();
            prop_assert!(creature.validate(None).is_ok(), "{:?}", creature.validate(None));
        }
        let out = creature.evaluate(&[0.5, -0.5]);
        prop_assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_export_round_trip(seed in any::<u64>(), steps in 0usize..30) {
        let creature = grown(seed, steps);
        let export = creature.export();
        let json = serde_json::to_string(&export).unwrap();
        let parsed: CreatureExport = serde_json::from_str(&json).unwrap();
        let restored = Creature::import(parsed).unwrap();
        prop_assert_eq!(restored.export(), export);
        prop_assert_eq!(restored.identity(), creature.identity());
    }

    #[test]
    fn test_crossover_size_bound(
        seed in any::<u64>(),
        a_steps in 0usize..25,
        b_steps in 0usize..25,
        equal: bool,
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut a = grown(seed, a_steps);
        let mut b = grown(seed.wrapping_add(1), b_steps);
        a.score = Some(-0.25);
        b.score = Some(-0.5);

        let child = Creature::cross_over(&a, &b, equal, &mut rng).unwrap();
        prop_assert!(child.validate(None).is_ok(), "{:?}", child.validate(None));
        if equal {
            let lo = a.node_count().min(b.node_count());
            let hi = a.node_count().max(b.node_count());
            prop_assert!((lo..=hi).contains(&child.node_count()));
        } else {
            prop_assert_eq!(child.node_count(), a.node_count());
        }
    }
}

#[test]
fn test_dedup_forced_collisions() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let original = grown(3, 10);
    let mut population = vec![original; 20];

    deduplicate(
        &mut population,
        0,
        None,
        &MutationConfig::default(),
        50,
        &mut rng,
    )
    .unwrap();

    assert_eq!(population.len(), 20);
    let identities: HashSet<String> = population.iter().map(Creature::identity).collect();
    assert_eq!(identities.len(), 20);
    for creature in &population {
        creature.validate(None).unwrap();
    }
}

#[test]
fn test_backprop_converges_on_linear_target() {
    let samples: Vec<Sample> = (0..16)
        .map(|i| {
            let a = (i % 4) as f32 * 2.0 / 3.0 - 1.0;
            let b = (i / 4) as f32 * 2.0 / 3.0 - 1.0;
            Sample::new(vec![a, b], vec![2.0 * a - b])
        })
        .collect();

    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut creature = Creature::new(&CreatureConfig::linear(2, 1), &mut rng);
    let config = TrainConfig {
        rate: 0.02,
        batch_size: samples.len(),
        ..Default::default()
    };

    let mut previous = f32::INFINITY;
    let mut epochs = 0;
    loop {
        let error = creature.train(&samples, &config, Cost::Mse).unwrap();
        assert!(error < previous, "epoch {epochs}: {error} >= {previous}");
        if error < 1e-3 {
            break;
        }
        previous = error;
        epochs += 1;
        assert!(epochs < 2000, "did not converge, error {error}");
    }
}

#[test]
fn test_scenario_survives_json() {
    let mut creature = Creature::minimal(&CreatureConfig::linear(2, 1));
    creature.insert_hidden(2, Activation::Identity, 0.0).unwrap();
    creature.connect(0, 2, 1.0, None).unwrap();
    creature.connect(1, 2, 1.0, None).unwrap();
    creature.connect(2, 3, 1.0, None).unwrap();

    let json = serde_json::to_string(&creature).unwrap();
    let restored: Creature = serde_json::from_str(&json).unwrap();
    let output = restored.evaluate(&[0.3, 0.4]);
    assert!((output[0] - 0.7).abs() < 1e-6);
}

#[test]
fn test_full_evolution_cycle() {
    let tmp = tempfile::tempdir().unwrap();
    let samples = vec![
        Sample::new(vec![0.0, 0.0], vec![0.0]),
        Sample::new(vec![0.0, 1.0], vec![1.0]),
        Sample::new(vec![1.0, 0.0], vec![1.0]),
        Sample::new(vec![1.0, 1.0], vec![0.0]),
    ];
    let dataset = DataSetDir::open(partition(&samples, tmp.path().join("xor"), 2).unwrap()).unwrap();

    let config = EvolveConfig {
        population: 20,
        elitism: 2,
        workers: 3,
        iterations: Some(8),
        target_error: 0.0,
        train_count: 2,
        fine_tune: 2,
        experiment_dir: Some(tmp.path().join("experiments")),
        ..EvolveConfig::new(2, 1)
    };
    let mut evolution = Evolution::new(config).unwrap();
    let mut generations = 0;
    let result = evolution
        .run_with_callback(&dataset, |progress| {
            generations = progress.generation;
            assert!(progress.best.score.is_some());
        })
        .unwrap();

    assert_eq!(result.stop_reason, StopReason::MaxIterations);
    assert_eq!(generations, 8);
    result.best.validate(None).unwrap();
    assert!(result.error.is_finite());
    assert_eq!(result.best.evaluate(&[1.0, 0.0]).len(), 1);
}
