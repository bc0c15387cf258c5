//! Benchmarks for symbios-creatures.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use symbios_creatures::{
    Cost, Creature, CreatureConfig, Mutation, MutationConfig, Network, Sample, TrainConfig,
};

fn grown(rng: &mut ChaCha8Rng, hidden: usize) -> Creature {
    let mut creature = Creature::new(&CreatureConfig::new(4, 2), rng);
    let config = MutationConfig::default();
    while creature.hidden_count() < hidden {
        creature.mutate(Mutation::AddNode, &config, rng).unwrap();
    }
    for _ in 0..hidden {
        creature.mutate(Mutation::AddConn, &config, rng).unwrap();
        creature.mutate(Mutation::AddGate, &config, rng).unwrap();
        creature.mutate(Mutation::AddSelfConn, &config, rng).unwrap();
    }
    creature
}

fn bench_creature_creation(c: &mut Criterion) {
    let config = CreatureConfig::new(4, 2);

    c.bench_function("creature_new", |b| {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        b.iter(|| {
            black_box(Creature::new(&config, &mut rng));
        });
    });
}

fn bench_mutation(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let creature = grown(&mut rng, 8);
    let config = MutationConfig {
        max_nodes: 64,
        max_connections: 256,
        ..MutationConfig::default()
    };

    c.bench_function("creature_mutate_random", |b| {
        let mut g = creature.clone();
        b.iter(|| {
            g.mutate_random(&config, 1, &mut rng).unwrap();
            black_box(&g);
        });
    });
}

fn bench_crossover(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut parent1 = grown(&mut rng, 6);
    let mut parent2 = grown(&mut rng, 10);
    parent1.score = Some(-0.1);
    parent2.score = Some(-0.2);

    c.bench_function("creature_cross_over", |b| {
        b.iter(|| {
            black_box(Creature::cross_over(&parent1, &parent2, false, &mut rng).unwrap());
        });
    });
}

fn bench_activation(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let creature = grown(&mut rng, 16);
    let mut network = Network::new(&creature);
    let mut outputs = vec![0.0; network.num_outputs()];
    let inputs = [0.1, -0.4, 0.7, 0.2];

    c.bench_function("network_activate_no_trace", |b| {
        b.iter(|| {
            network.activate_into(black_box(&inputs), &mut outputs, false);
            black_box(&outputs);
        });
    });

    c.bench_function("network_activate_traced", |b| {
        b.iter(|| {
            network.activate_into(black_box(&inputs), &mut outputs, true);
            black_box(&outputs);
        });
    });
}

fn bench_backprop(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let creature = grown(&mut rng, 16);
    let mut network = Network::new(&creature);
    let sample = Sample::new(vec![0.1, -0.4, 0.7, 0.2], vec![0.3, 0.9]);
    let config = TrainConfig {
        rate: 0.01,
        ..TrainConfig::default()
    };

    c.bench_function("network_train_sample", |b| {
        b.iter(|| {
            black_box(network.train_sample(&sample, &config, Cost::Mse, true));
        });
    });
}

fn bench_identity(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let creature = grown(&mut rng, 16);

    c.bench_function("creature_identity", |b| {
        b.iter(|| {
            black_box(creature.identity());
        });
    });
}

criterion_group!(
    benches,
    bench_creature_creation,
    bench_mutation,
    bench_crossover,
    bench_activation,
    bench_backprop,
    bench_identity,
);
criterion_main!(benches);
