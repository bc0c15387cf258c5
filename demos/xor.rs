//! XOR example.
//!
//! Evolves a creature that solves XOR, a classic neuroevolution benchmark,
//! with background training of the best creatures between generations.
//!
//! Run with: `RUST_LOG=info cargo run --example xor`

use std::time::Duration;

use symbios_creatures::{
    partition, DataSetDir, EvolveConfig, Evolution, MutationConfig, Sample, Selection,
    TrainConfig,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Creature XOR Example");
    println!("====================\n");

    let cases = [
        ([0.0_f32, 0.0], 0.0_f32),
        ([0.0, 1.0], 1.0),
        ([1.0, 0.0], 1.0),
        ([1.0, 1.0], 0.0),
    ];
    let samples: Vec<Sample> = cases
        .iter()
        .map(|(input, output)| Sample::new(input.to_vec(), vec![*output]))
        .collect();

    let data_dir = std::env::temp_dir().join("symbios-creatures-xor");
    let dataset = DataSetDir::open(partition(&samples, &data_dir, 1000)?)?;

    let config = EvolveConfig {
        population: 150,
        elitism: 5,
        mutation_rate: 0.5,
        mutation_amount: 2,
        selection: Selection::Power { power: 4.0 },
        growth: 0.0001,
        target_error: 0.005,
        iterations: Some(300),
        timeout: Some(Duration::from_secs(120)),
        train_count: 4,
        fine_tune: 5,
        mutation: MutationConfig {
            max_nodes: 12,
            ..MutationConfig::feed_forward()
        },
        train: TrainConfig {
            rate: 0.3,
            epochs: 20,
            ..TrainConfig::default()
        },
        ..EvolveConfig::new(2, 1)
    };

    println!("Population: {}", config.population);
    println!("Elite count: {}", config.elitism);
    println!("Workers: {}", config.workers);
    println!();

    let mut evolution = Evolution::new(config)?;
    let result = evolution.run_with_callback(&dataset, |progress| {
        if progress.generation % 10 == 1 {
            println!(
                "Gen {:3}: error={:.5}, nodes={}, connections={}, rate={:.4}",
                progress.generation,
                progress.error,
                progress.best.node_count(),
                progress.best.connection_count(),
                progress.rate
            );
        }
    })?;

    println!();
    println!("Evolution Complete!");
    println!("==================");
    println!("Stopped: {:?} after {} generations", result.stop_reason, result.generations);
    println!("Elapsed: {:.2?}", result.elapsed);
    println!("Best error: {:.5}", result.error);
    println!("Nodes: {}", result.best.node_count());
    println!("Hidden nodes: {}", result.best.hidden_count());
    println!("Connections: {}", result.best.connection_count());

    let champion = result.best.compact().unwrap_or(result.best);

    println!("\nChampion XOR outputs:");
    for (inputs, expected) in &cases {
        let output = champion.evaluate(inputs)[0];
        let rounded = if output > 0.5 { 1.0 } else { 0.0 };
        let status = if (rounded - expected).abs() < 0.1 {
            "✓"
        } else {
            "✗"
        };
        println!(
            "  {} XOR {} = {:.4} (expected {}) {}",
            inputs[0] as i32, inputs[1] as i32, output, *expected as i32, status
        );
    }

    println!("\nChampion JSON:\n{}", serde_json::to_string_pretty(&champion.export())?);
    Ok(())
}
