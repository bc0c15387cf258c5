//! # Symbios Creatures
//!
//! Joint evolution of network topology and parameters: a NEAT-style
//! genetic search over gated recurrent graphs ("creatures"), combined with
//! trace-based backpropagation that can refine any creature in place.
//!
//! ## Features
//!
//! - **Arena-Graph Model**: nodes and connections live in `SlotMap` arenas
//!   addressed by stable handles; positions are a separate order array, so
//!   inserting or removing a node never renumbers a connection
//! - **Structural Invariants**: `connect`, `gate` and `fix` keep every
//!   creature valid; `validate` re-checks everything for debugging
//! - **Gated Backprop**: eligibility and extended traces give credit through
//!   gates and self-connections (LSTM/GRU-like structures)
//! - **Parallel Scoring**: a worker pool streams an on-disk dataset and
//!   scores creatures with a complexity penalty
//! - **Content-Addressed Deduplication**: creatures are identified by a
//!   SHA-256 of their canonical structure, across a generation and across
//!   runs through the experiment store
//!
//! ## Quick Start
//!
//! ```rust
//! use symbios_creatures::{Activation, Creature, CreatureConfig};
//!
//! // Two inputs feeding one identity hidden node feeding one identity output.
//! let mut creature = Creature::minimal(&CreatureConfig::linear(2, 1));
//! creature.insert_hidden(2, Activation::Identity, 0.0).unwrap();
//! creature.connect(0, 2, 1.0, None).unwrap();
//! creature.connect(1, 2, 1.0, None).unwrap();
//! creature.connect(2, 3, 1.0, None).unwrap();
//! creature.validate(None).unwrap();
//!
//! let output = creature.evaluate(&[0.3, 0.4]);
//! assert!((output[0] - 0.7).abs() < 1e-6);
//! ```
//!
//! ## Evolving Against a Dataset
//!
//! ```rust,no_run
//! use symbios_creatures::{partition, DataSetDir, EvolveConfig, Evolution, Sample};
//!
//! let samples = vec![
//!     Sample::new(vec![0.0, 0.0], vec![0.0]),
//!     Sample::new(vec![0.0, 1.0], vec![1.0]),
//!     Sample::new(vec![1.0, 0.0], vec![1.0]),
//!     Sample::new(vec![1.0, 1.0], vec![0.0]),
//! ];
//! let dataset = DataSetDir::open(partition(&samples, "xor-data", 1000)?)?;
//!
//! let mut evolution = Evolution::new(EvolveConfig::new(2, 1))?;
//! let result = evolution.run(&dataset)?;
//! println!("{:?} after {} generations", result.stop_reason, result.generations);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! ### Positions and Handles
//!
//! Positions `[0, inputs)` are inputs and the last `outputs` positions are
//! outputs; everything in between is hidden or constant. A connection from
//! a later position to an earlier one is a back connection, evaluated with
//! the previous activation of its source. Lookups by position go through a
//! CSR index stamped with the creature's structural generation and rebuilt
//! when stale.
//!
//! ### Innovation Ids
//!
//! Crossover aligns connection genes by the Cantor pairing of their
//! endpoint positions, so no global innovation counter is needed.

pub mod activation;
pub mod compact;
pub mod config;
pub mod cost;
pub mod crossover;
pub mod dataset;
pub mod dedup;
pub mod evolve;
pub mod experiment;
pub mod export;
pub mod fine_tune;
pub mod fitness;
pub mod gene;
pub mod genome;
pub mod innovation;
pub mod mutation;
pub mod network;
pub mod population;
pub mod selection;
pub mod topology;
pub mod worker;

// Re-exports for convenience
pub use activation::{Activation, UnknownActivation};
pub use config::{ConfigError, EvolveConfig};
pub use cost::Cost;
pub use dataset::{partition, DataSetDir, DataSetError, Sample};
pub use dedup::{deduplicate, DedupStats};
pub use evolve::{EvolveError, EvolveResult, Evolution, Progress, StopReason};
pub use experiment::{ExperimentStore, StoreError};
pub use export::{ConnectionExport, CreatureExport, NodeExport};
pub use fine_tune::{fine_tune, Differences};
pub use gene::{ConnectionGene, ConnectionId, ConnectionKind, NodeGene, NodeId, NodeKind};
pub use genome::{Creature, CreatureConfig, CreatureError, Expected, Link};
pub use innovation::{innovation_id, split_innovation};
pub use mutation::{Mutation, MutationConfig};
pub use network::{Network, TrainConfig};
pub use selection::Selection;
pub use topology::GraphIndex;
pub use worker::{TaskKind, Trained, WorkerError, WorkerPool, WorkerRequest, WorkerResponse};
