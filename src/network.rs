//! Compiled network with gated, trace-based backpropagation.
//!
//! [`Network`] is an evaluation-ready copy of a [`Creature`]: node parameters
//! and runtime state live in flat vectors indexed by position, and inbound,
//! outbound and gated connections are CSR rows of edge indices.
//!
//! ## Forward pass
//!
//! Nodes activate in position order:
//!
//! ```text
//! state      = self_gain * self_weight * state_prev + bias + sum(a_from * w * gain)
//! activation = squash(state)
//! derivative = squash'(state)
//! ```
//!
//! A connection's gain is its gater's current activation, or 1 when ungated.
//! Gaters placed after their connection contribute their previous activation,
//! which is how recurrent gating (LSTM/GRU-like cells) is expressed.
//!
//! ## Traces
//!
//! With tracing enabled, each inbound connection keeps an eligibility trace
//! `e = self_gain * self_weight * e_prev + a_from * gain`, and one extended
//! trace per node downstream of a connection its target gates. The extended
//! trace lets credit flow through the gate in [`Network::propagate`].
//!
//! ## Conditional nodes
//!
//! An `If` node sums its condition, positive and negative inputs separately
//! and passes `bias + (condition > 0 ? positive : negative)`. Connections on
//! the inactive branch and condition connections are masked out of traces
//! and backpropagation for that step.

use serde::{Deserialize, Serialize};

use crate::activation::Activation;
use crate::cost::Cost;
use crate::dataset::Sample;
use crate::gene::{ConnectionId, ConnectionKind, NodeId, NodeKind};
use crate::genome::{Creature, CreatureError};
use crate::topology::Csr;

/// Gradient training parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Learning rate.
    pub rate: f32,
    /// Fraction of the previous committed delta carried into the next one.
    pub momentum: f32,
    /// Samples per committed update.
    pub batch_size: usize,
    /// Passes over the dataset per training request.
    pub epochs: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            rate: 0.3,
            momentum: 0.0,
            batch_size: 1,
            epochs: 1,
        }
    }
}

#[derive(Debug, Clone)]
struct Edge {
    id: ConnectionId,
    from: usize,
    to: usize,
    weight: f32,
    gater: Option<usize>,
    kind: Option<ConnectionKind>,
    /// 1 when the edge participates in the current step, 0 on an inactive
    /// `If` branch.
    mask: f32,
    eligibility: f32,
    /// Offset of this edge's extended traces in `Network::xtrace`.
    xtrace_at: usize,
    total_delta: f32,
    prev_delta: f32,
}

#[inline]
fn gain(edge: &Edge, activation: &[f32]) -> f32 {
    edge.gater.map_or(1.0, |g| activation[g])
}

/// A compiled, trainable network.
#[derive(Debug, Clone)]
pub struct Network {
    input: usize,
    output: usize,
    generation: u64,
    node_ids: Vec<NodeId>,
    kinds: Vec<NodeKind>,
    squash: Vec<Activation>,
    bias: Vec<f32>,

    activation: Vec<f32>,
    state: Vec<f32>,
    old: Vec<f32>,
    derivative: Vec<f32>,
    responsibility: Vec<f32>,
    projected: Vec<f32>,
    total_delta_bias: Vec<f32>,
    prev_delta_bias: Vec<f32>,

    edges: Vec<Edge>,
    inbound: Csr<usize>,
    outbound: Csr<usize>,
    gated: Csr<usize>,
    self_edge: Vec<Option<usize>>,
    /// Distinct targets of the connections each node gates.
    gated_nodes: Csr<usize>,
    xtrace: Vec<f32>,
    influence_buf: Vec<f32>,
    decay_buf: Vec<f32>,
}

impl Network {
    /// Compile a creature.
    #[must_use]
    pub fn new(creature: &Creature) -> Self {
        let n = creature.node_count();

        let mut node_ids = Vec::with_capacity(n);
        let mut kinds = Vec::with_capacity(n);
        let mut squash = Vec::with_capacity(n);
        let mut bias = Vec::with_capacity(n);
        for pos in 0..n {
            if let (Some(id), Some(node)) = (creature.node_id(pos), creature.node(pos)) {
                node_ids.push(id);
                kinds.push(node.kind);
                squash.push(node.squash);
                bias.push(if node.kind.has_bias() { node.bias } else { 0.0 });
            }
        }

        let mut edges = Vec::with_capacity(creature.connection_count());
        for link in creature.links() {
            edges.push(Edge {
                id: link.id,
                from: link.from,
                to: link.to,
                weight: link.weight,
                gater: link.gater,
                kind: link.kind,
                mask: 1.0,
                eligibility: 0.0,
                xtrace_at: 0,
                total_delta: 0.0,
                prev_delta: 0.0,
            });
        }

        let mut self_edge = vec![None; n];
        let mut inbound_keys = Vec::with_capacity(edges.len());
        let mut outbound_keys = Vec::with_capacity(edges.len());
        let mut gated_keys = Vec::new();
        for (i, edge) in edges.iter().enumerate() {
            if edge.from == edge.to {
                self_edge[edge.to] = Some(i);
            } else {
                inbound_keys.push((edge.to, i));
                outbound_keys.push((edge.from, i));
            }
            if let Some(g) = edge.gater {
                gated_keys.push((g, i));
            }
        }
        let inbound = Csr::build(n, &inbound_keys);
        let outbound = Csr::build(n, &outbound_keys);
        let gated = Csr::build(n, &gated_keys);

        let mut gated_node_keys = Vec::new();
        let mut max_targets = 0;
        for g in 0..n {
            let mut targets: Vec<usize> = Vec::new();
            for &e in gated.row(g) {
                let to = edges[e].to;
                if !targets.contains(&to) {
                    targets.push(to);
                }
            }
            max_targets = max_targets.max(targets.len());
            gated_node_keys.extend(targets.into_iter().map(|k| (g, k)));
        }
        let gated_nodes = Csr::build(n, &gated_node_keys);

        let mut xtrace_len = 0;
        for edge in edges.iter_mut().filter(|e| e.from != e.to) {
            edge.xtrace_at = xtrace_len;
            xtrace_len += gated_nodes.row(edge.to).len();
        }

        Self {
            input: creature.input_count(),
            output: creature.output_count(),
            generation: creature.generation(),
            node_ids,
            kinds,
            squash,
            bias,
            activation: vec![0.0; n],
            state: vec![0.0; n],
            old: vec![0.0; n],
            derivative: vec![0.0; n],
            responsibility: vec![0.0; n],
            projected: vec![0.0; n],
            total_delta_bias: vec![0.0; n],
            prev_delta_bias: vec![0.0; n],
            edges,
            inbound,
            outbound,
            gated,
            self_edge,
            gated_nodes,
            xtrace: vec![0.0; xtrace_len],
            influence_buf: Vec::with_capacity(max_targets),
            decay_buf: Vec::with_capacity(max_targets),
        }
    }

    /// Number of inputs.
    #[must_use]
    pub const fn num_inputs(&self) -> usize {
        self.input
    }

    /// Number of outputs.
    #[must_use]
    pub const fn num_outputs(&self) -> usize {
        self.output
    }

    /// Reset runtime state and traces, keeping parameters and pending deltas.
    pub fn clear(&mut self) {
        for v in [
            &mut self.activation,
            &mut self.state,
            &mut self.old,
            &mut self.derivative,
            &mut self.responsibility,
            &mut self.projected,
            &mut self.xtrace,
        ] {
            v.fill(0.0);
        }
        for edge in &mut self.edges {
            edge.eligibility = 0.0;
            edge.mask = 1.0;
        }
    }

    /// `self_gain * self_weight` of node `pos`.
    fn self_decay(&self, pos: usize) -> f32 {
        self.self_edge[pos].map_or(0.0, |e| {
            let edge = &self.edges[e];
            gain(edge, &self.activation) * edge.weight
        })
    }

    /// Sum the inbound contributions of `pos`, setting edge masks.
    fn weighted_input(&mut self, pos: usize) -> f32 {
        let activation = &self.activation;
        let row = self.inbound.row(pos);

        if self.squash[pos] != Activation::If {
            let mut sum = 0.0;
            for &e in row {
                let edge = &mut self.edges[e];
                edge.mask = 1.0;
                sum += activation[edge.from] * edge.weight * gain(edge, activation);
            }
            return sum;
        }

        let (mut condition, mut positive, mut negative) = (0.0, 0.0, 0.0);
        for &e in row {
            let edge = &self.edges[e];
            let value = activation[edge.from] * edge.weight * gain(edge, activation);
            match edge.kind {
                Some(ConnectionKind::Condition) => condition += value,
                Some(ConnectionKind::Negative) => negative += value,
                Some(ConnectionKind::Positive) | None => positive += value,
            }
        }
        let take_positive = condition > 0.0;
        for &e in row {
            let edge = &mut self.edges[e];
            let active = match edge.kind {
                Some(ConnectionKind::Condition) => false,
                Some(ConnectionKind::Negative) => !take_positive,
                Some(ConnectionKind::Positive) | None => take_positive,
            };
            edge.mask = if active { 1.0 } else { 0.0 };
        }
        Activation::compose_if(condition, positive, negative)
    }

    /// How strongly node `k`'s state depends on the gain set by `gater`.
    fn influence(&self, gater: usize, k: usize, prior: f32) -> f32 {
        let mut influence = match self.self_edge[k] {
            Some(e) if self.edges[e].gater == Some(gater) => prior,
            _ => 0.0,
        };
        for &e in self.gated.row(gater) {
            let edge = &self.edges[e];
            if edge.to == k && edge.from != edge.to {
                influence += edge.weight * self.activation[edge.from] * edge.mask;
            }
        }
        influence
    }

    fn update_traces(&mut self, pos: usize, decay: f32) {
        let mut influences = std::mem::take(&mut self.influence_buf);
        let mut decays = std::mem::take(&mut self.decay_buf);
        influences.clear();
        decays.clear();
        for &k in self.gated_nodes.row(pos) {
            // Nodes at or before `pos` already advanced this step.
            let prior = if k <= pos { self.old[k] } else { self.state[k] };
            influences.push(self.influence(pos, k, prior));
            decays.push(self.self_decay(k));
        }

        let derivative = self.derivative[pos];
        for &e in self.inbound.row(pos) {
            let edge = &mut self.edges[e];
            let g = edge.gater.map_or(1.0, |g| self.activation[g]);
            edge.eligibility =
                decay * edge.eligibility + self.activation[edge.from] * g * edge.mask;
            let eligibility = edge.eligibility;
            let at = edge.xtrace_at;
            for (slot, (&influence, &k_decay)) in influences.iter().zip(&decays).enumerate() {
                let x = &mut self.xtrace[at + slot];
                *x = k_decay * *x + derivative * eligibility * influence;
            }
        }

        self.influence_buf = influences;
        self.decay_buf = decays;
    }

    /// Run one step and write the outputs into `outputs`.
    ///
    /// # Panics
    ///
    /// Panics if `inputs` or `outputs` has the wrong length.
    pub fn activate_into(&mut self, inputs: &[f32], outputs: &mut [f32], trace: bool) {
        assert_eq!(
            inputs.len(),
            self.input,
            "Input length mismatch: expected {}, got {}",
            self.input,
            inputs.len()
        );
        assert_eq!(
            outputs.len(),
            self.output,
            "Output length mismatch: expected {}, got {}",
            self.output,
            outputs.len()
        );

        self.activation[..self.input].copy_from_slice(inputs);

        for pos in self.input..self.kinds.len() {
            self.old[pos] = self.state[pos];
            if self.kinds[pos] == NodeKind::Constant {
                self.state[pos] = self.bias[pos];
                self.activation[pos] = self.bias[pos];
                self.derivative[pos] = 1.0;
                continue;
            }

            let decay = self.self_decay(pos);
            let sum = self.weighted_input(pos);
            let state = decay * self.old[pos] + self.bias[pos] + sum;
            let squash = self.squash[pos];
            self.state[pos] = state;
            self.activation[pos] = squash.apply(state);
            self.derivative[pos] = squash.derivative(state);

            if trace {
                self.update_traces(pos, decay);
            }
        }

        let start = self.kinds.len() - self.output;
        outputs.copy_from_slice(&self.activation[start..]);
    }

    /// Run one step.
    ///
    /// With `trace` disabled no trace bookkeeping is done; use that for
    /// inference.
    ///
    /// # Panics
    ///
    /// Panics if `inputs` has the wrong length.
    pub fn activate(&mut self, inputs: &[f32], trace: bool) -> Vec<f32> {
        let mut outputs = vec![0.0; self.output];
        self.activate_into(inputs, &mut outputs, trace);
        outputs
    }

    /// Backpropagate `target` against the last traced activation.
    ///
    /// Deltas accumulate until `update` is set, at which point they are
    /// committed together with `momentum` times the previous commit.
    ///
    /// # Panics
    ///
    /// Panics if `target` has the wrong length.
    pub fn propagate(&mut self, target: &[f32], rate: f32, momentum: f32, update: bool) {
        assert_eq!(
            target.len(),
            self.output,
            "Target length mismatch: expected {}, got {}",
            self.output,
            target.len()
        );
        let n = self.kinds.len();
        let output_start = n - self.output;

        for pos in (self.input..n).rev() {
            if pos >= output_start {
                let r = target[pos - output_start] - self.activation[pos];
                self.responsibility[pos] = r;
                self.projected[pos] = r;
            } else {
                let mut error = 0.0;
                for &e in self.outbound.row(pos) {
                    let edge = &self.edges[e];
                    error += self.responsibility[edge.to]
                        * edge.weight
                        * gain(edge, &self.activation)
                        * edge.mask;
                }
                let projected = self.derivative[pos] * error;

                let mut gated_error = 0.0;
                for &k in self.gated_nodes.row(pos) {
                    gated_error += self.responsibility[k] * self.influence(pos, k, self.old[k]);
                }
                self.projected[pos] = projected;
                self.responsibility[pos] = projected + self.derivative[pos] * gated_error;
            }

            if self.kinds[pos] == NodeKind::Constant {
                continue;
            }

            let projected = self.projected[pos];
            let targets = self.gated_nodes.row(pos);
            for &e in self.inbound.row(pos) {
                let edge = &mut self.edges[e];
                let mut gradient = projected * edge.eligibility;
                for (slot, &k) in targets.iter().enumerate() {
                    gradient += self.responsibility[k] * self.xtrace[edge.xtrace_at + slot];
                }
                edge.total_delta += rate * gradient;
            }
            self.total_delta_bias[pos] += rate * self.responsibility[pos];
        }

        if update {
            self.commit(momentum);
        }
    }

    /// Apply accumulated deltas.
    pub fn commit(&mut self, momentum: f32) {
        for edge in &mut self.edges {
            edge.total_delta += momentum * edge.prev_delta;
            edge.weight += edge.total_delta;
            edge.prev_delta = edge.total_delta;
            edge.total_delta = 0.0;
        }
        for pos in self.input..self.kinds.len() {
            if self.kinds[pos] == NodeKind::Constant {
                continue;
            }
            let total = self.total_delta_bias[pos] + momentum * self.prev_delta_bias[pos];
            self.bias[pos] += total;
            self.prev_delta_bias[pos] = total;
            self.total_delta_bias[pos] = 0.0;
        }
    }

    /// Traced activation and backprop for one sample; returns its error
    /// measured before the update.
    pub fn train_sample(
        &mut self,
        sample: &Sample,
        config: &TrainConfig,
        cost: Cost,
        update: bool,
    ) -> f32 {
        let output = self.activate(&sample.input, true);
        self.propagate(&sample.output, config.rate, config.momentum, update);
        cost.calculate(&sample.output, &output)
    }

    /// One pass over `samples`, committing every `batch_size` samples and
    /// at the end. Returns the mean error seen during the pass.
    pub fn train_epoch(&mut self, samples: &[Sample], config: &TrainConfig, cost: Cost) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let batch = config.batch_size.max(1);
        let mut error = 0.0;
        for (i, sample) in samples.iter().enumerate() {
            let update = (i + 1) % batch == 0 || i + 1 == samples.len();
            error += self.train_sample(sample, config, cost, update);
        }
        error / samples.len() as f32
    }

    /// Mean untraced error over `samples`.
    pub fn test(&mut self, samples: &[Sample], cost: Cost) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let mut outputs = vec![0.0; self.output];
        let mut error = 0.0;
        for sample in samples {
            self.activate_into(&sample.input, &mut outputs, false);
            error += cost.calculate(&sample.output, &outputs);
        }
        error / samples.len() as f32
    }

    /// Copy trained weights and biases back into the creature it was
    /// compiled from.
    pub fn write_back(&self, creature: &mut Creature) -> Result<(), CreatureError> {
        if creature.generation() != self.generation || creature.node_count() != self.kinds.len()
        {
            return Err(CreatureError::Invalid(
                "network was compiled from a different structure".to_string(),
            ));
        }
        for edge in &self.edges {
            creature.set_weight(edge.id, edge.weight);
        }
        for (pos, &id) in self.node_ids.iter().enumerate() {
            if let Some(node) = creature.node_mut(id) {
                if node.kind.has_bias() {
                    node.bias = self.bias[pos];
                }
            }
        }
        Ok(())
    }
}

impl Creature {
    /// Untraced forward pass from a fresh state.
    ///
    /// # Panics
    ///
    /// Panics if `input` has the wrong length.
    #[must_use]
    pub fn evaluate(&self, input: &[f32]) -> Vec<f32> {
        Network::new(self).activate(input, false)
    }

    /// Train in place for `config.epochs` passes; returns the mean error of
    /// the last pass.
    pub fn train(
        &mut self,
        samples: &[Sample],
        config: &TrainConfig,
        cost: Cost,
    ) -> Result<f32, CreatureError> {
        let mut network = Network::new(self);
        let mut error = 0.0;
        for _ in 0..config.epochs.max(1) {
            network.clear();
            error = network.train_epoch(samples, config, cost);
        }
        network.write_back(self)?;
        self.score = None;
        Ok(error)
    }
}
