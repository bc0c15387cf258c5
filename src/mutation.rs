//! Structural and parametric mutation operators.
//!
//! Each operator samples among legal candidates. When there is no legal
//! candidate, or rejection sampling fails `attempts` times, the operator
//! does nothing and reports `false`. Structural operators are followed by
//! [`Creature::fix`], and by [`Creature::validate`] when
//! [`MutationConfig::debug_validate`] is set.

use std::collections::HashSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::activation::Activation;
use crate::gene::{ConnectionId, ConnectionKind, NodeId, NodeKind};
use crate::genome::{Creature, CreatureError};

/// Mutation operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mutation {
    AddNode,
    SubNode,
    AddConn,
    SubConn,
    ModWeight,
    ModBias,
    ModActivation,
    AddSelfConn,
    SubSelfConn,
    AddGate,
    SubGate,
    AddBackConn,
    SubBackConn,
    SwapNodes,
}

impl Mutation {
    /// Every operator.
    pub const ALL: [Self; 14] = [
        Self::AddNode,
        Self::SubNode,
        Self::AddConn,
        Self::SubConn,
        Self::ModWeight,
        Self::ModBias,
        Self::ModActivation,
        Self::AddSelfConn,
        Self::SubSelfConn,
        Self::AddGate,
        Self::SubGate,
        Self::AddBackConn,
        Self::SubBackConn,
        Self::SwapNodes,
    ];

    /// Operators that never introduce recurrence or gating.
    pub const FEED_FORWARD: [Self; 8] = [
        Self::AddNode,
        Self::SubNode,
        Self::AddConn,
        Self::SubConn,
        Self::ModWeight,
        Self::ModBias,
        Self::ModActivation,
        Self::SwapNodes,
    ];

    /// Whether the operator edits the graph.
    #[must_use]
    pub const fn is_structural(self) -> bool {
        !matches!(
            self,
            Self::ModWeight | Self::ModBias | Self::ModActivation | Self::SwapNodes
        )
    }
}

/// Mutation limits and magnitudes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationConfig {
    /// Upper bound on node count.
    pub max_nodes: usize,
    /// Upper bound on connection count.
    pub max_connections: usize,
    /// Upper bound on gated connections.
    pub max_gates: usize,
    /// Rejection-sampling attempts before an operator gives up.
    pub attempts: usize,
    /// `MOD_WEIGHT` adds a delta from `[-weight_delta, weight_delta]`.
    pub weight_delta: f32,
    /// `MOD_BIAS` adds a delta from `[-bias_delta, bias_delta]`.
    pub bias_delta: f32,
    /// Operators picked by random mutation.
    pub allowed: Vec<Mutation>,
    /// Squashes for new hidden nodes and `MOD_ACTIVATION`.
    pub squashes: Vec<Activation>,
    /// Whether `MOD_ACTIVATION` may change output squashes.
    pub mutate_output: bool,
    /// Restrict node-level operators in random mutation to the nodes
    /// feeding this output.
    #[serde(default)]
    pub focus_output: Option<usize>,
    /// Validate after every mutation.
    pub debug_validate: bool,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            max_nodes: usize::MAX,
            max_connections: usize::MAX,
            max_gates: usize::MAX,
            attempts: 12,
            weight_delta: 1.0,
            bias_delta: 1.0,
            allowed: Mutation::ALL.to_vec(),
            squashes: Activation::MUTABLE.to_vec(),
            mutate_output: true,
            focus_output: None,
            debug_validate: false,
        }
    }
}

impl MutationConfig {
    /// Config restricted to feed-forward operators.
    #[must_use]
    pub fn feed_forward() -> Self {
        Self {
            allowed: Mutation::FEED_FORWARD.to_vec(),
            ..Default::default()
        }
    }
}

fn pick<T: Copy, R: Rng>(items: &[T], rng: &mut R) -> Option<T> {
    if items.is_empty() {
        None
    } else {
        Some(items[rng.random_range(0..items.len())])
    }
}

fn symmetric<R: Rng>(bound: f32, rng: &mut R) -> f32 {
    let bound = bound.abs();
    if bound == 0.0 {
        0.0
    } else {
        rng.random_range(-bound..=bound)
    }
}

impl Creature {
    /// Apply one mutation. Returns whether anything changed.
    pub fn mutate<R: Rng>(
        &mut self,
        mutation: Mutation,
        config: &MutationConfig,
        rng: &mut R,
    ) -> Result<bool, CreatureError> {
        self.mutate_with_focus(mutation, config, None, rng)
    }

    /// Apply one mutation, restricting node-level operators (`SUB_NODE`,
    /// `MOD_BIAS`, `MOD_ACTIVATION`) to `focus` when given.
    pub fn mutate_with_focus<R: Rng>(
        &mut self,
        mutation: Mutation,
        config: &MutationConfig,
        focus: Option<&HashSet<NodeId>>,
        rng: &mut R,
    ) -> Result<bool, CreatureError> {
        let changed = match mutation {
            Mutation::AddNode => self.add_node_mutation(config, rng)?,
            Mutation::SubNode => self.sub_node_mutation(focus, rng)?,
            Mutation::AddConn => self.add_conn_mutation(config, false, rng)?,
            Mutation::SubConn => self.sub_conn_mutation(false, rng)?,
            Mutation::ModWeight => self.mod_weight_mutation(config, rng),
            Mutation::ModBias => self.mod_bias_mutation(config, focus, rng)?,
            Mutation::ModActivation => self.mod_activation_mutation(config, focus, rng)?,
            Mutation::AddSelfConn => self.add_self_conn_mutation(config, rng)?,
            Mutation::SubSelfConn => self.sub_self_conn_mutation(rng)?,
            Mutation::AddGate => self.add_gate_mutation(config, rng),
            Mutation::SubGate => self.sub_gate_mutation(rng),
            Mutation::AddBackConn => self.add_conn_mutation(config, true, rng)?,
            Mutation::SubBackConn => self.sub_conn_mutation(true, rng)?,
            Mutation::SwapNodes => self.swap_nodes_mutation(rng)?,
        };

        if changed {
            if mutation.is_structural() {
                self.fix();
            }
            if config.debug_validate {
                self.validate(None)?;
            }
        }
        Ok(changed)
    }

    /// Apply `amount` mutations drawn from `config.allowed`, focused on
    /// `config.focus_output` when set.
    ///
    /// Returns how many of them changed the creature.
    pub fn mutate_random<R: Rng>(
        &mut self,
        config: &MutationConfig,
        amount: usize,
        rng: &mut R,
    ) -> Result<usize, CreatureError> {
        let mut applied = 0;
        for _ in 0..amount {
            let Some(mutation) = pick(&config.allowed, rng) else {
                break;
            };
            let focus = config
                .focus_output
                .filter(|&o| o < self.output_count())
                .map(|o| self.inward_focus(o));
            if self.mutate_with_focus(mutation, config, focus.as_ref(), rng)? {
                applied += 1;
            }
        }
        if applied > 0 {
            self.score = None;
        }
        Ok(applied)
    }

    fn add_node_mutation<R: Rng>(
        &mut self,
        config: &MutationConfig,
        rng: &mut R,
    ) -> Result<bool, CreatureError> {
        if self.node_count() >= config.max_nodes
            || self.connection_count().saturating_add(2) > config.max_connections
        {
            return Ok(false);
        }
        // Conditional nodes need typed inputs a fresh node does not have.
        let Some(squash) = pick(&config.squashes, rng).filter(|&s| s != Activation::If) else {
            return Ok(false);
        };

        let pos = rng.random_range(self.input_count()..=self.output_start());
        let bias = rng.random_range(-0.1..0.1);
        self.insert_hidden(pos, squash, bias)?;

        // Everything before `pos` is an input, hidden or constant node.
        let from = rng.random_range(0..pos);
        let targets: Vec<usize> = (pos + 1..self.node_count())
            .filter(|&p| self.kind(p) != Some(NodeKind::Constant))
            .collect();
        let Some(to) = pick(&targets, rng) else {
            self.remove_node(pos)?;
            return Ok(false);
        };
        self.connect(from, pos, rng.random_range(-1.0..1.0), None)?;
        self.connect(pos, to, rng.random_range(-1.0..1.0), None)?;
        Ok(true)
    }

    fn sub_node_mutation<R: Rng>(
        &mut self,
        focus: Option<&HashSet<NodeId>>,
        rng: &mut R,
    ) -> Result<bool, CreatureError> {
        let candidates: Vec<usize> = (self.input_count()..self.output_start())
            .filter(|&p| in_focus(self, p, focus))
            .collect();
        let Some(pos) = pick(&candidates, rng) else {
            return Ok(false);
        };
        self.remove_node(pos)?;
        Ok(true)
    }

    fn add_conn_mutation<R: Rng>(
        &mut self,
        config: &MutationConfig,
        backward: bool,
        rng: &mut R,
    ) -> Result<bool, CreatureError> {
        if self.connection_count() >= config.max_connections {
            return Ok(false);
        }
        let len = self.node_count();
        let output_start = self.output_start();

        for _ in 0..config.attempts {
            let (from, to) = if backward {
                // Both ends strictly between the boundaries.
                if output_start < self.input_count() + 2 {
                    return Ok(false);
                }
                let from = rng.random_range(self.input_count() + 1..output_start);
                let to = rng.random_range(self.input_count()..from);
                (from, to)
            } else {
                let from = rng.random_range(0..output_start);
                let to = rng.random_range((from + 1).max(self.input_count())..len);
                (from, to)
            };
            if self.can_connect(from, to).is_ok() {
                self.connect(from, to, rng.random_range(-1.0..1.0), None)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn sub_conn_mutation<R: Rng>(
        &mut self,
        backward: bool,
        rng: &mut R,
    ) -> Result<bool, CreatureError> {
        let graph = self.graph();
        let candidates: Vec<(usize, usize)> = self
            .links()
            .into_iter()
            .filter(|l| if backward { l.from > l.to } else { l.from < l.to })
            .filter(|l| {
                let source_ok =
                    graph.outbound(l.from).len() > 1 || !graph.gated(l.from).is_empty();
                let target_ok = graph.inbound(l.to).len() > 1
                    && !self.is_last_typed_input(&graph, l.to, l.kind);
                source_ok && target_ok
            })
            .map(|l| (l.from, l.to))
            .collect();
        drop(graph);

        let Some((from, to)) = pick(&candidates, rng) else {
            return Ok(false);
        };
        self.disconnect(from, to)?;
        Ok(true)
    }

    /// Whether removing an inbound connection of `kind` would leave the
    /// conditional node at `pos` without that kind of input.
    fn is_last_typed_input(
        &self,
        graph: &crate::topology::GraphIndex,
        pos: usize,
        kind: Option<ConnectionKind>,
    ) -> bool {
        if self.node(pos).map(|n| n.squash) != Some(Activation::If) {
            return false;
        }
        let role = |k: Option<ConnectionKind>| k.unwrap_or(ConnectionKind::Positive);
        graph
            .inbound(pos)
            .iter()
            .filter_map(|&id| self.connection(id))
            .filter(|c| role(c.kind) == role(kind))
            .count()
            <= 1
    }

    fn mod_weight_mutation<R: Rng>(&mut self, config: &MutationConfig, rng: &mut R) -> bool {
        let ids: Vec<ConnectionId> = self.connections.keys().collect();
        let Some(id) = pick(&ids, rng) else {
            return false;
        };
        let delta = symmetric(config.weight_delta, rng);
        if let Some(conn) = self.connections.get_mut(id) {
            conn.weight += delta;
        }
        true
    }

    fn mod_bias_mutation<R: Rng>(
        &mut self,
        config: &MutationConfig,
        focus: Option<&HashSet<NodeId>>,
        rng: &mut R,
    ) -> Result<bool, CreatureError> {
        let candidates: Vec<usize> = (self.input_count()..self.node_count())
            .filter(|&p| in_focus(self, p, focus))
            .collect();
        let Some(pos) = pick(&candidates, rng) else {
            return Ok(false);
        };
        let bias = self.node(pos).map_or(0.0, |n| n.bias);
        self.set_bias(pos, bias + symmetric(config.bias_delta, rng))?;
        Ok(true)
    }

    fn mod_activation_mutation<R: Rng>(
        &mut self,
        config: &MutationConfig,
        focus: Option<&HashSet<NodeId>>,
        rng: &mut R,
    ) -> Result<bool, CreatureError> {
        let end = if config.mutate_output {
            self.node_count()
        } else {
            self.output_start()
        };
        let candidates: Vec<usize> = (self.input_count()..end)
            .filter(|&p| {
                self.node(p).is_some_and(|n| {
                    n.kind.has_squash() && n.squash != Activation::If
                }) && in_focus(self, p, focus)
            })
            .collect();
        let Some(pos) = pick(&candidates, rng) else {
            return Ok(false);
        };
        let current = self.node(pos).map(|n| n.squash);
        for _ in 0..config.attempts {
            let Some(squash) = pick(&config.squashes, rng) else {
                return Ok(false);
            };
            if Some(squash) != current && squash != Activation::If {
                self.set_squash(pos, squash)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn add_self_conn_mutation<R: Rng>(
        &mut self,
        config: &MutationConfig,
        rng: &mut R,
    ) -> Result<bool, CreatureError> {
        if self.connection_count() >= config.max_connections {
            return Ok(false);
        }
        let graph = self.graph();
        let candidates: Vec<usize> = (self.input_count()..self.node_count())
            .filter(|&p| {
                self.kind(p).is_some_and(|k| k.has_squash()) && graph.self_connection(p).is_none()
            })
            .collect();
        drop(graph);
        let Some(pos) = pick(&candidates, rng) else {
            return Ok(false);
        };
        self.connect(pos, pos, rng.random_range(-1.0..1.0), None)?;
        Ok(true)
    }

    fn sub_self_conn_mutation<R: Rng>(&mut self, rng: &mut R) -> Result<bool, CreatureError> {
        let graph = self.graph();
        let candidates: Vec<usize> = (0..self.node_count())
            .filter(|&p| graph.self_connection(p).is_some())
            .collect();
        drop(graph);
        let Some(pos) = pick(&candidates, rng) else {
            return Ok(false);
        };
        self.disconnect(pos, pos)?;
        Ok(true)
    }

    fn add_gate_mutation<R: Rng>(&mut self, config: &MutationConfig, rng: &mut R) -> bool {
        if self.gate_count() >= config.max_gates {
            return false;
        }
        let ungated: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, c)| c.gater.is_none())
            .map(|(id, _)| id)
            .collect();
        let gaters: Vec<NodeId> = self.order[self.input_count()..].to_vec();
        let (Some(conn), Some(gater)) = (pick(&ungated, rng), pick(&gaters, rng)) else {
            return false;
        };
        self.set_gater(conn, Some(gater));
        true
    }

    fn sub_gate_mutation<R: Rng>(&mut self, rng: &mut R) -> bool {
        let gated: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, c)| c.gater.is_some())
            .map(|(id, _)| id)
            .collect();
        let Some(conn) = pick(&gated, rng) else {
            return false;
        };
        self.set_gater(conn, None);
        true
    }

    fn swap_nodes_mutation<R: Rng>(&mut self, rng: &mut R) -> Result<bool, CreatureError> {
        let hidden: Vec<usize> = (self.input_count()..self.output_start())
            .filter(|&p| {
                self.node(p)
                    .is_some_and(|n| n.kind == NodeKind::Hidden && n.squash != Activation::If)
            })
            .collect();
        if hidden.len() < 2 {
            return Ok(false);
        }
        let i = rng.random_range(0..hidden.len());
        let mut j = rng.random_range(0..hidden.len() - 1);
        if j >= i {
            j += 1;
        }
        let (a, b) = (hidden[i], hidden[j]);
        let (Some(na), Some(nb)) = (self.node(a).cloned(), self.node(b).cloned()) else {
            return Ok(false);
        };
        self.set_bias(a, nb.bias)?;
        self.set_squash(a, nb.squash)?;
        self.set_bias(b, na.bias)?;
        self.set_squash(b, na.squash)?;
        Ok(true)
    }
}

fn in_focus(creature: &Creature, pos: usize, focus: Option<&HashSet<NodeId>>) -> bool {
    match (focus, creature.node_id(pos)) {
        (None, _) => true,
        (Some(set), Some(id)) => set.contains(&id),
        (Some(_), None) => false,
    }
}
