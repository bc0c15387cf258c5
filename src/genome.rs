//! Creature genome with arena-allocated nodes and connections.
//!
//! A [`Creature`] stores its genes in `SlotMap` arenas addressed by stable
//! handles, plus a separate node order. A node's *position* is its index in
//! that order:
//!
//! - positions `[0, inputs)` are exactly the input nodes,
//! - positions `[len - outputs, len)` are exactly the output nodes,
//! - everything in between is hidden or constant.
//!
//! Inserting or removing a node only edits the order; connections keep
//! pointing at handles, so nothing has to be renumbered.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};

use rand::Rng;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::activation::Activation;
use crate::gene::{ConnectionGene, ConnectionId, ConnectionKind, NodeGene, NodeId, NodeKind};
use crate::topology::GraphIndex;

/// Configuration for creature creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatureConfig {
    /// Number of input nodes.
    pub inputs: usize,
    /// Number of output nodes.
    pub outputs: usize,
    /// Squash of newly created output nodes.
    pub output_squash: Activation,
    /// Squashes to choose from for hidden nodes.
    pub hidden_squashes: Vec<Activation>,
    /// Range for initial weights: `[-weight_range, weight_range]`.
    pub weight_range: f32,
}

impl Default for CreatureConfig {
    fn default() -> Self {
        Self {
            inputs: 2,
            outputs: 1,
            output_squash: Activation::Logistic,
            hidden_squashes: Activation::MUTABLE.to_vec(),
            weight_range: 1.0,
        }
    }
}

impl CreatureConfig {
    /// Config with the given shape and default squashes.
    #[must_use]
    pub fn new(inputs: usize, outputs: usize) -> Self {
        Self {
            inputs,
            outputs,
            ..Default::default()
        }
    }

    /// Config for regression-style networks with identity outputs.
    #[must_use]
    pub fn linear(inputs: usize, outputs: usize) -> Self {
        Self {
            inputs,
            outputs,
            output_squash: Activation::Identity,
            ..Default::default()
        }
    }
}

/// Errors raised by genome operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CreatureError {
    #[error("position {position} out of range for creature with {len} nodes")]
    PositionOutOfRange { position: usize, len: usize },
    #[error("connection {from} -> {to} already exists")]
    DuplicateConnection { from: usize, to: usize },
    #[error("illegal connection {from} -> {to}: {reason}")]
    IllegalConnection {
        from: usize,
        to: usize,
        reason: &'static str,
    },
    #[error("no connection {from} -> {to}")]
    NoSuchConnection { from: usize, to: usize },
    #[error("node at {position} cannot gate: {reason}")]
    IllegalGater {
        position: usize,
        reason: &'static str,
    },
    #[error("node at {position} is {kind:?}: {reason}")]
    WrongKind {
        position: usize,
        kind: NodeKind,
        reason: &'static str,
    },
    #[error("invalid creature: {0}")]
    Invalid(String),
    #[error("invalid export: {0}")]
    Export(String),
}

/// Expected sizes checked by [`Creature::validate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Expected {
    pub nodes: Option<usize>,
    pub connections: Option<usize>,
}

/// Positional view of one connection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Link {
    pub id: ConnectionId,
    pub from: usize,
    pub to: usize,
    pub weight: f32,
    pub gater: Option<usize>,
    pub kind: Option<ConnectionKind>,
}

/// An evolvable graph of computational nodes.
///
/// Serializes through the positional [`CreatureExport`] form.
///
/// [`CreatureExport`]: crate::export::CreatureExport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    into = "crate::export::CreatureExport",
    try_from = "crate::export::CreatureExport"
)]
pub struct Creature {
    pub(crate) nodes: SlotMap<NodeId, NodeGene>,
    pub(crate) connections: SlotMap<ConnectionId, ConnectionGene>,
    /// Node handles in position order.
    pub(crate) order: Vec<NodeId>,
    pub(crate) input: usize,
    pub(crate) output: usize,
    /// Fitness score, `None` until evaluated.
    pub score: Option<f32>,
    /// Free-form provenance tags.
    pub tags: BTreeMap<String, String>,
    /// Bumped on every structural edit.
    pub(crate) generation: u64,
    index: Option<GraphIndex>,
}

impl Creature {
    /// Create a creature with only input and output nodes and no connections.
    ///
    /// The result does not satisfy the output-connectivity invariant until
    /// its outputs are connected.
    #[must_use]
    pub fn minimal(config: &CreatureConfig) -> Self {
        let mut nodes: SlotMap<NodeId, NodeGene> = SlotMap::with_key();
        let mut order = Vec::with_capacity(config.inputs + config.outputs);

        for _ in 0..config.inputs {
            order.push(nodes.insert(NodeGene::input()));
        }
        for _ in 0..config.outputs {
            order.push(nodes.insert(NodeGene::output(config.output_squash, 0.0)));
        }

        Self {
            nodes,
            connections: SlotMap::with_key(),
            order,
            input: config.inputs,
            output: config.outputs,
            score: None,
            tags: BTreeMap::new(),
            generation: 0,
            index: None,
        }
    }

    /// Create a creature with every input connected to every output.
    ///
    /// # Panics
    ///
    /// Panics if the config has zero inputs or zero outputs.
    #[must_use]
    pub fn new<R: Rng>(config: &CreatureConfig, rng: &mut R) -> Self {
        assert!(
            config.inputs > 0 && config.outputs > 0,
            "a creature needs at least one input and one output"
        );
        let mut creature = Self::minimal(config);
        let range = config.weight_range.abs().max(f32::EPSILON);

        for from in 0..config.inputs {
            for o in 0..config.outputs {
                let to = config.inputs + o;
                let weight = rng.random_range(-range..range);
                let from_id = creature.order[from];
                let to_id = creature.order[to];
                creature
                    .connections
                    .insert(ConnectionGene::new(from_id, to_id, weight));
            }
        }

        creature.touch();
        creature
    }

    /// Assemble a creature from parts; used by import and crossover.
    pub(crate) fn from_parts(
        nodes: SlotMap<NodeId, NodeGene>,
        connections: SlotMap<ConnectionId, ConnectionGene>,
        order: Vec<NodeId>,
        input: usize,
        output: usize,
    ) -> Self {
        Self {
            nodes,
            connections,
            order,
            input,
            output,
            score: None,
            tags: BTreeMap::new(),
            generation: 0,
            index: None,
        }
    }

    /// Record a structural edit.
    #[inline]
    pub(crate) fn touch(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    /// Current structural generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    // ------------------------------------------------------------------
    // Shape
    // ------------------------------------------------------------------

    /// Number of input nodes.
    #[must_use]
    pub fn input_count(&self) -> usize {
        self.input
    }

    /// Number of output nodes.
    #[must_use]
    pub fn output_count(&self) -> usize {
        self.output
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.order.len()
    }

    /// Number of connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of hidden and constant nodes.
    #[must_use]
    pub fn hidden_count(&self) -> usize {
        self.order.len() - self.input - self.output
    }

    /// Number of gated connections.
    #[must_use]
    pub fn gate_count(&self) -> usize {
        self.connections.values().filter(|c| c.gater.is_some()).count()
    }

    /// Structural size used by the growth penalty.
    #[must_use]
    pub fn complexity(&self) -> usize {
        self.hidden_count() + self.connection_count() + self.gate_count()
    }

    /// First output position.
    #[inline]
    #[must_use]
    pub fn output_start(&self) -> usize {
        self.order.len() - self.output
    }

    // ------------------------------------------------------------------
    // Node access
    // ------------------------------------------------------------------

    /// Node gene at `pos`.
    #[must_use]
    pub fn node(&self, pos: usize) -> Option<&NodeGene> {
        self.order.get(pos).map(|&id| &self.nodes[id])
    }

    /// Handle of the node at `pos`.
    #[must_use]
    pub fn node_id(&self, pos: usize) -> Option<NodeId> {
        self.order.get(pos).copied()
    }

    /// Node genes in position order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeGene> + '_ {
        self.order.iter().map(move |&id| &self.nodes[id])
    }

    /// Connection gene by handle.
    #[must_use]
    pub fn connection(&self, id: ConnectionId) -> Option<&ConnectionGene> {
        self.connections.get(id)
    }

    /// Kind of the node at `pos`.
    #[must_use]
    pub fn kind(&self, pos: usize) -> Option<NodeKind> {
        self.node(pos).map(|n| n.kind)
    }

    fn check_position(&self, pos: usize) -> Result<NodeId, CreatureError> {
        self.node_id(pos).ok_or(CreatureError::PositionOutOfRange {
            position: pos,
            len: self.order.len(),
        })
    }

    /// Set the bias of the node at `pos`.
    pub fn set_bias(&mut self, pos: usize, bias: f32) -> Result<(), CreatureError> {
        let id = self.check_position(pos)?;
        let node = &mut self.nodes[id];
        if !node.kind.has_bias() {
            return Err(CreatureError::WrongKind {
                position: pos,
                kind: node.kind,
                reason: "input nodes have no bias",
            });
        }
        node.bias = bias;
        Ok(())
    }

    /// Set the squash of the node at `pos`.
    pub fn set_squash(&mut self, pos: usize, squash: Activation) -> Result<(), CreatureError> {
        let id = self.check_position(pos)?;
        let node = &mut self.nodes[id];
        if !node.kind.has_squash() {
            return Err(CreatureError::WrongKind {
                position: pos,
                kind: node.kind,
                reason: "only hidden and output nodes have a squash",
            });
        }
        node.squash = squash;
        Ok(())
    }

    /// Set the weight of a connection.
    pub fn set_weight(&mut self, id: ConnectionId, weight: f32) -> Option<()> {
        self.connections.get_mut(id).map(|c| c.weight = weight)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut NodeGene> {
        self.nodes.get_mut(id)
    }

    // ------------------------------------------------------------------
    // Indexed lookups
    // ------------------------------------------------------------------

    /// Connection index for the current structure.
    ///
    /// Borrows the cached index when it is current, otherwise builds a
    /// fresh one without caching it.
    #[must_use]
    pub fn graph(&self) -> Cow<'_, GraphIndex> {
        match &self.index {
            Some(index) if index.generation() == self.generation => Cow::Borrowed(index),
            _ => Cow::Owned(GraphIndex::build(self)),
        }
    }

    /// Connection index for the current structure, rebuilding the cache if stale.
    pub fn refresh(&mut self) -> &GraphIndex {
        let index = match self.index.take() {
            Some(index) if index.generation() == self.generation => index,
            _ => GraphIndex::build(self),
        };
        self.index.insert(index)
    }

    /// Non-self connections targeting the node at `pos`.
    pub fn to_connections(&mut self, pos: usize) -> &[ConnectionId] {
        self.refresh().inbound(pos)
    }

    /// Non-self connections leaving the node at `pos`.
    pub fn from_connections(&mut self, pos: usize) -> &[ConnectionId] {
        self.refresh().outbound(pos)
    }

    /// Connections gated by the node at `pos`.
    pub fn gate_connections(&mut self, pos: usize) -> &[ConnectionId] {
        self.refresh().gated(pos)
    }

    /// Self-connection of the node at `pos`.
    pub fn self_connection(&mut self, pos: usize) -> Option<ConnectionId> {
        self.refresh().self_connection(pos)
    }

    /// Find the connection `from -> to`.
    #[must_use]
    pub fn find_connection(&self, from: usize, to: usize) -> Option<ConnectionId> {
        let from_id = self.node_id(from)?;
        let to_id = self.node_id(to)?;
        self.connections
            .iter()
            .find(|(_, c)| c.from == from_id && c.to == to_id)
            .map(|(id, _)| id)
    }

    /// Positional view of all connections, ascending by `(from, to)`.
    #[must_use]
    pub fn links(&self) -> Vec<Link> {
        let graph = self.graph();
        graph
            .sorted()
            .iter()
            .filter_map(|&id| {
                let c = &self.connections[id];
                Some(Link {
                    id,
                    from: graph.position(c.from)?,
                    to: graph.position(c.to)?,
                    weight: c.weight,
                    gater: c.gater.and_then(|g| graph.position(g)),
                    kind: c.kind,
                })
            })
            .collect()
    }

    /// Positions reachable backwards from output `output_index`.
    ///
    /// Returns node handles so the set stays meaningful while the focused
    /// nodes are being mutated.
    #[must_use]
    pub fn inward_focus(&self, output_index: usize) -> HashSet<NodeId> {
        let graph = self.graph();
        let start = self.output_start() + output_index;
        graph
            .walk_inward(self, start)
            .into_iter()
            .map(|p| self.order[p])
            .collect()
    }

    // ------------------------------------------------------------------
    // Structural edits
    // ------------------------------------------------------------------

    /// Check that `from -> to` would be a legal connection.
    pub fn can_connect(&self, from: usize, to: usize) -> Result<(), CreatureError> {
        let from_id = self.check_position(from)?;
        let to_id = self.check_position(to)?;
        let from_kind = self.nodes[from_id].kind;
        let to_kind = self.nodes[to_id].kind;

        if matches!(to_kind, NodeKind::Input | NodeKind::Constant) {
            return Err(CreatureError::IllegalConnection {
                from,
                to,
                reason: "inputs and constants cannot be targeted",
            });
        }
        if from_kind == NodeKind::Output && from != to {
            return Err(CreatureError::IllegalConnection {
                from,
                to,
                reason: "outputs only project to themselves",
            });
        }
        if self
            .connections
            .values()
            .any(|c| c.from == from_id && c.to == to_id)
        {
            return Err(CreatureError::DuplicateConnection { from, to });
        }
        Ok(())
    }

    /// Add the connection `from -> to`.
    ///
    /// Forward (`from < to`), self (`from == to`) and backward (`from > to`)
    /// connections are all accepted as long as the target is not an input or
    /// constant and the source is not an output (self-loops excepted).
    pub fn connect(
        &mut self,
        from: usize,
        to: usize,
        weight: f32,
        kind: Option<ConnectionKind>,
    ) -> Result<ConnectionId, CreatureError> {
        self.can_connect(from, to)?;
        let mut gene = ConnectionGene::new(self.order[from], self.order[to], weight);
        gene.kind = kind;
        let id = self.connections.insert(gene);
        self.touch();
        Ok(id)
    }

    /// Remove the connection `from -> to`.
    pub fn disconnect(&mut self, from: usize, to: usize) -> Result<ConnectionGene, CreatureError> {
        let id = self
            .find_connection(from, to)
            .ok_or(CreatureError::NoSuchConnection { from, to })?;
        let gene = self
            .connections
            .remove(id)
            .ok_or(CreatureError::NoSuchConnection { from, to })?;
        self.touch();
        Ok(gene)
    }

    /// Set or clear the gater of connection `from -> to`.
    pub fn gate(
        &mut self,
        from: usize,
        to: usize,
        gater: Option<usize>,
    ) -> Result<(), CreatureError> {
        let id = self
            .find_connection(from, to)
            .ok_or(CreatureError::NoSuchConnection { from, to })?;
        let gater_id = match gater {
            Some(g) => {
                let gid = self.check_position(g)?;
                if self.nodes[gid].kind == NodeKind::Input {
                    return Err(CreatureError::IllegalGater {
                        position: g,
                        reason: "input nodes cannot gate",
                    });
                }
                Some(gid)
            }
            None => None,
        };
        self.connections[id].gater = gater_id;
        self.touch();
        Ok(())
    }

    pub(crate) fn set_gater(&mut self, id: ConnectionId, gater: Option<NodeId>) {
        if let Some(conn) = self.connections.get_mut(id) {
            conn.gater = gater;
            self.touch();
        }
    }

    pub(crate) fn remove_connection(&mut self, id: ConnectionId) -> Option<ConnectionGene> {
        let gene = self.connections.remove(id);
        if gene.is_some() {
            self.touch();
        }
        gene
    }

    fn check_interior(&self, pos: usize) -> Result<(), CreatureError> {
        if pos < self.input || pos > self.output_start() {
            return Err(CreatureError::PositionOutOfRange {
                position: pos,
                len: self.order.len(),
            });
        }
        Ok(())
    }

    /// Insert an unconnected hidden node at `pos`.
    ///
    /// `pos` must lie in `[inputs, len - outputs]`. The caller is expected
    /// to wire the node before the genome is validated.
    pub fn insert_hidden(
        &mut self,
        pos: usize,
        squash: Activation,
        bias: f32,
    ) -> Result<NodeId, CreatureError> {
        self.check_interior(pos)?;
        let id = self.nodes.insert(NodeGene::hidden(squash, bias));
        self.order.insert(pos, id);
        self.touch();
        Ok(id)
    }

    /// Insert an unconnected constant node at `pos`.
    pub fn insert_constant(&mut self, pos: usize, bias: f32) -> Result<NodeId, CreatureError> {
        self.check_interior(pos)?;
        let id = self.nodes.insert(NodeGene::constant(bias));
        self.order.insert(pos, id);
        self.touch();
        Ok(id)
    }

    /// Remove the hidden or constant node at `pos` with all its connections.
    ///
    /// Connections it gated become ungated. Other nodes shift down one
    /// position; their handles are unaffected.
    pub fn remove_node(&mut self, pos: usize) -> Result<NodeGene, CreatureError> {
        let id = self.check_position(pos)?;
        let kind = self.nodes[id].kind;
        if !matches!(kind, NodeKind::Hidden | NodeKind::Constant) {
            return Err(CreatureError::WrongKind {
                position: pos,
                kind,
                reason: "only hidden and constant nodes can be removed",
            });
        }
        self.order.remove(pos);
        self.purge_node(id);
        self.nodes
            .remove(id)
            .ok_or(CreatureError::Invalid(format!("node at {pos} missing")))
    }

    /// Drop every connection touching `id` and every gate held by it.
    fn purge_node(&mut self, id: NodeId) {
        self.connections.retain(|_, c| c.from != id && c.to != id);
        for conn in self.connections.values_mut() {
            if conn.gater == Some(id) {
                conn.gater = None;
            }
        }
        self.touch();
    }

    // ------------------------------------------------------------------
    // Invariants
    // ------------------------------------------------------------------

    /// Re-check every structural invariant.
    ///
    /// This is an assertion, not control flow: a failure indicates a bug in
    /// whatever produced the genome.
    pub fn validate(&self, expected: Option<Expected>) -> Result<(), CreatureError> {
        let invalid = |msg: String| Err(CreatureError::Invalid(msg));
        let len = self.order.len();

        if len != self.nodes.len() {
            return invalid(format!(
                "order has {len} entries but arena holds {} nodes",
                self.nodes.len()
            ));
        }
        if self.input + self.output > len {
            return invalid(format!(
                "{} inputs + {} outputs exceed {len} nodes",
                self.input, self.output
            ));
        }
        let mut seen = HashSet::with_capacity(len);
        for (pos, &id) in self.order.iter().enumerate() {
            let Some(node) = self.nodes.get(id) else {
                return invalid(format!("position {pos} refers to a missing node"));
            };
            if !seen.insert(id) {
                return invalid(format!("node at {pos} appears twice in the order"));
            }
            let expected_kind_ok = if pos < self.input {
                node.kind == NodeKind::Input
            } else if pos >= len - self.output {
                node.kind == NodeKind::Output
            } else {
                matches!(node.kind, NodeKind::Hidden | NodeKind::Constant)
            };
            if !expected_kind_ok {
                return invalid(format!("node at {pos} has misplaced kind {:?}", node.kind));
            }
        }

        let graph = self.graph();
        let mut pairs = HashSet::with_capacity(self.connections.len());
        for conn in self.connections.values() {
            let (Some(from), Some(to)) = (graph.position(conn.from), graph.position(conn.to))
            else {
                return invalid("connection with a dangling endpoint".to_string());
            };
            if !pairs.insert((from, to)) {
                return invalid(format!("duplicate connection {from} -> {to}"));
            }
            let from_kind = self.nodes[conn.from].kind;
            let to_kind = self.nodes[conn.to].kind;
            if matches!(to_kind, NodeKind::Input | NodeKind::Constant) {
                return invalid(format!("connection {from} -> {to} targets a {to_kind:?}"));
            }
            if from_kind == NodeKind::Output && from != to {
                return invalid(format!("output {from} projects to {to}"));
            }
            if let Some(gater) = conn.gater {
                match graph.position(gater) {
                    None => return invalid(format!("connection {from} -> {to} has a dangling gater")),
                    Some(g) if self.nodes[gater].kind == NodeKind::Input => {
                        return invalid(format!("input {g} gates {from} -> {to}"))
                    }
                    Some(_) => {}
                }
            }
        }

        for pos in 0..len {
            let node = &self.nodes[self.order[pos]];
            let inbound = graph.inbound(pos).len();
            let outbound = graph.outbound(pos).len();
            let gates = graph.gated(pos).len();
            match node.kind {
                NodeKind::Input => {}
                NodeKind::Hidden => {
                    if inbound == 0 {
                        return invalid(format!("hidden node {pos} has no inbound connection"));
                    }
                    if outbound == 0 && gates == 0 {
                        return invalid(format!("hidden node {pos} neither projects nor gates"));
                    }
                }
                NodeKind::Constant => {
                    if inbound > 0 || graph.self_connection(pos).is_some() {
                        return invalid(format!("constant node {pos} has inbound connections"));
                    }
                    if outbound == 0 && gates == 0 {
                        return invalid(format!("constant node {pos} neither projects nor gates"));
                    }
                }
                NodeKind::Output => {
                    if inbound == 0 {
                        return invalid(format!("output node {pos} has no inbound connection"));
                    }
                }
            }
            if node.squash == Activation::If && node.kind.has_squash() {
                let kinds = self.inbound_kinds(&graph, pos);
                if !(kinds.condition && kinds.positive && kinds.negative) {
                    return invalid(format!(
                        "conditional node {pos} lacks a condition, positive or negative input"
                    ));
                }
            }
        }

        if let Some(expected) = expected {
            if let Some(nodes) = expected.nodes {
                if nodes != len {
                    return invalid(format!("expected {nodes} nodes, found {len}"));
                }
            }
            if let Some(conns) = expected.connections {
                if conns != self.connections.len() {
                    return invalid(format!(
                        "expected {conns} connections, found {}",
                        self.connections.len()
                    ));
                }
            }
        }

        Ok(())
    }

    fn inbound_kinds(&self, graph: &GraphIndex, pos: usize) -> InboundKinds {
        let mut kinds = InboundKinds::default();
        for &cid in graph.inbound(pos) {
            match self.connections[cid].kind {
                Some(ConnectionKind::Condition) => kinds.condition = true,
                Some(ConnectionKind::Negative) => kinds.negative = true,
                Some(ConnectionKind::Positive) | None => kinds.positive = true,
            }
        }
        kinds
    }

    /// Repair pass run after structural mutation.
    ///
    /// 1. Drops connections with missing endpoints or an illegal direction
    ///    and clears gaters that are missing or inputs.
    /// 2. Repeatedly removes hidden and constant nodes that neither project
    ///    nor gate.
    /// 3. Gives hidden and output nodes left without inbound connections a
    ///    zero-weight connection, which leaves their behavior unchanged, and
    ///    completes the typed inputs of conditional nodes the same way.
    pub fn fix(&mut self) {
        self.drop_illegal_connections();

        loop {
            let graph = GraphIndex::build(self);
            let dead = (self.input..self.output_start()).find(|&pos| {
                graph.outbound(pos).is_empty() && graph.gated(pos).is_empty()
            });
            match dead {
                Some(pos) => {
                    let id = self.order.remove(pos);
                    self.purge_node(id);
                    self.nodes.remove(id);
                }
                None => break,
            }
        }

        self.reattach_orphans();
        self.touch();
    }

    fn drop_illegal_connections(&mut self) {
        let nodes = &self.nodes;
        let before = self.connections.len();
        self.connections.retain(|_, c| {
            let (Some(from), Some(to)) = (nodes.get(c.from), nodes.get(c.to)) else {
                return false;
            };
            if matches!(to.kind, NodeKind::Input | NodeKind::Constant) {
                return false;
            }
            !(from.kind == NodeKind::Output && c.from != c.to)
        });
        let mut changed = before != self.connections.len();

        for conn in self.connections.values_mut() {
            if let Some(g) = conn.gater {
                let legal = nodes.get(g).is_some_and(|n| n.kind != NodeKind::Input);
                if !legal {
                    conn.gater = None;
                    changed = true;
                }
            }
        }
        if changed {
            self.touch();
        }
    }

    fn reattach_orphans(&mut self) {
        let graph = GraphIndex::build(self);
        let mut additions: Vec<(usize, usize, Option<ConnectionKind>)> = Vec::new();
        let output_start = self.output_start();

        for pos in self.input..self.order.len() {
            let node = &self.nodes[self.order[pos]];
            let source = if node.kind == NodeKind::Output {
                output_start.saturating_sub(1)
            } else {
                0
            };
            match node.kind {
                NodeKind::Hidden | NodeKind::Output if graph.inbound(pos).is_empty() => {
                    additions.push((source, pos, None));
                }
                _ => {}
            }
            if node.squash == Activation::If && node.kind.has_squash() {
                let mut kinds = self.inbound_kinds(&graph, pos);
                if additions.iter().any(|&(_, to, _)| to == pos) {
                    kinds.positive = true;
                }
                let mut missing = Vec::new();
                if !kinds.condition {
                    missing.push(ConnectionKind::Condition);
                }
                if !kinds.negative {
                    missing.push(ConnectionKind::Negative);
                }
                if !kinds.positive {
                    missing.push(ConnectionKind::Positive);
                }
                let candidates: Vec<usize> = (0..pos)
                    .filter(|&s| {
                        self.nodes[self.order[s]].kind != NodeKind::Output
                            && !additions.iter().any(|&(f, t, _)| f == s && t == pos)
                            && !self
                                .connections
                                .values()
                                .any(|c| c.from == self.order[s] && c.to == self.order[pos])
                    })
                    .collect();
                for (kind, s) in missing.into_iter().zip(candidates) {
                    additions.push((s, pos, Some(kind)));
                }
            }
        }

        for (from, to, kind) in additions {
            let mut gene = ConnectionGene::new(self.order[from], self.order[to], 0.0);
            gene.kind = kind;
            self.connections.insert(gene);
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct InboundKinds {
    condition: bool,
    positive: bool,
    negative: bool,
}
