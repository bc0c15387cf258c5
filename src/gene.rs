//! Gene types for creature genomes.
//!
//! This module defines the building blocks of a creature:
//! - [`NodeGene`]: a computational node (input, hidden, output or constant)
//! - [`ConnectionGene`]: a weighted, optionally gated link between two nodes
//!
//! Genes are addressed by stable arena handles ([`NodeId`], [`ConnectionId`]).
//! A node's *position* (its index in the genome's node order) is derived
//! from the genome and may change when nodes are inserted or removed; the
//! handle never does.

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use uuid::Uuid;

use crate::activation::Activation;

new_key_type! {
    /// Stable handle of a node within one genome.
    pub struct NodeId;

    /// Stable handle of a connection within one genome.
    pub struct ConnectionId;
}

/// The role of a node in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Receives an external value; no bias, no squash.
    Input,
    /// Internal node added through mutation.
    Hidden,
    /// Produces one component of the network output.
    Output,
    /// Emits its bias unchanged; never has inbound connections.
    Constant,
}

impl NodeKind {
    /// Whether nodes of this kind carry a bias.
    #[must_use]
    pub const fn has_bias(self) -> bool {
        !matches!(self, Self::Input)
    }

    /// Whether nodes of this kind carry a squash.
    #[must_use]
    pub const fn has_squash(self) -> bool {
        matches!(self, Self::Hidden | Self::Output)
    }
}

/// A node gene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeGene {
    /// Content-independent identity, stable across generations.
    pub uuid: Uuid,
    /// Role of this node.
    pub kind: NodeKind,
    /// Bias added to the node state (ignored for inputs).
    pub bias: f32,
    /// Activation applied to the node state (ignored for inputs and constants).
    pub squash: Activation,
}

impl NodeGene {
    /// Create a new input node.
    #[must_use]
    pub fn input() -> Self {
        Self {
            uuid: Uuid::new_v4(),
            kind: NodeKind::Input,
            bias: 0.0,
            squash: Activation::Identity,
        }
    }

    /// Create a new output node.
    #[must_use]
    pub fn output(squash: Activation, bias: f32) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            kind: NodeKind::Output,
            bias,
            squash,
        }
    }

    /// Create a new hidden node.
    #[must_use]
    pub fn hidden(squash: Activation, bias: f32) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            kind: NodeKind::Hidden,
            bias,
            squash,
        }
    }

    /// Create a constant node emitting `bias`.
    #[must_use]
    pub fn constant(bias: f32) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            kind: NodeKind::Constant,
            bias,
            squash: Activation::Identity,
        }
    }
}

/// Role of a connection feeding an `If` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    /// Contributes to the branch chosen when the condition holds.
    Positive,
    /// Contributes to the branch chosen when the condition fails.
    Negative,
    /// Contributes to the condition sum.
    Condition,
}

/// A connection gene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionGene {
    /// Source node.
    pub from: NodeId,
    /// Target node.
    pub to: NodeId,
    /// Connection weight.
    pub weight: f32,
    /// Node whose activation scales this connection, if any.
    pub gater: Option<NodeId>,
    /// Role when the target is an `If` node.
    pub kind: Option<ConnectionKind>,
}

impl ConnectionGene {
    /// Create a new ungated connection.
    #[must_use]
    pub fn new(from: NodeId, to: NodeId, weight: f32) -> Self {
        Self {
            from,
            to,
            weight,
            gater: None,
            kind: None,
        }
    }

    /// Whether this is a self-connection.
    #[must_use]
    pub fn is_self(&self) -> bool {
        self.from == self.to
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_gene_creation() {
        let input = NodeGene::input();
        assert_eq!(input.kind, NodeKind::Input);
        assert!(!input.kind.has_bias());

        let output = NodeGene::output(Activation::Logistic, 0.5);
        assert_eq!(output.kind, NodeKind::Output);
        assert_eq!(output.squash, Activation::Logistic);

        let hidden = NodeGene::hidden(Activation::Tanh, 0.0);
        assert_eq!(hidden.kind, NodeKind::Hidden);
        assert!(hidden.kind.has_squash());

        let constant = NodeGene::constant(1.0);
        assert_eq!(constant.kind, NodeKind::Constant);
        assert!(!constant.kind.has_squash());
        assert!((constant.bias - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_uuids_are_unique() {
        assert_ne!(NodeGene::input().uuid, NodeGene::input().uuid);
    }

    #[test]
    fn test_connection_gene_creation() {
        use slotmap::SlotMap;

        let mut nodes: SlotMap<NodeId, NodeGene> = SlotMap::with_key();
        let n1 = nodes.insert(NodeGene::input());
        let n2 = nodes.insert(NodeGene::output(Activation::Identity, 0.0));

        let conn = ConnectionGene::new(n1, n2, 0.5);
        assert_eq!(conn.from, n1);
        assert_eq!(conn.to, n2);
        assert!(conn.gater.is_none());
        assert!(!conn.is_self());
        assert!(ConnectionGene::new(n2, n2, 1.0).is_self());
    }
}
