//! Portable genome format and content identity.
//!
//! The export lists nodes in position order with their stable UUIDs, and
//! connections referencing those UUIDs instead of positions. It is what
//! crosses worker boundaries and what `Creature` serializes as.
//!
//! The identity hash covers structure and parameters only. UUIDs, score and
//! tags are volatile and excluded, so two genomes that compute the same
//! function through the same graph share an identity.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use slotmap::SlotMap;
use uuid::Uuid;

use crate::activation::Activation;
use crate::gene::{ConnectionGene, ConnectionId, ConnectionKind, NodeGene, NodeId, NodeKind};
use crate::genome::{Creature, CreatureError};

/// Exported node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExport {
    pub uuid: Uuid,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub bias: f32,
    /// Activation name, resolved when the genome is imported.
    #[serde(default = "default_squash")]
    pub squash: String,
}

fn default_squash() -> String {
    Activation::Identity.name().to_string()
}

/// Exported connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionExport {
    pub from: Uuid,
    pub to: Uuid,
    pub weight: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gater: Option<Uuid>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ConnectionKind>,
}

/// Exported genome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatureExport {
    pub input: usize,
    pub output: usize,
    pub nodes: Vec<NodeExport>,
    pub connections: Vec<ConnectionExport>,
    /// Finite scores only; `-inf` has no JSON representation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl From<&Creature> for CreatureExport {
    fn from(creature: &Creature) -> Self {
        let nodes = creature
            .nodes()
            .map(|n| NodeExport {
                uuid: n.uuid,
                kind: n.kind,
                bias: if n.kind.has_bias() { n.bias } else { 0.0 },
                squash: n.squash.name().to_string(),
            })
            .collect();

        let uuid_at = |pos: usize| creature.node(pos).map(|n| n.uuid).unwrap_or_default();
        let connections = creature
            .links()
            .into_iter()
            .map(|l| ConnectionExport {
                from: uuid_at(l.from),
                to: uuid_at(l.to),
                weight: l.weight,
                gater: l.gater.map(uuid_at),
                kind: l.kind,
            })
            .collect();

        Self {
            input: creature.input_count(),
            output: creature.output_count(),
            nodes,
            connections,
            score: creature.score.filter(|s| s.is_finite()),
            tags: creature.tags.clone(),
        }
    }
}

impl From<Creature> for CreatureExport {
    fn from(creature: Creature) -> Self {
        Self::from(&creature)
    }
}

impl TryFrom<CreatureExport> for Creature {
    type Error = CreatureError;

    fn try_from(export: CreatureExport) -> Result<Self, Self::Error> {
        let bad = |msg: String| CreatureError::Export(msg);
        let len = export.nodes.len();
        if export.input == 0 || export.output == 0 || export.input + export.output > len {
            return Err(bad(format!(
                "{} inputs and {} outputs do not fit {len} nodes",
                export.input, export.output
            )));
        }

        let mut nodes: SlotMap<NodeId, NodeGene> = SlotMap::with_capacity_and_key(len);
        let mut order = Vec::with_capacity(len);
        let mut by_uuid: HashMap<Uuid, usize> = HashMap::with_capacity(len);

        for (pos, node) in export.nodes.into_iter().enumerate() {
            let expected_ok = if pos < export.input {
                node.kind == NodeKind::Input
            } else if pos >= len - export.output {
                node.kind == NodeKind::Output
            } else {
                matches!(node.kind, NodeKind::Hidden | NodeKind::Constant)
            };
            if !expected_ok {
                return Err(bad(format!("node {pos} has misplaced type {:?}", node.kind)));
            }
            let squash: Activation = node
                .squash
                .parse()
                .map_err(|e: crate::activation::UnknownActivation| bad(e.to_string()))?;
            if by_uuid.insert(node.uuid, pos).is_some() {
                return Err(bad(format!("duplicate node uuid {}", node.uuid)));
            }
            order.push(nodes.insert(NodeGene {
                uuid: node.uuid,
                kind: node.kind,
                bias: node.bias,
                squash,
            }));
        }

        let mut creature = Creature::from_parts(
            nodes,
            SlotMap::<ConnectionId, ConnectionGene>::with_key(),
            order,
            export.input,
            export.output,
        );

        let resolve = |uuid: &Uuid| {
            by_uuid
                .get(uuid)
                .copied()
                .ok_or_else(|| bad(format!("unknown node uuid {uuid}")))
        };
        for conn in &export.connections {
            let from = resolve(&conn.from)?;
            let to = resolve(&conn.to)?;
            creature.connect(from, to, conn.weight, conn.kind)?;
            if let Some(gater) = &conn.gater {
                creature.gate(from, to, Some(resolve(gater)?))?;
            }
        }

        creature.score = export.score;
        creature.tags = export.tags;
        Ok(creature)
    }
}

impl Creature {
    /// Export in the portable format.
    #[must_use]
    pub fn export(&self) -> CreatureExport {
        CreatureExport::from(self)
    }

    /// Import from the portable format.
    pub fn import(export: CreatureExport) -> Result<Self, CreatureError> {
        Self::try_from(export)
    }

    /// SHA-256 identity of the canonical structure, as lowercase hex.
    #[must_use]
    pub fn identity(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update((self.input_count() as u64).to_le_bytes());
        hasher.update((self.output_count() as u64).to_le_bytes());

        for node in self.nodes() {
            hasher.update([node_tag(node.kind)]);
            if node.kind.has_bias() {
                hasher.update(canonical(node.bias).to_le_bytes());
            }
            if node.kind.has_squash() {
                hasher.update(node.squash.name().as_bytes());
            }
            hasher.update([0xff]);
        }

        for link in self.links() {
            hasher.update((link.from as u64).to_le_bytes());
            hasher.update((link.to as u64).to_le_bytes());
            hasher.update(canonical(link.weight).to_le_bytes());
            match link.gater {
                Some(g) => hasher.update((g as u64).to_le_bytes()),
                None => hasher.update(u64::MAX.to_le_bytes()),
            }
            hasher.update([link.kind.map_or(0, kind_tag)]);
        }

        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(hex, "{byte:02x}");
        }
        hex
    }
}

/// `-0.0` and `0.0` hash alike.
fn canonical(value: f32) -> f32 {
    if value == 0.0 {
        0.0
    } else {
        value
    }
}

fn node_tag(kind: NodeKind) -> u8 {
    match kind {
        NodeKind::Input => 1,
        NodeKind::Hidden => 2,
        NodeKind::Output => 3,
        NodeKind::Constant => 4,
    }
}

fn kind_tag(kind: ConnectionKind) -> u8 {
    match kind {
        ConnectionKind::Positive => 1,
        ConnectionKind::Negative => 2,
        ConnectionKind::Condition => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::CreatureConfig;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn sample() -> Creature {
        let mut creature = Creature::minimal(&CreatureConfig::linear(2, 1));
        creature.insert_hidden(2, Activation::Tanh, 0.25).unwrap();
        creature.connect(0, 2, 0.5, None).unwrap();
        creature.connect(1, 2, -0.5, None).unwrap();
        creature.connect(2, 3, 1.5, None).unwrap();
        creature.connect(2, 2, 0.1, None).unwrap();
        creature.gate(0, 2, Some(3)).unwrap();
        creature.tags.insert("approach".into(), "mutate".into());
        creature.score = Some(-0.5);
        creature
    }

    #[test]
    fn test_export_round_trip() {
        let creature = sample();
        let export = creature.export();
        let back = Creature::import(export.clone()).unwrap();
        assert_eq!(back.export(), export);
        back.validate(None).unwrap();
    }

    #[test]
    fn test_json_round_trip() {
        let creature = sample();
        let json = serde_json::to_string(&creature).unwrap();
        let back: Creature = serde_json::from_str(&json).unwrap();
        assert_eq!(back.export(), creature.export());
        assert_eq!(back.identity(), creature.identity());
    }

    #[test]
    fn test_export_uses_uuids() {
        let creature = sample();
        let export = creature.export();
        let hidden = creature.node(2).unwrap().uuid;
        assert!(export.connections.iter().any(|c| c.to == hidden));
        assert_eq!(export.nodes[2].squash, "TANH");
    }

    #[test]
    fn test_non_finite_score_not_exported() {
        let mut creature = sample();
        creature.score = Some(f32::NEG_INFINITY);
        assert!(creature.export().score.is_none());
    }

    #[test]
    fn test_import_rejects_unknown_uuid() {
        let mut export = sample().export();
        export.connections[0].from = Uuid::new_v4();
        assert!(matches!(
            Creature::import(export),
            Err(CreatureError::Export(_))
        ));
    }

    #[test]
    fn test_import_rejects_unknown_activation() {
        let mut export = sample().export();
        export.nodes[2].squash = "WOBBLE".into();
        assert!(Creature::import(export).is_err());
    }

    #[test]
    fn test_import_rejects_misplaced_output() {
        let mut export = sample().export();
        export.output = 2;
        assert!(Creature::import(export).is_err());
    }

    #[test]
    fn test_identity_ignores_volatile_fields() {
        let a = sample();
        let mut b = Creature::import(a.export()).unwrap();
        b.score = None;
        b.tags.clear();
        assert_eq!(a.identity(), b.identity());
        assert_eq!(a.identity().len(), 64);
    }

    #[test]
    fn test_identity_ignores_uuids() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let a = Creature::new(&CreatureConfig::new(2, 1), &mut rng);
        let mut export = a.export();
        let old = export.nodes[0].uuid;
        let fresh = Uuid::new_v4();
        export.nodes[0].uuid = fresh;
        for c in &mut export.connections {
            if c.from == old {
                c.from = fresh;
            }
        }
        let b = Creature::import(export).unwrap();
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_identity_tracks_parameters() {
        let a = sample();
        let mut b = a.clone();
        b.set_bias(2, 0.3).unwrap();
        assert_ne!(a.identity(), b.identity());
    }
}
