//! Behavior-preserving simplification.
//!
//! An identity hidden node `h` sitting on a plain chain `a -> h -> b` is
//! folded away:
//!
//! ```text
//! b.state = b.bias + w2 * (h.bias + w1 * a)
//!         = (b.bias + w2 * h.bias) + (w1 * w2) * a
//! ```
//!
//! Only forward, ungated links qualify, and `h` must neither gate anything
//! nor loop on itself, so the rewrite is exact under the forward pass.

use crate::activation::Activation;
use crate::gene::{ConnectionId, NodeKind};
use crate::genome::Creature;

#[derive(Debug, Clone, Copy)]
struct Collapse {
    hidden: usize,
    from: usize,
    to: usize,
    inbound: ConnectionId,
    outbound: ConnectionId,
}

impl Creature {
    /// Repeatedly fold degree-1 identity hidden nodes into their neighbors.
    ///
    /// Returns `None` when nothing could be reduced.
    #[must_use]
    pub fn compact(&self) -> Option<Creature> {
        let mut out = self.clone();
        let mut reduced = 0usize;
        while let Some(collapse) = out.find_collapse() {
            if !out.apply_collapse(collapse) {
                break;
            }
            reduced += 1;
        }
        if reduced == 0 {
            return None;
        }
        log::debug!("compacted {reduced} hidden nodes");
        out.score = None;
        Some(out)
    }

    fn find_collapse(&self) -> Option<Collapse> {
        let graph = self.graph();
        (self.input_count()..self.output_start()).find_map(|h| {
            let node = self.node(h)?;
            if node.kind != NodeKind::Hidden || node.squash != Activation::Identity {
                return None;
            }
            if graph.self_connection(h).is_some() || !graph.gated(h).is_empty() {
                return None;
            }
            let (&[inbound], &[outbound]) = (graph.inbound(h), graph.outbound(h)) else {
                return None;
            };
            let cin = self.connection(inbound)?;
            let cout = self.connection(outbound)?;
            if cin.gater.is_some() || cout.gater.is_some() || cin.kind.is_some() {
                return None;
            }
            let from = graph.position(cin.from)?;
            let to = graph.position(cout.to)?;
            if from >= h || to <= h {
                return None;
            }
            // The hidden bias would land on every branch of a conditional target.
            if cout.kind.is_some() || self.node(to)?.squash == Activation::If {
                return None;
            }
            // A parallel edge can only absorb the product if it behaves the same.
            if let Some(existing) = self.find_connection(from, to) {
                let existing = self.connection(existing)?;
                if existing.gater.is_some() || existing.kind != cout.kind {
                    return None;
                }
            }
            Some(Collapse {
                hidden: h,
                from,
                to,
                inbound,
                outbound,
            })
        })
    }

    fn apply_collapse(&mut self, c: Collapse) -> bool {
        let (Some(cin), Some(cout)) = (self.connection(c.inbound), self.connection(c.outbound))
        else {
            return false;
        };
        let (w1, w2, kind) = (cin.weight, cout.weight, cout.kind);
        let Some(hidden_bias) = self.node(c.hidden).map(|n| n.bias) else {
            return false;
        };
        let Some(target_bias) = self.node(c.to).map(|n| n.bias) else {
            return false;
        };

        match self.find_connection(c.from, c.to) {
            Some(existing) => {
                let weight = self.connection(existing).map_or(0.0, |e| e.weight);
                self.set_weight(existing, weight + w1 * w2);
            }
            None => {
                if self.connect(c.from, c.to, w1 * w2, kind).is_err() {
                    return false;
                }
            }
        }
        if self.set_bias(c.to, target_bias + w2 * hidden_bias).is_err() {
            return false;
        }
        // `to` is after `hidden`, so the removal does not shift `from`.
        self.remove_node(c.hidden).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gene::ConnectionKind;
    use crate::genome::CreatureConfig;

    fn chain() -> Creature {
        let mut creature = Creature::minimal(&CreatureConfig::linear(2, 1));
        creature.insert_hidden(2, Activation::Identity, 0.5).unwrap();
        creature.connect(0, 2, 2.0, None).unwrap();
        creature.connect(2, 3, 3.0, None).unwrap();
        creature.connect(1, 3, 1.0, None).unwrap();
        creature
    }

    #[test]
    fn test_compact_folds_chain() {
        let creature = chain();
        let compacted = creature.compact().unwrap();
        assert_eq!(compacted.node_count(), 3);
        compacted.validate(None).unwrap();

        let id = compacted.find_connection(0, 2).unwrap();
        assert!((compacted.connection(id).unwrap().weight - 6.0).abs() < 1e-6);
        assert!((compacted.node(2).unwrap().bias - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_compact_preserves_behavior() {
        let creature = chain();
        let compacted = creature.compact().unwrap();
        for input in [[0.0, 0.0], [0.3, -0.7], [1.0, 2.0]] {
            let a = creature.evaluate(&input);
            let b = compacted.evaluate(&input);
            assert!((a[0] - b[0]).abs() < 1e-5, "{a:?} vs {b:?}");
        }
    }

    #[test]
    fn test_compact_merges_parallel_edge() {
        let mut creature = chain();
        creature.connect(0, 3, 1.0, None).unwrap();
        let compacted = creature.compact().unwrap();
        let id = compacted.find_connection(0, 2).unwrap();
        assert!((compacted.connection(id).unwrap().weight - 7.0).abs() < 1e-6);
        assert_eq!(compacted.connection_count(), 2);
    }

    #[test]
    fn test_compact_skips_non_identity() {
        let mut creature = chain();
        creature.set_squash(2, Activation::Tanh).unwrap();
        assert!(creature.compact().is_none());
    }

    #[test]
    fn test_compact_keeps_conditional_targets() {
        let mut creature = Creature::minimal(&CreatureConfig::linear(3, 1));
        creature.set_squash(3, Activation::If).unwrap();
        creature.insert_hidden(3, Activation::Identity, 0.5).unwrap();
        creature.connect(1, 3, 1.0, None).unwrap();
        creature
            .connect(3, 4, 2.0, Some(ConnectionKind::Positive))
            .unwrap();
        creature
            .connect(0, 4, 1.0, Some(ConnectionKind::Condition))
            .unwrap();
        creature
            .connect(2, 4, 1.0, Some(ConnectionKind::Negative))
            .unwrap();
        creature.validate(None).unwrap();

        // Condition is negative, so only the negative branch reaches the output.
        let output = creature.evaluate(&[-1.0, 0.2, 0.3]);
        assert!((output[0] - 0.3).abs() < 1e-6);
        assert!(creature.compact().is_none());
    }

    #[test]
    fn test_compact_skips_gated_nodes() {
        let mut creature = chain();
        creature.gate(1, 3, Some(2)).unwrap();
        assert!(creature.compact().is_none());
    }
}
