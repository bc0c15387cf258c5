//! Fine-tuning by extrapolating between two good creatures.
//!
//! Given the current best and the previous best, every bias and weight the
//! two share (matched by node UUIDs) is a direction the search has already
//! moved in. Fine-tuned children keep the best creature's structure and
//! step further along a random fraction of those directions.

use std::collections::HashMap;

use rand::Rng;
use uuid::Uuid;

use crate::gene::{ConnectionId, NodeKind};
use crate::genome::Creature;
use crate::population::mark_prior;

/// Parameter differences `best - previous`, addressed in `best`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Differences {
    /// `(position, delta)` for biases.
    pub biases: Vec<(usize, f32)>,
    /// `(connection, delta)` for weights.
    pub weights: Vec<(ConnectionId, f32)>,
}

impl Differences {
    /// Compare two creatures, matching nodes by UUID and connections by
    /// the UUIDs of their endpoints.
    #[must_use]
    pub fn between(best: &Creature, previous: &Creature) -> Self {
        let prev_bias: HashMap<Uuid, f32> = previous
            .nodes()
            .filter(|n| n.kind.has_bias())
            .map(|n| (n.uuid, n.bias))
            .collect();
        let prev_weight: HashMap<(Uuid, Uuid), f32> = previous
            .links()
            .into_iter()
            .filter_map(|l| {
                Some(((previous.node(l.from)?.uuid, previous.node(l.to)?.uuid), l.weight))
            })
            .collect();

        let mut diff = Self::default();
        for pos in 0..best.node_count() {
            let Some(node) = best.node(pos) else { continue };
            if node.kind == NodeKind::Input {
                continue;
            }
            if let Some(&old) = prev_bias.get(&node.uuid) {
                let delta = node.bias - old;
                if delta != 0.0 && delta.is_finite() {
                    diff.biases.push((pos, delta));
                }
            }
        }
        for link in best.links() {
            let (Some(from), Some(to)) = (best.node(link.from), best.node(link.to)) else {
                continue;
            };
            if let Some(&old) = prev_weight.get(&(from.uuid, to.uuid)) {
                let delta = link.weight - old;
                if delta != 0.0 && delta.is_finite() {
                    diff.weights.push((link.id, delta));
                }
            }
        }
        diff
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.biases.is_empty() && self.weights.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.biases.len() + self.weights.len()
    }
}

/// Up to `count` children of `best` stepping along its differences from
/// `previous`.
///
/// Each child applies each difference with probability one half, scaled by
/// a per-child factor in `(0, 1]`. Children are tagged with the best
/// creature's score so that anti-flooding can discard those that do not
/// improve on it. Returns nothing when the two creatures share no differing
/// parameters.
pub fn fine_tune<R: Rng>(
    best: &Creature,
    previous: &Creature,
    count: usize,
    rng: &mut R,
) -> Vec<Creature> {
    let diff = Differences::between(best, previous);
    if diff.is_empty() || count == 0 {
        return Vec::new();
    }
    let prior = best.score.unwrap_or(f32::NEG_INFINITY);

    let mut children = Vec::with_capacity(count);
    for _ in 0..count {
        let factor: f32 = 1.0 - rng.random::<f32>();
        let mut child = best.clone();
        let mut changed = false;
        for &(pos, delta) in &diff.biases {
            if rng.random_bool(0.5) {
                if let Some(bias) = best.node(pos).map(|n| n.bias) {
                    changed |= child.set_bias(pos, bias + delta * factor).is_ok();
                }
            }
        }
        for &(id, delta) in &diff.weights {
            if rng.random_bool(0.5) {
                if let Some(weight) = best.connection(id).map(|c| c.weight) {
                    changed |= child.set_weight(id, weight + delta * factor).is_some();
                }
            }
        }
        if !changed {
            continue;
        }
        child.score = None;
        mark_prior(&mut child, "fine", prior);
        children.push(child);
    }
    log::debug!(
        "fine-tuned {} children from {} differences",
        children.len(),
        diff.len()
    );
    children
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::CreatureConfig;
    use crate::population::{prior_score, TAG_APPROACH};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn test_rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    #[test]
    fn test_differences_match_by_uuid() {
        let mut rng = test_rng();
        let previous = Creature::new(&CreatureConfig::new(2, 1), &mut rng);
        let mut best = previous.clone();
        best.set_bias(2, best.node(2).unwrap().bias + 0.5).unwrap();
        let id = best.find_connection(0, 2).unwrap();
        best.set_weight(id, best.connection(id).unwrap().weight - 0.25);

        let diff = Differences::between(&best, &previous);
        assert_eq!(diff.biases.len(), 1);
        assert!((diff.biases[0].1 - 0.5).abs() < 1e-6);
        assert_eq!(diff.weights.len(), 1);
        assert!((diff.weights[0].1 + 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_unrelated_creatures_share_nothing() {
        let mut rng = test_rng();
        let a = Creature::new(&CreatureConfig::new(2, 1), &mut rng);
        let b = Creature::new(&CreatureConfig::new(2, 1), &mut rng);
        assert!(Differences::between(&a, &b).is_empty());
        assert!(fine_tune(&a, &b, 5, &mut rng).is_empty());
    }

    #[test]
    fn test_children_extrapolate() {
        let mut rng = test_rng();
        let previous = Creature::new(&CreatureConfig::new(2, 1), &mut rng);
        let mut best = previous.clone();
        let old_bias = best.node(2).unwrap().bias;
        best.set_bias(2, old_bias + 1.0).unwrap();
        best.score = Some(-0.2);

        let children = fine_tune(&best, &previous, 16, &mut rng);
        assert!(!children.is_empty());
        for child in &children {
            let bias = child.node(2).unwrap().bias;
            assert!(bias > old_bias + 1.0 && bias <= old_bias + 2.0 + 1e-6);
            assert_eq!(child.score, None);
            assert_eq!(child.tags.get(TAG_APPROACH).map(String::as_str), Some("fine"));
            assert_eq!(prior_score(child), Some(-0.2));
            assert_eq!(child.connection_count(), best.connection_count());
        }
    }
}
