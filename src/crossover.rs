//! Two-parent breeding.
//!
//! Parents are aligned by position. The child takes the fitter parent's
//! node count (or a random count between both parents' when they are
//! equally fit), its outputs remapped to the tail. Connection genes are
//! keyed by the Cantor id of their child-side endpoint positions:
//!
//! - genes in both parents come from a random parent,
//! - genes in one parent are kept unless that parent is strictly worse, or
//!   the `equal` flag is set.

use std::collections::{BTreeMap, HashSet};

use rand::Rng;
use slotmap::SlotMap;
use uuid::Uuid;

use crate::gene::{ConnectionGene, ConnectionId, NodeGene, NodeId};
use crate::genome::{Creature, CreatureError, Link};
use crate::innovation::{innovation_id, split_innovation};

/// Map a parent position onto a child with `size` nodes.
fn child_position(parent: &Creature, pos: usize, size: usize) -> Option<usize> {
    let input = parent.input_count();
    let output = parent.output_count();
    let parent_output_start = parent.node_count() - output;
    if pos < input {
        Some(pos)
    } else if pos >= parent_output_start {
        Some(size - output + (pos - parent_output_start))
    } else if pos < size - output {
        Some(pos)
    } else {
        None
    }
}

/// Connection genes of `parent` keyed by child-side innovation id.
fn keyed_links(parent: &Creature, size: usize) -> BTreeMap<u64, (Link, Option<usize>)> {
    parent
        .links()
        .into_iter()
        .filter_map(|link| {
            let from = child_position(parent, link.from, size)?;
            let to = child_position(parent, link.to, size)?;
            let gater = link.gater.and_then(|g| child_position(parent, g, size));
            Some((innovation_id(from, to), (link, gater)))
        })
        .collect()
}

impl Creature {
    /// Breed two parents.
    ///
    /// Parents must have the same number of inputs and outputs.
    pub fn cross_over<R: Rng>(
        a: &Creature,
        b: &Creature,
        equal: bool,
        rng: &mut R,
    ) -> Result<Creature, CreatureError> {
        if a.input_count() != b.input_count() || a.output_count() != b.output_count() {
            return Err(CreatureError::Invalid(format!(
                "cannot cross {}x{} with {}x{}",
                a.input_count(),
                a.output_count(),
                b.input_count(),
                b.output_count()
            )));
        }

        let score_a = a.score.unwrap_or(f32::NEG_INFINITY);
        let score_b = b.score.unwrap_or(f32::NEG_INFINITY);
        let tie = equal || score_a == score_b;
        let (small, large) = if a.node_count() <= b.node_count() {
            (a.node_count(), b.node_count())
        } else {
            (b.node_count(), a.node_count())
        };
        let size = if tie {
            rng.random_range(small..=large)
        } else if score_a > score_b {
            a.node_count()
        } else {
            b.node_count()
        };

        let input = a.input_count();
        let output = a.output_count();
        let output_start = size - output;

        // Nodes
        let mut nodes: SlotMap<NodeId, NodeGene> = SlotMap::with_capacity_and_key(size);
        let mut order = Vec::with_capacity(size);
        let mut uuids = HashSet::with_capacity(size);
        for pos in 0..size {
            let gene = if pos < input {
                Self::pick_parent(a, b, rng).node(pos)
            } else if pos >= output_start {
                let index = pos - output_start;
                let parent = Self::pick_parent(a, b, rng);
                parent.node(parent.output_start() + index)
            } else {
                let candidates: Vec<&NodeGene> = [a, b]
                    .into_iter()
                    .filter(|p| pos < p.output_start())
                    .filter_map(|p| p.node(pos))
                    .collect();
                match candidates.len() {
                    0 => None,
                    n => Some(candidates[rng.random_range(0..n)]),
                }
            };
            let mut gene = gene.cloned().ok_or_else(|| {
                CreatureError::Invalid(format!("no parent node for child position {pos}"))
            })?;
            // The same ancestral node can sit at different positions in each parent.
            if !uuids.insert(gene.uuid) {
                gene.uuid = Uuid::new_v4();
                uuids.insert(gene.uuid);
            }
            order.push(nodes.insert(gene));
        }

        let mut child = Creature::from_parts(
            nodes,
            SlotMap::<ConnectionId, ConnectionGene>::with_key(),
            order,
            input,
            output,
        );

        // Connections
        let links_a = keyed_links(a, size);
        let links_b = keyed_links(b, size);
        let mut chosen: BTreeMap<u64, (Link, Option<usize>)> = BTreeMap::new();
        for (&key, &gene) in &links_a {
            match links_b.get(&key) {
                Some(&other) => {
                    chosen.insert(key, if rng.random_bool(0.5) { gene } else { other });
                }
                None if tie || score_a >= score_b => {
                    chosen.insert(key, gene);
                }
                None => {}
            }
        }
        if tie || score_b >= score_a {
            for (&key, &gene) in &links_b {
                chosen.entry(key).or_insert(gene);
            }
        }

        for (key, (link, gater)) in chosen {
            let (from, to) = split_innovation(key);
            // Endpoints whose node came from the other parent may make the gene illegal.
            if let Err(e) = child.connect(from, to, link.weight, link.kind) {
                log::debug!("crossover skipped connection {from} -> {to}: {e}");
                continue;
            }
            if let Some(g) = gater {
                if let Err(e) = child.gate(from, to, Some(g)) {
                    log::debug!("crossover left {from} -> {to} ungated by {g}: {e}");
                }
            }
        }

        // Keep the size: give every non-projecting interior node a silent
        // edge to the first output before repairing.
        let graph = child.graph().into_owned();
        let idle: Vec<usize> = (input..output_start)
            .filter(|&p| graph.outbound(p).is_empty() && graph.gated(p).is_empty())
            .collect();
        for p in idle {
            child.connect(p, output_start, 0.0, None)?;
        }
        child.fix();

        debug_assert!(child.node_count() == size);
        Ok(child)
    }

    fn pick_parent<'a, R: Rng>(a: &'a Creature, b: &'a Creature, rng: &mut R) -> &'a Creature {
        if rng.random_bool(0.5) {
            a
        } else {
            b
        }
    }
}
