//! Indexed connection lookups using CSR format.
//!
//! A [`GraphIndex`] is a snapshot of a creature's connections grouped by
//! target (inbound), source (outbound) and gater, stored in Compressed
//! Sparse Row form so that no per-node `Vec` is allocated.
//!
//! The index is stamped with the genome's structural generation. The genome
//! bumps its generation on every structural edit and compares stamps at
//! lookup time, so a stale index is never served.
//!
//! ## Determinism
//!
//! Every CSR row is ordered by the `(from, to)` positions of its
//! connections, so summation order during activation only depends on the
//! genome's structure, not on its edit history.

use std::collections::VecDeque;

use slotmap::SecondaryMap;

use crate::gene::{ConnectionId, NodeId};
use crate::genome::Creature;

/// CSR rows, one row per node position.
#[derive(Debug, Clone, Default)]
pub(crate) struct Csr<T> {
    offsets: Vec<usize>,
    items: Vec<T>,
}

impl<T: Copy + Default> Csr<T> {
    /// Group `(row, item)` pairs by row, keeping their relative order.
    pub(crate) fn build(node_count: usize, keyed: &[(usize, T)]) -> Self {
        let mut counts = vec![0usize; node_count];
        for &(row, _) in keyed {
            counts[row] += 1;
        }

        let mut offsets = Vec::with_capacity(node_count + 1);
        offsets.push(0);
        let mut total = 0;
        for &count in &counts {
            total += count;
            offsets.push(total);
        }

        let mut items = vec![T::default(); total];
        let mut write_pos = offsets[..node_count].to_vec();
        for &(row, id) in keyed {
            items[write_pos[row]] = id;
            write_pos[row] += 1;
        }

        Self { offsets, items }
    }

    #[inline]
    pub(crate) fn row(&self, idx: usize) -> &[T] {
        match (self.offsets.get(idx), self.offsets.get(idx + 1)) {
            (Some(&start), Some(&end)) => &self.items[start..end],
            _ => &[],
        }
    }
}

/// Connection lookups for one structural generation of a creature.
#[derive(Debug, Clone)]
pub struct GraphIndex {
    generation: u64,
    node_count: usize,
    position: SecondaryMap<NodeId, usize>,
    /// All connections sorted ascending by `(from, to)` position.
    sorted: Vec<ConnectionId>,
    /// Non-self connections grouped by target.
    inbound: Csr<ConnectionId>,
    /// Non-self connections grouped by source.
    outbound: Csr<ConnectionId>,
    /// Connections (self-connections included) grouped by gater.
    gated: Csr<ConnectionId>,
    /// Self-connection of each node, if any.
    self_conn: Vec<Option<ConnectionId>>,
}

impl GraphIndex {
    /// Build the index for the creature's current structure.
    #[must_use]
    pub fn build(creature: &Creature) -> Self {
        let node_count = creature.order.len();
        let mut position = SecondaryMap::with_capacity(node_count);
        for (pos, &id) in creature.order.iter().enumerate() {
            position.insert(id, pos);
        }

        // Connections whose endpoints are gone are left out; `fix` removes them.
        let mut edges: Vec<(usize, usize, ConnectionId)> = creature
            .connections
            .iter()
            .filter_map(|(id, c)| {
                let from = *position.get(c.from)?;
                let to = *position.get(c.to)?;
                Some((from, to, id))
            })
            .collect();
        edges.sort_unstable_by_key(|&(from, to, _)| (from, to));

        let sorted: Vec<ConnectionId> = edges.iter().map(|&(_, _, id)| id).collect();
        let mut self_conn = vec![None; node_count];
        let mut inbound_keys = Vec::with_capacity(edges.len());
        let mut outbound_keys = Vec::with_capacity(edges.len());
        let mut gated_keys = Vec::new();

        for &(from, to, id) in &edges {
            if from == to {
                self_conn[from] = Some(id);
            } else {
                inbound_keys.push((to, id));
                outbound_keys.push((from, id));
            }
            if let Some(gater) = creature.connections[id].gater {
                if let Some(&g) = position.get(gater) {
                    gated_keys.push((g, id));
                }
            }
        }

        Self {
            generation: creature.generation,
            node_count,
            position,
            sorted,
            inbound: Csr::build(node_count, &inbound_keys),
            outbound: Csr::build(node_count, &outbound_keys),
            gated: Csr::build(node_count, &gated_keys),
            self_conn,
        }
    }

    /// Structural generation this index was built for.
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of nodes in the snapshot.
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Position of a node handle.
    #[inline]
    #[must_use]
    pub fn position(&self, id: NodeId) -> Option<usize> {
        self.position.get(id).copied()
    }

    /// All connections, ascending by `(from, to)`.
    #[inline]
    #[must_use]
    pub fn sorted(&self) -> &[ConnectionId] {
        &self.sorted
    }

    /// Non-self connections targeting the node at `pos`.
    #[inline]
    #[must_use]
    pub fn inbound(&self, pos: usize) -> &[ConnectionId] {
        self.inbound.row(pos)
    }

    /// Non-self connections leaving the node at `pos`.
    #[inline]
    #[must_use]
    pub fn outbound(&self, pos: usize) -> &[ConnectionId] {
        self.outbound.row(pos)
    }

    /// Connections gated by the node at `pos`.
    #[inline]
    #[must_use]
    pub fn gated(&self, pos: usize) -> &[ConnectionId] {
        self.gated.row(pos)
    }

    /// Self-connection of the node at `pos`.
    #[inline]
    #[must_use]
    pub fn self_connection(&self, pos: usize) -> Option<ConnectionId> {
        self.self_conn.get(pos).copied().flatten()
    }

    /// Positions reachable by walking inbound connections (and gaters)
    /// backwards from `start`, `start` included.
    #[must_use]
    pub fn walk_inward(&self, creature: &Creature, start: usize) -> Vec<usize> {
        if start >= self.node_count {
            return Vec::new();
        }
        let mut visited = vec![false; self.node_count];
        let mut queue = VecDeque::new();
        visited[start] = true;
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            for &cid in self.inbound(current) {
                let conn = &creature.connections[cid];
                let sources = [Some(conn.from), conn.gater];
                for source in sources.into_iter().flatten() {
                    if let Some(p) = self.position(source) {
                        if !visited[p] {
                            visited[p] = true;
                            queue.push_back(p);
                        }
                    }
                }
            }
        }

        visited
            .iter()
            .enumerate()
            .filter_map(|(p, &v)| v.then_some(p))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::Activation;
    use crate::genome::CreatureConfig;

    fn two_layer() -> Creature {
        // 0,1 inputs -> 2 hidden -> 3 output, plus 0 -> 3
        let mut creature = Creature::minimal(&CreatureConfig::new(2, 1));
        creature.insert_hidden(2, Activation::Identity, 0.0).unwrap();
        creature.connect(0, 2, 1.0, None).unwrap();
        creature.connect(1, 2, 1.0, None).unwrap();
        creature.connect(2, 3, 1.0, None).unwrap();
        creature.connect(0, 3, 0.5, None).unwrap();
        creature
    }

    #[test]
    fn test_index_basic() {
        let creature = two_layer();
        let index = GraphIndex::build(&creature);

        assert_eq!(index.node_count(), 4);
        assert_eq!(index.inbound(2).len(), 2);
        assert_eq!(index.inbound(3).len(), 2);
        assert_eq!(index.outbound(0).len(), 2);
        assert!(index.self_connection(2).is_none());
    }

    #[test]
    fn test_sorted_by_positions() {
        let creature = two_layer();
        let index = GraphIndex::build(&creature);
        let pairs: Vec<(usize, usize)> = index
            .sorted()
            .iter()
            .map(|&id| {
                let c = &creature.connections[id];
                (
                    index.position(c.from).unwrap(),
                    index.position(c.to).unwrap(),
                )
            })
            .collect();
        assert_eq!(pairs, vec![(0, 2), (0, 3), (1, 2), (2, 3)]);
    }

    #[test]
    fn test_self_and_gated_rows() {
        let mut creature = two_layer();
        creature.connect(2, 2, 0.3, None).unwrap();
        creature.gate(0, 3, Some(2)).unwrap();
        let index = GraphIndex::build(&creature);

        assert!(index.self_connection(2).is_some());
        // Self-connections are not counted as inbound.
        assert_eq!(index.inbound(2).len(), 2);
        assert_eq!(index.gated(2).len(), 1);
    }

    #[test]
    fn test_walk_inward() {
        let creature = two_layer();
        let index = GraphIndex::build(&creature);
        assert_eq!(index.walk_inward(&creature, 3), vec![0, 1, 2, 3]);
        assert_eq!(index.walk_inward(&creature, 0), vec![0]);
    }
}
