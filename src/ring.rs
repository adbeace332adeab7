//! Partition ownership across cluster nodes.
//!
//! Partitions, not individual keys, are assigned to nodes. A membership change
//! moves whole partitions, so a queue's header and items always move together.

use std::hash::{Hash, Hasher};

fn hash_u64<T: Hash>(t: &T) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    let mut s = DefaultHasher::new();
    t.hash(&mut s);
    s.finish()
}

pub const DEFAULT_VIRTUAL_NODES: u32 = 100;

/// A versioned node set with its consistent-hash continuum.
#[derive(Debug, Clone)]
pub struct Topology {
    version: u64,
    nodes: Vec<u64>,
    virtual_nodes: u32,
    ring: Vec<(u64, u64)>,
}

impl Topology {
    pub fn new(nodes: &[u64], virtual_nodes: u32) -> Self {
        Self::build(0, nodes, virtual_nodes)
    }

    fn build(version: u64, nodes: &[u64], virtual_nodes: u32) -> Self {
        // Sort nodes for stability
        let mut nodes: Vec<u64> = nodes.to_vec();
        nodes.sort_unstable();
        nodes.dedup();

        let virtual_nodes = virtual_nodes.max(1);
        let mut ring: Vec<(u64, u64)> = Vec::with_capacity(nodes.len() * virtual_nodes as usize);
        for node in &nodes {
            for n in 0..virtual_nodes {
                ring.push((hash_u64(&(*node, n)), *node));
            }
        }
        ring.sort_unstable_by_key(|x| x.0);

        Self {
            version,
            nodes,
            virtual_nodes,
            ring,
        }
    }

    /// The topology after a membership change; bumps the version.
    pub fn with_nodes(&self, nodes: &[u64]) -> Self {
        Self::build(self.version + 1, nodes, self.virtual_nodes)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn nodes(&self) -> &[u64] {
        &self.nodes
    }

    /// The node owning `partition`: the first node clockwise from its hash.
    pub fn owner_of(&self, partition: u32) -> Option<u64> {
        if self.ring.is_empty() {
            return None;
        }
        let partition_hash = hash_u64(&partition);
        let idx = match self.ring.binary_search_by_key(&partition_hash, |x| x.0) {
            Ok(i) => i,
            Err(i) if i >= self.ring.len() => 0,
            Err(i) => i,
        };
        Some(self.ring[idx].1)
    }

    /// Partitions in `0..partition_count` owned by `node`.
    pub fn partitions_for_node(&self, partition_count: u32, node: u64) -> Vec<u32> {
        (0..partition_count)
            .filter(|p| self.owner_of(*p) == Some(node))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_partition_has_exactly_one_owner() {
        let topo = Topology::new(&[1, 2, 3], DEFAULT_VIRTUAL_NODES);
        let mut owned: Vec<u32> = Vec::new();
        for node in [1, 2, 3] {
            owned.extend(topo.partitions_for_node(64, node));
        }
        owned.sort_unstable();
        assert_eq!(owned, (0..64).collect::<Vec<_>>());
    }

    #[test]
    fn node_order_does_not_matter() {
        let a = Topology::new(&[3, 1, 2], 50);
        let b = Topology::new(&[1, 2, 3, 3], 50);
        for p in 0..32 {
            assert_eq!(a.owner_of(p), b.owner_of(p));
        }
    }

    #[test]
    fn empty_topology_has_no_owner() {
        let topo = Topology::new(&[], DEFAULT_VIRTUAL_NODES);
        assert_eq!(topo.owner_of(0), None);
        assert!(topo.partitions_for_node(8, 1).is_empty());
    }

    #[test]
    fn membership_change_bumps_version_and_keeps_survivors_stable() {
        let before = Topology::new(&[1, 2, 3], DEFAULT_VIRTUAL_NODES);
        let after = before.with_nodes(&[1, 2, 3, 4]);
        assert_eq!(after.version(), before.version() + 1);
        // A partition either keeps its owner or moves to the new node.
        for p in 0..64 {
            let new_owner = after.owner_of(p).unwrap();
            assert!(new_owner == before.owner_of(p).unwrap() || new_owner == 4);
        }
    }
}
