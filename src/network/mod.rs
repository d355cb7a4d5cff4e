// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! The route-graph of the road network.
//!
//! Edges, route chains and junctions are stored in flat, index-addressed tables;
//! cross-references between them are integer indices, never owning references.
//! A [RouteChain] (a maximal chain of edges with a single predecessor and successor) is the
//! routing unit: it acts as the search edge, while a [Junction] acts as the search node.
pub mod cost;
pub mod search;

use anyhow::{bail, Result};
use hashbrown::{HashMap, HashSet};

use crate::units::{Length, Speed};

/// Identifier of an edge as given by the simulation.
pub type OriginalEdgeId = u64;
/// Identifier of a junction as given by the simulation.
pub type OriginalJunctionId = u64;
/// Identifier of a vehicle as given by the simulation.
pub type VehicleId = u64;

macro_rules! impl_index(
    ( $( $t:ident ),* ) => {
        $(
            #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
            pub struct $t(usize);

            impl $t {
                /// Creates a new index.
                pub const fn new(x: usize) -> Self {
                    $t(x)
                }

                /// Returns the underlying index.
                pub const fn index(self) -> usize {
                    self.0
                }
            }
        )*
    }
);

impl_index!(EdgeIndex, RouteIndex, JunctionIndex, RegionIndex);

/// A directed road primitive.
#[derive(Clone, Debug)]
pub struct RoadEdge {
    /// Original id of the edge.
    pub id: OriginalEdgeId,
    /// Length of the edge, from source to target.
    pub length: Length,
    /// Free-flow speed on the edge.
    pub speed: Speed,
    /// Number of vehicles the edge contributes to the capacity of its owning chain.
    pub capacity: u32,
    /// Owning route chain.
    chain: RouteIndex,
    /// Position of the edge inside its owning chain.
    position: usize,
}

impl RoadEdge {
    /// Returns the route chain the edge belongs to.
    pub fn chain(&self) -> RouteIndex {
        self.chain
    }
}

/// Description of an edge before graph construction.
#[derive(Clone, Debug)]
pub struct EdgeSpec {
    pub id: OriginalEdgeId,
    pub from: OriginalJunctionId,
    pub to: OriginalJunctionId,
    pub length: Length,
    pub speed: Speed,
    pub capacity: u32,
}

/// A maximal chain of edges with identical traversal direction and no internal branching.
#[derive(Clone, Debug)]
pub struct RouteChain {
    /// Ordered member edges.
    edges: Vec<EdgeIndex>,
    /// Junction the chain starts from.
    from: JunctionIndex,
    /// Junction the chain ends at.
    to: JunctionIndex,
    /// Bottleneck capacity of the chain (minimum over member edges).
    capacity: u32,
}

impl RouteChain {
    /// Returns the ordered member edges.
    pub fn edges(&self) -> &[EdgeIndex] {
        &self.edges
    }

    /// Returns the first member edge.
    pub fn first_edge(&self) -> EdgeIndex {
        self.edges[0]
    }

    /// Returns the last member edge.
    pub fn last_edge(&self) -> EdgeIndex {
        *self.edges.last().unwrap()
    }

    /// Returns the junction the chain ends at.
    pub fn destination(&self) -> JunctionIndex {
        self.to
    }

    /// Returns the junction the chain starts from.
    pub fn origin(&self) -> JunctionIndex {
        self.from
    }

    /// Returns the bottleneck capacity of the chain.
    pub fn capacity(&self) -> u32 {
        self.capacity.max(1)
    }
}

/// Connectivity of a junction: which outbound chains are reachable from each inbound chain.
#[derive(Clone, Debug, Default)]
pub struct Junction {
    /// Original id of the junction.
    pub id: OriginalJunctionId,
    /// Mapping from inbound chain to the reachable outbound chains.
    connections: HashMap<RouteIndex, Vec<RouteIndex>>,
    /// All chains leaving the junction.
    out_chains: Vec<RouteIndex>,
}

impl Junction {
    /// Returns the outbound chains reachable from the given inbound chain.
    pub fn reachable(&self, inbound: RouteIndex) -> &[RouteIndex] {
        self.connections
            .get(&inbound)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns an iterator over (inbound chain, reachable outbound chains) pairs.
    pub fn connections(&self) -> impl Iterator<Item = (RouteIndex, &[RouteIndex])> {
        self.connections.iter().map(|(r, outs)| (*r, outs.as_slice()))
    }

    /// Returns all chains leaving the junction.
    pub fn out_chains(&self) -> &[RouteIndex] {
        &self.out_chains
    }

    /// Returns `true` if the junction has no outbound chain.
    pub fn is_ending(&self) -> bool {
        self.out_chains.is_empty()
    }
}

/// A controlled region: the sub-area of the network for which route optimization is applied.
#[derive(Clone, Debug)]
pub struct Region {
    /// Name of the region.
    pub name: String,
    /// Edges lying inside the region.
    pub edges: HashSet<EdgeIndex>,
}

impl Region {
    /// Returns `true` if the given edge lies inside the region.
    pub fn contains(&self, edge: EdgeIndex) -> bool {
        self.edges.contains(&edge)
    }
}

/// Flat-table description of the route-graph.
#[derive(Clone, Debug, Default)]
pub struct RouteGraph {
    edges: Vec<RoadEdge>,
    chains: Vec<RouteChain>,
    junctions: Vec<Junction>,
    /// Mapping from original edge id to [EdgeIndex].
    edge_map: HashMap<OriginalEdgeId, EdgeIndex>,
    /// Mapping from the first edge of each chain to the chain.
    chain_heads: HashMap<EdgeIndex, RouteIndex>,
    /// Mapping from the last edge of each chain to the chain.
    chain_tails: HashMap<EdgeIndex, RouteIndex>,
}

impl RouteGraph {
    /// Creates a new RouteGraph from a Vec of [EdgeSpec]s.
    ///
    /// `turns`, when given, lists the allowed edge-to-edge movements at junctions; without it
    /// every inbound edge can reach every outbound edge. Consecutive edges are coalesced into
    /// maximal chains wherever the junction between them has a single inbound and a single
    /// outbound edge.
    pub fn from_edges(
        specs: Vec<EdgeSpec>,
        turns: Option<&[(OriginalEdgeId, OriginalEdgeId)]>,
    ) -> Result<Self> {
        let ids: HashSet<OriginalEdgeId> = specs.iter().map(|s| s.id).collect();
        if ids.len() != specs.len() {
            bail!("The edge ids are not unique");
        }
        if let Some(turns) = turns {
            for (from, to) in turns {
                if !ids.contains(from) || !ids.contains(to) {
                    bail!("Turn ({from}, {to}) references an unknown edge");
                }
            }
        }
        // Node-level adjacency on original junction ids.
        let mut node_in: HashMap<OriginalJunctionId, Vec<usize>> = HashMap::new();
        let mut node_out: HashMap<OriginalJunctionId, Vec<usize>> = HashMap::new();
        for (i, spec) in specs.iter().enumerate() {
            node_out.entry(spec.from).or_default().push(i);
            node_in.entry(spec.to).or_default().push(i);
        }
        let allowed_turn = |from: &EdgeSpec, to: &EdgeSpec| match turns {
            Some(turns) => turns.contains(&(from.id, to.id)),
            None => true,
        };
        // A junction is internal to a chain when exactly one edge comes in, exactly one goes
        // out and the movement between them is allowed.
        let is_internal = |node: OriginalJunctionId| {
            let ins = node_in.get(&node).map(Vec::as_slice).unwrap_or(&[]);
            let outs = node_out.get(&node).map(Vec::as_slice).unwrap_or(&[]);
            ins.len() == 1 && outs.len() == 1 && allowed_turn(&specs[ins[0]], &specs[outs[0]])
        };
        // Build maximal chains starting from every edge whose source node is not internal.
        let mut chain_members: Vec<Vec<usize>> = Vec::new();
        let mut chain_of_spec: Vec<Option<usize>> = vec![None; specs.len()];
        for (i, spec) in specs.iter().enumerate() {
            if chain_of_spec[i].is_some() || is_internal(spec.from) {
                continue;
            }
            let chain_id = chain_members.len();
            let mut members = vec![i];
            chain_of_spec[i] = Some(chain_id);
            let mut node = spec.to;
            while is_internal(node) {
                let next = node_out[&node][0];
                if chain_of_spec[next].is_some() {
                    break;
                }
                chain_of_spec[next] = Some(chain_id);
                members.push(next);
                node = specs[next].to;
            }
            chain_members.push(members);
        }
        // Edges on a cycle of internal nodes have no chain head; give each its own chain.
        for i in 0..specs.len() {
            if chain_of_spec[i].is_none() {
                chain_of_spec[i] = Some(chain_members.len());
                chain_members.push(vec![i]);
            }
        }
        // Re-index the boundary junctions from 0 to n-1.
        let boundary: HashSet<OriginalJunctionId> = chain_members
            .iter()
            .flat_map(|members| {
                let first = &specs[members[0]];
                let last = &specs[*members.last().unwrap()];
                [first.from, last.to]
            })
            .collect();
        let mut boundary: Vec<OriginalJunctionId> = boundary.into_iter().collect();
        boundary.sort_unstable();
        let junction_map: HashMap<OriginalJunctionId, JunctionIndex> = boundary
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, JunctionIndex::new(i)))
            .collect();
        let mut junctions: Vec<Junction> = boundary
            .iter()
            .map(|id| Junction {
                id: *id,
                ..Default::default()
            })
            .collect();
        // Materialize edges and chains.
        let mut edges: Vec<RoadEdge> = specs
            .iter()
            .map(|spec| RoadEdge {
                id: spec.id,
                length: spec.length,
                speed: spec.speed,
                capacity: spec.capacity,
                chain: RouteIndex::new(0),
                position: 0,
            })
            .collect();
        let mut chains = Vec::with_capacity(chain_members.len());
        for (chain_id, members) in chain_members.iter().enumerate() {
            let capacity = members.iter().map(|&i| specs[i].capacity).min().unwrap();
            for (position, &i) in members.iter().enumerate() {
                edges[i].chain = RouteIndex::new(chain_id);
                edges[i].position = position;
            }
            chains.push(RouteChain {
                edges: members.iter().map(|&i| EdgeIndex::new(i)).collect(),
                from: junction_map[&specs[members[0]].from],
                to: junction_map[&specs[*members.last().unwrap()].to],
                capacity,
            });
        }
        // Junction connectivity between chains, honoring the allowed turns.
        for (chain_id, chain) in chains.iter().enumerate() {
            let junction = &mut junctions[chain.from.index()];
            junction.out_chains.push(RouteIndex::new(chain_id));
        }
        for (chain_id, chain) in chains.iter().enumerate() {
            let last_spec = &specs[chain.last_edge().index()];
            let outs: Vec<RouteIndex> = junctions[chain.to.index()]
                .out_chains
                .iter()
                .copied()
                .filter(|out| {
                    let first_spec = &specs[chains[out.index()].first_edge().index()];
                    allowed_turn(last_spec, first_spec)
                })
                .collect();
            junctions[chain.to.index()]
                .connections
                .insert(RouteIndex::new(chain_id), outs);
        }
        let edge_map = edges
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id, EdgeIndex::new(i)))
            .collect();
        let chain_heads = chains
            .iter()
            .enumerate()
            .map(|(i, c)| (c.first_edge(), RouteIndex::new(i)))
            .collect();
        let chain_tails = chains
            .iter()
            .enumerate()
            .map(|(i, c)| (c.last_edge(), RouteIndex::new(i)))
            .collect();
        Ok(RouteGraph {
            edges,
            chains,
            junctions,
            edge_map,
            chain_heads,
            chain_tails,
        })
    }

    /// Returns the number of edges in the graph.
    pub fn nb_edges(&self) -> usize {
        self.edges.len()
    }

    /// Returns the number of route chains in the graph.
    pub fn nb_chains(&self) -> usize {
        self.chains.len()
    }

    /// Returns the RoadEdge corresponding to the given index.
    pub fn edge(&self, index: EdgeIndex) -> &RoadEdge {
        &self.edges[index.index()]
    }

    /// Returns the [EdgeIndex] of an edge given its original id.
    pub fn edge_index(&self, id: OriginalEdgeId) -> Option<EdgeIndex> {
        self.edge_map.get(&id).copied()
    }

    /// Returns the chain corresponding to the given index.
    pub fn chain(&self, index: RouteIndex) -> &RouteChain {
        &self.chains[index.index()]
    }

    /// Returns the chain whose first edge is the given edge.
    pub fn chain_starting_at(&self, edge: EdgeIndex) -> Option<RouteIndex> {
        self.chain_heads.get(&edge).copied()
    }

    /// Returns the chain whose last edge is the given edge.
    pub fn chain_ending_at(&self, edge: EdgeIndex) -> Option<RouteIndex> {
        self.chain_tails.get(&edge).copied()
    }

    /// Returns the junction corresponding to the given index.
    pub fn junction(&self, index: JunctionIndex) -> &Junction {
        &self.junctions[index.index()]
    }

    /// Returns an iterator over the chains of the graph.
    pub fn iter_chains(&self) -> impl Iterator<Item = (RouteIndex, &RouteChain)> {
        self.chains
            .iter()
            .enumerate()
            .map(|(i, c)| (RouteIndex::new(i), c))
    }

    /// Returns an iterator over the junctions of the graph.
    pub fn iter_junctions(&self) -> impl Iterator<Item = (JunctionIndex, &Junction)> {
        self.junctions
            .iter()
            .enumerate()
            .map(|(i, j)| (JunctionIndex::new(i), j))
    }

    /// Resolves a sequence of original edge ids to [EdgeIndex]es.
    ///
    /// Returns `None` if any id does not lie on the network.
    pub fn resolve_edges(&self, ids: &[OriginalEdgeId]) -> Option<Vec<EdgeIndex>> {
        ids.iter().map(|id| self.edge_index(*id)).collect()
    }

    /// Returns `true` if the given edges form a contiguous, traversable sequence.
    ///
    /// Consecutive edges must either be adjacent inside the same chain, or cross a junction
    /// through an allowed movement between their chains.
    pub fn check_edge_sequence(&self, edges: &[EdgeIndex]) -> bool {
        if edges.is_empty() {
            return false;
        }
        edges.windows(2).all(|pair| {
            let (a, b) = (self.edge(pair[0]), self.edge(pair[1]));
            if a.chain == b.chain {
                return b.position == a.position + 1;
            }
            // Crossing a junction: `a` must end its chain, `b` must start its own, and the
            // movement must be allowed.
            let chain_a = self.chain(a.chain);
            let chain_b = self.chain(b.chain);
            chain_a.last_edge() == pair[0]
                && chain_b.first_edge() == pair[1]
                && self
                    .junction(chain_a.destination())
                    .reachable(a.chain)
                    .contains(&b.chain)
        })
    }

    /// Builds a [Region] from a set of original edge ids.
    pub fn make_region(&self, name: &str, edge_ids: &[OriginalEdgeId]) -> Result<Region> {
        let mut edges = HashSet::with_capacity(edge_ids.len());
        for id in edge_ids {
            let Some(index) = self.edge_index(*id) else {
                bail!("Region `{name}` references unknown edge {id}");
            };
            edges.insert(index);
        }
        Ok(Region {
            name: name.to_string(),
            edges,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn chain_coalescing_test() {
        let graph = line_graph();
        // A single path with no branching is one maximal chain.
        assert_eq!(graph.nb_edges(), 4);
        assert_eq!(graph.nb_chains(), 1);
        let chain = graph.chain(RouteIndex::new(0));
        assert_eq!(chain.edges().len(), 4);
        assert_eq!(graph.edge(chain.first_edge()).id, 1);
        assert_eq!(graph.edge(chain.last_edge()).id, 4);
    }

    #[test]
    fn diamond_chains_test() {
        let graph = diamond_graph();
        // Entry edge, two two-edge branches, exit edge.
        assert_eq!(graph.nb_chains(), 4);
        let entry = graph.edge_index(1).unwrap();
        let entry_chain = graph.chain_starting_at(entry).unwrap();
        let junction = graph.junction(graph.chain(entry_chain).destination());
        assert_eq!(junction.reachable(entry_chain).len(), 2);
    }

    #[test]
    fn turn_restriction_test() {
        // Same diamond, but the upper branch cannot be entered from edge 1.
        let specs = vec![
            edge(1, 0, 1, 1.0),
            edge(2, 1, 2, 1.0),
            edge(3, 2, 4, 1.0),
            edge(4, 1, 3, 2.0),
            edge(5, 3, 4, 2.0),
            edge(6, 4, 5, 1.0),
        ];
        let turns = vec![(1, 4), (2, 3), (4, 5), (3, 6), (5, 6)];
        let graph = RouteGraph::from_edges(specs, Some(&turns)).unwrap();
        let entry = graph.edge_index(1).unwrap();
        let entry_chain = graph.chain_starting_at(entry).unwrap();
        let junction = graph.junction(graph.chain(entry_chain).destination());
        let upper = graph.chain_of_edge(2);
        let lower = graph.chain_of_edge(4);
        assert!(!junction.reachable(entry_chain).contains(&upper));
        assert!(junction.reachable(entry_chain).contains(&lower));
    }

    impl RouteGraph {
        fn chain_of_edge(&self, id: OriginalEdgeId) -> RouteIndex {
            self.edge(self.edge_index(id).unwrap()).chain()
        }
    }

    #[test]
    fn edge_sequence_test() {
        let graph = diamond_graph();
        let path = graph.resolve_edges(&[1, 2, 3, 6]).unwrap();
        assert!(graph.check_edge_sequence(&path));
        // Jumping between branches is not traversable.
        let broken = graph.resolve_edges(&[1, 2, 5, 6]).unwrap();
        assert!(!graph.check_edge_sequence(&broken));
        assert!(!graph.check_edge_sequence(&[]));
    }

    #[test]
    fn duplicate_edge_id_test() {
        let specs = vec![edge(1, 0, 1, 1.0), edge(1, 1, 2, 1.0)];
        assert!(RouteGraph::from_edges(specs, None).is_err());
    }
}
