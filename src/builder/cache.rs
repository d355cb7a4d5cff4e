// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Memoization of computed candidate sub-graphs.
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use log::debug;

use crate::network::EdgeIndex;

/// The allowed-edge set computed for one (entry edge, exit edge) pair.
pub type SubGraph = Arc<HashSet<EdgeIndex>>;

/// Bounded memo of previously computed candidate sub-graphs.
///
/// A pair can also be marked *known invalid* (no alternative route worth caching exists),
/// which is remembered so the search is not re-run. Once the capacity is reached further
/// inserts are rejected and callers proceed uncached; there is no recency-based eviction.
#[derive(Debug, Default)]
pub struct Cache {
    /// (entry edge, exit edge) -> union of candidate-route edges.
    memory: HashMap<(EdgeIndex, EdgeIndex), SubGraph>,
    /// Pairs known to have no usable alternative routes.
    invalid: HashSet<(EdgeIndex, EdgeIndex)>,
    max_size: usize,
}

impl Cache {
    /// Creates a cache holding at most `max_size` sub-graphs.
    pub fn new(max_size: usize) -> Self {
        Cache {
            memory: HashMap::new(),
            invalid: HashSet::new(),
            max_size,
        }
    }

    /// Returns the number of stored sub-graphs.
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    /// Returns `true` if no sub-graph is stored.
    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Returns the cached sub-graph for the pair, `None` if there is none.
    pub fn get_mapping(&self, in_edge: EdgeIndex, out_edge: EdgeIndex) -> Option<SubGraph> {
        self.memory.get(&(in_edge, out_edge)).cloned()
    }

    /// Returns `true` if the pair is cached, either with a sub-graph or as known invalid.
    pub fn has_mapping(&self, in_edge: EdgeIndex, out_edge: EdgeIndex) -> bool {
        self.invalid.contains(&(in_edge, out_edge)) || self.memory.contains_key(&(in_edge, out_edge))
    }

    /// Returns `true` if the pair is known to have no usable alternative routes.
    pub fn is_invalid(&self, in_edge: EdgeIndex, out_edge: EdgeIndex) -> bool {
        self.invalid.contains(&(in_edge, out_edge))
    }

    /// Marks the pair as having no usable alternative routes.
    pub fn mark_invalid(&mut self, in_edge: EdgeIndex, out_edge: EdgeIndex) {
        self.invalid.insert((in_edge, out_edge));
    }

    /// Saves the union of the given routes' edges as the pair's sub-graph.
    ///
    /// Empty route sets mark the pair invalid. An existing mapping is only overwritten when
    /// `replace` is set; a full cache rejects the insert. In both cases `None` is returned
    /// and the cache is left unchanged.
    pub fn save_mapping(
        &mut self,
        in_edge: EdgeIndex,
        out_edge: EdgeIndex,
        routes: &[Vec<EdgeIndex>],
        replace: bool,
    ) -> Option<SubGraph> {
        if routes.is_empty() {
            self.invalid.insert((in_edge, out_edge));
            return None;
        }
        let key = (in_edge, out_edge);
        let exists = self.memory.contains_key(&key);
        if !replace && exists {
            debug!(
                "Not replacing mapping {} -> {}, replace is not set",
                in_edge.index(),
                out_edge.index()
            );
            return None;
        }
        if !exists && self.memory.len() + 1 > self.max_size {
            debug!(
                "Cannot add mapping {} -> {}, cache is at maximum size {}",
                in_edge.index(),
                out_edge.index(),
                self.max_size
            );
            return None;
        }
        let sub_graph: SubGraph = Arc::new(routes.iter().flatten().copied().collect());
        self.memory.insert(key, Arc::clone(&sub_graph));
        Some(sub_graph)
    }

    /// Resets the cache, forgetting both sub-graphs and invalid pairs.
    pub fn clear(&mut self) {
        self.memory.clear();
        self.invalid.clear();
    }
}
