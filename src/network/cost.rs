// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Versioned live travel-time table.
//!
//! Travel times are refreshed once per scheduling window and read-only during the window's
//! ETA estimation and pathfinding; the version stamp ties an estimate to the refresh that
//! produced it.
use crate::network::{EdgeIndex, RouteGraph, RouteIndex};
use crate::units::Time;

/// Free-flow and live travel time for every edge of a [RouteGraph].
#[derive(Clone, Debug)]
pub struct TravelTimes {
    /// Free-flow travel time per edge (length / speed), the refresh baseline.
    free_flow: Vec<Time>,
    /// Live travel time per edge, as of the last refresh.
    live: Vec<Time>,
    /// Incremented on every refresh.
    version: u64,
}

impl TravelTimes {
    /// Creates a table initialized with the free-flow travel times of the graph.
    pub fn new(graph: &RouteGraph) -> Self {
        let free_flow: Vec<Time> = (0..graph.nb_edges())
            .map(|i| {
                let edge = graph.edge(EdgeIndex::new(i));
                edge.length / edge.speed
            })
            .collect();
        TravelTimes {
            live: free_flow.clone(),
            free_flow,
            version: 0,
        }
    }

    /// Returns the current refresh version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the live travel time of the given edge.
    pub fn edge_time(&self, edge: EdgeIndex) -> Time {
        self.live[edge.index()]
    }

    /// Returns the free-flow travel time of the given edge.
    pub fn free_flow_time(&self, edge: EdgeIndex) -> Time {
        self.free_flow[edge.index()]
    }

    /// Returns the live travel time of traversing the whole chain.
    pub fn chain_time(&self, graph: &RouteGraph, chain: RouteIndex) -> Time {
        graph
            .chain(chain)
            .edges()
            .iter()
            .map(|e| self.edge_time(*e))
            .sum()
    }

    /// Refreshes every live travel time from the given source and bumps the version.
    ///
    /// Non-finite or negative measurements fall back to the free-flow baseline.
    pub fn refresh<F>(&mut self, mut source: F)
    where
        F: FnMut(EdgeIndex) -> Option<Time>,
    {
        for i in 0..self.live.len() {
            let measured = source(EdgeIndex::new(i)).filter(|t| t.is_valid());
            self.live[i] = measured.unwrap_or(self.free_flow[i]);
        }
        self.version += 1;
    }
}
