// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Decentralized routing: each vehicle gets its independent fastest route.
use std::time::Instant;

use log::{debug, info};

use crate::network::cost::TravelTimes;
use crate::network::{search, EdgeIndex, RouteGraph};
use crate::routing::NewRoute;
use crate::stats::SolverStats;
use crate::units::Time;

/// The decentralized backend: single-vehicle Dijkstra over the route-graph, ignoring all
/// other vehicles.
#[derive(Debug, Default)]
pub struct Duo {
    pub stats: SolverStats,
}

impl Duo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes a batch of segments; entries are `None` where no route exists.
    pub fn route_vehicles(
        &mut self,
        graph: &RouteGraph,
        times: &TravelTimes,
        segments: &[Vec<EdgeIndex>],
    ) -> Vec<Option<NewRoute>> {
        let now = Instant::now();
        let routes: Vec<Option<NewRoute>> = segments
            .iter()
            .map(|segment| self.route_segment(graph, times, segment))
            .collect();
        let found = routes.iter().flatten().count();
        self.stats.problems += segments.len();
        self.stats.solved += found;
        self.stats.vehicles_routed += found;
        self.stats.wall_time += Time(now.elapsed().as_secs_f64());
        info!("DUO found {found}/{} routes", segments.len());
        routes
    }

    /// Computes the fastest replacement for one segment, anchored at its boundary edges.
    pub fn route_segment(
        &self,
        graph: &RouteGraph,
        times: &TravelTimes,
        segment: &[EdgeIndex],
    ) -> Option<NewRoute> {
        let (entry, exit) = (*segment.first()?, *segment.last()?);
        let Some(edges) = search::dijkstra(graph, times, entry, exit) else {
            debug!(
                "Unable to find a path between edges {} and {}",
                graph.edge(entry).id,
                graph.edge(exit).id
            );
            return None;
        };
        Some(edges.iter().map(|e| graph.edge(*e).id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::testing::{diamond_graph, edge, line_graph};
    use crate::network::RouteGraph;

    #[test]
    fn route_single_path_test() {
        let graph = line_graph();
        let times = TravelTimes::new(&graph);
        let duo = Duo::new();
        let segment = graph.resolve_edges(&[1, 2, 3, 4]).unwrap();
        // The only path is returned in full.
        let route = duo.route_segment(&graph, &times, &segment).unwrap();
        assert_eq!(route, vec![1, 2, 3, 4]);
    }

    #[test]
    fn route_disconnected_test() {
        let specs = vec![edge(1, 0, 1, 1.0), edge(2, 2, 3, 1.0)];
        let graph = RouteGraph::from_edges(specs, None).unwrap();
        let times = TravelTimes::new(&graph);
        let duo = Duo::new();
        let segment = graph.resolve_edges(&[1, 2]).unwrap();
        assert!(duo.route_segment(&graph, &times, &segment).is_none());
    }

    #[test]
    fn route_avoids_congested_branch_test() {
        let graph = diamond_graph();
        let mut times = TravelTimes::new(&graph);
        let mut duo = Duo::new();
        let segment = graph.resolve_edges(&[1, 4, 5, 6]).unwrap();
        // Free flow: the upper branch is faster than the vehicle's own lower branch.
        let routes = duo.route_vehicles(&graph, &times, &[segment.clone()]);
        assert_eq!(routes[0].as_ref().unwrap(), &vec![1, 2, 3, 6]);
        assert_eq!(duo.stats.vehicles_routed, 1);
        // Congest the upper branch and the route flips to the lower one.
        let slow = graph.edge_index(2).unwrap();
        times.refresh(|e| (e == slow).then_some(Time(100.0)));
        let route = duo.route_segment(&graph, &times, &segment).unwrap();
        assert_eq!(route, vec![1, 4, 5, 6]);
    }
}
