// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Construction of the restricted sub-graphs handed to the centralized backend.
pub mod cache;

use hashbrown::{HashMap, HashSet};
use log::{debug, info, warn};

use self::cache::{Cache, SubGraph};
use crate::clustering::SimilarityClustering;
use crate::network::cost::TravelTimes;
use crate::network::{search, EdgeIndex, RegionIndex, RouteGraph, VehicleId};
use crate::parameters::BuilderParameters;
use crate::units::Time;

/// Counters describing the vehicles of one [TrafficProblem].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VehicleInfo {
    /// Total number of vehicles in the problem.
    pub total: usize,
    /// How many of them received a candidate sub-graph.
    pub scheduled: usize,
    /// How many were excluded because their segment has fewer than 3 edges or arrives
    /// too soon.
    pub short_route: usize,
    /// How many had no usable route (off the network, self loop, or a single candidate).
    pub invalid_route: usize,
}

/// Aggregate information kept after a [TrafficProblem] is freed.
#[derive(Clone, Debug, Default)]
pub struct EpisodeInfo {
    /// Name of the batch.
    pub name: String,
    pub vehicle_info: VehicleInfo,
}

/// Snapshot of one vehicle inside a [TrafficProblem].
#[derive(Clone, Debug)]
pub struct ProblemVehicle {
    pub id: VehicleId,
    /// Compact per-problem index, used as the vehicle identifier in planner files.
    pub internal_id: usize,
    /// Edges of the segment being replanned (entry anchor first, exit anchor last).
    pub segment_edges: Vec<EdgeIndex>,
    /// ETA of the vehicle to its region, as of scheduling time.
    pub eta: Time,
}

impl ProblemVehicle {
    /// Returns the entry anchor of the segment.
    pub fn entry_edge(&self) -> EdgeIndex {
        self.segment_edges[0]
    }

    /// Returns the exit anchor of the segment.
    pub fn exit_edge(&self) -> EdgeIndex {
        *self.segment_edges.last().unwrap()
    }
}

/// An isolated, disposable snapshot of one batch of vehicles to route in one region.
///
/// The problem owns a copy of everything a backend reads, so concurrent backends never
/// observe each other's in-flight mutations.
#[derive(Debug)]
pub struct TrafficProblem {
    /// Region the problem belongs to.
    pub region: RegionIndex,
    /// Vehicles of the routing problem.
    pub vehicles: Vec<ProblemVehicle>,
    /// Restricted network: the union of all per-vehicle allowed-edge sets.
    pub network: Option<HashSet<EdgeIndex>>,
    /// Per-vehicle allowed-edge sets.
    pub sub_graphs: HashMap<VehicleId, SubGraph>,
    /// Statistics surviving [TrafficProblem::free].
    pub info: EpisodeInfo,
}

impl TrafficProblem {
    /// Creates an empty problem for the given region.
    pub fn new(name: String, region: RegionIndex) -> Self {
        TrafficProblem {
            region,
            vehicles: Vec::new(),
            network: None,
            sub_graphs: HashMap::new(),
            info: EpisodeInfo {
                name,
                ..Default::default()
            },
        }
    }

    /// Returns `true` if the problem can be submitted to a backend.
    pub fn is_valid(&self) -> bool {
        self.network.is_some() && !self.sub_graphs.is_empty()
    }

    /// Releases the heavy network and vehicle references once the result has been
    /// absorbed; only the aggregate statistics remain.
    pub fn free(&mut self) {
        self.network = None;
        self.vehicles.clear();
        self.sub_graphs.clear();
    }
}

/// Computes per-vehicle candidate route sets and the restricted sub-graph of a batch.
#[derive(Debug)]
pub struct NetworkBuilder {
    parameters: BuilderParameters,
    clustering: Option<SimilarityClustering>,
    /// Memory of previously constructed sub-graphs.
    cache: Cache,
}

impl NetworkBuilder {
    pub fn new(parameters: BuilderParameters) -> Self {
        let clustering = parameters.clustering.map(SimilarityClustering::new);
        let cache = Cache::new(parameters.cache_size);
        NetworkBuilder {
            parameters,
            clustering,
            cache,
        }
    }

    /// Returns the sub-graph cache.
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Builds the per-vehicle sub-graphs and the aggregate restricted network of the
    /// problem. Returns `true` when a usable network was produced.
    pub fn build_network(
        &mut self,
        graph: &RouteGraph,
        times: &TravelTimes,
        problem: &mut TrafficProblem,
    ) -> bool {
        if problem.vehicles.is_empty() {
            warn!("Cannot construct a road network for an empty problem");
            return false;
        }
        debug!("Building sub-graph for {} vehicles", problem.vehicles.len());
        let mut edges: HashSet<EdgeIndex> = HashSet::new();
        let vehicles = std::mem::take(&mut problem.vehicles);
        problem.info.vehicle_info.total = vehicles.len();
        for vehicle in &vehicles {
            if let Some(sub_graph) = self.generate_graph(graph, times, vehicle, &mut problem.info.vehicle_info)
            {
                edges.extend(sub_graph.iter().copied());
                problem.sub_graphs.insert(vehicle.id, sub_graph);
            }
        }
        problem.vehicles = vehicles;
        problem.info.vehicle_info.scheduled = problem.sub_graphs.len();
        info!(
            "Built sub-graphs for {}/{} vehicles",
            problem.sub_graphs.len(),
            problem.vehicles.len()
        );
        if !edges.is_empty() {
            problem.network = Some(edges);
        }
        problem.network.is_some()
    }

    /// Computes the allowed sub-graph of one vehicle, as the union of the edges of its
    /// surviving candidate routes.
    ///
    /// Vehicles failing the eligibility checks get no sub-graph; they stay in the problem
    /// and only contribute their occupied edges to capacity accounting.
    fn generate_graph(
        &mut self,
        graph: &RouteGraph,
        times: &TravelTimes,
        vehicle: &ProblemVehicle,
        info: &mut VehicleInfo,
    ) -> Option<SubGraph> {
        if !self.check_route(graph, vehicle, info) {
            return None;
        }
        let (entry, exit) = (vehicle.entry_edge(), vehicle.exit_edge());
        // Re-use a previously computed sub-graph, or skip a pair known to be hopeless.
        if self.cache.has_mapping(entry, exit) {
            return self.cache.get_mapping(entry, exit);
        }
        let mut routes = search::k_shortest(
            graph,
            times,
            entry,
            exit,
            self.parameters.stretch,
            self.parameters.max_routes,
        );
        if routes.len() <= 1 {
            // No alternative to the shortest path: nothing for the planner to choose from.
            debug!("No alternative routes for vehicle {}", vehicle.id);
            info.invalid_route += 1;
            self.cache.mark_invalid(entry, exit);
            return None;
        }
        if let Some(clustering) = &self.clustering {
            if let Some(indexes) = clustering.select(&routes) {
                routes = indexes.into_iter().map(|i| routes[i].clone()).collect();
            }
        }
        match self.cache.save_mapping(entry, exit, &routes, false) {
            Some(sub_graph) => Some(sub_graph),
            // Full cache: proceed uncached with the freshly computed union.
            None => Some(std::sync::Arc::new(
                routes.into_iter().flatten().collect(),
            )),
        }
    }

    /// Eligibility filter: the segment must lie on the network, span at least 3 edges,
    /// be contiguous, and the vehicle must not arrive before planning could finish.
    fn check_route(
        &self,
        graph: &RouteGraph,
        vehicle: &ProblemVehicle,
        info: &mut VehicleInfo,
    ) -> bool {
        if vehicle.segment_edges.len() < 3 {
            info.short_route += 1;
            return false;
        }
        if vehicle.eta < self.parameters.min_eta {
            info.short_route += 1;
            return false;
        }
        if !graph.check_edge_sequence(&vehicle.segment_edges) {
            warn!("Vehicle {} does not drive on the network", vehicle.id);
            info.invalid_route += 1;
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::testing::diamond_graph;

    fn problem_vehicle(graph: &RouteGraph, id: VehicleId, path: &[u64], eta: Time) -> ProblemVehicle {
        ProblemVehicle {
            id,
            internal_id: id as usize,
            segment_edges: graph.resolve_edges(path).unwrap(),
            eta,
        }
    }

    fn builder() -> NetworkBuilder {
        NetworkBuilder::new(BuilderParameters {
            stretch: 3.0,
            max_routes: 10,
            ..Default::default()
        })
    }

    #[test]
    fn build_network_test() {
        let graph = diamond_graph();
        let times = TravelTimes::new(&graph);
        let mut builder = builder();
        let mut problem = TrafficProblem::new("0_r0".into(), RegionIndex::new(0));
        problem.vehicles = vec![
            problem_vehicle(&graph, 1, &[1, 2, 3, 6], Time(30.)),
            // Too short to replan; capacity accounting only.
            problem_vehicle(&graph, 2, &[1, 6], Time(30.)),
        ];
        assert!(builder.build_network(&graph, &times, &mut problem));
        assert!(problem.sub_graphs.contains_key(&1));
        assert!(!problem.sub_graphs.contains_key(&2));
        // Both branches of the diamond are admitted by the wide stretch.
        let network = problem.network.as_ref().unwrap();
        assert_eq!(network.len(), 6);
        assert_eq!(problem.info.vehicle_info.total, 2);
        assert_eq!(problem.info.vehicle_info.scheduled, 1);
        assert_eq!(problem.info.vehicle_info.short_route, 1);
        // The computed pair is memoized.
        assert!(builder.cache().has_mapping(
            graph.edge_index(1).unwrap(),
            graph.edge_index(6).unwrap()
        ));
    }

    #[test]
    fn eligibility_test() {
        let graph = diamond_graph();
        let times = TravelTimes::new(&graph);
        let mut builder = builder();
        let mut info = VehicleInfo::default();
        // ETA below the minimum.
        let vehicle = problem_vehicle(&graph, 1, &[1, 2, 3, 6], Time(1.));
        assert!(builder.generate_graph(&graph, &times, &vehicle, &mut info).is_none());
        assert_eq!(info.short_route, 1);
        // Non-contiguous sequence.
        let vehicle = problem_vehicle(&graph, 2, &[1, 2, 5, 6], Time(30.));
        assert!(builder.generate_graph(&graph, &times, &vehicle, &mut info).is_none());
        assert_eq!(info.invalid_route, 1);
    }

    #[test]
    fn single_route_marks_invalid_test() {
        let graph = crate::network::testing::line_graph();
        let times = TravelTimes::new(&graph);
        let mut builder = builder();
        let mut info = VehicleInfo::default();
        let vehicle = problem_vehicle(&graph, 1, &[1, 2, 3, 4], Time(30.));
        // A line has a single candidate route: no diversity to exploit.
        assert!(builder.generate_graph(&graph, &times, &vehicle, &mut info).is_none());
        assert_eq!(info.invalid_route, 1);
        assert!(builder.cache().is_invalid(
            graph.edge_index(1).unwrap(),
            graph.edge_index(4).unwrap()
        ));
        // The second attempt is answered from the cache.
        assert!(builder.generate_graph(&graph, &times, &vehicle, &mut info).is_none());
        assert_eq!(info.invalid_route, 1);
    }

    #[test]
    fn free_retains_info_test() {
        let graph = diamond_graph();
        let times = TravelTimes::new(&graph);
        let mut builder = builder();
        let mut problem = TrafficProblem::new("0_r0".into(), RegionIndex::new(0));
        problem.vehicles = vec![problem_vehicle(&graph, 1, &[1, 2, 3, 6], Time(30.))];
        builder.build_network(&graph, &times, &mut problem);
        assert!(problem.is_valid());
        problem.free();
        assert!(!problem.is_valid());
        assert!(problem.vehicles.is_empty() && problem.network.is_none());
        assert_eq!(problem.info.vehicle_info.scheduled, 1);
        assert_eq!(problem.info.name, "0_r0");
    }
}
