// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! The per-tick vehicle state machine.
//!
//! Conceptually a tracked vehicle moves through `NEW -> RUNNING -> SCHEDULED -> {ROUTED |
//! MISSED | DISCARDED} -> ARRIVED`. The scheduler is called once per simulation tick; it
//! ingests departures and arrivals, estimates ETAs toward the next controlled region,
//! moves eligible vehicles into a scheduling batch and splices backend results back into
//! their paths.
use anyhow::Result;
use log::{debug, info, warn};

use crate::builder::ProblemVehicle;
use crate::driver::SimulationDriver;
use crate::network::cost::TravelTimes;
use crate::network::{EdgeIndex, Region, RouteGraph, VehicleId};
use crate::parameters::SchedulerParameters;
use crate::queue::{VehicleQueue, VehicleState};
use crate::routing::{BackendKind, NewRoute};
use crate::stats::VehicleStats;
use crate::units::Time;
use crate::vehicle::{detect_segments, ControlledRoute, ControlledVehicle, Eta};

/// Scheduler of vehicles from the running simulation for online planning.
///
/// Parameterized by the list of controlled regions; a single region is simply a list of
/// one.
#[derive(Debug)]
pub struct Scheduler {
    regions: Vec<Region>,
    parameters: SchedulerParameters,
    /// Registry of all tracked vehicles.
    pub queue: VehicleQueue,
    pub stats: VehicleStats,
}

impl Scheduler {
    /// Creates a new Scheduler for the given regions.
    ///
    /// Fails when the scheduling-window thresholds are misordered.
    pub fn new(regions: Vec<Region>, parameters: SchedulerParameters) -> Result<Self> {
        parameters.validate()?;
        info!(
            "Initialized scheduler with {} regions, interval ({}, {}, {}), reserve {}",
            regions.len(),
            parameters.low,
            parameters.mid,
            parameters.high,
            parameters.reserve
        );
        Ok(Scheduler {
            regions,
            parameters,
            queue: VehicleQueue::new(),
            stats: VehicleStats::default(),
        })
    }

    /// Returns the controlled regions.
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Ingests this tick's departures and arrivals.
    pub fn step(&mut self, driver: &impl SimulationDriver, graph: &RouteGraph) -> Result<()> {
        let time = driver.time();
        let (arrived, missed) = self.queue.set_arrival(&driver.arrived(), time)?;
        self.stats.arrived += arrived;
        self.stats.missed += missed;
        for id in driver.departed() {
            self.insert_vehicle(driver, graph, id, time);
        }
        Ok(())
    }

    /// Starts tracking a departed vehicle if its static path crosses a controlled region.
    fn insert_vehicle(
        &mut self,
        driver: &impl SimulationDriver,
        graph: &RouteGraph,
        id: VehicleId,
        time: Time,
    ) {
        self.stats.departed += 1;
        let path = driver.static_route(id);
        let Some(segments) = detect_segments(graph, &self.regions, &path) else {
            // The path does not lie on the network; the vehicle keeps its original route.
            warn!("Vehicle {id} does not drive on the network, not tracked");
            return;
        };
        if segments.is_empty() {
            return;
        }
        self.stats.considered += 1;
        let route = ControlledRoute::new(path, segments);
        if let Err(error) = self.queue.add_vehicle(ControlledVehicle::new(id, route, time)) {
            warn!("{error}");
        }
    }

    /// Recomputes each edge's live travel time.
    ///
    /// When at least one running vehicle carries a reporting dynamic-rerouting device, its
    /// predictions are preferred over the aggregate measurement; they directly feed the
    /// next round's ETAs and pathfinding costs.
    pub fn update_travel_time(
        &self,
        driver: &impl SimulationDriver,
        graph: &RouteGraph,
        times: &mut TravelTimes,
    ) {
        let probe = self.queue.running.iter().copied().min().filter(|&v| {
            graph.nb_edges() > 0
                && driver
                    .rerouting_prediction(v, graph.edge(EdgeIndex::new(0)).id)
                    .is_some()
        });
        if let Some(vehicle) = probe {
            debug!("Updating travel times from the rerouting device of vehicle {vehicle}");
            times.refresh(|e| driver.rerouting_prediction(vehicle, graph.edge(e).id));
        } else {
            debug!("Updating travel times from aggregate measurements");
            times.refresh(|e| driver.edge_travel_time(graph.edge(e).id));
        }
    }

    /// Estimates the time for a running vehicle to reach its active segment's target edge.
    ///
    /// The target is `reserve` edges before the region boundary, or the boundary itself
    /// when the segment was rescheduled. Segments the vehicle has already reached are
    /// consumed (counted as missed) and the estimation retries against the next one;
    /// `None` is returned when no segment remains, in which case the caller discards the
    /// vehicle.
    pub fn compute_eta(
        &mut self,
        driver: &impl SimulationDriver,
        graph: &RouteGraph,
        times: &TravelTimes,
        id: VehicleId,
        offset: usize,
    ) -> Option<Time> {
        let current = driver.route_index(id);
        loop {
            let (target, rescheduled) = {
                let vehicle = self.queue.vehicles.get(&id)?;
                let segment = vehicle.route.current_segment();
                (segment.region_entry_index(), segment.rescheduled)
            };
            let offset = if rescheduled { 0 } else { offset };
            let index = match target.checked_sub(offset) {
                Some(index) => index,
                None => {
                    // The segment starts too close to the path start to honor the offset;
                    // shift the prediction to one edge before the region.
                    debug!("Unable to compute ETA for vehicle {id} by {offset} edges early");
                    target.saturating_sub(1).max(1)
                }
            };
            if current < index {
                return self.eta_from_position(driver, graph, times, id, current, index);
            }
            // The vehicle is already on or past the target edge.
            self.stats.missed += 1;
            if !self.queue.vehicles.get_mut(&id)?.switch_segment() {
                return None;
            }
        }
    }

    /// Sums the live travel times from the vehicle's position up to (excluding) `index`.
    fn eta_from_position(
        &self,
        driver: &impl SimulationDriver,
        graph: &RouteGraph,
        times: &TravelTimes,
        id: VehicleId,
        current: usize,
        index: usize,
    ) -> Option<Time> {
        let vehicle = self.queue.vehicles.get(&id)?;
        let edges = vehicle.route.edges();
        let edge_time = |edge_id| Some(times.edge_time(graph.edge_index(edge_id)?));
        // The first edge only counts for its untraveled fraction.
        let fraction = driver.lane_position(id).remaining_fraction();
        let mut eta = edge_time(edges[current])? * fraction;
        for edge_id in &edges[current + 1..index] {
            eta += edge_time(*edge_id)?;
        }
        Some(eta)
    }

    /// Classifies every running vehicle against the scheduling window.
    ///
    /// Vehicles arriving too soon skip their segment (missed); vehicles within the window
    /// move to the scheduled batch, which is returned; vehicles too far out stay running
    /// and are re-estimated next round.
    pub fn schedule_vehicles(
        &mut self,
        driver: &impl SimulationDriver,
        graph: &RouteGraph,
        times: &TravelTimes,
    ) -> Vec<VehicleId> {
        let mut running: Vec<VehicleId> = self.queue.running.iter().copied().collect();
        running.sort_unstable();
        debug!("Computing ETA for {} vehicles", running.len());
        let mut scheduled = Vec::new();
        let time = driver.time();
        for id in running {
            let Some(eta) = self.compute_eta(driver, graph, times, id, self.parameters.reserve)
            else {
                self.discard(id);
                continue;
            };
            let vehicle = self.queue.vehicles.get_mut(&id).unwrap();
            vehicle.route.current_segment_mut().eta = Some(Eta {
                value: eta,
                computed_at: time,
            });
            if eta < self.parameters.low {
                // Too soon to plan usefully; skip this crossing.
                self.stats.missed += 1;
                self.advance_or_discard(id);
            } else if eta <= self.parameters.high {
                self.stats.scheduled += 1;
                self.queue.schedule(id);
                scheduled.push(id);
            }
            // eta > high: keep the vehicle running, re-estimate next round.
        }
        info!("Scheduling {} vehicles for planning", scheduled.len());
        scheduled
    }

    /// Takes an isolated snapshot of a scheduled batch for the backends.
    ///
    /// Each entry carries the vehicle's current-segment edges, region and ETA; backends
    /// never observe later mutations of the queue. Vehicles whose segment does not
    /// resolve on the network are skipped.
    pub fn batch_snapshot(
        &self,
        graph: &RouteGraph,
        batch: &[VehicleId],
    ) -> Vec<(Option<crate::network::RegionIndex>, ProblemVehicle)> {
        batch
            .iter()
            .filter_map(|&id| {
                let vehicle = self.queue.vehicles.get(&id)?;
                let segment = vehicle.route.current_segment();
                let edges = graph.resolve_edges(vehicle.route.segment_edges(segment))?;
                Some((
                    segment.region(),
                    ProblemVehicle {
                        id,
                        internal_id: 0,
                        segment_edges: edges,
                        eta: segment.eta.map(|eta| eta.value).unwrap_or(Time::zero()),
                    },
                ))
            })
            .collect()
    }

    /// Applies backend results to a previously scheduled batch.
    ///
    /// Results for vehicles that left the simulation are dropped. A vehicle that reached
    /// its target in the meantime holds a stale plan, which is discarded. A vehicle whose
    /// fresh ETA ran away is deferred to the next round rather than given a soon-to-be-
    /// stale plan. Everything else gets the replacement spliced into its path and pushed
    /// to the simulation.
    pub fn assign_routes(
        &mut self,
        driver: &mut impl SimulationDriver,
        graph: &RouteGraph,
        times: &TravelTimes,
        batch: &[VehicleId],
        routes: &[Option<NewRoute>],
        routed_by: BackendKind,
    ) {
        debug_assert_eq!(batch.len(), routes.len());
        debug!("Assigning {} planned vehicles", batch.len());
        for (id, maybe_route) in batch.iter().copied().zip(routes) {
            if self.queue.state_of(id) != Some(VehicleState::Scheduled) {
                // The vehicle arrived or was discarded while the backend was working.
                self.stats.missed += 1;
                continue;
            }
            let Some(route) = maybe_route else {
                // The backend produced nothing for this vehicle.
                self.stats.missed += 1;
                self.advance_or_discard(id);
                continue;
            };
            let current = driver.route_index(id);
            let target = {
                let vehicle = &self.queue.vehicles[&id];
                vehicle.route.current_segment().region_entry_index()
            };
            if current >= target {
                // The plan is stale: the vehicle already reached the region.
                self.stats.missed += 1;
                self.advance_or_discard(id);
                continue;
            }
            if current + self.parameters.reserve >= target {
                // On reserve: the retry, if any, must target the boundary exactly.
                let eta = self.compute_eta(driver, graph, times, id, 0);
                if eta.is_none_or(|eta| eta >= self.parameters.high) {
                    debug!("Vehicle {id} could be rescheduled, deferring its plan");
                    self.stats.rescheduled += 1;
                    self.defer(id);
                    continue;
                }
            } else {
                // Before the reserve edges: only apply a plan the vehicle will still be
                // following when it gets there.
                let eta = self.compute_eta(driver, graph, times, id, self.parameters.reserve);
                if eta.is_none_or(|eta| eta >= self.parameters.mid) {
                    self.stats.rescheduled += 1;
                    self.queue.resume(id);
                    continue;
                }
            }
            self.apply_route(driver, id, route.clone(), routed_by);
        }
    }

    /// Splices a replacement route into the vehicle and pushes it to the simulation.
    fn apply_route(
        &mut self,
        driver: &mut impl SimulationDriver,
        id: VehicleId,
        route: NewRoute,
        routed_by: BackendKind,
    ) {
        let vehicle = self.queue.vehicles.get_mut(&id).unwrap();
        match vehicle.route.update_current_segment(route, routed_by) {
            Ok(()) => {
                let current = driver.route_index(id);
                driver.set_route(id, &vehicle.route.edges()[current..]);
                self.stats.planned += 1;
                self.advance_or_discard(id);
            }
            Err(error) => {
                // Malformed result; the vehicle keeps its path, others are unaffected.
                warn!("Dropping result for vehicle {id}: {error}");
                self.stats.missed += 1;
                self.advance_or_discard(id);
            }
        }
    }

    /// Returns a scheduled vehicle to the running set with its boundary-retry flag set.
    fn defer(&mut self, id: VehicleId) {
        let vehicle = self.queue.vehicles.get_mut(&id).unwrap();
        vehicle.route.current_segment_mut().rescheduled = true;
        self.queue.resume(id);
    }

    /// Advances the vehicle to its next segment, or discards it when none remains.
    fn advance_or_discard(&mut self, id: VehicleId) {
        if self.queue.vehicles.get_mut(&id).unwrap().switch_segment() {
            self.queue.resume(id);
        } else {
            self.discard(id);
        }
    }

    fn discard(&mut self, id: VehicleId) {
        self.stats.discarded += 1;
        self.queue.discard(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::LanePosition;
    use crate::network::testing::edge;
    use crate::network::OriginalEdgeId;
    use crate::units::Length;
    use hashbrown::HashMap;

    /// Minimal scripted driver: fixed routes, per-vehicle indices, unit lane positions.
    #[derive(Default)]
    struct TestDriver {
        time: Time,
        departed: Vec<VehicleId>,
        arrived: Vec<VehicleId>,
        routes: HashMap<VehicleId, Vec<OriginalEdgeId>>,
        indices: HashMap<VehicleId, usize>,
        positions: HashMap<VehicleId, LanePosition>,
        assigned: HashMap<VehicleId, Vec<OriginalEdgeId>>,
    }

    impl SimulationDriver for TestDriver {
        fn time(&self) -> Time {
            self.time
        }
        fn departed(&self) -> Vec<VehicleId> {
            self.departed.clone()
        }
        fn arrived(&self) -> Vec<VehicleId> {
            self.arrived.clone()
        }
        fn static_route(&self, vehicle: VehicleId) -> Vec<OriginalEdgeId> {
            self.routes[&vehicle].clone()
        }
        fn route_index(&self, vehicle: VehicleId) -> usize {
            self.indices.get(&vehicle).copied().unwrap_or(0)
        }
        fn lane_position(&self, vehicle: VehicleId) -> LanePosition {
            self.positions.get(&vehicle).copied().unwrap_or(LanePosition {
                position: Length(0.0),
                lane_length: Length(1.0),
                on_route_edge: true,
            })
        }
        fn edge_travel_time(&self, _edge: OriginalEdgeId) -> Option<Time> {
            None
        }
        fn rerouting_prediction(&self, _v: VehicleId, _e: OriginalEdgeId) -> Option<Time> {
            None
        }
        fn set_route(&mut self, vehicle: VehicleId, edges: &[OriginalEdgeId]) {
            self.assigned.insert(vehicle, edges.to_vec());
        }
    }

    /// A line of 10 edges (ids 1..=10) with a region on edges 6 and 7.
    fn fixture() -> (RouteGraph, Vec<Region>, TravelTimes) {
        let specs = (1..=10).map(|i| edge(i, i - 1, i, 10.0)).collect();
        let graph = RouteGraph::from_edges(specs, None).unwrap();
        let region = graph.make_region("r0", &[6, 7]).unwrap();
        let times = TravelTimes::new(&graph);
        (graph, vec![region], times)
    }

    fn scheduler(regions: Vec<Region>) -> Scheduler {
        Scheduler::new(
            regions,
            SchedulerParameters {
                low: Time(10.0),
                mid: Time(30.0),
                high: Time(60.0),
                reserve: 1,
            },
        )
        .unwrap()
    }

    #[test]
    fn misordered_thresholds_are_fatal_test() {
        let (_, regions, _) = fixture();
        let result = Scheduler::new(
            regions,
            SchedulerParameters {
                low: Time(30.0),
                mid: Time(10.0),
                high: Time(60.0),
                reserve: 1,
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn step_tracks_crossing_vehicles_test() {
        let (graph, regions, _) = fixture();
        let mut scheduler = scheduler(regions);
        let mut driver = TestDriver::default();
        driver.departed = vec![1, 2];
        driver.routes.insert(1, (1..=10).collect());
        // Vehicle 2 never touches the region.
        driver.routes.insert(2, vec![1, 2, 3]);
        scheduler.step(&driver, &graph).unwrap();
        assert_eq!(scheduler.stats.departed, 2);
        assert_eq!(scheduler.stats.considered, 1);
        assert_eq!(scheduler.queue.state_of(1), Some(VehicleState::Running));
        assert_eq!(scheduler.queue.state_of(2), None);
    }

    #[test]
    fn scheduling_window_test() {
        let (graph, regions, times) = fixture();
        let mut scheduler = scheduler(regions);
        let mut driver = TestDriver::default();
        driver.departed = vec![1];
        driver.routes.insert(1, (1..=10).collect());
        scheduler.step(&driver, &graph).unwrap();
        // Segment entry anchor is edge 5 (index 4), target index 5, reserve index 4.
        // From index 0 the ETA is 10 + 3 * 10 = 40s: inside (low, high), so scheduled.
        let batch = scheduler.schedule_vehicles(&driver, &graph, &times);
        assert_eq!(batch, vec![1]);
        assert_eq!(scheduler.queue.state_of(1), Some(VehicleState::Scheduled));
        assert_eq!(scheduler.stats.scheduled, 1);
    }

    #[test]
    fn eta_too_high_keeps_running_test() {
        let (graph, regions, mut times) = fixture();
        let mut scheduler = scheduler(regions);
        let mut driver = TestDriver::default();
        driver.departed = vec![1];
        driver.routes.insert(1, (1..=10).collect());
        scheduler.step(&driver, &graph).unwrap();
        // Congest the path: the ETA blows past `high`.
        times.refresh(|_| Some(Time(100.0)));
        let batch = scheduler.schedule_vehicles(&driver, &graph, &times);
        assert!(batch.is_empty());
        assert_eq!(scheduler.queue.state_of(1), Some(VehicleState::Running));
    }

    #[test]
    fn eta_too_low_skips_segment_test() {
        let (graph, regions, times) = fixture();
        let mut scheduler = scheduler(regions);
        let mut driver = TestDriver::default();
        driver.departed = vec![1];
        driver.routes.insert(1, (1..=10).collect());
        scheduler.step(&driver, &graph).unwrap();
        // Half-way through the edge before the reserve edge: ETA is half an edge time.
        driver.indices.insert(1, 3);
        driver.positions.insert(
            1,
            LanePosition {
                position: Length(5.0),
                lane_length: Length(10.0),
                on_route_edge: true,
            },
        );
        let batch = scheduler.schedule_vehicles(&driver, &graph, &times);
        assert!(batch.is_empty());
        // The only segment was skipped, the vehicle is done.
        assert_eq!(scheduler.queue.state_of(1), Some(VehicleState::Discarded));
        assert!(scheduler.stats.missed >= 1);
    }

    #[test]
    fn eta_exhausted_discards_test() {
        let (graph, regions, times) = fixture();
        let mut scheduler = scheduler(regions);
        let mut driver = TestDriver::default();
        driver.departed = vec![1];
        driver.routes.insert(1, (1..=10).collect());
        scheduler.step(&driver, &graph).unwrap();
        // The vehicle already passed its only target: no ETA can be computed.
        driver.indices.insert(1, 6);
        let eta = scheduler.compute_eta(&driver, &graph, &times, 1, 1);
        assert!(eta.is_none());
        let batch = scheduler.schedule_vehicles(&driver, &graph, &times);
        assert!(batch.is_empty());
        assert_eq!(scheduler.queue.state_of(1), Some(VehicleState::Discarded));
    }

    #[test]
    fn assign_routes_splices_test() {
        let (graph, regions, times) = fixture();
        let mut scheduler = scheduler(regions);
        let mut driver = TestDriver::default();
        driver.departed = vec![1];
        driver.routes.insert(1, (1..=10).collect());
        scheduler.step(&driver, &graph).unwrap();
        let batch = scheduler.schedule_vehicles(&driver, &graph, &times);
        assert_eq!(batch, vec![1]);
        driver.indices.insert(1, 2);
        // Replacement with matching anchors (edges 5 and 8).
        let route = vec![5, 6, 7, 8];
        scheduler.assign_routes(&mut driver, &graph, &times, &batch, &[Some(route)], BackendKind::Duo);
        assert_eq!(scheduler.stats.planned, 1);
        // The vehicle had a single segment: it is discarded after routing.
        assert_eq!(scheduler.queue.state_of(1), Some(VehicleState::Discarded));
        // The simulation got the tail from the current index onward.
        assert_eq!(driver.assigned[&1], (3..=10).collect::<Vec<_>>());
    }

    #[test]
    fn assign_routes_stale_plan_test() {
        let (graph, regions, times) = fixture();
        let mut scheduler = scheduler(regions);
        let mut driver = TestDriver::default();
        driver.departed = vec![1];
        driver.routes.insert(1, (1..=10).collect());
        scheduler.step(&driver, &graph).unwrap();
        let batch = scheduler.schedule_vehicles(&driver, &graph, &times);
        // The vehicle reached the region before the result came back.
        driver.indices.insert(1, 5);
        let missed_before = scheduler.stats.missed;
        scheduler.assign_routes(
            &mut driver,
            &graph,
            &times,
            &batch,
            &[Some(vec![5, 6, 7, 8])],
            BackendKind::Dso,
        );
        assert_eq!(scheduler.stats.missed, missed_before + 1);
        assert_eq!(scheduler.stats.planned, 0);
        assert!(driver.assigned.is_empty());
    }

    #[test]
    fn assign_routes_defers_runaway_eta_test() {
        let (graph, regions, mut times) = fixture();
        let mut scheduler = scheduler(regions);
        let mut driver = TestDriver::default();
        driver.departed = vec![1];
        driver.routes.insert(1, (1..=10).collect());
        scheduler.step(&driver, &graph).unwrap();
        let batch = scheduler.schedule_vehicles(&driver, &graph, &times);
        // On reserve, but congestion pushed the fresh boundary ETA past `high`.
        driver.indices.insert(1, 4);
        times.refresh(|_| Some(Time(100.0)));
        scheduler.assign_routes(
            &mut driver,
            &graph,
            &times,
            &batch,
            &[Some(vec![5, 6, 7, 8])],
            BackendKind::Dso,
        );
        assert_eq!(scheduler.stats.rescheduled, 1);
        assert_eq!(scheduler.queue.state_of(1), Some(VehicleState::Running));
        // The deferred retry targets the boundary exactly.
        let vehicle = &scheduler.queue.vehicles[&1];
        assert!(vehicle.route.current_segment().rescheduled);
    }

    #[test]
    fn assign_routes_drops_arrived_test() {
        let (graph, regions, times) = fixture();
        let mut scheduler = scheduler(regions);
        let mut driver = TestDriver::default();
        driver.departed = vec![1];
        driver.routes.insert(1, (1..=10).collect());
        scheduler.step(&driver, &graph).unwrap();
        let batch = scheduler.schedule_vehicles(&driver, &graph, &times);
        // The vehicle leaves the simulation before the result is applied.
        driver.departed.clear();
        driver.arrived = vec![1];
        scheduler.step(&driver, &graph).unwrap();
        scheduler.assign_routes(
            &mut driver,
            &graph,
            &times,
            &batch,
            &[Some(vec![5, 6, 7, 8])],
            BackendKind::Dso,
        );
        assert_eq!(scheduler.queue.state_of(1), Some(VehicleState::Arrived));
        assert!(driver.assigned.is_empty());
    }
}
