// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Centralized routing: a batch of vehicles per region is encoded as a declarative
//! planning problem and solved by an external planner, accounting for the capacity the
//! vehicles take from each other.
pub mod dispatch;
pub mod problem;
pub mod result;

use std::fs;
use std::time::Instant;

use anyhow::{Context, Result};
use hashbrown::HashMap;
use log::{info, warn};

use self::dispatch::{dispatch, PlannerCall};
use self::result::PlanResult;
use crate::builder::{NetworkBuilder, ProblemVehicle, TrafficProblem};
use crate::network::cost::TravelTimes;
use crate::network::{Region, RegionIndex, RouteGraph, VehicleId};
use crate::parameters::{BuilderParameters, PlannerConfig};
use crate::routing::NewRoute;
use crate::stats::SolverStats;
use crate::units::Time;

/// The centralized backend.
///
/// Owns one [NetworkBuilder] (and thus one sub-graph cache) per controlled region and the
/// planner configuration; planner latency is absorbed by the scheduler's staleness check,
/// so results requested in one window are applied in the next.
#[derive(Debug)]
pub struct Dso {
    config: PlannerConfig,
    /// Name of the planning domain referenced by every problem file.
    domain: String,
    builders: Vec<NetworkBuilder>,
    region_names: Vec<String>,
    /// Window counter, part of every problem name.
    counter: usize,
    pub stats: SolverStats,
}

impl Dso {
    /// Creates the backend for the given regions.
    pub fn new(
        config: PlannerConfig,
        builder_parameters: BuilderParameters,
        regions: &[Region],
        domain: &str,
    ) -> Result<Self> {
        config.validate()?;
        builder_parameters.validate()?;
        fs::create_dir_all(&config.work_dir)
            .with_context(|| format!("Failed to create work directory {:?}", config.work_dir))?;
        let builders = regions
            .iter()
            .map(|_| NetworkBuilder::new(builder_parameters.clone()))
            .collect();
        let region_names = regions.iter().map(|r| r.name.clone()).collect();
        info!("Initialized DSO routing for {} regions", regions.len());
        Ok(Dso {
            config,
            domain: domain.to_string(),
            builders,
            region_names,
            counter: 0,
            stats: SolverStats::default(),
        })
    }

    /// Routes a scheduled batch, one planning problem per region.
    ///
    /// Returns the validated replacement routes by vehicle id; vehicles of problems that
    /// timed out or failed are simply absent and re-enter the scheduling pool next window
    /// if still eligible.
    pub fn route_vehicles(
        &mut self,
        graph: &RouteGraph,
        times: &TravelTimes,
        vehicles: Vec<(Option<RegionIndex>, ProblemVehicle)>,
    ) -> HashMap<VehicleId, NewRoute> {
        let now = Instant::now();
        self.counter += 1;
        let mut problems = self.construct_problems(graph, times, vehicles);
        if problems.is_empty() {
            return HashMap::new();
        }
        // Encode and write the valid problems.
        let mut calls = Vec::new();
        let mut submitted = Vec::new();
        for (index, traffic_problem) in problems.iter().enumerate() {
            if !traffic_problem.is_valid() {
                continue;
            }
            let name = &traffic_problem.info.name;
            let problem_name = format!("problem_{name}");
            let pddl = problem::encode(graph, times, traffic_problem, &self.domain, &problem_name);
            let problem_file = self.config.work_dir.join(format!("{problem_name}.pddl"));
            if let Err(error) = pddl.save(&problem_file) {
                warn!("Skipping problem {problem_name}: {error}");
                continue;
            }
            calls.push(PlannerCall {
                problem_file,
                result_base: self.config.work_dir.join(format!("result_{name}")),
            });
            submitted.push(index);
        }
        self.stats.problems += calls.len();
        let outcomes = dispatch(&self.config, &calls);
        // Merge the results of all planner calls; each problem is independent.
        let mut routes = HashMap::new();
        for (slot, &index) in submitted.iter().enumerate() {
            let traffic_problem = &mut problems[index];
            if !outcomes[slot] {
                self.stats.timeouts += 1;
            } else if let Some(result) = PlanResult::find(&calls[slot].result_base) {
                let extracted = result.extract_routes(graph, traffic_problem);
                self.stats.solved += 1;
                self.stats.vehicles_routed += extracted.len();
                routes.extend(extracted);
            } else {
                // The planner exited cleanly without writing anything: a miss for every
                // vehicle of the problem.
                self.stats.timeouts += 1;
            }
            traffic_problem.free();
        }
        self.stats.wall_time += Time(now.elapsed().as_secs_f64());
        info!(
            "DSO routed {}/{} vehicles in this window",
            routes.len(),
            problems.iter().map(|p| p.info.vehicle_info.total).sum::<usize>()
        );
        routes
    }

    /// Partitions the batch per region and builds each problem's restricted network.
    ///
    /// Vehicles whose current segment lies outside every region are ignored; regions
    /// without vehicles produce no problem.
    fn construct_problems(
        &mut self,
        graph: &RouteGraph,
        times: &TravelTimes,
        vehicles: Vec<(Option<RegionIndex>, ProblemVehicle)>,
    ) -> Vec<TrafficProblem> {
        let mut problems: Vec<TrafficProblem> = self
            .region_names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                TrafficProblem::new(format!("{}_{name}", self.counter), RegionIndex::new(i))
            })
            .collect();
        for (region, mut vehicle) in vehicles {
            let Some(region) = region else {
                continue;
            };
            debug_assert!(region.index() < problems.len());
            let traffic_problem = &mut problems[region.index()];
            vehicle.internal_id = traffic_problem.vehicles.len();
            traffic_problem.vehicles.push(vehicle);
        }
        for traffic_problem in &mut problems {
            if !traffic_problem.vehicles.is_empty() {
                let builder = &mut self.builders[traffic_problem.region.index()];
                builder.build_network(graph, times, traffic_problem);
            }
        }
        problems.retain(|p| !p.vehicles.is_empty());
        problems
    }
}
