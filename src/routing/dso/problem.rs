// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Encoding of a [TrafficProblem] as a declarative planning-problem document.
//!
//! The document declares typed object groups (junctions, roads, cars and usage levels),
//! initial-state facts (connectivity, capacity, congestion thresholds, per-vehicle allowed
//! roads, start and destination positions) and a cost-minimization goal.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use hashbrown::HashMap;
use itertools::Itertools;
use log::debug;

use crate::builder::TrafficProblem;
use crate::network::cost::TravelTimes;
use crate::network::{EdgeIndex, JunctionIndex, RouteGraph, RouteIndex};

/// Cost multiplier of a road in its light-traffic regime.
const LIGHT_COST_MULTIPLIER: i64 = 1;
/// Cost multiplier of a road in its medium-traffic regime.
const MEDIUM_COST_MULTIPLIER: i64 = 10;
/// Cost multiplier of a road in its heavy-traffic regime.
const HEAVY_COST_MULTIPLIER: i64 = 100;

/// Road costs above this are clamped; the planner works on integers.
const MAX_ROAD_COST: f64 = 5000.0;

const JUNCTION_GROUP: &str = "junction";
const ROAD_GROUP: &str = "road";
const CAR_GROUP: &str = "car";
const USE_GROUP: &str = "use";

/// A planning problem ready to be written for the external planner.
#[derive(Clone, Debug)]
pub struct PlanningProblem {
    pub name: String,
    pub domain: String,
    /// Typed object declarations, group -> object names.
    objects: BTreeMap<&'static str, BTreeSet<String>>,
    init: Vec<String>,
    goal: Vec<String>,
    metric: String,
}

impl PlanningProblem {
    fn new(name: String, domain: String) -> Self {
        PlanningProblem {
            name,
            domain,
            objects: BTreeMap::new(),
            init: Vec::new(),
            goal: Vec::new(),
            metric: "minimize (total-cost)".to_string(),
        }
    }

    fn add_object(&mut self, group: &'static str, name: String) {
        self.objects.entry(group).or_default().insert(name);
    }

    fn add_init(&mut self, fact: String) {
        self.init.push(fact);
    }

    fn add_goal(&mut self, fact: String) {
        self.goal.push(fact);
    }

    /// Writes the document to the given path.
    pub fn save(&self, path: &Path) -> Result<()> {
        debug!("Creating planning problem `{}` in {path:?}", self.name);
        let mut file =
            File::create(path).with_context(|| format!("Failed to create problem file {path:?}"))?;
        write!(file, "{self}").with_context(|| format!("Failed to write problem file {path:?}"))?;
        Ok(())
    }
}

impl fmt::Display for PlanningProblem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "(define")?;
        writeln!(f, "(problem {})", self.name)?;
        writeln!(f, "(:domain {})", self.domain)?;
        writeln!(f, "(:objects")?;
        for (group, names) in &self.objects {
            writeln!(f, "    {} - {group}", names.iter().join(" "))?;
        }
        writeln!(f, ")")?;
        writeln!(f, "(:init")?;
        for fact in &self.init {
            writeln!(f, "    {fact}")?;
        }
        writeln!(f, "    (= (total-cost) 0)")?;
        writeln!(f, ")")?;
        writeln!(f, "(:goal (and")?;
        for fact in &self.goal {
            writeln!(f, "    {fact}")?;
        }
        writeln!(f, "))")?;
        writeln!(f, "(:metric {})", self.metric)?;
        write!(f, ")")
    }
}

/// Per-chain junction names after decomposition.
#[derive(Debug, Default)]
struct Connections {
    /// Names of the junctions each chain can be entered from.
    starts: HashMap<RouteIndex, BTreeSet<String>>,
    /// Names of the junctions each chain ends at.
    ends: HashMap<RouteIndex, BTreeSet<String>>,
    /// All junction object names, split ones included.
    names: BTreeSet<String>,
}

/// Decomposes the junctions touched by the restricted chains.
///
/// When not all inbound chains of a junction reach all of its outbound chains, the
/// junction is logically split: each distinct reachable-set group gets its own junction
/// object, so the planner never assumes a turn the network forbids.
fn decompose_junctions(graph: &RouteGraph, chains: &BTreeSet<RouteIndex>) -> Connections {
    let mut connections = Connections::default();
    let junctions: BTreeSet<JunctionIndex> = chains
        .iter()
        .flat_map(|&c| [graph.chain(c).origin(), graph.chain(c).destination()])
        .collect();
    for junction_index in junctions {
        let junction = graph.junction(junction_index);
        let base = format!("j{}", junction.id);
        // Restrict the connectivity to the chains of the problem.
        let mut in_chains: Vec<(RouteIndex, Vec<RouteIndex>)> = junction
            .connections()
            .filter(|(inbound, _)| chains.contains(inbound))
            .map(|(inbound, outs)| {
                let outs: Vec<RouteIndex> =
                    outs.iter().copied().filter(|o| chains.contains(o)).collect();
                (inbound, outs)
            })
            .collect();
        in_chains.sort_unstable_by_key(|(inbound, _)| *inbound);
        let mut groups: HashMap<Vec<RouteIndex>, String> = HashMap::new();
        let mut split_count = 0;
        for (inbound, outs) in in_chains {
            if outs.is_empty() {
                // An ending connection stays on the original junction.
                connections.ends.entry(inbound).or_default().insert(base.clone());
                connections.names.insert(base.clone());
                continue;
            }
            let name = groups
                .entry(outs.clone())
                .or_insert_with(|| {
                    if split_count == 0 {
                        split_count += 1;
                        base.clone()
                    } else {
                        let name = format!("{base}s{}", split_count - 1);
                        split_count += 1;
                        name
                    }
                })
                .clone();
            connections.names.insert(name.clone());
            connections.ends.entry(inbound).or_default().insert(name.clone());
            for out in outs {
                connections.starts.entry(out).or_default().insert(name.clone());
            }
        }
        // Chains leaving a junction nothing arrives at still need an entry point.
        for &chain in chains {
            if graph.chain(chain).origin() == junction_index
                && connections.starts.get(&chain).is_none_or(BTreeSet::is_empty)
            {
                connections.starts.entry(chain).or_default().insert(base.clone());
                connections.names.insert(base.clone());
            }
        }
    }
    connections
}

/// Splits a capacity into its light / medium / heavy congestion thresholds.
///
/// Roughly 35 % of the capacity drives in light traffic (at least one car), 40 % in
/// medium and the remainder in heavy; the three always sum to the capacity.
fn congestion_thresholds(capacity: u32) -> (u32, u32, u32) {
    let light = ((capacity as f64 * 0.35).round() as u32).clamp(1, capacity);
    let medium = ((capacity as f64 * 0.4).round() as u32).min(capacity - light);
    let heavy = capacity - light - medium;
    (light, medium, heavy)
}

/// Encodes a built [TrafficProblem] as a [PlanningProblem].
///
/// The restricted network is the set of chains fully covered by the problem's aggregate
/// edge set; capacities are reduced by the vehicles excluded from replanning that occupy
/// the same edges.
pub fn encode(
    graph: &RouteGraph,
    times: &TravelTimes,
    problem: &TrafficProblem,
    domain: &str,
    name: &str,
) -> PlanningProblem {
    debug_assert!(problem.is_valid());
    let network = problem.network.as_ref().unwrap();
    let mut pddl = PlanningProblem::new(name.to_string(), domain.to_string());
    // Chains fully inside the restricted network: candidate routes are unions of whole
    // chains, so partially covered chains cannot be part of any plan.
    let chains: BTreeSet<RouteIndex> = graph
        .iter_chains()
        .filter(|(_, chain)| chain.edges().iter().all(|e| network.contains(e)))
        .map(|(index, _)| index)
        .collect();
    // -------------- Junctions --------------
    let connections = decompose_junctions(graph, &chains);
    for name in &connections.names {
        pddl.add_object(JUNCTION_GROUP, name.clone());
    }
    for &chain in &chains {
        let empty = BTreeSet::new();
        let starts = connections.starts.get(&chain).unwrap_or(&empty);
        let ends = connections.ends.get(&chain).unwrap_or(&empty);
        for start in starts {
            for end in ends {
                pddl.add_init(format!("(connected {start} r{} {end})", chain.index()));
            }
        }
    }
    // -------------- Roads --------------
    // Vehicles that are not being replanned lower the remaining capacity of the edges
    // they currently occupy.
    let mut occupied: HashMap<EdgeIndex, u32> = HashMap::new();
    for vehicle in &problem.vehicles {
        if problem.sub_graphs.contains_key(&vehicle.id) {
            continue;
        }
        for edge in &vehicle.segment_edges {
            *occupied.entry(*edge).or_insert(0) += 1;
        }
    }
    let mut max_capacity = 0;
    for &chain_index in &chains {
        let chain = graph.chain(chain_index);
        let road = format!("r{}", chain_index.index());
        pddl.add_object(ROAD_GROUP, road.clone());
        let capacity = chain.capacity();
        max_capacity = max_capacity.max(capacity);
        // Congestion-dependent road costs.
        let cost = times.chain_time(graph, chain_index).0.min(MAX_ROAD_COST).max(1.0);
        pddl.add_init(format!(
            "(= (length-light {road}) {})",
            (cost * LIGHT_COST_MULTIPLIER as f64) as i64
        ));
        pddl.add_init(format!(
            "(= (length-medium {road}) {})",
            (cost * MEDIUM_COST_MULTIPLIER as f64) as i64
        ));
        pddl.add_init(format!(
            "(= (length-heavy {road}) {})",
            (cost * HEAVY_COST_MULTIPLIER as f64) as i64
        ));
        // Congestion thresholds: zero cars is always light traffic.
        let (light, medium, heavy) = congestion_thresholds(capacity);
        pddl.add_init(format!("(light {road} use0)"));
        let mut level = 1;
        for (kind, count) in [("light", light), ("medium", medium), ("heavy", heavy)] {
            for _ in 0..count {
                pddl.add_init(format!("({kind} {road} use{level})"));
                level += 1;
            }
        }
        pddl.add_init(format!("(cap {road} use{capacity})"));
        // Remaining capacity after the uncontrolled vehicles already on the chain.
        let vehicle_count: u32 = chain
            .edges()
            .iter()
            .filter_map(|e| occupied.get(e))
            .sum::<u32>()
            .min(capacity);
        pddl.add_init(format!("(using {road} use{vehicle_count})"));
    }
    // Usage levels and their successor chain, shared by all roads.
    for level in 0..max_capacity {
        pddl.add_object(USE_GROUP, format!("use{level}"));
        pddl.add_init(format!("(next use{level} use{})", level + 1));
    }
    pddl.add_object(USE_GROUP, format!("use{max_capacity}"));
    // -------------- Vehicles --------------
    for vehicle in &problem.vehicles {
        let Some(sub_graph) = problem.sub_graphs.get(&vehicle.id) else {
            continue;
        };
        let car = format!("v{}", vehicle.internal_id);
        pddl.add_object(CAR_GROUP, car.clone());
        // The vehicle may only use the chains of its own candidate sub-graph.
        for &chain in &chains {
            let edges = graph.chain(chain).edges();
            if edges.iter().all(|e| sub_graph.contains(e)) {
                pddl.add_init(format!("(allowed {car} r{})", chain.index()));
            }
        }
        // Artificial origin and destination junctions, connected only to the vehicle's
        // own entry and exit chains.
        let origin = format!("js{}", vehicle.internal_id);
        let destination = format!("je{}", vehicle.internal_id);
        pddl.add_object(JUNCTION_GROUP, origin.clone());
        pddl.add_object(JUNCTION_GROUP, destination.clone());
        let entry_chain = graph.chain_starting_at(vehicle.entry_edge());
        let exit_chain = graph.chain_ending_at(vehicle.exit_edge());
        if let (Some(entry_chain), Some(exit_chain)) = (entry_chain, exit_chain) {
            let empty = BTreeSet::new();
            for end in connections.ends.get(&entry_chain).unwrap_or(&empty) {
                pddl.add_init(format!("(connected {origin} r{} {end})", entry_chain.index()));
            }
            for start in connections.starts.get(&exit_chain).unwrap_or(&empty) {
                pddl.add_init(format!(
                    "(connected {start} r{} {destination})",
                    exit_chain.index()
                ));
            }
        }
        pddl.add_init(format!("(at {car} {origin})"));
        pddl.add_init(format!("(togo {car} {destination})"));
        pddl.add_goal(format!("(at {car} {destination})"));
    }
    pddl
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{NetworkBuilder, ProblemVehicle};
    use crate::network::testing::diamond_graph;
    use crate::network::RegionIndex;
    use crate::parameters::BuilderParameters;
    use crate::units::Time;

    fn built_problem(graph: &RouteGraph, times: &TravelTimes) -> TrafficProblem {
        let mut builder = NetworkBuilder::new(BuilderParameters {
            stretch: 3.0,
            max_routes: 10,
            ..Default::default()
        });
        let mut problem = TrafficProblem::new("1_r0".into(), RegionIndex::new(0));
        problem.vehicles = vec![
            ProblemVehicle {
                id: 7,
                internal_id: 0,
                segment_edges: graph.resolve_edges(&[1, 2, 3, 6]).unwrap(),
                eta: Time(30.),
            },
            // Not replanned: occupies the upper branch, reducing its capacity.
            ProblemVehicle {
                id: 8,
                internal_id: 1,
                segment_edges: graph.resolve_edges(&[2, 3]).unwrap(),
                eta: Time(30.),
            },
        ];
        assert!(builder.build_network(graph, times, &mut problem));
        problem
    }

    #[test]
    fn encode_test() {
        let graph = diamond_graph();
        let times = TravelTimes::new(&graph);
        let problem = built_problem(&graph, &times);
        let pddl = encode(&graph, &times, &problem, "network_allowed", "problem_1_r0");
        let text = pddl.to_string();
        // Document skeleton.
        assert!(text.starts_with("(define\n(problem problem_1_r0)\n(:domain network_allowed)"));
        assert!(text.contains("(:metric minimize (total-cost))"));
        assert!(text.contains("(= (total-cost) 0)"));
        // The replanned vehicle gets its start/goal facts on artificial junctions.
        assert!(text.contains("(at v0 js0)"));
        assert!(text.contains("(togo v0 je0)"));
        assert!(text.contains("(at v0 je0)"));
        // The uncontrolled vehicle is not declared as a car.
        assert!(!text.contains("(at v1 js1)"));
        // Its occupancy lowers the upper branch's remaining capacity.
        let upper = graph.edge(graph.edge_index(2).unwrap()).chain();
        assert!(text.contains(&format!("(using r{} use2)", upper.index())));
        // Allowed facts restrict the vehicle to its candidate chains.
        assert!(text.contains("(allowed v0 "));
    }

    #[test]
    fn congestion_thresholds_test() {
        // The three regimes always sum to the capacity.
        for capacity in 1..50 {
            let (light, medium, heavy) = congestion_thresholds(capacity);
            assert_eq!(light + medium + heavy, capacity);
            assert!(light >= 1);
        }
        assert_eq!(congestion_thresholds(10), (4, 4, 2));
    }

    #[test]
    fn junction_splitting_test() {
        // Two inbound edges at junction 2, each reaching a different outbound edge.
        use crate::network::testing::edge;
        let specs = vec![
            edge(1, 0, 2, 1.0),
            edge(2, 1, 2, 1.0),
            edge(3, 2, 3, 1.0),
            edge(4, 2, 4, 1.0),
        ];
        let turns = vec![(1, 3), (2, 4)];
        let graph = RouteGraph::from_edges(specs, Some(&turns)).unwrap();
        let chains: BTreeSet<RouteIndex> = graph.iter_chains().map(|(i, _)| i).collect();
        let connections = decompose_junctions(&graph, &chains);
        // Junction 2 is split: the two inbound chains end at different junction objects.
        let in1 = graph.chain_ending_at(graph.edge_index(1).unwrap()).unwrap();
        let in2 = graph.chain_ending_at(graph.edge_index(2).unwrap()).unwrap();
        let ends1 = connections.ends.get(&in1).unwrap();
        let ends2 = connections.ends.get(&in2).unwrap();
        assert!(ends1.is_disjoint(ends2));
    }
}
