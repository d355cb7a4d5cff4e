// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Parsing and validation of planner result files.
use std::fs;
use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use log::{debug, warn};

use crate::builder::{ProblemVehicle, TrafficProblem};
use crate::network::{EdgeIndex, RouteGraph, RouteIndex, VehicleId};
use crate::routing::NewRoute;

/// The ranked result files produced by one planner invocation.
#[derive(Clone, Debug)]
pub struct PlanResult {
    /// Result files sorted by name; later files hold better plans.
    files: Vec<PathBuf>,
}

impl PlanResult {
    /// Collects the result files written under the given path prefix.
    ///
    /// Returns `None` when the planner produced no output at all.
    pub fn find(result_base: &Path) -> Option<Self> {
        let dir = result_base.parent()?;
        let prefix = result_base.file_name()?.to_string_lossy().to_string();
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .ok()?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .is_some_and(|name| name.to_string_lossy().starts_with(&prefix))
            })
            .collect();
        if files.is_empty() {
            return None;
        }
        // Ranked order: later-numbered files override earlier ones per vehicle.
        files.sort();
        Some(PlanResult { files })
    }

    /// Parses the result files into per-vehicle chain sequences.
    ///
    /// Each line is a parenthesized, whitespace-separated tuple naming a vehicle and one
    /// chain of its plan; two planner dialects are understood (`(vN ... rM ...)` and
    /// `(step vN js rM je)`). Lines from a later file replace a vehicle's entry from an
    /// earlier one. Malformed lines are dropped.
    pub fn parse(&self) -> HashMap<usize, Vec<usize>> {
        let mut paths: HashMap<usize, Vec<usize>> = HashMap::new();
        for file in &self.files {
            let Ok(content) = fs::read_to_string(file) else {
                // The planner may have been killed while writing.
                warn!("Unable to read result file {file:?}");
                continue;
            };
            let mut current: HashMap<usize, Vec<usize>> = HashMap::new();
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let Some((car, chain)) = parse_line(line) else {
                    warn!("Malformed result line in {file:?}: `{line}`");
                    continue;
                };
                current.entry(car).or_default().push(chain);
            }
            // Replace previous entries by the later (better-ranked) plan.
            paths.extend(current);
        }
        paths
    }

    /// Reconstructs and validates the routes of a problem's vehicles.
    ///
    /// A result referencing an unknown vehicle, an unknown chain, a non-contiguous
    /// sequence or mismatched boundary edges is dropped; the other vehicles of the batch
    /// are unaffected.
    pub fn extract_routes(
        &self,
        graph: &RouteGraph,
        problem: &TrafficProblem,
    ) -> HashMap<VehicleId, NewRoute> {
        let paths = self.parse();
        let by_internal: HashMap<usize, &ProblemVehicle> = problem
            .vehicles
            .iter()
            .map(|v| (v.internal_id, v))
            .collect();
        let mut routes = HashMap::new();
        for (internal_id, chains) in paths {
            let Some(vehicle) = by_internal.get(&internal_id) else {
                warn!("Result references unknown vehicle id v{internal_id}");
                continue;
            };
            let Some(edges) = chains_to_edges(graph, &chains) else {
                warn!("Invalid path generated for vehicle {}", vehicle.id);
                continue;
            };
            if !graph.check_edge_sequence(&edges) {
                warn!("Disconnected path generated for vehicle {}", vehicle.id);
                continue;
            }
            if edges.first() != Some(&vehicle.entry_edge())
                || edges.last() != Some(&vehicle.exit_edge())
            {
                warn!(
                    "Mismatched boundary edges generated for vehicle {}",
                    vehicle.id
                );
                continue;
            }
            debug!("Extracted a {}-edge route for vehicle {}", edges.len(), vehicle.id);
            routes.insert(
                vehicle.id,
                edges.iter().map(|e| graph.edge(*e).id).collect(),
            );
        }
        routes
    }
}

/// Parses one result line into a `(vehicle, chain)` pair.
fn parse_line(line: &str) -> Option<(usize, usize)> {
    let inner = line.strip_prefix('(')?.strip_suffix(')')?;
    let tokens: Vec<&str> = inner.split_whitespace().collect();
    let (car, chain) = if tokens.first()?.starts_with('v') {
        // `(vN jsN rM jX)` dialect: the vehicle leads the tuple.
        (tokens.first()?, tokens.get(2)?)
    } else {
        // `(step vN jX rM jY)` dialect: an action name leads the tuple.
        (tokens.get(1)?, tokens.get(3)?)
    };
    let car = car.strip_prefix('v')?.parse().ok()?;
    let chain = chain.strip_prefix('r')?.parse().ok()?;
    Some((car, chain))
}

/// Flattens a sequence of chain ids into the corresponding edge sequence.
fn chains_to_edges(graph: &RouteGraph, chains: &[usize]) -> Option<Vec<EdgeIndex>> {
    if chains.is_empty() {
        return None;
    }
    let mut edges = Vec::new();
    for &chain in chains {
        if chain >= graph.nb_chains() {
            return None;
        }
        edges.extend_from_slice(graph.chain(RouteIndex::new(chain)).edges());
    }
    Some(edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{EpisodeInfo, ProblemVehicle};
    use crate::network::testing::diamond_graph;
    use crate::network::RegionIndex;
    use crate::units::Time;

    fn write(path: &Path, content: &str) {
        fs::write(path, content).unwrap();
    }

    fn problem_for(graph: &RouteGraph) -> TrafficProblem {
        let mut problem = TrafficProblem {
            region: RegionIndex::new(0),
            vehicles: vec![ProblemVehicle {
                id: 42,
                internal_id: 0,
                segment_edges: graph.resolve_edges(&[1, 2, 3, 6]).unwrap(),
                eta: Time(30.),
            }],
            network: Some(graph.resolve_edges(&[1, 2, 3, 4, 5, 6]).unwrap().into_iter().collect()),
            sub_graphs: HashMap::new(),
            info: EpisodeInfo::default(),
        };
        problem.info.name = "1_r0".into();
        problem
    }

    #[test]
    fn parse_dialects_test() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("result_1_r0");
        write(
            &dir.path().join("result_1_r0.1"),
            "(v0 js0 r1 je0)\n(move v1 j4 r3 j5)\n",
        );
        let result = PlanResult::find(&base).unwrap();
        let paths = result.parse();
        assert_eq!(paths[&0], vec![1]);
        assert_eq!(paths[&1], vec![3]);
    }

    #[test]
    fn later_file_overrides_test() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("result_1_r0");
        write(&dir.path().join("result_1_r0.1"), "(v0 js0 r1 je0)\n(v1 js1 r0 je1)\n");
        // The second, better-ranked plan only covers vehicle 0.
        write(&dir.path().join("result_1_r0.2"), "(v0 js0 r2 je0)\n");
        let result = PlanResult::find(&base).unwrap();
        let paths = result.parse();
        assert_eq!(paths[&0], vec![2]);
        // Vehicle 1 keeps its entry from the earlier file.
        assert_eq!(paths[&1], vec![0]);
    }

    #[test]
    fn malformed_lines_are_dropped_test() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("result_1_r0");
        write(
            &dir.path().join("result_1_r0.1"),
            "garbage\n(v0 js0 r1 je0)\n(incomplete\n",
        );
        let result = PlanResult::find(&base).unwrap();
        let paths = result.parse();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[&0], vec![1]);
    }

    #[test]
    fn find_without_output_test() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PlanResult::find(&dir.path().join("result_1_r0")).is_none());
    }

    #[test]
    fn extract_routes_test() {
        let graph = diamond_graph();
        let problem = problem_for(&graph);
        // Chain ids of the diamond: entry edge 1, upper branch, exit edge 6.
        let entry = graph.chain_starting_at(graph.edge_index(1).unwrap()).unwrap();
        let upper = graph.edge(graph.edge_index(2).unwrap()).chain();
        let exit = graph.chain_ending_at(graph.edge_index(6).unwrap()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("result_1_r0");
        write(
            &dir.path().join("result_1_r0.1"),
            &format!(
                "(v0 js0 r{} j1)\n(v0 j1 r{} j4)\n(v0 j4 r{} je0)\n",
                entry.index(),
                upper.index(),
                exit.index()
            ),
        );
        let result = PlanResult::find(&base).unwrap();
        let routes = result.extract_routes(&graph, &problem);
        assert_eq!(routes[&42], vec![1, 2, 3, 6]);
    }

    #[test]
    fn extract_rejects_invalid_test() {
        let graph = diamond_graph();
        let problem = problem_for(&graph);
        let entry = graph.chain_starting_at(graph.edge_index(1).unwrap()).unwrap();
        let upper = graph.edge(graph.edge_index(2).unwrap()).chain();
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("result_1_r0");
        // Unknown vehicle, unknown chain, and a path missing its exit anchor.
        write(
            &dir.path().join("result_1_r0.1"),
            &format!(
                "(v9 js9 r{} je9)\n(v0 js0 r99 je0)\n",
                entry.index()
            ),
        );
        let result = PlanResult::find(&base).unwrap();
        assert!(result.extract_routes(&graph, &problem).is_empty());
        // A contiguous path that stops short of the exit anchor is rejected as well.
        write(
            &dir.path().join("result_1_r0.1"),
            &format!("(v0 js0 r{} je0)\n(v0 j1 r{} je0)\n", entry.index(), upper.index()),
        );
        let result = PlanResult::find(&base).unwrap();
        assert!(result.extract_routes(&graph, &problem).is_empty());
    }
}
