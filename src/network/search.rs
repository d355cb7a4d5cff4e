// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Shortest-path and bounded alternative-route search over the route-graph.
//!
//! Chains are the search edges and junctions the search nodes. A search terminates on the
//! chain whose *last edge* is the requested exit edge, not on its junction: several chains
//! can share a junction and only one of them carries the exit edge.
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use hashbrown::HashMap;

use crate::network::cost::TravelTimes;
use crate::network::{EdgeIndex, RouteGraph, RouteIndex};
use crate::units::Time;

/// An entry of the search queue.
//
// Ordering is reversed so that the BinaryHeap pops the cheapest entry first.
#[derive(Debug)]
struct SearchEntry {
    cost: Time,
    chain: RouteIndex,
}

impl PartialEq for SearchEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost
    }
}

impl Eq for SearchEntry {}

impl Ord for SearchEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cost
            .partial_cmp(&other.cost)
            .unwrap_or(Ordering::Equal)
            .reverse()
    }
}

impl PartialOrd for SearchEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Resolves the entry and exit anchors of a search.
///
/// The entry edge must start a chain and the exit edge must end one; anything else cannot be
/// spliced back into a vehicle's path.
fn anchors(graph: &RouteGraph, entry: EdgeIndex, exit: EdgeIndex) -> Option<(RouteIndex, RouteIndex)> {
    let start = graph.chain_starting_at(entry)?;
    let end = graph.chain_ending_at(exit)?;
    Some((start, end))
}

/// Flattens a sequence of chains into its edge sequence.
fn flatten(graph: &RouteGraph, chains: &[RouteIndex]) -> Vec<EdgeIndex> {
    chains
        .iter()
        .flat_map(|c| graph.chain(*c).edges().iter().copied())
        .collect()
}

/// Computes the fastest (in terms of live travel time) edge sequence from `entry` to `exit`.
///
/// Returns `None` if the endpoints are disconnected or are not chain boundaries.
pub fn dijkstra(
    graph: &RouteGraph,
    times: &TravelTimes,
    entry: EdgeIndex,
    exit: EdgeIndex,
) -> Option<Vec<EdgeIndex>> {
    dijkstra_with_cost(graph, times, entry, exit).map(|(path, _)| path)
}

pub(crate) fn dijkstra_with_cost(
    graph: &RouteGraph,
    times: &TravelTimes,
    entry: EdgeIndex,
    exit: EdgeIndex,
) -> Option<(Vec<EdgeIndex>, Time)> {
    let (start, _) = anchors(graph, entry, exit)?;
    let mut costs: HashMap<RouteIndex, Time> = HashMap::from([(start, Time::zero())]);
    let mut prev: HashMap<RouteIndex, Option<RouteIndex>> = HashMap::from([(start, None)]);
    let mut queue = BinaryHeap::new();
    queue.push(SearchEntry {
        cost: Time::zero(),
        chain: start,
    });
    while let Some(SearchEntry { cost, chain }) = queue.pop() {
        if costs.get(&chain).is_some_and(|best| cost > *best) {
            // Stale entry, a cheaper path to this chain was already expanded.
            continue;
        }
        if graph.chain(chain).last_edge() == exit {
            // Reached the target, reconstruct the chain sequence.
            let mut chains = vec![chain];
            let mut current = chain;
            while let Some(Some(p)) = prev.get(&current) {
                chains.push(*p);
                current = *p;
            }
            chains.reverse();
            let edges = flatten(graph, &chains);
            // Guards against reconstructing through the wrong parallel chain at a junction.
            if edges.first() != Some(&entry) || edges.last() != Some(&exit) {
                return None;
            }
            debug_assert!(graph.check_edge_sequence(&edges));
            return Some((edges, cost));
        }
        let junction = graph.junction(graph.chain(chain).destination());
        for &out in junction.reachable(chain) {
            let out_cost = cost + times.chain_time(graph, out);
            if costs.get(&out).is_none_or(|best| out_cost < *best) {
                costs.insert(out, out_cost);
                prev.insert(out, Some(chain));
                queue.push(SearchEntry {
                    cost: out_cost,
                    chain: out,
                });
            }
        }
    }
    None
}

/// An entry of the alternative-route enumeration queue.
#[derive(Debug)]
struct PathEntry {
    cost: Time,
    chains: Vec<RouteIndex>,
}

impl PartialEq for PathEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost
    }
}

impl Eq for PathEntry {}

impl Ord for PathEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cost
            .partial_cmp(&other.cost)
            .unwrap_or(Ordering::Equal)
            .reverse()
    }
}

impl PartialOrd for PathEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Enumerates loopless alternative routes from `entry` to `exit`, cheapest first.
///
/// Only routes whose cost stays within `stretch` times the shortest-path cost are produced,
/// capped at `max_routes` candidates. Returns an empty Vec when the endpoints are
/// disconnected.
pub fn k_shortest(
    graph: &RouteGraph,
    times: &TravelTimes,
    entry: EdgeIndex,
    exit: EdgeIndex,
    stretch: f64,
    max_routes: usize,
) -> Vec<Vec<EdgeIndex>> {
    let Some((_, shortest_cost)) = dijkstra_with_cost(graph, times, entry, exit) else {
        return Vec::new();
    };
    let Some((start, _)) = anchors(graph, entry, exit) else {
        return Vec::new();
    };
    let bound = shortest_cost * stretch.max(1.0);
    let mut results = Vec::new();
    let mut queue = BinaryHeap::new();
    queue.push(PathEntry {
        cost: Time::zero(),
        chains: vec![start],
    });
    while let Some(PathEntry { cost, chains }) = queue.pop() {
        let last = *chains.last().unwrap();
        if graph.chain(last).last_edge() == exit {
            results.push(flatten(graph, &chains));
            if results.len() >= max_routes {
                break;
            }
            continue;
        }
        let junction = graph.junction(graph.chain(last).destination());
        for &out in junction.reachable(last) {
            // Loopless: a route may not traverse the same chain twice.
            if chains.contains(&out) {
                continue;
            }
            let out_cost = cost + times.chain_time(graph, out);
            if out_cost <= bound {
                let mut out_chains = chains.clone();
                out_chains.push(out);
                queue.push(PathEntry {
                    cost: out_cost,
                    chains: out_chains,
                });
            }
        }
    }
    results
}
