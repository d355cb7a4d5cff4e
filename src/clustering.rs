// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Clustering of candidate routes by edge-set similarity.
//!
//! A large set of alternative routes between the same endpoints is mostly redundant: many
//! candidates differ by a couple of edges. Clustering them by Jaccard similarity and picking
//! per cluster yields a small, diverse subset to hand to the planner.
use anyhow::{bail, Result};
use hashbrown::HashSet;
use serde_derive::{Deserialize, Serialize};

use crate::network::EdgeIndex;

/// How routes are ranked inside (and across) clusters before selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum RankingMode {
    /// Preserve the input (length) order inside each cluster.
    #[default]
    LengthOrder,
    /// Rank by a route's average similarity to the other routes of its own cluster;
    /// ascending puts the most diverse route first, descending the most representative.
    /// Clusters themselves are ordered by their own average similarity.
    AverageSimilarity { descending: bool },
    /// Rank by a route's similarity to the routes outside its cluster; ascending puts the
    /// route with minimal cross-cluster similarity first.
    CrossSimilarity { descending: bool },
}

/// How many ranked routes are kept.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum Selection {
    /// Exactly one best route per cluster.
    #[default]
    BestPerCluster,
    /// A literal number of routes, drawn round-robin across clusters.
    Count(usize),
    /// A fraction of the total number of routes, drawn round-robin across clusters.
    Fraction(f64),
}

/// Parameters of the similarity-clustering step.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct ClusteringParameters {
    /// Minimum similarity between two routes for them to be neighbors.
    #[serde(default = "default_eps")]
    pub eps: f64,
    /// Minimum number of neighbors (the route itself included) for a core point.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// Minimum number of candidate routes for clustering to be applied at all.
    #[serde(default = "default_min_routes")]
    pub min_routes: usize,
    #[serde(default)]
    pub ranking: RankingMode,
    #[serde(default)]
    pub selection: Selection,
}

fn default_eps() -> f64 {
    0.26
}

const fn default_min_samples() -> usize {
    2
}

const fn default_min_routes() -> usize {
    10
}

impl Default for ClusteringParameters {
    fn default() -> Self {
        ClusteringParameters {
            eps: default_eps(),
            min_samples: default_min_samples(),
            min_routes: default_min_routes(),
            ranking: RankingMode::default(),
            selection: Selection::default(),
        }
    }
}

impl ClusteringParameters {
    pub fn validate(&self) -> Result<()> {
        if !(0.0 < self.eps && self.eps <= 1.0) {
            bail!("Clustering eps must lie in (0, 1], got {}", self.eps);
        }
        if self.min_samples == 0 {
            bail!("Clustering min_samples must be at least 1");
        }
        if let Selection::Fraction(f) = self.selection {
            if !(0.0 < f && f <= 1.0) {
                bail!("Selection fraction must lie in (0, 1], got {f}");
            }
        }
        Ok(())
    }
}

/// Clusters candidate routes and picks a diverse subset.
#[derive(Clone, Debug)]
pub struct SimilarityClustering {
    parameters: ClusteringParameters,
}

impl SimilarityClustering {
    pub fn new(parameters: ClusteringParameters) -> Self {
        SimilarityClustering { parameters }
    }

    /// Selects a diverse subset of the given routes, pre-sorted by length.
    ///
    /// Returns the indices of the selected routes, or `None` when there are fewer than
    /// `min_routes` candidates (too few for clustering to pay off).
    pub fn select(&self, routes: &[Vec<EdgeIndex>]) -> Option<Vec<usize>> {
        let params = &self.parameters;
        if routes.len() < params.min_routes.max(2) {
            return None;
        }
        let matrix = jaccard_matrix(routes);
        let labels = dbscan(&matrix, params.eps, params.min_samples);
        let clusters = cluster_routes(&labels);
        Some(pick_best(&matrix, clusters, params.ranking, params.selection))
    }
}

/// Computes the pairwise Jaccard similarity matrix of the routes' edge sets.
///
/// The matrix is symmetric with 1.0 on the diagonal.
pub fn jaccard_matrix(routes: &[Vec<EdgeIndex>]) -> Vec<Vec<f64>> {
    let sets: Vec<HashSet<EdgeIndex>> = routes
        .iter()
        .map(|r| r.iter().copied().collect())
        .collect();
    let n = routes.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        matrix[i][i] = 1.0;
        for j in (i + 1)..n {
            let shared = sets[i].intersection(&sets[j]).count();
            let union = sets[i].len() + sets[j].len() - shared;
            let sim = if union == 0 {
                0.0
            } else {
                shared as f64 / union as f64
            };
            matrix[i][j] = sim;
            matrix[j][i] = sim;
        }
    }
    matrix
}

/// Density-clusters on the similarity matrix; two routes are neighbors when their
/// similarity is at least `eps` (equivalently, their Jaccard distance is at most
/// `1 - eps`). Returns one label per route, `-1` marking noise.
fn dbscan(matrix: &[Vec<f64>], eps: f64, min_samples: usize) -> Vec<isize> {
    let n = matrix.len();
    let neighbors = |i: usize| -> Vec<usize> {
        (0..n).filter(|&j| matrix[i][j] >= eps).collect()
    };
    let mut labels: Vec<Option<isize>> = vec![None; n];
    let mut cluster: isize = 0;
    for i in 0..n {
        if labels[i].is_some() {
            continue;
        }
        let seeds = neighbors(i);
        if seeds.len() < min_samples {
            labels[i] = Some(-1);
            continue;
        }
        labels[i] = Some(cluster);
        let mut frontier = seeds;
        while let Some(j) = frontier.pop() {
            if labels[j] == Some(-1) {
                // Noise reachable from a core point joins the cluster as a border point.
                labels[j] = Some(cluster);
            }
            if labels[j].is_some() {
                continue;
            }
            labels[j] = Some(cluster);
            let j_neighbors = neighbors(j);
            if j_neighbors.len() >= min_samples {
                frontier.extend(j_neighbors);
            }
        }
        cluster += 1;
    }
    labels.into_iter().map(|l| l.unwrap()).collect()
}

/// Groups route indices by cluster label; unclustered routes form singleton clusters.
fn cluster_routes(labels: &[isize]) -> Vec<Vec<usize>> {
    let nb_clusters = labels.iter().copied().max().unwrap_or(-1) + 1;
    let mut clusters: Vec<Vec<usize>> = vec![Vec::new(); nb_clusters as usize];
    for (index, &label) in labels.iter().enumerate() {
        if label < 0 {
            clusters.push(vec![index]);
        } else {
            clusters[label as usize].push(index);
        }
    }
    clusters
}

/// Ranks routes inside each cluster and picks the requested number of them.
fn pick_best(
    matrix: &[Vec<f64>],
    clusters: Vec<Vec<usize>>,
    ranking: RankingMode,
    selection: Selection,
) -> Vec<usize> {
    let mut sorted_clusters = match ranking {
        RankingMode::LengthOrder => clusters,
        RankingMode::AverageSimilarity { descending } => {
            average_similarity_sort(matrix, clusters, descending)
        }
        RankingMode::CrossSimilarity { descending } => {
            cross_similarity_sort(matrix, clusters, descending)
        }
    };
    let total: usize = sorted_clusters.iter().map(Vec::len).sum();
    let k = match selection {
        Selection::BestPerCluster => {
            return sorted_clusters.iter().map(|c| c[0]).collect();
        }
        Selection::Count(k) => k,
        Selection::Fraction(f) => ((total as f64 * f) as usize).max(1),
    };
    // Draw round-robin across clusters so the budget spans several clusters instead of
    // exhausting the first one.
    let mut picked = Vec::with_capacity(k.min(total));
    let mut offset = 0;
    while picked.len() < k && !sorted_clusters.is_empty() {
        let mut index = 0;
        while index < sorted_clusters.len() && picked.len() < k {
            if offset < sorted_clusters[index].len() {
                picked.push(sorted_clusters[index][offset]);
                index += 1;
            } else {
                sorted_clusters.remove(index);
            }
        }
        offset += 1;
    }
    picked
}

/// Average similarity of the route at `index` to the other routes of `cluster`.
fn intra_cluster_similarity(matrix: &[Vec<f64>], cluster: &[usize], index: usize) -> f64 {
    let divisor = (cluster.len().max(2) - 1) as f64;
    let total: f64 = cluster.iter().map(|&j| matrix[index][j]).sum();
    (total - 1.0) / divisor
}

fn average_similarity_sort(
    matrix: &[Vec<f64>],
    clusters: Vec<Vec<usize>>,
    descending: bool,
) -> Vec<Vec<usize>> {
    let mut ranked: Vec<(f64, Vec<(f64, usize)>)> = clusters
        .into_iter()
        .map(|cluster| {
            let mut routes: Vec<(f64, usize)> = cluster
                .iter()
                .map(|&i| (intra_cluster_similarity(matrix, &cluster, i), i))
                .collect();
            sort_by_score(&mut routes, descending);
            let average = routes.iter().map(|(s, _)| s).sum::<f64>() / routes.len() as f64;
            (average, routes)
        })
        .collect();
    ranked.sort_by(|a, b| {
        let ord = a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal);
        if descending {
            ord.reverse()
        } else {
            ord
        }
    });
    ranked
        .into_iter()
        .map(|(_, routes)| routes.into_iter().map(|(_, i)| i).collect())
        .collect()
}

fn cross_similarity_sort(
    matrix: &[Vec<f64>],
    clusters: Vec<Vec<usize>>,
    descending: bool,
) -> Vec<Vec<usize>> {
    let n = matrix.len() as f64;
    clusters
        .into_iter()
        .map(|cluster| {
            let mut routes: Vec<(f64, usize)> = cluster
                .iter()
                .map(|&i| {
                    let all: f64 = matrix[i].iter().sum();
                    let same: f64 = cluster.iter().map(|&j| matrix[i][j]).sum();
                    ((all - same) / n, i)
                })
                .collect();
            sort_by_score(&mut routes, descending);
            routes.into_iter().map(|(_, i)| i).collect()
        })
        .collect()
}

fn sort_by_score(routes: &mut [(f64, usize)], descending: bool) {
    routes.sort_by(|a, b| {
        let ord = a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal);
        if descending {
            ord.reverse()
        } else {
            ord
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(ids: &[usize]) -> Vec<EdgeIndex> {
        ids.iter().map(|&i| EdgeIndex::new(i)).collect()
    }

    #[test]
    fn jaccard_matrix_test() {
        // A = {1, 2, 3}, B = {1, 2, 4}, C = {5, 6, 3}.
        let routes = vec![route(&[1, 2, 3]), route(&[1, 2, 4]), route(&[5, 6, 3])];
        let matrix = jaccard_matrix(&routes);
        // Symmetric with unit diagonal.
        for i in 0..3 {
            assert_eq!(matrix[i][i], 1.0);
            for j in 0..3 {
                assert_eq!(matrix[i][j], matrix[j][i]);
            }
        }
        assert_eq!(matrix[0][1], 0.5);
        assert_eq!(matrix[0][2], 0.2);
        assert_eq!(matrix[1][2], 0.0);
    }

    #[test]
    fn dbscan_clusters_similar_routes_test() {
        let routes = vec![route(&[1, 2, 3]), route(&[1, 2, 4]), route(&[5, 6, 3])];
        let matrix = jaccard_matrix(&routes);
        let labels = dbscan(&matrix, 0.3, 2);
        // A and B cluster together; C is noise.
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[2], -1);
        let clusters = cluster_routes(&labels);
        assert_eq!(clusters, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn best_per_cluster_test() {
        let routes = vec![route(&[1, 2, 3]), route(&[1, 2, 4]), route(&[5, 6, 3])];
        let clustering = SimilarityClustering::new(ClusteringParameters {
            eps: 0.3,
            min_samples: 2,
            min_routes: 2,
            ranking: RankingMode::LengthOrder,
            selection: Selection::BestPerCluster,
        });
        // The first (shortest) of {A, B} plus the singleton C.
        assert_eq!(clustering.select(&routes).unwrap(), vec![0, 2]);
    }

    #[test]
    fn round_robin_selection_test() {
        // Two clusters of two, one singleton.
        let clusters = vec![vec![0, 1], vec![2, 3], vec![4]];
        let matrix = vec![vec![1.0; 5]; 5];
        let picked = pick_best(&matrix, clusters, RankingMode::LengthOrder, Selection::Count(4));
        // One from each cluster first, then the second round.
        assert_eq!(picked, vec![0, 2, 4, 1]);
    }

    #[test]
    fn fraction_selection_test() {
        let clusters = vec![vec![0, 1, 2, 3]];
        let matrix = vec![vec![1.0; 4]; 4];
        let picked = pick_best(
            &matrix,
            clusters,
            RankingMode::LengthOrder,
            Selection::Fraction(0.5),
        );
        assert_eq!(picked, vec![0, 1]);
    }

    #[test]
    fn min_routes_guard_test() {
        let routes = vec![route(&[1]), route(&[2])];
        let clustering = SimilarityClustering::new(ClusteringParameters::default());
        // Fewer than min_routes candidates: clustering does not apply.
        assert!(clustering.select(&routes).is_none());
    }

    #[test]
    fn average_similarity_ranking_test() {
        // B sits between A and C; with descending ranking the most representative route of
        // the cluster comes first.
        let routes = vec![
            route(&[1, 2, 3]),
            route(&[2, 3, 4]),
            route(&[3, 4, 5]),
            route(&[7, 8, 9]),
        ];
        let matrix = jaccard_matrix(&routes);
        let labels = dbscan(&matrix, 0.3, 2);
        let clusters = cluster_routes(&labels);
        let picked = pick_best(
            &matrix,
            clusters,
            RankingMode::AverageSimilarity { descending: true },
            Selection::BestPerCluster,
        );
        // Route 1 is the most similar to its cluster mates.
        assert_eq!(picked[0], 1);
    }
}
