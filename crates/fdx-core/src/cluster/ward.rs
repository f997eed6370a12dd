//! Ward agglomerative clustering with a k-nearest-neighbor connectivity
//! constraint.
//!
//! Cluster distances are updated with the Lance-Williams formula for Ward
//! linkage on squared euclidean distances; reported merge heights are the
//! square roots. Only clusters adjacent in the connectivity graph may merge.
//! If the graph is disconnected, the remaining components are joined by
//! unconstrained Ward merges so the tree always has a single root.

use crate::cluster::tree::ClusterTree;
use crate::error::CoreResult;
use crate::linalg;

/// One merge of the linkage, in input/cluster id space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Merge {
    pub a: usize,
    pub b: usize,
    pub height: f64,
}

/// Symmetric k-nearest-neighbor adjacency lists.
pub(crate) fn knn_graph(points: &[Vec<f32>], k: usize) -> Vec<Vec<usize>> {
    let n = points.len();
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    for i in 0..n {
        let mut others: Vec<(f32, usize)> = (0..n)
            .filter(|j| *j != i)
            .map(|j| (linalg::sq_euclidean(&points[i], &points[j]), j))
            .collect();
        others.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        for (_, j) in others.into_iter().take(k) {
            adjacency[i].push(j);
            adjacency[j].push(i);
        }
    }
    for list in adjacency.iter_mut() {
        list.sort_unstable();
        list.dedup();
    }
    adjacency
}

/// Ward linkage over weighted points.
///
/// `weights[i]` is the number of documents behind point `i`. Cluster `i`
/// for `i < points.len()` is an input point; the cluster created by merge
/// `m` has id `points.len() + m`.
pub(crate) fn ward_linkage(
    points: &[Vec<f32>],
    weights: &[usize],
    connectivity: Option<&[Vec<usize>]>,
) -> Vec<Merge> {
    let n = points.len();
    if n < 2 {
        return Vec::new();
    }

    // squared-distance matrix over active slots; slot i holds cluster id[i]
    let mut d2: Vec<Vec<f64>> = (0..n)
        .map(|i| {
            (0..n)
                .map(|j| {
                    let w = (weights[i] * weights[j]) as f64 / (weights[i] + weights[j]) as f64;
                    2.0 * w * linalg::sq_euclidean(&points[i], &points[j]) as f64
                })
                .collect()
        })
        .collect();
    let mut size: Vec<usize> = weights.to_vec();
    let mut id: Vec<usize> = (0..n).collect();
    let mut active: Vec<bool> = vec![true; n];
    let mut adjacent: Vec<Vec<bool>> = match connectivity {
        Some(graph) => {
            let mut m = vec![vec![false; n]; n];
            for (i, list) in graph.iter().enumerate() {
                for &j in list {
                    m[i][j] = true;
                    m[j][i] = true;
                }
            }
            m
        }
        None => vec![vec![true; n]; n],
    };

    let mut merges = Vec::with_capacity(n - 1);
    for step in 0..n - 1 {
        let mut best: Option<(f64, usize, usize)> = None;
        let mut best_any: Option<(f64, usize, usize)> = None;
        for i in 0..n {
            if !active[i] {
                continue;
            }
            for j in (i + 1)..n {
                if !active[j] {
                    continue;
                }
                let cand = (d2[i][j], i, j);
                if best_any.map_or(true, |b| cand.0 < b.0) {
                    best_any = Some(cand);
                }
                if adjacent[i][j] && best.map_or(true, |b| cand.0 < b.0) {
                    best = Some(cand);
                }
            }
        }
        let Some((dist, i, j)) = best.or(best_any) else {
            break;
        };

        merges.push(Merge {
            a: id[i],
            b: id[j],
            height: dist.max(0.0).sqrt(),
        });

        // slot i becomes the merged cluster; slot j retires
        let (ni, nj) = (size[i] as f64, size[j] as f64);
        for k in 0..n {
            if !active[k] || k == i || k == j {
                continue;
            }
            let nk = size[k] as f64;
            let updated = ((ni + nk) * d2[i][k] + (nj + nk) * d2[j][k] - nk * dist)
                / (ni + nj + nk);
            d2[i][k] = updated;
            d2[k][i] = updated;
            let joined = adjacent[i][k] || adjacent[j][k];
            adjacent[i][k] = joined;
            adjacent[k][i] = joined;
        }
        active[j] = false;
        size[i] += size[j];
        id[i] = n + step;
    }
    merges
}

/// Ward clustering of documents. Returns the flat labels and the full tree.
pub fn fit(
    points: &[Vec<f32>],
    n_clusters: usize,
    n_neighbors: usize,
) -> CoreResult<(Vec<i64>, ClusterTree)> {
    let graph = knn_graph(points, n_neighbors);
    let weights = vec![1usize; points.len()];
    let merges = ward_linkage(points, &weights, Some(graph.as_slice()));
    let tree = ClusterTree::new(
        points.len(),
        merges.iter().map(|m| [m.a, m.b]).collect(),
        merges.iter().map(|m| m.height).collect(),
    )?;
    Ok((tree.cut(n_clusters), tree))
}
