//! Birch-style incremental clustering.
//!
//! Documents are streamed once, in order. Each joins the nearest existing
//! subcluster when it lies within `threshold` of that subcluster's centroid,
//! otherwise it opens a new subcluster. Subcluster centroids are then
//! agglomerated with Ward linkage (weighted by subcluster size).
//!
//! The resulting tree spans every document: members of a subcluster are
//! chained together first, then subcluster roots are merged following the
//! Ward linkage. Cutting the tree at `n_clusters <= n_subclusters` therefore
//! only undoes inter-subcluster merges.

use crate::cluster::tree::ClusterTree;
use crate::cluster::ward::ward_linkage;
use crate::error::CoreResult;
use crate::linalg;

struct Subcluster {
    centroid: Vec<f32>,
    members: Vec<usize>,
}

impl Subcluster {
    fn absorb(&mut self, idx: usize, point: &[f32]) {
        self.members.push(idx);
        let n = self.members.len() as f32;
        for (c, p) in self.centroid.iter_mut().zip(point.iter()) {
            *c += (p - *c) / n;
        }
    }
}

fn build_subclusters(points: &[Vec<f32>], threshold: f64) -> Vec<Subcluster> {
    let mut subclusters: Vec<Subcluster> = Vec::new();
    for (idx, point) in points.iter().enumerate() {
        let nearest = subclusters
            .iter()
            .enumerate()
            .map(|(s, sub)| (linalg::euclidean(point, &sub.centroid) as f64, s))
            .min_by(|a, b| a.0.total_cmp(&b.0));
        match nearest {
            Some((dist, s)) if dist <= threshold => subclusters[s].absorb(idx, point),
            _ => subclusters.push(Subcluster {
                centroid: point.clone(),
                members: vec![idx],
            }),
        }
    }
    subclusters
}

/// Returns flat labels, the full tree and the number of subclusters.
pub fn fit(
    points: &[Vec<f32>],
    n_clusters: usize,
    threshold: f64,
) -> CoreResult<(Vec<i64>, ClusterTree, usize)> {
    let n = points.len();
    let subclusters = build_subclusters(points, threshold);

    let mut children: Vec<[usize; 2]> = Vec::with_capacity(n.saturating_sub(1));
    let mut distances: Vec<f64> = Vec::with_capacity(n.saturating_sub(1));
    let mut roots: Vec<usize> = Vec::with_capacity(subclusters.len());
    for sub in &subclusters {
        let mut node = sub.members[0];
        for &m in &sub.members[1..] {
            children.push([node, m]);
            distances.push(linalg::euclidean(&points[m], &sub.centroid) as f64);
            node = n + children.len() - 1;
        }
        roots.push(node);
    }

    let centroids: Vec<Vec<f32>> = subclusters.iter().map(|s| s.centroid.clone()).collect();
    let weights: Vec<usize> = subclusters.iter().map(|s| s.members.len()).collect();
    let n_sub = subclusters.len();
    let offset = n + children.len();
    for merge in ward_linkage(&centroids, &weights, None) {
        let node_of = |id: usize| if id < n_sub { roots[id] } else { offset + (id - n_sub) };
        children.push([node_of(merge.a), node_of(merge.b)]);
        distances.push(merge.height);
    }

    let tree = ClusterTree::new(n, children, distances)?;
    Ok((tree.cut(n_clusters), tree, n_sub))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points() -> Vec<Vec<f32>> {
        vec![
            vec![0.0, 0.0],
            vec![5.0, 5.0],
            vec![0.1, 0.0],
            vec![5.1, 5.0],
            vec![10.0, 0.0],
            vec![0.0, 0.1],
        ]
    }

    #[test]
    fn threshold_groups_nearby_points() {
        let subs = build_subclusters(&points(), 0.5);
        assert_eq!(subs.len(), 3);
        assert_eq!(subs[0].members, vec![0, 2, 5]);
        assert_eq!(subs[1].members, vec![1, 3]);
        assert_eq!(subs[2].members, vec![4]);
    }

    #[test]
    fn tree_spans_every_document() {
        let (labels, tree, n_sub) = fit(&points(), 3, 0.5).unwrap();
        assert_eq!(n_sub, 3);
        assert_eq!(tree.n_leaves(), 6);
        assert!(tree.is_complete());
        assert_eq!(labels, vec![0, 1, 0, 1, 2, 0]);
    }

    #[test]
    fn fewer_clusters_merge_nearest_subclusters() {
        let (labels, _, _) = fit(&points(), 2, 0.5).unwrap();
        assert_eq!(labels[0], labels[2]);
        assert_eq!(labels[1], labels[3]);
        assert_eq!(labels.iter().max(), Some(&1));
    }

    #[test]
    fn tiny_threshold_makes_singletons() {
        let (_, tree, n_sub) = fit(&points(), 6, 1e-6).unwrap();
        assert_eq!(n_sub, 6);
        assert!(tree.is_complete());
    }
}
