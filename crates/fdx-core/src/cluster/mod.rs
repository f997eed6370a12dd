//! Clustering kernels behind one tagged method type.
//!
//! | Variant | Labels | Tree |
//! |---------|--------|------|
//! | [`ClusteringMethod::KMeans`] | k-means++ then Lloyd | none |
//! | [`ClusteringMethod::Birch`] | threshold subclusters, Ward over centroids | yes |
//! | [`ClusteringMethod::WardHierarchical`] | kNN-constrained Ward | yes |
//! | [`ClusteringMethod::Dbscan`] | density reachability, [`NOISE`] for outliers | none |
//!
//! Points are L2-normalized before fitting, so euclidean distances between
//! them are a monotone function of cosine similarity.

pub mod birch;
pub mod dbscan;
pub mod kmeans;
pub mod terms;
pub mod tree;
pub mod ward;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::linalg;

pub use terms::cluster_terms;
pub use tree::{ClusterTree, TreeNode};

/// Label assigned by DBSCAN to points that belong to no cluster.
pub const NOISE: i64 = -1;

fn default_threshold() -> f64 {
    0.5
}

fn default_n_neighbors() -> usize {
    5
}

fn default_eps() -> f64 {
    0.5
}

fn default_min_samples() -> usize {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ClusteringMethod {
    KMeans {
        n_clusters: usize,
    },
    Birch {
        n_clusters: usize,
        #[serde(default = "default_threshold")]
        threshold: f64,
    },
    WardHierarchical {
        n_clusters: usize,
        #[serde(default = "default_n_neighbors")]
        n_neighbors: usize,
    },
    Dbscan {
        #[serde(default = "default_eps")]
        eps: f64,
        #[serde(default = "default_min_samples")]
        min_samples: usize,
    },
}

/// Flat labels plus the merge tree for hierarchical variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterFit {
    pub labels: Vec<i64>,
    pub tree: Option<ClusterTree>,
}

impl ClusterFit {
    /// Number of clusters, noise excluded.
    pub fn n_clusters(&self) -> usize {
        self.labels
            .iter()
            .copied()
            .max()
            .map_or(0, |m| (m + 1).max(0) as usize)
    }
}

impl ClusteringMethod {
    pub fn name(&self) -> &'static str {
        match self {
            ClusteringMethod::KMeans { .. } => "k_means",
            ClusteringMethod::Birch { .. } => "birch",
            ClusteringMethod::WardHierarchical { .. } => "ward_hierarchical",
            ClusteringMethod::Dbscan { .. } => "dbscan",
        }
    }

    /// Whether fitting produces a [`ClusterTree`].
    pub fn is_hierarchical(&self) -> bool {
        matches!(
            self,
            ClusteringMethod::Birch { .. } | ClusteringMethod::WardHierarchical { .. }
        )
    }

    pub fn validate(&self, n_samples: usize) -> CoreResult<()> {
        let check_k = |k: usize| {
            if k == 0 {
                Err(CoreError::invalid("n_clusters must be >= 1"))
            } else if k > n_samples {
                Err(CoreError::invalid(format!(
                    "n_clusters ({}) exceeds the number of documents ({})",
                    k, n_samples
                )))
            } else {
                Ok(())
            }
        };
        match self {
            ClusteringMethod::KMeans { n_clusters } => check_k(*n_clusters),
            ClusteringMethod::Birch {
                n_clusters,
                threshold,
            } => {
                check_k(*n_clusters)?;
                if !threshold.is_finite() || *threshold <= 0.0 {
                    return Err(CoreError::invalid("birch threshold must be > 0"));
                }
                Ok(())
            }
            ClusteringMethod::WardHierarchical {
                n_clusters,
                n_neighbors,
            } => {
                check_k(*n_clusters)?;
                if *n_neighbors == 0 {
                    return Err(CoreError::invalid("n_neighbors must be >= 1"));
                }
                Ok(())
            }
            ClusteringMethod::Dbscan { eps, min_samples } => {
                if !eps.is_finite() || *eps <= 0.0 {
                    return Err(CoreError::invalid("dbscan eps must be > 0"));
                }
                if *min_samples == 0 {
                    return Err(CoreError::invalid("min_samples must be >= 1"));
                }
                Ok(())
            }
        }
    }

    /// Cluster `points` (one row per document). `seed` drives k-means
    /// initialization and is ignored by the other variants.
    pub fn fit(&self, points: &[Vec<f32>], seed: u64) -> CoreResult<ClusterFit> {
        if points.is_empty() {
            return Err(CoreError::invalid("cannot cluster an empty document set"));
        }
        self.validate(points.len())?;

        let normalized: Vec<Vec<f32>> = points
            .iter()
            .map(|p| {
                let mut p = p.clone();
                linalg::normalize(&mut p);
                p
            })
            .collect();

        let fit = match self {
            ClusteringMethod::KMeans { n_clusters } => ClusterFit {
                labels: kmeans::fit(&normalized, *n_clusters, seed).0,
                tree: None,
            },
            ClusteringMethod::Birch {
                n_clusters,
                threshold,
            } => {
                let (labels, tree, _) = birch::fit(&normalized, *n_clusters, *threshold)?;
                ClusterFit {
                    labels,
                    tree: Some(tree),
                }
            }
            ClusteringMethod::WardHierarchical {
                n_clusters,
                n_neighbors,
            } => {
                let (labels, tree) = ward::fit(&normalized, *n_clusters, *n_neighbors)?;
                ClusterFit {
                    labels,
                    tree: Some(tree),
                }
            }
            ClusteringMethod::Dbscan { eps, min_samples } => ClusterFit {
                labels: dbscan::fit(&normalized, *eps, *min_samples),
                tree: None,
            },
        };
        Ok(fit)
    }
}
