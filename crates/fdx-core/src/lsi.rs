//! Latent semantic indexing: a truncated SVD of the feature matrix.
//!
//! # Algorithm
//!
//! Right singular vectors are found one at a time by power iteration on
//! `XᵀX`, applied implicitly as `Xᵀ(Xv)` so the matrix stays sparse. Each
//! iterate is re-orthogonalized against the components already found, which
//! deflates them out of the search. Iteration starts from a seeded random
//! vector, so a decomposition is a pure function of `(matrix, k, seed)`.
//!
//! Documents are projected as `X·V` (the `U·Σ` scores), and the reported
//! explained variance is `Σ var(XV[:, c]) / Σ var(X[:, j])`, clamped to
//! `[0, 1]`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::linalg;
use crate::models::{FeatureMatrix, SparseVec};

const MAX_ITERATIONS: usize = 100;
const TOLERANCE: f32 = 1e-6;
const MIN_SINGULAR_VALUE: f32 = 1e-6;
/// Components below this fraction of the leading singular value are noise.
const RELATIVE_CUTOFF: f32 = 1e-4;

/// A fitted projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LsiDecomposition {
    /// `k × n_features` right singular vectors.
    pub components: Vec<Vec<f32>>,
    pub singular_values: Vec<f32>,
    pub explained_variance: f64,
}

impl LsiDecomposition {
    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    /// Project one sparse row into the latent space.
    pub fn project(&self, row: &SparseVec) -> Vec<f32> {
        self.components.iter().map(|c| row.dot_dense(c)).collect()
    }

    pub fn project_all(&self, matrix: &FeatureMatrix) -> Vec<Vec<f32>> {
        matrix.rows.iter().map(|r| self.project(r)).collect()
    }
}

fn multiply(matrix: &FeatureMatrix, v: &[f32]) -> Vec<f32> {
    matrix.rows.iter().map(|r| r.dot_dense(v)).collect()
}

fn multiply_transposed(matrix: &FeatureMatrix, u: &[f32]) -> Vec<f32> {
    let mut out = vec![0.0f32; matrix.n_features];
    for (row, weight) in matrix.rows.iter().zip(u.iter()) {
        if *weight == 0.0 {
            continue;
        }
        for (i, v) in row.iter() {
            out[i as usize] += v * weight;
        }
    }
    out
}

fn orthogonalize(v: &mut [f32], basis: &[Vec<f32>]) {
    for b in basis {
        let proj = linalg::dot(v, b);
        for (x, y) in v.iter_mut().zip(b.iter()) {
            *x -= proj * y;
        }
    }
}

fn column_variance(values: impl Iterator<Item = Vec<f32>>, n: usize, dims: usize) -> f64 {
    let mut sum = vec![0.0f64; dims];
    let mut sum_sq = vec![0.0f64; dims];
    for row in values {
        for (j, v) in row.iter().enumerate() {
            sum[j] += *v as f64;
            sum_sq[j] += (*v as f64) * (*v as f64);
        }
    }
    let n = n as f64;
    sum.iter()
        .zip(sum_sq.iter())
        .map(|(s, sq)| (sq / n - (s / n) * (s / n)).max(0.0))
        .sum()
}

fn total_variance(matrix: &FeatureMatrix) -> f64 {
    let n = matrix.n_samples() as f64;
    let mut sum = vec![0.0f64; matrix.n_features];
    let mut sum_sq = 0.0f64;
    for row in &matrix.rows {
        for (i, v) in row.iter() {
            sum[i as usize] += v as f64;
            sum_sq += (v as f64) * (v as f64);
        }
    }
    let mean_sq: f64 = sum.iter().map(|s| (s / n) * (s / n)).sum();
    (sum_sq / n - mean_sq).max(0.0)
}

/// Fit a rank-`n_components` projection.
///
/// The effective rank is capped at `min(n_samples, n_features)` and stops
/// early when the remaining singular values vanish, so the returned
/// decomposition may hold fewer components than requested (never zero for a
/// non-empty, non-zero matrix).
pub fn truncated_svd(
    matrix: &FeatureMatrix,
    n_components: usize,
    seed: u64,
) -> CoreResult<LsiDecomposition> {
    if n_components == 0 {
        return Err(CoreError::invalid("n_components must be >= 1"));
    }
    if matrix.n_samples() == 0 || matrix.n_features == 0 {
        return Err(CoreError::invalid("cannot decompose an empty feature matrix"));
    }

    let k = n_components.min(matrix.n_samples()).min(matrix.n_features);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut components: Vec<Vec<f32>> = Vec::with_capacity(k);
    let mut singular_values: Vec<f32> = Vec::with_capacity(k);

    for _ in 0..k {
        let mut v: Vec<f32> = (0..matrix.n_features)
            .map(|_| rng.gen_range(-1.0f32..1.0))
            .collect();
        orthogonalize(&mut v, &components);
        linalg::normalize(&mut v);

        for _ in 0..MAX_ITERATIONS {
            let u = multiply(matrix, &v);
            let mut next = multiply_transposed(matrix, &u);
            orthogonalize(&mut next, &components);
            if linalg::norm(&next) < f32::EPSILON {
                break;
            }
            linalg::normalize(&mut next);
            let delta = linalg::sq_euclidean(&next, &v).sqrt();
            v = next;
            if delta < TOLERANCE {
                break;
            }
        }

        let sigma = linalg::norm(&multiply(matrix, &v));
        let floor = singular_values
            .first()
            .map(|s| s * RELATIVE_CUTOFF)
            .unwrap_or(0.0)
            .max(MIN_SINGULAR_VALUE);
        if sigma < floor {
            break;
        }
        components.push(v);
        singular_values.push(sigma);
    }

    if components.is_empty() {
        return Err(CoreError::invalid(
            "feature matrix has no variance to decompose (all rows are zero)",
        ));
    }

    let mut decomposition = LsiDecomposition {
        components,
        singular_values,
        explained_variance: 0.0,
    };
    let total = total_variance(matrix);
    if total > 0.0 {
        let projected = column_variance(
            matrix.rows.iter().map(|r| decomposition.project(r)),
            matrix.n_samples(),
            decomposition.n_components(),
        );
        decomposition.explained_variance = (projected / total).clamp(0.0, 1.0);
    }
    Ok(decomposition)
}
