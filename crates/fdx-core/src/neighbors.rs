//! Nearest-neighbor relevance scoring against exemplar sets.
//!
//! Every document is compared with every relevant and every non-relevant
//! exemplar using cosine distance (`1 - cos`). Scores are accumulated with
//! an [`Accumulation`] rule; the only rule is [`Accumulation::NearestMax`]:
//! keep the single closest exemplar of each pool and predict relevant iff
//! the closest relevant exemplar is *strictly* closer than the closest
//! non-relevant one. Exact ties are therefore non-relevant.
//!
//! When two exemplars of the same pool are equally close, the one listed
//! first wins, so results are a pure function of the inputs.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::linalg::cosine_distance;

/// How per-exemplar distances are reduced to one score per pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Accumulation {
    #[default]
    NearestMax,
}

/// Per-document outcome of a relevance query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearestNeighborResult {
    pub prediction: Vec<bool>,
    /// Distance to the nearest relevant exemplar.
    pub distance_rel: Vec<f64>,
    /// Distance to the nearest non-relevant exemplar.
    pub distance_nrel: Vec<f64>,
    /// Row index of the nearest relevant exemplar.
    pub nearest_rel: Vec<usize>,
    /// Row index of the nearest non-relevant exemplar.
    pub nearest_nrel: Vec<usize>,
}

fn nearest(point: &[f32], points: &[Vec<f32>], pool: &[usize]) -> (f64, usize) {
    let mut best = (f64::INFINITY, pool[0]);
    for &idx in pool {
        let d = cosine_distance(point, &points[idx]);
        if d < best.0 {
            best = (d, idx);
        }
    }
    best
}

/// Classify every row of `points` against the two exemplar pools.
///
/// `relevant` and `non_relevant` are row indices into `points`; both must be
/// non-empty and in range.
pub fn classify(
    points: &[Vec<f32>],
    relevant: &[usize],
    non_relevant: &[usize],
    accumulation: Accumulation,
) -> CoreResult<NearestNeighborResult> {
    if relevant.is_empty() || non_relevant.is_empty() {
        return Err(CoreError::invalid(
            "both relevant and non-relevant exemplar sets must be non-empty",
        ));
    }
    if let Some(bad) = relevant
        .iter()
        .chain(non_relevant.iter())
        .find(|i| **i >= points.len())
    {
        return Err(CoreError::invalid(format!(
            "exemplar index {} out of range for {} documents",
            bad,
            points.len()
        )));
    }

    let mut result = NearestNeighborResult {
        prediction: Vec::with_capacity(points.len()),
        distance_rel: Vec::with_capacity(points.len()),
        distance_nrel: Vec::with_capacity(points.len()),
        nearest_rel: Vec::with_capacity(points.len()),
        nearest_nrel: Vec::with_capacity(points.len()),
    };

    match accumulation {
        Accumulation::NearestMax => {
            for point in points {
                let (d_rel, i_rel) = nearest(point, points, relevant);
                let (d_nrel, i_nrel) = nearest(point, points, non_relevant);
                result.prediction.push(d_rel < d_nrel);
                result.distance_rel.push(d_rel);
                result.distance_nrel.push(d_nrel);
                result.nearest_rel.push(i_rel);
                result.nearest_nrel.push(i_nrel);
            }
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points() -> Vec<Vec<f32>> {
        vec![
            vec![1.0, 0.0],  // 0: R1
            vec![0.9, 0.1],  // 1: R2
            vec![0.0, 1.0],  // 2: N1
            vec![0.1, 0.9],  // 3: N2
            vec![1.0, 0.05], // 4: D, close to R1
        ]
    }

    #[test]
    fn document_near_relevant_exemplar_is_relevant() {
        let res = classify(&points(), &[0, 1], &[2, 3], Accumulation::NearestMax).unwrap();
        assert!(res.prediction[4]);
        assert_eq!(res.nearest_rel[4], 0);
        assert_eq!(res.nearest_nrel[4], 3);
        assert!(res.distance_rel[4] < res.distance_nrel[4]);
        assert!(!res.prediction[2]);
    }

    #[test]
    fn ties_are_non_relevant() {
        let pts = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]];
        let res = classify(&pts, &[0], &[1], Accumulation::NearestMax).unwrap();
        assert_eq!(res.distance_rel[2], res.distance_nrel[2]);
        assert!(!res.prediction[2]);
    }

    #[test]
    fn first_listed_exemplar_wins_same_pool_ties() {
        let pts = vec![vec![1.0, 0.0], vec![2.0, 0.0], vec![0.0, 1.0], vec![3.0, 0.0]];
        let res = classify(&pts, &[1, 0], &[2], Accumulation::NearestMax).unwrap();
        assert_eq!(res.nearest_rel[3], 1);
    }

    #[test]
    fn repeated_calls_are_identical() {
        let a = classify(&points(), &[0, 1], &[2, 3], Accumulation::NearestMax).unwrap();
        let b = classify(&points(), &[0, 1], &[2, 3], Accumulation::NearestMax).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_or_out_of_range_pools_are_rejected() {
        assert!(classify(&points(), &[], &[2], Accumulation::NearestMax).is_err());
        assert!(classify(&points(), &[0], &[], Accumulation::NearestMax).is_err());
        assert!(classify(&points(), &[0], &[99], Accumulation::NearestMax).is_err());
    }
}
