//! Density-based clustering (DBSCAN).
//!
//! A point is a core point when at least `min_samples` points (itself
//! included) lie within euclidean distance `eps`. Clusters grow from core
//! points in document order; points reachable from no core point are noise.

use std::collections::VecDeque;

use crate::cluster::NOISE;
use crate::linalg;

fn region(points: &[Vec<f32>], idx: usize, eps_sq: f32) -> Vec<usize> {
    (0..points.len())
        .filter(|j| linalg::sq_euclidean(&points[idx], &points[*j]) <= eps_sq)
        .collect()
}

pub fn fit(points: &[Vec<f32>], eps: f64, min_samples: usize) -> Vec<i64> {
    let eps_sq = (eps * eps) as f32;
    let neighborhoods: Vec<Vec<usize>> = (0..points.len())
        .map(|i| region(points, i, eps_sq))
        .collect();
    let is_core: Vec<bool> = neighborhoods
        .iter()
        .map(|n| n.len() >= min_samples)
        .collect();

    let mut labels = vec![NOISE; points.len()];
    let mut next = 0i64;
    for start in 0..points.len() {
        if !is_core[start] || labels[start] != NOISE {
            continue;
        }
        labels[start] = next;
        let mut queue: VecDeque<usize> = VecDeque::from([start]);
        while let Some(p) = queue.pop_front() {
            if !is_core[p] {
                continue;
            }
            for &q in &neighborhoods[p] {
                if labels[q] == NOISE {
                    labels[q] = next;
                    queue.push_back(q);
                }
            }
        }
        next += 1;
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points() -> Vec<Vec<f32>> {
        vec![
            vec![0.0, 0.0],
            vec![0.1, 0.0],
            vec![0.0, 0.1],
            vec![3.0, 3.0],
            vec![3.1, 3.0],
            vec![3.0, 3.1],
            vec![9.0, 9.0],
        ]
    }

    #[test]
    fn dense_groups_and_noise() {
        let labels = fit(&points(), 0.3, 2);
        assert_eq!(labels, vec![0, 0, 0, 1, 1, 1, NOISE]);
    }

    #[test]
    fn min_samples_above_corpus_size_is_all_noise() {
        let labels = fit(&points(), 100.0, 8);
        assert!(labels.iter().all(|l| *l == NOISE));
    }

    #[test]
    fn border_points_are_claimed_by_core_neighbors() {
        // only 1 is core; 0 and 2 are its border points, 3 is out of reach
        let pts = vec![vec![0.0], vec![0.5], vec![1.0], vec![1.7]];
        let labels = fit(&pts, 0.6, 3);
        assert_eq!(labels, vec![0, 0, 0, NOISE]);
    }
}
