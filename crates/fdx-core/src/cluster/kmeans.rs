//! k-means with k-means++ seeding.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::linalg;

const MAX_ITERATIONS: usize = 300;

fn nearest_center(point: &[f32], centers: &[Vec<f32>]) -> (usize, f32) {
    let mut best = (0usize, f32::INFINITY);
    for (c, center) in centers.iter().enumerate() {
        let d = linalg::sq_euclidean(point, center);
        if d < best.1 {
            best = (c, d);
        }
    }
    best
}

fn seed_centers(points: &[Vec<f32>], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let mut chosen: Vec<usize> = vec![rng.gen_range(0..points.len())];
    while chosen.len() < k {
        let centers: Vec<Vec<f32>> = chosen.iter().map(|i| points[*i].clone()).collect();
        let weights: Vec<f64> = points
            .iter()
            .map(|p| nearest_center(p, &centers).1 as f64)
            .collect();
        let total: f64 = weights.iter().sum();
        let next = if total <= 0.0 {
            // every point coincides with a center; take the first unused one
            (0..points.len()).find(|i| !chosen.contains(i))
        } else {
            let mut target = rng.gen::<f64>() * total;
            let mut pick = None;
            for (i, w) in weights.iter().enumerate() {
                if *w <= 0.0 {
                    continue;
                }
                pick = Some(i);
                if target < *w {
                    break;
                }
                target -= w;
            }
            pick
        };
        match next {
            Some(i) => chosen.push(i),
            None => break,
        }
    }
    chosen.iter().map(|i| points[*i].clone()).collect()
}

/// Lloyd iterations from seeded centers. `k` must not exceed the number of
/// points. Labels are renumbered by first appearance; the returned centers
/// follow that numbering.
pub fn fit(points: &[Vec<f32>], k: usize, seed: u64) -> (Vec<i64>, Vec<Vec<f32>>) {
    if points.is_empty() || k == 0 {
        return (Vec::new(), Vec::new());
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut centers = seed_centers(points, k.min(points.len()), &mut rng);
    let mut assignment: Vec<usize> = vec![usize::MAX; points.len()];

    for _ in 0..MAX_ITERATIONS {
        let mut changed = false;
        for (p, slot) in points.iter().zip(assignment.iter_mut()) {
            let (c, _) = nearest_center(p, &centers);
            if *slot != c {
                *slot = c;
                changed = true;
            }
        }
        if !changed {
            break;
        }
        for (c, center) in centers.iter_mut().enumerate() {
            let members: Vec<&[f32]> = points
                .iter()
                .zip(assignment.iter())
                .filter(|(_, a)| **a == c)
                .map(|(p, _)| p.as_slice())
                .collect();
            // an empty cluster keeps its previous center
            if !members.is_empty() {
                *center = linalg::mean(&members);
            }
        }
    }

    let mut remap: Vec<Option<i64>> = vec![None; centers.len()];
    let mut order: Vec<usize> = Vec::with_capacity(centers.len());
    let labels = assignment
        .iter()
        .map(|a| {
            *remap[*a].get_or_insert_with(|| {
                order.push(*a);
                order.len() as i64 - 1
            })
        })
        .collect();
    let centers = order.into_iter().map(|c| centers[c].clone()).collect();
    (labels, centers)
}
