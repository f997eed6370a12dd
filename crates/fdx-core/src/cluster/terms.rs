//! Representative terms per cluster.

use std::collections::HashMap;

use crate::models::SparseVec;

/// Top `n_top` feature names per cluster, ranked by the summed feature
/// weight of the cluster's members. Ties rank the lower feature index
/// first. Noise (negative labels) is ignored; the result is indexed by
/// cluster label.
pub fn cluster_terms(
    rows: &[SparseVec],
    labels: &[i64],
    feature_names: &[String],
    n_top: usize,
) -> Vec<Vec<String>> {
    let n_clusters = labels.iter().copied().max().map_or(0, |m| (m + 1).max(0) as usize);
    let mut weights: Vec<HashMap<u32, f64>> = vec![HashMap::new(); n_clusters];
    for (row, label) in rows.iter().zip(labels.iter()) {
        let Ok(cluster) = usize::try_from(*label) else {
            continue;
        };
        for (i, v) in row.iter() {
            *weights[cluster].entry(i).or_default() += v as f64;
        }
    }

    weights
        .into_iter()
        .map(|w| {
            let mut ranked: Vec<(u32, f64)> = w.into_iter().filter(|(_, v)| *v > 0.0).collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            ranked
                .into_iter()
                .filter_map(|(i, _)| feature_names.get(i as usize).cloned())
                .take(n_top)
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_terms_by_cluster_weight() {
        let names: Vec<String> = ["apple", "banana", "cherry", "date"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let rows = vec![
            SparseVec::from_pairs(vec![(0, 0.9), (1, 0.1)]),
            SparseVec::from_pairs(vec![(0, 0.5), (1, 0.6)]),
            SparseVec::from_pairs(vec![(2, 1.0), (3, 1.0)]),
            SparseVec::from_pairs(vec![(3, 5.0)]),
        ];
        let terms = cluster_terms(&rows, &[0, 0, 1, -1], &names, 2);
        assert_eq!(terms.len(), 2);
        assert_eq!(terms[0], vec!["apple", "banana"]);
        // noise row is ignored; tie broken by index
        assert_eq!(terms[1], vec!["cherry", "date"]);
    }

    #[test]
    fn all_noise_has_no_clusters() {
        let rows = vec![SparseVec::from_pairs(vec![(0, 1.0)])];
        assert!(cluster_terms(&rows, &[-1], &["a".to_string()], 3).is_empty());
    }
}
