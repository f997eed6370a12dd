//! Supervised relevance classifiers trained from labeled exemplars.
//!
//! Three methods are available:
//!
//! | Method | Model | Score |
//! |--------|-------|-------|
//! | [`CategorizationMethod::LogisticRegression`] | L2-regularized weights | `sigmoid(w·x + b)` |
//! | [`CategorizationMethod::NearestCentroid`] | mean row per class | `(1 + cos_rel - cos_nrel) / 2` |
//! | [`CategorizationMethod::NearestNeighbor`] | the exemplar rows | `(1 + max cos_rel - max cos_nrel) / 2` |
//!
//! Every score lies in `[0, 1]`; a document is predicted relevant when its
//! score is strictly above `0.5`.
//!
//! With cross-validation, the logistic regularization strength `C` is picked
//! from [`C_GRID`] by stratified k-fold accuracy over the exemplars. Fold
//! assignment is deterministic (round-robin within each class) and ties go
//! to the earlier grid entry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::models::SparseVec;
use crate::scoring::DECISION_THRESHOLD;

pub const C_GRID: [f64; 5] = [0.01, 0.1, 1.0, 10.0, 100.0];
pub const DEFAULT_C: f64 = 1.0;
const MAX_FOLDS: usize = 3;
const EPOCHS: usize = 300;
const LEARNING_RATE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategorizationMethod {
    #[default]
    LogisticRegression,
    NearestCentroid,
    NearestNeighbor,
}

impl CategorizationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategorizationMethod::LogisticRegression => "logistic_regression",
            CategorizationMethod::NearestCentroid => "nearest_centroid",
            CategorizationMethod::NearestNeighbor => "nearest_neighbor",
        }
    }
}

impl fmt::Display for CategorizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CategorizationMethod {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "logistic_regression" | "logistic" | "logisticregression" => {
                Ok(CategorizationMethod::LogisticRegression)
            }
            "nearest_centroid" | "nearestcentroid" => Ok(CategorizationMethod::NearestCentroid),
            "nearest_neighbor" | "nearestneighbor" | "knn" => {
                Ok(CategorizationMethod::NearestNeighbor)
            }
            other => Err(CoreError::invalid(format!(
                "unknown categorization method '{}'",
                other
            ))),
        }
    }
}

/// A fitted classifier, serializable as a model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum TrainedClassifier {
    LogisticRegression {
        weights: SparseVec,
        bias: f64,
        c: f64,
    },
    NearestCentroid {
        relevant: SparseVec,
        non_relevant: SparseVec,
    },
    NearestNeighbor {
        relevant: Vec<SparseVec>,
        non_relevant: Vec<SparseVec>,
    },
}

impl TrainedClassifier {
    pub fn method(&self) -> CategorizationMethod {
        match self {
            TrainedClassifier::LogisticRegression { .. } => CategorizationMethod::LogisticRegression,
            TrainedClassifier::NearestCentroid { .. } => CategorizationMethod::NearestCentroid,
            TrainedClassifier::NearestNeighbor { .. } => CategorizationMethod::NearestNeighbor,
        }
    }

    /// Relevance score in `[0, 1]`.
    pub fn decision(&self, row: &SparseVec) -> f64 {
        match self {
            TrainedClassifier::LogisticRegression { weights, bias, .. } => {
                sigmoid(weights.dot_sparse(row) as f64 + bias)
            }
            TrainedClassifier::NearestCentroid {
                relevant,
                non_relevant,
            } => contrast(sparse_cosine(row, relevant), sparse_cosine(row, non_relevant)),
            TrainedClassifier::NearestNeighbor {
                relevant,
                non_relevant,
            } => contrast(max_cosine(row, relevant), max_cosine(row, non_relevant)),
        }
    }

    pub fn decision_all(&self, rows: &[SparseVec]) -> Vec<f64> {
        rows.iter().map(|r| self.decision(r)).collect()
    }

    pub fn is_relevant(&self, row: &SparseVec) -> bool {
        self.decision(row) > DECISION_THRESHOLD
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn contrast(cos_rel: f64, cos_nrel: f64) -> f64 {
    ((1.0 + cos_rel - cos_nrel) / 2.0).clamp(0.0, 1.0)
}

fn sparse_cosine(a: &SparseVec, b: &SparseVec) -> f64 {
    let denom = a.norm() as f64 * b.norm() as f64;
    if denom < f64::EPSILON {
        return 0.0;
    }
    (a.dot_sparse(b) as f64 / denom).clamp(-1.0, 1.0)
}

fn max_cosine(row: &SparseVec, pool: &[SparseVec]) -> f64 {
    pool.iter()
        .map(|p| sparse_cosine(row, p))
        .fold(f64::NEG_INFINITY, f64::max)
}

fn centroid(rows: &[&SparseVec]) -> SparseVec {
    let n = rows.len().max(1) as f32;
    let pairs = rows
        .iter()
        .flat_map(|r| r.iter().map(move |(i, v)| (i, v / n)))
        .collect();
    SparseVec::from_pairs(pairs)
}

/// Full-batch gradient descent on the L2-regularized log loss.
///
/// Only columns that occur in some exemplar can receive weight, so the
/// optimization runs over that compact column set.
fn fit_logistic(rows: &[&SparseVec], labels: &[bool], c: f64) -> TrainedClassifier {
    let mut columns: Vec<u32> = rows.iter().flat_map(|r| r.indices.iter().copied()).collect();
    columns.sort_unstable();
    columns.dedup();
    let local: Vec<Vec<(usize, f64)>> = rows
        .iter()
        .map(|r| {
            r.iter()
                .filter_map(|(i, v)| columns.binary_search(&i).ok().map(|pos| (pos, v as f64)))
                .collect()
        })
        .collect();

    let n = rows.len() as f64;
    let mut w = vec![0.0f64; columns.len()];
    let mut b = 0.0f64;
    let mut grad = vec![0.0f64; columns.len()];

    for _ in 0..EPOCHS {
        grad.iter_mut().for_each(|g| *g = 0.0);
        let mut grad_b = 0.0f64;
        for (row, label) in local.iter().zip(labels.iter()) {
            let z: f64 = row.iter().map(|(i, v)| w[*i] * v).sum::<f64>() + b;
            let err = sigmoid(z) - if *label { 1.0 } else { 0.0 };
            for (i, v) in row {
                grad[*i] += err * v;
            }
            grad_b += err;
        }
        for (wi, gi) in w.iter_mut().zip(grad.iter()) {
            *wi -= LEARNING_RATE * (gi / n + *wi / (c * n));
        }
        b -= LEARNING_RATE * grad_b / n;
    }

    let weights = SparseVec::from_pairs(
        columns
            .iter()
            .zip(w.iter())
            .map(|(i, v)| (*i, *v as f32))
            .collect(),
    );
    TrainedClassifier::LogisticRegression {
        weights,
        bias: b,
        c,
    }
}

fn fit_once(
    rows: &[&SparseVec],
    labels: &[bool],
    method: CategorizationMethod,
    c: f64,
) -> TrainedClassifier {
    let pick = |want: bool| {
        rows.iter()
            .zip(labels.iter())
            .filter(|(_, l)| **l == want)
            .map(|(r, _)| *r)
            .collect::<Vec<_>>()
    };
    match method {
        CategorizationMethod::LogisticRegression => fit_logistic(rows, labels, c),
        CategorizationMethod::NearestCentroid => TrainedClassifier::NearestCentroid {
            relevant: centroid(&pick(true)),
            non_relevant: centroid(&pick(false)),
        },
        CategorizationMethod::NearestNeighbor => TrainedClassifier::NearestNeighbor {
            relevant: pick(true).into_iter().cloned().collect(),
            non_relevant: pick(false).into_iter().cloned().collect(),
        },
    }
}

/// Round-robin stratified fold index for each exemplar.
fn stratified_folds(labels: &[bool], k: usize) -> Vec<usize> {
    let (mut pos, mut neg) = (0usize, 0usize);
    labels
        .iter()
        .map(|l| {
            let counter = if *l { &mut pos } else { &mut neg };
            let fold = *counter % k;
            *counter += 1;
            fold
        })
        .collect()
}

fn select_c(rows: &[&SparseVec], labels: &[bool]) -> f64 {
    let n_pos = labels.iter().filter(|l| **l).count();
    let n_neg = labels.len() - n_pos;
    let k = MAX_FOLDS.min(n_pos).min(n_neg);
    if k < 2 {
        return DEFAULT_C;
    }
    let folds = stratified_folds(labels, k);

    let mut best = (f64::NEG_INFINITY, DEFAULT_C);
    for c in C_GRID {
        let mut correct = 0usize;
        for fold in 0..k {
            let (train_rows, train_labels): (Vec<&SparseVec>, Vec<bool>) = rows
                .iter()
                .zip(labels.iter())
                .zip(folds.iter())
                .filter(|(_, f)| **f != fold)
                .map(|((r, l), _)| (*r, *l))
                .unzip();
            let model = fit_logistic(&train_rows, &train_labels, c);
            correct += rows
                .iter()
                .zip(labels.iter())
                .zip(folds.iter())
                .filter(|(_, f)| **f == fold)
                .filter(|((r, l), _)| model.is_relevant(r) == **l)
                .count();
        }
        let accuracy = correct as f64 / labels.len() as f64;
        if accuracy > best.0 {
            best = (accuracy, c);
        }
    }
    best.1
}

/// Fit a classifier on exemplar rows.
///
/// Both classes must be represented. `cross_validate` only tunes logistic
/// regression; the nearest-centroid and nearest-neighbor methods have no
/// hyperparameter and ignore it.
pub fn train(
    rows: &[&SparseVec],
    labels: &[bool],
    method: CategorizationMethod,
    cross_validate: bool,
) -> CoreResult<TrainedClassifier> {
    if rows.len() != labels.len() {
        return Err(CoreError::invalid(format!(
            "{} exemplar rows but {} labels",
            rows.len(),
            labels.len()
        )));
    }
    if !labels.iter().any(|l| *l) || labels.iter().all(|l| *l) {
        return Err(CoreError::invalid(
            "training requires at least one relevant and one non-relevant exemplar",
        ));
    }
    let c = if cross_validate && method == CategorizationMethod::LogisticRegression {
        select_c(rows, labels)
    } else {
        DEFAULT_C
    };
    Ok(fit_once(rows, labels, method, c))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(u32, f32)]) -> SparseVec {
        SparseVec::from_pairs(pairs.to_vec())
    }

    fn corpus() -> (Vec<SparseVec>, Vec<bool>) {
        let rows = vec![
            row(&[(0, 1.0), (1, 0.2)]),
            row(&[(0, 0.9), (1, 0.1)]),
            row(&[(0, 0.8), (2, 0.1)]),
            row(&[(3, 1.0), (4, 0.3)]),
            row(&[(3, 0.7), (4, 0.6)]),
            row(&[(4, 1.0)]),
        ];
        (rows, vec![true, true, true, false, false, false])
    }

    #[test]
    fn every_method_separates_the_classes() {
        let (rows, labels) = corpus();
        let refs: Vec<&SparseVec> = rows.iter().collect();
        let probe_rel = row(&[(0, 1.0)]);
        let probe_nrel = row(&[(3, 0.5), (4, 0.5)]);
        for method in [
            CategorizationMethod::LogisticRegression,
            CategorizationMethod::NearestCentroid,
            CategorizationMethod::NearestNeighbor,
        ] {
            let model = train(&refs, &labels, method, false).unwrap();
            assert_eq!(model.method(), method);
            let s_rel = model.decision(&probe_rel);
            let s_nrel = model.decision(&probe_nrel);
            assert!((0.0..=1.0).contains(&s_rel));
            assert!(s_rel > 0.5, "{method}: {s_rel}");
            assert!(s_nrel < 0.5, "{method}: {s_nrel}");
        }
    }

    #[test]
    fn cross_validation_picks_a_grid_value() {
        let (rows, labels) = corpus();
        let refs: Vec<&SparseVec> = rows.iter().collect();
        let model = train(&refs, &labels, CategorizationMethod::LogisticRegression, true).unwrap();
        match model {
            TrainedClassifier::LogisticRegression { c, .. } => assert!(C_GRID.contains(&c)),
            other => panic!("unexpected model {other:?}"),
        }
    }

    #[test]
    fn cross_validation_falls_back_with_one_exemplar_per_class() {
        let rows = [row(&[(0, 1.0)]), row(&[(1, 1.0)])];
        let refs: Vec<&SparseVec> = rows.iter().collect();
        let model = train(
            &refs,
            &[true, false],
            CategorizationMethod::LogisticRegression,
            true,
        )
        .unwrap();
        match model {
            TrainedClassifier::LogisticRegression { c, .. } => assert_eq!(c, DEFAULT_C),
            other => panic!("unexpected model {other:?}"),
        }
    }

    #[test]
    fn single_class_is_rejected() {
        let rows = [row(&[(0, 1.0)]), row(&[(1, 1.0)])];
        let refs: Vec<&SparseVec> = rows.iter().collect();
        let err = train(&refs, &[true, true], CategorizationMethod::NearestCentroid, false);
        assert!(err.is_err());
    }

    #[test]
    fn cross_validation_is_ignored_by_untunable_methods() {
        let (rows, labels) = corpus();
        let refs: Vec<&SparseVec> = rows.iter().collect();
        for method in [
            CategorizationMethod::NearestCentroid,
            CategorizationMethod::NearestNeighbor,
        ] {
            let tuned = train(&refs, &labels, method, true).unwrap();
            let plain = train(&refs, &labels, method, false).unwrap();
            for r in &refs {
                assert_eq!(tuned.decision(r), plain.decision(r));
            }
        }
    }

    #[test]
    fn stratified_folds_balance_classes() {
        let folds = stratified_folds(&[true, false, true, false, true, false], 3);
        assert_eq!(folds, vec![0, 0, 1, 1, 2, 2]);
    }

    #[test]
    fn classifier_serializes_with_method_tag() {
        let model = TrainedClassifier::NearestCentroid {
            relevant: row(&[(0, 1.0)]),
            non_relevant: row(&[(1, 1.0)]),
        };
        let json = serde_json::to_value(&model).unwrap();
        assert_eq!(json["method"], "nearest_centroid");
        let back: TrainedClassifier = serde_json::from_value(json).unwrap();
        assert_eq!(back, model);
    }

    #[test]
    fn method_parsing_accepts_aliases() {
        assert_eq!(
            "LogisticRegression".parse::<CategorizationMethod>().unwrap(),
            CategorizationMethod::LogisticRegression
        );
        assert_eq!(
            "nearest-neighbor".parse::<CategorizationMethod>().unwrap(),
            CategorizationMethod::NearestNeighbor
        );
        assert!("svm".parse::<CategorizationMethod>().is_err());
    }
}
