//! Classification quality metrics.
//!
//! Reference labels and predicted scores are aligned by document id; only
//! ids present on both sides are scored. Binary metrics threshold the score
//! at `> 0.5`. Ranking metrics use the raw scores.
//!
//! A metric that cannot be computed (zero division, or a single-class
//! reference for the ranking metrics) is `None` rather than a sentinel.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

pub const DECISION_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassificationScores {
    pub recall: Option<f64>,
    pub precision: Option<f64>,
    pub f1: Option<f64>,
    pub auc_roc: Option<f64>,
    pub average_precision: Option<f64>,
}

impl ClassificationScores {
    /// All metrics absent; used when scores were not requested.
    pub fn not_computed() -> Self {
        Self::default()
    }
}

/// Score `pred_scores` against `ref_labels`, aligning both by id.
pub fn classification_score(
    ref_ids: &[String],
    ref_labels: &[bool],
    pred_ids: &[String],
    pred_scores: &[f64],
) -> CoreResult<ClassificationScores> {
    if ref_ids.len() != ref_labels.len() {
        return Err(CoreError::invalid(format!(
            "{} reference ids but {} labels",
            ref_ids.len(),
            ref_labels.len()
        )));
    }
    if pred_ids.len() != pred_scores.len() {
        return Err(CoreError::invalid(format!(
            "{} predicted ids but {} scores",
            pred_ids.len(),
            pred_scores.len()
        )));
    }

    let predicted: HashMap<&str, f64> = pred_ids
        .iter()
        .map(String::as_str)
        .zip(pred_scores.iter().copied())
        .collect();
    let aligned: Vec<(bool, f64)> = ref_ids
        .iter()
        .zip(ref_labels.iter())
        .filter_map(|(id, label)| predicted.get(id.as_str()).map(|s| (*label, *s)))
        .collect();

    Ok(score_aligned(&aligned))
}

fn ratio(num: usize, den: usize) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}

fn score_aligned(aligned: &[(bool, f64)]) -> ClassificationScores {
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    for (label, score) in aligned {
        match (*label, *score > DECISION_THRESHOLD) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fn_ += 1,
            (false, false) => {}
        }
    }
    let recall = ratio(tp, tp + fn_);
    let precision = ratio(tp, tp + fp);
    let f1 = match (recall, precision) {
        (Some(r), Some(p)) if r + p > 0.0 => Some(2.0 * r * p / (r + p)),
        (Some(_), Some(_)) => Some(0.0),
        _ => None,
    };

    let n_pos = aligned.iter().filter(|(l, _)| *l).count();
    let n_neg = aligned.len() - n_pos;
    let (auc_roc, average_precision) = if n_pos == 0 || n_neg == 0 {
        (None, None)
    } else {
        (
            Some(roc_auc(aligned, n_pos, n_neg)),
            Some(average_precision(aligned, n_pos)),
        )
    };

    ClassificationScores {
        recall,
        precision,
        f1,
        auc_roc,
        average_precision,
    }
}

/// Mann-Whitney estimate; tied scores contribute one half.
fn roc_auc(aligned: &[(bool, f64)], n_pos: usize, n_neg: usize) -> f64 {
    let mut sorted: Vec<(bool, f64)> = aligned.to_vec();
    sorted.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut rank_sum_pos = 0.0f64;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j + 1 < sorted.len() && sorted[j + 1].1 == sorted[i].1 {
            j += 1;
        }
        // ranks are 1-based; tied block shares the average
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        let pos_in_block = sorted[i..=j].iter().filter(|(l, _)| *l).count();
        rank_sum_pos += avg_rank * pos_in_block as f64;
        i = j + 1;
    }
    let n_pos_f = n_pos as f64;
    (rank_sum_pos - n_pos_f * (n_pos_f + 1.0) / 2.0) / (n_pos_f * n_neg as f64)
}

/// Step-wise area under the precision-recall curve, one step per distinct
/// score threshold.
fn average_precision(aligned: &[(bool, f64)], n_pos: usize) -> f64 {
    let mut sorted: Vec<(bool, f64)> = aligned.to_vec();
    sorted.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut ap = 0.0f64;
    let mut tp = 0usize;
    let mut seen = 0usize;
    let mut prev_recall = 0.0f64;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j + 1 < sorted.len() && sorted[j + 1].1 == sorted[i].1 {
            j += 1;
        }
        tp += sorted[i..=j].iter().filter(|(l, _)| *l).count();
        seen += j - i + 1;
        let recall = tp as f64 / n_pos as f64;
        let precision = tp as f64 / seen as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
        i = j + 1;
    }
    ap
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("doc{i}")).collect()
    }

    fn approx(a: Option<f64>, b: f64) -> bool {
        a.map(|a| (a - b).abs() < 1e-9).unwrap_or(false)
    }

    #[test]
    fn self_scoring_is_perfect() {
        let labels = vec![true, false, true, false, false];
        let scores: Vec<f64> = labels.iter().map(|l| if *l { 1.0 } else { 0.0 }).collect();
        let s = classification_score(&ids(5), &labels, &ids(5), &scores).unwrap();
        assert!(approx(s.recall, 1.0));
        assert!(approx(s.precision, 1.0));
        assert!(approx(s.f1, 1.0));
        assert!(approx(s.average_precision, 1.0));
        assert!(approx(s.auc_roc, 1.0));
    }

    #[test]
    fn alignment_uses_id_intersection() {
        let ref_ids = vec!["a".to_string(), "b".to_string(), "z".to_string()];
        let pred_ids = vec!["b".to_string(), "a".to_string(), "c".to_string()];
        let s = classification_score(
            &ref_ids,
            &[true, false, true],
            &pred_ids,
            &[0.1, 0.9, 0.9],
        )
        .unwrap();
        assert!(approx(s.recall, 1.0));
        assert!(approx(s.precision, 1.0));
    }

    #[test]
    fn threshold_is_strict() {
        let s = classification_score(&ids(2), &[true, false], &ids(2), &[0.5, 0.2]).unwrap();
        // nothing predicted positive
        assert_eq!(s.precision, None);
        assert!(approx(s.recall, 0.0));
        assert_eq!(s.f1, None);
    }

    #[test]
    fn single_class_reference_has_no_ranking_metrics() {
        let s = classification_score(&ids(3), &[true, true, true], &ids(3), &[0.9, 0.8, 0.1])
            .unwrap();
        assert_eq!(s.auc_roc, None);
        assert_eq!(s.average_precision, None);
        assert!(approx(s.precision, 1.0));
    }

    #[test]
    fn ties_count_half_in_auc() {
        let s = classification_score(&ids(2), &[true, false], &ids(2), &[0.7, 0.7]).unwrap();
        assert!(approx(s.auc_roc, 0.5));
        assert!(approx(s.average_precision, 0.5));
    }

    #[test]
    fn ranking_metrics_on_imperfect_order() {
        // order by score: pos, neg, pos, neg
        let s = classification_score(
            &ids(4),
            &[true, false, true, false],
            &ids(4),
            &[0.9, 0.8, 0.7, 0.1],
        )
        .unwrap();
        assert!(approx(s.auc_roc, 0.75));
        // 0.5 * 1.0 + 0.5 * 2/3
        assert!(approx(s.average_precision, 0.5 + 1.0 / 3.0));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        assert!(classification_score(&ids(2), &[true], &ids(2), &[0.1, 0.2]).is_err());
        assert!(classification_score(&ids(1), &[true], &ids(2), &[0.1]).is_err());
    }

    #[test]
    fn not_computed_is_all_absent() {
        let s = ClassificationScores::not_computed();
        assert!(s.recall.is_none() && s.auc_roc.is_none() && s.f1.is_none());
    }
}
