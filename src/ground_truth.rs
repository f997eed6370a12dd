//! Ground-truth and prediction files.
//!
//! Both are line-oriented text: `filename<whitespace>value`. Blank lines and
//! lines starting with `#` are skipped. Ground-truth values are `0` or `1`;
//! prediction values are any finite score.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Reference relevance labels, in file order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundTruth {
    pub ids: Vec<String>,
    pub labels: Vec<bool>,
}

impl GroundTruth {
    pub fn parse_str(text: &str) -> PipelineResult<Self> {
        let mut gt = GroundTruth::default();
        for (lineno, id, value) in records(text)? {
            let label = match value {
                "0" => false,
                "1" => true,
                other => {
                    return Err(PipelineError::invalid(format!(
                        "ground truth line {}: label must be 0 or 1, got '{}'",
                        lineno, other
                    )))
                }
            };
            gt.ids.push(id.to_string());
            gt.labels.push(label);
        }
        Ok(gt)
    }

    pub fn load(path: &Path) -> PipelineResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::parse_str(&text)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Labels keyed by document id.
    pub fn as_map(&self) -> HashMap<&str, bool> {
        self.ids
            .iter()
            .map(String::as_str)
            .zip(self.labels.iter().copied())
            .collect()
    }
}

/// Scores produced by some earlier run, e.g. a saved `predict` output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
    pub ids: Vec<String>,
    pub scores: Vec<f64>,
}

impl Predictions {
    pub fn parse_str(text: &str) -> PipelineResult<Self> {
        let mut out = Predictions::default();
        for (lineno, id, value) in records(text)? {
            let score: f64 = value.parse().map_err(|_| {
                PipelineError::invalid(format!(
                    "predictions line {}: score '{}' is not a number",
                    lineno, value
                ))
            })?;
            if !score.is_finite() {
                return Err(PipelineError::invalid(format!(
                    "predictions line {}: score must be finite",
                    lineno
                )));
            }
            out.ids.push(id.to_string());
            out.scores.push(score);
        }
        Ok(out)
    }

    pub fn load(path: &Path) -> PipelineResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::parse_str(&text)
    }
}

/// `(line number, id, value)` for each non-comment line.
fn records(text: &str) -> PipelineResult<Vec<(usize, &str, &str)>> {
    let mut out = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(id), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(PipelineError::invalid(format!(
                "line {}: expected '<filename> <value>', got '{}'",
                i + 1,
                line
            )));
        };
        out.push((i + 1, id, value));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_labels_skipping_comments() {
        let gt = GroundTruth::parse_str(
            "# reviewed set\n\
             a.txt 1\n\
             \n\
             b.txt\t0\n\
             c.txt   1\n",
        )
        .unwrap();
        assert_eq!(gt.ids, vec!["a.txt", "b.txt", "c.txt"]);
        assert_eq!(gt.labels, vec![true, false, true]);
        assert_eq!(gt.as_map()["b.txt"], false);
    }

    #[test]
    fn bad_label_reports_line_number() {
        let err = GroundTruth::parse_str("a.txt 1\nb.txt yes\n").unwrap_err();
        assert!(err.to_string().contains("line 2"), "{}", err);
    }

    #[test]
    fn malformed_line_is_rejected() {
        assert!(GroundTruth::parse_str("a.txt\n").is_err());
        assert!(GroundTruth::parse_str("a.txt 1 extra\n").is_err());
    }

    #[test]
    fn predictions_parse_scores() {
        let p = Predictions::parse_str("a 0.25\nb 1\n").unwrap();
        assert_eq!(p.scores, vec![0.25, 1.0]);
        assert!(Predictions::parse_str("a NaN\n").is_err());
        assert!(Predictions::parse_str("a high\n").is_err());
    }
}
