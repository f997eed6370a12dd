//! Core data types shared by every pipeline stage.
//!
//! Identifiers are opaque, typed strings so a dataset id can never be passed
//! where a model id is expected. Feature rows are sparse; the orchestration
//! layer densifies them only when a kernel needs it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

fn validate_id(raw: &str) -> CoreResult<()> {
    let ok = !raw.is_empty()
        && raw.len() <= 64
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(CoreError::InvalidId(raw.to_string()))
    }
}

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Allocate a fresh random identifier (UUID v4, simple form).
            pub fn generate() -> Self {
                Self(Uuid::new_v4().simple().to_string())
            }

            /// Parse a caller-supplied identifier.
            ///
            /// Only ASCII alphanumerics, `-` and `_` are accepted, which keeps
            /// ids safe to use as directory names.
            pub fn parse(raw: &str) -> CoreResult<Self> {
                validate_id(raw)?;
                Ok(Self(raw.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = CoreError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                validate_id(&value)?;
                Ok(Self(value))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }
    };
}

opaque_id!(
    /// Identity of a document set and its derived feature set (`dsid`).
    DatasetId
);

opaque_id!(
    /// Identity of a trained model of any kind (`mid`).
    ModelId
);

/// The kinds of model a registry can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Lsi,
    Categorizer,
    Clustering,
    DuplicateDetection,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Lsi => "lsi",
            ModelKind::Categorizer => "categorizer",
            ModelKind::Clustering => "clustering",
            ModelKind::DuplicateDetection => "duplicate_detection",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lsi" => Ok(ModelKind::Lsi),
            "categorizer" | "categorization" => Ok(ModelKind::Categorizer),
            "clustering" | "cluster" => Ok(ModelKind::Clustering),
            "duplicate_detection" | "dupdet" => Ok(ModelKind::DuplicateDetection),
            other => Err(CoreError::invalid(format!("unknown model kind '{}'", other))),
        }
    }
}

/// A sparse feature row with strictly increasing column indices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVec {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVec {
    /// Build from unordered `(column, value)` pairs, summing duplicates and
    /// dropping explicit zeros.
    pub fn from_pairs(mut pairs: Vec<(u32, f32)>) -> Self {
        pairs.sort_by_key(|(i, _)| *i);
        let mut indices: Vec<u32> = Vec::with_capacity(pairs.len());
        let mut values: Vec<f32> = Vec::with_capacity(pairs.len());
        for (i, v) in pairs {
            if indices.last() == Some(&i) {
                if let Some(last) = values.last_mut() {
                    *last += v;
                }
            } else {
                indices.push(i);
                values.push(v);
            }
        }
        let (indices, values) = indices
            .into_iter()
            .zip(values)
            .filter(|(_, v)| *v != 0.0)
            .unzip();
        Self { indices, values }
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, f32)> + '_ {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Dot product against a dense vector. Out-of-range columns count as zero.
    pub fn dot_dense(&self, dense: &[f32]) -> f32 {
        self.iter()
            .filter_map(|(i, v)| dense.get(i as usize).map(|d| d * v))
            .sum()
    }

    /// Dot product against another sparse row (merge join).
    pub fn dot_sparse(&self, other: &SparseVec) -> f32 {
        let (mut a, mut b) = (0usize, 0usize);
        let mut acc = 0.0f32;
        while a < self.indices.len() && b < other.indices.len() {
            match self.indices[a].cmp(&other.indices[b]) {
                std::cmp::Ordering::Less => a += 1,
                std::cmp::Ordering::Greater => b += 1,
                std::cmp::Ordering::Equal => {
                    acc += self.values[a] * other.values[b];
                    a += 1;
                    b += 1;
                }
            }
        }
        acc
    }

    pub fn to_dense(&self, n_features: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; n_features];
        for (i, v) in self.iter() {
            if let Some(slot) = out.get_mut(i as usize) {
                *slot = v;
            }
        }
        out
    }
}

/// A document-by-feature matrix stored as sparse rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureMatrix {
    pub n_features: usize,
    pub rows: Vec<SparseVec>,
}

impl FeatureMatrix {
    pub fn new(n_features: usize, rows: Vec<SparseVec>) -> Self {
        Self { n_features, rows }
    }

    pub fn n_samples(&self) -> usize {
        self.rows.len()
    }

    /// Densify the matrix over only the columns that occur in at least one
    /// row.
    ///
    /// Returns the dense rows and, for each dense column, the original
    /// feature index. Hashed feature spaces are mostly empty, so this keeps
    /// dense kernels proportional to the observed vocabulary.
    pub fn compact_dense(&self) -> (Vec<Vec<f32>>, Vec<u32>) {
        let mut used: Vec<u32> = self
            .rows
            .iter()
            .flat_map(|r| r.indices.iter().copied())
            .collect();
        used.sort_unstable();
        used.dedup();

        let dense = self
            .rows
            .iter()
            .map(|row| {
                let mut out = vec![0.0f32; used.len()];
                for (i, v) in row.iter() {
                    if let Ok(pos) = used.binary_search(&i) {
                        out[pos] = v;
                    }
                }
                out
            })
            .collect();
        (dense, used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_and_valid() {
        let a = DatasetId::generate();
        let b = DatasetId::generate();
        assert_ne!(a, b);
        assert!(DatasetId::parse(a.as_str()).is_ok());
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn ids_reject_path_traversal() {
        assert!(ModelId::parse("../etc").is_err());
        assert!(ModelId::parse("").is_err());
        assert!(ModelId::parse("a/b").is_err());
        assert!(ModelId::parse("abc-123_x").is_ok());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = ModelId::parse("abc123").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abc123\"");
        let back: ModelId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<ModelId>("\"../x\"").is_err());
    }

    #[test]
    fn model_kind_parses_aliases() {
        assert_eq!("dupdet".parse::<ModelKind>().unwrap(), ModelKind::DuplicateDetection);
        assert_eq!("lsi".parse::<ModelKind>().unwrap(), ModelKind::Lsi);
        assert!("svm".parse::<ModelKind>().is_err());
    }

    #[test]
    fn sparse_from_pairs_sorts_and_merges() {
        let v = SparseVec::from_pairs(vec![(5, 1.0), (2, 2.0), (5, 3.0), (7, 0.0)]);
        assert_eq!(v.indices, vec![2, 5]);
        assert_eq!(v.values, vec![2.0, 4.0]);
    }

    #[test]
    fn sparse_dot_products() {
        let a = SparseVec::from_pairs(vec![(0, 1.0), (3, 2.0)]);
        let b = SparseVec::from_pairs(vec![(3, 4.0), (9, 1.0)]);
        assert_eq!(a.dot_sparse(&b), 8.0);
        assert_eq!(a.dot_dense(&[1.0, 0.0, 0.0, 0.5]), 2.0);
    }

    #[test]
    fn compact_dense_keeps_only_used_columns() {
        let m = FeatureMatrix::new(
            1000,
            vec![
                SparseVec::from_pairs(vec![(10, 1.0)]),
                SparseVec::from_pairs(vec![(999, 2.0), (10, 3.0)]),
            ],
        );
        let (dense, cols) = m.compact_dense();
        assert_eq!(cols, vec![10, 999]);
        assert_eq!(dense[0], vec![1.0, 0.0]);
        assert_eq!(dense[1], vec![3.0, 2.0]);
    }
}
