//! Text vectorization: tokenization, vocabulary fitting, and tf-idf weighting.
//!
//! The vectorizer runs in two passes so it can be driven chunk by chunk by
//! the extraction orchestrator:
//!
//! 1. A [`VectorizerFitter`] observes every document once and accumulates
//!    document frequencies, then [`finish`](VectorizerFitter::finish)es into
//!    a [`Vectorizer`].
//! 2. [`Vectorizer::transform`] turns one document into a weighted sparse row.
//!
//! Two feature spaces are supported. A [`FeatureSpace::Vocabulary`] keeps an
//! explicit, pruned term list bounded by document-frequency limits. A
//! [`FeatureSpace::Hashing`] space maps terms to a fixed number of columns
//! with a stable hash and has no document-frequency bounds at all.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};
use crate::models::SparseVec;

/// Tolerance when deciding whether a df bound is a fraction or a count.
pub const DF_EPSILON: f64 = 1e-3;

const ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for",
    "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "herself",
    "him", "himself", "his", "how", "if", "in", "into", "is", "it", "its", "itself", "me",
    "more", "most", "my", "myself", "no", "nor", "not", "of", "off", "on", "once", "only", "or",
    "other", "our", "ours", "ourselves", "out", "over", "own", "same", "she", "should", "so",
    "some", "such", "than", "that", "the", "their", "theirs", "them", "themselves", "then",
    "there", "these", "they", "this", "those", "through", "to", "too", "under", "until", "up",
    "very", "was", "we", "were", "what", "when", "where", "which", "while", "who", "whom", "why",
    "will", "with", "would", "you", "your", "yours", "yourself", "yourselves",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Analyzer {
    #[default]
    Word,
    Char,
}

impl FromStr for Analyzer {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "word" => Ok(Analyzer::Word),
            "char" => Ok(Analyzer::Char),
            other => Err(CoreError::invalid(format!(
                "unknown analyzer '{}'; expected word or char",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopWords {
    #[default]
    None,
    English,
}

impl FromStr for StopWords {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(StopWords::None),
            "english" => Ok(StopWords::English),
            other => Err(CoreError::invalid(format!(
                "unknown stop word list '{}'",
                other
            ))),
        }
    }
}

/// Row normalization applied after weighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Norm {
    L1,
    #[default]
    L2,
    None,
}

impl FromStr for Norm {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l1" => Ok(Norm::L1),
            "l2" => Ok(Norm::L2),
            "none" | "null" => Ok(Norm::None),
            other => Err(CoreError::invalid(format!(
                "unknown norm '{}'; expected l1, l2 or none",
                other
            ))),
        }
    }
}

/// A document-frequency bound: either a fraction of the corpus or an
/// absolute number of documents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DfBound {
    Count(usize),
    Fraction(f64),
}

impl DfBound {
    /// Interpret a raw numeric bound.
    ///
    /// Values up to `1 + DF_EPSILON` are fractions of the corpus (clamped to
    /// 1.0); larger values are truncated to an absolute document count.
    pub fn from_raw(value: f64) -> CoreResult<Self> {
        if !value.is_finite() || value < 0.0 {
            return Err(CoreError::invalid(format!(
                "document frequency bound must be a non-negative number, got {}",
                value
            )));
        }
        if value > 1.0 + DF_EPSILON {
            Ok(DfBound::Count(value as usize))
        } else {
            Ok(DfBound::Fraction(value.min(1.0)))
        }
    }

    /// The bound expressed as a number of documents for a corpus of `n_docs`.
    pub fn doc_count(&self, n_docs: usize) -> f64 {
        match self {
            DfBound::Count(c) => *c as f64,
            DfBound::Fraction(f) => f * n_docs as f64,
        }
    }
}

/// Where term columns come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FeatureSpace {
    Vocabulary {
        min_df: DfBound,
        max_df: DfBound,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_features: Option<usize>,
    },
    Hashing {
        n_features: usize,
    },
}

impl FeatureSpace {
    pub fn is_hashing(&self) -> bool {
        matches!(self, FeatureSpace::Hashing { .. })
    }
}

/// Complete, validated vectorizer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorizerConfig {
    pub analyzer: Analyzer,
    pub ngram_range: (usize, usize),
    pub stop_words: StopWords,
    #[serde(flatten)]
    pub space: FeatureSpace,
    pub use_idf: bool,
    pub sublinear_tf: bool,
    pub binary: bool,
    pub norm: Norm,
}

impl Default for VectorizerConfig {
    fn default() -> Self {
        Self {
            analyzer: Analyzer::Word,
            ngram_range: (1, 1),
            stop_words: StopWords::None,
            space: FeatureSpace::Hashing { n_features: 100_001 },
            use_idf: true,
            sublinear_tf: false,
            binary: false,
            norm: Norm::L2,
        }
    }
}

impl VectorizerConfig {
    pub fn validate(&self) -> CoreResult<()> {
        let (lo, hi) = self.ngram_range;
        if lo == 0 || lo > hi {
            return Err(CoreError::invalid(format!(
                "ngram_range must satisfy 1 <= min <= max, got ({}, {})",
                lo, hi
            )));
        }
        match &self.space {
            FeatureSpace::Hashing { n_features } => {
                if *n_features == 0 || *n_features > u32::MAX as usize {
                    return Err(CoreError::invalid(format!(
                        "n_features must be in [1, {}], got {}",
                        u32::MAX,
                        n_features
                    )));
                }
            }
            FeatureSpace::Vocabulary {
                min_df,
                max_df,
                max_features,
            } => {
                if *max_features == Some(0) {
                    return Err(CoreError::invalid("max_features must be >= 1"));
                }
                let contradictory = match (min_df, max_df) {
                    (DfBound::Count(a), DfBound::Count(b)) => a > b,
                    (DfBound::Fraction(a), DfBound::Fraction(b)) => a > b,
                    _ => false,
                };
                if contradictory {
                    return Err(CoreError::invalid("min_df must not exceed max_df"));
                }
            }
        }
        Ok(())
    }

    /// Split `text` into the terms this configuration counts.
    pub fn analyze(&self, text: &str) -> Vec<String> {
        let (lo, hi) = self.ngram_range;
        match self.analyzer {
            Analyzer::Word => {
                let tokens: Vec<String> = word_tokens(text)
                    .filter(|t| {
                        self.stop_words == StopWords::None
                            || !ENGLISH_STOP_WORDS.contains(&t.as_str())
                    })
                    .collect();
                let mut out = Vec::new();
                for n in lo..=hi {
                    if n == 1 {
                        out.extend(tokens.iter().cloned());
                    } else if tokens.len() >= n {
                        out.extend(tokens.windows(n).map(|w| w.join(" ")));
                    }
                }
                out
            }
            Analyzer::Char => {
                let normalized: Vec<char> = text
                    .to_lowercase()
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .chars()
                    .collect();
                let mut out = Vec::new();
                for n in lo..=hi {
                    if normalized.len() >= n {
                        out.extend(normalized.windows(n).map(|w| w.iter().collect::<String>()));
                    }
                }
                out
            }
        }
    }
}

/// Lowercased alphanumeric runs of at least two characters.
fn word_tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.chars().count() >= 2)
        .map(|t| t.to_lowercase())
}

/// Stable column for `term` in a hashed space of `n_features` columns.
pub fn hash_term(term: &str, n_features: usize) -> u32 {
    let digest = Sha256::digest(term.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(head) % n_features as u64) as u32
}

fn smooth_idf(n_docs: usize, df: usize) -> f32 {
    (((1 + n_docs) as f64 / (1 + df) as f64).ln() + 1.0) as f32
}

/// Ordered term list with a reverse index.
#[derive(Debug, Clone, PartialEq)]
pub struct Vocabulary {
    terms: Vec<String>,
    index: HashMap<String, u32>,
}

impl Vocabulary {
    pub fn new(terms: Vec<String>) -> Self {
        let index = terms
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i as u32))
            .collect();
        Self { terms, index }
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn get(&self, term: &str) -> Option<u32> {
        self.index.get(term).copied()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// First pass over the corpus: counts document frequencies.
pub struct VectorizerFitter {
    config: VectorizerConfig,
    n_docs: usize,
    term_df: HashMap<String, usize>,
    hashed_df: Vec<u32>,
}

impl VectorizerFitter {
    pub fn new(config: VectorizerConfig) -> CoreResult<Self> {
        config.validate()?;
        let hashed_df = match &config.space {
            FeatureSpace::Hashing { n_features } if config.use_idf => vec![0u32; *n_features],
            _ => Vec::new(),
        };
        Ok(Self {
            config,
            n_docs: 0,
            term_df: HashMap::new(),
            hashed_df,
        })
    }

    pub fn observe(&mut self, text: &str) {
        self.n_docs += 1;
        let terms: HashSet<String> = self.config.analyze(text).into_iter().collect();
        match &self.config.space {
            FeatureSpace::Vocabulary { .. } => {
                for term in terms {
                    *self.term_df.entry(term).or_insert(0) += 1;
                }
            }
            FeatureSpace::Hashing { n_features } => {
                if self.config.use_idf {
                    let cols: HashSet<u32> =
                        terms.iter().map(|t| hash_term(t, *n_features)).collect();
                    for c in cols {
                        self.hashed_df[c as usize] += 1;
                    }
                }
            }
        }
    }

    pub fn n_docs(&self) -> usize {
        self.n_docs
    }

    pub fn finish(self) -> CoreResult<Vectorizer> {
        if self.n_docs == 0 {
            return Err(CoreError::invalid("cannot fit a vectorizer on zero documents"));
        }
        let n = self.n_docs;
        let space = self.config.space.clone();
        match space {
            FeatureSpace::Hashing { .. } => {
                let idf = if self.config.use_idf {
                    Some(
                        self.hashed_df
                            .iter()
                            .map(|df| smooth_idf(n, *df as usize))
                            .collect(),
                    )
                } else {
                    None
                };
                Ok(Vectorizer {
                    config: self.config,
                    vocabulary: None,
                    idf,
                })
            }
            FeatureSpace::Vocabulary {
                min_df,
                max_df,
                max_features,
            } => {
                let min_docs = min_df.doc_count(n);
                let max_docs = max_df.doc_count(n);
                if max_docs < min_docs {
                    return Err(CoreError::invalid(
                        "max_df corresponds to fewer documents than min_df",
                    ));
                }
                let mut kept: Vec<(String, usize)> = self
                    .term_df
                    .into_iter()
                    .filter(|(_, df)| (*df as f64) >= min_docs && (*df as f64) <= max_docs)
                    .collect();
                if let Some(limit) = max_features {
                    kept.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                    kept.truncate(limit);
                }
                if kept.is_empty() {
                    return Err(CoreError::invalid(
                        "after pruning, no terms remain; try a lower min_df or a higher max_df",
                    ));
                }
                kept.sort_by(|a, b| a.0.cmp(&b.0));
                let idf = if self.config.use_idf {
                    Some(kept.iter().map(|(_, df)| smooth_idf(n, *df)).collect())
                } else {
                    None
                };
                let terms = kept.into_iter().map(|(t, _)| t).collect();
                Ok(Vectorizer {
                    config: self.config,
                    vocabulary: Some(Vocabulary::new(terms)),
                    idf,
                })
            }
        }
    }
}

/// A fitted vectorizer.
#[derive(Debug, Clone, PartialEq)]
pub struct Vectorizer {
    config: VectorizerConfig,
    vocabulary: Option<Vocabulary>,
    idf: Option<Vec<f32>>,
}

impl Vectorizer {
    /// Reassemble a vectorizer from persisted parts.
    pub fn from_parts(
        config: VectorizerConfig,
        vocabulary: Option<Vec<String>>,
        idf: Option<Vec<f32>>,
    ) -> CoreResult<Self> {
        config.validate()?;
        let vocabulary = match (&config.space, vocabulary) {
            (FeatureSpace::Vocabulary { .. }, Some(terms)) => Some(Vocabulary::new(terms)),
            (FeatureSpace::Vocabulary { .. }, None) => {
                return Err(CoreError::Corrupt("vocabulary is missing".to_string()))
            }
            (FeatureSpace::Hashing { .. }, _) => None,
        };
        let v = Self {
            config,
            vocabulary,
            idf,
        };
        if let Some(idf) = &v.idf {
            if idf.len() != v.n_features() {
                return Err(CoreError::Corrupt(format!(
                    "idf has {} entries for {} features",
                    idf.len(),
                    v.n_features()
                )));
            }
        }
        Ok(v)
    }

    pub fn config(&self) -> &VectorizerConfig {
        &self.config
    }

    pub fn n_features(&self) -> usize {
        match (&self.config.space, &self.vocabulary) {
            (FeatureSpace::Hashing { n_features }, _) => *n_features,
            (_, Some(vocab)) => vocab.len(),
            _ => 0,
        }
    }

    /// Term names per column; `None` for hashed spaces.
    pub fn feature_names(&self) -> Option<&[String]> {
        self.vocabulary.as_ref().map(|v| v.terms())
    }

    pub fn idf(&self) -> Option<&[f32]> {
        self.idf.as_deref()
    }

    pub fn feature_index(&self, term: &str) -> Option<u32> {
        match (&self.config.space, &self.vocabulary) {
            (FeatureSpace::Hashing { n_features }, _) => Some(hash_term(term, *n_features)),
            (_, Some(vocab)) => vocab.get(term),
            _ => None,
        }
    }

    pub fn transform(&self, text: &str) -> SparseVec {
        let mut counts: HashMap<u32, f32> = HashMap::new();
        for term in self.config.analyze(text) {
            if let Some(col) = self.feature_index(&term) {
                *counts.entry(col).or_insert(0.0) += 1.0;
            }
        }

        let pairs: Vec<(u32, f32)> = counts
            .into_iter()
            .map(|(col, tf)| {
                let mut w = if self.config.binary {
                    1.0
                } else if self.config.sublinear_tf {
                    1.0 + tf.ln()
                } else {
                    tf
                };
                if let Some(idf) = &self.idf {
                    w *= idf[col as usize];
                }
                (col, w)
            })
            .collect();
        let mut row = SparseVec::from_pairs(pairs);

        let scale = match self.config.norm {
            Norm::L1 => row.values.iter().map(|v| v.abs()).sum::<f32>(),
            Norm::L2 => row.norm(),
            Norm::None => 1.0,
        };
        if scale > f32::EPSILON && self.config.norm != Norm::None {
            for v in row.values.iter_mut() {
                *v /= scale;
            }
        }
        row
    }
}
