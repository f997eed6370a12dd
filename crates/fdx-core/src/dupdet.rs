//! Near-duplicate detection.
//!
//! Two fingerprinting schemes are supported:
//!
//! - **SimHash**: a 64-bit locality-sensitive fingerprint per document.
//!   Documents whose fingerprints differ in at most `distance` bits are
//!   duplicates. Candidate pairs are found by splitting the fingerprint into
//!   `distance + 1` blocks: by pigeonhole, any pair within the bound agrees
//!   exactly on at least one block.
//! - **I-Match**: each of `n_rand_lexicons` random sub-lexicons (a
//!   `rand_lexicon_ratio` share of the observed vocabulary) yields one
//!   signature per document, the SHA-256 of the document's terms restricted
//!   to that lexicon. Documents sharing a signature under any lexicon are
//!   duplicates.
//!
//! Duplicate relations are closed transitively and reported as one cluster
//! id per document, numbered by first appearance. Both schemes are
//! deterministic for a given index and query.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cluster::tree::find;
use crate::error::{CoreError, CoreResult};
use crate::models::SparseVec;

const FINGERPRINT_BITS: u32 = 64;
const LEXICON_SEED: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DupMethod {
    #[default]
    SimHash,
    IMatch,
}

impl DupMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DupMethod::SimHash => "simhash",
            DupMethod::IMatch => "imatch",
        }
    }
}

impl fmt::Display for DupMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DupMethod {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "simhash" => Ok(DupMethod::SimHash),
            "imatch" => Ok(DupMethod::IMatch),
            other => Err(CoreError::invalid(format!(
                "unknown duplicate detection method '{}'",
                other
            ))),
        }
    }
}

/// Query parameters. `distance` applies to SimHash, the lexicon settings
/// to I-Match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DupQuery {
    pub distance: u32,
    pub n_rand_lexicons: usize,
    pub rand_lexicon_ratio: f64,
}

impl Default for DupQuery {
    fn default() -> Self {
        Self {
            distance: 2,
            n_rand_lexicons: 10,
            rand_lexicon_ratio: 0.7,
        }
    }
}

impl DupQuery {
    pub fn validate(&self) -> CoreResult<()> {
        if self.n_rand_lexicons == 0 {
            return Err(CoreError::invalid("n_rand_lexicons must be >= 1"));
        }
        if !(self.rand_lexicon_ratio > 0.0 && self.rand_lexicon_ratio <= 1.0) {
            return Err(CoreError::invalid(format!(
                "rand_lexicon_ratio must be in (0, 1], got {}",
                self.rand_lexicon_ratio
            )));
        }
        Ok(())
    }
}

/// A fitted fingerprint index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum DupIndex {
    SimHash { fingerprints: Vec<u64> },
    IMatch { documents: Vec<Vec<u32>> },
}

fn term_hash(index: u32) -> u64 {
    let digest = Sha256::digest(index.to_le_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// 64-bit SimHash of a weighted feature row.
pub fn simhash(row: &SparseVec) -> u64 {
    simhash_with(row, &mut HashMap::new())
}

fn simhash_with(row: &SparseVec, cache: &mut HashMap<u32, u64>) -> u64 {
    let mut acc = [0.0f64; FINGERPRINT_BITS as usize];
    for (i, w) in row.iter() {
        let h = *cache.entry(i).or_insert_with(|| term_hash(i));
        for (bit, slot) in acc.iter_mut().enumerate() {
            if (h >> bit) & 1 == 1 {
                *slot += w as f64;
            } else {
                *slot -= w as f64;
            }
        }
    }
    acc.iter()
        .enumerate()
        .filter(|(_, v)| **v > 0.0)
        .fold(0u64, |fp, (bit, _)| fp | (1u64 << bit))
}

pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Renumber union-find roots densely by first appearance.
fn dense_labels(parent: &mut [usize]) -> Vec<usize> {
    let mut ids: HashMap<usize, usize> = HashMap::new();
    (0..parent.len())
        .map(|i| {
            let root = find(parent, i);
            let next = ids.len();
            *ids.entry(root).or_insert(next)
        })
        .collect()
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let (ra, rb) = (find(parent, a), find(parent, b));
    if ra != rb {
        parent[ra.max(rb)] = ra.min(rb);
    }
}

fn block_masks(distance: u32) -> Vec<u64> {
    let blocks = distance + 1;
    let base = FINGERPRINT_BITS / blocks;
    let extra = FINGERPRINT_BITS % blocks;
    let mut start = 0u32;
    (0..blocks)
        .map(|b| {
            let width = base + u32::from(b < extra);
            let mask = if width >= 64 {
                u64::MAX
            } else {
                ((1u64 << width) - 1) << start
            };
            start += width;
            mask
        })
        .collect()
}

fn simhash_clusters(fingerprints: &[u64], distance: u32) -> Vec<usize> {
    let mut parent: Vec<usize> = (0..fingerprints.len()).collect();
    if distance >= FINGERPRINT_BITS {
        for i in 1..fingerprints.len() {
            union(&mut parent, 0, i);
        }
        return dense_labels(&mut parent);
    }
    for mask in block_masks(distance) {
        let mut buckets: HashMap<u64, Vec<usize>> = HashMap::new();
        for (i, fp) in fingerprints.iter().enumerate() {
            buckets.entry(fp & mask).or_default().push(i);
        }
        for members in buckets.values() {
            for (x, &a) in members.iter().enumerate() {
                for &b in &members[x + 1..] {
                    if hamming(fingerprints[a], fingerprints[b]) <= distance {
                        union(&mut parent, a, b);
                    }
                }
            }
        }
    }
    dense_labels(&mut parent)
}

fn imatch_clusters(documents: &[Vec<u32>], query: &DupQuery) -> Vec<usize> {
    let mut parent: Vec<usize> = (0..documents.len()).collect();
    let mut vocabulary: Vec<u32> = documents.iter().flatten().copied().collect();
    vocabulary.sort_unstable();
    vocabulary.dedup();
    if vocabulary.is_empty() {
        return dense_labels(&mut parent);
    }

    let size = ((vocabulary.len() as f64 * query.rand_lexicon_ratio).ceil() as usize)
        .clamp(1, vocabulary.len());
    let mut rng = StdRng::seed_from_u64(LEXICON_SEED);
    for _ in 0..query.n_rand_lexicons {
        let mut lexicon: Vec<u32> = sample(&mut rng, vocabulary.len(), size)
            .into_iter()
            .map(|i| vocabulary[i])
            .collect();
        lexicon.sort_unstable();

        let mut seen: HashMap<Vec<u8>, usize> = HashMap::new();
        for (d, terms) in documents.iter().enumerate() {
            let mut hasher = Sha256::new();
            let mut any = false;
            for t in terms.iter().filter(|t| lexicon.binary_search(*t).is_ok()) {
                hasher.update(t.to_le_bytes());
                any = true;
            }
            if !any {
                continue;
            }
            let signature = hasher.finalize().to_vec();
            match seen.get(&signature) {
                Some(&first) => union(&mut parent, first, d),
                None => {
                    seen.insert(signature, d);
                }
            }
        }
    }
    dense_labels(&mut parent)
}

impl DupIndex {
    /// Fingerprint every row.
    pub fn fit(method: DupMethod, rows: &[SparseVec]) -> Self {
        match method {
            DupMethod::SimHash => {
                let mut cache = HashMap::new();
                DupIndex::SimHash {
                    fingerprints: rows.iter().map(|r| simhash_with(r, &mut cache)).collect(),
                }
            }
            DupMethod::IMatch => DupIndex::IMatch {
                documents: rows.iter().map(|r| r.indices.clone()).collect(),
            },
        }
    }

    pub fn method(&self) -> DupMethod {
        match self {
            DupIndex::SimHash { .. } => DupMethod::SimHash,
            DupIndex::IMatch { .. } => DupMethod::IMatch,
        }
    }

    pub fn n_documents(&self) -> usize {
        match self {
            DupIndex::SimHash { fingerprints } => fingerprints.len(),
            DupIndex::IMatch { documents } => documents.len(),
        }
    }

    /// Cluster id per document.
    pub fn query(&self, query: &DupQuery) -> CoreResult<Vec<usize>> {
        query.validate()?;
        Ok(match self {
            DupIndex::SimHash { fingerprints } => simhash_clusters(fingerprints, query.distance),
            DupIndex::IMatch { documents } => imatch_clusters(documents, query),
        })
    }
}
