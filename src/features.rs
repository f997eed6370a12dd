//! Feature extraction orchestration.
//!
//! Turns a [`DocumentSet`] into a persisted feature set identified by a
//! [`DatasetId`]. Extraction is split so that the expensive part can run in
//! the background while callers poll:
//!
//! ```text
//! preprocess(docs, request) ──► dsid            (validate, write pars + status)
//! run(dsid) / spawn(dsid)                        (df pass, one artifact per chunk)
//! status(dsid) ──► InProgress | Finished         (reads status.json + chunk count)
//! finalize(dsid)                                 (compact chunks into features.bin)
//! load(dsid) ──► FeatureSet                      (matrix + fitted vectorizer)
//! ```
//!
//! # On-disk layout
//!
//! ```text
//! features/<dsid>/pars.json          effective parameters, filenames
//! features/<dsid>/documents.json     document references and ground truth
//! features/<dsid>/status.json        processing | finished | failed
//! features/<dsid>/vocabulary.json    term list (vocabulary mode only)
//! features/<dsid>/idf.bin            idf weights (when use_idf)
//! features/<dsid>/features-00000.bin one sparse block per chunk
//! features/<dsid>/features.bin       all rows, after finalize
//! ```
//!
//! The status record is authoritative: a failed run writes `failed` with
//! its message and `status` reports it as [`PipelineError::ProcessingFailure`]
//! until the dataset is deleted. Finished never goes back to processing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fdx_core::codec::{blob_to_vec, decode_sparse_rows, encode_sparse_rows, vec_to_blob};
use fdx_core::text::{DfBound, FeatureSpace, Vectorizer, VectorizerConfig, VectorizerFitter};
use fdx_core::{DatasetId, FeatureMatrix, SparseVec};
use serde::{Deserialize, Serialize};

use crate::documents::DocumentSet;
use crate::error::{PipelineError, PipelineResult};
use crate::ground_truth::GroundTruth;
use crate::progress::{ExtractionEvent, ExtractionProgressReporter, NoProgress};
use crate::registry::{read_json, write_atomic, write_json, ModelRegistry};

pub const DEFAULT_CHUNK_SIZE: usize = 5000;
pub const DEFAULT_N_FEATURES: usize = 100_001;

const PARS_FILE: &str = "pars.json";
const DOCUMENTS_FILE: &str = "documents.json";
const STATUS_FILE: &str = "status.json";
const VOCABULARY_FILE: &str = "vocabulary.json";
const IDF_FILE: &str = "idf.bin";
const FEATURES_FILE: &str = "features.bin";

fn chunk_file_name(chunk: usize) -> String {
    format!("features-{:05}.bin", chunk)
}

fn parse_chunk_file_name(name: &str) -> Option<usize> {
    let digits = name.strip_prefix("features-")?.strip_suffix(".bin")?;
    if digits.len() == 5 && digits.chars().all(|c| c.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}

// ---- request / effective configuration -------------------------------------

/// Extraction parameters as a caller supplies them: loosely typed, with
/// string enums and raw document-frequency bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionRequest {
    pub use_hashing: bool,
    pub n_features: Option<usize>,
    pub min_df: Option<f64>,
    pub max_df: Option<f64>,
    pub max_features: Option<usize>,
    pub use_idf: bool,
    pub sublinear_tf: bool,
    pub binary: bool,
    pub norm: String,
    pub analyzer: String,
    pub ngram_range: (usize, usize),
    pub stop_words: String,
    pub chunk_size: usize,
}

impl Default for ExtractionRequest {
    fn default() -> Self {
        Self {
            use_hashing: true,
            n_features: None,
            min_df: None,
            max_df: None,
            max_features: None,
            use_idf: true,
            sublinear_tf: false,
            binary: false,
            norm: "l2".to_string(),
            analyzer: "word".to_string(),
            ngram_range: (1, 1),
            stop_words: "none".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// The normalized configuration actually used for extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(flatten)]
    pub vectorizer: VectorizerConfig,
    pub chunk_size: usize,
}

impl ExtractionConfig {
    /// Normalize a request.
    ///
    /// Document-frequency bounds up to `1 + 1e-3` are corpus fractions,
    /// larger ones are truncated to document counts. With hashing the df
    /// bounds are dropped entirely.
    pub fn from_request(request: &ExtractionRequest) -> PipelineResult<Self> {
        if request.chunk_size == 0 {
            return Err(PipelineError::invalid("chunk_size must be >= 1"));
        }
        let space = if request.use_hashing {
            if request.min_df.is_some() || request.max_df.is_some() {
                tracing::debug!("hashing selected; ignoring min_df/max_df");
            }
            FeatureSpace::Hashing {
                n_features: request.n_features.unwrap_or(DEFAULT_N_FEATURES),
            }
        } else {
            FeatureSpace::Vocabulary {
                min_df: DfBound::from_raw(request.min_df.unwrap_or(0.0))?,
                max_df: DfBound::from_raw(request.max_df.unwrap_or(1.0))?,
                max_features: request.max_features,
            }
        };
        let vectorizer = VectorizerConfig {
            analyzer: request.analyzer.parse()?,
            ngram_range: request.ngram_range,
            stop_words: request.stop_words.parse()?,
            space,
            use_idf: request.use_idf,
            sublinear_tf: request.sublinear_tf,
            binary: request.binary,
            norm: request.norm.parse()?,
        };
        vectorizer.validate()?;
        Ok(Self {
            vectorizer,
            chunk_size: request.chunk_size,
        })
    }
}

/// Persisted parameters of a feature set (`pars.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetParams {
    pub dsid: DatasetId,
    pub n_samples: usize,
    pub filenames: Vec<String>,
    #[serde(flatten)]
    pub config: ExtractionConfig,
    pub created_at: DateTime<Utc>,
}

impl DatasetParams {
    pub fn n_chunks(&self) -> usize {
        self.n_samples.div_ceil(self.config.chunk_size)
    }
}

// ---- status ----------------------------------------------------------------

/// The persisted status record (`status.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StatusRecord {
    Processing {
        started_at: DateTime<Utc>,
    },
    Finished {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },
    Failed {
        message: String,
        failed_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionState {
    InProgress,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStatus {
    pub dsid: DatasetId,
    pub state: ExtractionState,
    pub processed: usize,
    pub total: usize,
}

/// Derive the externally visible status from the persisted record and the
/// number of chunk artifacts on disk.
pub fn compute_status(
    dsid: &DatasetId,
    record: Option<&StatusRecord>,
    n_chunks: usize,
    compacted: bool,
    params: &DatasetParams,
) -> PipelineResult<ExtractionStatus> {
    let total = params.n_samples;
    let failure = |message: String| PipelineError::ProcessingFailure {
        dsid: dsid.to_string(),
        message,
    };
    let expected = params.n_chunks();
    match record {
        None => Err(failure("status record is missing".to_string())),
        Some(StatusRecord::Failed { message, .. }) => Err(failure(message.clone())),
        Some(StatusRecord::Processing { .. }) => {
            if n_chunks > expected {
                return Err(failure(format!(
                    "found {} chunk artifacts, expected at most {}",
                    n_chunks, expected
                )));
            }
            Ok(ExtractionStatus {
                dsid: dsid.clone(),
                state: ExtractionState::InProgress,
                processed: (n_chunks * params.config.chunk_size).min(total),
                total,
            })
        }
        Some(StatusRecord::Finished { .. }) => {
            if !compacted && n_chunks != expected {
                return Err(failure(format!(
                    "marked finished with {} of {} chunk artifacts",
                    n_chunks, expected
                )));
            }
            Ok(ExtractionStatus {
                dsid: dsid.clone(),
                state: ExtractionState::Finished,
                processed: total,
                total,
            })
        }
    }
}

// ---- loaded feature set ----------------------------------------------------

/// A finished feature set in memory.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub dsid: DatasetId,
    pub filenames: Vec<String>,
    pub matrix: FeatureMatrix,
    pub vectorizer: Vectorizer,
    pub ground_truth: Option<GroundTruth>,
}

impl FeatureSet {
    pub fn n_samples(&self) -> usize {
        self.matrix.n_samples()
    }

    /// Row positions of `filenames`, in the order given.
    pub fn positions(&self, filenames: &[String]) -> PipelineResult<Vec<usize>> {
        let index: std::collections::HashMap<&str, usize> = self
            .filenames
            .iter()
            .enumerate()
            .map(|(i, f)| (f.as_str(), i))
            .collect();
        filenames
            .iter()
            .map(|f| {
                index.get(f.as_str()).copied().ok_or_else(|| {
                    PipelineError::invalid(format!(
                        "document '{}' is not part of dataset {}",
                        f, self.dsid
                    ))
                })
            })
            .collect()
    }
}

// ---- orchestrator ----------------------------------------------------------

#[derive(Clone)]
pub struct FeatureExtractor {
    registry: ModelRegistry,
    progress: Arc<dyn ExtractionProgressReporter>,
}

impl FeatureExtractor {
    pub fn new(registry: ModelRegistry) -> Self {
        Self {
            registry,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ExtractionProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Validate inputs, allocate a dataset and record it as processing.
    ///
    /// No vectorization happens here. Nothing is written when validation
    /// fails.
    pub fn preprocess(
        &self,
        documents: &DocumentSet,
        request: &ExtractionRequest,
    ) -> PipelineResult<DatasetId> {
        documents.validate()?;
        let config = ExtractionConfig::from_request(request)?;

        let (dsid, dir) = self.registry.allocate_dataset()?;
        let written = (|| -> PipelineResult<()> {
            let params = DatasetParams {
                dsid: dsid.clone(),
                n_samples: documents.len(),
                filenames: documents.filenames(),
                config,
                created_at: Utc::now(),
            };
            write_json(&dir.join(DOCUMENTS_FILE), documents)?;
            write_json(&dir.join(PARS_FILE), &params)?;
            write_json(
                &dir.join(STATUS_FILE),
                &StatusRecord::Processing {
                    started_at: Utc::now(),
                },
            )
        })();
        if let Err(err) = written {
            let _ = self.registry.delete_dataset(&dsid);
            return Err(err);
        }

        tracing::info!(dsid = %dsid, n_samples = documents.len(), "dataset created");
        Ok(dsid)
    }

    /// Perform extraction for a dataset in `processing` state.
    ///
    /// A finished dataset is left untouched. Failures are recorded in the
    /// status record and returned as `ProcessingFailure`.
    pub fn run(&self, dsid: &DatasetId) -> PipelineResult<()> {
        let dir = self.registry.ensure_dataset(dsid)?;
        let started_at = match self.read_status(&dir)? {
            Some(StatusRecord::Finished { .. }) => return Ok(()),
            Some(StatusRecord::Failed { message, .. }) => {
                return Err(PipelineError::ProcessingFailure {
                    dsid: dsid.to_string(),
                    message,
                })
            }
            Some(StatusRecord::Processing { started_at }) => started_at,
            None => {
                return Err(PipelineError::ProcessingFailure {
                    dsid: dsid.to_string(),
                    message: "status record is missing".to_string(),
                })
            }
        };

        tracing::info!(dsid = %dsid, "feature extraction started");
        match self.extract(dsid, &dir) {
            Ok(total) => {
                write_json(
                    &dir.join(STATUS_FILE),
                    &StatusRecord::Finished {
                        started_at,
                        finished_at: Utc::now(),
                    },
                )?;
                self.progress.report(ExtractionEvent::Finished {
                    dsid: dsid.clone(),
                    total: total as u64,
                });
                tracing::info!(dsid = %dsid, n_samples = total, "feature extraction finished");
                Ok(())
            }
            Err(err) => {
                let message = err.to_string();
                tracing::error!(dsid = %dsid, error = %message, "feature extraction failed");
                if dir.is_dir() {
                    write_json(
                        &dir.join(STATUS_FILE),
                        &StatusRecord::Failed {
                            message: message.clone(),
                            failed_at: Utc::now(),
                        },
                    )?;
                }
                Err(PipelineError::ProcessingFailure {
                    dsid: dsid.to_string(),
                    message,
                })
            }
        }
    }

    /// Run extraction on a blocking tokio worker.
    pub fn spawn(&self, dsid: DatasetId) -> tokio::task::JoinHandle<PipelineResult<()>> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.run(&dsid))
    }

    fn extract(&self, dsid: &DatasetId, dir: &Path) -> PipelineResult<usize> {
        let params: DatasetParams = read_json(&dir.join(PARS_FILE))?;
        let documents: DocumentSet = read_json(&dir.join(DOCUMENTS_FILE))?;
        let total = documents.len();
        let chunk_size = params.config.chunk_size;

        // leftovers from an interrupted run
        for (_, path) in chunk_files(dir)? {
            std::fs::remove_file(&path).map_err(|e| PipelineError::io(&path, e))?;
        }

        let mut fitter = VectorizerFitter::new(params.config.vectorizer.clone())?;
        for (i, doc) in documents.documents.iter().enumerate() {
            fitter.observe(&doc.read_text()?);
            if (i + 1) % chunk_size == 0 || i + 1 == total {
                self.progress.report(ExtractionEvent::Fitting {
                    dsid: dsid.clone(),
                    n: (i + 1) as u64,
                    total: total as u64,
                });
            }
        }
        let vectorizer = fitter.finish()?;
        if let Some(terms) = vectorizer.feature_names() {
            write_json(&dir.join(VOCABULARY_FILE), &terms)?;
        }
        if let Some(idf) = vectorizer.idf() {
            write_atomic(&dir.join(IDF_FILE), &vec_to_blob(idf))?;
        }
        tracing::debug!(dsid = %dsid, n_features = vectorizer.n_features(), "vectorizer fitted");

        let mut processed = 0usize;
        for (chunk, docs) in documents.documents.chunks(chunk_size).enumerate() {
            let rows = docs
                .iter()
                .map(|doc| -> PipelineResult<SparseVec> {
                    Ok(vectorizer.transform(&doc.read_text()?))
                })
                .collect::<PipelineResult<Vec<SparseVec>>>()?;
            let path = dir.join(chunk_file_name(chunk));
            write_atomic(&path, &encode_sparse_rows(vectorizer.n_features(), &rows))?;
            processed += rows.len();
            tracing::debug!(dsid = %dsid, chunk, processed, total, "chunk written");
            self.progress.report(ExtractionEvent::Chunk {
                dsid: dsid.clone(),
                chunk: chunk as u64,
                processed: processed as u64,
                total: total as u64,
            });
        }
        Ok(total)
    }

    pub fn status(&self, dsid: &DatasetId) -> PipelineResult<ExtractionStatus> {
        let dir = self.registry.ensure_dataset(dsid)?;
        let params = self.read_params(&dir)?;
        let record = self.read_status(&dir)?;
        let n_chunks = chunk_files(&dir)?.len();
        let compacted = dir.join(FEATURES_FILE).is_file();
        compute_status(dsid, record.as_ref(), n_chunks, compacted, &params)
    }

    /// Compact chunk artifacts into one `features.bin`. Idempotent.
    pub fn finalize(&self, dsid: &DatasetId) -> PipelineResult<DatasetId> {
        let status = self.status(dsid)?;
        if status.state != ExtractionState::Finished {
            return Err(PipelineError::ProcessingFailure {
                dsid: dsid.to_string(),
                message: format!(
                    "cannot finalize while processing ({} / {} documents)",
                    status.processed, status.total
                ),
            });
        }
        let dir = self.registry.dataset_dir(dsid);
        let chunks = chunk_files(&dir)?;
        if chunks.is_empty() {
            return Ok(dsid.clone());
        }
        let matrix = self.read_matrix(&dir)?;
        write_atomic(
            &dir.join(FEATURES_FILE),
            &encode_sparse_rows(matrix.n_features, &matrix.rows),
        )?;
        for (_, path) in chunks {
            std::fs::remove_file(&path).map_err(|e| PipelineError::io(&path, e))?;
        }
        tracing::info!(dsid = %dsid, "feature chunks compacted");
        Ok(dsid.clone())
    }

    /// Load a finished feature set.
    pub fn load(&self, dsid: &DatasetId) -> PipelineResult<FeatureSet> {
        let status = self.status(dsid)?;
        if status.state != ExtractionState::Finished {
            return Err(PipelineError::ProcessingFailure {
                dsid: dsid.to_string(),
                message: format!(
                    "feature extraction is still in progress ({} / {} documents)",
                    status.processed, status.total
                ),
            });
        }
        let dir = self.registry.dataset_dir(dsid);
        let params = self.read_params(&dir)?;
        let documents: DocumentSet = read_json(&dir.join(DOCUMENTS_FILE))?;

        let vocabulary_path = dir.join(VOCABULARY_FILE);
        let vocabulary: Option<Vec<String>> = if vocabulary_path.is_file() {
            Some(read_json(&vocabulary_path)?)
        } else {
            None
        };
        let idf_path = dir.join(IDF_FILE);
        let idf = if idf_path.is_file() {
            Some(blob_to_vec(&read_file(&idf_path)?))
        } else {
            None
        };
        let vectorizer = Vectorizer::from_parts(params.config.vectorizer.clone(), vocabulary, idf)
            .map_err(|e| PipelineError::corrupt(&dir, e))?;

        let matrix = self.read_matrix(&dir)?;
        if matrix.n_samples() != params.n_samples || matrix.n_features != vectorizer.n_features()
        {
            return Err(PipelineError::Corrupt {
                path: dir,
                message: format!(
                    "feature matrix is {}x{}, expected {}x{}",
                    matrix.n_samples(),
                    matrix.n_features,
                    params.n_samples,
                    vectorizer.n_features()
                ),
            });
        }

        Ok(FeatureSet {
            dsid: dsid.clone(),
            filenames: params.filenames,
            matrix,
            vectorizer,
            ground_truth: documents.ground_truth,
        })
    }

    pub fn get_params(&self, dsid: &DatasetId) -> PipelineResult<DatasetParams> {
        let dir = self.registry.ensure_dataset(dsid)?;
        self.read_params(&dir)
    }

    /// Parameters of every dataset in the cache. Unreadable entries are
    /// skipped.
    pub fn list(&self) -> PipelineResult<Vec<DatasetParams>> {
        let mut out = Vec::new();
        for dsid in self.registry.list_datasets()? {
            match self.get_params(&dsid) {
                Ok(params) => out.push(params),
                Err(err) => tracing::warn!(dsid = %dsid, error = %err, "skipping dataset"),
            }
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.dsid.cmp(&b.dsid)));
        Ok(out)
    }

    pub fn delete(&self, dsid: &DatasetId) -> PipelineResult<bool> {
        self.registry.delete_dataset(dsid)
    }

    fn read_params(&self, dir: &Path) -> PipelineResult<DatasetParams> {
        read_json(&dir.join(PARS_FILE))
    }

    fn read_status(&self, dir: &Path) -> PipelineResult<Option<StatusRecord>> {
        let path = dir.join(STATUS_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    fn read_matrix(&self, dir: &Path) -> PipelineResult<FeatureMatrix> {
        let compacted = dir.join(FEATURES_FILE);
        if compacted.is_file() {
            let (n_features, rows) = decode_sparse_rows(&read_file(&compacted)?)
                .map_err(|e| PipelineError::corrupt(&compacted, e))?;
            return Ok(FeatureMatrix::new(n_features, rows));
        }
        let mut n_features = 0;
        let mut rows = Vec::new();
        for (i, (chunk, path)) in chunk_files(dir)?.into_iter().enumerate() {
            if chunk != i {
                return Err(PipelineError::Corrupt {
                    path,
                    message: format!("chunk {} is missing", i),
                });
            }
            let (n, block) =
                decode_sparse_rows(&read_file(&path)?).map_err(|e| PipelineError::corrupt(&path, e))?;
            n_features = n;
            rows.extend(block);
        }
        Ok(FeatureMatrix::new(n_features, rows))
    }
}

fn read_file(path: &Path) -> PipelineResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| PipelineError::io(path, e))
}

/// Chunk artifacts in `dir`, ordered by chunk number.
fn chunk_files(dir: &Path) -> PipelineResult<Vec<(usize, PathBuf)>> {
    let entries = std::fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))?;
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::io(dir, e))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(chunk) = parse_chunk_file_name(&name) {
            out.push((chunk, entry.path()));
        }
    }
    out.sort_by_key(|(chunk, _)| *chunk);
    Ok(out)
}
