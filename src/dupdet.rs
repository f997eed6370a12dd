//! Near-duplicate detection stage.
//!
//! `fit` fingerprints every document of a finished feature set once;
//! `query` groups documents into duplicate clusters for a given tolerance
//! without refitting.
//!
//! Artifacts: `fingerprints.bin` (SimHash, one `u64` per document) or
//! `documents.bin` (I-Match, sparse term sets).

use fdx_core::codec::{decode_sparse_rows, decode_u64s, encode_sparse_rows, encode_u64s};
use fdx_core::dupdet::{DupIndex, DupMethod, DupQuery};
use fdx_core::{DatasetId, ModelId, ModelKind, SparseVec};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::features::FeatureExtractor;
use crate::registry::{Artifact, ModelHandle, ModelManifest};

const FINGERPRINTS_FILE: &str = "fingerprints.bin";
const DOCUMENTS_FILE: &str = "documents.bin";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DupDetParams {
    pub method: DupMethod,
    pub n_documents: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DupQueryResult {
    pub filenames: Vec<String>,
    /// Dense cluster id per document, numbered by first appearance.
    pub cluster_id: Vec<usize>,
    /// Hex SimHash per document (SimHash models only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simhash: Option<Vec<String>>,
}

#[derive(Clone)]
pub struct DuplicateDetector {
    features: FeatureExtractor,
}

impl DuplicateDetector {
    pub fn new(features: FeatureExtractor) -> Self {
        Self { features }
    }

    pub fn fit(&self, dsid: &DatasetId, method: DupMethod) -> PipelineResult<ModelId> {
        let fs = self.features.load(dsid)?;
        let index = DupIndex::fit(method, &fs.matrix.rows);
        let artifact = match &index {
            DupIndex::SimHash { fingerprints } => {
                Artifact::bytes(FINGERPRINTS_FILE, encode_u64s(fingerprints))
            }
            DupIndex::IMatch { documents } => {
                let rows: Vec<SparseVec> = documents
                    .iter()
                    .map(|terms| SparseVec {
                        indices: terms.clone(),
                        values: vec![1.0; terms.len()],
                    })
                    .collect();
                Artifact::bytes(
                    DOCUMENTS_FILE,
                    encode_sparse_rows(fs.matrix.n_features, &rows),
                )
            }
        };
        let params = DupDetParams {
            method,
            n_documents: index.n_documents(),
        };
        let mid = self.features.registry().commit_model(
            ModelKind::DuplicateDetection,
            dsid,
            &params,
            &[artifact],
        )?;
        tracing::info!(mid = %mid, dsid = %dsid, method = %method, "duplicate detection model fitted");
        Ok(mid)
    }

    fn load(&self, mid: &ModelId) -> PipelineResult<(ModelHandle<DupDetParams>, DupIndex)> {
        let handle = self
            .features
            .registry()
            .open_model::<DupDetParams>(mid, ModelKind::DuplicateDetection)?;
        let index = match handle.manifest.params.method {
            DupMethod::SimHash => {
                let path = handle.dir.join(FINGERPRINTS_FILE);
                let fingerprints = decode_u64s(&handle.read_artifact(FINGERPRINTS_FILE)?)
                    .map_err(|e| PipelineError::corrupt(&path, e))?;
                DupIndex::SimHash { fingerprints }
            }
            DupMethod::IMatch => {
                let path = handle.dir.join(DOCUMENTS_FILE);
                let (_, rows) = decode_sparse_rows(&handle.read_artifact(DOCUMENTS_FILE)?)
                    .map_err(|e| PipelineError::corrupt(&path, e))?;
                DupIndex::IMatch {
                    documents: rows.into_iter().map(|r| r.indices).collect(),
                }
            }
        };
        if index.n_documents() != handle.manifest.params.n_documents {
            return Err(PipelineError::Corrupt {
                path: handle.dir.clone(),
                message: format!(
                    "{} fingerprints, manifest says {}",
                    index.n_documents(),
                    handle.manifest.params.n_documents
                ),
            });
        }
        Ok((handle, index))
    }

    pub fn query(&self, mid: &ModelId, query: &DupQuery) -> PipelineResult<DupQueryResult> {
        query.validate()?;
        let (handle, index) = self.load(mid)?;
        let params = self.features.get_params(&handle.manifest.dataset_id)?;
        let cluster_id = index.query(query)?;
        let simhash = match &index {
            DupIndex::SimHash { fingerprints } => Some(
                fingerprints
                    .iter()
                    .map(|f| hex::encode(f.to_be_bytes()))
                    .collect(),
            ),
            DupIndex::IMatch { .. } => None,
        };
        Ok(DupQueryResult {
            filenames: params.filenames,
            cluster_id,
            simhash,
        })
    }

    pub fn get_params(&self, mid: &ModelId) -> PipelineResult<ModelManifest<DupDetParams>> {
        Ok(self.load(mid)?.0.manifest)
    }

    pub fn list(&self, dsid: &DatasetId) -> PipelineResult<Vec<ModelManifest<DupDetParams>>> {
        self.features
            .registry()
            .list_models_of(dsid, ModelKind::DuplicateDetection)
    }

    pub fn delete(&self, mid: &ModelId) -> PipelineResult<bool> {
        self.features.registry().delete_model(mid)
    }
}
