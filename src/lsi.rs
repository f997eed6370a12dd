//! LSI stage: semantic-subspace projection and relevance feedback.
//!
//! A trained LSI model is a truncated SVD of a finished feature set. Its
//! main consumer is [`Lsi::classify_by_relevance`], which scores every
//! document of the dataset against a handful of relevant and non-relevant
//! exemplars with the nearest-max rule in projected space. Clustering can
//! also run on an LSI projection instead of raw features.
//!
//! Artifacts: `components.bin` (dense `k × n_features` rows). Parameters in
//! the manifest carry the requested and effective rank, singular values and
//! explained variance.

use fdx_core::codec::{decode_dense_rows, encode_dense_rows};
use fdx_core::lsi::{truncated_svd, LsiDecomposition};
use fdx_core::neighbors::{self, Accumulation};
use fdx_core::scoring::{classification_score, ClassificationScores};
use fdx_core::{DatasetId, ModelId, ModelKind};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::features::{FeatureExtractor, FeatureSet};
use crate::ground_truth::GroundTruth;
use crate::registry::{Artifact, ModelManifest};

pub const DEFAULT_N_COMPONENTS: usize = 100;
pub const LSI_SEED: u64 = 0;

const COMPONENTS_FILE: &str = "components.bin";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LsiParams {
    pub n_components_requested: usize,
    pub n_components: usize,
    pub singular_values: Vec<f32>,
    pub explained_variance: f64,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LsiTrained {
    pub mid: ModelId,
    pub explained_variance: f64,
}

/// A loaded projection.
#[derive(Debug, Clone)]
pub struct LsiModel {
    pub mid: ModelId,
    pub dsid: DatasetId,
    pub decomposition: LsiDecomposition,
}

/// Per-document outcome of a relevance query, in dataset order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevancePrediction {
    pub filenames: Vec<String>,
    pub prediction: Vec<bool>,
    /// Relevance score in `[0, 1]`; `> 0.5` exactly when `prediction`.
    pub scores: Vec<f64>,
    pub distance_rel: Vec<f64>,
    pub distance_nrel: Vec<f64>,
    pub nearest_rel: Vec<usize>,
    pub nearest_nrel: Vec<usize>,
    /// The exemplars scored against their own labels.
    pub training_scores: ClassificationScores,
}

/// Map the two nearest distances to a score above 0.5 iff `d_rel < d_nrel`.
fn relevance_score(d_rel: f64, d_nrel: f64) -> f64 {
    (0.5 + (d_nrel - d_rel) / 4.0).clamp(0.0, 1.0)
}

#[derive(Clone)]
pub struct Lsi {
    features: FeatureExtractor,
}

impl Lsi {
    pub fn new(features: FeatureExtractor) -> Self {
        Self { features }
    }

    pub fn train(&self, dsid: &DatasetId, n_components: usize) -> PipelineResult<LsiTrained> {
        if n_components == 0 {
            return Err(PipelineError::invalid("n_components must be >= 1"));
        }
        let fs = self.features.load(dsid)?;
        let decomposition = truncated_svd(&fs.matrix, n_components, LSI_SEED)?;

        let params = LsiParams {
            n_components_requested: n_components,
            n_components: decomposition.n_components(),
            singular_values: decomposition.singular_values.clone(),
            explained_variance: decomposition.explained_variance,
            seed: LSI_SEED,
        };
        let mid = self.features.registry().commit_model(
            ModelKind::Lsi,
            dsid,
            &params,
            &[Artifact::bytes(
                COMPONENTS_FILE,
                encode_dense_rows(&decomposition.components),
            )],
        )?;
        tracing::info!(
            mid = %mid,
            dsid = %dsid,
            n_components = params.n_components,
            explained_variance = params.explained_variance,
            "lsi model trained"
        );
        Ok(LsiTrained {
            mid,
            explained_variance: decomposition.explained_variance,
        })
    }

    pub fn load(&self, mid: &ModelId) -> PipelineResult<LsiModel> {
        let handle = self
            .features
            .registry()
            .open_model::<LsiParams>(mid, ModelKind::Lsi)?;
        let components = decode_dense_rows(&handle.read_artifact(COMPONENTS_FILE)?)
            .map_err(|e| PipelineError::corrupt(&handle.dir.join(COMPONENTS_FILE), e))?;
        let params = handle.manifest.params;
        if components.len() != params.n_components {
            return Err(PipelineError::Corrupt {
                path: handle.dir.join(COMPONENTS_FILE),
                message: format!(
                    "{} components stored, manifest says {}",
                    components.len(),
                    params.n_components
                ),
            });
        }
        Ok(LsiModel {
            mid: handle.manifest.id,
            dsid: handle.manifest.dataset_id,
            decomposition: LsiDecomposition {
                components,
                singular_values: params.singular_values,
                explained_variance: params.explained_variance,
            },
        })
    }

    /// Project every document of the model's dataset.
    pub fn project(&self, model: &LsiModel, fs: &FeatureSet) -> PipelineResult<Vec<Vec<f32>>> {
        if fs.dsid != model.dsid {
            return Err(PipelineError::invalid(format!(
                "lsi model {} belongs to dataset {}, not {}",
                model.mid, model.dsid, fs.dsid
            )));
        }
        if let Some(first) = model.decomposition.components.first() {
            if first.len() != fs.matrix.n_features {
                return Err(PipelineError::Corrupt {
                    path: self.features.registry().model_dir(&model.mid),
                    message: format!(
                        "components have {} columns, dataset has {} features",
                        first.len(),
                        fs.matrix.n_features
                    ),
                });
            }
        }
        Ok(model.decomposition.project_all(&fs.matrix))
    }

    pub fn get_params(&self, mid: &ModelId) -> PipelineResult<ModelManifest<LsiParams>> {
        Ok(self
            .features
            .registry()
            .open_model::<LsiParams>(mid, ModelKind::Lsi)?
            .manifest)
    }

    pub fn list(&self, dsid: &DatasetId) -> PipelineResult<Vec<ModelManifest<LsiParams>>> {
        self.features
            .registry()
            .list_models_of(dsid, ModelKind::Lsi)
    }

    pub fn delete(&self, mid: &ModelId) -> PipelineResult<bool> {
        self.features.registry().delete_model(mid)
    }

    /// Score every document against relevant / non-relevant exemplars using
    /// the nearest-max rule on cosine distance in LSI space.
    pub fn classify_by_relevance(
        &self,
        mid: &ModelId,
        relevant: &[String],
        non_relevant: &[String],
    ) -> PipelineResult<RelevancePrediction> {
        check_exemplars(relevant, non_relevant)?;
        let model = self.load(mid)?;
        let fs = self.features.load(&model.dsid)?;
        let rel_idx = fs.positions(relevant)?;
        let nrel_idx = fs.positions(non_relevant)?;
        let points = self.project(&model, &fs)?;

        let nn = neighbors::classify(&points, &rel_idx, &nrel_idx, Accumulation::NearestMax)?;
        let scores: Vec<f64> = nn
            .distance_rel
            .iter()
            .zip(nn.distance_nrel.iter())
            .map(|(r, n)| relevance_score(*r, *n))
            .collect();

        let mut train_ids = Vec::with_capacity(rel_idx.len() + nrel_idx.len());
        let mut train_labels = Vec::with_capacity(train_ids.capacity());
        let mut train_scores = Vec::with_capacity(train_ids.capacity());
        for (indices, label) in [(&rel_idx, true), (&nrel_idx, false)] {
            for &i in indices.iter() {
                train_ids.push(fs.filenames[i].clone());
                train_labels.push(label);
                train_scores.push(scores[i]);
            }
        }
        let training_scores =
            classification_score(&train_ids, &train_labels, &train_ids, &train_scores)?;

        tracing::debug!(
            mid = %mid,
            n_relevant = relevant.len(),
            n_non_relevant = non_relevant.len(),
            "relevance classification"
        );
        Ok(RelevancePrediction {
            filenames: fs.filenames,
            prediction: nn.prediction,
            scores,
            distance_rel: nn.distance_rel,
            distance_nrel: nn.distance_nrel,
            nearest_rel: nn.nearest_rel,
            nearest_nrel: nn.nearest_nrel,
            training_scores,
        })
    }

    /// Relevance classification evaluated against ground truth.
    pub fn test(
        &self,
        mid: &ModelId,
        relevant: &[String],
        non_relevant: &[String],
        ground_truth: &GroundTruth,
    ) -> PipelineResult<ClassificationScores> {
        let pred = self.classify_by_relevance(mid, relevant, non_relevant)?;
        Ok(classification_score(
            &ground_truth.ids,
            &ground_truth.labels,
            &pred.filenames,
            &pred.scores,
        )?)
    }
}

/// Both pools non-empty and disjoint.
pub(crate) fn check_exemplars(relevant: &[String], non_relevant: &[String]) -> PipelineResult<()> {
    if relevant.is_empty() || non_relevant.is_empty() {
        return Err(PipelineError::invalid(
            "at least one relevant and one non-relevant document are required",
        ));
    }
    let rel: std::collections::HashSet<&str> = relevant.iter().map(String::as_str).collect();
    if let Some(both) = non_relevant.iter().find(|f| rel.contains(f.as_str())) {
        return Err(PipelineError::invalid(format!(
            "document '{}' is listed as both relevant and non-relevant",
            both
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_is_above_half_only_when_closer_to_relevant() {
        assert!(relevance_score(0.1, 0.5) > 0.5);
        assert_eq!(relevance_score(0.3, 0.3), 0.5);
        assert!(relevance_score(0.5, 0.1) < 0.5);
        assert_eq!(relevance_score(0.0, 2.0), 1.0);
        assert_eq!(relevance_score(2.0, 0.0), 0.0);
    }

    #[test]
    fn exemplar_pools_must_be_disjoint_and_non_empty() {
        let s = |v: &[&str]| v.iter().map(|x| x.to_string()).collect::<Vec<_>>();
        assert!(check_exemplars(&s(&["a"]), &s(&["b"])).is_ok());
        assert!(check_exemplars(&s(&[]), &s(&["b"])).is_err());
        assert!(check_exemplars(&s(&["a", "b"]), &s(&["b"])).is_err());
    }
}
