//! Categorization stage: supervised relevance classifiers.
//!
//! A categorization model is trained on a few labeled exemplars of a
//! finished feature set and predicts a relevance score in `[0, 1]` for every
//! document of that set. The exemplar filenames are frozen in the model, so
//! predictions are a pure function of the model and the feature set.

use fdx_core::classify::{self, CategorizationMethod, TrainedClassifier};
use fdx_core::scoring::{classification_score, ClassificationScores};
use fdx_core::{DatasetId, ModelId, ModelKind};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::features::FeatureExtractor;
use crate::ground_truth::GroundTruth;
use crate::lsi::check_exemplars;
use crate::registry::{Artifact, ModelManifest};

const CLASSIFIER_FILE: &str = "classifier.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizationParams {
    pub method: CategorizationMethod,
    pub cross_validate: bool,
    /// Regularization strength actually used (logistic regression only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c: Option<f64>,
    pub relevant_filenames: Vec<String>,
    pub non_relevant_filenames: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizationTrained {
    pub mid: ModelId,
    pub training_ids: Vec<String>,
    pub training_labels: Vec<bool>,
    /// Exemplars scored by the trained model; all absent unless requested.
    pub scores: ClassificationScores,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizationPrediction {
    pub filenames: Vec<String>,
    pub scores: Vec<f64>,
}

#[derive(Clone)]
pub struct Categorizer {
    features: FeatureExtractor,
}

impl Categorizer {
    pub fn new(features: FeatureExtractor) -> Self {
        Self { features }
    }

    pub fn train(
        &self,
        dsid: &DatasetId,
        relevant: &[String],
        non_relevant: &[String],
        method: CategorizationMethod,
        cross_validate: bool,
        training_scores: bool,
    ) -> PipelineResult<CategorizationTrained> {
        check_exemplars(relevant, non_relevant)?;
        let fs = self.features.load(dsid)?;
        let rel_idx = fs.positions(relevant)?;
        let nrel_idx = fs.positions(non_relevant)?;

        let training_ids: Vec<String> = relevant.iter().chain(non_relevant).cloned().collect();
        let training_labels: Vec<bool> = std::iter::repeat(true)
            .take(relevant.len())
            .chain(std::iter::repeat(false).take(non_relevant.len()))
            .collect();
        let rows: Vec<_> = rel_idx
            .iter()
            .chain(nrel_idx.iter())
            .map(|&i| &fs.matrix.rows[i])
            .collect();

        let classifier = classify::train(&rows, &training_labels, method, cross_validate)?;
        let c = match &classifier {
            TrainedClassifier::LogisticRegression { c, .. } => Some(*c),
            _ => None,
        };

        let scores = if training_scores {
            let predicted: Vec<f64> = rows.iter().map(|r| classifier.decision(r)).collect();
            classification_score(&training_ids, &training_labels, &training_ids, &predicted)?
        } else {
            ClassificationScores::not_computed()
        };

        let params = CategorizationParams {
            method,
            cross_validate,
            c,
            relevant_filenames: relevant.to_vec(),
            non_relevant_filenames: non_relevant.to_vec(),
        };
        let mid = self.features.registry().commit_model(
            ModelKind::Categorizer,
            dsid,
            &params,
            &[Artifact::json(CLASSIFIER_FILE, &classifier)?],
        )?;
        tracing::info!(
            mid = %mid,
            dsid = %dsid,
            method = %method,
            cross_validate,
            n_exemplars = training_ids.len(),
            "categorization model trained"
        );
        Ok(CategorizationTrained {
            mid,
            training_ids,
            training_labels,
            scores,
        })
    }

    fn load(&self, mid: &ModelId) -> PipelineResult<(ModelManifest<CategorizationParams>, TrainedClassifier)> {
        let handle = self
            .features
            .registry()
            .open_model::<CategorizationParams>(mid, ModelKind::Categorizer)?;
        let classifier: TrainedClassifier = handle.read_json(CLASSIFIER_FILE)?;
        Ok((handle.manifest, classifier))
    }

    /// Relevance score for every document of the model's dataset.
    pub fn predict(&self, mid: &ModelId) -> PipelineResult<CategorizationPrediction> {
        let (manifest, classifier) = self.load(mid)?;
        let fs = self.features.load(&manifest.dataset_id)?;
        let scores = classifier.decision_all(&fs.matrix.rows);
        Ok(CategorizationPrediction {
            filenames: fs.filenames,
            scores,
        })
    }

    /// Evaluate predictions against `ground_truth`, or against the labels
    /// stored with the document set when none is given.
    pub fn test(
        &self,
        mid: &ModelId,
        ground_truth: Option<&GroundTruth>,
    ) -> PipelineResult<ClassificationScores> {
        let (manifest, classifier) = self.load(mid)?;
        let fs = self.features.load(&manifest.dataset_id)?;
        let gt = match ground_truth.or(fs.ground_truth.as_ref()) {
            Some(gt) => gt,
            None => {
                return Err(PipelineError::invalid(format!(
                    "dataset {} has no ground truth; pass one explicitly",
                    fs.dsid
                )))
            }
        };
        let scores = classifier.decision_all(&fs.matrix.rows);
        Ok(classification_score(
            &gt.ids,
            &gt.labels,
            &fs.filenames,
            &scores,
        )?)
    }

    pub fn get_params(&self, mid: &ModelId) -> PipelineResult<ModelManifest<CategorizationParams>> {
        Ok(self.load(mid)?.0)
    }

    pub fn list(
        &self,
        dsid: &DatasetId,
    ) -> PipelineResult<Vec<ModelManifest<CategorizationParams>>> {
        self.features
            .registry()
            .list_models_of(dsid, ModelKind::Categorizer)
    }

    pub fn delete(&self, mid: &ModelId) -> PipelineResult<bool> {
        self.features.registry().delete_model(mid)
    }
}
