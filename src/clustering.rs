//! Clustering stage.
//!
//! Four algorithms sit behind [`ClusteringMethod`]; every fit is stored the
//! same way: a flat label per document (`labels.json`) plus, for Birch and
//! Ward, the binary merge tree (`tree.json`). Clustering runs either on the
//! raw feature rows or on the projection of an LSI model trained on the
//! same dataset.

use fdx_core::cluster::{cluster_terms, ClusterTree, ClusteringMethod, TreeNode};
use fdx_core::{DatasetId, ModelId, ModelKind};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::features::FeatureExtractor;
use crate::lsi::Lsi;
use crate::registry::{Artifact, ModelManifest};

pub const DEFAULT_N_TOP_WORDS: usize = 5;

const LABELS_FILE: &str = "labels.json";
const TREE_FILE: &str = "tree.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringParams {
    #[serde(flatten)]
    pub method: ClusteringMethod,
    /// LSI model whose projection was clustered; raw features when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lsi_mid: Option<ModelId>,
    pub seed: u64,
    /// Clusters found, noise excluded.
    pub n_clusters_found: usize,
}

/// A loaded clustering model.
#[derive(Debug, Clone)]
pub struct ClusteringModel {
    pub mid: ModelId,
    pub dsid: DatasetId,
    pub params: ClusteringParams,
    pub labels: Vec<i64>,
    tree: Option<ClusterTree>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringReport {
    pub mid: ModelId,
    pub dsid: DatasetId,
    pub method: String,
    pub lsi: bool,
    pub params: ClusteringParams,
    pub filenames: Vec<String>,
    pub labels: Vec<i64>,
    pub n_clusters: usize,
    /// Top terms per cluster; absent for hashed feature spaces, empty when
    /// no terms were requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_terms: Option<Vec<Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tree: Option<Vec<TreeNode>>,
}

#[derive(Clone)]
pub struct Clusterer {
    features: FeatureExtractor,
    lsi: Lsi,
    seed: u64,
}

impl Clusterer {
    pub fn new(features: FeatureExtractor, seed: u64) -> Self {
        Self {
            lsi: Lsi::new(features.clone()),
            features,
            seed,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn fit(
        &self,
        dsid: &DatasetId,
        method: &ClusteringMethod,
        projection: Option<&ModelId>,
    ) -> PipelineResult<ModelId> {
        let fs = self.features.load(dsid)?;
        method.validate(fs.n_samples())?;

        let points = match projection {
            Some(lsi_mid) => {
                let model = self.lsi.load(lsi_mid)?;
                self.lsi.project(&model, &fs)?
            }
            None => fs.matrix.compact_dense().0,
        };
        let fit = method.fit(&points, self.seed)?;

        let params = ClusteringParams {
            method: method.clone(),
            lsi_mid: projection.cloned(),
            seed: self.seed,
            n_clusters_found: fit.n_clusters(),
        };
        let mut artifacts = vec![Artifact::json(LABELS_FILE, &fit.labels)?];
        if let Some(tree) = &fit.tree {
            artifacts.push(Artifact::json(TREE_FILE, tree)?);
        }
        let mid =
            self.features
                .registry()
                .commit_model(ModelKind::Clustering, dsid, &params, &artifacts)?;
        tracing::info!(
            mid = %mid,
            dsid = %dsid,
            method = method.name(),
            lsi = projection.is_some(),
            n_clusters = params.n_clusters_found,
            "clustering model fitted"
        );
        Ok(mid)
    }

    pub fn load(&self, mid: &ModelId) -> PipelineResult<ClusteringModel> {
        let handle = self
            .features
            .registry()
            .open_model::<ClusteringParams>(mid, ModelKind::Clustering)?;
        let labels: Vec<i64> = handle.read_json(LABELS_FILE)?;
        let tree: Option<ClusterTree> = if handle.manifest.params.method.is_hierarchical() {
            let tree: ClusterTree = handle.read_json(TREE_FILE)?;
            if tree.n_leaves() != labels.len() {
                return Err(PipelineError::Corrupt {
                    path: handle.dir.join(TREE_FILE),
                    message: format!(
                        "tree has {} leaves for {} documents",
                        tree.n_leaves(),
                        labels.len()
                    ),
                });
            }
            Some(tree)
        } else {
            None
        };
        Ok(ClusteringModel {
            mid: handle.manifest.id,
            dsid: handle.manifest.dataset_id,
            params: handle.manifest.params,
            labels,
            tree,
        })
    }

    /// The merge tree; `None` for k-means and DBSCAN.
    pub fn get_tree<'a>(&self, model: &'a ClusteringModel) -> Option<&'a ClusterTree> {
        model.tree.as_ref()
    }

    /// Top `n_top_words` terms per cluster, from the raw feature weights of
    /// each cluster's members. `n_top_words == 0` computes nothing and
    /// returns no terms.
    pub fn compute_labels(
        &self,
        model: &ClusteringModel,
        n_top_words: usize,
    ) -> PipelineResult<Vec<Vec<String>>> {
        if n_top_words == 0 {
            return Ok(Vec::new());
        }
        let fs = self.features.load(&model.dsid)?;
        let Some(names) = fs.vectorizer.feature_names() else {
            return Err(PipelineError::invalid(
                "cluster terms need a vocabulary; this dataset uses feature hashing",
            ));
        };
        if model.labels.len() != fs.n_samples() {
            return Err(PipelineError::Corrupt {
                path: self.features.registry().model_dir(&model.mid),
                message: format!(
                    "{} labels for {} documents",
                    model.labels.len(),
                    fs.n_samples()
                ),
            });
        }
        Ok(cluster_terms(
            &fs.matrix.rows,
            &model.labels,
            names,
            n_top_words,
        ))
    }

    /// Labels, terms, tree and parameters in one view.
    pub fn report(&self, mid: &ModelId, n_top_words: usize) -> PipelineResult<ClusteringReport> {
        let model = self.load(mid)?;
        let params = self.features.get_params(&model.dsid)?;
        let cluster_terms = if n_top_words == 0 {
            Some(Vec::new())
        } else if params.config.vectorizer.space.is_hashing() {
            None
        } else {
            Some(self.compute_labels(&model, n_top_words)?)
        };
        let tree = self.get_tree(&model).map(ClusterTree::nodes);
        Ok(ClusteringReport {
            method: model.params.method.name().to_string(),
            lsi: model.params.lsi_mid.is_some(),
            n_clusters: model.params.n_clusters_found,
            filenames: params.filenames,
            cluster_terms,
            tree,
            mid: model.mid,
            dsid: model.dsid,
            labels: model.labels,
            params: model.params,
        })
    }

    pub fn get_params(&self, mid: &ModelId) -> PipelineResult<ModelManifest<ClusteringParams>> {
        Ok(self
            .features
            .registry()
            .open_model::<ClusteringParams>(mid, ModelKind::Clustering)?
            .manifest)
    }

    pub fn list(&self, dsid: &DatasetId) -> PipelineResult<Vec<ModelManifest<ClusteringParams>>> {
        self.features
            .registry()
            .list_models_of(dsid, ModelKind::Clustering)
    }

    pub fn delete(&self, mid: &ModelId) -> PipelineResult<bool> {
        self.features.registry().delete_model(mid)
    }
}
