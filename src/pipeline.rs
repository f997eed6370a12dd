//! One handle over every stage, sharing a single registry.

use std::path::PathBuf;
use std::sync::Arc;

use fdx_core::{DatasetId, ModelKind};

use crate::categorization::Categorizer;
use crate::clustering::Clusterer;
use crate::config::Config;
use crate::dupdet::DuplicateDetector;
use crate::error::PipelineResult;
use crate::features::FeatureExtractor;
use crate::lsi::Lsi;
use crate::progress::ExtractionProgressReporter;
use crate::registry::{ModelRegistry, ModelSummary};

#[derive(Clone)]
pub struct Pipeline {
    pub registry: ModelRegistry,
    pub features: FeatureExtractor,
    pub lsi: Lsi,
    pub categorizer: Categorizer,
    pub clusterer: Clusterer,
    pub dupdet: DuplicateDetector,
}

impl Pipeline {
    /// Open the cache at `cache_dir` with default stage settings.
    pub fn open(cache_dir: impl Into<PathBuf>) -> PipelineResult<Self> {
        Self::from_config(&Config::minimal(cache_dir.into()))
    }

    pub fn from_config(config: &Config) -> PipelineResult<Self> {
        let registry = ModelRegistry::open(config.cache.dir.clone())?;
        Ok(Self::assemble(
            registry,
            FeatureExtractor::new,
            config.clustering.seed,
        ))
    }

    /// Same stages, with extraction progress sent to `progress`.
    pub fn with_progress(self, progress: Arc<dyn ExtractionProgressReporter>) -> Self {
        let seed = self.clusterer.seed();
        Self::assemble(
            self.registry,
            move |registry| FeatureExtractor::new(registry).with_progress(progress),
            seed,
        )
    }

    fn assemble(
        registry: ModelRegistry,
        extractor: impl FnOnce(ModelRegistry) -> FeatureExtractor,
        seed: u64,
    ) -> Self {
        let features = extractor(registry.clone());
        Self {
            lsi: Lsi::new(features.clone()),
            categorizer: Categorizer::new(features.clone()),
            clusterer: Clusterer::new(features.clone(), seed),
            dupdet: DuplicateDetector::new(features.clone()),
            features,
            registry,
        }
    }

    /// Models of every kind, optionally for one dataset.
    pub fn list_models(
        &self,
        dsid: Option<&DatasetId>,
        kind: Option<ModelKind>,
    ) -> PipelineResult<Vec<ModelSummary>> {
        self.registry.list_models(dsid, kind)
    }
}
