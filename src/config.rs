use anyhow::{Context, Result};
use fdx_core::dupdet::DupQuery;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::clustering::DEFAULT_N_TOP_WORDS;
use crate::features::{ExtractionConfig, ExtractionRequest};
use crate::lsi::DEFAULT_N_COMPONENTS;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub cache: CacheConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub features: ExtractionRequest,
    #[serde(default)]
    pub lsi: LsiConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub dupdet: DupDetConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.txt".to_string(), "**/*.md".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct LsiConfig {
    #[serde(default = "default_n_components")]
    pub n_components: usize,
}

impl Default for LsiConfig {
    fn default() -> Self {
        Self {
            n_components: DEFAULT_N_COMPONENTS,
        }
    }
}

fn default_n_components() -> usize {
    DEFAULT_N_COMPONENTS
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusteringConfig {
    #[serde(default = "default_n_top_words")]
    pub n_top_words: usize,
    #[serde(default)]
    pub seed: u64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            n_top_words: DEFAULT_N_TOP_WORDS,
            seed: 0,
        }
    }
}

fn default_n_top_words() -> usize {
    DEFAULT_N_TOP_WORDS
}

#[derive(Debug, Deserialize, Clone)]
pub struct DupDetConfig {
    #[serde(default = "default_distance")]
    pub distance: u32,
    #[serde(default = "default_n_rand_lexicons")]
    pub n_rand_lexicons: usize,
    #[serde(default = "default_rand_lexicon_ratio")]
    pub rand_lexicon_ratio: f64,
}

impl Default for DupDetConfig {
    fn default() -> Self {
        let q = DupQuery::default();
        Self {
            distance: q.distance,
            n_rand_lexicons: q.n_rand_lexicons,
            rand_lexicon_ratio: q.rand_lexicon_ratio,
        }
    }
}

fn default_distance() -> u32 {
    DupQuery::default().distance
}
fn default_n_rand_lexicons() -> usize {
    DupQuery::default().n_rand_lexicons
}
fn default_rand_lexicon_ratio() -> f64 {
    DupQuery::default().rand_lexicon_ratio
}

impl DupDetConfig {
    pub fn query(&self) -> DupQuery {
        DupQuery {
            distance: self.distance,
            n_rand_lexicons: self.n_rand_lexicons,
            rand_lexicon_ratio: self.rand_lexicon_ratio,
        }
    }
}

impl Config {
    /// Defaults with the cache in `cache_dir`, for running without a
    /// config file.
    pub fn minimal(cache_dir: PathBuf) -> Self {
        Self {
            cache: CacheConfig { dir: cache_dir },
            documents: DocumentsConfig::default(),
            features: ExtractionRequest::default(),
            lsi: LsiConfig::default(),
            clustering: ClusteringConfig::default(),
            dupdet: DupDetConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.cache.dir.as_os_str().is_empty() {
        anyhow::bail!("cache.dir must not be empty");
    }

    // Feature defaults must normalize the same way a request would
    ExtractionConfig::from_request(&config.features)
        .map_err(|e| anyhow::anyhow!("features: {}", e))?;

    if config.lsi.n_components == 0 {
        anyhow::bail!("lsi.n_components must be >= 1");
    }

    config
        .dupdet
        .query()
        .validate()
        .map_err(|e| anyhow::anyhow!("dupdet: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("fdx.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn minimal_file_gets_defaults() {
        let tmp = TempDir::new().unwrap();
        let cfg = load_config(&write(&tmp, "[cache]\ndir = \"./cache\"\n")).unwrap();
        assert_eq!(cfg.cache.dir, PathBuf::from("./cache"));
        assert_eq!(cfg.lsi.n_components, 100);
        assert_eq!(cfg.clustering.n_top_words, 5);
        assert_eq!(cfg.dupdet.query(), DupQuery::default());
        assert!(cfg.features.use_hashing);
        assert_eq!(cfg.features.chunk_size, 5000);
    }

    #[test]
    fn feature_section_overrides() {
        let tmp = TempDir::new().unwrap();
        let cfg = load_config(&write(
            &tmp,
            r#"
[cache]
dir = "/tmp/fdx"

[features]
use_hashing = false
max_df = 0.8
ngram_range = [1, 2]
chunk_size = 100
"#,
        ))
        .unwrap();
        assert!(!cfg.features.use_hashing);
        assert_eq!(cfg.features.max_df, Some(0.8));
        assert_eq!(cfg.features.ngram_range, (1, 2));
        assert_eq!(cfg.features.chunk_size, 100);
        // untouched keys keep their defaults
        assert_eq!(cfg.features.norm, "l2");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let tmp = TempDir::new().unwrap();
        for body in [
            "[cache]\ndir = \"c\"\n[lsi]\nn_components = 0\n",
            "[cache]\ndir = \"c\"\n[features]\nnorm = \"l7\"\n",
            "[cache]\ndir = \"c\"\n[dupdet]\nrand_lexicon_ratio = 1.5\n",
        ] {
            assert!(load_config(&write(&tmp, body)).is_err(), "accepted: {body}");
        }
    }

    #[test]
    fn zero_top_words_is_accepted() {
        let tmp = TempDir::new().unwrap();
        let cfg = load_config(&write(
            &tmp,
            "[cache]\ndir = \"c\"\n[clustering]\nn_top_words = 0\n",
        ))
        .unwrap();
        assert_eq!(cfg.clustering.n_top_words, 0);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_config(Path::new("/nonexistent/fdx.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
