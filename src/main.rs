//! # fdx CLI
//!
//! The `fdx` binary drives every pipeline stage against a local cache
//! directory. Results are printed to stdout as JSON; logs and progress go to
//! stderr.
//!
//! ## Usage
//!
//! ```bash
//! fdx --config ./config/fdx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fdx features create <dir>` | Vectorize a document set, print its dataset id |
//! | `fdx features status <dsid>` | Extraction progress |
//! | `fdx features finalize <dsid>` | Compact chunk artifacts |
//! | `fdx features list` / `show` / `delete` | Inspect or remove datasets |
//! | `fdx lsi train <dsid>` | Fit an LSI projection |
//! | `fdx lsi predict <mid>` | Nearest-neighbor relevance scoring |
//! | `fdx categorize train <dsid>` | Train a relevance classifier |
//! | `fdx cluster fit <dsid>` | Cluster documents |
//! | `fdx dupdet fit <dsid>` / `query <mid>` | Near-duplicate detection |
//! | `fdx models list` | Every model in the cache |
//! | `fdx score` | Score saved predictions against ground truth |
//!
//! ## Examples
//!
//! ```bash
//! # Vectorize ./docs with a vocabulary instead of hashing
//! fdx features create ./docs --use-hashing false --max-df 0.9
//!
//! # Relevance feedback with two exemplars each
//! fdx lsi predict <mid> --relevant a.txt,b.txt --non-relevant c.txt,d.txt
//!
//! # Hierarchical clustering on an LSI projection
//! fdx cluster fit <dsid> --method ward --n-clusters 8 --lsi <mid>
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};

use fdx::config::{self, Config};
use fdx::documents::DocumentSet;
use fdx::features::ExtractionRequest;
use fdx::ground_truth::{GroundTruth, Predictions};
use fdx::progress::ProgressMode;
use fdx::Pipeline;
use fdx_core::classify::CategorizationMethod;
use fdx_core::cluster::ClusteringMethod;
use fdx_core::dupdet::{DupMethod, DupQuery};
use fdx_core::scoring::classification_score;
use fdx_core::{DatasetId, ModelId, ModelKind};

const DEFAULT_CONFIG: &str = "./config/fdx.toml";
const DEFAULT_CACHE_DIR: &str = "./fdx-cache";

/// fdx: a local-first text-analytics pipeline.
///
/// Every command reads `--config` when the file exists and falls back to
/// built-in defaults otherwise. See `config/fdx.example.toml`.
#[derive(Parser)]
#[command(
    name = "fdx",
    about = "fdx: feature extraction, LSI, categorization, clustering and duplicate detection",
    version,
    long_about = "fdx vectorizes document sets into a local cache and trains models on them. \
    Every stage produces an id that later stages reference: datasets feed LSI, categorization, \
    clustering and near-duplicate detection models."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Override `[cache].dir` from the config file.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Progress output during extraction: `human`, `json` or `off`.
    /// Defaults to `human` when stderr is a terminal.
    #[arg(long, global = true)]
    progress: Option<ProgressMode>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feature extraction and dataset management.
    Features {
        #[command(subcommand)]
        action: FeaturesAction,
    },

    /// LSI projections and nearest-neighbor relevance scoring.
    Lsi {
        #[command(subcommand)]
        action: LsiAction,
    },

    /// Supervised relevance classifiers.
    Categorize {
        #[command(subcommand)]
        action: CategorizeAction,
    },

    /// Document clustering.
    Cluster {
        #[command(subcommand)]
        action: ClusterAction,
    },

    /// Near-duplicate detection.
    Dupdet {
        #[command(subcommand)]
        action: DupdetAction,
    },

    /// Models of every kind.
    Models {
        #[command(subcommand)]
        action: ModelsAction,
    },

    /// Score a predictions file against a ground-truth file.
    ///
    /// Both files hold `filename value` lines. Documents are aligned by
    /// filename; only documents present in both files count.
    Score {
        #[arg(long)]
        ground_truth: PathBuf,
        #[arg(long)]
        predictions: PathBuf,
    },
}

#[derive(Subcommand)]
enum FeaturesAction {
    /// Create a dataset and vectorize it.
    ///
    /// A single directory argument is scanned with the configured include
    /// and exclude globs; otherwise every argument is a file.
    Create {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Ground-truth file (`filename 0|1` lines) stored with the dataset.
        #[arg(long)]
        ground_truth: Option<PathBuf>,

        #[command(flatten)]
        overrides: FeatureOverrides,
    },
    /// Extraction progress of a dataset.
    Status { dsid: DatasetId },
    /// Compact per-chunk artifacts into one file.
    Finalize { dsid: DatasetId },
    /// Parameters of every dataset.
    List,
    /// Parameters of one dataset.
    Show { dsid: DatasetId },
    /// Delete a dataset. Models trained on it become unusable.
    Delete { dsid: DatasetId },
}

/// Per-run overrides of `[features]`.
#[derive(Args)]
struct FeatureOverrides {
    #[arg(long)]
    use_hashing: Option<bool>,
    #[arg(long)]
    n_features: Option<usize>,
    /// Fraction of documents (<= 1) or absolute count (> 1).
    #[arg(long)]
    min_df: Option<f64>,
    /// Fraction of documents (<= 1) or absolute count (> 1).
    #[arg(long)]
    max_df: Option<f64>,
    #[arg(long)]
    max_features: Option<usize>,
    #[arg(long)]
    use_idf: Option<bool>,
    #[arg(long)]
    sublinear_tf: Option<bool>,
    #[arg(long)]
    binary: Option<bool>,
    /// `l1`, `l2` or `none`.
    #[arg(long)]
    norm: Option<String>,
    /// `word` or `char`.
    #[arg(long)]
    analyzer: Option<String>,
    /// `MIN,MAX`, e.g. `1,2`.
    #[arg(long, value_parser = parse_range)]
    ngram_range: Option<(usize, usize)>,
    /// `english` or `none`.
    #[arg(long)]
    stop_words: Option<String>,
    #[arg(long)]
    chunk_size: Option<usize>,
}

impl FeatureOverrides {
    fn apply(self, mut request: ExtractionRequest) -> ExtractionRequest {
        if let Some(v) = self.use_hashing {
            request.use_hashing = v;
        }
        if self.n_features.is_some() {
            request.n_features = self.n_features;
        }
        if self.min_df.is_some() {
            request.min_df = self.min_df;
        }
        if self.max_df.is_some() {
            request.max_df = self.max_df;
        }
        if self.max_features.is_some() {
            request.max_features = self.max_features;
        }
        if let Some(v) = self.use_idf {
            request.use_idf = v;
        }
        if let Some(v) = self.sublinear_tf {
            request.sublinear_tf = v;
        }
        if let Some(v) = self.binary {
            request.binary = v;
        }
        if let Some(v) = self.norm {
            request.norm = v;
        }
        if let Some(v) = self.analyzer {
            request.analyzer = v;
        }
        if let Some(v) = self.ngram_range {
            request.ngram_range = v;
        }
        if let Some(v) = self.stop_words {
            request.stop_words = v;
        }
        if let Some(v) = self.chunk_size {
            request.chunk_size = v;
        }
        request
    }
}

fn parse_range(s: &str) -> Result<(usize, usize), String> {
    let (lo, hi) = s
        .split_once(',')
        .ok_or_else(|| format!("expected MIN,MAX, got '{}'", s))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<usize>()
            .map_err(|e| format!("invalid bound '{}': {}", v, e))
    };
    Ok((parse(lo)?, parse(hi)?))
}

/// Relevant and non-relevant exemplar filenames.
#[derive(Args)]
struct Exemplars {
    /// Comma-separated filenames of relevant documents.
    #[arg(long, value_delimiter = ',', required = true)]
    relevant: Vec<String>,
    /// Comma-separated filenames of non-relevant documents.
    #[arg(long, value_delimiter = ',', required = true)]
    non_relevant: Vec<String>,
}

#[derive(Subcommand)]
enum LsiAction {
    /// Fit a projection on a finished dataset.
    Train {
        dsid: DatasetId,
        /// Defaults to `[lsi].n_components`.
        #[arg(long)]
        n_components: Option<usize>,
    },
    /// Score every document against exemplars (nearest-max rule).
    Predict {
        mid: ModelId,
        #[command(flatten)]
        exemplars: Exemplars,
    },
    /// Relevance scoring evaluated against ground truth.
    Test {
        mid: ModelId,
        #[command(flatten)]
        exemplars: Exemplars,
        #[arg(long)]
        ground_truth: PathBuf,
    },
    List { dsid: DatasetId },
    Show { mid: ModelId },
    Delete { mid: ModelId },
}

#[derive(Subcommand)]
enum CategorizeAction {
    Train {
        dsid: DatasetId,
        #[command(flatten)]
        exemplars: Exemplars,
        /// `logistic_regression`, `nearest_centroid` or `nearest_neighbor`.
        #[arg(long, default_value = "logistic_regression")]
        method: CategorizationMethod,
        /// Select the regularization strength by k-fold search over the
        /// exemplars. Only logistic regression has one; the other methods
        /// ignore this flag.
        #[arg(long)]
        cv: bool,
        /// Score the exemplars with the trained model.
        #[arg(long)]
        training_scores: bool,
    },
    /// Relevance score for every document.
    Predict { mid: ModelId },
    /// Evaluate against a ground-truth file, or the dataset's own labels.
    Test {
        mid: ModelId,
        #[arg(long)]
        ground_truth: Option<PathBuf>,
    },
    List { dsid: DatasetId },
    Show { mid: ModelId },
    Delete { mid: ModelId },
}

#[derive(Subcommand)]
enum ClusterAction {
    Fit {
        dsid: DatasetId,
        /// `k-means`, `birch`, `ward` or `dbscan`.
        #[arg(long)]
        method: String,
        #[arg(long)]
        n_clusters: Option<usize>,
        /// Birch subcluster radius.
        #[arg(long)]
        threshold: Option<f64>,
        /// Ward connectivity neighbors.
        #[arg(long)]
        n_neighbors: Option<usize>,
        /// DBSCAN neighborhood radius.
        #[arg(long)]
        eps: Option<f64>,
        /// DBSCAN core-point density.
        #[arg(long)]
        min_samples: Option<usize>,
        /// Cluster the projection of this LSI model.
        #[arg(long)]
        lsi: Option<ModelId>,
    },
    /// Labels, cluster terms and tree.
    Report {
        mid: ModelId,
        /// Defaults to `[clustering].n_top_words`.
        #[arg(long)]
        n_top_words: Option<usize>,
    },
    List { dsid: DatasetId },
    Show { mid: ModelId },
    Delete { mid: ModelId },
}

#[derive(Subcommand)]
enum DupdetAction {
    Fit {
        dsid: DatasetId,
        /// `simhash` or `imatch`.
        #[arg(long, default_value = "simhash")]
        method: DupMethod,
    },
    /// Duplicate cluster per document. Unset options use `[dupdet]`.
    Query {
        mid: ModelId,
        #[arg(long)]
        distance: Option<u32>,
        #[arg(long)]
        n_rand_lexicons: Option<usize>,
        #[arg(long)]
        rand_lexicon_ratio: Option<f64>,
    },
    List { dsid: DatasetId },
    Show { mid: ModelId },
    Delete { mid: ModelId },
}

#[derive(Subcommand)]
enum ModelsAction {
    List {
        #[arg(long)]
        dataset: Option<DatasetId>,
        /// `lsi`, `categorizer`, `clustering` or `duplicate_detection`.
        #[arg(long)]
        kind: Option<ModelKind>,
    },
    Delete { mid: ModelId },
}

fn init_logging(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();
}

fn load_or_default(path: &Path, cache_dir: Option<PathBuf>) -> Result<Config> {
    let mut cfg = if path.exists() {
        config::load_config(path)?
    } else {
        tracing::debug!(path = %path.display(), "no config file; using defaults");
        Config::minimal(PathBuf::from(DEFAULT_CACHE_DIR))
    };
    if let Some(dir) = cache_dir {
        cfg.cache.dir = dir;
    }
    Ok(cfg)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_deleted(deleted: bool) -> Result<()> {
    print_json(&serde_json::json!({ "deleted": deleted }))
}

fn clustering_method(
    name: &str,
    n_clusters: Option<usize>,
    threshold: Option<f64>,
    n_neighbors: Option<usize>,
    eps: Option<f64>,
    min_samples: Option<usize>,
) -> Result<ClusteringMethod> {
    let need_k = || n_clusters.context("--n-clusters is required for this method");
    let method = match name.to_ascii_lowercase().replace('-', "_").as_str() {
        "k_means" | "kmeans" => ClusteringMethod::KMeans {
            n_clusters: need_k()?,
        },
        "birch" => ClusteringMethod::Birch {
            n_clusters: need_k()?,
            threshold: threshold.unwrap_or(0.5),
        },
        "ward" | "ward_hierarchical" => ClusteringMethod::WardHierarchical {
            n_clusters: need_k()?,
            n_neighbors: n_neighbors.unwrap_or(5),
        },
        "dbscan" => ClusteringMethod::Dbscan {
            eps: eps.unwrap_or(0.5),
            min_samples: min_samples.unwrap_or(5),
        },
        other => anyhow::bail!(
            "Unknown clustering method: '{}'. Must be k-means, birch, ward, or dbscan.",
            other
        ),
    };
    Ok(method)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cfg = load_or_default(&cli.config, cli.cache_dir.clone())?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);
    let pipeline = Pipeline::from_config(&cfg)?.with_progress(progress.reporter());

    match cli.command {
        Commands::Features { action } => match action {
            FeaturesAction::Create {
                paths,
                ground_truth,
                overrides,
            } => {
                let mut docs = match paths.as_slice() {
                    [dir] if dir.is_dir() => DocumentSet::from_directory(
                        dir,
                        &cfg.documents.include_globs,
                        &cfg.documents.exclude_globs,
                        cfg.documents.follow_symlinks,
                    )?,
                    _ => DocumentSet::from_paths(&paths),
                };
                if let Some(path) = ground_truth {
                    docs = docs.with_ground_truth(GroundTruth::load(&path)?);
                }
                let request = overrides.apply(cfg.features.clone());
                let dsid = pipeline.features.preprocess(&docs, &request)?;
                pipeline.features.spawn(dsid.clone()).await??;
                print_json(&serde_json::json!({
                    "id": dsid,
                    "filenames": docs.filenames(),
                }))?;
            }
            FeaturesAction::Status { dsid } => print_json(&pipeline.features.status(&dsid)?)?,
            FeaturesAction::Finalize { dsid } => {
                let dsid = pipeline.features.finalize(&dsid)?;
                print_json(&serde_json::json!({ "id": dsid }))?;
            }
            FeaturesAction::List => print_json(&pipeline.features.list()?)?,
            FeaturesAction::Show { dsid } => print_json(&pipeline.features.get_params(&dsid)?)?,
            FeaturesAction::Delete { dsid } => print_deleted(pipeline.features.delete(&dsid)?)?,
        },

        Commands::Lsi { action } => match action {
            LsiAction::Train { dsid, n_components } => {
                let n = n_components.unwrap_or(cfg.lsi.n_components);
                print_json(&pipeline.lsi.train(&dsid, n)?)?;
            }
            LsiAction::Predict { mid, exemplars } => print_json(
                &pipeline
                    .lsi
                    .classify_by_relevance(&mid, &exemplars.relevant, &exemplars.non_relevant)?,
            )?,
            LsiAction::Test {
                mid,
                exemplars,
                ground_truth,
            } => {
                let gt = GroundTruth::load(&ground_truth)?;
                print_json(&pipeline.lsi.test(
                    &mid,
                    &exemplars.relevant,
                    &exemplars.non_relevant,
                    &gt,
                )?)?;
            }
            LsiAction::List { dsid } => print_json(&pipeline.lsi.list(&dsid)?)?,
            LsiAction::Show { mid } => print_json(&pipeline.lsi.get_params(&mid)?)?,
            LsiAction::Delete { mid } => print_deleted(pipeline.lsi.delete(&mid)?)?,
        },

        Commands::Categorize { action } => match action {
            CategorizeAction::Train {
                dsid,
                exemplars,
                method,
                cv,
                training_scores,
            } => print_json(&pipeline.categorizer.train(
                &dsid,
                &exemplars.relevant,
                &exemplars.non_relevant,
                method,
                cv,
                training_scores,
            )?)?,
            CategorizeAction::Predict { mid } => {
                print_json(&pipeline.categorizer.predict(&mid)?)?
            }
            CategorizeAction::Test { mid, ground_truth } => {
                let gt = ground_truth.as_deref().map(GroundTruth::load).transpose()?;
                print_json(&pipeline.categorizer.test(&mid, gt.as_ref())?)?;
            }
            CategorizeAction::List { dsid } => print_json(&pipeline.categorizer.list(&dsid)?)?,
            CategorizeAction::Show { mid } => {
                print_json(&pipeline.categorizer.get_params(&mid)?)?
            }
            CategorizeAction::Delete { mid } => {
                print_deleted(pipeline.categorizer.delete(&mid)?)?
            }
        },

        Commands::Cluster { action } => match action {
            ClusterAction::Fit {
                dsid,
                method,
                n_clusters,
                threshold,
                n_neighbors,
                eps,
                min_samples,
                lsi,
            } => {
                let method =
                    clustering_method(&method, n_clusters, threshold, n_neighbors, eps, min_samples)?;
                let mid = pipeline.clusterer.fit(&dsid, &method, lsi.as_ref())?;
                print_json(&serde_json::json!({ "id": mid }))?;
            }
            ClusterAction::Report { mid, n_top_words } => {
                let n = n_top_words.unwrap_or(cfg.clustering.n_top_words);
                print_json(&pipeline.clusterer.report(&mid, n)?)?;
            }
            ClusterAction::List { dsid } => print_json(&pipeline.clusterer.list(&dsid)?)?,
            ClusterAction::Show { mid } => print_json(&pipeline.clusterer.get_params(&mid)?)?,
            ClusterAction::Delete { mid } => print_deleted(pipeline.clusterer.delete(&mid)?)?,
        },

        Commands::Dupdet { action } => match action {
            DupdetAction::Fit { dsid, method } => {
                let mid = pipeline.dupdet.fit(&dsid, method)?;
                print_json(&serde_json::json!({ "id": mid }))?;
            }
            DupdetAction::Query {
                mid,
                distance,
                n_rand_lexicons,
                rand_lexicon_ratio,
            } => {
                let defaults = cfg.dupdet.query();
                let query = DupQuery {
                    distance: distance.unwrap_or(defaults.distance),
                    n_rand_lexicons: n_rand_lexicons.unwrap_or(defaults.n_rand_lexicons),
                    rand_lexicon_ratio: rand_lexicon_ratio.unwrap_or(defaults.rand_lexicon_ratio),
                };
                print_json(&pipeline.dupdet.query(&mid, &query)?)?;
            }
            DupdetAction::List { dsid } => print_json(&pipeline.dupdet.list(&dsid)?)?,
            DupdetAction::Show { mid } => print_json(&pipeline.dupdet.get_params(&mid)?)?,
            DupdetAction::Delete { mid } => print_deleted(pipeline.dupdet.delete(&mid)?)?,
        },

        Commands::Models { action } => match action {
            ModelsAction::List { dataset, kind } => {
                print_json(&pipeline.list_models(dataset.as_ref(), kind)?)?
            }
            ModelsAction::Delete { mid } => print_deleted(pipeline.registry.delete_model(&mid)?)?,
        },

        Commands::Score {
            ground_truth,
            predictions,
        } => {
            let gt = GroundTruth::load(&ground_truth)?;
            let pred = Predictions::load(&predictions)?;
            let scores = classification_score(&gt.ids, &gt.labels, &pred.ids, &pred.scores)?;
            print_json(&scores)?;
        }
    }

    Ok(())
}
