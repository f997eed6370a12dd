//! # fdx
//!
//! A local-first text-analytics pipeline for document review.
//!
//! fdx turns a set of documents into features and keeps every derived model
//! in an on-disk cache, addressed by opaque ids. Later stages reference
//! earlier ones by id, so a feature set can feed any number of LSI,
//! categorization, clustering and duplicate-detection models.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────┐
//! │ Documents  │──▶│   Features   │──▶│   LSI    │
//! │ dir/inline │   │ chunked, bg  │   │ (opt.)   │
//! └────────────┘   └──────┬───────┘   └────┬─────┘
//!                         │                │
//!        ┌────────────────┼────────────────┤
//!        ▼                ▼                ▼
//!  ┌────────────┐   ┌────────────┐   ┌────────────┐
//!  │ Categorize │   │  Cluster   │   │  Dup. det. │
//!  └────────────┘   └────────────┘   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! fdx features create ./docs          # prints a dataset id
//! fdx features status <dsid>
//! fdx lsi train <dsid> --n-components 100
//! fdx lsi predict <mid> --relevant a.txt --non-relevant b.txt
//! fdx cluster fit <dsid> --method birch --n-clusters 5
//! fdx dupdet fit <dsid> && fdx dupdet query <mid>
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Pipeline error type |
//! | [`registry`] | Dataset and model ids, on-disk layout, atomic commit/delete |
//! | [`documents`] | Document sets from directories, paths or inline text |
//! | [`ground_truth`] | Ground-truth and prediction files |
//! | [`features`] | Chunked feature extraction and its status record |
//! | [`progress`] | Extraction progress reporting |
//! | [`lsi`] | LSI projection and nearest-neighbor relevance scoring |
//! | [`categorization`] | Supervised relevance classifiers |
//! | [`clustering`] | Clustering models, trees and cluster terms |
//! | [`dupdet`] | Near-duplicate detection |
//! | [`pipeline`] | All stages over one cache |

pub mod categorization;
pub mod clustering;
pub mod config;
pub mod documents;
pub mod dupdet;
pub mod error;
pub mod features;
pub mod ground_truth;
pub mod lsi;
pub mod pipeline;
pub mod progress;
pub mod registry;

pub use error::{PipelineError, PipelineResult};
pub use pipeline::Pipeline;
