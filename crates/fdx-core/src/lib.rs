//! # fdx Core
//!
//! Shared, I/O-free logic for fdx: typed identifiers, the text vectorizer,
//! the LSI projection, nearest-neighbor relevance scoring, categorization,
//! clustering and duplicate-detection kernels, and classification metrics.
//!
//! This crate contains no filesystem access, logging, or async runtime.
//! The `fdx` application crate owns persistence and orchestration and calls
//! into these kernels with in-memory matrices.

pub mod classify;
pub mod cluster;
pub mod codec;
pub mod dupdet;
pub mod error;
pub mod linalg;
pub mod lsi;
pub mod models;
pub mod neighbors;
pub mod scoring;
pub mod text;

pub use error::{CoreError, CoreResult};
pub use models::{DatasetId, FeatureMatrix, ModelId, ModelKind, SparseVec};
