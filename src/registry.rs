//! On-disk registry of datasets and trained models.
//!
//! Everything lives under one cache root:
//!
//! ```text
//! <cache>/features/<dsid>/      one directory per feature set
//! <cache>/models/<mid>/         model.json manifest + binary/json artifacts
//! <cache>/.staging/             models being written
//! <cache>/.trash/               directories being deleted
//! ```
//!
//! Identifiers are random, never derived from content, and never reused.
//! Dataset and model ids live in separate directories, and every model kind
//! shares the `models/` namespace so a `mid` is unique across kinds.
//!
//! # Atomicity
//!
//! - A model is written into `.staging/<mid>` and renamed into `models/`
//!   only once every artifact is on disk. A failed training leaves no `mid`.
//! - Deleting renames the directory into `.trash/` first, so a concurrent
//!   reader sees either the whole directory or nothing, then removes it.
//! - Single files (status records, chunk artifacts) are written to a
//!   temporary sibling and renamed over the target.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fdx_core::{DatasetId, ModelId, ModelKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};

pub const MANIFEST_FILE: &str = "model.json";

const FEATURES_DIR: &str = "features";
const MODELS_DIR: &str = "models";
const STAGING_DIR: &str = ".staging";
const TRASH_DIR: &str = ".trash";

/// The `model.json` written next to every model's artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest<P> {
    pub id: ModelId,
    pub kind: ModelKind,
    pub dataset_id: DatasetId,
    pub created_at: DateTime<Utc>,
    pub params: P,
}

/// Manifest with untyped parameters, as returned by listings.
pub type ModelSummary = ModelManifest<serde_json::Value>;

impl ModelSummary {
    /// Decode the untyped parameters into a stage's parameter type.
    pub fn into_typed<P: DeserializeOwned>(self) -> PipelineResult<ModelManifest<P>> {
        Ok(ModelManifest {
            id: self.id,
            kind: self.kind,
            dataset_id: self.dataset_id,
            created_at: self.created_at,
            params: serde_json::from_value(self.params)?,
        })
    }
}

/// A named artifact file to commit with a model.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn bytes(name: &str, bytes: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            bytes,
        }
    }

    pub fn json<T: Serialize>(name: &str, value: &T) -> PipelineResult<Self> {
        Ok(Self::bytes(name, serde_json::to_vec_pretty(value)?))
    }
}

/// A resolved model: its manifest plus the directory holding its artifacts.
#[derive(Debug, Clone)]
pub struct ModelHandle<P> {
    pub manifest: ModelManifest<P>,
    pub dir: PathBuf,
}

impl<P> ModelHandle<P> {
    /// Read an artifact. A model deleted since it was resolved reports
    /// `NotFound` rather than an I/O error.
    pub fn read_artifact(&self, name: &str) -> PipelineResult<Vec<u8>> {
        let path = self.dir.join(name);
        fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound && !self.dir.exists() {
                PipelineError::model_not_found(&self.manifest.id)
            } else {
                PipelineError::io(&path, e)
            }
        })
    }

    pub fn read_json<T: DeserializeOwned>(&self, name: &str) -> PipelineResult<T> {
        let bytes = self.read_artifact(name)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    root: PathBuf,
}

impl ModelRegistry {
    /// Open (and create if needed) a registry rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> PipelineResult<Self> {
        let registry = Self { root: root.into() };
        for dir in [FEATURES_DIR, MODELS_DIR, STAGING_DIR, TRASH_DIR] {
            let path = registry.root.join(dir);
            fs::create_dir_all(&path).map_err(|e| PipelineError::io(&path, e))?;
        }
        Ok(registry)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ---- datasets ----------------------------------------------------------

    pub fn dataset_dir(&self, dsid: &DatasetId) -> PathBuf {
        self.root.join(FEATURES_DIR).join(dsid.as_str())
    }

    /// Reserve a fresh dataset id and create its directory.
    pub fn allocate_dataset(&self) -> PipelineResult<(DatasetId, PathBuf)> {
        loop {
            let dsid = DatasetId::generate();
            let dir = self.dataset_dir(&dsid);
            match fs::create_dir(&dir) {
                Ok(()) => return Ok((dsid, dir)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(PipelineError::io(&dir, e)),
            }
        }
    }

    /// Directory of an existing dataset, or `NotFound`.
    pub fn ensure_dataset(&self, dsid: &DatasetId) -> PipelineResult<PathBuf> {
        let dir = self.dataset_dir(dsid);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(PipelineError::dataset_not_found(dsid))
        }
    }

    pub fn list_datasets(&self) -> PipelineResult<Vec<DatasetId>> {
        let mut ids: Vec<DatasetId> = list_dir_names(&self.root.join(FEATURES_DIR))?
            .into_iter()
            .filter_map(|name| DatasetId::parse(&name).ok())
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Remove a dataset. Derived models are left in place and become
    /// unusable. Returns `false` when there was nothing to delete.
    pub fn delete_dataset(&self, dsid: &DatasetId) -> PipelineResult<bool> {
        let deleted = self.retire(&self.dataset_dir(dsid))?;
        if deleted {
            tracing::info!(dsid = %dsid, "deleted dataset");
        }
        Ok(deleted)
    }

    // ---- models ------------------------------------------------------------

    pub fn model_dir(&self, mid: &ModelId) -> PathBuf {
        self.root.join(MODELS_DIR).join(mid.as_str())
    }

    /// Write a trained model and return its new id.
    ///
    /// The owning dataset must still exist. Nothing becomes visible under
    /// `models/` until every artifact has been written.
    pub fn commit_model<P: Serialize>(
        &self,
        kind: ModelKind,
        dataset_id: &DatasetId,
        params: &P,
        artifacts: &[Artifact],
    ) -> PipelineResult<ModelId> {
        self.ensure_dataset(dataset_id)?;

        let (mid, staging) = loop {
            let mid = ModelId::generate();
            if self.model_dir(&mid).exists() {
                continue;
            }
            let staging = self.root.join(STAGING_DIR).join(mid.as_str());
            match fs::create_dir(&staging) {
                Ok(()) => break (mid, staging),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(PipelineError::io(&staging, e)),
            }
        };

        let written = (|| -> PipelineResult<()> {
            let manifest = ModelManifest {
                id: mid.clone(),
                kind,
                dataset_id: dataset_id.clone(),
                created_at: Utc::now(),
                params,
            };
            write_json(&staging.join(MANIFEST_FILE), &manifest)?;
            for artifact in artifacts {
                let path = staging.join(&artifact.name);
                fs::write(&path, &artifact.bytes).map_err(|e| PipelineError::io(&path, e))?;
            }
            let target = self.model_dir(&mid);
            fs::rename(&staging, &target).map_err(|e| PipelineError::io(&target, e))
        })();

        if let Err(err) = written {
            let _ = fs::remove_dir_all(&staging);
            return Err(err);
        }
        tracing::info!(mid = %mid, kind = %kind, dsid = %dataset_id, "committed model");
        Ok(mid)
    }

    /// Resolve a model of the given kind.
    ///
    /// Fails with `NotFound` when the model does not exist, is of another
    /// kind, or when its dataset has been deleted.
    pub fn open_model<P: DeserializeOwned>(
        &self,
        mid: &ModelId,
        kind: ModelKind,
    ) -> PipelineResult<ModelHandle<P>> {
        let dir = self.model_dir(mid);
        let summary = self.read_manifest(mid)?;
        if summary.kind != kind {
            return Err(PipelineError::NotFound {
                kind: kind.as_str(),
                id: mid.to_string(),
            });
        }
        self.ensure_dataset(&summary.dataset_id)?;
        Ok(ModelHandle {
            manifest: summary.into_typed()?,
            dir,
        })
    }

    /// Typed manifests of one kind for an existing dataset.
    pub fn list_models_of<P: DeserializeOwned>(
        &self,
        dataset: &DatasetId,
        kind: ModelKind,
    ) -> PipelineResult<Vec<ModelManifest<P>>> {
        self.ensure_dataset(dataset)?;
        self.list_models(Some(dataset), Some(kind))?
            .into_iter()
            .map(|summary| summary.into_typed())
            .collect()
    }

    fn read_manifest(&self, mid: &ModelId) -> PipelineResult<ModelSummary> {
        let path = self.model_dir(mid).join(MANIFEST_FILE);
        match fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PipelineError::model_not_found(mid))
            }
            Err(e) => Err(PipelineError::io(&path, e)),
        }
    }

    /// Model manifests, optionally filtered by dataset and kind, oldest
    /// first. Unreadable entries are skipped with a warning.
    pub fn list_models(
        &self,
        dataset: Option<&DatasetId>,
        kind: Option<ModelKind>,
    ) -> PipelineResult<Vec<ModelSummary>> {
        let mut out = Vec::new();
        for name in list_dir_names(&self.root.join(MODELS_DIR))? {
            let Ok(mid) = ModelId::parse(&name) else {
                continue;
            };
            match self.read_manifest(&mid) {
                Ok(summary) => {
                    if dataset.is_some_and(|d| *d != summary.dataset_id) {
                        continue;
                    }
                    if kind.is_some_and(|k| k != summary.kind) {
                        continue;
                    }
                    out.push(summary);
                }
                // deleted between listing and reading
                Err(PipelineError::NotFound { .. }) => {}
                Err(err) => tracing::warn!(mid = %mid, error = %err, "skipping unreadable model"),
            }
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    /// Delete a model. Returns `false` when there was nothing to delete.
    pub fn delete_model(&self, mid: &ModelId) -> PipelineResult<bool> {
        let deleted = self.retire(&self.model_dir(mid))?;
        if deleted {
            tracing::info!(mid = %mid, "deleted model");
        }
        Ok(deleted)
    }

    /// Move `dir` out of the namespace, then remove it.
    fn retire(&self, dir: &Path) -> PipelineResult<bool> {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let trash = self
            .root
            .join(TRASH_DIR)
            .join(format!("{}-{}", name, Uuid::new_v4().simple()));
        match fs::rename(dir, &trash) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(PipelineError::io(dir, e)),
        }
        if let Err(e) = fs::remove_dir_all(&trash) {
            // already out of the namespace; a leftover in .trash is harmless
            tracing::warn!(path = %trash.display(), error = %e, "could not purge deleted directory");
        }
        Ok(true)
    }
}

fn list_dir_names(dir: &Path) -> PipelineResult<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PipelineError::io(dir, e)),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::io(dir, e))?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    Ok(names)
}

/// Write `bytes` to a temporary sibling of `path`, then rename it over
/// `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> PipelineResult<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));
    fs::write(&tmp, bytes).map_err(|e| PipelineError::io(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(PipelineError::io(path, e));
    }
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> PipelineResult<()> {
    write_atomic(path, &serde_json::to_vec_pretty(value)?)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> PipelineResult<T> {
    let bytes = fs::read(path).map_err(|e| PipelineError::io(path, e))?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Params {
        n: usize,
    }

    fn registry() -> (TempDir, ModelRegistry) {
        let tmp = TempDir::new().unwrap();
        let registry = ModelRegistry::open(tmp.path().join("cache")).unwrap();
        (tmp, registry)
    }

    #[test]
    fn commit_then_open_roundtrip() {
        let (_tmp, reg) = registry();
        let (dsid, _) = reg.allocate_dataset().unwrap();
        let mid = reg
            .commit_model(
                ModelKind::Lsi,
                &dsid,
                &Params { n: 3 },
                &[Artifact::bytes("blob.bin", vec![1, 2, 3])],
            )
            .unwrap();
        let handle: ModelHandle<Params> = reg.open_model(&mid, ModelKind::Lsi).unwrap();
        assert_eq!(handle.manifest.params, Params { n: 3 });
        assert_eq!(handle.manifest.dataset_id, dsid);
        assert_eq!(handle.read_artifact("blob.bin").unwrap(), vec![1, 2, 3]);
        // staging is empty after a successful commit
        assert!(list_dir_names(&reg.root().join(STAGING_DIR)).unwrap().is_empty());
    }

    #[test]
    fn read_through_handle_after_delete_is_not_found() {
        let (_tmp, reg) = registry();
        let (dsid, _) = reg.allocate_dataset().unwrap();
        let mid = reg
            .commit_model(
                ModelKind::Lsi,
                &dsid,
                &Params { n: 2 },
                &[Artifact::bytes("blob.bin", vec![7])],
            )
            .unwrap();
        let handle: ModelHandle<Params> = reg.open_model(&mid, ModelKind::Lsi).unwrap();

        assert!(reg.delete_model(&mid).unwrap());

        match handle.read_artifact("blob.bin") {
            Err(PipelineError::NotFound { kind, id }) => {
                assert_eq!(kind, "model");
                assert_eq!(id, mid.to_string());
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn wrong_kind_is_not_found() {
        let (_tmp, reg) = registry();
        let (dsid, _) = reg.allocate_dataset().unwrap();
        let mid = reg
            .commit_model(ModelKind::Lsi, &dsid, &Params { n: 1 }, &[])
            .unwrap();
        let err = reg
            .open_model::<Params>(&mid, ModelKind::Clustering)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn delete_is_idempotent() {
        let (_tmp, reg) = registry();
        let (dsid, _) = reg.allocate_dataset().unwrap();
        let mid = reg
            .commit_model(ModelKind::Categorizer, &dsid, &Params { n: 1 }, &[])
            .unwrap();
        assert!(reg.delete_model(&mid).unwrap());
        assert!(!reg.delete_model(&mid).unwrap());
        let err = reg
            .open_model::<Params>(&mid, ModelKind::Categorizer)
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { kind: "model", .. }));
    }

    #[test]
    fn orphaned_model_reports_missing_dataset() {
        let (_tmp, reg) = registry();
        let (dsid, _) = reg.allocate_dataset().unwrap();
        let mid = reg
            .commit_model(ModelKind::Lsi, &dsid, &Params { n: 1 }, &[])
            .unwrap();
        assert!(reg.delete_dataset(&dsid).unwrap());
        match reg.open_model::<Params>(&mid, ModelKind::Lsi) {
            Err(PipelineError::NotFound { kind, id }) => {
                assert_eq!(kind, "dataset");
                assert_eq!(id, dsid.to_string());
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
        // the model itself is still listed; deletion does not cascade
        assert_eq!(reg.list_models(None, None).unwrap().len(), 1);
    }

    #[test]
    fn commit_requires_existing_dataset() {
        let (_tmp, reg) = registry();
        let dsid = DatasetId::generate();
        let err = reg
            .commit_model(ModelKind::Lsi, &dsid, &Params { n: 1 }, &[])
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(reg.list_models(None, None).unwrap().is_empty());
    }

    #[test]
    fn list_models_filters_by_dataset_and_kind() {
        let (_tmp, reg) = registry();
        let (a, _) = reg.allocate_dataset().unwrap();
        let (b, _) = reg.allocate_dataset().unwrap();
        reg.commit_model(ModelKind::Lsi, &a, &Params { n: 1 }, &[]).unwrap();
        reg.commit_model(ModelKind::Clustering, &a, &Params { n: 2 }, &[]).unwrap();
        reg.commit_model(ModelKind::Lsi, &b, &Params { n: 3 }, &[]).unwrap();

        assert_eq!(reg.list_models(None, None).unwrap().len(), 3);
        assert_eq!(reg.list_models(Some(&a), None).unwrap().len(), 2);
        assert_eq!(reg.list_models(None, Some(ModelKind::Lsi)).unwrap().len(), 2);
        assert_eq!(
            reg.list_models(Some(&b), Some(ModelKind::Clustering))
                .unwrap()
                .len(),
            0
        );
        let mut datasets = vec![a, b];
        datasets.sort();
        assert_eq!(reg.list_datasets().unwrap(), datasets);
    }

    #[test]
    fn write_atomic_replaces_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("status.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }
}
