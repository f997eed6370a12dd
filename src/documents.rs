//! Document sets: the ordered inputs to feature extraction.
//!
//! A document is either a file on disk or inline text. Each carries a
//! `filename` that serves as its document id everywhere downstream
//! (exemplar lists, ground truth, predictions), so filenames must be unique
//! within a set.
//!
//! Directory scanning follows the usual include/exclude glob rules, with
//! VCS and build directories always excluded. Results are sorted by
//! relative path so two scans of the same tree yield the same order.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{PipelineError, PipelineResult};
use crate::ground_truth::GroundTruth;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentSource {
    Path { path: PathBuf },
    Inline { content: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub filename: String,
    #[serde(flatten)]
    pub source: DocumentSource,
}

impl DocumentRef {
    pub fn path(filename: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            source: DocumentSource::Path { path: path.into() },
        }
    }

    pub fn inline(filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            source: DocumentSource::Inline {
                content: content.into(),
            },
        }
    }

    /// Load the document text. Invalid UTF-8 is replaced, not rejected.
    pub fn read_text(&self) -> PipelineResult<String> {
        match &self.source {
            DocumentSource::Inline { content } => Ok(content.clone()),
            DocumentSource::Path { path } => {
                let bytes = std::fs::read(path).map_err(|e| PipelineError::io(path, e))?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentSet {
    pub documents: Vec<DocumentRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<GroundTruth>,
}

impl DocumentSet {
    pub fn new(documents: Vec<DocumentRef>) -> Self {
        Self {
            documents,
            ground_truth: None,
        }
    }

    pub fn with_ground_truth(mut self, ground_truth: GroundTruth) -> Self {
        self.ground_truth = Some(ground_truth);
        self
    }

    /// Inline documents from `(filename, content)` pairs.
    pub fn inline<I, F, C>(docs: I) -> Self
    where
        I: IntoIterator<Item = (F, C)>,
        F: Into<String>,
        C: Into<String>,
    {
        Self::new(
            docs.into_iter()
                .map(|(f, c)| DocumentRef::inline(f, c))
                .collect(),
        )
    }

    /// Files given explicitly; the filename is the path as written.
    pub fn from_paths(paths: &[PathBuf]) -> Self {
        Self::new(
            paths
                .iter()
                .map(|p| DocumentRef::path(p.to_string_lossy().to_string(), p.clone()))
                .collect(),
        )
    }

    /// Scan `root` for files matching `include` and not `exclude`. The
    /// filename of each document is its path relative to `root`.
    pub fn from_directory(
        root: &Path,
        include: &[String],
        exclude: &[String],
        follow_symlinks: bool,
    ) -> PipelineResult<Self> {
        if !root.is_dir() {
            return Err(PipelineError::invalid(format!(
                "document directory does not exist: {}",
                root.display()
            )));
        }

        let include_set = build_globset(include)?;
        let mut excludes = vec!["**/.git/**".to_string(), "**/target/**".to_string()];
        excludes.extend(exclude.iter().cloned());
        let exclude_set = build_globset(&excludes)?;

        let mut documents = Vec::new();
        for entry in WalkDir::new(root).follow_links(follow_symlinks) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(root).to_path_buf();
                let io = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
                PipelineError::io(&path, io)
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
                continue;
            }
            documents.push(DocumentRef::path(rel_str, path));
        }

        documents.sort_by(|a, b| a.filename.cmp(&b.filename));
        tracing::debug!(root = %root.display(), n = documents.len(), "scanned document directory");
        Ok(Self::new(documents))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn filenames(&self) -> Vec<String> {
        self.documents.iter().map(|d| d.filename.clone()).collect()
    }

    /// Non-empty, unique filenames, and files that exist.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.documents.is_empty() {
            return Err(PipelineError::invalid("document set is empty"));
        }
        let mut seen = HashSet::new();
        for doc in &self.documents {
            if doc.filename.is_empty() {
                return Err(PipelineError::invalid("document filename is empty"));
            }
            if !seen.insert(doc.filename.as_str()) {
                return Err(PipelineError::invalid(format!(
                    "duplicate document filename '{}'",
                    doc.filename
                )));
            }
            if let DocumentSource::Path { path } = &doc.source {
                if !path.is_file() {
                    return Err(PipelineError::invalid(format!(
                        "document not found: {}",
                        path.display()
                    )));
                }
            }
        }
        Ok(())
    }
}

fn build_globset(patterns: &[String]) -> PipelineResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| PipelineError::invalid(format!("bad glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| PipelineError::invalid(format!("bad glob set: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn directory_scan_is_sorted_and_filtered() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("b.txt"), "bravo").unwrap();
        std::fs::write(root.join("a.txt"), "alpha").unwrap();
        std::fs::write(root.join("sub/c.txt"), "charlie").unwrap();
        std::fs::write(root.join("skip.log"), "nope").unwrap();
        std::fs::write(root.join(".git/config"), "nope").unwrap();

        let set = DocumentSet::from_directory(
            root,
            &["**/*.txt".to_string()],
            &[],
            false,
        )
        .unwrap();
        assert_eq!(set.filenames(), vec!["a.txt", "b.txt", "sub/c.txt"]);
        assert_eq!(set.documents[2].read_text().unwrap(), "charlie");
        set.validate().unwrap();
    }

    #[test]
    fn exclude_globs_apply() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("keep.txt"), "x").unwrap();
        std::fs::write(tmp.path().join("drop.txt"), "y").unwrap();
        let set = DocumentSet::from_directory(
            tmp.path(),
            &["**/*.txt".to_string()],
            &["drop.txt".to_string()],
            false,
        )
        .unwrap();
        assert_eq!(set.filenames(), vec!["keep.txt"]);
    }

    #[test]
    fn validate_rejects_duplicates_and_empty_sets() {
        assert!(DocumentSet::default().validate().is_err());
        let dup = DocumentSet::inline([("a", "x"), ("a", "y")]);
        let err = dup.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
        let missing = DocumentSet::from_paths(&[PathBuf::from("/definitely/not/here.txt")]);
        assert!(missing.validate().is_err());
    }

    #[test]
    fn document_ref_json_is_flat() {
        let doc = DocumentRef::inline("x.txt", "hello");
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["filename"], "x.txt");
        assert_eq!(json["kind"], "inline");
        assert_eq!(json["content"], "hello");
        let back: DocumentRef = serde_json::from_value(json).unwrap();
        assert_eq!(back, doc);
    }
}
