//! Atomic publication of the generated catalog.
//!
//! Documents are first written to a hidden staging directory inside the
//! output root, then renamed into place one by one. Renames within a single
//! filesystem are atomic, so readers never observe a half-written file. A
//! failed publish leaves the previous output in place, and files the previous
//! manifest listed but the new catalog does not are removed.
//!
//! Layout after a successful publish:
//! ```text
//! <output_root>/
//! ├── README.md              (index document)
//! ├── protocols/             (optional per-protocol documents)
//! │   └── <slug>.md
//! └── turnip-manifest.json
//! ```

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use turnip_shared::{Result, TurnipError};

/// Name of the manifest written next to the published documents.
pub const MANIFEST_FILE: &str = "turnip-manifest.json";

const STAGING_PREFIX: &str = ".turnip-staging-";

/// Directory inside the staging directory holding replaced files until the
/// publish completes.
const BACKUP_DIR: &str = ".turnip-staging-previous";

/// A generated file, addressed relative to the output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub path: PathBuf,
    pub content: String,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Checksum entry for one published file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Path relative to the output root, `/`-separated.
    pub path: String,
    pub sha256: String,
    pub size_bytes: usize,
}

/// Contents of `turnip-manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishManifest {
    pub tool_version: String,
    pub generated_at: DateTime<Utc>,
    pub protocol_count: usize,
    pub files: Vec<FileMeta>,
}

/// Output from a successful publish.
#[derive(Debug, Clone)]
pub struct PublishResult {
    pub output_root: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: PublishManifest,
}

/// Documents written to a staging directory, ready to be moved into place.
///
/// Dropping a `StagedOutput` without calling [`StagedOutput::finalize`]
/// removes the staging directory.
#[derive(Debug)]
pub struct StagedOutput {
    output_root: PathBuf,
    staging_dir: PathBuf,
    files: Vec<FileMeta>,
}

// ---------------------------------------------------------------------------
// Publishing
// ---------------------------------------------------------------------------

/// Stage and finalize in one step.
pub fn publish(
    output_root: &Path,
    documents: &[Document],
    protocol_count: usize,
) -> Result<PublishResult> {
    stage(output_root, documents)?.finalize(protocol_count)
}

/// Write every document into a fresh staging directory under `output_root`.
///
/// Nothing outside the staging directory is touched.
#[instrument(skip_all, fields(root = %output_root.display(), documents = documents.len()))]
pub fn stage(output_root: &Path, documents: &[Document]) -> Result<StagedOutput> {
    let mut seen = HashSet::with_capacity(documents.len());
    for doc in documents {
        let rel = relative_path(&doc.path)?;
        if rel == MANIFEST_FILE {
            return Err(TurnipError::validation(format!(
                "document path '{rel}' is reserved for the manifest"
            )));
        }
        if rel.starts_with(STAGING_PREFIX) {
            return Err(TurnipError::validation(format!(
                "document path '{rel}' is reserved for staging"
            )));
        }
        if !seen.insert(rel.clone()) {
            return Err(TurnipError::validation(format!(
                "document path '{rel}' appears more than once"
            )));
        }
    }

    std::fs::create_dir_all(output_root).map_err(|e| TurnipError::io(output_root, e))?;

    let staging_dir = output_root.join(format!("{STAGING_PREFIX}{}", Uuid::now_v7()));
    std::fs::create_dir(&staging_dir).map_err(|e| TurnipError::io(&staging_dir, e))?;

    // From here on, an early return drops `staged` and cleans up.
    let mut staged = StagedOutput {
        output_root: output_root.to_path_buf(),
        staging_dir,
        files: Vec::with_capacity(documents.len()),
    };

    for doc in documents {
        staged.write(doc)?;
    }

    debug!(
        staging = %staged.staging_dir.display(),
        files = staged.files.len(),
        "documents staged"
    );
    Ok(staged)
}

impl StagedOutput {
    /// Staging directory currently holding the documents.
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    fn write(&mut self, doc: &Document) -> Result<()> {
        let rel = relative_path(&doc.path)?;
        let target = self.staging_dir.join(&doc.path);

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TurnipError::io(parent, e))?;
        }
        std::fs::write(&target, &doc.content).map_err(|e| TurnipError::io(&target, e))?;

        debug!(file = %rel, size = doc.content.len(), "staged document");
        self.files.push(FileMeta {
            path: rel,
            sha256: sha256_hex(doc.content.as_bytes()),
            size_bytes: doc.content.len(),
        });
        Ok(())
    }

    /// Move every staged document into the output root, write the manifest,
    /// then remove files that only the previous manifest listed.
    ///
    /// Files being replaced are set aside first. If any move or the manifest
    /// write fails, they are put back and newly added files are removed, so
    /// the output root keeps the previous catalog.
    #[instrument(skip_all, fields(root = %self.output_root.display(), files = self.files.len()))]
    pub fn finalize(self, protocol_count: usize) -> Result<PublishResult> {
        let previous = match read_manifest(&self.output_root) {
            Ok(previous) => previous,
            Err(e) => {
                warn!(error = %e, "ignoring unreadable previous manifest");
                None
            }
        };

        let backup_dir = self.staging_dir.join(BACKUP_DIR);
        let mut placed = Vec::with_capacity(self.files.len());
        for file in &self.files {
            match self.place(file, &backup_dir) {
                Ok(placement) => placed.push(placement),
                Err(e) => {
                    self.roll_back(&placed);
                    return Err(e);
                }
            }
        }

        let manifest = PublishManifest {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            generated_at: Utc::now(),
            protocol_count,
            files: self.files.clone(),
        };
        let manifest_path = self.output_root.join(MANIFEST_FILE);
        if let Err(e) = write_json_atomic(&self.staging_dir, &manifest_path, &manifest) {
            self.roll_back(&placed);
            return Err(e);
        }

        if let Some(previous) = previous {
            let current: HashSet<&str> = self.files.iter().map(|f| f.path.as_str()).collect();
            for stale in previous
                .files
                .iter()
                .filter(|f| !current.contains(f.path.as_str()))
            {
                self.remove_stale(&stale.path);
            }
        }

        info!(
            files = manifest.files.len(),
            protocol_count,
            path = %self.output_root.display(),
            "catalog published"
        );

        Ok(PublishResult {
            output_root: self.output_root.clone(),
            manifest_path,
            manifest,
        })
    }

    /// Rename one staged file over its target, moving any existing file
    /// into `backup_dir` first.
    fn place(&self, file: &FileMeta, backup_dir: &Path) -> Result<Placement> {
        let from = self.staging_dir.join(&file.path);
        let target = self.output_root.join(&file.path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TurnipError::io(parent, e))?;
        }

        let backup = if target.is_file() {
            let backup = backup_dir.join(&file.path);
            if let Some(parent) = backup.parent() {
                std::fs::create_dir_all(parent).map_err(|e| TurnipError::io(parent, e))?;
            }
            std::fs::rename(&target, &backup).map_err(|e| TurnipError::io(&target, e))?;
            Some(backup)
        } else {
            None
        };

        if let Err(e) = std::fs::rename(&from, &target) {
            if let Some(backup) = &backup {
                restore(backup, &target);
            }
            return Err(TurnipError::io(&target, e));
        }
        Ok(Placement { target, backup })
    }

    /// Undo `placed` in reverse order.
    fn roll_back(&self, placed: &[Placement]) {
        warn!(files = placed.len(), "publish failed, restoring previous output");
        for placement in placed.iter().rev() {
            match &placement.backup {
                Some(backup) => restore(backup, &placement.target),
                None => {
                    if let Err(e) = std::fs::remove_file(&placement.target) {
                        warn!(
                            path = %placement.target.display(),
                            error = %e,
                            "failed to remove partially published file"
                        );
                    }
                }
            }
        }
    }

    /// Delete a file published last time but not this time, along with any
    /// directories it leaves empty. Failures are logged, not returned.
    fn remove_stale(&self, path: &str) {
        let rel = match relative_path(Path::new(path)) {
            Ok(rel) if rel != MANIFEST_FILE => rel,
            _ => {
                warn!(file = path, "skipping invalid path in previous manifest");
                return;
            }
        };

        let target = self.output_root.join(&rel);
        match std::fs::remove_file(&target) {
            Ok(()) => debug!(file = %rel, "removed stale document"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %target.display(), error = %e, "failed to remove stale document");
                return;
            }
        }

        let mut dir = target.parent();
        while let Some(parent) = dir {
            if parent == self.output_root || std::fs::remove_dir(parent).is_err() {
                break;
            }
            dir = parent.parent();
        }
    }
}

/// Where a staged file landed, and where its predecessor was set aside.
#[derive(Debug)]
struct Placement {
    target: PathBuf,
    backup: Option<PathBuf>,
}

fn restore(backup: &Path, target: &Path) {
    if let Err(e) = std::fs::rename(backup, target) {
        warn!(
            path = %target.display(),
            error = %e,
            "failed to restore previous document"
        );
    }
}

impl Drop for StagedOutput {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.staging_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    path = %self.staging_dir.display(),
                    error = %e,
                    "failed to remove staging directory"
                );
            }
        }
    }
}

/// Read the manifest of a previous publish, if any.
pub fn read_manifest(output_root: &Path) -> Result<Option<PublishManifest>> {
    let path = output_root.join(MANIFEST_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path).map_err(|e| TurnipError::io(&path, e))?;
    let manifest = serde_json::from_str(&content)
        .map_err(|e| TurnipError::validation(format!("invalid {MANIFEST_FILE}: {e}")))?;
    Ok(Some(manifest))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Validate a document path and render it `/`-separated.
fn relative_path(path: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            _ => {
                return Err(TurnipError::validation(format!(
                    "document path '{}' must be relative and stay inside the output directory",
                    path.display()
                )));
            }
        }
    }
    if parts.is_empty() {
        return Err(TurnipError::validation("document path is empty"));
    }
    Ok(parts.join("/"))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Write pretty JSON to a temp file in `scratch_dir`, then rename it over `path`.
fn write_json_atomic<T: Serialize>(scratch_dir: &Path, path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| TurnipError::validation(format!("JSON serialization failed: {e}")))?;
    let temp = scratch_dir.join(format!("{MANIFEST_FILE}.tmp"));
    std::fs::write(&temp, json).map_err(|e| TurnipError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| TurnipError::io(path, e))?;
    debug!(path = %path.display(), "wrote JSON file");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("turnip-publisher-test-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn docs() -> Vec<Document> {
        vec![
            Document::new("README.md", "# Turn/IP\n"),
            Document::new("protocols/modbus.md", "## Modbus\n"),
        ]
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn publish_writes_documents_and_manifest() {
        let tmp = temp_dir();
        let result = publish(&tmp, &docs(), 1).unwrap();

        assert_eq!(
            std::fs::read_to_string(tmp.join("README.md")).unwrap(),
            "# Turn/IP\n"
        );
        assert_eq!(
            std::fs::read_to_string(tmp.join("protocols/modbus.md")).unwrap(),
            "## Modbus\n"
        );

        let manifest = read_manifest(&tmp).unwrap().unwrap();
        assert_eq!(manifest, result.manifest);
        assert_eq!(manifest.protocol_count, 1);
        let paths: Vec<_> = manifest.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["README.md", "protocols/modbus.md"]);
        assert_eq!(manifest.files[0].sha256.len(), 64);
        assert_eq!(manifest.files[0].size_bytes, "# Turn/IP\n".len());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn no_staging_or_temp_files_left_behind() {
        let tmp = temp_dir();
        publish(&tmp, &docs(), 1).unwrap();

        assert_eq!(entries(&tmp), vec!["README.md", "protocols", MANIFEST_FILE]);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn publish_overwrites_previous_output() {
        let tmp = temp_dir();
        publish(&tmp, &docs(), 1).unwrap();
        publish(&tmp, &[Document::new("README.md", "# Updated\n")], 0).unwrap();

        assert_eq!(
            std::fs::read_to_string(tmp.join("README.md")).unwrap(),
            "# Updated\n"
        );
        let manifest = read_manifest(&tmp).unwrap().unwrap();
        assert_eq!(manifest.files.len(), 1);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn stale_documents_are_removed() {
        let tmp = temp_dir();
        publish(&tmp, &docs(), 1).unwrap();
        std::fs::write(tmp.join("notes.txt"), "not ours").unwrap();

        publish(&tmp, &[Document::new("README.md", "# Updated\n")], 0).unwrap();

        assert!(!tmp.join("protocols/modbus.md").exists());
        assert!(!tmp.join("protocols").exists());
        assert_eq!(entries(&tmp), vec!["README.md", "notes.txt", MANIFEST_FILE]);
        let manifest = read_manifest(&tmp).unwrap().unwrap();
        let paths: Vec<_> = manifest.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["README.md"]);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn failed_move_restores_previous_output() {
        let tmp = temp_dir();
        publish(&tmp, &[Document::new("a.md", "old a\n")], 0).unwrap();
        // A non-empty directory where a document should land cannot be replaced.
        std::fs::create_dir_all(tmp.join("b.md").join("keep")).unwrap();

        let err = publish(
            &tmp,
            &[
                Document::new("a.md", "new a\n"),
                Document::new("c.md", "new c\n"),
                Document::new("b.md", "new b\n"),
            ],
            0,
        )
        .unwrap_err();
        assert!(matches!(err, TurnipError::Io { .. }), "unexpected error: {err}");

        assert_eq!(std::fs::read_to_string(tmp.join("a.md")).unwrap(), "old a\n");
        assert!(!tmp.join("c.md").exists());
        assert!(tmp.join("b.md").join("keep").is_dir());
        assert_eq!(entries(&tmp), vec!["a.md", "b.md", MANIFEST_FILE]);
        let manifest = read_manifest(&tmp).unwrap().unwrap();
        assert_eq!(manifest.files.len(), 1);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn dropped_stage_leaves_previous_output_untouched() {
        let tmp = temp_dir();
        publish(&tmp, &docs(), 1).unwrap();

        let staged = stage(&tmp, &[Document::new("README.md", "# Half done\n")]).unwrap();
        let staging_dir = staged.staging_dir().to_path_buf();
        assert!(staging_dir.exists());
        drop(staged);

        assert!(!staging_dir.exists());
        assert_eq!(
            std::fs::read_to_string(tmp.join("README.md")).unwrap(),
            "# Turn/IP\n"
        );

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn invalid_paths_are_rejected_before_writing() {
        let tmp = temp_dir();

        for bad in ["../escape.md", "/abs.md", "", MANIFEST_FILE, ".turnip-staging-x/a.md"] {
            let result = stage(&tmp, &[Document::new(bad, "x")]);
            assert!(result.is_err(), "accepted {bad:?}");
        }
        let dup = stage(
            &tmp,
            &[Document::new("a.md", "1"), Document::new("a.md", "2")],
        );
        assert!(dup.is_err());
        assert!(entries(&tmp).is_empty());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_manifest_reads_as_none() {
        let tmp = temp_dir();
        assert!(read_manifest(&tmp).unwrap().is_none());
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
