//! Filesystem utilities.
//!
//! Owns the on-disk layout of the media root and the primitives that keep it
//! consistent:
//! - timed-text artifacts are written atomically (temp file + rename),
//! - scratch directories are removed when their guard drops,
//! - uploaded filenames are sanitised before they touch the filesystem.
//!
//! ```text
//! <media_root>/
//!   <32 hex>_<name>.mp4        source media (random prefix per upload)
//!   <job_id>.captions.json     timed-text artifact
//!   subtitled_<job_id>.mp4     rendered output
//!   scratch/<uuid>/            per-stage temporary work
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::{CoreError, CoreResult};

// =============================================================================
// Media Layout
// =============================================================================

/// Deterministic paths for every per-job artifact under a single root
#[derive(Clone, Debug)]
pub struct MediaLayout {
    root: PathBuf,
}

impl MediaLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the root and scratch directories
    pub fn ensure(&self) -> CoreResult<()> {
        std::fs::create_dir_all(self.scratch_root())?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for a newly uploaded source; the random prefix avoids collisions
    pub fn source_path(&self, original_filename: &str) -> PathBuf {
        let prefix = uuid::Uuid::new_v4().simple().to_string();
        self.root
            .join(format!("{prefix}_{}", sanitize_filename(original_filename)))
    }

    pub fn timed_text_path(&self, job_id: &str) -> PathBuf {
        self.root.join(format!("{job_id}.captions.json"))
    }

    pub fn output_path(&self, job_id: &str) -> PathBuf {
        self.root.join(format!("subtitled_{job_id}.mp4"))
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.root.join("scratch")
    }

    /// Creates a private scratch directory removed when the guard drops
    pub fn scratch_dir(&self) -> CoreResult<ScratchDir> {
        let path = self
            .scratch_root()
            .join(uuid::Uuid::new_v4().simple().to_string());
        std::fs::create_dir_all(&path)?;
        Ok(ScratchDir { path: Some(path) })
    }
}

// =============================================================================
// Scratch Directories
// =============================================================================

/// Temporary working directory for one stage execution
#[derive(Debug)]
pub struct ScratchDir {
    path: Option<PathBuf>,
}

impl ScratchDir {
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.path().join(name)
    }

    /// Removes the directory now, surfacing errors the drop path would swallow
    pub fn close(mut self) -> CoreResult<()> {
        if let Some(path) = self.path.take() {
            if path.exists() {
                std::fs::remove_dir_all(&path)?;
            }
        }
        Ok(())
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if path.exists() {
                if let Err(e) = std::fs::remove_dir_all(&path) {
                    tracing::warn!("Failed to remove scratch dir {}: {}", path.display(), e);
                }
            }
        }
    }
}

// =============================================================================
// Path Validation Utilities
// =============================================================================

/// Validates that an identifier component is safe to use in file paths.
///
/// Rejects empty strings, traversal sequences, separators, drive letters and
/// control characters.
pub fn validate_path_id_component(id: &str, label: &str) -> CoreResult<()> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation(format!(
            "{label} is empty or contains only whitespace"
        )));
    }
    if trimmed.contains("..")
        || trimmed.contains('/')
        || trimmed.contains('\\')
        || trimmed.contains(':')
    {
        return Err(CoreError::Validation(format!(
            "Invalid {label}: contains path traversal characters"
        )));
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(CoreError::Validation(format!(
            "Invalid {label}: contains control characters"
        )));
    }
    Ok(())
}

/// Validates a local input file: non-empty, not a URL, existing regular file.
pub fn validate_local_input_path(path: &Path, label: &str) -> CoreResult<PathBuf> {
    let raw = path.to_string_lossy();
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation(format!("{label} is empty")));
    }

    if trimmed.to_ascii_lowercase().contains("://") {
        return Err(CoreError::Validation(format!(
            "{label} must be a local file path, not a URL"
        )));
    }

    let meta = std::fs::metadata(path).map_err(|_| {
        CoreError::Validation(format!("{label} file not found: {}", path.display()))
    })?;
    if !meta.is_file() {
        return Err(CoreError::Validation(format!(
            "{label} is not a file: {}",
            path.display()
        )));
    }
    if meta.len() == 0 {
        return Err(CoreError::Validation(format!(
            "{label} is empty: {}",
            path.display()
        )));
    }

    Ok(path.to_path_buf())
}

/// Reduces an uploaded filename to a safe ASCII basename.
///
/// Keeps alphanumerics, `.`, `-` and `_`; whitespace becomes `_`; leading dots
/// are stripped so the result can never be hidden or a traversal.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let cleaned: String = base
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect();

    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.chars().take(128).collect()
    }
}

/// Deletes a file if it is present; missing files are not an error.
pub fn remove_file_if_exists(path: &Path) -> CoreResult<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CoreError::IoError(e)),
    }
}

// =============================================================================
// Atomic Writes
// =============================================================================

/// Write bytes to `path` using an atomic replace pattern.
///
/// The data goes to a sibling `.tmp` file which is flushed, synced and renamed
/// over the destination.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = tmp_path_for(path);
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(CoreError::IoError(e));
    }
    Ok(())
}

/// Write a JSON file atomically with pretty formatting.
pub fn atomic_write_json_pretty<T: serde::Serialize>(path: &Path, value: &T) -> CoreResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "tmp".to_string());
    tmp.set_file_name(format!("{file_name}.tmp"));
    tmp
}
