//! Scratch space for one assembly call.
//!
//! A [`Workspace`] owns a temporary directory for intermediates (clips,
//! concat lists, filter scripts, merged audio). The directory is removed when
//! the workspace is dropped, on every exit path including cancellation. Only
//! the final artifact leaves it, through [`Workspace::finalize`].

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Temporary directory scoped to one assembly.
///
/// # Example
///
/// ```no_run
/// use rf_av::Workspace;
///
/// let workspace = Workspace::new().unwrap();
/// let clip = workspace.temp_file("clip_000.mp4");
/// // ... write the final render to workspace.temp_file("final.mp4") ...
/// workspace
///     .finalize(&workspace.temp_file("final.mp4"), std::path::Path::new("/out/video.mp4"))
///     .unwrap();
/// ```
#[derive(Debug)]
pub struct Workspace {
    temp_dir: TempDir,
}

impl Workspace {
    /// Create a workspace under the system temp directory.
    pub fn new() -> rf_core::Result<Self> {
        Self::build(tempfile::Builder::new().prefix("reelforge-").tempdir())
    }

    /// Create a workspace under `parent` (keeps finalize a same-filesystem rename).
    pub fn new_in(parent: &Path) -> rf_core::Result<Self> {
        std::fs::create_dir_all(parent)?;
        Self::build(tempfile::Builder::new().prefix(".reelforge-").tempdir_in(parent))
    }

    fn build(dir: std::io::Result<TempDir>) -> rf_core::Result<Self> {
        let temp_dir =
            dir.map_err(|e| rf_core::Error::tool("workspace", format!("failed to create temp dir: {e}")))?;
        tracing::debug!("workspace at {}", temp_dir.path().display());
        Ok(Self { temp_dir })
    }

    /// Path to the temporary directory.
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Create a path for a named temporary file inside the workspace.
    pub fn temp_file(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Move `produced` to `dest`, replacing whatever is there.
    ///
    /// Tries a rename first and falls back to copy+remove across filesystems.
    /// Returns the final path.
    ///
    /// # Errors
    ///
    /// Returns an error if `produced` does not exist or the move fails.
    pub fn finalize(&self, produced: &Path, dest: &Path) -> rf_core::Result<PathBuf> {
        if !produced.exists() {
            return Err(rf_core::Error::tool(
                "workspace",
                format!("output file does not exist: {}", produced.display()),
            ));
        }

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        if std::fs::rename(produced, dest).is_err() {
            std::fs::copy(produced, dest).map_err(|e| {
                rf_core::Error::tool("workspace", format!("failed to copy output to destination: {e}"))
            })?;
            let _ = std::fs::remove_file(produced);
        }

        Ok(dest.to_path_buf())
    }
}
