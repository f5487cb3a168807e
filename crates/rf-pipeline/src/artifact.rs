//! Writing generated artifacts without leaving partial files behind.
//!
//! Bytes go to a `.part` sibling first and are renamed into place once fully
//! written. The partial is removed if the write fails or the future is
//! dropped (cancellation).

use std::path::{Path, PathBuf};

struct PartialFile {
    path: PathBuf,
    committed: bool,
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Write `bytes` to `dest` via a `.part` file.
///
/// # Errors
///
/// [`rf_core::Error::Backend`] if `bytes` is empty (an upstream returned
/// nothing); I/O errors otherwise.
pub async fn write_artifact(dest: &Path, bytes: &[u8], backend: &str) -> rf_core::Result<()> {
    if bytes.is_empty() {
        return Err(rf_core::Error::backend(backend, "returned an empty payload"));
    }
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut partial = PartialFile {
        path: partial_path(dest),
        committed: false,
    };
    tokio::fs::write(&partial.path, bytes).await?;
    tokio::fs::rename(&partial.path, dest).await?;
    partial.committed = true;
    Ok(())
}

/// Copy `src` to `dest` via a `.part` file.
pub async fn copy_artifact(src: &Path, dest: &Path) -> rf_core::Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut partial = PartialFile {
        path: partial_path(dest),
        committed: false,
    };
    tokio::fs::copy(src, &partial.path).await?;
    tokio::fs::rename(&partial.path, dest).await?;
    partial.committed = true;
    Ok(())
}
