//! Config file discovery and loading for the CLI.

use anyhow::{Context, Result};
use rf_core::config::Config;
use std::path::{Path, PathBuf};

/// Searched in order when no `--config` is given.
const DEFAULT_PATHS: &[&str] = &["./reelforge.toml", "~/.config/reelforge/config.toml"];

/// Load configuration from a TOML file, logging validation warnings.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config = Config::from_toml(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    for warning in config.validate() {
        tracing::warn!("{}: {warning}", path.display());
    }

    Ok(config)
}

/// The first existing default config location.
pub fn discover_config_path() -> Option<PathBuf> {
    DEFAULT_PATHS.iter().find_map(|path_str| {
        let path = PathBuf::from(shellexpand::tilde(path_str).as_ref());
        path.exists().then_some(path)
    })
}

/// Load config from an explicit path, a default location, or defaults.
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    match discover_config_path() {
        Some(path) => {
            tracing::debug!("Using config {}", path.display());
            load_config(&path)
        }
        None => Ok(Config::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[render]\nfps = 24\n").unwrap();
        let config = load_config_or_default(Some(&path)).unwrap();
        assert_eq!(config.render.fps, 24);
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let err = load_config_or_default(Some(Path::new("/nonexistent/reelforge.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read config file"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "render = [").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config file"));
    }
}
