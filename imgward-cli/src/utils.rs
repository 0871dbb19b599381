//! Common utility functions shared across CLI commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use imgward_core::{Config, ExemptionGate, FingerprintStore, SystemClock};
use serde::Serialize;
use tracing::debug;

/// Global output switches.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    /// Human-readable output is wanted.
    pub fn pretty(&self) -> bool {
        !self.json && !self.quiet
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = Config::load(path).context("Failed to load configuration")?;
    debug!(store = %config.store.path.display(), "Loaded configuration");
    Ok(config)
}

pub fn open_store(config: &Config) -> Result<Arc<FingerprintStore>> {
    let store = FingerprintStore::open(&config.store.path, Arc::new(SystemClock))
        .context("Failed to open fingerprint store")?;
    Ok(Arc::new(store))
}

pub fn open_gate(config: &Config) -> Result<Arc<ExemptionGate>> {
    let gate = ExemptionGate::open(&config.gate, &config.store.whitelist_path)
        .context("Failed to open whitelist")?;
    Ok(Arc::new(gate))
}

pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))
}

/// Regular files directly inside `dir`, sorted by name.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry =
            entry.with_context(|| format!("Failed to read directory: {}", dir.display()))?;
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

pub fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_files_sorted_and_flat() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.png"), b"b").unwrap();
        std::fs::write(dir.path().join("a.png"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let files = list_files(dir.path()).unwrap();
        let names: Vec<String> = files.iter().filter_map(|p| file_name(p)).collect();
        assert_eq!(names, vec!["a.png", "b.png"]);
    }

    #[test]
    fn test_missing_directory_is_read_error() {
        let err = list_files(Path::new("/definitely/not/here")).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read directory"));
    }

    #[test]
    fn test_output_modes() {
        assert!(Output { json: false, quiet: false }.pretty());
        assert!(!Output { json: true, quiet: false }.pretty());
        assert!(!Output { json: false, quiet: true }.pretty());
    }
}
