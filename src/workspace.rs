//! Workspace loading.
//!
//! A workspace is a directory: records under their partitions, the
//! pipeline configuration in `research-kit.yaml`, the data registry in
//! `registry.yaml`, and regime reference data in `reference.yaml`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::record::store::RecordStore;
use crate::registry::DataRegistry;
use crate::regime::ReferenceSeries;

pub const CONFIG_FILE: &str = "research-kit.yaml";
pub const REGISTRY_FILE: &str = "registry.yaml";
pub const REFERENCE_FILE: &str = "reference.yaml";

/// An opened workspace.
pub struct Workspace {
    pub root: PathBuf,
    pub config: PipelineConfig,
    pub registry: DataRegistry,
    pub reference: ReferenceSeries,
    pub store: Arc<RecordStore>,
}

/// Expand `~` and environment variables in a workspace path.
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

impl Workspace {
    /// Open (and scaffold, if new) a workspace directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let store = Arc::new(RecordStore::open(&root)?);

        let config_path = root.join(CONFIG_FILE);
        let config = if config_path.exists() {
            PipelineConfig::load(&config_path)?
        } else {
            let config = PipelineConfig::default();
            std::fs::write(&config_path, serde_yaml::to_string(&config)?)?;
            config
        };

        let registry_path = root.join(REGISTRY_FILE);
        let registry = if registry_path.exists() {
            DataRegistry::load(&registry_path)?
        } else {
            warn!(path = %registry_path.display(), "no data registry; data checks will fail closed");
            DataRegistry::default()
        };

        let reference_path = root.join(REFERENCE_FILE);
        let reference = if reference_path.exists() {
            serde_yaml::from_str(&std::fs::read_to_string(&reference_path)?)?
        } else {
            warn!(path = %reference_path.display(), "no reference series; regime tagging will fail");
            ReferenceSeries::default()
        };

        Ok(Self {
            root,
            config,
            registry,
            reference,
            store,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_scaffolds_and_writes_default_config() {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::open(dir.path()).unwrap();
        assert!(dir.path().join(CONFIG_FILE).exists());
        assert!(dir.path().join("strategies/pending").exists());
        assert_eq!(workspace.config, PipelineConfig::default());
    }

    #[test]
    fn test_reopen_reads_edited_config() {
        let dir = TempDir::new().unwrap();
        Workspace::open(dir.path()).unwrap();

        let path = dir.path().join(CONFIG_FILE);
        let mut config = PipelineConfig::default();
        config.gates.min_sharpe = 1.5;
        std::fs::write(&path, serde_yaml::to_string(&config).unwrap()).unwrap();

        let workspace = Workspace::open(dir.path()).unwrap();
        assert_eq!(workspace.config.gates.min_sharpe, 1.5);
    }

    #[test]
    fn test_expand_path_handles_tilde() {
        let expanded = expand_path("~/research");
        assert!(!expanded.to_string_lossy().starts_with('~'));
    }
}
