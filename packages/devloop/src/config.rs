//! User-global configuration (**AMBIENT**): per-kube-context defaults stored
//! outside any single pipeline, matching the grounding codebase's own
//! global-config conventions (TOML via the `toml` crate, under a
//! `directories`-resolved config directory).

use std::collections::HashMap;

use color_eyre::{Result, eyre::Context};
use serde::{Deserialize, Serialize};

use crate::path::AbsFilePath;

/// Per-kube-context overrides, keyed by context name.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ContextConfig {
    pub default_repository: Option<String>,
    #[serde(default)]
    pub local_cluster: bool,
}

/// The full `~/.devloop/config` document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub contexts: HashMap<String, ContextConfig>,
}

impl GlobalConfig {
    /// Default path, `~/.devloop/config`, per `SPEC_FULL.md` §2's
    /// configuration note.
    pub fn default_path() -> Result<AbsFilePath> {
        let home = home::home_dir().ok_or_else(|| color_eyre::eyre::eyre!("no home directory"))?;
        AbsFilePath::try_from(home.join(".devloop").join("config"))
            .context("build default config path")
    }

    /// Load from `path`, treating a missing file as an empty config.
    pub fn load(path: &AbsFilePath) -> Result<Self> {
        match std::fs::read_to_string(path.as_std_path()) {
            Ok(contents) => toml::from_str(&contents).with_context(|| format!("parse config: {path}")),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err).with_context(|| format!("read config: {path}")),
        }
    }

    pub fn save(&self, path: &AbsFilePath) -> Result<()> {
        let toml = toml::to_string_pretty(self).context("serialize config")?;
        if let Some(parent) = path.as_std_path().parent() {
            std::fs::create_dir_all(parent).context("create config dir")?;
        }
        std::fs::write(path.as_std_path(), toml).with_context(|| format!("write config: {path}"))
    }

    pub fn context(&self, kube_context: &str) -> ContextConfig {
        self.contexts.get(kube_context).cloned().unwrap_or_default()
    }

    /// Identify a locally-hosted cluster by kube-context prefix, per
    /// `spec.md` §4.8 step 5 ("`kind`, `k3d` have special loaders; identified
    /// by kube-context prefix").
    pub fn is_local_cluster(kube_context: &str) -> bool {
        ["kind-", "k3d-", "minikube"]
            .iter()
            .any(|prefix| kube_context.starts_with(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = AbsFilePath::try_from(dir.path().join("config")).unwrap();
        let config = GlobalConfig::load(&path).unwrap();
        assert!(config.contexts.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = AbsFilePath::try_from(dir.path().join("config")).unwrap();
        let mut config = GlobalConfig::default();
        config.contexts.insert(
            "kind-dev".into(),
            ContextConfig {
                default_repository: Some("localhost:5000".into()),
                local_cluster: true,
            },
        );
        config.save(&path).unwrap();
        let reloaded = GlobalConfig::load(&path).unwrap();
        assert_eq!(
            reloaded.contexts["kind-dev"].default_repository.as_deref(),
            Some("localhost:5000")
        );
    }

    #[test]
    fn kind_and_k3d_contexts_are_local() {
        assert!(GlobalConfig::is_local_cluster("kind-devloop"));
        assert!(GlobalConfig::is_local_cluster("k3d-devloop"));
        assert!(GlobalConfig::is_local_cluster("minikube"));
        assert!(!GlobalConfig::is_local_cluster("gke_my-project_us-east1_prod"));
    }
}
