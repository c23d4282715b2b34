//! The Deploy Coordinator: applies rewritten manifests to the cluster and
//! reports the affected namespaces, per `spec.md` §4.5.
//!
//! Matches how the rest of this corpus drives cluster-facing tools: a thin
//! `tokio::process::Command` wrapper around `kubectl apply -f -` rather than
//! hand-rolling server-side-apply against the Kubernetes API directly.

use std::collections::{BTreeMap, BTreeSet};
use std::process::Stdio;

use color_eyre::{Result, eyre::Context};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, instrument};

use crate::artifact::BuildResult;
use crate::manifest::{RewriteReport, parse_documents, rewrite_images};

/// Deploy backend selection, per the pipeline's `deploy` key (`spec.md` §6).
/// Only `Kubectl` is fully implemented; `Helm`/`Kustomize` are documented
/// extension points, per §1's scope note.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Deployer {
    Kubectl {
        #[serde(rename = "manifestGlobs")]
        manifest_globs: Vec<String>,
    },
}

impl Default for Deployer {
    fn default() -> Self {
        Deployer::Kubectl {
            manifest_globs: vec!["k8s/*.yaml".into()],
        }
    }
}

/// Result of one deploy: the namespaces touched, passed to the Status Monitor.
#[derive(Debug, Default)]
pub struct DeployOutcome {
    pub namespaces: BTreeSet<String>,
    pub warnings: Vec<String>,
}

#[instrument(skip(deployer, workspace, built, user_labels))]
pub async fn deploy(
    deployer: &Deployer,
    workspace: &crate::path::AbsDirPath,
    built: &[BuildResult],
    run_id: &str,
    user_labels: &BTreeMap<String, String>,
) -> Result<DeployOutcome> {
    let Deployer::Kubectl { manifest_globs } = deployer;

    let mut docs = Vec::new();
    for pattern in manifest_globs {
        let full_pattern = workspace.as_std_path().join(pattern);
        for entry in glob::glob(&full_pattern.to_string_lossy()).context("expand manifest glob")? {
            let path = entry.context("read glob entry")?;
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("read manifest: {}", path.display()))?;
            docs.extend(parse_documents(&contents)?);
        }
    }

    let RewriteReport { warnings } =
        rewrite_images(&mut docs, built, run_id, "kubectl", user_labels)?;

    let namespaces = docs
        .iter()
        .filter_map(|doc| doc["metadata"]["namespace"].as_str().map(str::to_string))
        .collect::<BTreeSet<_>>();

    apply(&docs).await?;

    Ok(DeployOutcome { namespaces, warnings })
}

async fn apply(docs: &[Value]) -> Result<()> {
    let yaml = docs
        .iter()
        .map(|doc| serde_yaml::to_string(doc).context("serialize manifest document"))
        .collect::<Result<Vec<_>>>()?
        .join("---\n");

    let mut child = Command::new("kubectl")
        .args(["apply", "-f", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("spawn kubectl apply")?;

    let mut stdin = child.stdin.take().expect("piped stdin");
    stdin.write_all(yaml.as_bytes()).await.context("write manifest to kubectl")?;
    drop(stdin);

    let output = child.wait_with_output().await.context("wait for kubectl apply")?;
    if !output.status.success() {
        color_eyre::eyre::bail!(
            "kubectl apply failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    info!("kubectl apply succeeded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_deployer_is_kubectl_with_k8s_glob() {
        let Deployer::Kubectl { manifest_globs } = Deployer::default();
        assert_eq!(manifest_globs, vec!["k8s/*.yaml".to_string()]);
    }
}
