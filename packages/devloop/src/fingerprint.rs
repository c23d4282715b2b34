//! Content-addressed fingerprinting of artifact build inputs.
//!
//! `hash(artifact)` is deterministic, idempotent, and order-insensitive over
//! `requires` edges (`spec.md` §4.1). A per-image-name single-flight memoiser
//! (`spec.md` §5(iv)) coalesces concurrent hashers of the same artifact within
//! one dev-loop iteration.

use std::collections::HashMap;
use std::sync::Arc;

use color_eyre::Result;
use dashmap::DashMap;
use derive_more::Display;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{instrument, trace, warn};

use crate::artifact::Artifact;
use crate::builder::BuilderKind;
use crate::path::JoinWith;
use crate::tag::BuildArgEnv;

/// Errors surfaced by the fingerprinter, distinct from the wire [`crate::error::StatusCode`]
/// taxonomy used for cluster status.
#[derive(Debug, Display)]
pub enum FingerprintError {
    #[display("fingerprint config error for {_0}: {_1}")]
    Config(String, String),
    #[display("fingerprint dependency list error for {_0}: {_1}")]
    DepList(String, String),
    #[display("artifact cycle detected while fingerprinting: {_0}")]
    Cycle(String),
}

impl std::error::Error for FingerprintError {}

/// Computes and memoises fingerprints across one set of artifacts.
pub struct Fingerprinter<'a> {
    artifacts: &'a HashMap<String, Artifact>,
    memo: DashMap<String, Arc<OnceCell<String>>>,
}

impl<'a> Fingerprinter<'a> {
    pub fn new(artifacts: &'a HashMap<String, Artifact>) -> Self {
        Self {
            artifacts,
            memo: DashMap::new(),
        }
    }

    /// Compute (or return the in-flight/cached computation of) the
    /// fingerprint for the artifact named `name`.
    #[instrument(skip(self))]
    pub async fn fingerprint(&self, name: &str) -> Result<String> {
        self.fingerprint_inner(name, Vec::new()).await
    }

    fn fingerprint_inner<'b>(
        &'b self,
        name: &'b str,
        stack: Vec<String>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String>> + 'b>> {
        Box::pin(async move {
            if stack.iter().any(|s| s == name) {
                let mut path = stack.clone();
                path.push(name.to_string());
                return Err(FingerprintError::Cycle(path.join(" -> ")).into());
            }

            let cell = self
                .memo
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone();

            let mut child_stack = stack;
            child_stack.push(name.to_string());

            // `OnceCell::get_or_try_init` only runs the initializer once;
            // concurrent callers for the same artifact await the same future's
            // result, and a failed attempt leaves the cell uninitialized so a
            // later call can retry.
            let fp = cell
                .get_or_try_init(|| self.compute(name, child_stack))
                .await?
                .clone();
            Ok(fp)
        })
    }

    async fn compute(&self, name: &str, stack: Vec<String>) -> Result<String> {
        let artifact = self
            .artifacts
            .get(name)
            .ok_or_else(|| FingerprintError::Config(name.to_string(), "unknown artifact".into()))?;

        let workspace = artifact.workspace.as_ref().ok_or_else(|| {
            FingerprintError::Config(name.to_string(), "artifact has no workspace set".into())
        })?;

        let config_blob = artifact
            .builder
            .config_blob()
            .map_err(|e| FingerprintError::Config(name.to_string(), e.to_string()))?;

        let mut dep_files = artifact
            .builder
            .dependency_files(workspace)
            .map_err(|e| FingerprintError::DepList(name.to_string(), e.to_string()))?;
        dep_files.sort_by(|a, b| a.as_str_lossy().cmp(&b.as_str_lossy()));

        let mut file_hashes = Vec::with_capacity(dep_files.len());
        for rel in &dep_files {
            let abs = workspace.join(rel);
            match hash_one_file(&abs, &rel.as_str_lossy()) {
                Some(hash) => file_hashes.push(hash),
                None => trace!(path = %abs, "dependency file missing; skipped"),
            }
        }

        let build_args = build_args_of(&artifact.builder);
        let env = BuildArgEnv {
            image_name: artifact.name.clone(),
            ..Default::default()
        };
        let evaluated_args = env.evaluate_sorted(build_args);

        let mut requires_sorted = artifact.requires.clone();
        requires_sorted.sort();
        let mut required_fingerprints = Vec::with_capacity(requires_sorted.len());
        for dep in &requires_sorted {
            required_fingerprints.push(self.fingerprint_inner(dep, stack.clone()).await?);
        }

        let composite = serde_json::json!([
            config_blob,
            file_hashes,
            evaluated_args,
            required_fingerprints,
        ]);
        let bytes = serde_json::to_vec(&composite)
            .map_err(|e| FingerprintError::Config(name.to_string(), e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}

fn build_args_of(builder: &BuilderKind) -> &[(String, String)] {
    match builder {
        BuilderKind::Dockerfile(p) => &p.build_args,
        _ => &[],
    }
}

/// MD5 over `mode || name || bytes`. Returns `None` for missing or non-regular
/// files — deliberately silent, per `spec.md` §9's open question (preserved
/// behaviour, not a latent bug we should "fix").
fn hash_one_file(abs: &crate::path::AbsFilePath, rel_name: &str) -> Option<String> {
    use md5::{Digest as Md5Digest, Md5};

    let metadata = std::fs::symlink_metadata(abs.as_std_path()).ok()?;
    if !metadata.is_file() {
        return None;
    }
    let bytes = std::fs::read(abs.as_std_path()).ok()?;

    let mode: u8 = if is_executable(&metadata) { 1 } else { 0 };

    let mut hasher = Md5::new();
    hasher.update([mode]);
    hasher.update(rel_name.as_bytes());
    hasher.update(&bytes);
    Some(hex::encode(hasher.finalize()))
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BuilderKind, DockerfileParams};
    use crate::path::AbsDirPath;

    fn artifact_map(dir: &std::path::Path) -> HashMap<String, Artifact> {
        let workspace = AbsDirPath::try_from(dir).unwrap();
        let mut map = HashMap::new();
        map.insert(
            "a".to_string(),
            Artifact {
                name: "a".into(),
                workspace: Some(workspace.clone()),
                builder: BuilderKind::Dockerfile(DockerfileParams {
                    path: "Dockerfile".into(),
                    ..Default::default()
                }),
                requires: vec!["b".into()],
            },
        );
        map.insert(
            "b".to_string(),
            Artifact {
                name: "b".into(),
                workspace: Some(workspace),
                builder: BuilderKind::Dockerfile(DockerfileParams {
                    path: "Dockerfile.b".into(),
                    ..Default::default()
                }),
                requires: vec![],
            },
        );
        map
    }

    #[tokio::test]
    async fn fingerprint_is_deterministic_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch\nCOPY a.txt /a\n").unwrap();
        std::fs::write(dir.path().join("Dockerfile.b"), "FROM scratch\n").unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();

        let map = artifact_map(dir.path());
        let fp1 = Fingerprinter::new(&map).fingerprint("a").await.unwrap();
        let fp2 = Fingerprinter::new(&map).fingerprint("a").await.unwrap();
        assert_eq!(fp1, fp2);
    }

    #[tokio::test]
    async fn fingerprint_changes_when_dependency_content_changes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch\nCOPY a.txt /a\n").unwrap();
        std::fs::write(dir.path().join("Dockerfile.b"), "FROM scratch\n").unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let map = artifact_map(dir.path());
        let before = Fingerprinter::new(&map).fingerprint("a").await.unwrap();

        std::fs::write(dir.path().join("a.txt"), "goodbye").unwrap();
        let after = Fingerprinter::new(&map).fingerprint("a").await.unwrap();
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn missing_dependency_file_is_skipped_not_errored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Dockerfile"),
            "FROM scratch\nCOPY missing.txt /a\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("Dockerfile.b"), "FROM scratch\n").unwrap();
        let map = artifact_map(dir.path());
        Fingerprinter::new(&map).fingerprint("a").await.unwrap();
    }

    #[tokio::test]
    async fn cyclic_requires_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
        std::fs::write(dir.path().join("Dockerfile.b"), "FROM scratch\n").unwrap();
        let mut map = artifact_map(dir.path());
        map.get_mut("b").unwrap().requires = vec!["a".into()];

        let fp = Fingerprinter::new(&map);
        assert!(fp.fingerprint("a").await.is_err());
    }
}
