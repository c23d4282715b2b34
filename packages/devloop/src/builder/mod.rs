//! Builder kinds: a closed tagged union over the back-ends that can produce an
//! artifact's image, exhaustively matched by the dispatcher.
//!
//! Only the [`dockerfile`] backend is fully implemented; the rest are real,
//! constructible parameter records with a [`Builder`] impl that fails with an
//! [`ActionableError::unsupported_builder`] at `build()` time. This keeps the
//! tagged union exhaustive (every variant is a real type, not a TODO) without
//! fabricating vendor SDK integrations — those back-ends are named out of
//! scope in the system's purpose statement.

pub mod dockerfile;

use std::fmt;

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ActionableError;
use crate::path::{AbsDirPath, RelFilePath};
use crate::tag::BuildArgEnv;

/// Per-builder parameters and behavior for one artifact.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BuilderKind {
    Dockerfile(DockerfileParams),
    BazelTarget(BazelParams),
    JibMaven(JibMavenParams),
    JibGradle(JibGradleParams),
    Buildpack(BuildpackParams),
    CustomScript(CustomScriptParams),
    Kaniko(KanikoParams),
}

impl BuilderKind {
    pub fn name(&self) -> &'static str {
        match self {
            BuilderKind::Dockerfile(_) => "dockerfile",
            BuilderKind::BazelTarget(_) => "bazel-target",
            BuilderKind::JibMaven(_) => "jib-maven",
            BuilderKind::JibGradle(_) => "jib-gradle",
            BuilderKind::Buildpack(_) => "buildpack",
            BuilderKind::CustomScript(_) => "custom-script",
            BuilderKind::Kaniko(_) => "kaniko",
        }
    }

    /// Stable JSON config blob fed into the fingerprint, per `spec.md` §4.1(a).
    pub fn config_blob(&self) -> Result<Value> {
        let value = match self {
            BuilderKind::Dockerfile(p) => serde_json::to_value(p),
            BuilderKind::BazelTarget(p) => serde_json::to_value(p),
            BuilderKind::JibMaven(p) => serde_json::to_value(p),
            BuilderKind::JibGradle(p) => serde_json::to_value(p),
            BuilderKind::Buildpack(p) => serde_json::to_value(p),
            BuilderKind::CustomScript(p) => serde_json::to_value(p),
            BuilderKind::Kaniko(p) => serde_json::to_value(p),
        }?;
        Ok(value)
    }

    /// The dependency file list the fingerprinter hashes, relative to `workspace`.
    pub fn dependency_files(&self, workspace: &AbsDirPath) -> Result<Vec<RelFilePath>> {
        match self {
            BuilderKind::Dockerfile(p) => dockerfile::dependency_files(workspace, p),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn build(
        &self,
        ctx: &BuildContext,
        lines: tokio::sync::mpsc::Sender<String>,
    ) -> Result<String> {
        match self {
            BuilderKind::Dockerfile(p) => dockerfile::build(ctx, p, lines).await,
            other => Err(ActionableError::unsupported_builder(other.name()).into()),
        }
    }
}

/// Everything a builder needs to produce one image, independent of kind.
#[derive(Clone, Debug)]
pub struct BuildContext {
    pub image_name: String,
    pub tag: String,
    pub workspace: AbsDirPath,
    pub build_args: BuildArgEnv,
}

/// Parameters for the Dockerfile builder, the only fully-implemented backend.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DockerfileParams {
    #[serde(default = "default_dockerfile_path")]
    pub path: String,
    pub target: Option<String>,
    #[serde(default)]
    pub build_args: Vec<(String, String)>,
    #[serde(default)]
    pub secrets: Vec<String>,
    #[serde(default)]
    pub ssh: Vec<String>,
    #[serde(default)]
    pub cache_from: Vec<String>,
}

fn default_dockerfile_path() -> String {
    "Dockerfile".into()
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BazelParams {
    pub target: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JibMavenParams {
    pub project: Option<String>,
    pub profile: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JibGradleParams {
    pub project: Option<String>,
    pub module: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BuildpackParams {
    pub builder: String,
    #[serde(default)]
    pub buildpacks: Vec<String>,
    #[serde(default)]
    pub trusted: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CustomScriptParams {
    pub command: String,
    pub dependencies_command: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KanikoParams {
    pub context: String,
    pub cache_repo: Option<String>,
    #[serde(default)]
    pub flags: Vec<String>,
}

impl fmt::Display for BuilderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
