//! Pipeline description: the `devloop.yaml` schema, parsed with the defaults
//! from `spec.md` §6.

use serde::{Deserialize, Serialize};

use crate::artifact::{Artifact, validate_dag};
use crate::deploy::Deployer;
use crate::portforward::ForwardKey;
use crate::tag::Tagger;

/// Top-level pipeline description, matching the keys enumerated in
/// `spec.md` §6: `apiVersion`, `kind`, `build`, `test`, `deploy`,
/// `portForward`, `profiles`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub build: BuildSpec,
    #[serde(default)]
    pub test: Vec<TestSpec>,
    #[serde(default)]
    pub deploy: DeploySpec,
    #[serde(default)]
    pub port_forward: Vec<PortForwardSpec>,
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

fn default_api_version() -> String {
    "devloop/v1".into()
}

fn default_kind() -> String {
    "Pipeline".into()
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BuildSpec {
    #[serde(default)]
    pub tag_policy: Tagger,
    pub artifacts: Vec<Artifact>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestSpec {
    pub image_name: String,
    #[serde(default)]
    pub command: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploySpec {
    pub deployer: Deployer,
}

impl Default for DeploySpec {
    fn default() -> Self {
        Self {
            deployer: Deployer::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortForwardSpec {
    pub resource_name: String,
    pub namespace: Option<String>,
    pub local_port: Option<u16>,
    pub remote_port: u16,
    pub port_name: Option<String>,
}

impl PortForwardSpec {
    pub fn forward_key(&self) -> ForwardKey {
        ForwardKey {
            container_name: self.resource_name.clone(),
            remote_port: self.remote_port,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub patches: Vec<serde_yaml::Value>,
}

impl Pipeline {
    /// Parse a pipeline from YAML, applying the workspace/path/tagger/deployer
    /// defaults from `spec.md` §6 (defaults on the artifact/builder side are
    /// applied by `serde(default)` on those types themselves) and validating
    /// the artifact DAG.
    pub fn parse(yaml: &str) -> color_eyre::Result<Self> {
        let mut pipeline: Pipeline = serde_yaml::from_str(yaml)?;
        for artifact in &mut pipeline.build.artifacts {
            if artifact.workspace.is_none() {
                artifact.workspace = Some(crate::path::AbsDirPath::current()?);
            }
        }
        validate_dag(&pipeline.build.artifacts)?;
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_pipeline_with_defaults() {
        let yaml = r#"
build:
  artifacts:
    - name: app
      builder:
        kind: dockerfile
"#;
        let pipeline = Pipeline::parse(yaml).unwrap();
        assert_eq!(pipeline.api_version, "devloop/v1");
        assert_eq!(pipeline.build.artifacts.len(), 1);
        assert_eq!(pipeline.build.artifacts[0].name, "app");
    }

    #[test]
    fn rejects_cyclic_artifact_graph() {
        let yaml = r#"
build:
  artifacts:
    - name: a
      builder: {kind: dockerfile}
      requires: [b]
    - name: b
      builder: {kind: dockerfile}
      requires: [a]
"#;
        assert!(Pipeline::parse(yaml).is_err());
    }
}
