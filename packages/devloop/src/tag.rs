//! Image tagging: the `Tagger` strategies that turn an artifact's image name
//! into a fully-qualified reference, and the build-arg template evaluator
//! shared with the fingerprinter.

use std::collections::BTreeMap;

use color_eyre::{Result, eyre::Context};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// A mapping from image name to a fully-qualified reference, produced by a
/// [`Tagger`] and consumed by build and deploy.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ImageTag {
    pub image_name: String,
    pub reference: String,
}

/// Tagging strategy selected per pipeline (or per-artifact override).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "camelCase")]
pub enum Tagger {
    DateTime { format: Option<String> },
    GitCommit { variant: Option<GitCommitVariant> },
    ContentSha,
    EnvTemplate { template: String },
    Custom { command: String },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GitCommitVariant {
    Full,
    AbbrevLen7,
    Tags,
}

impl Default for Tagger {
    fn default() -> Self {
        Tagger::GitCommit { variant: None }
    }
}

impl Tagger {
    /// Resolve a concrete tag (not the full reference — just the `:tag` part)
    /// for `image_name`, given its current fingerprint for the content-sha
    /// strategy.
    pub async fn resolve(&self, image_name: &str, fingerprint: &str) -> Result<String> {
        match self {
            Tagger::DateTime { format } => {
                let fmt = format.as_deref().unwrap_or("%Y-%m-%dT%H-%M-%S");
                Ok(jiff::Zoned::now().strftime(fmt).to_string())
            }
            Tagger::GitCommit { variant } => git_commit_tag(*variant).await,
            Tagger::ContentSha => Ok(fingerprint[..12.min(fingerprint.len())].to_string()),
            Tagger::EnvTemplate { template } => Ok(expand_env_template(template)),
            Tagger::Custom { command } => run_custom_tagger(command, image_name).await,
        }
    }
}

async fn git_commit_tag(variant: Option<GitCommitVariant>) -> Result<String> {
    let mut cmd = Command::new("git");
    cmd.args(["rev-parse"]);
    match variant {
        Some(GitCommitVariant::AbbrevLen7) => {
            cmd.arg("--short=7");
        }
        Some(GitCommitVariant::Tags) => {
            return describe_tags().await;
        }
        _ => {}
    }
    cmd.arg("HEAD");
    let output = cmd.output().await.context("run git rev-parse")?;
    if !output.status.success() {
        color_eyre::eyre::bail!("git rev-parse HEAD failed: {}", output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

async fn describe_tags() -> Result<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always"])
        .output()
        .await
        .context("run git describe")?;
    if !output.status.success() {
        color_eyre::eyre::bail!("git describe failed: {}", output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

async fn run_custom_tagger(command: &str, image_name: &str) -> Result<String> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .env("IMAGE_NAME", image_name)
        .output()
        .await
        .with_context(|| format!("run custom tagger: {command}"))?;
    if !output.status.success() {
        color_eyre::eyre::bail!("custom tagger failed: {}", output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn expand_env_template(template: &str) -> String {
    let mut out = template.to_string();
    for (key, value) in std::env::vars() {
        out = out.replace(&format!("{{{{.{key}}}}}"), &value);
    }
    out
}

/// The closed set of template tokens recognised when evaluating build-args,
/// per `spec.md` §4.1(d).
#[derive(Clone, Debug, Default)]
pub struct BuildArgEnv {
    pub image_name: String,
    pub digest: Option<String>,
    pub digest_algo: Option<String>,
    pub digest_hex: Option<String>,
}

impl BuildArgEnv {
    /// Evaluate `build_args` against this environment, returning the sorted
    /// `key=value` strings fed into the fingerprint.
    pub fn evaluate_sorted(&self, build_args: &[(String, String)]) -> Vec<String> {
        let mut map = BTreeMap::new();
        for (key, value) in build_args {
            map.insert(key.clone(), self.substitute(value));
        }
        map.into_iter().map(|(k, v)| format!("{k}={v}")).collect()
    }

    fn substitute(&self, value: &str) -> String {
        let mut out = value.to_string();
        out = out.replace("{{.IMAGE_NAME}}", &self.image_name);
        if let Some(digest) = &self.digest {
            out = out.replace("{{.DIGEST}}", digest);
        }
        if let Some(algo) = &self.digest_algo {
            out = out.replace("{{.DIGEST_ALGO}}", algo);
        }
        if let Some(hex) = &self.digest_hex {
            out = out.replace("{{.DIGEST_HEX}}", hex);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_args_are_sorted_and_substituted() {
        let env = BuildArgEnv {
            image_name: "registry.example/app".into(),
            digest: Some("abc123".into()),
            ..Default::default()
        };
        let args = vec![
            ("B_ARG".to_string(), "static".to_string()),
            ("A_ARG".to_string(), "{{.IMAGE_NAME}}@{{.DIGEST}}".to_string()),
        ];
        let evaluated = env.evaluate_sorted(&args);
        assert_eq!(
            evaluated,
            vec![
                "A_ARG=registry.example/app@abc123".to_string(),
                "B_ARG=static".to_string(),
            ]
        );
    }
}
