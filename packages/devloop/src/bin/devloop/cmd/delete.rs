use std::path::PathBuf;
use std::process::Stdio;

use clap::Args;
use color_eyre::{Result, eyre::Context};
use devloop::pipeline::Pipeline;
use tokio::process::Command;
use tracing::info;

#[derive(Clone, Debug, Args)]
pub struct Opts {
    /// Path to the pipeline description
    #[arg(long, default_value = "devloop.yaml")]
    pub file: PathBuf,

    /// Delete only resources labelled with this run id rather than everything
    /// matched by the pipeline's manifest globs
    #[arg(long)]
    pub run_id: Option<String>,
}

pub async fn exec(opts: Opts) -> Result<()> {
    if let Some(run_id) = &opts.run_id {
        return delete_by_label(run_id).await;
    }

    let yaml = std::fs::read_to_string(&opts.file)
        .with_context(|| format!("read pipeline: {}", opts.file.display()))?;
    let pipeline = Pipeline::parse(&yaml)?;
    let devloop::deploy::Deployer::Kubectl { manifest_globs } = &pipeline.deploy.deployer;
    let workspace = devloop::path::AbsDirPath::current()?;

    for pattern in manifest_globs {
        let full_pattern = workspace.as_std_path().join(pattern);
        for entry in glob::glob(&full_pattern.to_string_lossy()).context("expand manifest glob")? {
            let path = entry.context("read glob entry")?;
            delete_manifest(&path).await?;
        }
    }
    Ok(())
}

async fn delete_manifest(path: &std::path::Path) -> Result<()> {
    info!(path = %path.display(), "deleting manifest");
    let status = Command::new("kubectl")
        .args(["delete", "-f"])
        .arg(path)
        .arg("--ignore-not-found")
        .status()
        .await
        .context("spawn kubectl delete")?;
    if !status.success() {
        color_eyre::eyre::bail!("kubectl delete failed for {}: {status}", path.display());
    }
    Ok(())
}

async fn delete_by_label(run_id: &str) -> Result<()> {
    info!(%run_id, "deleting resources by run id");
    let output = Command::new("kubectl")
        .args(["delete", "all", "-l"])
        .arg(format!("devloop.dev/run-id={run_id}"))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("spawn kubectl delete")?;
    if !output.status.success() {
        color_eyre::eyre::bail!(
            "kubectl delete failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}
