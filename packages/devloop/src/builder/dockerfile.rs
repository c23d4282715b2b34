//! The Dockerfile builder: the one fully-implemented backend.
//!
//! Dependency discovery is a plain-text walk of `COPY`/`ADD` instructions,
//! matching the contract in `spec.md` §4.1(b) ("a Dockerfile dependency
//! walker... a pure function from workspace + config"). It does not evaluate
//! build stages or `ARG`-substituted paths; unparseable lines are skipped
//! rather than erroring, consistent with the fingerprinter's "fail open"
//! philosophy for optional inputs.

use std::process::Stdio;

use color_eyre::{Result, eyre::Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::Sender;
use tracing::{info, instrument, warn};

use super::{BuildContext, DockerfileParams};
use crate::path::{AbsDirPath, JoinWith, RelFilePath};

/// Walk the Dockerfile at `params.path` for `COPY`/`ADD` sources, returning
/// paths relative to `workspace`. Missing Dockerfile is an empty list, not an
/// error — the caller surfaces that separately via `FingerprintConfigError`.
#[instrument(skip(params))]
pub fn dependency_files(
    workspace: &AbsDirPath,
    params: &DockerfileParams,
) -> Result<Vec<RelFilePath>> {
    let dockerfile_rel = RelFilePath::try_from(params.path.as_str())
        .with_context(|| format!("dockerfile path is not relative: {}", params.path))?;
    let dockerfile_abs = workspace.join(&dockerfile_rel);

    let Ok(contents) = std::fs::read_to_string(dockerfile_abs.as_std_path()) else {
        warn!(path = %dockerfile_abs, "dockerfile not found; no dependency files discovered");
        return Ok(vec![dockerfile_rel]);
    };

    let mut deps = vec![dockerfile_rel];
    for line in contents.lines() {
        let line = line.trim();
        let Some(rest) = line
            .strip_prefix("COPY ")
            .or_else(|| line.strip_prefix("ADD "))
        else {
            continue;
        };

        // Skip multi-stage `--from=` copies; those reference a prior build
        // stage, not the local workspace.
        if rest.trim_start().starts_with("--from=") {
            continue;
        }

        let tokens: Vec<&str> = rest.split_whitespace().collect();
        // Last token is the destination; everything before it is sources.
        for source in tokens.iter().rev().skip(1).rev() {
            if source.starts_with('-') {
                continue;
            }
            match RelFilePath::try_from(*source) {
                Ok(path) => deps.push(path),
                Err(_) => warn!(source, "couldn't parse COPY/ADD source as relative path"),
            }
        }
    }

    Ok(deps)
}

/// Shell out to `docker build`, tagging the result with `ctx.tag`.
///
/// Matches how the rest of this corpus drives containers: a thin
/// `tokio::process::Command` wrapper rather than linking against the daemon's
/// API directly.
#[instrument(skip(ctx, params, lines), fields(image = %ctx.image_name, tag = %ctx.tag))]
pub async fn build(ctx: &BuildContext, params: &DockerfileParams, lines: Sender<String>) -> Result<String> {
    let dockerfile = ctx.workspace.join(&mk_rel_file_checked(&params.path)?);
    let tagged = format!("{}:{}", ctx.image_name, ctx.tag);

    let mut cmd = Command::new("docker");
    cmd.arg("build")
        .arg("-f")
        .arg(dockerfile.as_std_path())
        .arg("-t")
        .arg(&tagged);

    if let Some(target) = &params.target {
        cmd.arg("--target").arg(target);
    }
    for (key, value) in &params.build_args {
        cmd.arg("--build-arg").arg(format!("{key}={value}"));
    }
    for secret in &params.secrets {
        cmd.arg("--secret").arg(secret);
    }
    for ssh in &params.ssh {
        cmd.arg("--ssh").arg(ssh);
    }
    for cache_from in &params.cache_from {
        cmd.arg("--cache-from").arg(cache_from);
    }
    cmd.arg(ctx.workspace.as_std_path());
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    info!(command = ?cmd.as_std(), "running docker build");
    let mut child = cmd.kill_on_drop(true).spawn().context("spawn docker build")?;

    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");
    let out_lines = lines.clone();
    let stdout_task = tokio::spawn(forward_lines(stdout, out_lines));
    let stderr_task = tokio::spawn(forward_lines(stderr, lines));

    let status = child.wait().await.context("wait for docker build")?;
    stdout_task.await.ok();
    stderr_task.await.ok();

    if !status.success() {
        color_eyre::eyre::bail!(
            "docker build failed for {}: exit status {status}",
            ctx.image_name,
        );
    }

    Ok(tagged)
}

async fn forward_lines(reader: impl tokio::io::AsyncRead + Unpin, sender: Sender<String>) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if sender.send(line).await.is_err() {
            break;
        }
    }
}

fn mk_rel_file_checked(path: &str) -> Result<RelFilePath> {
    RelFilePath::try_from(path).with_context(|| format!("dockerfile path not relative: {path}"))
}
