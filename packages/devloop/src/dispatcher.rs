//! The Build Dispatcher: concurrent per-artifact builders with strictly
//! in-order log streaming, per `spec.md` §4.3.
//!
//! Each artifact gets a bounded `tokio::sync::mpsc` channel
//! ([`DEFAULT_LINE_CAPACITY`] lines); a builder task writes to its channel as
//! it produces output, while a single consumer task drains the channels in
//! *artifact-list order*, not completion order. This guarantees artifact `i`'s
//! output is contiguous and precedes artifact `i+1`'s regardless of which
//! finishes first.

use std::sync::Arc;

use color_eyre::Result;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::artifact::{Artifact, BuildResult};
use crate::builder::BuildContext;
use crate::event::{BuildStatus, Event, EventBus};
use crate::tag::BuildArgEnv;

/// Default per-artifact output channel capacity, per `spec.md` §4.3.
pub const DEFAULT_LINE_CAPACITY: usize = 10_000;

/// A line of builder output, tagged with its source artifact so the ordered
/// consumer can attribute it even though lines arrive out of order across
/// channels.
struct BuildTask {
    artifact: String,
    rx: mpsc::Receiver<String>,
    handle: tokio::task::JoinHandle<Result<String>>,
}

/// Build every artifact in `artifacts`, returning [`BuildResult`]s in the same
/// order as the input. Output lines are forwarded to `on_line` as they arrive,
/// in artifact-list order.
///
/// The first builder error cancels every other in-flight builder via
/// `cancel` and short-circuits with that error, annotated with the failing
/// image name — no partial result set is ever returned.
#[instrument(skip(artifacts, tag_for, bus, cancel, on_line))]
pub async fn dispatch(
    artifacts: &[Artifact],
    tag_for: impl Fn(&str) -> (String, BuildArgEnv) + Send + Sync,
    bus: &EventBus,
    cancel: CancellationToken,
    mut on_line: impl FnMut(&str, String),
) -> Result<Vec<BuildResult>> {
    if artifacts.is_empty() {
        return Ok(Vec::new());
    }

    let parallelism = artifacts.len().min(num_cpus::get());
    let semaphore = Arc::new(Semaphore::new(parallelism));
    let local_cancel = cancel.child_token();

    let mut tasks = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let (tx, rx) = mpsc::channel(DEFAULT_LINE_CAPACITY);
        let (tag, build_args) = tag_for(&artifact.name);
        let ctx = BuildContext {
            image_name: artifact.name.clone(),
            tag,
            workspace: artifact
                .workspace
                .clone()
                .ok_or_else(|| color_eyre::eyre::eyre!("artifact {} has no workspace", artifact.name))?,
            build_args,
        };
        let builder = artifact.builder.clone();
        let name = artifact.name.clone();
        let semaphore = semaphore.clone();
        let cancel = local_cancel.clone();
        let bus = bus.clone();

        bus.publish(Event::Build {
            artifact: name.clone(),
            status: BuildStatus::InProgress,
            err: None,
        });

        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    Err(color_eyre::eyre::eyre!("build of {name} cancelled"))
                }
                result = builder.build(&ctx, tx) => result,
            }
        });

        tasks.push(BuildTask {
            artifact: artifact.name.clone(),
            rx,
            handle,
        });
    }

    let mut results = Vec::with_capacity(tasks.len());
    let mut first_error: Option<color_eyre::Report> = None;

    for mut task in tasks {
        while let Some(line) = task.rx.recv().await {
            on_line(&task.artifact, line);
        }

        match task.handle.await {
            Ok(Ok(tag)) if first_error.is_none() => {
                info!(artifact = %task.artifact, %tag, "build complete");
                bus.publish(Event::Build {
                    artifact: task.artifact.clone(),
                    status: BuildStatus::Complete,
                    err: None,
                });
                results.push(BuildResult {
                    image_name: task.artifact,
                    tag,
                    local_only: false,
                });
            }
            Ok(Ok(_)) => {
                // A sibling already failed; we still drain this builder's
                // output above, but its result is moot.
            }
            Ok(Err(err)) => {
                warn!(artifact = %task.artifact, %err, "build failed");
                bus.publish(Event::Build {
                    artifact: task.artifact.clone(),
                    status: BuildStatus::Failed,
                    err: None,
                });
                if first_error.is_none() {
                    local_cancel.cancel();
                    first_error = Some(err.wrap_err(format!("build failed for {}", task.artifact)));
                }
            }
            Err(join_err) => {
                if first_error.is_none() {
                    local_cancel.cancel();
                    first_error =
                        Some(color_eyre::eyre::eyre!(join_err).wrap_err(format!(
                            "build task panicked for {}",
                            task.artifact
                        )));
                }
            }
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }

    Ok(results)
}
