//! The Log Aggregator: tails container logs of tracked images, one of the
//! two orthogonal services named in `spec.md` §2.

use std::process::Stdio;

use color_eyre::{Result, eyre::Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// One tracked log tailer, keyed by the pod/container it follows.
pub struct LogTailer {
    pub pod_name: String,
    pub container_name: String,
    cancel: CancellationToken,
}

impl LogTailer {
    /// Spawn `kubectl logs -f` for `pod_name`/`container_name`, forwarding
    /// each line to `on_line` prefixed per the grounding codebase's
    /// `tracing`-oriented logging conventions, until cancelled.
    #[instrument(skip(on_line, cancel))]
    pub async fn run(
        namespace: &str,
        pod_name: &str,
        container_name: &str,
        cancel: CancellationToken,
        mut on_line: impl FnMut(&str),
    ) -> Result<()> {
        let mut child = Command::new("kubectl")
            .args([
                "logs",
                "-f",
                "-n",
                namespace,
                pod_name,
                "-c",
                container_name,
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("spawn kubectl logs")?;

        let stdout = child.stdout.take().expect("piped stdout");
        let mut lines = BufReader::new(stdout).lines();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    child.kill().await.ok();
                    break;
                }
                line = lines.next_line() => {
                    match line.context("read log line")? {
                        Some(line) => on_line(&line),
                        None => break,
                    }
                }
            }
        }

        info!(%pod_name, %container_name, "log tailer stopped");
        Ok(())
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Registry of active tailers, one per tracked image's pod/container, so the
/// Runner can stop them all on shutdown (`spec.md` §4.8's `shutting-down`
/// state: "drains... tails, log streams").
#[derive(Default)]
pub struct LogAggregator {
    tailers: Vec<LogTailer>,
}

impl LogAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, pod_name: String, container_name: String) -> CancellationToken {
        let cancel = CancellationToken::new();
        self.tailers.push(LogTailer {
            pod_name,
            container_name,
            cancel: cancel.clone(),
        });
        cancel
    }

    pub fn stop_all(&self) {
        for tailer in &self.tailers {
            tailer.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracking_returns_a_live_token() {
        let mut aggregator = LogAggregator::new();
        let token = aggregator.track("pod-a".into(), "app".into());
        assert!(!token.is_cancelled());
        aggregator.stop_all();
        assert!(token.is_cancelled());
    }
}
