//! The File Watcher & Trigger: a per-artifact dependency registry rescanned
//! on trigger signals from one of four tagged trigger kinds, per `spec.md`
//! §4.4.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use color_eyre::{Result, eyre::Context};
use notify::RecursiveMode;
use notify_debouncer_mini::{DebounceEventResult, new_debouncer};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::changeset::ChangeSet;
use crate::fingerprint::Fingerprinter;

/// A source of "something changed, rescan" signals.
pub enum Trigger {
    /// Fixed-interval polling; the caller's debounce() is meaningful here.
    Polling { interval: Duration },
    /// OS-level file events via `notify`, coalesced by `notify-debouncer-mini`
    /// itself — no outer debounce needed, per `spec.md` §4.4.
    FilesystemNotify { workspace: PathBuf, interval: Duration },
    /// One trigger per keypress on stdin.
    Manual,
    /// Consumes from an externally supplied channel.
    Api { receiver: mpsc::Receiver<()> },
}

impl Trigger {
    /// Start the trigger, returning a channel that yields `()` once per
    /// debounced "something changed" signal.
    pub fn start(self) -> Result<mpsc::Receiver<()>> {
        match self {
            Trigger::Polling { interval } => {
                let (tx, rx) = mpsc::channel(1);
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(interval);
                    loop {
                        ticker.tick().await;
                        if tx.send(()).await.is_err() {
                            break;
                        }
                    }
                });
                Ok(rx)
            }
            Trigger::FilesystemNotify { workspace, interval } => {
                let (tx, rx) = mpsc::channel(1);
                let (notify_tx, mut notify_rx) = tokio::sync::mpsc::unbounded_channel();
                let mut debouncer = new_debouncer(interval, move |res: DebounceEventResult| {
                    if res.is_ok() {
                        let _ = notify_tx.send(());
                    }
                })
                .context("create filesystem debouncer")?;
                debouncer
                    .watcher()
                    .watch(&workspace, RecursiveMode::Recursive)
                    .context("watch workspace")?;
                tokio::spawn(async move {
                    // Keep the debouncer alive for the task's lifetime.
                    let _debouncer = debouncer;
                    while notify_rx.recv().await.is_some() {
                        if tx.send(()).await.is_err() {
                            break;
                        }
                    }
                });
                Ok(rx)
            }
            Trigger::Manual => {
                let (tx, rx) = mpsc::channel(1);
                tokio::spawn(async move {
                    let mut stdin = BufReader::new(tokio::io::stdin());
                    let mut buf = [0u8; 1];
                    loop {
                        match tokio::io::AsyncReadExt::read(&mut stdin, &mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(_) => {
                                if tx.send(()).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
                Ok(rx)
            }
            Trigger::Api { receiver } => Ok(receiver),
        }
    }
}

/// Per-artifact `(workspace-relative deps, fingerprint-at-last-scan)` registry,
/// rescanned on every trigger to build the per-iteration [`ChangeSet`].
pub struct Watcher {
    last_fingerprints: HashMap<String, String>,
    deploy_dependency_fingerprint: Option<String>,
}

impl Watcher {
    pub fn new() -> Self {
        Self {
            last_fingerprints: HashMap::new(),
            deploy_dependency_fingerprint: None,
        }
    }

    /// Rescan every artifact's dependency set, comparing against the
    /// fingerprint recorded at the last scan. Artifacts whose fingerprint
    /// changed are marked for rebuild (hot-sync eligibility is layered on top
    /// by the caller via `src/sync.rs`'s `SyncRule`s).
    #[instrument(skip(self, fingerprinter))]
    pub async fn rescan(&mut self, names: &[String], fingerprinter: &Fingerprinter<'_>) -> Result<ChangeSet> {
        let mut changes = ChangeSet::default();
        for name in names {
            let fingerprint = fingerprinter.fingerprint(name).await?;
            match self.last_fingerprints.get(name) {
                Some(prev) if *prev == fingerprint => {}
                Some(_) => {
                    debug!(artifact = %name, "fingerprint changed; marking for rebuild");
                    changes.mark_rebuild(name.clone());
                }
                None => {
                    // First scan: establish the baseline without triggering a
                    // rebuild (there's nothing to compare against yet).
                }
            }
            self.last_fingerprints.insert(name.clone(), fingerprint);
        }
        Ok(changes)
    }

    /// Track deploy-time dependencies (manifests, values files) separately
    /// from build artifacts, per `spec.md` §4.4.
    pub fn check_deploy_dependencies(&mut self, current_fingerprint: &str) -> bool {
        let changed = self
            .deploy_dependency_fingerprint
            .as_deref()
            .is_some_and(|prev| prev != current_fingerprint);
        self.deploy_dependency_fingerprint = Some(current_fingerprint.to_string());
        changed
    }
}

impl Default for Watcher {
    fn default() -> Self {
        Self::new()
    }
}
