//! The Port-Forward Coordinator: pod lifecycle-aware local port assignment
//! and subprocess supervision, per `spec.md` §4.7.

use std::collections::HashMap;
use std::net::TcpListener;
use std::process::Stdio;
use std::sync::Mutex;

use color_eyre::{Result, eyre::Context};
use jiff::Timestamp;
use k8s_openapi::api::core::v1::Pod;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{info, instrument, warn};

/// Local port range tried after the requested port is occupied, per
/// `spec.md` §4.7.
const FALLBACK_RANGE: std::ops::RangeInclusive<u16> = 4503..=4533;

/// stderr patterns that indicate a forward has died and must be restarted,
/// per `spec.md` §4.7.
const FATAL_PATTERNS: &[&str] = &[
    "error forwarding port",
    "unable to forward",
    "error upgrading connection",
];

/// Candidate pod ordering preference for service forwarding, per
/// `spec.md` §4.7: "phase preference: Running > Pending > Succeeded > others".
fn phase_rank(phase: Option<&str>) -> u8 {
    match phase {
        Some("Running") => 0,
        Some("Pending") => 1,
        Some("Succeeded") => 2,
        _ => 3,
    }
}

/// Select the pod to forward to from a service's backing pods: sorted by
/// `(phase preference, creation-time descending)`, newest-first among equals.
pub fn select_pod(pods: &[Pod]) -> Option<&Pod> {
    pods.iter().min_by_key(|pod| {
        let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
        let created = pod
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0.timestamp())
            .unwrap_or(0);
        (phase_rank(phase), std::cmp::Reverse(created))
    })
}

/// A `{container, remote-port}` key identifying one logical forward target,
/// used to dedupe reused local ports.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct ForwardKey {
    pub container_name: String,
    pub remote_port: u16,
}

/// Tracks `port -> container` allocations to prevent intra-process
/// collisions, per `spec.md` §5's "port table uses a mutex" rule.
#[derive(Default)]
pub struct PortTable {
    forwarded: Mutex<HashMap<u16, ForwardKey>>,
}

impl PortTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a local port for `key`, preferring `requested`, per the
    /// algorithm in `spec.md` §4.7: reuse if the same key already holds the
    /// requested port, else try `[4503, 4533]`, else fall back to an
    /// OS-assigned port.
    #[instrument(skip(self))]
    pub fn allocate(&self, requested: u16, key: ForwardKey) -> u16 {
        let mut table = self.forwarded.lock().expect("port table mutex poisoned");

        if let Some(existing) = table.get(&requested) {
            if *existing == key {
                return requested;
            }
        }

        if !table.contains_key(&requested) && port_is_free(requested) {
            table.insert(requested, key);
            return requested;
        }

        for candidate in FALLBACK_RANGE {
            if !table.contains_key(&candidate) && port_is_free(candidate) {
                table.insert(candidate, key);
                return candidate;
            }
        }

        let assigned = os_assigned_port();
        table.insert(assigned, key);
        assigned
    }

    pub fn release(&self, port: u16) {
        self.forwarded.lock().expect("port table mutex poisoned").remove(&port);
    }
}

fn port_is_free(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

fn os_assigned_port() -> u16 {
    TcpListener::bind(("127.0.0.1", 0))
        .and_then(|l| l.local_addr())
        .map(|addr| addr.port())
        .unwrap_or(0)
}

/// One supervised `kubectl port-forward` subprocess. Created via
/// [`spawn_forward`]; [`ForwardHandle::watch_for_failure`] resolves when a
/// fatal stderr pattern is seen or the process exits, signalling the caller's
/// retry loop to resurrect it.
pub struct ForwardHandle {
    pub local_port: u16,
    pub pod_name: String,
    pub namespace: String,
    child: Child,
}

#[instrument(skip(namespace, pod_name))]
pub fn spawn_forward(
    namespace: &str,
    pod_name: &str,
    local_port: u16,
    remote_port: u16,
) -> Result<ForwardHandle> {
    let child = Command::new("kubectl")
        .args([
            "port-forward",
            "-n",
            namespace,
            &format!("pod/{pod_name}"),
            &format!("{local_port}:{remote_port}"),
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("spawn kubectl port-forward")?;

    info!(%pod_name, local_port, remote_port, "forwarding container to local port");
    Ok(ForwardHandle {
        local_port,
        pod_name: pod_name.to_string(),
        namespace: namespace.to_string(),
        child,
    })
}

impl ForwardHandle {
    /// Scan stderr for the known fatal patterns; resolves when one matches or
    /// the process exits on its own, at which point the process is killed and
    /// the caller's retry loop should resurrect the forward.
    pub async fn watch_for_failure(mut self) -> Result<()> {
        let Some(stderr) = self.child.stderr.take() else {
            let _ = self.child.wait().await;
            return Ok(());
        };
        let mut lines = BufReader::new(stderr).lines();
        while let Some(line) = lines.next_line().await.context("read port-forward stderr")? {
            if FATAL_PATTERNS.iter().any(|pattern| line.contains(pattern)) {
                warn!(pod = %self.pod_name, %line, "port-forward hit a fatal pattern; restarting");
                self.child.kill().await.ok();
                return Ok(());
            }
        }
        self.child.wait().await.context("wait for port-forward")?;
        Ok(())
    }
}

/// Timestamp helper kept for call sites that need to compare forwarded pods'
/// `resourceVersion`-adjacent recency without importing `jiff` directly.
pub fn now() -> Timestamp {
    Timestamp::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn pod(phase: &str, created_secs: i64) -> Pod {
        Pod {
            metadata: ObjectMeta {
                creation_timestamp: Some(Time(
                    chrono::DateTime::from_timestamp(created_secs, 0).unwrap(),
                )),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.into()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn prefers_running_over_pending() {
        let pods = vec![pod("Pending", 100), pod("Running", 50)];
        let selected = select_pod(&pods).unwrap();
        assert_eq!(selected.status.as_ref().unwrap().phase.as_deref(), Some("Running"));
    }

    #[test]
    fn prefers_newest_among_same_phase() {
        let pods = vec![pod("Running", 50), pod("Running", 200)];
        let selected = select_pod(&pods).unwrap();
        let created = selected.metadata.creation_timestamp.as_ref().unwrap().0.timestamp();
        assert_eq!(created, 200);
    }

    #[test]
    fn allocate_reuses_port_for_same_key() {
        let table = PortTable::new();
        let key = ForwardKey {
            container_name: "app".into(),
            remote_port: 8080,
        };
        let first = table.allocate(19999, key.clone());
        let second = table.allocate(first, key);
        assert_eq!(first, second);
    }

    #[test]
    fn two_requests_for_same_port_get_distinct_allocations() {
        let table = PortTable::new();
        let a = table.allocate(20001, ForwardKey {
            container_name: "a".into(),
            remote_port: 8080,
        });
        let b = table.allocate(20001, ForwardKey {
            container_name: "b".into(),
            remote_port: 8080,
        });
        assert_ne!(a, b);
    }
}
