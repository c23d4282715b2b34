//! The Event Bus: a fan-out of structured events to subscribers, per
//! `spec.md` §6.
//!
//! Emitted over a [`tokio::sync::broadcast`] channel rather than a process-wide
//! singleton (`spec.md` §9's note on shared global state) — the [`EventBus`] is
//! constructed once in `main` and passed down by reference, so tests can
//! instantiate isolated instances.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{ActionableError, StatusCode};

/// One entry in the structured event stream, emitted in emission order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Event {
    /// Startup metadata, emitted once at the beginning of a run.
    Meta { pipeline_name: String, build_count: usize },

    Build {
        artifact: String,
        status: BuildStatus,
        err: Option<ActionableError>,
    },

    Deploy {
        status: DeployStatus,
        err: Option<ActionableError>,
    },

    Port {
        local_port: u16,
        remote_port: u16,
        pod_name: String,
        container_name: String,
        namespace: String,
        port_name: Option<String>,
    },

    ResourceStatusCheck {
        resource: String,
        code: StatusCode,
        actionable_err: Option<ActionableError>,
    },

    /// A hot file sync applied in place of a rebuild (**SUPPLEMENT**, see
    /// `src/sync.rs`).
    FileSync { artifact: String, files: Vec<String> },
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum BuildStatus {
    InProgress,
    Complete,
    Failed,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum DeployStatus {
    InProgress,
    Complete,
    Failed,
}

/// Default capacity of the broadcast channel; generous enough that a slow
/// subscriber (e.g. a CLI renderer mid-redraw) doesn't force a `RecvError::Lagged`
/// under normal dev-loop event rates.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Thin wrapper around a [`broadcast::Sender`], giving the rest of the crate
/// one place to depend on for publishing and subscribing.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish an event. Errors only when there are no subscribers, which is
    /// not a failure worth propagating.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}
