//! Two-tier error model: opaque internal causes, actionable errors at boundaries.
//!
//! Internally we propagate [`color_eyre::Report`] chains via `?` like everywhere
//! else in this crate. At the edge of a component — wherever a result crosses
//! into the [`crate::event::Event`] stream or the CLI — it is converted into an
//! [`ActionableError`], which carries a machine-readable [`StatusCode`], a
//! user-facing message, and zero or more remediation suggestions.

use color_eyre::Report;
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Cross-process status code. Reproduced verbatim for wire compatibility;
/// never localised, never reordered.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, Serialize, Deserialize)]
pub enum StatusCode {
    Success,
    ImagePullErr,
    ContainerCreating,
    ContainerTerminated,
    NodeDiskPressure,
    NodeMemoryPressure,
    NodeNotReady,
    NodeUnreachable,
    NodeUnschedulable,
    NodeNetworkUnavailable,
    NodePidPressure,
    FailedScheduling,
    DeadlineExceeded,
    ContextCancelled,
    UnknownEvent,
    Unknown,
}

/// An error carrying a user-visible message, a machine-readable code, and
/// zero or more remediation suggestions.
#[derive(Clone, Debug, Display, Serialize, Deserialize)]
#[display("{message}")]
pub struct ActionableError {
    pub code: StatusCode,
    pub message: String,
    pub suggestions: Vec<String>,
}

impl std::error::Error for ActionableError {}

impl ActionableError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestions(mut self, suggestions: impl IntoIterator<Item = String>) -> Self {
        self.suggestions.extend(suggestions);
        self
    }

    /// Convert an opaque internal cause into an actionable error at a component
    /// boundary, preserving the cause's message as context.
    pub fn from_report(code: StatusCode, report: &Report) -> Self {
        Self::new(code, format!("{report:#}"))
    }

    pub fn unsupported_builder(kind: &str) -> Self {
        Self::new(
            StatusCode::Unknown,
            format!("builder kind {kind} has no implementation in this build"),
        )
        .with_suggestions([format!(
            "use the dockerfile builder, or vendor a {kind} integration"
        )])
    }
}

/// Remediation suggestions for a cluster the deployer couldn't reach, keyed by
/// substrings of the active kube-context name.
pub fn cluster_unreachable_suggestions(kube_context: &str) -> Vec<String> {
    let ctx = kube_context.to_ascii_lowercase();
    if ctx.contains("minikube") {
        vec!["Check if minikube is running using `minikube status` and try again".into()]
    } else if ctx.contains("kind") {
        vec!["Check if the kind cluster is running using `kind get clusters`".into()]
    } else if ctx.contains("k3d") {
        vec!["Check if the k3d cluster is running using `k3d cluster list`".into()]
    } else {
        vec!["Check your connection for the cluster".into()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minikube_suggestion() {
        let s = cluster_unreachable_suggestions("minikube");
        assert!(s[0].contains("minikube status"));
    }

    #[test]
    fn unknown_context_suggestion() {
        let s = cluster_unreachable_suggestions("gke_my-project_us-east1_prod");
        assert!(s[0].contains("connection"));
    }
}
