//! The Status Monitor: polls cluster resources until stable, failed, or
//! deadline-exceeded, classifying pod failures with the taxonomy from
//! `spec.md` §4.6.

use std::collections::BTreeSet;
use std::time::Duration;

use color_eyre::Result;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::Client;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::{ActionableError, StatusCode};

/// Default poll cadence, per `spec.md` §4.6 ("Poll cadence: 1 s (configurable)").
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Pod/container failure classification, more granular than the wire
/// [`StatusCode`] it is folded into — distinguishing e.g. `ImagePullBackOff`
/// from `ImagePullErr` while both map to the same cross-process code.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PodFailureReason {
    NodeDiskPressure,
    NodeMemoryPressure,
    NodeNotReady,
    NodeUnreachable,
    NodeUnschedulable,
    NodeNetworkUnavailable,
    NodePidPressure,
    ImagePullErr,
    ImagePullBackOff,
    CrashLoopBackOff,
    RunContainerError,
    ContainerCreating,
    ContainerTerminated,
    FailedScheduling,
    UnknownEvent,
}

impl PodFailureReason {
    /// Fold into the cross-process wire code, per `spec.md` §6.
    pub fn status_code(self) -> StatusCode {
        match self {
            PodFailureReason::NodeDiskPressure => StatusCode::NodeDiskPressure,
            PodFailureReason::NodeMemoryPressure => StatusCode::NodeMemoryPressure,
            PodFailureReason::NodeNotReady => StatusCode::NodeNotReady,
            PodFailureReason::NodeUnreachable => StatusCode::NodeUnreachable,
            PodFailureReason::NodeUnschedulable => StatusCode::NodeUnschedulable,
            PodFailureReason::NodeNetworkUnavailable => StatusCode::NodeNetworkUnavailable,
            PodFailureReason::NodePidPressure => StatusCode::NodePidPressure,
            PodFailureReason::ImagePullErr | PodFailureReason::ImagePullBackOff => {
                StatusCode::ImagePullErr
            }
            PodFailureReason::CrashLoopBackOff | PodFailureReason::RunContainerError => {
                StatusCode::ContainerTerminated
            }
            PodFailureReason::ContainerCreating => StatusCode::ContainerCreating,
            PodFailureReason::ContainerTerminated => StatusCode::ContainerTerminated,
            PodFailureReason::FailedScheduling => StatusCode::FailedScheduling,
            PodFailureReason::UnknownEvent => StatusCode::UnknownEvent,
        }
    }

    /// Unrecoverable states short-circuit the status monitor, per `spec.md`
    /// §7: "`ImagePullErr`, `ImagePullBackOff`, `RunContainerError`,
    /// `CrashLoopBackOff`, and any terminated container with non-zero exit".
    pub fn is_unrecoverable(self) -> bool {
        matches!(
            self,
            PodFailureReason::ImagePullErr
                | PodFailureReason::ImagePullBackOff
                | PodFailureReason::CrashLoopBackOff
                | PodFailureReason::RunContainerError
                | PodFailureReason::ContainerTerminated
        )
    }
}

/// Diagnosis for one pod, per the classification taxonomy in `spec.md` §4.6.
#[derive(Clone, Debug)]
pub enum PodDiagnosis {
    Success,
    Pending,
    Running,
    Failed {
        reason: PodFailureReason,
        message: String,
    },
}

/// Classify a pod's status, walking the taxonomy in priority order:
/// succeeded phase, unschedulable condition, waiting containers, terminated
/// containers, then the last dominant warning event.
pub fn classify_pod(pod: &Pod, last_warning: Option<&str>) -> PodDiagnosis {
    let Some(status) = &pod.status else {
        return PodDiagnosis::Pending;
    };

    // 1. Succeeded phase wins regardless of container states.
    if status.phase.as_deref() == Some("Succeeded") {
        return PodDiagnosis::Success;
    }

    // 2. Unschedulable `PodScheduled` condition.
    if let Some(conditions) = &status.conditions {
        for condition in conditions {
            if condition.type_ == "PodScheduled" && condition.status == "False" {
                let message = condition.message.clone().unwrap_or_default();
                return PodDiagnosis::Failed {
                    reason: classify_unschedulable(&message),
                    message,
                };
            }
        }
    }

    // 3. Waiting init/app containers.
    let waiting_containers = status
        .init_container_statuses
        .iter()
        .flatten()
        .chain(status.container_statuses.iter().flatten());
    for container in waiting_containers {
        if let Some(waiting) = container.state.as_ref().and_then(|s| s.waiting.as_ref()) {
            if let Some(reason) = &waiting.reason {
                if let Some(mapped) = classify_waiting_reason(reason) {
                    return PodDiagnosis::Failed {
                        reason: mapped,
                        message: waiting.message.clone().unwrap_or_else(|| reason.clone()),
                    };
                }
            }
        }
    }

    // 4. Terminated containers with non-zero exit.
    let terminated_containers = status
        .init_container_statuses
        .iter()
        .flatten()
        .chain(status.container_statuses.iter().flatten());
    for container in terminated_containers {
        if let Some(terminated) = container.state.as_ref().and_then(|s| s.terminated.as_ref()) {
            if terminated.exit_code != 0 {
                let message = terminated
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("try `kubectl logs {}`", container.name));
                return PodDiagnosis::Failed {
                    reason: PodFailureReason::ContainerTerminated,
                    message,
                };
            }
        }
    }

    // 5. Last dominant warning event.
    if let Some(warning) = last_warning {
        return PodDiagnosis::Failed {
            reason: classify_warning_reason(warning),
            message: warning.to_string(),
        };
    }

    match status.phase.as_deref() {
        Some("Running") => PodDiagnosis::Running,
        _ => PodDiagnosis::Pending,
    }
}

fn classify_unschedulable(message: &str) -> PodFailureReason {
    let lower = message.to_ascii_lowercase();
    if lower.contains("disk pressure") {
        PodFailureReason::NodeDiskPressure
    } else if lower.contains("memory pressure") {
        PodFailureReason::NodeMemoryPressure
    } else if lower.contains("not ready") {
        PodFailureReason::NodeNotReady
    } else if lower.contains("unreachable") {
        PodFailureReason::NodeUnreachable
    } else if lower.contains("network unavailable") {
        PodFailureReason::NodeNetworkUnavailable
    } else if lower.contains("pid pressure") {
        PodFailureReason::NodePidPressure
    } else {
        PodFailureReason::NodeUnschedulable
    }
}

fn classify_waiting_reason(reason: &str) -> Option<PodFailureReason> {
    match reason {
        "ImagePullBackOff" => Some(PodFailureReason::ImagePullBackOff),
        "ErrImagePull" => Some(PodFailureReason::ImagePullErr),
        "CrashLoopBackOff" => Some(PodFailureReason::CrashLoopBackOff),
        "RunContainerError" | "CreateContainerError" => Some(PodFailureReason::RunContainerError),
        "ContainerCreating" | "PodInitializing" => Some(PodFailureReason::ContainerCreating),
        _ => None,
    }
}

fn classify_warning_reason(reason: &str) -> PodFailureReason {
    match reason {
        "FailedScheduling" => PodFailureReason::FailedScheduling,
        _ => PodFailureReason::UnknownEvent,
    }
}

/// Check every named deployment in `namespaces`, returning the aggregate
/// [`StatusCode`] for the run. The first unrecoverable failure cancels sibling
/// checks.
#[instrument(skip(client, cancel))]
pub async fn check(
    client: &Client,
    namespaces: &BTreeSet<String>,
    deadline: Duration,
    cancel: CancellationToken,
) -> Result<StatusCode> {
    let mut handles = Vec::new();
    let local_cancel = cancel.child_token();

    for namespace in namespaces {
        let client = client.clone();
        let namespace = namespace.clone();
        let cancel = local_cancel.clone();
        handles.push(tokio::spawn(async move {
            check_namespace(&client, &namespace, deadline, cancel).await
        }));
    }

    let mut code = StatusCode::Success;
    for handle in handles {
        match handle.await {
            Ok(Ok(StatusCode::Success)) => {}
            Ok(Ok(other)) => {
                local_cancel.cancel();
                code = other;
            }
            Ok(Err(err)) => {
                warn!(%err, "status check task failed");
                local_cancel.cancel();
                code = StatusCode::Unknown;
            }
            Err(_) => {
                local_cancel.cancel();
                code = StatusCode::Unknown;
            }
        }
    }
    Ok(code)
}

async fn check_namespace(
    client: &Client,
    namespace: &str,
    deadline: Duration,
    cancel: CancellationToken,
) -> Result<StatusCode> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let deadline_at = Instant::now() + deadline;

    loop {
        if cancel.is_cancelled() {
            return Ok(StatusCode::ContextCancelled);
        }

        let remaining = deadline_at.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(StatusCode::DeadlineExceeded);
        }

        let list = match timeout(remaining + DEFAULT_POLL_INTERVAL, pods.list(&ListParams::default())).await
        {
            Ok(Ok(list)) => list,
            Ok(Err(err)) => {
                return Err(ActionableError::from_report(StatusCode::Unknown, &err.into()).into());
            }
            Err(_) => return Ok(StatusCode::DeadlineExceeded),
        };

        let mut all_stable = true;
        for pod in &list.items {
            match classify_pod(pod, None) {
                PodDiagnosis::Success | PodDiagnosis::Running => {}
                PodDiagnosis::Failed { reason, message } if reason.is_unrecoverable() => {
                    warn!(%namespace, %message, "unrecoverable pod failure");
                    return Ok(reason.status_code());
                }
                _ => all_stable = false,
            }
        }

        if !all_stable || list.items.is_empty() {
            tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
            continue;
        }

        let deploy_list = match timeout(remaining + DEFAULT_POLL_INTERVAL, deployments.list(&ListParams::default()))
            .await
        {
            Ok(Ok(list)) => list,
            Ok(Err(err)) => {
                return Err(ActionableError::from_report(StatusCode::Unknown, &err.into()).into());
            }
            Err(_) => return Ok(StatusCode::DeadlineExceeded),
        };

        if deploy_list.items.iter().all(is_deployment_available) {
            info!(%namespace, "pods stable and deployments available");
            return Ok(StatusCode::Success);
        }

        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
    }
}

/// A Deployment is available once its controller has observed enough ready
/// replicas and surfaced the `Available` condition, per `spec.md` §4.6 —
/// pod phase alone can't answer this for a long-running workload, since a
/// healthy Deployment's pods sit in `Running` forever and never reach
/// `Succeeded`.
fn is_deployment_available(deployment: &Deployment) -> bool {
    let Some(status) = &deployment.status else {
        return false;
    };
    let desired = deployment.spec.as_ref().and_then(|spec| spec.replicas).unwrap_or(1);
    if status.available_replicas.unwrap_or(0) < desired {
        return false;
    }
    status
        .conditions
        .iter()
        .flatten()
        .any(|condition| condition.type_ == "Available" && condition.status == "True")
}
