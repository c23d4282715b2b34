//! The Runner: top-level state machine driving one dev-loop iteration, per
//! `spec.md` §4.8.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::artifact::BuildResult;
use crate::cache::{ArtifactCache, LocalDaemonResolver, RegistryResolver, TagResolver};
use crate::config::GlobalConfig;
use crate::deploy::{self, DeployOutcome};
use crate::dispatcher;
use crate::event::{DeployStatus, Event, EventBus};
use crate::fingerprint::Fingerprinter;
use crate::log_aggregator::{LogAggregator, LogTailer};
use crate::pipeline::Pipeline;
use crate::portforward::{self, ForwardKey, PortTable};
use crate::status;
use crate::tag::BuildArgEnv;
use crate::watch::Watcher;
use crate::error::StatusCode;

/// Explicit states of the dev-loop state machine, per `spec.md` §4.8.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum RunnerState {
    Idle,
    Building,
    Testing,
    Deploying,
    Monitoring,
    Watching,
    ShuttingDown,
}

/// Owns the Cache, Event Bus, and Port Table as explicit dependencies
/// (`spec.md` §9: no process-wide singletons) so tests can instantiate
/// isolated runners.
pub struct Runner {
    pub cache: Arc<ArtifactCache>,
    pub bus: Arc<EventBus>,
    pub ports: Arc<PortTable>,
    pub config: GlobalConfig,
    pub kube_context: String,
    state: RunnerState,
    watcher: Watcher,
    logs: LogAggregator,
    root_cancel: CancellationToken,
    run_id: String,
}

impl Runner {
    pub fn new(
        cache: Arc<ArtifactCache>,
        bus: Arc<EventBus>,
        ports: Arc<PortTable>,
        config: GlobalConfig,
        kube_context: String,
    ) -> Self {
        Self {
            cache,
            bus,
            ports,
            config,
            kube_context,
            state: RunnerState::Idle,
            watcher: Watcher::new(),
            logs: LogAggregator::new(),
            root_cancel: CancellationToken::new(),
            run_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    fn transition(&mut self, to: RunnerState) {
        info!(from = ?self.state, ?to, "runner state transition");
        self.state = to;
    }

    /// Run one full dev-loop iteration: tag, build, test, deploy, observe.
    /// Per `spec.md` §4.8's nine-step algorithm.
    #[instrument(skip(self, pipeline, client))]
    pub async fn run_iteration(&mut self, pipeline: &Pipeline, client: &Client) -> Result<()> {
        let iteration_cancel = self.root_cancel.child_token();

        self.bus.publish(Event::Meta {
            pipeline_name: pipeline.kind.clone(),
            build_count: pipeline.build.artifacts.len(),
        });

        // Step 1: resolve tags concurrently for all artifacts.
        self.transition(RunnerState::Building);
        let artifacts = &pipeline.build.artifacts;
        let artifact_map: std::collections::HashMap<_, _> =
            artifacts.iter().map(|a| (a.name.clone(), a.clone())).collect();
        let fingerprinter = Fingerprinter::new(&artifact_map);

        let mut fingerprints = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            fingerprints.push((artifact.name.clone(), fingerprinter.fingerprint(&artifact.name).await?));
        }

        // Step 2: partition by cache lookup.
        let local_only_cluster = GlobalConfig::is_local_cluster(&self.kube_context);
        let resolver: Box<dyn TagResolver> = if local_only_cluster {
            Box::new(LocalDaemonResolver)
        } else {
            Box::new(RegistryResolver)
        };

        let mut cached = Vec::new();
        let mut to_build = Vec::new();
        for artifact in artifacts {
            let fingerprint = fingerprints
                .iter()
                .find(|(name, _)| name == &artifact.name)
                .map(|(_, fp)| fp.clone())
                .expect("fingerprint computed above");
            match self
                .cache
                .lookup_verified(&fingerprint, local_only_cluster, resolver.as_ref())
                .await?
            {
                Some(result) => cached.push((artifact.name.clone(), result)),
                None => to_build.push(artifact.clone()),
            }
        }

        // Step 1 (tag resolution) + Step 3: dispatch builds for the uncached set.
        let bus = (*self.bus).clone();
        let built = dispatcher::dispatch(
            &to_build,
            |name| {
                let env = BuildArgEnv {
                    image_name: name.to_string(),
                    ..Default::default()
                };
                (self.run_id.clone(), env)
            },
            &bus,
            iteration_cancel.clone(),
            |artifact, line| info!(%artifact, %line, "build output"),
        )
        .await?;

        for result in &built {
            let fingerprint = fingerprints
                .iter()
                .find(|(name, _)| name == &result.image_name)
                .map(|(_, fp)| fp.clone())
                .unwrap_or_default();
            self.cache
                .store(crate::cache::CacheEntry::new(fingerprint, result, None))?;
        }

        // Step 4: merge fresh results with cached, preserving input order.
        let mut results: Vec<BuildResult> = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            if let Some(result) = built.iter().find(|r| r.image_name == artifact.name) {
                results.push(result.clone());
            } else if let Some((_, result)) = cached.iter().find(|(name, _)| name == &artifact.name) {
                results.push(result.clone());
            }
        }

        // Step 3 (tests): run after fresh builds.
        self.transition(RunnerState::Testing);
        for test in &pipeline.test {
            if let Some(command) = &test.command {
                run_test(&test.image_name, command).await?;
            }
        }

        // Step 6: deploy; inject labels (step 5's local-cluster image load is
        // a documented extension point — out of scope per spec.md §1).
        self.transition(RunnerState::Deploying);
        self.bus.publish(Event::Deploy {
            status: DeployStatus::InProgress,
            err: None,
        });
        let workspace = crate::path::AbsDirPath::current()?;
        let DeployOutcome { namespaces, warnings } = deploy::deploy(
            &pipeline.deploy.deployer,
            &workspace,
            &results,
            &self.run_id,
            &Default::default(),
        )
        .await?;
        for warning in &warnings {
            warn!(%warning, "deploy warning");
        }
        self.bus.publish(Event::Deploy {
            status: DeployStatus::Complete,
            err: None,
        });

        // Step 7: status monitor, blocking until stable or failed.
        self.transition(RunnerState::Monitoring);
        let code = status::check(client, &namespaces, Duration::from_secs(120), iteration_cancel.clone()).await?;
        for namespace in &namespaces {
            self.bus.publish(Event::ResourceStatusCheck {
                resource: namespace.clone(),
                code,
                actionable_err: None,
            });
        }
        if code != StatusCode::Success {
            return Err(color_eyre::eyre::eyre!("deploy did not stabilize: {code}"));
        }

        // Step 8: now that the status monitor has confirmed a stable
        // deployment, discover the live pods per namespace and register a
        // log tailer and port-forward for each container.
        for namespace in &namespaces {
            let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
            let list = pods.list(&ListParams::default()).await?;
            for pod in &list.items {
                let Some(pod_name) = pod.metadata.name.clone() else { continue };
                let Some(pod_spec) = &pod.spec else { continue };
                for container in &pod_spec.containers {
                    let cancel = self.logs.track(pod_name.clone(), container.name.clone());
                    let namespace_for_logs = namespace.clone();
                    let pod_name_for_logs = pod_name.clone();
                    let container_name_for_logs = container.name.clone();
                    tokio::spawn(async move {
                        if let Err(err) = LogTailer::run(
                            &namespace_for_logs,
                            &pod_name_for_logs,
                            &container_name_for_logs,
                            cancel,
                            |line| info!(pod = %pod_name_for_logs, container = %container_name_for_logs, %line, "container log"),
                        )
                        .await
                        {
                            warn!(%err, pod = %pod_name_for_logs, "log tailer exited with an error");
                        }
                    });

                    for port in container.ports.iter().flatten() {
                        let remote_port = port.container_port as u16;
                        let key = ForwardKey {
                            container_name: container.name.clone(),
                            remote_port,
                        };
                        let local_port = self.ports.allocate(remote_port, key);
                        let handle = portforward::spawn_forward(namespace, &pod_name, local_port, remote_port)?;
                        self.bus.publish(Event::Port {
                            local_port,
                            remote_port,
                            pod_name: pod_name.clone(),
                            container_name: container.name.clone(),
                            namespace: namespace.clone(),
                            port_name: port.name.clone(),
                        });
                        tokio::spawn(async move {
                            if let Err(err) = handle.watch_for_failure().await {
                                warn!(%err, "port-forward supervisor exited with an error");
                            }
                        });
                    }
                }
            }
        }

        // Step 9: enter watch state until trigger or cancellation.
        self.transition(RunnerState::Watching);
        Ok(())
    }

    /// Enter the terminal state: drain ports, tails, log streams, flush the
    /// cache.
    pub fn shutdown(&mut self) {
        self.transition(RunnerState::ShuttingDown);
        self.logs.stop_all();
        self.root_cancel.cancel();
    }

    pub fn root_cancel(&self) -> CancellationToken {
        self.root_cancel.clone()
    }
}

async fn run_test(image_name: &str, command: &str) -> Result<()> {
    let status = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .env("IMAGE_NAME", image_name)
        .status()
        .await?;
    if !status.success() {
        color_eyre::eyre::bail!("test command failed for {image_name}: {status}");
    }
    Ok(())
}
