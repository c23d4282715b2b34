use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use color_eyre::{Result, eyre::Context};
use devloop::cache::ArtifactCache;
use devloop::config::GlobalConfig;
use devloop::event::{Event, EventBus};
use devloop::path::TryJoinWith;
use devloop::pipeline::Pipeline;
use devloop::event::BuildStatus;
use devloop::portforward::PortTable;
use devloop::progress::BuildProgress;
use devloop::runner::Runner;
use devloop::watch::Trigger;
use tracing::info;

/// Debounce window for the filesystem watcher backing `--watch`; matches
/// `notify-debouncer-mini`'s own coalescing granularity.
const WATCH_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Clone, Debug, Args)]
pub struct Opts {
    /// Path to the pipeline description
    #[arg(long, default_value = "devloop.yaml")]
    pub file: PathBuf,

    /// Kube-context to target; defaults to the current kubeconfig context
    #[arg(long)]
    pub kube_context: Option<String>,

    /// Keep watching for changes after the first iteration completes
    #[arg(long, default_value_t = true)]
    pub watch: bool,
}

pub async fn exec(opts: Opts) -> Result<()> {
    let yaml = std::fs::read_to_string(&opts.file)
        .with_context(|| format!("read pipeline: {}", opts.file.display()))?;
    let pipeline = Pipeline::parse(&yaml)?;

    let kube_context = opts
        .kube_context
        .clone()
        .unwrap_or_else(|| "default".to_string());

    let cache_dir = devloop::fs::user_global_cache_path()
        .await
        .context("resolve cache directory")?;
    let cache_path = cache_dir
        .try_join_file("cache.json")
        .context("build cache path")?;
    let cache = Arc::new(ArtifactCache::open(cache_path)?);
    let bus = Arc::new(EventBus::default());
    let ports = Arc::new(PortTable::new());
    let config_path = GlobalConfig::default_path()?;
    let config = GlobalConfig::load(&config_path)?;

    let mut subscriber = bus.subscribe();
    tokio::spawn(async move {
        let mut bar = None;
        while let Ok(event) = subscriber.recv().await {
            if let Event::Meta { build_count, .. } = &event {
                bar = Some(BuildProgress::new(*build_count as u64, "building artifacts"));
            }
            if let (Some(bar), Event::Build { status: BuildStatus::Complete | BuildStatus::Failed, .. }) =
                (&bar, &event)
            {
                bar.inc(1);
            }
            log_event(&event);
        }
    });

    let client = kube::Client::try_default()
        .await
        .context("connect to kubernetes cluster")?;

    let mut runner = Runner::new(cache, bus, ports, config, kube_context);
    runner.run_iteration(&pipeline, &client).await?;

    if opts.watch {
        let workspace = devloop::path::AbsDirPath::current()?;
        let mut changes = Trigger::FilesystemNotify {
            workspace: workspace.as_std_path().to_path_buf(),
            interval: WATCH_DEBOUNCE,
        }
        .start()
        .context("start filesystem watcher")?;

        while changes.recv().await.is_some() {
            runner.run_iteration(&pipeline, &client).await?;
        }
    }

    runner.shutdown();
    Ok(())
}

fn log_event(event: &Event) {
    match event {
        Event::Meta { pipeline_name, build_count } => {
            info!(%pipeline_name, build_count, "starting dev loop");
        }
        Event::Build { artifact, status, .. } => {
            info!(%artifact, ?status, "build event");
        }
        Event::Deploy { status, .. } => {
            info!(?status, "deploy event");
        }
        Event::Port { local_port, pod_name, .. } => {
            info!(local_port, %pod_name, "forwarding container to local port");
        }
        Event::ResourceStatusCheck { resource, code, .. } => {
            info!(%resource, ?code, "resource status");
        }
        Event::FileSync { artifact, files } => {
            info!(%artifact, ?files, "hot-synced files");
        }
    }
}
