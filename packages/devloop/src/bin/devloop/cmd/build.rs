use std::path::PathBuf;

use clap::Args;
use color_eyre::{Result, eyre::Context};
use devloop::event::EventBus;
use devloop::pipeline::Pipeline;
use devloop::tag::BuildArgEnv;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone, Debug, Args)]
pub struct Opts {
    /// Path to the pipeline description
    #[arg(long, default_value = "devloop.yaml")]
    pub file: PathBuf,

    /// Tag applied to every built artifact
    #[arg(long, default_value = "dev")]
    pub tag: String,
}

pub async fn exec(opts: Opts) -> Result<()> {
    let yaml = std::fs::read_to_string(&opts.file)
        .with_context(|| format!("read pipeline: {}", opts.file.display()))?;
    let pipeline = Pipeline::parse(&yaml)?;

    let bus = EventBus::default();
    let tag = opts.tag.clone();
    let results = devloop::dispatcher::dispatch(
        &pipeline.build.artifacts,
        |name| {
            (
                tag.clone(),
                BuildArgEnv {
                    image_name: name.to_string(),
                    ..Default::default()
                },
            )
        },
        &bus,
        CancellationToken::new(),
        |artifact, line| info!(%artifact, %line, "build output"),
    )
    .await?;

    for result in &results {
        info!(image = %result.image_name, tag = %result.tag, "built");
    }
    Ok(())
}
