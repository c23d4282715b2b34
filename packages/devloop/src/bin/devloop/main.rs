//! The binary entrypoint for `devloop`.

use clap::{Parser, crate_version};
use color_eyre::Result;
use git_version::git_version;
use tracing::instrument;
use tracing_subscriber::util::SubscriberInitExt;

// Since this is a binary crate, we need to ensure these modules aren't pub
// so that they can correctly warn about dead code:
// https://github.com/rust-lang/rust/issues/74970
mod cmd;
mod log;

#[derive(Clone, Debug, Parser)]
#[command(
    name = "devloop",
    about = "Continuous build, deploy, and observe loop for Kubernetes",
    version = format!("v{} commit {}", crate_version!(), git_version!(args = ["--always"], fallback = "unknown")),
)]
struct TopLevelFlags {
    #[command(subcommand)]
    command: cmd::Command,

    /// When to colorize output
    #[arg(long, value_enum, default_value_t = log::WhenColor::Auto)]
    color: log::WhenColor,
}

#[instrument]
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let top = TopLevelFlags::parse();

    let logger = log::make_logger(std::io::stderr, top.color)?;
    logger.init();

    match top.command {
        cmd::Command::Dev(opts) => cmd::dev::exec(opts).await,
        cmd::Command::Run(mut opts) => {
            opts.watch = false;
            cmd::dev::exec(opts).await
        }
        cmd::Command::Build(opts) => cmd::build::exec(opts).await,
        cmd::Command::Delete(opts) => cmd::delete::exec(opts).await,
    }
}
