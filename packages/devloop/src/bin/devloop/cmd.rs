pub mod build;
pub mod delete;
pub mod dev;

use clap::Subcommand;

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Run the continuous dev loop: build, deploy, watch, repeat
    Dev(dev::Opts),

    /// Build and deploy once, without entering the watch loop
    Run(dev::Opts),

    /// Build artifacts without deploying
    Build(build::Opts),

    /// Tear down the resources deployed by a prior run
    Delete(delete::Opts),
}
