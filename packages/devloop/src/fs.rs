//! Filesystem conventions tailored to `devloop`.
//!
//! Most of the crate reaches for `std::fs`/`tokio::fs` directly for ordinary
//! reads and writes (builders, the fingerprinter, config) since those
//! operations are one-shot and don't need a shared abstraction. This module
//! holds the one piece of filesystem logic that's genuinely cross-cutting:
//! locating the user-global cache directory according to OS convention.

use color_eyre::{
    Result,
    eyre::{Context, OptionExt},
};
use tap::{Pipe, TapFallible};
use tokio::task::spawn_blocking;
use tracing::{debug, instrument};

use crate::path::AbsDirPath;

/// Determine the canonical cache path for the current user, if possible.
///
/// ## Strategy
///
/// Attempts to put the cache directory in the correct place depending on the
/// conventions of the operating system in which devloop is running.
///
/// - Linux: `$XDG_CACHE_HOME/devloop/v1`
/// - macOS: `$HOME/Library/Caches/dev.devloop.devloop/v1`
/// - Windows: `%LOCALAPPDATA%\devloop\v1`
///
/// If unable to find those directories, falls back to:
/// - Linux/macOS: `$HOME/.cache/devloop/v1`
/// - Windows: `%USERPROFILE%\.cache\devloop\v1`
///
/// ## Errors
///
/// This can fail if the user has no home directory or if it cannot be accessed.
#[instrument]
pub async fn user_global_cache_path() -> Result<AbsDirPath> {
    let dirs = spawn_blocking(|| directories::ProjectDirs::from("dev", "devloop", "devloop"))
        .await
        .expect("join task");

    let base = if let Some(dirs) = dirs {
        dirs.cache_dir().to_path_buf()
    } else {
        homedir::my_home()
            .context("get user home directory")?
            .ok_or_eyre("user has no home directory")?
            .join(".cache")
            .join("devloop")
    };

    base.join("v1")
        .pipe(AbsDirPath::try_from)
        .tap_ok(|dir| debug!(?dir, "user global cache path"))
}
