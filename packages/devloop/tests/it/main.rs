use devloop::path::AbsDirPath;
use tempfile::TempDir;

pub mod cache;
pub mod dispatch;
pub mod fingerprint;
pub mod manifest;
pub mod pipeline;
pub mod watch;

#[track_caller]
pub fn temporary_directory() -> (TempDir, AbsDirPath) {
    let dir = TempDir::new().expect("create temporary directory");
    let path = AbsDirPath::try_from(dir.path()).expect("read temp dir as abs dir");
    (dir, path)
}
