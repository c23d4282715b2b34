//! The Artifact Cache: a persistent `fingerprint -> prior build result`
//! mapping, backed by one JSON file per pipeline.

pub mod entry;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use color_eyre::{Result, eyre::Context};
use tokio::process::Command;
use tracing::{instrument, trace, warn};

use crate::artifact::BuildResult;
use crate::path::AbsFilePath;

pub use entry::CacheEntry;

/// Verifies that a cached tag is still resolvable by the current build
/// target, without requiring tests to stand up a real Docker daemon.
pub trait TagResolver: Send + Sync {
    fn resolvable<'a>(&'a self, tag: &'a str) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
}

/// Checks the local Docker daemon via `docker image inspect`.
pub struct LocalDaemonResolver;

impl TagResolver for LocalDaemonResolver {
    fn resolvable<'a>(&'a self, tag: &'a str) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            Command::new("docker")
                .args(["image", "inspect", tag])
                .output()
                .await
                .map(|o| o.status.success())
                .unwrap_or(false)
        })
    }
}

/// Checks a remote registry via `docker manifest inspect`, avoiding a direct
/// HTTP client dependency for a single HEAD-equivalent check.
pub struct RegistryResolver;

impl TagResolver for RegistryResolver {
    fn resolvable<'a>(&'a self, tag: &'a str) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            Command::new("docker")
                .args(["manifest", "inspect", tag])
                .output()
                .await
                .map(|o| o.status.success())
                .unwrap_or(false)
        })
    }
}

/// Persistent `fingerprint -> CacheEntry` map, one JSON file per pipeline.
///
/// Concurrency: a single mutex guards the in-memory map; it is held only
/// across map mutations, never across file I/O or hashing (`spec.md` §4.2).
pub struct ArtifactCache {
    path: AbsFilePath,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ArtifactCache {
    /// Open the cache file at `path`, loading any existing entries. A missing
    /// file is treated as an empty cache, not an error.
    #[instrument]
    pub fn open(path: AbsFilePath) -> Result<Self> {
        let entries = match std::fs::read_to_string(path.as_std_path()) {
            Ok(contents) => {
                serde_json::from_str(&contents).with_context(|| format!("parse cache file: {path}"))?
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err).with_context(|| format!("read cache file: {path}")),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Look up a cache entry by fingerprint, without verifying tag
    /// reachability.
    pub fn lookup(&self, fingerprint: &str) -> Option<CacheEntry> {
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .get(fingerprint)
            .cloned()
    }

    /// Look up and verify a cache entry, discarding it if the tag is no
    /// longer resolvable by `resolver`.
    #[instrument(skip(self, resolver))]
    pub async fn lookup_verified(
        &self,
        fingerprint: &str,
        local_only: bool,
        resolver: &dyn TagResolver,
    ) -> Result<Option<BuildResult>> {
        let Some(entry) = self.lookup(fingerprint) else {
            return Ok(None);
        };
        let tag = format!("{}:{}", entry.image_name, entry.tag);
        if resolver.resolvable(&tag).await {
            Ok(Some(entry.to_build_result(local_only)))
        } else {
            warn!(%tag, "cache hit failed tag verification; discarding");
            self.invalidate_fingerprint(fingerprint)?;
            Ok(None)
        }
    }

    /// Insert or replace an entry and flush the cache to disk.
    #[instrument(skip(self, entry))]
    pub fn store(&self, entry: CacheEntry) -> Result<()> {
        let snapshot = {
            let mut guard = self.entries.lock().expect("cache mutex poisoned");
            guard.insert(entry.fingerprint.clone(), entry);
            guard.clone()
        };
        self.persist(&snapshot)
    }

    /// Drop every entry for `image_name` (e.g. because its tag can no longer
    /// be resolved) and flush.
    #[instrument(skip(self))]
    pub fn invalidate(&self, image_name: &str) -> Result<()> {
        let snapshot = {
            let mut guard = self.entries.lock().expect("cache mutex poisoned");
            guard.retain(|_, entry| entry.image_name != image_name);
            guard.clone()
        };
        self.persist(&snapshot)
    }

    fn invalidate_fingerprint(&self, fingerprint: &str) -> Result<()> {
        let snapshot = {
            let mut guard = self.entries.lock().expect("cache mutex poisoned");
            guard.remove(fingerprint);
            guard.clone()
        };
        self.persist(&snapshot)
    }

    fn persist(&self, snapshot: &HashMap<String, CacheEntry>) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot).context("serialize cache")?;
        if let Some(parent) = self.path.as_std_path().parent() {
            std::fs::create_dir_all(parent).context("create cache dir")?;
        }
        std::fs::write(self.path.as_std_path(), json)
            .with_context(|| format!("write cache file: {}", self.path))?;
        trace!(path = %self.path, entries = snapshot.len(), "flushed cache");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::BuildResult;

    fn temp_cache() -> (tempfile::TempDir, ArtifactCache) {
        let dir = tempfile::tempdir().unwrap();
        let path = AbsFilePath::try_from(dir.path().join("cache.json")).unwrap();
        let cache = ArtifactCache::open(path).unwrap();
        (dir, cache)
    }

    #[test]
    fn store_then_lookup_round_trips() {
        let (_dir, cache) = temp_cache();
        let result = BuildResult {
            image_name: "app".into(),
            tag: "abc123".into(),
            local_only: true,
        };
        cache.store(CacheEntry::new("fp1", &result, None)).unwrap();
        let found = cache.lookup("fp1").unwrap();
        assert_eq!(found.image_name, "app");
    }

    #[test]
    fn reopening_loads_persisted_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = AbsFilePath::try_from(dir.path().join("cache.json")).unwrap();
        {
            let cache = ArtifactCache::open(path.clone()).unwrap();
            let result = BuildResult {
                image_name: "app".into(),
                tag: "abc123".into(),
                local_only: false,
            };
            cache.store(CacheEntry::new("fp1", &result, None)).unwrap();
        }
        let reopened = ArtifactCache::open(path).unwrap();
        assert!(reopened.lookup("fp1").is_some());
    }

    #[test]
    fn invalidate_drops_all_entries_for_image() {
        let (_dir, cache) = temp_cache();
        let a = BuildResult {
            image_name: "app".into(),
            tag: "t1".into(),
            local_only: false,
        };
        let b = BuildResult {
            image_name: "other".into(),
            tag: "t2".into(),
            local_only: false,
        };
        cache.store(CacheEntry::new("fp-a", &a, None)).unwrap();
        cache.store(CacheEntry::new("fp-b", &b, None)).unwrap();
        cache.invalidate("app").unwrap();
        assert!(cache.lookup("fp-a").is_none());
        assert!(cache.lookup("fp-b").is_some());
    }

    #[tokio::test]
    async fn verified_lookup_discards_unresolvable_tag() {
        struct NeverResolvable;
        impl TagResolver for NeverResolvable {
            fn resolvable<'a>(
                &'a self,
                _tag: &'a str,
            ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
                Box::pin(async { false })
            }
        }

        let (_dir, cache) = temp_cache();
        let result = BuildResult {
            image_name: "app".into(),
            tag: "t1".into(),
            local_only: false,
        };
        cache.store(CacheEntry::new("fp1", &result, None)).unwrap();
        let found = cache
            .lookup_verified("fp1", false, &NeverResolvable)
            .await
            .unwrap();
        assert!(found.is_none());
        assert!(cache.lookup("fp1").is_none());
    }
}
