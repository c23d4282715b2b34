use devloop::artifact::BuildResult;
use devloop::cache::entry::CacheEntry;
use devloop::cache::{ArtifactCache, TagResolver};
use devloop::path::AbsFilePath;
use pretty_assertions::assert_eq;

use crate::temporary_directory;

fn cache_at(dir: &devloop::path::AbsDirPath) -> ArtifactCache {
    let path = AbsFilePath::try_from(dir.as_std_path().join("cache.json")).unwrap();
    ArtifactCache::open(path).unwrap()
}

struct AlwaysResolvable;
impl TagResolver for AlwaysResolvable {
    fn resolvable<'a>(
        &'a self,
        _tag: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send + 'a>> {
        Box::pin(async { true })
    }
}

#[tokio::test]
async fn verified_lookup_survives_process_restart() {
    let (_dir, workspace) = temporary_directory();
    let cache_path = AbsFilePath::try_from(workspace.as_std_path().join("cache.json")).unwrap();

    {
        let cache = ArtifactCache::open(cache_path.clone()).unwrap();
        let result = BuildResult {
            image_name: "app".into(),
            tag: "t1".into(),
            local_only: false,
        };
        cache.store(CacheEntry::new("fp1", &result, Some("sha256:abc".into()))).unwrap();
    }

    // Simulate a fresh process picking the cache file back up.
    let reopened = ArtifactCache::open(cache_path).unwrap();
    let found = reopened
        .lookup_verified("fp1", false, &AlwaysResolvable)
        .await
        .unwrap()
        .expect("entry should survive reopening the cache file");
    assert_eq!(found.image_name, "app");
    assert_eq!(found.tag, "t1");
}

#[tokio::test]
async fn unresolvable_cache_hit_is_discarded_and_does_not_resurface() {
    struct NeverResolvable;
    impl devloop::cache::TagResolver for NeverResolvable {
        fn resolvable<'a>(
            &'a self,
            _tag: &'a str,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send + 'a>> {
            Box::pin(async { false })
        }
    }

    let (_dir, workspace) = temporary_directory();
    let cache = cache_at(&workspace);
    let result = BuildResult {
        image_name: "app".into(),
        tag: "stale".into(),
        local_only: false,
    };
    cache.store(CacheEntry::new("fp1", &result, None)).unwrap();

    let first = cache.lookup_verified("fp1", false, &NeverResolvable).await.unwrap();
    assert!(first.is_none());

    // Discarding must persist: a second verified lookup (even against a
    // resolver that would now say yes) finds nothing, since the row is gone.
    let second = cache.lookup_verified("fp1", false, &AlwaysResolvable).await.unwrap();
    assert!(second.is_none());
    assert!(cache.lookup("fp1").is_none());
}

#[tokio::test]
async fn multiple_artifacts_invalidate_independently() {
    let (_dir, workspace) = temporary_directory();
    let cache = cache_at(&workspace);

    let app = BuildResult { image_name: "app".into(), tag: "t1".into(), local_only: false };
    let worker = BuildResult { image_name: "worker".into(), tag: "t2".into(), local_only: false };
    cache.store(CacheEntry::new("fp-app", &app, None)).unwrap();
    cache.store(CacheEntry::new("fp-worker", &worker, None)).unwrap();

    cache.invalidate("app").unwrap();

    assert!(cache.lookup("fp-app").is_none());
    let worker_entry = cache.lookup("fp-worker").expect("worker entry untouched");
    assert_eq!(worker_entry.image_name, "worker");
}
