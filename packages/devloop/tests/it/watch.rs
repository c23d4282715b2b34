use std::collections::HashMap;

use devloop::artifact::Artifact;
use devloop::builder::{BuilderKind, DockerfileParams};
use devloop::fingerprint::Fingerprinter;
use devloop::sync::{resolve_syncs, SyncRule};
use devloop::watch::Watcher;
use pretty_assertions::assert_eq;

use crate::temporary_directory;

fn artifact_map(workspace: devloop::path::AbsDirPath) -> HashMap<String, Artifact> {
    let mut map = HashMap::new();
    map.insert(
        "web".to_string(),
        Artifact {
            name: "web".into(),
            workspace: Some(workspace),
            builder: BuilderKind::Dockerfile(DockerfileParams {
                path: "Dockerfile".into(),
                ..Default::default()
            }),
            requires: Vec::new(),
        },
    );
    map
}

/// A changed file outside any [`SyncRule`]'s glob still triggers a full
/// rebuild via the watcher's fingerprint rescan, even though `resolve_syncs`
/// on its own sees nothing to sync — the two mechanisms are complementary,
/// not alternatives the caller picks between.
#[tokio::test]
async fn changed_file_with_no_matching_sync_rule_still_marks_rebuild() {
    let (_dir, workspace) = temporary_directory();
    std::fs::write(
        workspace.as_std_path().join("Dockerfile"),
        "FROM scratch\nCOPY config.toml /app/config.toml\n",
    )
    .unwrap();
    std::fs::write(workspace.as_std_path().join("config.toml"), "v1").unwrap();

    let map = artifact_map(workspace.clone());
    let fingerprinter = Fingerprinter::new(&map);
    let mut watcher = Watcher::new();
    watcher.rescan(&["web".to_string()], &fingerprinter).await.unwrap();

    std::fs::write(workspace.as_std_path().join("config.toml"), "v2").unwrap();
    let changes = watcher.rescan(&["web".to_string()], &fingerprinter).await.unwrap();
    assert!(changes.rebuild.contains("web"));

    let rules = vec![SyncRule { from: "src/**/*.py".into(), to: "/app/{}".into() }];
    let matched = resolve_syncs(&rules, &["config.toml".to_string()]);
    assert!(matched.is_empty(), "config.toml doesn't match any sync rule");
}

/// A changed file that does match a [`SyncRule`] is eligible for hot sync;
/// pairing it against the watcher's rebuild set lets the caller decide
/// per-artifact whether a rebuild is still required alongside the sync.
#[tokio::test]
async fn changed_file_matching_a_sync_rule_resolves_to_its_container_destination() {
    let rules = vec![SyncRule { from: "static/**/*.css".into(), to: "/app/static/{}".into() }];
    let changed = vec!["static/theme/dark.css".to_string(), "src/main.rs".to_string()];

    let matched = resolve_syncs(&rules, &changed);
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].0, "static/theme/dark.css");
    assert_eq!(matched[0].1, "/app/static/dark.css");
}
