use std::collections::HashMap;

use devloop::artifact::Artifact;
use devloop::builder::{BuilderKind, DockerfileParams};
use devloop::fingerprint::Fingerprinter;
use devloop::path::AbsDirPath;
use pretty_assertions::assert_eq;

use crate::temporary_directory;

fn dockerfile_artifact(name: &str, workspace: AbsDirPath, requires: &[&str]) -> Artifact {
    Artifact {
        name: name.into(),
        workspace: Some(workspace),
        builder: BuilderKind::Dockerfile(DockerfileParams::default()),
        requires: requires.iter().map(|s| s.to_string()).collect(),
    }
}

#[tokio::test]
async fn fingerprint_is_insensitive_to_requires_order() {
    let (_a_dir, a_workspace) = temporary_directory();
    let (_b_dir, b_workspace) = temporary_directory();
    let (_c_dir, c_workspace) = temporary_directory();
    std::fs::write(a_workspace.as_std_path().join("Dockerfile"), "FROM scratch\n").unwrap();
    std::fs::write(b_workspace.as_std_path().join("Dockerfile"), "FROM scratch\n").unwrap();
    std::fs::write(c_workspace.as_std_path().join("Dockerfile"), "FROM scratch\n").unwrap();

    let mut forward: HashMap<String, Artifact> = HashMap::new();
    forward.insert(
        "c".into(),
        dockerfile_artifact("c", c_workspace.clone(), &["a", "b"]),
    );
    forward.insert("a".into(), dockerfile_artifact("a", a_workspace.clone(), &[]));
    forward.insert("b".into(), dockerfile_artifact("b", b_workspace.clone(), &[]));

    let mut reversed = forward.clone();
    reversed.insert(
        "c".into(),
        dockerfile_artifact("c", c_workspace, &["b", "a"]),
    );

    let forward_fp = Fingerprinter::new(&forward).fingerprint("c").await.unwrap();
    let reversed_fp = Fingerprinter::new(&reversed).fingerprint("c").await.unwrap();
    assert_eq!(forward_fp, reversed_fp);
}

#[tokio::test]
async fn changing_a_transitive_dependency_changes_the_parent_fingerprint() {
    let (_a_dir, a_workspace) = temporary_directory();
    let (_b_dir, b_workspace) = temporary_directory();
    std::fs::write(a_workspace.as_std_path().join("Dockerfile"), "FROM scratch\nCOPY f /f\n").unwrap();
    std::fs::write(a_workspace.as_std_path().join("f"), "v1").unwrap();
    std::fs::write(b_workspace.as_std_path().join("Dockerfile"), "FROM scratch\n").unwrap();

    let mut map = HashMap::new();
    map.insert("a".into(), dockerfile_artifact("a", a_workspace.clone(), &[]));
    map.insert("b".into(), dockerfile_artifact("b", b_workspace, &["a"]));

    let before = Fingerprinter::new(&map).fingerprint("b").await.unwrap();

    std::fs::write(a_workspace.as_std_path().join("f"), "v2").unwrap();
    let after = Fingerprinter::new(&map).fingerprint("b").await.unwrap();

    assert_ne!(before, after, "b's fingerprint must reflect a's changed dependency");
}

#[tokio::test]
async fn concurrent_calls_for_the_same_artifact_single_flight() {
    let (_dir, workspace) = temporary_directory();
    std::fs::write(workspace.as_std_path().join("Dockerfile"), "FROM scratch\n").unwrap();

    let mut map = HashMap::new();
    map.insert("a".into(), dockerfile_artifact("a", workspace, &[]));
    let fingerprinter = Fingerprinter::new(&map);

    let (one, two, three) = tokio::join!(
        fingerprinter.fingerprint("a"),
        fingerprinter.fingerprint("a"),
        fingerprinter.fingerprint("a"),
    );
    let (one, two, three) = (one.unwrap(), two.unwrap(), three.unwrap());
    assert_eq!(one, two);
    assert_eq!(two, three);
}
