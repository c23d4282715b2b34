use devloop::builder::BuilderKind;
use devloop::deploy::Deployer;
use devloop::pipeline::Pipeline;
use pretty_assertions::assert_eq;

const FULL_PIPELINE: &str = "\
apiVersion: devloop/v1
kind: Pipeline
build:
  tagPolicy:
    strategy: contentSha
  artifacts:
    - name: api
      builder:
        kind: dockerfile
        path: Dockerfile
      requires: []
    - name: worker
      builder:
        kind: dockerfile
        path: Dockerfile.worker
      requires: [api]
test:
  - imageName: api
    command: pytest
deploy:
  deployer:
    kind: kubectl
    manifestGlobs: [k8s/*.yaml]
portForward:
  - resourceName: api
    remotePort: 8080
    localPort: 4503
profiles:
  - name: staging
    patches: []
";

#[test]
fn parses_every_top_level_section_of_a_full_pipeline() {
    let pipeline = Pipeline::parse(FULL_PIPELINE).unwrap();

    assert_eq!(pipeline.build.artifacts.len(), 2);
    assert_eq!(pipeline.build.artifacts[1].requires, vec!["api".to_string()]);
    assert!(matches!(pipeline.build.artifacts[0].builder, BuilderKind::Dockerfile(_)));

    assert_eq!(pipeline.test.len(), 1);
    assert_eq!(pipeline.test[0].image_name, "api");

    let Deployer::Kubectl { manifest_globs } = &pipeline.deploy.deployer;
    assert_eq!(manifest_globs, &vec!["k8s/*.yaml".to_string()]);

    assert_eq!(pipeline.port_forward.len(), 1);
    assert_eq!(pipeline.port_forward[0].remote_port, 8080);
    assert_eq!(pipeline.port_forward[0].forward_key().remote_port, 8080);

    assert_eq!(pipeline.profiles.len(), 1);
    assert_eq!(pipeline.profiles[0].name, "staging");

    // Every artifact without an explicit workspace is defaulted to the
    // current directory by `Pipeline::parse`.
    assert!(pipeline.build.artifacts.iter().all(|a| a.workspace.is_some()));
}

#[test]
fn rejects_a_requires_edge_to_an_unknown_artifact() {
    let yaml = "\
build:
  artifacts:
    - name: api
      builder: {kind: dockerfile}
      requires: [ghost]
";
    let err = Pipeline::parse(yaml).unwrap_err();
    assert!(err.to_string().contains("unknown artifact"));
}
