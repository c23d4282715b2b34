use std::collections::BTreeMap;

use devloop::artifact::BuildResult;
use devloop::manifest::{parse_documents, rewrite_images};
use pretty_assertions::assert_eq;

const MULTI_DOC_MANIFEST: &str = "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  template:
    spec:
      containers:
      - name: web
        image: web
      - name: sidecar
        image: sidecar:v1@sha256:deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef
---
apiVersion: v1
kind: Service
metadata:
  name: web
spec:
  selector:
    app: web
";

fn built(name: &str, tag: &str) -> BuildResult {
    BuildResult { image_name: name.into(), tag: tag.into(), local_only: false }
}

#[test]
fn rewrites_across_a_multi_document_manifest_without_disturbing_services() {
    let mut docs = parse_documents(MULTI_DOC_MANIFEST).unwrap();
    assert_eq!(docs.len(), 2);

    let built_images = vec![built("web", "abc123")];
    let mut user_labels = BTreeMap::new();
    user_labels.insert("team".to_string(), "platform".to_string());

    let report = rewrite_images(&mut docs, &built_images, "run-42", "kubectl", &user_labels).unwrap();
    assert!(report.warnings.is_empty(), "unexpected warnings: {:?}", report.warnings);

    let containers = &docs[0]["spec"]["template"]["spec"]["containers"];
    assert_eq!(containers[0]["image"].as_str().unwrap(), "web:abc123");
    // Digest-pinned sidecar image must be left untouched.
    assert_eq!(
        containers[1]["image"].as_str().unwrap(),
        "sidecar:v1@sha256:deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef"
    );

    let deployment_labels = &docs[0]["metadata"]["labels"];
    assert_eq!(deployment_labels["devloop.dev/run-id"].as_str().unwrap(), "run-42");
    assert_eq!(deployment_labels["team"].as_str().unwrap(), "platform");

    // The Service document must not gain the managed label set.
    assert!(docs[1]["metadata"]["labels"].is_null());
}

#[test]
fn unparseable_image_scalar_is_reported_but_does_not_abort_the_pass() {
    let mut docs = parse_documents("kind: Deployment\nmetadata: {name: app}\nspec: {containers: [{image: ''}]}\n").unwrap();
    let report = rewrite_images(&mut docs, &[], "run-1", "kubectl", &BTreeMap::new()).unwrap();
    assert!(report.warnings.iter().any(|w| w.contains("couldn't parse")));
}
