//! The Image-Reference Rewriter: parses Kubernetes manifests as a sequence of
//! YAML documents, rewrites `image:` scalars to pinned build tags, and
//! injects a managed label set, per `spec.md` §4.5.
//!
//! Manifests are kept as [`serde_yaml::Value`] trees rather than typed
//! `k8s-openapi` structs so arbitrary, not-fully-modelled manifest shapes
//! round-trip losslessly.

use std::collections::{BTreeMap, HashSet};

use color_eyre::Result;
use serde::Deserialize as _;
use serde_yaml::Value;
use tracing::{instrument, warn};

use crate::artifact::BuildResult;

/// A fully parsed image reference: `[registry/]repo[:tag][@digest]`.
#[derive(Clone, Debug, Eq, PartialEq)]
struct ImageRef {
    repo: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    fn parse(s: &str) -> Option<Self> {
        let (repo_and_tag, digest) = match s.split_once('@') {
            Some((r, d)) => (r, Some(d.to_string())),
            None => (s, None),
        };

        // A `:` after the last `/` is a tag separator; one before it (or none)
        // is part of a registry host:port.
        let last_slash = repo_and_tag.rfind('/');
        let tag_sep = repo_and_tag.rfind(':');
        let (repo, tag) = match (last_slash, tag_sep) {
            (Some(slash), Some(colon)) if colon > slash => (
                repo_and_tag[..colon].to_string(),
                Some(repo_and_tag[colon + 1..].to_string()),
            ),
            (None, Some(colon)) => (
                repo_and_tag[..colon].to_string(),
                Some(repo_and_tag[colon + 1..].to_string()),
            ),
            _ => (repo_and_tag.to_string(), None),
        };

        if repo.is_empty() {
            return None;
        }
        Some(Self { repo, tag, digest })
    }

    fn is_fully_qualified(&self) -> bool {
        self.tag.is_some() && self.digest.is_some()
    }
}

/// Outcome of one rewrite pass, carrying warnings per `spec.md` §4.5.
#[derive(Debug, Default)]
pub struct RewriteReport {
    pub warnings: Vec<String>,
}

/// Skaffold-managed label set injected into every top-level `metadata.labels`
/// after rewrite, except `Service` objects (documented compatibility
/// constraint, `spec.md` §4.5 and §9's Open Questions).
pub fn rewrite_images(
    docs: &mut [Value],
    built: &[BuildResult],
    run_id: &str,
    deployer_kind: &str,
    user_labels: &BTreeMap<String, String>,
) -> Result<RewriteReport> {
    let by_repo: std::collections::HashMap<&str, &BuildResult> =
        built.iter().map(|r| (r.image_name.as_str(), r)).collect();
    let mut consumed = HashSet::new();
    let mut report = RewriteReport::default();

    for doc in docs.iter_mut() {
        walk_images(doc, &by_repo, &mut consumed, &mut report.warnings);
        inject_labels(doc, run_id, deployer_kind, user_labels);
    }

    for result in built {
        if !consumed.contains(result.image_name.as_str()) {
            report
                .warnings
                .push(format!("built image not used by deployment: {}", result.image_name));
        }
    }

    Ok(report)
}

fn walk_images<'a>(
    value: &mut Value,
    built: &std::collections::HashMap<&'a str, &'a BuildResult>,
    consumed: &mut HashSet<&'a str>,
    warnings: &mut Vec<String>,
) {
    match value {
        Value::Mapping(map) => {
            for (key, val) in map.iter_mut() {
                if key.as_str() == Some("image") {
                    if let Some(s) = val.as_str() {
                        if let Some(rewritten) = rewrite_one(s, built, consumed, warnings) {
                            *val = Value::String(rewritten);
                        }
                    }
                    continue;
                }
                walk_images(val, built, consumed, warnings);
            }
        }
        Value::Sequence(seq) => {
            for item in seq.iter_mut() {
                walk_images(item, built, consumed, warnings);
            }
        }
        _ => {}
    }
}

fn rewrite_one<'a>(
    raw: &str,
    built: &std::collections::HashMap<&'a str, &'a BuildResult>,
    consumed: &mut HashSet<&'a str>,
    warnings: &mut Vec<String>,
) -> Option<String> {
    let Some(parsed) = ImageRef::parse(raw) else {
        warnings.push(format!("couldn't parse image: {raw}"));
        return None;
    };

    if parsed.is_fully_qualified() {
        return None;
    }

    match built.get_key_value(parsed.repo.as_str()) {
        Some((&repo, result)) => {
            consumed.insert(repo);
            Some(format!("{}:{}", result.image_name, result.tag))
        }
        None => {
            let known_unqualified = parsed.tag.as_deref() == Some("latest") || parsed.tag.is_none();
            if known_unqualified {
                warnings.push(format!("image referenced but no matching build result: {raw}"));
            }
            None
        }
    }
}

fn inject_labels(
    doc: &mut Value,
    run_id: &str,
    deployer_kind: &str,
    user_labels: &BTreeMap<String, String>,
) {
    let Value::Mapping(root) = doc else { return };
    let kind = root
        .get(Value::String("kind".into()))
        .and_then(Value::as_str)
        .unwrap_or_default();
    if kind.eq_ignore_ascii_case("service") {
        return;
    }

    let metadata = root
        .entry(Value::String("metadata".into()))
        .or_insert_with(|| Value::Mapping(Default::default()));
    let Value::Mapping(metadata) = metadata else {
        return;
    };
    let labels = metadata
        .entry(Value::String("labels".into()))
        .or_insert_with(|| Value::Mapping(Default::default()));
    let Value::Mapping(labels) = labels else { return };

    labels.insert(
        Value::String("devloop.dev/run-id".into()),
        Value::String(run_id.into()),
    );
    labels.insert(
        Value::String("devloop.dev/deployer".into()),
        Value::String(deployer_kind.into()),
    );
    for (key, value) in user_labels {
        labels.insert(Value::String(key.clone()), Value::String(value.clone()));
    }
}

/// Parse a multi-document YAML manifest string.
#[instrument(skip(yaml))]
pub fn parse_documents(yaml: &str) -> Result<Vec<Value>> {
    let mut docs = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(yaml) {
        match Value::deserialize(doc) {
            Ok(Value::Null) => continue,
            Ok(value) => docs.push(value),
            Err(err) => {
                warn!(%err, "skipping unparseable manifest document");
                return Err(err.into());
            }
        }
    }
    Ok(docs)
}
