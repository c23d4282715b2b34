//! Artifacts: the units of build work described by a pipeline, and the DAG
//! they form via `requires` edges.

use std::collections::{HashMap, HashSet};

use color_eyre::{Result, eyre::bail};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::builder::BuilderKind;
use crate::path::AbsDirPath;

/// A unit of build work producing one container image.
///
/// Image names are unique within a pipeline (enforced by [`validate_dag`]).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Artifact {
    /// Logical image name, unique within the pipeline.
    pub name: String,

    /// Workspace directory the builder operates from.
    #[serde(skip)]
    pub workspace: Option<AbsDirPath>,

    /// Which builder produces this artifact, and its parameters.
    pub builder: BuilderKind,

    /// Image names this artifact's build depends on.
    #[serde(default)]
    pub requires: Vec<String>,
}

/// The outcome of tagging and building (or retrieving from cache) one artifact.
#[derive(Clone, Debug, Eq, PartialEq, Display, Serialize, Deserialize)]
#[display("{image_name}:{tag}")]
pub struct BuildResult {
    pub image_name: String,
    pub tag: String,

    /// Whether the tag is resolvable only by the local daemon — if so, it must
    /// never be referenced by digest downstream.
    pub local_only: bool,
}

/// Validate that the artifact set forms an acyclic graph with unique names.
///
/// Runs at pipeline load time per the invariant in `spec.md` §3.
pub fn validate_dag(artifacts: &[Artifact]) -> Result<()> {
    let mut seen = HashSet::new();
    for artifact in artifacts {
        if !seen.insert(artifact.name.as_str()) {
            bail!("duplicate artifact name: {}", artifact.name);
        }
    }

    let by_name: HashMap<&str, &Artifact> =
        artifacts.iter().map(|a| (a.name.as_str(), a)).collect();

    for artifact in artifacts {
        for dep in &artifact.requires {
            if !by_name.contains_key(dep.as_str()) {
                bail!(
                    "artifact {} requires unknown artifact {dep}",
                    artifact.name
                );
            }
        }
    }

    #[derive(Copy, Clone, Eq, PartialEq)]
    enum Mark {
        InProgress,
        Done,
    }
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    fn visit<'a>(
        name: &'a str,
        by_name: &HashMap<&'a str, &'a Artifact>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Result<()> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                stack.push(name);
                bail!("cyclic requires edge detected: {}", stack.join(" -> "));
            }
            None => {}
        }
        marks.insert(name, Mark::InProgress);
        stack.push(name);
        if let Some(artifact) = by_name.get(name) {
            for dep in &artifact.requires {
                visit(dep, by_name, marks, stack)?;
            }
        }
        stack.pop();
        marks.insert(name, Mark::Done);
        Ok(())
    }

    for artifact in artifacts {
        visit(&artifact.name, &by_name, &mut marks, &mut Vec::new())?;
    }

    Ok(())
}
