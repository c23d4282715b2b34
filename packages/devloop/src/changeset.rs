//! The Change Set: an in-memory delta accumulator recording which artifacts
//! need a rebuild, a hot resync, or neither, ahead of a dispatcher run.

use std::collections::BTreeSet;

/// Per-iteration record of what the watcher found stale.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ChangeSet {
    /// Artifacts whose fingerprint changed and must be rebuilt.
    pub rebuild: BTreeSet<String>,

    /// Artifacts with a matching [`crate::sync::SyncRule`] for the changed
    /// file, eligible for a hot sync instead of a rebuild.
    pub resync: BTreeSet<String>,

    /// Whether a deploy-time dependency (manifests, values files) changed,
    /// requiring a redeploy even with no rebuilt images.
    pub redeploy: bool,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.rebuild.is_empty() && self.resync.is_empty() && !self.redeploy
    }

    pub fn mark_rebuild(&mut self, image_name: impl Into<String>) {
        let name = image_name.into();
        self.resync.remove(&name);
        self.rebuild.insert(name);
    }

    pub fn mark_resync(&mut self, image_name: impl Into<String>) {
        let name = image_name.into();
        if !self.rebuild.contains(&name) {
            self.resync.insert(name);
        }
    }

    pub fn mark_redeploy(&mut self) {
        self.redeploy = true;
    }

    pub fn clear(&mut self) {
        *self = ChangeSet::default();
    }
}
