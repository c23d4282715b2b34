//! The persisted shape of one cache row.

use serde::{Deserialize, Serialize};

use crate::artifact::BuildResult;

/// One row of the artifact cache, keyed externally by `fingerprint`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub image_name: String,
    pub tag: String,
    pub digest: Option<String>,
    pub timestamp: jiff::Timestamp,
}

impl CacheEntry {
    pub fn new(fingerprint: impl Into<String>, result: &BuildResult, digest: Option<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            image_name: result.image_name.clone(),
            tag: result.tag.clone(),
            digest,
            timestamp: jiff::Timestamp::now(),
        }
    }

    pub fn to_build_result(&self, local_only: bool) -> BuildResult {
        BuildResult {
            image_name: self.image_name.clone(),
            tag: self.tag.clone(),
            local_only,
        }
    }
}
