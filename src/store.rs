//! # store: run-scoped artifact staging
//!
//! The [`ArtifactStore`] is the only shared mutable state in a pipeline run:
//! every build job and the source-distribution job register their artifacts
//! here, and the publisher drains it once all producers have reached a
//! terminal state. It is not a long-lived service — its lifetime is one run,
//! and there is no eviction: an accepted artifact persists until drained.
//!
//! `put` is safe under concurrent callers from distinct jobs and idempotent
//! per store key (re-submission overwrites, never duplicates).

use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::contract::Artifact;

#[derive(Debug, Default)]
pub struct ArtifactStore {
    inner: Mutex<BTreeMap<String, Artifact>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts an artifact under its store key. Re-submission with an
    /// identical key overwrites the previous entry.
    pub fn put(&self, artifact: Artifact) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let replaced = inner.insert(artifact.store_key.clone(), artifact).is_some();
        if replaced {
            debug!("Artifact re-submitted, previous entry overwritten");
        }
    }

    /// Returns every artifact accepted so far, in store-key order, emptying
    /// the store. Call only after all producers have signaled completion.
    pub fn drain_all(&self) -> Vec<Artifact> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let drained = std::mem::take(&mut *inner);
        info!(count = drained.len(), "Draining artifact store");
        drained.into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
