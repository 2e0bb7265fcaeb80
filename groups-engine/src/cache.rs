use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Process-wide memo of values derived from the directory.
///
/// Entries are tagged with the generation they were computed in; bumping the
/// generation invalidates all of them at once.
#[derive(Debug, Default)]
pub struct Cache {
    generation: AtomicU64,
    /// remote name => ids of the groups synchronised from it
    remote_groups: DashMap<String, (u64, BTreeSet<String>)>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn remote_groups(&self, remote_name: &str) -> Option<BTreeSet<String>> {
        let generation = self.generation();
        self.remote_groups
            .get(remote_name)
            .filter(|entry| entry.0 == generation)
            .map(|entry| entry.1.clone())
    }

    pub fn set_remote_groups(&self, remote_name: &str, ids: BTreeSet<String>) {
        self.remote_groups
            .insert(remote_name.to_string(), (self.generation(), ids));
    }

    pub fn clear_all(&self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.remote_groups.clear();
        debug!("cache cleared, generation {generation}");
    }
}
