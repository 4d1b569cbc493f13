use std::sync::Mutex;

use ahash::HashMap;

use crate::kubernetes::resource::ResourceId;

/// Remembers the last fully processed `resourceVersion` per object.
/// Entries are only ever overwritten; a restart clears the map.
// TODO: evict entries when a delete event retires an object so the map
// stays bounded in churning namespaces.
#[derive(Debug, Default)]
pub struct Ledger {
    processed: Mutex<HashMap<ResourceId, String>>,
}

impl Ledger {
    pub fn seen(&self, id: &ResourceId, resource_version: &str) -> bool {
        let processed = self.processed.lock().expect("ledger mutex poisoned");
        processed
            .get(id)
            .is_some_and(|last| last == resource_version)
    }

    pub fn mark(&self, id: ResourceId, resource_version: String) {
        let mut processed = self.processed.lock().expect("ledger mutex poisoned");
        processed.insert(id, resource_version);
    }
}
