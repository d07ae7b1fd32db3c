use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::collection::Collection;
use crate::config::EngineOptions;

/// Registry of named collections. Collections are created on first write; reads of unknown
/// names see nothing instead of creating one.
#[derive(Debug)]
pub struct Engine {
    options: Arc<EngineOptions>,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}

impl Engine {
    #[must_use]
    pub fn new(options: EngineOptions) -> Self {
        Self { options: Arc::new(options), collections: RwLock::new(HashMap::new()) }
    }

    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    #[must_use]
    pub fn get_collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections.read().get(name).cloned()
    }

    /// Returns the named collection, creating it when missing.
    pub fn collection(&self, name: &str) -> Arc<Collection> {
        if let Some(c) = self.get_collection(name) {
            return c;
        }
        let mut map = self.collections.write();
        map.entry(name.to_string())
            .or_insert_with(|| {
                log::debug!("creating collection {name}");
                Arc::new(Collection::new(name, Arc::clone(&self.options)))
            })
            .clone()
    }

    /// Names in ascending order.
    #[must_use]
    pub fn list_collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns whether a collection was removed.
    pub fn drop_collection(&self, name: &str) -> bool {
        let removed = self.collections.write().remove(name).is_some();
        if removed {
            crate::telemetry::log_audit("drop_collection", name, 1);
        }
        removed
    }
}
