use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

use super::index_admin::IndexSpec;
use crate::aggregate::{GroupKey, key_from_bson};
use crate::config::EngineOptions;
use crate::document::{Document, ID_FIELD};

/// Documents in insertion order plus the set of `_id` keys they carry.
#[derive(Debug, Default)]
pub(crate) struct Store {
    pub(crate) docs: Vec<Document>,
    pub(crate) ids: HashSet<GroupKey>,
}

impl Store {
    pub(crate) fn id_key(doc: &Document) -> GroupKey {
        key_from_bson(doc.get(ID_FIELD))
    }

    pub(crate) fn remove_at(&mut self, idx: usize) -> Document {
        let doc = self.docs.remove(idx);
        self.ids.remove(&Self::id_key(&doc));
        doc
    }
}

/// A named set of documents. Every operation takes the store lock for its whole duration:
/// reads share it, writes hold it exclusively.
#[derive(Debug)]
pub struct Collection {
    name: String,
    pub(crate) store: RwLock<Store>,
    pub(crate) indexes: RwLock<Vec<IndexSpec>>,
    pub(crate) options: Arc<EngineOptions>,
}

impl Collection {
    #[must_use]
    pub fn new(name: impl Into<String>, options: Arc<EngineOptions>) -> Self {
        Self {
            name: name.into(),
            store: RwLock::new(Store::default()),
            indexes: RwLock::new(vec![IndexSpec::id_index()]),
            options,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.store.read().docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.read().docs.is_empty()
    }

    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }
}
