//! `docql`: an in-memory document store with MongoDB-style filters, update operators and
//! aggregation pipelines.
//!
//! ```
//! use docql::{Database, FindOptions, UpdateOptions};
//! use docql::bson::doc;
//!
//! let db = Database::new();
//! db.insert_one("persons", doc! {"name": "Chris", "age": 25}).unwrap();
//! db.update_one("persons", &doc! {"name": "Chris"}, &doc! {"$inc": {"age": 1}}, &UpdateOptions::default())
//!     .unwrap();
//! let found = db.find("persons", &doc! {"name": "Chris"}, &FindOptions::default()).unwrap();
//! assert_eq!(found[0].get_i32("age").unwrap(), 26);
//! ```

pub mod aggregate;
pub mod cli;
pub mod collection;
pub mod config;
pub mod document;
pub mod engine;
pub mod errors;
pub mod expr;
pub mod logger;
pub mod query;
pub mod telemetry;
pub mod update;
pub mod utils;

pub use bson;

use std::path::Path;
use std::sync::Arc;

pub use crate::collection::{Collection, IndexSpec};
pub use crate::config::EngineOptions;
pub use crate::document::{Document, Value};
use crate::engine::Engine;
pub use crate::errors::DbError;
pub use crate::query::{DeleteReport, FindOptions, UpdateReport};
pub use crate::update::UpdateOptions;

/// Entry point: every operation names its collection. Writes create the collection on first
/// use; reads of a missing collection behave as reads of an empty one.
#[derive(Debug, Default)]
pub struct Database {
    engine: Arc<Engine>,
}

impl Database {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_options(options: EngineOptions) -> Self {
        Self { engine: Arc::new(Engine::new(options)) }
    }

    /// Builds a database from configuration resolved by [`config::load`].
    ///
    /// # Errors
    /// Configuration loading errors.
    pub fn open_with_config(path: Option<&Path>) -> Result<Self, DbError> {
        Ok(Self::with_options(config::load(path)?))
    }

    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        self.engine.options()
    }

    /// The named collection, created when missing.
    #[must_use]
    pub fn collection(&self, name: &str) -> Arc<Collection> {
        self.engine.collection(name)
    }

    fn existing(&self, name: &str) -> Result<Arc<Collection>, DbError> {
        self.engine.get_collection(name).ok_or_else(|| DbError::NoSuchCollection(name.to_string()))
    }

    #[must_use]
    pub fn list_collection_names(&self) -> Vec<String> {
        self.engine.list_collection_names()
    }

    pub fn drop_collection(&self, name: &str) -> bool {
        self.engine.drop_collection(name)
    }

    /// # Errors
    /// `DuplicateKey` when the `_id` already exists.
    pub fn insert_one(&self, collection: &str, doc: Document) -> Result<Value, DbError> {
        self.collection(collection).insert_one(doc)
    }

    /// # Errors
    /// `DuplicateKey` from the first clashing document; earlier documents stay inserted.
    pub fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<Vec<Value>, DbError> {
        self.collection(collection).insert_many(docs)
    }

    /// # Errors
    /// `InvalidFilter` for malformed filters, sorts or projections.
    pub fn find(&self, collection: &str, filter: &Document, opts: &FindOptions) -> Result<Vec<Document>, DbError> {
        match self.engine.get_collection(collection) {
            Some(c) => c.find(filter, opts),
            None => {
                query::parse_filter(filter)?;
                Ok(Vec::new())
            }
        }
    }

    /// # Errors
    /// As [`Database::find`].
    pub fn find_one(
        &self,
        collection: &str,
        filter: &Document,
        projection: Option<&Document>,
    ) -> Result<Option<Document>, DbError> {
        match self.engine.get_collection(collection) {
            Some(c) => c.find_one(filter, projection),
            None => {
                query::parse_filter(filter)?;
                Ok(None)
            }
        }
    }

    /// # Errors
    /// `InvalidFilter` for malformed filters.
    pub fn count_documents(&self, collection: &str, filter: &Document) -> Result<u64, DbError> {
        match self.engine.get_collection(collection) {
            Some(c) => c.count_documents(filter),
            None => {
                query::parse_filter(filter)?;
                Ok(0)
            }
        }
    }

    /// # Errors
    /// See [`Collection::update_one`].
    pub fn update_one(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
        opts: &UpdateOptions,
    ) -> Result<UpdateReport, DbError> {
        self.collection(collection).update_one(filter, update, opts)
    }

    /// # Errors
    /// See [`Collection::update_many`].
    pub fn update_many(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
        opts: &UpdateOptions,
    ) -> Result<UpdateReport, DbError> {
        self.collection(collection).update_many(filter, update, opts)
    }

    /// # Errors
    /// See [`Collection::replace_one`].
    pub fn replace_one(
        &self,
        collection: &str,
        filter: &Document,
        replacement: Document,
        upsert: bool,
    ) -> Result<UpdateReport, DbError> {
        self.collection(collection).replace_one(filter, replacement, upsert)
    }

    /// # Errors
    /// `InvalidFilter` for malformed filters.
    pub fn delete_one(&self, collection: &str, filter: &Document) -> Result<DeleteReport, DbError> {
        match self.engine.get_collection(collection) {
            Some(c) => c.delete_one(filter),
            None => query::parse_filter(filter).map(|_| DeleteReport::default()),
        }
    }

    /// # Errors
    /// `InvalidFilter` for malformed filters.
    pub fn delete_many(&self, collection: &str, filter: &Document) -> Result<DeleteReport, DbError> {
        match self.engine.get_collection(collection) {
            Some(c) => c.delete_many(filter),
            None => query::parse_filter(filter).map(|_| DeleteReport::default()),
        }
    }

    /// # Errors
    /// See [`Collection::aggregate`].
    pub fn aggregate(&self, collection: &str, stages: &[Document]) -> Result<Vec<Document>, DbError> {
        match self.engine.get_collection(collection) {
            Some(c) => c.aggregate(stages),
            None => {
                let pipeline = aggregate::parse_pipeline(stages)?;
                aggregate::run_pipeline(Vec::new(), &pipeline, self.options().pipeline())
            }
        }
    }

    /// # Errors
    /// `InvalidIndex` for malformed specs.
    pub fn create_index(&self, collection: &str, keys: &Document) -> Result<String, DbError> {
        self.collection(collection).create_index(keys)
    }

    /// # Errors
    /// `NoSuchCollection` when the collection does not exist.
    pub fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>, DbError> {
        Ok(self.existing(collection)?.list_indexes())
    }

    /// # Errors
    /// `NoSuchCollection`, or `InvalidIndex` for `_id_` and unknown names.
    pub fn drop_index(&self, collection: &str, name: &str) -> Result<(), DbError> {
        self.existing(collection)?.drop_index(name)
    }
}
