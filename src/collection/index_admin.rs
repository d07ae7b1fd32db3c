use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use super::core::Collection;
use crate::document::ID_FIELD;
use crate::errors::DbError;
use crate::telemetry;
use crate::utils::num::as_i64;

pub const ID_INDEX_NAME: &str = "_id_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    Ascending,
    Descending,
    Geo2dSphere,
}

impl IndexKind {
    fn from_bson(v: &Bson) -> Option<Self> {
        match v {
            Bson::String(s) if s == "2dsphere" => Some(Self::Geo2dSphere),
            n => match as_i64(n) {
                Some(1) => Some(Self::Ascending),
                Some(-1) => Some(Self::Descending),
                _ => None,
            },
        }
    }

    fn to_bson(self) -> Bson {
        match self {
            Self::Ascending => Bson::Int32(1),
            Self::Descending => Bson::Int32(-1),
            Self::Geo2dSphere => Bson::String("2dsphere".into()),
        }
    }

    const fn suffix(self) -> &'static str {
        match self {
            Self::Ascending => "1",
            Self::Descending => "-1",
            Self::Geo2dSphere => "2dsphere",
        }
    }
}

/// Index metadata. Indexes never change query results; they are recorded and listed only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Vec<(String, IndexKind)>,
}

impl IndexSpec {
    pub(crate) fn id_index() -> Self {
        Self { name: ID_INDEX_NAME.into(), keys: vec![(ID_FIELD.into(), IndexKind::Ascending)] }
    }

    /// Parses `{field: 1 | -1 | "2dsphere", ...}` and derives the default name
    /// (`age_1`, `location_2dsphere`, `a_1_b_-1`).
    ///
    /// # Errors
    /// `InvalidIndex` for an empty spec or an unsupported key type.
    pub fn parse(keys: &Document) -> Result<Self, DbError> {
        if keys.is_empty() {
            return Err(DbError::InvalidIndex("index key pattern must not be empty".into()));
        }
        let mut parsed = Vec::with_capacity(keys.len());
        for (field, v) in keys {
            if field.is_empty() || field.starts_with('$') {
                return Err(DbError::InvalidIndex(format!("invalid index field '{field}'")));
            }
            let kind = IndexKind::from_bson(v)
                .ok_or_else(|| DbError::InvalidIndex(format!("unsupported index type for '{field}': {v}")))?;
            parsed.push((field.clone(), kind));
        }
        let name = parsed.iter().map(|(f, k)| format!("{f}_{}", k.suffix())).collect::<Vec<_>>().join("_");
        Ok(Self { name, keys: parsed })
    }

    #[must_use]
    pub fn to_document(&self) -> Document {
        let mut key = Document::new();
        for (f, k) in &self.keys {
            key.insert(f.clone(), k.to_bson());
        }
        let mut out = Document::new();
        out.insert("name", self.name.clone());
        out.insert("key", key);
        out
    }
}

impl Collection {
    /// Records an index and returns its name. Creating an identical index again is a no-op.
    ///
    /// # Errors
    /// `InvalidIndex` for malformed specs or when the derived name is taken by different keys.
    pub fn create_index(&self, keys: &Document) -> Result<String, DbError> {
        let spec = IndexSpec::parse(keys)?;
        let mut indexes = self.indexes.write();
        if let Some(existing) = indexes.iter().find(|i| i.name == spec.name) {
            if existing.keys != spec.keys {
                return Err(DbError::InvalidIndex(format!("index '{}' already exists with different keys", spec.name)));
            }
            return Ok(spec.name);
        }
        let name = spec.name.clone();
        indexes.push(spec);
        telemetry::log_audit("create_index", self.name(), 1);
        log::debug!("created index {name} on {}", self.name());
        Ok(name)
    }

    #[must_use]
    pub fn list_indexes(&self) -> Vec<IndexSpec> {
        self.indexes.read().clone()
    }

    /// # Errors
    /// `InvalidIndex` when `name` is `_id_` or does not exist.
    pub fn drop_index(&self, name: &str) -> Result<(), DbError> {
        if name == ID_INDEX_NAME {
            return Err(DbError::InvalidIndex("cannot drop _id index".into()));
        }
        let mut indexes = self.indexes.write();
        let before = indexes.len();
        indexes.retain(|i| i.name != name);
        if indexes.len() == before {
            return Err(DbError::InvalidIndex(format!("index not found with name [{name}]")));
        }
        telemetry::log_audit("drop_index", self.name(), 1);
        Ok(())
    }
}
