//! Document model: schema-less BSON documents with dotted-path access.

pub mod path;

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single value inside a document (null, bool, number, string, array, nested document, ...).
pub type Value = bson::Bson;

/// An insertion-ordered mapping from field name to [`Value`].
pub type Document = bson::Document;

/// Name of the identifier field every stored document carries.
pub const ID_FIELD: &str = "_id";

/// How `_id` values are generated for documents inserted without one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    #[default]
    ObjectId,
    Uuid,
}

impl IdStrategy {
    #[must_use]
    pub fn generate(self) -> Value {
        match self {
            Self::ObjectId => Value::ObjectId(ObjectId::new()),
            Self::Uuid => Value::String(Uuid::new_v4().to_string()),
        }
    }
}

/// Returns the document's `_id`, generating one (as the first field) when absent.
pub fn ensure_id(doc: &mut Document, strategy: IdStrategy) -> Value {
    if let Some(id) = doc.get(ID_FIELD) {
        return id.clone();
    }
    let id = strategy.generate();
    let mut out = Document::new();
    out.insert(ID_FIELD, id.clone());
    for (k, v) in std::mem::take(doc) {
        out.insert(k, v);
    }
    *doc = out;
    id
}

/// Type name used in error messages and `$type` diagnostics.
#[must_use]
pub fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Double(_) => "double",
        Value::String(_) => "string",
        Value::Document(_) => "object",
        Value::Array(_) => "array",
        Value::Boolean(_) => "bool",
        Value::Null => "null",
        Value::Int32(_) => "int",
        Value::Int64(_) => "long",
        Value::DateTime(_) => "date",
        Value::ObjectId(_) => "objectId",
        Value::RegularExpression(_) => "regex",
        Value::Decimal128(_) => "decimal",
        Value::Timestamp(_) => "timestamp",
        Value::Binary(_) => "binData",
        Value::MinKey => "minKey",
        Value::MaxKey => "maxKey",
        _ => "other",
    }
}
