use bson::Document;
use serde::{Deserialize, Deserializer};

use crate::errors::DbError;
use crate::utils::json::json_value_to_document;

/// One script command, e.g. `{"op": "find", "collection": "movies", "filter": {"runtime": 42}}`.
///
/// Documents are read as extended JSON, so `{"$oid": "..."}` and `{"$date": "..."}` work
/// wherever a value is expected.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Command {
    InsertOne {
        collection: String,
        #[serde(deserialize_with = "doc")]
        document: Document,
    },
    InsertMany {
        collection: String,
        #[serde(deserialize_with = "docs")]
        documents: Vec<Document>,
    },
    #[serde(rename_all = "camelCase")]
    Find {
        collection: String,
        #[serde(default, deserialize_with = "doc")]
        filter: Document,
        #[serde(default, deserialize_with = "opt_doc")]
        projection: Option<Document>,
        #[serde(default, deserialize_with = "opt_doc")]
        sort: Option<Document>,
        #[serde(default)]
        skip: Option<usize>,
        #[serde(default)]
        limit: Option<usize>,
    },
    Count {
        collection: String,
        #[serde(default, deserialize_with = "doc")]
        filter: Document,
    },
    #[serde(rename_all = "camelCase")]
    UpdateOne {
        collection: String,
        #[serde(deserialize_with = "doc")]
        filter: Document,
        #[serde(deserialize_with = "doc")]
        update: Document,
        #[serde(default)]
        upsert: bool,
        #[serde(default, deserialize_with = "docs")]
        array_filters: Vec<Document>,
    },
    #[serde(rename_all = "camelCase")]
    UpdateMany {
        collection: String,
        #[serde(deserialize_with = "doc")]
        filter: Document,
        #[serde(deserialize_with = "doc")]
        update: Document,
        #[serde(default)]
        upsert: bool,
        #[serde(default, deserialize_with = "docs")]
        array_filters: Vec<Document>,
    },
    ReplaceOne {
        collection: String,
        #[serde(deserialize_with = "doc")]
        filter: Document,
        #[serde(deserialize_with = "doc")]
        replacement: Document,
        #[serde(default)]
        upsert: bool,
    },
    DeleteOne {
        collection: String,
        #[serde(deserialize_with = "doc")]
        filter: Document,
    },
    DeleteMany {
        collection: String,
        #[serde(deserialize_with = "doc")]
        filter: Document,
    },
    CreateIndex {
        collection: String,
        #[serde(deserialize_with = "doc")]
        keys: Document,
    },
    ListIndexes {
        collection: String,
    },
    DropIndex {
        collection: String,
        name: String,
    },
    Aggregate {
        collection: String,
        #[serde(deserialize_with = "docs")]
        pipeline: Vec<Document>,
    },
    DropCollection {
        collection: String,
    },
    ListCollections,
}

impl Command {
    #[must_use]
    pub const fn op_name(&self) -> &'static str {
        match self {
            Self::InsertOne { .. } => "insertOne",
            Self::InsertMany { .. } => "insertMany",
            Self::Find { .. } => "find",
            Self::Count { .. } => "count",
            Self::UpdateOne { .. } => "updateOne",
            Self::UpdateMany { .. } => "updateMany",
            Self::ReplaceOne { .. } => "replaceOne",
            Self::DeleteOne { .. } => "deleteOne",
            Self::DeleteMany { .. } => "deleteMany",
            Self::CreateIndex { .. } => "createIndex",
            Self::ListIndexes { .. } => "listIndexes",
            Self::DropIndex { .. } => "dropIndex",
            Self::Aggregate { .. } => "aggregate",
            Self::DropCollection { .. } => "dropCollection",
            Self::ListCollections => "listCollections",
        }
    }
}

/// # Errors
/// `Json` when the text is not a valid command object.
pub fn parse_command_json(json: &str) -> Result<Command, DbError> {
    Ok(serde_json::from_str(json)?)
}

fn doc<'de, D: Deserializer<'de>>(d: D) -> Result<Document, D::Error> {
    let v = serde_json::Value::deserialize(d)?;
    json_value_to_document(&v).map_err(serde::de::Error::custom)
}

fn opt_doc<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Document>, D::Error> {
    match Option::<serde_json::Value>::deserialize(d)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => json_value_to_document(&v).map(Some).map_err(serde::de::Error::custom),
    }
}

fn docs<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Document>, D::Error> {
    Vec::<serde_json::Value>::deserialize(d)?
        .iter()
        .map(|v| json_value_to_document(v).map_err(serde::de::Error::custom))
        .collect()
}
