use bson::Bson;
use ordered_float::OrderedFloat;
use std::hash::{Hash, Hasher};

use crate::utils::num::as_i64;

/// Hashable form of a group `_id`. Integral numbers of any width share one representation,
/// so `1`, `1_i64` and `1.0` fall into the same group; missing and null do too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(String),
    Date(i64),
    ObjectId([u8; 12]),
    Array(Vec<GroupKey>),
    Doc(Vec<(String, GroupKey)>),
    Other(String),
}

impl Hash for GroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => 0u8.hash(state),
            Self::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Self::Int(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            Self::Float(f) => {
                3u8.hash(state);
                f.hash(state);
            }
            Self::Str(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            Self::Date(ms) => {
                5u8.hash(state);
                ms.hash(state);
            }
            Self::ObjectId(b) => {
                6u8.hash(state);
                b.hash(state);
            }
            Self::Array(items) => {
                7u8.hash(state);
                items.hash(state);
            }
            Self::Doc(fields) => {
                8u8.hash(state);
                fields.hash(state);
            }
            Self::Other(s) => {
                9u8.hash(state);
                s.hash(state);
            }
        }
    }
}

#[must_use]
pub fn key_from_bson(v: Option<&Bson>) -> GroupKey {
    let Some(v) = v else {
        return GroupKey::Null;
    };
    match v {
        Bson::Null | Bson::Undefined => GroupKey::Null,
        Bson::Boolean(b) => GroupKey::Bool(*b),
        Bson::Int32(_) | Bson::Int64(_) => as_i64(v).map_or(GroupKey::Null, GroupKey::Int),
        Bson::Double(f) => as_i64(v).map_or(GroupKey::Float(OrderedFloat(*f)), GroupKey::Int),
        Bson::String(s) => GroupKey::Str(s.clone()),
        Bson::DateTime(d) => GroupKey::Date(d.timestamp_millis()),
        Bson::ObjectId(oid) => GroupKey::ObjectId(oid.bytes()),
        Bson::Array(items) => GroupKey::Array(items.iter().map(|i| key_from_bson(Some(i))).collect()),
        Bson::Document(d) => {
            GroupKey::Doc(d.iter().map(|(k, v)| (k.clone(), key_from_bson(Some(v)))).collect())
        }
        other => GroupKey::Other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn numeric_widths_share_a_key() {
        assert_eq!(key_from_bson(Some(&Bson::Int32(3))), key_from_bson(Some(&Bson::Double(3.0))));
        assert_ne!(key_from_bson(Some(&Bson::Int32(3))), key_from_bson(Some(&Bson::Double(3.5))));
    }

    #[test]
    fn missing_and_null_share_a_key() {
        assert_eq!(key_from_bson(None), key_from_bson(Some(&Bson::Null)));
    }

    #[test]
    fn documents_compare_structurally() {
        let a = Bson::Document(doc! {"age": 29});
        let b = Bson::Document(doc! {"age": 29_i64});
        assert_eq!(key_from_bson(Some(&a)), key_from_bson(Some(&b)));
    }
}
