use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::document::type_name;
use crate::expr::Expr;
use crate::utils::num::is_number;

// Safety limits to prevent resource abuse
pub(crate) const MAX_IN_SET: usize = 1000;
pub(crate) const MAX_SORT_FIELDS: usize = 32;
pub(crate) const MAX_FILTER_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub order: Order,
}

/// Options for `Collection::find`.
///
/// `projection` and `sort` use MongoDB syntax (`{name: 1}`, `{"rating.average": -1}`).
/// Sorting happens before `skip`/`limit`; projection is applied last.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindOptions {
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CmpOp {
    #[must_use]
    pub fn from_operator(op: &str) -> Option<Self> {
        Some(match op {
            "$eq" => Self::Eq,
            "$ne" => Self::Ne,
            "$gt" => Self::Gt,
            "$gte" => Self::Gte,
            "$lt" => Self::Lt,
            "$lte" => Self::Lte,
            _ => return None,
        })
    }

    #[must_use]
    pub fn accepts(self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::{Equal, Greater, Less};
        match self {
            Self::Eq => ord == Equal,
            Self::Ne => ord != Equal,
            Self::Gt => ord == Greater,
            Self::Gte => ord != Less,
            Self::Lt => ord == Less,
            Self::Lte => ord != Greater,
        }
    }
}

/// Declared type tags accepted by `$type`, by alias or numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Double,
    String,
    Object,
    Array,
    BinData,
    ObjectId,
    Bool,
    Date,
    Null,
    Regex,
    Int,
    Timestamp,
    Long,
    Decimal,
    MinKey,
    MaxKey,
    Number,
}

impl TypeTag {
    #[must_use]
    pub fn from_alias(s: &str) -> Option<Self> {
        Some(match s {
            "double" => Self::Double,
            "string" => Self::String,
            "object" => Self::Object,
            "array" => Self::Array,
            "binData" => Self::BinData,
            "objectId" => Self::ObjectId,
            "bool" => Self::Bool,
            "date" => Self::Date,
            "null" => Self::Null,
            "regex" => Self::Regex,
            "int" => Self::Int,
            "timestamp" => Self::Timestamp,
            "long" => Self::Long,
            "decimal" => Self::Decimal,
            "minKey" => Self::MinKey,
            "maxKey" => Self::MaxKey,
            "number" => Self::Number,
            _ => return None,
        })
    }

    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            1 => Self::Double,
            2 => Self::String,
            3 => Self::Object,
            4 => Self::Array,
            5 => Self::BinData,
            7 => Self::ObjectId,
            8 => Self::Bool,
            9 => Self::Date,
            10 => Self::Null,
            11 => Self::Regex,
            16 => Self::Int,
            17 => Self::Timestamp,
            18 => Self::Long,
            19 => Self::Decimal,
            -1 => Self::MinKey,
            127 => Self::MaxKey,
            _ => return None,
        })
    }

    #[must_use]
    pub fn matches(self, v: &Bson) -> bool {
        match self {
            Self::Number => is_number(v),
            Self::Int => matches!(v, Bson::Int32(_)),
            Self::Long => matches!(v, Bson::Int64(_)),
            Self::Double => matches!(v, Bson::Double(_)),
            Self::Decimal => matches!(v, Bson::Decimal128(_)),
            Self::String => matches!(v, Bson::String(_)),
            Self::Object => matches!(v, Bson::Document(_)),
            Self::Array => matches!(v, Bson::Array(_)),
            Self::BinData => matches!(v, Bson::Binary(_)),
            Self::ObjectId => matches!(v, Bson::ObjectId(_)),
            Self::Bool => matches!(v, Bson::Boolean(_)),
            Self::Date => matches!(v, Bson::DateTime(_)),
            Self::Null => matches!(v, Bson::Null),
            Self::Regex => matches!(v, Bson::RegularExpression(_)),
            Self::Timestamp => matches!(v, Bson::Timestamp(_)),
            Self::MinKey => matches!(v, Bson::MinKey),
            Self::MaxKey => matches!(v, Bson::MaxKey),
        }
    }
}

/// A compiled `$regex` condition.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub source: String,
    pub options: String,
    pub regex: regex::Regex,
}

/// A `$near` / `$nearSphere` condition around a GeoJSON point, distances in meters.
#[derive(Debug, Clone, PartialEq)]
pub struct NearQuery {
    /// `(longitude, latitude)`
    pub point: (f64, f64),
    pub min_distance: Option<f64>,
    pub max_distance: Option<f64>,
}

/// Parsed filter expression. Leaf variants address a dotted `path`; an empty path refers to
/// the value being tested itself (used for `$elemMatch` on scalars, `$pull` and array filters).
#[derive(Debug, Clone)]
pub enum Filter {
    True,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    Not(Box<Filter>),
    Exists { path: String, exists: bool },
    Type { path: String, types: Vec<TypeTag> },
    In { path: String, values: Vec<Bson> },
    Nin { path: String, values: Vec<Bson> },
    Cmp { path: String, op: CmpOp, value: Bson },
    Regex { path: String, pattern: Pattern },
    Size { path: String, size: usize },
    All { path: String, values: Vec<Bson> },
    ElemMatch { path: String, filter: Box<Filter> },
    Expr(Expr),
    Near { path: String, near: NearQuery },
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct UpdateReport {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<Bson>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    pub deleted: u64,
}

pub(crate) fn describe(v: &Bson) -> String {
    format!("{v} ({})", type_name(v))
}
