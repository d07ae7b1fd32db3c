use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::query::{Filter, Order, SortSpec};

/// Update operator kinds. Operators in one update document always apply in
/// [`UpdateKind::PRECEDENCE`] order, whatever order they were declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    Set,
    SetOnInsert,
    Inc,
    Mul,
    Min,
    Max,
    Rename,
    Push,
    AddToSet,
    Pull,
    Pop,
    Unset,
}

impl UpdateKind {
    pub const PRECEDENCE: [Self; 12] = [
        Self::Set,
        Self::SetOnInsert,
        Self::Inc,
        Self::Mul,
        Self::Min,
        Self::Max,
        Self::Rename,
        Self::Push,
        Self::AddToSet,
        Self::Pull,
        Self::Pop,
        Self::Unset,
    ];

    #[must_use]
    pub fn from_operator(op: &str) -> Option<Self> {
        Self::PRECEDENCE.into_iter().find(|k| k.operator() == op)
    }

    #[must_use]
    pub const fn operator(self) -> &'static str {
        match self {
            Self::Set => "$set",
            Self::SetOnInsert => "$setOnInsert",
            Self::Inc => "$inc",
            Self::Mul => "$mul",
            Self::Min => "$min",
            Self::Max => "$max",
            Self::Rename => "$rename",
            Self::Push => "$push",
            Self::AddToSet => "$addToSet",
            Self::Pull => "$pull",
            Self::Pop => "$pop",
            Self::Unset => "$unset",
        }
    }

    pub(crate) fn rank(self) -> usize {
        Self::PRECEDENCE.iter().position(|k| *k == self).unwrap_or(usize::MAX)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushSort {
    /// `$sort: 1 | -1` on scalar elements
    Value(Order),
    /// `$sort: {field: 1 | -1, ...}` on document elements
    Fields(Vec<SortSpec>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushSpec {
    pub each: Vec<Bson>,
    pub position: Option<i64>,
    pub slice: Option<i64>,
    pub sort: Option<PushSort>,
}

#[derive(Debug, Clone)]
pub enum PullCond {
    /// Remove elements deep-equal to the value.
    Equals(Bson),
    /// Remove elements satisfying the condition.
    Matches(Filter),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopEnd {
    First,
    Last,
}

#[derive(Debug, Clone)]
pub enum UpdateAction {
    /// Operand of `$set`, `$setOnInsert`, `$inc`, `$mul`, `$min`, `$max`.
    Value(Bson),
    Rename(String),
    Push(PushSpec),
    AddToSet(Vec<Bson>),
    Pull(PullCond),
    Pop(PopEnd),
    Unset,
}

#[derive(Debug, Clone)]
pub struct FieldUpdate {
    pub path: String,
    pub action: UpdateAction,
}

/// A parsed update document, grouped by operator in precedence order.
#[derive(Debug, Clone, Default)]
pub struct UpdateDoc {
    pub ops: Vec<(UpdateKind, Vec<FieldUpdate>)>,
}

impl UpdateDoc {
    /// Every target path, including `$rename` destinations.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().flat_map(|(_, fields)| {
            fields.iter().flat_map(|f| {
                let extra = match &f.action {
                    UpdateAction::Rename(to) => Some(to.as_str()),
                    _ => None,
                };
                std::iter::once(f.path.as_str()).chain(extra)
            })
        })
    }

    /// Whether any path uses the positional `$` operator.
    #[must_use]
    pub fn uses_positional(&self) -> bool {
        self.paths().any(|p| p.split('.').any(|s| s == "$"))
    }
}

/// Options for `update_one` / `update_many`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateOptions {
    #[serde(default)]
    pub upsert: bool,
    /// Conditions for `$[identifier]` segments, e.g. `{"el.grade": {"$gte": 85}}`.
    #[serde(default, rename = "arrayFilters")]
    pub array_filters: Vec<Document>,
}
