//! Aggregation expression language used by `$expr`, `$project`, `$addFields`, `$group` and
//! `$bucket`.
//!
//! Expressions are parsed once into an [`Expr`] tree and evaluated against a document. Field
//! references (`"$a.b"`) resolve relative to the current document; variables (`"$$ROOT"`,
//! `"$$sc.score"`) resolve against bindings introduced by `$filter` or the built-in roots.
//! Evaluation distinguishes a *missing* value (`None`) from an explicit null so projections can
//! omit fields that do not resolve.

mod convert;
mod eval;
mod parse;

pub use convert::ConvertTo;
pub use eval::{Vars, eval_expr, evaluate, truthy};
pub use parse::{parse_expr, parse_expr_json};

use bson::Bson;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Cmp,
    And,
    Or,
    Not,
    IfNull,
    Concat,
    SubstrCP,
    StrLenCP,
    ToUpper,
    ToLower,
    Size,
    Slice,
    ArrayElemAt,
    Year,
    Month,
    DayOfMonth,
    IsoWeekYear,
}

impl ExprOp {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "$add" => Self::Add,
            "$subtract" => Self::Subtract,
            "$multiply" => Self::Multiply,
            "$divide" => Self::Divide,
            "$eq" => Self::Eq,
            "$ne" => Self::Ne,
            "$gt" => Self::Gt,
            "$gte" => Self::Gte,
            "$lt" => Self::Lt,
            "$lte" => Self::Lte,
            "$cmp" => Self::Cmp,
            "$and" => Self::And,
            "$or" => Self::Or,
            "$not" => Self::Not,
            "$ifNull" => Self::IfNull,
            "$concat" => Self::Concat,
            "$substrCP" => Self::SubstrCP,
            "$strLenCP" => Self::StrLenCP,
            "$toUpper" => Self::ToUpper,
            "$toLower" => Self::ToLower,
            "$size" => Self::Size,
            "$slice" => Self::Slice,
            "$arrayElemAt" => Self::ArrayElemAt,
            "$year" => Self::Year,
            "$month" => Self::Month,
            "$dayOfMonth" => Self::DayOfMonth,
            "$isoWeekYear" => Self::IsoWeekYear,
            _ => return None,
        })
    }

    /// Accepted argument counts, inclusive.
    pub(crate) fn arity(self) -> (usize, usize) {
        match self {
            Self::Add | Self::Multiply | Self::And | Self::Or | Self::Concat => (0, usize::MAX),
            Self::IfNull => (2, usize::MAX),
            Self::Subtract
            | Self::Divide
            | Self::Eq
            | Self::Ne
            | Self::Gt
            | Self::Gte
            | Self::Lt
            | Self::Lte
            | Self::Cmp
            | Self::ArrayElemAt => (2, 2),
            Self::SubstrCP => (3, 3),
            Self::Slice => (2, 3),
            Self::Not
            | Self::StrLenCP
            | Self::ToUpper
            | Self::ToLower
            | Self::Size
            | Self::Year
            | Self::Month
            | Self::DayOfMonth
            | Self::IsoWeekYear => (1, 1),
        }
    }
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Bson),
    /// `"$a.b"`: path relative to `$$CURRENT`.
    Field(String),
    /// `"$$name.path"`
    Var { name: String, path: String },
    Object(Vec<(String, Expr)>),
    Array(Vec<Expr>),
    Op { op: ExprOp, args: Vec<Expr> },
    Cond { cond: Box<Expr>, then: Box<Expr>, otherwise: Box<Expr> },
    Convert { input: Box<Expr>, to: ConvertTo, on_error: Option<Box<Expr>>, on_null: Option<Box<Expr>> },
    Filter { input: Box<Expr>, var: String, cond: Box<Expr> },
}

impl Expr {
    /// Whether evaluation never depends on the document.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        match self {
            Self::Literal(_) => true,
            Self::Field(_) | Self::Var { .. } | Self::Filter { .. } => false,
            Self::Object(fields) => fields.iter().all(|(_, e)| e.is_constant()),
            Self::Array(items) => items.iter().all(Self::is_constant),
            Self::Op { args, .. } => args.iter().all(Self::is_constant),
            Self::Cond { cond, then, otherwise } => {
                cond.is_constant() && then.is_constant() && otherwise.is_constant()
            }
            Self::Convert { input, on_error, on_null, .. } => {
                input.is_constant()
                    && on_error.as_ref().is_none_or(|e| e.is_constant())
                    && on_null.as_ref().is_none_or(|e| e.is_constant())
            }
        }
    }
}
