//! Filter evaluation.
//!
//! Leaf conditions follow the implicit array rule: when a path resolves to an array, the
//! condition holds if it holds for the array as a whole or for any of its elements. Paths that
//! fan out through arrays of documents (`"hobbies.title"`) are tested value by value. The index
//! of the first array element that satisfied a leaf condition is recorded for the positional
//! `$` update operator.

use bson::{Bson, Document};

use super::geo;
use super::order::{compare_for_query, values_equal};
use super::types::{CmpOp, Filter};
use crate::document::path::{self, Resolved};
use crate::expr::{Vars, evaluate, truthy};

/// What a filter is evaluated against: a stored document, or an arbitrary value such as an
/// array element (for `$elemMatch`, `$pull` conditions and array filters).
#[derive(Clone, Copy)]
enum Scope<'a> {
    Doc(&'a Document),
    Value(&'a Bson),
}

impl<'a> Scope<'a> {
    fn resolve(self, field: &str) -> Vec<Resolved<'a>> {
        match self {
            Self::Doc(d) => path::lookup(d, field),
            Self::Value(v) => path::lookup_value(v, field),
        }
    }

    fn document(self) -> Option<&'a Document> {
        match self {
            Self::Doc(d) | Self::Value(Bson::Document(d)) => Some(d),
            Self::Value(_) => None,
        }
    }
}

/// Whether `doc` satisfies `filter`.
#[must_use]
pub fn eval_filter(doc: &Document, filter: &Filter) -> bool {
    let mut pos = None;
    eval(Scope::Doc(doc), filter, &mut pos)
}

/// Like [`eval_filter`], also reporting the array index that satisfied the first positional
/// leaf condition.
#[must_use]
pub fn eval_with_position(doc: &Document, filter: &Filter) -> (bool, Option<usize>) {
    let mut pos = None;
    let ok = eval(Scope::Doc(doc), filter, &mut pos);
    (ok, if ok { pos } else { None })
}

/// Evaluates a filter against a bare value. Conditions with an empty path test the value
/// itself; dotted paths descend into it when it is a document.
#[must_use]
pub fn eval_value(value: &Bson, filter: &Filter) -> bool {
    let mut pos = None;
    eval(Scope::Value(value), filter, &mut pos)
}

/// Tests `leaf` against every resolved value and, for arrays, their elements.
fn any_leaf(found: &[Resolved<'_>], pos: &mut Option<usize>, leaf: impl Fn(&Bson) -> bool) -> bool {
    for r in found {
        if leaf(r.value) {
            record(pos, r.array_index);
            return true;
        }
        if let Bson::Array(items) = r.value {
            for (i, el) in items.iter().enumerate() {
                if leaf(el) {
                    record(pos, r.array_index.or(Some(i)));
                    return true;
                }
            }
        }
    }
    false
}

fn record(pos: &mut Option<usize>, idx: Option<usize>) {
    if pos.is_none() {
        *pos = idx;
    }
}

fn equals(found: &[Resolved<'_>], target: &Bson, pos: &mut Option<usize>) -> bool {
    if matches!(target, Bson::Null) && found.is_empty() {
        return true;
    }
    any_leaf(found, pos, |v| values_equal(v, target))
}

fn member(found: &[Resolved<'_>], values: &[Bson], pos: &mut Option<usize>) -> bool {
    values.iter().any(|t| equals(found, t, pos))
}

fn eval(scope: Scope<'_>, filter: &Filter, pos: &mut Option<usize>) -> bool {
    match filter {
        Filter::True => true,
        Filter::And(fs) => fs.iter().all(|f| eval(scope, f, pos)),
        // a losing branch must not leave its array index behind
        Filter::Or(fs) => fs.iter().any(|f| {
            let mut branch = *pos;
            let ok = eval(scope, f, &mut branch);
            if ok {
                *pos = branch;
            }
            ok
        }),
        Filter::Nor(fs) => !fs.iter().any(|f| eval(scope, f, &mut None)),
        Filter::Not(f) => !eval(scope, f, &mut None),
        Filter::Exists { path, exists } => !scope.resolve(path).is_empty() == *exists,
        Filter::Type { path, types } => {
            any_leaf(&scope.resolve(path), pos, |v| types.iter().any(|t| t.matches(v)))
        }
        Filter::In { path, values } => member(&scope.resolve(path), values, pos),
        Filter::Nin { path, values } => !member(&scope.resolve(path), values, &mut None),
        Filter::Cmp { path, op: CmpOp::Eq, value } => equals(&scope.resolve(path), value, pos),
        Filter::Cmp { path, op: CmpOp::Ne, value } => !equals(&scope.resolve(path), value, &mut None),
        Filter::Cmp { path, op, value } => any_leaf(&scope.resolve(path), pos, |v| {
            compare_for_query(v, value).is_some_and(|o| op.accepts(o))
        }),
        Filter::Regex { path, pattern } => any_leaf(&scope.resolve(path), pos, |v| {
            matches!(v, Bson::String(s) if pattern.regex.is_match(s))
        }),
        Filter::Size { path, size } => scope
            .resolve(path)
            .iter()
            .any(|r| matches!(r.value, Bson::Array(items) if items.len() == *size)),
        Filter::All { path, values } => {
            let found = scope.resolve(path);
            !values.is_empty() && values.iter().all(|t| equals(&found, t, &mut None))
        }
        Filter::ElemMatch { path, filter } => {
            for r in scope.resolve(path) {
                let Bson::Array(items) = r.value else { continue };
                for (i, el) in items.iter().enumerate() {
                    if eval(Scope::Value(el), filter, &mut None) {
                        record(pos, r.array_index.or(Some(i)));
                        return true;
                    }
                }
            }
            false
        }
        Filter::Expr(e) => {
            let Some(doc) = scope.document() else { return false };
            match evaluate(e, &mut Vars::new(doc)) {
                Ok(v) => truthy(v.as_ref()),
                Err(err) => {
                    log::debug!("$expr evaluation failed: {err}");
                    false
                }
            }
        }
        Filter::Near { path, near } => scope
            .resolve(path)
            .iter()
            .any(|r| geo::near_distance(r.value, near).is_some()),
    }
}
