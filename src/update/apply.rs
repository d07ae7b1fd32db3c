//! Applying parsed updates to documents.
//!
//! Each operator kind is dispatched through [`HANDLERS`]. Paths containing positional
//! segments are first expanded into concrete paths: `$` becomes the index recorded when the
//! filter matched, `$[]` every index of the array, and `$[ident]` every index whose element
//! satisfies the array filter named `ident`.

use bson::{Bson, Document};
use std::cmp::Ordering;
use std::collections::HashMap;

use super::types::{PopEnd, PullCond, PushSort, PushSpec, UpdateAction, UpdateDoc, UpdateKind};
use crate::document::{ID_FIELD, path};
use crate::errors::DbError;
use crate::query::order::{compare_docs, compare_values, values_equal};
use crate::query::{Filter, Order, eval_value, parse_filter};
use crate::utils::num::{self, i64_to_usize, is_number, window};

fn invalid(msg: impl Into<String>) -> DbError {
    DbError::InvalidUpdate(msg.into())
}

/// Compiled `arrayFilters`, keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct ArrayFilters(HashMap<String, Filter>);

impl ArrayFilters {
    /// Compiles `[{"el.grade": {"$gte": 85}}, ...]`. Conditions on the bare identifier test
    /// the element itself.
    ///
    /// # Errors
    /// `InvalidUpdate` when a filter is malformed or mixes identifiers.
    pub fn parse(filters: &[Document]) -> Result<Self, DbError> {
        let mut out = HashMap::new();
        for f in filters {
            let mut ident: Option<String> = None;
            let mut rewritten = Document::new();
            for (key, value) in f {
                let (head, rest) = key.split_once('.').unwrap_or((key.as_str(), ""));
                if head.is_empty() || !head.chars().next().is_some_and(|c| c.is_ascii_lowercase()) {
                    return Err(invalid(format!("invalid array filter identifier '{head}'")));
                }
                match &ident {
                    Some(id) if id != head => {
                        return Err(invalid("an array filter may only reference one identifier"));
                    }
                    Some(_) => {}
                    None => ident = Some(head.to_string()),
                }
                rewritten.insert(rest, value.clone());
            }
            let id = ident.ok_or_else(|| invalid("array filter must not be empty"))?;
            let filter = parse_filter(&rewritten).map_err(|e| invalid(e.to_string()))?;
            if out.insert(id.clone(), filter).is_some() {
                return Err(invalid(format!("duplicate array filter for identifier '{id}'")));
            }
        }
        Ok(Self(out))
    }
}

/// Per-application context.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyContext<'a> {
    /// Array index recorded while matching the filter, for `$`.
    pub position: Option<usize>,
    pub array_filters: Option<&'a ArrayFilters>,
    /// True when the update creates a document through upsert (enables `$setOnInsert`).
    pub inserting: bool,
}

type Handler = fn(&mut Document, &str, &UpdateAction, &ApplyContext<'_>) -> Result<(), DbError>;

const HANDLERS: [(UpdateKind, Handler); 12] = [
    (UpdateKind::Set, apply_set),
    (UpdateKind::SetOnInsert, apply_set_on_insert),
    (UpdateKind::Inc, apply_inc),
    (UpdateKind::Mul, apply_mul),
    (UpdateKind::Min, apply_min),
    (UpdateKind::Max, apply_max),
    (UpdateKind::Rename, apply_rename),
    (UpdateKind::Push, apply_push),
    (UpdateKind::AddToSet, apply_add_to_set),
    (UpdateKind::Pull, apply_pull),
    (UpdateKind::Pop, apply_pop),
    (UpdateKind::Unset, apply_unset),
];

fn handler(kind: UpdateKind) -> Handler {
    HANDLERS.iter().find(|(k, _)| *k == kind).map_or(apply_set as Handler, |(_, h)| *h)
}

/// Applies `update` to a copy of `doc` and returns the new version.
///
/// # Errors
/// `InvalidUpdate` for type mismatches, unresolvable positional operators or attempts to
/// change `_id`; `PathError` when a path runs through a scalar.
pub fn apply_update(doc: &Document, update: &UpdateDoc, ctx: &ApplyContext<'_>) -> Result<Document, DbError> {
    let mut out = doc.clone();
    for (kind, fields) in &update.ops {
        let h = handler(*kind);
        for f in fields {
            for concrete in expand(&out, &f.path, ctx)? {
                h(&mut out, &concrete, &f.action, ctx)?;
            }
        }
    }
    if let Some(old_id) = doc.get(ID_FIELD)
        && out.get(ID_FIELD) != Some(old_id)
    {
        return Err(invalid("performing an update on the path '_id' would modify the immutable field '_id'"));
    }
    Ok(out)
}

/// Expands positional segments into concrete paths.
fn expand(doc: &Document, target: &str, ctx: &ApplyContext<'_>) -> Result<Vec<String>, DbError> {
    if !target.contains('$') {
        return Ok(vec![target.to_string()]);
    }
    let mut prefixes: Vec<String> = vec![String::new()];
    for seg in target.split('.') {
        let join = |p: &str, s: &str| if p.is_empty() { s.to_string() } else { format!("{p}.{s}") };
        if seg == "$" {
            let idx = ctx.position.ok_or_else(|| {
                invalid(format!("the positional operator did not find the match needed from the query ('{target}')"))
            })?;
            prefixes = prefixes.iter().map(|p| join(p, &idx.to_string())).collect();
        } else if let Some(inner) = seg.strip_prefix("$[").and_then(|s| s.strip_suffix(']')) {
            let filter = if inner.is_empty() {
                None
            } else {
                let filters = ctx.array_filters.ok_or_else(|| {
                    invalid(format!("no array filter found for identifier '{inner}' in path '{target}'"))
                })?;
                Some(filters.0.get(inner).ok_or_else(|| {
                    invalid(format!("no array filter found for identifier '{inner}' in path '{target}'"))
                })?)
            };
            let mut next = Vec::new();
            for p in &prefixes {
                let Some(Bson::Array(items)) = (if p.is_empty() { None } else { path::get(doc, p) }) else {
                    return Err(invalid(format!("the path '{p}' must exist and be an array to apply '{seg}'")));
                };
                for (i, el) in items.iter().enumerate() {
                    if filter.is_none_or(|f| eval_value(el, f)) {
                        next.push(join(p, &i.to_string()));
                    }
                }
            }
            prefixes = next;
        } else if seg.starts_with('$') {
            return Err(invalid(format!("unsupported positional segment '{seg}' in '{target}'")));
        } else {
            prefixes = prefixes.iter().map(|p| join(p, seg)).collect();
        }
    }
    Ok(prefixes)
}

fn operand(action: &UpdateAction) -> Result<&Bson, DbError> {
    match action {
        UpdateAction::Value(v) => Ok(v),
        other => Err(invalid(format!("unexpected operand {other:?}"))),
    }
}

fn apply_set(doc: &mut Document, p: &str, action: &UpdateAction, _: &ApplyContext<'_>) -> Result<(), DbError> {
    path::set(doc, p, operand(action)?.clone())?;
    Ok(())
}

fn apply_set_on_insert(
    doc: &mut Document,
    p: &str,
    action: &UpdateAction,
    ctx: &ApplyContext<'_>,
) -> Result<(), DbError> {
    if ctx.inserting {
        path::set(doc, p, operand(action)?.clone())?;
    }
    Ok(())
}

fn arithmetic(
    doc: &mut Document,
    p: &str,
    action: &UpdateAction,
    op: &str,
    absent: fn(&Bson) -> Bson,
    combine: fn(&Bson, &Bson) -> Option<Bson>,
) -> Result<(), DbError> {
    let amount = operand(action)?;
    let next = match path::get(doc, p) {
        None => absent(amount),
        Some(cur) if is_number(cur) => {
            combine(cur, amount).ok_or_else(|| invalid(format!("cannot apply {op} to '{p}'")))?
        }
        Some(cur) => {
            return Err(invalid(format!(
                "cannot apply {op} to a value of non-numeric type {} at '{p}'",
                crate::document::type_name(cur)
            )));
        }
    };
    path::set(doc, p, next)?;
    Ok(())
}

fn apply_inc(doc: &mut Document, p: &str, action: &UpdateAction, _: &ApplyContext<'_>) -> Result<(), DbError> {
    arithmetic(doc, p, action, "$inc", Bson::clone, num::add)
}

/// A missing field multiplied becomes zero of the operand's type.
fn apply_mul(doc: &mut Document, p: &str, action: &UpdateAction, _: &ApplyContext<'_>) -> Result<(), DbError> {
    arithmetic(doc, p, action, "$mul", num::zero_like, num::mul)
}

fn replace_if(doc: &mut Document, p: &str, action: &UpdateAction, wanted: Ordering) -> Result<(), DbError> {
    let candidate = operand(action)?;
    let replace = path::get(doc, p).is_none_or(|cur| compare_values(candidate, cur) == wanted);
    if replace {
        path::set(doc, p, candidate.clone())?;
    }
    Ok(())
}

fn apply_min(doc: &mut Document, p: &str, action: &UpdateAction, _: &ApplyContext<'_>) -> Result<(), DbError> {
    replace_if(doc, p, action, Ordering::Less)
}

fn apply_max(doc: &mut Document, p: &str, action: &UpdateAction, _: &ApplyContext<'_>) -> Result<(), DbError> {
    replace_if(doc, p, action, Ordering::Greater)
}

fn apply_rename(doc: &mut Document, p: &str, action: &UpdateAction, _: &ApplyContext<'_>) -> Result<(), DbError> {
    let UpdateAction::Rename(to) = action else {
        return Err(invalid("$rename needs a target"));
    };
    if let Some(v) = path::remove(doc, p) {
        path::set(doc, to, v)?;
    }
    Ok(())
}

fn array_at<'d>(doc: &'d mut Document, p: &str, op: &str) -> Result<Option<&'d mut Vec<Bson>>, DbError> {
    match path::get_mut(doc, p) {
        None => Ok(None),
        Some(Bson::Array(items)) => Ok(Some(items)),
        Some(other) => Err(invalid(format!(
            "{op} requires an array at '{p}', found {}",
            crate::document::type_name(other)
        ))),
    }
}

fn push_into(items: &mut Vec<Bson>, spec: &PushSpec) {
    let at = match spec.position {
        None => items.len(),
        Some(pos) => window(items.len(), pos, 0).0,
    };
    for (offset, v) in spec.each.iter().enumerate() {
        items.insert(at + offset, v.clone());
    }
    match &spec.sort {
        Some(PushSort::Value(order)) => {
            items.sort_by(|a, b| {
                let o = compare_values(a, b);
                if *order == Order::Asc { o } else { o.reverse() }
            });
        }
        Some(PushSort::Fields(keys)) => {
            let empty = Document::new();
            items.sort_by(|a, b| {
                let da = if let Bson::Document(d) = a { d } else { &empty };
                let db = if let Bson::Document(d) = b { d } else { &empty };
                compare_docs(da, db, keys)
            });
        }
        None => {}
    }
    if let Some(n) = spec.slice {
        let (from, to) = if n >= 0 {
            window(items.len(), 0, i64_to_usize(n).unwrap_or(0))
        } else {
            window(items.len(), n, usize::MAX)
        };
        items.truncate(to);
        items.drain(..from);
    }
}

fn apply_push(doc: &mut Document, p: &str, action: &UpdateAction, _: &ApplyContext<'_>) -> Result<(), DbError> {
    let UpdateAction::Push(spec) = action else {
        return Err(invalid("$push needs values"));
    };
    if let Some(items) = array_at(doc, p, "$push")? {
        push_into(items, spec);
        return Ok(());
    }
    let mut items = Vec::new();
    push_into(&mut items, spec);
    path::set(doc, p, Bson::Array(items))?;
    Ok(())
}

fn apply_add_to_set(doc: &mut Document, p: &str, action: &UpdateAction, _: &ApplyContext<'_>) -> Result<(), DbError> {
    let UpdateAction::AddToSet(values) = action else {
        return Err(invalid("$addToSet needs values"));
    };
    let add = |items: &mut Vec<Bson>| {
        for v in values {
            if !items.iter().any(|x| values_equal(x, v)) {
                items.push(v.clone());
            }
        }
    };
    if let Some(items) = array_at(doc, p, "$addToSet")? {
        add(items);
        return Ok(());
    }
    let mut items = Vec::new();
    add(&mut items);
    path::set(doc, p, Bson::Array(items))?;
    Ok(())
}

fn apply_pull(doc: &mut Document, p: &str, action: &UpdateAction, _: &ApplyContext<'_>) -> Result<(), DbError> {
    let UpdateAction::Pull(cond) = action else {
        return Err(invalid("$pull needs a condition"));
    };
    if let Some(items) = array_at(doc, p, "$pull")? {
        items.retain(|el| match cond {
            PullCond::Equals(v) => !values_equal(el, v),
            PullCond::Matches(f) => !eval_value(el, f),
        });
    }
    Ok(())
}

fn apply_pop(doc: &mut Document, p: &str, action: &UpdateAction, _: &ApplyContext<'_>) -> Result<(), DbError> {
    let UpdateAction::Pop(end) = action else {
        return Err(invalid("$pop needs a direction"));
    };
    if let Some(items) = array_at(doc, p, "$pop")?
        && !items.is_empty()
    {
        match end {
            PopEnd::First => {
                items.remove(0);
            }
            PopEnd::Last => {
                items.pop();
            }
        }
    }
    Ok(())
}

fn apply_unset(doc: &mut Document, p: &str, _: &UpdateAction, _: &ApplyContext<'_>) -> Result<(), DbError> {
    path::remove(doc, p);
    Ok(())
}

/// Builds the document inserted by an upsert: equality conditions of the filter seed it,
/// then the update applies with `$setOnInsert` enabled.
///
/// # Errors
/// `InvalidUpdate` when the update uses the positional `$` operator, or when neither the
/// filter nor the update contributes any field.
pub fn build_upsert(filter: &Document, update: &UpdateDoc, array_filters: Option<&ArrayFilters>) -> Result<Document, DbError> {
    if update.uses_positional() {
        return Err(invalid("the positional operator cannot be used with upsert when no document matches"));
    }
    let mut seed = Document::new();
    seed_equalities(filter, &mut seed)?;
    let ctx = ApplyContext { position: None, array_filters, inserting: true };
    let out = apply_update(&seed, update, &ctx)?;
    if out.is_empty() {
        return Err(invalid("upsert cannot build a document: the filter and update contribute no fields"));
    }
    Ok(out)
}

fn seed_equalities(filter: &Document, seed: &mut Document) -> Result<(), DbError> {
    for (key, value) in filter {
        if key == "$and" {
            if let Bson::Array(items) = value {
                for item in items {
                    if let Bson::Document(d) = item {
                        seed_equalities(d, seed)?;
                    }
                }
            }
            continue;
        }
        if key.starts_with('$') {
            continue;
        }
        let seeded = match value {
            Bson::Document(d) if d.keys().next().is_some_and(|k| k.starts_with('$')) => d.get("$eq").cloned(),
            Bson::RegularExpression(_) => None,
            other => Some(other.clone()),
        };
        if let Some(v) = seeded {
            path::set(seed, key, v).map_err(|e| invalid(e.to_string()))?;
        }
    }
    Ok(())
}
