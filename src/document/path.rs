//! Dotted-path access into documents.
//!
//! Two flavours exist:
//! - [`lookup`] is the query-side resolver. It fans out through arrays (`"hobbies.title"`
//!   reaches the `title` of every element) and reports, for each value reached, the index of
//!   the first array element it passed through. The predicate evaluator relies on this for
//!   implicit "any element matches" semantics and for the positional `$` update operator.
//! - [`get`], [`get_mut`], [`set`] and [`remove`] address exactly one location. Numeric
//!   segments index into arrays; nothing fans out.

use super::{Document, Value};
use crate::errors::DbError;

pub(crate) const MAX_PATH_DEPTH: usize = 32;

/// A value reached by [`lookup`].
#[derive(Debug, Clone, Copy)]
pub struct Resolved<'a> {
    pub value: &'a Value,
    /// Index of the element taken in the first array traversed, if any.
    pub array_index: Option<usize>,
}

/// Resolves `path` against `doc`, fanning out through arrays.
///
/// An empty result means the path is absent.
#[must_use]
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Vec<Resolved<'a>> {
    let segs = split(path);
    let mut out = Vec::new();
    if segs.is_empty() || segs.len() > MAX_PATH_DEPTH {
        return out;
    }
    if let Some(first) = doc.get(segs[0]) {
        walk(first, &segs[1..], None, &mut out);
    }
    out
}

/// Like [`lookup`], starting from an arbitrary value. An empty path resolves to `root` itself.
#[must_use]
pub fn lookup_value<'a>(root: &'a Value, path: &str) -> Vec<Resolved<'a>> {
    let segs = split(path);
    let mut out = Vec::new();
    if segs.len() > MAX_PATH_DEPTH {
        return out;
    }
    walk(root, &segs, None, &mut out);
    out
}

fn walk<'a>(value: &'a Value, segs: &[&str], idx: Option<usize>, out: &mut Vec<Resolved<'a>>) {
    let Some((seg, rest)) = segs.split_first() else {
        out.push(Resolved { value, array_index: idx });
        return;
    };
    match value {
        Value::Document(d) => {
            if let Some(child) = d.get(*seg) {
                walk(child, rest, idx, out);
            }
        }
        Value::Array(items) => {
            if let Ok(n) = seg.parse::<usize>() {
                if let Some(el) = items.get(n) {
                    walk(el, rest, idx.or(Some(n)), out);
                }
                return;
            }
            for (i, el) in items.iter().enumerate() {
                if matches!(el, Value::Document(_)) {
                    walk(el, segs, idx.or(Some(i)), out);
                }
            }
        }
        _ => {}
    }
}

fn split(path: &str) -> Vec<&str> {
    if path.is_empty() { Vec::new() } else { path.split('.').collect() }
}

/// Exact read of a single location.
#[must_use]
pub fn get<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segs = path.split('.');
    let first = segs.next()?;
    let mut cur = doc.get(first)?;
    for seg in segs {
        cur = step(cur, seg)?;
    }
    Some(cur)
}

/// Exact read starting from an arbitrary value; an empty path yields `root`.
#[must_use]
pub fn get_value<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = root;
    for seg in split(path) {
        cur = step(cur, seg)?;
    }
    Some(cur)
}

fn step<'a>(v: &'a Value, seg: &str) -> Option<&'a Value> {
    match v {
        Value::Document(d) => d.get(seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|n| items.get(n)),
        _ => None,
    }
}

/// Exact mutable access to a single existing location.
pub fn get_mut<'a>(doc: &'a mut Document, path: &str) -> Option<&'a mut Value> {
    let mut segs = path.split('.');
    let first = segs.next()?;
    let mut cur = doc.get_mut(first)?;
    for seg in segs {
        cur = match cur {
            Value::Document(d) => d.get_mut(seg)?,
            Value::Array(items) => {
                let n = seg.parse::<usize>().ok()?;
                items.get_mut(n)?
            }
            _ => return None,
        };
    }
    Some(cur)
}

/// Writes `value` at `path`, creating intermediate documents as needed and padding arrays
/// with nulls when a numeric segment lies beyond their end. Returns the previous value.
///
/// # Errors
/// `PathError` when the path descends through a scalar, or addresses an array element with a
/// non-numeric segment.
pub fn set(doc: &mut Document, path: &str, value: Value) -> Result<Option<Value>, DbError> {
    let segs = split(path);
    if segs.is_empty() || segs.iter().any(|s| s.is_empty()) {
        return Err(DbError::PathError(format!("empty field name in path '{path}'")));
    }
    if segs.len() > MAX_PATH_DEPTH {
        return Err(DbError::PathError(format!("path '{path}' is too deep")));
    }
    set_in_doc(doc, &segs, value, path)
}

fn set_in_doc(
    doc: &mut Document,
    segs: &[&str],
    value: Value,
    full: &str,
) -> Result<Option<Value>, DbError> {
    let (seg, rest) = segs
        .split_first()
        .ok_or_else(|| DbError::PathError(format!("empty path '{full}'")))?;
    if rest.is_empty() {
        return Ok(doc.insert(*seg, value));
    }
    if doc.get(*seg).is_none() {
        doc.insert(*seg, Value::Document(Document::new()));
    }
    let child = doc
        .get_mut(*seg)
        .ok_or_else(|| DbError::PathError(format!("cannot traverse '{seg}' in '{full}'")))?;
    set_in_value(child, rest, value, full)
}

fn set_in_value(
    cur: &mut Value,
    segs: &[&str],
    value: Value,
    full: &str,
) -> Result<Option<Value>, DbError> {
    match cur {
        Value::Document(d) => set_in_doc(d, segs, value, full),
        Value::Array(items) => {
            let (seg, rest) = segs
                .split_first()
                .ok_or_else(|| DbError::PathError(format!("empty path '{full}'")))?;
            let n = seg.parse::<usize>().map_err(|_| {
                DbError::PathError(format!("cannot create field '{seg}' in an array ('{full}')"))
            })?;
            let padded = n >= items.len();
            while items.len() <= n {
                items.push(Value::Null);
            }
            if rest.is_empty() {
                let old = std::mem::replace(&mut items[n], value);
                return Ok(if padded { None } else { Some(old) });
            }
            if padded {
                items[n] = Value::Document(Document::new());
            }
            set_in_value(&mut items[n], rest, value, full)
        }
        other => Err(DbError::PathError(format!(
            "cannot create field '{}' in element of type {} ('{full}')",
            segs.first().copied().unwrap_or_default(),
            super::type_name(other)
        ))),
    }
}

/// Removes the value at `path`. Array elements are replaced by null rather than shifted.
/// A missing path, or one that runs through a scalar, removes nothing.
pub fn remove(doc: &mut Document, path: &str) -> Option<Value> {
    let (parent, last) = match path.rsplit_once('.') {
        Some((p, l)) => (Some(p), l),
        None => (None, path),
    };
    let Some(parent) = parent else {
        return doc.remove(last);
    };
    match get_mut(doc, parent)? {
        Value::Document(d) => d.remove(last),
        Value::Array(items) => {
            let n = last.parse::<usize>().ok()?;
            let slot = items.get_mut(n)?;
            Some(std::mem::replace(slot, Value::Null))
        }
        _ => None,
    }
}
