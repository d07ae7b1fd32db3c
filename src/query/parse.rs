use bson::{Bson, Document};

use super::geo;
use super::types::{
    CmpOp, Filter, MAX_FILTER_DEPTH, MAX_IN_SET, NearQuery, Order, Pattern, SortSpec, TypeTag,
};
use crate::errors::DbError;
use crate::expr::parse_expr;
use crate::utils::num::{as_f64, as_i64, i64_to_usize};

fn invalid(msg: impl Into<String>) -> DbError {
    DbError::InvalidFilter(msg.into())
}

/// Parses a MongoDB-style filter document.
///
/// # Errors
/// `InvalidFilter` for unknown operators or operator arguments of the wrong shape.
pub fn parse_filter(doc: &Document) -> Result<Filter, DbError> {
    parse_doc(doc, 0)
}

/// # Errors
/// Returns an error if the JSON string is malformed or is not a valid filter.
pub fn parse_filter_json(json: &str) -> Result<Filter, DbError> {
    let doc = crate::utils::json::parse_json_document(json)?;
    parse_filter(&doc)
}

fn conjunction(mut parts: Vec<Filter>) -> Filter {
    match parts.len() {
        0 => Filter::True,
        1 => parts.pop().unwrap_or(Filter::True),
        _ => Filter::And(parts),
    }
}

fn parse_doc(doc: &Document, depth: usize) -> Result<Filter, DbError> {
    if depth > MAX_FILTER_DEPTH {
        return Err(invalid("filter nested too deeply"));
    }
    let mut parts = Vec::with_capacity(doc.len());
    for (key, value) in doc {
        match key.as_str() {
            "$and" | "$or" | "$nor" => {
                let Bson::Array(items) = value else {
                    return Err(invalid(format!("{key} must be an array")));
                };
                if items.is_empty() {
                    return Err(invalid(format!("{key} must be a non-empty array")));
                }
                let mut subs = Vec::with_capacity(items.len());
                for item in items {
                    let Bson::Document(d) = item else {
                        return Err(invalid(format!("{key} entries must be objects")));
                    };
                    subs.push(parse_doc(d, depth + 1)?);
                }
                parts.push(match key.as_str() {
                    "$and" => Filter::And(subs),
                    "$or" => Filter::Or(subs),
                    _ => Filter::Nor(subs),
                });
            }
            "$expr" => {
                let e = parse_expr(value).map_err(|e| invalid(format!("$expr: {e}")))?;
                parts.push(Filter::Expr(e));
            }
            op if op.starts_with('$') => {
                return Err(invalid(format!("unknown top level operator: {op}")));
            }
            path => parts.extend(parse_field(path, value, depth)?),
        }
    }
    Ok(conjunction(parts))
}

fn is_operator_doc(value: &Bson) -> bool {
    matches!(value, Bson::Document(d) if d.keys().next().is_some_and(|k| k.starts_with('$')))
}

/// Parses the conditions on one field. An empty `path` addresses the value under test itself.
pub(crate) fn parse_field(path: &str, value: &Bson, depth: usize) -> Result<Vec<Filter>, DbError> {
    if depth > MAX_FILTER_DEPTH {
        return Err(invalid("filter nested too deeply"));
    }
    match value {
        Bson::Document(ops) if is_operator_doc(value) => parse_operators(path, ops, depth),
        Bson::RegularExpression(_) => Ok(vec![Filter::Regex { path: path.to_string(), pattern: regex_literal(value)? }]),
        other => Ok(vec![Filter::Cmp { path: path.to_string(), op: CmpOp::Eq, value: other.clone() }]),
    }
}

#[allow(clippy::too_many_lines)]
fn parse_operators(path: &str, ops: &Document, depth: usize) -> Result<Vec<Filter>, DbError> {
    let p = || path.to_string();
    let mut out = Vec::with_capacity(ops.len());
    for (op, arg) in ops {
        if let Some(cmp) = CmpOp::from_operator(op) {
            out.push(Filter::Cmp { path: p(), op: cmp, value: arg.clone() });
            continue;
        }
        match op.as_str() {
            "$in" | "$nin" => {
                let Bson::Array(items) = arg else {
                    return Err(invalid(format!("{op} needs an array")));
                };
                if items.len() > MAX_IN_SET {
                    return Err(invalid(format!("{op} list exceeds {MAX_IN_SET} entries")));
                }
                let values = items.clone();
                out.push(if op == "$in" {
                    Filter::In { path: p(), values }
                } else {
                    Filter::Nin { path: p(), values }
                });
            }
            "$exists" => {
                let exists = match arg {
                    Bson::Boolean(b) => *b,
                    n => as_f64(n).is_some_and(|f| f != 0.0),
                };
                out.push(Filter::Exists { path: p(), exists });
            }
            "$type" => {
                let tags = match arg {
                    Bson::Array(items) => items.iter().map(type_tag).collect::<Result<Vec<_>, _>>()?,
                    single => vec![type_tag(single)?],
                };
                out.push(Filter::Type { path: p(), types: tags });
            }
            "$regex" => {
                let options = match ops.get("$options") {
                    None => String::new(),
                    Some(Bson::String(s)) => s.clone(),
                    Some(_) => return Err(invalid("$options has to be a string")),
                };
                let pattern = match arg {
                    Bson::String(s) => compile(s, &options)?,
                    Bson::RegularExpression(_) => regex_literal(arg)?,
                    _ => return Err(invalid("$regex has to be a string")),
                };
                out.push(Filter::Regex { path: p(), pattern });
            }
            "$options" => {
                if !ops.contains_key("$regex") {
                    return Err(invalid("$options needs a $regex"));
                }
            }
            "$size" => {
                let size = as_i64(arg)
                    .and_then(i64_to_usize)
                    .ok_or_else(|| invalid("$size needs a non-negative integer"))?;
                out.push(Filter::Size { path: p(), size });
            }
            "$all" => {
                let Bson::Array(items) = arg else {
                    return Err(invalid("$all needs an array"));
                };
                out.push(Filter::All { path: p(), values: items.clone() });
            }
            "$elemMatch" => {
                let Bson::Document(inner) = arg else {
                    return Err(invalid("$elemMatch needs an object"));
                };
                let filter = if is_operator_doc(arg) && !inner.keys().any(|k| is_logical(k)) {
                    conjunction(parse_operators("", inner, depth + 1)?)
                } else {
                    parse_doc(inner, depth + 1)?
                };
                out.push(Filter::ElemMatch { path: p(), filter: Box::new(filter) });
            }
            "$not" => {
                let negated = match arg {
                    Bson::Document(inner) if is_operator_doc(arg) => {
                        conjunction(parse_operators(path, inner, depth + 1)?)
                    }
                    Bson::RegularExpression(_) => Filter::Regex { path: p(), pattern: regex_literal(arg)? },
                    _ => return Err(invalid("$not needs a regex or a document")),
                };
                out.push(Filter::Not(Box::new(negated)));
            }
            "$near" | "$nearSphere" => {
                out.push(Filter::Near { path: p(), near: parse_near(arg, ops)? });
            }
            "$minDistance" | "$maxDistance" => {
                if !ops.contains_key("$near") && !ops.contains_key("$nearSphere") {
                    return Err(invalid(format!("{op} needs $near")));
                }
            }
            other => return Err(invalid(format!("unknown operator: {other}"))),
        }
    }
    Ok(out)
}

fn is_logical(k: &str) -> bool {
    matches!(k, "$and" | "$or" | "$nor" | "$expr")
}

fn type_tag(v: &Bson) -> Result<TypeTag, DbError> {
    let tag = match v {
        Bson::String(s) => TypeTag::from_alias(s),
        n => as_i64(n).and_then(TypeTag::from_code),
    };
    tag.ok_or_else(|| invalid(format!("unknown type name alias: {v}")))
}

fn compile(source: &str, options: &str) -> Result<Pattern, DbError> {
    let mut builder = regex::RegexBuilder::new(source);
    for flag in options.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => return Err(invalid(format!("invalid regex option '{other}'"))),
        };
    }
    let regex = builder.build().map_err(|e| invalid(format!("bad regex '{source}': {e}")))?;
    Ok(Pattern { source: source.to_string(), options: options.to_string(), regex })
}

/// Compiles a BSON regular expression value, whose display form is `/pattern/options`.
fn regex_literal(v: &Bson) -> Result<Pattern, DbError> {
    let shown = match v {
        Bson::RegularExpression(re) => re.to_string(),
        _ => return Err(invalid("expected a regular expression")),
    };
    let inner = shown.strip_prefix('/').unwrap_or(&shown);
    let (source, options) = inner.rsplit_once('/').unwrap_or((inner, ""));
    compile(source, options)
}

fn parse_near(arg: &Bson, siblings: &Document) -> Result<NearQuery, DbError> {
    let distance = |d: &Document, key: &str| -> Result<Option<f64>, DbError> {
        match d.get(key) {
            None => Ok(None),
            Some(v) => as_f64(v)
                .filter(|f| *f >= 0.0)
                .map(Some)
                .ok_or_else(|| invalid(format!("{key} must be a non-negative number"))),
        }
    };
    let (point, inner) = match arg {
        Bson::Document(d) if d.contains_key("$geometry") => {
            let geometry = d.get("$geometry").unwrap_or(&Bson::Null);
            (geo::point_of(geometry), Some(d))
        }
        other => (geo::point_of(other), None),
    };
    let point = point.ok_or_else(|| invalid("$near needs a GeoJSON point or [lng, lat]"))?;
    let min_distance = match inner {
        Some(d) => distance(d, "$minDistance")?,
        None => None,
    }
    .or(distance(siblings, "$minDistance")?);
    let max_distance = match inner {
        Some(d) => distance(d, "$maxDistance")?,
        None => None,
    }
    .or(distance(siblings, "$maxDistance")?);
    Ok(NearQuery { point, min_distance, max_distance })
}

/// Parses a sort document (`{field: 1 | -1}`) into sort keys.
///
/// # Errors
/// `InvalidFilter` when a direction is not `1` or `-1`.
pub fn parse_sort(doc: &Document) -> Result<Vec<SortSpec>, DbError> {
    doc.iter()
        .map(|(field, dir)| {
            let order = match as_i64(dir) {
                Some(1) => Order::Asc,
                Some(-1) => Order::Desc,
                _ => return Err(invalid(format!("bad sort direction for '{field}': {dir}"))),
            };
            Ok(SortSpec { field: field.clone(), order })
        })
        .collect()
}
