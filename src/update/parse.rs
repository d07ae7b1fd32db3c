use bson::{Bson, Document};

use super::types::{
    FieldUpdate, PopEnd, PullCond, PushSort, PushSpec, UpdateAction, UpdateDoc, UpdateKind,
};
use crate::document::ID_FIELD;
use crate::errors::DbError;
use crate::query::{Filter, Order, parse_field, parse_filter, parse_sort};
use crate::utils::num::{as_i64, is_number};

const MAX_UPDATE_FIELDS: usize = 512;

fn invalid(msg: impl Into<String>) -> DbError {
    DbError::InvalidUpdate(msg.into())
}

/// Parses an update document made of `$` operators.
///
/// # Errors
/// `InvalidUpdate` for empty updates, replacement-style documents, unknown operators or
/// operands of the wrong type.
pub fn parse_update(doc: &Document) -> Result<UpdateDoc, DbError> {
    if doc.is_empty() {
        return Err(invalid("update document must not be empty"));
    }
    let mut ops: Vec<(UpdateKind, Vec<FieldUpdate>)> = Vec::new();
    let mut total = 0usize;
    for (op, arg) in doc {
        let kind = if op.starts_with('$') {
            UpdateKind::from_operator(op).ok_or_else(|| invalid(format!("unknown update operator: {op}")))?
        } else {
            return Err(invalid(format!(
                "update document requires atomic operators, found field '{op}' (use replace_one)"
            )));
        };
        let Bson::Document(fields) = arg else {
            return Err(invalid(format!("modifier {op} expects an object")));
        };
        let mut parsed = Vec::with_capacity(fields.len());
        for (path, value) in fields {
            if path.is_empty() || path.split('.').any(str::is_empty) {
                return Err(invalid(format!("empty field name in '{path}'")));
            }
            parsed.push(FieldUpdate { path: path.clone(), action: parse_action(kind, path, value)? });
        }
        total += parsed.len();
        if total > MAX_UPDATE_FIELDS {
            return Err(invalid("too many fields in update"));
        }
        match ops.iter_mut().find(|(k, _)| *k == kind) {
            Some((_, existing)) => existing.extend(parsed),
            None => ops.push((kind, parsed)),
        }
    }
    ops.sort_by_key(|(k, _)| k.rank());
    Ok(UpdateDoc { ops })
}

/// # Errors
/// `Json` for malformed JSON, otherwise as [`parse_update`].
pub fn parse_update_json(json: &str) -> Result<UpdateDoc, DbError> {
    let doc = crate::utils::json::parse_json_document(json)?;
    parse_update(&doc)
}

fn parse_action(kind: UpdateKind, path: &str, value: &Bson) -> Result<UpdateAction, DbError> {
    let op = kind.operator();
    Ok(match kind {
        UpdateKind::Set | UpdateKind::SetOnInsert | UpdateKind::Min | UpdateKind::Max => {
            UpdateAction::Value(value.clone())
        }
        UpdateKind::Inc | UpdateKind::Mul => {
            if !is_number(value) {
                return Err(invalid(format!("cannot {op} with non-numeric argument {path}: {value}")));
            }
            UpdateAction::Value(value.clone())
        }
        UpdateKind::Rename => {
            let Bson::String(to) = value else {
                return Err(invalid(format!("$rename target for '{path}' must be a string")));
            };
            if path == ID_FIELD || to == ID_FIELD {
                return Err(invalid("cannot $rename the _id field"));
            }
            if to == path || to.is_empty() || path.contains('$') || to.contains('$') {
                return Err(invalid(format!("invalid $rename from '{path}' to '{to}'")));
            }
            UpdateAction::Rename(to.clone())
        }
        UpdateKind::Push => UpdateAction::Push(parse_push(value)?),
        UpdateKind::AddToSet => UpdateAction::AddToSet(match value {
            Bson::Document(d) if d.contains_key("$each") => {
                if d.len() != 1 {
                    return Err(invalid("$addToSet only supports the $each modifier"));
                }
                let Some(Bson::Array(items)) = d.get("$each") else {
                    return Err(invalid("$each must be an array"));
                };
                items.clone()
            }
            single => vec![single.clone()],
        }),
        UpdateKind::Pull => UpdateAction::Pull(parse_pull(value)?),
        UpdateKind::Pop => match as_i64(value) {
            Some(n) if n > 0 => UpdateAction::Pop(PopEnd::Last),
            Some(n) if n < 0 => UpdateAction::Pop(PopEnd::First),
            _ => return Err(invalid(format!("$pop expects a non-zero integer, found {value}"))),
        },
        UpdateKind::Unset => UpdateAction::Unset,
    })
}

fn parse_push(value: &Bson) -> Result<PushSpec, DbError> {
    let Bson::Document(d) = value else {
        return Ok(PushSpec { each: vec![value.clone()], position: None, slice: None, sort: None });
    };
    if !d.contains_key("$each") {
        if d.keys().any(|k| k.starts_with('$')) {
            return Err(invalid("$push modifiers require $each"));
        }
        return Ok(PushSpec { each: vec![value.clone()], position: None, slice: None, sort: None });
    }
    let mut spec = PushSpec { each: Vec::new(), position: None, slice: None, sort: None };
    for (k, v) in d {
        match k.as_str() {
            "$each" => {
                let Bson::Array(items) = v else {
                    return Err(invalid("$each must be an array"));
                };
                spec.each.clone_from(items);
            }
            "$position" => {
                spec.position = Some(as_i64(v).ok_or_else(|| invalid("$position must be an integer"))?);
            }
            "$slice" => {
                spec.slice = Some(as_i64(v).ok_or_else(|| invalid("$slice must be an integer"))?);
            }
            "$sort" => {
                spec.sort = Some(match v {
                    Bson::Document(keys) => {
                        let keys = parse_sort(keys).map_err(|e| invalid(e.to_string()))?;
                        if keys.is_empty() {
                            return Err(invalid("$sort must not be empty"));
                        }
                        PushSort::Fields(keys)
                    }
                    n => match as_i64(n) {
                        Some(1) => PushSort::Value(Order::Asc),
                        Some(-1) => PushSort::Value(Order::Desc),
                        _ => return Err(invalid("$sort must be 1, -1 or an object")),
                    },
                });
            }
            other => return Err(invalid(format!("unrecognized $push modifier {other}"))),
        }
    }
    Ok(spec)
}

fn parse_pull(value: &Bson) -> Result<PullCond, DbError> {
    let to_update_err = |e: DbError| invalid(e.to_string());
    match value {
        Bson::Document(d) if d.keys().next().is_some_and(|k| k.starts_with('$')) => {
            let parts = parse_field("", value, 0).map_err(to_update_err)?;
            Ok(PullCond::Matches(Filter::And(parts)))
        }
        Bson::Document(d) => Ok(PullCond::Matches(parse_filter(d).map_err(to_update_err)?)),
        other => Ok(PullCond::Equals(other.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn operators_are_ordered_by_precedence() {
        let u = parse_update(&doc! {"$unset": {"a": ""}, "$inc": {"b": 1}, "$set": {"c": 2}}).unwrap();
        let kinds: Vec<_> = u.ops.iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, vec![UpdateKind::Set, UpdateKind::Inc, UpdateKind::Unset]);
    }

    #[test]
    fn replacement_document_rejected() {
        let err = parse_update(&doc! {"name": "x"}).unwrap_err();
        assert!(matches!(err, DbError::InvalidUpdate(_)));
    }

    #[test]
    fn empty_update_rejected() {
        assert!(parse_update(&doc! {}).is_err());
    }

    #[test]
    fn inc_requires_number() {
        assert!(parse_update(&doc! {"$inc": {"age": "one"}}).is_err());
    }

    #[test]
    fn push_with_modifiers() {
        let u = parse_update(&doc! {
            "$push": {"hobbies": {"$each": [{"title": "Wine", "freq": 1}], "$sort": {"freq": -1}, "$slice": 3}}
        })
        .unwrap();
        let (_, fields) = &u.ops[0];
        match &fields[0].action {
            UpdateAction::Push(spec) => {
                assert_eq!(spec.each.len(), 1);
                assert_eq!(spec.slice, Some(3));
                assert!(matches!(spec.sort, Some(PushSort::Fields(_))));
            }
            other => panic!("expected push, got {other:?}"),
        }
    }

    #[test]
    fn pop_direction() {
        let u = parse_update(&doc! {"$pop": {"a": -1, "b": 1}}).unwrap();
        let (_, fields) = &u.ops[0];
        assert!(matches!(fields[0].action, UpdateAction::Pop(PopEnd::First)));
        assert!(matches!(fields[1].action, UpdateAction::Pop(PopEnd::Last)));
        let u = parse_update(&doc! {"$pop": {"a": 2, "b": -3_i64}}).unwrap();
        let (_, fields) = &u.ops[0];
        assert!(matches!(fields[0].action, UpdateAction::Pop(PopEnd::Last)));
        assert!(matches!(fields[1].action, UpdateAction::Pop(PopEnd::First)));
        assert!(parse_update(&doc! {"$pop": {"a": 0}}).is_err());
        assert!(parse_update(&doc! {"$pop": {"a": 1.5}}).is_err());
        assert!(parse_update(&doc! {"$pop": {"a": "last"}}).is_err());
    }

    #[test]
    fn positional_detection() {
        let u = parse_update(&doc! {"$set": {"hobbies.$.highFrequency": true}}).unwrap();
        assert!(u.uses_positional());
        let u = parse_update(&doc! {"$set": {"hobbies.$[].x": true}}).unwrap();
        assert!(!u.uses_positional());
    }
}
