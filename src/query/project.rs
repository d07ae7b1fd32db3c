//! Projection specifications shared by `find` and the `$project` stage.
//!
//! A projection is either inclusion-mode (only listed and computed fields survive) or
//! exclusion-mode (everything but the listed fields survives). `_id` is kept unless excluded
//! explicitly, and is the only field that may be excluded in inclusion mode. Dotted keys are
//! folded into nested specifications (`{"a.b": 1}` is `{a: {b: 1}}`).

use bson::{Bson, Document};

use crate::document::ID_FIELD;
use crate::errors::DbError;
use crate::expr::{Expr, Vars, evaluate, parse_expr};
use crate::utils::num::{as_f64, as_i64, i64_to_usize, window};

/// Where a projection is used. Only `find` understands the `$slice` field operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionContext {
    Find,
    Pipeline,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Include,
    Exclude,
    Computed(Expr),
    /// `$slice: n` (`skip == None`) or `$slice: [skip, n]`.
    Slice { skip: Option<i64>, limit: i64 },
    Nested(Vec<(String, Node)>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Inclusion,
    Exclusion,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    fields: Vec<(String, Node)>,
    mode: Mode,
    id: Node,
}

fn invalid(msg: impl Into<String>) -> DbError {
    DbError::InvalidPipeline(msg.into())
}

impl Projection {
    /// # Errors
    /// `InvalidPipeline` for mixed inclusion and exclusion, malformed `$slice`, or bad
    /// expressions.
    pub fn parse(spec: &Document, ctx: ProjectionContext) -> Result<Self, DbError> {
        let mut fields: Vec<(String, Node)> = Vec::new();
        let mut id = None;
        for (key, value) in spec {
            let node = parse_node(value, ctx)?;
            if key == ID_FIELD {
                id = Some(node);
                continue;
            }
            insert_dotted(&mut fields, key, node)?;
        }
        let mode = match mode_of(&fields)? {
            Some(m) => m,
            None if matches!(id, Some(Node::Include | Node::Computed(_))) => Mode::Inclusion,
            None => Mode::Exclusion,
        };
        let id = id.unwrap_or(Node::Include);
        if mode == Mode::Exclusion && matches!(id, Node::Computed(_)) {
            return Err(invalid("cannot compute _id in an exclusion projection"));
        }
        Ok(Self { fields, mode, id })
    }

    /// Applies the projection to one document.
    ///
    /// # Errors
    /// `InvalidExpression` when a computed field fails to evaluate.
    pub fn apply(&self, doc: &Document) -> Result<Document, DbError> {
        match self.mode {
            Mode::Inclusion => {
                let mut out = Document::new();
                match &self.id {
                    Node::Exclude => {}
                    Node::Computed(e) => {
                        if let Some(v) = eval_root(e, doc)? {
                            out.insert(ID_FIELD, v);
                        }
                    }
                    _ => {
                        if let Some(v) = doc.get(ID_FIELD) {
                            out.insert(ID_FIELD, v.clone());
                        }
                    }
                }
                include_into(&mut out, doc, doc, &self.fields)?;
                Ok(out)
            }
            Mode::Exclusion => {
                let mut out = doc.clone();
                if matches!(self.id, Node::Exclude) {
                    out.remove(ID_FIELD);
                }
                exclude_in(&mut out, &self.fields);
                Ok(out)
            }
        }
    }
}

fn parse_node(value: &Bson, ctx: ProjectionContext) -> Result<Node, DbError> {
    match value {
        Bson::Boolean(b) => Ok(if *b { Node::Include } else { Node::Exclude }),
        n @ (Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) => {
            Ok(if as_f64(n).is_some_and(|f| f != 0.0) { Node::Include } else { Node::Exclude })
        }
        Bson::Document(d) if d.keys().next().is_some_and(|k| k.starts_with('$')) => {
            if ctx == ProjectionContext::Find && d.len() == 1 {
                if let Some(arg) = d.get("$slice") {
                    return parse_slice(arg);
                }
            }
            Ok(Node::Computed(parse_expr(value).map_err(|e| invalid(e.to_string()))?))
        }
        Bson::Document(d) => {
            if d.is_empty() {
                return Err(invalid("an empty object is not a valid projection value"));
            }
            let mut children = Vec::new();
            for (k, v) in d {
                insert_dotted(&mut children, k, parse_node(v, ctx)?)?;
            }
            Ok(Node::Nested(children))
        }
        other => Ok(Node::Computed(parse_expr(other).map_err(|e| invalid(e.to_string()))?)),
    }
}

fn parse_slice(arg: &Bson) -> Result<Node, DbError> {
    match arg {
        Bson::Array(items) if items.len() == 2 => {
            let skip = as_i64(&items[0]).ok_or_else(|| invalid("$slice skip must be an integer"))?;
            let limit = as_i64(&items[1]).ok_or_else(|| invalid("$slice limit must be an integer"))?;
            if limit <= 0 {
                return Err(invalid("$slice limit must be positive"));
            }
            Ok(Node::Slice { skip: Some(skip), limit })
        }
        n => {
            let limit = as_i64(n).ok_or_else(|| invalid("$slice takes a number or [skip, limit]"))?;
            Ok(Node::Slice { skip: None, limit })
        }
    }
}

fn insert_dotted(fields: &mut Vec<(String, Node)>, key: &str, node: Node) -> Result<(), DbError> {
    let Some((head, rest)) = key.split_once('.') else {
        if fields.iter().any(|(k, _)| k == key) {
            return Err(invalid(format!("path collision at '{key}'")));
        }
        fields.push((key.to_string(), node));
        return Ok(());
    };
    if let Some((_, existing)) = fields.iter_mut().find(|(k, _)| k == head) {
        let Node::Nested(children) = existing else {
            return Err(invalid(format!("path collision at '{key}'")));
        };
        return insert_dotted(children, rest, node);
    }
    let mut children = Vec::new();
    insert_dotted(&mut children, rest, node)?;
    fields.push((head.to_string(), Node::Nested(children)));
    Ok(())
}

fn mode_of(fields: &[(String, Node)]) -> Result<Option<Mode>, DbError> {
    let mut mode = None;
    for (key, node) in fields {
        let this = match node {
            Node::Include | Node::Computed(_) => Some(Mode::Inclusion),
            Node::Exclude => Some(Mode::Exclusion),
            Node::Slice { .. } => None,
            Node::Nested(children) => mode_of(children)?,
        };
        match (mode, this) {
            (Some(a), Some(b)) if a != b => {
                return Err(invalid(format!(
                    "cannot mix inclusion and exclusion in a projection (at '{key}')"
                )));
            }
            (None, Some(b)) => mode = Some(b),
            _ => {}
        }
    }
    Ok(mode)
}

fn eval_root(e: &Expr, root: &Document) -> Result<Option<Bson>, DbError> {
    evaluate(e, &mut Vars::new(root))
}

fn slice(items: &[Bson], skip: Option<i64>, limit: i64) -> Vec<Bson> {
    let total = items.len();
    let (from, to) = match skip {
        Some(s) => window(total, s, i64_to_usize(limit).unwrap_or(0)),
        None if limit >= 0 => window(total, 0, i64_to_usize(limit).unwrap_or(0)),
        None => window(total, limit, usize::MAX),
    };
    items[from..to].to_vec()
}

fn include_into(
    out: &mut Document,
    src: &Document,
    root: &Document,
    fields: &[(String, Node)],
) -> Result<(), DbError> {
    for (key, node) in fields {
        match node {
            Node::Exclude => {}
            Node::Include => {
                if let Some(v) = src.get(key) {
                    out.insert(key.clone(), v.clone());
                }
            }
            Node::Computed(e) => {
                if let Some(v) = eval_root(e, root)? {
                    out.insert(key.clone(), v);
                }
            }
            Node::Slice { skip, limit } => match src.get(key) {
                Some(Bson::Array(items)) => {
                    out.insert(key.clone(), Bson::Array(slice(items, *skip, *limit)));
                }
                Some(v) => {
                    out.insert(key.clone(), v.clone());
                }
                None => {}
            },
            Node::Nested(children) => match src.get(key) {
                Some(Bson::Document(sub)) => {
                    let mut inner = Document::new();
                    include_into(&mut inner, sub, root, children)?;
                    out.insert(key.clone(), inner);
                }
                Some(Bson::Array(items)) => {
                    let mut projected = Vec::with_capacity(items.len());
                    for el in items {
                        if let Bson::Document(sub) = el {
                            let mut inner = Document::new();
                            include_into(&mut inner, sub, root, children)?;
                            projected.push(Bson::Document(inner));
                        }
                    }
                    out.insert(key.clone(), Bson::Array(projected));
                }
                Some(_) => {}
                None => {
                    let mut inner = Document::new();
                    include_into(&mut inner, &Document::new(), root, children)?;
                    if !inner.is_empty() {
                        out.insert(key.clone(), inner);
                    }
                }
            },
        }
    }
    Ok(())
}

fn exclude_in(doc: &mut Document, fields: &[(String, Node)]) {
    for (key, node) in fields {
        match node {
            Node::Exclude => {
                doc.remove(key);
            }
            Node::Slice { skip, limit } => {
                if let Some(Bson::Array(items)) = doc.get_mut(key) {
                    *items = slice(items, *skip, *limit);
                }
            }
            Node::Nested(children) => match doc.get_mut(key) {
                Some(Bson::Document(sub)) => exclude_in(sub, children),
                Some(Bson::Array(items)) => {
                    for el in items.iter_mut() {
                        if let Bson::Document(sub) = el {
                            exclude_in(sub, children);
                        }
                    }
                }
                _ => {}
            },
            Node::Include | Node::Computed(_) => {}
        }
    }
}
