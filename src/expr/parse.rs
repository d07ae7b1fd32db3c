use bson::{Bson, Document};

use super::convert::ConvertTo;
use super::{Expr, ExprOp};
use crate::errors::DbError;

const MAX_EXPR_DEPTH: usize = 64;

/// Parses an aggregation expression.
///
/// # Errors
/// `InvalidExpression` for unknown operators, wrong argument counts or malformed operator
/// objects.
pub fn parse_expr(value: &Bson) -> Result<Expr, DbError> {
    parse_at(value, 0)
}

/// # Errors
/// `Json` on malformed JSON, otherwise as [`parse_expr`].
pub fn parse_expr_json(json: &str) -> Result<Expr, DbError> {
    let v: serde_json::Value = serde_json::from_str(json)?;
    let b = crate::utils::json::json_value_to_bson(&v)?;
    parse_expr(&b)
}

fn invalid(msg: impl Into<String>) -> DbError {
    DbError::InvalidExpression(msg.into())
}

fn parse_at(value: &Bson, depth: usize) -> Result<Expr, DbError> {
    if depth > MAX_EXPR_DEPTH {
        return Err(invalid("expression nested too deeply"));
    }
    match value {
        Bson::String(s) => Ok(parse_string(s)),
        Bson::Array(items) => Ok(Expr::Array(
            items.iter().map(|i| parse_at(i, depth + 1)).collect::<Result<_, _>>()?,
        )),
        Bson::Document(d) => parse_document(d, depth),
        other => Ok(Expr::Literal(other.clone())),
    }
}

fn parse_string(s: &str) -> Expr {
    if let Some(rest) = s.strip_prefix("$$") {
        let (name, path) = rest.split_once('.').unwrap_or((rest, ""));
        return Expr::Var { name: name.to_string(), path: path.to_string() };
    }
    if let Some(path) = s.strip_prefix('$') {
        return Expr::Field(path.to_string());
    }
    Expr::Literal(Bson::String(s.to_string()))
}

fn parse_document(d: &Document, depth: usize) -> Result<Expr, DbError> {
    let Some((first, arg)) = d.iter().next() else {
        return Ok(Expr::Object(Vec::new()));
    };
    if !first.starts_with('$') {
        let mut fields = Vec::with_capacity(d.len());
        for (k, v) in d {
            if k.starts_with('$') {
                return Err(invalid(format!("operator '{k}' mixed with field names")));
            }
            fields.push((k.clone(), parse_at(v, depth + 1)?));
        }
        return Ok(Expr::Object(fields));
    }
    if d.len() != 1 {
        return Err(invalid("an expression object must have exactly one operator"));
    }
    let name = first.as_str();
    match name {
        "$literal" => Ok(Expr::Literal(arg.clone())),
        "$cond" => parse_cond(arg, depth),
        "$convert" => parse_convert(arg, depth),
        "$toString" => shorthand(arg, ConvertTo::String, depth),
        "$toInt" => shorthand(arg, ConvertTo::Int, depth),
        "$toLong" => shorthand(arg, ConvertTo::Long, depth),
        "$toDouble" => shorthand(arg, ConvertTo::Double, depth),
        "$toBool" => shorthand(arg, ConvertTo::Bool, depth),
        "$toDate" => shorthand(arg, ConvertTo::Date, depth),
        "$filter" => parse_filter(arg, depth),
        _ => {
            let op = ExprOp::from_name(name)
                .ok_or_else(|| invalid(format!("unknown expression operator '{name}'")))?;
            let args = match arg {
                Bson::Array(items) => {
                    items.iter().map(|i| parse_at(i, depth + 1)).collect::<Result<Vec<_>, _>>()?
                }
                single => vec![parse_at(single, depth + 1)?],
            };
            let (lo, hi) = op.arity();
            if args.len() < lo || args.len() > hi {
                return Err(invalid(format!("{name} takes {lo}..={hi} arguments, got {}", args.len())));
            }
            Ok(Expr::Op { op, args })
        }
    }
}

fn boxed(v: &Bson, depth: usize) -> Result<Box<Expr>, DbError> {
    Ok(Box::new(parse_at(v, depth + 1)?))
}

fn parse_cond(arg: &Bson, depth: usize) -> Result<Expr, DbError> {
    match arg {
        Bson::Array(items) if items.len() == 3 => Ok(Expr::Cond {
            cond: boxed(&items[0], depth)?,
            then: boxed(&items[1], depth)?,
            otherwise: boxed(&items[2], depth)?,
        }),
        Bson::Document(d) => {
            let part = |k: &str| {
                d.get(k).ok_or_else(|| invalid(format!("$cond requires '{k}'")))
            };
            Ok(Expr::Cond {
                cond: boxed(part("if")?, depth)?,
                then: boxed(part("then")?, depth)?,
                otherwise: boxed(part("else")?, depth)?,
            })
        }
        _ => Err(invalid("$cond takes {if, then, else} or a three-element array")),
    }
}

fn parse_convert(arg: &Bson, depth: usize) -> Result<Expr, DbError> {
    let Bson::Document(d) = arg else {
        return Err(invalid("$convert takes an object"));
    };
    let input = d.get("input").ok_or_else(|| invalid("$convert requires 'input'"))?;
    let to = d.get("to").ok_or_else(|| invalid("$convert requires 'to'"))?;
    Ok(Expr::Convert {
        input: boxed(input, depth)?,
        to: ConvertTo::from_bson(to)?,
        on_error: d.get("onError").map(|v| boxed(v, depth)).transpose()?,
        on_null: d.get("onNull").map(|v| boxed(v, depth)).transpose()?,
    })
}

fn shorthand(arg: &Bson, to: ConvertTo, depth: usize) -> Result<Expr, DbError> {
    let input = match arg {
        Bson::Array(items) if items.len() == 1 => &items[0],
        other => other,
    };
    Ok(Expr::Convert { input: boxed(input, depth)?, to, on_error: None, on_null: None })
}

fn parse_filter(arg: &Bson, depth: usize) -> Result<Expr, DbError> {
    let Bson::Document(d) = arg else {
        return Err(invalid("$filter takes {input, as, cond}"));
    };
    let input = d.get("input").ok_or_else(|| invalid("$filter requires 'input'"))?;
    let cond = d.get("cond").ok_or_else(|| invalid("$filter requires 'cond'"))?;
    let var = match d.get("as") {
        None => "this".to_string(),
        Some(Bson::String(s)) if !s.is_empty() => s.clone(),
        Some(_) => return Err(invalid("$filter 'as' must be a non-empty string")),
    };
    Ok(Expr::Filter { input: boxed(input, depth)?, var, cond: boxed(cond, depth)? })
}
