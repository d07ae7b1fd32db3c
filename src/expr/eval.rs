use bson::{Bson, DateTime, Document};
use std::cmp::Ordering;

use super::convert::{self, DatePart};
use super::{Expr, ExprOp};
use crate::document::type_name;
use crate::errors::DbError;
use crate::query::order::compare_values;
use crate::utils::num::{self, as_f64, as_i64, i64_to_usize, is_number, usize_to_i64};

/// Variable scope for one evaluation: the current document plus `$filter` bindings.
pub struct Vars<'a> {
    root: &'a Document,
    bindings: Vec<(String, Bson)>,
}

impl<'a> Vars<'a> {
    #[must_use]
    pub fn new(root: &'a Document) -> Self {
        Self { root, bindings: Vec::new() }
    }

    fn lookup(&self, name: &str) -> Option<Bson> {
        if let Some((_, v)) = self.bindings.iter().rev().find(|(n, _)| n == name) {
            return Some(v.clone());
        }
        match name {
            "ROOT" | "CURRENT" => Some(Bson::Document(self.root.clone())),
            _ => None,
        }
    }
}

/// Evaluates `expr` against `doc`, mapping a missing result to null.
///
/// # Errors
/// `InvalidExpression` when an operator receives an argument of the wrong type.
pub fn eval_expr(expr: &Expr, doc: &Document) -> Result<Bson, DbError> {
    Ok(evaluate(expr, &mut Vars::new(doc))?.unwrap_or(Bson::Null))
}

/// Boolean interpretation used by `$cond`, `$and`, `$filter` and `$expr`:
/// missing, null, `false` and numeric zero are false; everything else is true.
#[must_use]
pub fn truthy(v: Option<&Bson>) -> bool {
    match v {
        None | Some(Bson::Null | Bson::Undefined) => false,
        Some(Bson::Boolean(b)) => *b,
        Some(n) if is_number(n) => as_f64(n).is_some_and(|f| f != 0.0),
        Some(_) => true,
    }
}

/// Moves a date by a number of milliseconds; fractional amounts round to the nearest millisecond.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn shift_date(ms: i64, delta: &Bson, subtract: bool) -> Result<Bson, DbError> {
    let out_of_range = || invalid(format!("date arithmetic out of range: {delta}"));
    let amount = match delta {
        Bson::Int32(_) | Bson::Int64(_) => as_i64(delta).ok_or_else(out_of_range)?,
        _ => {
            let f = as_f64(delta).ok_or_else(out_of_range)?.round();
            if !f.is_finite() || f < i64::MIN as f64 || f >= i64::MAX as f64 {
                return Err(out_of_range());
            }
            f as i64
        }
    };
    let shifted = if subtract { ms.checked_sub(amount) } else { ms.checked_add(amount) };
    shifted.map(|t| Bson::DateTime(DateTime::from_millis(t))).ok_or_else(out_of_range)
}

fn invalid(msg: impl Into<String>) -> DbError {
    DbError::InvalidExpression(msg.into())
}

fn is_nullish(v: Option<&Bson>) -> bool {
    matches!(v, None | Some(Bson::Null | Bson::Undefined))
}

/// Resolves an aggregation field path. Arrays of documents map the remaining path over their
/// elements, producing an array of whatever resolved.
fn resolve(v: &Bson, segs: &[&str]) -> Option<Bson> {
    let Some((seg, rest)) = segs.split_first() else {
        return Some(v.clone());
    };
    match v {
        Bson::Document(d) => resolve(d.get(*seg)?, rest),
        Bson::Array(items) => Some(Bson::Array(
            items
                .iter()
                .filter(|el| matches!(el, Bson::Document(_) | Bson::Array(_)))
                .filter_map(|el| resolve(el, segs))
                .collect(),
        )),
        _ => None,
    }
}

fn resolve_doc(doc: &Document, path: &str) -> Option<Bson> {
    let segs: Vec<&str> = path.split('.').collect();
    let (first, rest) = segs.split_first()?;
    resolve(doc.get(*first)?, rest)
}

/// Evaluates an expression; `Ok(None)` means the value is missing.
///
/// # Errors
/// `InvalidExpression` on operator type errors or unknown variables.
pub fn evaluate(expr: &Expr, vars: &mut Vars<'_>) -> Result<Option<Bson>, DbError> {
    match expr {
        Expr::Literal(v) => Ok(Some(v.clone())),
        Expr::Field(path) => Ok(resolve_doc(vars.root, path)),
        Expr::Var { name, path } => {
            let base = vars.lookup(name).ok_or_else(|| invalid(format!("undefined variable '$${name}'")))?;
            if path.is_empty() {
                return Ok(Some(base));
            }
            let segs: Vec<&str> = path.split('.').collect();
            Ok(resolve(&base, &segs))
        }
        Expr::Object(fields) => {
            let mut out = Document::new();
            for (k, e) in fields {
                if let Some(v) = evaluate(e, vars)? {
                    out.insert(k.clone(), v);
                }
            }
            Ok(Some(Bson::Document(out)))
        }
        Expr::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for e in items {
                out.push(evaluate(e, vars)?.unwrap_or(Bson::Null));
            }
            Ok(Some(Bson::Array(out)))
        }
        Expr::Cond { cond, then, otherwise } => {
            if truthy(evaluate(cond, vars)?.as_ref()) {
                evaluate(then, vars)
            } else {
                evaluate(otherwise, vars)
            }
        }
        Expr::Convert { input, to, on_error, on_null } => {
            let v = evaluate(input, vars)?;
            if is_nullish(v.as_ref()) {
                return match on_null {
                    Some(e) => evaluate(e, vars),
                    None => Ok(Some(Bson::Null)),
                };
            }
            let v = v.unwrap_or(Bson::Null);
            match convert::convert(&v, *to) {
                Ok(out) => Ok(Some(out)),
                Err(err) => match on_error {
                    Some(e) => evaluate(e, vars),
                    None => Err(err),
                },
            }
        }
        Expr::Filter { input, var, cond } => {
            let items = match evaluate(input, vars)? {
                None | Some(Bson::Null) => return Ok(Some(Bson::Null)),
                Some(Bson::Array(items)) => items,
                Some(other) => {
                    return Err(invalid(format!("$filter input must be an array, found {}", type_name(&other))));
                }
            };
            let mut kept = Vec::new();
            for el in items {
                vars.bindings.push((var.clone(), el));
                let keep = evaluate(cond, vars).map(|r| truthy(r.as_ref()));
                let (_, el) = vars.bindings.pop().ok_or_else(|| invalid("binding stack underflow"))?;
                if keep? {
                    kept.push(el);
                }
            }
            Ok(Some(Bson::Array(kept)))
        }
        Expr::Op { op, args } => eval_op(*op, args, vars),
    }
}

fn eval_args(args: &[Expr], vars: &mut Vars<'_>) -> Result<Vec<Option<Bson>>, DbError> {
    args.iter().map(|a| evaluate(a, vars)).collect()
}

fn integral(v: Option<&Bson>, what: &str) -> Result<i64, DbError> {
    v.and_then(as_i64).ok_or_else(|| invalid(format!("{what} must be an integer")))
}

#[allow(clippy::too_many_lines)]
fn eval_op(op: ExprOp, args: &[Expr], vars: &mut Vars<'_>) -> Result<Option<Bson>, DbError> {
    // short-circuit left to right
    if matches!(op, ExprOp::And | ExprOp::Or) {
        let want = op == ExprOp::Or;
        for a in args {
            if truthy(evaluate(a, vars)?.as_ref()) == want {
                return Ok(Some(Bson::Boolean(want)));
            }
        }
        return Ok(Some(Bson::Boolean(!want)));
    }
    let vals = eval_args(args, vars)?;
    let null = Bson::Null;
    let at = |i: usize| vals.get(i).and_then(Option::as_ref);
    let out = match op {
        ExprOp::Add => {
            if vals.iter().any(|v| is_nullish(v.as_ref())) {
                return Ok(Some(Bson::Null));
            }
            let mut acc = Bson::Int32(0);
            let mut date: Option<i64> = None;
            for v in vals.iter().flatten() {
                if let Bson::DateTime(d) = v {
                    if date.replace(d.timestamp_millis()).is_some() {
                        return Err(invalid("only one date allowed in an $add expression"));
                    }
                    continue;
                }
                acc = num::add(&acc, v)
                    .ok_or_else(|| invalid(format!("$add only supports numeric or date types, not {}", type_name(v))))?;
            }
            match date {
                Some(ms) => shift_date(ms, &acc, false)?,
                None => acc,
            }
        }
        ExprOp::Subtract => {
            let (Some(a), Some(b)) = (at(0), at(1)) else {
                return Ok(Some(Bson::Null));
            };
            match (a, b) {
                (Bson::Null, _) | (_, Bson::Null) => Bson::Null,
                (Bson::DateTime(x), Bson::DateTime(y)) => x
                    .timestamp_millis()
                    .checked_sub(y.timestamp_millis())
                    .map(Bson::Int64)
                    .ok_or_else(|| invalid("$subtract date difference overflows"))?,
                (Bson::DateTime(x), n) if is_number(n) => shift_date(x.timestamp_millis(), n, true)?,
                _ => num::sub(a, b).ok_or_else(|| {
                    invalid(format!("can't $subtract {} from {}", type_name(b), type_name(a)))
                })?,
            }
        }
        ExprOp::Multiply => {
            if vals.iter().any(|v| is_nullish(v.as_ref())) {
                return Ok(Some(Bson::Null));
            }
            let mut acc = Bson::Int32(1);
            for v in vals.iter().flatten() {
                acc = num::mul(&acc, v)
                    .ok_or_else(|| invalid(format!("$multiply only supports numeric types, not {}", type_name(v))))?;
            }
            acc
        }
        ExprOp::Divide => {
            let (Some(a), Some(b)) = (at(0), at(1)) else {
                return Ok(Some(Bson::Null));
            };
            if matches!(a, Bson::Null) || matches!(b, Bson::Null) {
                return Ok(Some(Bson::Null));
            }
            let (x, y) = (as_f64(a), as_f64(b));
            let (Some(x), Some(y)) = (x, y) else {
                return Err(invalid("$divide only supports numeric types"));
            };
            if y == 0.0 {
                return Err(invalid("can't $divide by zero"));
            }
            Bson::Double(x / y)
        }
        ExprOp::Eq | ExprOp::Ne | ExprOp::Gt | ExprOp::Gte | ExprOp::Lt | ExprOp::Lte => {
            let ord = compare_values(at(0).unwrap_or(&null), at(1).unwrap_or(&null));
            Bson::Boolean(match op {
                ExprOp::Eq => ord == Ordering::Equal,
                ExprOp::Ne => ord != Ordering::Equal,
                ExprOp::Gt => ord == Ordering::Greater,
                ExprOp::Gte => ord != Ordering::Less,
                ExprOp::Lt => ord == Ordering::Less,
                _ => ord != Ordering::Greater,
            })
        }
        ExprOp::Cmp => {
            let ord = compare_values(at(0).unwrap_or(&null), at(1).unwrap_or(&null));
            Bson::Int32(match ord {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            })
        }
        ExprOp::Not => Bson::Boolean(!truthy(at(0))),
        ExprOp::IfNull => {
            let (last, candidates) = vals.split_last().ok_or_else(|| invalid("$ifNull needs arguments"))?;
            for c in candidates {
                if !is_nullish(c.as_ref()) {
                    return Ok(c.clone());
                }
            }
            return Ok(last.clone());
        }
        ExprOp::Concat => {
            let mut s = String::new();
            for v in &vals {
                match v {
                    None | Some(Bson::Null) => return Ok(Some(Bson::Null)),
                    Some(Bson::String(part)) => s.push_str(part),
                    Some(other) => {
                        return Err(invalid(format!("$concat only supports strings, not {}", type_name(other))));
                    }
                }
            }
            Bson::String(s)
        }
        ExprOp::SubstrCP => {
            let text = match at(0) {
                None | Some(Bson::Null) => String::new(),
                Some(v) => convert::to_string(v)
                    .ok_or_else(|| invalid(format!("$substrCP cannot take a {}", type_name(v))))?,
            };
            let start = integral(at(1), "$substrCP starting index")?;
            let len = integral(at(2), "$substrCP length")?;
            let (Some(start), Some(len)) = (i64_to_usize(start), i64_to_usize(len)) else {
                return Err(invalid("$substrCP index and length must be non-negative"));
            };
            Bson::String(text.chars().skip(start).take(len).collect())
        }
        ExprOp::StrLenCP => match at(0) {
            Some(Bson::String(s)) => Bson::Int32(i32::try_from(s.chars().count()).unwrap_or(i32::MAX)),
            other => {
                return Err(invalid(format!(
                    "$strLenCP requires a string argument, found {}",
                    other.map_or("missing", type_name)
                )));
            }
        },
        ExprOp::ToUpper | ExprOp::ToLower => {
            let text = match at(0) {
                None | Some(Bson::Null) => String::new(),
                Some(v) => convert::to_string(v)
                    .ok_or_else(|| invalid(format!("can't convert {} to a string", type_name(v))))?,
            };
            Bson::String(if op == ExprOp::ToUpper { text.to_uppercase() } else { text.to_lowercase() })
        }
        ExprOp::Size => match at(0) {
            Some(Bson::Array(items)) => Bson::Int32(i32::try_from(items.len()).unwrap_or(i32::MAX)),
            other => {
                return Err(invalid(format!(
                    "the argument to $size must be an array, found {}",
                    other.map_or("missing", type_name)
                )));
            }
        },
        ExprOp::Slice => {
            let items = match at(0) {
                None | Some(Bson::Null) => return Ok(Some(Bson::Null)),
                Some(Bson::Array(items)) => items,
                Some(other) => {
                    return Err(invalid(format!("$slice requires an array, found {}", type_name(other))));
                }
            };
            let total = items.len();
            let (from, to) = if vals.len() == 2 {
                let n = integral(at(1), "$slice count")?;
                if n >= 0 {
                    num::window(total, 0, i64_to_usize(n).unwrap_or(usize::MAX))
                } else {
                    num::window(total, n, usize::MAX)
                }
            } else {
                let pos = integral(at(1), "$slice position")?;
                let n = integral(at(2), "$slice count")?;
                if n <= 0 {
                    return Err(invalid("$slice count must be positive"));
                }
                num::window(total, pos, i64_to_usize(n).unwrap_or(usize::MAX))
            };
            Bson::Array(items[from..to].to_vec())
        }
        ExprOp::ArrayElemAt => {
            let items = match at(0) {
                None | Some(Bson::Null) => return Ok(Some(Bson::Null)),
                Some(Bson::Array(items)) => items,
                Some(other) => {
                    return Err(invalid(format!("$arrayElemAt requires an array, found {}", type_name(other))));
                }
            };
            let idx = integral(at(1), "$arrayElemAt index")?;
            let idx = if idx < 0 { usize_to_i64(items.len()) + idx } else { idx };
            return Ok(i64_to_usize(idx).and_then(|i| items.get(i)).cloned());
        }
        ExprOp::Year | ExprOp::Month | ExprOp::DayOfMonth | ExprOp::IsoWeekYear => {
            let Some(v) = at(0).filter(|v| !matches!(v, Bson::Null)) else {
                return Ok(Some(Bson::Null));
            };
            let part = match op {
                ExprOp::Year => DatePart::Year,
                ExprOp::Month => DatePart::Month,
                ExprOp::DayOfMonth => DatePart::DayOfMonth,
                _ => DatePart::IsoWeekYear,
            };
            convert::date_part(v, part)?
        }
        ExprOp::And | ExprOp::Or => unreachable!("handled above"),
    };
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse_expr;
    use bson::doc;

    fn eval(e: Bson, d: &Document) -> Result<Bson, DbError> {
        eval_expr(&parse_expr(&e)?, d)
    }

    #[test]
    fn date_arithmetic_stays_in_range() {
        let d = doc! {"d": DateTime::from_millis(1_000_000)};
        let add = |n: Bson| eval(Bson::Document(doc! {"$add": ["$d", n]}), &d);
        assert_eq!(add(Bson::Int32(500)).unwrap(), Bson::DateTime(DateTime::from_millis(1_000_500)));
        assert_eq!(add(Bson::Double(1.6)).unwrap(), Bson::DateTime(DateTime::from_millis(1_000_002)));
        assert!(matches!(add(Bson::Double(1.0e19)), Err(DbError::InvalidExpression(_))));
        assert!(matches!(add(Bson::Int64(i64::MAX)), Err(DbError::InvalidExpression(_))));
        assert!(matches!(add(Bson::Double(f64::INFINITY)), Err(DbError::InvalidExpression(_))));

        let sub = |n: Bson| eval(Bson::Document(doc! {"$subtract": ["$d", n]}), &d);
        assert_eq!(sub(Bson::Int32(1_000_000)).unwrap(), Bson::DateTime(DateTime::from_millis(0)));
        assert!(matches!(sub(Bson::Int64(i64::MIN)), Err(DbError::InvalidExpression(_))));

        let far = doc! {"a": DateTime::from_millis(i64::MAX), "b": DateTime::from_millis(-1)};
        let diff = Bson::Document(doc! {"$subtract": ["$a", "$b"]});
        assert!(matches!(eval(diff, &far), Err(DbError::InvalidExpression(_))));
    }

    #[test]
    fn cond_compares_two_fields() {
        let d = doc! {"volume": 100, "target": 120};
        let e = Bson::Document(doc! {
            "$gt": [
                {"$cond": {"if": {"$gte": ["$volume", "$target"]}, "then": {"$subtract": ["$volume", 10]}, "else": "$target"}},
                "$target"
            ]
        });
        assert_eq!(eval(e, &d).unwrap(), Bson::Boolean(false));
        let d = doc! {"volume": 200, "target": 120};
        let e = Bson::Document(doc! {
            "$gt": [
                {"$cond": {"if": {"$gte": ["$volume", "$target"]}, "then": {"$subtract": ["$volume", 10]}, "else": "$target"}},
                "$target"
            ]
        });
        assert_eq!(eval(e, &d).unwrap(), Bson::Boolean(true));
    }

    #[test]
    fn full_name_capitalisation() {
        let d = doc! {"name": {"first": "carl", "last": "jacobsen"}};
        let e = Bson::Document(doc! {
            "$concat": [
                {"$toUpper": {"$substrCP": ["$name.first", 0, 1]}},
                {"$substrCP": ["$name.first", 1, {"$subtract": [{"$strLenCP": "$name.first"}, 1]}]},
                " ",
                {"$toUpper": "$name.last"}
            ]
        });
        assert_eq!(eval(e, &d).unwrap(), Bson::from("Carl JACOBSEN"));
    }

    #[test]
    fn concat_with_missing_is_null() {
        let d = doc! {"a": "x"};
        let e = Bson::Document(doc! {"$concat": ["$a", "$b"]});
        assert_eq!(eval(e, &d).unwrap(), Bson::Null);
    }

    #[test]
    fn size_of_non_array_errors() {
        let d = doc! {"a": 3};
        let err = eval(Bson::Document(doc! {"$size": "$a"}), &d).unwrap_err();
        assert!(matches!(err, DbError::InvalidExpression(_)));
    }

    #[test]
    fn slice_forms() {
        let d = doc! {"s": [1, 2, 3, 4]};
        assert_eq!(eval(Bson::Document(doc! {"$slice": ["$s", 1]}), &d).unwrap(), bson::bson!([1]));
        assert_eq!(eval(Bson::Document(doc! {"$slice": ["$s", -1]}), &d).unwrap(), bson::bson!([4]));
        assert_eq!(eval(Bson::Document(doc! {"$slice": ["$s", 1, 2]}), &d).unwrap(), bson::bson!([2, 3]));
    }

    #[test]
    fn filter_binds_named_variable() {
        let d = doc! {"examScores": [{"score": 50}, {"score": 70}, {"score": 90}]};
        let e = Bson::Document(doc! {
            "$filter": {"input": "$examScores", "as": "sc", "cond": {"$gt": ["$$sc.score", 60]}}
        });
        assert_eq!(eval(e, &d).unwrap(), bson::bson!([{"score": 70}, {"score": 90}]));
    }

    #[test]
    fn convert_falls_back_on_error_and_null() {
        let d = doc! {"lng": "not-a-number"};
        let e = Bson::Document(doc! {
            "$convert": {"input": "$lng", "to": "double", "onError": 0.0, "onNull": -1.0}
        });
        assert_eq!(eval(e, &d).unwrap(), Bson::Double(0.0));
        let e = Bson::Document(doc! {
            "$convert": {"input": "$missing", "to": "double", "onError": 0.0, "onNull": -1.0}
        });
        assert_eq!(eval(e, &d).unwrap(), Bson::Double(-1.0));
    }

    #[test]
    fn field_path_maps_over_arrays() {
        let d = doc! {"hobbies": [{"title": "Sports"}, {"title": "Cooking"}]};
        assert_eq!(eval(Bson::from("$hobbies.title"), &d).unwrap(), bson::bson!(["Sports", "Cooking"]));
    }

    #[test]
    fn root_variable() {
        let d = doc! {"a": 1};
        assert_eq!(eval(Bson::from("$$ROOT.a"), &d).unwrap(), Bson::Int32(1));
        assert!(eval(Bson::from("$$nope"), &d).is_err());
    }

    #[test]
    fn divide_by_zero_errors() {
        let d = doc! {};
        assert!(eval(Bson::Document(doc! {"$divide": [1, 0]}), &d).is_err());
        assert_eq!(eval(Bson::Document(doc! {"$divide": [9, 2]}), &d).unwrap(), Bson::Double(4.5));
    }
}
