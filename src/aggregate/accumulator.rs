use bson::{Bson, Document};
use std::cmp::Ordering;

use crate::errors::DbError;
use crate::expr::{Expr, Vars, evaluate, parse_expr};
use crate::query::order::{compare_values, values_equal};
use crate::utils::num::{self, as_f64, is_number};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorOp {
    Sum,
    Avg,
    Min,
    Max,
    Push,
    AddToSet,
    First,
    Last,
    Count,
}

/// One output field of `$group` / `$bucket`: `{name: {$op: expression}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulator {
    pub op: AccumulatorOp,
    pub expr: Expr,
}

impl Accumulator {
    /// # Errors
    /// `InvalidPipeline` when the value is not a single-operator object naming a known
    /// accumulator.
    pub fn parse(field: &str, spec: &Bson) -> Result<Self, DbError> {
        let invalid = |msg: String| DbError::InvalidPipeline(format!("accumulator '{field}': {msg}"));
        let Bson::Document(d) = spec else {
            return Err(invalid("must be an object".into()));
        };
        if d.len() != 1 {
            return Err(invalid("must name exactly one operator".into()));
        }
        let Some((name, arg)) = d.iter().next() else {
            return Err(invalid("must name exactly one operator".into()));
        };
        let op = match name.as_str() {
            "$sum" => AccumulatorOp::Sum,
            "$avg" => AccumulatorOp::Avg,
            "$min" => AccumulatorOp::Min,
            "$max" => AccumulatorOp::Max,
            "$push" => AccumulatorOp::Push,
            "$addToSet" => AccumulatorOp::AddToSet,
            "$first" => AccumulatorOp::First,
            "$last" => AccumulatorOp::Last,
            "$count" => {
                if !matches!(arg, Bson::Document(a) if a.is_empty()) {
                    return Err(invalid("$count takes an empty object".into()));
                }
                AccumulatorOp::Count
            }
            other => return Err(invalid(format!("unknown group operator '{other}'"))),
        };
        let expr = parse_expr(arg).map_err(|e| invalid(e.to_string()))?;
        Ok(Self { op, expr })
    }

    #[must_use]
    pub fn start(&self) -> AccState {
        match self.op {
            AccumulatorOp::Sum => AccState::Sum(Bson::Int32(0)),
            AccumulatorOp::Avg => AccState::Avg { sum: 0.0, count: 0 },
            AccumulatorOp::Min | AccumulatorOp::Max => AccState::Extreme(None),
            AccumulatorOp::Push | AccumulatorOp::AddToSet => AccState::Items(Vec::new()),
            AccumulatorOp::First => AccState::First(None),
            AccumulatorOp::Last => AccState::Last(Bson::Null),
            AccumulatorOp::Count => AccState::Count(0),
        }
    }

    /// Feeds one document into `state`.
    ///
    /// # Errors
    /// Propagates expression evaluation failures.
    pub fn add(&self, state: &mut AccState, doc: &Document) -> Result<(), DbError> {
        if let AccState::Count(n) = state {
            *n += 1;
            return Ok(());
        }
        let value = evaluate(&self.expr, &mut Vars::new(doc))?;
        match state {
            AccState::Sum(total) => {
                if let Some(v) = value.as_ref().filter(|v| is_number(v)) {
                    *total = num::add(total, v).unwrap_or(Bson::Null);
                }
            }
            AccState::Avg { sum, count } => {
                if let Some(f) = value.as_ref().and_then(as_f64) {
                    *sum += f;
                    *count += 1;
                }
            }
            AccState::Extreme(best) => {
                let Some(v) = value.filter(|v| !matches!(v, Bson::Null | Bson::Undefined)) else {
                    return Ok(());
                };
                let wanted = if self.op == AccumulatorOp::Min { Ordering::Less } else { Ordering::Greater };
                if best.as_ref().is_none_or(|b| compare_values(&v, b) == wanted) {
                    *best = Some(v);
                }
            }
            AccState::Items(items) => {
                let Some(v) = value else { return Ok(()) };
                if self.op == AccumulatorOp::Push || !items.iter().any(|x| values_equal(x, &v)) {
                    items.push(v);
                }
            }
            AccState::First(first) => {
                if first.is_none() {
                    *first = Some(value.unwrap_or(Bson::Null));
                }
            }
            AccState::Last(last) => *last = value.unwrap_or(Bson::Null),
            AccState::Count(_) => {}
        }
        Ok(())
    }
}

/// Running state of one accumulator within one group.
#[derive(Debug, Clone)]
pub enum AccState {
    Sum(Bson),
    Avg { sum: f64, count: u64 },
    Extreme(Option<Bson>),
    Items(Vec<Bson>),
    First(Option<Bson>),
    Last(Bson),
    Count(i64),
}

impl AccState {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn finish(self) -> Bson {
        match self {
            Self::Sum(v) | Self::Last(v) => v,
            Self::Avg { count: 0, .. } => Bson::Null,
            Self::Avg { sum, count } => Bson::Double(sum / count as f64),
            Self::Extreme(v) | Self::First(v) => v.unwrap_or(Bson::Null),
            Self::Items(items) => Bson::Array(items),
            Self::Count(n) => i32::try_from(n).map_or(Bson::Int64(n), Bson::Int32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn run(spec: Bson, docs: &[Document]) -> Bson {
        let acc = Accumulator::parse("out", &spec).unwrap();
        let mut st = acc.start();
        for d in docs {
            acc.add(&mut st, d).unwrap();
        }
        st.finish()
    }

    #[test]
    fn sum_counts_and_adds() {
        let docs = [doc! {"a": 1}, doc! {"a": 2.5}, doc! {"a": "x"}, doc! {}];
        assert_eq!(run(Bson::Document(doc! {"$sum": 1}), &docs), Bson::Int32(4));
        assert_eq!(run(Bson::Document(doc! {"$sum": "$a"}), &docs), Bson::Double(3.5));
    }

    #[test]
    fn avg_ignores_non_numbers() {
        let docs = [doc! {"a": 2}, doc! {"a": 4}, doc! {"a": null}];
        assert_eq!(run(Bson::Document(doc! {"$avg": "$a"}), &docs), Bson::Double(3.0));
        assert_eq!(run(Bson::Document(doc! {"$avg": "$b"}), &docs), Bson::Null);
    }

    #[test]
    fn min_max_skip_nulls() {
        let docs = [doc! {"a": 5}, doc! {"a": null}, doc! {"a": 2}];
        assert_eq!(run(Bson::Document(doc! {"$min": "$a"}), &docs), Bson::Int32(2));
        assert_eq!(run(Bson::Document(doc! {"$max": "$a"}), &docs), Bson::Int32(5));
    }

    #[test]
    fn push_add_to_set_first_last() {
        let docs = [doc! {"a": 1}, doc! {"a": 1}, doc! {"a": 2}];
        assert_eq!(run(Bson::Document(doc! {"$push": "$a"}), &docs), bson::bson!([1, 1, 2]));
        assert_eq!(run(Bson::Document(doc! {"$addToSet": "$a"}), &docs), bson::bson!([1, 2]));
        assert_eq!(run(Bson::Document(doc! {"$first": "$a"}), &docs), Bson::Int32(1));
        assert_eq!(run(Bson::Document(doc! {"$last": "$a"}), &docs), Bson::Int32(2));
        assert_eq!(run(Bson::Document(doc! {"$count": {}}), &docs), Bson::Int32(3));
    }

    #[test]
    fn unknown_accumulator() {
        assert!(Accumulator::parse("x", &Bson::Document(doc! {"$median": "$a"})).is_err());
    }
}
