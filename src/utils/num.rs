//! Numeric utilities: BSON number arithmetic with MongoDB-style type promotion, plus
//! centralized integer conversions.
//!
//! Promotion rules
//! - int32 op int32 stays int32 unless the result overflows, then int64.
//! - any int64 operand (and no double) yields int64; overflow falls back to double.
//! - any double operand yields double.

use bson::Bson;

#[inline]
#[must_use]
pub fn is_number(v: &Bson) -> bool {
    matches!(v, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_))
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn as_f64(v: &Bson) -> Option<f64> {
    match v {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        Bson::Decimal128(d) => d.to_string().parse::<f64>().ok(),
        _ => None,
    }
}

/// Integer view of a number, accepting doubles only when they hold an integral value.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn as_i64(v: &Bson) -> Option<i64> {
    match v {
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Int64(i) => Some(*i),
        Bson::Double(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
        _ => None,
    }
}

#[derive(Clone, Copy)]
enum Op {
    Add,
    Sub,
    Mul,
}

fn combine(a: &Bson, b: &Bson, op: Op) -> Option<Bson> {
    match (a, b) {
        (Bson::Int32(x), Bson::Int32(y)) => {
            let r = match op {
                Op::Add => x.checked_add(*y),
                Op::Sub => x.checked_sub(*y),
                Op::Mul => x.checked_mul(*y),
            };
            Some(r.map_or_else(|| widen(i64::from(*x), i64::from(*y), op), Bson::Int32))
        }
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
            Some(widen(as_i64(a)?, as_i64(b)?, op))
        }
        _ => {
            let (x, y) = (as_f64(a)?, as_f64(b)?);
            Some(Bson::Double(match op {
                Op::Add => x + y,
                Op::Sub => x - y,
                Op::Mul => x * y,
            }))
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn widen(x: i64, y: i64, op: Op) -> Bson {
    let r = match op {
        Op::Add => x.checked_add(y),
        Op::Sub => x.checked_sub(y),
        Op::Mul => x.checked_mul(y),
    };
    r.map_or_else(
        || {
            let (fx, fy) = (x as f64, y as f64);
            Bson::Double(match op {
                Op::Add => fx + fy,
                Op::Sub => fx - fy,
                Op::Mul => fx * fy,
            })
        },
        Bson::Int64,
    )
}

/// Sum of two numbers; `None` when either operand is not numeric.
#[must_use]
pub fn add(a: &Bson, b: &Bson) -> Option<Bson> {
    if !is_number(a) || !is_number(b) {
        return None;
    }
    combine(a, b, Op::Add)
}

#[must_use]
pub fn sub(a: &Bson, b: &Bson) -> Option<Bson> {
    if !is_number(a) || !is_number(b) {
        return None;
    }
    combine(a, b, Op::Sub)
}

#[must_use]
pub fn mul(a: &Bson, b: &Bson) -> Option<Bson> {
    if !is_number(a) || !is_number(b) {
        return None;
    }
    combine(a, b, Op::Mul)
}

/// Zero of the same numeric type as `like`.
#[must_use]
pub fn zero_like(like: &Bson) -> Bson {
    match like {
        Bson::Int32(_) => Bson::Int32(0),
        Bson::Int64(_) => Bson::Int64(0),
        _ => Bson::Double(0.0),
    }
}

#[inline]
#[must_use]
pub fn i64_to_usize(v: i64) -> Option<usize> {
    usize::try_from(v).ok()
}

#[inline]
#[must_use]
pub fn usize_to_u64(v: usize) -> u64 {
    u64::try_from(v).unwrap_or(u64::MAX)
}

#[inline]
#[must_use]
pub fn usize_to_i64(v: usize) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

/// Clamped `[start, start + len)` window over a sequence of `total` items, where a negative
/// `start` counts back from the end.
#[must_use]
pub fn window(total: usize, start: i64, len: usize) -> (usize, usize) {
    let total_i = usize_to_i64(total);
    let from = if start < 0 { (total_i + start).max(0) } else { start.min(total_i) };
    let from = i64_to_usize(from).unwrap_or(0);
    let to = from.saturating_add(len).min(total);
    (from, to)
}
