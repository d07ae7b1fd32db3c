//! Type conversion (`$convert` and its shorthands) and date helpers.

use bson::{Bson, DateTime};
use chrono::{DateTime as ChronoDateTime, Datelike, NaiveDate, NaiveDateTime, Utc};

use crate::document::type_name;
use crate::errors::DbError;
use crate::utils::num::as_f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertTo {
    Double,
    Int,
    Long,
    String,
    Bool,
    Date,
}

impl ConvertTo {
    pub(crate) fn from_bson(v: &Bson) -> Result<Self, DbError> {
        let parsed = match v {
            Bson::String(s) => match s.as_str() {
                "double" => Some(Self::Double),
                "int" => Some(Self::Int),
                "long" => Some(Self::Long),
                "string" => Some(Self::String),
                "bool" => Some(Self::Bool),
                "date" => Some(Self::Date),
                _ => None,
            },
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => match crate::utils::num::as_i64(v) {
                Some(1) => Some(Self::Double),
                Some(2) => Some(Self::String),
                Some(8) => Some(Self::Bool),
                Some(9) => Some(Self::Date),
                Some(16) => Some(Self::Int),
                Some(18) => Some(Self::Long),
                _ => None,
            },
            _ => None,
        };
        parsed.ok_or_else(|| DbError::InvalidExpression(format!("unsupported $convert target {v}")))
    }
}

fn failed(v: &Bson, to: ConvertTo) -> DbError {
    DbError::InvalidExpression(format!("cannot convert {} value {v} to {to:?}", type_name(v)))
}

/// Converts a non-null value. Null handling is the caller's concern.
///
/// # Errors
/// `InvalidExpression` when the value has no representation in the target type.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub(crate) fn convert(v: &Bson, to: ConvertTo) -> Result<Bson, DbError> {
    match to {
        ConvertTo::Double => match v {
            Bson::Boolean(b) => Ok(Bson::Double(if *b { 1.0 } else { 0.0 })),
            Bson::DateTime(d) => Ok(Bson::Double(d.timestamp_millis() as f64)),
            Bson::String(s) => s.trim().parse::<f64>().map(Bson::Double).map_err(|_| failed(v, to)),
            other => as_f64(other).map(Bson::Double).ok_or_else(|| failed(v, to)),
        },
        ConvertTo::Int => {
            let n = to_i64(v, to)?;
            i32::try_from(n).map(Bson::Int32).map_err(|_| failed(v, to))
        }
        ConvertTo::Long => to_i64(v, to).map(Bson::Int64),
        ConvertTo::String => to_string(v).map(Bson::String).ok_or_else(|| failed(v, to)),
        ConvertTo::Bool => Ok(Bson::Boolean(match v {
            Bson::Boolean(b) => *b,
            Bson::Int32(i) => *i != 0,
            Bson::Int64(i) => *i != 0,
            Bson::Double(f) => *f != 0.0,
            _ => true,
        })),
        ConvertTo::Date => match v {
            Bson::DateTime(_) => Ok(v.clone()),
            Bson::Int64(ms) => Ok(Bson::DateTime(DateTime::from_millis(*ms))),
            Bson::Double(f) if f.is_finite() => Ok(Bson::DateTime(DateTime::from_millis(*f as i64))),
            Bson::String(s) => parse_date(s).map(Bson::DateTime).ok_or_else(|| failed(v, to)),
            Bson::ObjectId(oid) => Ok(Bson::DateTime(oid.timestamp())),
            _ => Err(failed(v, to)),
        },
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_i64(v: &Bson, to: ConvertTo) -> Result<i64, DbError> {
    match v {
        Bson::Int32(i) => Ok(i64::from(*i)),
        Bson::Int64(i) => Ok(*i),
        // truncates toward zero
        Bson::Double(f) if f.is_finite() && f.abs() < 9.2e18 => Ok(f.trunc() as i64),
        Bson::Boolean(b) => Ok(i64::from(*b)),
        Bson::String(s) => s.trim().parse::<i64>().map_err(|_| failed(v, to)),
        Bson::DateTime(d) if to == ConvertTo::Long => Ok(d.timestamp_millis()),
        _ => Err(failed(v, to)),
    }
}

/// Textual form used by `$toString`, `$concat` diagnostics and `$toUpper`/`$toLower`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn to_string(v: &Bson) -> Option<String> {
    Some(match v {
        Bson::String(s) => s.clone(),
        Bson::Int32(i) => i.to_string(),
        Bson::Int64(i) => i.to_string(),
        Bson::Double(f) if f.fract() == 0.0 && f.abs() < 1e15 => (*f as i64).to_string(),
        Bson::Double(f) => f.to_string(),
        Bson::Boolean(b) => b.to_string(),
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::DateTime(d) => to_chrono(*d)?.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        Bson::Decimal128(d) => d.to_string(),
        _ => return None,
    })
}

fn parse_date(s: &str) -> Option<DateTime> {
    if let Ok(dt) = ChronoDateTime::parse_from_rfc3339(s) {
        return Some(DateTime::from_millis(dt.timestamp_millis()));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(DateTime::from_millis(naive.and_utc().timestamp_millis()));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(DateTime::from_millis(naive.and_utc().timestamp_millis()));
    }
    let day = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    Some(DateTime::from_millis(day.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis()))
}

pub(crate) fn to_chrono(d: DateTime) -> Option<ChronoDateTime<Utc>> {
    ChronoDateTime::from_timestamp_millis(d.timestamp_millis())
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum DatePart {
    Year,
    Month,
    DayOfMonth,
    IsoWeekYear,
}

/// Extracts a calendar component (UTC).
///
/// # Errors
/// `InvalidExpression` when `v` is not a date.
pub(crate) fn date_part(v: &Bson, part: DatePart) -> Result<Bson, DbError> {
    let Bson::DateTime(d) = v else {
        return Err(DbError::InvalidExpression(format!(
            "date operator requires a date, found {}",
            type_name(v)
        )));
    };
    let dt = to_chrono(*d)
        .ok_or_else(|| DbError::InvalidExpression(format!("date out of range: {d}")))?;
    let n = match part {
        DatePart::Year => dt.year(),
        DatePart::Month => i32::try_from(dt.month()).unwrap_or_default(),
        DatePart::DayOfMonth => i32::try_from(dt.day()).unwrap_or_default(),
        DatePart::IsoWeekYear => dt.iso_week().year(),
    };
    Ok(Bson::Int32(n))
}
