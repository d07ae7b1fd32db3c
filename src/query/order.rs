//! Value ordering shared by filters, sorting, `$min`/`$max` and accumulators.
//!
//! [`compare_values`] is a total order across all types (MongoDB's canonical type order:
//! null < numbers < strings < objects < arrays < binData < objectId < bool < date <
//! timestamp < regex). [`compare_for_query`] is the comparison used by `$gt`-style
//! predicates: values of different type brackets are incomparable.

use bson::{Bson, Document};
use std::cmp::Ordering;

use super::types::{MAX_SORT_FIELDS, Order, SortSpec};
use crate::document::path;
use crate::utils::num::{as_f64, is_number};

fn type_rank(v: &Bson) -> u8 {
    match v {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::MaxKey => 255,
        _ => 12,
    }
}

fn compare_numbers(a: &Bson, b: &Bson) -> Ordering {
    match (a, b) {
        (Bson::Int32(x), Bson::Int32(y)) => x.cmp(y),
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
            let x = if let Bson::Int32(i) = a { i64::from(*i) } else if let Bson::Int64(i) = a { *i } else { 0 };
            let y = if let Bson::Int32(i) = b { i64::from(*i) } else if let Bson::Int64(i) = b { *i } else { 0 };
            x.cmp(&y)
        }
        _ => as_f64(a).unwrap_or(f64::NAN).total_cmp(&as_f64(b).unwrap_or(f64::NAN)),
    }
}

/// Total order over values.
#[must_use]
pub fn compare_values(a: &Bson, b: &Bson) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    if is_number(a) {
        return compare_numbers(a, b);
    }
    match (a, b) {
        (Bson::String(x) | Bson::Symbol(x), Bson::String(y) | Bson::Symbol(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.timestamp_millis().cmp(&y.timestamp_millis()),
        (Bson::Timestamp(x), Bson::Timestamp(y)) => (x.time, x.increment).cmp(&(y.time, y.increment)),
        (Bson::Array(x), Bson::Array(y)) => {
            for (ea, eb) in x.iter().zip(y.iter()) {
                let o = compare_values(ea, eb);
                if o != Ordering::Equal {
                    return o;
                }
            }
            x.len().cmp(&y.len())
        }
        (Bson::Document(x), Bson::Document(y)) => compare_documents(x, y),
        (Bson::Binary(x), Bson::Binary(y)) => x
            .bytes
            .len()
            .cmp(&y.bytes.len())
            .then_with(|| u8::from(x.subtype).cmp(&u8::from(y.subtype)))
            .then_with(|| x.bytes.cmp(&y.bytes)),
        (Bson::RegularExpression(x), Bson::RegularExpression(y)) => {
            (x.pattern.as_str(), x.options.as_str()).cmp(&(y.pattern.as_str(), y.options.as_str()))
        }
        (Bson::MinKey, Bson::MinKey)
        | (Bson::MaxKey, Bson::MaxKey)
        | (Bson::Null | Bson::Undefined, Bson::Null | Bson::Undefined) => Ordering::Equal,
        // code, pointers and other rarely stored types order by their canonical text
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn compare_documents(x: &Document, y: &Document) -> Ordering {
    for ((ka, va), (kb, vb)) in x.iter().zip(y.iter()) {
        let o = type_rank(va)
            .cmp(&type_rank(vb))
            .then_with(|| ka.cmp(kb))
            .then_with(|| compare_values(va, vb));
        if o != Ordering::Equal {
            return o;
        }
    }
    x.len().cmp(&y.len())
}

/// Deep equality where numbers compare by value (`1 == 1.0`).
#[must_use]
pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    compare_values(a, b) == Ordering::Equal
}

/// Ordering for range predicates; `None` when the two values are of incompatible types.
#[must_use]
pub fn compare_for_query(a: &Bson, b: &Bson) -> Option<Ordering> {
    if type_rank(a) != type_rank(b) {
        return None;
    }
    Some(compare_values(a, b))
}

/// The value a document sorts by: arrays sort by their smallest element ascending and their
/// largest element descending; an empty array sorts before null.
fn sort_key<'a>(v: &'a Bson, order: Order) -> &'a Bson {
    let Bson::Array(items) = v else { return v };
    let pick = match order {
        Order::Asc => items.iter().min_by(|x, y| compare_values(x, y)),
        Order::Desc => items.iter().max_by(|x, y| compare_values(x, y)),
    };
    pick.unwrap_or(&Bson::MinKey)
}

/// Orders two documents by a multi-key sort specification. Missing fields sort as null.
#[must_use]
pub fn compare_docs(a: &Document, b: &Document, sort: &[SortSpec]) -> Ordering {
    for s in sort.iter().take(MAX_SORT_FIELDS) {
        let va = sort_key(path::get(a, &s.field).unwrap_or(&Bson::Null), s.order);
        let vb = sort_key(path::get(b, &s.field).unwrap_or(&Bson::Null), s.order);
        let ord = compare_values(va, vb);
        if ord != Ordering::Equal {
            return if matches!(s.order, Order::Asc) { ord } else { ord.reverse() };
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::spec::BinarySubtype;
    use bson::{Binary, Regex, doc};

    #[test]
    fn numbers_compare_across_widths() {
        assert_eq!(compare_values(&Bson::Int32(3), &Bson::Double(3.0)), Ordering::Equal);
        assert_eq!(compare_values(&Bson::Int64(2), &Bson::Double(2.5)), Ordering::Less);
    }

    #[test]
    fn type_brackets_order() {
        assert_eq!(compare_values(&Bson::Null, &Bson::Int32(0)), Ordering::Less);
        assert_eq!(compare_values(&Bson::Int32(100), &Bson::String("a".into())), Ordering::Less);
        assert!(compare_for_query(&Bson::Int32(1), &Bson::String("1".into())).is_none());
    }

    #[test]
    fn sort_by_nested_key_descending() {
        let a = doc! {"rating": {"average": 7.5}};
        let b = doc! {"rating": {"average": 9.0}};
        let spec = vec![SortSpec { field: "rating.average".into(), order: Order::Desc }];
        assert_eq!(compare_docs(&a, &b, &spec), Ordering::Greater);
    }

    #[test]
    fn distinct_values_of_one_bracket_are_not_equal() {
        let bin = |bytes: Vec<u8>| Bson::Binary(Binary { subtype: BinarySubtype::Generic, bytes });
        assert!(!values_equal(&bin(vec![1]), &bin(vec![2, 3])));
        assert!(!values_equal(&bin(vec![1]), &bin(vec![2])));
        assert!(values_equal(&bin(vec![4, 5]), &bin(vec![4, 5])));

        let re = |s: &str| {
            Bson::RegularExpression(Regex { pattern: s.try_into().unwrap(), options: "i".try_into().unwrap() })
        };
        assert!(!values_equal(&re("^a"), &re("^b")));
        assert!(values_equal(&re("^a"), &re("^a")));

        let js = |s: &str| Bson::JavaScriptCode(s.into());
        assert!(!values_equal(&js("return 1"), &js("return 2")));
        assert!(values_equal(&Bson::Null, &Bson::Undefined));
    }

    #[test]
    fn array_sort_keys_use_min_then_max() {
        let a = doc! {"xs": [5, 1]};
        let b = doc! {"xs": [3, 4]};
        let asc = vec![SortSpec { field: "xs".into(), order: Order::Asc }];
        let desc = vec![SortSpec { field: "xs".into(), order: Order::Desc }];
        // ascending compares 1 with 3, descending compares 5 with 4
        assert_eq!(compare_docs(&a, &b, &asc), Ordering::Less);
        assert_eq!(compare_docs(&a, &b, &desc), Ordering::Less);
        let empty = doc! {"xs": []};
        assert_eq!(compare_docs(&empty, &doc! {"xs": null}, &asc), Ordering::Less);
    }
}
