use bson::spec::BinarySubtype;
use bson::{Binary, Bson, DateTime, Document, doc};
use docql::DbError;
use docql::aggregate::{PipelineOptions, parse_pipeline, run_pipeline};
use docql::expr::{eval_expr, parse_expr};
use docql::query::{eval_filter, eval_with_position, parse_filter};
use docql::update::{ApplyContext, apply_update, parse_update};
use proptest::prelude::*;

fn scalar() -> impl Strategy<Value = Bson> {
    prop_oneof![
        any::<i32>().prop_map(Bson::Int32),
        (-1.0e6..1.0e6f64).prop_map(Bson::Double),
        "[a-z]{0,6}".prop_map(Bson::String),
        any::<bool>().prop_map(Bson::Boolean),
        Just(Bson::Null),
    ]
}

fn value() -> impl Strategy<Value = Bson> {
    prop_oneof![
        3 => scalar(),
        1 => proptest::collection::vec(scalar(), 0..4).prop_map(Bson::Array),
    ]
}

fn document() -> impl Strategy<Value = Document> {
    proptest::collection::vec(("[a-c]", value()), 0..4).prop_map(|fields| {
        let mut d = Document::new();
        for (k, v) in fields {
            d.insert(k, v);
        }
        d
    })
}

fn filter() -> impl Strategy<Value = Document> {
    ("[a-c]", scalar(), 0..5usize).prop_map(|(field, v, op)| match op {
        0 => doc! {field: v},
        1 => doc! {field: {"$gt": v}},
        2 => doc! {field: {"$in": [v, 1]}},
        3 => doc! {field: {"$exists": true}},
        _ => doc! {"$or": [{field.clone(): {"$ne": v}}, {field: {"$size": 2}}]},
    })
}

fn apply(d: &Document, u: Document) -> Document {
    apply_update(d, &parse_update(&u).unwrap(), &ApplyContext::default()).unwrap()
}

proptest! {
    #[test]
    fn prop_matching_is_deterministic(d in document(), f in filter()) {
        let parsed = parse_filter(&f).unwrap();
        let before = d.clone();
        let first = eval_filter(&d, &parsed);
        prop_assert_eq!(first, eval_filter(&d, &parsed));
        prop_assert_eq!(before, d);
    }

    #[test]
    fn prop_add_to_set_is_idempotent(items in proptest::collection::vec(scalar(), 0..5), v in scalar()) {
        let d = doc! {"_id": 1, "s": items};
        let once = apply(&d, doc! {"$addToSet": {"s": v.clone()}});
        let twice = apply(&once, doc! {"$addToSet": {"s": v}});
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_inc_then_negated_inc_restores(start in -1_000_000i32..1_000_000, by in -1_000_000i32..1_000_000) {
        let d = doc! {"_id": 1, "n": start};
        let up = apply(&d, doc! {"$inc": {"n": by}});
        let back = apply(&up, doc! {"$inc": {"n": -by}});
        prop_assert_eq!(back, d);
    }

    #[test]
    fn prop_match_then_limit_zero_is_empty(docs in proptest::collection::vec(document(), 0..8), f in filter()) {
        let pipeline = parse_pipeline(&[doc! {"$match": f}, doc! {"$limit": 0}]).unwrap();
        prop_assert!(run_pipeline(docs, &pipeline, PipelineOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn prop_unwind_group_push_keeps_every_element(items in proptest::collection::vec(scalar(), 1..10)) {
        let n = items.len();
        let pipeline = parse_pipeline(&[
            doc! {"$unwind": "$xs"},
            doc! {"$group": {"_id": null, "all": {"$push": "$xs"}}},
        ])
        .unwrap();
        let out = run_pipeline(vec![doc! {"_id": 1, "xs": items}], &pipeline, PipelineOptions::default()).unwrap();
        prop_assert_eq!(out.len(), 1);
        prop_assert_eq!(out[0].get_array("all").unwrap().len(), n);
    }

    #[test]
    fn prop_position_follows_the_matching_or_branch(
        items in proptest::collection::vec(0..5i32, 1..8),
        lose in any::<proptest::sample::Index>(),
        win in any::<proptest::sample::Index>(),
    ) {
        let decoy = items[lose.index(items.len())];
        let target = items[win.index(items.len())];
        let d = doc! {"b": 0, "a": items.clone()};
        let f = parse_filter(&doc! {"$or": [{"a": decoy, "b": 5}, {"a": target}]}).unwrap();
        let first = items.iter().position(|x| *x == target);
        prop_assert_eq!(eval_with_position(&d, &f), (true, first));
    }

    #[test]
    fn prop_add_to_set_keeps_distinct_binaries(
        blobs in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..3), 0..4),
        extra in proptest::collection::vec(any::<u8>(), 0..3),
    ) {
        let bin = |bytes: Vec<u8>| Bson::Binary(Binary { subtype: BinarySubtype::Generic, bytes });
        let present = blobs.contains(&extra);
        let before = blobs.len();
        let d = doc! {"_id": 1, "s": blobs.into_iter().map(bin).collect::<Vec<_>>()};
        let out = apply(&d, doc! {"$addToSet": {"s": bin(extra.clone())}});
        let s = out.get_array("s").unwrap();
        prop_assert_eq!(s.len(), if present { before } else { before + 1 });
        prop_assert!(s.contains(&bin(extra)));
    }

    #[test]
    fn prop_date_add_is_checked(ms in any::<i64>(), by in prop_oneof![
        any::<i64>().prop_map(Bson::Int64),
        any::<f64>().prop_map(Bson::Double),
    ]) {
        let d = doc! {"d": DateTime::from_millis(ms), "n": by.clone()};
        let e = parse_expr(&Bson::Document(doc! {"$add": ["$d", "$n"]})).unwrap();
        match eval_expr(&e, &d) {
            Ok(Bson::DateTime(t)) => {
                if let Bson::Int64(n) = by {
                    prop_assert_eq!(Some(t.timestamp_millis()), ms.checked_add(n));
                }
            }
            Err(DbError::InvalidExpression(_)) => {
                if let Bson::Int64(n) = by {
                    prop_assert!(ms.checked_add(n).is_none());
                }
            }
            other => prop_assert!(false, "unexpected result {:?}", other),
        }
    }
}
