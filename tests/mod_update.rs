use bson::spec::BinarySubtype;
use bson::{Binary, Bson, Document, Regex, doc};
use docql::DbError;
use docql::query::{eval_with_position, parse_filter};
use docql::update::{ApplyContext, ArrayFilters, UpdateKind, apply_update, build_upsert, parse_update, parse_update_json};

fn apply(d: &Document, u: Document) -> Result<Document, DbError> {
    apply_update(d, &parse_update(&u)?, &ApplyContext::default())
}

#[test]
fn set_unset_and_nested_creation() {
    let d = doc! {"_id": 1, "name": "Manuel", "age": 30};
    let out = apply(&d, doc! {"$set": {"address.city": "Munich"}, "$unset": {"age": ""}}).unwrap();
    assert_eq!(out, doc! {"_id": 1, "name": "Manuel", "address": {"city": "Munich"}});
}

#[test]
fn arithmetic_and_bounds() {
    let d = doc! {"_id": 1, "age": 30, "score": 2.5};
    let out = apply(&d, doc! {"$inc": {"age": 2, "visits": 1}, "$mul": {"score": 2}}).unwrap();
    assert_eq!(out.get_i32("age").unwrap(), 32);
    assert_eq!(out.get_i32("visits").unwrap(), 1);
    assert_eq!(out.get_f64("score").unwrap(), 5.0);
    let out = apply(&d, doc! {"$min": {"age": 35}, "$max": {"score": 9}}).unwrap();
    assert_eq!(out.get_i32("age").unwrap(), 30);
    assert_eq!(out.get("score"), Some(&Bson::Int32(9)));
}

#[test]
fn inc_on_string_is_rejected() {
    let d = doc! {"_id": 1, "age": "thirty"};
    assert!(matches!(apply(&d, doc! {"$inc": {"age": 1}}), Err(DbError::InvalidUpdate(_))));
}

#[test]
fn rename_moves_value() {
    let d = doc! {"_id": 1, "age": 30};
    assert_eq!(apply(&d, doc! {"$rename": {"age": "totalAge"}}).unwrap(), doc! {"_id": 1, "totalAge": 30});
}

#[test]
fn push_with_modifiers() {
    let d = doc! {"_id": 1, "hobbies": [{"title": "Sports", "frequency": 2}]};
    let out = apply(
        &d,
        doc! {"$push": {"hobbies": {
            "$each": [{"title": "Wine", "frequency": 1}, {"title": "Hiking", "frequency": 5}],
            "$sort": {"frequency": -1},
            "$slice": 2
        }}},
    )
    .unwrap();
    let titles: Vec<_> = out
        .get_array("hobbies")
        .unwrap()
        .iter()
        .filter_map(|h| h.as_document().and_then(|d| d.get_str("title").ok()))
        .collect();
    assert_eq!(titles, ["Hiking", "Sports"]);
}

#[test]
fn add_to_set_skips_existing_values() {
    let d = doc! {"_id": 1, "tags": ["a", "b"]};
    let out = apply(&d, doc! {"$addToSet": {"tags": {"$each": ["b", "c", "c"]}}}).unwrap();
    assert_eq!(out.get_array("tags").unwrap(), &vec![Bson::from("a"), Bson::from("b"), Bson::from("c")]);
}

#[test]
fn pull_by_value_condition_and_document() {
    let d = doc! {"_id": 1, "scores": [3, 7, 9], "hobbies": [{"title": "Wine"}, {"title": "Golf"}]};
    let out = apply(&d, doc! {"$pull": {"scores": {"$gte": 7}, "hobbies": {"title": "Wine"}}}).unwrap();
    assert_eq!(out.get_array("scores").unwrap(), &vec![Bson::Int32(3)]);
    assert_eq!(out.get_array("hobbies").unwrap(), &vec![Bson::Document(doc! {"title": "Golf"})]);
    let out = apply(&d, doc! {"$pull": {"scores": 9}}).unwrap();
    assert_eq!(out.get_array("scores").unwrap().len(), 2);
}

#[test]
fn pop_first_and_last() {
    let d = doc! {"_id": 1, "xs": [1, 2, 3]};
    assert_eq!(apply(&d, doc! {"$pop": {"xs": 1}}).unwrap().get_array("xs").unwrap().len(), 2);
    assert_eq!(apply(&d, doc! {"$pop": {"xs": -1}}).unwrap().get_array("xs").unwrap()[0], Bson::Int32(2));
    assert_eq!(apply(&d, doc! {"$pop": {"xs": 2}}).unwrap(), doc! {"_id": 1, "xs": [1, 2]});
    assert_eq!(apply(&d, doc! {"$pop": {"xs": -5}}).unwrap(), doc! {"_id": 1, "xs": [2, 3]});
    assert!(matches!(apply(&d, doc! {"$pop": {"xs": 0}}), Err(DbError::InvalidUpdate(_))));
}

#[test]
fn all_positional_updates_every_element() {
    let d = doc! {"_id": 1, "hobbies": [{"title": "A"}, {"title": "B"}]};
    let out = apply(&d, doc! {"$set": {"hobbies.$[].seen": true}}).unwrap();
    for h in out.get_array("hobbies").unwrap() {
        assert_eq!(h.as_document().unwrap().get_bool("seen").unwrap(), true);
    }
}

#[test]
fn filtered_positional_uses_array_filters() {
    let d = doc! {"_id": 1, "grades": [{"v": 80}, {"v": 95}, {"v": 91}]};
    let update = parse_update(&doc! {"$set": {"grades.$[el].top": true}}).unwrap();
    let filters = ArrayFilters::parse(&[doc! {"el.v": {"$gt": 90}}]).unwrap();
    let ctx = ApplyContext { array_filters: Some(&filters), ..ApplyContext::default() };
    let out = apply_update(&d, &update, &ctx).unwrap();
    let tops: Vec<bool> = out
        .get_array("grades")
        .unwrap()
        .iter()
        .map(|g| g.as_document().unwrap().get_bool("top").unwrap_or(false))
        .collect();
    assert_eq!(tops, [false, true, true]);
}

#[test]
fn first_positional_follows_filter_match() {
    let d = doc! {"_id": 1, "grades": [80, 95, 91]};
    let (hit, position) = eval_with_position(&d, &parse_filter(&doc! {"grades": {"$gt": 90}}).unwrap());
    assert!(hit);
    let update = parse_update(&doc! {"$set": {"grades.$": 100}}).unwrap();
    let ctx = ApplyContext { position, ..ApplyContext::default() };
    let out = apply_update(&d, &update, &ctx).unwrap();
    assert_eq!(out.get_array("grades").unwrap(), &vec![Bson::Int32(80), Bson::Int32(100), Bson::Int32(91)]);
}

#[test]
fn first_positional_uses_the_or_branch_that_matched() {
    let d = doc! {"_id": 1, "b": 0, "a": [{"x": 1}, {"y": 2}]};
    let filter = parse_filter(&doc! {"$or": [{"a.x": 1, "b": 5}, {"a.y": 2}]}).unwrap();
    let (hit, position) = eval_with_position(&d, &filter);
    assert!(hit);
    let update = parse_update(&doc! {"$set": {"a.$.hit": true}}).unwrap();
    let ctx = ApplyContext { position, ..ApplyContext::default() };
    let out = apply_update(&d, &update, &ctx).unwrap();
    assert_eq!(out, doc! {"_id": 1, "b": 0, "a": [{"x": 1}, {"y": 2, "hit": true}]});
}

#[test]
fn add_to_set_compares_binary_and_regex_values() {
    let bin = |bytes: Vec<u8>| Bson::Binary(Binary { subtype: BinarySubtype::Generic, bytes });
    let d = doc! {"_id": 1, "blobs": [bin(vec![1])]};
    let out = apply(&d, doc! {"$addToSet": {"blobs": bin(vec![2, 3])}}).unwrap();
    assert_eq!(out.get_array("blobs").unwrap(), &vec![bin(vec![1]), bin(vec![2, 3])]);
    let out = apply(&out, doc! {"$addToSet": {"blobs": bin(vec![1])}}).unwrap();
    assert_eq!(out.get_array("blobs").unwrap().len(), 2);

    let re = |p: &str| {
        Bson::RegularExpression(Regex { pattern: p.try_into().unwrap(), options: "".try_into().unwrap() })
    };
    let d = doc! {"_id": 1, "patterns": [re("^a")]};
    let out = apply(&d, doc! {"$addToSet": {"patterns": {"$each": [re("^a"), re("^b")]}}}).unwrap();
    assert_eq!(out.get_array("patterns").unwrap(), &vec![re("^a"), re("^b")]);
    let out = apply(&out, doc! {"$pull": {"patterns": re("^a")}}).unwrap();
    assert_eq!(out.get_array("patterns").unwrap(), &vec![re("^b")]);
}

#[test]
fn positional_without_match_fails() {
    let d = doc! {"_id": 1, "grades": [1]};
    assert!(matches!(apply(&d, doc! {"$set": {"grades.$": 2}}), Err(DbError::InvalidUpdate(_))));
}

#[test]
fn set_through_scalar_is_path_error() {
    let d = doc! {"_id": 1, "name": "x"};
    assert!(matches!(apply(&d, doc! {"$set": {"name.first": "y"}}), Err(DbError::PathError(_))));
}

#[test]
fn id_cannot_change() {
    let d = doc! {"_id": 1};
    assert!(matches!(apply(&d, doc! {"$set": {"_id": 2}}), Err(DbError::InvalidUpdate(_))));
}

#[test]
fn operators_apply_in_fixed_order() {
    let parsed = parse_update(&doc! {"$unset": {"a": ""}, "$inc": {"b": 1}, "$set": {"c": 1}}).unwrap();
    let kinds: Vec<UpdateKind> = parsed.ops.iter().map(|(k, _)| *k).collect();
    assert_eq!(kinds, [UpdateKind::Set, UpdateKind::Inc, UpdateKind::Unset]);
    // $set runs before $unset whatever the declaration order
    let out = apply(&doc! {"_id": 1}, doc! {"$unset": {"x": ""}, "$set": {"x": 5}}).unwrap();
    assert_eq!(out, doc! {"_id": 1});
}

#[test]
fn upsert_document_from_filter_and_update() {
    let update = parse_update(&doc! {"$set": {"age": 29}, "$setOnInsert": {"created": true}}).unwrap();
    let out = build_upsert(&doc! {"name": "Maria", "age": {"$gt": 10}}, &update, None).unwrap();
    assert_eq!(out, doc! {"name": "Maria", "age": 29, "created": true});
    let positional = parse_update(&doc! {"$set": {"xs.$": 1}}).unwrap();
    assert!(build_upsert(&doc! {"name": "Maria"}, &positional, None).is_err());
    let empty = parse_update(&doc! {"$unset": {"x": ""}}).unwrap();
    assert!(matches!(build_upsert(&doc! {}, &empty, None), Err(DbError::InvalidUpdate(_))));
}

#[test]
fn malformed_updates() {
    assert!(parse_update(&doc! {}).is_err());
    assert!(parse_update(&doc! {"name": "plain"}).is_err());
    assert!(parse_update(&doc! {"$bump": {"a": 1}}).is_err());
    assert!(parse_update(&doc! {"$inc": {"a": "one"}}).is_err());
    assert!(parse_update_json(r#"{"$set": {"a": 1}}"#).is_ok());
}
