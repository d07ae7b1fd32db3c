use std::sync::Arc;
use std::thread;

use bson::{Bson, doc};
use docql::collection::{ID_INDEX_NAME, IndexKind};
use docql::config::EngineOptions;
use docql::document::IdStrategy;
use docql::engine::Engine;
use docql::{DbError, FindOptions, UpdateOptions};

#[test]
fn concurrent_inserts_are_all_kept() {
    let engine = Arc::new(Engine::default());
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let coll = engine.collection("events");
            thread::spawn(move || {
                for i in 0..100 {
                    coll.insert_one(doc! {"thread": t, "i": i}).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    let coll = engine.collection("events");
    assert_eq!(coll.len(), 400);
    assert_eq!(coll.count_documents(&doc! {"thread": 2}).unwrap(), 100);
}

#[test]
fn readers_see_whole_updates() {
    let engine = Arc::new(Engine::default());
    let coll = engine.collection("counters");
    coll.insert_many((0..50).map(|i| doc! {"_id": i, "n": 0}).collect()).unwrap();
    let writer = {
        let coll = Arc::clone(&coll);
        thread::spawn(move || {
            for _ in 0..20 {
                coll.update_many(&doc! {}, &doc! {"$inc": {"n": 1}}, &UpdateOptions::default()).unwrap();
            }
        })
    };
    for _ in 0..20 {
        let docs = coll.find(&doc! {}, &FindOptions::default()).unwrap();
        let first = docs[0].get_i32("n").unwrap();
        assert!(docs.iter().all(|d| d.get_i32("n").unwrap() == first));
    }
    writer.join().unwrap();
    assert_eq!(coll.count_documents(&doc! {"n": 20}).unwrap(), 50);
}

#[test]
fn uuid_id_strategy() {
    let engine = Engine::new(EngineOptions { id_strategy: IdStrategy::Uuid, ..EngineOptions::default() });
    let id = engine.collection("c").insert_one(doc! {"a": 1}).unwrap();
    let Bson::String(s) = id else { panic!("expected a string id, got {id:?}") };
    assert_eq!(s.len(), 36);
}

#[test]
fn index_metadata_lifecycle() {
    let coll = Engine::default().collection("persons");
    assert_eq!(coll.create_index(&doc! {"age": 1}).unwrap(), "age_1");
    assert_eq!(coll.create_index(&doc! {"age": 1}).unwrap(), "age_1");
    assert_eq!(coll.create_index(&doc! {"age": -1, "gender": 1}).unwrap(), "age_-1_gender_1");
    assert_eq!(coll.create_index(&doc! {"location": "2dsphere"}).unwrap(), "location_2dsphere");
    let names: Vec<_> = coll.list_indexes().into_iter().map(|i| i.name).collect();
    assert_eq!(names, [ID_INDEX_NAME, "age_1", "age_-1_gender_1", "location_2dsphere"]);
    assert_eq!(coll.list_indexes()[3].keys, vec![("location".to_string(), IndexKind::Geo2dSphere)]);

    coll.drop_index("age_1").unwrap();
    assert!(matches!(coll.drop_index("age_1"), Err(DbError::InvalidIndex(_))));
    assert!(matches!(coll.drop_index(ID_INDEX_NAME), Err(DbError::InvalidIndex(_))));
    assert!(matches!(coll.create_index(&doc! {}), Err(DbError::InvalidIndex(_))));
    assert!(matches!(coll.create_index(&doc! {"a": "text"}), Err(DbError::InvalidIndex(_))));
}

#[test]
fn indexes_do_not_change_results() {
    let coll = Engine::default().collection("persons");
    coll.insert_many((0..10).map(|i| doc! {"age": i}).collect()).unwrap();
    let filter = doc! {"age": {"$gte": 5}};
    let before = coll.find(&filter, &FindOptions::default()).unwrap();
    coll.create_index(&doc! {"age": 1}).unwrap();
    assert_eq!(coll.find(&filter, &FindOptions::default()).unwrap(), before);
}

#[test]
fn find_projection_slice() {
    let coll = Engine::default().collection("persons");
    coll.insert_one(doc! {"_id": 1, "hobbies": ["a", "b", "c", "d"], "name": "x"}).unwrap();
    let opts = FindOptions { projection: Some(doc! {"hobbies": {"$slice": [1, 2]}}), ..FindOptions::default() };
    assert_eq!(coll.find(&doc! {}, &opts).unwrap(), vec![doc! {"_id": 1, "hobbies": ["b", "c"], "name": "x"}]);
    let opts = FindOptions { projection: Some(doc! {"_id": 0, "hobbies": {"$slice": -1}}), ..FindOptions::default() };
    assert_eq!(coll.find(&doc! {}, &opts).unwrap(), vec![doc! {"hobbies": ["d"], "name": "x"}]);
}

#[test]
fn update_many_with_array_filters() {
    let coll = Engine::default().collection("students");
    coll.insert_many(vec![
        doc! {"_id": 1, "grades": [{"v": 95}, {"v": 70}]},
        doc! {"_id": 2, "grades": [{"v": 60}]},
    ])
    .unwrap();
    let opts = UpdateOptions { array_filters: vec![doc! {"el.v": {"$gt": 90}}], ..UpdateOptions::default() };
    let r = coll.update_many(&doc! {}, &doc! {"$set": {"grades.$[el].honors": true}}, &opts).unwrap();
    assert_eq!((r.matched, r.modified), (2, 1));
    assert_eq!(coll.count_documents(&doc! {"grades.honors": true}).unwrap(), 1);
}

#[test]
fn replace_one_upsert_takes_filter_id() {
    let coll = Engine::default().collection("c");
    let r = coll.replace_one(&doc! {"_id": 9}, doc! {"name": "new"}, true).unwrap();
    assert_eq!(r.upserted_id, Some(Bson::Int32(9)));
    assert_eq!(coll.find_one(&doc! {"_id": 9}, None).unwrap(), Some(doc! {"_id": 9, "name": "new"}));
}
