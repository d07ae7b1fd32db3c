use bson::doc;
use docql::cli::{Command, parse_command_json, render, run, run_script, total_documents};
use docql::{Database, DbError};

const SCRIPT: &str = r#"
// seed the movie collection
{"op": "insertMany", "collection": "movies", "documents": [{"_id": 1, "name": "Alpha", "runtime": 42, "genres": ["Drama"]}, {"_id": 2, "name": "Beta", "runtime": 60, "genres": ["Drama", "Crime"]}, {"_id": 3, "name": "Gamma", "runtime": 25, "genres": ["Comedy"]}]}
{"op": "createIndex", "collection": "movies", "keys": {"runtime": 1}}
{"op": "find", "collection": "movies", "filter": {"genres": "Drama"}, "projection": {"name": 1, "_id": 0}, "sort": {"runtime": -1}}
{"op": "updateMany", "collection": "movies", "filter": {"runtime": {"$lt": 50}}, "update": {"$set": {"short": true}}}
{"op": "count", "collection": "movies", "filter": {"short": true}}
{"op": "aggregate", "collection": "movies", "pipeline": [{"$unwind": "$genres"}, {"$group": {"_id": "$genres", "n": {"$sum": 1}}}, {"$sort": {"n": -1, "_id": 1}}]}
{"op": "deleteOne", "collection": "movies", "filter": {"_id": 3}}
{"op": "listCollections"}
"#;

#[test]
fn script_end_to_end() {
    let db = Database::new();
    let results = run_script(&db, SCRIPT, false);
    assert!(results.iter().all(|r| r.output.is_ok()), "{results:?}");
    assert_eq!(results.len(), 8);
    let out = |i: usize| results[i].output.as_ref().unwrap();

    assert_eq!(out(0), &vec![doc! {"insertedIds": [1, 2, 3]}]);
    assert_eq!(out(1), &vec![doc! {"name": "runtime_1"}]);
    assert_eq!(out(2), &vec![doc! {"name": "Beta"}, doc! {"name": "Alpha"}]);
    assert_eq!(out(3), &vec![doc! {"matchedCount": 2_i64, "modifiedCount": 2_i64}]);
    assert_eq!(out(4), &vec![doc! {"count": 2_i64}]);
    assert_eq!(
        out(5),
        &vec![doc! {"_id": "Drama", "n": 2}, doc! {"_id": "Comedy", "n": 1}, doc! {"_id": "Crime", "n": 1}]
    );
    assert_eq!(out(6), &vec![doc! {"deletedCount": 1_i64}]);
    assert_eq!(out(7), &vec![doc! {"name": "movies"}]);
    assert_eq!(total_documents(&results), 11);
}

#[test]
fn each_line_is_one_command() {
    let db = Database::new();
    let results = run_script(&db, "{\"op\": \"count\",\n\"collection\": \"c\"}", true);
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| matches!(r.output, Err(DbError::Json(_)))));
}

#[test]
fn extended_json_values() {
    let cmd = parse_command_json(
        r#"{"op": "insertOne", "collection": "c", "document": {"_id": {"$oid": "5f1d7f3e9d5b8c2a4c3e1a2b"}, "at": {"$date": "2020-01-01T00:00:00Z"}}}"#,
    )
    .unwrap();
    let db = Database::new();
    let ack = run(&db, cmd).unwrap();
    let text = render(&ack, false).unwrap();
    assert_eq!(text, "{\"insertedId\":{\"$oid\":\"5f1d7f3e9d5b8c2a4c3e1a2b\"}}\n");
    let found = db.find_one("c", &doc! {}, None).unwrap().unwrap();
    assert!(matches!(found.get("at"), Some(bson::Bson::DateTime(_))));
}

#[test]
fn errors_surface_with_line_numbers() {
    let db = Database::new();
    let script = "{\"op\": \"find\", \"collection\": \"c\", \"filter\": {\"a\": {\"$in\": 1}}}\n{\"op\": \"listCollections\"}";
    let results = run_script(&db, script, false);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].line, 1);
    assert!(matches!(results[0].output, Err(DbError::InvalidFilter(_))));
}

#[test]
fn drop_commands() {
    let db = Database::new();
    db.insert_one("c", doc! {"a": 1}).unwrap();
    db.create_index("c", &doc! {"a": 1}).unwrap();
    let out = run(&db, Command::DropIndex { collection: "c".into(), name: "a_1".into() }).unwrap();
    assert_eq!(out, vec![doc! {"dropped": "a_1"}]);
    let out = run(&db, Command::DropCollection { collection: "c".into() }).unwrap();
    assert_eq!(out, vec![doc! {"dropped": true}]);
    assert!(run(&db, Command::ListIndexes { collection: "c".into() }).is_err());
}
