mod synthetic_data;

use docql::bson::doc;
use docql::{Database, FindOptions, UpdateOptions};
use std::time::Instant;

fn timed<T>(label: &str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let out = f();
    println!("{label:<28} {:>8.2} ms", start.elapsed().as_secs_f64() * 1000.0);
    out
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let count: usize = std::env::args().nth(1).and_then(|s| s.parse().ok()).unwrap_or(50_000);
    let db = Database::new();
    let people = timed("generate", || synthetic_data::persons(count));
    timed("insert_many", || db.insert_many("persons", people))?;

    let hits = timed("find age > 50 sorted", || {
        let opts = FindOptions { sort: Some(doc! {"age": -1, "name": 1}), limit: Some(100), ..FindOptions::default() };
        db.find("persons", &doc! {"age": {"$gt": 50}, "hobbies": "Cooking"}, &opts)
    })?;
    println!("  -> {} documents", hits.len());

    let report = timed("update_many $inc", || {
        db.update_many("persons", &doc! {"gender": "male"}, &doc! {"$inc": {"age": 1}}, &UpdateOptions::default())
    })?;
    println!("  -> matched {} modified {}", report.matched, report.modified);

    let groups = timed("aggregate unwind+group", || {
        db.aggregate(
            "persons",
            &[
                doc! {"$unwind": "$hobbies"},
                doc! {"$group": {"_id": "$hobbies", "n": {"$sum": 1}, "avgAge": {"$avg": "$age"}}},
                doc! {"$sort": {"n": -1}},
            ],
        )
    })?;
    println!("  -> {} groups", groups.len());

    let buckets = timed("aggregate bucket", || {
        db.aggregate(
            "persons",
            &[doc! {"$bucket": {"groupBy": "$age", "boundaries": [18, 30, 50, 70, 90], "default": "other"}}],
        )
    })?;
    println!("  -> {} buckets", buckets.len());
    Ok(())
}
