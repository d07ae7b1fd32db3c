use bson::{Bson, Document, doc};

use super::command::{Command, parse_command_json};
use crate::errors::DbError;
use crate::query::{FindOptions, UpdateReport};
use crate::update::UpdateOptions;
use crate::utils::json::document_to_json;
use crate::utils::num::usize_to_i64;
use crate::Database;

fn count_bson(n: u64) -> Bson {
    i64::try_from(n).map_or(Bson::Int64(i64::MAX), Bson::Int64)
}

fn update_result(r: &UpdateReport) -> Document {
    let mut out = doc! {"matchedCount": count_bson(r.matched), "modifiedCount": count_bson(r.modified)};
    if let Some(id) = &r.upserted_id {
        out.insert("upsertedId", id.clone());
    }
    out
}

/// Executes one command and returns the documents it produces. Writes return a single
/// acknowledgement document (`{insertedId}`, `{matchedCount, modifiedCount}`, ...).
///
/// # Errors
/// Whatever the underlying operation reports.
pub fn run(db: &Database, cmd: Command) -> Result<Vec<Document>, DbError> {
    log::debug!("running {}", cmd.op_name());
    Ok(match cmd {
        Command::InsertOne { collection, document } => {
            vec![doc! {"insertedId": db.insert_one(&collection, document)?}]
        }
        Command::InsertMany { collection, documents } => {
            vec![doc! {"insertedIds": db.insert_many(&collection, documents)?}]
        }
        Command::Find { collection, filter, projection, sort, skip, limit } => {
            db.find(&collection, &filter, &FindOptions { projection, sort, skip, limit })?
        }
        Command::Count { collection, filter } => {
            vec![doc! {"count": count_bson(db.count_documents(&collection, &filter)?)}]
        }
        Command::UpdateOne { collection, filter, update, upsert, array_filters } => {
            let opts = UpdateOptions { upsert, array_filters };
            vec![update_result(&db.update_one(&collection, &filter, &update, &opts)?)]
        }
        Command::UpdateMany { collection, filter, update, upsert, array_filters } => {
            let opts = UpdateOptions { upsert, array_filters };
            vec![update_result(&db.update_many(&collection, &filter, &update, &opts)?)]
        }
        Command::ReplaceOne { collection, filter, replacement, upsert } => {
            vec![update_result(&db.replace_one(&collection, &filter, replacement, upsert)?)]
        }
        Command::DeleteOne { collection, filter } => {
            vec![doc! {"deletedCount": count_bson(db.delete_one(&collection, &filter)?.deleted)}]
        }
        Command::DeleteMany { collection, filter } => {
            vec![doc! {"deletedCount": count_bson(db.delete_many(&collection, &filter)?.deleted)}]
        }
        Command::CreateIndex { collection, keys } => vec![doc! {"name": db.create_index(&collection, &keys)?}],
        Command::ListIndexes { collection } => {
            db.list_indexes(&collection)?.iter().map(crate::IndexSpec::to_document).collect()
        }
        Command::DropIndex { collection, name } => {
            db.drop_index(&collection, &name)?;
            vec![doc! {"dropped": name}]
        }
        Command::Aggregate { collection, pipeline } => db.aggregate(&collection, &pipeline)?,
        Command::DropCollection { collection } => vec![doc! {"dropped": db.drop_collection(&collection)}],
        Command::ListCollections => db.list_collection_names().into_iter().map(|n| doc! {"name": n}).collect(),
    })
}

/// Outcome of one script line.
#[derive(Debug)]
pub struct LineResult {
    /// 1-based line number in the script.
    pub line: usize,
    pub output: Result<Vec<Document>, DbError>,
}

/// Runs a script of one JSON command per line. Blank lines and `//` comments are skipped.
/// Execution stops after the first failing line unless `keep_going` is set.
pub fn run_script(db: &Database, script: &str, keep_going: bool) -> Vec<LineResult> {
    let mut results = Vec::new();
    for (i, raw) in script.lines().enumerate() {
        let text = raw.trim();
        if text.is_empty() || text.starts_with("//") {
            continue;
        }
        let output = parse_command_json(text).and_then(|cmd| run(db, cmd));
        let failed = output.is_err();
        if let Err(e) = &output {
            log::error!("line {}: {e}", i + 1);
        }
        results.push(LineResult { line: i + 1, output });
        if failed && !keep_going {
            break;
        }
    }
    results
}

/// Renders documents as JSON, one per line, or as a pretty-printed array.
///
/// # Errors
/// `Json` when serialization fails.
pub fn render(docs: &[Document], pretty: bool) -> Result<String, DbError> {
    if pretty {
        let arr = serde_json::Value::Array(docs.iter().map(document_to_json).collect());
        return Ok(serde_json::to_string_pretty(&arr)?);
    }
    let mut out = String::new();
    for d in docs {
        out.push_str(&serde_json::to_string(&document_to_json(d))?);
        out.push('\n');
    }
    Ok(out)
}

/// Number of documents returned by a script, for summaries.
#[must_use]
pub fn total_documents(results: &[LineResult]) -> i64 {
    usize_to_i64(results.iter().filter_map(|r| r.output.as_ref().ok()).map(Vec::len).sum())
}
