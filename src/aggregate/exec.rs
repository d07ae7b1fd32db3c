use bson::{Bson, Document};
use std::collections::HashMap;

use super::accumulator::{AccState, Accumulator};
use super::group_key::{GroupKey, key_from_bson};
use super::stage::{BucketSpec, Pipeline, PipelineOptions, Stage, UnwindSpec};
use crate::document::{ID_FIELD, path};
use crate::errors::DbError;
use crate::expr::{Expr, Vars, evaluate};
use crate::query::{describe, eval_filter};
use crate::query::order::{compare_docs, compare_values};
use crate::utils::num::usize_to_i64;

/// Runs every stage in order over `docs`.
///
/// # Errors
/// Expression failures inside `$project`, `$addFields`, `$group` or `$bucket`, and
/// `BucketRangeError` when a `$bucket` value falls outside the boundaries with no default.
pub fn run_pipeline(
    mut docs: Vec<Document>,
    pipeline: &Pipeline,
    opts: PipelineOptions,
) -> Result<Vec<Document>, DbError> {
    for stage in &pipeline.stages {
        let before = docs.len();
        docs = run_stage(docs, stage, opts)?;
        log::trace!("{}: {} -> {} documents", stage.name(), before, docs.len());
    }
    Ok(docs)
}

fn run_stage(docs: Vec<Document>, stage: &Stage, opts: PipelineOptions) -> Result<Vec<Document>, DbError> {
    match stage {
        Stage::Match(filter) => Ok(docs.into_iter().filter(|d| eval_filter(d, filter)).collect()),
        Stage::Project(projection) => docs.iter().map(|d| projection.apply(d)).collect(),
        Stage::AddFields(fields) => docs.into_iter().map(|d| add_fields(d, fields)).collect(),
        Stage::Group { id, accumulators } => group(&docs, id, accumulators),
        Stage::Unwind(spec) => Ok(unwind(docs, spec, opts)),
        Stage::Sort(keys) => {
            let mut docs = docs;
            docs.sort_by(|a, b| compare_docs(a, b, keys));
            Ok(docs)
        }
        Stage::Skip(n) => Ok(docs.into_iter().skip(*n).collect()),
        Stage::Limit(n) => Ok(docs.into_iter().take(*n).collect()),
        Stage::Bucket(spec) => bucket(&docs, spec),
        Stage::Count(field) => Ok(if docs.is_empty() {
            Vec::new()
        } else {
            let n = usize_to_i64(docs.len());
            let mut out = Document::new();
            out.insert(field.clone(), i32::try_from(n).map_or(Bson::Int64(n), Bson::Int32));
            vec![out]
        }),
    }
}

fn add_fields(mut doc: Document, fields: &[(String, Expr)]) -> Result<Document, DbError> {
    let source = doc.clone();
    for (name, expr) in fields {
        match evaluate(expr, &mut Vars::new(&source))? {
            Some(v) => {
                path::set(&mut doc, name, v)?;
            }
            None => {
                path::remove(&mut doc, name);
            }
        }
    }
    Ok(doc)
}

fn group(docs: &[Document], id: &Expr, accumulators: &[(String, Accumulator)]) -> Result<Vec<Document>, DbError> {
    let mut slots: HashMap<GroupKey, usize> = HashMap::new();
    let mut groups: Vec<(Bson, Vec<AccState>)> = Vec::new();
    for doc in docs {
        let key_value = evaluate(id, &mut Vars::new(doc))?;
        let key = key_from_bson(key_value.as_ref());
        let slot = match slots.get(&key) {
            Some(&i) => i,
            None => {
                groups.push((key_value.unwrap_or(Bson::Null), accumulators.iter().map(|(_, a)| a.start()).collect()));
                slots.insert(key, groups.len() - 1);
                groups.len() - 1
            }
        };
        let states = &mut groups[slot].1;
        for ((_, acc), state) in accumulators.iter().zip(states.iter_mut()) {
            acc.add(state, doc)?;
        }
    }
    Ok(groups.into_iter().map(|(id, states)| finish_group(id, accumulators, states)).collect())
}

fn finish_group(id: Bson, accumulators: &[(String, Accumulator)], states: Vec<AccState>) -> Document {
    let mut out = Document::new();
    out.insert(ID_FIELD, id);
    for ((name, _), state) in accumulators.iter().zip(states) {
        out.insert(name.clone(), state.finish());
    }
    out
}

fn unwind(docs: Vec<Document>, spec: &UnwindSpec, opts: PipelineOptions) -> Vec<Document> {
    let preserve = spec.preserve_null_and_empty.unwrap_or(opts.unwind_preserve_null_and_empty);
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        let (items, keep) = match path::get(&doc, &spec.path) {
            Some(Bson::Array(items)) if !items.is_empty() => (items.clone(), false),
            Some(Bson::Array(_) | Bson::Null | Bson::Undefined) | None => (Vec::new(), preserve),
            Some(_) => (Vec::new(), true),
        };
        if items.is_empty() {
            if keep {
                let mut kept = doc;
                if let Some(field) = &spec.include_array_index {
                    kept.insert(field.clone(), Bson::Null);
                }
                out.push(kept);
            }
            continue;
        }
        for (i, item) in items.into_iter().enumerate() {
            let mut copy = doc.clone();
            if path::set(&mut copy, &spec.path, item).is_err() {
                continue;
            }
            if let Some(field) = &spec.include_array_index {
                copy.insert(field.clone(), Bson::Int64(usize_to_i64(i)));
            }
            out.push(copy);
        }
    }
    out
}

fn bucket(docs: &[Document], spec: &BucketSpec) -> Result<Vec<Document>, DbError> {
    let ranges = spec.boundaries.len() - 1;
    let mut states: Vec<Option<Vec<AccState>>> = vec![None; ranges + 1];
    let fresh = || spec.output.iter().map(|(_, a)| a.start()).collect::<Vec<_>>();
    for doc in docs {
        let value = evaluate(&spec.group_by, &mut Vars::new(doc))?.unwrap_or(Bson::Null);
        let slot = match spec.boundaries.windows(2).position(|w| {
            compare_values(&value, &w[0]).is_ge() && compare_values(&value, &w[1]).is_lt()
        }) {
            Some(i) => i,
            None if spec.default.is_some() => ranges,
            None => {
                return Err(DbError::BucketRangeError(format!(
                    "$bucket value {} falls outside the boundaries and no default was given",
                    describe(&value)
                )));
            }
        };
        let states = states[slot].get_or_insert_with(fresh);
        for ((_, acc), state) in spec.output.iter().zip(states.iter_mut()) {
            acc.add(state, doc)?;
        }
    }
    let mut out = Vec::new();
    for (slot, st) in states.into_iter().enumerate() {
        let Some(st) = st else { continue };
        let id = if slot == ranges {
            spec.default.clone().unwrap_or(Bson::Null)
        } else {
            spec.boundaries[slot].clone()
        };
        out.push(finish_group(id, &spec.output, st));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::parse_pipeline;
    use bson::doc;

    fn run(docs: Vec<Document>, stages: &[Document]) -> Result<Vec<Document>, DbError> {
        run_pipeline(docs, &parse_pipeline(stages)?, PipelineOptions::default())
    }

    fn people() -> Vec<Document> {
        vec![
            doc! {"_id": 1, "name": "Max", "gender": "male", "age": 27, "hobbies": ["Sports", "Cooking"]},
            doc! {"_id": 2, "name": "Manu", "gender": "male", "age": 32, "hobbies": ["Cooking", "Cars"]},
            doc! {"_id": 3, "name": "Anna", "gender": "female", "age": 29, "hobbies": []},
            doc! {"_id": 4, "name": "Chris", "gender": "female", "age": 61},
        ]
    }

    #[test]
    fn group_keeps_first_arrival_order() {
        let out = run(people(), &[doc! {"$group": {"_id": "$gender", "total": {"$sum": 1}, "avgAge": {"$avg": "$age"}}}])
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], doc! {"_id": "male", "total": 2, "avgAge": 29.5});
        assert_eq!(out[1], doc! {"_id": "female", "total": 2, "avgAge": 45.0});
    }

    #[test]
    fn group_by_null_collapses_everything() {
        let out = run(people(), &[doc! {"$group": {"_id": null, "maxAge": {"$max": "$age"}}}]).unwrap();
        assert_eq!(out, vec![doc! {"_id": null, "maxAge": 61}]);
    }

    #[test]
    fn group_by_compound_key() {
        let out = run(
            people(),
            &[doc! {"$group": {"_id": {"g": "$gender", "old": {"$gt": ["$age", 30]}}, "names": {"$push": "$name"}}}],
        )
        .unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].get_document("_id").unwrap(), &doc! {"g": "male", "old": false});
    }

    #[test]
    fn unwind_drops_empty_and_missing_by_default() {
        let out = run(people(), &[doc! {"$unwind": "$hobbies"}]).unwrap();
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|d| matches!(d.get("hobbies"), Some(Bson::String(_)))));
    }

    #[test]
    fn unwind_preserve_from_engine_option() {
        let pipeline = parse_pipeline(&[doc! {"$unwind": "$hobbies"}]).unwrap();
        let opts = PipelineOptions { unwind_preserve_null_and_empty: true };
        let out = run_pipeline(people(), &pipeline, opts).unwrap();
        assert_eq!(out.len(), 6);
    }

    #[test]
    fn unwind_stage_flag_overrides_engine_option() {
        let pipeline =
            parse_pipeline(&[doc! {"$unwind": {"path": "$hobbies", "preserveNullAndEmptyArrays": false}}]).unwrap();
        let opts = PipelineOptions { unwind_preserve_null_and_empty: true };
        assert_eq!(run_pipeline(people(), &pipeline, opts).unwrap().len(), 4);
    }

    #[test]
    fn unwind_index_and_scalar() {
        let docs = vec![doc! {"a": [10, 20]}, doc! {"a": 5}];
        let out = run(docs, &[doc! {"$unwind": {"path": "$a", "includeArrayIndex": "i"}}]).unwrap();
        assert_eq!(
            out,
            vec![doc! {"a": 10, "i": 0_i64}, doc! {"a": 20, "i": 1_i64}, doc! {"a": 5, "i": null}]
        );
    }

    #[test]
    fn unwind_then_group_counts_hobbies() {
        let out = run(
            people(),
            &[
                doc! {"$unwind": "$hobbies"},
                doc! {"$group": {"_id": "$hobbies", "n": {"$sum": 1}}},
                doc! {"$sort": {"n": -1, "_id": 1}},
            ],
        )
        .unwrap();
        assert_eq!(out[0], doc! {"_id": "Cooking", "n": 2});
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn bucket_assigns_ranges_and_default() {
        let out = run(
            people(),
            &[doc! {"$bucket": {
                "groupBy": "$age",
                "boundaries": [18, 30, 40],
                "default": "other",
                "output": {"n": {"$sum": 1}, "names": {"$push": "$name"}}
            }}],
        )
        .unwrap();
        assert_eq!(
            out,
            vec![
                doc! {"_id": 18, "n": 2, "names": ["Max", "Anna"]},
                doc! {"_id": 30, "n": 1, "names": ["Manu"]},
                doc! {"_id": "other", "n": 1, "names": ["Chris"]},
            ]
        );
    }

    #[test]
    fn bucket_out_of_range_without_default() {
        let err = run(people(), &[doc! {"$bucket": {"groupBy": "$age", "boundaries": [18, 30]}}]).unwrap_err();
        assert!(matches!(err, DbError::BucketRangeError(_)));
    }

    #[test]
    fn bucket_omits_empty_ranges() {
        let out = run(people(), &[doc! {"$bucket": {"groupBy": "$age", "boundaries": [0, 10, 100]}}]).unwrap();
        assert_eq!(out, vec![doc! {"_id": 10, "count": 4}]);
    }

    #[test]
    fn count_stage() {
        assert_eq!(run(people(), &[doc! {"$count": "total"}]).unwrap(), vec![doc! {"total": 4}]);
        assert!(run(Vec::new(), &[doc! {"$count": "total"}]).unwrap().is_empty());
    }

    #[test]
    fn add_fields_sets_dotted_paths() {
        let out = run(vec![doc! {"a": 2}], &[doc! {"$addFields": {"b.c": {"$multiply": ["$a", 3]}, "d": "$missing"}}])
            .unwrap();
        assert_eq!(out, vec![doc! {"a": 2, "b": {"c": 6}}]);
    }

    #[test]
    fn project_computes_fields() {
        let out = run(
            people(),
            &[
                doc! {"$match": {"name": "Max"}},
                doc! {"$project": {"_id": 0, "upper": {"$toUpper": "$name"}, "age": 1}},
            ],
        )
        .unwrap();
        assert_eq!(out, vec![doc! {"upper": "MAX", "age": 27}]);
    }

    #[test]
    fn limit_zero_yields_nothing() {
        assert!(run(people(), &[doc! {"$limit": 0}]).unwrap().is_empty());
    }

    #[test]
    fn skip_and_sort() {
        let out = run(people(), &[doc! {"$sort": {"age": -1}}, doc! {"$skip": 1}, doc! {"$limit": 1}]).unwrap();
        assert_eq!(out[0].get_str("name").unwrap(), "Manu");
    }
}
