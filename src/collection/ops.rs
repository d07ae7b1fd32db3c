use bson::{Bson, Document};

use super::core::{Collection, Store};
use crate::aggregate::{parse_pipeline, run_pipeline};
use crate::document::{ID_FIELD, ensure_id};
use crate::errors::DbError;
use crate::query::geo::distance_in;
use crate::query::order::compare_docs;
use crate::query::{
    DeleteReport, FindOptions, Projection, ProjectionContext, UpdateReport, describe, eval_filter,
    eval_with_position, near_clause, parse_filter, parse_sort,
};
use crate::telemetry::{self, OpKind, OpTimer};
use crate::update::{ApplyContext, ArrayFilters, UpdateOptions, apply_update, build_upsert, parse_update};
use crate::utils::num::usize_to_u64;

fn projection_error(e: DbError) -> DbError {
    match e {
        DbError::InvalidPipeline(msg) => DbError::InvalidFilter(format!("projection: {msg}")),
        other => other,
    }
}

impl Collection {
    fn insert_locked(&self, store: &mut Store, mut doc: Document) -> Result<Bson, DbError> {
        let id = ensure_id(&mut doc, self.options.id_strategy);
        if !store.ids.insert(Store::id_key(&doc)) {
            return Err(DbError::DuplicateKey(format!("collection {} already holds _id {}", self.name(), describe(&id))));
        }
        store.docs.push(doc);
        Ok(id)
    }

    /// Inserts one document, generating `_id` when absent, and returns its `_id`.
    ///
    /// # Errors
    /// `DuplicateKey` when the `_id` is already present.
    pub fn insert_one(&self, doc: Document) -> Result<Bson, DbError> {
        let timer = OpTimer::start(OpKind::Write, "insert_one", self.name());
        let id = self.insert_locked(&mut self.store.write(), doc)?;
        telemetry::log_audit("insert", self.name(), 1);
        timer.finish(1, self.options.slow_op_ms);
        Ok(id)
    }

    /// Inserts documents in order. Stops at the first failure; documents inserted before it
    /// stay in the collection.
    ///
    /// # Errors
    /// `DuplicateKey` from the first document whose `_id` clashes.
    pub fn insert_many(&self, docs: Vec<Document>) -> Result<Vec<Bson>, DbError> {
        let timer = OpTimer::start(OpKind::Write, "insert_many", self.name());
        let mut ids = Vec::with_capacity(docs.len());
        let outcome = {
            let mut store = self.store.write();
            docs.into_iter().try_for_each(|d| {
                ids.push(self.insert_locked(&mut store, d)?);
                Ok::<(), DbError>(())
            })
        };
        if !ids.is_empty() {
            telemetry::log_audit("insert", self.name(), usize_to_u64(ids.len()));
        }
        if let Err(e) = outcome {
            log::warn!("insert_many on {} stopped after {} documents: {e}", self.name(), ids.len());
            return Err(e);
        }
        timer.finish(usize_to_u64(ids.len()), self.options.slow_op_ms);
        Ok(ids)
    }

    /// Returns matching documents: sorted (or by `$near` distance when no sort is given),
    /// then skipped, limited and projected. A limit of 0 means no limit.
    ///
    /// # Errors
    /// `InvalidFilter` for malformed filters, sorts or projections; expression failures from
    /// computed projection fields.
    pub fn find(&self, filter: &Document, opts: &FindOptions) -> Result<Vec<Document>, DbError> {
        let timer = OpTimer::start(OpKind::Read, "find", self.name());
        let parsed = parse_filter(filter)?;
        let sort = opts.sort.as_ref().map(parse_sort).transpose()?;
        let projection = opts
            .projection
            .as_ref()
            .map(|p| Projection::parse(p, ProjectionContext::Find))
            .transpose()
            .map_err(projection_error)?;
        let limit = match (opts.limit.filter(|l| *l > 0), self.options.max_find_limit) {
            (Some(l), Some(cap)) => l.min(cap),
            (Some(l), None) => l,
            (None, Some(cap)) => cap,
            (None, None) => usize::MAX,
        };

        let store = self.store.read();
        let near = near_clause(&parsed);
        let mut hits: Vec<(f64, &Document)> = store
            .docs
            .iter()
            .filter(|d| eval_filter(d, &parsed))
            .map(|d| (near.and_then(|(field, q)| distance_in(d, field, q)).unwrap_or(f64::INFINITY), d))
            .collect();
        if let Some(keys) = &sort {
            hits.sort_by(|a, b| compare_docs(a.1, b.1, keys));
        } else if near.is_some() {
            hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        }
        let out = hits
            .into_iter()
            .skip(opts.skip.unwrap_or(0))
            .take(limit)
            .map(|(_, d)| match &projection {
                Some(p) => p.apply(d),
                None => Ok(d.clone()),
            })
            .collect::<Result<Vec<_>, _>>()?;
        drop(store);
        timer.finish(usize_to_u64(out.len()), self.options.slow_op_ms);
        Ok(out)
    }

    /// # Errors
    /// As [`Collection::find`].
    pub fn find_one(&self, filter: &Document, projection: Option<&Document>) -> Result<Option<Document>, DbError> {
        let opts = FindOptions { projection: projection.cloned(), limit: Some(1), ..FindOptions::default() };
        Ok(self.find(filter, &opts)?.into_iter().next())
    }

    /// # Errors
    /// `InvalidFilter` for malformed filters.
    pub fn count_documents(&self, filter: &Document) -> Result<u64, DbError> {
        let timer = OpTimer::start(OpKind::Read, "count_documents", self.name());
        let parsed = parse_filter(filter)?;
        let n = usize_to_u64(self.store.read().docs.iter().filter(|d| eval_filter(d, &parsed)).count());
        timer.finish(n, self.options.slow_op_ms);
        Ok(n)
    }

    /// Updates the first matching document in collection order.
    ///
    /// # Errors
    /// `InvalidFilter`/`InvalidUpdate` for malformed input, `PathError` when a path runs
    /// through a scalar, `DuplicateKey` when an upsert collides.
    pub fn update_one(&self, filter: &Document, update: &Document, opts: &UpdateOptions) -> Result<UpdateReport, DbError> {
        self.update_matching("update_one", filter, update, opts, false)
    }

    /// Updates every matching document. A failure aborts the remaining documents; earlier
    /// ones keep their changes.
    ///
    /// # Errors
    /// As [`Collection::update_one`].
    pub fn update_many(&self, filter: &Document, update: &Document, opts: &UpdateOptions) -> Result<UpdateReport, DbError> {
        self.update_matching("update_many", filter, update, opts, true)
    }

    fn update_matching(
        &self,
        op: &'static str,
        filter: &Document,
        update: &Document,
        opts: &UpdateOptions,
        multi: bool,
    ) -> Result<UpdateReport, DbError> {
        let timer = OpTimer::start(OpKind::Write, op, self.name());
        let parsed_filter = parse_filter(filter)?;
        let parsed_update = parse_update(update)?;
        let array_filters = ArrayFilters::parse(&opts.array_filters)?;
        let af = (!opts.array_filters.is_empty()).then_some(&array_filters);
        let mut report = UpdateReport::default();
        {
            let mut store = self.store.write();
            for i in 0..store.docs.len() {
                let (hit, position) = eval_with_position(&store.docs[i], &parsed_filter);
                if !hit {
                    continue;
                }
                report.matched += 1;
                let ctx = ApplyContext { position, array_filters: af, inserting: false };
                let next = apply_update(&store.docs[i], &parsed_update, &ctx)?;
                if next != store.docs[i] {
                    store.docs[i] = next;
                    report.modified += 1;
                }
                if !multi {
                    break;
                }
            }
            if report.matched == 0 && opts.upsert {
                let doc = build_upsert(filter, &parsed_update, af)?;
                report.upserted_id = Some(self.insert_locked(&mut store, doc)?);
            }
        }
        let affected = report.modified + u64::from(report.upserted_id.is_some());
        telemetry::log_audit("update", self.name(), affected);
        log::debug!("{op} on {}: matched={} modified={}", self.name(), report.matched, report.modified);
        timer.finish(affected, self.options.slow_op_ms);
        Ok(report)
    }

    /// Replaces the first matching document wholesale, keeping its `_id`.
    ///
    /// # Errors
    /// `InvalidUpdate` when the replacement holds `$` operators or a different `_id`;
    /// `InvalidFilter` for malformed filters.
    pub fn replace_one(&self, filter: &Document, replacement: Document, upsert: bool) -> Result<UpdateReport, DbError> {
        let timer = OpTimer::start(OpKind::Write, "replace_one", self.name());
        if let Some(k) = replacement.keys().find(|k| k.starts_with('$')) {
            return Err(DbError::InvalidUpdate(format!("replacement document must not contain operators, found '{k}'")));
        }
        let parsed = parse_filter(filter)?;
        let mut report = UpdateReport::default();
        {
            let mut store = self.store.write();
            if let Some(i) = store.docs.iter().position(|d| eval_filter(d, &parsed)) {
                report.matched = 1;
                let current = &store.docs[i];
                let mut next = Document::new();
                if let Some(id) = current.get(ID_FIELD) {
                    if replacement.get(ID_FIELD).is_some_and(|r| r != id) {
                        return Err(DbError::InvalidUpdate(
                            "the _id field cannot be changed by a replacement".into(),
                        ));
                    }
                    next.insert(ID_FIELD, id.clone());
                }
                for (k, v) in replacement {
                    if k != ID_FIELD {
                        next.insert(k, v);
                    }
                }
                if next != store.docs[i] {
                    store.docs[i] = next;
                    report.modified = 1;
                }
            } else if upsert {
                let mut doc = Document::new();
                if !replacement.contains_key(ID_FIELD)
                    && let Some(id) = filter.get(ID_FIELD).filter(|v| !matches!(v, Bson::Document(_)))
                {
                    doc.insert(ID_FIELD, id.clone());
                }
                for (k, v) in replacement {
                    doc.insert(k, v);
                }
                report.upserted_id = Some(self.insert_locked(&mut store, doc)?);
            }
        }
        let affected = report.modified + u64::from(report.upserted_id.is_some());
        telemetry::log_audit("replace", self.name(), affected);
        timer.finish(affected, self.options.slow_op_ms);
        Ok(report)
    }

    /// # Errors
    /// `InvalidFilter` for malformed filters.
    pub fn delete_one(&self, filter: &Document) -> Result<DeleteReport, DbError> {
        self.delete_matching("delete_one", filter, false)
    }

    /// # Errors
    /// `InvalidFilter` for malformed filters.
    pub fn delete_many(&self, filter: &Document) -> Result<DeleteReport, DbError> {
        self.delete_matching("delete_many", filter, true)
    }

    fn delete_matching(&self, op: &'static str, filter: &Document, multi: bool) -> Result<DeleteReport, DbError> {
        let timer = OpTimer::start(OpKind::Write, op, self.name());
        let parsed = parse_filter(filter)?;
        let deleted = {
            let mut store = self.store.write();
            if multi {
                let (gone, kept): (Vec<_>, Vec<_>) =
                    std::mem::take(&mut store.docs).into_iter().partition(|d| eval_filter(d, &parsed));
                store.docs = kept;
                for d in &gone {
                    store.ids.remove(&Store::id_key(d));
                }
                gone.len()
            } else if let Some(i) = store.docs.iter().position(|d| eval_filter(d, &parsed)) {
                store.remove_at(i);
                1
            } else {
                0
            }
        };
        let report = DeleteReport { deleted: usize_to_u64(deleted) };
        telemetry::log_audit("delete", self.name(), report.deleted);
        timer.finish(report.deleted, self.options.slow_op_ms);
        Ok(report)
    }

    /// Runs a pipeline over a snapshot of the collection; the store lock is released before
    /// the first stage runs.
    ///
    /// # Errors
    /// `InvalidPipeline`/`InvalidFilter` for malformed stages, `BucketRangeError` and
    /// expression failures while running.
    pub fn aggregate(&self, stages: &[Document]) -> Result<Vec<Document>, DbError> {
        let timer = OpTimer::start(OpKind::Aggregate, "aggregate", self.name());
        let pipeline = parse_pipeline(stages)?;
        let snapshot = self.store.read().docs.clone();
        let out = run_pipeline(snapshot, &pipeline, self.options.pipeline())?;
        timer.finish(usize_to_u64(out.len()), self.options.slow_op_ms);
        Ok(out)
    }
}
