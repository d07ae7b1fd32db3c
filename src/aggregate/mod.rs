//! Aggregation pipelines: `$match`, `$project`, `$addFields`, `$group`, `$unwind`, `$sort`,
//! `$skip`, `$limit`, `$bucket` and `$count`, run in order over a snapshot of documents.

mod accumulator;
mod exec;
mod group_key;
mod stage;

pub use accumulator::{AccState, Accumulator, AccumulatorOp};
pub use exec::run_pipeline;
pub use group_key::{GroupKey, key_from_bson};
pub use stage::{BucketSpec, Pipeline, PipelineOptions, Stage, UnwindSpec, parse_pipeline, parse_pipeline_json};
