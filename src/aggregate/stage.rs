use bson::{Bson, Document};

use super::accumulator::Accumulator;
use crate::document::ID_FIELD;
use crate::errors::DbError;
use crate::expr::{Expr, parse_expr};
use crate::query::order::compare_values;
use crate::query::{Filter, Projection, ProjectionContext, SortSpec, parse_filter, parse_sort};
use crate::utils::num::{as_i64, i64_to_usize, is_number};

const MAX_PIPELINE_STAGES: usize = 128;

#[derive(Debug, Clone)]
pub struct UnwindSpec {
    pub path: String,
    pub include_array_index: Option<String>,
    /// Stage-level override; `None` defers to [`PipelineOptions`].
    pub preserve_null_and_empty: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct BucketSpec {
    pub group_by: Expr,
    pub boundaries: Vec<Bson>,
    pub default: Option<Bson>,
    pub output: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone)]
pub enum Stage {
    Match(Filter),
    Project(Projection),
    AddFields(Vec<(String, Expr)>),
    Group { id: Expr, accumulators: Vec<(String, Accumulator)> },
    Unwind(UnwindSpec),
    Sort(Vec<SortSpec>),
    Skip(usize),
    Limit(usize),
    Bucket(BucketSpec),
    Count(String),
}

impl Stage {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Match(_) => "$match",
            Self::Project(_) => "$project",
            Self::AddFields(_) => "$addFields",
            Self::Group { .. } => "$group",
            Self::Unwind(_) => "$unwind",
            Self::Sort(_) => "$sort",
            Self::Skip(_) => "$skip",
            Self::Limit(_) => "$limit",
            Self::Bucket(_) => "$bucket",
            Self::Count(_) => "$count",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
}

/// Engine-wide pipeline behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Keep documents whose unwound field is missing, null or an empty array.
    pub unwind_preserve_null_and_empty: bool,
}

fn invalid(msg: impl Into<String>) -> DbError {
    DbError::InvalidPipeline(msg.into())
}

/// Parses a list of stage documents, each holding exactly one `$stage` key.
///
/// # Errors
/// `InvalidPipeline` for unknown stages or malformed stage arguments; `InvalidFilter` for a
/// malformed `$match` filter.
pub fn parse_pipeline(stages: &[Document]) -> Result<Pipeline, DbError> {
    if stages.len() > MAX_PIPELINE_STAGES {
        return Err(invalid("too many pipeline stages"));
    }
    let stages = stages.iter().map(parse_stage).collect::<Result<Vec<_>, _>>()?;
    Ok(Pipeline { stages })
}

/// # Errors
/// `Json` for malformed JSON, `Io` when the top level is not an array, otherwise as
/// [`parse_pipeline`].
pub fn parse_pipeline_json(json: &str) -> Result<Pipeline, DbError> {
    let docs = crate::utils::json::parse_json_documents(json)?;
    parse_pipeline(&docs)
}

fn parse_stage(doc: &Document) -> Result<Stage, DbError> {
    if doc.len() != 1 {
        return Err(invalid(format!("a pipeline stage must have exactly one field, found {}", doc.len())));
    }
    let Some((name, arg)) = doc.iter().next() else {
        return Err(invalid("empty pipeline stage"));
    };
    Ok(match name.as_str() {
        "$match" => Stage::Match(parse_filter(object(name, arg)?)?),
        "$project" => {
            let spec = object(name, arg)?;
            if spec.is_empty() {
                return Err(invalid("$project requires at least one field"));
            }
            Stage::Project(Projection::parse(spec, ProjectionContext::Pipeline)?)
        }
        "$addFields" | "$set" => {
            let spec = object(name, arg)?;
            if spec.is_empty() {
                return Err(invalid(format!("{name} requires at least one field")));
            }
            let mut fields = Vec::with_capacity(spec.len());
            for (k, v) in spec {
                if k.starts_with('$') || k.split('.').any(str::is_empty) {
                    return Err(invalid(format!("invalid field name '{k}' in {name}")));
                }
                fields.push((k.clone(), expr(v)?));
            }
            Stage::AddFields(fields)
        }
        "$group" => parse_group(object(name, arg)?)?,
        "$unwind" => Stage::Unwind(parse_unwind(arg)?),
        "$sort" => {
            let keys = parse_sort(object(name, arg)?).map_err(|e| invalid(e.to_string()))?;
            if keys.is_empty() {
                return Err(invalid("$sort requires at least one key"));
            }
            Stage::Sort(keys)
        }
        "$skip" => Stage::Skip(count_arg(name, arg)?),
        "$limit" => Stage::Limit(count_arg(name, arg)?),
        "$bucket" => Stage::Bucket(parse_bucket(object(name, arg)?)?),
        "$count" => {
            let Bson::String(field) = arg else {
                return Err(invalid("$count expects a field name string"));
            };
            if field.is_empty() || field.starts_with('$') || field.contains('.') {
                return Err(invalid(format!("invalid $count field name '{field}'")));
            }
            Stage::Count(field.clone())
        }
        other => return Err(invalid(format!("unrecognized pipeline stage name: '{other}'"))),
    })
}

fn object<'a>(stage: &str, arg: &'a Bson) -> Result<&'a Document, DbError> {
    match arg {
        Bson::Document(d) => Ok(d),
        other => Err(invalid(format!("{stage} expects an object, found {other}"))),
    }
}

fn expr(v: &Bson) -> Result<Expr, DbError> {
    parse_expr(v).map_err(|e| invalid(e.to_string()))
}

fn count_arg(stage: &str, arg: &Bson) -> Result<usize, DbError> {
    as_i64(arg)
        .and_then(i64_to_usize)
        .ok_or_else(|| invalid(format!("{stage} expects a non-negative integer, found {arg}")))
}

fn accumulators<'a>(
    fields: impl Iterator<Item = (&'a String, &'a Bson)>,
) -> Result<Vec<(String, Accumulator)>, DbError> {
    let mut out = Vec::new();
    for (name, spec) in fields {
        if name.contains('.') || name.starts_with('$') {
            return Err(invalid(format!("invalid output field name '{name}'")));
        }
        out.push((name.clone(), Accumulator::parse(name, spec)?));
    }
    Ok(out)
}

fn parse_group(spec: &Document) -> Result<Stage, DbError> {
    let id = spec.get(ID_FIELD).ok_or_else(|| invalid("$group requires an _id field"))?;
    let id = expr(id)?;
    let accumulators = accumulators(spec.iter().filter(|(k, _)| k.as_str() != ID_FIELD))?;
    Ok(Stage::Group { id, accumulators })
}

fn field_path(v: &Bson, what: &str) -> Result<String, DbError> {
    match v {
        Bson::String(s) if s.len() > 1 && s.starts_with('$') && !s.starts_with("$$") => Ok(s[1..].to_string()),
        other => Err(invalid(format!("{what} must be a '$'-prefixed field path, found {other}"))),
    }
}

fn parse_unwind(arg: &Bson) -> Result<UnwindSpec, DbError> {
    let Bson::Document(d) = arg else {
        return Ok(UnwindSpec { path: field_path(arg, "$unwind")?, include_array_index: None, preserve_null_and_empty: None });
    };
    let mut spec = UnwindSpec { path: String::new(), include_array_index: None, preserve_null_and_empty: None };
    for (k, v) in d {
        match (k.as_str(), v) {
            ("path", v) => spec.path = field_path(v, "$unwind path")?,
            ("includeArrayIndex", Bson::String(s)) if !s.is_empty() && !s.starts_with('$') => {
                spec.include_array_index = Some(s.clone());
            }
            ("preserveNullAndEmptyArrays", Bson::Boolean(b)) => spec.preserve_null_and_empty = Some(*b),
            (other, v) => return Err(invalid(format!("invalid $unwind option {other}: {v}"))),
        }
    }
    if spec.path.is_empty() {
        return Err(invalid("$unwind requires a path"));
    }
    Ok(spec)
}

fn parse_bucket(spec: &Document) -> Result<BucketSpec, DbError> {
    let mut group_by = None;
    let mut boundaries = None;
    let mut default = None;
    let mut output = None;
    for (k, v) in spec {
        match k.as_str() {
            "groupBy" => group_by = Some(expr(v)?),
            "boundaries" => {
                let Bson::Array(items) = v else {
                    return Err(invalid("$bucket boundaries must be an array"));
                };
                boundaries = Some(items.clone());
            }
            "default" => default = Some(v.clone()),
            "output" => output = Some(accumulators(object("$bucket output", v)?.iter())?),
            other => return Err(invalid(format!("unrecognized option to $bucket: {other}"))),
        }
    }
    let group_by = group_by.ok_or_else(|| invalid("$bucket requires groupBy"))?;
    let boundaries = boundaries.ok_or_else(|| invalid("$bucket requires boundaries"))?;
    if boundaries.len() < 2 {
        return Err(invalid("$bucket requires at least two boundaries"));
    }
    if !boundaries.iter().all(is_number) {
        return Err(invalid("$bucket boundaries must be numeric"));
    }
    if boundaries.windows(2).any(|w| compare_values(&w[0], &w[1]).is_ge()) {
        return Err(invalid("$bucket boundaries must be sorted in strictly ascending order"));
    }
    if let (Some(d), Some(lo), Some(hi)) = (&default, boundaries.first(), boundaries.last())
        && is_number(d)
        && compare_values(d, lo).is_ge()
        && compare_values(d, hi).is_lt()
    {
        return Err(invalid("$bucket default must lie outside the boundaries range"));
    }
    let output = output.unwrap_or_else(|| {
        vec![(
            "count".to_string(),
            Accumulator { op: super::accumulator::AccumulatorOp::Sum, expr: Expr::Literal(Bson::Int32(1)) },
        )]
    });
    Ok(BucketSpec { group_by, boundaries, default, output })
}
