// Submodules for separation of concerns
pub mod geo;
pub mod order;
mod eval;
mod parse;
mod project;
mod types;

// Public API re-exports
pub use eval::{eval_filter, eval_value, eval_with_position};
pub use parse::{parse_filter, parse_filter_json, parse_sort};
pub(crate) use parse::parse_field;
pub(crate) use types::describe;
pub use project::{Projection, ProjectionContext};
pub use types::{
    CmpOp, DeleteReport, Filter, FindOptions, NearQuery, Order, Pattern, SortSpec, TypeTag,
    UpdateReport,
};

/// The first `$near` condition reachable through top-level conjunctions, if any.
#[must_use]
pub fn near_clause(filter: &Filter) -> Option<(&str, &NearQuery)> {
    match filter {
        Filter::Near { path, near } => Some((path.as_str(), near)),
        Filter::And(parts) => parts.iter().find_map(near_clause),
        _ => None,
    }
}
