mod apply;
mod parse;
mod types;

pub use apply::{ApplyContext, ArrayFilters, apply_update, build_upsert};
pub use parse::{parse_update, parse_update_json};
pub use types::{
    FieldUpdate, PopEnd, PullCond, PushSort, PushSpec, UpdateAction, UpdateDoc, UpdateKind,
    UpdateOptions,
};
