mod core;
mod index_admin;
mod ops;

pub use self::core::Collection;
pub use index_admin::{ID_INDEX_NAME, IndexKind, IndexSpec};
