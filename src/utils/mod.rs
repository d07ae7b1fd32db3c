//! Utility modules: numeric helpers and JSON conversion.
pub mod json;
pub mod num;
