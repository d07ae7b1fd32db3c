//! Engine configuration.
//!
//! Sources, highest first: an explicit path, `DOCQL_CONFIG`, `<config_dir>/docql/docql.toml`,
//! `./docql.toml`, built-in defaults. Environment overrides (`DOCQL_ID_STRATEGY`,
//! `DOCQL_UNWIND_PRESERVE`, `DOCQL_SLOW_OP_MS`) are applied on top of whichever file won.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::aggregate::PipelineOptions;
use crate::document::IdStrategy;
use crate::errors::DbError;

pub const CONFIG_ENV: &str = "DOCQL_CONFIG";
pub const CONFIG_FILE_NAME: &str = "docql.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogOptions {
    /// `None` means [`crate::logger::default_log_dir`].
    pub dir: Option<PathBuf>,
    pub level: String,
    pub retention: u32,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self { dir: None, level: "info".into(), retention: 7 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    pub id_strategy: IdStrategy,
    /// Default for `$unwind` stages that do not set `preserveNullAndEmptyArrays`.
    pub unwind_preserve_null_and_empty: bool,
    pub max_find_limit: Option<usize>,
    pub slow_op_ms: u64,
    pub log: LogOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            id_strategy: IdStrategy::ObjectId,
            unwind_preserve_null_and_empty: false,
            max_find_limit: None,
            slow_op_ms: 500,
            log: LogOptions::default(),
        }
    }
}

impl EngineOptions {
    #[must_use]
    pub const fn pipeline(&self) -> PipelineOptions {
        PipelineOptions { unwind_preserve_null_and_empty: self.unwind_preserve_null_and_empty }
    }

    /// # Errors
    /// `Toml` when the text is not a valid options table.
    pub fn from_toml_str(text: &str) -> Result<Self, DbError> {
        Ok(toml::from_str(text)?)
    }

    /// # Errors
    /// `Io` when the file cannot be read, `Toml` when it does not parse.
    pub fn from_file(path: &Path) -> Result<Self, DbError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Applies environment overrides read through `lookup`.
    ///
    /// # Errors
    /// `Config` for values that do not parse.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), DbError> {
        if let Some(v) = lookup("DOCQL_ID_STRATEGY") {
            self.id_strategy = match v.to_ascii_lowercase().as_str() {
                "object_id" | "objectid" => IdStrategy::ObjectId,
                "uuid" => IdStrategy::Uuid,
                other => return Err(DbError::Config(format!("DOCQL_ID_STRATEGY: unknown strategy '{other}'"))),
            };
        }
        if let Some(v) = lookup("DOCQL_UNWIND_PRESERVE") {
            self.unwind_preserve_null_and_empty = parse_bool(&v)
                .ok_or_else(|| DbError::Config(format!("DOCQL_UNWIND_PRESERVE: expected a boolean, found '{v}'")))?;
        }
        if let Some(v) = lookup("DOCQL_SLOW_OP_MS") {
            self.slow_op_ms = v
                .trim()
                .parse()
                .map_err(|_| DbError::Config(format!("DOCQL_SLOW_OP_MS: expected milliseconds, found '{v}'")))?;
        }
        Ok(())
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Candidate config files in precedence order, excluding the explicit path.
fn candidates(lookup: &impl Fn(&str) -> Option<String>) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(p) = lookup(CONFIG_ENV) {
        out.push(PathBuf::from(p));
    }
    if let Some(dir) = dirs_next::config_dir() {
        out.push(dir.join("docql").join(CONFIG_FILE_NAME));
    }
    out.push(PathBuf::from(CONFIG_FILE_NAME));
    out
}

/// Resolves the effective options from files and the process environment.
///
/// # Errors
/// `Io` when an explicit path cannot be read, `Toml` when the chosen file does not parse,
/// `Config` for malformed environment overrides.
pub fn load(explicit: Option<&Path>) -> Result<EngineOptions, DbError> {
    load_with(explicit, |k| std::env::var(k).ok())
}

/// [`load`] with an injectable environment.
///
/// # Errors
/// As [`load`].
pub fn load_with(
    explicit: Option<&Path>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<EngineOptions, DbError> {
    let mut opts = match explicit {
        Some(path) => EngineOptions::from_file(path)?,
        None => match candidates(&lookup).into_iter().find(|p| p.is_file()) {
            Some(path) => {
                log::debug!("loading configuration from {}", path.display());
                EngineOptions::from_file(&path)?
            }
            None => EngineOptions::default(),
        },
    };
    opts.apply_env_from(lookup)?;
    Ok(opts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let o = EngineOptions::default();
        assert_eq!(o.slow_op_ms, 500);
        assert!(!o.unwind_preserve_null_and_empty);
        assert_eq!(o.log.retention, 7);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let o = EngineOptions::from_toml_str("id_strategy = \"uuid\"\n[log]\nlevel = \"debug\"\n").unwrap();
        assert_eq!(o.id_strategy, IdStrategy::Uuid);
        assert_eq!(o.log.level, "debug");
        assert_eq!(o.log.retention, 7);
        assert_eq!(o.slow_op_ms, 500);
    }

    #[test]
    fn env_overrides() {
        let mut o = EngineOptions::default();
        o.apply_env_from(|k| match k {
            "DOCQL_UNWIND_PRESERVE" => Some("yes".into()),
            "DOCQL_SLOW_OP_MS" => Some("25".into()),
            _ => None,
        })
        .unwrap();
        assert!(o.unwind_preserve_null_and_empty);
        assert_eq!(o.slow_op_ms, 25);
    }

    #[test]
    fn bad_env_value_is_config_error() {
        let mut o = EngineOptions::default();
        let err = o.apply_env_from(|k| (k == "DOCQL_SLOW_OP_MS").then(|| "soon".to_string())).unwrap_err();
        assert!(matches!(err, DbError::Config(_)));
    }

    #[test]
    fn malformed_file_is_toml_error() {
        assert!(matches!(EngineOptions::from_toml_str("slow_op_ms = \"x\""), Err(DbError::Toml(_))));
    }
}
