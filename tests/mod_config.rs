use std::fs;

use docql::config::{EngineOptions, load_with};
use docql::document::IdStrategy;
use docql::{Database, DbError};

#[test]
fn env_config_path_is_used() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("docql.toml");
    fs::write(&path, "id_strategy = \"uuid\"\nmax_find_limit = 3\n\n[log]\nretention = 2\n").unwrap();
    let shown = path.to_string_lossy().into_owned();
    let opts = load_with(None, |k| (k == "DOCQL_CONFIG").then(|| shown.clone())).unwrap();
    assert_eq!(opts.id_strategy, IdStrategy::Uuid);
    assert_eq!(opts.max_find_limit, Some(3));
    assert_eq!(opts.log.retention, 2);
    assert_eq!(opts.slow_op_ms, 500);
}

#[test]
fn explicit_path_wins_and_env_overrides_apply() {
    let dir = tempfile::tempdir().unwrap();
    let explicit = dir.path().join("explicit.toml");
    let other = dir.path().join("other.toml");
    fs::write(&explicit, "slow_op_ms = 40\n").unwrap();
    fs::write(&other, "slow_op_ms = 9000\n").unwrap();
    let other_shown = other.to_string_lossy().into_owned();
    let opts = load_with(Some(&explicit), |k| match k {
        "DOCQL_CONFIG" => Some(other_shown.clone()),
        "DOCQL_UNWIND_PRESERVE" => Some("true".into()),
        _ => None,
    })
    .unwrap();
    assert_eq!(opts.slow_op_ms, 40);
    assert!(opts.unwind_preserve_null_and_empty);
}

#[test]
fn broken_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "slow_op_ms = [").unwrap();
    assert!(matches!(load_with(Some(&path), |_| None), Err(DbError::Toml(_))));
    let missing = dir.path().join("missing.toml");
    assert!(matches!(load_with(Some(&missing), |_| None), Err(DbError::Io(_))));
}

#[test]
fn bad_id_strategy_override() {
    let mut opts = EngineOptions::default();
    let err = opts.apply_env_from(|k| (k == "DOCQL_ID_STRATEGY").then(|| "sequential".to_string())).unwrap_err();
    assert!(matches!(err, DbError::Config(_)));
}

#[test]
fn database_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("docql.toml");
    fs::write(&path, "unwind_preserve_null_and_empty = true\n").unwrap();
    let db = Database::open_with_config(Some(&path)).unwrap();
    assert!(db.options().unwind_preserve_null_and_empty);
}
