//! log4rs configuration.
//!
//! Three rolling files live in the log directory: `app.log` for everything routed through the
//! root logger, `audit.log` for the `docql::audit` target and `metrics.log` for the
//! `docql::metrics` target. The latter two are not additive, so audit and metrics lines never
//! show up in `app.log`.

use log::LevelFilter;
use log4rs::Handle;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::rolling_file::policy::compound::{
    CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
};
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

use crate::config::LogOptions;
use crate::errors::DbError;

pub const AUDIT_TARGET: &str = "docql::audit";
pub const METRICS_TARGET: &str = "docql::metrics";

const ROLL_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";
const RAW_PATTERN: &str = "{m}{n}";

static HANDLE: Mutex<Option<Handle>> = Mutex::new(None);

#[must_use]
pub fn parse_level(level: &str) -> LevelFilter {
    match level.to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

fn cfg_err(e: impl std::fmt::Display) -> DbError {
    DbError::Config(format!("logging: {e}"))
}

fn rolling(dir: &Path, stem: &str, keep: u32, pattern: &str) -> Result<RollingFileAppender, DbError> {
    let roller = FixedWindowRoller::builder()
        .build(&format!("{}", dir.join(format!("{stem}.{{}}.log")).display()), keep)
        .map_err(cfg_err)?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(ROLL_SIZE_BYTES)), Box::new(roller));
    RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(pattern)))
        .build(dir.join(format!("{stem}.log")), Box::new(policy))
        .map_err(cfg_err)
}

/// Log directory used when none is configured: `<data_local_dir>/docql/logs`, or `./logs`
/// on platforms without a per-user data directory.
#[must_use]
pub fn default_log_dir() -> PathBuf {
    dirs_next::data_local_dir().map_or_else(|| PathBuf::from("logs"), |d| d.join("docql").join("logs"))
}

/// Builds the log4rs configuration for `opts` without installing it.
///
/// # Errors
/// `Io` when the log directory cannot be created, `Config` when an appender cannot be built.
pub fn build_config(opts: &LogOptions) -> Result<Config, DbError> {
    let dir = opts.dir.clone().unwrap_or_else(default_log_dir);
    std::fs::create_dir_all(&dir)?;
    let keep = opts.retention.max(1);
    let level = parse_level(&opts.level);
    Config::builder()
        .appender(Appender::builder().build("app", Box::new(rolling(&dir, "app", keep, PATTERN)?)))
        .appender(Appender::builder().build("audit", Box::new(rolling(&dir, "audit", keep, RAW_PATTERN)?)))
        .appender(Appender::builder().build("metrics", Box::new(rolling(&dir, "metrics", keep, RAW_PATTERN)?)))
        .logger(Logger::builder().appender("audit").additive(false).build(AUDIT_TARGET, LevelFilter::Info))
        .logger(Logger::builder().appender("metrics").additive(false).build(METRICS_TARGET, LevelFilter::Info))
        .build(Root::builder().appender("app").build(level))
        .map_err(cfg_err)
}

fn install(config: Config) -> Result<(), DbError> {
    let mut handle = HANDLE.lock();
    match handle.as_ref() {
        Some(h) => h.set_config(config),
        None => *handle = Some(log4rs::init_config(config).map_err(cfg_err)?),
    }
    Ok(())
}

/// Installs (or replaces) the process-wide logger.
///
/// # Errors
/// See [`build_config`]; also fails when another logger implementation is already installed.
pub fn configure(opts: &LogOptions) -> Result<(), DbError> {
    install(build_config(opts)?)
}

/// Reads `DOCQL_LOG_DIR`, `DOCQL_LOG_LEVEL` and `DOCQL_LOG_RETENTION` over `base` and
/// installs the result.
///
/// # Errors
/// As [`configure`].
pub fn configure_from_env(base: &LogOptions) -> Result<(), DbError> {
    configure(&options_from_env(base, |k| std::env::var(k).ok()))
}

pub(crate) fn options_from_env(base: &LogOptions, lookup: impl Fn(&str) -> Option<String>) -> LogOptions {
    let mut opts = base.clone();
    if let Some(dir) = lookup("DOCQL_LOG_DIR") {
        opts.dir = Some(PathBuf::from(dir));
    }
    if let Some(level) = lookup("DOCQL_LOG_LEVEL") {
        opts.level = level;
    }
    if let Some(keep) = lookup("DOCQL_LOG_RETENTION").and_then(|s| s.parse::<u32>().ok()) {
        opts.retention = keep;
    }
    opts
}

/// Loads a log4rs YAML file instead of the programmatic layout.
///
/// # Errors
/// `Config` when the file cannot be read or parsed.
pub fn init_file(path: &Path) -> Result<(), DbError> {
    let raw = log4rs::config::load_config_file(path, log4rs::config::Deserializers::default()).map_err(cfg_err)?;
    install(raw)
}
