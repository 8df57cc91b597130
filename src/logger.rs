use crate::errors::DbError;
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::rolling_file::policy::compound::{
    CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
};
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::{Path, PathBuf};

/// Target for records of mutations (updates, deletes, index builds).
pub const AUDIT_TARGET: &str = "bookstore::audit";

const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";
const ROLL_SIZE: u64 = 10 * 1024 * 1024;
const ROLL_COUNT: u32 = 7;

/// Parses `off`, `error`, `warn`, `info`, `debug` or `trace`, case-insensitively.
///
/// # Errors
/// Returns `DbError::Config` for any other value.
pub fn parse_level(level: &str) -> Result<LevelFilter, DbError> {
    level.parse().map_err(|_| {
        DbError::Config(format!("invalid log level '{level}' (expected off, error, warn, info, debug or trace)"))
    })
}

/// Initializes logging to stderr.
///
/// # Errors
/// Returns an error for an unknown level or if a global logger is already installed.
pub fn init_console(level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let level = parse_level(level)?;
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("[{l}] {m}{n}")))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))?;
    log4rs::init_config(config)?;
    Ok(())
}

fn rolling(dir: &Path, stem: &str) -> Result<RollingFileAppender, Box<dyn std::error::Error>> {
    let roller = FixedWindowRoller::builder()
        .build(&format!("{}", dir.join(format!("{stem}.{{}}.log")).display()), ROLL_COUNT)?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(ROLL_SIZE)), Box::new(roller));
    Ok(RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build(dir.join(format!("{stem}.log")), Box::new(policy))?)
}

/// Initializes logging under `{base_dir}/{db_name}_logs/`: `{db_name}.log` for the app and
/// `{db_name}_audit.log` for the audit target. Returns the log directory.
///
/// # Errors
/// Returns an error for an unknown level, if the directory cannot be created or if the
/// logger fails to initialize.
pub fn init_for_db_in(base_dir: &Path, db_name: &str, level: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let level = parse_level(level)?;
    let dir = base_dir.join(format!("{db_name}_logs"));
    std::fs::create_dir_all(&dir)?;
    let app = rolling(&dir, db_name)?;
    let audit = rolling(&dir, &format!("{db_name}_audit"))?;
    let config = Config::builder()
        .appender(Appender::builder().build("app", Box::new(app)))
        .appender(Appender::builder().build("audit", Box::new(audit)))
        .logger(
            Logger::builder()
                .appender("audit")
                .additive(false)
                .build(AUDIT_TARGET, LevelFilter::Info),
        )
        .build(Root::builder().appender("app").build(level))?;
    log4rs::init_config(config)?;
    Ok(dir)
}
