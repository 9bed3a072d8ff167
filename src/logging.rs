//! log4rs setup for the demo binary and benches.
use crate::error::{GraphormerError, Result};
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::Path;

const PATTERN: &str = "{d(%H:%M:%S%.3f)} {h({l:<5})} {t} - {m}{n}";

/// Builds a log4rs config writing to stderr and, if given, to `logfile`.
///
/// # Errors
/// If the log file cannot be opened or the config is inconsistent.
pub fn build_config(level: LevelFilter, logfile: Option<&Path>) -> Result<Config> {
    let stderr = ConsoleAppender::builder()
        .target(log4rs::append::console::Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();
    let mut builder = Config::builder().appender(Appender::builder().build("stderr", Box::new(stderr)));
    let mut root = Root::builder().appender("stderr");
    if let Some(path) = logfile {
        let file = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new("{l} - {m}\n")))
            .build(path)?;
        builder = builder.appender(Appender::builder().build("logfile", Box::new(file)));
        root = root.appender("logfile");
    }
    builder
        .build(root.build(level))
        .map_err(|e| GraphormerError::Logging(e.to_string()))
}

/// Installs the global logger. A YAML or JSON `config_file` takes precedence
/// over `level`.
///
/// # Errors
/// If a logger is already installed or the config file is unreadable.
pub fn init_logging(config_file: Option<&Path>, level: LevelFilter) -> Result<()> {
    match config_file {
        Some(path) => log4rs::init_file(path, Default::default())
            .map_err(|e| GraphormerError::Logging(e.to_string())),
        None => log4rs::init_config(build_config(level, None)?)
            .map(|_handle| ())
            .map_err(|e| GraphormerError::Logging(e.to_string())),
    }
}
