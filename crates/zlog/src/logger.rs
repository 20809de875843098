//! The leveled logging surface
//!
//! [`Logger`] is an explicitly constructed handle rather than process-wide
//! state. Informational levels go to the general sink, error levels to the
//! error sink. `fatal` exits the process and `panic` unwinds, both after the
//! record is written and the sinks are flushed.

use crate::{
    config::{Config, Mode},
    encoder::Record,
    level::Level,
    retention::RetentionSweeper,
    sink::{Sink, SinkFactory},
    Result,
};
use serde_json::Value;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::path::Path;
use std::thread::JoinHandle;

/// Handle to the configured sinks
///
/// Cheap to clone; clones share the sinks.
#[derive(Clone, Debug)]
pub struct Logger {
    general: Sink,
    error: Sink,
    stamp_time: bool,
    retention: Option<RetentionSweeper>,
}

impl Logger {
    /// Load configuration, build the sinks and start a one-shot retention
    /// sweep in the background
    ///
    /// A configuration that cannot be read is reported on stderr and the
    /// defaults are used. Failing to build the development sink exits the
    /// process, since nothing could be logged afterwards.
    pub fn init(config_path: impl AsRef<Path>) -> Self {
        let config = Config::load_or_default(config_path);

        let logger = match Self::from_config(&config) {
            Ok(logger) => logger,
            Err(e) => {
                eprintln!("zlog: {}", e);
                std::process::exit(1);
            }
        };

        logger.spawn_retention_sweep();
        logger
    }

    /// Build the sinks for `config` without touching retention
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let factory = SinkFactory::new(config);

        let logger = match config.mode() {
            Mode::Dev => {
                let sink = factory.build_dev_sink()?;
                Self::from_sinks(sink.clone(), sink, false)
            }
            Mode::Prod => Self::from_sinks(
                factory.build_general_sink(),
                factory.build_error_sink(),
                true,
            ),
        };

        Ok(logger.with_retention(RetentionSweeper::from_config(config)))
    }

    /// Assemble a logger from existing sinks
    ///
    /// With `stamp_time` every record carries a `time` field holding its
    /// emission time.
    pub fn from_sinks(general: Sink, error: Sink, stamp_time: bool) -> Self {
        Self {
            general,
            error,
            stamp_time,
            retention: None,
        }
    }

    pub fn with_retention(mut self, sweeper: RetentionSweeper) -> Self {
        self.retention = Some(sweeper);
        self
    }

    /// Sweeper for the configured log root, for periodic scheduling
    pub fn retention(&self) -> Option<RetentionSweeper> {
        self.retention.clone()
    }

    /// Run one retention sweep on a detached thread, logging each failed
    /// entry to the error sink
    pub fn spawn_retention_sweep(&self) -> Option<JoinHandle<()>> {
        let sweeper = self.retention.clone()?;
        let logger = self.clone();

        match sweeper.spawn_once(move |e| logger.error("Unable to delete old log", Some(e))) {
            Ok(handle) => Some(handle),
            Err(e) => {
                eprintln!("zlog: failed to start retention sweep: {}", e);
                None
            }
        }
    }

    pub fn general_sink(&self) -> &Sink {
        &self.general
    }

    pub fn error_sink(&self) -> &Sink {
        &self.error
    }

    /// Convenience view taking formatted or loosely typed arguments
    pub fn sugar(&self) -> Sugar<'_> {
        Sugar { logger: self }
    }

    /// Flush both sinks
    pub fn sync(&self) -> io::Result<()> {
        self.general.sync()?;
        if !self.general.same_as(&self.error) {
            self.error.sync()?;
        }
        Ok(())
    }

    fn record(&self, level: Level, msg: impl Into<String>) -> Record {
        let record = Record::new(level, msg);
        if self.stamp_time {
            record.with_time_field()
        } else {
            record
        }
    }

    fn with_error(record: Record, err: Option<&dyn StdError>) -> Record {
        match err {
            Some(err) => record.with_field("error", err.to_string()),
            None => record,
        }
    }

    fn fatal_to(&self, sink: &Sink, record: Record) -> ! {
        sink.log(&record);
        let _ = self.sync();
        std::process::exit(1)
    }

    fn panic_to(&self, sink: &Sink, record: Record) -> ! {
        sink.log(&record);
        let _ = self.sync();
        panic!("{}", record.message)
    }

    pub fn info(&self, msg: &str, info: Option<&str>) {
        let record = self
            .record(Level::Info, msg)
            .with_field("info", info.unwrap_or_default());
        self.general.log(&record);
    }

    pub fn warn(&self, msg: &str, warn: Option<&str>) {
        let record = self
            .record(Level::Warn, msg)
            .with_field("warn", warn.unwrap_or_default());
        self.general.log(&record);
    }

    pub fn debug(&self, msg: &str, debug: Option<&str>) {
        let record = self
            .record(Level::Debug, msg)
            .with_field("debug", debug.unwrap_or_default());
        self.general.log(&record);
    }

    /// Info record carrying arbitrary structured fields
    ///
    /// Fields named `level`, `ts`, `msg` or `stacktrace` are dropped when
    /// the record is encoded.
    pub fn info_fields<K, I>(&self, msg: &str, fields: I)
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let record = fields
            .into_iter()
            .fold(self.record(Level::Info, msg), |record, (key, value)| {
                record.with_field(key, value)
            });
        self.general.log(&record);
    }

    /// Info record offered to the error sink
    ///
    /// Production error sinks only keep error and above, so this is only
    /// visible in development mode.
    pub fn info_err(&self, msg: &str, info: Option<&str>) {
        let record = self
            .record(Level::Info, msg)
            .with_field("info", info.unwrap_or_default());
        self.error.log(&record);
    }

    pub fn error(&self, msg: &str, err: Option<&dyn StdError>) {
        let record = Self::with_error(self.record(Level::Error, msg), err);
        self.error.log(&record);
    }

    pub fn fatal(&self, msg: &str, err: Option<&dyn StdError>) -> ! {
        let record = Self::with_error(self.record(Level::Fatal, msg), err);
        self.fatal_to(&self.error, record)
    }

    pub fn panic(&self, msg: &str, err: Option<&dyn StdError>) -> ! {
        let record = Self::with_error(self.record(Level::Panic, msg), err);
        self.panic_to(&self.error, record)
    }

    /// Error record written to the general sink
    pub fn log_error(&self, msg: &str, err: Option<&dyn StdError>) {
        let record = Self::with_error(self.record(Level::Error, msg), err);
        self.general.log(&record);
    }

    pub fn log_fatal(&self, msg: &str, err: Option<&dyn StdError>) -> ! {
        let record = Self::with_error(self.record(Level::Fatal, msg), err);
        self.fatal_to(&self.general, record)
    }

    pub fn log_panic(&self, msg: &str, err: Option<&dyn StdError>) -> ! {
        let record = Self::with_error(self.record(Level::Panic, msg), err);
        self.panic_to(&self.general, record)
    }
}

/// Sugared calls, see [`Logger::sugar`]
#[derive(Clone, Copy)]
pub struct Sugar<'a> {
    logger: &'a Logger,
}

impl<'a> Sugar<'a> {
    /// Info record with a formatted message
    pub fn infof(&self, args: fmt::Arguments<'_>) {
        let record = self.logger.record(Level::Info, args.to_string());
        self.logger.general.log(&record);
    }

    /// Info record with `info` attached as a key/value pair
    pub fn infow(&self, msg: &str, info: &str) {
        let record = self.logger.record(Level::Info, msg).with_field("info", info);
        self.logger.general.log(&record);
    }

    /// Info record with every pair attached, values rendered as strings
    pub fn infow_fields(&self, msg: &str, pairs: &[(&str, &dyn fmt::Display)]) {
        self.logger.info_fields(
            msg,
            pairs
                .iter()
                .map(|(key, value)| (*key, Value::String(value.to_string()))),
        );
    }

    pub fn warnf(&self, args: fmt::Arguments<'_>) {
        let record = self.logger.record(Level::Warn, args.to_string());
        self.logger.general.log(&record);
    }

    /// Error record with a formatted message, written to the general sink
    pub fn errorf(&self, args: fmt::Arguments<'_>, err: Option<&dyn StdError>) {
        let record = Logger::with_error(self.logger.record(Level::Error, args.to_string()), err);
        self.logger.general.log(&record);
    }

    pub fn error(&self, msg: impl fmt::Display, err: &dyn StdError) {
        let record = Logger::with_error(self.logger.record(Level::Error, msg.to_string()), Some(err));
        self.logger.error.log(&record);
    }

    pub fn fatal(&self, msg: impl fmt::Display, err: &dyn StdError) -> ! {
        let record = Logger::with_error(self.logger.record(Level::Fatal, msg.to_string()), Some(err));
        self.logger.fatal_to(&self.logger.error, record)
    }

    pub fn panic(&self, msg: impl fmt::Display, err: &dyn StdError) -> ! {
        let record = Logger::with_error(self.logger.record(Level::Panic, msg.to_string()), Some(err));
        self.logger.panic_to(&self.logger.error, record)
    }
}
