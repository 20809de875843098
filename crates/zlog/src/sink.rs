//! Sinks and the factory that builds them from configuration

use crate::{
    config::Config,
    encoder::{ConsoleEncoder, Encoder, JsonEncoder, Record},
    level::Level,
    rotation::RotatingFileWriter,
    Error, Result,
};
use std::io::{self, Write};
use std::sync::Arc;

/// Suffix appended to the base name for the error-only file
pub const ERROR_FILE_SUFFIX: &str = "_err";

/// Destination for encoded record lines
///
/// Implementations must be safe to call from several threads at once.
pub trait SinkWriter: Send + Sync {
    fn write_line(&self, line: &[u8]) -> io::Result<()>;

    fn sync(&self) -> io::Result<()>;
}

impl SinkWriter for RotatingFileWriter {
    fn write_line(&self, line: &[u8]) -> io::Result<()> {
        self.append(line)
    }

    fn sync(&self) -> io::Result<()> {
        RotatingFileWriter::sync(self)
    }
}

/// Writes lines to the process's standard error
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrWriter;

impl SinkWriter for StderrWriter {
    fn write_line(&self, line: &[u8]) -> io::Result<()> {
        io::stderr().lock().write_all(line)
    }

    fn sync(&self) -> io::Result<()> {
        io::stderr().lock().flush()
    }
}

/// A leveled, append-only record destination
///
/// Cloning is cheap; clones write through the same writer.
#[derive(Clone)]
pub struct Sink {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    name: String,
    min_level: Level,
    encoder: Box<dyn Encoder>,
    writer: Box<dyn SinkWriter>,
}

impl Sink {
    pub fn new(
        name: impl Into<String>,
        min_level: Level,
        encoder: impl Encoder + 'static,
        writer: impl SinkWriter + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                name: name.into(),
                min_level,
                encoder: Box::new(encoder),
                writer: Box::new(writer),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn min_level(&self) -> Level {
        self.inner.min_level
    }

    /// Whether records at `level` are persisted by this sink
    pub fn enabled(&self, level: Level) -> bool {
        level >= self.inner.min_level
    }

    /// Encode and write a record, returning any failure
    ///
    /// Records below the sink's level are dropped and count as success.
    pub fn try_log(&self, record: &Record) -> io::Result<()> {
        if !self.enabled(record.level) {
            return Ok(());
        }

        let line = self.inner.encoder.encode(record)?;
        self.inner.writer.write_line(line.as_bytes())
    }

    /// Encode and write a record, reporting failures on stderr
    pub fn log(&self, record: &Record) {
        if let Err(e) = self.try_log(record) {
            eprintln!(
                "zlog: failed to write {} record to sink '{}': {}",
                record.level, self.inner.name, e
            );
        }
    }

    /// Flush buffered output
    pub fn sync(&self) -> io::Result<()> {
        self.inner.writer.sync()
    }

    pub(crate) fn same_as(&self, other: &Sink) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink")
            .field("name", &self.inner.name)
            .field("min_level", &self.inner.min_level)
            .finish()
    }
}

/// Builds sinks from a loaded configuration
pub struct SinkFactory<'a> {
    config: &'a Config,
}

impl<'a> SinkFactory<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// JSON sink for info and above, `{path}/{date}/{name}.json`
    pub fn build_general_sink(&self) -> Sink {
        let writer = RotatingFileWriter::new(
            self.config.log_dir(),
            self.config.base_name(),
            &self.config.rotation,
        );

        Sink::new(
            "general",
            Level::Info,
            JsonEncoder::new().with_stacktrace(Level::Error),
            writer,
        )
    }

    /// JSON sink for error and above, `{path}/{date}/{name}_err.json`
    pub fn build_error_sink(&self) -> Sink {
        let writer = RotatingFileWriter::new(
            self.config.log_dir(),
            format!("{}{}", self.config.base_name(), ERROR_FILE_SUFFIX),
            &self.config.rotation,
        );

        Sink::new(
            "error",
            Level::Error,
            JsonEncoder::new().with_stacktrace(Level::Error),
            writer,
        )
    }

    /// Console sink on stderr used for every level in development mode
    ///
    /// Accepts debug records unless `ZLOG_LEVEL` names a higher level. An
    /// unparseable `ZLOG_LEVEL` is a build error.
    pub fn build_dev_sink(&self) -> Result<Sink> {
        self.build_dev_sink_with(StderrWriter)
    }

    pub fn build_dev_sink_with(&self, writer: impl SinkWriter + 'static) -> Result<Sink> {
        let min_level = match std::env::var("ZLOG_LEVEL") {
            Ok(value) => value.parse::<Level>().map_err(|e| Error::SinkBuild {
                message: format!("invalid ZLOG_LEVEL: {}", e),
            })?,
            Err(_) => Level::Debug,
        };

        Ok(Sink::new(
            "development",
            min_level,
            ConsoleEncoder::new().with_stacktrace(Level::Warn),
            writer,
        ))
    }
}

/// In-memory writer for tests
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct MemoryWriter {
    buf: Arc<std::sync::Mutex<Vec<u8>>>,
}

#[cfg(test)]
impl MemoryWriter {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock().unwrap()).to_string()
    }

    pub(crate) fn lines(&self) -> Vec<serde_json::Value> {
        self.contents()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

#[cfg(test)]
impl SinkWriter for MemoryWriter {
    fn write_line(&self, line: &[u8]) -> io::Result<()> {
        self.buf.lock().unwrap().extend_from_slice(line);
        Ok(())
    }

    fn sync(&self) -> io::Result<()> {
        Ok(())
    }
}
