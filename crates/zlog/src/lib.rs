//! # zlog
//!
//! Structured logging facade for a single process.
//!
//! ## Features
//!
//! - **Two sinks**: a general sink for informational records and an
//!   error-only sink, both writing newline-delimited JSON
//! - **File Rotation**: size, backup-count and age limits per sink file
//! - **Dated Directories**: one `{path}/{YYYY-MM-DD}/` directory per day
//! - **Retention Sweeps**: expired log directories are removed in the
//!   background, one failing entry never stops the rest of the walk
//! - **Development Mode**: human-readable records on stderr at debug level
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use zlog::Logger;
//!
//! let logger = Logger::init("log.toml");
//! logger.info("service started", Some("port=8080"));
//!
//! let err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
//! logger.error("upload failed", Some(&err));
//! ```

pub mod config;
pub mod encoder;
pub mod format;
pub mod level;
pub mod logger;
pub mod retention;
pub mod rotation;
pub mod sink;


pub use config::{Config, Mode, RotationConfig};
pub use format::{print, printf};
pub use level::Level;
pub use logger::{Logger, Sugar};
pub use retention::{sweep, RetentionSweeper, SweepError};
pub use rotation::RotatingFileWriter;
pub use sink::{Sink, SinkFactory, SinkWriter};

/// Result type for zlog operations
pub type Result<T> = std::result::Result<T, Error>;

/// zlog-specific errors
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Sink build error: {message}")]
    SinkBuild { message: String },
}
