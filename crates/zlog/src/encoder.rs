//! Records and the encoders that turn them into lines

use crate::level::Level;
use chrono::{DateTime, Local};
use serde_json::{json, Map, Value};
use std::backtrace::Backtrace;
use std::io;

/// Format of the per-record `time` field
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Keys the JSON encoder owns; record fields with these names are dropped
const RESERVED_KEYS: [&str; 4] = ["level", "ts", "msg", "stacktrace"];

/// One log record
#[derive(Debug, Clone)]
pub struct Record {
    pub level: Level,
    pub time: DateTime<Local>,
    pub message: String,
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            time: Local::now(),
            message: message.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Attach the formatted emission time under `time`
    pub fn with_time_field(self) -> Self {
        let stamp = self.time.format(TIME_FORMAT).to_string();
        self.with_field("time", stamp)
    }

    /// Seconds since the Unix epoch, with microsecond precision
    pub fn epoch_seconds(&self) -> f64 {
        self.time.timestamp_micros() as f64 / 1_000_000.0
    }
}

/// Turns a record into one output line, newline included
pub trait Encoder: Send + Sync {
    fn encode(&self, record: &Record) -> io::Result<String>;
}

fn wants_stacktrace(threshold: Option<Level>, level: Level) -> bool {
    threshold.map(|min| level >= min).unwrap_or(false)
}

/// Newline-delimited JSON, `{"level","ts","msg",...fields}`
#[derive(Debug, Clone, Default)]
pub struct JsonEncoder {
    stacktrace_level: Option<Level>,
}

impl JsonEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture a stack trace for records at or above `level`
    pub fn with_stacktrace(mut self, level: Level) -> Self {
        self.stacktrace_level = Some(level);
        self
    }
}

impl Encoder for JsonEncoder {
    fn encode(&self, record: &Record) -> io::Result<String> {
        let mut json_record = json!({
            "level": record.level.as_str(),
            "ts": record.epoch_seconds(),
            "msg": record.message,
        });

        if let Value::Object(ref mut object) = json_record {
            for (key, value) in &record.fields {
                if !RESERVED_KEYS.contains(&key.as_str()) {
                    object.insert(key.clone(), value.clone());
                }
            }

            if wants_stacktrace(self.stacktrace_level, record.level) {
                object.insert(
                    "stacktrace".to_string(),
                    json!(Backtrace::force_capture().to_string()),
                );
            }
        }

        let mut line = serde_json::to_string(&json_record).map_err(io::Error::from)?;
        line.push('\n');
        Ok(line)
    }
}

/// Human-readable tab-separated lines for development
#[derive(Debug, Clone, Default)]
pub struct ConsoleEncoder {
    stacktrace_level: Option<Level>,
}

impl ConsoleEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stacktrace(mut self, level: Level) -> Self {
        self.stacktrace_level = Some(level);
        self
    }
}

impl Encoder for ConsoleEncoder {
    fn encode(&self, record: &Record) -> io::Result<String> {
        let mut line = format!(
            "{}\t{}\t{}",
            record.time.format("%Y-%m-%dT%H:%M:%S%.3f%z"),
            record.level.as_upper_str(),
            record.message
        );

        if !record.fields.is_empty() {
            let fields = serde_json::to_string(&record.fields).map_err(io::Error::from)?;
            line.push('\t');
            line.push_str(&fields);
        }

        if wants_stacktrace(self.stacktrace_level, record.level) {
            line.push('\n');
            line.push_str(&Backtrace::force_capture().to_string());
        }

        line.push('\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_record_shape() {
        let record = Record::new(Level::Info, "user created")
            .with_time_field()
            .with_field("info", "id=42");

        let line = JsonEncoder::new().encode(&record).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let parsed: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed["level"], "info");
        assert_eq!(parsed["msg"], "user created");
        assert_eq!(parsed["info"], "id=42");
        assert!(parsed["ts"].as_f64().unwrap() > 0.0);
        assert_eq!(
            parsed["time"],
            record.time.format(TIME_FORMAT).to_string().as_str()
        );
        assert!(parsed.get("stacktrace").is_none());
    }

    #[test]
    fn test_json_reserved_keys_are_not_overwritten() {
        let record = Record::new(Level::Warn, "real message")
            .with_field("msg", "spoofed")
            .with_field("level", "debug");

        let line = JsonEncoder::new().encode(&record).unwrap();
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["msg"], "real message");
        assert_eq!(parsed["level"], "warn");
    }

    #[test]
    fn test_json_stacktrace_threshold() {
        let encoder = JsonEncoder::new().with_stacktrace(Level::Error);

        let info = encoder.encode(&Record::new(Level::Info, "fine")).unwrap();
        let info: Value = serde_json::from_str(&info).unwrap();
        assert!(info.get("stacktrace").is_none());

        let error = encoder.encode(&Record::new(Level::Error, "broken")).unwrap();
        let error: Value = serde_json::from_str(&error).unwrap();
        assert!(error["stacktrace"].is_string());
    }

    #[test]
    fn test_console_line() {
        let record = Record::new(Level::Debug, "cache miss").with_field("debug", "key=a");
        let line = ConsoleEncoder::new().encode(&record).unwrap();

        let parts: Vec<&str> = line.trim_end().split('\t').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[1], "DEBUG");
        assert_eq!(parts[2], "cache miss");
        assert_eq!(parts[3], r#"{"debug":"key=a"}"#);
    }

    #[test]
    fn test_console_line_without_fields() {
        let line = ConsoleEncoder::new()
            .encode(&Record::new(Level::Info, "ready"))
            .unwrap();
        assert!(line.trim_end().ends_with("INFO\tready"));
    }
}
