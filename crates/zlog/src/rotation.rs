//! Log file rotation implementation

use crate::config::RotationConfig;
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

const BYTES_PER_MB: u64 = 1024 * 1024;
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Timestamp embedded in rotated file names; sorts chronologically
const BACKUP_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3f";

/// Format of the per-day directory names
pub const DAY_DIR_FORMAT: &str = "%Y-%m-%d";

/// A writer that rotates its file by size and moves to a new dated
/// directory when the local date changes
///
/// Files live at `{root}/{YYYY-MM-DD}/{stem}.json`. Clones share the same
/// open file, so one writer can be handed to several threads.
#[derive(Clone)]
pub struct RotatingFileWriter {
    state: Arc<Mutex<WriterState>>,
}

struct WriterState {
    root: PathBuf,
    stem: String,
    max_size_bytes: u64,
    max_backups: usize,
    max_age_days: u64,
    file: Option<File>,
    file_path: Option<PathBuf>,
    day: Option<NaiveDate>,
    size: u64,
    last_backup: Option<DateTime<Local>>,
}

impl RotatingFileWriter {
    /// Create a new rotating file writer
    ///
    /// Nothing touches the filesystem until the first write.
    pub fn new(root: impl Into<PathBuf>, stem: impl Into<String>, policy: &RotationConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(WriterState {
                root: root.into(),
                stem: stem.into(),
                max_size_bytes: policy.max_size.saturating_mul(BYTES_PER_MB),
                max_backups: policy.max_backups,
                max_age_days: policy.max_age,
                file: None,
                file_path: None,
                day: None,
                size: 0,
                last_backup: None,
            })),
        }
    }

    /// Replace the megabyte size limit with an exact byte count
    pub fn with_max_bytes(self, max_size_bytes: u64) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.max_size_bytes = max_size_bytes;
        }
        self
    }

    /// Path of the file currently open, if any
    pub fn current_file_path(&self) -> Option<PathBuf> {
        self.lock().ok().and_then(|state| state.file_path.clone())
    }

    /// Path the writer would use for a given day
    pub fn path_for_day(&self, day: NaiveDate) -> io::Result<PathBuf> {
        let state = self.lock()?;
        Ok(state.path_for_day(day))
    }

    /// Close the current file; the next write reopens it
    pub fn close(&self) -> io::Result<()> {
        let mut state = self.lock()?;
        if let Some(mut file) = state.file.take() {
            file.flush()?;
        }
        state.file_path = None;
        state.day = None;
        Ok(())
    }

    /// Append one buffer to the current file, rotating first if needed
    pub fn append(&self, buf: &[u8]) -> io::Result<()> {
        self.write_at(buf, Local::now()).map(|_| ())
    }

    /// Flush the current file to the operating system
    pub fn sync(&self) -> io::Result<()> {
        let mut state = self.lock()?;
        if let Some(ref mut file) = state.file {
            file.flush()?;
        }
        Ok(())
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, WriterState>> {
        self.state
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "rotating writer lock poisoned"))
    }

    /// Write one buffer as if the wall clock read `now`
    fn write_at(&self, buf: &[u8], now: DateTime<Local>) -> io::Result<usize> {
        let mut state = self.lock()?;
        let len = buf.len() as u64;

        if len > state.max_size_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "write length {} exceeds maximum file size {}",
                    len, state.max_size_bytes
                ),
            ));
        }

        if state.day != Some(now.date_naive()) {
            state.file = None;
            state.file_path = None;
        }

        if state.file.is_none() {
            state.open(now)?;
        }

        if state.size + len > state.max_size_bytes {
            state.rotate(now)?;
        }

        let file = state
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "No file open"))?;
        file.write_all(buf)?;
        state.size += len;

        Ok(buf.len())
    }
}

impl WriterState {
    fn day_dir(&self, day: NaiveDate) -> PathBuf {
        self.root.join(day.format(DAY_DIR_FORMAT).to_string())
    }

    fn path_for_day(&self, day: NaiveDate) -> PathBuf {
        self.day_dir(day).join(format!("{}.json", self.stem))
    }

    /// Open (or create) today's file, creating the day directory first
    fn open(&mut self, now: DateTime<Local>) -> io::Result<()> {
        let day = now.date_naive();
        let log_path = self.path_for_day(day);

        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let size = file.metadata()?.len();

        tracing::debug!(
            zlog.event = "log_file_opened",
            file_path = %log_path.display(),
            current_size = size,
            "Log file opened"
        );

        self.file = Some(file);
        self.file_path = Some(log_path);
        self.day = Some(day);
        self.size = size;
        Ok(())
    }

    /// Move the current file aside and start a fresh one
    fn rotate(&mut self, now: DateTime<Local>) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }

        let day = now.date_naive();
        let current_path = self.path_for_day(day);
        if current_path.exists() {
            let rotated_path = self.backup_path(day, now);
            std::fs::rename(&current_path, &rotated_path)?;

            tracing::info!(
                zlog.event = "log_rotated",
                old_file = %current_path.display(),
                new_file = %rotated_path.display(),
                "Log file rotated"
            );
        }

        self.size = 0;
        self.open(now)?;
        self.prune_backups(&self.day_dir(day));
        Ok(())
    }

    /// Pick a backup name that is not taken yet and sorts after the
    /// previous backup
    fn backup_path(&mut self, day: NaiveDate, now: DateTime<Local>) -> PathBuf {
        let dir = self.day_dir(day);
        let mut stamp = match self.last_backup {
            Some(last) if last >= now => last + ChronoDuration::milliseconds(1),
            _ => now,
        };
        loop {
            let candidate = dir.join(format!(
                "{}-{}.json",
                self.stem,
                stamp.format(BACKUP_TIME_FORMAT)
            ));
            if !candidate.exists() {
                self.last_backup = Some(stamp);
                return candidate;
            }
            stamp += ChronoDuration::milliseconds(1);
        }
    }

    /// Delete backups beyond the count limit or older than the age limit
    fn prune_backups(&self, dir: &Path) {
        let mut backups = match find_backups(dir, &self.stem) {
            Ok(backups) => backups,
            Err(e) => {
                tracing::warn!(
                    zlog.event = "backup_scan_failed",
                    dir = %dir.display(),
                    error = %e,
                    "Failed to list rotated log files"
                );
                return;
            }
        };

        // Newest first
        backups.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

        let cutoff = (self.max_age_days > 0).then(|| {
            SystemTime::now()
                .checked_sub(Duration::from_secs(self.max_age_days.saturating_mul(SECONDS_PER_DAY)))
                .unwrap_or(SystemTime::UNIX_EPOCH)
        });

        for (index, path) in backups.iter().enumerate() {
            let over_count = self.max_backups > 0 && index >= self.max_backups;
            let over_age = match cutoff {
                Some(cutoff) => std::fs::metadata(path)
                    .and_then(|m| m.modified())
                    .map(|modified| modified < cutoff)
                    .unwrap_or(false),
                None => false,
            };

            if !over_count && !over_age {
                continue;
            }

            match std::fs::remove_file(path) {
                Ok(()) => {
                    tracing::info!(
                        zlog.event = "backup_removed",
                        file = %path.display(),
                        over_count,
                        over_age,
                        "Removed rotated log file"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        zlog.event = "backup_removal_failed",
                        file = %path.display(),
                        error = %e,
                        "Failed to remove rotated log file"
                    );
                }
            }
        }
    }
}

/// Rotated files in `dir` belonging to `stem`
fn find_backups(dir: &Path, stem: &str) -> io::Result<Vec<PathBuf>> {
    let prefix = format!("{}-", stem);
    let mut backups = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if let Some(file_name) = path.file_name().and_then(|n| n.to_str()) {
            if file_name.starts_with(&prefix) && file_name.ends_with(".json") {
                backups.push(path);
            }
        }
    }

    Ok(backups)
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_at(buf, Local::now())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sync()
    }
}
