//! Retention sweeps over dated log directories
//!
//! A sweep walks everything below the log root and removes each directory
//! that is both older than the retention threshold and named with the
//! configured prefix. The root itself is never removed. Failures are
//! collected per entry, so one directory that cannot be removed (even one
//! whose removal panics) does not stop the rest of the walk.

use crate::config::{Config, DEFAULT_RETENTION_DAYS};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use walkdir::{DirEntry, WalkDir};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Shortest interval accepted by [`RetentionSweeper::start`]
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Why one entry of a sweep failed
#[derive(thiserror::Error, Debug)]
pub enum SweepError {
    #[error("Failed to remove {}: {source}", .path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read modification time of {}: {source}", .path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to delete old log '{}': {message}", .path.display())]
    Panicked { path: PathBuf, message: String },

    #[error("Failed to walk log directory: {source}")]
    Walk {
        path: Option<PathBuf>,
        #[source]
        source: walkdir::Error,
    },
}

impl SweepError {
    /// Path of the entry that failed, when known
    pub fn path(&self) -> Option<&Path> {
        match self {
            SweepError::Remove { path, .. }
            | SweepError::Metadata { path, .. }
            | SweepError::Panicked { path, .. } => Some(path),
            SweepError::Walk { path, .. } => path.as_deref(),
        }
    }
}

/// Removes a directory tree
#[cfg_attr(test, mockall::automock)]
pub trait Remover: Send + Sync {
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// Removes directories from the real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsRemover;

impl Remover for FsRemover {
    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_dir_all(path)
    }
}

/// Base name of `root`, the prefix used when none is configured
pub fn default_prefix(root: &Path) -> Option<String> {
    root.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
}

/// Run one sweep below `dir` with the default prefix
pub fn sweep(dir: impl AsRef<Path>, threshold_days: u64) -> Vec<SweepError> {
    RetentionSweeper::new(dir.as_ref(), threshold_days).sweep()
}

/// Sweeps expired log directories below a root
#[derive(Clone)]
pub struct RetentionSweeper {
    root: PathBuf,
    threshold_days: u64,
    prefix: Option<String>,
    remover: Arc<dyn Remover>,
}

impl RetentionSweeper {
    /// Create a sweeper for `root`
    ///
    /// A threshold of zero selects the default of 28 days. The eligibility
    /// prefix defaults to the base name of `root`.
    pub fn new(root: impl Into<PathBuf>, threshold_days: u64) -> Self {
        let root = root.into();
        let prefix = default_prefix(&root);
        let threshold_days = if threshold_days == 0 {
            DEFAULT_RETENTION_DAYS
        } else {
            threshold_days
        };

        Self {
            root,
            threshold_days,
            prefix,
            remover: Arc::new(FsRemover),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut sweeper = Self::new(config.log_dir(), config.retention_days());
        sweeper.prefix = config.sweep_prefix();
        sweeper
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    pub fn with_remover(mut self, remover: impl Remover + 'static) -> Self {
        self.remover = Arc::new(remover);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn threshold_days(&self) -> u64 {
        self.threshold_days
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Whether something last modified at `modified` is past the threshold
    pub fn is_expired(&self, modified: SystemTime, now: SystemTime) -> bool {
        let max_age = Duration::from_secs(self.threshold_days.saturating_mul(SECONDS_PER_DAY));
        match now.duration_since(modified) {
            Ok(age) => age > max_age,
            // Modified in the future
            Err(_) => false,
        }
    }

    fn has_prefix(&self, entry: &DirEntry) -> bool {
        match &self.prefix {
            Some(prefix) => entry.file_name().to_string_lossy().starts_with(prefix.as_str()),
            None => false,
        }
    }

    /// Walk the root once and remove every expired, prefixed directory
    ///
    /// Returns one error per entry that could not be inspected or removed.
    /// A missing root is not an error.
    pub fn sweep(&self) -> Vec<SweepError> {
        let mut errors = Vec::new();

        if self.prefix.is_none() || !self.root.is_dir() {
            return errors;
        }

        let now = SystemTime::now();
        let mut entries = WalkDir::new(&self.root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = entries.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    errors.push(SweepError::Walk {
                        path: e.path().map(Path::to_path_buf),
                        source: e,
                    });
                    continue;
                }
            };

            if !entry.file_type().is_dir() || !self.has_prefix(&entry) {
                continue;
            }

            let modified = match entry.metadata() {
                Ok(metadata) => match metadata.modified() {
                    Ok(modified) => modified,
                    Err(e) => {
                        errors.push(SweepError::Metadata {
                            path: entry.path().to_path_buf(),
                            source: e,
                        });
                        continue;
                    }
                },
                Err(e) => {
                    errors.push(SweepError::Walk {
                        path: Some(entry.path().to_path_buf()),
                        source: e,
                    });
                    continue;
                }
            };

            if !self.is_expired(modified, now) {
                continue;
            }

            match self.remove(entry.path()) {
                Ok(()) => {
                    tracing::info!(
                        zlog.event = "log_dir_removed",
                        dir = %entry.path().display(),
                        max_age_days = self.threshold_days,
                        "Removed expired log directory"
                    );
                    entries.skip_current_dir();
                }
                Err(e) => {
                    tracing::warn!(
                        zlog.event = "log_dir_removal_failed",
                        dir = %entry.path().display(),
                        error = %e,
                        "Failed to remove expired log directory"
                    );
                    errors.push(e);
                }
            }
        }

        errors
    }

    /// Remove one directory, turning a panic into an error for that entry
    fn remove(&self, path: &Path) -> Result<(), SweepError> {
        let remover = &self.remover;
        match panic::catch_unwind(AssertUnwindSafe(|| remover.remove_dir_all(path))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(SweepError::Remove {
                path: path.to_path_buf(),
                source,
            }),
            Err(payload) => Err(SweepError::Panicked {
                path: path.to_path_buf(),
                message: panic_message(payload.as_ref()),
            }),
        }
    }

    /// Run one sweep on a detached thread
    ///
    /// `on_error` is called once per failed entry. The handle can be
    /// dropped; the sweep keeps running.
    pub fn spawn_once<F>(self, on_error: F) -> io::Result<std::thread::JoinHandle<()>>
    where
        F: Fn(&SweepError) + Send + 'static,
    {
        std::thread::Builder::new()
            .name("zlog-retention".to_string())
            .spawn(move || {
                for error in self.sweep() {
                    on_error(&error);
                }
            })
    }

    /// Sweep on a fixed interval, reporting failures through `tracing`
    ///
    /// The first sweep runs immediately. Must be called inside a tokio
    /// runtime.
    pub fn start(self, every: Duration) -> tokio::task::JoinHandle<()> {
        self.start_with(every, |errors| {
            for error in &errors {
                tracing::warn!(
                    zlog.event = "retention_entry_failed",
                    error = %error,
                    "Log retention sweep entry failed"
                );
            }
        })
    }

    /// Sweep on a fixed interval, handing each sweep's errors to `on_errors`
    pub fn start_with<F>(self, every: Duration, on_errors: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(Vec<SweepError>) + Send + Sync + 'static,
    {
        let sweeper = Arc::new(self);
        let every = every.max(MIN_SWEEP_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);

            loop {
                ticker.tick().await;

                let job = Arc::clone(&sweeper);
                match tokio::task::spawn_blocking(move || job.sweep()).await {
                    Ok(errors) if errors.is_empty() => {}
                    Ok(errors) => on_errors(errors),
                    Err(e) => {
                        tracing::error!(
                            zlog.event = "retention_sweep_aborted",
                            error = %e,
                            "Log retention sweep did not complete"
                        );
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for RetentionSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionSweeper")
            .field("root", &self.root)
            .field("threshold_days", &self.threshold_days)
            .field("prefix", &self.prefix)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn days_ago(days: u64) -> FileTime {
        FileTime::from_system_time(SystemTime::now() - Duration::from_secs(days * SECONDS_PER_DAY))
    }

    /// Create `root/name` with a log file inside, last modified `days` ago
    fn dated_dir(root: &Path, name: &str, days: u64) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("svc.json"), "{}\n").unwrap();
        filetime::set_file_mtime(&dir, days_ago(days)).unwrap();
        dir
    }

    fn app_root(temp_dir: &TempDir) -> PathBuf {
        let root = temp_dir.path().join("app");
        std::fs::create_dir_all(&root).unwrap();
        root
    }

    struct PanickingRemover {
        victim: &'static str,
    }

    impl Remover for PanickingRemover {
        fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
            if path.ends_with(self.victim) {
                panic!("permission denied while removing {}", path.display());
            }
            std::fs::remove_dir_all(path)
        }
    }

    #[test]
    fn test_expired_prefixed_directory_is_removed() {
        let temp_dir = TempDir::new().unwrap();
        let root = app_root(&temp_dir);
        let old = dated_dir(&root, "app-2020-01-01", 10);
        let recent = dated_dir(&root, "app-2020-01-08", 3);

        let errors = sweep(&root, 7);

        assert!(errors.is_empty(), "{:?}", errors);
        assert!(!old.exists());
        assert!(recent.exists());
        assert!(root.exists());
    }

    #[test]
    fn test_unprefixed_directory_is_never_removed() {
        let temp_dir = TempDir::new().unwrap();
        let root = app_root(&temp_dir);
        let dated = dated_dir(&root, "2020-01-01", 400);
        let sibling = dated_dir(&root, "backups", 400);

        let errors = sweep(&root, 7);

        assert!(errors.is_empty());
        assert!(dated.exists());
        assert!(sibling.exists());
    }

    #[test]
    fn test_configured_prefix_selects_dated_directories() {
        let temp_dir = TempDir::new().unwrap();
        let root = app_root(&temp_dir);
        let old = dated_dir(&root, "2020-01-01", 10);
        let recent = dated_dir(&root, "2020-01-08", 3);
        let other = dated_dir(&root, "archive", 10);

        let sweeper = RetentionSweeper::new(&root, 7).with_prefix("20");
        assert!(sweeper.sweep().is_empty());

        assert!(!old.exists());
        assert!(recent.exists());
        assert!(other.exists());
    }

    #[test]
    fn test_root_is_never_a_candidate() {
        let temp_dir = TempDir::new().unwrap();
        let root = app_root(&temp_dir);
        filetime::set_file_mtime(&root, days_ago(365)).unwrap();

        assert!(sweep(&root, 7).is_empty());
        assert!(root.exists());
    }

    #[test]
    fn test_walk_is_depth_unbounded() {
        let temp_dir = TempDir::new().unwrap();
        let root = app_root(&temp_dir);
        let day = root.join("2020-01-01");
        let nested = dated_dir(&day, "app-nested", 30);
        filetime::set_file_mtime(&day, days_ago(30)).unwrap();

        assert!(sweep(&root, 7).is_empty());
        assert!(!nested.exists());
        assert!(day.exists());
    }

    #[test]
    fn test_removed_directory_is_not_descended() {
        let temp_dir = TempDir::new().unwrap();
        let root = app_root(&temp_dir);
        let outer = root.join("app-outer");
        dated_dir(&outer, "app-inner", 30);
        filetime::set_file_mtime(&outer, days_ago(30)).unwrap();

        let mut remover = MockRemover::new();
        remover
            .expect_remove_dir_all()
            .times(1)
            .returning(|path| std::fs::remove_dir_all(path));

        let errors = RetentionSweeper::new(&root, 7)
            .with_remover(remover)
            .sweep();

        assert!(errors.is_empty());
        assert!(!outer.exists());
    }

    #[test]
    fn test_files_are_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let root = app_root(&temp_dir);
        let file = root.join("app.json");
        std::fs::write(&file, "{}\n").unwrap();
        filetime::set_file_mtime(&file, days_ago(100)).unwrap();

        assert!(sweep(&root, 7).is_empty());
        assert!(file.exists());
    }

    #[test]
    fn test_removal_failure_does_not_stop_the_walk() {
        let temp_dir = TempDir::new().unwrap();
        let root = app_root(&temp_dir);
        let stuck = dated_dir(&root, "app-a", 10);
        let removable = dated_dir(&root, "app-b", 10);

        let mut remover = MockRemover::new();
        remover.expect_remove_dir_all().times(2).returning(|path| {
            if path.ends_with("app-a") {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "in use"))
            } else {
                std::fs::remove_dir_all(path)
            }
        });

        let errors = RetentionSweeper::new(&root, 7)
            .with_remover(remover)
            .sweep();

        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], SweepError::Remove { source, .. }
            if source.kind() == io::ErrorKind::PermissionDenied));
        assert_eq!(errors[0].path(), Some(stuck.as_path()));
        assert!(stuck.exists());
        assert!(!removable.exists());
    }

    #[test]
    fn test_panicking_removal_is_recovered() {
        let temp_dir = TempDir::new().unwrap();
        let root = app_root(&temp_dir);
        let stuck = dated_dir(&root, "app-a", 10);
        let removable = dated_dir(&root, "app-b", 10);

        let errors = RetentionSweeper::new(&root, 7)
            .with_remover(PanickingRemover { victim: "app-a" })
            .sweep();

        assert_eq!(errors.len(), 1);
        match &errors[0] {
            SweepError::Panicked { path, message } => {
                assert_eq!(path, &stuck);
                assert!(message.contains("permission denied"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(errors[0].to_string().starts_with("Unable to delete old log"));
        assert!(stuck.exists());
        assert!(!removable.exists());
    }

    #[test]
    fn test_missing_root_is_not_an_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(sweep(temp_dir.path().join("absent"), 7).is_empty());
    }

    #[test]
    fn test_zero_threshold_uses_default() {
        let temp_dir = TempDir::new().unwrap();
        let root = app_root(&temp_dir);
        let ten_days = dated_dir(&root, "app-recent", 10);
        let forty_days = dated_dir(&root, "app-old", 40);

        let sweeper = RetentionSweeper::new(&root, 0);
        assert_eq!(sweeper.threshold_days(), 28);
        assert!(sweeper.sweep().is_empty());

        assert!(ten_days.exists());
        assert!(!forty_days.exists());
    }

    #[test]
    fn test_is_expired_boundary() {
        let sweeper = RetentionSweeper::new("/var/log/app", 7);
        let now = SystemTime::now();
        let week = Duration::from_secs(7 * SECONDS_PER_DAY);

        assert!(!sweeper.is_expired(now - week, now));
        assert!(sweeper.is_expired(now - week - Duration::from_secs(1), now));
        assert!(!sweeper.is_expired(now + Duration::from_secs(60), now));
    }

    #[test]
    fn test_huge_threshold_keeps_everything() {
        let temp_dir = TempDir::new().unwrap();
        let root = app_root(&temp_dir);
        let old = dated_dir(&root, "app-2020-01-01", 400);

        assert!(sweep(&root, 300_000_000_000_000).is_empty());
        assert!(sweep(&root, u64::MAX).is_empty());
        assert!(old.exists());
    }

    #[test]
    fn test_metadata_error_names_the_failure() {
        let err = SweepError::Metadata {
            path: PathBuf::from("/var/log/app/app-old"),
            source: io::Error::new(io::ErrorKind::Unsupported, "mtime unavailable"),
        };

        assert_eq!(err.path(), Some(Path::new("/var/log/app/app-old")));
        let message = err.to_string();
        assert!(message.starts_with("Failed to read modification time"));
        assert!(message.contains("mtime unavailable"));
    }

    #[test]
    fn test_default_prefix() {
        assert_eq!(default_prefix(Path::new("/var/log/app")).as_deref(), Some("app"));
        assert_eq!(default_prefix(Path::new("./log")).as_deref(), Some("log"));
        assert_eq!(default_prefix(Path::new("/")), None);
        assert_eq!(default_prefix(Path::new("..")), None);
    }

    #[test]
    fn test_without_prefix_nothing_is_eligible() {
        let temp_dir = TempDir::new().unwrap();
        let root = app_root(&temp_dir);
        let old = dated_dir(&root, "app-2020-01-01", 10);

        let sweeper = RetentionSweeper::new(&root, 7).with_prefix("");
        assert_eq!(sweeper.prefix(), None);
        assert!(sweeper.sweep().is_empty());
        assert!(old.exists());
    }

    #[test]
    fn test_from_config() {
        let config = Config {
            path: PathBuf::from("/var/log/app"),
            max_days: 7,
            ..Config::default()
        };
        let sweeper = RetentionSweeper::from_config(&config);
        assert_eq!(sweeper.root(), Path::new("/var/log/app"));
        assert_eq!(sweeper.threshold_days(), 7);
        assert_eq!(sweeper.prefix(), Some("app"));
    }

    #[test]
    fn test_spawn_once_reports_errors() {
        let temp_dir = TempDir::new().unwrap();
        let root = app_root(&temp_dir);
        dated_dir(&root, "app-a", 10);

        let (tx, rx) = mpsc::channel();
        let mut remover = MockRemover::new();
        remover
            .expect_remove_dir_all()
            .returning(|_| Err(io::Error::new(io::ErrorKind::Other, "busy")));

        let handle = RetentionSweeper::new(&root, 7)
            .with_remover(remover)
            .spawn_once(move |error| {
                tx.send(error.to_string()).unwrap();
            })
            .unwrap();
        handle.join().unwrap();

        let reported: Vec<String> = rx.try_iter().collect();
        assert_eq!(reported.len(), 1);
        assert!(reported[0].contains("busy"));
    }

    #[tokio::test]
    async fn test_periodic_sweep_runs_immediately() {
        let temp_dir = TempDir::new().unwrap();
        let root = app_root(&temp_dir);
        let old = dated_dir(&root, "app-2020-01-01", 10);

        let handle = RetentionSweeper::new(&root, 7).start(Duration::from_secs(3600));

        for _ in 0..100 {
            if !old.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.abort();

        assert!(!old.exists());
    }

    #[tokio::test]
    async fn test_periodic_sweep_hands_errors_to_callback() {
        let temp_dir = TempDir::new().unwrap();
        let root = app_root(&temp_dir);
        dated_dir(&root, "app-a", 10);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = RetentionSweeper::new(&root, 7)
            .with_remover(PanickingRemover { victim: "app-a" })
            .start_with(Duration::from_secs(3600), move |errors| {
                let _ = tx.send(errors.len());
            });

        let count = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        handle.abort();

        assert_eq!(count, Some(1));
    }
}
