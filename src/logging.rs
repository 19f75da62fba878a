use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "tutor.log";

/// Keeps the non-blocking file writer flushing; hold it for the process lifetime.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

/// Where file logs go, if anywhere. Read from `ENABLE_FILE_LOGS` and `LOG_DIR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLogSettings {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl FileLogSettings {
    pub fn from_env() -> Self {
        let enabled = std::env::var("ENABLE_FILE_LOGS")
            .map(|v| matches!(v.trim(), "true" | "1"))
            .unwrap_or(false);
        let dir = std::env::var("LOG_DIR")
            .ok()
            .filter(|d| !d.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./logs"));
        Self { enabled, dir }
    }
}

/// Installs the global subscriber. Console output goes to stderr because
/// stdout carries turn responses; a daily rolling file is added when enabled.
/// A second call is a no-op.
pub fn init_tracing(log_level: &str) -> Option<FileLogGuard> {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer().with_writer(std::io::stderr).with_target(true);

    let settings = FileLogSettings::from_env();
    let (file_layer, guard) = match open_file_writer(&settings) {
        Some((writer, guard)) => (
            Some(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true),
            ),
            Some(FileLogGuard { _guard: guard }),
        ),
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file_layer)
        .try_init();
    if installed.is_err() {
        return None;
    }
    guard
}

fn open_file_writer(
    settings: &FileLogSettings,
) -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    if !settings.enabled {
        return None;
    }
    if let Err(err) = std::fs::create_dir_all(&settings.dir) {
        eprintln!(
            "failed to create log directory {}: {err}",
            settings.dir.display()
        );
        return None;
    }
    let appender = RollingFileAppender::new(Rotation::DAILY, &settings.dir, LOG_FILE_PREFIX);
    Some(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_settings_open_no_file() {
        let settings = FileLogSettings {
            enabled: false,
            dir: PathBuf::from("/nonexistent/never-created"),
        };
        assert!(open_file_writer(&settings).is_none());
    }

    #[test]
    fn enabled_settings_create_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("logs");
        let settings = FileLogSettings {
            enabled: true,
            dir: dir.clone(),
        };
        let opened = open_file_writer(&settings);
        assert!(opened.is_some());
        assert!(dir.is_dir());
    }
}
