// -- std imports
use std::{path::PathBuf, sync::OnceLock};

// -- crate imports
use anyhow::{Context, Result};
use tracing::warn;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, registry::Registry};

/// Keeps the non-blocking file writer flushing for the whole process.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

pub const APP_NAME: &str = "soundtouch-remote";

const LOG_FILE_NAME: &str = "soundtouch-remote.log";

#[cfg(debug_assertions)]
const LOG_LEVEL: LevelFilter = LevelFilter::DEBUG;
#[cfg(not(debug_assertions))]
const LOG_LEVEL: LevelFilter = LevelFilter::INFO;

/// Return the path to the log file.
///
/// - debug:  ./soundtouch-remote.log (current directory)
/// - release: XDG data dir + "soundtouch-remote/soundtouch-remote.log"
pub fn log_filepath() -> Result<PathBuf> {
    #[cfg(debug_assertions)]
    {
        Ok(PathBuf::from(LOG_FILE_NAME))
    }

    #[cfg(not(debug_assertions))]
    {
        xdg::BaseDirectories::with_prefix(APP_NAME)
            .place_data_file(LOG_FILE_NAME)
            .context("Could not determine log file path")
    }
}

/// Splits a log file path into the directory and file name the appender wants.
fn split_log_path(path: &std::path::Path) -> Result<(PathBuf, PathBuf)> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        Some(_) => PathBuf::from("."),
        None => anyhow::bail!("Could not determine log file directory"),
    };
    let file_name = path
        .file_name()
        .context("Could not determine log file name")?;

    Ok((dir, PathBuf::from(file_name)))
}

fn build_file_writer() -> Result<NonBlocking> {
    let (dir, file_name) = split_log_path(&log_filepath()?)?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    let _ = LOG_GUARD.set(guard);

    Ok(file_writer)
}

/// Formatting shared by the stdout and file layers.
fn fmt_layer<S>() -> fmt::Layer<S> {
    let layer = fmt::layer().with_thread_names(true);

    #[cfg(debug_assertions)]
    let layer = layer
        .with_file(true)
        .with_line_number(true)
        .with_target(false);
    #[cfg(not(debug_assertions))]
    let layer = layer.with_ansi(false);

    layer
}

/// Installs the global subscriber: stdout plus a log file, falling back to stdout alone.
pub fn init_tracing() {
    #[cfg(feature = "tokio-console")]
    let console_layer = Some(console_subscriber::spawn());
    #[cfg(not(feature = "tokio-console"))]
    let console_layer: Option<tracing_subscriber::layer::Identity> = None;

    let stdout_layer = fmt_layer().with_filter(LOG_LEVEL);

    match build_file_writer() {
        Ok(writer) => {
            let file_layer = fmt_layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(LOG_LEVEL);

            let subscriber = Registry::default()
                .with(console_layer)
                .with(stdout_layer)
                .with(file_layer);

            tracing::subscriber::set_global_default(subscriber)
                .expect("Could not set global tracing subscriber with file logging");
        }
        Err(e) => {
            let subscriber = Registry::default().with(console_layer).with(stdout_layer);

            tracing::subscriber::set_global_default(subscriber)
                .expect("Could not set global tracing subscriber without file logging");

            warn!(
                "File logging could not be initialized. Falling back to stdout only: {}",
                e
            );
        }
    }
}
