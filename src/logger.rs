use anyhow::Result;
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

#[doc(hidden)]
pub use tracing as __tracing;

pub struct SessionLogger {
    log_buffer: Mutex<Vec<String>>,
    log_path: PathBuf,
    log_dir: PathBuf,
    retention_count: usize,
    app_name: String,
    stream_to_stdout: bool,
}

impl SessionLogger {
    pub fn new(log_dir: PathBuf, app_name: &str, retention_count: usize, stream_to_stdout: bool) -> Result<Self> {
        fs::create_dir_all(&log_dir)?;

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let log_filename = format!("{}_{}.log", app_name, timestamp);
        let log_path = log_dir.join(&log_filename);

        let logger = Self {
            log_buffer: Mutex::new(Vec::new()),
            log_path,
            log_dir,
            retention_count,
            app_name: app_name.to_string(),
            stream_to_stdout,
        };

        logger.clean_old_logs()?;
        logger.log(format!("=== {} Session Started ===", app_name));

        Ok(logger)
    }

    pub fn log(&self, message: impl AsRef<str>) {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let log_line = format!("[{}] {}", timestamp, message.as_ref());

        if self.stream_to_stdout {
            println!("{}", log_line);
            let _ = self.write_line_to_file(&log_line);
        } else {
            self.log_buffer.lock().push(log_line);
        }
    }

    fn write_line_to_file(&self, line: &str) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }

    pub fn log_path(&self) -> &PathBuf {
        &self.log_path
    }

    fn clean_old_logs(&self) -> Result<()> {
        let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
        let prefix = format!("{}_", self.app_name);

        if let Ok(entries) = fs::read_dir(&self.log_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|s| s.to_str()) != Some("log") {
                    continue;
                }
                let matches = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix));
                if !matches {
                    continue;
                }
                if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                    log_files.push((path, modified));
                }
            }
        }

        log_files.sort_by(|a, b| b.1.cmp(&a.1));

        // The new session file doesn't exist yet, so keep one slot free for it
        let keep = self.retention_count.saturating_sub(1);
        for (path, _) in log_files.iter().skip(keep) {
            let _ = fs::remove_file(path);
        }

        Ok(())
    }

    pub fn flush_to_disk(&self) -> Result<()> {
        let mut buffer = self.log_buffer.lock();
        if buffer.is_empty() {
            return Ok(());
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        for line in buffer.iter() {
            writeln!(file, "{}", line)?;
        }

        file.flush()?;
        buffer.clear();
        Ok(())
    }

    pub fn finalize(&self) -> Result<()> {
        self.log(format!("=== {} Session Ended ===", self.app_name));
        self.flush_to_disk()
    }
}

impl Drop for SessionLogger {
    fn drop(&mut self) {
        let _ = self.flush_to_disk();
    }
}

/// Collects an event's message and fields into one line.
#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Forwards tracing events into the session log.
pub struct SessionLayer;

impl<S: Subscriber> Layer<S> for SessionLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let Some(logger) = LOGGER.get() else {
            return;
        };

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let prefix = match *event.metadata().level() {
            Level::ERROR => "ERROR: ",
            Level::WARN => "WARN: ",
            Level::DEBUG => "DEBUG: ",
            Level::TRACE => "TRACE: ",
            Level::INFO => "",
        };
        logger.log(format!("{}{}{}", prefix, visitor.message, visitor.fields));
    }
}

static LOGGER: once_cell::sync::OnceCell<SessionLogger> = once_cell::sync::OnceCell::new();

/// Install the session logger as the global tracing subscriber.
///
/// Filtering follows `CHROMASIFT_LOG`, then `RUST_LOG`, then `info`.
pub fn init_logger(log_dir: PathBuf, app_name: &str, retention_count: usize, stream_to_stdout: bool) -> Result<()> {
    let logger = SessionLogger::new(log_dir, app_name, retention_count, stream_to_stdout)?;
    LOGGER.set(logger).map_err(|_| anyhow::anyhow!("Logger already initialized"))?;

    let env_filter = EnvFilter::try_from_env("CHROMASIFT_LOG")
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(SessionLayer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install subscriber: {}", e))?;

    Ok(())
}

pub fn finalize_logs() -> Result<()> {
    if let Some(logger) = LOGGER.get() {
        logger.finalize()?;
    }
    Ok(())
}

pub fn get_log_path() -> Option<PathBuf> {
    LOGGER.get().map(|logger| logger.log_path.clone())
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::__tracing::info!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::__tracing::warn!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logger::__tracing::error!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logger::__tracing::debug!($($arg)*)
    };
}
