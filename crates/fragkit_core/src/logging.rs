//! Logging bootstrap and extension log sinks.
//!
//! # Responsibility
//! - Initialize file-based rolling logs exactly once per process.
//! - Provide the injectable `LogSink` interface extensions log through.
//!
//! # Invariants
//! - Logging init is idempotent for the same level and directory.
//! - Re-initialization with a different level or directory is rejected.
//! - Neither initialization nor any sink call panics.
//! - Messages are metadata-only `event=... module=... status=...` lines.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info, Level};
use once_cell::sync::OnceCell;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LOG_FILE_BASENAME: &str = "fragkit";
const LOG_TARGET_ROOT: &str = "fragkit";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;
const MAX_PANIC_PAYLOAD_CHARS: usize = 160;
const MAX_METADATA_VALUE_CHARS: usize = 256;

static LOGGING_STATE: OnceCell<LoggingState> = OnceCell::new();
static PANIC_HOOK_INSTALLED: OnceCell<()> = OnceCell::new();

struct LoggingState {
    level: &'static str,
    log_dir: PathBuf,
    _logger: LoggerHandle,
}

impl LoggingState {
    fn ensure_same(&self, level: &'static str, log_dir: &Path) -> Result<(), String> {
        if self.log_dir != log_dir {
            return Err(format!(
                "logging already initialized at `{}`; refusing to switch to `{}`",
                self.log_dir.display(),
                log_dir.display()
            ));
        }
        if self.level != level {
            return Err(format!(
                "logging already initialized with level `{}`; refusing to switch to `{level}`",
                self.level
            ));
        }
        Ok(())
    }
}

/// Initializes process logging with level and directory.
///
/// # Errors
/// - Unsupported `level`, or an empty / relative `log_dir`.
/// - `log_dir` cannot be created or the logger backend fails to start.
/// - Logging is already active with another level or directory.
pub fn init_logging(level: &str, log_dir: &str) -> Result<(), String> {
    let level = normalize_level(level)?;
    let log_dir = normalize_log_dir(log_dir)?;

    if let Some(state) = LOGGING_STATE.get() {
        return state.ensure_same(level, &log_dir);
    }

    let state = LOGGING_STATE.get_or_try_init(|| start_logger(level, &log_dir))?;
    // A concurrent caller may have won the race with another configuration.
    state.ensure_same(level, &log_dir)
}

fn start_logger(level: &'static str, log_dir: &Path) -> Result<LoggingState, String> {
    std::fs::create_dir_all(log_dir).map_err(|err| {
        format!(
            "failed to create log directory `{}`: {err}",
            log_dir.display()
        )
    })?;

    let logger = Logger::try_with_str(level)
        .map_err(|err| format!("invalid log level `{level}`: {err}"))?
        .log_to_file(
            FileSpec::default()
                .directory(log_dir)
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(MAX_LOG_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|err| format!("failed to start logger: {err}"))?;

    install_panic_hook_once();

    info!(
        "event=runtime_start module=core status=ok platform={} version={}",
        std::env::consts::OS,
        env!("CARGO_PKG_VERSION")
    );
    info!(
        "event=logging_init module=core status=ok level={level} log_dir={}",
        log_dir.display()
    );

    Ok(LoggingState {
        level,
        log_dir: log_dir.to_path_buf(),
        _logger: logger,
    })
}

/// Returns `(level, log_dir)` when logging is active.
pub fn logging_status() -> Option<(&'static str, PathBuf)> {
    LOGGING_STATE
        .get()
        .map(|state| (state.level, state.log_dir.clone()))
}

/// `debug` for debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn normalize_level(level: &str) -> Result<&'static str, String> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(format!(
            "unsupported log level `{other}`; expected trace|debug|info|warn|error"
        )),
    }
}

fn normalize_log_dir(log_dir: &str) -> Result<PathBuf, String> {
    let trimmed = log_dir.trim();
    if trimmed.is_empty() {
        return Err("log_dir cannot be empty".to_string());
    }
    let path = Path::new(trimmed);
    if !path.is_absolute() {
        return Err(format!("log_dir must be an absolute path, got `{trimmed}`"));
    }
    Ok(path.to_path_buf())
}

fn install_panic_hook_once() {
    if PANIC_HOOK_INSTALLED.set(()).is_err() {
        return;
    }

    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        // Panic payloads may carry player-supplied text (chat, names).
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = if let Some(message) = panic_info.payload().downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = panic_info.payload().downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        error!(
            "event=panic_captured module=core status=error location={location} payload={}",
            sanitize_message(&payload, MAX_PANIC_PAYLOAD_CHARS)
        );
        previous_hook(panic_info);
    }));
}

fn sanitize_message(value: &str, max_chars: usize) -> String {
    let normalized = value.replace(['\n', '\r'], " ");
    let mut truncated = normalized.chars().take(max_chars).collect::<String>();
    if normalized.chars().count() > max_chars {
        truncated.push_str("...");
    }
    truncated
}

/// Renders `message` followed by ` key=value` pairs on one line.
pub fn format_with_metadata(message: &str, metadata: &[(&str, String)]) -> String {
    let mut line = sanitize_message(message, usize::MAX);
    for (key, value) in metadata {
        line.push(' ');
        line.push_str(key);
        line.push('=');
        line.push_str(&sanitize_message(value, MAX_METADATA_VALUE_CHARS));
    }
    line
}

/// Destination for extension log lines.
///
/// Implementations must swallow their own failures.
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, message: &str, metadata: &[(&str, String)]);

    /// Sink scoped to one extension, when the implementation supports scoping.
    fn child(&self, _scope: &str) -> Option<Arc<dyn LogSink>> {
        None
    }
}

/// Forwards to the `log` facade (and therefore to `init_logging`'s backend).
#[derive(Debug, Clone)]
pub struct FacadeLogSink {
    target: String,
}

impl FacadeLogSink {
    pub fn new() -> Self {
        Self {
            target: LOG_TARGET_ROOT.to_string(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Default for FacadeLogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for FacadeLogSink {
    fn log(&self, level: Level, message: &str, metadata: &[(&str, String)]) {
        log::log!(
            target: self.target.as_str(),
            level,
            "{}",
            format_with_metadata(message, metadata)
        );
    }

    fn child(&self, scope: &str) -> Option<Arc<dyn LogSink>> {
        Some(Arc::new(Self {
            target: format!("{}::{}", self.target, scope.to_lowercase()),
        }))
    }
}

/// Last-resort sink writing to stderr.
#[derive(Debug, Clone, Default)]
pub struct StderrLogSink {
    scope: Option<String>,
}

impl LogSink for StderrLogSink {
    fn log(&self, level: Level, message: &str, metadata: &[(&str, String)]) {
        let scope = self.scope.as_deref().unwrap_or(LOG_TARGET_ROOT);
        let _ = writeln!(
            std::io::stderr().lock(),
            "[{level}] {scope}: {}",
            format_with_metadata(message, metadata)
        );
    }

    fn child(&self, scope: &str) -> Option<Arc<dyn LogSink>> {
        Some(Arc::new(Self {
            scope: Some(scope.to_lowercase()),
        }))
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogSink;

impl LogSink for NoopLogSink {
    fn log(&self, _level: Level, _message: &str, _metadata: &[(&str, String)]) {}
}

#[cfg(test)]
mod tests {
    use super::{
        format_with_metadata, init_logging, logging_status, normalize_level, normalize_log_dir,
        sanitize_message, FacadeLogSink, LogSink,
    };
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_dir(suffix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be after unix epoch")
            .as_nanos();
        std::env::temp_dir().join(format!(
            "fragkit-logging-{suffix}-{}-{nanos}",
            std::process::id()
        ))
    }

    #[test]
    fn normalize_level_accepts_known_values() {
        assert_eq!(normalize_level("INFO").expect("INFO normalizes"), "info");
        assert_eq!(
            normalize_level(" warning ").expect("warning normalizes"),
            "warn"
        );
        assert!(normalize_level("verbose").is_err());
    }

    #[test]
    fn normalize_log_dir_rejects_relative_path() {
        let error = normalize_log_dir("logs/dev").expect_err("relative paths must be rejected");
        assert!(error.contains("absolute"));
    }

    #[test]
    fn sanitize_message_removes_newlines_and_truncates() {
        let sanitized = sanitize_message("line1\nline2\rline3", 8);
        assert!(!sanitized.contains('\n'));
        assert!(!sanitized.contains('\r'));
        assert!(sanitized.ends_with("..."));
    }

    #[test]
    fn metadata_renders_as_key_value_pairs() {
        let line = format_with_metadata(
            "event=promotion",
            &[("player", "p1".to_string()), ("rank", "Private\nX".to_string())],
        );
        assert_eq!(line, "event=promotion player=p1 rank=Private X");
    }

    #[test]
    fn facade_child_scopes_target() {
        let root = FacadeLogSink::new();
        assert_eq!(root.target(), "fragkit");
        // Child sinks are opaque trait objects; logging through one must not panic.
        let child = root.child("Ranks").expect("facade supports scoping");
        child.log(log::Level::Info, "event=test", &[]);
    }

    #[test]
    fn init_logging_is_idempotent_for_same_config_and_rejects_conflicts() {
        let log_dir = unique_temp_dir("idempotent");
        let log_dir_str = log_dir.to_str().expect("utf-8 temp dir").to_string();
        let second_dir = unique_temp_dir("different");
        let second_dir_str = second_dir.to_str().expect("utf-8 temp dir").to_string();

        init_logging("info", &log_dir_str).expect("first init should succeed");
        init_logging("info", &log_dir_str).expect("same config should be idempotent");

        let level_error =
            init_logging("debug", &log_dir_str).expect_err("level conflict should fail");
        assert!(level_error.contains("refusing to switch"));

        let dir_error =
            init_logging("info", &second_dir_str).expect_err("directory conflict should fail");
        assert!(dir_error.contains("refusing to switch"));

        let (active_level, active_dir) = logging_status().expect("logging should be active");
        assert_eq!(active_level, "info");
        assert_eq!(active_dir, log_dir);
    }
}
