//! Rolling file logs for the editor core.
//!
//! # Responsibility
//! - Start one flexi_logger file sink per process.
//! - Route panics through the log before the default hook runs.
//!
//! # Invariants
//! - Repeating [`init_logging`] with identical settings is a no-op; any
//!   other settings are rejected instead of silently ignored.
//! - Log lines carry keys, ids and counts only. Document text and blob
//!   payloads stay out of the log.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};

const LOG_BASENAME: &str = "recipedesk";
const ROTATE_AT_BYTES: u64 = 4 * 1024 * 1024;
const KEEP_FILES: usize = 8;
const PANIC_TEXT_LIMIT: usize = 120;
const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

/// Validated logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LogSettings {
    level: &'static str,
    dir: PathBuf,
}

impl LogSettings {
    fn parse(level: &str, dir: &str) -> Result<Self, String> {
        Ok(Self {
            level: parse_level(level)?,
            dir: parse_dir(dir)?,
        })
    }

    /// Describes why `requested` cannot replace these settings.
    fn conflict(&self, requested: &Self) -> Option<String> {
        if self.dir != requested.dir {
            return Some(format!(
                "logging already writes to `{}`; cannot move it to `{}`",
                self.dir.display(),
                requested.dir.display()
            ));
        }
        if self.level != requested.level {
            return Some(format!(
                "logging already runs at `{}`; cannot change it to `{}`",
                self.level, requested.level
            ));
        }
        None
    }
}

struct ActiveLogger {
    settings: LogSettings,
    _handle: LoggerHandle,
}

/// Starts file logging at `level` below the absolute directory `log_dir`.
///
/// # Errors
/// Unknown level, blank or relative directory, directory creation failure,
/// or logging already active with different settings.
pub fn init_logging(level: &str, log_dir: &str) -> Result<(), String> {
    let requested = LogSettings::parse(level, log_dir)?;
    let active = ACTIVE.get_or_try_init(|| start(requested.clone()))?;
    match active.settings.conflict(&requested) {
        Some(message) => Err(message),
        None => Ok(()),
    }
}

/// `(level, directory)` of the running logger, if any.
pub fn logging_status() -> Option<(&'static str, PathBuf)> {
    ACTIVE
        .get()
        .map(|active| (active.settings.level, active.settings.dir.clone()))
}

/// `debug` for debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn start(settings: LogSettings) -> Result<ActiveLogger, String> {
    std::fs::create_dir_all(&settings.dir)
        .map_err(|err| format!("cannot create `{}`: {err}", settings.dir.display()))?;
    let handle = file_logger(&settings.dir, settings.level)?;
    hook_panics();

    info!(
        "event=editor_start module=core status=ok os={} version={} level={}",
        std::env::consts::OS,
        env!("CARGO_PKG_VERSION"),
        settings.level
    );
    Ok(ActiveLogger {
        settings,
        _handle: handle,
    })
}

fn file_logger(dir: &Path, level: &str) -> Result<LoggerHandle, String> {
    Logger::try_with_str(level)
        .map_err(|err| format!("logger rejected level `{level}`: {err}"))?
        .log_to_file(FileSpec::default().directory(dir).basename(LOG_BASENAME))
        .rotate(
            Criterion::Size(ROTATE_AT_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(KEEP_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|err| format!("logger did not start: {err}"))
}

fn parse_level(level: &str) -> Result<&'static str, String> {
    let wanted = level.trim().to_ascii_lowercase();
    let wanted = if wanted == "warning" { "warn" } else { wanted.as_str() };
    LEVELS
        .iter()
        .copied()
        .find(|known| *known == wanted)
        .ok_or_else(|| format!("unknown log level `{}`", level.trim()))
}

fn parse_dir(dir: &str) -> Result<PathBuf, String> {
    let dir = dir.trim();
    if dir.is_empty() {
        return Err("log directory is blank".to_string());
    }
    let path = PathBuf::from(dir);
    if path.is_relative() {
        return Err(format!("log directory `{dir}` is not absolute"));
    }
    Ok(path)
}

fn hook_panics() {
    if PANIC_HOOK.set(()).is_err() {
        return;
    }
    let chained = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map_or_else(|| "unknown".to_string(), |at| format!("{}:{}", at.file(), at.line()));
        let text = info
            .payload()
            .downcast_ref::<&str>()
            .map(|text| (*text).to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "<opaque>".to_string());
        error!(
            "event=panic module=core status=error location={} message={}",
            location,
            one_line(&text, PANIC_TEXT_LIMIT)
        );
        chained(info);
    }));
}

/// Flattens `text` onto one line and caps it at `limit` characters.
fn one_line(text: &str, limit: usize) -> String {
    let flat: String = text
        .chars()
        .map(|ch| if ch == '\n' || ch == '\r' { ' ' } else { ch })
        .collect();
    if flat.chars().count() <= limit {
        return flat;
    }
    let mut capped: String = flat.chars().take(limit).collect();
    capped.push_str("...");
    capped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_normalized() {
        assert_eq!(parse_level(" Info ").unwrap(), "info");
        assert_eq!(parse_level("WARNING").unwrap(), "warn");
        assert!(parse_level("loud").is_err());
    }

    #[test]
    fn directory_must_be_absolute() {
        assert!(parse_dir("").is_err());
        assert!(parse_dir("recipes/logs").unwrap_err().contains("not absolute"));
    }

    #[test]
    fn panic_text_is_flattened() {
        let text = one_line("boil\nsimmer\rserve hot", 8);
        assert_eq!(text, "boil sim...");
        assert_eq!(one_line("short", 8), "short");
    }

    #[test]
    fn second_init_must_match_first() {
        let first = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let first_dir = first.path().to_str().unwrap();

        init_logging("info", first_dir).unwrap();
        init_logging("INFO", first_dir).unwrap();
        assert!(init_logging("trace", first_dir)
            .unwrap_err()
            .contains("cannot change"));
        assert!(init_logging("info", other.path().to_str().unwrap())
            .unwrap_err()
            .contains("cannot move"));

        let (level, dir) = logging_status().unwrap();
        assert_eq!(level, "info");
        assert_eq!(dir, first.path());
    }
}
