//! Report configuration.
//!
//! [`ReportConfig`] carries the knobs of a report: stack-walk limits, the
//! thread-pause budget, where external debug metadata lives and where the
//! fault handler writes its report. Defaults work for most programs;
//! [`ReportConfig::from_env`] lets operators adjust them without recompiling.
//!
//! | Variable                          | Field                        | Default   |
//! |-----------------------------------|------------------------------|-----------|
//! | `POSTMORTEM_MAX_FRAMES`           | `max_frames`                 | 256       |
//! | `POSTMORTEM_WALK_ALL_THREADS`     | `walk_threads_on_unresolved` | `false`   |
//! | `POSTMORTEM_SUSPEND_TIMEOUT_MS`   | `suspend_timeout`            | 250 ms    |
//! | `POSTMORTEM_DEBUG_FILE`           | `debug_file_name`            | `<exe>.debug` |
//! | `POSTMORTEM_REPORT_PATH`          | `report_path`                | stderr    |
//! | `POSTMORTEM_SOURCE_LINES`         | `source_lines`               | `true`    |
//!
//! Values that fail to parse are ignored with a warning.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

pub const MAX_FRAMES_ENV: &str = "POSTMORTEM_MAX_FRAMES";
pub const WALK_ALL_THREADS_ENV: &str = "POSTMORTEM_WALK_ALL_THREADS";
pub const SUSPEND_TIMEOUT_ENV: &str = "POSTMORTEM_SUSPEND_TIMEOUT_MS";
pub const DEBUG_FILE_ENV: &str = "POSTMORTEM_DEBUG_FILE";
pub const REPORT_PATH_ENV: &str = "POSTMORTEM_REPORT_PATH";
pub const SOURCE_LINES_ENV: &str = "POSTMORTEM_SOURCE_LINES";

/// Settings for one crash reporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportConfig
{
    /// Upper bound on frames per stack walk.
    pub max_frames: usize,
    /// Walk the other threads even when the primary stack hit a frame without symbols.
    pub walk_threads_on_unresolved: bool,
    /// How long a thread may stay paused while its registers are captured.
    pub suspend_timeout: Duration,
    /// File name of external debug metadata for the main executable, looked up
    /// next to it. `None` means `<executable file name>.debug`.
    pub debug_file_name: Option<String>,
    /// Where the installed fault handler writes the full report. `None` means stderr.
    pub report_path: Option<PathBuf>,
    /// Resolve source file and line for each frame.
    pub source_lines: bool,
}

impl Default for ReportConfig
{
    fn default() -> Self
    {
        Self {
            max_frames: 256,
            walk_threads_on_unresolved: false,
            suspend_timeout: Duration::from_millis(250),
            debug_file_name: None,
            report_path: None,
            source_lines: true,
        }
    }
}

impl ReportConfig
{
    /// Defaults overridden by the `POSTMORTEM_*` environment variables.
    pub fn from_env() -> Self
    {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable name.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(frames) = parse_var(&lookup, MAX_FRAMES_ENV, |v| v.parse::<usize>().ok().filter(|n| *n > 0)) {
            config.max_frames = frames;
        }
        if let Some(walk) = parse_var(&lookup, WALK_ALL_THREADS_ENV, parse_bool) {
            config.walk_threads_on_unresolved = walk;
        }
        if let Some(millis) = parse_var(&lookup, SUSPEND_TIMEOUT_ENV, |v| v.parse::<u64>().ok()) {
            config.suspend_timeout = Duration::from_millis(millis);
        }
        if let Some(lines) = parse_var(&lookup, SOURCE_LINES_ENV, parse_bool) {
            config.source_lines = lines;
        }
        config.debug_file_name = lookup(DEBUG_FILE_ENV).filter(|v| !v.is_empty());
        config.report_path = lookup(REPORT_PATH_ENV).filter(|v| !v.is_empty()).map(PathBuf::from);

        config
    }

    /// Builder-style override of `max_frames`.
    pub fn with_max_frames(mut self, max_frames: usize) -> Self
    {
        self.max_frames = max_frames;
        self
    }

    /// Builder-style override of `walk_threads_on_unresolved`.
    pub fn with_walk_threads_on_unresolved(mut self, walk: bool) -> Self
    {
        self.walk_threads_on_unresolved = walk;
        self
    }

    pub fn with_report_path(mut self, path: impl Into<PathBuf>) -> Self
    {
        self.report_path = Some(path.into());
        self
    }
}

fn parse_var<T, F, P>(lookup: &F, key: &str, parse: P) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Option<T>,
{
    let raw = lookup(key)?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        warn!(variable = key, value = %raw, "ignoring invalid configuration value");
    }
    parsed
}

fn parse_bool(value: &str) -> Option<bool>
{
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
