use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_JSON_LOG_FILE: &str = "answer-stream.logs.jsonl";

/// Logging settings resolved from `ANSWER_STREAM_*` variables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservabilitySettings {
    pub enabled: bool,
    /// Filter directive from `ANSWER_STREAM_LOG_LEVEL`, if set.
    pub level: Option<String>,
    /// JSONL destination; console output to stderr when `None`.
    pub json_log_path: Option<PathBuf>,
}

impl ObservabilitySettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = [
            "ANSWER_STREAM_OBSERVABILITY_ENABLED",
            "ANSWER_STREAM_OBSERVABILITY",
        ]
        .into_iter()
        .find_map(&lookup)
        .map(|value| parse_bool_env(&value).unwrap_or(true))
        .unwrap_or(true);
        Self {
            enabled,
            level: lookup("ANSWER_STREAM_LOG_LEVEL").filter(|v| !v.trim().is_empty()),
            json_log_path: lookup("ANSWER_STREAM_JSON_LOG_PATH")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        if let Some(level) = &self.level
            && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
        {
            return filter;
        }
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    }
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Installs the process-wide tracing subscriber once.
///
/// Environment variables:
/// - `ANSWER_STREAM_OBSERVABILITY_ENABLED` / `ANSWER_STREAM_OBSERVABILITY`: enable flag (default on).
/// - `ANSWER_STREAM_LOG_LEVEL`: filter override; otherwise `RUST_LOG`, otherwise `info`.
/// - `ANSWER_STREAM_JSON_LOG_PATH`: write JSON lines to this file instead of the console.
///
/// Console output goes to stderr so streamed answers on stdout stay clean.
pub fn init_observability() {
    INIT.get_or_init(|| install(ObservabilitySettings::from_env()));
}

fn install(settings: ObservabilitySettings) {
    if !settings.enabled {
        return;
    }
    let env_filter = settings.env_filter();
    match &settings.json_log_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                let _ = std::fs::create_dir_all(parent);
            }
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(DEFAULT_JSON_LOG_FILE);
            let writer = tracing_appender::rolling::never(dir, file_name);
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_target(false)
                .with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init();
        }
        None => {
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
        }
    }
}
