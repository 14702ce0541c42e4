//! Export logging
//!
//! `ExportLogger` is built from configuration and handed to each subsystem by
//! reference. Context payloads are redacted before they reach the `log` sink.

use log::{Level, LevelFilter};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Log target used for every record emitted by this crate
pub const LOG_TARGET: &str = "wealth_report_export";

const REDACTED: &str = "[REDACTED]";

static DEFAULT_SENSITIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|passwd|token|secret|api[_-]?key|authorization|cookie)").unwrap()
});

/// Logging section of the export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogConfig {
    /// off, error, warn, info, debug, trace
    pub level: String,
    /// Extra keys to mask, matched case-insensitively as substrings
    pub redact_keys: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            redact_keys: Vec::new(),
        }
    }
}

/// Which object keys get masked
#[derive(Debug, Clone, Default)]
pub struct RedactionRules {
    extra_keys: Vec<String>,
}

impl RedactionRules {
    pub fn new<I, S>(extra_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extra_keys: extra_keys
                .into_iter()
                .map(|k| k.into().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        if DEFAULT_SENSITIVE.is_match(key) {
            return true;
        }
        let key = key.to_lowercase();
        self.extra_keys.iter().any(|k| key.contains(k.as_str()))
    }
}

/// Mask sensitive values anywhere inside `value`.
pub fn redact(value: &Value, rules: &RedactionRules) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = if rules.is_sensitive(k) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact(v, rules)
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| redact(v, rules)).collect()),
        other => other.clone(),
    }
}

#[derive(Debug, Clone)]
pub struct ExportLogger {
    level: LevelFilter,
    rules: RedactionRules,
}

impl Default for ExportLogger {
    fn default() -> Self {
        Self::new(&LogConfig::default())
    }
}

impl ExportLogger {
    pub fn new(config: &LogConfig) -> Self {
        let level = config.level.parse::<LevelFilter>().unwrap_or_else(|_| {
            log::warn!(target: LOG_TARGET, "Unknown log level '{}', using info", config.level);
            LevelFilter::Info
        });
        Self {
            level,
            rules: RedactionRules::new(config.redact_keys.iter().cloned()),
        }
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    pub fn enabled(&self, level: Level) -> bool {
        level <= self.level
    }

    pub fn log(&self, level: Level, message: &str, context: Option<&Value>) {
        if !self.enabled(level) {
            return;
        }
        match context {
            Some(ctx) => {
                let ctx = redact(ctx, &self.rules);
                log::log!(target: LOG_TARGET, level, "{} {}", message, ctx);
            }
            None => log::log!(target: LOG_TARGET, level, "{}", message),
        }
    }

    pub fn debug(&self, message: &str, context: Option<&Value>) {
        self.log(Level::Debug, message, context);
    }

    pub fn info(&self, message: &str, context: Option<&Value>) {
        self.log(Level::Info, message, context);
    }

    pub fn warn(&self, message: &str, context: Option<&Value>) {
        self.log(Level::Warn, message, context);
    }

    pub fn error(&self, message: &str, context: Option<&Value>) {
        self.log(Level::Error, message, context);
    }
}
