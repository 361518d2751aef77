// The miette/thiserror derive macros generate code that triggers false
// positive unused_assignments warnings on enum variant fields.
#![allow(unused_assignments)]

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::config::model::McvisorConfig;

// ---------------------------------------------------------------------------
// ConfigDiagnostic — miette-powered validation error carrying a source span
// into the raw JSON document, so a reported problem points straight at the
// offending field.
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigDiagnostic {
    #[error("minecraft.server.jar must not be empty")]
    #[diagnostic(code(mcvisor::empty_server_jar))]
    EmptyServerJar {
        #[source_code]
        src: NamedSource<String>,
        #[label("jar path is empty")]
        span: SourceSpan,
    },

    #[error("minecraft.server.network.pingPeriod must be greater than zero")]
    #[diagnostic(code(mcvisor::zero_ping_period))]
    ZeroPingPeriod {
        #[source_code]
        src: NamedSource<String>,
        #[label("pingPeriod is zero")]
        span: SourceSpan,
    },

    #[error("discord.commandPrefix must not be empty")]
    #[diagnostic(code(mcvisor::empty_command_prefix))]
    EmptyCommandPrefix {
        #[source_code]
        src: NamedSource<String>,
        #[label("commandPrefix is empty")]
        span: SourceSpan,
        #[help]
        advice: String,
    },

    #[error("{field} is not a recognized log level: `{value}`")]
    #[diagnostic(code(mcvisor::invalid_log_level))]
    InvalidLogLevel {
        #[source_code]
        src: NamedSource<String>,
        #[label("unrecognized level")]
        span: SourceSpan,
        field: String,
        value: String,
        #[help]
        advice: String,
    },

    #[error("discord.notifications has an empty category name")]
    #[diagnostic(code(mcvisor::empty_notification_category))]
    EmptyNotificationCategory {
        #[source_code]
        src: NamedSource<String>,
        #[label("empty category")]
        span: SourceSpan,
    },
}

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

fn is_valid_level(value: &str) -> bool {
    VALID_LEVELS.contains(&value.to_ascii_lowercase().as_str())
}

// ---------------------------------------------------------------------------
// JSON source spans — located by substring search over the raw document
// text: good enough for pointing an editor at the right line, not a full
// JSON AST walk.
// ---------------------------------------------------------------------------

/// Span of the value following `"key": <value>` the first time `key` occurs
/// in `source`. Falls back to spanning the whole document when the key
/// can't be found (e.g. it was defaulted rather than present in the file).
fn find_value_span(source: &str, key: &str) -> SourceSpan {
    let needle = format!("\"{key}\"");
    let Some(key_pos) = source.find(&needle) else {
        return (0, source.len().min(1)).into();
    };
    let after_key = &source[key_pos + needle.len()..];
    let Some(colon_rel) = after_key.find(':') else {
        return (key_pos, needle.len()).into();
    };
    let value_start_rel = colon_rel + 1;
    let value_region = &after_key[value_start_rel..];
    let trimmed_offset = value_region.len() - value_region.trim_start().len();
    let value_start = key_pos + needle.len() + value_start_rel + trimmed_offset;

    let trimmed = value_region.trim_start();
    let len = if trimmed.starts_with('"') {
        trimmed[1..]
            .find('"')
            .map(|end| end + 2)
            .unwrap_or(trimmed.len())
    } else {
        trimmed
            .find(|c: char| c == ',' || c == '}' || c == ']' || c.is_whitespace())
            .unwrap_or(trimmed.len())
    };
    (value_start, len.max(1)).into()
}

pub fn validate(
    config: &McvisorConfig,
    source: &str,
    filename: &str,
) -> Result<(), Vec<ConfigDiagnostic>> {
    let mut errors = Vec::new();
    let src = || NamedSource::new(filename, source.to_string());

    if config.minecraft.server.jar.as_os_str().is_empty() {
        errors.push(ConfigDiagnostic::EmptyServerJar {
            src: src(),
            span: find_value_span(source, "jar"),
        });
    }

    // A port of 0 is not an error: it's the signal `PingStrategy::resolve`
    // uses to derive the real port from the child's own server.properties.
    if config.minecraft.server.network.ping_period.is_zero() {
        errors.push(ConfigDiagnostic::ZeroPingPeriod {
            src: src(),
            span: find_value_span(source, "pingPeriod"),
        });
    }

    if config.discord.command_prefix.is_empty() {
        errors.push(ConfigDiagnostic::EmptyCommandPrefix {
            src: src(),
            span: find_value_span(source, "commandPrefix"),
            advice: "set discord.commandPrefix to a short prefix like \"!\"".to_string(),
        });
    }

    if !is_valid_level(&config.logging.console) {
        errors.push(ConfigDiagnostic::InvalidLogLevel {
            src: src(),
            span: find_value_span(source, "console"),
            field: "logging.console".to_string(),
            value: config.logging.console.clone(),
            advice: "use one of trace, debug, info, warn, error".to_string(),
        });
    }

    if let Some(file) = &config.logging.file {
        if !is_valid_level(&file.level) {
            errors.push(ConfigDiagnostic::InvalidLogLevel {
                src: src(),
                span: find_value_span(source, "level"),
                field: "logging.file.level".to_string(),
                value: file.level.clone(),
                advice: "use one of trace, debug, info, warn, error".to_string(),
            });
        }
    }

    for category in config.discord.notifications.keys() {
        if category.is_empty() {
            errors.push(ConfigDiagnostic::EmptyNotificationCategory {
                src: src(),
                span: find_value_span(source, "notifications"),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
