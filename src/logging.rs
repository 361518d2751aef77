//! Tracing subscriber setup: a console handler plus an optional rotating
//! file handler, combined via a `registry()` of layers so the optional
//! file sink can be added without replacing the console one.

use std::path::Path;

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::model::LoggingConfig;

/// Held for the process lifetime: dropping it stops the file layer's
/// background flush thread.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// `RUST_LOG` always wins for the console layer; otherwise falls back to
/// `logging.console` from the config file.
pub fn init(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.console.clone()));
    let console_layer = fmt::layer().with_target(false).with_filter(console_filter);

    let (file_layer, file_guard) = match build_file_layer(config) {
        Some((layer, guard)) => (Some(layer), Some(guard)),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("initializing tracing subscriber: {e}"))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

fn build_file_layer<S>(config: &LoggingConfig) -> Option<(Box<dyn tracing_subscriber::Layer<S> + Send + Sync>, WorkerGuard)>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let file = config.file.as_ref()?;
    if file.disabled {
        return None;
    }

    let dir = file.path.parent().filter(|p| !p.as_os_str().is_empty());
    let dir = dir.unwrap_or_else(|| Path::new("."));
    let filename = file
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mcvisor.log".to_string());

    let appender = tracing_appender::rolling::daily(dir, filename);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::new(file.level.clone());
    let layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(writer)
        .with_filter(filter)
        .boxed();
    Some((layer, guard))
}
