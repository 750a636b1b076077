//! Bridges the core logger into `tracing`
//!
//! Every record is re-emitted under its phase target (`iscript::lexer`,
//! `iscript::vm`, ...), and `tracing-subscriber` filters per target.

use crate::config::{from_tracing, CliError, LogConfig};
use iscript_config::Phase;
use iscript_log::{Level, LogSink, Logger, Record};
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{
    filter::Targets, fmt, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt,
    Layer, Registry,
};

/// Console log format
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Multi-line and colored
    Pretty,
    Compact,
    /// One JSON object per line
    Json,
}

macro_rules! forward {
    ($target:literal, $record:ident) => {
        match $record.level {
            Level::Trace => tracing::trace!(target: $target, span = ?$record.span_id, "{}", $record.message),
            Level::Debug => tracing::debug!(target: $target, span = ?$record.span_id, "{}", $record.message),
            Level::Info => tracing::info!(target: $target, span = ?$record.span_id, "{}", $record.message),
            Level::Warn => tracing::warn!(target: $target, span = ?$record.span_id, "{}", $record.message),
            Level::Error => tracing::error!(target: $target, span = ?$record.span_id, "{}", $record.message),
        }
    };
}

/// `LogSink` re-emitting records as `tracing` events
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, record: &Record) {
        // tracing targets must be literals
        match record.phase_target() {
            "iscript::lexer" => forward!("iscript::lexer", record),
            "iscript::parser" => forward!("iscript::parser", record),
            "iscript::generator" => forward!("iscript::generator", record),
            "iscript::binary" => forward!("iscript::binary", record),
            "iscript::vm" => forward!("iscript::vm", record),
            "iscript::gc" => forward!("iscript::gc", record),
            _ => forward!("iscript", record),
        }
    }
}

/// Per-phase filter built from the CLI levels
pub fn targets(config: &LogConfig) -> Targets {
    Phase::ALL
        .iter()
        .fold(Targets::new().with_default(config.global), |targets, &phase| {
            targets.with_target(phase.target(), config.level_for(phase))
        })
}

/// Installs the global subscriber writing to stderr (and `file`, if given)
/// and returns a core logger feeding it.
pub fn init(
    config: &LogConfig,
    format: LogFormat,
    file: Option<&Path>,
) -> Result<Arc<Logger>, CliError> {
    let filter = targets(config);
    let console = format_layer::<Registry, _>(format, io::stderr).with_filter(filter.clone());

    let file_layer = match file {
        Some(path) => {
            let handle = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| CliError::LogFile {
                    path: path.to_path_buf(),
                    source,
                })?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(handle))
                    .with_filter(filter),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|_| CliError::LoggingInitialized)?;

    Ok(Logger::new(from_tracing(config.most_verbose())).with_sink(TracingSink))
}

fn format_layer<S, W>(format: LogFormat, make_writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_target(true)
            .with_writer(make_writer)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .without_time()
            .with_writer(make_writer)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_writer(make_writer)
            .boxed(),
    }
}
