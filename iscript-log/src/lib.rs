//! iscript-log - structured logging for the IScript toolchain
//!
//! The logger is passed explicitly (`Arc<Logger>`) to every phase object:
//! lexer, parser, generator and VM. There is no global logger, so two
//! virtual machines in the same process can log to different sinks.
//!
//! - **Explicit**: no hidden singleton, configuration travels with the value
//! - **Lazy**: the macros check the level before formatting anything
//! - **Recoverable**: a ring buffer keeps the last N records for post-mortem dumps
//!
//! # Quick start
//!
//! ```
//! use iscript_log::{debug, LogConfig, Level};
//!
//! let (logger, ring) = LogConfig::new(Level::Debug).with_ring_buffer(64).init();
//! debug!(logger, "script {} loaded", "main.is");
//! assert_eq!(ring.unwrap().len(), 1);
//! ```
//!
//! # Targets
//!
//! The macros use `module_path!()` as the record target. Sinks that need the
//! compilation phase (for example the CLI bridge into `tracing`) classify
//! records with [`Record::phase_target`].

mod config;
mod logger;
mod macros;
mod record;
mod ring_buffer;
mod span;

pub use config::{LogConfig, OutputConfig};
pub use logger::{FileSink, LogSink, Logger, SpanGuard, StderrSink, StdoutSink};
pub use record::{Level, Record};
pub use ring_buffer::{LogRingBuffer, RingBufferStats};
pub use span::{Span, SpanId};

/// Logging result type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while configuring sinks
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A file sink could not be opened
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// A level name could not be parsed
    #[error("unknown log level '{0}'")]
    UnknownLevel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Error > Level::Warn);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            format!("{}", Error::UnknownLevel("loud".into())),
            "unknown log level 'loud'"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(format!("{err}").contains("IO error"));
    }
}
