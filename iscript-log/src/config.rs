//! One-shot logger construction

use crate::logger::{FileSink, StderrSink, StdoutSink};
use crate::{Level, LogRingBuffer, Logger};
use std::sync::Arc;

/// Where records go
#[derive(Clone, Debug, PartialEq)]
pub enum OutputConfig {
    Stdout,
    Stderr,
    /// Append to the file at this path
    File(String),
    /// Keep the last N records in memory
    RingBuffer(usize),
}

/// Logger configuration
///
/// ```
/// use iscript_log::{LogConfig, Level};
///
/// let (logger, ring) = LogConfig::new(Level::Debug).with_ring_buffer(1000).init();
/// assert!(logger.is_enabled(Level::Debug));
/// assert!(ring.is_some());
/// ```
#[derive(Clone, Debug)]
pub struct LogConfig {
    pub level: Level,
    pub outputs: Vec<OutputConfig>,
}

impl LogConfig {
    /// Given level, no outputs
    pub fn new(level: Level) -> Self {
        LogConfig {
            level,
            outputs: Vec::new(),
        }
    }

    /// Debug level to stdout, plus a 10000-record ring buffer
    pub fn dev() -> Self {
        LogConfig {
            level: Level::Debug,
            outputs: vec![OutputConfig::Stdout, OutputConfig::RingBuffer(10000)],
        }
    }

    /// Warn level to stderr, plus a 1000-record ring buffer
    pub fn production() -> Self {
        LogConfig {
            level: Level::Warn,
            outputs: vec![OutputConfig::Stderr, OutputConfig::RingBuffer(1000)],
        }
    }

    /// Silent
    pub fn test() -> Self {
        LogConfig::new(Level::Error)
    }

    pub fn with_stdout(mut self) -> Self {
        if !self.outputs.contains(&OutputConfig::Stdout) {
            self.outputs.push(OutputConfig::Stdout);
        }
        self
    }

    pub fn with_stderr(mut self) -> Self {
        if !self.outputs.contains(&OutputConfig::Stderr) {
            self.outputs.push(OutputConfig::Stderr);
        }
        self
    }

    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.outputs.push(OutputConfig::File(path.into()));
        self
    }

    /// Replaces any existing ring buffer output
    pub fn with_ring_buffer(mut self, capacity: usize) -> Self {
        self.outputs
            .retain(|output| !matches!(output, OutputConfig::RingBuffer(_)));
        self.outputs.push(OutputConfig::RingBuffer(capacity));
        self
    }

    /// Builds the logger. File outputs that cannot be opened are skipped;
    /// use [`LogConfig::try_init`] to surface the error instead.
    pub fn init(self) -> (Arc<Logger>, Option<Arc<LogRingBuffer>>) {
        let logger = Logger::new(self.level);
        let mut ring = None;

        for output in self.outputs {
            match output {
                OutputConfig::Stdout => logger.add_sink(StdoutSink),
                OutputConfig::Stderr => logger.add_sink(StderrSink),
                OutputConfig::File(path) => {
                    if let Ok(sink) = FileSink::new(&path) {
                        logger.add_sink(sink);
                    }
                }
                OutputConfig::RingBuffer(capacity) => {
                    let buffer = LogRingBuffer::new(capacity);
                    logger.add_sink(buffer.clone());
                    ring = Some(buffer);
                }
            }
        }

        (logger, ring)
    }

    /// Like [`LogConfig::init`] but fails if a file sink cannot be opened
    pub fn try_init(self) -> crate::Result<(Arc<Logger>, Option<Arc<LogRingBuffer>>)> {
        for output in &self.outputs {
            if let OutputConfig::File(path) = output {
                FileSink::new(path)?;
            }
        }
        Ok(self.init())
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig::new(Level::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(LogConfig::dev().level, Level::Debug);
        assert_eq!(LogConfig::production().level, Level::Warn);
        assert!(LogConfig::test().outputs.is_empty());
    }

    #[test]
    fn test_with_ring_buffer_replaces() {
        let config = LogConfig::new(Level::Info)
            .with_ring_buffer(10)
            .with_ring_buffer(20);
        assert_eq!(config.outputs, vec![OutputConfig::RingBuffer(20)]);
    }

    #[test]
    fn test_init_with_ring_buffer() {
        let (logger, ring) = LogConfig::new(Level::Info).with_ring_buffer(8).init();
        logger.log(Level::Info, "t", "hello");
        assert_eq!(ring.unwrap().messages(), vec!["hello"]);
    }

    #[test]
    fn test_stdout_dedup() {
        let config = LogConfig::new(Level::Info).with_stdout().with_stdout();
        assert_eq!(config.outputs.len(), 1);
    }
}
