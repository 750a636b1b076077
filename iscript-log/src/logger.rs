//! Logger and sinks

use crate::record::{Level, Record};
use crate::span::{Span, SpanId};
use std::io::Write;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Destination for log records
pub trait LogSink: Send + Sync {
    fn write(&self, record: &Record);
}

/// Leveled logger fanning records out to its sinks
pub struct Logger {
    level: AtomicU8,
    sinks: Mutex<Vec<Box<dyn LogSink>>>,
    span_stack: Mutex<Vec<Span>>,
    next_span_id: AtomicU64,
}

/// Locks ignoring poison: a panicking sink must not silence the logger.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Logger {
    pub fn new(level: Level) -> Arc<Self> {
        Arc::new(Logger {
            level: AtomicU8::new(level as u8),
            sinks: Mutex::new(Vec::new()),
            span_stack: Mutex::new(Vec::new()),
            next_span_id: AtomicU64::new(1),
        })
    }

    /// Builder-style sink registration
    pub fn with_sink<S: LogSink + 'static>(self: Arc<Self>, sink: S) -> Arc<Self> {
        self.add_sink(sink);
        self
    }

    pub fn add_sink<S: LogSink + 'static>(&self, sink: S) {
        lock(&self.sinks).push(Box::new(sink));
    }

    pub fn set_level(&self, level: Level) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    pub fn level(&self) -> Level {
        Level::from_u8(self.level.load(Ordering::Relaxed)).unwrap_or(Level::Info)
    }

    pub fn is_enabled(&self, level: Level) -> bool {
        level >= self.level()
    }

    /// Writes one record to every sink. Prefer the macros, which skip
    /// formatting for disabled levels.
    #[inline(never)]
    pub fn log(&self, level: Level, target: &'static str, message: impl Into<String>) {
        if !self.is_enabled(level) {
            return;
        }

        let mut record = Record::new(level, target, message);
        if let Some(span) = lock(&self.span_stack).last() {
            record = record.with_span(span.id.0);
        }

        for sink in lock(&self.sinks).iter() {
            sink.write(&record);
        }
    }

    /// Enters a span; records written until the guard drops carry its id.
    pub fn enter_span(self: &Arc<Self>, name: &'static str) -> SpanGuard {
        let id = SpanId(self.next_span_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.span_stack).push(Span::new(id, name));

        SpanGuard {
            logger: Arc::clone(self),
            id,
        }
    }

    pub fn span_depth(&self) -> usize {
        lock(&self.span_stack).len()
    }

    /// Name of the innermost span, if any
    pub fn current_span(&self) -> Option<&'static str> {
        lock(&self.span_stack).last().map(|span| span.name)
    }

    /// A logger with no sinks, used as the default for every phase object
    pub fn noop() -> Arc<Self> {
        Self::new(Level::Error)
    }
}

/// Pops its span when dropped
pub struct SpanGuard {
    logger: Arc<Logger>,
    id: SpanId,
}

impl SpanGuard {
    pub fn id(&self) -> SpanId {
        self.id
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        let mut stack = lock(&self.logger.span_stack);
        if let Some(position) = stack.iter().rposition(|span| span.id == self.id) {
            stack.remove(position);
        }
    }
}

impl LogSink for Arc<Logger> {
    fn write(&self, record: &Record) {
        self.log(record.level, record.target, record.message.clone());
    }
}

/// Writes formatted records to stdout
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn write(&self, record: &Record) {
        println!("{}", record.format());
    }
}

/// Writes formatted records to stderr
pub struct StderrSink;

impl LogSink for StderrSink {
    fn write(&self, record: &Record) {
        eprintln!("{}", record.format());
    }
}

/// Appends formatted records to a file
pub struct FileSink {
    file: Mutex<std::fs::File>,
}

impl FileSink {
    pub fn new(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        Ok(FileSink {
            file: Mutex::new(file),
        })
    }
}

impl LogSink for FileSink {
    fn write(&self, record: &Record) {
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{}", record.format());
        }
    }
}
