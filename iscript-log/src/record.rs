//! Log records and levels

use std::fmt;
use std::str::FromStr;

/// Log level, ordered from most to least verbose
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Level {
    /// Per-token / per-instruction tracing
    Trace = 0,
    /// Phase internals
    Debug = 1,
    /// Phase boundaries
    Info = 2,
    /// Recoverable problems
    Warn = 3,
    /// Runtime errors, failed loads
    Error = 4,
}

impl Level {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Level::Trace),
            1 => Some(Level::Debug),
            2 => Some(Level::Info),
            3 => Some(Level::Warn),
            4 => Some(Level::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = crate::Error;

    /// Parses a level name. `silent` maps to `Error`, the quietest level.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Level::Trace),
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" | "silent" => Ok(Level::Error),
            _ => Err(crate::Error::UnknownLevel(s.to_string())),
        }
    }
}

/// A single log record
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// Unix timestamp in milliseconds
    pub timestamp_ms: u64,
    pub level: Level,
    /// Module path of the call site
    pub target: &'static str,
    pub message: String,
    /// Innermost span active when the record was written
    pub span_id: Option<u64>,
}

/// Phase targets recognized by [`Record::phase_target`], most specific first.
const PHASE_TARGETS: &[(&str, &str)] = &[
    ("lexer", "iscript::lexer"),
    ("parser", "iscript::parser"),
    ("generator", "iscript::generator"),
    ("binary", "iscript::binary"),
    ("heap", "iscript::gc"),
    ("runtime", "iscript::vm"),
];

impl Record {
    pub fn new(level: Level, target: &'static str, message: impl Into<String>) -> Self {
        Self {
            timestamp_ms: current_timestamp_ms(),
            level,
            target,
            message: message.into(),
            span_id: None,
        }
    }

    pub fn with_span(mut self, span_id: u64) -> Self {
        self.span_id = Some(span_id);
        self
    }

    /// Maps the module-path target onto the phase target used for filtering,
    /// e.g. `iscript_core::compiler::lexer` becomes `iscript::lexer`.
    pub fn phase_target(&self) -> &'static str {
        PHASE_TARGETS
            .iter()
            .find(|(needle, _)| self.target.contains(needle))
            .map(|(_, phase)| *phase)
            .unwrap_or("iscript")
    }

    /// Formats as `[hh:mm:ss.mmm] LEVEL target [span=N]: message`
    pub fn format(&self) -> String {
        let span_info = match self.span_id {
            Some(id) => format!(" [span={id}]"),
            None => String::new(),
        };

        format!(
            "[{}] {} {}{}: {}",
            format_timestamp(self.timestamp_ms),
            self.level,
            self.target,
            span_info,
            self.message
        )
    }
}

fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn format_timestamp(timestamp_ms: u64) -> String {
    let secs = timestamp_ms / 1000;
    let millis = timestamp_ms % 1000;

    let hours = (secs / 3600) % 24;
    let minutes = (secs / 60) % 60;
    let seconds = secs % 60;

    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_u8() {
        assert_eq!(Level::from_u8(0), Some(Level::Trace));
        assert_eq!(Level::from_u8(4), Some(Level::Error));
        assert_eq!(Level::from_u8(5), None);
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!("DEBUG".parse::<Level>().unwrap(), Level::Debug);
        assert_eq!("silent".parse::<Level>().unwrap(), Level::Error);
        assert!("chatty".parse::<Level>().is_err());
    }

    #[test]
    fn test_record_with_span() {
        let record = Record::new(Level::Debug, "test", "msg").with_span(42);
        assert_eq!(record.span_id, Some(42));
    }

    #[test]
    fn test_phase_target() {
        let lexer = Record::new(Level::Trace, "iscript_core::compiler::lexer", "tok");
        assert_eq!(lexer.phase_target(), "iscript::lexer");

        let vm = Record::new(Level::Info, "iscript_core::runtime::vm::execute", "op");
        assert_eq!(vm.phase_target(), "iscript::vm");

        let gc = Record::new(Level::Info, "iscript_core::runtime::heap", "sweep");
        assert_eq!(gc.phase_target(), "iscript::gc");

        let other = Record::new(Level::Info, "iscript_api", "run");
        assert_eq!(other.phase_target(), "iscript");
    }

    #[test]
    fn test_record_format() {
        let record = Record {
            timestamp_ms: 3600000 + 120000 + 3000 + 456,
            level: Level::Info,
            target: "iscript::lexer",
            message: String::from("token found"),
            span_id: Some(7),
        };

        let formatted = record.format();
        assert!(formatted.starts_with("[01:02:03.456]"));
        assert!(formatted.contains("INFO iscript::lexer [span=7]: token found"));
    }
}
