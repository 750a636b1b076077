//! Level macros for the toolchain phases
//!
//! Every macro records the calling module's path as the record target. Sinks
//! turn that into a phase target with [`Record::phase_target`](crate::Record::phase_target),
//! so a call from `iscript_core::compiler::lexer` files under `iscript::lexer`
//! and one from `iscript_core::runtime::heap` under `iscript::gc`. Arguments
//! use `format!` syntax and are not formatted unless the logger admits the
//! level, which keeps per-instruction tracing in the VM loop cheap when off.

/// Per-token and per-instruction detail
///
/// ```ignore
/// trace!(self.logger, "@{} {}", pc, instruction);
/// ```
#[macro_export]
macro_rules! trace {
    ($logger:expr, $($arg:tt)*) => {
        $crate::log!($logger, $crate::Level::Trace, $($arg)*)
    };
}

/// Phase summaries: token, symbol and instruction counts, collections
#[macro_export]
macro_rules! debug {
    ($logger:expr, $($arg:tt)*) => {
        $crate::log!($logger, $crate::Level::Debug, $($arg)*)
    };
}

/// Context and class lifecycle
#[macro_export]
macro_rules! info {
    ($logger:expr, $($arg:tt)*) => {
        $crate::log!($logger, $crate::Level::Info, $($arg)*)
    };
}

#[macro_export]
macro_rules! warn {
    ($logger:expr, $($arg:tt)*) => {
        $crate::log!($logger, $crate::Level::Warn, $($arg)*)
    };
}

/// Runtime errors that terminate a context
#[macro_export]
macro_rules! error {
    ($logger:expr, $($arg:tt)*) => {
        $crate::log!($logger, $crate::Level::Error, $($arg)*)
    };
}

/// Expansion behind the level macros; `$logger` is anything with
/// `is_enabled` and `log`, usually an `Arc<Logger>`.
#[macro_export]
macro_rules! log {
    ($logger:expr, $level:expr, $($arg:tt)*) => {{
        if $logger.is_enabled($level) {
            $logger.log($level, module_path!(), ::std::format!($($arg)*));
        }
    }};
}

#[cfg(test)]
mod tests {
    use crate::{Level, LogRingBuffer, Logger};

    mod lexer {
        use crate::Logger;

        pub fn scan(logger: &Logger, tokens: usize) {
            debug!(logger, "lexed {} tokens", tokens);
        }
    }

    #[test]
    fn test_target_is_calling_module() {
        let ring = LogRingBuffer::new(16);
        let logger = Logger::new(Level::Trace).with_sink(ring.clone());

        trace!(logger, "fetch @{}", 7);
        lexer::scan(&logger, 4);

        let records = ring.dump_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].target, "iscript_log::macros::tests");
        assert_eq!(records[0].phase_target(), "iscript");
        assert_eq!(records[0].message, "fetch @7");
        assert_eq!(records[1].phase_target(), "iscript::lexer");
        assert_eq!(records[1].message, "lexed 4 tokens");
    }

    #[test]
    fn test_level_filtering_in_macros() {
        let ring = LogRingBuffer::new(16);
        let logger = Logger::new(Level::Warn).with_sink(ring.clone());

        trace!(logger, "per instruction");
        debug!(logger, "symbol pass");
        info!(logger, "context loaded");
        warn!(logger, "pointless statement");
        error!(logger, "context terminated");

        let levels: Vec<Level> = ring.dump_records().iter().map(|r| r.level).collect();
        assert_eq!(levels, vec![Level::Warn, Level::Error]);
    }

    #[test]
    fn test_disabled_level_skips_formatting() {
        struct Loud;
        impl std::fmt::Display for Loud {
            fn fmt(&self, _: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                panic!("formatted while disabled");
            }
        }

        let logger = Logger::new(Level::Error);
        debug!(logger, "{}", Loud);
    }
}
