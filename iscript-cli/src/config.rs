//! CLI configuration: per-phase log levels and the `iscript.json` project file

use iscript_config::Phase;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::Level;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("'{}' not found; create it with an \"entry\" field", .0.display())]
    ProjectMissing(PathBuf),

    #[error("cannot read '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid project file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("'entry' in '{}' must not be empty", .0.display())]
    EmptyEntry(PathBuf),

    #[error("unknown log level '{0}'")]
    UnknownLevel(String),

    #[error("cannot open log file '{}': {source}", .path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("logging already initialized")]
    LoggingInitialized,
}

/// Parses a level name, accepting `silent` for error-only output
pub fn parse_level(s: &str) -> Result<Level, CliError> {
    iscript_log::Level::from_str(s)
        .map(to_tracing)
        .map_err(|_| CliError::UnknownLevel(s.to_string()))
}

pub fn to_tracing(level: iscript_log::Level) -> Level {
    match level {
        iscript_log::Level::Trace => Level::TRACE,
        iscript_log::Level::Debug => Level::DEBUG,
        iscript_log::Level::Info => Level::INFO,
        iscript_log::Level::Warn => Level::WARN,
        iscript_log::Level::Error => Level::ERROR,
    }
}

pub fn from_tracing(level: Level) -> iscript_log::Level {
    if level == Level::TRACE {
        iscript_log::Level::Trace
    } else if level == Level::DEBUG {
        iscript_log::Level::Debug
    } else if level == Level::INFO {
        iscript_log::Level::Info
    } else if level == Level::WARN {
        iscript_log::Level::Warn
    } else {
        iscript_log::Level::Error
    }
}

/// CLI log configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub global: Level,
    pub lexer: Option<Level>,
    pub parser: Option<Level>,
    pub generator: Option<Level>,
    pub vm: Option<Level>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            global: Level::WARN,
            lexer: None,
            parser: None,
            generator: None,
            vm: None,
        }
    }
}

impl LogConfig {
    /// Level for one phase target. The gc follows the vm.
    pub fn level_for(&self, phase: Phase) -> Level {
        let specific = match phase {
            Phase::Lexer => self.lexer,
            Phase::Parser => self.parser,
            Phase::Generator => self.generator,
            Phase::Vm | Phase::Gc => self.vm,
            Phase::Binary => None,
        };
        specific.unwrap_or(self.global)
    }

    /// Most verbose level any target accepts. The core logger runs at this
    /// level and `tracing` filters per target.
    pub fn most_verbose(&self) -> Level {
        Phase::ALL
            .iter()
            .map(|&phase| self.level_for(phase))
            .chain(std::iter::once(self.global))
            .max()
            .unwrap_or(self.global)
    }
}

/// `iscript.json`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Script to run, relative to the project file
    pub entry: String,
    pub log_level: Option<String>,
    pub dump_bytecode: bool,
    pub show_steps: bool,
    /// Only compile the entry and write it next to the source
    pub compile_only: bool,
    pub gc_interval: Option<u64>,
    /// Class sources or `.iscr` files registered before the entry loads
    pub classes: Vec<String>,
}

impl ProjectConfig {
    pub fn read(path: &Path) -> Result<Self, CliError> {
        if !path.exists() {
            return Err(CliError::ProjectMissing(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| CliError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, CliError> {
        let project: ProjectConfig =
            serde_json::from_str(content).map_err(|source| CliError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if project.entry.trim().is_empty() {
            return Err(CliError::EmptyEntry(path.to_path_buf()));
        }
        Ok(project)
    }

    /// Resolves a project-relative path against the project file's directory
    pub fn resolve(project_file: &Path, relative: &str) -> PathBuf {
        project_file
            .parent()
            .unwrap_or(Path::new("."))
            .join(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_levels_fall_back_to_global() {
        let config = LogConfig {
            global: Level::INFO,
            vm: Some(Level::TRACE),
            ..LogConfig::default()
        };
        assert_eq!(config.level_for(Phase::Lexer), Level::INFO);
        assert_eq!(config.level_for(Phase::Gc), Level::TRACE);
        assert_eq!(config.most_verbose(), Level::TRACE);
    }

    #[test]
    fn test_parse_level_names() {
        assert_eq!(parse_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_level("silent").unwrap(), Level::ERROR);
        assert!(matches!(parse_level("loud"), Err(CliError::UnknownLevel(_))));
        assert_eq!(from_tracing(to_tracing(iscript_log::Level::Warn)), iscript_log::Level::Warn);
    }

    #[test]
    fn test_project_defaults() {
        let project =
            ProjectConfig::parse(r#"{ "entry": "main.is" }"#, Path::new("iscript.json")).unwrap();
        assert_eq!(project.entry, "main.is");
        assert!(!project.dump_bytecode);
        assert_eq!(project.gc_interval, None);
        assert!(project.classes.is_empty());
    }

    #[test]
    fn test_project_full() {
        let project = ProjectConfig::parse(
            r#"{ "entry": "main.is", "log_level": "info", "dump_bytecode": true,
                 "gc_interval": 50, "classes": ["point.is"] }"#,
            Path::new("iscript.json"),
        )
        .unwrap();
        assert_eq!(project.log_level.as_deref(), Some("info"));
        assert!(project.dump_bytecode);
        assert_eq!(project.gc_interval, Some(50));
        assert_eq!(project.classes, vec!["point.is"]);
    }

    #[test]
    fn test_project_requires_entry() {
        let err = ProjectConfig::parse("{}", Path::new("iscript.json")).unwrap_err();
        assert!(matches!(err, CliError::EmptyEntry(_)));
        let err = ProjectConfig::parse("{ entry", Path::new("iscript.json")).unwrap_err();
        assert!(matches!(err, CliError::Parse { .. }));
    }

    #[test]
    fn test_entry_resolves_next_to_project() {
        let path = ProjectConfig::resolve(Path::new("demo/iscript.json"), "main.is");
        assert_eq!(path, Path::new("demo/main.is"));
    }
}
