//! Compile diagnostics
//!
//! Every phase reports problems as [`Diagnostic`] values. A fatal diagnostic
//! ends the phase that raised it; warnings and infos only accumulate.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Info,
    Warning,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message with its source position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
}

pub type CompileResult<T> = Result<T, Diagnostic>;

impl Diagnostic {
    pub fn fatal(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self::new(Severity::Fatal, message, line, column)
    }

    pub fn warning(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self::new(Severity::Warning, message, line, column)
    }

    pub fn info(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self::new(Severity::Info, message, line, column)
    }

    fn new(severity: Severity, message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            severity,
            message: message.into(),
            file: String::new(),
            line,
            column,
        }
    }

    pub fn in_file(mut self, file: impl Into<String>) -> Self {
        self.file = file.into();
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }

    /// Renders the header line, the offending source line and a caret:
    ///
    /// ```text
    /// main.is:2:5: fatal: redefinition of 'x'
    ///   2 | var x = 2;
    ///     |     ^
    /// ```
    pub fn render(&self, source: &str) -> String {
        let mut out = self.to_string();

        let Some(text) = source
            .lines()
            .nth((self.line as usize).saturating_sub(1))
            .filter(|_| self.line > 0)
        else {
            return out;
        };

        let number = self.line.to_string();
        let gutter = " ".repeat(number.len());
        // tabs keep their width so the caret lines up
        let marker: String = text
            .chars()
            .take((self.column as usize).saturating_sub(1))
            .map(|c| if c == '\t' { '\t' } else { ' ' })
            .collect();

        out.push('\n');
        out.push_str(&format!("  {number} | {text}\n"));
        out.push_str(&format!("  {gutter} | {marker}^"));
        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = if self.file.is_empty() {
            "<script>"
        } else {
            &self.file
        };
        write!(
            f,
            "{}:{}:{}: {}: {}",
            file, self.line, self.column, self.severity, self.message
        )
    }
}

impl std::error::Error for Diagnostic {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let d = Diagnostic::fatal("unexpected ';'", 3, 7).in_file("main.is");
        assert_eq!(d.to_string(), "main.is:3:7: fatal: unexpected ';'");
    }

    #[test]
    fn test_render_points_at_column() {
        let source = "var a = 1;\nvar a = 2;\n";
        let d = Diagnostic::fatal("redefinition of 'a'", 2, 5).in_file("t.is");
        let rendered = d.render(source);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "t.is:2:5: fatal: redefinition of 'a'");
        assert_eq!(lines[1], "  2 | var a = 2;");
        assert_eq!(lines[2], "    |     ^");
    }

    #[test]
    fn test_render_without_source_line() {
        let d = Diagnostic::warning("empty", 10, 1);
        assert_eq!(d.render("one line"), "<script>:10:1: warning: empty");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Fatal > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }
}
