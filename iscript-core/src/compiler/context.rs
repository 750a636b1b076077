//! Compile context: one source file through the whole pipeline
//!
//! Each phase returns `true` on success. A fatal diagnostic ends the phase
//! and is recorded here; check [`CompileContext::error_count`] with
//! [`Severity::Fatal`] before moving on to the next phase.

use super::ast::Ast;
use super::diagnostic::{Diagnostic, Severity};
use super::generator::Generator;
use super::instruction::Instruction;
use super::lexer::Lexer;
use super::parser::Parser;
use super::symbol::Symbol;
use super::token::Token;
use crate::binary::{self, LoadError, SaveError};
use crate::program::Program;
use iscript_config::CompilerConfig;
use iscript_log::{info, warn, Logger};
use std::io::{Read, Write};
use std::sync::Arc;

pub struct CompileContext {
    source: String,
    config: CompilerConfig,
    tokens: Vec<Token>,
    ast: Option<Ast>,
    program: Option<Program>,
    diagnostics: Vec<Diagnostic>,
    logger: Arc<Logger>,
}

impl CompileContext {
    pub fn new(source: impl Into<String>, config: CompilerConfig) -> Self {
        Self {
            source: source.into(),
            config,
            tokens: Vec::new(),
            ast: None,
            program: None,
            diagnostics: Vec::new(),
            logger: Logger::noop(),
        }
    }

    pub fn with_logger(mut self, logger: Arc<Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Lex, parse and generate, stopping at the first phase that fails
    pub fn compile(&mut self) -> bool {
        let ok = self.lex() && self.parse() && self.generate();
        if ok {
            info!(
                self.logger,
                "compiled '{}': {} instructions",
                self.config.file_name,
                self.instructions().len()
            );
        }
        ok
    }

    pub fn lex(&mut self) -> bool {
        let _span = self.logger.enter_span("lex");
        match Lexer::new(&self.source)
            .with_logger(self.logger.clone())
            .analyze()
        {
            Ok(tokens) => {
                self.tokens = tokens;
                true
            }
            Err(diagnostic) => self.fail(diagnostic),
        }
    }

    pub fn parse(&mut self) -> bool {
        if self.tokens.is_empty() && !self.lex() {
            return false;
        }
        let _span = self.logger.enter_span("parse");
        match Parser::new(&self.tokens)
            .with_logger(self.logger.clone())
            .parse()
        {
            Ok(ast) => {
                self.ast = Some(ast);
                true
            }
            Err(diagnostic) => self.fail(diagnostic),
        }
    }

    pub fn generate(&mut self) -> bool {
        if self.ast.is_none() && !self.parse() {
            return false;
        }
        let _span = self.logger.enter_span("generate");
        let Some(ast) = self.ast.as_mut() else {
            return false;
        };
        let result = Generator::new(ast)
            .with_logger(self.logger.clone())
            .with_pointless_warnings(self.config.warn_pointless_statements)
            .with_natives(&self.config.natives)
            .generate();
        match result {
            Ok(mut generated) => {
                for warning in std::mem::take(&mut generated.warnings) {
                    self.report(warning);
                }
                self.program = Some(Program::from_generated(
                    generated,
                    self.config.file_name.clone(),
                ));
                true
            }
            Err(diagnostic) => self.fail(diagnostic),
        }
    }

    fn fail(&mut self, diagnostic: Diagnostic) -> bool {
        self.report(diagnostic);
        false
    }

    /// Records a diagnostic. Fatals are always kept; warnings and infos stop
    /// accumulating once `max_errors` diagnostics exist.
    fn report(&mut self, diagnostic: Diagnostic) {
        if !diagnostic.is_fatal() && self.diagnostics.len() >= self.config.max_errors {
            return;
        }
        let diagnostic = diagnostic.in_file(self.config.file_name.clone());
        warn!(self.logger, "{}", diagnostic);
        self.diagnostics.push(diagnostic);
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn ast(&self) -> Option<&Ast> {
        self.ast.as_ref()
    }

    pub fn symbols(&self) -> &[Symbol] {
        self.program.as_ref().map_or(&[], |p| &p.symbols)
    }

    pub fn instructions(&self) -> &[Instruction] {
        self.program.as_ref().map_or(&[], |p| &p.instructions)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn error_count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    pub fn program(&self) -> Option<Program> {
        self.program.clone()
    }

    /// Every diagnostic rendered with its source line and caret
    pub fn render_diagnostics(&self) -> String {
        self.diagnostics
            .iter()
            .map(|d| d.render(&self.source))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn save<W: Write>(&self, writer: &mut W) -> Result<(), SaveError> {
        let program = self.program.as_ref().ok_or(SaveError::NothingCompiled)?;
        binary::BinaryWriter::new(writer)
            .with_logger(self.logger.clone())
            .write_program(program)
    }

    /// Replaces the compiled form with one read from `reader`. On failure the
    /// context is left untouched.
    pub fn load<R: Read>(&mut self, reader: &mut R) -> Result<(), LoadError> {
        let program = binary::BinaryReader::new(reader)
            .with_logger(self.logger.clone())
            .read_program()?;
        self.tokens.clear();
        self.ast = None;
        self.program = Some(program);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iscript_log::{Level, LogConfig};

    fn context(source: &str) -> CompileContext {
        CompileContext::new(source, CompilerConfig::default())
    }

    #[test]
    fn test_compile_runs_all_phases() {
        let mut ctx = context("var x = 1 + 2 * 3;");
        assert!(ctx.compile());
        assert!(!ctx.tokens().is_empty());
        assert!(ctx.ast().is_some());
        assert!(!ctx.instructions().is_empty());
        assert_eq!(ctx.error_count(Severity::Fatal), 0);
    }

    #[test]
    fn test_lex_error_stops_pipeline() {
        let mut ctx = context("var s = \"open");
        assert!(!ctx.compile());
        assert_eq!(ctx.error_count(Severity::Fatal), 1);
        assert!(ctx.ast().is_none());
        assert!(ctx.program().is_none());
    }

    #[test]
    fn test_diagnostic_carries_file_name() {
        let config = CompilerConfig {
            file_name: "main.is".into(),
            ..CompilerConfig::default()
        };
        let mut ctx = CompileContext::new("var a;\nvar a;", config);
        assert!(!ctx.compile());
        let rendered = ctx.render_diagnostics();
        assert!(rendered.starts_with("main.is:2:5: fatal: redefinition of 'a'"));
        assert!(rendered.contains("  2 | var a;"));
    }

    #[test]
    fn test_warnings_capped() {
        let config = CompilerConfig {
            max_errors: 2,
            ..CompilerConfig::default()
        };
        let mut ctx = CompileContext::new("var a; a; a; a; a;", config);
        assert!(ctx.compile());
        assert_eq!(ctx.error_count(Severity::Warning), 2);
    }

    #[test]
    fn test_save_then_load_clears_front_end() {
        let mut ctx = context("function f(a) { return a; } var r = f(4);");
        assert!(ctx.compile());
        let mut bytes = Vec::new();
        ctx.save(&mut bytes).expect("save");

        let mut loaded = context("");
        loaded.load(&mut bytes.as_slice()).expect("load");
        assert!(loaded.tokens().is_empty());
        assert!(loaded.ast().is_none());
        assert_eq!(
            loaded.program(),
            ctx.program().map(|p| p.without_jump_targets())
        );
    }

    #[test]
    fn test_failed_load_keeps_previous_program() {
        let mut ctx = context("var a = 1;");
        assert!(ctx.compile());
        let before = ctx.program();
        assert!(ctx.load(&mut &b"ISCR"[..]).is_err());
        assert_eq!(ctx.program(), before);
    }

    #[test]
    fn test_save_without_program() {
        let ctx = context("var a;");
        assert!(matches!(
            ctx.save(&mut Vec::new()),
            Err(SaveError::NothingCompiled)
        ));
    }

    #[test]
    fn test_phases_logged() {
        let (logger, ring) = LogConfig::new(Level::Debug).with_ring_buffer(256).init();
        let ring = ring.expect("ring buffer");
        let mut ctx = context("var a = 1;").with_logger(logger);
        assert!(ctx.compile());
        assert!(ring.contains_message("lexed"));
        assert!(ring.contains_message("parsed"));
        assert!(ring.contains_message("generated"));
    }
}
