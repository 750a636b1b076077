//! Terminal error output

use iscript_api::{Diagnostic, IScriptError};
use std::path::Path;

/// Prints `err` to stderr. Compile errors come pre-rendered; runtime errors
/// get the same source excerpt and caret when the source text is at hand.
pub fn print_error(err: &IScriptError, file: &Path, source: Option<&str>) {
    match err {
        IScriptError::Compile { rendered, .. } => eprintln!("{rendered}"),
        IScriptError::Runtime(runtime) => {
            let diagnostic = Diagnostic::fatal(runtime.to_string(), runtime.line, runtime.column)
                .in_file(file.display().to_string());
            match source {
                Some(source) if runtime.instruction.is_some() => {
                    eprintln!("{}", diagnostic.render(source))
                }
                _ => eprintln!("{}", err.to_report()),
            }
        }
        _ => eprintln!("error: {}", err.to_report().to_short()),
    }
}
