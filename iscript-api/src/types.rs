//! Run results

use iscript_core::RunStats;
use serde::Serialize;

/// What a finished run left behind
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecuteOutput {
    /// Lines written by `print`
    pub output: Vec<String>,
    /// Global names with their display form, in slot order
    pub globals: Vec<(String, String)>,
    pub instructions: u64,
    pub stats: RunStats,
}

impl ExecuteOutput {
    pub fn global(&self, name: &str) -> Option<&str> {
        self.globals
            .iter()
            .find(|(global, _)| global == name)
            .map(|(_, value)| value.as_str())
    }
}
