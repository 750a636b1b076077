//! Compiled program: the flat symbol table plus the instruction list
//!
//! This is what survives compilation. The AST is gone by the time a
//! `Program` exists; the VM and the binary format only ever see this.

use crate::compiler::generator::Generated;
use crate::compiler::instruction::{Instruction, Operand};
use crate::compiler::symbol::{FunctionSymbol, Symbol, SymbolId, SymbolKind};
use serde::Serialize;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Program {
    pub symbols: Vec<Symbol>,
    pub instructions: Vec<Instruction>,
    /// Set when the source declares `class Name`
    pub class_name: Option<String>,
    pub base_name: Option<String>,
    /// Source path the program was compiled from
    pub initial_file: String,
    pub global_count: u32,
    pub function_table_size: u32,
}

impl Program {
    pub fn from_generated(generated: Generated, initial_file: impl Into<String>) -> Self {
        Self {
            symbols: generated.symbols,
            instructions: generated.instructions,
            class_name: generated.info.class_name,
            base_name: generated.info.base_name,
            initial_file: initial_file.into(),
            global_count: generated.info.global_count,
            function_table_size: generated.info.function_table_size,
        }
    }

    pub fn is_class(&self) -> bool {
        self.class_name.is_some()
    }

    /// Copy without jump-target symbols. Symbol operands and state references
    /// are remapped to the compacted indices; jump operands already hold
    /// plain instruction indices.
    pub fn without_jump_targets(&self) -> Program {
        let mut remap = vec![None; self.symbols.len()];
        let mut symbols = Vec::with_capacity(self.symbols.len());
        for (old, symbol) in self.symbols.iter().enumerate() {
            if !symbol.is_jump_target() {
                remap[old] = Some(symbols.len() as u32);
                symbols.push(symbol.clone());
            }
        }

        for symbol in &mut symbols {
            if let SymbolKind::Function(function) = &mut symbol.kind {
                function.state = function
                    .state
                    .and_then(|s| remap.get(s.index()).copied().flatten())
                    .map(SymbolId);
            }
        }

        let instructions = self
            .instructions
            .iter()
            .map(|instruction| {
                let mut instruction = instruction.clone();
                for operand in &mut instruction.operands {
                    if let Operand::Symbol(old) = *operand {
                        if let Some(Some(new)) = remap.get(old as usize) {
                            *operand = Operand::Symbol(*new);
                        }
                    }
                }
                instruction
            })
            .collect();

        Program {
            symbols,
            instructions,
            ..self.clone()
        }
    }

    pub fn symbol(&self, id: u32) -> Option<&Symbol> {
        self.symbols.get(id as usize)
    }

    /// Function symbols ordered by function-table index
    pub fn function_table(&self) -> Vec<SymbolId> {
        let mut table: Vec<(u32, SymbolId)> = self
            .symbols
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_function().map(|f| (f.index, SymbolId(i as u32))))
            .collect();
        table.sort_by_key(|(index, _)| *index);
        table.into_iter().map(|(_, id)| id).collect()
    }

    pub fn function_by_index(&self, index: u32) -> Option<(SymbolId, &FunctionSymbol)> {
        self.symbols.iter().enumerate().find_map(|(i, s)| {
            s.as_function()
                .filter(|f| f.index == index)
                .map(|f| (SymbolId(i as u32), f))
        })
    }

    /// Functions matching `name`, case-insensitively. A name can appear once
    /// per state plus once at global scope.
    pub fn functions_named<'p, 'n>(
        &'p self,
        name: &'n str,
    ) -> impl Iterator<Item = (SymbolId, &'p FunctionSymbol)> + 'n
    where
        'p: 'n,
    {
        self.symbols.iter().enumerate().filter_map(move |(i, s)| {
            s.as_function()
                .filter(|_| s.matches(name))
                .map(|f| (SymbolId(i as u32), f))
        })
    }

    /// Global-scope function (not owned by a state) named `name`
    pub fn global_function(&self, name: &str) -> Option<(SymbolId, &FunctionSymbol)> {
        self.functions_named(name).find(|(_, f)| f.state.is_none())
    }

    /// Slot of the global variable `name`
    pub fn global_slot(&self, name: &str) -> Option<u32> {
        self.symbols.iter().find_map(|s| match s.kind {
            SymbolKind::Variable {
                slot, global: true, ..
            } if s.matches(name) => Some(slot),
            _ => None,
        })
    }

    /// Names of the global variables, ordered by slot
    pub fn global_names(&self) -> Vec<(u32, &str)> {
        let mut names: Vec<(u32, &str)> = self
            .symbols
            .iter()
            .filter_map(|s| match s.kind {
                SymbolKind::Variable {
                    slot, global: true, ..
                } => Some((slot, s.name.as_str())),
                _ => None,
            })
            .collect();
        names.sort_by_key(|(slot, _)| *slot);
        names
    }

    pub fn default_state(&self) -> Option<SymbolId> {
        self.symbols
            .iter()
            .position(|s| matches!(s.kind, SymbolKind::State { default: true }))
            .map(|i| SymbolId(i as u32))
    }

    pub fn string(&self, id: u32) -> Option<&str> {
        self.symbol(id).and_then(Symbol::as_string)
    }

    /// Human-readable listing: header, symbols, then numbered instructions
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "; file      {}", self.initial_file);
        if let Some(class) = &self.class_name {
            match &self.base_name {
                Some(base) => {
                    let _ = writeln!(out, "; class     {class} extends {base}");
                }
                None => {
                    let _ = writeln!(out, "; class     {class}");
                }
            }
        }
        let _ = writeln!(
            out,
            "; globals   {}\n; functions {}\n",
            self.global_count, self.function_table_size
        );

        out.push_str("symbols:\n");
        for (i, symbol) in self.symbols.iter().enumerate() {
            let _ = writeln!(out, "  #{i:<4} {}", symbol.describe());
        }

        out.push_str("\ninstructions:\n");
        for (i, instruction) in self.instructions.iter().enumerate() {
            if let Some(name) = self.entry_name(i as u32) {
                let _ = writeln!(out, "{name}:");
            }
            let text = instruction.to_string();
            let _ = writeln!(
                out,
                "  {i:>5}  {text:<40} ; {}:{}",
                instruction.line, instruction.column
            );
        }
        out
    }

    fn entry_name(&self, index: u32) -> Option<&str> {
        self.symbols
            .iter()
            .find(|s| {
                s.as_function()
                    .is_some_and(|f| f.native.is_none() && f.entry == index)
            })
            .map(|s| s.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::context::CompileContext;
    use crate::compiler::instruction::Opcode;
    use iscript_config::CompilerConfig;

    fn compile(source: &str) -> Program {
        let mut ctx = CompileContext::new(source, CompilerConfig::default());
        assert!(ctx.compile(), "{:?}", ctx.diagnostics());
        ctx.program().expect("program")
    }

    #[test]
    fn test_strip_jump_targets_remaps_symbols() {
        let program = compile(
            r#"
            var i = 0;
            while (i < 3) { i++; }
            var s = "after";
            state Idle as default { event tick() { gotostate Idle; } }
            "#,
        );
        assert!(program.symbols.iter().any(Symbol::is_jump_target));

        let stripped = program.without_jump_targets();
        assert!(!stripped.symbols.iter().any(Symbol::is_jump_target));

        // every string load still names the same text
        for (before, after) in program.instructions.iter().zip(&stripped.instructions) {
            if before.opcode == Opcode::LoadString {
                let (Some(Operand::Symbol(a)), Some(Operand::Symbol(b))) =
                    (before.operand(1), after.operand(1))
                else {
                    panic!("string load without symbol");
                };
                assert_eq!(program.string(a), stripped.string(b));
            }
        }

        let event = stripped
            .global_function("tick")
            .or_else(|| stripped.functions_named("tick").next())
            .expect("event");
        let state = event.1.state.expect("owned by state");
        assert!(matches!(
            stripped.symbols[state.index()].kind,
            SymbolKind::State { default: true }
        ));
        assert_eq!(stripped.default_state(), Some(state));
    }

    #[test]
    fn test_lookup_helpers() {
        let program = compile("var a; var b; function f() {} function g(x) {}");
        assert_eq!(program.global_slot("B"), Some(1));
        assert_eq!(program.global_names(), vec![(0, "a"), (1, "b")]);
        assert_eq!(program.function_table().len(), 2);
        let (_, g) = program.function_by_index(1).expect("g");
        assert_eq!(g.params, 1);
    }

    #[test]
    fn test_function_lookup_outlives_name() {
        let program = compile("function Run(x) {}");
        let found = {
            let name = String::from("run");
            program.global_function(&name)
        };
        let (_, run) = found.expect("run");
        assert_eq!(run.params, 1);
    }

    #[test]
    fn test_disassemble_lists_entries() {
        let program = compile("function add(a, b) { return a + b; } var r = add(2, 3);");
        let listing = program.disassemble();
        assert!(listing.contains("add:"));
        assert!(listing.contains("INVK"));
        assert!(listing.contains("RET"));
    }
}
