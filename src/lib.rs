//! Execution engine for the nami shell scripting language.
//!
//! The pipeline is: an externally produced expression tree ([`ast`]) is
//! resolved and classified by the [`analyzer`], lowered into byte pages
//! by the [`compiler`], and executed by the stack-based [`vm`], which
//! splices external processes into evaluation through [`process`].
//!
//! [`Engine`] drives the whole pipeline and keeps scopes, compiled pages
//! and top-level variables alive between calls, so it can back an
//! interactive session as well as script execution.

pub mod analyzer;
pub mod ast;
pub mod builtins;
pub mod compiler;
pub mod opcode;
pub mod process;
pub mod scope;
pub mod shell;
mod trace;
pub mod value;
pub mod vm;

use analyzer::Analyzer;
use builtins::StdBindings;
use compiler::{FunctionTable, Generator, GlobalSlots};
use scope::SymbolTable;
use shell::ShellState;
use vm::Executor;

pub use value::{ErrorKind, RuntimeError, Value};

/// The public entry point: analyse, generate, execute.
pub struct Engine {
    symbols: SymbolTable,
    std: StdBindings,
    pages: FunctionTable,
    globals: Vec<Value>,
    global_slots: GlobalSlots,
    shell: ShellState,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_bindings(StdBindings::default_bindings())
    }

    pub fn with_bindings(std: StdBindings) -> Self {
        Self {
            symbols: SymbolTable::new(),
            std,
            pages: FunctionTable::new(),
            globals: Vec::new(),
            global_slots: GlobalSlots::default(),
            shell: ShellState::new(),
        }
    }

    /// Run one expression tree and return its final value. Top-level
    /// bindings, declared modules and compiled pages persist into the
    /// next call.
    pub fn execute(&mut self, tree: ast::Expr) -> Result<Value, RuntimeError> {
        let program = Analyzer::new(&mut self.symbols, &self.std).analyze(tree)?;
        let page = Generator::new(&self.symbols, &mut self.pages)
            .generate(&program, &mut self.global_slots)?;
        let mut executor = Executor::new(&self.symbols, &self.std, &self.pages, &mut self.shell);
        match executor.execute(page, self.globals.clone()) {
            Ok((value, globals)) => {
                self.globals = globals;
                self.global_slots.count = self.globals.len() as u16;
                Ok(value)
            }
            Err(err) => {
                // A failed run may have registered bindings whose slots
                // later code can still name; keep the window addressable.
                let needed = self
                    .global_slots
                    .slots
                    .values()
                    .map(|slot| *slot as usize + 1)
                    .max()
                    .unwrap_or(0);
                if self.globals.len() < needed {
                    self.globals.resize(needed, Value::Nil);
                }
                self.global_slots.count = self.globals.len() as u16;
                Err(err)
            }
        }
    }

    /// The scope and symbol tables; hosts use this to pre-register
    /// imports before execution.
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    /// The standard-bindings table; hosts may register additional
    /// callables before execution.
    pub fn bindings_mut(&mut self) -> &mut StdBindings {
        &mut self.std
    }

    pub fn set_script_path(&mut self, path: impl Into<std::path::PathBuf>) {
        self.shell.set_script_path(path.into());
    }

    /// The shell variable `?`: the most recently completed external
    /// process's exit code.
    pub fn last_exit_code(&self) -> i32 {
        self.shell.exit_code()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
