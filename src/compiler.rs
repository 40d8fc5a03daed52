use std::collections::HashMap;
use std::sync::Arc;

use crate::analyzer::Program;
use crate::opcode::{OpCode, Page, PageBuilder};
use crate::scope::{FnId, SymbolTable, VarId};
use crate::trace::trace_log;
use crate::value::RuntimeError;

mod calls;
mod expr;
mod helpers;

/// Pages retained per function symbol, so user calls resolve to pages.
#[derive(Debug, Default)]
pub struct FunctionTable {
    pages: Vec<Option<Arc<Page>>>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: FnId) -> Option<&Arc<Page>> {
        self.pages.get(id.0).and_then(|p| p.as_ref())
    }

    fn set(&mut self, id: FnId, page: Arc<Page>) {
        if self.pages.len() <= id.0 {
            self.pages.resize(id.0 + 1, None);
        }
        self.pages[id.0] = Some(page);
    }
}

/// Slot assignments for top-level variables, persisted by the engine so
/// successive executions share their bindings.
#[derive(Debug, Default)]
pub struct GlobalSlots {
    pub slots: HashMap<VarId, u16>,
    pub count: u16,
}

/// Lowers the analysed program into pages: one per user function and
/// closure, plus the top-level page of this execution.
pub struct Generator<'a> {
    symbols: &'a SymbolTable,
    pages: &'a mut FunctionTable,
}

impl<'a> Generator<'a> {
    pub fn new(symbols: &'a SymbolTable, pages: &'a mut FunctionTable) -> Self {
        Self { symbols, pages }
    }

    pub fn generate(
        &mut self,
        program: &Program,
        globals: &mut GlobalSlots,
    ) -> Result<Arc<Page>, RuntimeError> {
        // Every analysed function gets exactly one page; pages from
        // earlier executions are kept as-is.
        for index in 0..self.symbols.function_count() {
            let fid = FnId(index);
            if self.symbols.function(fid).analysed && self.pages.get(fid).is_none() {
                let page = self.compile_function(fid)?;
                trace_log!(
                    "compile",
                    "page {} ({} bytes, hash {:016x})",
                    page.name,
                    page.code.len(),
                    page.hash
                );
                self.pages.set(fid, Arc::new(page));
            }
        }
        let page = self.compile_top_level(program, globals)?;
        trace_log!(
            "compile",
            "page {} ({} bytes, hash {:016x})",
            page.name,
            page.code.len(),
            page.hash
        );
        Ok(Arc::new(page))
    }

    fn compile_function(&mut self, fid: FnId) -> Result<Page, RuntimeError> {
        let data = self.symbols.function(fid);
        let mut pc = PageCompiler::new(self.symbols, PageBuilder::new(data.name.clone()), false);
        for (i, var) in data.param_symbols.iter().enumerate() {
            pc.locals.insert(*var, i as u16);
        }
        pc.depth = data.params.len();
        if data.is_closure {
            for (i, var) in data.captured.iter().enumerate() {
                pc.captured.insert(*var, i as u16);
            }
        }
        if data.body.is_empty() {
            pc.builder.emit_const(crate::value::Value::Nil);
        } else {
            let last = data.body.len() - 1;
            for (i, expr) in data.body.iter().enumerate() {
                if i == last {
                    pc.compile_expr(expr)?;
                } else {
                    pc.compile_root(expr)?;
                }
            }
        }
        pc.builder.emit(OpCode::Ret);
        Ok(pc.builder.finish())
    }

    /// The top-level page runs against the engine's persistent globals
    /// window: existing slots are seeded, new `let` bindings extend it.
    fn compile_top_level(
        &mut self,
        program: &Program,
        globals: &mut GlobalSlots,
    ) -> Result<Page, RuntimeError> {
        let mut pc = PageCompiler::new(self.symbols, PageBuilder::new("<main>"), true);
        pc.locals = globals.slots.clone();
        pc.depth = globals.count as usize;

        if program.top_level.is_empty() {
            pc.builder.emit_const(crate::value::Value::Nil);
        } else {
            let last = program.top_level.len() - 1;
            for (i, expr) in program.top_level.iter().enumerate() {
                if i == last && !expr.is_root {
                    pc.compile_expr(expr)?;
                } else {
                    pc.compile_root(expr)?;
                }
            }
        }
        globals.slots = pc.locals.clone();
        Ok(pc.builder.finish())
    }
}

/// Per-page lowering state: the builder, simulated stack depth, local
/// slot and captured-variable maps, and the loop stack for break and
/// continue backpatching.
struct PageCompiler<'a> {
    symbols: &'a SymbolTable,
    builder: PageBuilder,
    /// Simulated operand-stack height relative to the frame base.
    depth: usize,
    locals: HashMap<VarId, u16>,
    captured: HashMap<VarId, u16>,
    loops: Vec<LoopContext>,
    top_level: bool,
}

struct LoopContext {
    /// Jump-backward target for `continue`.
    continue_target: usize,
    /// Stack depth the loop body starts from; break and continue unwind
    /// to it.
    entry_depth: usize,
    /// Forward-jump patch sites for `break`.
    breaks: Vec<usize>,
}

impl<'a> PageCompiler<'a> {
    fn new(symbols: &'a SymbolTable, builder: PageBuilder, top_level: bool) -> Self {
        Self {
            symbols,
            builder,
            depth: 0,
            locals: HashMap::new(),
            captured: HashMap::new(),
            loops: Vec::new(),
            top_level,
        }
    }
}
