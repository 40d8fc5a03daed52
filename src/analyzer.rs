use crate::ast::{Expr, ExprKind, ModuleDecl, Pos};
use crate::builtins::StdBindings;
use crate::scope::{FnId, FunctionData, ModuleId, ScopeId, ScopeKind, StructData, SymbolTable};
use crate::trace::trace_log;
use crate::value::RuntimeError;

mod calls;
mod expr;

/// The analysed top-level program. Function and closure bodies live in
/// the symbol table; this is what remains for the top-level page.
#[derive(Debug)]
pub struct Program {
    pub top_level: Vec<Expr>,
}

/// Walks the expression tree, resolves every name, classifies every call
/// site, validates arities and populates closure capture sets. Failures
/// carry the position of the last-visited expression.
pub struct Analyzer<'a> {
    symbols: &'a mut SymbolTable,
    std: &'a StdBindings,
    scope: ScopeId,
    module: ModuleId,
    /// Enclosing functions and closures, innermost last.
    fn_stack: Vec<FnId>,
    loop_depth: usize,
    last_pos: Pos,
}

impl<'a> Analyzer<'a> {
    pub fn new(symbols: &'a mut SymbolTable, std: &'a StdBindings) -> Self {
        let scope = symbols.top_scope();
        let module = symbols.root_module();
        Self {
            symbols,
            std,
            scope,
            module,
            fn_stack: Vec::new(),
            loop_depth: 0,
            last_pos: Pos::default(),
        }
    }

    /// Analyse one parsed tree. A `Module` root is the usual shape; any
    /// other expression is treated as a single top-level statement.
    pub fn analyze(mut self, tree: Expr) -> Result<Program, RuntimeError> {
        let body = match tree.kind {
            ExprKind::Module(ModuleDecl { body, .. }) => body,
            _ => vec![tree],
        };
        self.analyze_body(body)
            .map_err(|e| e.at(self.last_pos))
    }

    fn analyze_body(&mut self, mut body: Vec<Expr>) -> Result<Program, RuntimeError> {
        let root = self.symbols.root_module();
        self.register_declarations(root, &mut body)?;
        // The analysed flag guards cyclic imports within one traversal;
        // function bodies stay analysed across engine calls through their
        // own flags.
        for index in 0..self.symbols.module_count() {
            self.symbols.module_mut(ModuleId(index)).analysed = false;
        }
        self.analyze_module(root)?;

        let mut top_level: Vec<Expr> = body
            .into_iter()
            .filter(|e| {
                !matches!(
                    e.kind,
                    ExprKind::Function(_) | ExprKind::Struct(_) | ExprKind::Module(_)
                )
            })
            .collect();
        let last = top_level.len().saturating_sub(1);
        for (i, expr) in top_level.iter_mut().enumerate() {
            expr.is_root = i != last;
        }
        self.scope = self.symbols.top_scope();
        self.module = root;
        for expr in &mut top_level {
            self.analyze_expr(expr)?;
        }
        trace_log!(
            "analyze",
            "top level analysed: {} expressions, {} functions",
            top_level.len(),
            self.symbols.function_count()
        );
        Ok(Program { top_level })
    }

    /// Collect module members ahead of analysis so mutually-recursive and
    /// out-of-order declarations resolve. Function and closure bodies are
    /// moved into the symbol table here.
    fn register_declarations(
        &mut self,
        module: ModuleId,
        body: &mut Vec<Expr>,
    ) -> Result<(), RuntimeError> {
        for expr in body.iter_mut() {
            self.last_pos = expr.pos;
            match &mut expr.kind {
                ExprKind::Function(decl) => {
                    let data = FunctionData {
                        name: decl.name.clone(),
                        module,
                        params: std::mem::take(&mut decl.params),
                        param_symbols: Vec::new(),
                        has_closure_param: decl.has_closure_param,
                        is_closure: false,
                        captured: Vec::new(),
                        body: std::mem::take(&mut decl.body),
                        analysed: false,
                    };
                    decl.symbol = Some(self.symbols.declare_function(data)?);
                }
                ExprKind::Struct(decl) => {
                    let data = StructData {
                        name: decl.name.clone(),
                        module,
                        params: std::mem::take(&mut decl.params),
                    };
                    decl.symbol = Some(self.symbols.declare_struct(data)?);
                }
                ExprKind::Module(decl) => {
                    let sub = self.symbols.declare_module(module, &decl.name);
                    let mut sub_body = std::mem::take(&mut decl.body);
                    for child in &sub_body {
                        if !matches!(
                            child.kind,
                            ExprKind::Function(_) | ExprKind::Struct(_) | ExprKind::Module(_)
                        ) {
                            return Err(RuntimeError::general(
                                "only declarations are allowed in a module body",
                            )
                            .at(child.pos));
                        }
                    }
                    self.register_declarations(sub, &mut sub_body)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// The cyclic-import-safe module traversal: mark, analyse declared and
    /// imported functions in their defining modules, then recurse into
    /// submodules not yet analysed.
    fn analyze_module(&mut self, module: ModuleId) -> Result<(), RuntimeError> {
        if self.symbols.module(module).analysed {
            return Ok(());
        }
        self.symbols.module_mut(module).analysed = true;
        trace_log!("analyze", "module {:?}", module);

        let mut functions = self.symbols.declared_functions(module);
        functions.extend(self.symbols.imported_functions(module));
        for fid in functions {
            self.analyze_function(fid)?;
        }
        for sid in self.symbols.declared_structs(module) {
            self.analyze_struct_defaults(sid, module)?;
        }
        for sub in self.symbols.submodules(module) {
            self.analyze_module(sub)?;
        }
        Ok(())
    }

    /// Constructor defaults are analysed in the declaring module's scope,
    /// like function parameter defaults.
    fn analyze_struct_defaults(
        &mut self,
        sid: crate::scope::StructId,
        module: ModuleId,
    ) -> Result<(), RuntimeError> {
        let saved_scope = self.scope;
        let saved_module = self.module;
        self.module = module;
        self.scope = self.symbols.module(module).scope;
        let mut result = Ok(());
        for i in 0..self.symbols.struct_data(sid).params.len() {
            if let Some(mut default) = self.symbols.struct_data_mut(sid).params[i].default.take() {
                result = self.analyze_expr(&mut default);
                self.symbols.struct_data_mut(sid).params[i].default = Some(default);
                if result.is_err() {
                    break;
                }
            }
        }
        self.scope = saved_scope;
        self.module = saved_module;
        result
    }

    /// Analyse one function body in its defining module's scope. The
    /// `analysed` flag makes this idempotent, so a function imported into
    /// several modules is visited once.
    fn analyze_function(&mut self, fid: FnId) -> Result<(), RuntimeError> {
        if self.symbols.function(fid).analysed {
            return Ok(());
        }
        self.symbols.function_mut(fid).analysed = true;

        let saved_scope = self.scope;
        let saved_module = self.module;
        let saved_loop_depth = std::mem::take(&mut self.loop_depth);

        let home = self.symbols.function(fid).module;
        self.module = home;
        self.scope = self.symbols.module(home).scope;

        self.validate_param_order(fid)?;
        // Defaults are analysed in the declaring module's scope, before
        // the body scope exists.
        for i in 0..self.symbols.function(fid).params.len() {
            if let Some(mut default) = self.symbols.function_mut(fid).params[i].default.take() {
                self.analyze_expr(&mut default)?;
                self.symbols.function_mut(fid).params[i].default = Some(default);
            }
        }

        let body_scope = self.symbols.push_scope(ScopeKind::Function(fid), self.scope);
        self.scope = body_scope;
        let param_names: Vec<String> = self
            .symbols
            .function(fid)
            .params
            .iter()
            .map(|p| p.name.clone())
            .collect();
        let param_symbols = param_names
            .iter()
            .map(|name| self.symbols.add_variable(body_scope, name))
            .collect();
        self.symbols.function_mut(fid).param_symbols = param_symbols;

        self.fn_stack.push(fid);
        let mut body = std::mem::take(&mut self.symbols.function_mut(fid).body);
        let result = self.analyze_function_body(&mut body);
        self.symbols.function_mut(fid).body = body;
        self.fn_stack.pop();

        self.scope = saved_scope;
        self.module = saved_module;
        self.loop_depth = saved_loop_depth;
        result
    }

    fn analyze_function_body(&mut self, body: &mut [Expr]) -> Result<(), RuntimeError> {
        let last = body.len().saturating_sub(1);
        for (i, expr) in body.iter_mut().enumerate() {
            expr.is_root = i != last;
            self.analyze_expr(expr)?;
        }
        Ok(())
    }

    /// Default-valued parameters must be contiguous and trailing, and a
    /// variadic parameter must come last.
    fn validate_param_order(&mut self, fid: FnId) -> Result<(), RuntimeError> {
        let params = &self.symbols.function(fid).params;
        let mut seen_default = false;
        for (i, param) in params.iter().enumerate() {
            if param.variadic {
                if i != params.len() - 1 || param.default.is_some() {
                    return Err(RuntimeError::general("invalid parameter ordering"));
                }
            } else if param.default.is_some() {
                seen_default = true;
            } else if seen_default {
                return Err(RuntimeError::general("invalid parameter ordering"));
            }
        }
        Ok(())
    }
}
