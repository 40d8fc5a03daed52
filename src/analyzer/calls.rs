use super::Analyzer;
use crate::ast::{CallExpr, CallType, Expr, ExprKind, NewExpr};
use crate::scope::{CallTarget, StructTarget};
use crate::value::RuntimeError;

/// The built-in names short-circuit call resolution and are never
/// shadowed by user or standard functions.
pub(super) fn builtin_call_type(name: &str) -> Option<CallType> {
    Some(match name {
        "cd" => CallType::BuiltInCd,
        "exec" => CallType::BuiltInExec,
        "scriptPath" => CallType::BuiltInScriptPath,
        "closure" => CallType::BuiltInClosure,
        "call" => CallType::BuiltInCall,
        "error" => CallType::BuiltInError,
        _ => return None,
    })
}

impl Analyzer<'_> {
    /// Classify a call site, thread any piped value, validate the arity
    /// and closure, and rewrite a variadic tail into a single list.
    pub(super) fn analyze_call(
        &mut self,
        call: &mut CallExpr,
        piped: Option<Expr>,
    ) -> Result<(), RuntimeError> {
        let call_type = self.classify_call(call)?;
        call.call_type = Some(call_type);

        for arg in &mut call.args {
            arg.is_root = false;
            self.analyze_expr(arg)?;
        }
        if let Some(mut p) = call.piped.take() {
            p.is_root = false;
            self.analyze_expr(&mut p)?;
            call.piped = Some(p);
        }

        // The producer of a pipe was analysed at the pipe site. Programs
        // (and `exec`) keep it as the piped-in value; everyone else takes
        // it as their first argument.
        if let Some(producer) = piped {
            match call_type {
                CallType::Program | CallType::BuiltInExec => call.piped = Some(producer),
                CallType::BuiltInCall => {
                    let at = call.args.len().min(1);
                    call.args.insert(at, producer);
                }
                _ => call.args.insert(0, producer),
            }
        }

        if let Some(closure) = &mut call.closure {
            match &mut closure.kind {
                ExprKind::Closure(c) => self.analyze_closure(c)?,
                _ => return Err(RuntimeError::unexpected_closure()),
            }
        }
        if call.closure.is_some() {
            let allowed = match call_type {
                CallType::Function => match &call.target {
                    Some(CallTarget::User(fid)) => self.symbols.function(*fid).has_closure_param,
                    _ => false,
                },
                CallType::StdFunction => match &call.target {
                    Some(CallTarget::Std(sid)) => self.std.get(*sid).has_closure,
                    _ => false,
                },
                CallType::BuiltInCall => true,
                _ => false,
            };
            if !allowed {
                return Err(RuntimeError::unexpected_closure());
            }
        }

        match call_type {
            CallType::Function => {
                let Some(CallTarget::User(fid)) = call.target.clone() else {
                    unreachable!("user calls carry their symbol");
                };
                let data = self.symbols.function(fid);
                let (params_len, min, max, variadic) = (
                    data.params.len(),
                    data.min_args(),
                    data.max_args(),
                    data.is_variadic(),
                );
                let actual = call.args.len();
                if actual < min || actual > max {
                    return Err(RuntimeError::wrong_argument_count(
                        params_len, actual, variadic,
                    ));
                }
                if variadic && actual > params_len - 1 {
                    self.rewrite_variadic_tail(&mut call.args, params_len - 1);
                }
                Ok(())
            }
            CallType::StdFunction => {
                let Some(CallTarget::Std(sid)) = call.target.clone() else {
                    unreachable!("std calls carry their binding id");
                };
                let def = self.std.get(sid);
                let (min, max, variadic_start) = (def.min_args, def.max_args, def.variadic_start);
                let actual = call.args.len();
                if actual < min || actual > max {
                    let expected = if actual < min { min } else { max };
                    return Err(RuntimeError::wrong_argument_count(
                        expected,
                        actual,
                        variadic_start.is_some(),
                    ));
                }
                if let Some(start) = variadic_start
                    && actual > start
                {
                    self.rewrite_variadic_tail(&mut call.args, start);
                }
                Ok(())
            }
            CallType::Program => Ok(()),
            builtin => {
                self.check_builtin_arity(builtin, call)?;
                // Built-ins lowering onto a reserved bindings entry take
                // that entry's calling convention, variadic tail included.
                if let Some(CallTarget::Std(sid)) = call.target.clone() {
                    let def = self.std.get(sid);
                    if let Some(start) = def.variadic_start
                        && call.args.len() > start
                    {
                        self.rewrite_variadic_tail(&mut call.args, start);
                    }
                }
                Ok(())
            }
        }
    }

    fn classify_call(&mut self, call: &mut CallExpr) -> Result<CallType, RuntimeError> {
        if call.path.is_empty()
            && let Some(builtin) = builtin_call_type(&call.name)
        {
            if builtin == CallType::BuiltInClosure {
                let legal = self
                    .enclosing_function()
                    .map(|fid| {
                        let data = self.symbols.function(fid);
                        !data.is_closure && data.has_closure_param
                    })
                    .unwrap_or(false);
                if !legal {
                    return Err(RuntimeError::expected_closure());
                }
            }
            // Most built-ins lower onto a reserved bindings-table entry;
            // `call` goes through the dynamic-call path instead.
            if let Some(sid) = self.std.lookup(&call.name) {
                call.target = Some(CallTarget::Std(sid));
            }
            return Ok(builtin);
        }

        if call.path.len() <= 1 {
            let key = match call.path.first() {
                Some(module) => format!("{}::{}", module, call.name),
                None => call.name.clone(),
            };
            if let Some(sid) = self.std.lookup(&key) {
                call.target = Some(CallTarget::Std(sid));
                return Ok(CallType::StdFunction);
            }
        }

        let module = if call.path.is_empty() {
            Some(self.module)
        } else {
            self.symbols.resolve_module_path(self.module, &call.path)
        };
        if let Some(m) = module
            && let Some(fid) = self.symbols.lookup_function(m, &call.name, true)
        {
            call.target = Some(CallTarget::User(fid));
            return Ok(CallType::Function);
        }

        if call.path.is_empty() {
            call.target = Some(CallTarget::Program(call.name.clone()));
            return Ok(CallType::Program);
        }
        match module {
            None => Err(RuntimeError::module_not_found(&call.path)),
            Some(_) => Err(RuntimeError::not_found(format!("function {}", call.name))),
        }
    }

    fn check_builtin_arity(
        &mut self,
        builtin: CallType,
        call: &CallExpr,
    ) -> Result<(), RuntimeError> {
        let actual = call.args.len();
        match builtin {
            CallType::BuiltInCd if actual > 1 => {
                Err(RuntimeError::wrong_argument_count(1, actual, false))
            }
            CallType::BuiltInScriptPath if actual != 0 => {
                Err(RuntimeError::wrong_argument_count(0, actual, false))
            }
            CallType::BuiltInError if actual != 1 => {
                Err(RuntimeError::wrong_argument_count(1, actual, false))
            }
            CallType::BuiltInExec | CallType::BuiltInCall if actual < 1 => {
                Err(RuntimeError::wrong_argument_count(1, actual, true))
            }
            _ => Ok(()),
        }
    }

    /// Collapse the trailing arguments bound to a variadic parameter into
    /// one synthesised list argument.
    fn rewrite_variadic_tail(&mut self, args: &mut Vec<Expr>, start: usize) {
        let tail: Vec<Expr> = args.split_off(start);
        let pos = tail.first().map(|e| e.pos).unwrap_or(self.last_pos);
        args.push(Expr::new(ExprKind::List(tail), pos));
    }

    /// Resolve a first-class callable: standard function first, then user
    /// function, then external-program fallback.
    pub(super) fn resolve_reference(
        &mut self,
        path: &[String],
        name: &str,
    ) -> Result<CallTarget, RuntimeError> {
        if path.len() <= 1 {
            let key = match path.first() {
                Some(module) => format!("{}::{}", module, name),
                None => name.to_string(),
            };
            if let Some(sid) = self.std.lookup(&key) {
                return Ok(CallTarget::Std(sid));
            }
        }
        let module = if path.is_empty() {
            Some(self.module)
        } else {
            self.symbols.resolve_module_path(self.module, path)
        };
        if let Some(m) = module
            && let Some(fid) = self.symbols.lookup_function(m, name, true)
        {
            return Ok(CallTarget::User(fid));
        }
        if path.is_empty() {
            return Ok(CallTarget::Program(name.to_string()));
        }
        match module {
            None => Err(RuntimeError::module_not_found(path)),
            Some(_) => Err(RuntimeError::not_found(format!("function {}", name))),
        }
    }

    /// `new` resolves its module path and struct; an unresolved path falls
    /// back to a standard-library struct keyed by the first path element.
    pub(super) fn analyze_new(&mut self, new: &mut NewExpr) -> Result<(), RuntimeError> {
        for arg in &mut new.args {
            arg.is_root = false;
            self.analyze_expr(arg)?;
        }
        let Some((name, modules)) = new.path.split_last() else {
            return Err(RuntimeError::general("new requires a struct name"));
        };

        let module = if modules.is_empty() {
            Some(self.module)
        } else {
            self.symbols.resolve_module_path(self.module, modules)
        };
        let resolved = module.and_then(|m| self.symbols.lookup_struct(m, name, true));

        if let Some(sid) = resolved {
            let data = self.symbols.struct_data(sid);
            let (params_len, min, max) = (data.params.len(), data.min_args(), data.max_args());
            let variadic = max == usize::MAX;
            let actual = new.args.len();
            if actual < min || actual > max {
                return Err(RuntimeError::wrong_argument_count(
                    params_len, actual, variadic,
                ));
            }
            if variadic && actual > params_len - 1 {
                self.rewrite_variadic_tail(&mut new.args, params_len - 1);
            }
            new.target = Some(StructTarget::User(sid));
            return Ok(());
        }

        if let Some(sid) = self.std.lookup_struct(&new.path[0]) {
            let def = self.std.get(sid);
            let actual = new.args.len();
            if actual < def.min_args || actual > def.max_args {
                let expected = if actual < def.min_args {
                    def.min_args
                } else {
                    def.max_args
                };
                return Err(RuntimeError::wrong_argument_count(expected, actual, false));
            }
            new.target = Some(StructTarget::Std(sid));
            return Ok(());
        }

        match module {
            None => Err(RuntimeError::module_not_found(modules)),
            Some(_) => Err(RuntimeError::not_found(format!("struct {}", name))),
        }
    }
}
