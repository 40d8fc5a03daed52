use std::rc::Rc;

use super::PageCompiler;
use crate::ast::{CallExpr, CallType, Expr, ExprKind, Literal, NewExpr};
use crate::opcode::{OpCode, call_flags, root_mode};
use crate::scope::{CallTarget, FnId, StructTarget};
use crate::value::{FunctionRef, RefTarget, RuntimeError, Value};

impl PageCompiler<'_> {
    /// Pick the opcode family from the analyser-assigned classification.
    pub(super) fn compile_call(
        &mut self,
        call: &CallExpr,
        is_root: bool,
    ) -> Result<(), RuntimeError> {
        match call.call_type.expect("call classified") {
            CallType::Function => self.compile_user_call(call, is_root),
            CallType::Program => self.compile_program_call(call, is_root),
            CallType::BuiltInCall => self.compile_dynamic_call(call, is_root),
            // The remaining built-ins lower onto their reserved entries in
            // the bindings table.
            CallType::StdFunction
            | CallType::BuiltInCd
            | CallType::BuiltInExec
            | CallType::BuiltInScriptPath
            | CallType::BuiltInClosure
            | CallType::BuiltInError => self.compile_std_call(call),
        }
    }

    fn compile_user_call(&mut self, call: &CallExpr, is_root: bool) -> Result<(), RuntimeError> {
        let Some(CallTarget::User(fid)) = call.target.clone() else {
            unreachable!("user call without a symbol");
        };
        for arg in &call.args {
            self.compile_expr(arg)?;
        }
        // The analyser validated the arity and collapsed any variadic
        // tail; what is still missing here are trailing defaults and an
        // empty variadic list.
        let symbols = self.symbols;
        let params_len = symbols.function(fid).params.len();
        for i in call.args.len()..params_len {
            let param = &symbols.function(fid).params[i];
            if param.variadic {
                self.builder.emit(OpCode::BuildList);
                self.builder.emit_u8(0);
                self.depth += 1;
            } else {
                let default = param.default.clone().expect("arity validated");
                self.compile_expr(&default)?;
            }
        }
        let flags = self.compile_attached_closure(call)?;
        assert!(params_len <= u8::MAX as usize, "too many parameters");
        self.builder.emit(if is_root {
            if self.top_level {
                OpCode::RootCall
            } else {
                OpCode::MaybeRootCall
            }
        } else {
            OpCode::Call
        });
        self.builder.emit_u16(fid.0 as u16);
        self.builder.emit_u8(params_len as u8);
        self.builder.emit_u8(flags);
        let closure = usize::from(flags & call_flags::HAS_CLOSURE != 0);
        self.depth = self.depth - params_len - closure + 1;
        Ok(())
    }

    fn compile_std_call(&mut self, call: &CallExpr) -> Result<(), RuntimeError> {
        let Some(CallTarget::Std(sid)) = call.target.clone() else {
            unreachable!("std call without a binding id");
        };
        let mut flags = 0u8;
        if let Some(piped) = &call.piped {
            self.compile_expr(piped)?;
            flags |= call_flags::HAS_PIPED;
        }
        for arg in &call.args {
            self.compile_expr(arg)?;
        }
        flags |= self.compile_attached_closure(call)?;
        let argc = call.args.len();
        assert!(argc <= u8::MAX as usize, "too many arguments");
        self.builder.emit(OpCode::CallStd);
        self.builder.emit_u16(sid.0 as u16);
        self.builder.emit_u8(argc as u8);
        self.builder.emit_u8(flags);
        let piped = usize::from(flags & call_flags::HAS_PIPED != 0);
        let closure = usize::from(flags & call_flags::HAS_CLOSURE != 0);
        self.depth = self.depth - argc - piped - closure + 1;
        Ok(())
    }

    fn compile_program_call(
        &mut self,
        call: &CallExpr,
        is_root: bool,
    ) -> Result<(), RuntimeError> {
        let mut flags = 0u8;
        if let Some(piped) = &call.piped {
            self.compile_expr(piped)?;
            flags |= call_flags::HAS_PIPED;
        }
        for arg in &call.args {
            // Unquoted words with glob metacharacters expand at run time.
            if let Some(pattern) = glob_bareword(arg) {
                self.builder.emit_const(Value::string(pattern));
                self.builder.emit(OpCode::Glob);
                self.depth += 1;
            } else {
                self.compile_expr(arg)?;
            }
        }
        let name_idx = self.builder.add_constant(Value::string(call.name.clone()));
        let argc = call.args.len();
        assert!(argc <= u8::MAX as usize, "too many arguments");
        self.builder.emit(if is_root {
            if self.top_level {
                OpCode::RootCallProgram
            } else {
                OpCode::MaybeRootCallProgram
            }
        } else {
            OpCode::CallProgram
        });
        self.builder.emit_u16(name_idx);
        self.builder.emit_u8(argc as u8);
        self.builder.emit_u8(flags);
        let piped = usize::from(flags & call_flags::HAS_PIPED != 0);
        self.depth = self.depth - argc - piped + 1;
        Ok(())
    }

    /// The `call` built-in: enrich a function reference with bound
    /// arguments and closure, resolve them against the target, dispatch.
    fn compile_dynamic_call(
        &mut self,
        call: &CallExpr,
        is_root: bool,
    ) -> Result<(), RuntimeError> {
        self.compile_expr(&call.args[0])?;
        let extra = call.args.len() - 1;
        for arg in &call.args[1..] {
            self.compile_expr(arg)?;
        }
        if extra > 0 {
            assert!(extra <= u8::MAX as usize, "too many arguments");
            self.builder.emit(OpCode::PushArgsToRef);
            self.builder.emit_u8(extra as u8);
            self.depth -= extra;
        }
        if let Some(closure) = &call.closure {
            let ExprKind::Closure(c) = &closure.kind else {
                unreachable!("closure analysed");
            };
            self.compile_closure_value(c.symbol.expect("closure analysed"))?;
            self.builder.emit(OpCode::PushClosureToRef);
            self.depth -= 1;
        }
        self.builder.emit(OpCode::ResolveArgumentsDynamically);
        self.depth += 1;
        self.builder.emit(OpCode::DynamicCall);
        self.builder.emit_u8(if !is_root {
            root_mode::VALUE
        } else if self.top_level {
            root_mode::ROOT
        } else {
            root_mode::INHERIT
        });
        self.depth -= 1;
        Ok(())
    }

    pub(super) fn compile_new(&mut self, new: &NewExpr) -> Result<(), RuntimeError> {
        for arg in &new.args {
            self.compile_expr(arg)?;
        }
        match new.target.expect("new analysed") {
            StructTarget::User(sid) => {
                let symbols = self.symbols;
                let params_len = symbols.struct_data(sid).params.len();
                for i in new.args.len()..params_len {
                    let param = &symbols.struct_data(sid).params[i];
                    if param.variadic {
                        self.builder.emit(OpCode::BuildList);
                        self.builder.emit_u8(0);
                        self.depth += 1;
                    } else {
                        let default = param.default.clone().expect("arity validated");
                        self.compile_expr(&default)?;
                    }
                }
                assert!(params_len <= u8::MAX as usize, "too many fields");
                self.builder.emit(OpCode::New);
                self.builder.emit_u16(sid.0 as u16);
                self.builder.emit_u8(params_len as u8);
                self.depth = self.depth - params_len + 1;
            }
            StructTarget::Std(sid) => {
                let argc = new.args.len();
                self.builder.emit(OpCode::CallStd);
                self.builder.emit_u16(sid.0 as u16);
                self.builder.emit_u8(argc as u8);
                self.builder.emit_u8(0);
                self.depth = self.depth - argc + 1;
            }
        }
        Ok(())
    }

    /// Closure construction: load the captured variables from the current
    /// frame and package them with the page handle.
    pub(super) fn compile_closure_value(&mut self, fid: FnId) -> Result<(), RuntimeError> {
        let captured = self.symbols.function(fid).captured.clone();
        for var in &captured {
            self.emit_load(*var);
        }
        assert!(captured.len() <= u8::MAX as usize, "too many captures");
        self.builder.emit(OpCode::BuildClosure);
        self.builder.emit_u16(fid.0 as u16);
        self.builder.emit_u8(captured.len() as u8);
        self.depth = self.depth - captured.len() + 1;
        Ok(())
    }

    fn compile_attached_closure(&mut self, call: &CallExpr) -> Result<u8, RuntimeError> {
        match &call.closure {
            Some(closure) => {
                let ExprKind::Closure(c) = &closure.kind else {
                    unreachable!("closure analysed");
                };
                self.compile_closure_value(c.symbol.expect("closure analysed"))?;
                Ok(call_flags::HAS_CLOSURE)
            }
            None => Ok(0),
        }
    }

    pub(super) fn emit_reference_const(&mut self, target: CallTarget) {
        let target = match target {
            CallTarget::User(fid) => RefTarget::User(fid),
            CallTarget::Std(sid) => RefTarget::Std(sid),
            CallTarget::Program(name) => RefTarget::Program(name),
        };
        let idx = self
            .builder
            .add_constant(Value::Reference(Rc::new(FunctionRef::new(target))));
        self.builder.emit(OpCode::Const);
        self.builder.emit_u16(idx);
        self.depth += 1;
    }
}

fn glob_bareword(expr: &Expr) -> Option<String> {
    if let ExprKind::Literal {
        literal: Literal::Bareword(word),
        ..
    } = &expr.kind
        && word.contains(['*', '?', '['])
    {
        Some(word.clone())
    } else {
        None
    }
}
