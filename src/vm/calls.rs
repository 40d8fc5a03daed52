use std::rc::Rc;
use std::sync::Arc;

use super::{Executor, Frame};
use crate::opcode::{OpCode, call_flags, root_mode};
use crate::process::{PipeShared, PipedInput, ProcessContext};
use crate::scope::{FnId, StdId};
use crate::shell::ShellState;
use crate::trace::trace_log;
use crate::value::{ClosureValue, FunctionRef, RefTarget, RuntimeError, Value};

impl Executor<'_> {
    pub(super) fn step_call(&mut self, op: OpCode) -> Result<(), RuntimeError> {
        match op {
            OpCode::Call | OpCode::RootCall | OpCode::MaybeRootCall => {
                let fid = FnId(self.read_u16() as usize);
                let argc = self.read_u8() as usize;
                let flags = self.read_u8();
                let closure = if flags & call_flags::HAS_CLOSURE != 0 {
                    Some(self.pop_closure())
                } else {
                    None
                };
                let root = match op {
                    OpCode::RootCall => true,
                    OpCode::MaybeRootCall => self.frame().root,
                    _ => false,
                };
                self.push_user_frame(fid, argc, root, closure, None);
            }
            OpCode::CallStd => {
                let sid = StdId(self.read_u16() as usize);
                let argc = self.read_u8() as usize;
                let flags = self.read_u8();
                let closure = if flags & call_flags::HAS_CLOSURE != 0 {
                    Some(self.pop_closure())
                } else {
                    None
                };
                let args = self.drain(argc);
                let piped = if flags & call_flags::HAS_PIPED != 0 {
                    Some(self.pop())
                } else {
                    None
                };
                let result = self.call_std(sid, args, closure, piped)?;
                self.stack.push(result);
            }
            OpCode::CallProgram | OpCode::RootCallProgram | OpCode::MaybeRootCallProgram => {
                let name_idx = self.read_u16();
                let argc = self.read_u8() as usize;
                let flags = self.read_u8();
                let name = self.constant_str(name_idx);
                let args = self.drain(argc);
                let piped = if flags & call_flags::HAS_PIPED != 0 {
                    Some(self.pop())
                } else {
                    None
                };
                let root = match op {
                    OpCode::RootCallProgram => true,
                    OpCode::MaybeRootCallProgram => self.frame().root,
                    _ => false,
                };
                let result = self.call_program(&name, program_args(&args), piped, root)?;
                self.stack.push(result);
            }
            OpCode::ResolveArgumentsDynamically => self.resolve_arguments_dynamically()?,
            OpCode::DynamicCall => {
                let mode = self.read_u8();
                let root = match mode {
                    root_mode::ROOT => true,
                    root_mode::INHERIT => self.frame().root,
                    _ => false,
                };
                self.dynamic_call(root)?;
            }
            OpCode::PushArgsToRef => {
                let n = self.read_u8() as usize;
                let args = self.drain(n);
                let reference = self.pop_reference()?;
                let mut inner = FunctionRef {
                    target: reference.target.clone(),
                    bound: reference.bound.clone(),
                    closure: reference.closure.clone(),
                };
                inner.bound.extend(args);
                self.stack.push(Value::Reference(Rc::new(inner)));
            }
            OpCode::PushClosureToRef => {
                let closure = self.pop_closure();
                let reference = self.pop_reference()?;
                self.stack.push(Value::Reference(Rc::new(FunctionRef {
                    target: reference.target.clone(),
                    bound: reference.bound.clone(),
                    closure: Some(closure),
                })));
            }
            _ => unreachable!("not a call opcode"),
        }
        Ok(())
    }

    /// Push a frame for a user function; the arguments already on the
    /// stack become its first locals.
    fn push_user_frame(
        &mut self,
        fid: FnId,
        argc: usize,
        root: bool,
        closure: Option<Rc<ClosureValue>>,
        captured: Option<Rc<std::cell::RefCell<Vec<Value>>>>,
    ) {
        let page = Arc::clone(self.pages.get(fid).expect("page emitted for function"));
        trace_log!("vm", "call {} (argc {}, root {})", page.name, argc, root);
        let base = self.stack.len() - argc;
        self.frames.push(Frame {
            page,
            ip: 0,
            base,
            root,
            closure,
            captured,
        });
    }

    fn call_std(
        &mut self,
        sid: StdId,
        args: Vec<Value>,
        closure: Option<Rc<ClosureValue>>,
        piped: Option<Value>,
    ) -> Result<Value, RuntimeError> {
        let def = self.std.get(sid);
        trace_log!("vm", "call std {}", def.name);
        let func = def.func;
        let frame_closure = self.frame().closure.clone();
        let mut ctx = StdContext {
            vm: self,
            closure,
            piped,
            frame_closure,
        };
        func(&mut ctx, args)
    }

    /// External-program dispatch. Root context blocks with inherited
    /// stdio and yields the exit code; otherwise the process is
    /// redirected and yields a pipe value.
    fn call_program(
        &mut self,
        name: &str,
        args: Vec<String>,
        piped: Option<Value>,
        root: bool,
    ) -> Result<Value, RuntimeError> {
        let ctx = ProcessContext::new(name, args);
        let input = piped.map(piped_input);
        if root {
            let code = ctx.start(input)?;
            self.shell.set_exit_code(code);
            Ok(Value::Integer(code as i64))
        } else {
            let shared = ctx.start_with_redirect(input)?;
            Ok(Value::Pipe(shared))
        }
    }

    /// Validate a function reference's bound arguments against its
    /// target: arity check, variadic collapse, constant defaults. Leaves
    /// the callable and the canonical argument list.
    fn resolve_arguments_dynamically(&mut self) -> Result<(), RuntimeError> {
        let reference = self.pop_reference()?;
        let mut args = reference.bound.clone();
        match &reference.target {
            RefTarget::User(fid) => {
                let data = self.symbols.function(*fid);
                let (min, max) = (data.min_args(), data.max_args());
                if args.len() < min || args.len() > max {
                    return Err(RuntimeError::wrong_argument_count(
                        data.params.len(),
                        args.len(),
                        data.is_variadic(),
                    ));
                }
                let fixed = data.params.len() - usize::from(data.is_variadic());
                if data.is_variadic() && args.len() >= fixed {
                    let tail = args.split_off(fixed);
                    args.push(Value::list(tail));
                }
                for param in data.params.iter().skip(args.len()) {
                    if param.variadic {
                        args.push(Value::list(Vec::new()));
                    } else {
                        args.push(constant_default(param)?);
                    }
                }
            }
            RefTarget::Closure(c) => {
                let params = self.symbols.function(c.function).params.len();
                if args.len() != params {
                    return Err(RuntimeError::wrong_argument_count(
                        params,
                        args.len(),
                        false,
                    ));
                }
            }
            RefTarget::Std(sid) => {
                let def = self.std.get(*sid);
                if args.len() < def.min_args || args.len() > def.max_args {
                    let expected = if args.len() < def.min_args {
                        def.min_args
                    } else {
                        def.max_args
                    };
                    return Err(RuntimeError::wrong_argument_count(
                        expected,
                        args.len(),
                        def.variadic_start.is_some(),
                    ));
                }
                if let Some(start) = def.variadic_start
                    && args.len() > start
                {
                    let tail = args.split_off(start);
                    args.push(Value::list(tail));
                }
            }
            RefTarget::Program(_) => {}
        }
        self.stack.push(Value::Reference(reference));
        self.stack.push(Value::list(args));
        Ok(())
    }

    /// Dispatch a callable materialised by `ResolveArgumentsDynamically`.
    fn dynamic_call(&mut self, root: bool) -> Result<(), RuntimeError> {
        let args = match self.pop() {
            Value::List(items) => items.borrow().clone(),
            other => unreachable!("argument list expected, got {}", other.type_name()),
        };
        let reference = self.pop_reference()?;
        match &reference.target {
            RefTarget::User(fid) => {
                let argc = args.len();
                self.stack.extend(args);
                self.push_user_frame(*fid, argc, root, reference.closure.clone(), None);
                Ok(())
            }
            RefTarget::Closure(c) => {
                let argc = args.len();
                self.stack.extend(args);
                let page_owner = c.function;
                let captured = c.captured.clone();
                self.push_user_frame(page_owner, argc, root, None, Some(captured));
                Ok(())
            }
            RefTarget::Std(sid) => {
                let result = self.call_std(*sid, args, reference.closure.clone(), None)?;
                self.stack.push(result);
                Ok(())
            }
            RefTarget::Program(name) => {
                let name = name.clone();
                let result = self.call_program(&name, program_args(&args), None, root)?;
                self.stack.push(result);
                Ok(())
            }
        }
    }

    /// Run a closure to completion on the current stack; used by standard
    /// functions that drive closures.
    pub(super) fn invoke_closure(
        &mut self,
        closure: &Rc<ClosureValue>,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let params = self.symbols.function(closure.function).params.len();
        if args.len() != params {
            return Err(RuntimeError::wrong_argument_count(params, args.len(), false));
        }
        let argc = args.len();
        self.stack.extend(args);
        let captured = closure.captured.clone();
        self.push_user_frame(closure.function, argc, false, None, Some(captured));
        let depth = self.frames.len() - 1;
        self.run(depth)?;
        Ok(self.pop())
    }

    fn pop_closure(&mut self) -> Rc<ClosureValue> {
        match self.pop() {
            Value::Closure(c) => c,
            other => unreachable!("closure expected, got {}", other.type_name()),
        }
    }

    fn pop_reference(&mut self) -> Result<Rc<FunctionRef>, RuntimeError> {
        match self.pop() {
            Value::Reference(r) => Ok(r),
            Value::Closure(c) => Ok(Rc::new(FunctionRef::new(RefTarget::Closure(c)))),
            other => Err(RuntimeError::invalid_operation(format!(
                "cannot call a {}",
                other.type_name()
            ))),
        }
    }
}

/// A non-constant default cannot be materialised on the dynamic path;
/// the static call path compiles it instead.
fn constant_default(param: &crate::ast::Param) -> Result<Value, RuntimeError> {
    match &param.default {
        Some(expr) => match &expr.kind {
            crate::ast::ExprKind::Literal {
                constant: Some(value),
                ..
            } => Ok(value.clone()),
            _ => Err(RuntimeError::general(format!(
                "parameter {} needs an explicit argument in a dynamic call",
                param.name
            ))),
        },
        None => unreachable!("missing default after arity validation"),
    }
}

/// The host context handed to standard functions: closure invocation,
/// the piped-in value, shell state and program spawning.
pub struct StdContext<'a, 'e> {
    vm: &'a mut Executor<'e>,
    closure: Option<Rc<ClosureValue>>,
    piped: Option<Value>,
    frame_closure: Option<Rc<ClosureValue>>,
}

impl StdContext<'_, '_> {
    /// Invoke the closure attached to this call site.
    pub fn call_attached_closure(&mut self, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let closure = self
            .closure
            .clone()
            .ok_or_else(RuntimeError::expected_closure)?;
        self.vm.invoke_closure(&closure, args)
    }

    /// Invoke the closure handed to the executing function frame (the
    /// `closure` built-in).
    pub fn call_frame_closure(&mut self, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let closure = self
            .frame_closure
            .clone()
            .ok_or_else(RuntimeError::expected_closure)?;
        self.vm.invoke_closure(&closure, args)
    }

    pub fn take_piped(&mut self) -> Option<Value> {
        self.piped.take()
    }

    pub fn shell_mut(&mut self) -> &mut ShellState {
        self.vm.shell
    }

    /// Spawn a program with redirected output, yielding a pipe value.
    pub fn spawn_redirected(
        &mut self,
        program: &str,
        args: Vec<String>,
        piped: Option<Value>,
    ) -> Result<Value, RuntimeError> {
        let ctx = ProcessContext::new(program, args);
        let shared = ctx.start_with_redirect(piped.map(piped_input))?;
        Ok(Value::Pipe(shared))
    }
}

/// Flatten call arguments into an external program's argument vector;
/// list and tuple values spread into their elements (glob expansion
/// produces lists).
pub fn program_args(values: &[Value]) -> Vec<String> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        match value {
            Value::List(items) => {
                out.extend(items.borrow().iter().map(Value::to_display_string));
            }
            Value::Tuple(items) => {
                out.extend(items.iter().map(Value::to_display_string));
            }
            other => out.push(other.to_display_string()),
        }
    }
    out
}

/// Convert a piped value into a child's stdin feed: pipes stream lazily,
/// lists arrive line by line, everything else as its display text.
fn piped_input(value: Value) -> PipedInput {
    match value {
        Value::Pipe(shared) => PipedInput::Stream(Arc::clone(&shared)),
        Value::List(items) => {
            let mut text = items
                .borrow()
                .iter()
                .map(Value::to_display_string)
                .collect::<Vec<_>>()
                .join("\n");
            if !text.is_empty() {
                text.push('\n');
            }
            PipedInput::Text(text)
        }
        other => {
            let mut text = other.to_display_string();
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            PipedInput::Text(text)
        }
    }
}

/// Shared with iteration: record a completed pipe's exit code in shell
/// state.
pub(super) fn record_pipe_exit(shell: &mut ShellState, pipe: &PipeShared) {
    shell.set_exit_code(pipe.finish());
}
