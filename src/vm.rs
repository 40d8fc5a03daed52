use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::builtins::StdBindings;
use crate::compiler::FunctionTable;
use crate::opcode::{OpCode, Page, range_flags};
use crate::scope::{StructId, SymbolTable};
use crate::shell::ShellState;
use crate::trace::trace_log;
use crate::value::{
    ClosureValue, RangeValue, RuntimeError, StructInstance, TypeValue, Value, ValueKey, ops,
};

mod calls;
mod iter;
mod vm_ops;

pub use calls::{StdContext, program_args};

/// One activation record: the executing page, its instruction offset, the
/// base of its locals window on the shared operand stack, whether it runs
/// in root context, the closure handed to the call, and the captured
/// frame when the page belongs to a closure.
struct Frame {
    page: Arc<Page>,
    ip: usize,
    base: usize,
    root: bool,
    closure: Option<Rc<ClosureValue>>,
    captured: Option<Rc<RefCell<Vec<Value>>>>,
}

/// The stack-based executor. `execute` runs a top-level page against the
/// engine's persistent globals window and returns the page's final value.
pub struct Executor<'e> {
    symbols: &'e SymbolTable,
    std: &'e StdBindings,
    pages: &'e FunctionTable,
    shell: &'e mut ShellState,
    stack: Vec<Value>,
    frames: Vec<Frame>,
}

impl<'e> Executor<'e> {
    pub fn new(
        symbols: &'e SymbolTable,
        std: &'e StdBindings,
        pages: &'e FunctionTable,
        shell: &'e mut ShellState,
    ) -> Self {
        Self {
            symbols,
            std,
            pages,
            shell,
            stack: Vec::with_capacity(64),
            frames: Vec::with_capacity(8),
        }
    }

    /// Execute a top-level page. The globals vector seeds the bottom of
    /// the stack and is handed back, grown by any new top-level bindings.
    pub fn execute(
        &mut self,
        page: Arc<Page>,
        globals: Vec<Value>,
    ) -> Result<(Value, Vec<Value>), RuntimeError> {
        trace_log!("vm", "executing {} (hash {:016x})", page.name, page.hash);
        self.stack = globals;
        self.frames.push(Frame {
            page,
            ip: 0,
            base: 0,
            root: true,
            closure: None,
            captured: None,
        });
        self.run(0)?;
        let result = self.stack.pop().expect("top-level page yields a value");
        Ok((result, std::mem::take(&mut self.stack)))
    }

    /// The dispatch loop; runs until the frame stack shrinks to
    /// `stop_at`, which lets closure invocation re-enter cleanly.
    fn run(&mut self, stop_at: usize) -> Result<(), RuntimeError> {
        while self.frames.len() > stop_at {
            let finished = {
                let frame = self.frames.last().expect("active frame");
                frame.ip >= frame.page.code.len()
            };
            if finished {
                // Only the top-level page ends without Ret.
                self.frames.pop();
                continue;
            }
            let frame = self.frames.last_mut().expect("active frame");
            let byte = frame.page.code[frame.ip];
            frame.ip += 1;
            let op = OpCode::from_byte(byte).expect("valid opcode");
            self.step(op)?;
        }
        Ok(())
    }

    fn step(&mut self, op: OpCode) -> Result<(), RuntimeError> {
        match op {
            OpCode::Nop => {}
            OpCode::Pop => {
                self.pop();
            }
            OpCode::PopArgs => {
                let n = self.read_u8() as usize;
                let len = self.stack.len() - n;
                self.stack.truncate(len);
            }
            OpCode::Unpack => {
                let n = self.read_u8() as usize;
                let value = self.pop();
                let items: Vec<Value> = match &value {
                    Value::List(items) => items.borrow().clone(),
                    Value::Tuple(items) => items.as_ref().clone(),
                    other => {
                        return Err(RuntimeError::invalid_operation(format!(
                            "cannot unpack a {}",
                            other.type_name()
                        )));
                    }
                };
                if items.len() != n {
                    return Err(RuntimeError::invalid_operation(format!(
                        "cannot unpack {} values into {} bindings",
                        items.len(),
                        n
                    )));
                }
                self.stack.extend(items);
            }
            OpCode::ExitBlock => {
                let n = self.read_u8() as usize;
                let keep = self.read_u8() != 0;
                if keep {
                    let result = self.pop();
                    let len = self.stack.len() - n;
                    self.stack.truncate(len);
                    self.stack.push(result);
                } else {
                    let len = self.stack.len() - n;
                    self.stack.truncate(len);
                }
            }

            OpCode::Load => {
                let slot = self.read_u16() as usize;
                let base = self.frame().base;
                self.stack.push(self.stack[base + slot].clone());
            }
            OpCode::Store => {
                let slot = self.read_u16() as usize;
                let value = self.pop();
                let base = self.frame().base;
                self.stack[base + slot] = value;
            }
            OpCode::LoadUpper => {
                let index = self.read_u16() as usize;
                let captured = self
                    .frame()
                    .captured
                    .clone()
                    .expect("closure frame has a captured window");
                let value = captured.borrow()[index].clone();
                self.stack.push(value);
            }
            OpCode::StoreUpper => {
                let index = self.read_u16() as usize;
                let value = self.pop();
                let captured = self
                    .frame()
                    .captured
                    .clone()
                    .expect("closure frame has a captured window");
                captured.borrow_mut()[index] = value;
            }
            OpCode::LoadEnv => {
                let idx = self.read_u16();
                let name = self.constant_str(idx);
                let value = if name == "?" {
                    Value::Integer(self.shell.exit_code() as i64)
                } else {
                    match std::env::var(&name) {
                        Ok(text) => Value::String(text),
                        Err(_) => Value::Nil,
                    }
                };
                self.stack.push(value);
            }

            OpCode::Const => {
                let idx = self.read_u16();
                let value = self.constant(idx);
                self.stack.push(value);
            }
            OpCode::StructConst => {
                let sid = StructId(self.read_u16() as usize);
                let name = self.symbols.struct_data(sid).name.clone();
                self.stack.push(Value::Type(TypeValue::Struct(name)));
            }

            OpCode::Index => {
                let index = self.pop();
                let target = self.pop();
                let value = vm_ops::index_value(&target, &index)?;
                self.stack.push(value);
            }
            OpCode::StoreIndex => {
                let value = self.pop();
                let index = self.pop();
                let target = self.pop();
                vm_ops::store_index(&target, &index, value.clone())?;
                self.stack.push(value);
            }
            OpCode::Glob => {
                let pattern = self.pop();
                self.stack.push(vm_ops::expand_glob(&pattern));
            }

            OpCode::BuildTuple => {
                let n = self.read_u8() as usize;
                let items = self.drain(n);
                self.stack.push(Value::tuple(items));
            }
            OpCode::BuildList => {
                let n = self.read_u8() as usize;
                let items = self.drain(n);
                self.stack.push(Value::list(items));
            }
            OpCode::BuildListBig => {
                let n = self.read_u32() as usize;
                let items = self.drain(n);
                self.stack.push(Value::list(items));
            }
            OpCode::BuildSet => {
                let n = self.read_u8() as usize;
                let keys = self
                    .drain(n)
                    .iter()
                    .map(ValueKey::from_value)
                    .collect::<Result<Vec<_>, _>>()?;
                self.stack.push(Value::set(keys));
            }
            OpCode::BuildDict => {
                let n = self.read_u8() as usize;
                let mut flat = self.drain(n * 2);
                let mut entries = Vec::with_capacity(n);
                while flat.len() >= 2 {
                    let key = flat.remove(0);
                    let value = flat.remove(0);
                    entries.push((ValueKey::from_value(&key)?, value));
                }
                self.stack.push(Value::dictionary(entries));
            }
            OpCode::BuildRange => {
                let flags = self.read_u8();
                let to = if flags & range_flags::HAS_TO != 0 {
                    Some(self.pop_integer("range bound")?)
                } else {
                    None
                };
                let from = if flags & range_flags::HAS_FROM != 0 {
                    Some(self.pop_integer("range bound")?)
                } else {
                    None
                };
                self.stack.push(Value::Range(Rc::new(RangeValue {
                    from,
                    to,
                    inclusive: flags & range_flags::INCLUSIVE != 0,
                })));
            }
            OpCode::BuildString => {
                let n = self.read_u8() as usize;
                let text: String = self
                    .drain(n)
                    .iter()
                    .map(Value::to_display_string)
                    .collect();
                self.stack.push(Value::String(text));
            }
            OpCode::BuildClosure => {
                let fid = crate::scope::FnId(self.read_u16() as usize);
                let n = self.read_u8() as usize;
                let captured = self.drain(n);
                self.stack.push(Value::Closure(Rc::new(ClosureValue {
                    function: fid,
                    captured: Rc::new(RefCell::new(captured)),
                })));
            }
            OpCode::New => {
                let sid = StructId(self.read_u16() as usize);
                let argc = self.read_u8() as usize;
                let args = self.drain(argc);
                let data = self.symbols.struct_data(sid);
                let fields = data
                    .params
                    .iter()
                    .map(|p| p.name.clone())
                    .zip(args)
                    .collect();
                self.stack
                    .push(Value::Struct(Rc::new(StructInstance::new(
                        data.name.clone(),
                        fields,
                    ))));
            }

            OpCode::Add => self.binary(ops::add)?,
            OpCode::Sub => self.binary(ops::sub)?,
            OpCode::Mul => self.binary(ops::mul)?,
            OpCode::Div => self.binary(ops::div)?,
            OpCode::Mod => self.binary(ops::modulo)?,
            OpCode::Negate => {
                let value = self.pop();
                self.stack.push(ops::negate(value)?);
            }
            OpCode::Not => {
                let value = self.pop();
                self.stack.push(ops::not(value));
            }
            OpCode::Equal => {
                let (l, r) = self.pop_pair();
                self.stack.push(Value::Boolean(l == r));
            }
            OpCode::NotEqual => {
                let (l, r) = self.pop_pair();
                self.stack.push(Value::Boolean(l != r));
            }
            OpCode::Greater => self.binary(ops::greater)?,
            OpCode::GreaterEqual => self.binary(ops::greater_equal)?,
            OpCode::Less => self.binary(ops::less)?,
            OpCode::LessEqual => self.binary(ops::less_equal)?,
            OpCode::And => {
                let (l, r) = self.pop_pair();
                self.stack.push(ops::and(l, r));
            }
            OpCode::Or => {
                let (l, r) = self.pop_pair();
                self.stack.push(ops::or(l, r));
            }
            OpCode::Contains => self.binary(ops::contains)?,

            OpCode::Jump => {
                let offset = self.read_u16() as usize;
                self.frame_mut().ip += offset;
            }
            OpCode::JumpBackward => {
                let offset = self.read_u16() as usize;
                self.frame_mut().ip -= offset;
            }
            OpCode::JumpIf => {
                let offset = self.read_u16() as usize;
                if self.stack.last().expect("operand").truthy() {
                    self.frame_mut().ip += offset;
                }
            }
            OpCode::JumpIfNot => {
                let offset = self.read_u16() as usize;
                if !self.stack.last().expect("operand").truthy() {
                    self.frame_mut().ip += offset;
                }
            }
            OpCode::PopJumpIf => {
                let offset = self.read_u16() as usize;
                if self.pop().truthy() {
                    self.frame_mut().ip += offset;
                }
            }
            OpCode::PopJumpIfNot => {
                let offset = self.read_u16() as usize;
                if !self.pop().truthy() {
                    self.frame_mut().ip += offset;
                }
            }
            OpCode::Ret => {
                let result = self.pop();
                let frame = self.frames.pop().expect("frame to return from");
                self.stack.truncate(frame.base);
                self.stack.push(result);
            }

            OpCode::Call
            | OpCode::RootCall
            | OpCode::MaybeRootCall
            | OpCode::CallStd
            | OpCode::CallProgram
            | OpCode::RootCallProgram
            | OpCode::MaybeRootCallProgram
            | OpCode::ResolveArgumentsDynamically
            | OpCode::DynamicCall
            | OpCode::PushArgsToRef
            | OpCode::PushClosureToRef => self.step_call(op)?,

            OpCode::GetIter | OpCode::ForIter | OpCode::EndFor => self.step_iter(op)?,
        }
        Ok(())
    }

    fn frame(&self) -> &Frame {
        self.frames.last().expect("active frame")
    }

    fn frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("active frame")
    }

    fn read_u8(&mut self) -> u8 {
        let frame = self.frame_mut();
        let byte = frame.page.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let frame = self.frame_mut();
        let bytes = [frame.page.code[frame.ip], frame.page.code[frame.ip + 1]];
        frame.ip += 2;
        u16::from_le_bytes(bytes)
    }

    fn read_u32(&mut self) -> u32 {
        let frame = self.frame_mut();
        let code = &frame.page.code;
        let bytes = [
            code[frame.ip],
            code[frame.ip + 1],
            code[frame.ip + 2],
            code[frame.ip + 3],
        ];
        frame.ip += 4;
        u32::from_le_bytes(bytes)
    }

    fn constant(&self, idx: u16) -> Value {
        self.frame().page.constants[idx as usize].clone()
    }

    fn constant_str(&self, idx: u16) -> String {
        match &self.frame().page.constants[idx as usize] {
            Value::String(s) => s.clone(),
            other => unreachable!("expected string constant, got {}", other.type_name()),
        }
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("operand stack underflow")
    }

    fn pop_pair(&mut self) -> (Value, Value) {
        let right = self.pop();
        let left = self.pop();
        (left, right)
    }

    fn pop_integer(&mut self, what: &str) -> Result<i64, RuntimeError> {
        match self.pop() {
            Value::Integer(n) => Ok(n),
            other => Err(RuntimeError::invalid_cast(
                other.type_name(),
                format!("Integer ({})", what),
            )),
        }
    }

    fn drain(&mut self, n: usize) -> Vec<Value> {
        let at = self.stack.len() - n;
        self.stack.split_off(at)
    }

    fn binary(
        &mut self,
        f: fn(Value, Value) -> Result<Value, RuntimeError>,
    ) -> Result<(), RuntimeError> {
        let (l, r) = self.pop_pair();
        self.stack.push(f(l, r)?);
        Ok(())
    }
}
