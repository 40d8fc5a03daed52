use std::cell::RefCell;
use std::rc::Rc;

use super::Executor;
use super::calls::record_pipe_exit;
use crate::opcode::OpCode;
use crate::value::{RuntimeError, Value};

impl Executor<'_> {
    pub(super) fn step_iter(&mut self, op: OpCode) -> Result<(), RuntimeError> {
        match op {
            OpCode::GetIter => {
                let value = self.pop();
                let iter = value.iterate()?;
                self.stack.push(Value::Iterator(Rc::new(RefCell::new(iter))));
            }
            OpCode::ForIter => {
                let offset = self.read_u16() as usize;
                let iter = match self.stack.last() {
                    Some(Value::Iterator(iter)) => Rc::clone(iter),
                    other => unreachable!(
                        "iterator expected on the stack, got {:?}",
                        other.map(Value::type_name)
                    ),
                };
                let next = iter.borrow_mut().next()?;
                match next {
                    Some(value) => self.stack.push(value),
                    None => {
                        if let Some(pipe) = iter.borrow().source_pipe() {
                            record_pipe_exit(self.shell, &pipe);
                        }
                        self.frame_mut().ip += offset;
                    }
                }
            }
            OpCode::EndFor => {
                self.pop();
            }
            _ => unreachable!("not an iteration opcode"),
        }
        Ok(())
    }
}
