use super::{LoopContext, PageCompiler};
use crate::ast::{
    BinaryOp, Expr, ExprKind, InterpolationPart, Keyword, UnaryOp,
};
use crate::opcode::{OpCode, range_flags};
use crate::value::{RuntimeError, Value};

impl PageCompiler<'_> {
    /// Compile an expression in statement position: no value remains,
    /// except that a `let` leaves its binding as a new local slot.
    pub(super) fn compile_root(&mut self, expr: &Expr) -> Result<(), RuntimeError> {
        match &expr.kind {
            ExprKind::Function(_) | ExprKind::Struct(_) | ExprKind::Module(_) => Ok(()),
            ExprKind::Let { symbols, value, .. } => self.compile_let(symbols, value),
            ExprKind::If { .. } | ExprKind::For { .. } | ExprKind::While { .. }
            | ExprKind::Block(_) | ExprKind::Keyword { .. } => self.compile_statement(expr),
            ExprKind::Binary {
                op: BinaryOp::Assign,
                left,
                right,
            } => self.compile_assignment(left, right, true),
            _ => {
                self.compile_expr(expr)?;
                self.builder.emit(OpCode::Pop);
                self.depth -= 1;
                Ok(())
            }
        }
    }

    /// Compile an expression in value position: exactly one value is
    /// pushed.
    pub(super) fn compile_expr(&mut self, expr: &Expr) -> Result<(), RuntimeError> {
        match &expr.kind {
            ExprKind::Literal { constant, .. } => {
                let value = constant.clone().expect("literal analysed");
                self.builder.emit_const(value);
                self.depth += 1;
                Ok(())
            }
            ExprKind::StringInterpolation(parts) => {
                for part in parts {
                    match part {
                        InterpolationPart::Text(text) => {
                            self.builder.emit_const(Value::string(text.clone()));
                            self.depth += 1;
                        }
                        InterpolationPart::Expr(e) => self.compile_expr(e)?,
                    }
                }
                assert!(parts.len() <= u8::MAX as usize, "interpolation too long");
                self.builder.emit(OpCode::BuildString);
                self.builder.emit_u8(parts.len() as u8);
                self.depth = self.depth - parts.len() + 1;
                Ok(())
            }
            ExprKind::Variable { name, symbol } => {
                if let Some(env) = name.strip_prefix('$') {
                    let idx = self.builder.add_constant(Value::string(env));
                    self.builder.emit(OpCode::LoadEnv);
                    self.builder.emit_u16(idx);
                    self.depth += 1;
                    Ok(())
                } else {
                    let var = symbol.expect("variable analysed");
                    self.emit_load(var);
                    Ok(())
                }
            }
            ExprKind::Type {
                constant,
                struct_symbol,
                ..
            } => {
                if let Some(value) = constant {
                    self.builder.emit_const(value.clone());
                } else {
                    let sid = struct_symbol.expect("type analysed");
                    self.builder.emit(OpCode::StructConst);
                    self.builder.emit_u16(sid.0 as u16);
                }
                self.depth += 1;
                Ok(())
            }
            ExprKind::Tuple(items) => {
                for item in items {
                    self.compile_expr(item)?;
                }
                assert!(items.len() <= u8::MAX as usize, "tuple literal too long");
                self.builder.emit(OpCode::BuildTuple);
                self.builder.emit_u8(items.len() as u8);
                self.depth = self.depth - items.len() + 1;
                Ok(())
            }
            ExprKind::List(items) => {
                for item in items {
                    self.compile_expr(item)?;
                }
                if items.len() <= u8::MAX as usize {
                    self.builder.emit(OpCode::BuildList);
                    self.builder.emit_u8(items.len() as u8);
                } else {
                    self.builder.emit(OpCode::BuildListBig);
                    self.builder.emit_u32(items.len() as u32);
                }
                self.depth = self.depth - items.len() + 1;
                Ok(())
            }
            ExprKind::Dictionary(entries) => {
                let is_set = !entries.is_empty() && entries.iter().all(|(_, v)| v.is_none());
                assert!(entries.len() <= u8::MAX as usize, "literal too long");
                if is_set {
                    for (key, _) in entries {
                        self.compile_expr(key)?;
                    }
                    self.builder.emit(OpCode::BuildSet);
                    self.builder.emit_u8(entries.len() as u8);
                    self.depth = self.depth - entries.len() + 1;
                } else {
                    for (key, value) in entries {
                        self.compile_expr(key)?;
                        match value {
                            Some(value) => self.compile_expr(value)?,
                            None => {
                                self.builder.emit_const(Value::Nil);
                                self.depth += 1;
                            }
                        }
                    }
                    self.builder.emit(OpCode::BuildDict);
                    self.builder.emit_u8(entries.len() as u8);
                    self.depth = self.depth - entries.len() * 2 + 1;
                }
                Ok(())
            }
            ExprKind::Range {
                from,
                to,
                inclusive,
            } => {
                let mut flags = 0u8;
                if let Some(from) = from {
                    self.compile_expr(from)?;
                    flags |= range_flags::HAS_FROM;
                }
                if let Some(to) = to {
                    self.compile_expr(to)?;
                    flags |= range_flags::HAS_TO;
                }
                if *inclusive {
                    flags |= range_flags::INCLUSIVE;
                }
                self.builder.emit(OpCode::BuildRange);
                self.builder.emit_u8(flags);
                let popped = usize::from(from.is_some()) + usize::from(to.is_some());
                self.depth = self.depth - popped + 1;
                Ok(())
            }
            ExprKind::Indexer { target, index } => {
                self.compile_expr(target)?;
                self.compile_expr(index)?;
                self.builder.emit(OpCode::Index);
                self.depth -= 1;
                Ok(())
            }
            ExprKind::FieldAccess { object, field } => {
                self.compile_expr(object)?;
                self.builder.emit_const(Value::string(field.clone()));
                self.depth += 1;
                self.builder.emit(OpCode::Index);
                self.depth -= 1;
                Ok(())
            }
            ExprKind::Unary { op, operand } => {
                self.compile_expr(operand)?;
                self.builder.emit(match op {
                    UnaryOp::Negate => OpCode::Negate,
                    UnaryOp::Not => OpCode::Not,
                });
                Ok(())
            }
            ExprKind::Binary { op, left, right } => self.compile_binary(*op, left, right),
            ExprKind::Block(body) => self.compile_block(body, false),
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => self.compile_if(cond, then_branch, else_branch.as_deref(), expr.is_root),
            ExprKind::For { .. } | ExprKind::While { .. } => {
                self.compile_statement(expr)?;
                // Loops yield nil in value position.
                self.builder.emit_const(Value::Nil);
                self.depth += 1;
                Ok(())
            }
            ExprKind::Let { symbols, value, .. } => {
                self.compile_let(symbols, value)?;
                if symbols.len() == 1 {
                    self.emit_load(symbols[0]);
                } else {
                    self.builder.emit_const(Value::Nil);
                    self.depth += 1;
                }
                Ok(())
            }
            ExprKind::Keyword { .. } => {
                // Diverging keywords still satisfy the one-value contract
                // for the unreachable fall-through.
                self.compile_statement(expr)?;
                self.builder.emit_const(Value::Nil);
                self.depth += 1;
                Ok(())
            }
            ExprKind::New(new) => self.compile_new(new),
            ExprKind::Call(call) => self.compile_call(call, expr.is_root),
            ExprKind::FunctionReference { target, .. } => {
                let target = target.clone().expect("reference analysed");
                self.emit_reference_const(target);
                Ok(())
            }
            ExprKind::Closure(closure) => {
                let fid = closure.symbol.expect("closure analysed");
                self.compile_closure_value(fid)
            }
            ExprKind::Function(_) | ExprKind::Struct(_) | ExprKind::Module(_) => {
                Err(RuntimeError::general("declaration in value position"))
            }
        }
    }

    /// Root-only statements: blocks, branches, loops and keywords.
    fn compile_statement(&mut self, expr: &Expr) -> Result<(), RuntimeError> {
        match &expr.kind {
            ExprKind::Block(body) => self.compile_block(body, true).map(|_| ()),
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => self.compile_if(cond, then_branch, else_branch.as_deref(), true),
            ExprKind::While { cond, body } => self.compile_while(cond, body),
            ExprKind::For {
                symbols,
                iterable,
                body,
                ..
            } => self.compile_for(symbols, iterable, body),
            ExprKind::Keyword { keyword, value } => self.compile_keyword(*keyword, value.as_deref()),
            _ => unreachable!("not a statement"),
        }
    }

    /// A block establishes a stack watermark; `ExitBlock` trims back to
    /// it, keeping the final value when the block carries one.
    fn compile_block(&mut self, body: &[Expr], is_root: bool) -> Result<(), RuntimeError> {
        let watermark = self.depth;
        if body.is_empty() {
            if !is_root {
                self.builder.emit_const(Value::Nil);
                self.depth += 1;
            }
            return Ok(());
        }
        let last = body.len() - 1;
        for (i, child) in body.iter().enumerate() {
            if is_root || i != last {
                self.compile_root(child)?;
            } else {
                self.compile_expr(child)?;
            }
        }
        let keep = !is_root;
        let locals = self.depth - watermark - usize::from(keep);
        if locals > 0 {
            assert!(locals <= u8::MAX as usize, "too many block locals");
            self.builder.emit(OpCode::ExitBlock);
            self.builder.emit_u8(locals as u8);
            self.builder.emit_u8(u8::from(keep));
            self.depth = watermark + usize::from(keep);
        }
        Ok(())
    }

    fn compile_if(
        &mut self,
        cond: &Expr,
        then_branch: &Expr,
        else_branch: Option<&Expr>,
        is_root: bool,
    ) -> Result<(), RuntimeError> {
        let else_site = self.compile_condition(cond)?;
        let before = self.depth;
        self.compile_branch(then_branch)?;
        if is_root {
            match else_branch {
                Some(else_branch) => {
                    let end_site = self.builder.emit_jump(OpCode::Jump);
                    self.builder.patch_jump(else_site);
                    self.depth = before;
                    self.compile_branch(else_branch)?;
                    self.builder.patch_jump(end_site);
                }
                None => self.builder.patch_jump(else_site),
            }
        } else {
            let end_site = self.builder.emit_jump(OpCode::Jump);
            self.builder.patch_jump(else_site);
            self.depth = before;
            match else_branch {
                Some(else_branch) => self.compile_branch(else_branch)?,
                None => {
                    self.builder.emit_const(Value::Nil);
                    self.depth += 1;
                }
            }
            self.builder.patch_jump(end_site);
        }
        Ok(())
    }

    /// A branch body nets zero slots in root position and one in value
    /// position, regardless of its shape.
    fn compile_branch(&mut self, branch: &Expr) -> Result<(), RuntimeError> {
        let before = self.depth;
        if branch.is_root {
            self.compile_root(branch)?;
            let extra = self.depth - before;
            if extra > 0 {
                assert!(extra <= u8::MAX as usize);
                self.builder.emit(OpCode::PopArgs);
                self.builder.emit_u8(extra as u8);
                self.depth = before;
            }
        } else {
            self.compile_expr(branch)?;
        }
        Ok(())
    }

    fn compile_while(&mut self, cond: &Expr, body: &Expr) -> Result<(), RuntimeError> {
        let continue_target = self.builder.position();
        let exit_site = self.compile_condition(cond)?;
        self.loops.push(LoopContext {
            continue_target,
            entry_depth: self.depth,
            breaks: Vec::new(),
        });
        self.compile_branch(body)?;
        self.builder.emit_jump_backward(continue_target);
        self.builder.patch_jump(exit_site);
        let ctx = self.loops.pop().expect("loop context");
        for site in ctx.breaks {
            self.builder.patch_jump(site);
        }
        Ok(())
    }

    fn compile_for(
        &mut self,
        symbols: &[crate::scope::VarId],
        iterable: &Expr,
        body: &Expr,
    ) -> Result<(), RuntimeError> {
        self.compile_expr(iterable)?;
        self.builder.emit(OpCode::GetIter);
        let entry_depth = self.depth;

        let continue_target = self.builder.position();
        self.builder.emit(OpCode::ForIter);
        let exhausted_site = self.builder.position();
        self.builder.emit_u16(0xffff);
        self.depth += 1;

        // Bind the loop identifiers to the freshly pushed element.
        if symbols.len() == 1 {
            self.locals.insert(symbols[0], (self.depth - 1) as u16);
        } else {
            self.builder.emit(OpCode::Unpack);
            self.builder.emit_u8(symbols.len() as u8);
            self.depth = self.depth - 1 + symbols.len();
            let base = self.depth - symbols.len();
            for (i, var) in symbols.iter().enumerate() {
                self.locals.insert(*var, (base + i) as u16);
            }
        }

        self.loops.push(LoopContext {
            continue_target,
            entry_depth,
            breaks: Vec::new(),
        });
        self.compile_branch(body)?;

        let bound = self.depth - entry_depth;
        if bound > 0 {
            self.builder.emit(OpCode::PopArgs);
            self.builder.emit_u8(bound as u8);
            self.depth = entry_depth;
        }
        self.builder.emit_jump_backward(continue_target);
        self.builder.patch_jump(exhausted_site);

        let ctx = self.loops.pop().expect("loop context");
        for site in ctx.breaks {
            self.builder.patch_jump(site);
        }
        self.builder.emit(OpCode::EndFor);
        self.depth -= 1;
        Ok(())
    }

    fn compile_keyword(
        &mut self,
        keyword: Keyword,
        value: Option<&Expr>,
    ) -> Result<(), RuntimeError> {
        match keyword {
            Keyword::Return => {
                let before = self.depth;
                match value {
                    Some(value) => self.compile_expr(value)?,
                    None => {
                        self.builder.emit_const(Value::Nil);
                        self.depth += 1;
                    }
                }
                self.builder.emit(OpCode::Ret);
                self.depth = before;
                Ok(())
            }
            Keyword::Break => {
                let ctx = self.loops.last().expect("break inside a loop");
                let unwind = self.depth - ctx.entry_depth;
                if unwind > 0 {
                    self.builder.emit(OpCode::PopArgs);
                    self.builder.emit_u8(unwind as u8);
                }
                let site = self.builder.emit_jump(OpCode::Jump);
                self.loops.last_mut().unwrap().breaks.push(site);
                Ok(())
            }
            Keyword::Continue => {
                let ctx = self.loops.last().expect("continue inside a loop");
                let (target, unwind) = (ctx.continue_target, self.depth - ctx.entry_depth);
                if unwind > 0 {
                    self.builder.emit(OpCode::PopArgs);
                    self.builder.emit_u8(unwind as u8);
                }
                self.builder.emit_jump_backward(target);
                Ok(())
            }
        }
    }

    fn compile_let(
        &mut self,
        symbols: &[crate::scope::VarId],
        value: &Expr,
    ) -> Result<(), RuntimeError> {
        self.compile_expr(value)?;
        if symbols.len() == 1 {
            // The value in place becomes the local's slot.
            self.locals.insert(symbols[0], (self.depth - 1) as u16);
        } else {
            self.builder.emit(OpCode::Unpack);
            self.builder.emit_u8(symbols.len() as u8);
            self.depth = self.depth - 1 + symbols.len();
            let base = self.depth - symbols.len();
            for (i, var) in symbols.iter().enumerate() {
                self.locals.insert(*var, (base + i) as u16);
            }
        }
        Ok(())
    }

    fn compile_assignment(
        &mut self,
        left: &Expr,
        right: &Expr,
        is_root: bool,
    ) -> Result<(), RuntimeError> {
        match &left.kind {
            ExprKind::Variable { symbol, .. } => {
                let var = symbol.expect("assignment target analysed");
                self.compile_expr(right)?;
                self.emit_store(var);
                if !is_root {
                    self.emit_load(var);
                }
                Ok(())
            }
            ExprKind::Indexer { target, index } => {
                self.compile_expr(target)?;
                self.compile_expr(index)?;
                self.compile_expr(right)?;
                self.builder.emit(OpCode::StoreIndex);
                self.depth -= 2;
                if is_root {
                    self.builder.emit(OpCode::Pop);
                    self.depth -= 1;
                }
                Ok(())
            }
            _ => Err(RuntimeError::invalid_assignment()),
        }
    }

    fn compile_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
    ) -> Result<(), RuntimeError> {
        match op {
            BinaryOp::Assign => self.compile_assignment(left, right, false),
            BinaryOp::Pipe => unreachable!("pipes are rewritten by the analyser"),
            BinaryOp::And | BinaryOp::Or => self.compile_logical(op, left, right),
            _ => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.builder.emit(match op {
                    BinaryOp::Add => OpCode::Add,
                    BinaryOp::Sub => OpCode::Sub,
                    BinaryOp::Mul => OpCode::Mul,
                    BinaryOp::Div => OpCode::Div,
                    BinaryOp::Mod => OpCode::Mod,
                    BinaryOp::Equal => OpCode::Equal,
                    BinaryOp::NotEqual => OpCode::NotEqual,
                    BinaryOp::Greater => OpCode::Greater,
                    BinaryOp::GreaterEqual => OpCode::GreaterEqual,
                    BinaryOp::Less => OpCode::Less,
                    BinaryOp::LessEqual => OpCode::LessEqual,
                    BinaryOp::In => OpCode::Contains,
                    _ => unreachable!(),
                });
                self.depth -= 1;
                Ok(())
            }
        }
    }

    /// `&&`/`||` short-circuit with non-popping jumps; when both operands
    /// are side-effect-free the dedicated opcode is cheaper than a branch.
    fn compile_logical(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
    ) -> Result<(), RuntimeError> {
        if Self::is_effect_free(left) && Self::is_effect_free(right) {
            self.compile_expr(left)?;
            self.compile_expr(right)?;
            self.builder.emit(if op == BinaryOp::And {
                OpCode::And
            } else {
                OpCode::Or
            });
            self.depth -= 1;
            return Ok(());
        }
        self.compile_expr(left)?;
        let site = self.builder.emit_jump(if op == BinaryOp::And {
            OpCode::JumpIfNot
        } else {
            OpCode::JumpIf
        });
        self.builder.emit(OpCode::Pop);
        self.depth -= 1;
        self.compile_expr(right)?;
        self.builder.patch_jump(site);
        Ok(())
    }
}
