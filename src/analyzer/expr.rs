use super::Analyzer;
use crate::ast::{BinaryOp, CallExpr, ClosureExpr, Expr, ExprKind, Keyword, Literal, Param};
use crate::scope::{FnId, FunctionData, ScopeKind, VarId};
use crate::value::{RuntimeError, TypeValue, Value, parse_number};

impl Analyzer<'_> {
    pub(super) fn analyze_expr(&mut self, expr: &mut Expr) -> Result<(), RuntimeError> {
        self.last_pos = expr.pos;
        let is_root = expr.is_root;
        // Pipes rewrite the node into the consumer call, so they are
        // handled before the in-place cases.
        if matches!(
            expr.kind,
            ExprKind::Binary {
                op: BinaryOp::Pipe,
                ..
            }
        ) {
            let ExprKind::Binary {
                mut left,
                mut right,
                ..
            } = std::mem::replace(
                &mut expr.kind,
                ExprKind::Literal {
                    literal: Literal::Nil,
                    constant: Some(Value::Nil),
                },
            )
            else {
                unreachable!();
            };
            expr.kind = self.analyze_pipe(&mut left, &mut right)?;
            return Ok(());
        }
        match &mut expr.kind {
            // Registration consumed real declarations; one showing up
            // unregistered was nested somewhere the language does not
            // allow.
            ExprKind::Struct(s) if s.symbol.is_some() => Ok(()),
            ExprKind::Function(f) if f.symbol.is_some() => Ok(()),
            ExprKind::Module(_) | ExprKind::Struct(_) | ExprKind::Function(_) => Err(
                RuntimeError::general("declarations are only allowed at module level"),
            ),
            ExprKind::Let {
                names,
                symbols,
                value,
            } => {
                if names.iter().any(|n| n.starts_with('$')) {
                    return Err(RuntimeError::invalid_assignment());
                }
                // The binding is registered before the right-hand side is
                // analysed, so the initialiser can see it.
                let scope = self.scope;
                *symbols = names
                    .iter()
                    .map(|name| self.symbols.add_variable(scope, name))
                    .collect();
                value.is_root = false;
                self.analyze_expr(value)
            }
            ExprKind::New(new) => self.analyze_new(new),
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                cond.is_root = false;
                self.analyze_expr(cond)?;
                // Branches take the `if`'s own root flag: an `if` in value
                // position yields its branch value.
                then_branch.is_root = is_root;
                self.in_block_scope(|a| a.analyze_expr(then_branch))?;
                if let Some(else_branch) = else_branch {
                    else_branch.is_root = is_root;
                    self.in_block_scope(|a| a.analyze_expr(else_branch))?;
                }
                Ok(())
            }
            ExprKind::For {
                names,
                symbols,
                iterable,
                body,
            } => {
                iterable.is_root = false;
                self.analyze_expr(iterable)?;
                let saved = self.scope;
                let body_scope = self.symbols.push_scope(ScopeKind::Block, saved);
                self.scope = body_scope;
                *symbols = names
                    .iter()
                    .map(|name| self.symbols.add_variable(body_scope, name))
                    .collect();
                self.loop_depth += 1;
                body.is_root = true;
                let result = self.analyze_expr(body);
                self.loop_depth -= 1;
                self.scope = saved;
                result
            }
            ExprKind::While { cond, body } => {
                cond.is_root = false;
                self.analyze_expr(cond)?;
                self.loop_depth += 1;
                body.is_root = true;
                let result = self.in_block_scope(|a| a.analyze_expr(body));
                self.loop_depth -= 1;
                result
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    item.is_root = false;
                    self.analyze_expr(item)?;
                }
                Ok(())
            }
            ExprKind::Dictionary(entries) => {
                for (key, value) in entries {
                    key.is_root = false;
                    self.analyze_expr(key)?;
                    if let Some(value) = value {
                        value.is_root = false;
                        self.analyze_expr(value)?;
                    }
                }
                Ok(())
            }
            ExprKind::Block(body) => {
                let last = body.len().saturating_sub(1);
                self.in_block_scope(|a| {
                    for (i, child) in body.iter_mut().enumerate() {
                        child.is_root = is_root || i != last;
                        a.analyze_expr(child)?;
                    }
                    Ok(())
                })
            }
            ExprKind::Keyword { keyword, value } => {
                match keyword {
                    Keyword::Return => {
                        if self.fn_stack.is_empty() {
                            return Err(RuntimeError::general("return outside a function"));
                        }
                    }
                    Keyword::Break | Keyword::Continue => {
                        if self.loop_depth == 0 {
                            return Err(RuntimeError::general("break outside a loop"));
                        }
                        if value.is_some() {
                            return Err(RuntimeError::general(
                                "break does not take a value",
                            ));
                        }
                    }
                }
                if let Some(value) = value {
                    value.is_root = false;
                    self.analyze_expr(value)?;
                }
                Ok(())
            }
            ExprKind::Binary { op, left, right } => match op {
                BinaryOp::Assign => self.analyze_assignment(left, right),
                BinaryOp::Pipe => unreachable!("pipes are rewritten above"),
                _ => {
                    left.is_root = false;
                    right.is_root = false;
                    self.analyze_expr(left)?;
                    self.analyze_expr(right)
                }
            },
            ExprKind::Unary { operand, .. } => {
                operand.is_root = false;
                self.analyze_expr(operand)
            }
            ExprKind::FieldAccess { object, .. } => {
                object.is_root = false;
                self.analyze_expr(object)
            }
            ExprKind::Range { from, to, .. } => {
                if let Some(from) = from {
                    from.is_root = false;
                    self.analyze_expr(from)?;
                }
                if let Some(to) = to {
                    to.is_root = false;
                    self.analyze_expr(to)?;
                }
                Ok(())
            }
            ExprKind::Indexer { target, index } => {
                target.is_root = false;
                index.is_root = false;
                self.analyze_expr(target)?;
                self.analyze_expr(index)
            }
            ExprKind::Type {
                name,
                constant,
                struct_symbol,
            } => {
                if let Some(builtin) = TypeValue::from_name(name) {
                    *constant = Some(Value::Type(builtin));
                    Ok(())
                } else if let Some(sid) = self.symbols.lookup_struct(self.module, name, true) {
                    *struct_symbol = Some(sid);
                    Ok(())
                } else {
                    Err(RuntimeError::not_found(format!("type {}", name)))
                }
            }
            ExprKind::Variable { name, symbol } => {
                // Dollar-prefixed names are environment shell variables
                // and bypass the scope check entirely.
                if name.starts_with('$') {
                    return Ok(());
                }
                *symbol = Some(self.resolve_variable(name)?);
                Ok(())
            }
            ExprKind::Call(call) => self.analyze_call(call, None),
            ExprKind::Literal { literal, constant } => {
                *constant = Some(match literal {
                    Literal::Number(text) => parse_number(text)?,
                    Literal::String(s) | Literal::Bareword(s) => Value::string(s.clone()),
                    Literal::Bool(b) => Value::Boolean(*b),
                    Literal::Nil => Value::Nil,
                });
                Ok(())
            }
            ExprKind::FunctionReference { path, name, target } => {
                *target = Some(self.resolve_reference(path, name)?);
                Ok(())
            }
            ExprKind::StringInterpolation(parts) => {
                for part in parts {
                    if let crate::ast::InterpolationPart::Expr(e) = part {
                        e.is_root = false;
                        self.analyze_expr(e)?;
                    }
                }
                Ok(())
            }
            ExprKind::Closure(closure) => self.analyze_closure(closure),
        }
    }

    fn in_block_scope<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, RuntimeError>,
    ) -> Result<T, RuntimeError> {
        let saved = self.scope;
        self.scope = self.symbols.push_scope(ScopeKind::Block, saved);
        let result = f(self);
        self.scope = saved;
        result
    }

    /// Resolve a variable and record it in the capture set of every
    /// closure crossed between the use site and the owning scope.
    pub(super) fn resolve_variable(&mut self, name: &str) -> Result<VarId, RuntimeError> {
        match self.symbols.lookup_variable(self.scope, name) {
            Some((var, crossed)) => {
                for fid in crossed {
                    let data = self.symbols.function_mut(fid);
                    if !data.captured.contains(&var) {
                        data.captured.push(var);
                    }
                }
                Ok(var)
            }
            None => Err(RuntimeError::not_found(format!("variable {}", name))),
        }
    }

    /// `=` requires a known variable or an index expression on the left.
    fn analyze_assignment(
        &mut self,
        left: &mut Expr,
        right: &mut Expr,
    ) -> Result<(), RuntimeError> {
        match &mut left.kind {
            ExprKind::Variable { name, symbol } => {
                if name.starts_with('$') {
                    return Err(RuntimeError::invalid_assignment());
                }
                *symbol = Some(self.resolve_variable(name)?);
                right.is_root = false;
                self.analyze_expr(right)
            }
            ExprKind::Indexer { target, index } => {
                target.is_root = false;
                index.is_root = false;
                self.analyze_expr(target)?;
                self.analyze_expr(index)?;
                right.is_root = false;
                self.analyze_expr(right)
            }
            _ => Err(RuntimeError::invalid_assignment()),
        }
    }

    /// `left | right` threads the producer into the consumer. The node is
    /// replaced by the analysed consumer call.
    fn analyze_pipe(
        &mut self,
        left: &mut Box<Expr>,
        right: &mut Box<Expr>,
    ) -> Result<ExprKind, RuntimeError> {
        left.is_root = false;
        self.analyze_expr(left)?;
        let pos = left.pos;
        let producer = std::mem::replace(
            left.as_mut(),
            Expr::new(
                ExprKind::Literal {
                    literal: Literal::Nil,
                    constant: Some(Value::Nil),
                },
                pos,
            ),
        );
        match &mut right.kind {
            ExprKind::Call(call) => {
                self.analyze_call(call, Some(producer))?;
                Ok(std::mem::replace(&mut right.kind, ExprKind::Literal {
                    literal: Literal::Nil,
                    constant: Some(Value::Nil),
                }))
            }
            ExprKind::Closure(_) => {
                // Piping into a closure is a dynamic invocation with the
                // piped value as its first argument.
                let pos = right.pos;
                let closure = std::mem::replace(
                    right.as_mut(),
                    Expr::new(
                        ExprKind::Literal {
                            literal: Literal::Nil,
                            constant: Some(Value::Nil),
                        },
                        pos,
                    ),
                );
                let mut call = CallExpr::new(vec![], "call", vec![closure, producer]);
                self.analyze_call(&mut call, None)?;
                Ok(ExprKind::Call(Box::new(call)))
            }
            _ => Err(RuntimeError::invalid_operation(
                "pipe target must be a call or a closure",
            )),
        }
    }

    /// Register and analyse a closure body. The body moves into the
    /// symbol table like any function body; capture recording happens as
    /// variables resolve.
    pub(super) fn analyze_closure(
        &mut self,
        closure: &mut ClosureExpr,
    ) -> Result<(), RuntimeError> {
        let fid = self.symbols.add_closure(FunctionData {
            name: "<closure>".to_string(),
            module: self.module,
            params: closure
                .params
                .iter()
                .map(|name| Param::required(name.clone()))
                .collect(),
            param_symbols: Vec::new(),
            has_closure_param: false,
            is_closure: true,
            captured: Vec::new(),
            body: Vec::new(),
            analysed: true,
        });
        closure.symbol = Some(fid);

        let saved_scope = self.scope;
        let saved_loops = std::mem::take(&mut self.loop_depth);
        let body_scope = self.symbols.push_scope(ScopeKind::Closure(fid), saved_scope);
        self.scope = body_scope;
        let param_symbols = closure
            .params
            .iter()
            .map(|name| self.symbols.add_variable(body_scope, name))
            .collect();
        self.symbols.function_mut(fid).param_symbols = param_symbols;

        self.fn_stack.push(fid);
        let mut body = std::mem::take(&mut closure.body);
        let result = self.analyze_function_body(&mut body);
        self.symbols.function_mut(fid).body = body;
        self.fn_stack.pop();

        self.scope = saved_scope;
        self.loop_depth = saved_loops;
        result
    }

    pub(super) fn enclosing_function(&self) -> Option<FnId> {
        self.fn_stack.last().copied()
    }
}
