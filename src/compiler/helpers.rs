use super::PageCompiler;
use crate::ast::{Expr, ExprKind, UnaryOp};
use crate::opcode::OpCode;
use crate::scope::VarId;
use crate::value::RuntimeError;

impl PageCompiler<'_> {
    /// Push a variable: a local slot of this frame, or an index into the
    /// executing closure's captured frame.
    pub(super) fn emit_load(&mut self, var: VarId) {
        if let Some(&slot) = self.locals.get(&var) {
            self.builder.emit(OpCode::Load);
            self.builder.emit_u16(slot);
        } else if let Some(&index) = self.captured.get(&var) {
            self.builder.emit(OpCode::LoadUpper);
            self.builder.emit_u16(index);
        } else {
            unreachable!("variable {:?} has no slot in this page", var);
        }
        self.depth += 1;
    }

    pub(super) fn emit_store(&mut self, var: VarId) {
        if let Some(&slot) = self.locals.get(&var) {
            self.builder.emit(OpCode::Store);
            self.builder.emit_u16(slot);
        } else if let Some(&index) = self.captured.get(&var) {
            self.builder.emit(OpCode::StoreUpper);
            self.builder.emit_u16(index);
        } else {
            unreachable!("variable {:?} has no slot in this page", var);
        }
        self.depth -= 1;
    }

    /// Compile a branch condition and emit the popping conditional jump,
    /// folding a `!` prefix into the opposite jump.
    pub(super) fn compile_condition(&mut self, cond: &Expr) -> Result<usize, RuntimeError> {
        let site = if let ExprKind::Unary {
            op: UnaryOp::Not,
            operand,
        } = &cond.kind
        {
            self.compile_expr(operand)?;
            self.builder.emit_jump(OpCode::PopJumpIf)
        } else {
            self.compile_expr(cond)?;
            self.builder.emit_jump(OpCode::PopJumpIfNot)
        };
        self.depth -= 1;
        Ok(site)
    }

    /// True for operands whose evaluation cannot run user code or touch
    /// the outside world.
    pub(super) fn is_effect_free(expr: &Expr) -> bool {
        matches!(
            expr.kind,
            ExprKind::Literal { .. } | ExprKind::Variable { .. } | ExprKind::Type { .. }
        )
    }
}
