//! Constant folding
//!
//! Stands in for expression analysis wherever a compile-time constant is
//! required. Integer literal arithmetic, references to constant declarations
//! and `sizeof(T)` fold into `Const` nodes; anything else is left untouched.

use crate::frontend::ast::{BinaryOp, ConstValue, DeclId, DeclKind, Expr, ExprKind, ResolveStatus, UnaryOp};
use crate::frontend::semantic::Context;
use crate::types::TypeId;
use crate::utils::{Error, Result, Span};

impl Context {
    /// Analyze `expr`, folding it in place when it is constant.
    pub fn analyze_expr(&mut self, expected: Option<TypeId>, expr: &mut Expr) -> Result<()> {
        if let Some(value) = self.fold(expr)? {
            expr.kind = ExprKind::Const(ConstValue::Int(value));
            if let Some(ty) = expected {
                self.coerce_constant(value, ty, expr.span)?;
                expr.ty = ty;
            }
        }
        Ok(())
    }

    /// Analyze `expr` where a value of type `required` is expected
    pub fn analyze_expr_of_required_type(&mut self, required: TypeId, expr: &mut Expr) -> Result<()> {
        self.analyze_expr(Some(required), expr)
    }

    fn coerce_constant(&self, value: i128, ty: TypeId, span: Span) -> Result<()> {
        let Some(bits) = self.types.bit_width(ty) else {
            return Ok(());
        };
        if !self.types.is_integer(ty) {
            return Ok(());
        }
        let (min, max) = if self.types.is_signed(ty) {
            (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
        } else {
            (0, (1i128 << bits) - 1)
        };
        if value < min || value > max {
            return Err(Error::ConstantOverflow {
                value,
                ty: self.types.name(ty).to_string(),
                span,
            });
        }
        Ok(())
    }

    /// Integer value of `expr` when it is a compile-time constant
    fn fold(&mut self, expr: &mut Expr) -> Result<Option<i128>> {
        match &mut expr.kind {
            ExprKind::Const(ConstValue::Int(v)) => Ok(Some(*v)),
            ExprKind::Const(_) => Ok(None),
            ExprKind::Unary { op, expr: inner } => {
                let op = *op;
                let span = expr.span;
                let Some(v) = self.fold(inner)? else {
                    return Ok(None);
                };
                match op {
                    UnaryOp::Neg => v.checked_neg().map(Some).ok_or(Error::ArithmeticOverflow { span }),
                    UnaryOp::BitNeg => Ok(Some(!v)),
                    _ => Ok(None),
                }
            }
            ExprKind::Binary { op, left, right } => {
                let op = *op;
                let span = expr.span;
                let (Some(l), Some(r)) = (self.fold(left)?, self.fold(right)?) else {
                    return Ok(None);
                };
                fold_binary(op, l, r, span)
            }
            ExprKind::Identifier(decl) => {
                let decl = *decl;
                self.fold_const_decl(decl, expr.span)
            }
            ExprKind::Sizeof(type_info) => {
                let type_info = *type_info;
                let ty = self.resolve_type_info(type_info)?;
                Ok(Some(i128::from(self.size_of(ty))))
            }
            _ => Ok(None),
        }
    }

    pub(crate) fn fold_const_decl(&mut self, decl_id: DeclId, span: Span) -> Result<Option<i128>> {
        let decl = self.decl(decl_id);
        match decl.status {
            ResolveStatus::Running => {
                return Err(Error::CircularDependency {
                    name: decl.name.name.clone(),
                    span,
                });
            }
            ResolveStatus::Done if decl.is_poisoned() => return Err(Error::Poisoned { span }),
            _ => {}
        }

        let placeholder = Box::new(Expr::new(ExprKind::Poisoned, self.types.poisoned(), span));
        let mut value = match &mut self.decl_mut(decl_id).kind {
            DeclKind::Const { value } => std::mem::replace(value, placeholder),
            _ => return Ok(None),
        };

        self.decl_mut(decl_id).status = ResolveStatus::Running;
        let folded = self.fold(&mut value);
        if let Ok(Some(v)) = folded {
            value.kind = ExprKind::Const(ConstValue::Int(v));
        }
        if let DeclKind::Const { value: slot } = &mut self.decl_mut(decl_id).kind {
            *slot = value;
        }

        match folded {
            Ok(result) => {
                let decl = self.decl_mut(decl_id);
                decl.status = ResolveStatus::Done;
                Ok(result)
            }
            Err(e) => {
                self.poison_decl(decl_id);
                Err(e)
            }
        }
    }
}

/// Fold one operator. Operators without a constant meaning yield `None`;
/// a result outside the folding range is an error.
fn fold_binary(op: BinaryOp, l: i128, r: i128, span: Span) -> Result<Option<i128>> {
    let checked = match op {
        BinaryOp::Add | BinaryOp::AddMod => l.checked_add(r),
        BinaryOp::Sub | BinaryOp::SubMod => l.checked_sub(r),
        BinaryOp::Mult | BinaryOp::MultMod => l.checked_mul(r),
        BinaryOp::Div | BinaryOp::Mod if r == 0 => return Err(Error::DivisionByZero { span }),
        BinaryOp::Div => l.checked_div(r),
        BinaryOp::Mod => l.checked_rem(r),
        BinaryOp::Shl => u32::try_from(r).ok().and_then(|s| l.checked_shl(s)),
        BinaryOp::Shr => u32::try_from(r).ok().and_then(|s| l.checked_shr(s)),
        BinaryOp::BitAnd => Some(l & r),
        BinaryOp::BitOr => Some(l | r),
        BinaryOp::BitXor => Some(l ^ r),
        _ => return Ok(None),
    };
    checked.map(Some).ok_or(Error::ArithmeticOverflow { span })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::Ident;
    use crate::types::PrimitiveType;

    fn int(ctx: &Context, v: i128) -> Expr {
        Expr::int(v, ctx.types.primitive(PrimitiveType::I32))
    }

    #[test]
    fn test_fold_arithmetic() {
        let mut ctx = Context::default();
        let ty = ctx.types.primitive(PrimitiveType::I32);
        let mut expr = Expr::binary(
            BinaryOp::Mult,
            Expr::binary(BinaryOp::Add, int(&ctx, 2), int(&ctx, 3), ty),
            Expr::unary(UnaryOp::Neg, int(&ctx, 4), ty),
            ty,
        );
        ctx.analyze_expr(None, &mut expr).unwrap();
        assert_eq!(expr.const_int(), Some(-20));
    }

    #[test]
    fn test_fold_division_by_zero() {
        let mut ctx = Context::default();
        let ty = ctx.types.primitive(PrimitiveType::I32);
        let mut expr = Expr::binary(BinaryOp::Div, int(&ctx, 1), int(&ctx, 0), ty);
        let err = ctx.analyze_expr(None, &mut expr).unwrap_err();
        assert!(matches!(err, Error::DivisionByZero { .. }));
    }

    #[test]
    fn test_fold_overflow_is_reported() {
        let mut ctx = Context::default();
        let ty = ctx.types.primitive(PrimitiveType::I32);
        let mut shift = Expr::binary(BinaryOp::Shl, int(&ctx, 1), int(&ctx, 200), ty);
        let err = ctx.analyze_expr(None, &mut shift).unwrap_err();
        assert!(matches!(err, Error::ArithmeticOverflow { .. }));

        let mut negative_shift = Expr::binary(BinaryOp::Shr, int(&ctx, 8), int(&ctx, -1), ty);
        let err = ctx.analyze_expr(None, &mut negative_shift).unwrap_err();
        assert!(matches!(err, Error::ArithmeticOverflow { .. }));

        let big = Expr::binary(BinaryOp::Mult, int(&ctx, i128::MAX), int(&ctx, 2), ty);
        let mut nested = Expr::binary(BinaryOp::Add, big, int(&ctx, 1), ty);
        let err = ctx.analyze_expr(None, &mut nested).unwrap_err();
        assert!(matches!(err, Error::ArithmeticOverflow { .. }));
    }

    #[test]
    fn test_required_type_range() {
        let mut ctx = Context::default();
        let byte = ctx.types.primitive(PrimitiveType::U8);
        let mut ok = int(&ctx, 255);
        ctx.analyze_expr_of_required_type(byte, &mut ok).unwrap();
        assert_eq!(ok.ty, byte);

        let mut too_big = int(&ctx, 256);
        let err = ctx.analyze_expr_of_required_type(byte, &mut too_big).unwrap_err();
        assert!(matches!(err, Error::ConstantOverflow { value: 256, .. }));
    }

    #[test]
    fn test_fold_constant_declaration() {
        let mut ctx = Context::default();
        let main = ctx.current_module;
        let ty = ctx.types.primitive(PrimitiveType::I32);
        let value = Box::new(Expr::binary(BinaryOp::Shl, int(&ctx, 1), int(&ctx, 4), ty));
        let decl = ctx
            .declare(main, Ident::new("SIZE", Span::dummy()), DeclKind::Const { value })
            .unwrap();
        let mut expr = Expr::binary(BinaryOp::Add, Expr::ident(decl, ty), int(&ctx, 1), ty);
        ctx.analyze_expr(None, &mut expr).unwrap();
        assert_eq!(expr.const_int(), Some(17));
        assert_eq!(ctx.decl(decl).status, ResolveStatus::Done);
    }

    #[test]
    fn test_self_referential_constant() {
        let mut ctx = Context::default();
        let main = ctx.current_module;
        let ty = ctx.types.primitive(PrimitiveType::I32);
        // const A = A + 1;
        let value = Box::new(Expr::binary(BinaryOp::Add, Expr::ident(DeclId(0), ty), int(&ctx, 1), ty));
        let decl = ctx
            .declare(main, Ident::new("A", Span::dummy()), DeclKind::Const { value })
            .unwrap();
        let mut expr = Expr::ident(decl, ty);
        let err = ctx.analyze_expr(None, &mut expr).unwrap_err();
        assert!(matches!(err, Error::CircularDependency { .. }));
        assert!(ctx.decl(decl).is_poisoned());
    }

    #[test]
    fn test_non_constant_left_alone() {
        let mut ctx = Context::default();
        let main = ctx.current_module;
        let ty = ctx.types.primitive(PrimitiveType::I32);
        let info = ctx.builtin_type_info(ty, Span::dummy());
        let var = ctx
            .declare(main, Ident::new("x", Span::dummy()), DeclKind::Var { type_info: info })
            .unwrap();
        let mut expr = Expr::binary(BinaryOp::Add, Expr::ident(var, ty), int(&ctx, 1), ty);
        ctx.analyze_expr(None, &mut expr).unwrap();
        assert_eq!(expr.const_int(), None);
    }
}
