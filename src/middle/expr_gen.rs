//! Expression code generation
//!
//! Lowers typed, folded expressions into SSA through the [`IRBuilder`].
//! `emit_expr` yields the value of an expression, `emit_address` the storage
//! location of an lvalue. Only identifiers, dereferences, field accesses and
//! subscripts are addressable.
//!
//! Unfolded kinds (`sizeof`, `try`, type expressions) and poisoned nodes are
//! internal errors. Language features without a lowering yet report
//! [`Error::Unsupported`].

use std::collections::HashMap;

use log::trace;

use crate::frontend::ast::{
    BinaryOp, CastKind, ConstValue, DeclId, DeclKind, Expr, ExprKind, PostUnaryOp, UnaryOp,
};
use crate::frontend::semantic::Context;
use crate::middle::builder::{zero_of, IRBuilder};
use crate::middle::ir::{
    BinOp, CastOp, Constant, FloatPredicate, IRModule, IRType, IntPredicate, UnaryOp as IRUnaryOp,
    Value,
};
use crate::types::{PrimitiveType, TypeId, TypeKind};
use crate::utils::{Error, Result, Span};

/// Generation state for one compilation unit
pub struct GenContext<'a> {
    sema: &'a Context,
    pub builder: IRBuilder,
    /// Address of each variable's storage
    storage: HashMap<DeclId, Value>,
    /// Symbol of each declared function
    functions: HashMap<DeclId, String>,
}

impl<'a> GenContext<'a> {
    pub fn new(sema: &'a Context, module_name: &str) -> Result<Self> {
        let bits = sema.types.target().pointer_bits;
        if bits != 64 {
            return Err(Error::Unsupported {
                feature: format!("{}-bit targets", bits),
                span: None,
            });
        }
        Ok(Self {
            sema,
            builder: IRBuilder::new(module_name),
            storage: HashMap::new(),
            functions: HashMap::new(),
        })
    }

    pub fn finish(self) -> Result<IRModule> {
        self.builder.finish()
    }

    fn decl_type(&self, decl: DeclId) -> Result<TypeId> {
        let d = self.sema.decl(decl);
        match d.ty {
            Some(ty) if !d.is_poisoned() => Ok(ty),
            _ => Err(Error::Internal(format!("'{}' reached codegen unresolved", d.name.name))),
        }
    }

    /// Use `address` as the storage of a variable
    pub fn bind_storage(&mut self, decl: DeclId, address: Value) {
        self.storage.insert(decl, address);
    }

    /// Stack slot for a local variable in the current function
    pub fn alloca_local(&mut self, decl: DeclId) -> Result<Value> {
        let ty = self.lower_type(self.decl_type(decl)?)?;
        let slot = self.builder.build_alloca(ty)?;
        self.bind_storage(decl, slot.clone());
        Ok(slot)
    }

    /// Zero-initialised module storage named after the variable
    pub fn add_global(&mut self, decl: DeclId) -> Result<Value> {
        let size = self.sema.size_of(self.decl_type(decl)?);
        let name = self.sema.decl(decl).name.name.clone();
        let global = self.builder.add_global(&name, size);
        self.bind_storage(decl, global.clone());
        Ok(global)
    }

    /// Make a function callable by name
    pub fn declare_function(&mut self, decl: DeclId) -> Result<String> {
        let sema = self.sema;
        let d = sema.decl(decl);
        if !matches!(d.kind, DeclKind::Func { .. }) {
            return Err(Error::Internal(format!("'{}' is not a function", d.name.name)));
        }
        let ty = self.decl_type(decl)?;
        let TypeKind::Function { params, ret } = sema.types.kind(ty) else {
            return Err(Error::Internal(format!("'{}' has no function type", d.name.name)));
        };
        let params = params.iter().map(|&p| self.lower_type(p)).collect::<Result<Vec<_>>>()?;
        let ret = self.lower_type(*ret)?;
        self.builder.declare_extern(&d.name.name, params, ret);
        self.functions.insert(decl, d.name.name.clone());
        Ok(d.name.name.clone())
    }

    /// IR representation of a canonical type
    pub fn lower_type(&self, ty: TypeId) -> Result<IRType> {
        let types = &self.sema.types;
        match types.kind(ty) {
            TypeKind::Primitive(p) => Ok(match p {
                PrimitiveType::Void => IRType::Void,
                PrimitiveType::Bool => IRType::Bool,
                PrimitiveType::I8 | PrimitiveType::U8 => IRType::I8,
                PrimitiveType::I16 | PrimitiveType::U16 => IRType::I16,
                PrimitiveType::I32 | PrimitiveType::U32 => IRType::I32,
                PrimitiveType::I64 | PrimitiveType::U64 => IRType::I64,
                PrimitiveType::F32 => IRType::F32,
                PrimitiveType::F64 => IRType::F64,
            }),
            TypeKind::Pointer(_) | TypeKind::Function { .. } => Ok(IRType::Ptr),
            TypeKind::Array { elem, len } => Ok(IRType::Array(Box::new(self.lower_type(*elem)?), *len)),
            TypeKind::Struct(decl) => {
                let fields = self
                    .sema
                    .member_types(*decl)
                    .map(|m| self.lower_type(m))
                    .collect::<Result<Vec<_>>>()?;
                Ok(IRType::Struct(fields))
            }
            TypeKind::Union(_) => Ok(IRType::Array(Box::new(IRType::I8), self.sema.size_of(ty))),
            TypeKind::Enum(_) | TypeKind::ErrorDomain(_) => Ok(IRType::I32),
            TypeKind::String | TypeKind::Subarray(_) | TypeKind::VarArray(_) => Err(Error::Unsupported {
                feature: format!("values of type '{}'", types.name(ty)),
                span: None,
            }),
            TypeKind::Poisoned => Err(Error::Internal("poisoned type reached codegen".to_string())),
        }
    }

    // ==================== Addresses ====================

    /// Storage location of an lvalue
    pub fn emit_address(&mut self, expr: &Expr) -> Result<Value> {
        match &expr.kind {
            ExprKind::Identifier(decl) => self.storage.get(decl).cloned().ok_or_else(|| {
                Error::Internal(format!("no storage for '{}'", self.sema.decl(*decl).name.name))
            }),
            // The pointer value is the address.
            ExprKind::Unary { op: UnaryOp::Deref, expr: inner } => self.emit_expr(inner),
            ExprKind::Access { parent, index } => self.emit_field_address(parent, *index),
            ExprKind::Subscript { expr: base, index } => self.emit_subscript_address(base, index, expr.span),
            other => Err(Error::Internal(format!(
                "{} expression is not addressable",
                kind_name(other)
            ))),
        }
    }

    fn emit_field_address(&mut self, parent: &Expr, index: usize) -> Result<Value> {
        let base = self.emit_address(parent)?;
        match self.sema.types.kind(parent.ty) {
            TypeKind::Struct(_) => {
                let struct_ty = self.lower_type(parent.ty)?;
                self.builder.build_struct_gep(struct_ty, base, index)
            }
            // Every union member starts at offset zero.
            TypeKind::Union(_) => Ok(base),
            _ => Err(Error::Internal(format!(
                "field access on '{}'",
                self.sema.types.name(parent.ty)
            ))),
        }
    }

    fn emit_subscript_address(&mut self, base: &Expr, index: &Expr, span: Span) -> Result<Value> {
        let Some(pointee) = self.sema.types.pointee(base.ty) else {
            return Err(Error::unsupported(
                format!("subscript on '{}'", self.sema.types.name(base.ty)),
                span,
            ));
        };
        let ptr = self.emit_expr(base)?;
        let index = self.emit_expr(index)?;
        let elem_ty = self.lower_type(pointee)?;
        self.builder.build_gep(elem_ty, ptr, index)
    }

    fn emit_load(&mut self, expr: &Expr) -> Result<Value> {
        let address = self.emit_address(expr)?;
        let ty = self.lower_type(expr.ty)?;
        self.builder.build_load(ty, address)
    }

    // ==================== Values ====================

    /// Value of an expression
    pub fn emit_expr(&mut self, expr: &Expr) -> Result<Value> {
        match &expr.kind {
            ExprKind::Const(value) => Ok(self.emit_const(value)),
            ExprKind::Identifier(decl) => match self.functions.get(decl) {
                Some(name) => Ok(Value::Global(name.clone())),
                None => self.emit_load(expr),
            },
            ExprKind::Access { .. } | ExprKind::Subscript { .. } => self.emit_load(expr),
            ExprKind::Unary { op, expr: inner } => self.emit_unary(*op, inner, expr),
            ExprKind::PostUnary { op, expr: inner } => self.emit_post_unary(*op, inner),
            ExprKind::Binary { op, left, right } => self.emit_binary_expr(*op, left, right, expr),
            ExprKind::Conditional { cond, then_expr, else_expr } => {
                self.emit_conditional(cond, then_expr, else_expr, expr.ty)
            }
            ExprKind::Cast { kind, expr: inner } => self.emit_cast(*kind, inner, expr),
            ExprKind::Call { function, args } => self.emit_call(function, args, expr),
            ExprKind::ExpressionList(list) => {
                let mut last = Value::Unit;
                for item in list {
                    last = self.emit_expr(item)?;
                }
                Ok(last)
            }
            ExprKind::StructValue { .. } => Err(Error::unsupported("struct value literals", expr.span)),
            ExprKind::StructInitValues(_) => Err(Error::unsupported("struct initializers", expr.span)),
            ExprKind::InitializerList(_) => Err(Error::unsupported("initializer lists", expr.span)),
            ExprKind::Poisoned
            | ExprKind::Type(_)
            | ExprKind::Sizeof(_)
            | ExprKind::TypeAccess { .. }
            | ExprKind::Try { .. } => Err(Error::Internal(format!(
                "{} expression reached codegen",
                kind_name(&expr.kind)
            ))),
        }
    }

    fn emit_const(&mut self, value: &ConstValue) -> Value {
        match value {
            // Two's complement bit pattern; unsigned 64-bit values wrap into i64.
            ConstValue::Int(v) => Value::int(*v as i64),
            ConstValue::Float(f) => Value::Constant(Constant::Float(*f)),
            ConstValue::Bool(b) => Value::bool(*b),
            ConstValue::Nil => Value::Constant(Constant::Null),
            ConstValue::String(s) => self.builder.add_string_constant(s.as_bytes()),
        }
    }

    fn emit_unary(&mut self, op: UnaryOp, inner: &Expr, expr: &Expr) -> Result<Value> {
        match op {
            // bool is a single bit, so xor with true flips it.
            UnaryOp::Not => {
                let value = self.emit_expr(inner)?;
                self.builder.build_binop(BinOp::Xor, IRType::Bool, value, Value::bool(true))
            }
            UnaryOp::BitNeg => {
                let value = self.emit_expr(inner)?;
                let ty = self.lower_type(expr.ty)?;
                self.builder.build_unary(IRUnaryOp::Not, ty, value)
            }
            UnaryOp::Neg => {
                let value = self.emit_expr(inner)?;
                let ty = self.lower_type(expr.ty)?;
                let op = if self.sema.types.is_float(inner.ty) { IRUnaryOp::FNeg } else { IRUnaryOp::Neg };
                self.builder.build_unary(op, ty, value)
            }
            UnaryOp::Addr => self.emit_address(inner),
            UnaryOp::Deref => {
                let ptr = self.emit_expr(inner)?;
                let ty = self.lower_type(expr.ty)?;
                self.builder.build_load(ty, ptr)
            }
            UnaryOp::Inc | UnaryOp::Dec => {
                Err(Error::unsupported("prefix increment and decrement", expr.span))
            }
        }
    }

    /// `x++` / `x--`: store the adjusted value, yield the original
    fn emit_post_unary(&mut self, op: PostUnaryOp, inner: &Expr) -> Result<Value> {
        let types = &self.sema.types;
        if !types.is_integer(inner.ty) {
            let what = match op {
                PostUnaryOp::Inc => "post-increment",
                PostUnaryOp::Dec => "post-decrement",
            };
            return Err(Error::unsupported(
                format!("{} of '{}'", what, types.name(inner.ty)),
                inner.span,
            ));
        }
        let address = self.emit_address(inner)?;
        let ty = self.lower_type(inner.ty)?;
        let old = self.builder.build_load(ty.clone(), address.clone())?;
        let adjust = match op {
            PostUnaryOp::Inc => BinOp::Add,
            PostUnaryOp::Dec => BinOp::Sub,
        };
        let new = self.builder.build_binop(adjust, ty.clone(), old.clone(), Value::int(1))?;
        self.builder.build_store(ty, new, address)?;
        Ok(old)
    }

    fn emit_binary_expr(&mut self, op: BinaryOp, left: &Expr, right: &Expr, expr: &Expr) -> Result<Value> {
        match op {
            BinaryOp::And | BinaryOp::Or => {
                let lhs = self.emit_expr(left)?;
                self.emit_short_circuit(op, lhs, right)
            }
            BinaryOp::Assign => {
                let value = self.emit_expr(right)?;
                let address = self.emit_address(left)?;
                let ty = self.lower_type(left.ty)?;
                self.builder.build_store(ty, value.clone(), address)?;
                Ok(value)
            }
            _ => match op.assign_base_op() {
                Some(base) => self.emit_compound_assign(base, left, right, expr.span),
                None => {
                    let lhs = self.emit_expr(left)?;
                    let rhs = self.emit_expr(right)?;
                    self.emit_binary_op(op, lhs, rhs, left.ty, right.ty, expr.ty, expr.span)
                }
            },
        }
    }

    /// `a op= b`. The right side runs first, then the left address is
    /// computed once and used for both the read and the write.
    fn emit_compound_assign(&mut self, base: BinaryOp, left: &Expr, right: &Expr, span: Span) -> Result<Value> {
        let ty = self.lower_type(left.ty)?;
        let result = if matches!(base, BinaryOp::And | BinaryOp::Or) {
            let address = self.emit_address(left)?;
            let lhs = self.builder.build_load(ty.clone(), address.clone())?;
            let result = self.emit_short_circuit(base, lhs, right)?;
            self.builder.build_store(ty, result.clone(), address)?;
            result
        } else {
            let rhs = self.emit_expr(right)?;
            let address = self.emit_address(left)?;
            let lhs = self.builder.build_load(ty.clone(), address.clone())?;
            let result = self.emit_binary_op(base, lhs, rhs, left.ty, right.ty, left.ty, span)?;
            self.builder.build_store(ty, result.clone(), address)?;
            result
        };
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_binary_op(
        &mut self,
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
        lhs_ty: TypeId,
        rhs_ty: TypeId,
        result_ty: TypeId,
        span: Span,
    ) -> Result<Value> {
        if op.is_comparison() {
            return self.emit_comparison(op, lhs, rhs, lhs_ty);
        }

        let types = &self.sema.types;
        match (op, types.pointee(lhs_ty), types.pointee(rhs_ty)) {
            (BinaryOp::Add | BinaryOp::AddMod, Some(pointee), None) => {
                let elem = self.lower_type(pointee)?;
                return self.builder.build_gep(elem, lhs, rhs);
            }
            (BinaryOp::Add | BinaryOp::AddMod, None, Some(pointee)) => {
                let elem = self.lower_type(pointee)?;
                return self.builder.build_gep(elem, rhs, lhs);
            }
            (BinaryOp::Sub | BinaryOp::SubMod, Some(pointee), Some(_)) => {
                let elem = self.lower_type(pointee)?;
                return self.builder.build_ptr_diff(elem, lhs, rhs);
            }
            (BinaryOp::Sub | BinaryOp::SubMod, Some(pointee), None) => {
                let elem = self.lower_type(pointee)?;
                let index_ty = self.lower_type(rhs_ty)?;
                let negated = self.builder.build_unary(IRUnaryOp::Neg, index_ty, rhs)?;
                return self.builder.build_gep(elem, lhs, negated);
            }
            (_, Some(_), _) | (_, _, Some(_)) => {
                return Err(Error::Internal(format!("{:?} applied to a pointer", op)));
            }
            _ => {}
        }

        let float = types.is_float(result_ty);
        let signed = types.is_signed(result_ty);
        let pick = |f: BinOp, s: BinOp, u: BinOp| {
            if float {
                f
            } else if signed {
                s
            } else {
                u
            }
        };
        let ir_op = match op {
            BinaryOp::Add => pick(BinOp::FAdd, BinOp::AddNsw, BinOp::AddNuw),
            BinaryOp::AddMod => pick(BinOp::FAdd, BinOp::Add, BinOp::Add),
            BinaryOp::Sub => pick(BinOp::FSub, BinOp::SubNsw, BinOp::SubNuw),
            BinaryOp::SubMod => pick(BinOp::FSub, BinOp::Sub, BinOp::Sub),
            BinaryOp::Mult => pick(BinOp::FMul, BinOp::MulNsw, BinOp::MulNuw),
            BinaryOp::MultMod => pick(BinOp::FMul, BinOp::Mul, BinOp::Mul),
            BinaryOp::Div => pick(BinOp::FDiv, BinOp::SDiv, BinOp::UDiv),
            BinaryOp::Mod => pick(BinOp::FRem, BinOp::SRem, BinOp::URem),
            BinaryOp::Shl => BinOp::Shl,
            BinaryOp::Shr => pick(BinOp::AShr, BinOp::AShr, BinOp::LShr),
            BinaryOp::BitAnd => BinOp::And,
            BinaryOp::BitOr => BinOp::Or,
            BinaryOp::BitXor => BinOp::Xor,
            _ => {
                return Err(Error::Internal(format!(
                    "{:?} is not a value operator at {}..{}",
                    op, span.start, span.end
                )))
            }
        };
        let ty = self.lower_type(result_ty)?;
        self.builder.build_binop(ir_op, ty, lhs, rhs)
    }

    /// Comparisons follow the operand type; floats compare unordered.
    fn emit_comparison(&mut self, op: BinaryOp, lhs: Value, rhs: Value, operand_ty: TypeId) -> Result<Value> {
        let ty = self.lower_type(operand_ty)?;
        let types = &self.sema.types;
        if types.is_float(operand_ty) {
            let pred = match op {
                BinaryOp::Eq => FloatPredicate::Ueq,
                BinaryOp::Ne => FloatPredicate::Une,
                BinaryOp::Lt => FloatPredicate::Ult,
                BinaryOp::Le => FloatPredicate::Ule,
                BinaryOp::Gt => FloatPredicate::Ugt,
                BinaryOp::Ge => FloatPredicate::Uge,
                _ => return Err(Error::Internal(format!("{:?} is not a comparison", op))),
            };
            return self.builder.build_fcmp(pred, ty, lhs, rhs);
        }

        let signed = types.is_signed(operand_ty);
        let pred = match (op, signed) {
            (BinaryOp::Eq, _) => IntPredicate::Eq,
            (BinaryOp::Ne, _) => IntPredicate::Ne,
            (BinaryOp::Lt, true) => IntPredicate::Slt,
            (BinaryOp::Lt, false) => IntPredicate::Ult,
            (BinaryOp::Le, true) => IntPredicate::Sle,
            (BinaryOp::Le, false) => IntPredicate::Ule,
            (BinaryOp::Gt, true) => IntPredicate::Sgt,
            (BinaryOp::Gt, false) => IntPredicate::Ugt,
            (BinaryOp::Ge, true) => IntPredicate::Sge,
            (BinaryOp::Ge, false) => IntPredicate::Uge,
            _ => return Err(Error::Internal(format!("{:?} is not a comparison", op))),
        };
        self.builder.build_icmp(pred, ty, lhs, rhs)
    }

    /// `&&` / `||` with an already evaluated left side. The right side only
    /// runs when the left does not decide the result; the join phi has one
    /// edge from the short-circuit and one from the end of the right side.
    fn emit_short_circuit(&mut self, op: BinaryOp, lhs: Value, right: &Expr) -> Result<Value> {
        let is_and = op == BinaryOp::And;
        let start = self.builder.current_block();
        let rhs_block = self.builder.append_block(if is_and { "and.rhs" } else { "or.rhs" })?;
        let join = self.builder.append_block(if is_and { "and.phi" } else { "or.phi" })?;

        if is_and {
            self.builder.build_branch(lhs, rhs_block, join)?;
        } else {
            self.builder.build_branch(lhs, join, rhs_block)?;
        }

        self.builder.position_at_end(rhs_block);
        let rhs = self.emit_expr(right)?;
        let rhs_end = self.builder.current_block();
        self.builder.build_jump(join)?;

        self.builder.position_at_end(join);
        let phi = self.builder.build_phi(IRType::Bool)?;
        // && short-circuits on false, || on true.
        self.builder.add_incoming(phi, Value::bool(!is_and), start)?;
        self.builder.add_incoming(phi, rhs, rhs_end)?;
        trace!("Short-circuit join {} from {} and {}", join, start, rhs_end);
        Ok(Value::Register(phi))
    }

    fn emit_conditional(&mut self, cond: &Expr, then_expr: &Expr, else_expr: &Expr, ty: TypeId) -> Result<Value> {
        let cond = self.emit_expr(cond)?;
        let then_block = self.builder.append_block("cond.lhs")?;
        let else_block = self.builder.append_block("cond.rhs")?;
        let join = self.builder.append_block("cond.phi")?;
        self.builder.build_branch(cond, then_block, else_block)?;

        self.builder.position_at_end(then_block);
        let then_value = self.emit_expr(then_expr)?;
        let then_end = self.builder.current_block();
        self.builder.build_jump(join)?;

        self.builder.position_at_end(else_block);
        let else_value = self.emit_expr(else_expr)?;
        let else_end = self.builder.current_block();
        self.builder.build_jump(join)?;

        self.builder.position_at_end(join);
        let ty = self.lower_type(ty)?;
        if ty == IRType::Void {
            return Ok(Value::Unit);
        }
        let phi = self.builder.build_phi(ty)?;
        self.builder.add_incoming(phi, then_value, then_end)?;
        self.builder.add_incoming(phi, else_value, else_end)?;
        Ok(Value::Register(phi))
    }

    fn emit_call(&mut self, function: &Expr, args: &[Expr], expr: &Expr) -> Result<Value> {
        let ExprKind::Identifier(decl) = &function.kind else {
            return Err(Error::unsupported("calls through function values", expr.span));
        };
        let name = self.functions.get(decl).cloned().ok_or_else(|| {
            Error::Internal(format!("function '{}' was not declared", self.sema.decl(*decl).name.name))
        })?;
        let values = args
            .iter()
            .map(|arg| self.emit_expr(arg))
            .collect::<Result<Vec<_>>>()?;
        let ret_ty = self.lower_type(expr.ty)?;
        self.builder.build_call(&name, values, ret_ty)
    }

    fn emit_cast(&mut self, kind: CastKind, inner: &Expr, expr: &Expr) -> Result<Value> {
        let value = self.emit_expr(inner)?;
        let from = self.lower_type(inner.ty)?;
        let to = self.lower_type(expr.ty)?;
        let cast = |gen: &mut Self, op: CastOp| gen.builder.build_cast(op, value.clone(), from.clone(), to.clone());

        match kind {
            CastKind::Error => Err(Error::Internal("error cast reached codegen".to_string())),
            // Pointers are opaque.
            CastKind::PtrPtr => Ok(value),
            CastKind::PtrXi => cast(self, CastOp::PtrToInt),
            CastKind::XiPtr => cast(self, CastOp::IntToPtr),
            CastKind::PtrBool => {
                let null = Value::Constant(Constant::Null);
                self.builder.build_icmp(IntPredicate::Ne, from.clone(), value.clone(), null)
            }
            CastKind::IntBool => {
                let zero = zero_of(&from);
                self.builder.build_icmp(IntPredicate::Ne, from.clone(), value.clone(), zero)
            }
            CastKind::FpBool => {
                let zero = zero_of(&from);
                self.builder.build_fcmp(FloatPredicate::Une, from.clone(), value.clone(), zero)
            }
            CastKind::BoolInt => cast(self, CastOp::ZExt),
            CastKind::BoolFp | CastKind::UiFp => cast(self, CastOp::UIToFP),
            CastKind::SiFp => cast(self, CastOp::SIToFP),
            CastKind::FpSi => cast(self, CastOp::FPToSI),
            CastKind::FpUi => cast(self, CastOp::FPToUI),
            CastKind::FpFp => match compare_widths(&from, &to)? {
                std::cmp::Ordering::Less => cast(self, CastOp::FPExt),
                std::cmp::Ordering::Greater => cast(self, CastOp::FPTrunc),
                std::cmp::Ordering::Equal => Ok(value),
            },
            CastKind::SiSi | CastKind::SiUi => self.resize_int(value, from, to, true),
            CastKind::UiSi | CastKind::UiUi => self.resize_int(value, from, to, false),
            CastKind::EnumSi => Err(Error::unsupported("enum to integer casts", expr.span)),
            CastKind::VarrPtr | CastKind::ArrPtr | CastKind::StrPtr => Err(Error::unsupported(
                format!("{:?} casts", kind),
                expr.span,
            )),
        }
    }

    /// Narrower destinations truncate; wider ones extend by the source's signedness.
    fn resize_int(&mut self, value: Value, from: IRType, to: IRType, signed_source: bool) -> Result<Value> {
        let op = match compare_widths(&from, &to)? {
            std::cmp::Ordering::Equal => return Ok(value),
            std::cmp::Ordering::Greater => CastOp::Trunc,
            std::cmp::Ordering::Less if signed_source => CastOp::SExt,
            std::cmp::Ordering::Less => CastOp::ZExt,
        };
        self.builder.build_cast(op, value, from, to)
    }
}

fn compare_widths(from: &IRType, to: &IRType) -> Result<std::cmp::Ordering> {
    match (from.bit_width(), to.bit_width()) {
        (Some(f), Some(t)) => Ok(f.cmp(&t)),
        _ => Err(Error::Internal(format!("cast between non-scalar {} and {}", from, to))),
    }
}

fn kind_name(kind: &ExprKind) -> &'static str {
    match kind {
        ExprKind::Poisoned => "poisoned",
        ExprKind::Identifier(_) => "identifier",
        ExprKind::Unary { .. } => "unary",
        ExprKind::Binary { .. } => "binary",
        ExprKind::PostUnary { .. } => "post-unary",
        ExprKind::Conditional { .. } => "conditional",
        ExprKind::Cast { .. } => "cast",
        ExprKind::Call { .. } => "call",
        ExprKind::Access { .. } => "access",
        ExprKind::Subscript { .. } => "subscript",
        ExprKind::Const(_) => "constant",
        ExprKind::StructValue { .. } => "struct value",
        ExprKind::StructInitValues(_) => "struct init",
        ExprKind::InitializerList(_) => "initializer list",
        ExprKind::ExpressionList(_) => "expression list",
        ExprKind::Type(_) => "type",
        ExprKind::Sizeof(_) => "sizeof",
        ExprKind::TypeAccess { .. } => "type access",
        ExprKind::Try { .. } => "try",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::{Ident, Member, TypeInfo};
    use crate::middle::interp::{Interpreter, RuntimeValue};
    use crate::middle::ir::Instruction;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Fixture {
        ctx: Context,
    }

    impl Fixture {
        fn new() -> Self {
            Self { ctx: Context::default() }
        }

        fn ty(&self, prim: PrimitiveType) -> TypeId {
            self.ctx.types.primitive(prim)
        }

        fn ptr(&mut self, prim: PrimitiveType) -> TypeId {
            let inner = self.ty(prim);
            self.ctx.types.pointer(inner)
        }

        fn var(&mut self, name: &str, ty: TypeId) -> DeclId {
            let main = self.ctx.current_module;
            let info = self.ctx.builtin_type_info(ty, Span::dummy());
            let id = self
                .ctx
                .declare(main, Ident::new(name, Span::dummy()), DeclKind::Var { type_info: info })
                .unwrap();
            assert!(self.ctx.resolve_decl(id));
            id
        }

        fn func(&mut self, name: &str, params: Vec<TypeId>, ret: TypeId) -> (DeclId, Expr) {
            let main = self.ctx.current_module;
            let params = params
                .into_iter()
                .map(|p| self.ctx.builtin_type_info(p, Span::dummy()))
                .collect();
            let ret = self.ctx.builtin_type_info(ret, Span::dummy());
            let id = self
                .ctx
                .declare(main, Ident::new(name, Span::dummy()), DeclKind::Func { params, ret })
                .unwrap();
            assert!(self.ctx.resolve_decl(id));
            let ty = self.ctx.decl(id).ty.unwrap();
            (id, Expr::ident(id, ty))
        }

        fn ident(&self, decl: DeclId) -> Expr {
            Expr::ident(decl, self.ctx.decl(decl).ty.unwrap())
        }

        /// Emit `body` into a function `test` returning the last value
        fn compile(&self, globals: &[DeclId], functions: &[DeclId], ret: IRType, body: &[Expr]) -> IRModule {
            let mut gen = GenContext::new(&self.ctx, "test").unwrap();
            for &g in globals {
                gen.add_global(g).unwrap();
            }
            for &f in functions {
                gen.declare_function(f).unwrap();
            }
            gen.builder.begin_function("test", vec![], ret.clone()).unwrap();
            let mut last = Value::Unit;
            for expr in body {
                last = gen.emit_expr(expr).unwrap();
            }
            gen.builder.build_return((ret != IRType::Void).then_some(last)).unwrap();
            gen.builder.finish_function().unwrap();
            gen.finish().unwrap()
        }

        fn emit_error(&self, globals: &[DeclId], expr: &Expr) -> Error {
            let mut gen = GenContext::new(&self.ctx, "test").unwrap();
            for &g in globals {
                gen.add_global(g).unwrap();
            }
            gen.builder.begin_function("test", vec![], IRType::Void).unwrap();
            gen.emit_expr(expr).unwrap_err()
        }
    }

    type CallLog = Rc<RefCell<Vec<&'static str>>>;

    fn logging_host(interp: &mut Interpreter, log: &CallLog, name: &'static str, result: RuntimeValue) {
        let log = Rc::clone(log);
        interp.register_host(name, move |_| {
            log.borrow_mut().push(name);
            result
        });
    }

    fn short_circuit(op: BinaryOp, a: bool, b: bool) -> (RuntimeValue, Vec<&'static str>) {
        let mut fx = Fixture::new();
        let bool_ty = fx.ctx.types.bool();
        let (fa, call_a) = fx.func("a", vec![], bool_ty);
        let (fb, call_b) = fx.func("b", vec![], bool_ty);
        let expr = Expr::binary(
            op,
            Expr::call(call_a, vec![], bool_ty),
            Expr::call(call_b, vec![], bool_ty),
            bool_ty,
        );
        let module = fx.compile(&[], &[fa, fb], IRType::Bool, &[expr]);

        let log = CallLog::default();
        let mut interp = Interpreter::new(&module);
        logging_host(&mut interp, &log, "a", RuntimeValue::from_bool(a));
        logging_host(&mut interp, &log, "b", RuntimeValue::from_bool(b));
        let result = interp.call("test", &[]).unwrap();
        let calls = log.borrow().clone();
        (result, calls)
    }

    #[test]
    fn test_and_skips_right_when_left_is_false() {
        let (result, calls) = short_circuit(BinaryOp::And, false, true);
        assert_eq!(result, RuntimeValue::from_bool(false));
        assert_eq!(calls, vec!["a"]);
    }

    #[test]
    fn test_or_skips_right_when_left_is_true() {
        let (result, calls) = short_circuit(BinaryOp::Or, true, false);
        assert_eq!(result, RuntimeValue::from_bool(true));
        assert_eq!(calls, vec!["a"]);
    }

    #[test]
    fn test_short_circuit_takes_right_value() {
        let (result, calls) = short_circuit(BinaryOp::And, true, false);
        assert_eq!(result, RuntimeValue::from_bool(false));
        assert_eq!(calls, vec!["a", "b"]);

        let (result, calls) = short_circuit(BinaryOp::Or, false, true);
        assert_eq!(result, RuntimeValue::from_bool(true));
        assert_eq!(calls, vec!["a", "b"]);
    }

    #[test]
    fn test_join_block_has_two_predecessors() {
        let mut fx = Fixture::new();
        let bool_ty = fx.ctx.types.bool();
        let (fa, a) = fx.func("a", vec![], bool_ty);
        let (fb, b) = fx.func("b", vec![], bool_ty);
        let (fc, c) = fx.func("c", vec![], bool_ty);
        let call = |f: &Expr| Expr::call(f.clone(), vec![], bool_ty);
        // a && (b || c)
        let expr = Expr::binary(
            BinaryOp::And,
            call(&a),
            Expr::binary(BinaryOp::Or, call(&b), call(&c), bool_ty),
            bool_ty,
        );
        let module = fx.compile(&[], &[fa, fb, fc], IRType::Bool, &[expr]);
        let func = module.function("test").unwrap();

        let joins: Vec<_> = func
            .blocks
            .iter()
            .filter(|b| matches!(b.instructions.first(), Some(Instruction::Phi { .. })))
            .collect();
        assert_eq!(joins.len(), 2);
        for join in joins {
            let preds = func.predecessors(join.id);
            assert_eq!(preds.len(), 2, "{}", join.label);
            let Some(Instruction::Phi { incoming, .. }) = join.instructions.first() else {
                unreachable!()
            };
            let mut from: Vec<_> = incoming.iter().map(|(_, block)| *block).collect();
            from.sort_by_key(|b| b.0);
            assert_eq!(from, preds);
        }
    }

    #[test]
    fn test_conditional_selects_branch_value() {
        let mut fx = Fixture::new();
        let bool_ty = fx.ctx.types.bool();
        let int = fx.ty(PrimitiveType::I32);
        let (fc, cond) = fx.func("cond", vec![], bool_ty);
        let expr = Expr::conditional(
            Expr::call(cond, vec![], bool_ty),
            Expr::int(10, int),
            Expr::int(20, int),
            int,
        );
        let module = fx.compile(&[], &[fc], IRType::I32, &[expr]);

        for (flag, expected) in [(true, 10), (false, 20)] {
            let mut interp = Interpreter::new(&module);
            interp.register_host("cond", move |_| RuntimeValue::from_bool(flag));
            assert_eq!(interp.call("test", &[]).unwrap(), RuntimeValue::Int(expected));
        }
    }

    #[test]
    fn test_compound_assignment_evaluates_right_first() {
        let mut fx = Fixture::new();
        let long = fx.ty(PrimitiveType::I64);
        let long_ptr = fx.ptr(PrimitiveType::I64);
        let arr = fx.var("arr", long_ptr);
        let (ff, f) = fx.func("f", vec![], long);
        let (fg, g) = fx.func("g", vec![], long);
        // arr[f()] += g()
        let expr = Expr::binary(
            BinaryOp::AddAssign,
            Expr::subscript(fx.ident(arr), Expr::call(f, vec![], long), long),
            Expr::call(g, vec![], long),
            long,
        );
        let module = fx.compile(&[arr], &[ff, fg], IRType::I64, &[expr]);

        let log = CallLog::default();
        let mut interp = Interpreter::new(&module);
        logging_host(&mut interp, &log, "f", RuntimeValue::Int(1));
        logging_host(&mut interp, &log, "g", RuntimeValue::Int(10));
        let buffer = interp.alloc(32, 8);
        interp.write(buffer + 8, &IRType::I64, RuntimeValue::Int(5)).unwrap();
        let arr_addr = interp.global_address("arr").unwrap();
        interp.write(arr_addr, &IRType::Ptr, RuntimeValue::Int(buffer as i64)).unwrap();

        let result = interp.call("test", &[]).unwrap();
        assert_eq!(result, RuntimeValue::Int(15));
        assert_eq!(interp.read(buffer + 8, &IRType::I64).unwrap(), RuntimeValue::Int(15));
        assert_eq!(*log.borrow(), vec!["g", "f"]);
    }

    #[test]
    fn test_post_increment_yields_old_value() {
        let mut fx = Fixture::new();
        let int = fx.ty(PrimitiveType::I32);
        let x = fx.var("x", int);
        let y = fx.var("y", int);
        let body = [
            Expr::binary(BinaryOp::Assign, fx.ident(x), Expr::int(5, int), int),
            Expr::binary(
                BinaryOp::Assign,
                fx.ident(y),
                Expr::post_unary(PostUnaryOp::Inc, fx.ident(x)),
                int,
            ),
        ];
        let module = fx.compile(&[x, y], &[], IRType::Void, &body);

        let mut interp = Interpreter::new(&module);
        interp.call("test", &[]).unwrap();
        assert_eq!(interp.read_global("y", &IRType::I32).unwrap(), RuntimeValue::Int(5));
        assert_eq!(interp.read_global("x", &IRType::I32).unwrap(), RuntimeValue::Int(6));
    }

    #[test]
    fn test_post_increment_of_float_is_unsupported() {
        let mut fx = Fixture::new();
        let double = fx.ty(PrimitiveType::F64);
        let d = fx.var("d", double);
        let expr = Expr::post_unary(PostUnaryOp::Dec, fx.ident(d));
        assert!(matches!(fx.emit_error(&[d], &expr), Error::Unsupported { .. }));

        let int = fx.ty(PrimitiveType::I32);
        let x = fx.var("x", int);
        let prefix = Expr::unary(UnaryOp::Inc, fx.ident(x), int);
        assert!(matches!(fx.emit_error(&[x], &prefix), Error::Unsupported { .. }));
    }

    #[test]
    fn test_pointer_arithmetic_scales_by_element() {
        let mut fx = Fixture::new();
        let long = fx.ty(PrimitiveType::I64);
        let long_ptr = fx.ptr(PrimitiveType::I64);
        let p = fx.var("p", long_ptr);
        let expr = Expr::binary(BinaryOp::Add, fx.ident(p), Expr::int(3, long), long_ptr);
        let module = fx.compile(&[p], &[], IRType::Ptr, &[expr]);

        let mut interp = Interpreter::new(&module);
        let base = interp.alloc(64, 8);
        let p_addr = interp.global_address("p").unwrap();
        interp.write(p_addr, &IRType::Ptr, RuntimeValue::Int(base as i64)).unwrap();
        let result = interp.call("test", &[]).unwrap();
        assert_eq!(result, RuntimeValue::Int(base as i64 + 24));
    }

    #[test]
    fn test_pointer_difference_counts_elements() {
        let mut fx = Fixture::new();
        let long = fx.ty(PrimitiveType::I64);
        let long_ptr = fx.ptr(PrimitiveType::I64);
        let p1 = fx.var("p1", long_ptr);
        let p2 = fx.var("p2", long_ptr);
        let expr = Expr::binary(BinaryOp::Sub, fx.ident(p2), fx.ident(p1), long);
        let module = fx.compile(&[p1, p2], &[], IRType::I64, &[expr]);

        let mut interp = Interpreter::new(&module);
        let base = interp.alloc(64, 8);
        for (name, addr) in [("p1", base), ("p2", base + 40)] {
            let global = interp.global_address(name).unwrap();
            interp.write(global, &IRType::Ptr, RuntimeValue::Int(addr as i64)).unwrap();
        }
        assert_eq!(interp.call("test", &[]).unwrap(), RuntimeValue::Int(5));
    }

    #[test]
    fn test_pointer_minus_integer() {
        let mut fx = Fixture::new();
        let int = fx.ty(PrimitiveType::I32);
        let int_ptr = fx.ptr(PrimitiveType::I32);
        let p = fx.var("p", int_ptr);
        let expr = Expr::binary(BinaryOp::Sub, fx.ident(p), Expr::int(2, int), int_ptr);
        let module = fx.compile(&[p], &[], IRType::Ptr, &[expr]);

        let mut interp = Interpreter::new(&module);
        let base = interp.alloc(64, 8);
        let p_addr = interp.global_address("p").unwrap();
        interp.write(p_addr, &IRType::Ptr, RuntimeValue::Int(base as i64 + 16)).unwrap();
        assert_eq!(interp.call("test", &[]).unwrap(), RuntimeValue::Int(base as i64 + 8));
    }

    #[test]
    fn test_cast_truncates_and_extends() {
        let mut fx = Fixture::new();
        let int = fx.ty(PrimitiveType::I32);
        let char_ty = fx.ty(PrimitiveType::I8);
        let byte = fx.ty(PrimitiveType::U8);
        let uint = fx.ty(PrimitiveType::U32);

        let narrow = Expr::cast(CastKind::SiSi, Expr::int(-1, int), char_ty);
        let module = fx.compile(&[], &[], IRType::I8, &[narrow]);
        let func = module.function("test").unwrap();
        assert!(func.blocks[0]
            .instructions
            .iter()
            .any(|i| matches!(i, Instruction::Cast { op: CastOp::Trunc, .. })));
        let result = Interpreter::new(&module).call("test", &[]).unwrap();
        assert_eq!(result.bits(8), 0xFF);

        let b = fx.var("b", byte);
        let body = [
            Expr::binary(BinaryOp::Assign, fx.ident(b), Expr::int(255, byte), byte),
            Expr::cast(CastKind::UiUi, fx.ident(b), uint),
        ];
        let module = fx.compile(&[b], &[], IRType::I32, &body);
        let result = Interpreter::new(&module).call("test", &[]).unwrap();
        assert_eq!(result, RuntimeValue::Int(255));
    }

    #[test]
    fn test_signed_widening_sign_extends() {
        let mut fx = Fixture::new();
        let char_ty = fx.ty(PrimitiveType::I8);
        let long = fx.ty(PrimitiveType::I64);
        let c = fx.var("c", char_ty);
        let body = [
            Expr::binary(BinaryOp::Assign, fx.ident(c), Expr::int(-2, char_ty), char_ty),
            Expr::cast(CastKind::SiSi, fx.ident(c), long),
        ];
        let module = fx.compile(&[c], &[], IRType::I64, &body);
        assert_eq!(Interpreter::new(&module).call("test", &[]).unwrap(), RuntimeValue::Int(-2));
    }

    #[test]
    fn test_bool_and_float_casts() {
        let fx = Fixture::new();
        let bool_ty = fx.ctx.types.bool();
        let int = fx.ty(PrimitiveType::I32);
        let float = fx.ty(PrimitiveType::F32);
        let double = fx.ty(PrimitiveType::F64);

        let cases = [
            (Expr::cast(CastKind::BoolInt, Expr::bool(true, bool_ty), int), IRType::I32, RuntimeValue::Int(1)),
            (Expr::cast(CastKind::IntBool, Expr::int(7, int), bool_ty), IRType::Bool, RuntimeValue::Int(1)),
            (Expr::cast(CastKind::FpBool, Expr::float(0.0, double), bool_ty), IRType::Bool, RuntimeValue::Int(0)),
            (Expr::cast(CastKind::BoolFp, Expr::bool(true, bool_ty), double), IRType::F64, RuntimeValue::Float(1.0)),
            (Expr::cast(CastKind::FpSi, Expr::float(-2.75, double), int), IRType::I32, RuntimeValue::Int(-2)),
            (Expr::cast(CastKind::SiFp, Expr::int(-3, int), double), IRType::F64, RuntimeValue::Float(-3.0)),
            (Expr::cast(CastKind::FpFp, Expr::float(1.5, double), float), IRType::F32, RuntimeValue::Float(1.5)),
        ];
        for (expr, ret, expected) in cases {
            let module = fx.compile(&[], &[], ret, &[expr]);
            assert_eq!(Interpreter::new(&module).call("test", &[]).unwrap(), expected);
        }
    }

    #[test]
    fn test_unimplemented_casts_are_unsupported() {
        let mut fx = Fixture::new();
        let int = fx.ty(PrimitiveType::I32);
        let main = fx.ctx.current_module;
        let color = fx
            .ctx
            .declare(main, Ident::new("Color", Span::dummy()), DeclKind::Enum { constants: vec![] })
            .unwrap();
        let color_ty = fx.ctx.decl(color).ty.unwrap();
        let expr = Expr::cast(CastKind::EnumSi, Expr::int(0, color_ty), int);
        assert!(matches!(fx.emit_error(&[], &expr), Error::Unsupported { .. }));
    }

    #[test]
    fn test_float_comparisons_return_float_result() {
        let fx = Fixture::new();
        let bool_ty = fx.ctx.types.bool();
        let double = fx.ty(PrimitiveType::F64);
        let cmp = |op, l: f64, r: f64| {
            let expr = Expr::binary(op, Expr::float(l, double), Expr::float(r, double), bool_ty);
            let module = fx.compile(&[], &[], IRType::Bool, &[expr]);
            let result = Interpreter::new(&module).call("test", &[]).unwrap();
            result
        };

        assert_eq!(cmp(BinaryOp::Eq, 1.5, 1.5), RuntimeValue::from_bool(true));
        assert_eq!(cmp(BinaryOp::Eq, 1.5, 2.0), RuntimeValue::from_bool(false));
        assert_eq!(cmp(BinaryOp::Ne, 1.5, 2.0), RuntimeValue::from_bool(true));
        assert_eq!(cmp(BinaryOp::Lt, 1.5, 2.5), RuntimeValue::from_bool(true));
        assert_eq!(cmp(BinaryOp::Lt, 2.5, 2.5), RuntimeValue::from_bool(false));
        assert_eq!(cmp(BinaryOp::Le, 2.5, 2.5), RuntimeValue::from_bool(true));
        assert_eq!(cmp(BinaryOp::Gt, -1.0, 0.5), RuntimeValue::from_bool(false));
        assert_eq!(cmp(BinaryOp::Ge, 0.5, -1.0), RuntimeValue::from_bool(true));
        // Unordered: NaN compares true.
        assert_eq!(cmp(BinaryOp::Ne, f64::NAN, f64::NAN), RuntimeValue::from_bool(true));
        assert_eq!(cmp(BinaryOp::Lt, f64::NAN, 1.0), RuntimeValue::from_bool(true));
    }

    #[test]
    fn test_signedness_selects_comparison_and_division() {
        let fx = Fixture::new();
        let bool_ty = fx.ctx.types.bool();
        let int = fx.ty(PrimitiveType::I32);
        let uint = fx.ty(PrimitiveType::U32);

        let signed_lt = Expr::binary(BinaryOp::Lt, Expr::int(-1, int), Expr::int(1, int), bool_ty);
        let module = fx.compile(&[], &[], IRType::Bool, &[signed_lt]);
        assert_eq!(Interpreter::new(&module).call("test", &[]).unwrap(), RuntimeValue::from_bool(true));

        let unsigned_lt = Expr::binary(
            BinaryOp::Lt,
            Expr::int(0xFFFF_FFFF, uint),
            Expr::int(1, uint),
            bool_ty,
        );
        let module = fx.compile(&[], &[], IRType::Bool, &[unsigned_lt]);
        assert_eq!(Interpreter::new(&module).call("test", &[]).unwrap(), RuntimeValue::from_bool(false));

        let sdiv = Expr::binary(BinaryOp::Div, Expr::int(-7, int), Expr::int(2, int), int);
        let module = fx.compile(&[], &[], IRType::I32, &[sdiv]);
        assert_eq!(Interpreter::new(&module).call("test", &[]).unwrap(), RuntimeValue::Int(-3));

        let shr = Expr::binary(BinaryOp::Shr, Expr::int(0x8000_0000, uint), Expr::int(31, uint), uint);
        let module = fx.compile(&[], &[], IRType::I32, &[shr]);
        assert_eq!(Interpreter::new(&module).call("test", &[]).unwrap(), RuntimeValue::Int(1));
    }

    #[test]
    fn test_wrapping_and_checked_arithmetic_differ() {
        let fx = Fixture::new();
        let int = fx.ty(PrimitiveType::I32);
        let max = i128::from(i32::MAX);

        let wrapping = Expr::binary(BinaryOp::AddMod, Expr::int(max, int), Expr::int(1, int), int);
        let module = fx.compile(&[], &[], IRType::I32, &[wrapping]);
        assert_eq!(
            Interpreter::new(&module).call("test", &[]).unwrap(),
            RuntimeValue::Int(i64::from(i32::MIN))
        );

        let checked = Expr::binary(BinaryOp::Add, Expr::int(max, int), Expr::int(1, int), int);
        let module = fx.compile(&[], &[], IRType::I32, &[checked]);
        let err = Interpreter::new(&module).call("test", &[]).unwrap_err();
        assert!(matches!(err, Error::Trap(_)));
    }

    #[test]
    fn test_unary_operators() {
        let fx = Fixture::new();
        let bool_ty = fx.ctx.types.bool();
        let int = fx.ty(PrimitiveType::I32);
        let double = fx.ty(PrimitiveType::F64);

        let cases = [
            (Expr::unary(UnaryOp::Not, Expr::bool(true, bool_ty), bool_ty), IRType::Bool, RuntimeValue::from_bool(false)),
            (Expr::unary(UnaryOp::BitNeg, Expr::int(0, int), int), IRType::I32, RuntimeValue::Int(-1)),
            (Expr::unary(UnaryOp::Neg, Expr::int(5, int), int), IRType::I32, RuntimeValue::Int(-5)),
            (Expr::unary(UnaryOp::Neg, Expr::float(2.5, double), double), IRType::F64, RuntimeValue::Float(-2.5)),
        ];
        for (expr, ret, expected) in cases {
            let module = fx.compile(&[], &[], ret, &[expr]);
            assert_eq!(Interpreter::new(&module).call("test", &[]).unwrap(), expected);
        }
    }

    #[test]
    fn test_address_of_and_dereference() {
        let mut fx = Fixture::new();
        let int = fx.ty(PrimitiveType::I32);
        let int_ptr = fx.ptr(PrimitiveType::I32);
        let x = fx.var("x", int);
        // *(&x) = 3; *(&x) * 2
        let deref = || Expr::unary(UnaryOp::Deref, Expr::unary(UnaryOp::Addr, fx.ident(x), int_ptr), int);
        let body = [
            Expr::binary(BinaryOp::Assign, deref(), Expr::int(3, int), int),
            Expr::binary(BinaryOp::Mult, deref(), Expr::int(2, int), int),
        ];
        let module = fx.compile(&[x], &[], IRType::I32, &body);
        let mut interp = Interpreter::new(&module);
        assert_eq!(interp.call("test", &[]).unwrap(), RuntimeValue::Int(6));
        assert_eq!(interp.read_global("x", &IRType::I32).unwrap(), RuntimeValue::Int(3));
    }

    #[test]
    fn test_field_access_uses_member_offset() {
        let mut fx = Fixture::new();
        let char_ty = fx.ty(PrimitiveType::I8);
        let long = fx.ty(PrimitiveType::I64);
        let main = fx.ctx.current_module;
        let tag = fx.ctx.builtin_type_info(char_ty, Span::dummy());
        let value = fx.ctx.builtin_type_info(long, Span::dummy());
        let pair = fx
            .ctx
            .declare(
                main,
                Ident::new("Pair", Span::dummy()),
                DeclKind::Struct {
                    members: vec![
                        Member { name: Ident::new("tag", Span::dummy()), type_info: tag },
                        Member { name: Ident::new("value", Span::dummy()), type_info: value },
                    ],
                },
            )
            .unwrap();
        let pair_ref = fx.ctx.alloc_type_info(TypeInfo::identifier("Pair", Span::dummy()));
        assert!(fx.ctx.resolve_type(pair_ref));
        let pair_ty = fx.ctx.decl(pair).ty.unwrap();
        let v = fx.var("v", pair_ty);

        let body = [
            Expr::binary(BinaryOp::Assign, Expr::access(fx.ident(v), 1, long), Expr::int(7, long), long),
            Expr::access(fx.ident(v), 1, long),
        ];
        let module = fx.compile(&[v], &[], IRType::I64, &body);
        let mut interp = Interpreter::new(&module);
        assert_eq!(interp.call("test", &[]).unwrap(), RuntimeValue::Int(7));
        let base = interp.global_address("v").unwrap();
        assert_eq!(interp.read(base + 8, &IRType::I64).unwrap(), RuntimeValue::Int(7));
    }

    #[test]
    fn test_string_constant_is_internal_global() {
        let fx = Fixture::new();
        let string = fx.ctx.types.string();
        let expr = Expr::new(ExprKind::Const(ConstValue::String("hey".to_string())), string, Span::dummy());
        let module = fx.compile(&[], &[], IRType::Ptr, &[expr]);
        let global = &module.globals[0];
        assert_eq!(global.data, b"hey".to_vec());
        assert!(global.constant && global.internal);

        let mut interp = Interpreter::new(&module);
        let address = interp.call("test", &[]).unwrap();
        assert_eq!(Some(address), interp.global_address(&global.name).map(|a| RuntimeValue::Int(a as i64)));
    }

    #[test]
    fn test_expression_list_yields_last_value() {
        let mut fx = Fixture::new();
        let int = fx.ty(PrimitiveType::I32);
        let x = fx.var("x", int);
        let list = Expr::new(
            ExprKind::ExpressionList(vec![
                Expr::binary(BinaryOp::Assign, fx.ident(x), Expr::int(4, int), int),
                Expr::binary(BinaryOp::Add, fx.ident(x), Expr::int(1, int), int),
            ]),
            int,
            Span::dummy(),
        );
        let module = fx.compile(&[x], &[], IRType::I32, &[list]);
        assert_eq!(Interpreter::new(&module).call("test", &[]).unwrap(), RuntimeValue::Int(5));
    }

    #[test]
    fn test_call_passes_arguments_in_order() {
        let mut fx = Fixture::new();
        let int = fx.ty(PrimitiveType::I32);
        let (fsub, sub) = fx.func("sub", vec![int, int], int);
        let expr = Expr::call(sub, vec![Expr::int(10, int), Expr::int(3, int)], int);
        let module = fx.compile(&[], &[fsub], IRType::I32, &[expr]);

        let mut interp = Interpreter::new(&module);
        interp.register_host("sub", |args| match args {
            [RuntimeValue::Int(a), RuntimeValue::Int(b)] => RuntimeValue::Int(a - b),
            _ => RuntimeValue::Unit,
        });
        assert_eq!(interp.call("test", &[]).unwrap(), RuntimeValue::Int(7));
    }

    #[test]
    fn test_unfolded_kinds_are_internal_errors() {
        let mut fx = Fixture::new();
        let int = fx.ty(PrimitiveType::I32);
        let info = fx.ctx.builtin_type_info(int, Span::dummy());
        let unfolded = [
            ExprKind::Sizeof(info),
            ExprKind::Type(info),
            ExprKind::Try { expr: Box::new(Expr::int(1, int)), else_expr: None },
            ExprKind::Poisoned,
        ];
        for kind in unfolded {
            let expr = Expr::new(kind, int, Span::dummy());
            assert!(matches!(fx.emit_error(&[], &expr), Error::Internal(_)));
        }
    }

    #[test]
    fn test_non_addressable_assignment_is_internal_error() {
        let fx = Fixture::new();
        let int = fx.ty(PrimitiveType::I32);
        let expr = Expr::binary(BinaryOp::Assign, Expr::int(1, int), Expr::int(2, int), int);
        assert!(matches!(fx.emit_error(&[], &expr), Error::Internal(_)));
    }

    #[test]
    fn test_aggregate_literals_and_array_subscripts_are_unsupported() {
        let mut fx = Fixture::new();
        let int = fx.ty(PrimitiveType::I32);
        let list = Expr::new(ExprKind::InitializerList(vec![Expr::int(1, int)]), int, Span::dummy());
        assert!(matches!(fx.emit_error(&[], &list), Error::Unsupported { .. }));

        let arr_ty = fx.ctx.types.array(int, 4);
        let arr = fx.var("arr", arr_ty);
        let subscript = Expr::subscript(fx.ident(arr), Expr::int(0, int), int);
        assert!(matches!(fx.emit_error(&[arr], &subscript), Error::Unsupported { .. }));
    }

    #[test]
    fn test_logical_compound_assignment_short_circuits() {
        let mut fx = Fixture::new();
        let bool_ty = fx.ctx.types.bool();
        let flag = fx.var("flag", bool_ty);
        let (fb, b) = fx.func("b", vec![], bool_ty);
        // flag &&= b()  with flag == false
        let expr = Expr::binary(BinaryOp::AndAssign, fx.ident(flag), Expr::call(b, vec![], bool_ty), bool_ty);
        let module = fx.compile(&[flag], &[fb], IRType::Bool, &[expr]);

        let log = CallLog::default();
        let mut interp = Interpreter::new(&module);
        logging_host(&mut interp, &log, "b", RuntimeValue::from_bool(true));
        assert_eq!(interp.call("test", &[]).unwrap(), RuntimeValue::from_bool(false));
        assert!(log.borrow().is_empty());
    }
}
