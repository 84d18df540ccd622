//! Type resolution
//!
//! Turns syntactic [`TypeInfo`](crate::frontend::ast::TypeInfo) references into
//! canonical types. Each node moves `Unresolved -> Running -> Done` exactly
//! once; meeting a `Running` node again means the reference depends on itself.
//! Failures poison the node and the error propagates to the caller, which
//! records it once.
//!
//! Shallow resolution only establishes that a type exists (enough for a
//! pointee). Full resolution also completes the layout of aggregates, using
//! the declaration's own status as the sentinel for by-value recursion.

use log::{debug, trace};

use crate::frontend::ast::{DeclId, DeclKind, Expr, Ident, ResolveStatus, TypeInfoId, TypeInfoKind};
use crate::frontend::semantic::Context;
use crate::types::{TypeId, TypeKind};
use crate::utils::{Error, Result, Span};

/// Payload taken out of a node while it is `Running`
enum Pending {
    Identifier { path: Option<String>, name: Ident },
    Pointer(TypeInfoId),
    Array { base: TypeInfoId, len: Option<Box<Expr>> },
    Expression(Box<Expr>),
    Invalid(&'static str),
}

impl Context {
    /// Fully resolve a type reference, recording any diagnostic.
    ///
    /// Returns `true` on success. A finished node answers immediately
    /// without re-running resolution.
    pub fn resolve_type(&mut self, id: TypeInfoId) -> bool {
        let result = self.resolve_type_info(id);
        self.record(result).is_some()
    }

    /// Resolve only the existence of the referenced type, recording any diagnostic.
    pub fn resolve_type_shallow(&mut self, id: TypeInfoId) -> bool {
        let result = self.resolve_type_info_shallow(id);
        self.record(result).is_some()
    }

    fn record<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.report(err);
                None
            }
        }
    }

    /// Full resolution: the type exists and its layout is known
    pub fn resolve_type_info(&mut self, id: TypeInfoId) -> Result<TypeId> {
        let ty = self.resolve_type_info_shallow(id)?;
        let span = self.type_info(id).span;
        if let Err(err) = self.complete_layout(ty, span) {
            return Err(self.poison_type_info(id, err));
        }
        Ok(ty)
    }

    /// Shallow resolution: the referenced type exists
    pub fn resolve_type_info_shallow(&mut self, id: TypeInfoId) -> Result<TypeId> {
        let info = self.type_info(id);
        let span = info.span;
        match info.status {
            ResolveStatus::Done => {
                return match info.ty {
                    Some(ty) if !info.is_poisoned() => Ok(ty),
                    _ => Err(Error::Poisoned { span }),
                };
            }
            ResolveStatus::Running => {
                let err = Error::CircularDependency {
                    name: self.describe_type_info(id),
                    span,
                };
                return Err(self.poison_type_info(id, err));
            }
            ResolveStatus::Unresolved => {}
        }

        self.type_info_mut(id).status = ResolveStatus::Running;

        let result = match self.take_pending(id) {
            Pending::Invalid(what) => Err(Error::Internal(format!(
                "{} type reference reached resolution",
                what
            ))),
            Pending::Identifier { path, name } => self.resolve_identifier(path.as_deref(), &name),
            Pending::Pointer(pointee) => self
                .resolve_type_info_shallow(pointee)
                .map(|pointee| self.types.pointer(pointee)),
            Pending::Array { base, len } => self.resolve_array(id, base, len),
            Pending::Expression(mut expr) => self
                .analyze_expr(None, &mut expr)
                .and_then(|()| Err(Error::unsupported("typeof expressions", span))),
        };

        match result {
            Ok(ty) => {
                let info = self.type_info_mut(id);
                info.ty = Some(ty);
                info.status = ResolveStatus::Done;
                debug!("Resolved {}", self.types.name(ty));
                Ok(ty)
            }
            Err(err) => Err(self.poison_type_info(id, err)),
        }
    }

    fn take_pending(&mut self, id: TypeInfoId) -> Pending {
        let info = self.type_info_mut(id);
        if let TypeInfoKind::Expression(_) = info.kind {
            if let TypeInfoKind::Expression(expr) = std::mem::replace(&mut info.kind, TypeInfoKind::Poisoned) {
                return Pending::Expression(expr);
            }
        }
        match &mut info.kind {
            TypeInfoKind::Identifier { path, name } => Pending::Identifier {
                path: path.clone(),
                name: name.clone(),
            },
            TypeInfoKind::Pointer(pointee) => Pending::Pointer(*pointee),
            TypeInfoKind::Array { base, len } => Pending::Array { base: *base, len: len.take() },
            TypeInfoKind::Expression(_) | TypeInfoKind::Poisoned => Pending::Invalid("Poisoned"),
            TypeInfoKind::IncompleteArray(_) => Pending::Invalid("Incomplete array"),
        }
    }

    /// Mark a node as failed and hand the error back for propagation
    fn poison_type_info(&mut self, id: TypeInfoId, err: Error) -> Error {
        trace!("Poisoning type reference {}: {}", self.describe_type_info(id), err);
        let poisoned = self.types.poisoned();
        let info = self.type_info_mut(id);
        info.kind = TypeInfoKind::Poisoned;
        info.status = ResolveStatus::Done;
        info.ty = Some(poisoned);
        err
    }

    /// Readable name of a reference for diagnostics
    pub fn describe_type_info(&self, id: TypeInfoId) -> String {
        let info = self.type_info(id);
        match &info.kind {
            TypeInfoKind::Identifier { path: Some(path), name } => format!("{}::{}", path, name.name),
            TypeInfoKind::Identifier { path: None, name } => match info.ty {
                Some(ty) if info.status == ResolveStatus::Done => self.types.name(ty).to_string(),
                _ => name.name.clone(),
            },
            TypeInfoKind::Pointer(inner) => format!("{}*", self.describe_type_info(*inner)),
            TypeInfoKind::Array { base, .. } | TypeInfoKind::IncompleteArray(base) => {
                format!("{}[]", self.describe_type_info(*base))
            }
            TypeInfoKind::Expression(_) => "typeof(...)".to_string(),
            TypeInfoKind::Poisoned => "<poisoned>".to_string(),
        }
    }

    fn resolve_array(&mut self, id: TypeInfoId, base: TypeInfoId, len: Option<Box<Expr>>) -> Result<TypeId> {
        let elem = self.resolve_type_info(base)?;
        let Some(mut len) = len else {
            return Ok(self.types.array(elem, 0));
        };

        let value = self.array_length(&mut len);
        // The folded length stays on the node for later passes.
        if let TypeInfoKind::Array { len: slot, .. } = &mut self.type_info_mut(id).kind {
            *slot = Some(len);
        }
        let value = value?;
        Ok(self.types.array(elem, value))
    }

    fn array_length(&mut self, len: &mut Expr) -> Result<u64> {
        self.analyze_expr(None, len)?;
        let value = match len.const_int() {
            None => return Err(Error::ExpectedConstant { span: len.span }),
            Some(value) if value < 0 => {
                return Err(Error::NegativeArraySize { value, span: len.span })
            }
            Some(value) => value,
        };
        let usize = self.types.usize();
        self.analyze_expr_of_required_type(usize, len)?;
        u64::try_from(value).map_err(|_| Error::ConstantOverflow {
            value,
            ty: self.types.name(usize).to_string(),
            span: len.span,
        })
    }

    fn resolve_identifier(&mut self, path: Option<&str>, name: &Ident) -> Result<TypeId> {
        if path.is_none() {
            if let Some(builtin) = self.types.lookup_builtin(&name.name) {
                return Ok(builtin);
            }
        }

        let lookup = self
            .symbols
            .resolve_symbol(self.current_module, &name.name, path, name.span)?;

        let Some(decl_id) = lookup.decl else {
            let name_text = match path {
                Some(path) => format!("{}::{}", path, name.name),
                None => name.name.clone(),
            };
            return Err(Error::UnknownType { name: name_text, span: name.span });
        };

        if let Some(other) = lookup.ambiguous {
            return Err(Error::AmbiguousType {
                name: name.name.clone(),
                first: self.module_name(self.decl(decl_id).module).to_string(),
                second: self.module_name(self.decl(other).module).to_string(),
                span: name.span,
            });
        }

        let decl = self.decl(decl_id);
        match &decl.kind {
            DeclKind::Poisoned => Err(Error::Poisoned { span: name.span }),
            DeclKind::Struct { .. }
            | DeclKind::Union { .. }
            | DeclKind::Enum { .. }
            | DeclKind::ErrorDomain { .. } => decl.ty.ok_or_else(|| {
                Error::Internal(format!("{} '{}' has no type", decl.kind.describe(), decl.name.name))
            }),
            DeclKind::Typedef { type_info } => {
                let target = *type_info;
                self.resolve_typedef(decl_id, target)
            }
            _ => Err(Error::NotAType {
                name: name.name.clone(),
                span: name.span,
            }),
        }
    }

    /// A typedef adopts its target's canonical type. The target is looked up
    /// from the module that declared the typedef and only needs to exist;
    /// callers that need the layout complete it on the adopted type.
    fn resolve_typedef(&mut self, decl_id: DeclId, target: TypeInfoId) -> Result<TypeId> {
        let decl = self.decl(decl_id);
        match decl.status {
            ResolveStatus::Done => return decl.ty.ok_or(Error::Poisoned { span: decl.name.span }),
            ResolveStatus::Running => {
                let err = Error::CircularDependency {
                    name: decl.name.name.clone(),
                    span: decl.name.span,
                };
                self.poison_decl(decl_id);
                return Err(err);
            }
            ResolveStatus::Unresolved => {}
        }

        self.decl_mut(decl_id).status = ResolveStatus::Running;
        let result = self.in_module_of(decl_id, |ctx| ctx.resolve_type_info_shallow(target));
        match result {
            Ok(ty) => {
                let decl = self.decl_mut(decl_id);
                decl.ty = Some(ty);
                decl.status = ResolveStatus::Done;
                Ok(ty)
            }
            Err(err) => {
                self.poison_decl(decl_id);
                Err(err)
            }
        }
    }

    fn in_module_of<T>(&mut self, decl_id: DeclId, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved = self.current_module;
        self.current_module = self.decl(decl_id).module;
        let result = f(self);
        self.current_module = saved;
        result
    }

    fn complete_layout(&mut self, ty: TypeId, span: Span) -> Result<()> {
        match *self.types.kind(ty) {
            TypeKind::Struct(decl) | TypeKind::Union(decl) => self.resolve_members(decl, span),
            TypeKind::Array { elem, .. } => self.complete_layout(elem, span),
            _ => Ok(()),
        }
    }

    /// Resolve every member of an aggregate fully. Member errors are recorded
    /// here; the caller only sees poison.
    fn resolve_members(&mut self, decl_id: DeclId, span: Span) -> Result<()> {
        let decl = self.decl(decl_id);
        match decl.status {
            ResolveStatus::Done if decl.is_poisoned() => return Err(Error::Poisoned { span }),
            ResolveStatus::Done => return Ok(()),
            ResolveStatus::Running => {
                return Err(Error::RecursiveDefinition {
                    name: decl.name.name.clone(),
                    span,
                })
            }
            ResolveStatus::Unresolved => {}
        }

        let members: Vec<TypeInfoId> = decl.members().iter().map(|m| m.type_info).collect();
        self.decl_mut(decl_id).status = ResolveStatus::Running;

        let ok = self.in_module_of(decl_id, |ctx| {
            let mut ok = true;
            for member in members {
                let result = ctx.resolve_type_info(member);
                ok &= ctx.record(result).is_some();
            }
            ok
        });

        if !ok {
            self.poison_decl(decl_id);
            return Err(Error::Poisoned { span });
        }
        let decl = self.decl_mut(decl_id);
        decl.status = ResolveStatus::Done;
        debug!("Completed layout of {}", decl.name.name);
        Ok(())
    }

    /// Resolve the types a declaration depends on, recording any diagnostic.
    pub fn resolve_decl(&mut self, decl_id: DeclId) -> bool {
        let result = self.in_module_of(decl_id, |ctx| ctx.resolve_decl_inner(decl_id));
        self.record(result).is_some()
    }

    fn resolve_decl_inner(&mut self, decl_id: DeclId) -> Result<()> {
        let decl = self.decl(decl_id);
        let span = decl.name.span;
        match decl.kind.clone() {
            DeclKind::Var { type_info } => {
                let ty = self.resolve_type_info(type_info);
                self.finish_decl(decl_id, ty)
            }
            DeclKind::Func { params, ret } => {
                let ty = params
                    .iter()
                    .map(|&p| self.resolve_type_info(p))
                    .collect::<Result<Vec<_>>>()
                    .and_then(|params| {
                        let ret = self.resolve_type_info(ret)?;
                        Ok(self.types.function(params, ret))
                    });
                self.finish_decl(decl_id, ty)
            }
            DeclKind::Struct { .. } | DeclKind::Union { .. } => self.resolve_members(decl_id, span),
            DeclKind::Typedef { type_info } => self.resolve_typedef(decl_id, type_info).map(|_| ()),
            DeclKind::Const { .. } => {
                self.fold_const_decl(decl_id, span)?;
                if let DeclKind::Const { value } = &self.decl(decl_id).kind {
                    let ty = value.ty;
                    self.decl_mut(decl_id).ty = Some(ty);
                }
                Ok(())
            }
            DeclKind::Enum { .. } | DeclKind::ErrorDomain { .. } => {
                self.decl_mut(decl_id).status = ResolveStatus::Done;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn finish_decl(&mut self, decl_id: DeclId, ty: Result<TypeId>) -> Result<()> {
        match ty {
            Ok(ty) => {
                let decl = self.decl_mut(decl_id);
                decl.ty = Some(ty);
                decl.status = ResolveStatus::Done;
                Ok(())
            }
            Err(err) => {
                self.poison_decl(decl_id);
                Err(err)
            }
        }
    }

    /// Resolve every declaration in declaration order.
    ///
    /// Continues past failures to collect as many diagnostics as possible.
    pub fn resolve_all(&mut self) -> bool {
        let ids: Vec<DeclId> = self.decl_ids().collect();
        for id in ids {
            self.resolve_decl(id);
        }
        !self.has_errors()
    }
}
