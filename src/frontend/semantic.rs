//! Semantic context for Anvil
//!
//! Owns everything semantic analysis annotates in place:
//! - the canonical type table
//! - the declaration and type-reference arenas
//! - the module-aware symbol table
//! - accumulated diagnostics

use std::collections::HashMap;

use log::warn;

use crate::frontend::ast::{Decl, DeclId, DeclKind, Ident, ModuleId, ResolveStatus, TypeInfo, TypeInfoId};
use crate::types::{PrimitiveType, TargetInfo, TypeId, TypeKind, TypeTable};
use crate::utils::{Error, Result, Span};

// ==================== Symbol Table ====================

/// A module and the declarations it can see
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    symbols: HashMap<String, DeclId>,
    imports: Vec<ModuleId>,
}

impl Module {
    pub fn imports(&self) -> &[ModuleId] {
        &self.imports
    }
}

/// Result of a symbol lookup. `ambiguous` is a second, equally visible match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SymbolLookup {
    pub decl: Option<DeclId>,
    pub ambiguous: Option<DeclId>,
}

/// Symbol table keyed by module
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    modules: Vec<Module>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self { modules: Vec::new() }
    }

    pub fn add_module(&mut self, name: &str) -> ModuleId {
        if let Some(existing) = self.module_by_name(name) {
            return existing;
        }
        let id = ModuleId(self.modules.len());
        self.modules.push(Module {
            name: name.to_string(),
            symbols: HashMap::new(),
            imports: Vec::new(),
        });
        id
    }

    pub fn add_import(&mut self, module: ModuleId, imported: ModuleId) {
        let imports = &mut self.modules[module.0].imports;
        if module != imported && !imports.contains(&imported) {
            imports.push(imported);
        }
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.0]
    }

    pub fn module_by_name(&self, name: &str) -> Option<ModuleId> {
        self.modules.iter().position(|m| m.name == name).map(ModuleId)
    }

    /// Define a symbol in a module
    pub fn define(&mut self, module: ModuleId, name: &Ident, decl: DeclId) -> Result<()> {
        let symbols = &mut self.modules[module.0].symbols;
        if symbols.contains_key(&name.name) {
            return Err(Error::DuplicateDefinition {
                name: name.name.clone(),
                span: name.span,
            });
        }
        symbols.insert(name.name.clone(), decl);
        Ok(())
    }

    /// Look up a symbol as seen from `current`.
    ///
    /// A qualified name only consults the named module. An unqualified name
    /// prefers the current module, then searches every import; a second hit
    /// among the imports is returned as `ambiguous`.
    pub fn resolve_symbol(
        &self,
        current: ModuleId,
        name: &str,
        path: Option<&str>,
        span: Span,
    ) -> Result<SymbolLookup> {
        if let Some(path) = path {
            let module = self.module_by_name(path).ok_or_else(|| Error::UnknownModule {
                path: path.to_string(),
                span,
            })?;
            return Ok(SymbolLookup {
                decl: self.modules[module.0].symbols.get(name).copied(),
                ambiguous: None,
            });
        }

        let module = &self.modules[current.0];
        if let Some(&decl) = module.symbols.get(name) {
            return Ok(SymbolLookup { decl: Some(decl), ambiguous: None });
        }

        let mut lookup = SymbolLookup::default();
        for import in &module.imports {
            if let Some(&decl) = self.modules[import.0].symbols.get(name) {
                if lookup.decl.is_none() {
                    lookup.decl = Some(decl);
                } else if lookup.ambiguous.is_none() {
                    lookup.ambiguous = Some(decl);
                }
            }
        }
        Ok(lookup)
    }
}

// ==================== Semantic Context ====================

/// Per compilation unit semantic state
#[derive(Debug, Clone)]
pub struct Context {
    pub types: TypeTable,
    pub symbols: SymbolTable,
    decls: Vec<Decl>,
    type_infos: Vec<TypeInfo>,
    /// Module whose scope unqualified names are looked up in
    pub current_module: ModuleId,
    pub diagnostics: Vec<Error>,
}

impl Context {
    pub fn new(target: TargetInfo) -> Self {
        let mut symbols = SymbolTable::new();
        let main = symbols.add_module("main");
        Self {
            types: TypeTable::new(target),
            symbols,
            decls: Vec::new(),
            type_infos: Vec::new(),
            current_module: main,
            diagnostics: Vec::new(),
        }
    }

    pub fn add_module(&mut self, name: &str) -> ModuleId {
        self.symbols.add_module(name)
    }

    pub fn import(&mut self, module: ModuleId, imported: ModuleId) {
        self.symbols.add_import(module, imported);
    }

    pub fn module_name(&self, module: ModuleId) -> &str {
        &self.symbols.module(module).name
    }

    /// Declare a symbol. Nominal types get their unique canonical type here.
    pub fn declare(&mut self, module: ModuleId, name: Ident, kind: DeclKind) -> Result<DeclId> {
        let id = DeclId(self.decls.len());
        self.symbols.define(module, &name, id)?;

        let ty = match &kind {
            DeclKind::Struct { .. } => Some(self.types.nominal(TypeKind::Struct(id), &name.name)),
            DeclKind::Union { .. } => Some(self.types.nominal(TypeKind::Union(id), &name.name)),
            DeclKind::Enum { .. } => Some(self.types.nominal(TypeKind::Enum(id), &name.name)),
            DeclKind::ErrorDomain { .. } => {
                Some(self.types.nominal(TypeKind::ErrorDomain(id), &name.name))
            }
            _ => None,
        };
        self.decls.push(Decl {
            name,
            module,
            kind,
            status: ResolveStatus::Unresolved,
            ty,
        });
        Ok(id)
    }

    pub fn decl(&self, id: DeclId) -> &Decl {
        &self.decls[id.0]
    }

    pub fn decl_mut(&mut self, id: DeclId) -> &mut Decl {
        &mut self.decls[id.0]
    }

    pub fn decl_ids(&self) -> impl Iterator<Item = DeclId> {
        (0..self.decls.len()).map(DeclId)
    }

    pub fn alloc_type_info(&mut self, info: TypeInfo) -> TypeInfoId {
        let id = TypeInfoId(self.type_infos.len());
        self.type_infos.push(info);
        id
    }

    /// Shorthand for a type reference the parser already knows, e.g. `int`
    pub fn builtin_type_info(&mut self, ty: TypeId, span: Span) -> TypeInfoId {
        self.alloc_type_info(TypeInfo::resolved(ty, span))
    }

    pub fn type_info(&self, id: TypeInfoId) -> &TypeInfo {
        &self.type_infos[id.0]
    }

    pub fn type_info_mut(&mut self, id: TypeInfoId) -> &mut TypeInfo {
        &mut self.type_infos[id.0]
    }

    /// Record a diagnostic. Poison is silent: its origin already reported.
    pub fn report(&mut self, err: Error) {
        if err.is_poison() {
            return;
        }
        warn!("{}", err);
        self.diagnostics.push(err);
    }

    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    pub fn poison_decl(&mut self, id: DeclId) {
        let decl = &mut self.decls[id.0];
        decl.kind = DeclKind::Poisoned;
        decl.status = ResolveStatus::Done;
        decl.ty = Some(self.types.poisoned());
    }

    // ==================== Layout ====================

    /// Size in bytes. Members must be resolved for aggregates.
    pub fn size_of(&self, ty: TypeId) -> u64 {
        let ptr = self.types.target().pointer_size();
        match self.types.kind(ty) {
            TypeKind::Primitive(p) => p.size_of(),
            TypeKind::Pointer(_) => ptr,
            TypeKind::String | TypeKind::Subarray(_) => ptr * 2,
            TypeKind::VarArray(_) => ptr * 3,
            TypeKind::Array { elem, len } => self.size_of(*elem) * len,
            TypeKind::Struct(decl) => self.struct_layout(*decl).1,
            TypeKind::Union(decl) => {
                let align = self.align_of(ty);
                let largest = self
                    .member_types(*decl)
                    .map(|m| self.size_of(m))
                    .max()
                    .unwrap_or(0);
                round_up(largest, align)
            }
            TypeKind::Enum(_) | TypeKind::ErrorDomain(_) => PrimitiveType::I32.size_of(),
            TypeKind::Function { .. } => ptr,
            TypeKind::Poisoned => 0,
        }
    }

    pub fn align_of(&self, ty: TypeId) -> u64 {
        let ptr = self.types.target().pointer_size();
        match self.types.kind(ty) {
            TypeKind::Primitive(p) => p.align_of(),
            TypeKind::Pointer(_)
            | TypeKind::String
            | TypeKind::Subarray(_)
            | TypeKind::VarArray(_)
            | TypeKind::Function { .. } => ptr,
            TypeKind::Array { elem, .. } => self.align_of(*elem),
            TypeKind::Struct(decl) | TypeKind::Union(decl) => self
                .member_types(*decl)
                .map(|m| self.align_of(m))
                .max()
                .unwrap_or(1),
            TypeKind::Enum(_) | TypeKind::ErrorDomain(_) => PrimitiveType::I32.align_of(),
            TypeKind::Poisoned => 1,
        }
    }

    /// Byte offsets of each struct member and the padded total size
    pub fn struct_layout(&self, decl: DeclId) -> (Vec<u64>, u64) {
        let mut offsets = Vec::new();
        let mut offset: u64 = 0;
        let mut max_align: u64 = 1;
        for member in self.member_types(decl) {
            let align = self.align_of(member);
            max_align = max_align.max(align);
            offset = round_up(offset, align);
            offsets.push(offset);
            offset += self.size_of(member);
        }
        (offsets, round_up(offset, max_align))
    }

    /// Resolved member types of an aggregate, poisoned for unresolved members
    pub fn member_types(&self, decl: DeclId) -> impl Iterator<Item = TypeId> + '_ {
        self.decls[decl.0].members().iter().map(move |m| {
            self.type_infos[m.type_info.0]
                .ty
                .unwrap_or_else(|| self.types.poisoned())
        })
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(TargetInfo::default())
    }
}

fn round_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::Member;

    fn span() -> Span {
        Span::dummy()
    }

    #[test]
    fn test_duplicate_definition() {
        let mut ctx = Context::default();
        let main = ctx.current_module;
        ctx.declare(main, Ident::new("Foo", span()), DeclKind::Enum { constants: vec![] })
            .unwrap();
        let err = ctx
            .declare(main, Ident::new("Foo", span()), DeclKind::Enum { constants: vec![] })
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateDefinition { .. }));
    }

    #[test]
    fn test_lookup_prefers_current_module() {
        let mut ctx = Context::default();
        let main = ctx.current_module;
        let other = ctx.add_module("other");
        ctx.import(main, other);
        let local = ctx.declare(main, Ident::new("T", span()), DeclKind::Enum { constants: vec![] }).unwrap();
        ctx.declare(other, Ident::new("T", span()), DeclKind::Enum { constants: vec![] }).unwrap();

        let lookup = ctx.symbols.resolve_symbol(main, "T", None, span()).unwrap();
        assert_eq!(lookup, SymbolLookup { decl: Some(local), ambiguous: None });
    }

    #[test]
    fn test_lookup_reports_second_import() {
        let mut ctx = Context::default();
        let main = ctx.current_module;
        let a = ctx.add_module("a");
        let b = ctx.add_module("b");
        ctx.import(main, a);
        ctx.import(main, b);
        let in_a = ctx.declare(a, Ident::new("T", span()), DeclKind::Enum { constants: vec![] }).unwrap();
        let in_b = ctx.declare(b, Ident::new("T", span()), DeclKind::Enum { constants: vec![] }).unwrap();

        let lookup = ctx.symbols.resolve_symbol(main, "T", None, span()).unwrap();
        assert_eq!(lookup.decl, Some(in_a));
        assert_eq!(lookup.ambiguous, Some(in_b));

        let qualified = ctx.symbols.resolve_symbol(main, "T", Some("b"), span()).unwrap();
        assert_eq!(qualified, SymbolLookup { decl: Some(in_b), ambiguous: None });
    }

    #[test]
    fn test_lookup_unknown_module() {
        let ctx = Context::default();
        let err = ctx
            .symbols
            .resolve_symbol(ctx.current_module, "T", Some("nowhere"), span())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownModule { .. }));
    }

    #[test]
    fn test_struct_layout_pads_members() {
        let mut ctx = Context::default();
        let main = ctx.current_module;
        let byte = ctx.types.primitive(PrimitiveType::U8);
        let long = ctx.types.primitive(PrimitiveType::I64);
        let a = ctx.builtin_type_info(byte, span());
        let b = ctx.builtin_type_info(long, span());
        let decl = ctx
            .declare(
                main,
                Ident::new("Pair", span()),
                DeclKind::Struct {
                    members: vec![
                        Member { name: Ident::new("tag", span()), type_info: a },
                        Member { name: Ident::new("value", span()), type_info: b },
                    ],
                },
            )
            .unwrap();
        let (offsets, size) = ctx.struct_layout(decl);
        assert_eq!(offsets, vec![0, 8]);
        assert_eq!(size, 16);
        let ty = ctx.decl(decl).ty.unwrap();
        assert_eq!(ctx.size_of(ty), 16);
        assert_eq!(ctx.align_of(ty), 8);
    }
}
