//! Compilation units
//!
//! A unit is a JSON document listing modules, their imports and their
//! declarations. Type references and constant values inside it use the
//! syntax of [`crate::frontend::type_syntax`].
//!
//! ```json
//! { "modules": [ { "name": "geo", "imports": ["base"], "decls": [
//!     { "kind": "struct", "name": "Point", "members": [ { "name": "x", "type": "int" } ] },
//!     { "kind": "const", "name": "N", "value": "sizeof(Point) * 2" }
//! ] } ] }
//! ```
//!
//! Declarations may refer to each other in any order.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::frontend::ast::{DeclId, DeclKind, Expr, ExprKind, Ident, Member, ModuleId, TypeInfoId};
use crate::frontend::semantic::Context;
use crate::frontend::type_syntax::{parse_const_expr, parse_type_ref};
use crate::types::PrimitiveType;
use crate::utils::{Error, Result, Span};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitFile {
    pub modules: Vec<ModuleDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDef {
    pub name: String,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub decls: Vec<DeclDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// A constant initializer: a plain number or an expression in text form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConstDef {
    Int(i64),
    Expr(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeclDef {
    Struct {
        name: String,
        members: Vec<MemberDef>,
    },
    Union {
        name: String,
        members: Vec<MemberDef>,
    },
    Enum {
        name: String,
        #[serde(default)]
        constants: Vec<String>,
    },
    Error {
        name: String,
        #[serde(default)]
        constants: Vec<String>,
    },
    Typedef {
        name: String,
        #[serde(rename = "type")]
        ty: String,
    },
    Var {
        name: String,
        #[serde(rename = "type")]
        ty: String,
    },
    Const {
        name: String,
        value: ConstDef,
    },
    Func {
        name: String,
        #[serde(default)]
        params: Vec<String>,
        #[serde(default = "void_type")]
        ret: String,
    },
}

fn void_type() -> String {
    "void".to_string()
}

impl DeclDef {
    pub fn name(&self) -> &str {
        match self {
            DeclDef::Struct { name, .. }
            | DeclDef::Union { name, .. }
            | DeclDef::Enum { name, .. }
            | DeclDef::Error { name, .. }
            | DeclDef::Typedef { name, .. }
            | DeclDef::Var { name, .. }
            | DeclDef::Const { name, .. }
            | DeclDef::Func { name, .. } => name,
        }
    }
}

impl UnitFile {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// A piece of text a span can point into. A span's `file_id` is its index
/// in [`LoadedUnit::sources`] plus one; `0` means no source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceText {
    /// `module::decl` the text belongs to
    pub origin: String,
    pub text: String,
}

/// Result of loading a unit into a [`Context`]
#[derive(Debug, Clone, Default)]
pub struct LoadedUnit {
    /// Declarations in unit order
    pub decls: Vec<DeclId>,
    pub sources: Vec<SourceText>,
}

impl LoadedUnit {
    pub fn source(&self, span: &Span) -> Option<&SourceText> {
        span.file_id.checked_sub(1).and_then(|i| self.sources.get(i))
    }
}

struct Loader<'c> {
    ctx: &'c mut Context,
    sources: Vec<SourceText>,
}

impl Loader<'_> {
    fn origin(&self, module: ModuleId, name: &str) -> String {
        format!("{}::{}", self.ctx.module_name(module), name)
    }

    fn add_source(&mut self, origin: String, text: &str) -> usize {
        self.sources.push(SourceText {
            origin,
            text: text.to_string(),
        });
        self.sources.len()
    }

    fn type_ref(&mut self, module: ModuleId, owner: &str, text: &str) -> Result<TypeInfoId> {
        let origin = self.origin(module, owner);
        let file_id = self.add_source(origin, text);
        parse_type_ref(self.ctx, module, text, file_id)
    }

    fn members(&mut self, module: ModuleId, owner: &str, defs: &[MemberDef]) -> Result<Vec<Member>> {
        defs.iter()
            .map(|m| {
                let type_info = self.type_ref(module, owner, &m.ty)?;
                let span = self.ctx.type_info(type_info).span;
                Ok(Member {
                    name: Ident::new(&m.name, span),
                    type_info,
                })
            })
            .collect()
    }

    fn decl_kind(&mut self, module: ModuleId, def: &DeclDef) -> Result<DeclKind> {
        let owner = def.name();
        let kind = match def {
            DeclDef::Struct { members, .. } => DeclKind::Struct {
                members: self.members(module, owner, members)?,
            },
            DeclDef::Union { members, .. } => DeclKind::Union {
                members: self.members(module, owner, members)?,
            },
            DeclDef::Enum { constants, .. } => DeclKind::Enum {
                constants: constants.iter().map(|c| Ident::new(c, Span::dummy())).collect(),
            },
            DeclDef::Error { constants, .. } => DeclKind::ErrorDomain {
                constants: constants.iter().map(|c| Ident::new(c, Span::dummy())).collect(),
            },
            DeclDef::Typedef { ty, .. } => DeclKind::Typedef {
                type_info: self.type_ref(module, owner, ty)?,
            },
            DeclDef::Var { ty, .. } => DeclKind::Var {
                type_info: self.type_ref(module, owner, ty)?,
            },
            DeclDef::Func { params, ret, .. } => {
                let params = params
                    .iter()
                    .map(|p| self.type_ref(module, owner, p))
                    .collect::<Result<Vec<_>>>()?;
                DeclKind::Func {
                    params,
                    ret: self.type_ref(module, owner, ret)?,
                }
            }
            DeclDef::Const { .. } => {
                return Err(Error::Internal(format!("constant '{}' declared twice", owner)));
            }
        };
        Ok(kind)
    }

    fn const_value(&mut self, module: ModuleId, owner: &str, value: &ConstDef) -> Result<Expr> {
        let long = self.ctx.types.primitive(PrimitiveType::I64);
        match value {
            ConstDef::Int(v) => Ok(Expr::int(i128::from(*v), long)),
            ConstDef::Expr(text) => {
                let origin = self.origin(module, owner);
                let file_id = self.add_source(origin, text);
                parse_const_expr(self.ctx, module, text, file_id)
            }
        }
    }
}

/// Declare everything in `unit` into `ctx`.
///
/// Constants are declared first so that array lengths can name them, and
/// their values are parsed last so that they can name any declaration.
pub fn load_unit(ctx: &mut Context, unit: &UnitFile) -> Result<LoadedUnit> {
    let mut loader = Loader { ctx, sources: Vec::new() };

    let modules: Vec<ModuleId> = unit.modules.iter().map(|m| loader.ctx.add_module(&m.name)).collect();
    for (def, &module) in unit.modules.iter().zip(&modules) {
        for import in &def.imports {
            let imported = loader
                .ctx
                .symbols
                .module_by_name(import)
                .ok_or_else(|| Error::UnknownModule {
                    path: import.clone(),
                    span: Span::dummy(),
                })?;
            loader.ctx.import(module, imported);
        }
    }

    let mut slots: Vec<Vec<Option<DeclId>>> = Vec::with_capacity(modules.len());
    for (def, &module) in unit.modules.iter().zip(&modules) {
        let mut module_slots = vec![None; def.decls.len()];
        for (slot, decl) in module_slots.iter_mut().zip(&def.decls) {
            if let DeclDef::Const { name, .. } = decl {
                let placeholder = Expr::new(ExprKind::Poisoned, loader.ctx.types.poisoned(), Span::dummy());
                let id = loader.ctx.declare(
                    module,
                    Ident::new(name, Span::dummy()),
                    DeclKind::Const { value: Box::new(placeholder) },
                )?;
                *slot = Some(id);
            }
        }
        slots.push(module_slots);
    }

    for ((def, &module), module_slots) in unit.modules.iter().zip(&modules).zip(slots.iter_mut()) {
        for (slot, decl) in module_slots.iter_mut().zip(&def.decls) {
            if slot.is_some() {
                continue;
            }
            let kind = loader.decl_kind(module, decl)?;
            *slot = Some(loader.ctx.declare(module, Ident::new(decl.name(), Span::dummy()), kind)?);
        }
    }

    for ((def, &module), module_slots) in unit.modules.iter().zip(&modules).zip(&slots) {
        for (slot, decl) in module_slots.iter().zip(&def.decls) {
            if let (Some(id), DeclDef::Const { name, value }) = (slot, decl) {
                let expr = loader.const_value(module, name, value)?;
                if let DeclKind::Const { value } = &mut loader.ctx.decl_mut(*id).kind {
                    **value = expr;
                }
            }
        }
    }

    let decls: Vec<DeclId> = slots.into_iter().flatten().flatten().collect();
    debug!("loaded {} modules, {} declarations", modules.len(), decls.len());
    Ok(LoadedUnit {
        decls,
        sources: loader.sources,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::TypeInfoKind;
    use pretty_assertions::assert_eq;

    fn load(json: &str) -> (Context, Result<LoadedUnit>) {
        let unit = UnitFile::from_json(json).unwrap();
        let mut ctx = Context::default();
        let loaded = load_unit(&mut ctx, &unit);
        (ctx, loaded)
    }

    #[test]
    fn test_parse_unit_json() {
        let unit = UnitFile::from_json(
            r#"{ "modules": [ { "name": "m", "decls": [
                { "kind": "const", "name": "A", "value": 4 },
                { "kind": "const", "name": "B", "value": "A * 2" },
                { "kind": "func", "name": "f", "params": ["int"] },
                { "kind": "error", "name": "E" }
            ] } ] }"#,
        )
        .unwrap();
        let decls = &unit.modules[0].decls;
        assert_eq!(decls[0], DeclDef::Const { name: "A".into(), value: ConstDef::Int(4) });
        assert_eq!(decls[1], DeclDef::Const { name: "B".into(), value: ConstDef::Expr("A * 2".into()) });
        assert_eq!(
            decls[2],
            DeclDef::Func { name: "f".into(), params: vec!["int".into()], ret: "void".into() }
        );
        assert_eq!(decls[3], DeclDef::Error { name: "E".into(), constants: vec![] });
        assert!(unit.modules[0].imports.is_empty());
    }

    #[test]
    fn test_forward_references_and_sources() {
        let (mut ctx, loaded) = load(
            r#"{ "modules": [ { "name": "main", "decls": [
                { "kind": "var", "name": "buf", "type": "char[LEN]" },
                { "kind": "const", "name": "LEN", "value": "sizeof(Pair)" },
                { "kind": "struct", "name": "Pair", "members": [
                    { "name": "a", "type": "int" }, { "name": "b", "type": "int" } ] }
            ] } ] }"#,
        );
        let loaded = loaded.unwrap();
        assert_eq!(loaded.decls.len(), 3);
        assert!(ctx.resolve_all());

        let buf = ctx.decl(loaded.decls[0]).ty.unwrap();
        assert_eq!(ctx.types.name(buf), "i8[8]");

        let origins: Vec<&str> = loaded.sources.iter().map(|s| s.origin.as_str()).collect();
        assert_eq!(origins, vec!["main::buf", "main::Pair", "main::Pair", "main::LEN"]);

        let DeclKind::Var { type_info } = ctx.decl(loaded.decls[0]).kind.clone() else {
            panic!("expected a variable");
        };
        let span = ctx.type_info(type_info).span;
        assert_eq!(loaded.source(&span).map(|s| s.text.as_str()), Some("char[LEN]"));
        assert_eq!(loaded.source(&Span::dummy()), None);
    }

    #[test]
    fn test_imports_and_qualified_names() {
        let (ctx, loaded) = load(
            r#"{ "modules": [
                { "name": "geo", "decls": [ { "kind": "struct", "name": "Point", "members": [] } ] },
                { "name": "app", "imports": ["geo"], "decls": [
                    { "kind": "var", "name": "p", "type": "geo::Point*" } ] }
            ] }"#,
        );
        let loaded = loaded.unwrap();
        let DeclKind::Var { type_info } = ctx.decl(loaded.decls[1]).kind.clone() else {
            panic!("expected a variable");
        };
        let TypeInfoKind::Pointer(base) = ctx.type_info(type_info).kind.clone() else {
            panic!("expected a pointer");
        };
        assert!(matches!(
            &ctx.type_info(base).kind,
            TypeInfoKind::Identifier { path: Some(p), .. } if p == "geo"
        ));
    }

    #[test]
    fn test_unknown_import() {
        let (_, loaded) = load(r#"{ "modules": [ { "name": "a", "imports": ["nowhere"] } ] }"#);
        assert!(matches!(loaded, Err(Error::UnknownModule { path, .. }) if path == "nowhere"));
    }

    #[test]
    fn test_duplicate_and_bad_syntax() {
        let (_, loaded) = load(
            r#"{ "modules": [ { "name": "m", "decls": [
                { "kind": "var", "name": "x", "type": "int" },
                { "kind": "var", "name": "x", "type": "long" } ] } ] }"#,
        );
        assert!(matches!(loaded, Err(Error::DuplicateDefinition { .. })));

        let (_, loaded) = load(
            r#"{ "modules": [ { "name": "m", "decls": [
                { "kind": "typedef", "name": "T", "type": "int[" } ] } ] }"#,
        );
        assert!(matches!(loaded, Err(Error::TypeSyntax { .. })));
    }
}
