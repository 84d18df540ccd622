//! Frontend module - unit loading, type syntax, semantic analysis

pub mod ast;
pub mod semantic;
pub mod const_fold;
pub mod type_resolver;
pub mod type_syntax;
pub mod unit;
