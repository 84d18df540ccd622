//! Type system module - canonical, interned types

mod type_system;

pub use type_system::{PrimitiveType, TargetInfo, Type, TypeId, TypeKind, TypeTable};
