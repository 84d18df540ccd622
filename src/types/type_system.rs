//! Canonical type table for Anvil
//!
//! Every type the resolver produces is interned here exactly once, so two
//! references denoting the same type share one [`TypeId`] and can be compared
//! by identity.

use std::collections::HashMap;

use crate::frontend::ast::DeclId;

/// Primitive types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Void,
    Bool,
    I8, I16, I32, I64,
    U8, U16, U32, U64,
    F32, F64,
}

impl PrimitiveType {
    pub const ALL: [PrimitiveType; 12] = [
        Self::Void, Self::Bool,
        Self::I8, Self::I16, Self::I32, Self::I64,
        Self::U8, Self::U16, Self::U32, Self::U64,
        Self::F32, Self::F64,
    ];

    /// Get the size in bytes
    pub fn size_of(&self) -> u64 {
        match self {
            Self::Void => 0,
            Self::I8 | Self::U8 | Self::Bool => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    /// Get the alignment
    pub fn align_of(&self) -> u64 {
        self.size_of().max(1)
    }

    /// Width in bits as seen by the arithmetic; `bool` is a single bit
    pub fn bit_width(&self) -> u32 {
        match self {
            Self::Bool => 1,
            other => (other.size_of() * 8) as u32,
        }
    }

    /// Check if this is a signed integer type
    pub fn is_signed(&self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    /// Check if this is an unsigned integer type
    pub fn is_unsigned(&self) -> bool {
        matches!(self, Self::U8 | Self::U16 | Self::U32 | Self::U64)
    }

    /// Check if this is an integer type
    pub fn is_integer(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    /// Check if this is a floating-point type
    pub fn is_float(&self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Bool => "bool",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }
}

/// Handle to a canonical type. Equal handles mean the same type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// Structure of a canonical type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Primitive(PrimitiveType),
    String,
    Pointer(TypeId),
    /// Fixed array; a length of 0 encodes an unspecified length
    Array { elem: TypeId, len: u64 },
    VarArray(TypeId),
    Subarray(TypeId),
    Struct(DeclId),
    Union(DeclId),
    Enum(DeclId),
    ErrorDomain(DeclId),
    Function { params: Vec<TypeId>, ret: TypeId },
    Poisoned,
}

/// A canonical type
#[derive(Debug, Clone)]
pub struct Type {
    pub kind: TypeKind,
    /// Display name used in diagnostics
    pub name: String,
}

/// Target parameters that influence type layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetInfo {
    pub pointer_bits: u32,
}

impl TargetInfo {
    pub fn pointer_size(&self) -> u64 {
        u64::from(self.pointer_bits / 8)
    }
}

impl Default for TargetInfo {
    fn default() -> Self {
        Self { pointer_bits: 64 }
    }
}

/// Interning table owning every canonical type of a compilation unit
#[derive(Debug, Clone)]
pub struct TypeTable {
    types: Vec<Type>,
    interned: HashMap<TypeKind, TypeId>,
    target: TargetInfo,
    string: TypeId,
    poisoned: TypeId,
}

impl TypeTable {
    pub fn new(target: TargetInfo) -> Self {
        let mut table = Self {
            types: Vec::new(),
            interned: HashMap::new(),
            target,
            string: TypeId(0),
            poisoned: TypeId(0),
        };
        // Primitives occupy the first slots in `PrimitiveType::ALL` order.
        for prim in PrimitiveType::ALL {
            table.intern(TypeKind::Primitive(prim), prim.name().to_string());
        }
        table.string = table.intern(TypeKind::String, "string".to_string());
        table.poisoned = table.intern(TypeKind::Poisoned, "<poisoned>".to_string());
        table
    }

    fn intern(&mut self, kind: TypeKind, name: String) -> TypeId {
        if let Some(&id) = self.interned.get(&kind) {
            return id;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(Type { kind: kind.clone(), name });
        self.interned.insert(kind, id);
        id
    }

    pub fn target(&self) -> TargetInfo {
        self.target
    }

    pub fn primitive(&self, prim: PrimitiveType) -> TypeId {
        let index = PrimitiveType::ALL
            .iter()
            .position(|p| *p == prim)
            .unwrap_or_default();
        TypeId(index as u32)
    }

    pub fn void(&self) -> TypeId {
        self.primitive(PrimitiveType::Void)
    }

    pub fn bool(&self) -> TypeId {
        self.primitive(PrimitiveType::Bool)
    }

    /// The architecture's unsigned size type
    pub fn usize(&self) -> TypeId {
        match self.target.pointer_bits {
            32 => self.primitive(PrimitiveType::U32),
            16 => self.primitive(PrimitiveType::U16),
            _ => self.primitive(PrimitiveType::U64),
        }
    }

    /// The architecture's signed size type
    pub fn isize(&self) -> TypeId {
        match self.target.pointer_bits {
            32 => self.primitive(PrimitiveType::I32),
            16 => self.primitive(PrimitiveType::I16),
            _ => self.primitive(PrimitiveType::I64),
        }
    }

    pub fn string(&self) -> TypeId {
        self.string
    }

    pub fn poisoned(&self) -> TypeId {
        self.poisoned
    }

    /// Canonical pointer to `pointee`
    pub fn pointer(&mut self, pointee: TypeId) -> TypeId {
        let name = format!("{}*", self.name(pointee));
        self.intern(TypeKind::Pointer(pointee), name)
    }

    /// Canonical fixed array; `len == 0` is an array of unspecified length
    pub fn array(&mut self, elem: TypeId, len: u64) -> TypeId {
        let name = if len == 0 {
            format!("{}[]", self.name(elem))
        } else {
            format!("{}[{}]", self.name(elem), len)
        };
        self.intern(TypeKind::Array { elem, len }, name)
    }

    pub fn var_array(&mut self, elem: TypeId) -> TypeId {
        let name = format!("{}[*]", self.name(elem));
        self.intern(TypeKind::VarArray(elem), name)
    }

    pub fn subarray(&mut self, elem: TypeId) -> TypeId {
        let name = format!("{}[:]", self.name(elem));
        self.intern(TypeKind::Subarray(elem), name)
    }

    pub fn function(&mut self, params: Vec<TypeId>, ret: TypeId) -> TypeId {
        let params_str: Vec<_> = params.iter().map(|p| self.name(*p).to_string()).collect();
        let name = format!("fn({}) -> {}", params_str.join(", "), self.name(ret));
        self.intern(TypeKind::Function { params, ret }, name)
    }

    /// The unique type owned by a user-defined struct, union, enum or error domain
    pub fn nominal(&mut self, kind: TypeKind, name: &str) -> TypeId {
        debug_assert!(matches!(
            kind,
            TypeKind::Struct(_) | TypeKind::Union(_) | TypeKind::Enum(_) | TypeKind::ErrorDomain(_)
        ));
        self.intern(kind, name.to_string())
    }

    /// Builtin type keywords. Aliases resolve to the same canonical type.
    pub fn lookup_builtin(&self, name: &str) -> Option<TypeId> {
        let prim = match name {
            "void" => PrimitiveType::Void,
            "bool" => PrimitiveType::Bool,
            "i8" | "char" => PrimitiveType::I8,
            "i16" | "short" => PrimitiveType::I16,
            "i32" | "int" => PrimitiveType::I32,
            "i64" | "long" => PrimitiveType::I64,
            "u8" | "byte" => PrimitiveType::U8,
            "u16" | "ushort" => PrimitiveType::U16,
            "u32" | "uint" => PrimitiveType::U32,
            "u64" | "ulong" => PrimitiveType::U64,
            "f32" | "float" => PrimitiveType::F32,
            "f64" | "double" => PrimitiveType::F64,
            "usize" => return Some(self.usize()),
            "isize" => return Some(self.isize()),
            "string" => return Some(self.string),
            _ => return None,
        };
        Some(self.primitive(prim))
    }

    pub fn get(&self, id: TypeId) -> &Type {
        &self.types[id.0 as usize]
    }

    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.get(id).kind
    }

    pub fn name(&self, id: TypeId) -> &str {
        &self.get(id).name
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn as_primitive(&self, id: TypeId) -> Option<PrimitiveType> {
        match self.kind(id) {
            TypeKind::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    pub fn is_float(&self, id: TypeId) -> bool {
        self.as_primitive(id).is_some_and(|p| p.is_float())
    }

    pub fn is_integer(&self, id: TypeId) -> bool {
        self.as_primitive(id).is_some_and(|p| p.is_integer())
    }

    pub fn is_signed(&self, id: TypeId) -> bool {
        self.as_primitive(id).is_some_and(|p| p.is_signed())
    }

    /// Unsigned integers, and `bool`, compare and divide unsigned
    pub fn is_unsigned(&self, id: TypeId) -> bool {
        self.as_primitive(id)
            .is_some_and(|p| p.is_unsigned() || p == PrimitiveType::Bool)
    }

    pub fn is_bool(&self, id: TypeId) -> bool {
        self.as_primitive(id) == Some(PrimitiveType::Bool)
    }

    pub fn is_void(&self, id: TypeId) -> bool {
        self.as_primitive(id) == Some(PrimitiveType::Void)
    }

    pub fn is_pointer(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Pointer(_))
    }

    pub fn is_poisoned(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Poisoned)
    }

    pub fn pointee(&self, id: TypeId) -> Option<TypeId> {
        match self.kind(id) {
            TypeKind::Pointer(inner) => Some(*inner),
            _ => None,
        }
    }

    /// Bit width of a scalar type, pointers included
    pub fn bit_width(&self, id: TypeId) -> Option<u32> {
        match self.kind(id) {
            TypeKind::Primitive(PrimitiveType::Void) => None,
            TypeKind::Primitive(p) => Some(p.bit_width()),
            TypeKind::Pointer(_) => Some(self.target.pointer_bits),
            _ => None,
        }
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new(TargetInfo::default())
    }
}
