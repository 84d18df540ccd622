//! Abstract Syntax Tree definitions for Anvil
//!
//! Nodes here are produced by the parser and annotated in place by semantic
//! analysis. Declarations and type references live in arenas owned by the
//! semantic [`Context`](crate::frontend::semantic::Context) and are addressed by
//! index; expressions form ordinary owned trees.

use crate::types::TypeId;
use crate::utils::Span;

/// Index of a declaration in the semantic context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclId(pub usize);

/// Index of a type reference node in the semantic context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeInfoId(pub usize);

/// Index of a module in the symbol table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(pub usize);

/// Identifier with its location
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    pub fn new(name: &str, span: Span) -> Self {
        Self { name: name.to_string(), span }
    }
}

// ==================== Type References ====================

/// Resolution progress of a node. `Running` doubles as the cycle sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStatus {
    Unresolved,
    Running,
    Done,
}

/// Syntactic shape of a type reference
#[derive(Debug, Clone, PartialEq)]
pub enum TypeInfoKind {
    /// `Name` or `module::Name`
    Identifier { path: Option<String>, name: Ident },
    /// `T*`
    Pointer(TypeInfoId),
    /// `T[len]`, or `T[]` when `len` is absent
    Array { base: TypeInfoId, len: Option<Box<Expr>> },
    /// `typeof(expr)`
    Expression(Box<Expr>),
    /// Intermediate produced by the parser, rewritten before resolution
    IncompleteArray(TypeInfoId),
    Poisoned,
}

/// A syntactic type reference
#[derive(Debug, Clone, PartialEq)]
pub struct TypeInfo {
    pub kind: TypeInfoKind,
    pub status: ResolveStatus,
    /// Canonical type, set once resolution finishes
    pub ty: Option<TypeId>,
    pub span: Span,
}

impl TypeInfo {
    pub fn new(kind: TypeInfoKind, span: Span) -> Self {
        Self {
            kind,
            status: ResolveStatus::Unresolved,
            ty: None,
            span,
        }
    }

    /// A reference the parser already resolved, e.g. a builtin keyword
    pub fn resolved(ty: TypeId, span: Span) -> Self {
        Self {
            kind: TypeInfoKind::Identifier {
                path: None,
                name: Ident::new("<builtin>", span),
            },
            status: ResolveStatus::Done,
            ty: Some(ty),
            span,
        }
    }

    pub fn identifier(name: &str, span: Span) -> Self {
        Self::new(
            TypeInfoKind::Identifier { path: None, name: Ident::new(name, span) },
            span,
        )
    }

    pub fn qualified(path: &str, name: &str, span: Span) -> Self {
        Self::new(
            TypeInfoKind::Identifier {
                path: Some(path.to_string()),
                name: Ident::new(name, span),
            },
            span,
        )
    }

    pub fn is_poisoned(&self) -> bool {
        matches!(self.kind, TypeInfoKind::Poisoned)
    }
}

// ==================== Expressions ====================

/// A typed expression node
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    /// Static type assigned by semantic analysis
    pub ty: TypeId,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Poisoned,
    Identifier(DeclId),
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    PostUnary { op: PostUnaryOp, expr: Box<Expr> },
    Conditional { cond: Box<Expr>, then_expr: Box<Expr>, else_expr: Box<Expr> },
    Cast { kind: CastKind, expr: Box<Expr> },
    Call { function: Box<Expr>, args: Vec<Expr> },
    /// Field access; `index` is the member slot in the parent aggregate
    Access { parent: Box<Expr>, index: usize },
    Subscript { expr: Box<Expr>, index: Box<Expr> },
    Const(ConstValue),
    StructValue { type_info: TypeInfoId, init: Box<Expr> },
    StructInitValues(Vec<Expr>),
    InitializerList(Vec<Expr>),
    ExpressionList(Vec<Expr>),
    // Folded away by semantic analysis, never seen by codegen.
    Type(TypeInfoId),
    Sizeof(TypeInfoId),
    TypeAccess { type_info: TypeInfoId, name: Ident },
    Try { expr: Box<Expr>, else_expr: Option<Box<Expr>> },
}

/// Compile-time constant payload
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Int(i128),
    Float(f64),
    Bool(bool),
    Nil,
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `!`
    Not,
    /// `~`
    BitNeg,
    /// `-`
    Neg,
    /// `&`
    Addr,
    /// `*`
    Deref,
    /// prefix `++`
    Inc,
    /// prefix `--`
    Dec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostUnaryOp {
    Inc,
    Dec,
}

/// Binary operators. The `*Mod` spellings wrap silently on overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mult,
    MultMod,
    Add,
    AddMod,
    Sub,
    SubMod,
    Div,
    Mod,
    Shr,
    Shl,
    BitAnd,
    BitOr,
    BitXor,
    Eq,
    Ne,
    Ge,
    Gt,
    Le,
    Lt,
    And,
    Or,
    Assign,
    MultAssign,
    MultModAssign,
    AddAssign,
    AddModAssign,
    SubAssign,
    SubModAssign,
    DivAssign,
    ModAssign,
    AndAssign,
    OrAssign,
    BitAndAssign,
    BitOrAssign,
    BitXorAssign,
    ShrAssign,
    ShlAssign,
}

impl BinaryOp {
    /// The operator a compound assignment applies, `None` for anything else
    pub fn assign_base_op(self) -> Option<BinaryOp> {
        let base = match self {
            Self::MultAssign => Self::Mult,
            Self::MultModAssign => Self::MultMod,
            Self::AddAssign => Self::Add,
            Self::AddModAssign => Self::AddMod,
            Self::SubAssign => Self::Sub,
            Self::SubModAssign => Self::SubMod,
            Self::DivAssign => Self::Div,
            Self::ModAssign => Self::Mod,
            Self::AndAssign => Self::And,
            Self::OrAssign => Self::Or,
            Self::BitAndAssign => Self::BitAnd,
            Self::BitOrAssign => Self::BitOr,
            Self::BitXorAssign => Self::BitXor,
            Self::ShrAssign => Self::Shr,
            Self::ShlAssign => Self::Shl,
            _ => return None,
        };
        Some(base)
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, Self::Eq | Self::Ne | Self::Ge | Self::Gt | Self::Le | Self::Lt)
    }
}

/// Closed set of conversions chosen by semantic analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    Error,
    PtrPtr,
    PtrXi,
    VarrPtr,
    ArrPtr,
    StrPtr,
    PtrBool,
    BoolInt,
    FpBool,
    BoolFp,
    IntBool,
    FpFp,
    FpSi,
    FpUi,
    SiSi,
    SiUi,
    SiFp,
    XiPtr,
    UiSi,
    UiUi,
    UiFp,
    EnumSi,
}

impl Expr {
    pub fn new(kind: ExprKind, ty: TypeId, span: Span) -> Self {
        Self { kind, ty, span }
    }

    pub fn int(value: i128, ty: TypeId) -> Self {
        Self::new(ExprKind::Const(ConstValue::Int(value)), ty, Span::dummy())
    }

    pub fn float(value: f64, ty: TypeId) -> Self {
        Self::new(ExprKind::Const(ConstValue::Float(value)), ty, Span::dummy())
    }

    pub fn bool(value: bool, ty: TypeId) -> Self {
        Self::new(ExprKind::Const(ConstValue::Bool(value)), ty, Span::dummy())
    }

    pub fn ident(decl: DeclId, ty: TypeId) -> Self {
        Self::new(ExprKind::Identifier(decl), ty, Span::dummy())
    }

    pub fn unary(op: UnaryOp, expr: Expr, ty: TypeId) -> Self {
        Self::new(ExprKind::Unary { op, expr: Box::new(expr) }, ty, Span::dummy())
    }

    pub fn post_unary(op: PostUnaryOp, expr: Expr) -> Self {
        let ty = expr.ty;
        Self::new(ExprKind::PostUnary { op, expr: Box::new(expr) }, ty, Span::dummy())
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr, ty: TypeId) -> Self {
        Self::new(
            ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) },
            ty,
            Span::dummy(),
        )
    }

    pub fn cast(kind: CastKind, expr: Expr, ty: TypeId) -> Self {
        Self::new(ExprKind::Cast { kind, expr: Box::new(expr) }, ty, Span::dummy())
    }

    pub fn call(function: Expr, args: Vec<Expr>, ty: TypeId) -> Self {
        Self::new(ExprKind::Call { function: Box::new(function), args }, ty, Span::dummy())
    }

    pub fn subscript(expr: Expr, index: Expr, ty: TypeId) -> Self {
        Self::new(
            ExprKind::Subscript { expr: Box::new(expr), index: Box::new(index) },
            ty,
            Span::dummy(),
        )
    }

    pub fn access(parent: Expr, index: usize, ty: TypeId) -> Self {
        Self::new(ExprKind::Access { parent: Box::new(parent), index }, ty, Span::dummy())
    }

    pub fn conditional(cond: Expr, then_expr: Expr, else_expr: Expr, ty: TypeId) -> Self {
        Self::new(
            ExprKind::Conditional {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            ty,
            Span::dummy(),
        )
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Integer payload of a folded constant
    pub fn const_int(&self) -> Option<i128> {
        match &self.kind {
            ExprKind::Const(ConstValue::Int(v)) => Some(*v),
            _ => None,
        }
    }
}

// ==================== Declarations ====================

/// Aggregate member
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub name: Ident,
    pub type_info: TypeInfoId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeclKind {
    Poisoned,
    Var { type_info: TypeInfoId },
    Func { params: Vec<TypeInfoId>, ret: TypeInfoId },
    Struct { members: Vec<Member> },
    Union { members: Vec<Member> },
    Enum { constants: Vec<Ident> },
    ErrorDomain { constants: Vec<Ident> },
    Typedef { type_info: TypeInfoId },
    Const { value: Box<Expr> },
    EnumConstant,
    ErrorConstant,
    ArrayValue,
    Import,
    Macro,
    Generic,
}

impl DeclKind {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Poisoned => "poisoned declaration",
            Self::Var { .. } => "variable",
            Self::Func { .. } => "function",
            Self::Struct { .. } => "struct",
            Self::Union { .. } => "union",
            Self::Enum { .. } => "enum",
            Self::ErrorDomain { .. } => "error domain",
            Self::Typedef { .. } => "typedef",
            Self::Const { .. } => "constant",
            Self::EnumConstant => "enum constant",
            Self::ErrorConstant => "error constant",
            Self::ArrayValue => "array value",
            Self::Import => "import",
            Self::Macro => "macro",
            Self::Generic => "generic",
        }
    }
}

/// A named declaration
#[derive(Debug, Clone, PartialEq)]
pub struct Decl {
    pub name: Ident,
    pub module: ModuleId,
    pub kind: DeclKind,
    pub status: ResolveStatus,
    /// Canonical type once resolved
    pub ty: Option<TypeId>,
}

impl Decl {
    pub fn is_poisoned(&self) -> bool {
        matches!(self.kind, DeclKind::Poisoned)
    }

    pub fn members(&self) -> &[Member] {
        match &self.kind {
            DeclKind::Struct { members } | DeclKind::Union { members } => members,
            _ => &[],
        }
    }
}
