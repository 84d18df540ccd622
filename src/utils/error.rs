//! Error handling for Anvil

use crate::utils::Span;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Compiler error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // ==================== Resolution Errors ====================

    #[error("Unknown type '{name}'.")]
    UnknownType { name: String, span: Span },

    #[error("'{name}' is not a type.")]
    NotAType { name: String, span: Span },

    #[error("Ambiguous type '{name}' - both defined in {first} and {second}, please add the module name to resolve the ambiguity")]
    AmbiguousType {
        name: String,
        first: String,
        second: String,
        span: Span,
    },

    #[error("Unknown module '{path}'.")]
    UnknownModule { path: String, span: Span },

    #[error("Circular dependency resolving type '{name}'.")]
    CircularDependency { name: String, span: Span },

    #[error("Recursive definition of '{name}': it contains itself by value.")]
    RecursiveDefinition { name: String, span: Span },

    #[error("Expected a constant value as array size.")]
    ExpectedConstant { span: Span },

    #[error("Array size cannot be negative (got {value}).")]
    NegativeArraySize { value: i128, span: Span },

    #[error("Division by zero in constant expression.")]
    DivisionByZero { span: Span },

    #[error("Integer overflow in constant expression.")]
    ArithmeticOverflow { span: Span },

    #[error("Constant value {value} does not fit in '{ty}'.")]
    ConstantOverflow { value: i128, ty: String, span: Span },

    #[error("Duplicate definition: {name}")]
    DuplicateDefinition { name: String, span: Span },

    /// Raised by a node that already produced its diagnostic.
    #[error("poisoned")]
    Poisoned { span: Span },

    // ==================== Codegen Errors ====================

    #[error("{feature} is not yet supported")]
    Unsupported { feature: String, span: Option<Span> },

    #[error("Internal compiler error: {0}")]
    Internal(String),

    // ==================== Interpreter Errors ====================

    #[error("Trap: {0}")]
    Trap(String),

    // ==================== Driver Errors ====================

    #[error("Invalid type syntax '{text}': {reason}")]
    TypeSyntax { text: String, reason: String },

    #[error("IO error: {0}")]
    Io(String),
}

impl Error {
    /// Get the span associated with this error
    pub fn span(&self) -> Option<Span> {
        match self {
            Self::UnknownType { span, .. } => Some(*span),
            Self::NotAType { span, .. } => Some(*span),
            Self::AmbiguousType { span, .. } => Some(*span),
            Self::UnknownModule { span, .. } => Some(*span),
            Self::CircularDependency { span, .. } => Some(*span),
            Self::RecursiveDefinition { span, .. } => Some(*span),
            Self::ExpectedConstant { span } => Some(*span),
            Self::NegativeArraySize { span, .. } => Some(*span),
            Self::DivisionByZero { span } => Some(*span),
            Self::ArithmeticOverflow { span } => Some(*span),
            Self::ConstantOverflow { span, .. } => Some(*span),
            Self::DuplicateDefinition { span, .. } => Some(*span),
            Self::Poisoned { span } => Some(*span),
            Self::Unsupported { span, .. } => *span,
            Self::Internal(_) | Self::Trap(_) | Self::TypeSyntax { .. } | Self::Io(_) => None,
        }
    }

    /// Shorthand for the explicit "not yet supported" outcome
    pub fn unsupported(feature: impl Into<String>, span: Span) -> Self {
        Self::Unsupported {
            feature: feature.into(),
            span: Some(span),
        }
    }

    /// Whether this error was already reported where it originated
    pub fn is_poison(&self) -> bool {
        matches!(self, Self::Poisoned { .. })
    }

    /// Stable diagnostic code, used by structured reports
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownType { .. } => "E0001",
            Self::NotAType { .. } => "E0002",
            Self::AmbiguousType { .. } => "E0003",
            Self::UnknownModule { .. } => "E0004",
            Self::CircularDependency { .. } => "E0005",
            Self::RecursiveDefinition { .. } => "E0006",
            Self::ExpectedConstant { .. } => "E0007",
            Self::NegativeArraySize { .. } => "E0008",
            Self::DivisionByZero { .. } => "E0009",
            Self::ConstantOverflow { .. } => "E0010",
            Self::DuplicateDefinition { .. } => "E0011",
            Self::ArithmeticOverflow { .. } => "E0012",
            Self::Poisoned { .. } => "E0000",
            Self::Unsupported { .. } => "E0100",
            Self::Internal(_) => "E0101",
            Self::Trap(_) => "E0200",
            Self::TypeSyntax { .. } => "E0300",
            Self::Io(_) => "E0301",
        }
    }
}
