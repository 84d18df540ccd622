//! Anvil
//!
//! Type resolution and SSA expression lowering for an ahead-of-time
//! compiler: modules of declarations are resolved to canonical types, and
//! typed expressions are lowered to an LLVM-like IR that a small
//! interpreter can execute.

pub mod feedback;
pub mod frontend;
pub mod middle;
pub mod types;
pub mod utils;
