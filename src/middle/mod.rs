//! Middle-end module - SSA IR, expression lowering and execution

pub mod ir;
pub mod builder;
pub mod expr_gen;
pub mod ir_printer;
pub mod interp;
