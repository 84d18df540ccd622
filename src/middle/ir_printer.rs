//! IR Printer - textual form of Anvil IR
//!
//! Output follows LLVM assembly closely enough to be read side by side with
//! it; `--emit-ir` prints this.

use std::fmt::{self, Write};

use crate::middle::ir::*;

/// Pretty printer for Anvil IR
pub struct IRPrinter {
    output: String,
}

impl IRPrinter {
    pub fn new() -> Self {
        Self { output: String::new() }
    }

    /// Print an IR module to string
    pub fn print_module(&mut self, module: &IRModule) -> String {
        self.output.clear();
        // Writing into a String cannot fail.
        let _ = self.write_module(module);
        std::mem::take(&mut self.output)
    }

    fn write_module(&mut self, module: &IRModule) -> fmt::Result {
        writeln!(self.output, "; ModuleID = '{}'", module.name)?;

        if !module.globals.is_empty() {
            writeln!(self.output)?;
        }
        for global in &module.globals {
            self.write_global(global)?;
        }

        if !module.externs.is_empty() {
            writeln!(self.output)?;
        }
        for ext in &module.externs {
            write!(self.output, "declare {} @{}(", ext.ret_type, ext.name)?;
            write_list(&mut self.output, &ext.params)?;
            writeln!(self.output, ")")?;
        }

        for func in &module.functions {
            writeln!(self.output)?;
            self.write_function(func)?;
        }
        Ok(())
    }

    fn write_global(&mut self, global: &IRGlobal) -> fmt::Result {
        let linkage = if global.internal { "internal " } else { "" };
        let kind = if global.constant { "constant" } else { "global" };
        write!(
            self.output,
            "@{} = {}{} [{} x i8] ",
            global.name,
            linkage,
            kind,
            global.data.len()
        )?;
        if global.data.iter().all(|&b| b == 0) {
            writeln!(self.output, "zeroinitializer")
        } else {
            write!(self.output, "c\"")?;
            for &byte in &global.data {
                if (byte.is_ascii_graphic() && byte != b'"' && byte != b'\\') || byte == b' ' {
                    self.output.push(char::from(byte));
                } else {
                    write!(self.output, "\\{:02X}", byte)?;
                }
            }
            writeln!(self.output, "\"")
        }
    }

    fn write_function(&mut self, func: &IRFunction) -> fmt::Result {
        write!(self.output, "define {} @{}(", func.ret_type, func.name)?;
        for (i, (name, ty)) in func.params.iter().enumerate() {
            if i > 0 {
                write!(self.output, ", ")?;
            }
            write!(self.output, "{} %{}", ty, name)?;
        }
        writeln!(self.output, ") {{")?;

        for (i, block) in func.blocks.iter().enumerate() {
            if i > 0 {
                writeln!(self.output)?;
            }
            self.write_block(block)?;
        }

        writeln!(self.output, "}}")
    }

    fn write_block(&mut self, block: &BasicBlock) -> fmt::Result {
        writeln!(self.output, "{}:  ; {}", block.id, block.label)?;
        for inst in &block.instructions {
            write!(self.output, "  ")?;
            self.write_instruction(inst)?;
            writeln!(self.output)?;
        }
        match &block.terminator {
            Some(term) => {
                write!(self.output, "  ")?;
                self.write_terminator(term)?;
                writeln!(self.output)
            }
            None => writeln!(self.output, "  ; <no terminator>"),
        }
    }

    fn write_instruction(&mut self, inst: &Instruction) -> fmt::Result {
        let out = &mut self.output;
        match inst {
            Instruction::BinOp { dest, op, ty, left, right } => {
                write!(out, "{} = {} {} {}, {}", dest, op, ty, left, right)
            }
            Instruction::ICmp { dest, pred, ty, left, right } => {
                write!(out, "{} = icmp {} {} {}, {}", dest, pred, ty, left, right)
            }
            Instruction::FCmp { dest, pred, ty, left, right } => {
                write!(out, "{} = fcmp {} {} {}, {}", dest, pred, ty, left, right)
            }
            Instruction::UnaryOp { dest, op, ty, value } => {
                write!(out, "{} = {} {} {}", dest, op, ty, value)
            }
            Instruction::Cast { dest, op, value, from, to } => {
                write!(out, "{} = {} {} {} to {}", dest, op, from, value, to)
            }
            Instruction::Call { dest, func, args, ret_ty } => {
                if let Some(d) = dest {
                    write!(out, "{} = ", d)?;
                }
                write!(out, "call {} @{}(", ret_ty, func)?;
                write_list(out, args)?;
                write!(out, ")")
            }
            Instruction::Alloca { dest, ty } => write!(out, "{} = alloca {}", dest, ty),
            Instruction::Load { dest, ptr, ty } => write!(out, "{} = load {}, ptr {}", dest, ty, ptr),
            Instruction::Store { ptr, value, ty } => write!(out, "store {} {}, ptr {}", ty, value, ptr),
            Instruction::GetElementPtr { dest, ptr, index, elem_ty } => {
                write!(out, "{} = getelementptr {}, ptr {}, {}", dest, elem_ty, ptr, index)
            }
            Instruction::StructGep { dest, ptr, struct_ty, field } => {
                write!(out, "{} = getelementptr {}, ptr {}, i32 0, i32 {}", dest, struct_ty, ptr, field)
            }
            Instruction::PtrDiff { dest, left, right, elem_ty } => {
                write!(out, "{} = ptrdiff {}, ptr {}, ptr {}", dest, elem_ty, left, right)
            }
            Instruction::Phi { dest, ty, incoming } => {
                write!(out, "{} = phi {} ", dest, ty)?;
                for (i, (val, block)) in incoming.iter().enumerate() {
                    if i > 0 {
                        write!(out, ", ")?;
                    }
                    write!(out, "[ {}, {} ]", val, block)?;
                }
                Ok(())
            }
        }
    }

    fn write_terminator(&mut self, term: &Terminator) -> fmt::Result {
        match term {
            Terminator::Return { value: Some(v) } => write!(self.output, "ret {}", v),
            Terminator::Return { value: None } => write!(self.output, "ret void"),
            Terminator::Jump { target } => write!(self.output, "br label {}", target),
            Terminator::Branch { cond, then_target, else_target } => write!(
                self.output,
                "br i1 {}, label {}, label {}",
                cond, then_target, else_target
            ),
            Terminator::Unreachable => write!(self.output, "unreachable"),
        }
    }
}

fn write_list<T: fmt::Display>(out: &mut String, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(out, ", ")?;
        }
        write!(out, "{}", item)?;
    }
    Ok(())
}

impl Default for IRPrinter {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience function to print a module
pub fn print_ir(module: &IRModule) -> String {
    let mut printer = IRPrinter::new();
    printer.print_module(module)
}
