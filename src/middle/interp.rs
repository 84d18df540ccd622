//! IR interpreter
//!
//! Executes an [`IRModule`] over a flat little-endian byte memory. The first
//! bytes are never handed out, so address 0 is null and traps on access.
//! Calls to symbols the module does not define go to registered host
//! functions. Overflow-checked arithmetic, division by zero and out-of-range
//! shifts trap instead of producing poison.

use std::collections::HashMap;
use std::ops::Range;

use log::{debug, trace};

use crate::middle::ir::{
    BinOp, BlockId, CastOp, Constant, FloatPredicate, IRFunction, IRModule, IRType, Instruction,
    IntPredicate, Register, Terminator, UnaryOp, Value,
};
use crate::utils::{Error, Result};

const NULL_GUARD: usize = 8;
const MAX_CALL_DEPTH: usize = 256;
const MAX_STEPS: u64 = 1_000_000;

/// A value held in a register
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuntimeValue {
    /// Integers and pointers, sign-extended from their width. Booleans are 0 or 1.
    Int(i64),
    Float(f64),
    Unit,
}

impl RuntimeValue {
    pub fn from_bool(value: bool) -> Self {
        RuntimeValue::Int(i64::from(value))
    }

    pub fn as_int(self) -> Result<i64> {
        match self {
            RuntimeValue::Int(v) => Ok(v),
            other => Err(Error::Trap(format!("expected an integer, found {:?}", other))),
        }
    }

    pub fn as_float(self) -> Result<f64> {
        match self {
            RuntimeValue::Float(v) => Ok(v),
            other => Err(Error::Trap(format!("expected a float, found {:?}", other))),
        }
    }

    /// Low `width` bits of an integer
    pub fn bits(self, width: u32) -> u64 {
        match self {
            RuntimeValue::Int(v) => mask(v as u64, width),
            _ => 0,
        }
    }
}

pub type HostFn = Box<dyn FnMut(&[RuntimeValue]) -> RuntimeValue>;

struct Frame<'a> {
    args: &'a [RuntimeValue],
    registers: HashMap<Register, RuntimeValue>,
}

pub struct Interpreter<'m> {
    module: &'m IRModule,
    memory: Vec<u8>,
    globals: HashMap<String, u64>,
    hosts: HashMap<String, HostFn>,
    steps: u64,
}

impl<'m> Interpreter<'m> {
    /// Lay out the module's globals and get ready to run it
    pub fn new(module: &'m IRModule) -> Self {
        let mut interp = Self {
            module,
            memory: vec![0; NULL_GUARD],
            globals: HashMap::new(),
            hosts: HashMap::new(),
            steps: 0,
        };
        for global in &module.globals {
            let addr = interp.alloc(global.data.len() as u64, 8);
            let start = addr as usize;
            interp.memory[start..start + global.data.len()].copy_from_slice(&global.data);
            interp.globals.insert(global.name.clone(), addr);
        }
        interp
    }

    pub fn register_host<F>(&mut self, name: &str, host: F)
    where
        F: FnMut(&[RuntimeValue]) -> RuntimeValue + 'static,
    {
        self.hosts.insert(name.to_string(), Box::new(host));
    }

    pub fn global_address(&self, name: &str) -> Option<u64> {
        self.globals.get(name).copied()
    }

    pub fn read_global(&self, name: &str, ty: &IRType) -> Result<RuntimeValue> {
        let addr = self
            .global_address(name)
            .ok_or_else(|| Error::Trap(format!("unknown global '{}'", name)))?;
        self.read(addr, ty)
    }

    /// Reserve zeroed memory
    pub fn alloc(&mut self, size: u64, align: u64) -> u64 {
        let align = align.max(1) as usize;
        let start = self.memory.len().div_ceil(align) * align;
        self.memory.resize(start + size as usize, 0);
        start as u64
    }

    fn range(&self, addr: u64, len: usize) -> Result<Range<usize>> {
        if addr < NULL_GUARD as u64 {
            return Err(Error::Trap(format!("null pointer access at {:#x}", addr)));
        }
        let start = addr as usize;
        start
            .checked_add(len)
            .filter(|&end| end <= self.memory.len())
            .map(|end| start..end)
            .ok_or_else(|| Error::Trap(format!("out of bounds access at {:#x}", addr)))
    }

    pub fn read(&self, addr: u64, ty: &IRType) -> Result<RuntimeValue> {
        let size = scalar_size(ty)?;
        let mut buf = [0u8; 8];
        buf[..size].copy_from_slice(&self.memory[self.range(addr, size)?]);
        let raw = u64::from_le_bytes(buf);
        Ok(match ty {
            IRType::F32 => RuntimeValue::Float(f64::from(f32::from_bits(raw as u32))),
            IRType::F64 => RuntimeValue::Float(f64::from_bits(raw)),
            _ => RuntimeValue::Int(normalize(raw, int_width(ty)?)),
        })
    }

    pub fn write(&mut self, addr: u64, ty: &IRType, value: RuntimeValue) -> Result<()> {
        let size = scalar_size(ty)?;
        let raw = match (ty, value) {
            (IRType::F32, RuntimeValue::Float(f)) => u64::from((f as f32).to_bits()),
            (IRType::F64, RuntimeValue::Float(f)) => f.to_bits(),
            (_, RuntimeValue::Int(v)) if !ty.is_float() => v as u64,
            (_, other) => return Err(Error::Trap(format!("cannot store {:?} as {}", other, ty))),
        };
        let range = self.range(addr, size)?;
        self.memory[range].copy_from_slice(&raw.to_le_bytes()[..size]);
        Ok(())
    }

    /// Run a function to completion
    pub fn call(&mut self, name: &str, args: &[RuntimeValue]) -> Result<RuntimeValue> {
        self.steps = 0;
        self.invoke(name, args, 0)
    }

    fn invoke(&mut self, name: &str, args: &[RuntimeValue], depth: usize) -> Result<RuntimeValue> {
        if depth > MAX_CALL_DEPTH {
            return Err(Error::Trap(format!("call depth exceeded calling '{}'", name)));
        }
        let module = self.module;
        if let Some(func) = module.function(name) {
            return self.run(func, args, depth);
        }
        match self.hosts.get_mut(name) {
            Some(host) => {
                trace!("Host call {}({:?})", name, args);
                Ok(host(args))
            }
            None => Err(Error::Trap(format!("call to undefined function '{}'", name))),
        }
    }

    fn run(&mut self, func: &'m IRFunction, args: &[RuntimeValue], depth: usize) -> Result<RuntimeValue> {
        if args.len() != func.params.len() {
            return Err(Error::Trap(format!(
                "'{}' takes {} arguments, got {}",
                func.name,
                func.params.len(),
                args.len()
            )));
        }
        debug!("Entering {}", func.name);
        // Allocas live until the function returns.
        let stack_mark = self.memory.len();
        let result = self.run_blocks(func, args, depth);
        self.memory.truncate(stack_mark);
        result
    }

    fn run_blocks(&mut self, func: &'m IRFunction, args: &[RuntimeValue], depth: usize) -> Result<RuntimeValue> {
        let mut frame = Frame { args, registers: HashMap::new() };
        let mut current = func.entry_block;
        let mut previous: Option<BlockId> = None;

        loop {
            let block = func
                .block(current)
                .ok_or_else(|| Error::Trap(format!("jump to unknown block {}", current)))?;
            trace!("Executing {} ({})", current, block.label);

            // Phis read their inputs on entry, before any of them is written.
            let mut phis = Vec::new();
            for inst in &block.instructions {
                if let Instruction::Phi { dest, incoming, .. } = inst {
                    let pred = previous
                        .ok_or_else(|| Error::Trap(format!("{} in entry block", dest)))?;
                    let (value, _) = incoming
                        .iter()
                        .find(|(_, from)| *from == pred)
                        .ok_or_else(|| Error::Trap(format!("{} has no value for {}", dest, pred)))?;
                    phis.push((*dest, self.eval(&frame, value)?));
                }
            }
            frame.registers.extend(phis);

            for inst in &block.instructions {
                if matches!(inst, Instruction::Phi { .. }) {
                    continue;
                }
                self.tick()?;
                self.execute(&mut frame, inst, depth)?;
            }

            let terminator = block
                .terminator
                .as_ref()
                .ok_or_else(|| Error::Trap(format!("block {} has no terminator", block.label)))?;
            match terminator {
                Terminator::Return { value } => {
                    return match value {
                        Some(v) => self.eval(&frame, v),
                        None => Ok(RuntimeValue::Unit),
                    };
                }
                Terminator::Jump { target } => {
                    previous = Some(current);
                    current = *target;
                }
                Terminator::Branch { cond, then_target, else_target } => {
                    let taken = self.eval(&frame, cond)?.as_int()? & 1 != 0;
                    previous = Some(current);
                    current = if taken { *then_target } else { *else_target };
                }
                Terminator::Unreachable => {
                    return Err(Error::Trap(format!("reached unreachable in {}", block.label)));
                }
            }
        }
    }

    fn tick(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > MAX_STEPS {
            return Err(Error::Trap("step limit exceeded".to_string()));
        }
        Ok(())
    }

    fn eval(&self, frame: &Frame, value: &Value) -> Result<RuntimeValue> {
        match value {
            Value::Register(r) => frame
                .registers
                .get(r)
                .copied()
                .ok_or_else(|| Error::Trap(format!("read of undefined register {}", r))),
            Value::Constant(Constant::Int(n)) => Ok(RuntimeValue::Int(*n)),
            Value::Constant(Constant::Float(f)) => Ok(RuntimeValue::Float(*f)),
            Value::Constant(Constant::Bool(b)) => Ok(RuntimeValue::from_bool(*b)),
            Value::Constant(Constant::Null) => Ok(RuntimeValue::Int(0)),
            Value::Parameter(i) => frame
                .args
                .get(*i)
                .copied()
                .ok_or_else(|| Error::Trap(format!("missing argument {}", i))),
            Value::Global(name) => self
                .global_address(name)
                .map(|addr| RuntimeValue::Int(addr as i64))
                .ok_or_else(|| Error::Trap(format!("'{}' has no data address", name))),
            Value::Unit => Ok(RuntimeValue::Unit),
        }
    }

    fn address(&self, frame: &Frame, value: &Value) -> Result<u64> {
        Ok(self.eval(frame, value)?.as_int()? as u64)
    }

    fn execute(&mut self, frame: &mut Frame, inst: &Instruction, depth: usize) -> Result<()> {
        let (dest, result) = match inst {
            Instruction::BinOp { dest, op, ty, left, right } => {
                let (l, r) = (self.eval(frame, left)?, self.eval(frame, right)?);
                (*dest, binop(*op, ty, l, r)?)
            }
            Instruction::ICmp { dest, pred, ty, left, right } => {
                let (l, r) = (self.eval(frame, left)?, self.eval(frame, right)?);
                (*dest, RuntimeValue::from_bool(icmp(*pred, ty, l, r)?))
            }
            Instruction::FCmp { dest, pred, left, right, .. } => {
                let (l, r) = (self.eval(frame, left)?.as_float()?, self.eval(frame, right)?.as_float()?);
                (*dest, RuntimeValue::from_bool(fcmp(*pred, l, r)))
            }
            Instruction::UnaryOp { dest, op, ty, value } => {
                let value = self.eval(frame, value)?;
                (*dest, unary(*op, ty, value)?)
            }
            Instruction::Cast { dest, op, value, from, to } => {
                let value = self.eval(frame, value)?;
                (*dest, cast(*op, value, from, to)?)
            }
            Instruction::Call { dest, func, args, .. } => {
                let values = args
                    .iter()
                    .map(|arg| self.eval(frame, arg))
                    .collect::<Result<Vec<_>>>()?;
                let ret = self.invoke(func, &values, depth + 1)?;
                match dest {
                    Some(dest) => (*dest, ret),
                    None => return Ok(()),
                }
            }
            Instruction::Alloca { dest, ty } => {
                let addr = self.alloc(ty.size_bytes(), ty.align_bytes());
                (*dest, RuntimeValue::Int(addr as i64))
            }
            Instruction::Load { dest, ptr, ty } => {
                let addr = self.address(frame, ptr)?;
                (*dest, self.read(addr, ty)?)
            }
            Instruction::Store { ptr, value, ty } => {
                let addr = self.address(frame, ptr)?;
                let value = self.eval(frame, value)?;
                return self.write(addr, ty, value);
            }
            Instruction::GetElementPtr { dest, ptr, index, elem_ty } => {
                let base = self.eval(frame, ptr)?.as_int()?;
                let index = self.eval(frame, index)?.as_int()?;
                let offset = index.wrapping_mul(elem_ty.size_bytes() as i64);
                (*dest, RuntimeValue::Int(base.wrapping_add(offset)))
            }
            Instruction::StructGep { dest, ptr, struct_ty, field } => {
                let base = self.eval(frame, ptr)?.as_int()?;
                let (offsets, _) = struct_ty.struct_layout();
                let offset = offsets
                    .get(*field)
                    .ok_or_else(|| Error::Trap(format!("field {} out of range for {}", field, struct_ty)))?;
                (*dest, RuntimeValue::Int(base.wrapping_add(*offset as i64)))
            }
            Instruction::PtrDiff { dest, left, right, elem_ty } => {
                let size = elem_ty.size_bytes() as i64;
                if size == 0 {
                    return Err(Error::Trap(format!("pointer difference over zero-sized {}", elem_ty)));
                }
                let l = self.eval(frame, left)?.as_int()?;
                let r = self.eval(frame, right)?.as_int()?;
                (*dest, RuntimeValue::Int(l.wrapping_sub(r) / size))
            }
            Instruction::Phi { .. } => return Ok(()),
        };
        frame.registers.insert(dest, result);
        Ok(())
    }
}

// ==================== Bit Helpers ====================

fn mask(v: u64, bits: u32) -> u64 {
    if bits >= 64 {
        v
    } else {
        v & ((1u64 << bits) - 1)
    }
}

fn sext(v: u64, bits: u32) -> i64 {
    if bits >= 64 {
        v as i64
    } else {
        let shift = 64 - bits;
        ((v << shift) as i64) >> shift
    }
}

/// Register form of a `bits`-wide integer
fn normalize(v: u64, bits: u32) -> i64 {
    if bits == 1 {
        (v & 1) as i64
    } else {
        sext(v, bits)
    }
}

fn int_width(ty: &IRType) -> Result<u32> {
    match ty.bit_width() {
        Some(bits) if !ty.is_float() => Ok(bits),
        _ => Err(Error::Trap(format!("{} is not an integer type", ty))),
    }
}

fn scalar_size(ty: &IRType) -> Result<usize> {
    match ty {
        IRType::Void | IRType::Array(..) | IRType::Struct(_) => {
            Err(Error::Trap(format!("cannot load or store {} as a scalar", ty)))
        }
        _ => Ok(ty.size_bytes() as usize),
    }
}

fn round_to(ty: &IRType, v: f64) -> f64 {
    match ty {
        IRType::F32 => f64::from(v as f32),
        _ => v,
    }
}

fn checked_signed(v: i128, bits: u32, what: BinOp) -> Result<u64> {
    let half = 1i128 << (bits - 1);
    if v < -half || v >= half {
        return Err(Error::Trap(format!("signed overflow in {}", what)));
    }
    Ok(v as u64)
}

fn checked_unsigned(v: i128, bits: u32, what: BinOp) -> Result<u64> {
    if v < 0 || v >= (1i128 << bits) {
        return Err(Error::Trap(format!("unsigned overflow in {}", what)));
    }
    Ok(v as u64)
}

fn shift_amount(b: u64, bits: u32) -> Result<u32> {
    if b >= u64::from(bits) {
        return Err(Error::Trap(format!("shift by {} on a {}-bit value", b, bits)));
    }
    Ok(b as u32)
}

// ==================== Operations ====================

fn binop(op: BinOp, ty: &IRType, l: RuntimeValue, r: RuntimeValue) -> Result<RuntimeValue> {
    if ty.is_float() {
        let (a, b) = (l.as_float()?, r.as_float()?);
        let v = match op {
            BinOp::FAdd => a + b,
            BinOp::FSub => a - b,
            BinOp::FMul => a * b,
            BinOp::FDiv => a / b,
            BinOp::FRem => a % b,
            other => return Err(Error::Trap(format!("{} on {}", other, ty))),
        };
        return Ok(RuntimeValue::Float(round_to(ty, v)));
    }

    let bits = int_width(ty)?;
    let a = mask(l.as_int()? as u64, bits);
    let b = mask(r.as_int()? as u64, bits);
    let (sa, sb) = (i128::from(sext(a, bits)), i128::from(sext(b, bits)));
    let (ua, ub) = (i128::from(a), i128::from(b));
    let div_check = |zero: bool| {
        if zero {
            Err(Error::Trap("division by zero".to_string()))
        } else {
            Ok(())
        }
    };

    let result = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::AddNsw => checked_signed(sa + sb, bits, op)?,
        BinOp::AddNuw => checked_unsigned(ua + ub, bits, op)?,
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::SubNsw => checked_signed(sa - sb, bits, op)?,
        BinOp::SubNuw => checked_unsigned(ua - ub, bits, op)?,
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::MulNsw => checked_signed(sa * sb, bits, op)?,
        BinOp::MulNuw => {
            let product = u128::from(a) * u128::from(b);
            if product >> bits != 0 {
                return Err(Error::Trap(format!("unsigned overflow in {}", op)));
            }
            product as u64
        }
        BinOp::SDiv => {
            div_check(sb == 0)?;
            checked_signed(sa / sb, bits, op)?
        }
        BinOp::UDiv => {
            div_check(b == 0)?;
            a / b
        }
        BinOp::SRem => {
            div_check(sb == 0)?;
            (sa % sb) as u64
        }
        BinOp::URem => {
            div_check(b == 0)?;
            a % b
        }
        BinOp::Shl => a << shift_amount(b, bits)?,
        BinOp::LShr => a >> shift_amount(b, bits)?,
        BinOp::AShr => (sext(a, bits) >> shift_amount(b, bits)?) as u64,
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::FAdd | BinOp::FSub | BinOp::FMul | BinOp::FDiv | BinOp::FRem => {
            return Err(Error::Trap(format!("{} on {}", op, ty)));
        }
    };
    Ok(RuntimeValue::Int(normalize(result, bits)))
}

fn unary(op: UnaryOp, ty: &IRType, value: RuntimeValue) -> Result<RuntimeValue> {
    match op {
        UnaryOp::FNeg => Ok(RuntimeValue::Float(-value.as_float()?)),
        UnaryOp::Neg => {
            let bits = int_width(ty)?;
            let v = mask(value.as_int()? as u64, bits);
            Ok(RuntimeValue::Int(normalize(0u64.wrapping_sub(v), bits)))
        }
        UnaryOp::Not => {
            let bits = int_width(ty)?;
            Ok(RuntimeValue::Int(normalize(!(value.as_int()? as u64), bits)))
        }
    }
}

fn icmp(pred: IntPredicate, ty: &IRType, l: RuntimeValue, r: RuntimeValue) -> Result<bool> {
    let bits = int_width(ty)?;
    let a = mask(l.as_int()? as u64, bits);
    let b = mask(r.as_int()? as u64, bits);
    let (sa, sb) = (sext(a, bits), sext(b, bits));
    Ok(match pred {
        IntPredicate::Eq => a == b,
        IntPredicate::Ne => a != b,
        IntPredicate::Slt => sa < sb,
        IntPredicate::Sle => sa <= sb,
        IntPredicate::Sgt => sa > sb,
        IntPredicate::Sge => sa >= sb,
        IntPredicate::Ult => a < b,
        IntPredicate::Ule => a <= b,
        IntPredicate::Ugt => a > b,
        IntPredicate::Uge => a >= b,
    })
}

fn fcmp(pred: FloatPredicate, a: f64, b: f64) -> bool {
    if a.is_nan() || b.is_nan() {
        return true;
    }
    match pred {
        FloatPredicate::Ueq => a == b,
        FloatPredicate::Une => a != b,
        FloatPredicate::Ult => a < b,
        FloatPredicate::Ule => a <= b,
        FloatPredicate::Ugt => a > b,
        FloatPredicate::Uge => a >= b,
    }
}

fn cast(op: CastOp, value: RuntimeValue, from: &IRType, to: &IRType) -> Result<RuntimeValue> {
    let int = |ty: &IRType| -> Result<(u64, u32)> {
        let bits = int_width(ty)?;
        Ok((mask(value.as_int()? as u64, bits), bits))
    };
    let result = match op {
        CastOp::Trunc | CastOp::ZExt | CastOp::PtrToInt | CastOp::IntToPtr => {
            let (v, _) = int(from)?;
            RuntimeValue::Int(normalize(v, int_width(to)?))
        }
        CastOp::SExt => {
            let (v, bits) = int(from)?;
            RuntimeValue::Int(normalize(sext(v, bits) as u64, int_width(to)?))
        }
        CastOp::FPTrunc => RuntimeValue::Float(f64::from(value.as_float()? as f32)),
        CastOp::FPExt => RuntimeValue::Float(value.as_float()?),
        CastOp::FPToSI => {
            let bits = int_width(to)?;
            let t = value.as_float()?.trunc();
            let limit = 2f64.powi(bits as i32 - 1);
            if t.is_nan() || t < -limit || t >= limit {
                return Err(Error::Trap(format!("{} does not fit in {}", t, to)));
            }
            RuntimeValue::Int(normalize(t as i64 as u64, bits))
        }
        CastOp::FPToUI => {
            let bits = int_width(to)?;
            let t = value.as_float()?.trunc();
            if t.is_nan() || t < 0.0 || t >= 2f64.powi(bits as i32) {
                return Err(Error::Trap(format!("{} does not fit in unsigned {}", t, to)));
            }
            RuntimeValue::Int(normalize(t as u64, bits))
        }
        CastOp::SIToFP => {
            let (v, bits) = int(from)?;
            RuntimeValue::Float(round_to(to, sext(v, bits) as f64))
        }
        CastOp::UIToFP => {
            let (v, _) = int(from)?;
            RuntimeValue::Float(round_to(to, v as f64))
        }
    };
    Ok(result)
}
