//! Anvil IR definitions
//!
//! Register-based SSA IR: functions hold basic blocks, each block a list of
//! typed three-address instructions ending in one terminator. Integer types
//! are signless; signedness lives in the operation (`SDiv` vs `UDiv`,
//! `AShr` vs `LShr`, signed vs unsigned compare predicates).

use std::fmt;

/// IR Module - globals, functions and external declarations
#[derive(Debug, Clone, Default)]
pub struct IRModule {
    pub name: String,
    pub globals: Vec<IRGlobal>,
    pub functions: Vec<IRFunction>,
    pub externs: Vec<IRExtern>,
}

impl IRModule {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn function(&self, name: &str) -> Option<&IRFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn global(&self, name: &str) -> Option<&IRGlobal> {
        self.globals.iter().find(|g| g.name == name)
    }
}

/// Module-level storage initialised with raw bytes
#[derive(Debug, Clone, PartialEq)]
pub struct IRGlobal {
    pub name: String,
    pub data: Vec<u8>,
    /// Read-only data
    pub constant: bool,
    /// Not visible outside the module
    pub internal: bool,
}

/// External function declaration
#[derive(Debug, Clone, PartialEq)]
pub struct IRExtern {
    pub name: String,
    pub params: Vec<IRType>,
    pub ret_type: IRType,
}

/// IR Function
#[derive(Debug, Clone)]
pub struct IRFunction {
    pub name: String,
    pub params: Vec<(String, IRType)>,
    pub ret_type: IRType,
    pub blocks: Vec<BasicBlock>,
    pub entry_block: BlockId,
}

impl IRFunction {
    pub fn new(name: &str, params: Vec<(String, IRType)>, ret_type: IRType) -> Self {
        Self {
            name: name.to_string(),
            params,
            ret_type,
            blocks: Vec::new(),
            entry_block: BlockId(0),
        }
    }

    pub fn add_block(&mut self, label: &str) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(BasicBlock::new(id, label));
        id
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.0)
    }

    pub fn get_block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(id.0)
    }

    /// Blocks whose terminator can transfer control to `target`, in block order
    pub fn predecessors(&self, target: BlockId) -> Vec<BlockId> {
        self.blocks
            .iter()
            .filter(|b| b.successors().contains(&target))
            .map(|b| b.id)
            .collect()
    }
}

/// Basic Block - a sequence of instructions with single entry/exit
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    pub label: String,
    pub instructions: Vec<Instruction>,
    pub terminator: Option<Terminator>,
}

impl BasicBlock {
    pub fn new(id: BlockId, label: &str) -> Self {
        Self {
            id,
            label: label.to_string(),
            instructions: Vec::new(),
            terminator: None,
        }
    }

    pub fn push(&mut self, inst: Instruction) {
        self.instructions.push(inst);
    }

    pub fn set_terminator(&mut self, term: Terminator) {
        self.terminator = Some(term);
    }

    pub fn successors(&self) -> Vec<BlockId> {
        match &self.terminator {
            Some(Terminator::Jump { target }) => vec![*target],
            Some(Terminator::Branch { then_target, else_target, .. }) => {
                vec![*then_target, *else_target]
            }
            _ => Vec::new(),
        }
    }
}

/// Block identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub usize);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Virtual register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register(pub usize);

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// IR Instruction (non-terminating)
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// dest = op ty left, right
    BinOp { dest: Register, op: BinOp, ty: IRType, left: Value, right: Value },

    /// dest = icmp pred ty left, right
    ICmp { dest: Register, pred: IntPredicate, ty: IRType, left: Value, right: Value },

    /// dest = fcmp pred ty left, right
    FCmp { dest: Register, pred: FloatPredicate, ty: IRType, left: Value, right: Value },

    /// dest = op ty value
    UnaryOp { dest: Register, op: UnaryOp, ty: IRType, value: Value },

    /// dest = op value from -> to
    Cast { dest: Register, op: CastOp, value: Value, from: IRType, to: IRType },

    /// dest = func(args...)
    Call { dest: Option<Register>, func: String, args: Vec<Value>, ret_ty: IRType },

    /// dest = alloca type
    Alloca { dest: Register, ty: IRType },

    /// dest = load ty, ptr
    Load { dest: Register, ptr: Value, ty: IRType },

    /// store ty value, ptr
    Store { ptr: Value, value: Value, ty: IRType },

    /// dest = gep elem_ty, ptr, index (scaled by the element size)
    GetElementPtr { dest: Register, ptr: Value, index: Value, elem_ty: IRType },

    /// dest = field address `field` of the aggregate `struct_ty` at ptr
    StructGep { dest: Register, ptr: Value, struct_ty: IRType, field: usize },

    /// dest = (left - right) / sizeof(elem_ty)
    PtrDiff { dest: Register, left: Value, right: Value, elem_ty: IRType },

    /// dest = phi ty [(val1, block1), (val2, block2), ...]
    Phi { dest: Register, ty: IRType, incoming: Vec<(Value, BlockId)> },
}

impl Instruction {
    pub fn dest(&self) -> Option<Register> {
        match self {
            Instruction::BinOp { dest, .. }
            | Instruction::ICmp { dest, .. }
            | Instruction::FCmp { dest, .. }
            | Instruction::UnaryOp { dest, .. }
            | Instruction::Cast { dest, .. }
            | Instruction::Alloca { dest, .. }
            | Instruction::Load { dest, .. }
            | Instruction::GetElementPtr { dest, .. }
            | Instruction::StructGep { dest, .. }
            | Instruction::PtrDiff { dest, .. }
            | Instruction::Phi { dest, .. } => Some(*dest),
            Instruction::Call { dest, .. } => *dest,
            Instruction::Store { .. } => None,
        }
    }
}

/// Block terminator
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    /// return value
    Return { value: Option<Value> },

    /// br target
    Jump { target: BlockId },

    /// br cond, then_target, else_target
    Branch { cond: Value, then_target: BlockId, else_target: BlockId },

    /// unreachable
    Unreachable,
}

/// IR Value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Register(Register),
    Constant(Constant),
    Parameter(usize),
    /// Address of a global or function symbol
    Global(String),
    /// Result of a `void` computation
    Unit,
}

impl Value {
    pub fn int(value: i64) -> Self {
        Value::Constant(Constant::Int(value))
    }

    pub fn bool(value: bool) -> Self {
        Value::Constant(Constant::Bool(value))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Register(r) => write!(f, "{}", r),
            Value::Constant(c) => write!(f, "{}", c),
            Value::Parameter(i) => write!(f, "arg{}", i),
            Value::Global(name) => write!(f, "@{}", name),
            Value::Unit => write!(f, "()"),
        }
    }
}

/// Constant value. Integers hold the two's complement bit pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(n) => write!(f, "{}", n),
            Constant::Float(n) => write!(f, "{:?}", n),
            Constant::Bool(b) => write!(f, "{}", b),
            Constant::Null => write!(f, "null"),
        }
    }
}

/// Binary operation. The `Nsw`/`Nuw` spellings are overflow-checked for
/// signed and unsigned operands; the plain integer spellings wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add, AddNsw, AddNuw,
    Sub, SubNsw, SubNuw,
    Mul, MulNsw, MulNuw,
    SDiv, UDiv, SRem, URem,
    Shl, LShr, AShr,
    And, Or, Xor,
    FAdd, FSub, FMul, FDiv, FRem,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "add",
            BinOp::AddNsw => "add nsw",
            BinOp::AddNuw => "add nuw",
            BinOp::Sub => "sub",
            BinOp::SubNsw => "sub nsw",
            BinOp::SubNuw => "sub nuw",
            BinOp::Mul => "mul",
            BinOp::MulNsw => "mul nsw",
            BinOp::MulNuw => "mul nuw",
            BinOp::SDiv => "sdiv",
            BinOp::UDiv => "udiv",
            BinOp::SRem => "srem",
            BinOp::URem => "urem",
            BinOp::Shl => "shl",
            BinOp::LShr => "lshr",
            BinOp::AShr => "ashr",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::FAdd => "fadd",
            BinOp::FSub => "fsub",
            BinOp::FMul => "fmul",
            BinOp::FDiv => "fdiv",
            BinOp::FRem => "frem",
        };
        write!(f, "{}", s)
    }
}

/// Integer comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntPredicate {
    Eq, Ne,
    Slt, Sle, Sgt, Sge,
    Ult, Ule, Ugt, Uge,
}

impl fmt::Display for IntPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntPredicate::Eq => "eq",
            IntPredicate::Ne => "ne",
            IntPredicate::Slt => "slt",
            IntPredicate::Sle => "sle",
            IntPredicate::Sgt => "sgt",
            IntPredicate::Sge => "sge",
            IntPredicate::Ult => "ult",
            IntPredicate::Ule => "ule",
            IntPredicate::Ugt => "ugt",
            IntPredicate::Uge => "uge",
        };
        write!(f, "{}", s)
    }
}

/// Float comparison, unordered: true when either operand is NaN
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatPredicate {
    Ueq, Une, Ult, Ule, Ugt, Uge,
}

impl fmt::Display for FloatPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FloatPredicate::Ueq => "ueq",
            FloatPredicate::Une => "une",
            FloatPredicate::Ult => "ult",
            FloatPredicate::Ule => "ule",
            FloatPredicate::Ugt => "ugt",
            FloatPredicate::Uge => "uge",
        };
        write!(f, "{}", s)
    }
}

/// Unary operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Integer negate
    Neg,
    FNeg,
    /// Bitwise complement
    Not,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnaryOp::Neg => "neg",
            UnaryOp::FNeg => "fneg",
            UnaryOp::Not => "not",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FPTrunc,
    FPExt,
    FPToSI,
    FPToUI,
    SIToFP,
    UIToFP,
    PtrToInt,
    IntToPtr,
}

impl fmt::Display for CastOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CastOp::Trunc => "trunc",
            CastOp::ZExt => "zext",
            CastOp::SExt => "sext",
            CastOp::FPTrunc => "fptrunc",
            CastOp::FPExt => "fpext",
            CastOp::FPToSI => "fptosi",
            CastOp::FPToUI => "fptoui",
            CastOp::SIToFP => "sitofp",
            CastOp::UIToFP => "uitofp",
            CastOp::PtrToInt => "ptrtoint",
            CastOp::IntToPtr => "inttoptr",
        };
        write!(f, "{}", s)
    }
}

/// IR Type. Pointers are opaque and 64 bits wide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IRType {
    Void,
    /// Single-bit boolean, stored as one byte
    Bool,
    I8, I16, I32, I64,
    F32, F64,
    Ptr,
    Array(Box<IRType>, u64),
    /// Aggregate laid out with natural alignment
    Struct(Vec<IRType>),
}

impl IRType {
    /// Signless integer type of the given width
    pub fn int(bits: u32) -> Option<IRType> {
        match bits {
            1 => Some(IRType::Bool),
            8 => Some(IRType::I8),
            16 => Some(IRType::I16),
            32 => Some(IRType::I32),
            64 => Some(IRType::I64),
            _ => None,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        match self {
            IRType::Void => 0,
            IRType::Bool | IRType::I8 => 1,
            IRType::I16 => 2,
            IRType::I32 | IRType::F32 => 4,
            IRType::I64 | IRType::F64 | IRType::Ptr => 8,
            IRType::Array(elem, count) => elem.size_bytes() * count,
            IRType::Struct(_) => {
                let (_, size) = self.struct_layout();
                size
            }
        }
    }

    pub fn align_bytes(&self) -> u64 {
        match self {
            IRType::Array(elem, _) => elem.align_bytes(),
            IRType::Struct(fields) => fields.iter().map(IRType::align_bytes).max().unwrap_or(1),
            IRType::Void => 1,
            other => other.size_bytes(),
        }
    }

    /// Field offsets and padded size. Non-aggregates have no fields.
    pub fn struct_layout(&self) -> (Vec<u64>, u64) {
        let IRType::Struct(fields) = self else {
            return (Vec::new(), self.size_bytes());
        };
        let mut offsets = Vec::with_capacity(fields.len());
        let mut offset: u64 = 0;
        for field in fields {
            let align = field.align_bytes();
            offset = offset.div_ceil(align) * align;
            offsets.push(offset);
            offset += field.size_bytes();
        }
        let align = self.align_bytes();
        (offsets, offset.div_ceil(align) * align)
    }

    /// Width of a scalar in bits
    pub fn bit_width(&self) -> Option<u32> {
        match self {
            IRType::Bool => Some(1),
            IRType::I8 => Some(8),
            IRType::I16 => Some(16),
            IRType::I32 | IRType::F32 => Some(32),
            IRType::I64 | IRType::F64 | IRType::Ptr => Some(64),
            _ => None,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, IRType::F32 | IRType::F64)
    }
}

impl fmt::Display for IRType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IRType::Void => write!(f, "void"),
            IRType::Bool => write!(f, "i1"),
            IRType::I8 => write!(f, "i8"),
            IRType::I16 => write!(f, "i16"),
            IRType::I32 => write!(f, "i32"),
            IRType::I64 => write!(f, "i64"),
            IRType::F32 => write!(f, "float"),
            IRType::F64 => write!(f, "double"),
            IRType::Ptr => write!(f, "ptr"),
            IRType::Array(elem, len) => write!(f, "[{} x {}]", len, elem),
            IRType::Struct(fields) => {
                write!(f, "{{ ")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                write!(f, " }}")
            }
        }
    }
}
