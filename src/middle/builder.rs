//! SSA builder
//!
//! Appends instructions to the current insertion block of the function under
//! construction. Registers are numbered per function.

use log::trace;

use crate::middle::ir::{
    BinOp, BlockId, CastOp, Constant, FloatPredicate, IRExtern, IRFunction, IRGlobal, IRModule,
    IRType, Instruction, IntPredicate, Register, Terminator, UnaryOp, Value,
};
use crate::utils::{Error, Result};

pub struct IRBuilder {
    module: IRModule,
    function: Option<IRFunction>,
    current_block: BlockId,
    next_register: usize,
    next_string: usize,
}

impl IRBuilder {
    pub fn new(module_name: &str) -> Self {
        Self {
            module: IRModule::new(module_name),
            function: None,
            current_block: BlockId(0),
            next_register: 0,
            next_string: 0,
        }
    }

    pub fn module(&self) -> &IRModule {
        &self.module
    }

    /// Take the finished module
    pub fn finish(self) -> Result<IRModule> {
        if let Some(func) = &self.function {
            return Err(Error::Internal(format!("function '{}' was never finished", func.name)));
        }
        Ok(self.module)
    }

    // ==================== Functions ====================

    /// Start a function and position at its entry block
    pub fn begin_function(&mut self, name: &str, params: Vec<(String, IRType)>, ret_type: IRType) -> Result<()> {
        if let Some(func) = &self.function {
            return Err(Error::Internal(format!(
                "cannot begin '{}' while '{}' is open",
                name, func.name
            )));
        }
        let mut func = IRFunction::new(name, params, ret_type);
        self.current_block = func.add_block("entry");
        func.entry_block = self.current_block;
        self.next_register = 0;
        self.function = Some(func);
        Ok(())
    }

    /// Move the open function into the module
    pub fn finish_function(&mut self) -> Result<()> {
        let func = self
            .function
            .take()
            .ok_or_else(|| Error::Internal("no function to finish".to_string()))?;
        if let Some(block) = func.blocks.iter().find(|b| b.terminator.is_none()) {
            return Err(Error::Internal(format!(
                "block {} of '{}' has no terminator",
                block.label, func.name
            )));
        }
        self.module.functions.push(func);
        Ok(())
    }

    pub fn function(&self) -> Option<&IRFunction> {
        self.function.as_ref()
    }

    fn function_mut(&mut self) -> Result<&mut IRFunction> {
        self.function
            .as_mut()
            .ok_or_else(|| Error::Internal("no function is being built".to_string()))
    }

    pub fn declare_extern(&mut self, name: &str, params: Vec<IRType>, ret_type: IRType) {
        if self.module.externs.iter().any(|e| e.name == name) {
            return;
        }
        self.module.externs.push(IRExtern {
            name: name.to_string(),
            params,
            ret_type,
        });
    }

    // ==================== Globals ====================

    /// Anonymous internal read-only data, referenced by address
    pub fn add_string_constant(&mut self, bytes: &[u8]) -> Value {
        let name = format!(".str.{}", self.next_string);
        self.next_string += 1;
        self.module.globals.push(IRGlobal {
            name: name.clone(),
            data: bytes.to_vec(),
            constant: true,
            internal: true,
        });
        Value::Global(name)
    }

    /// Zero-initialised mutable global
    pub fn add_global(&mut self, name: &str, size: u64) -> Value {
        self.module.globals.push(IRGlobal {
            name: name.to_string(),
            data: vec![0; usize::try_from(size).unwrap_or_default()],
            constant: false,
            internal: false,
        });
        Value::Global(name.to_string())
    }

    // ==================== Blocks ====================

    pub fn append_block(&mut self, label: &str) -> Result<BlockId> {
        let func = self.function_mut()?;
        let label = format!("{}{}", label, func.blocks.len());
        Ok(func.add_block(&label))
    }

    pub fn position_at_end(&mut self, block: BlockId) {
        trace!("Positioning at {}", block);
        self.current_block = block;
    }

    pub fn current_block(&self) -> BlockId {
        self.current_block
    }

    fn insert(&mut self, inst: Instruction) -> Result<()> {
        let current = self.current_block;
        let block = self
            .function_mut()?
            .get_block_mut(current)
            .ok_or_else(|| Error::Internal(format!("unknown block {}", current)))?;
        if block.terminator.is_some() {
            return Err(Error::Internal(format!("block {} is already terminated", block.label)));
        }
        block.push(inst);
        Ok(())
    }

    fn terminate(&mut self, term: Terminator) -> Result<()> {
        let current = self.current_block;
        let block = self
            .function_mut()?
            .get_block_mut(current)
            .ok_or_else(|| Error::Internal(format!("unknown block {}", current)))?;
        if block.terminator.is_some() {
            return Err(Error::Internal(format!("block {} is already terminated", block.label)));
        }
        block.set_terminator(term);
        Ok(())
    }

    fn fresh_register(&mut self) -> Register {
        let reg = Register(self.next_register);
        self.next_register += 1;
        reg
    }

    // ==================== Instructions ====================

    pub fn build_binop(&mut self, op: BinOp, ty: IRType, left: Value, right: Value) -> Result<Value> {
        let dest = self.fresh_register();
        self.insert(Instruction::BinOp { dest, op, ty, left, right })?;
        Ok(Value::Register(dest))
    }

    pub fn build_icmp(&mut self, pred: IntPredicate, ty: IRType, left: Value, right: Value) -> Result<Value> {
        let dest = self.fresh_register();
        self.insert(Instruction::ICmp { dest, pred, ty, left, right })?;
        Ok(Value::Register(dest))
    }

    pub fn build_fcmp(&mut self, pred: FloatPredicate, ty: IRType, left: Value, right: Value) -> Result<Value> {
        let dest = self.fresh_register();
        self.insert(Instruction::FCmp { dest, pred, ty, left, right })?;
        Ok(Value::Register(dest))
    }

    pub fn build_unary(&mut self, op: UnaryOp, ty: IRType, value: Value) -> Result<Value> {
        let dest = self.fresh_register();
        self.insert(Instruction::UnaryOp { dest, op, ty, value })?;
        Ok(Value::Register(dest))
    }

    pub fn build_cast(&mut self, op: CastOp, value: Value, from: IRType, to: IRType) -> Result<Value> {
        let dest = self.fresh_register();
        self.insert(Instruction::Cast { dest, op, value, from, to })?;
        Ok(Value::Register(dest))
    }

    pub fn build_alloca(&mut self, ty: IRType) -> Result<Value> {
        let dest = self.fresh_register();
        self.insert(Instruction::Alloca { dest, ty })?;
        Ok(Value::Register(dest))
    }

    pub fn build_load(&mut self, ty: IRType, ptr: Value) -> Result<Value> {
        let dest = self.fresh_register();
        self.insert(Instruction::Load { dest, ptr, ty })?;
        Ok(Value::Register(dest))
    }

    pub fn build_store(&mut self, ty: IRType, value: Value, ptr: Value) -> Result<()> {
        self.insert(Instruction::Store { ptr, value, ty })
    }

    pub fn build_gep(&mut self, elem_ty: IRType, ptr: Value, index: Value) -> Result<Value> {
        let dest = self.fresh_register();
        self.insert(Instruction::GetElementPtr { dest, ptr, index, elem_ty })?;
        Ok(Value::Register(dest))
    }

    pub fn build_struct_gep(&mut self, struct_ty: IRType, ptr: Value, field: usize) -> Result<Value> {
        let fields = match &struct_ty {
            IRType::Struct(fields) => fields.len(),
            other => return Err(Error::Internal(format!("struct gep into non-aggregate {}", other))),
        };
        if field >= fields {
            return Err(Error::Internal(format!("field {} out of range for {}", field, struct_ty)));
        }
        let dest = self.fresh_register();
        self.insert(Instruction::StructGep { dest, ptr, struct_ty, field })?;
        Ok(Value::Register(dest))
    }

    pub fn build_ptr_diff(&mut self, elem_ty: IRType, left: Value, right: Value) -> Result<Value> {
        let dest = self.fresh_register();
        self.insert(Instruction::PtrDiff { dest, left, right, elem_ty })?;
        Ok(Value::Register(dest))
    }

    /// Call a function by symbol. Void calls produce [`Value::Unit`].
    pub fn build_call(&mut self, func: &str, args: Vec<Value>, ret_ty: IRType) -> Result<Value> {
        let dest = (ret_ty != IRType::Void).then(|| self.fresh_register());
        self.insert(Instruction::Call {
            dest,
            func: func.to_string(),
            args,
            ret_ty,
        })?;
        Ok(dest.map_or(Value::Unit, Value::Register))
    }

    /// An empty phi at the insertion point; fill it with [`Self::add_incoming`]
    pub fn build_phi(&mut self, ty: IRType) -> Result<Register> {
        let dest = self.fresh_register();
        self.insert(Instruction::Phi { dest, ty, incoming: Vec::new() })?;
        Ok(dest)
    }

    pub fn add_incoming(&mut self, phi: Register, value: Value, block: BlockId) -> Result<()> {
        let func = self.function_mut()?;
        let incoming = func
            .blocks
            .iter_mut()
            .flat_map(|b| b.instructions.iter_mut())
            .find_map(|inst| match inst {
                Instruction::Phi { dest, incoming, .. } if *dest == phi => Some(incoming),
                _ => None,
            })
            .ok_or_else(|| Error::Internal(format!("{} is not a phi", phi)))?;
        trace!("Phi {} <- [{}, {}]", phi, value, block);
        incoming.push((value, block));
        Ok(())
    }

    // ==================== Terminators ====================

    pub fn build_jump(&mut self, target: BlockId) -> Result<()> {
        self.terminate(Terminator::Jump { target })
    }

    pub fn build_branch(&mut self, cond: Value, then_target: BlockId, else_target: BlockId) -> Result<()> {
        self.terminate(Terminator::Branch { cond, then_target, else_target })
    }

    pub fn build_return(&mut self, value: Option<Value>) -> Result<()> {
        self.terminate(Terminator::Return { value })
    }

    pub fn build_unreachable(&mut self) -> Result<()> {
        self.terminate(Terminator::Unreachable)
    }
}

/// Zero of a scalar type
pub fn zero_of(ty: &IRType) -> Value {
    match ty {
        IRType::F32 | IRType::F64 => Value::Constant(Constant::Float(0.0)),
        IRType::Bool => Value::bool(false),
        IRType::Ptr => Value::Constant(Constant::Null),
        _ => Value::int(0),
    }
}
