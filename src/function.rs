//! # IR Functions
//!
//! A function owns its control flow graph and an instruction arena. Blocks
//! reference instructions by [`InstId`], which keeps instruction identity
//! stable while passes insert, erase, and rewrite instructions around them.

use chumsky::span::SimpleSpan;
use index_vec::IndexVec;
use rustc_hash::FxHashMap;

use crate::{
    indent_str, BasicBlock, BlockId, InstId, Instruction, InstructionKind, IrError, IrResult,
    PrettyPrint, Terminator, Type, Value, ValueId,
};

/// The IR for a single function, laid out as a CFG over an instruction arena
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    /// The name of the function
    pub name: String,

    /// All basic blocks, forming the CFG
    pub blocks: IndexVec<BlockId, BasicBlock>,

    /// The entry point
    pub entry_block: BlockId,

    /// Function parameters in signature order
    pub params: Vec<ValueId>,

    /// Instruction arena; erased slots are tombstoned as `Nop`
    insts: IndexVec<InstId, Instruction>,

    /// Type of every SSA value
    pub value_types: FxHashMap<ValueId, Type>,

    /// User-facing variable names for allocation results; feeds diagnostics
    pub value_names: FxHashMap<ValueId, String>,

    /// Defining instruction of each value
    defs: FxHashMap<ValueId, InstId>,

    next_value_id: usize,
}

impl Function {
    /// Creates a new empty function with an entry block
    pub fn new(name: impl Into<String>) -> Self {
        let mut blocks = IndexVec::new();
        let entry_block = blocks.push(BasicBlock::new());
        Self {
            name: name.into(),
            blocks,
            entry_block,
            params: Vec::new(),
            insts: IndexVec::new(),
            value_types: FxHashMap::default(),
            value_names: FxHashMap::default(),
            defs: FxHashMap::default(),
            next_value_id: 0,
        }
    }

    /// Adds a new basic block and returns its id
    pub fn add_block(&mut self) -> BlockId {
        self.blocks.push(BasicBlock::new())
    }

    /// Adds a named basic block and returns its id
    pub fn add_block_with_name(&mut self, name: impl Into<String>) -> BlockId {
        self.blocks.push(BasicBlock::with_name(name.into()))
    }

    /// Generates a fresh value id
    pub fn new_value_id(&mut self) -> ValueId {
        let id = ValueId::from_usize(self.next_value_id);
        self.next_value_id += 1;
        id
    }

    /// Generates a fresh value id with type information
    pub fn new_typed_value_id(&mut self, ty: Type) -> ValueId {
        let id = self.new_value_id();
        self.value_types.insert(id, ty);
        id
    }

    /// Declares a typed function parameter
    pub fn add_param(&mut self, ty: Type) -> ValueId {
        let id = self.new_typed_value_id(ty);
        self.params.push(id);
        id
    }

    pub fn set_value_type(&mut self, value: ValueId, ty: Type) {
        self.value_types.insert(value, ty);
    }

    pub fn get_value_type(&self, value: ValueId) -> Option<&Type> {
        self.value_types.get(&value)
    }

    /// Attaches a user-facing name to a value (typically an allocation result)
    pub fn set_value_name(&mut self, value: ValueId, name: impl Into<String>) {
        self.value_names.insert(value, name.into());
    }

    /// The type of a value, literal or operand.
    ///
    /// # Panics
    ///
    /// Panics if an operand has no recorded type.
    pub fn type_of_value(&self, value: &Value) -> Type {
        match value {
            Value::Literal(crate::Literal::Integer(_)) => Type::Int,
            Value::Literal(crate::Literal::Boolean(_)) => Type::Bool,
            Value::Literal(crate::Literal::Unit) => Type::Unit,
            Value::Operand(id) => self
                .value_types
                .get(id)
                .unwrap_or_else(|| panic!("value %{} has no recorded type", id.index()))
                .clone(),
        }
    }

    /// The pointee type of an address value.
    ///
    /// # Panics
    ///
    /// Panics if the value is not typed as an address.
    pub fn pointee_type(&self, address: ValueId) -> &Type {
        match self.value_types.get(&address) {
            Some(Type::Address(pointee)) => pointee,
            other => panic!(
                "value %{} is not an address (type {other:?})",
                address.index()
            ),
        }
    }

    // --- Instruction arena ---

    /// Reads an instruction by id
    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.insts[id]
    }

    /// Mutable access to an instruction's kind
    pub fn inst_mut(&mut self, id: InstId) -> &mut Instruction {
        &mut self.insts[id]
    }

    /// Returns true if the instruction has been erased
    pub fn is_erased(&self, id: InstId) -> bool {
        matches!(self.insts[id].kind, InstructionKind::Nop)
    }

    /// The block an instruction belongs to
    pub fn parent_block(&self, id: InstId) -> BlockId {
        self.insts[id].parent
    }

    /// Position of an instruction within its block
    pub fn position_in_block(&self, id: InstId) -> Option<usize> {
        self.blocks[self.insts[id].parent].position_of(id)
    }

    /// Appends an instruction at the end of a block
    pub fn push_inst(
        &mut self,
        block: BlockId,
        kind: InstructionKind,
        span: Option<SimpleSpan<usize>>,
    ) -> InstId {
        let index = self.blocks[block].insts.len();
        self.insert_inst(block, index, kind, span)
    }

    /// Inserts an instruction into a block at the given position
    pub fn insert_inst(
        &mut self,
        block: BlockId,
        index: usize,
        kind: InstructionKind,
        span: Option<SimpleSpan<usize>>,
    ) -> InstId {
        let id = self.insts.push(Instruction {
            kind,
            span,
            parent: block,
        });
        for dest in self.insts[id].kind.destinations() {
            let prev = self.defs.insert(dest, id);
            debug_assert!(prev.is_none(), "value %{} defined twice", dest.index());
        }
        self.blocks[block].insts.insert(index, id);
        id
    }

    /// Erases an instruction: removes it from its block and tombstones the
    /// arena slot. The id stays valid and reads as `Nop`.
    pub fn erase_inst(&mut self, id: InstId) {
        for dest in self.insts[id].kind.destinations() {
            self.defs.remove(&dest);
        }
        let block = self.insts[id].parent;
        self.blocks[block].insts.retain(|&inst| inst != id);
        self.insts[id].kind = InstructionKind::Nop;
    }

    /// The instruction defining a value, if any (parameters have none)
    pub fn defining_inst(&self, value: ValueId) -> Option<InstId> {
        self.defs.get(&value).copied()
    }

    /// Instructions reading `value`, in deterministic program order
    pub fn uses_of(&self, value: ValueId) -> Vec<InstId> {
        let mut uses = Vec::new();
        for block in self.blocks.iter() {
            for &id in &block.insts {
                if self.insts[id].kind.uses_value(value) {
                    uses.push(id);
                }
            }
        }
        uses
    }

    /// Returns true if no instruction or terminator reads `value`
    pub fn is_unused(&self, value: ValueId) -> bool {
        self.uses_of(value).is_empty()
            && self
                .blocks
                .iter()
                .all(|block| !block.terminator.used_values().contains(&value))
    }

    /// Replaces every read of `from` throughout the function with `to`
    pub fn replace_all_uses(&mut self, from: ValueId, to: Value) {
        if to == Value::Operand(from) {
            return;
        }
        for inst in self.insts.iter_mut() {
            inst.kind.replace_uses(from, to);
        }
        for block in self.blocks.iter_mut() {
            block.terminator.replace_uses(from, to);
        }
    }

    // --- CFG edges ---

    /// Connects two blocks by recording the predecessor edge. The terminator
    /// of `pred` is set separately.
    pub fn connect(&mut self, pred: BlockId, succ: BlockId) {
        self.blocks[succ].add_pred(pred);
    }

    /// Sets a terminator and keeps predecessor lists consistent
    pub fn set_terminator_with_edges(&mut self, block: BlockId, terminator: Terminator) {
        let old_targets = self.blocks[block].terminator.target_blocks();
        for target in old_targets {
            self.blocks[target].remove_pred(block);
        }
        for target in terminator.target_blocks() {
            self.blocks[target].add_pred(block);
        }
        self.blocks[block].terminator = terminator;
    }

    // --- Validation ---

    /// Checks structural invariants: entry block exists, terminator targets
    /// exist, block membership matches the arena, values are defined once,
    /// and no address flows into a terminator.
    pub fn validate(&self) -> IrResult<()> {
        if self.blocks.get(self.entry_block).is_none() {
            return Err(IrError::InvalidFunction {
                function: self.name.clone(),
                message: format!("entry block {:?} does not exist", self.entry_block),
            });
        }

        for (block_id, block) in self.blocks.iter_enumerated() {
            for target in block.terminator.target_blocks() {
                if self.blocks.get(target).is_none() {
                    return Err(IrError::InvalidBlock {
                        function: self.name.clone(),
                        block: block_id,
                        message: format!("terminator targets non-existent block {target:?}"),
                    });
                }
            }
            for &id in &block.insts {
                let inst = &self.insts[id];
                if matches!(inst.kind, InstructionKind::Nop) {
                    return Err(IrError::InvalidBlock {
                        function: self.name.clone(),
                        block: block_id,
                        message: format!("block references erased instruction {id:?}"),
                    });
                }
                if inst.parent != block_id {
                    return Err(IrError::InvalidBlock {
                        function: self.name.clone(),
                        block: block_id,
                        message: format!("instruction {id:?} has stale parent {:?}", inst.parent),
                    });
                }
            }
            for used in block.terminator.used_values() {
                if matches!(self.value_types.get(&used), Some(Type::Address(_))) {
                    return Err(IrError::InvalidBlock {
                        function: self.name.clone(),
                        block: block_id,
                        message: format!("terminator reads address value %{}", used.index()),
                    });
                }
            }
        }
        Ok(())
    }
}

impl PrettyPrint for Function {
    fn pretty_print(&self, indent: usize) -> String {
        let base = indent_str(indent);
        let mut result = format!("{base}fn {} {{\n", self.name);
        if !self.params.is_empty() {
            let params: Vec<_> = self
                .params
                .iter()
                .map(|id| format!("%{}", id.index()))
                .collect();
            result.push_str(&format!("{base}  params: {}\n", params.join(", ")));
        }
        for (block_id, block) in self.blocks.iter_enumerated() {
            let header = match &block.name {
                Some(name) => format!("{block_id:?} ({name})"),
                None => format!("{block_id:?}"),
            };
            result.push_str(&format!("{base}  {header}:\n"));
            for &id in &block.insts {
                result.push_str(&format!(
                    "{base}    {}\n",
                    self.insts[id].pretty_print(0)
                ));
            }
            result.push_str(&format!(
                "{base}    {}\n",
                block.terminator.pretty_print(0)
            ));
        }
        result.push_str(&format!("{base}}}\n"));
        result
    }
}
