//! # IR Instructions
//!
//! The closed set of instruction kinds the memory passes operate over.
//! Instructions perform computations or memory effects but never transfer
//! control; control flow is handled exclusively by terminators.
//!
//! Two instructions are *raw* operations that must not survive past the
//! definite-initialization pass: `Assign`, which stores a value without
//! saying whether it initializes fresh storage or overwrites a live value,
//! and `MarkUninitialized`, which marks an address as requiring
//! initialization analysis. `MarkFunctionEscape` is likewise stripped once
//! its escape has been checked.

use chumsky::span::SimpleSpan;
use smallvec::SmallVec;

use crate::{BlockId, PrettyPrint, Type, Value, ValueId};

/// Calling convention of a single call argument.
///
/// Decides how an address passed at that position is treated by the
/// use collector: an out-slot is a definition, an inout is a use that
/// requires prior initialization, and a plain by-value pass of an address
/// leaks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamConvention {
    /// Callee stores its result through the address
    IndirectResult,
    /// Callee reads and may rewrite storage through the address
    IndirectInOut,
    /// Ordinary by-value argument
    Direct,
}

/// An instruction together with its source location.
///
/// Instructions are stored in the function's arena; `parent` records the
/// block the instruction currently belongs to and is maintained by the
/// function's mutation primitives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub kind: InstructionKind,
    pub span: Option<SimpleSpan<usize>>,
    pub(crate) parent: BlockId,
}

/// The different kinds of instructions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionKind {
    // --- Allocations ---
    /// Heap box allocation: result 0 is the owning reference, result 1 the
    /// address of the boxed storage
    BoxAlloc {
        box_dest: ValueId,
        addr_dest: ValueId,
        ty: Type,
    },

    /// Stack slot allocation: result 0 is the slot itself (consumed by
    /// `DeallocStack`), result 1 the address of the storage
    StackAlloc {
        slot_dest: ValueId,
        addr_dest: ValueId,
        ty: Type,
    },

    /// Address pass-through marking storage that must be proven initialized
    /// before use; resolved to its operand once checking is done
    MarkUninitialized { dest: ValueId, operand: ValueId },

    // --- Projections ---
    /// Address of a tuple element: `dest = &base.index`
    TupleElementPtr {
        dest: ValueId,
        base: ValueId,
        index: usize,
    },

    /// Address of a struct stored property: `dest = &base.field`
    StructFieldPtr {
        dest: ValueId,
        base: ValueId,
        field: String,
    },

    /// Address of an enum's payload body
    EnumDataPtr { dest: ValueId, base: ValueId },

    // --- Memory operations ---
    /// `dest = load address`
    Load {
        dest: ValueId,
        ty: Type,
        address: ValueId,
    },

    /// Load through weak storage; the referent may have been deallocated
    LoadWeak {
        dest: ValueId,
        ty: Type,
        address: ValueId,
    },

    /// `store value, address`; trusted to be produced only where valid
    Store {
        value: Value,
        ty: Type,
        address: ValueId,
    },

    /// Abstract store that has not yet been classified as an initialization
    /// or an overwrite; lowered away by definite-initialization
    Assign {
        value: Value,
        ty: Type,
        address: ValueId,
    },

    /// Store through weak storage; `is_init` is set by the pass
    StoreWeak {
        value: Value,
        ty: Type,
        address: ValueId,
        is_init: bool,
    },

    /// Copy between two addresses; `is_init` is set by the pass
    CopyAddr {
        src: ValueId,
        dst: ValueId,
        is_take: bool,
        is_init: bool,
    },

    /// Runtime default-initialization of the whole storage
    InitializeVar { address: ValueId },

    /// Opens existential storage for initialization with a concrete type;
    /// the result is the address of the concrete payload
    InitExistential {
        dest: ValueId,
        container: ValueId,
        concrete_ty: Type,
    },

    /// Copies one existential container into another, widening the protocol
    UpcastExistential { src: ValueId, dst: ValueId },

    /// Address of the concrete payload of an initialized existential
    ProjectExistential { dest: ValueId, container: ValueId },

    /// Witness lookup on an initialized existential
    ProtocolMethod {
        dest: ValueId,
        container: ValueId,
        method: String,
    },

    /// Writes an enum tag, initializing the storage
    InjectEnumAddr { address: ValueId },

    // --- Aggregates ---
    /// `dest = (elements...)`
    MakeTuple { dest: ValueId, elements: Vec<Value> },

    /// `dest = Ty { fields... }` in declaration order
    MakeStruct {
        dest: ValueId,
        ty: Type,
        fields: Vec<Value>,
    },

    /// `dest = tuple.index`
    ExtractTupleElement {
        dest: ValueId,
        tuple: Value,
        index: usize,
    },

    /// `dest = struct_val.field`
    ExtractStructField {
        dest: ValueId,
        struct_val: Value,
        field: String,
    },

    // --- Calls ---
    /// Function call with per-argument conventions
    Apply {
        dest: Option<ValueId>,
        callee: Value,
        args: Vec<Value>,
        conventions: Vec<ParamConvention>,
    },

    // --- Lifetime ---
    /// Drops the owning reference of a heap box
    StrongRelease { operand: Value },

    /// Frees a stack slot
    DeallocStack { operand: Value },

    /// Reference-count increment of a loaded value
    RetainValue { operand: Value },

    /// Reference-count decrement of an owned value
    ReleaseValue { operand: Value },

    /// Marks an address as captured by a global function; erased once its
    /// initialization state has been checked
    MarkFunctionEscape { operand: ValueId },

    /// Tombstone left in the arena by instruction erasure
    Nop,
}

impl Instruction {
    /// The block this instruction currently belongs to
    pub const fn parent(&self) -> BlockId {
        self.parent
    }
}

impl InstructionKind {
    /// Returns the values this instruction defines
    pub fn destinations(&self) -> SmallVec<[ValueId; 2]> {
        let mut dests = SmallVec::new();
        match self {
            Self::BoxAlloc {
                box_dest,
                addr_dest,
                ..
            } => {
                dests.push(*box_dest);
                dests.push(*addr_dest);
            }
            Self::StackAlloc {
                slot_dest,
                addr_dest,
                ..
            } => {
                dests.push(*slot_dest);
                dests.push(*addr_dest);
            }
            Self::MarkUninitialized { dest, .. }
            | Self::TupleElementPtr { dest, .. }
            | Self::StructFieldPtr { dest, .. }
            | Self::EnumDataPtr { dest, .. }
            | Self::Load { dest, .. }
            | Self::LoadWeak { dest, .. }
            | Self::InitExistential { dest, .. }
            | Self::ProjectExistential { dest, .. }
            | Self::ProtocolMethod { dest, .. }
            | Self::MakeTuple { dest, .. }
            | Self::MakeStruct { dest, .. }
            | Self::ExtractTupleElement { dest, .. }
            | Self::ExtractStructField { dest, .. } => dests.push(*dest),
            Self::Apply { dest, .. } => {
                if let Some(dest) = dest {
                    dests.push(*dest);
                }
            }
            Self::Store { .. }
            | Self::Assign { .. }
            | Self::StoreWeak { .. }
            | Self::CopyAddr { .. }
            | Self::InitializeVar { .. }
            | Self::UpcastExistential { .. }
            | Self::InjectEnumAddr { .. }
            | Self::StrongRelease { .. }
            | Self::DeallocStack { .. }
            | Self::RetainValue { .. }
            | Self::ReleaseValue { .. }
            | Self::MarkFunctionEscape { .. }
            | Self::Nop => {}
        }
        dests
    }

    /// Returns all SSA values this instruction reads
    pub fn used_values(&self) -> SmallVec<[ValueId; 4]> {
        fn push_operand(used: &mut SmallVec<[ValueId; 4]>, value: &Value) {
            if let Value::Operand(id) = value {
                used.push(*id);
            }
        }

        let mut used = SmallVec::new();
        match self {
            Self::BoxAlloc { .. } | Self::StackAlloc { .. } | Self::Nop => {}
            Self::MarkUninitialized { operand, .. } => used.push(*operand),
            Self::TupleElementPtr { base, .. }
            | Self::StructFieldPtr { base, .. }
            | Self::EnumDataPtr { base, .. } => used.push(*base),
            Self::Load { address, .. } | Self::LoadWeak { address, .. } => used.push(*address),
            Self::Store { value, address, .. }
            | Self::Assign { value, address, .. }
            | Self::StoreWeak { value, address, .. } => {
                push_operand(&mut used, value);
                used.push(*address);
            }
            Self::CopyAddr { src, dst, .. } => {
                used.push(*src);
                used.push(*dst);
            }
            Self::InitializeVar { address } | Self::InjectEnumAddr { address } => {
                used.push(*address)
            }
            Self::InitExistential { container, .. }
            | Self::ProjectExistential { container, .. }
            | Self::ProtocolMethod { container, .. } => used.push(*container),
            Self::UpcastExistential { src, dst } => {
                used.push(*src);
                used.push(*dst);
            }
            Self::MakeTuple { elements, .. } => {
                for element in elements {
                    push_operand(&mut used, element);
                }
            }
            Self::MakeStruct { fields, .. } => {
                for field in fields {
                    push_operand(&mut used, field);
                }
            }
            Self::ExtractTupleElement { tuple, .. } => push_operand(&mut used, tuple),
            Self::ExtractStructField { struct_val, .. } => push_operand(&mut used, struct_val),
            Self::Apply { callee, args, .. } => {
                push_operand(&mut used, callee);
                for arg in args {
                    push_operand(&mut used, arg);
                }
            }
            Self::StrongRelease { operand }
            | Self::DeallocStack { operand }
            | Self::RetainValue { operand }
            | Self::ReleaseValue { operand } => push_operand(&mut used, operand),
            Self::MarkFunctionEscape { operand } => used.push(*operand),
        }
        used
    }

    /// Returns true if this instruction reads `value`
    pub fn uses_value(&self, value: ValueId) -> bool {
        self.used_values().contains(&value)
    }

    /// Replaces every read of `from` with `to`.
    ///
    /// Address operands are `ValueId` slots; replacing one with a literal is
    /// a caller error and is ignored outside debug builds.
    pub fn replace_uses(&mut self, from: ValueId, to: Value) {
        let value = |v: &mut Value| {
            if *v == Value::Operand(from) {
                *v = to;
            }
        };
        let id = |slot: &mut ValueId| {
            if *slot == from {
                match to {
                    Value::Operand(new_id) => *slot = new_id,
                    Value::Literal(_) => {
                        debug_assert!(false, "cannot replace an address operand with a literal")
                    }
                }
            }
        };
        match self {
            Self::BoxAlloc { .. } | Self::StackAlloc { .. } | Self::Nop => {}
            Self::MarkUninitialized { operand, .. } => id(operand),
            Self::TupleElementPtr { base, .. }
            | Self::StructFieldPtr { base, .. }
            | Self::EnumDataPtr { base, .. } => id(base),
            Self::Load { address, .. } | Self::LoadWeak { address, .. } => id(address),
            Self::Store { value: v, address, .. }
            | Self::Assign { value: v, address, .. }
            | Self::StoreWeak { value: v, address, .. } => {
                value(v);
                id(address);
            }
            Self::CopyAddr { src, dst, .. } => {
                id(src);
                id(dst);
            }
            Self::InitializeVar { address } | Self::InjectEnumAddr { address } => id(address),
            Self::InitExistential { container, .. }
            | Self::ProjectExistential { container, .. }
            | Self::ProtocolMethod { container, .. } => id(container),
            Self::UpcastExistential { src, dst } => {
                id(src);
                id(dst);
            }
            Self::MakeTuple { elements, .. } => elements.iter_mut().for_each(value),
            Self::MakeStruct { fields, .. } => fields.iter_mut().for_each(value),
            Self::ExtractTupleElement { tuple, .. } => value(tuple),
            Self::ExtractStructField { struct_val, .. } => value(struct_val),
            Self::Apply { callee, args, .. } => {
                value(callee);
                args.iter_mut().for_each(value);
            }
            Self::StrongRelease { operand }
            | Self::DeallocStack { operand }
            | Self::RetainValue { operand }
            | Self::ReleaseValue { operand } => value(operand),
            Self::MarkFunctionEscape { operand } => id(operand),
        }
    }

    /// Returns true if this is one of the allocation roots the
    /// definite-initialization pass analyzes
    pub const fn is_allocation_root(&self) -> bool {
        matches!(
            self,
            Self::BoxAlloc { .. } | Self::StackAlloc { .. } | Self::MarkUninitialized { .. }
        )
    }
}

impl PrettyPrint for Instruction {
    fn pretty_print(&self, _indent: usize) -> String {
        let p = |v: &Value| v.pretty_print(0);
        let o = |id: &ValueId| format!("%{}", id.index());
        match &self.kind {
            InstructionKind::BoxAlloc {
                box_dest,
                addr_dest,
                ty,
            } => format!("{}, {} = box_alloc {ty}", o(box_dest), o(addr_dest)),
            InstructionKind::StackAlloc {
                slot_dest,
                addr_dest,
                ty,
            } => format!("{}, {} = stack_alloc {ty}", o(slot_dest), o(addr_dest)),
            InstructionKind::MarkUninitialized { dest, operand } => {
                format!("{} = mark_uninitialized {}", o(dest), o(operand))
            }
            InstructionKind::TupleElementPtr { dest, base, index } => {
                format!("{} = tuple_element_ptr {}, {index}", o(dest), o(base))
            }
            InstructionKind::StructFieldPtr { dest, base, field } => {
                format!("{} = struct_field_ptr {}, #{field}", o(dest), o(base))
            }
            InstructionKind::EnumDataPtr { dest, base } => {
                format!("{} = enum_data_ptr {}", o(dest), o(base))
            }
            InstructionKind::Load { dest, ty, address } => {
                format!("{} = load {ty}, {}", o(dest), o(address))
            }
            InstructionKind::LoadWeak { dest, ty, address } => {
                format!("{} = load_weak {ty}, {}", o(dest), o(address))
            }
            InstructionKind::Store { value, ty, address } => {
                format!("store {} to {ty} {}", p(value), o(address))
            }
            InstructionKind::Assign { value, ty, address } => {
                format!("assign {} to {ty} {}", p(value), o(address))
            }
            InstructionKind::StoreWeak {
                value,
                ty,
                address,
                is_init,
            } => format!(
                "store_weak {} to {ty} {} [init={is_init}]",
                p(value),
                o(address)
            ),
            InstructionKind::CopyAddr {
                src,
                dst,
                is_take,
                is_init,
            } => format!(
                "copy_addr {} to {} [take={is_take}, init={is_init}]",
                o(src),
                o(dst)
            ),
            InstructionKind::InitializeVar { address } => {
                format!("initialize_var {}", o(address))
            }
            InstructionKind::InitExistential {
                dest,
                container,
                concrete_ty,
            } => format!(
                "{} = init_existential {}, {concrete_ty}",
                o(dest),
                o(container)
            ),
            InstructionKind::UpcastExistential { src, dst } => {
                format!("upcast_existential {} to {}", o(src), o(dst))
            }
            InstructionKind::ProjectExistential { dest, container } => {
                format!("{} = project_existential {}", o(dest), o(container))
            }
            InstructionKind::ProtocolMethod {
                dest,
                container,
                method,
            } => format!("{} = protocol_method {}, #{method}", o(dest), o(container)),
            InstructionKind::InjectEnumAddr { address } => {
                format!("inject_enum_addr {}", o(address))
            }
            InstructionKind::MakeTuple { dest, elements } => {
                let elements: Vec<_> = elements.iter().map(p).collect();
                format!("{} = tuple ({})", o(dest), elements.join(", "))
            }
            InstructionKind::MakeStruct { dest, ty, fields } => {
                let fields: Vec<_> = fields.iter().map(p).collect();
                format!("{} = struct {ty} ({})", o(dest), fields.join(", "))
            }
            InstructionKind::ExtractTupleElement { dest, tuple, index } => {
                format!("{} = tuple_extract {}, {index}", o(dest), p(tuple))
            }
            InstructionKind::ExtractStructField {
                dest,
                struct_val,
                field,
            } => format!("{} = struct_extract {}, #{field}", o(dest), p(struct_val)),
            InstructionKind::Apply {
                dest,
                callee,
                args,
                conventions: _,
            } => {
                let args: Vec<_> = args.iter().map(p).collect();
                match dest {
                    Some(dest) => format!("{} = apply {}({})", o(dest), p(callee), args.join(", ")),
                    None => format!("apply {}({})", p(callee), args.join(", ")),
                }
            }
            InstructionKind::StrongRelease { operand } => {
                format!("strong_release {}", p(operand))
            }
            InstructionKind::DeallocStack { operand } => format!("dealloc_stack {}", p(operand)),
            InstructionKind::RetainValue { operand } => format!("retain_value {}", p(operand)),
            InstructionKind::ReleaseValue { operand } => format!("release_value {}", p(operand)),
            InstructionKind::MarkFunctionEscape { operand } => {
                format!("mark_function_escape {}", o(operand))
            }
            InstructionKind::Nop => "nop".to_string(),
        }
    }
}
