//! # lir: a low-level, address-based IR
//!
//! This crate defines a small intermediate representation for a statically
//! typed language with value semantics, reference-counted heap boxes, and
//! explicit memory operations, together with the flow-sensitive
//! definite-initialization pass that consumes it.
//!
//! ## Design Principles
//!
//! 1. **Control Flow Graph (CFG)**: functions are directed graphs of basic
//!    blocks with explicit terminators.
//! 2. **SSA for values, addresses for memory**: every value is defined exactly
//!    once; storage is read and written through typed addresses produced by
//!    allocation and projection instructions.
//! 3. **Stable instruction identity**: instructions live in a per-function
//!    arena and blocks hold ordered lists of [`InstId`]s, so passes can insert
//!    and erase instructions without invalidating the ids they are tracking.
//!
//! ## Architecture
//!
//! ```text
//! Module
//!   functions: IndexVec<FunctionId, Function>
//!
//! Function
//!   blocks: IndexVec<BlockId, BasicBlock>
//!   insts:  IndexVec<InstId, Instruction>   (arena; blocks reference by id)
//!   value_types: Map<ValueId, Type>
//!
//! BasicBlock
//!   insts: Vec<InstId>
//!   terminator: Terminator
//!   preds: Vec<BlockId>
//! ```
//!
//! The abstract `assign` instruction and the `mark_uninitialized` marker are
//! raw operations that exist only until the definite-initialization pass
//! ([`passes::DefiniteInit`]) has proven every storage location initialized
//! before use, lowered each assign to an initialization or an overwrite, and
//! promoted loads to SSA values where the dataflow allows it.

pub use basic_block::BasicBlock;
pub use builder::InstBuilder;
pub use diagnostics::{Diagnostic, DiagnosticCode, DiagnosticCollection, DiagnosticSeverity};
pub use function::Function;
pub use instruction::{Instruction, InstructionKind, ParamConvention};
pub use lowering::{StdTypeLowering, TypeLowering};
pub use module::Module;
pub use passes::{DefiniteInit, IrPass, PassManager};
pub use terminator::Terminator;
pub use types::Type;
pub use value::{Literal, Value};

pub mod basic_block;
pub mod builder;
pub mod diagnostics;
pub mod function;
pub mod instruction;
pub mod layout;
pub mod lowering;
pub mod module;
pub mod passes;
pub mod terminator;
pub mod types;
pub mod value;

// --- Core Identifiers ---

index_vec::define_index_type! {
    /// Unique identifier for a function within a module
    pub struct FunctionId = usize;
}

index_vec::define_index_type! {
    /// Unique identifier for a basic block within a function
    pub struct BlockId = usize;
}

index_vec::define_index_type! {
    /// Unique identifier for an SSA value within a function
    pub struct ValueId = usize;
}

index_vec::define_index_type! {
    /// Unique identifier for an instruction within a function's arena.
    ///
    /// Stable across insertions and erasures; erased slots are tombstoned.
    pub struct InstId = usize;
}

// --- Error Types ---

/// Structural IR malformation detected by `validate`.
///
/// These are distinct from the user-level diagnostics produced by the
/// definite-initialization pass: an `IrError` means the IR producer broke an
/// invariant, not that the analyzed program is ill-formed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IrError {
    #[error("function '{function}': {message}")]
    InvalidFunction { function: String, message: String },

    #[error("function '{function}', block {block:?}: {message}")]
    InvalidBlock {
        function: String,
        block: BlockId,
        message: String,
    },
}

/// Result type for IR validation
pub type IrResult<T> = Result<T, IrError>;

// --- Pretty Printing Support ---

/// Trait for pretty-printing IR constructs
pub trait PrettyPrint {
    fn pretty_print(&self, indent: usize) -> String;
}

/// Helper function to create indentation
pub(crate) fn indent_str(level: usize) -> String {
    "  ".repeat(level)
}
