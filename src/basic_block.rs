//! # Basic Blocks
//!
//! A basic block is a straight-line sequence of instructions with one entry
//! point and one terminator. Blocks hold instruction *ids* into the owning
//! function's arena, so instruction identity survives insertion and erasure.

use crate::{BlockId, InstId, PrettyPrint, Terminator};

/// A basic block in the control flow graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// Optional name for debugging
    pub name: Option<String>,

    /// Ordered instruction ids; the instructions themselves live in the
    /// function's arena
    pub insts: Vec<InstId>,

    /// The terminator ending this block
    pub terminator: Terminator,

    /// Explicit CFG edges: predecessors of this block
    pub preds: Vec<BlockId>,
}

impl BasicBlock {
    /// Creates an empty block with an unreachable placeholder terminator
    pub const fn new() -> Self {
        Self {
            name: None,
            insts: Vec::new(),
            terminator: Terminator::Unreachable,
            preds: Vec::new(),
        }
    }

    pub const fn with_name(name: String) -> Self {
        Self {
            name: Some(name),
            insts: Vec::new(),
            terminator: Terminator::Unreachable,
            preds: Vec::new(),
        }
    }

    pub fn set_terminator(&mut self, terminator: Terminator) {
        self.terminator = terminator;
    }

    /// Position of an instruction id within this block
    pub fn position_of(&self, inst: InstId) -> Option<usize> {
        self.insts.iter().position(|&id| id == inst)
    }

    /// Add a predecessor, avoiding duplicates
    pub fn add_pred(&mut self, pred: BlockId) {
        if !self.preds.contains(&pred) {
            self.preds.push(pred);
        }
    }

    /// Remove a predecessor
    pub fn remove_pred(&mut self, pred: BlockId) {
        self.preds.retain(|&p| p != pred);
    }
}

impl Default for BasicBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl PrettyPrint for BasicBlock {
    fn pretty_print(&self, indent: usize) -> String {
        // Block bodies are printed by the owning function, which can resolve
        // instruction ids; this prints only the header and terminator.
        let base = crate::indent_str(indent);
        let mut result = String::new();
        if let Some(name) = &self.name {
            result.push_str(&format!("{base}; {name}\n"));
        }
        result.push_str(&format!("{base}{}\n", self.terminator.pretty_print(0)));
        result
    }
}
