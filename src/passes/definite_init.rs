//! # Definite Initialization
//!
//! Proves that every read, inout pass, escape, and release of an allocation
//! is dominated by an initializing store along every control-flow path, and
//! rewrites the IR once the proof is in hand:
//!
//! 1. Abstract `assign` instructions are lowered to a plain store when they
//!    initialize fresh storage, or to a load/store/destroy sequence when they
//!    overwrite a live value.
//! 2. Loads are promoted to SSA values forwarded from earlier stores in the
//!    same block, with per-sub-element precision for aggregates.
//!
//! Storage is tracked per *element bucket*: the flattened tuple elements of
//! the allocated type, where a struct occupies a single bucket. Failures
//! produce one diagnostic per element naming the sub-element path.
//!
//! The pass visits three allocation roots: heap boxes, stack slots, and the
//! explicit `mark_uninitialized` marker. A final sweep strips the raw
//! operations (`assign`, `mark_uninitialized`, `mark_function_escape`) so
//! they never reach later passes.

mod element_promotion;
mod scalarize;
mod use_collector;

use crate::{
    layout, DiagnosticCollection, Function, InstId, InstructionKind, IrPass, Module, PrettyPrint,
    StdTypeLowering, TypeLowering, Value, ValueId,
};

use element_promotion::ElementPromotion;
use use_collector::UseCollector;

/// Classification of a single use of one element of an allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UseKind {
    /// A read of the element
    Load,

    /// A store covering the entire memory object
    Store,

    /// A store reaching only into a struct sub-field; an ordinary use but
    /// not a full definition
    PartialStore,

    /// Passed as indirect-inout; requires prior initialization and does not
    /// re-initialize
    InOutUse,

    /// The address leaks; load promotion is disabled for the whole value
    Escape,

    /// A lifetime terminator; the element must be fully initialized
    Release,
}

/// One entry in an element's use list.
///
/// The list grows while it is being processed (assign lowering registers the
/// loads and stores it inserts), and entries are tombstoned in place by
/// clearing `inst`, so processing must index the list and re-read its length
/// rather than iterate a snapshot.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ElementUse {
    pub(crate) inst: Option<InstId>,
    pub(crate) kind: UseKind,
}

/// Per-element ordered use list
pub(crate) type ElementUses = Vec<ElementUse>;

/// Configuration for the definite-initialization pass
#[derive(Debug, Clone, Copy, Default)]
pub struct DefiniteInitConfig {
    /// Historical debugging flag: dumps each function after analysis.
    /// Copy-addr forwarding itself is not implemented.
    pub enable_copy_addr_forwarding: bool,
}

/// Counters for the work performed by a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefiniteInitStats {
    pub loads_promoted: usize,
    pub assigns_rewritten: usize,
    pub scalarized_aggregates: usize,
    pub init_flags_set: usize,
    pub allocations_removed: usize,
    pub raw_ops_stripped: usize,
}

/// The definite-initialization checking and load-promotion pass
pub struct DefiniteInit {
    config: DefiniteInitConfig,
    lowering: Box<dyn TypeLowering>,
    diagnostics: DiagnosticCollection,
    stats: DefiniteInitStats,
}

impl Default for DefiniteInit {
    fn default() -> Self {
        Self::new()
    }
}

impl DefiniteInit {
    pub fn new() -> Self {
        Self {
            config: DefiniteInitConfig::default(),
            lowering: Box::new(StdTypeLowering::new()),
            diagnostics: DiagnosticCollection::new(),
            stats: DefiniteInitStats::default(),
        }
    }

    pub fn with_config(config: DefiniteInitConfig) -> Self {
        Self {
            config,
            ..Self::new()
        }
    }

    /// Overrides the type-lowering collaborator
    pub fn with_lowering(mut self, lowering: Box<dyn TypeLowering>) -> Self {
        self.lowering = lowering;
        self
    }

    /// Diagnostics accumulated so far
    pub const fn diagnostics(&self) -> &DiagnosticCollection {
        &self.diagnostics
    }

    /// Drains the accumulated diagnostics
    pub fn take_diagnostics(&mut self) -> DiagnosticCollection {
        std::mem::take(&mut self.diagnostics)
    }

    pub const fn stats(&self) -> &DefiniteInitStats {
        &self.stats
    }

    /// Runs the pass over every function in module order
    pub fn run_module(&mut self, module: &mut Module) -> bool {
        let mut changed = false;
        for function in module.functions.iter_mut() {
            changed |= self.run_function(function);
        }
        log::debug!("definite-init stats: {:?}", self.stats);
        changed
    }

    /// Runs the pass over a single function
    pub fn run_function(&mut self, function: &mut Function) -> bool {
        let before = self.stats;
        self.check_function(function);
        if self.config.enable_copy_addr_forwarding {
            log::debug!(
                "function '{}' after analysis:\n{}",
                function.name,
                function.pretty_print(0)
            );
        }
        self.lower_raw_operations(function);
        self.stats != before
    }

    fn check_function(&mut self, function: &mut Function) {
        // Collect the allocation roots up front; processing mutates blocks
        // around them but never introduces new roots.
        let mut roots: Vec<InstId> = Vec::new();
        for block in function.blocks.iter() {
            for &id in &block.insts {
                if function.inst(id).kind.is_allocation_root() {
                    roots.push(id);
                }
            }
        }
        for root in roots {
            self.process_allocation(function, root);
        }
    }

    fn process_allocation(&mut self, function: &mut Function, root: InstId) {
        log::debug!(
            "definite-init looking at: {}",
            function.inst(root).pretty_print(0)
        );

        let storage_ty = storage_type(function, root);
        let address = root_address(&function.inst(root).kind);
        let buckets = layout::tuple_element_count(&storage_ty);

        let mut uses =
            UseCollector::new(function, buckets, &mut self.stats).collect(address);

        // Lifetime uses reach the storage through the owning result rather
        // than the address; a release requires every element to be fully
        // initialized, so it lands in every bucket.
        if let Some(owner) = root_owner(&function.inst(root).kind) {
            for id in function.uses_of(owner) {
                if matches!(
                    function.inst(id).kind,
                    InstructionKind::StrongRelease { .. } | InstructionKind::DeallocStack { .. }
                ) {
                    for bucket in &mut uses {
                        bucket.push(ElementUse {
                            inst: Some(id),
                            kind: UseKind::Release,
                        });
                    }
                }
            }
        }

        for (element, element_uses) in uses.into_iter().enumerate() {
            ElementPromotion::new(
                function,
                root,
                element,
                storage_ty.clone(),
                element_uses,
                self.lowering.as_ref(),
                &mut self.diagnostics,
                &mut self.stats,
            )
            .run();
        }

        // A box nobody stores to, loads from, or releases any more can go.
        if let InstructionKind::BoxAlloc {
            box_dest,
            addr_dest,
            ..
        } = function.inst(root).kind
        {
            if function.is_unused(box_dest) && function.is_unused(addr_dest) {
                function.erase_inst(root);
                self.stats.allocations_removed += 1;
            }
        }
    }

    /// Strips the raw operations once checking is complete. Assigns that
    /// survive (in functions with no allocation roots of their own) lower as
    /// plain assignments, never initializations.
    fn lower_raw_operations(&mut self, function: &mut Function) {
        let mut all: Vec<InstId> = Vec::new();
        for block in function.blocks.iter() {
            all.extend_from_slice(&block.insts);
        }
        for id in all {
            if function.is_erased(id) {
                continue;
            }
            match function.inst(id).kind {
                InstructionKind::Assign { .. } => {
                    scalarize::lower_assign(
                        function,
                        id,
                        false,
                        self.lowering.as_ref(),
                        &mut self.stats,
                    );
                    self.stats.raw_ops_stripped += 1;
                }
                InstructionKind::MarkUninitialized { dest, operand } => {
                    function.replace_all_uses(dest, Value::operand(operand));
                    function.erase_inst(id);
                    self.stats.raw_ops_stripped += 1;
                }
                InstructionKind::MarkFunctionEscape { .. } => {
                    function.erase_inst(id);
                    self.stats.raw_ops_stripped += 1;
                }
                _ => {}
            }
        }
    }
}

impl IrPass for DefiniteInit {
    fn run(&mut self, function: &mut Function) -> bool {
        self.run_function(function)
    }

    fn name(&self) -> &'static str {
        "DefiniteInit"
    }
}

/// The type of the storage an allocation root introduces
fn storage_type(function: &Function, root: InstId) -> crate::Type {
    match &function.inst(root).kind {
        InstructionKind::BoxAlloc { ty, .. } | InstructionKind::StackAlloc { ty, .. } => ty.clone(),
        InstructionKind::MarkUninitialized { dest, .. } => function.pointee_type(*dest).clone(),
        other => panic!("not an allocation root: {other:?}"),
    }
}

/// The address result of an allocation root
fn root_address(kind: &InstructionKind) -> ValueId {
    match kind {
        InstructionKind::BoxAlloc { addr_dest, .. }
        | InstructionKind::StackAlloc { addr_dest, .. } => *addr_dest,
        InstructionKind::MarkUninitialized { dest, .. } => *dest,
        other => panic!("not an allocation root: {other:?}"),
    }
}

/// The owning result whose releases terminate the storage's lifetime
fn root_owner(kind: &InstructionKind) -> Option<ValueId> {
    match kind {
        InstructionKind::BoxAlloc { box_dest, .. } => Some(*box_dest),
        InstructionKind::StackAlloc { slot_dest, .. } => Some(*slot_dest),
        InstructionKind::MarkUninitialized { .. } => None,
        other => panic!("not an allocation root: {other:?}"),
    }
}

/// Folds a chain of tuple/struct element addresses rooted at an allocation
/// into the flat index of the first primitive sub-element it addresses.
///
/// Returns `None` if the chain passes through anything other than an element
/// address projection before reaching the root.
pub(crate) fn resolve_access_path(
    function: &Function,
    mut address: ValueId,
    root: InstId,
) -> Option<usize> {
    let mut first_sub_element = 0;
    loop {
        let def = function.defining_inst(address)?;
        if def == root {
            return Some(first_sub_element);
        }
        match &function.inst(def).kind {
            InstructionKind::TupleElementPtr { base, index, .. } => {
                let crate::Type::Tuple(elements) = function.pointee_type(*base) else {
                    panic!("tuple_element_ptr base is not a tuple address");
                };
                first_sub_element += elements[..*index]
                    .iter()
                    .map(layout::sub_element_count)
                    .sum::<usize>();
                address = *base;
            }
            InstructionKind::StructFieldPtr { base, field, .. } => {
                let crate::Type::Struct { fields, .. } = function.pointee_type(*base) else {
                    panic!("struct_field_ptr base is not a struct address");
                };
                for (name, field_ty) in fields {
                    if name == field {
                        break;
                    }
                    first_sub_element += layout::sub_element_count(field_ty);
                }
                address = *base;
            }
            _ => return None,
        }
    }
}

#[cfg(test)]
#[path = "definite_init_tests.rs"]
mod tests;
