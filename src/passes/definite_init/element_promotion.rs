//! Per-element initialization checking, diagnostics, assign lowering, and
//! intra-block load promotion.
//!
//! One `ElementPromotion` run handles one element bucket of one allocation.
//! Phase 1 walks the element's use list checking each use against the
//! dataflow (diagnosing the first failure and then going quiet for this
//! element), setting initialization bits on copy/store-weak instructions,
//! and lowering assigns. Phase 2 runs only on clean elements and forwards
//! stored values into loads.

use chumsky::span::SimpleSpan;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    layout, BlockId, Diagnostic, DiagnosticCode, DiagnosticCollection, Function, InstBuilder,
    InstId, InstructionKind, PrettyPrint, Type, TypeLowering, Value,
};

use super::{resolve_access_path, scalarize, DefiniteInitStats, ElementUse, ElementUses, UseKind};

/// Result of the definite-initialization check at a single use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiKind {
    Yes,
    No,
    /// Initialized on some paths only. The current predecessor check never
    /// produces this; the diagnostic path is kept for the day it does.
    #[allow(dead_code)]
    Partial,
}

/// Whether the value has escaped along any path reaching a block's entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum EscapeKind {
    #[default]
    Unknown,
    Yes,
    #[allow(dead_code)]
    No,
}

/// Live-out state of one block for the element under analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Availability {
    #[default]
    Unknown,
    NotLiveOut,
    LiveOut,
    /// Sentinel breaking cycles during the recursive live-out walk; a block
    /// observed in this state is speculatively live-out.
    Computing,
}

/// Cached per-block dataflow facts
#[derive(Debug, Clone, Copy, Default)]
struct LiveOutBlockState {
    /// Reserved for restricting promotion to the escape's reachable region.
    #[allow(dead_code)]
    escape: EscapeKind,
    has_non_load_use: bool,
    availability: Availability,
}

pub(super) struct ElementPromotion<'a> {
    func: &'a mut Function,
    lowering: &'a dyn TypeLowering,
    diagnostics: &'a mut DiagnosticCollection,
    stats: &'a mut DefiniteInitStats,

    /// The allocation root; inserted into the non-load-use set of its own
    /// block as the "not yet defined" sentinel for the backward scan.
    root: InstId,
    element: usize,
    memory_ty: Type,
    num_memory_sub_elements: usize,

    uses: ElementUses,
    per_block: FxHashMap<BlockId, LiveOutBlockState>,
    non_load_uses: FxHashSet<InstId>,
    has_any_escape: bool,
    had_error: bool,
}

impl<'a> ElementPromotion<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        func: &'a mut Function,
        root: InstId,
        element: usize,
        memory_ty: Type,
        uses: ElementUses,
        lowering: &'a dyn TypeLowering,
        diagnostics: &'a mut DiagnosticCollection,
        stats: &'a mut DefiniteInitStats,
    ) -> Self {
        let num_memory_sub_elements = layout::sub_element_count(&memory_ty);
        let mut per_block: FxHashMap<BlockId, LiveOutBlockState> = FxHashMap::default();
        let mut non_load_uses: FxHashSet<InstId> = FxHashSet::default();
        let mut has_any_escape = false;

        for entry in &uses {
            let inst = entry.inst.expect("collector produced a tombstoned use");
            if entry.kind == UseKind::Load {
                continue;
            }
            non_load_uses.insert(inst);

            let state = per_block.entry(func.parent_block(inst)).or_default();
            state.has_non_load_use = true;
            // Every non-load use is checked to be live-in or a definition,
            // so its block counts as live-out for the cross-block walk.
            state.availability = Availability::LiveOut;

            if entry.kind == UseKind::Escape {
                has_any_escape = true;
                state.escape = EscapeKind::Yes;
            }
        }

        // The allocation itself is not a use, but seeding it into the
        // dataflow lets the backward scan discover "defined by nothing yet".
        non_load_uses.insert(root);
        let root_state = per_block.entry(func.parent_block(root)).or_default();
        root_state.has_non_load_use = true;
        if root_state.availability == Availability::Unknown {
            root_state.availability = Availability::NotLiveOut;
        }

        Self {
            func,
            lowering,
            diagnostics,
            stats,
            root,
            element,
            memory_ty,
            num_memory_sub_elements,
            uses,
            per_block,
            non_load_uses,
            has_any_escape,
            had_error: false,
        }
    }

    pub(super) fn run(mut self) {
        // Phase 1: classification and diagnostics. Assign lowering appends
        // to `uses` while this loop runs, so index and re-read the length.
        let mut i = 0;
        while i < self.uses.len() {
            let ElementUse { inst, kind } = self.uses[i];
            let Some(inst) = inst else {
                i += 1;
                continue;
            };
            match kind {
                UseKind::Load => self.handle_load_use(inst),
                UseKind::Store => self.handle_store_use(i, inst, false),
                UseKind::PartialStore => self.handle_store_use(i, inst, true),
                UseKind::InOutUse => self.handle_inout_use(inst),
                UseKind::Escape => self.handle_escape(inst),
                UseKind::Release => self.handle_release(inst),
            }
            // One diagnostic per element; an errored element is also
            // excluded from promotion.
            if self.had_error {
                return;
            }
            i += 1;
        }

        // Phase 2: load promotion.
        for i in 0..self.uses.len() {
            if let ElementUse {
                inst: Some(inst),
                kind: UseKind::Load,
            } = self.uses[i]
            {
                self.promote_load(inst);
            }
        }
    }

    // --- Phase 1 ---

    fn handle_load_use(&mut self, inst: InstId) {
        if self.check_definitely_init(inst) != DiKind::Yes {
            self.diagnose_init_error(inst, DiagnosticCode::UsedBeforeInitialized);
        }
    }

    fn handle_store_use(&mut self, use_index: usize, inst: InstId, is_partial: bool) {
        // Full-object initializations the IR producer only emits where they
        // are known valid need no checking; partial stores always get one.
        if !is_partial {
            match self.func.inst(inst).kind {
                // Assigns always reach the check; it picks init vs overwrite.
                InstructionKind::Assign { .. } => {}
                // Copies already marked as initializations are trusted.
                InstructionKind::CopyAddr { is_init: true, .. }
                | InstructionKind::StoreWeak { is_init: true, .. } => return,
                // Unmarked copies reach the check to have their bit decided.
                InstructionKind::CopyAddr { .. } | InstructionKind::StoreWeak { .. } => {}
                // Existential and enum initializations are only formed on
                // fresh storage, and plain stores are trusted outright.
                _ => return,
            }
        }

        let di = self.check_definitely_init(inst);

        if is_partial && di != DiKind::Yes {
            self.diagnose_init_error(inst, DiagnosticCode::StructNotFullyInitialized);
            return;
        }

        if di == DiKind::Partial {
            self.diagnose_init_error(inst, DiagnosticCode::InitializedOnSomePaths);
            return;
        }

        match self.func.inst(inst).kind {
            InstructionKind::CopyAddr { .. } => {
                if let InstructionKind::CopyAddr { is_init, .. } = &mut self.func.inst_mut(inst).kind
                {
                    *is_init = di == DiKind::No;
                }
                self.stats.init_flags_set += 1;
            }
            InstructionKind::StoreWeak { .. } => {
                if let InstructionKind::StoreWeak { is_init, .. } =
                    &mut self.func.inst_mut(inst).kind
                {
                    *is_init = di == DiKind::No;
                }
                self.stats.init_flags_set += 1;
            }
            InstructionKind::Assign { .. } => {
                self.non_load_uses.remove(&inst);
                let inserted = scalarize::lower_assign(
                    self.func,
                    inst,
                    di == DiKind::No,
                    self.lowering,
                    self.stats,
                );
                self.uses[use_index].inst = None;

                // Register the stores and loads the lowering introduced so
                // later uses in this element see them in the dataflow.
                for new_inst in inserted {
                    match self.func.inst(new_inst).kind {
                        InstructionKind::Store { .. } => {
                            self.non_load_uses.insert(new_inst);
                            self.uses.push(ElementUse {
                                inst: Some(new_inst),
                                kind: UseKind::Store,
                            });
                        }
                        InstructionKind::Load { .. } => {
                            self.uses.push(ElementUse {
                                inst: Some(new_inst),
                                kind: UseKind::Load,
                            });
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    fn handle_inout_use(&mut self, inst: InstId) {
        if self.check_definitely_init(inst) != DiKind::Yes {
            self.diagnose_init_error(inst, DiagnosticCode::InOutBeforeInitialized);
        }
    }

    fn handle_escape(&mut self, inst: InstId) {
        if self.check_definitely_init(inst) == DiKind::Yes {
            return;
        }
        let code = if matches!(
            self.func.inst(inst).kind,
            InstructionKind::MarkFunctionEscape { .. }
        ) {
            DiagnosticCode::GlobalFunctionUseUninitialized
        } else {
            DiagnosticCode::EscapeBeforeInitialized
        };
        self.diagnose_init_error(inst, code);
    }

    /// A release may be the last use of a partially initialized aggregate;
    /// requiring full initialization at every release keeps destruction
    /// unambiguous.
    fn handle_release(&mut self, inst: InstId) {
        if self.check_definitely_init(inst) != DiKind::Yes {
            self.diagnose_init_error(inst, DiagnosticCode::DestroyedBeforeInitialized);
        }
    }

    // --- The DI check ---

    /// Determines whether the element is definitely initialized just before
    /// `inst`.
    fn check_definitely_init(&mut self, inst: InstId) -> DiKind {
        let block = self.func.parent_block(inst);

        // With a non-load use in this block, the nearest one above the use
        // is decisive: the allocation sentinel means nothing has defined the
        // element yet, anything else has produced or checked a definition.
        if self
            .per_block
            .get(&block)
            .is_some_and(|state| state.has_non_load_use)
        {
            let position = self
                .func
                .position_in_block(inst)
                .expect("use is not in a block");
            for i in (0..position).rev() {
                let candidate = self.func.blocks[block].insts[i];
                if !self.non_load_uses.contains(&candidate) {
                    continue;
                }
                return if candidate == self.root {
                    DiKind::No
                } else {
                    DiKind::Yes
                };
            }
        }

        // Otherwise the element must be live-out of every predecessor.
        let preds = self.func.blocks[block].preds.clone();
        for pred in preds {
            if !self.is_live_out(pred) {
                return DiKind::No;
            }
        }
        DiKind::Yes
    }

    fn is_live_out(&mut self, block: BlockId) -> bool {
        match self.per_block.entry(block).or_default().availability {
            Availability::NotLiveOut => return false,
            Availability::LiveOut => return true,
            // Speculate that cyclic paths are live-out; a definite "no"
            // from any other path overrides the speculation.
            Availability::Computing => return true,
            Availability::Unknown => {}
        }

        self.per_block.get_mut(&block).unwrap().availability = Availability::Computing;

        let preds = self.func.blocks[block].preds.clone();
        for pred in preds {
            if !self.is_live_out(pred) {
                self.per_block.get_mut(&block).unwrap().availability = Availability::NotLiveOut;
                return false;
            }
        }

        self.per_block.get_mut(&block).unwrap().availability = Availability::LiveOut;
        true
    }

    // --- Diagnostics ---

    fn diagnose_init_error(&mut self, use_inst: InstId, code: DiagnosticCode) {
        self.had_error = true;

        let mut name = self.root_variable_name();
        layout::path_string_to_element(&self.memory_ty, self.element, &mut name);

        let span = self
            .func
            .inst(use_inst)
            .span
            .unwrap_or_else(|| SimpleSpan::from(0..0));
        let def_span = self
            .func
            .inst(self.root)
            .span
            .unwrap_or_else(|| SimpleSpan::from(0..0));

        self.diagnostics.add(
            Diagnostic::error(code, message_for(code, &name))
                .with_location(span)
                .with_related_span(def_span, "variable defined here".to_string()),
        );
    }

    fn root_variable_name(&self) -> String {
        let kind = &self.func.inst(self.root).kind;
        let mut candidates = Vec::new();
        match kind {
            InstructionKind::BoxAlloc {
                box_dest,
                addr_dest,
                ..
            } => {
                candidates.push(*addr_dest);
                candidates.push(*box_dest);
            }
            InstructionKind::StackAlloc {
                slot_dest,
                addr_dest,
                ..
            } => {
                candidates.push(*addr_dest);
                candidates.push(*slot_dest);
            }
            InstructionKind::MarkUninitialized { dest, .. } => candidates.push(*dest),
            _ => {}
        }
        candidates
            .into_iter()
            .find_map(|value| self.func.value_names.get(&value).cloned())
            .unwrap_or_else(|| "<unknown>".to_string())
    }

    // --- Phase 2: load promotion ---

    fn promote_load(&mut self, inst: InstId) {
        // Weak loads are never forwarded: the referent may be deallocated
        // between the store and the load. Only plain loads qualify.
        let InstructionKind::Load {
            dest,
            ty: load_ty,
            address,
        } = self.func.inst(inst).kind.clone()
        else {
            return;
        };

        // Promotion is disabled everywhere once the value escapes anywhere.
        if self.has_any_escape {
            return;
        }

        let first_elt = resolve_access_path(self.func, address, self.root)
            .expect("failed to compute an access path to the allocation");

        let demanded = layout::sub_element_count(&load_ty);
        let mut required = vec![false; self.num_memory_sub_elements];
        for bit in required[first_elt..first_elt + demanded].iter_mut() {
            *bit = true;
        }
        let mut available: Vec<Option<(Value, usize)>> = vec![None; self.num_memory_sub_elements];

        if !self.compute_available_values(inst, &mut required, &mut available) {
            // Nothing available; leave the load in place.
            return;
        }

        let forwarded = {
            let mut builder = InstBuilder::before(self.func, inst);
            aggregate_available_values(&mut builder, &load_ty, Some(address), &available, first_elt)
        };

        log::debug!(
            "promoting load: {} -> {}",
            self.func.inst(inst).pretty_print(0),
            forwarded.pretty_print(0)
        );

        self.func.replace_all_uses(dest, forwarded);
        self.func.erase_inst(inst);
        scalarize::remove_dead_projections(self.func, address);
        self.stats.loads_promoted += 1;
    }

    /// Scans backward from `from` collecting stored values for the demanded
    /// sub-elements. Returns true if at least one value was found (or the
    /// demand was empty); cross-block propagation is not performed.
    fn compute_available_values(
        &mut self,
        from: InstId,
        required: &mut [bool],
        available: &mut [Option<(Value, usize)>],
    ) -> bool {
        // A load of a zero-element aggregate demands nothing.
        if required.iter().all(|bit| !bit) {
            return true;
        }

        let block = self.func.parent_block(from);
        let mut found_some = false;

        if self
            .per_block
            .get(&block)
            .is_some_and(|state| state.has_non_load_use)
        {
            let position = self
                .func
                .position_in_block(from)
                .expect("load is not in a block");
            for i in (0..position).rev() {
                let candidate = self.func.blocks[block].insts[i];
                if !self.non_load_uses.contains(&candidate) {
                    continue;
                }
                found_some |= self.update_available_values(candidate, required, available);
                if required.iter().all(|bit| !bit) {
                    return found_some;
                }
            }
        }

        found_some
    }

    /// Folds one non-load use into the available-value table. Stores and
    /// assigns provide values; anything else conservatively clobbers the
    /// remaining demand.
    fn update_available_values(
        &mut self,
        inst: InstId,
        required: &mut [bool],
        available: &mut [Option<(Value, usize)>],
    ) -> bool {
        match self.func.inst(inst).kind.clone() {
            InstructionKind::Store { value, ty, address }
            | InstructionKind::Assign { value, ty, address } => {
                let start = resolve_access_path(self.func, address, self.root)
                    .expect("store address does not reach the allocation");
                let mut produced = false;
                for i in 0..layout::sub_element_count(&ty) {
                    if !required[start + i] {
                        continue;
                    }
                    available[start + i] = Some((value, i));
                    required[start + i] = false;
                    produced = true;
                }
                produced
            }
            _ => {
                for bit in required.iter_mut() {
                    *bit = false;
                }
                false
            }
        }
    }
}

fn any_missing(first: usize, count: usize, available: &[Option<(Value, usize)>]) -> bool {
    available[first..first + count]
        .iter()
        .any(|slot| slot.is_none())
}

/// Builds a value of `load_ty` from the available sub-element values,
/// emitting element loads for any that are missing and tuple/struct
/// constructors to reassemble aggregates.
fn aggregate_available_values(
    builder: &mut InstBuilder<'_>,
    load_ty: &Type,
    address: Option<crate::ValueId>,
    available: &[Option<(Value, usize)>],
    first_elt: usize,
) -> Value {
    let demanded = layout::sub_element_count(load_ty);

    // Fully-available fast path: a single stored value covering the whole
    // demand (the common case for scalars and whole-aggregate stores).
    if first_elt < available.len() {
        if let Some((first_val, 0)) = available[first_elt] {
            if builder.type_of_value(&first_val) == *load_ty
                && (0..demanded).all(|i| available[first_elt + i] == Some((first_val, i)))
            {
                return first_val;
            }
        }
    }

    match load_ty {
        Type::Tuple(elements) => {
            let mut result = Vec::with_capacity(elements.len());
            let mut first = first_elt;
            for (element_no, element_ty) in elements.iter().enumerate() {
                let count = layout::sub_element_count(element_ty);
                let element_addr = if any_missing(first, count, available) {
                    let base = address.expect("missing sub-elements without an address");
                    Some(builder.tuple_element_ptr(base, element_no))
                } else {
                    None
                };
                result.push(aggregate_available_values(
                    builder,
                    element_ty,
                    element_addr,
                    available,
                    first,
                ));
                first += count;
            }
            Value::operand(builder.make_tuple(load_ty.clone(), result))
        }
        Type::Struct { fields, .. } => {
            let fields: Vec<(String, Type)> = fields.clone();
            let mut result = Vec::with_capacity(fields.len());
            let mut first = first_elt;
            for (field_name, field_ty) in &fields {
                let count = layout::sub_element_count(field_ty);
                let field_addr = if any_missing(first, count, available) {
                    let base = address.expect("missing sub-elements without an address");
                    Some(builder.struct_field_ptr(base, field_name))
                } else {
                    None
                };
                result.push(aggregate_available_values(
                    builder,
                    field_ty,
                    field_addr,
                    available,
                    first,
                ));
                first += count;
            }
            Value::operand(builder.make_struct(load_ty.clone(), result))
        }
        _ => match available[first_elt] {
            Some((value, sub_element)) => extract_sub_element(builder, value, sub_element),
            None => {
                let base = address.expect("no available value and no address to load from");
                Value::operand(builder.load(load_ty.clone(), base))
            }
        },
    }
}

/// Descends into an aggregate value extracting the primitive at the given
/// flat sub-element index
fn extract_sub_element(builder: &mut InstBuilder<'_>, value: Value, mut sub_element: usize) -> Value {
    let ty = builder.type_of_value(&value);
    match ty {
        Type::Tuple(elements) => {
            for (element_no, element_ty) in elements.iter().enumerate() {
                let count = layout::sub_element_count(element_ty);
                if sub_element < count {
                    let extracted = builder.extract_tuple_element(value, element_no);
                    return extract_sub_element(builder, Value::operand(extracted), sub_element);
                }
                sub_element -= count;
            }
            panic!("sub-element index out of range for tuple");
        }
        Type::Struct { fields, .. } => {
            for (field_name, field_ty) in &fields {
                let count = layout::sub_element_count(field_ty);
                if sub_element < count {
                    let extracted = builder.extract_struct_field(value, field_name);
                    return extract_sub_element(builder, Value::operand(extracted), sub_element);
                }
                sub_element -= count;
            }
            panic!("sub-element index out of range for struct");
        }
        _ => {
            assert_eq!(sub_element, 0, "sub-element index into a primitive");
            value
        }
    }
}

fn message_for(code: DiagnosticCode, name: &str) -> String {
    match code {
        DiagnosticCode::UsedBeforeInitialized => {
            format!("variable '{name}' used before being initialized")
        }
        DiagnosticCode::InOutBeforeInitialized => {
            format!("variable '{name}' passed as inout before being initialized")
        }
        DiagnosticCode::EscapeBeforeInitialized => {
            format!("variable '{name}' captured before being initialized")
        }
        DiagnosticCode::DestroyedBeforeInitialized => {
            format!("variable '{name}' destroyed before being initialized")
        }
        DiagnosticCode::InitializedOnSomePaths => {
            format!("variable '{name}' initialized on some paths but not others")
        }
        DiagnosticCode::StructNotFullyInitialized => {
            format!("struct '{name}' must be fully initialized before a member store")
        }
        DiagnosticCode::GlobalFunctionUseUninitialized => {
            format!("variable '{name}' used by a function before being initialized")
        }
        DiagnosticCode::VariableDefinedHere => "variable defined here".to_string(),
    }
}
