//! Aggregate scalarization and assign lowering.
//!
//! Aggregate loads, stores, and assigns on tuple-typed addresses are
//! decomposed into per-element operations on element addresses, so the rest
//! of the pass only ever sees accesses that touch a single element bucket.
//! Assign lowering turns the abstract `assign` into a concrete store or a
//! load/store/destroy sequence once the initialization state is known.

use smallvec::SmallVec;

use crate::{
    Function, InstBuilder, InstId, InstructionKind, PrettyPrint, Type, TypeLowering, Value, ValueId,
};

use super::DefiniteInitStats;

/// Emits one element address per field of the aggregate pointed to by
/// `pointer`, immediately after its defining instruction. Returns the new
/// projection instructions in field order.
pub(super) fn element_addresses(function: &mut Function, pointer: ValueId) -> Vec<InstId> {
    let def = function
        .defining_inst(pointer)
        .expect("scalarized address has no defining instruction");
    let pointee = function.pointee_type(pointer).clone();
    let mut builder = InstBuilder::after(function, def);
    match &pointee {
        Type::Tuple(elements) => {
            for index in 0..elements.len() {
                builder.tuple_element_ptr(pointer, index);
            }
        }
        Type::Struct { fields, .. } => {
            let names: Vec<String> = fields.iter().map(|(name, _)| name.clone()).collect();
            for name in &names {
                builder.struct_field_ptr(pointer, name);
            }
        }
        other => panic!("cannot scalarize non-aggregate type {other}"),
    }
    builder.inserted().to_vec()
}

/// The address produced by an element projection
pub(super) fn projection_dest(function: &Function, projection: InstId) -> ValueId {
    match &function.inst(projection).kind {
        InstructionKind::TupleElementPtr { dest, .. }
        | InstructionKind::StructFieldPtr { dest, .. } => *dest,
        other => panic!("not an element projection: {other:?}"),
    }
}

/// Splits an aggregate load into per-element loads and reconstructs the
/// aggregate with a tuple/struct constructor. The original load is erased and
/// its uses rewritten to the reconstruction.
pub(super) fn scalarize_load(
    function: &mut Function,
    load: InstId,
    element_addrs: &[InstId],
    stats: &mut DefiniteInitStats,
) {
    let InstructionKind::Load { dest, ty, .. } = function.inst(load).kind.clone() else {
        panic!("scalarize_load on a non-load");
    };
    let element_values: Vec<ValueId> = element_addrs
        .iter()
        .map(|&addr_inst| projection_dest(function, addr_inst))
        .collect();

    let mut builder = InstBuilder::before(function, load);
    let mut loaded: SmallVec<[Value; 4]> = SmallVec::new();
    for element_addr in element_values {
        let element_ty = builder.func().pointee_type(element_addr).clone();
        loaded.push(Value::operand(builder.load(element_ty, element_addr)));
    }
    let aggregate = match &ty {
        Type::Tuple(_) => builder.make_tuple(ty.clone(), loaded.to_vec()),
        Type::Struct { .. } => builder.make_struct(ty.clone(), loaded.to_vec()),
        other => panic!("cannot scalarize load of non-aggregate type {other}"),
    };

    function.replace_all_uses(dest, Value::operand(aggregate));
    function.erase_inst(load);
    stats.scalarized_aggregates += 1;
}

/// Splits an aggregate store or assign into per-element stores or assigns
pub(super) fn scalarize_store_or_assign(
    function: &mut Function,
    inst: InstId,
    element_addrs: &[InstId],
    stats: &mut DefiniteInitStats,
) {
    let (value, ty, is_assign) = match function.inst(inst).kind.clone() {
        InstructionKind::Store { value, ty, .. } => (value, ty, false),
        InstructionKind::Assign { value, ty, .. } => (value, ty, true),
        other => panic!("cannot scalarize {other:?}"),
    };
    let element_values: Vec<ValueId> = element_addrs
        .iter()
        .map(|&addr_inst| projection_dest(function, addr_inst))
        .collect();

    let mut builder = InstBuilder::before(function, inst);
    let elements = scalarized_element_values(&mut builder, value, &ty);
    debug_assert_eq!(elements.len(), element_values.len());
    for (element, element_addr) in elements.into_iter().zip(element_values) {
        let element_ty = builder.func().pointee_type(element_addr).clone();
        if is_assign {
            builder.assign(element, element_ty, element_addr);
        } else {
            builder.store(element, element_ty, element_addr);
        }
    }
    function.erase_inst(inst);
    stats.scalarized_aggregates += 1;
}

/// Decomposes an aggregate value into its element values. When the value is
/// itself a tuple/struct constructor its operands are forwarded directly;
/// otherwise extraction instructions are emitted.
pub(super) fn scalarized_element_values(
    builder: &mut InstBuilder<'_>,
    value: Value,
    aggregate_ty: &Type,
) -> SmallVec<[Value; 4]> {
    if let Some(id) = value.as_operand() {
        if let Some(def) = builder.func().defining_inst(id) {
            match &builder.func().inst(def).kind {
                InstructionKind::MakeTuple { elements, .. } => {
                    return elements.iter().copied().collect();
                }
                InstructionKind::MakeStruct { fields, .. } => {
                    return fields.iter().copied().collect();
                }
                _ => {}
            }
        }
    }

    let mut elements = SmallVec::new();
    match aggregate_ty {
        Type::Tuple(field_types) => {
            for index in 0..field_types.len() {
                elements.push(Value::operand(builder.extract_tuple_element(value, index)));
            }
        }
        Type::Struct { fields, .. } => {
            let names: Vec<String> = fields.iter().map(|(name, _)| name.clone()).collect();
            for name in &names {
                elements.push(Value::operand(builder.extract_struct_field(value, name)));
            }
        }
        other => panic!("cannot decompose non-aggregate type {other}"),
    }
    elements
}

/// Lowers an `assign` now that its initialization state is known. An
/// initialization (or a store of a trivially-copyable type) becomes a plain
/// store; an overwrite reloads the previous occupant, stores the new value,
/// and destroys the old one. The `+1` ownership of the source transfers into
/// the storage.
///
/// Returns the inserted instructions so the caller can register the new
/// loads and stores as uses.
pub(super) fn lower_assign(
    function: &mut Function,
    assign: InstId,
    is_init: bool,
    lowering: &dyn TypeLowering,
    stats: &mut DefiniteInitStats,
) -> Vec<InstId> {
    let InstructionKind::Assign { value, ty, address } = function.inst(assign).kind.clone() else {
        panic!("lower_assign on a non-assign");
    };
    log::debug!(
        "lowering [init={is_init}]: {}",
        function.inst(assign).pretty_print(0)
    );

    let mut builder = InstBuilder::before(function, assign);
    if is_init || lowering.is_trivial(&ty) {
        builder.store(value, ty, address);
    } else {
        let previous = builder.load(ty.clone(), address);
        builder.store(value, ty.clone(), address);
        lowering.emit_destroy_value(&mut builder, Value::operand(previous), &ty);
    }
    let inserted = builder.inserted().to_vec();
    function.erase_inst(assign);
    stats.assigns_rewritten += 1;
    inserted
}

/// Erases a chain of element-address projections made dead by removing a
/// load, walking upward until a projection with remaining users or a
/// non-projection is reached.
pub(super) fn remove_dead_projections(function: &mut Function, mut address: ValueId) {
    loop {
        if !function.uses_of(address).is_empty() {
            return;
        }
        let Some(def) = function.defining_inst(address) else {
            return;
        };
        match function.inst(def).kind {
            InstructionKind::TupleElementPtr { base, .. }
            | InstructionKind::StructFieldPtr { base, .. } => {
                function.erase_inst(def);
                address = base;
            }
            _ => return,
        }
    }
}
