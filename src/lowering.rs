//! # Type Lowering
//!
//! The seam between the memory passes and the type system's ownership rules.
//! The passes ask a [`TypeLowering`] how to copy and destroy values of a
//! given type; they never hard-code reference-count operations themselves.

use crate::{InstBuilder, Type, Value, ValueId};

/// Emits the copy and destroy sequences for values of a type
pub trait TypeLowering {
    /// Returns true if values of the type can be stored and destroyed
    /// without reference-count operations
    fn is_trivial(&self, ty: &Type) -> bool;

    /// Loads a value out of `address` as an owned copy. A take transfers
    /// ownership out of the storage; otherwise the copy is retained.
    fn emit_load_of_copy(
        &self,
        builder: &mut InstBuilder<'_>,
        address: ValueId,
        ty: &Type,
        is_take: bool,
    ) -> ValueId;

    /// Stores an owned value into `address`. An initialization writes over
    /// dead storage; otherwise the previous occupant is destroyed.
    fn emit_store_of_copy(
        &self,
        builder: &mut InstBuilder<'_>,
        value: Value,
        address: ValueId,
        ty: &Type,
        is_init: bool,
    );

    /// Ends the lifetime of an owned value
    fn emit_destroy_value(&self, builder: &mut InstBuilder<'_>, value: Value, ty: &Type);
}

/// The standard lowering: trivial types move bitwise, everything else pairs
/// retains with releases
#[derive(Debug, Clone, Copy, Default)]
pub struct StdTypeLowering;

impl StdTypeLowering {
    pub const fn new() -> Self {
        Self
    }
}

impl TypeLowering for StdTypeLowering {
    fn is_trivial(&self, ty: &Type) -> bool {
        ty.is_trivial()
    }

    fn emit_load_of_copy(
        &self,
        builder: &mut InstBuilder<'_>,
        address: ValueId,
        ty: &Type,
        is_take: bool,
    ) -> ValueId {
        let loaded = builder.load(ty.clone(), address);
        if !is_take && !self.is_trivial(ty) {
            builder.retain_value(Value::operand(loaded));
        }
        loaded
    }

    fn emit_store_of_copy(
        &self,
        builder: &mut InstBuilder<'_>,
        value: Value,
        address: ValueId,
        ty: &Type,
        is_init: bool,
    ) {
        if is_init || self.is_trivial(ty) {
            builder.store(value, ty.clone(), address);
        } else {
            let previous = builder.load(ty.clone(), address);
            builder.store(value, ty.clone(), address);
            self.emit_destroy_value(builder, Value::operand(previous), ty);
        }
    }

    fn emit_destroy_value(&self, builder: &mut InstBuilder<'_>, value: Value, ty: &Type) {
        if !self.is_trivial(ty) {
            builder.release_value(value);
        }
    }
}
