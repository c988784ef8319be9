//! # Instruction Builder
//!
//! A positioned cursor for emitting instructions into a block. The builder
//! remembers every instruction it inserts, which the definite-initialization
//! pass uses to register the loads and stores produced by assign lowering as
//! new uses of the storage being analyzed.

use chumsky::span::SimpleSpan;

use crate::{Function, InstId, InstructionKind, Type, Value, ValueId};

/// Emits instructions at a fixed point inside a block, advancing past each
/// one it inserts
pub struct InstBuilder<'f> {
    func: &'f mut Function,
    block: crate::BlockId,
    index: usize,
    span: Option<SimpleSpan<usize>>,
    inserted: Vec<InstId>,
}

impl<'f> InstBuilder<'f> {
    /// Positions the builder immediately before `inst`, inheriting its span
    pub fn before(func: &'f mut Function, inst: InstId) -> Self {
        let block = func.parent_block(inst);
        let index = func
            .position_in_block(inst)
            .expect("cannot position a builder on an erased instruction");
        let span = func.inst(inst).span;
        Self {
            func,
            block,
            index,
            span,
            inserted: Vec::new(),
        }
    }

    /// Positions the builder immediately after `inst`, inheriting its span
    pub fn after(func: &'f mut Function, inst: InstId) -> Self {
        let mut builder = Self::before(func, inst);
        builder.index += 1;
        builder
    }

    pub fn set_span(&mut self, span: Option<SimpleSpan<usize>>) {
        self.span = span;
    }

    /// The function being built into
    pub fn func(&self) -> &Function {
        self.func
    }

    /// Instructions inserted by this builder, in emission order
    pub fn inserted(&self) -> &[InstId] {
        &self.inserted
    }

    /// The type of a literal or operand value
    pub fn type_of_value(&self, value: &Value) -> Type {
        self.func.type_of_value(value)
    }

    fn emit(&mut self, kind: InstructionKind) -> InstId {
        let id = self.func.insert_inst(self.block, self.index, kind, self.span);
        self.index += 1;
        self.inserted.push(id);
        id
    }

    pub fn load(&mut self, ty: Type, address: ValueId) -> ValueId {
        let dest = self.func.new_typed_value_id(ty.clone());
        self.emit(InstructionKind::Load { dest, ty, address });
        dest
    }

    pub fn store(&mut self, value: Value, ty: Type, address: ValueId) -> InstId {
        self.emit(InstructionKind::Store { value, ty, address })
    }

    pub fn assign(&mut self, value: Value, ty: Type, address: ValueId) -> InstId {
        self.emit(InstructionKind::Assign { value, ty, address })
    }

    pub fn retain_value(&mut self, operand: Value) -> InstId {
        self.emit(InstructionKind::RetainValue { operand })
    }

    pub fn release_value(&mut self, operand: Value) -> InstId {
        self.emit(InstructionKind::ReleaseValue { operand })
    }

    /// Emits a tuple element address; the element type is derived from the
    /// base address's pointee
    pub fn tuple_element_ptr(&mut self, base: ValueId, index: usize) -> ValueId {
        let element_ty = self
            .func
            .pointee_type(base)
            .tuple_element_type(index)
            .expect("tuple element index out of range")
            .clone();
        let dest = self.func.new_typed_value_id(Type::address(element_ty));
        self.emit(InstructionKind::TupleElementPtr { dest, base, index });
        dest
    }

    /// Emits a struct field address; the field type is derived from the base
    /// address's pointee
    pub fn struct_field_ptr(&mut self, base: ValueId, field: &str) -> ValueId {
        let field_ty = self
            .func
            .pointee_type(base)
            .field_type(field)
            .expect("unknown struct field")
            .clone();
        let dest = self.func.new_typed_value_id(Type::address(field_ty));
        self.emit(InstructionKind::StructFieldPtr {
            dest,
            base,
            field: field.to_string(),
        });
        dest
    }

    pub fn make_tuple(&mut self, ty: Type, elements: Vec<Value>) -> ValueId {
        debug_assert!(matches!(ty, Type::Tuple(_)));
        let dest = self.func.new_typed_value_id(ty);
        self.emit(InstructionKind::MakeTuple { dest, elements });
        dest
    }

    pub fn make_struct(&mut self, ty: Type, fields: Vec<Value>) -> ValueId {
        debug_assert!(matches!(ty, Type::Struct { .. }));
        let dest = self.func.new_typed_value_id(ty.clone());
        self.emit(InstructionKind::MakeStruct { dest, ty, fields });
        dest
    }

    pub fn extract_tuple_element(&mut self, tuple: Value, index: usize) -> ValueId {
        let element_ty = self
            .type_of_value(&tuple)
            .tuple_element_type(index)
            .expect("tuple element index out of range")
            .clone();
        let dest = self.func.new_typed_value_id(element_ty);
        self.emit(InstructionKind::ExtractTupleElement { dest, tuple, index });
        dest
    }

    pub fn extract_struct_field(&mut self, struct_val: Value, field: &str) -> ValueId {
        let field_ty = self
            .type_of_value(&struct_val)
            .field_type(field)
            .expect("unknown struct field")
            .clone();
        let dest = self.func.new_typed_value_id(field_ty);
        self.emit(InstructionKind::ExtractStructField {
            dest,
            struct_val,
            field: field.to_string(),
        });
        dest
    }
}
