//! Transitive use collection for an allocation's address.
//!
//! Walks every use reachable from the address result of an allocation root,
//! classifies it, and buckets it by the tuple element it touches. Aggregate
//! loads, stores, and assigns on tuple-typed addresses are scheduled for
//! scalarization and the freshly created element addresses are re-walked.
//!
//! Two traversal flags ride along as explicit recursion arguments so they
//! are restored on every exit path: `in_struct` while inside a struct field
//! projection and `in_enum` while inside an enum payload. Either flag pins
//! the walk to a single element bucket and turns stores into partial stores.

use crate::{layout, Function, InstId, InstructionKind, ParamConvention, PrettyPrint, Type, ValueId};

use super::{scalarize, DefiniteInitStats, ElementUse, ElementUses, UseKind};

pub(super) struct UseCollector<'a> {
    func: &'a mut Function,
    uses: Vec<ElementUses>,
    stats: &'a mut DefiniteInitStats,
}

impl<'a> UseCollector<'a> {
    pub(super) fn new(
        func: &'a mut Function,
        num_buckets: usize,
        stats: &'a mut DefiniteInitStats,
    ) -> Self {
        Self {
            func,
            uses: vec![Vec::new(); num_buckets],
            stats,
        }
    }

    /// Walks the use list of `pointer` and returns the per-bucket use lists
    pub(super) fn collect(mut self, pointer: ValueId) -> Vec<ElementUses> {
        self.collect_uses(pointer, 0, false, false);
        self.uses
    }

    fn record(&mut self, bucket: usize, inst: InstId, kind: UseKind) {
        self.uses[bucket].push(ElementUse {
            inst: Some(inst),
            kind,
        });
    }

    /// An operation on an aggregate acts on all of its element buckets, one
    /// bucket per flattened tuple element; inside a struct or enum
    /// projection it stays pinned to the current bucket.
    fn add_element_uses(
        &mut self,
        base_elt: usize,
        use_ty: &Type,
        inst: InstId,
        kind: UseKind,
        in_struct: bool,
        in_enum: bool,
    ) {
        let slots = if in_struct || in_enum {
            1
        } else {
            layout::tuple_element_count(use_ty)
        };
        for i in 0..slots {
            self.record(base_elt + i, inst, kind);
        }
    }

    fn collect_uses(&mut self, pointer: ValueId, base_elt: usize, in_struct: bool, in_enum: bool) {
        let pointee = self.func.pointee_type(pointer).clone();

        // Instructions that touch multiple elements are scalarized in a
        // second phase so the use walk never observes its own rewrites.
        let mut to_scalarize: Vec<InstId> = Vec::new();

        for user in self.func.uses_of(pointer) {
            let kind = self.func.inst(user).kind.clone();
            match kind {
                InstructionKind::TupleElementPtr { base, .. }
                | InstructionKind::StructFieldPtr { base, .. }
                    if base == pointer =>
                {
                    self.collect_element_uses(user, base_elt, in_struct, in_enum);
                }

                InstructionKind::Load { address, .. } if address == pointer => {
                    if pointee.is_tuple() {
                        to_scalarize.push(user);
                    } else {
                        self.record(base_elt, user, UseKind::Load);
                    }
                }

                InstructionKind::LoadWeak { address, .. } if address == pointer => {
                    self.record(base_elt, user, UseKind::Load);
                }

                InstructionKind::Store { value, address, .. }
                | InstructionKind::Assign { value, address, .. }
                    if address == pointer =>
                {
                    if pointee.is_tuple() {
                        to_scalarize.push(user);
                    } else {
                        let kind = if in_struct {
                            UseKind::PartialStore
                        } else {
                            UseKind::Store
                        };
                        self.record(base_elt, user, kind);
                    }
                    // Storing the address itself somewhere else leaks it.
                    if value.as_operand() == Some(pointer) {
                        self.add_element_uses(
                            base_elt,
                            &pointee,
                            user,
                            UseKind::Escape,
                            in_struct,
                            in_enum,
                        );
                    }
                }

                InstructionKind::StoreWeak { value, address, .. } if address == pointer => {
                    // Weak storage holds a single reference; aggregates
                    // cannot be weak-stored.
                    assert!(
                        !pointee.is_tuple() && !matches!(pointee, Type::Struct { .. }),
                        "cannot weak-store a struct or tuple"
                    );
                    let kind = if in_struct {
                        UseKind::PartialStore
                    } else {
                        UseKind::Store
                    };
                    self.record(base_elt, user, kind);
                    if value.as_operand() == Some(pointer) {
                        self.add_element_uses(
                            base_elt,
                            &pointee,
                            user,
                            UseKind::Escape,
                            in_struct,
                            in_enum,
                        );
                    }
                }

                InstructionKind::CopyAddr { src, dst, .. } => {
                    // Both roles can apply when source and destination are
                    // elements of the same aggregate.
                    if src == pointer {
                        self.add_element_uses(
                            base_elt,
                            &pointee,
                            user,
                            UseKind::Load,
                            in_struct,
                            in_enum,
                        );
                    }
                    if dst == pointer {
                        let kind = if in_struct {
                            UseKind::PartialStore
                        } else {
                            UseKind::Store
                        };
                        self.add_element_uses(base_elt, &pointee, user, kind, in_struct, in_enum);
                    }
                }

                InstructionKind::InitializeVar { address } if address == pointer => {
                    let kind = if in_struct {
                        UseKind::PartialStore
                    } else {
                        UseKind::Store
                    };
                    self.add_element_uses(base_elt, &pointee, user, kind, in_struct, in_enum);
                }

                InstructionKind::Apply {
                    callee,
                    args,
                    conventions,
                    ..
                } => {
                    if callee.as_operand() == Some(pointer) {
                        self.add_element_uses(
                            base_elt,
                            &pointee,
                            user,
                            UseKind::Escape,
                            in_struct,
                            in_enum,
                        );
                    }
                    for (position, arg) in args.iter().enumerate() {
                        if arg.as_operand() != Some(pointer) {
                            continue;
                        }
                        match conventions.get(position) {
                            Some(ParamConvention::IndirectResult) => {
                                assert!(!in_struct, "indirect result initializing a sub-member");
                                self.add_element_uses(
                                    base_elt,
                                    &pointee,
                                    user,
                                    UseKind::Store,
                                    in_struct,
                                    in_enum,
                                );
                            }
                            Some(ParamConvention::IndirectInOut) => {
                                self.add_element_uses(
                                    base_elt,
                                    &pointee,
                                    user,
                                    UseKind::InOutUse,
                                    in_struct,
                                    in_enum,
                                );
                            }
                            // A by-value pass of the address closes over it.
                            Some(ParamConvention::Direct) | None => {
                                self.add_element_uses(
                                    base_elt,
                                    &pointee,
                                    user,
                                    UseKind::Escape,
                                    in_struct,
                                    in_enum,
                                );
                            }
                        }
                    }
                }

                InstructionKind::EnumDataPtr { dest, base } if base == pointer => {
                    assert!(
                        !in_struct && !in_enum,
                        "enum payload projection inside a sub-element"
                    );
                    self.collect_uses(dest, base_elt, in_struct, true);
                }

                InstructionKind::InitExistential { dest, container, .. }
                    if container == pointer =>
                {
                    assert!(
                        !in_struct && !in_enum,
                        "existential initialization inside a sub-element"
                    );
                    self.record(base_elt, user, UseKind::Store);
                    // Stores through the opened payload address are partial:
                    // the container is already counted as defined.
                    self.collect_uses(dest, base_elt, true, in_enum);
                }

                InstructionKind::InjectEnumAddr { address } if address == pointer => {
                    assert!(!in_struct, "enum tag injection inside a struct sub-element");
                    self.record(base_elt, user, UseKind::Store);
                }

                InstructionKind::UpcastExistential { src, dst } => {
                    if dst == pointer {
                        self.record(base_elt, user, UseKind::Store);
                    }
                    if src == pointer {
                        self.record(base_elt, user, UseKind::Load);
                    }
                }

                InstructionKind::ProjectExistential { container, .. }
                | InstructionKind::ProtocolMethod { container, .. }
                    if container == pointer =>
                {
                    self.record(base_elt, user, UseKind::Load);
                }

                // Anything else is a leak of the address.
                _ => {
                    self.add_element_uses(
                        base_elt,
                        &pointee,
                        user,
                        UseKind::Escape,
                        in_struct,
                        in_enum,
                    );
                }
            }
        }

        if to_scalarize.is_empty() {
            return;
        }

        let element_addrs = scalarize::element_addresses(self.func, pointer);
        for inst in to_scalarize {
            log::debug!("scalarizing: {}", self.func.inst(inst).pretty_print(0));
            match self.func.inst(inst).kind {
                InstructionKind::Load { .. } => {
                    scalarize::scalarize_load(self.func, inst, &element_addrs, self.stats);
                }
                InstructionKind::Store { .. } | InstructionKind::Assign { .. } => {
                    scalarize::scalarize_store_or_assign(
                        self.func,
                        inst,
                        &element_addrs,
                        self.stats,
                    );
                }
                ref other => panic!("scheduled {other:?} for scalarization"),
            }
        }

        // The rewrites hang new uses off the fresh element addresses;
        // re-walk them (bounded by the aggregate nesting depth).
        for projection in element_addrs {
            self.collect_element_uses(projection, base_elt, in_struct, in_enum);
        }
    }

    /// Recurses into a tuple/struct element projection with the element
    /// bucket adjusted for tuple indexing. Struct projections and any
    /// projection inside a struct or enum sub-element keep the current
    /// bucket.
    fn collect_element_uses(
        &mut self,
        projection: InstId,
        base_elt: usize,
        in_struct: bool,
        in_enum: bool,
    ) {
        match self.func.inst(projection).kind.clone() {
            InstructionKind::StructFieldPtr { dest, .. } => {
                self.collect_uses(dest, base_elt, true, in_enum);
            }
            InstructionKind::TupleElementPtr { dest, base, index } => {
                if in_struct || in_enum {
                    return self.collect_uses(dest, base_elt, in_struct, in_enum);
                }
                let Type::Tuple(elements) = self.func.pointee_type(base).clone() else {
                    panic!("tuple_element_ptr base is not a tuple address");
                };
                let new_base = base_elt
                    + elements[..index]
                        .iter()
                        .map(layout::tuple_element_count)
                        .sum::<usize>();
                self.collect_uses(dest, new_base, in_struct, in_enum);
            }
            other => panic!("not an element projection: {other:?}"),
        }
    }
}
