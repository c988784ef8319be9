//! # Type Flattening
//!
//! Centralizes the flattening arithmetic used by the memory passes: how many
//! primitive sub-elements an aggregate type decomposes into, how many tuple
//! element buckets it exposes at the allocation root, and the dotted path
//! string naming a given element for diagnostics.
//!
//! A *primitive sub-element* is a leaf of the depth-first, left-to-right
//! traversal through tuple elements and struct stored properties; enum
//! payloads and all non-aggregate types count as one primitive.

use crate::Type;

/// Number of primitive sub-elements in the flattened type.
pub fn sub_element_count(ty: &Type) -> usize {
    match ty {
        Type::Tuple(elements) => elements.iter().map(sub_element_count).sum(),
        Type::Struct { fields, .. } => fields.iter().map(|(_, ty)| sub_element_count(ty)).sum(),
        _ => 1,
    }
}

/// Number of element buckets the type exposes for use collection.
///
/// Recurses through tuple elements only: a struct is a single bucket no
/// matter how many stored properties it has, because stores into struct
/// fields are partial definitions of the struct, not independent elements.
pub fn tuple_element_count(ty: &Type) -> usize {
    match ty {
        Type::Tuple(elements) => elements.iter().map(tuple_element_count).sum(),
        _ => 1,
    }
}

/// Appends the dotted path for `element` to `out`, e.g. `.0.1`.
///
/// Descends through tuple elements only, mirroring the bucket structure of
/// [`tuple_element_count`]; a non-tuple type contributes no path component.
///
/// # Panics
///
/// Panics if `element` is out of range for the type.
pub fn path_string_to_element(ty: &Type, mut element: usize, out: &mut String) {
    let Type::Tuple(elements) = ty else {
        debug_assert_eq!(element, 0, "element number out of range for leaf type");
        return;
    };

    for (field_no, field_ty) in elements.iter().enumerate() {
        let elements_for_field = tuple_element_count(field_ty);
        if element < elements_for_field {
            out.push('.');
            out.push_str(&field_no.to_string());
            return path_string_to_element(field_ty, element, out);
        }
        element -= elements_for_field;
    }
    panic!("element number is out of range for this type");
}
