//! # IR Type System
//!
//! A self-contained, lifetime-free type representation. It carries enough
//! structure for the memory passes: aggregate shape (tuples and structs),
//! reference-counting classification, and pointee types for addresses.

/// A type in the IR
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// Machine integer
    Int,

    /// Boolean
    Bool,

    /// Unit type (no value)
    Unit,

    /// Reference-counted class reference
    Ref(String),

    /// Weak reference to a class instance.
    ///
    /// Loads of weak storage may observe deallocation, so weak values are
    /// never forwarded by load promotion.
    Weak(Box<Type>),

    /// Existential container for a protocol
    Existential(String),

    /// Enum with an opaque payload body.
    ///
    /// The payload counts as a single primitive for flattening purposes.
    Enum { name: String, payload: Box<Type> },

    /// Tuple with element types
    Tuple(Vec<Type>),

    /// Struct with ordered stored properties
    Struct {
        name: String,
        fields: Vec<(String, Type)>,
    },

    /// Function type
    Function { params: Vec<Type>, ret: Box<Type> },

    /// Address of storage containing a value of the pointee type
    Address(Box<Type>),
}

impl Type {
    /// Creates a tuple type
    pub const fn tuple(elements: Vec<Self>) -> Self {
        Self::Tuple(elements)
    }

    /// Creates a struct type
    pub const fn struct_type(name: String, fields: Vec<(String, Self)>) -> Self {
        Self::Struct { name, fields }
    }

    /// Creates an address-of type
    pub fn address(pointee: Self) -> Self {
        Self::Address(Box::new(pointee))
    }

    /// Creates a reference type
    pub fn class_ref(name: &str) -> Self {
        Self::Ref(name.to_string())
    }

    /// Creates a weak reference type
    pub fn weak(referent: Self) -> Self {
        Self::Weak(Box::new(referent))
    }

    /// Returns true if this is an address type
    pub const fn is_address(&self) -> bool {
        matches!(self, Self::Address(_))
    }

    /// Returns the pointee type if this is an address
    pub fn pointee(&self) -> Option<&Self> {
        match self {
            Self::Address(pointee) => Some(pointee),
            _ => None,
        }
    }

    /// Returns true if this is a tuple type
    pub const fn is_tuple(&self) -> bool {
        matches!(self, Self::Tuple(_))
    }

    /// Returns the type of a tuple element by index
    pub fn tuple_element_type(&self, index: usize) -> Option<&Self> {
        match self {
            Self::Tuple(elements) => elements.get(index),
            _ => None,
        }
    }

    /// Returns the type of a struct field by name
    pub fn field_type(&self, field_name: &str) -> Option<&Self> {
        match self {
            Self::Struct { fields, .. } => fields
                .iter()
                .find(|(name, _)| name == field_name)
                .map(|(_, ty)| ty),
            _ => None,
        }
    }

    /// Returns true if values of this type can be stored and destroyed
    /// without reference-count operations.
    ///
    /// Aggregates are trivial exactly when all of their fields are.
    pub fn is_trivial(&self) -> bool {
        match self {
            Self::Int | Self::Bool | Self::Unit | Self::Function { .. } => true,
            Self::Ref(_) | Self::Weak(_) | Self::Existential(_) | Self::Enum { .. } => false,
            Self::Tuple(elements) => elements.iter().all(Self::is_trivial),
            Self::Struct { fields, .. } => fields.iter().all(|(_, ty)| ty.is_trivial()),
            // Addresses are not first-class stored values; treat as trivial.
            Self::Address(_) => true,
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int => write!(f, "int"),
            Self::Bool => write!(f, "bool"),
            Self::Unit => write!(f, "()"),
            Self::Ref(name) => write!(f, "{name}"),
            Self::Weak(referent) => write!(f, "weak {referent}"),
            Self::Existential(protocol) => write!(f, "any {protocol}"),
            Self::Enum { name, .. } => write!(f, "{name}"),
            Self::Tuple(elements) => {
                write!(f, "(")?;
                for (i, ty) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{ty}")?;
                }
                write!(f, ")")
            }
            Self::Struct { name, .. } => write!(f, "{name}"),
            Self::Function { params, ret } => {
                write!(f, "fn(")?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{param}")?;
                }
                write!(f, ") -> {ret}")
            }
            Self::Address(pointee) => write!(f, "*{pointee}"),
        }
    }
}
