//! The target's data-type model.
//!
//! A closed sum type mirroring the handful of DWARF type tags the
//! expression evaluator needs to walk: enough to render any C or
//! Zig-toolchain value, not a full reproduction of DWARF's type DIEs
//! (no bitfields, no variant parts, no template parameters).

use crate::target::unit::TypeNdx;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveEncoding {
    Bool,
    Signed,
    Unsigned,
    Float,
    Complex,
    String,
}

#[derive(Debug, Clone)]
pub struct Member {
    pub name_hash: Option<u64>,
    pub type_ref: Option<TypeNdx>,
    /// Byte offset from the start of the containing struct/union.
    pub offset: u64,
}

#[derive(Debug, Clone)]
pub struct Enumerator {
    pub name_hash: u64,
    pub const_value: i64,
}

#[derive(Debug, Clone)]
pub enum DataTypeKind {
    Unknown,
    Primitive {
        encoding: PrimitiveEncoding,
    },
    Pointer {
        pointee: Option<TypeNdx>,
    },
    Const {
        of: Option<TypeNdx>,
    },
    Struct {
        members: Vec<Member>,
    },
    Union {
        members: Vec<Member>,
    },
    Enum {
        underlying: Option<TypeNdx>,
        values: Vec<Enumerator>,
    },
    Array {
        element_type: Option<TypeNdx>,
        len: Option<u64>,
    },
    Typedef {
        of: Option<TypeNdx>,
    },
    Function,
}

/// A single entry in a compile unit's type arena, referenced by [`TypeNdx`]
/// rather than by pointer (§9's arena/index pattern).
#[derive(Debug, Clone)]
pub struct DataType {
    pub name_hash: Option<u64>,
    pub size_bytes: Option<u64>,
    pub kind: DataTypeKind,
}

impl DataType {
    pub fn is_pointer(&self) -> bool {
        matches!(self.kind, DataTypeKind::Pointer { .. })
    }
}

/// A local variable or parameter, referenced by [`VariableNdx`].
#[derive(Debug, Clone)]
pub struct Variable {
    pub name_hash: Option<u64>,
    pub type_ref: Option<TypeNdx>,
    /// DWARF location expression bytes (`DW_AT_location`), evaluated lazily
    /// against a live frame by the expression evaluator.
    pub location: Option<Vec<u8>>,
}
