//! IR type definitions.
//!
//! Types live in an arena owned by [`Module`](super::Module) and are addressed
//! by [`TypeId`]. Primitive types occupy the first thirteen arena slots, so a
//! primitive's `TypeId` equals its canonical wire id.

use std::fmt;

/// Handle to a type in a module's type arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// The built-in types, numbered by their canonical wire id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum PrimitiveType {
    Void = 0,
    Bool = 1,
    UByte = 2,
    SByte = 3,
    UShort = 4,
    Short = 5,
    UInt = 6,
    Int = 7,
    ULong = 8,
    Long = 9,
    Float = 10,
    Double = 11,
    Label = 12,
}

/// First type id available to derived types.
pub const FIRST_DERIVED: u32 = 13;

impl PrimitiveType {
    pub const ALL: [PrimitiveType; 13] = [
        PrimitiveType::Void,
        PrimitiveType::Bool,
        PrimitiveType::UByte,
        PrimitiveType::SByte,
        PrimitiveType::UShort,
        PrimitiveType::Short,
        PrimitiveType::UInt,
        PrimitiveType::Int,
        PrimitiveType::ULong,
        PrimitiveType::Long,
        PrimitiveType::Float,
        PrimitiveType::Double,
        PrimitiveType::Label,
    ];

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn type_id(self) -> TypeId {
        TypeId(self as u32)
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            PrimitiveType::UByte
                | PrimitiveType::SByte
                | PrimitiveType::UShort
                | PrimitiveType::Short
                | PrimitiveType::UInt
                | PrimitiveType::Int
                | PrimitiveType::ULong
                | PrimitiveType::Long
        )
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            PrimitiveType::SByte | PrimitiveType::Short | PrimitiveType::Int | PrimitiveType::Long
        )
    }

    /// Width in bits of an integer type.
    pub fn bits(self) -> Option<u32> {
        match self {
            PrimitiveType::Bool => Some(1),
            PrimitiveType::UByte | PrimitiveType::SByte => Some(8),
            PrimitiveType::UShort | PrimitiveType::Short => Some(16),
            PrimitiveType::UInt | PrimitiveType::Int | PrimitiveType::Float => Some(32),
            PrimitiveType::ULong | PrimitiveType::Long | PrimitiveType::Double => Some(64),
            PrimitiveType::Void | PrimitiveType::Label => None,
        }
    }

    /// Void and labels have no zero value.
    pub fn has_null(self) -> bool {
        !matches!(self, PrimitiveType::Void | PrimitiveType::Label)
    }

    pub fn name(self) -> &'static str {
        match self {
            PrimitiveType::Void => "void",
            PrimitiveType::Bool => "bool",
            PrimitiveType::UByte => "ubyte",
            PrimitiveType::SByte => "sbyte",
            PrimitiveType::UShort => "ushort",
            PrimitiveType::Short => "short",
            PrimitiveType::UInt => "uint",
            PrimitiveType::Int => "int",
            PrimitiveType::ULong => "ulong",
            PrimitiveType::Long => "long",
            PrimitiveType::Float => "float",
            PrimitiveType::Double => "double",
            PrimitiveType::Label => "label",
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Structure of one type.
///
/// Child handles may point at types that were later refined into another
/// type; always go through [`Module::resolve`](super::Module::resolve) before
/// comparing them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeNode {
    Primitive(PrimitiveType),
    Pointer(TypeId),
    Array {
        element: TypeId,
        len: u64,
    },
    Struct {
        fields: Vec<TypeId>,
    },
    Function {
        ret: TypeId,
        params: Vec<TypeId>,
        vararg: bool,
    },
    /// Stand-in for a type whose body has not been seen yet.
    Opaque,
}

impl TypeNode {
    pub fn is_opaque(&self) -> bool {
        matches!(self, TypeNode::Opaque)
    }

    /// Every child handle, in declaration order.
    pub fn children(&self) -> Vec<TypeId> {
        match self {
            TypeNode::Primitive(_) | TypeNode::Opaque => Vec::new(),
            TypeNode::Pointer(t) => vec![*t],
            TypeNode::Array { element, .. } => vec![*element],
            TypeNode::Struct { fields } => fields.clone(),
            TypeNode::Function { ret, params, .. } => {
                let mut out = Vec::with_capacity(params.len() + 1);
                out.push(*ret);
                out.extend_from_slice(params);
                out
            }
        }
    }

    /// Children that are stored inline (not behind a pointer).
    pub fn by_value_children(&self) -> &[TypeId] {
        match self {
            TypeNode::Array { element, .. } => std::slice::from_ref(element),
            TypeNode::Struct { fields } => fields,
            _ => &[],
        }
    }

    /// Same node with every child handle passed through `f`.
    pub fn map_children(&self, mut f: impl FnMut(TypeId) -> TypeId) -> TypeNode {
        match self {
            TypeNode::Primitive(p) => TypeNode::Primitive(*p),
            TypeNode::Opaque => TypeNode::Opaque,
            TypeNode::Pointer(t) => TypeNode::Pointer(f(*t)),
            TypeNode::Array { element, len } => TypeNode::Array {
                element: f(*element),
                len: *len,
            },
            TypeNode::Struct { fields } => TypeNode::Struct {
                fields: fields.iter().map(|t| f(*t)).collect(),
            },
            TypeNode::Function {
                ret,
                params,
                vararg,
            } => TypeNode::Function {
                ret: f(*ret),
                params: params.iter().map(|t| f(*t)).collect(),
                vararg: *vararg,
            },
        }
    }
}

/// An arena slot: either a concrete node or a redirect left behind when an
/// opaque type was refined into an already existing type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TypeEntry {
    Defined(TypeNode),
    Forward(TypeId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_ids_are_dense() {
        for (i, p) in PrimitiveType::ALL.iter().enumerate() {
            assert_eq!(p.id() as usize, i);
            assert_eq!(PrimitiveType::from_id(i as u32), Some(*p));
        }
        assert_eq!(PrimitiveType::from_id(FIRST_DERIVED), None);
    }

    #[test]
    fn labels_and_void_have_no_null() {
        assert!(!PrimitiveType::Void.has_null());
        assert!(!PrimitiveType::Label.has_null());
        assert!(PrimitiveType::Bool.has_null());
        assert!(PrimitiveType::Double.has_null());
    }

    #[test]
    fn map_children_rewrites_every_handle() {
        let node = TypeNode::Function {
            ret: TypeId(20),
            params: vec![TypeId(20), TypeId(7)],
            vararg: true,
        };
        let mapped = node.map_children(|t| if t == TypeId(20) { TypeId(13) } else { t });
        assert_eq!(
            mapped,
            TypeNode::Function {
                ret: TypeId(13),
                params: vec![TypeId(13), TypeId(7)],
                vararg: true,
            }
        );
        assert_eq!(mapped.children(), vec![TypeId(13), TypeId(13), TypeId(7)]);
    }
}
