//! Scalar base types and the recursive slot descriptor

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Shape class of a described slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeGroup {
    Fundamental,
    Struct,
    Void,
    Function,
}

/// Canonical scalar type enumeration
///
/// `UsizePtr` is the raw pointer-sized integer; `F80` is the extended-width
/// long double, representable in descriptors but not dispatchable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BaseType {
    Void,
    Bool,
    Char,
    WChar,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    F80,
    UsizePtr,
}

impl BaseType {
    /// Size of the scalar in bytes
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Self::Void => 0,
            Self::Bool | Self::Char | Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::WChar | Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 | Self::UsizePtr => 8,
            Self::F80 => 16,
        }
    }

    /// Alignment requirement
    #[inline]
    pub const fn align(self) -> usize {
        self.size()
    }

    #[inline]
    pub const fn is_integral(self) -> bool {
        matches!(
            self,
            Self::Bool
                | Self::Char
                | Self::WChar
                | Self::I8
                | Self::I16
                | Self::I32
                | Self::I64
                | Self::U8
                | Self::U16
                | Self::U32
                | Self::U64
                | Self::UsizePtr
        )
    }

    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64 | Self::F80)
    }

    /// Canonical name, used in diagnostics
    pub const fn name(self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Bool => "bool",
            Self::Char => "char",
            Self::WChar => "wchar",
            Self::I8 => "int8",
            Self::I16 => "int16",
            Self::I32 => "int32",
            Self::I64 => "int64",
            Self::U8 => "uint8",
            Self::U16 => "uint16",
            Self::U32 => "uint32",
            Self::U64 => "uint64",
            Self::F32 => "float",
            Self::F64 => "double",
            Self::F80 => "longdouble",
            Self::UsizePtr => "size_t",
        }
    }
}

/// One indirection level, applied outer-to-inner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Indirection {
    Pointer,
    /// Fixed-length array of N elements, N > 0
    Array(usize),
}

/// Indirection chain; empty means the payload is passed by value
pub type Flags = SmallVec<[Indirection; 2]>;

/// Describes one argument, return or field slot
///
/// `flags` and `group` together determine how many indirections must be
/// stripped before reaching the fundamental or struct payload. A `Void`
/// group carrying a pointer flag is an untyped buffer, resolvable only
/// through a memory-sync directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub group: TypeGroup,
    pub base: BaseType,
    pub flags: Flags,
    /// Field or parameter name; irrelevant for positional slots
    pub name: Option<String>,
    /// Ordered children, present only for `Struct`; field order is significant
    pub fields: Vec<TypeDescriptor>,
    /// Key into the session struct-type registry, used when materializing
    /// a concrete instance during unpacking
    pub struct_tag: Option<String>,
}

impl TypeDescriptor {
    /// Plain scalar passed by value
    pub fn fundamental(base: BaseType) -> Self {
        Self {
            group: TypeGroup::Fundamental,
            base,
            flags: Flags::new(),
            name: None,
            fields: Vec::new(),
            struct_tag: None,
        }
    }

    /// Struct described by its ordered fields
    pub fn structure(tag: impl Into<String>, fields: Vec<TypeDescriptor>) -> Self {
        Self {
            group: TypeGroup::Struct,
            base: BaseType::Void,
            flags: Flags::new(),
            name: None,
            fields,
            struct_tag: Some(tag.into()),
        }
    }

    /// The void return type
    pub fn void() -> Self {
        Self {
            group: TypeGroup::Void,
            base: BaseType::Void,
            flags: Flags::new(),
            name: None,
            fields: Vec::new(),
            struct_tag: None,
        }
    }

    /// Untyped pointer (`void *`), only meaningful under a sync directive
    pub fn untyped_pointer() -> Self {
        Self::void().pointer()
    }

    /// Wrap in one level of pointer indirection (outermost)
    pub fn pointer(mut self) -> Self {
        self.flags.insert(0, Indirection::Pointer);
        self
    }

    /// Wrap in a fixed-length array level (outermost)
    pub fn array(mut self, len: usize) -> Self {
        self.flags.insert(0, Indirection::Array(len));
        self
    }

    /// Attach a field/parameter name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether the outermost indirection makes this a by-reference slot
    #[inline]
    pub fn is_indirect(&self) -> bool {
        !self.flags.is_empty()
    }

    /// Whether any flag level is a pointer
    #[inline]
    pub fn has_pointer(&self) -> bool {
        self.flags.iter().any(|f| matches!(f, Indirection::Pointer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_type_sizes() {
        assert_eq!(BaseType::I8.size(), 1);
        assert_eq!(BaseType::I16.size(), 2);
        assert_eq!(BaseType::WChar.size(), 4);
        assert_eq!(BaseType::F64.size(), 8);
        assert_eq!(BaseType::UsizePtr.size(), 8);
    }

    #[test]
    fn base_type_classes() {
        assert!(BaseType::Bool.is_integral());
        assert!(BaseType::UsizePtr.is_integral());
        assert!(BaseType::F32.is_float());
        assert!(!BaseType::F64.is_integral());
    }

    #[test]
    fn flags_order_outer_to_inner() {
        // pointer-to-array-of-4
        let desc = TypeDescriptor::fundamental(BaseType::I32).array(4).pointer();
        assert_eq!(desc.flags[0], Indirection::Pointer);
        assert_eq!(desc.flags[1], Indirection::Array(4));
        assert!(desc.has_pointer());
    }

    #[test]
    fn descriptor_roundtrip_serde() {
        let desc = TypeDescriptor::structure(
            "pair",
            vec![
                TypeDescriptor::fundamental(BaseType::I32).named("a"),
                TypeDescriptor::fundamental(BaseType::F64).named("b"),
            ],
        )
        .pointer();
        let json = serde_json::to_string(&desc).unwrap();
        let back: TypeDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(desc, back);
    }
}
