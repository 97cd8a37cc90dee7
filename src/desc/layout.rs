//! C struct layout computation
//!
//! Field offsets follow natural alignment with tail padding to the widest
//! member, matching the layout both sides of the boundary assume for raw
//! byte synchronization.

use super::types::{BaseType, Indirection, TypeDescriptor, TypeGroup};
use crate::errors::{Error, Result};

const POINTER_SIZE: usize = 8;

/// One laid-out field: its name, byte offset and descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSlot {
    pub name: String,
    pub offset: usize,
    pub desc: TypeDescriptor,
}

/// Computed layout of a struct descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct StructLayout {
    pub tag: String,
    pub size: usize,
    pub align: usize,
    pub fields: Vec<FieldSlot>,
}

impl StructLayout {
    /// Compute the layout of a `Struct` descriptor, recursing into nested
    /// structs. Fails when the descriptor is not a struct or a field has no
    /// name to address it by.
    pub fn compute(desc: &TypeDescriptor) -> Result<Self> {
        if desc.group != TypeGroup::Struct {
            return Err(Error::marshal("layout requested for non-struct descriptor"));
        }
        let tag = desc
            .struct_tag
            .clone()
            .ok_or_else(|| Error::marshal("struct descriptor without tag"))?;

        let mut fields = Vec::with_capacity(desc.fields.len());
        let mut offset = 0usize;
        let mut align = 1usize;

        for field in &desc.fields {
            let name = field
                .name
                .clone()
                .ok_or_else(|| Error::marshal(format!("unnamed field in struct '{}'", tag)))?;
            let (fsize, falign) = slot_extent(field)?;
            offset = align_up(offset, falign);
            fields.push(FieldSlot {
                name,
                offset,
                desc: field.clone(),
            });
            offset += fsize;
            align = align.max(falign);
        }

        Ok(Self {
            tag,
            size: align_up(offset, align.max(1)),
            align: align.max(1),
            fields,
        })
    }

    /// Byte offset of the field at `index`
    pub fn offset_of(&self, index: usize) -> Option<usize> {
        self.fields.get(index).map(|f| f.offset)
    }
}

/// Size and alignment of one slot as embedded in a struct
pub(crate) fn slot_extent(desc: &TypeDescriptor) -> Result<(usize, usize)> {
    // Outermost pointer level collapses everything beneath it to an address
    if let Some(Indirection::Pointer) = desc.flags.first() {
        return Ok((POINTER_SIZE, POINTER_SIZE));
    }
    if let Some(Indirection::Array(n)) = desc.flags.first() {
        let inner = TypeDescriptor {
            flags: desc.flags[1..].iter().cloned().collect(),
            ..desc.clone()
        };
        let (esize, ealign) = slot_extent(&inner)?;
        return Ok((esize * n, ealign));
    }
    match desc.group {
        TypeGroup::Fundamental => {
            let b = desc.base;
            if b == BaseType::Void {
                return Err(Error::unsupported("void"));
            }
            Ok((b.size(), b.align()))
        }
        TypeGroup::Struct => {
            let layout = StructLayout::compute(desc)?;
            Ok((layout.size, layout.align))
        }
        TypeGroup::Void => Err(Error::unsupported("void")),
        TypeGroup::Function => Err(Error::unsupported("function pointer")),
    }
}

#[inline]
fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) / align * align
}
