//! Raw little-endian byte codecs for scalars and struct payloads
//!
//! These move values between the typed model and the flat byte images that
//! cross the process boundary and back native memory during a call.

use super::values::{CallValue, Scalar, StructInstance};
use super::wire::{WireEntry, WireValue};
use crate::desc::{BaseType, Indirection, StructLayout, TypeDescriptor, TypeGroup};
use crate::errors::{Error, Result};

/// Append a scalar's byte image
pub fn encode_scalar(value: Scalar, out: &mut Vec<u8>) {
    match value {
        Scalar::Bool(v) => out.push(v as u8),
        Scalar::Char(v) => out.push(v),
        Scalar::WChar(v) => out.extend_from_slice(&v.to_le_bytes()),
        Scalar::I8(v) => out.extend_from_slice(&v.to_le_bytes()),
        Scalar::I16(v) => out.extend_from_slice(&v.to_le_bytes()),
        Scalar::I32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Scalar::I64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Scalar::U8(v) => out.push(v),
        Scalar::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
        Scalar::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Scalar::U64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Scalar::F32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Scalar::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Scalar::Usize(v) => out.extend_from_slice(&v.to_le_bytes()),
    }
}

/// Read one scalar of `base` from the front of `bytes`
pub fn decode_scalar(base: BaseType, bytes: &[u8]) -> Option<Scalar> {
    if bytes.len() < base.size() {
        return None;
    }
    let b = bytes;
    Some(match base {
        BaseType::Bool => Scalar::Bool(b[0] != 0),
        BaseType::Char => Scalar::Char(b[0]),
        BaseType::WChar => Scalar::WChar(u32::from_le_bytes(b[..4].try_into().ok()?)),
        BaseType::I8 => Scalar::I8(b[0] as i8),
        BaseType::I16 => Scalar::I16(i16::from_le_bytes(b[..2].try_into().ok()?)),
        BaseType::I32 => Scalar::I32(i32::from_le_bytes(b[..4].try_into().ok()?)),
        BaseType::I64 => Scalar::I64(i64::from_le_bytes(b[..8].try_into().ok()?)),
        BaseType::U8 => Scalar::U8(b[0]),
        BaseType::U16 => Scalar::U16(u16::from_le_bytes(b[..2].try_into().ok()?)),
        BaseType::U32 => Scalar::U32(u32::from_le_bytes(b[..4].try_into().ok()?)),
        BaseType::U64 => Scalar::U64(u64::from_le_bytes(b[..8].try_into().ok()?)),
        BaseType::F32 => Scalar::F32(f32::from_le_bytes(b[..4].try_into().ok()?)),
        BaseType::F64 => Scalar::F64(f64::from_le_bytes(b[..8].try_into().ok()?)),
        BaseType::UsizePtr => Scalar::Usize(u64::from_le_bytes(b[..8].try_into().ok()?)),
        BaseType::Void | BaseType::F80 => return None,
    })
}

/// Encode a live struct instance into its flat layout image
pub fn encode_struct(inst: &StructInstance, layout: &StructLayout, out: &mut [u8]) -> Result<()> {
    if out.len() < layout.size {
        return Err(Error::marshal("struct image buffer too small"));
    }
    if inst.fields.len() != layout.fields.len() {
        return Err(Error::marshal(format!(
            "struct '{}' instance has {} fields, layout has {}",
            layout.tag,
            inst.fields.len(),
            layout.fields.len()
        )));
    }
    for (slot, (_, value)) in layout.fields.iter().zip(&inst.fields) {
        encode_field(value, &slot.desc, &mut out[slot.offset..])?;
    }
    Ok(())
}

fn encode_field(value: &CallValue, desc: &TypeDescriptor, out: &mut [u8]) -> Result<()> {
    if desc.has_pointer() {
        return Err(Error::directive(format!(
            "pointer field '{}' inside a synchronized struct",
            desc.name.as_deref().unwrap_or("?")
        )));
    }
    if let Some(Indirection::Array(n)) = desc.flags.first() {
        let CallValue::Array(items) = value else {
            return Err(Error::marshal("array field requires an array value"));
        };
        if items.len() != *n {
            return Err(Error::marshal("array field length mismatch"));
        }
        let inner = TypeDescriptor {
            flags: desc.flags[1..].iter().cloned().collect(),
            ..desc.clone()
        };
        let stride = field_stride(&inner)?;
        for (i, item) in items.iter().enumerate() {
            encode_field(item, &inner, &mut out[i * stride..])?;
        }
        return Ok(());
    }
    match desc.group {
        TypeGroup::Fundamental => {
            let scalar = value
                .scalar()
                .ok_or_else(|| Error::marshal("scalar field requires a scalar value"))?
                .coerce(desc.base)?;
            let mut image = Vec::with_capacity(desc.base.size());
            encode_scalar(scalar, &mut image);
            out[..image.len()].copy_from_slice(&image);
            Ok(())
        }
        TypeGroup::Struct => {
            let inst = value
                .struct_snapshot()
                .ok_or_else(|| Error::marshal("struct field requires a struct value"))?;
            let layout = StructLayout::compute(desc)?;
            encode_struct(&inst, &layout, out)
        }
        _ => Err(Error::marshal("unencodable field group")),
    }
}

/// Decode a flat layout image back into a live instance, field by field and
/// in place, so that caller-held aliases observe the mutation.
pub fn decode_struct_into(
    bytes: &[u8],
    layout: &StructLayout,
    inst: &mut StructInstance,
) -> Result<()> {
    if bytes.len() < layout.size {
        return Err(Error::marshal("struct image shorter than layout"));
    }
    if inst.fields.len() != layout.fields.len() {
        return Err(Error::marshal(format!(
            "struct '{}' instance has {} fields, layout has {}",
            layout.tag,
            inst.fields.len(),
            layout.fields.len()
        )));
    }
    for (slot, (_, value)) in layout.fields.iter().zip(inst.fields.iter_mut()) {
        decode_field(&bytes[slot.offset..], &slot.desc, value)?;
    }
    Ok(())
}

fn decode_field(bytes: &[u8], desc: &TypeDescriptor, value: &mut CallValue) -> Result<()> {
    if let Some(Indirection::Array(n)) = desc.flags.first() {
        let inner = TypeDescriptor {
            flags: desc.flags[1..].iter().cloned().collect(),
            ..desc.clone()
        };
        let stride = field_stride(&inner)?;
        let CallValue::Array(items) = value else {
            return Err(Error::marshal("array field requires an array value"));
        };
        if items.len() != *n {
            return Err(Error::marshal("array field length mismatch"));
        }
        for (i, item) in items.iter_mut().enumerate() {
            decode_field(&bytes[i * stride..], &inner, item)?;
        }
        return Ok(());
    }
    match desc.group {
        TypeGroup::Fundamental => {
            let scalar = decode_scalar(desc.base, bytes)
                .ok_or_else(|| Error::marshal("struct image truncated"))?;
            match value {
                CallValue::Scalar(s) => *s = scalar.coerce(s.base())?,
                CallValue::ByRef(cell) => {
                    let mut slot = cell.lock();
                    *slot = scalar.coerce(slot.base())?;
                }
                _ => return Err(Error::marshal("scalar field requires a scalar value")),
            }
            Ok(())
        }
        TypeGroup::Struct => {
            let layout = StructLayout::compute(desc)?;
            match value {
                CallValue::Struct(cell) => decode_struct_into(bytes, &layout, &mut cell.lock()),
                _ => Err(Error::marshal("struct field requires a struct value")),
            }
        }
        _ => Err(Error::marshal("undecodable field group")),
    }
}

/// Encode a wire field list into a flat layout image (executor side)
pub fn encode_wire_struct(
    entries: &[WireEntry],
    layout: &StructLayout,
    out: &mut [u8],
) -> Result<()> {
    if entries.len() != layout.fields.len() {
        return Err(Error::marshal(format!(
            "struct '{}' wire list has {} fields, layout has {}",
            layout.tag,
            entries.len(),
            layout.fields.len()
        )));
    }
    for (slot, entry) in layout.fields.iter().zip(entries) {
        encode_wire_field(&entry.value, &slot.desc, &mut out[slot.offset..])?;
    }
    Ok(())
}

fn encode_wire_field(value: &WireValue, desc: &TypeDescriptor, out: &mut [u8]) -> Result<()> {
    if desc.has_pointer() {
        // Absent pointee; a sync fixup may overwrite the zero address later
        return Ok(());
    }
    if let Some(Indirection::Array(n)) = desc.flags.first() {
        let WireValue::Array(items) = value else {
            return Err(Error::marshal("array field expects an array on the wire"));
        };
        if items.len() != *n {
            return Err(Error::marshal("array field length mismatch"));
        }
        let inner = TypeDescriptor {
            flags: desc.flags[1..].iter().cloned().collect(),
            ..desc.clone()
        };
        let stride = field_stride(&inner)?;
        for (i, item) in items.iter().enumerate() {
            encode_wire_field(item, &inner, &mut out[i * stride..])?;
        }
        return Ok(());
    }
    match desc.group {
        TypeGroup::Fundamental => {
            let WireValue::Scalar(s) = value else {
                return Err(Error::marshal("scalar field expects a scalar on the wire"));
            };
            let mut image = Vec::with_capacity(desc.base.size());
            encode_scalar(s.coerce(desc.base)?, &mut image);
            out[..image.len()].copy_from_slice(&image);
            Ok(())
        }
        TypeGroup::Struct => {
            let WireValue::List(entries) = value else {
                return Err(Error::marshal("struct field expects a field list"));
            };
            let layout = StructLayout::compute(desc)?;
            encode_wire_struct(entries, &layout, out)
        }
        _ => Ok(()),
    }
}

fn field_stride(inner: &TypeDescriptor) -> Result<usize> {
    match inner.group {
        TypeGroup::Fundamental => Ok(inner.base.size()),
        TypeGroup::Struct => Ok(StructLayout::compute(inner)?.size),
        _ => Err(Error::marshal("unsized array element")),
    }
}
