//! Argument codec - live values to and from the wire representation
//!
//! Architecture:
//! - `values.rs` - scalar model and the shared-cell live argument values
//! - `wire.rs` - the serializable `(name, value)` pair tree
//! - `bytes.rs` - raw little-endian byte codecs for scalars and structs
//! - `slots.rs` - executor-side call-ready slot representation
//!
//! Packing strips indirection outer-to-inner; unpacking re-applies it
//! innermost-out. Both directions branch on the declared descriptor only,
//! never on the runtime shape of a value.

mod bytes;
mod slots;
mod values;
mod wire;

pub use bytes::{decode_scalar, decode_struct_into, encode_scalar, encode_struct, encode_wire_struct};
pub use slots::NativeSlot;
pub use values::{BufferCell, CallValue, Scalar, ScalarCell, StructCell, StructInstance};
pub use wire::{WireEntry, WireValue};

use crate::desc::{Indirection, StructLayout, TypeDescriptor, TypeGroup};
use crate::errors::{Error, Result};

/// Stateless pack/unpack engine, shared by the call-site adapter and the
/// routine server.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArgCodec;

impl ArgCodec {
    pub fn new() -> Self {
        Self
    }

    /// Client side: turn live argument values into the wire tree.
    pub fn pack_args(
        &self,
        argtypes: &[TypeDescriptor],
        args: &[CallValue],
    ) -> Result<Vec<WireEntry>> {
        if argtypes.len() != args.len() {
            return Err(Error::marshal(format!(
                "expected {} arguments, got {}",
                argtypes.len(),
                args.len()
            )));
        }
        argtypes
            .iter()
            .zip(args)
            .map(|(desc, value)| self.pack_one(desc, value))
            .collect()
    }

    fn pack_one(&self, desc: &TypeDescriptor, value: &CallValue) -> Result<WireEntry> {
        let packed = self.pack_value(desc, &desc.flags, value)?;
        // Untyped slots travel as (None, None) and are owned by memsync
        if matches!(packed, WireValue::None) {
            return Ok(WireEntry::none());
        }
        Ok(WireEntry {
            name: desc.name.clone(),
            value: packed,
        })
    }

    fn pack_value(
        &self,
        desc: &TypeDescriptor,
        flags: &[Indirection],
        value: &CallValue,
    ) -> Result<WireValue> {
        if let Some(flag) = flags.first() {
            let rest = &flags[1..];
            return match flag {
                Indirection::Pointer => match value {
                    CallValue::Null => Ok(WireValue::None),
                    CallValue::ByRef(cell) => {
                        let pointee = CallValue::Scalar(*cell.lock());
                        self.pack_value(desc, rest, &pointee)
                    }
                    CallValue::Buffer(cell) => {
                        // Pointee view: the first element, when one is decodable.
                        // The buffer contents themselves travel via memsync.
                        if desc.group == TypeGroup::Fundamental && rest.is_empty() {
                            match decode_scalar(desc.base, &cell.lock()) {
                                Some(s) => Ok(WireValue::Scalar(s)),
                                None => Ok(WireValue::None),
                            }
                        } else {
                            Ok(WireValue::None)
                        }
                    }
                    // Struct pointee is the instance itself
                    other => self.pack_value(desc, rest, other),
                },
                Indirection::Array(n) => match value {
                    CallValue::Array(items) => {
                        if items.len() != *n {
                            return Err(Error::marshal(format!(
                                "array slot of length {} given {} elements",
                                n,
                                items.len()
                            )));
                        }
                        let packed = items
                            .iter()
                            .map(|item| self.pack_value(desc, rest, item))
                            .collect::<Result<Vec<_>>>()?;
                        Ok(WireValue::Array(packed))
                    }
                    CallValue::Buffer(cell) if desc.group == TypeGroup::Fundamental => {
                        let buf = cell.lock();
                        let mut out = Vec::with_capacity(*n);
                        for i in 0..*n {
                            let at = i * desc.base.size();
                            let s = decode_scalar(desc.base, buf.get(at..).unwrap_or(&[]))
                                .ok_or_else(|| {
                                    Error::marshal("buffer shorter than declared array")
                                })?;
                            out.push(WireValue::Scalar(s));
                        }
                        Ok(WireValue::Array(out))
                    }
                    _ => Err(Error::marshal("array slot requires an array value")),
                },
            };
        }

        match desc.group {
            TypeGroup::Fundamental => match value {
                CallValue::Scalar(s) => Ok(WireValue::Scalar(s.coerce(desc.base)?)),
                CallValue::ByRef(cell) => Ok(WireValue::Scalar(cell.lock().coerce(desc.base)?)),
                _ => Err(Error::marshal(format!(
                    "scalar slot '{}' given a non-scalar value",
                    desc.base.name()
                ))),
            },
            TypeGroup::Struct => match value {
                CallValue::Struct(cell) => {
                    let inst = cell.lock();
                    if inst.fields.len() != desc.fields.len() {
                        return Err(Error::marshal(format!(
                            "struct '{}' has {} fields, instance has {}",
                            desc.struct_tag.as_deref().unwrap_or("?"),
                            desc.fields.len(),
                            inst.fields.len()
                        )));
                    }
                    let entries = desc
                        .fields
                        .iter()
                        .zip(&inst.fields)
                        .map(|(fdesc, (_, fval))| self.pack_one(fdesc, fval))
                        .collect::<Result<Vec<_>>>()?;
                    Ok(WireValue::List(entries))
                }
                _ => Err(Error::marshal("struct slot given a non-struct value")),
            },
            TypeGroup::Void | TypeGroup::Function => Ok(WireValue::None),
        }
    }

    /// Executor side: rebuild call-ready slots from the wire tree.
    ///
    /// Fundamentals re-apply their flags innermost-out, structs materialize
    /// through the layout registered under their tag, untyped pointers become
    /// placeholders for the sync engine to fill.
    pub fn unpack_args(
        &self,
        argtypes: &[TypeDescriptor],
        wire: &[WireEntry],
        layouts: &dyn Fn(&str) -> Option<StructLayout>,
    ) -> Result<Vec<NativeSlot>> {
        if argtypes.len() != wire.len() {
            return Err(Error::marshal(format!(
                "wire tree has {} entries, signature expects {}",
                wire.len(),
                argtypes.len()
            )));
        }
        argtypes
            .iter()
            .zip(wire)
            .map(|(desc, entry)| self.unpack_slot(desc, &desc.flags, &entry.value, layouts))
            .collect()
    }

    fn unpack_slot(
        &self,
        desc: &TypeDescriptor,
        flags: &[Indirection],
        value: &WireValue,
        layouts: &dyn Fn(&str) -> Option<StructLayout>,
    ) -> Result<NativeSlot> {
        if let Some(flag) = flags.first() {
            let rest = &flags[1..];
            return match flag {
                Indirection::Pointer => {
                    if desc.group == TypeGroup::Void || matches!(value, WireValue::None) {
                        // Untyped or absent pointee; sync reconstruction may
                        // replace this, otherwise the callee sees NULL.
                        return Ok(NativeSlot::Placeholder);
                    }
                    let inner = self.unpack_slot(desc, rest, value, layouts)?;
                    Ok(match inner {
                        NativeSlot::Int { bits, base } => NativeSlot::Mem {
                            bytes: encode_scalar_bits(bits, base),
                            elem: strip_flags(desc, rest.len()),
                        },
                        NativeSlot::Float { bits, base } => NativeSlot::Mem {
                            bytes: encode_scalar_bits(bits, base),
                            elem: strip_flags(desc, rest.len()),
                        },
                        NativeSlot::StructVal { bytes, .. } => NativeSlot::Mem {
                            bytes,
                            elem: strip_flags(desc, rest.len()),
                        },
                        mem @ (NativeSlot::Mem { .. } | NativeSlot::PtrTo(_)) => {
                            NativeSlot::PtrTo(Box::new(mem))
                        }
                        NativeSlot::Placeholder | NativeSlot::Null => NativeSlot::Placeholder,
                    })
                }
                Indirection::Array(n) => match value {
                    WireValue::Array(items) => {
                        if items.len() != *n {
                            return Err(Error::marshal(format!(
                                "array slot of length {} received {} elements",
                                n,
                                items.len()
                            )));
                        }
                        let elem = strip_flags(desc, rest.len());
                        let mut bytes = Vec::new();
                        for item in items {
                            let slot = self.unpack_slot(desc, rest, item, layouts)?;
                            slot.append_value_bytes(&mut bytes)?;
                        }
                        Ok(NativeSlot::Mem { bytes, elem })
                    }
                    WireValue::None => Ok(NativeSlot::Placeholder),
                    _ => Err(Error::marshal("array slot expects an array on the wire")),
                },
            };
        }

        match desc.group {
            TypeGroup::Fundamental => {
                let scalar = match value {
                    WireValue::Scalar(s) => s.coerce(desc.base)?,
                    // Absent fundamentals synthesize zero and are overwritten
                    // by sync reconstruction where a directive applies.
                    WireValue::None => Scalar::zero(desc.base).ok_or_else(|| {
                        Error::marshal(format!("no zero value for {}", desc.base.name()))
                    })?,
                    _ => {
                        return Err(Error::marshal(format!(
                            "scalar slot '{}' received a nested tree",
                            desc.base.name()
                        )))
                    }
                };
                Ok(NativeSlot::from_scalar(scalar))
            }
            TypeGroup::Struct => {
                let layout = desc
                    .struct_tag
                    .as_deref()
                    .and_then(layouts)
                    .map(Ok)
                    .unwrap_or_else(|| StructLayout::compute(desc))?;
                let entries = match value {
                    WireValue::List(entries) => entries.as_slice(),
                    _ => return Err(Error::marshal("struct slot expects a field list")),
                };
                let mut bytes = vec![0u8; layout.size];
                encode_wire_struct(entries, &layout, &mut bytes)?;
                Ok(NativeSlot::StructVal { bytes, layout })
            }
            TypeGroup::Void => Ok(NativeSlot::Placeholder),
            TypeGroup::Function => Err(Error::unsupported("function pointer")),
        }
    }

    /// Executor side, post-call: re-extract mutated by-reference fundamentals.
    ///
    /// Every fundamental slot ships its current value; everything else packs
    /// `None`. Struct mutation travels through the sync engine instead.
    pub fn pack_return_slots(
        &self,
        argtypes: &[TypeDescriptor],
        slots: &[NativeSlot],
    ) -> Vec<Option<Scalar>> {
        argtypes
            .iter()
            .zip(slots)
            .map(|(desc, slot)| {
                if desc.group != TypeGroup::Fundamental {
                    return None;
                }
                slot.read_scalar(desc.base)
            })
            .collect()
    }

    /// Client side, post-call: write returned scalars into the caller's
    /// original by-reference cells, preserving object identity.
    pub fn apply_return_slots(
        &self,
        argtypes: &[TypeDescriptor],
        args: &[CallValue],
        returned: &[Option<Scalar>],
    ) -> Result<()> {
        for ((desc, arg), new) in argtypes.iter().zip(args).zip(returned) {
            if desc.group != TypeGroup::Fundamental || !desc.has_pointer() {
                continue;
            }
            let (CallValue::ByRef(cell), Some(new)) = (arg, new) else {
                continue;
            };
            let mut slot = cell.lock();
            let base = slot.base();
            *slot = new.coerce(base)?;
        }
        Ok(())
    }
}

/// Descriptor with only the innermost `keep` flag levels retained
fn strip_flags(desc: &TypeDescriptor, keep: usize) -> TypeDescriptor {
    let mut elem = desc.clone();
    let skip = elem.flags.len() - keep;
    elem.flags = elem.flags.iter().skip(skip).cloned().collect();
    elem
}

fn encode_scalar_bits(bits: u64, base: crate::desc::BaseType) -> Vec<u8> {
    let mut out = Vec::with_capacity(base.size());
    out.extend_from_slice(&bits.to_le_bytes()[..base.size()]);
    out
}

#[cfg(test)]
mod tests;
