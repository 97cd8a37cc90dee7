//! Descriptor -> native slot-shape resolution
//!
//! Translates the serializable descriptor tree into the shapes the host
//! dispatcher understands. Unsupported base types fail registration by name
//! unless the resolver was opted into best-effort mode, which degrades them
//! to a fixed-width integer instead.

use super::layout::StructLayout;
use super::types::{BaseType, TypeDescriptor, TypeGroup};
use crate::errors::{Error, Result};

/// Dispatch budget for a by-value struct: at most two integer registers.
const STRUCT_BY_VALUE_MAX: usize = 16;

/// Resolved shape of one call slot
#[derive(Debug, Clone, PartialEq)]
pub enum NativeType {
    /// Integer-class scalar passed by value
    Int(BaseType),
    /// Float-class scalar passed by value
    Float(BaseType),
    /// Any pointer or decayed array: an address into call-owned memory
    Pointer,
    /// Small integer-class struct passed by value in one or two registers
    StructByValue(StructLayout),
    Void,
}

/// Translates descriptors into native slot shapes
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeResolver {
    /// Degrade unsupported scalars to a fixed-width integer instead of
    /// failing registration
    pub best_effort: bool,
}

impl TypeResolver {
    pub fn new() -> Self {
        Self { best_effort: false }
    }

    pub fn best_effort() -> Self {
        Self { best_effort: true }
    }

    /// Resolve a full argument list
    pub fn resolve_argtypes(&self, argtypes: &[TypeDescriptor]) -> Result<Vec<NativeType>> {
        argtypes.iter().map(|d| self.resolve_arg(d)).collect()
    }

    /// Resolve one argument slot
    pub fn resolve_arg(&self, desc: &TypeDescriptor) -> Result<NativeType> {
        if desc.is_indirect() {
            // Pointers and decayed arrays are all addresses
            return Ok(NativeType::Pointer);
        }
        match desc.group {
            TypeGroup::Fundamental => self.resolve_scalar(desc.base),
            TypeGroup::Struct => {
                let layout = StructLayout::compute(desc)?;
                if layout.size > STRUCT_BY_VALUE_MAX {
                    return Err(Error::unsupported(format!(
                        "by-value struct '{}' of {} bytes",
                        layout.tag, layout.size
                    )));
                }
                if struct_has_float_field(desc) {
                    return Err(Error::unsupported(format!(
                        "by-value struct '{}' with float fields",
                        layout.tag
                    )));
                }
                Ok(NativeType::StructByValue(layout))
            }
            TypeGroup::Void => Err(Error::unsupported("void argument")),
            TypeGroup::Function => Err(Error::unsupported("function pointer")),
        }
    }

    /// Resolve the return slot
    pub fn resolve_restype(&self, desc: &TypeDescriptor) -> Result<NativeType> {
        if desc.is_indirect() {
            return Ok(NativeType::Pointer);
        }
        match desc.group {
            TypeGroup::Void => Ok(NativeType::Void),
            TypeGroup::Fundamental => self.resolve_scalar(desc.base),
            TypeGroup::Struct => Err(Error::unsupported("struct return value")),
            TypeGroup::Function => Err(Error::unsupported("function pointer")),
        }
    }

    fn resolve_scalar(&self, base: BaseType) -> Result<NativeType> {
        match base {
            BaseType::Void => Err(Error::unsupported("void")),
            BaseType::F80 => {
                if self.best_effort {
                    Ok(NativeType::Int(BaseType::I64))
                } else {
                    Err(Error::unsupported(base.name()))
                }
            }
            b if b.is_float() => Ok(NativeType::Float(b)),
            b => Ok(NativeType::Int(b)),
        }
    }
}

fn struct_has_float_field(desc: &TypeDescriptor) -> bool {
    desc.fields.iter().any(|f| {
        // A pointer field is an address regardless of its pointee class
        if f.has_pointer() {
            return false;
        }
        match f.group {
            TypeGroup::Fundamental => f.base.is_float(),
            TypeGroup::Struct => struct_has_float_field(f),
            _ => false,
        }
    })
}
