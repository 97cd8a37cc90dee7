//! Executor-side call-ready slot representation
//!
//! A slot either carries a register value directly or owns the backing
//! memory a pointer argument will address. Owned memory is mutated in place
//! by the foreign routine and read back during harvest.

use super::bytes::decode_scalar;
use super::values::Scalar;
use crate::desc::{BaseType, StructLayout, TypeDescriptor};
use crate::errors::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum NativeSlot {
    /// Integer-class scalar passed by value
    Int { bits: u64, base: BaseType },
    /// Float-class scalar passed by value; f32 occupies the low 32 bits
    Float { bits: u64, base: BaseType },
    /// Pointer argument owning its pointee bytes
    Mem { bytes: Vec<u8>, elem: TypeDescriptor },
    /// Additional pointer level above an owned allocation
    PtrTo(Box<NativeSlot>),
    /// Small struct passed by value in integer registers
    StructVal { bytes: Vec<u8>, layout: StructLayout },
    /// Explicit null pointer
    Null,
    /// Untyped or absent pointer slot, awaiting sync reconstruction;
    /// the callee sees NULL if nothing fills it
    Placeholder,
}

impl NativeSlot {
    pub fn from_scalar(s: Scalar) -> Self {
        match s.to_float_bits() {
            Some(bits) => Self::Float {
                bits,
                base: s.base(),
            },
            None => Self::Int {
                // Integral by construction: float bits were handled above
                bits: s.to_int_bits().unwrap_or(0),
                base: s.base(),
            },
        }
    }

    /// Current scalar view of the slot, dereferencing owned memory
    pub fn read_scalar(&self, base: BaseType) -> Option<Scalar> {
        match self {
            Self::Int { bits, .. } | Self::Float { bits, .. } => {
                decode_scalar(base, &bits.to_le_bytes())
            }
            Self::Mem { bytes, .. } => decode_scalar(base, bytes),
            Self::PtrTo(inner) => inner.read_scalar(base),
            Self::StructVal { .. } | Self::Null | Self::Placeholder => None,
        }
    }

    /// Append this slot's by-value byte image, used when aggregating array
    /// elements into one contiguous allocation
    pub fn append_value_bytes(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Self::Int { bits, base } | Self::Float { bits, base } => {
                out.extend_from_slice(&bits.to_le_bytes()[..base.size()]);
                Ok(())
            }
            Self::StructVal { bytes, .. } => {
                out.extend_from_slice(bytes);
                Ok(())
            }
            _ => Err(Error::marshal("array elements must be by-value payloads")),
        }
    }

    /// Owned pointee bytes, if this slot carries any
    pub fn mem_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Mem { bytes, .. } => Some(bytes),
            Self::PtrTo(inner) => inner.mem_bytes(),
            _ => None,
        }
    }

    pub fn mem_bytes_mut(&mut self) -> Option<&mut Vec<u8>> {
        match self {
            Self::Mem { bytes, .. } => Some(bytes),
            Self::PtrTo(inner) => inner.mem_bytes_mut(),
            _ => None,
        }
    }
}
