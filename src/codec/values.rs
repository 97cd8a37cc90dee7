//! Scalar model and live call-site argument values
//!
//! By-reference arguments are shared cells so that the caller's object
//! identity survives the call: the engine mutates the cell in place and
//! every alias the caller holds observes the result.

use crate::desc::BaseType;
use crate::errors::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One fundamental value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Bool(bool),
    Char(u8),
    WChar(u32),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Usize(u64),
}

impl Scalar {
    /// The base type this value inhabits
    pub const fn base(&self) -> BaseType {
        match self {
            Self::Bool(_) => BaseType::Bool,
            Self::Char(_) => BaseType::Char,
            Self::WChar(_) => BaseType::WChar,
            Self::I8(_) => BaseType::I8,
            Self::I16(_) => BaseType::I16,
            Self::I32(_) => BaseType::I32,
            Self::I64(_) => BaseType::I64,
            Self::U8(_) => BaseType::U8,
            Self::U16(_) => BaseType::U16,
            Self::U32(_) => BaseType::U32,
            Self::U64(_) => BaseType::U64,
            Self::F32(_) => BaseType::F32,
            Self::F64(_) => BaseType::F64,
            Self::Usize(_) => BaseType::UsizePtr,
        }
    }

    /// Zero value of a base type, if one exists
    pub fn zero(base: BaseType) -> Option<Self> {
        Some(match base {
            BaseType::Bool => Self::Bool(false),
            BaseType::Char => Self::Char(0),
            BaseType::WChar => Self::WChar(0),
            BaseType::I8 => Self::I8(0),
            BaseType::I16 => Self::I16(0),
            BaseType::I32 => Self::I32(0),
            BaseType::I64 => Self::I64(0),
            BaseType::U8 => Self::U8(0),
            BaseType::U16 => Self::U16(0),
            BaseType::U32 => Self::U32(0),
            BaseType::U64 => Self::U64(0),
            BaseType::F32 => Self::F32(0.0),
            BaseType::F64 => Self::F64(0.0),
            BaseType::UsizePtr => Self::Usize(0),
            BaseType::Void | BaseType::F80 => return None,
        })
    }

    /// Integer view for integral scalars
    pub fn as_i128(&self) -> Option<i128> {
        Some(match *self {
            Self::Bool(v) => v as i128,
            Self::Char(v) => v as i128,
            Self::WChar(v) => v as i128,
            Self::I8(v) => v as i128,
            Self::I16(v) => v as i128,
            Self::I32(v) => v as i128,
            Self::I64(v) => v as i128,
            Self::U8(v) => v as i128,
            Self::U16(v) => v as i128,
            Self::U32(v) => v as i128,
            Self::U64(v) => v as i128,
            Self::Usize(v) => v as i128,
            Self::F32(_) | Self::F64(_) => return None,
        })
    }

    /// Element-count view, used when resolving length arguments
    pub fn as_usize(&self) -> Option<usize> {
        self.as_i128().and_then(|v| usize::try_from(v).ok())
    }

    /// Float view for float scalars
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::F32(v) => Some(v as f64),
            Self::F64(v) => Some(v),
            _ => None,
        }
    }

    /// Register bit pattern for integer-class values
    pub fn to_int_bits(&self) -> Option<u64> {
        self.as_i128().map(|v| v as u64)
    }

    /// Register bit pattern for float-class values; an f32 occupies the low
    /// 32 bits exactly as the callee reads it
    pub fn to_float_bits(&self) -> Option<u64> {
        match *self {
            Self::F32(v) => Some(v.to_bits() as u64),
            Self::F64(v) => Some(v.to_bits()),
            _ => None,
        }
    }

    /// Convert to the declared base type. Integral values convert among
    /// integral types and widen to floats; a float never silently becomes
    /// an integer.
    pub fn coerce(self, base: BaseType) -> Result<Self> {
        if self.base() == base {
            return Ok(self);
        }
        if let Some(v) = self.as_i128() {
            return Ok(match base {
                BaseType::Bool => Self::Bool(v != 0),
                BaseType::Char => Self::Char(v as u8),
                BaseType::WChar => Self::WChar(v as u32),
                BaseType::I8 => Self::I8(v as i8),
                BaseType::I16 => Self::I16(v as i16),
                BaseType::I32 => Self::I32(v as i32),
                BaseType::I64 => Self::I64(v as i64),
                BaseType::U8 => Self::U8(v as u8),
                BaseType::U16 => Self::U16(v as u16),
                BaseType::U32 => Self::U32(v as u32),
                BaseType::U64 => Self::U64(v as u64),
                BaseType::F32 => Self::F32(v as f32),
                BaseType::F64 => Self::F64(v as f64),
                BaseType::UsizePtr => Self::Usize(v as u64),
                BaseType::Void | BaseType::F80 => {
                    return Err(Error::unsupported(base.name()))
                }
            });
        }
        if let Some(v) = self.as_f64() {
            return match base {
                BaseType::F32 => Ok(Self::F32(v as f32)),
                BaseType::F64 => Ok(Self::F64(v)),
                _ => Err(Error::marshal(format!(
                    "cannot pass a float where {} is declared",
                    base.name()
                ))),
            };
        }
        Err(Error::marshal(format!(
            "cannot convert {} to {}",
            self.base().name(),
            base.name()
        )))
    }
}

pub type ScalarCell = Arc<Mutex<Scalar>>;
pub type BufferCell = Arc<Mutex<Vec<u8>>>;
pub type StructCell = Arc<Mutex<StructInstance>>;

/// A concrete struct value: its registry tag and ordered fields
#[derive(Debug, Clone)]
pub struct StructInstance {
    pub tag: String,
    pub fields: Vec<(String, CallValue)>,
}

impl StructInstance {
    pub fn new(tag: impl Into<String>, fields: Vec<(String, CallValue)>) -> Self {
        Self {
            tag: tag.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&CallValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut CallValue> {
        self.fields
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// One live call argument as the caller holds it
#[derive(Debug, Clone)]
pub enum CallValue {
    /// Null pointer; sync directives targeting it are no-ops
    Null,
    /// Scalar passed by value
    Scalar(Scalar),
    /// Pointer to a scalar; the pointee is mutated in place
    ByRef(ScalarCell),
    /// Pointer to raw memory, synchronized byte-for-byte
    Buffer(BufferCell),
    /// Struct instance, by value or by pointer per the declared slot
    Struct(StructCell),
    /// Fixed-length array passed by value
    Array(Vec<CallValue>),
}

impl CallValue {
    /// New by-reference scalar cell
    pub fn by_ref(value: Scalar) -> Self {
        Self::ByRef(Arc::new(Mutex::new(value)))
    }

    /// New shared buffer over the given bytes
    pub fn buffer(bytes: Vec<u8>) -> Self {
        Self::Buffer(Arc::new(Mutex::new(bytes)))
    }

    /// New shared struct instance
    pub fn struct_value(instance: StructInstance) -> Self {
        Self::Struct(Arc::new(Mutex::new(instance)))
    }

    /// Current scalar value, reading through a by-reference cell
    pub fn scalar(&self) -> Option<Scalar> {
        match self {
            Self::Scalar(s) => Some(*s),
            Self::ByRef(cell) => Some(*cell.lock()),
            _ => None,
        }
    }

    /// Snapshot of the buffer contents
    pub fn buffer_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Self::Buffer(cell) => Some(cell.lock().clone()),
            _ => None,
        }
    }

    /// Snapshot of the struct instance
    pub fn struct_snapshot(&self) -> Option<StructInstance> {
        match self {
            Self::Struct(cell) => Some(cell.lock().clone()),
            _ => None,
        }
    }
}

impl From<Scalar> for CallValue {
    fn from(s: Scalar) -> Self {
        Self::Scalar(s)
    }
}
