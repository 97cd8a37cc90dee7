//! Type descriptor model - serializable schemas for C-compatible slots
//!
//! Architecture:
//! - `types.rs` - scalar base types, indirection flags, `TypeDescriptor`
//! - `layout.rs` - C struct layout computation (offsets, size, alignment)
//! - `resolve.rs` - descriptor -> native slot-shape resolution

mod layout;
mod resolve;
mod types;

pub use layout::{FieldSlot, StructLayout};
pub use resolve::{NativeType, TypeResolver};
pub use types::{BaseType, Flags, Indirection, TypeDescriptor, TypeGroup};
