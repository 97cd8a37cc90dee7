//! Native call machinery for the executing side
//!
//! Architecture:
//! - `convention.rs` - declared calling conventions and width semantics
//! - `call.rs` - host-ABI register dispatcher (inline assembly)
//! - `library.rs` - dynamic library loading and in-process symbol tables

mod call;
mod convention;
mod library;

pub use call::{CallError, FunctionCall, PreparedArgs, RetClass, MAX_FLOAT_ARGS, MAX_INT_ARGS};
pub use convention::{Arch, CallConvention, LibraryKind};
pub use library::{InProcessLibrary, Library, RoutineSym};
