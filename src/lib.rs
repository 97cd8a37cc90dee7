//! callbridge - call routines in Windows-ABI dynamic libraries from another
//! process, over a serializable message channel
//!
//! No memory is shared between the two sides. Pointer semantics are
//! reproduced by copying: a type-descriptor model describes every slot, an
//! argument codec moves values to and from a wire tree, and a memory
//! synchronization engine round-trips the bytes that pointer arguments
//! address, before and after each call.
//!
//! Architecture:
//! - `desc` - serializable type descriptors, layouts, native resolution
//! - `codec` - argument pack/unpack between live values and the wire tree
//! - `sync` - capture/reconstruct/harvest/restore of pointer buffers
//! - `registry` - call signatures and session-scoped registries
//! - `proto` - call/return envelopes
//! - `native` - conventions, register dispatch, library loading
//! - `server` - the executor: per-call invocation protocol
//! - `client` - the call-site adapter
//! - `session` - session surface and path translation
//! - `transport` - channel interface plus the loopback implementation

pub mod client;
pub mod codec;
pub mod config;
pub mod desc;
pub mod errors;
pub mod logging;
pub mod native;
pub mod proto;
pub mod registry;
pub mod server;
pub mod session;
pub mod sync;
pub mod transport;

// Re-export the surface a call site touches
pub use client::{DllClient, Invocation, RoutineClient};
pub use codec::{CallValue, Scalar, StructInstance};
pub use config::{ConfigOverlay, SessionConfig};
pub use desc::{BaseType, TypeDescriptor};
pub use errors::{Error, Result};
pub use native::{Arch, InProcessLibrary, LibraryKind};
pub use proto::CallOutcome;
pub use registry::CallSignature;
pub use server::Executor;
pub use session::Session;
pub use sync::{LengthSource, SyncDirective};
