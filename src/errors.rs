//! Crate-wide error taxonomy
//!
//! Registration failures (`UnsupportedType`, `Directive`) are raised before a
//! routine becomes callable. `Marshal` covers wire-tree shape mismatches at
//! call time. `Transport` is fatal to the session. A native-routine fault
//! never surfaces through this type on the executor side; it rides the return
//! envelope as an explicit outcome and is mapped back by the call-site
//! adapter.

use serde::{Deserialize, Serialize};
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Serializable so that executor-side failures cross the transport as the
/// same typed value the origin side raises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Error {
    /// A base type the executing side cannot represent, named.
    UnsupportedType { name: String },
    /// A memory-sync directive whose path does not resolve or targets a
    /// non-pointer slot.
    Directive { what: String },
    /// Wire-tree shape mismatch or malformed call arguments.
    Marshal { what: String },
    /// Channel failure; not retried.
    Transport { what: String },
    /// The foreign routine itself failed during execution.
    NativeFault { what: String },
    /// Configuration file could not be read or parsed.
    Config { what: String },
    /// Dynamic library could not be loaded.
    Load { what: String },
    /// Routine name not found in the library.
    Symbol { name: String },
}

impl Error {
    pub fn unsupported(name: impl Into<String>) -> Self {
        Self::UnsupportedType { name: name.into() }
    }

    pub fn directive(what: impl Into<String>) -> Self {
        Self::Directive { what: what.into() }
    }

    pub fn marshal(what: impl Into<String>) -> Self {
        Self::Marshal { what: what.into() }
    }

    pub fn transport(what: impl Into<String>) -> Self {
        Self::Transport { what: what.into() }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedType { name } => {
                write!(f, "Unsupported type: {}", name)
            }
            Self::Directive { what } => {
                write!(f, "Invalid memory-sync directive: {}", what)
            }
            Self::Marshal { what } => {
                write!(f, "Marshaling failed: {}", what)
            }
            Self::Transport { what } => {
                write!(f, "Transport failure: {}", what)
            }
            Self::NativeFault { what } => {
                write!(f, "Native routine fault: {}", what)
            }
            Self::Config { what } => {
                write!(f, "Configuration error: {}", what)
            }
            Self::Load { what } => {
                write!(f, "Failed to load library: {}", what)
            }
            Self::Symbol { name } => {
                write!(f, "Symbol not found: {}", name)
            }
        }
    }
}

impl std::error::Error for Error {}
