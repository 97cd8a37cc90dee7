//! Declared calling conventions of the executing side
//!
//! These describe the semantics the caller programmed against, not the host
//! ABI the dispatcher emits; the distinction matters only for the looseness
//! rules around unregistered routines.

use serde::{Deserialize, Serialize};

/// Pointer width of the executing side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    Win32,
    Win64,
}

impl Default for Arch {
    fn default() -> Self {
        Self::Win64
    }
}

/// Calling convention a routine was declared with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallConvention {
    /// C convention; extra or missing arguments are silently tolerated
    C,
    /// Windows standard call; argument counts are checked on 32-bit targets
    Stdcall,
}

/// Library kind, deciding convention and return-value interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryKind {
    /// Plain C library
    Cdll,
    /// Standard-call Windows library
    Windll,
    /// Standard-call library whose routines return checked HRESULTs
    Oledll,
}

impl LibraryKind {
    pub fn convention(self) -> CallConvention {
        match self {
            Self::Cdll => CallConvention::C,
            Self::Windll | Self::Oledll => CallConvention::Stdcall,
        }
    }

    /// Whether a negative integer return is an error bit to surface
    pub fn checks_hresult(self) -> bool {
        matches!(self, Self::Oledll)
    }
}

impl Arch {
    /// Whether an unregistered routine silently tolerates an argument-count
    /// mismatch. On 64-bit targets stdcall collapses into the C convention;
    /// on 32-bit targets the callee cleans the stack and the count is
    /// enforced against the symbol's declared arity.
    pub fn tolerates_count_mismatch(self, convention: CallConvention) -> bool {
        self == Self::Win64 || convention == CallConvention::C
    }
}
