//! Wire envelopes - one call request, one call response
//!
//! Envelopes are constructed per call and consumed once. Memory blocks are
//! keyed by directive index; `None` marks a directive whose pointer was null
//! at capture time, so the executor performs no reconstruction for it.

use crate::codec::{Scalar, WireEntry};
use serde::{Deserialize, Serialize};

/// Raw bytes captured from or harvested into one synchronized buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryBlock {
    pub bytes: Vec<u8>,
}

impl MemoryBlock {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

/// Request side of one routine call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEnvelope {
    /// Execution-side path form of the target library
    pub dll: String,
    pub routine: String,
    /// Packed argument tree
    pub args: Vec<WireEntry>,
    /// Captured sync buffers, keyed by directive index
    pub blocks: Vec<Option<MemoryBlock>>,
}

/// Explicit success/failure discriminant of the foreign invocation.
///
/// A fault never terminates the serving loop; it travels here as data so the
/// caller can distinguish a crashed routine from one that returned nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallOutcome {
    Success(Option<Scalar>),
    Fault(String),
}

impl CallOutcome {
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }
}

/// Response side of one routine call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnEnvelope {
    pub outcome: CallOutcome,
    /// Mutated by-reference fundamentals, positional; `None` where the slot
    /// is not a fundamental
    pub args: Vec<Option<Scalar>>,
    /// Harvested sync buffers, keyed by directive index
    pub blocks: Vec<Option<MemoryBlock>>,
}
