//! Call signatures and session-scoped registries
//!
//! A routine is governed by at most one signature. Compilation resolves the
//! declared descriptors to native shapes, validates sync directives and
//! derives the implicit struct-pointer directives, so that everything a call
//! needs is decided before the first envelope is built. Re-registration
//! replaces the compiled signature wholesale.

use crate::desc::{NativeType, StructLayout, TypeDescriptor, TypeGroup, TypeResolver};
use crate::errors::{Error, Result};
use crate::native::{MAX_FLOAT_ARGS, MAX_INT_ARGS};
use crate::sync::{SyncDirective, SyncEngine};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// The declared shape of one routine, as the caller registers it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSignature {
    pub arg_types: Vec<TypeDescriptor>,
    pub return_type: TypeDescriptor,
    pub sync: Vec<SyncDirective>,
}

impl CallSignature {
    pub fn new(arg_types: Vec<TypeDescriptor>, return_type: TypeDescriptor) -> Self {
        Self {
            arg_types,
            return_type,
            sync: Vec::new(),
        }
    }

    pub fn with_sync(mut self, sync: Vec<SyncDirective>) -> Self {
        self.sync = sync;
        self
    }

    /// Resolve and validate the declared signature. Fails with
    /// `UnsupportedType` naming the offending type or `Directive` naming the
    /// offending path; a failed compilation leaves no partial state behind.
    pub fn compile(&self, resolver: &TypeResolver) -> Result<CompiledSignature> {
        let natives = resolver.resolve_argtypes(&self.arg_types)?;
        let ret = resolver.resolve_restype(&self.return_type)?;

        let mut ints = 0usize;
        let mut floats = 0usize;
        for native in &natives {
            match native {
                NativeType::Float(_) => floats += 1,
                NativeType::StructByValue(layout) => ints += layout.size.div_ceil(8),
                _ => ints += 1,
            }
        }
        if ints > MAX_INT_ARGS || floats > MAX_FLOAT_ARGS {
            return Err(Error::unsupported(format!(
                "{} integer-class and {} float-class arguments exceed the register budget",
                ints, floats
            )));
        }

        let engine = SyncEngine::new();
        engine.validate(&self.sync, &self.arg_types)?;
        let mut sync = self.sync.clone();
        sync.extend(engine.derive_struct_directives(&self.arg_types, &self.sync)?);
        engine.validate(&sync, &self.arg_types)?;

        Ok(CompiledSignature {
            arg_types: self.arg_types.clone(),
            return_type: self.return_type.clone(),
            sync,
            natives,
            ret,
        })
    }
}

/// A signature after resolution: declared descriptors, the full directive
/// list (explicit plus derived) and the native shapes of every slot.
#[derive(Debug, Clone)]
pub struct CompiledSignature {
    pub arg_types: Vec<TypeDescriptor>,
    pub return_type: TypeDescriptor,
    pub sync: Vec<SyncDirective>,
    pub natives: Vec<NativeType>,
    pub ret: NativeType,
}

/// Session-scoped struct-type registry: tag to computed layout, populated at
/// registration and consulted when the executor materializes instances.
pub struct StructRegistry {
    layouts: DashMap<String, StructLayout>,
}

impl StructRegistry {
    pub fn new() -> Self {
        Self {
            layouts: DashMap::new(),
        }
    }

    /// Register every struct node reachable from the descriptor
    pub fn register_tree(&self, desc: &TypeDescriptor) -> Result<()> {
        if desc.group == TypeGroup::Struct {
            let layout = StructLayout::compute(desc)?;
            self.layouts.insert(layout.tag.clone(), layout);
            for field in &desc.fields {
                self.register_tree(field)?;
            }
        }
        Ok(())
    }

    pub fn layout(&self, tag: &str) -> Option<StructLayout> {
        self.layouts.get(tag).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }
}

impl Default for StructRegistry {
    fn default() -> Self {
        Self::new()
    }
}
