//! Memory synchronization engine
//!
//! Makes pointer-addressed buffers behave as if both processes shared
//! memory, despite everything crossing the boundary as copied bytes. Four
//! phases per call: capture (origin, pre-call), reconstruction (executor,
//! pre-call), harvest (executor, post-call), restore (origin, post-call).
//!
//! Struct arguments passed by pointer are synchronized by the same engine
//! through directives derived at registration time: their element is the
//! struct layout itself, length one.

use crate::codec::{
    decode_scalar, decode_struct_into, encode_scalar, encode_struct, CallValue, NativeSlot,
};
use crate::desc::{StructLayout, TypeDescriptor, TypeGroup};
use crate::errors::{Error, Result};
use crate::proto::MemoryBlock;
use serde::{Deserialize, Serialize};

/// Where the element count of a synchronized buffer comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LengthSource {
    /// Path to an integral argument holding the count, read as passed
    Argument(Vec<usize>),
    /// Constant count
    Literal(usize),
}

/// One declared pointer-buffer synchronization rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncDirective {
    /// Indices locating the pointer argument, descending through nested
    /// struct/array structure
    pub pointer_path: Vec<usize>,
    pub length: LengthSource,
    /// Descriptor of one buffer element
    #[serde(default = "default_element")]
    pub element: TypeDescriptor,
}

fn default_element() -> TypeDescriptor {
    TypeDescriptor::fundamental(crate::desc::BaseType::U8)
}

impl SyncDirective {
    /// Directive with the default single-byte element
    pub fn new(pointer_path: Vec<usize>, length: LengthSource) -> Self {
        Self {
            pointer_path,
            length,
            element: default_element(),
        }
    }

    pub fn with_element(mut self, element: TypeDescriptor) -> Self {
        self.element = element;
        self
    }

    /// Byte size of one element
    pub fn element_size(&self) -> Result<usize> {
        match self.element.group {
            TypeGroup::Fundamental => Ok(self.element.base.size().max(1)),
            TypeGroup::Struct => Ok(StructLayout::compute(&self.element)?.size),
            _ => Ok(1),
        }
    }
}

/// A buffer reconstructed for a pointer nested inside a struct argument:
/// the backing bytes plus the slot/offset where its address belongs.
#[derive(Debug)]
pub struct AuxBuffer {
    pub directive: usize,
    pub slot: usize,
    pub offset: usize,
    pub bytes: Vec<u8>,
}

/// The four-phase synchronization engine; stateless, injected into the
/// call-site adapter and the routine server.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncEngine;

impl SyncEngine {
    pub fn new() -> Self {
        Self
    }

    /// Registration-time validation: every pointer path must land on an
    /// indirect slot, length paths must be integral, and no two directives
    /// may address overlapping memory.
    pub fn validate(
        &self,
        directives: &[SyncDirective],
        argtypes: &[TypeDescriptor],
    ) -> Result<()> {
        for d in directives {
            let desc = desc_at_path(argtypes, &d.pointer_path)?;
            if !desc.is_indirect() {
                return Err(Error::directive(format!(
                    "path {:?} targets a by-value slot",
                    d.pointer_path
                )));
            }
            if let LengthSource::Argument(path) = &d.length {
                let ldesc = desc_at_path(argtypes, path)?;
                if ldesc.group != TypeGroup::Fundamental || !ldesc.base.is_integral() {
                    return Err(Error::directive(format!(
                        "length path {:?} is not an integral argument",
                        path
                    )));
                }
            }
        }
        for (i, a) in directives.iter().enumerate() {
            for b in &directives[i + 1..] {
                if is_prefix(&a.pointer_path, &b.pointer_path)
                    || is_prefix(&b.pointer_path, &a.pointer_path)
                {
                    return Err(Error::directive(format!(
                        "directives {:?} and {:?} address overlapping memory",
                        a.pointer_path, b.pointer_path
                    )));
                }
            }
        }
        Ok(())
    }

    /// Derive implicit directives for struct arguments passed by pointer.
    /// Arguments already covered by an explicit directive are skipped; a
    /// derived struct element containing pointer fields is rejected, since
    /// raw addresses are meaningless across the boundary.
    pub fn derive_struct_directives(
        &self,
        argtypes: &[TypeDescriptor],
        explicit: &[SyncDirective],
    ) -> Result<Vec<SyncDirective>> {
        let mut derived = Vec::new();
        for (i, desc) in argtypes.iter().enumerate() {
            if desc.group != TypeGroup::Struct || !desc.has_pointer() {
                continue;
            }
            if explicit
                .iter()
                .any(|d| d.pointer_path.first() == Some(&i))
            {
                continue;
            }
            let mut element = desc.clone();
            element.flags.clear();
            if element.fields.iter().any(TypeDescriptor::has_pointer) {
                return Err(Error::directive(format!(
                    "struct '{}' passed by pointer carries pointer fields; \
                     declare an explicit directive for them",
                    element.struct_tag.as_deref().unwrap_or("?")
                )));
            }
            derived.push(SyncDirective {
                pointer_path: vec![i],
                length: LengthSource::Literal(1),
                element,
            });
        }
        Ok(derived)
    }

    /// Origin side, pre-call: read the addressed bytes of every directive.
    /// A null pointer records an absent block so the executor skips
    /// reconstruction for it.
    pub fn capture(
        &self,
        directives: &[SyncDirective],
        argtypes: &[TypeDescriptor],
        args: &[CallValue],
    ) -> Result<Vec<Option<MemoryBlock>>> {
        directives
            .iter()
            .map(|d| self.capture_one(d, argtypes, args))
            .collect()
    }

    fn capture_one(
        &self,
        d: &SyncDirective,
        argtypes: &[TypeDescriptor],
        args: &[CallValue],
    ) -> Result<Option<MemoryBlock>> {
        let target = value_at_path(args, &d.pointer_path)?;
        match target {
            CallValue::Null => Ok(None),
            CallValue::Buffer(cell) => {
                let count = self.resolve_length(d, args)?;
                let need = count * d.element_size()?;
                let buf = cell.lock();
                if buf.len() < need {
                    return Err(Error::marshal(format!(
                        "buffer at {:?} holds {} bytes, directive needs {}",
                        d.pointer_path,
                        buf.len(),
                        need
                    )));
                }
                Ok(Some(MemoryBlock::new(buf[..need].to_vec())))
            }
            CallValue::Struct(cell) => {
                let layout = StructLayout::compute(&d.element)?;
                let mut image = vec![0u8; layout.size];
                encode_struct(&cell.lock(), &layout, &mut image)?;
                Ok(Some(MemoryBlock::new(image)))
            }
            CallValue::ByRef(cell) => {
                let mut image = Vec::new();
                encode_scalar(*cell.lock(), &mut image);
                Ok(Some(MemoryBlock::new(image)))
            }
            _ => Err(Error::directive(format!(
                "path {:?} does not target a pointer value",
                d.pointer_path
            ))),
        }
    }

    /// Origin side, post-call: write harvested bytes back into the caller's
    /// original objects, in place.
    pub fn restore(
        &self,
        directives: &[SyncDirective],
        args: &[CallValue],
        blocks: &[Option<MemoryBlock>],
    ) -> Result<()> {
        for (d, block) in directives.iter().zip(blocks) {
            let Some(block) = block else { continue };
            let target = value_at_path(args, &d.pointer_path)?;
            match target {
                CallValue::Buffer(cell) => {
                    let mut buf = cell.lock();
                    if buf.len() < block.bytes.len() {
                        return Err(Error::marshal(format!(
                            "harvested block of {} bytes exceeds buffer at {:?}",
                            block.bytes.len(),
                            d.pointer_path
                        )));
                    }
                    buf[..block.bytes.len()].copy_from_slice(&block.bytes);
                }
                CallValue::Struct(cell) => {
                    let layout = StructLayout::compute(&d.element)?;
                    decode_struct_into(&block.bytes, &layout, &mut cell.lock())?;
                }
                CallValue::ByRef(cell) => {
                    let mut slot = cell.lock();
                    let scalar = decode_scalar(slot.base(), &block.bytes)
                        .ok_or_else(|| Error::marshal("harvested scalar block truncated"))?;
                    *slot = scalar;
                }
                CallValue::Null => {}
                _ => {
                    return Err(Error::directive(format!(
                        "path {:?} does not target a pointer value",
                        d.pointer_path
                    )))
                }
            }
        }
        Ok(())
    }

    /// Executor side, pre-call: materialize buffers from received blocks and
    /// splice them into the unpacked slots. Directives pointing inside
    /// struct arguments come back as aux buffers whose addresses the
    /// dispatcher patches into the struct image at pin time.
    pub fn reconstruct(
        &self,
        directives: &[SyncDirective],
        argtypes: &[TypeDescriptor],
        slots: &mut [NativeSlot],
        blocks: &[Option<MemoryBlock>],
    ) -> Result<Vec<AuxBuffer>> {
        let mut aux = Vec::new();
        for (idx, (d, block)) in directives.iter().zip(blocks).enumerate() {
            let Some(block) = block else {
                // Null at capture time: the callee must see NULL
                if d.pointer_path.len() == 1 {
                    slots[d.pointer_path[0]] = NativeSlot::Null;
                }
                continue;
            };
            if d.pointer_path.len() == 1 {
                let slot = slots
                    .get_mut(d.pointer_path[0])
                    .ok_or_else(|| Error::directive("pointer path out of range"))?;
                *slot = NativeSlot::Mem {
                    bytes: block.bytes.clone(),
                    elem: d.element.clone(),
                };
            } else {
                let (slot, offset) = image_offset(argtypes, &d.pointer_path)?;
                aux.push(AuxBuffer {
                    directive: idx,
                    slot,
                    offset,
                    bytes: block.bytes.clone(),
                });
            }
        }
        Ok(aux)
    }

    /// Executor side, post-call: re-read every present buffer. Byte counts
    /// are those captured before the call; a routine that rewrites its
    /// length argument does not change how much is harvested.
    pub fn harvest(
        &self,
        directives: &[SyncDirective],
        slots: &[NativeSlot],
        aux: &[AuxBuffer],
        captured: &[Option<MemoryBlock>],
    ) -> Vec<Option<MemoryBlock>> {
        directives
            .iter()
            .enumerate()
            .map(|(idx, d)| {
                captured.get(idx).and_then(Option::as_ref)?;
                if d.pointer_path.len() == 1 {
                    let bytes = slots.get(d.pointer_path[0])?.mem_bytes()?;
                    Some(MemoryBlock::new(bytes.to_vec()))
                } else {
                    let buf = aux.iter().find(|a| a.directive == idx)?;
                    Some(MemoryBlock::new(buf.bytes.clone()))
                }
            })
            .collect()
    }

    fn resolve_length(&self, d: &SyncDirective, args: &[CallValue]) -> Result<usize> {
        match &d.length {
            LengthSource::Literal(n) => Ok(*n),
            LengthSource::Argument(path) => {
                let value = value_at_path(args, path)?;
                value
                    .scalar()
                    .and_then(|s| s.as_usize())
                    .ok_or_else(|| {
                        Error::directive(format!(
                            "length path {:?} does not resolve to an integral value",
                            path
                        ))
                    })
            }
        }
    }
}

/// Descriptor at a directive path, descending through struct fields
fn desc_at_path<'a>(
    argtypes: &'a [TypeDescriptor],
    path: &[usize],
) -> Result<&'a TypeDescriptor> {
    let (first, rest) = path
        .split_first()
        .ok_or_else(|| Error::directive("empty directive path"))?;
    let mut desc = argtypes
        .get(*first)
        .ok_or_else(|| Error::directive(format!("path {:?} out of range", path)))?;
    for idx in rest {
        desc = desc
            .fields
            .get(*idx)
            .ok_or_else(|| Error::directive(format!("path {:?} out of range", path)))?;
    }
    Ok(desc)
}

/// Live value at a directive path, descending through struct instances and
/// arrays; cells clone shallowly, preserving identity.
fn value_at_path(args: &[CallValue], path: &[usize]) -> Result<CallValue> {
    let (first, rest) = path
        .split_first()
        .ok_or_else(|| Error::directive("empty directive path"))?;
    let mut current = args
        .get(*first)
        .cloned()
        .ok_or_else(|| Error::directive(format!("path {:?} out of range", path)))?;
    for idx in rest {
        current = match current {
            CallValue::Struct(cell) => {
                let inst = cell.lock();
                inst.fields
                    .get(*idx)
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| {
                        Error::directive(format!("path {:?} out of range", path))
                    })?
            }
            CallValue::Array(items) => items
                .get(*idx)
                .cloned()
                .ok_or_else(|| Error::directive(format!("path {:?} out of range", path)))?,
            _ => {
                return Err(Error::directive(format!(
                    "path {:?} descends into a non-aggregate",
                    path
                )))
            }
        };
    }
    Ok(current)
}

/// Slot index and byte offset of a pointer field nested inside a struct
/// argument's flat image.
fn image_offset(argtypes: &[TypeDescriptor], path: &[usize]) -> Result<(usize, usize)> {
    let slot = path[0];
    let mut desc = argtypes
        .get(slot)
        .ok_or_else(|| Error::directive("pointer path out of range"))?
        .clone();
    desc.flags.clear();
    let mut offset = 0usize;
    for idx in &path[1..] {
        let layout = StructLayout::compute(&desc)?;
        let field = layout
            .fields
            .get(*idx)
            .ok_or_else(|| Error::directive("pointer path out of range"))?;
        offset += field.offset;
        desc = field.desc.clone();
        desc.flags.clear();
    }
    Ok((slot, offset))
}

fn is_prefix(a: &[usize], b: &[usize]) -> bool {
    a.len() <= b.len() && a.iter().zip(b).all(|(x, y)| x == y)
}
