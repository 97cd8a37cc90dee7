//! Routine invocation protocol - the executor side
//!
//! Per call, strictly sequential: unpack -> sync reconstruction -> native
//! invoke -> sync harvest -> return packing. The three capabilities a
//! routine server needs are explicit collaborators injected by value: the
//! argument codec, the type resolver and the sync engine.
//!
//! A fault in the foreign routine never terminates the serving loop; it is
//! logged with full detail and travels back as an explicit outcome, together
//! with whatever argument and memory state the call left behind.

use crate::codec::{ArgCodec, NativeSlot, Scalar};
use crate::desc::{BaseType, NativeType, TypeDescriptor, TypeResolver};
use crate::errors::{Error, Result};
use crate::native::{
    Arch, FunctionCall, InProcessLibrary, Library, LibraryKind, PreparedArgs, RetClass,
    RoutineSym,
};
use crate::proto::{CallEnvelope, CallOutcome, ReturnEnvelope};
use crate::registry::{CallSignature, CompiledSignature, StructRegistry};
use crate::session::path_to_exec;
use crate::sync::{AuxBuffer, SyncEngine};
use crate::transport::{Request, Response};
use std::collections::HashMap;
use tracing::{debug, error, info};

/// Serves one routine of one library
pub struct RoutineServer {
    name: String,
    sym: RoutineSym,
    codec: ArgCodec,
    resolver: TypeResolver,
    sync: SyncEngine,
    signature: Option<CompiledSignature>,
}

impl RoutineServer {
    fn new(name: String, sym: RoutineSym) -> Self {
        Self {
            name,
            sym,
            codec: ArgCodec::new(),
            resolver: TypeResolver::new(),
            sync: SyncEngine::new(),
            signature: None,
        }
    }

    pub fn stdcall_arity(&self) -> Option<usize> {
        self.sym.stdcall_arity
    }

    /// Apply a declared signature to this routine. Compilation happens
    /// before any state changes, so a failed registration leaves the
    /// previous signature untouched; a successful one replaces it wholesale.
    pub fn register(&mut self, declared: CallSignature, structs: &StructRegistry) -> Result<()> {
        let compiled = declared.compile(&self.resolver)?;
        for desc in &compiled.arg_types {
            structs.register_tree(desc)?;
        }
        structs.register_tree(&compiled.return_type)?;
        info!(
            routine = %self.name,
            args = compiled.arg_types.len(),
            directives = compiled.sync.len(),
            "signature applied"
        );
        self.signature = Some(compiled);
        Ok(())
    }

    /// Execute one call. Protocol-shape errors surface as `Err`; a fault in
    /// the foreign routine itself is contained in the envelope's outcome.
    pub fn call(&self, env: &CallEnvelope, structs: &StructRegistry) -> Result<ReturnEnvelope> {
        let default;
        let signature = match &self.signature {
            Some(sig) => sig,
            None => {
                default = default_signature(env.args.len())?;
                &default
            }
        };

        let lookup = |tag: &str| structs.layout(tag);
        let mut slots = self
            .codec
            .unpack_args(&signature.arg_types, &env.args, &lookup)?;
        let mut aux =
            self.sync
                .reconstruct(&signature.sync, &signature.arg_types, &mut slots, &env.blocks)?;

        debug!(routine = %self.name, slots = slots.len(), "invoking");
        let outcome = match self.invoke(signature, &mut slots, &mut aux) {
            Ok(value) => CallOutcome::Success(value),
            Err(fault) => {
                // Deliberate containment: the serving loop survives, the
                // caller receives the fault as data.
                error!(routine = %self.name, %fault, "native routine fault");
                CallOutcome::Fault(fault.to_string())
            }
        };

        let blocks = self.sync.harvest(&signature.sync, &slots, &aux, &env.blocks);
        let args = self.codec.pack_return_slots(&signature.arg_types, &slots);
        Ok(ReturnEnvelope {
            outcome,
            args,
            blocks,
        })
    }

    fn invoke(
        &self,
        signature: &CompiledSignature,
        slots: &mut [NativeSlot],
        aux: &mut [AuxBuffer],
    ) -> Result<Option<Scalar>> {
        // Patch nested-buffer addresses into their struct images before any
        // slot address is taken; allocations must not move from here on.
        let mut extra: Vec<Vec<u8>> = Vec::new();
        for buf in aux.iter_mut() {
            let addr = buf.bytes.as_mut_ptr() as u64;
            let image = slots[buf.slot]
                .mem_bytes_mut()
                .ok_or_else(|| Error::directive("nested directive targets a by-value slot"))?;
            if image.len() < buf.offset + 8 {
                return Err(Error::marshal("struct image too small for pointer fixup"));
            }
            image[buf.offset..buf.offset + 8].copy_from_slice(&addr.to_le_bytes());
        }

        let mut prepared = PreparedArgs::new();
        for (slot, native) in slots.iter_mut().zip(&signature.natives) {
            prepare_slot(slot, native, &mut prepared, &mut extra)
                .map_err(|e| Error::NativeFault { what: e.to_string() })?;
        }

        let call = FunctionCall::new(self.sym.ptr, ret_class(&signature.ret)?);
        // SAFETY: slot allocations are pinned for the duration of the call;
        // the prepared registers were resolved against the registered
        // signature.
        unsafe { call.call(&prepared) }.map_err(|e| Error::NativeFault {
            what: e.to_string(),
        })
    }
}

fn prepare_slot(
    slot: &mut NativeSlot,
    native: &NativeType,
    prepared: &mut PreparedArgs,
    extra: &mut Vec<Vec<u8>>,
) -> std::result::Result<(), crate::native::CallError> {
    match native {
        NativeType::Int(_) => {
            let bits = match slot {
                NativeSlot::Int { bits, .. } => *bits,
                _ => 0,
            };
            prepared.push_int(bits)
        }
        NativeType::Float(_) => {
            let bits = match slot {
                NativeSlot::Float { bits, .. } => *bits,
                _ => 0,
            };
            prepared.push_float(bits)
        }
        NativeType::Pointer => {
            let addr = pin_slot(slot, extra);
            prepared.push_int(addr)
        }
        NativeType::StructByValue(layout) => {
            let bytes = match slot {
                NativeSlot::StructVal { bytes, .. } => bytes.as_slice(),
                _ => &[],
            };
            let mut offset = 0;
            while offset < layout.size {
                let mut word = [0u8; 8];
                let end = (offset + 8).min(bytes.len());
                if offset < end {
                    word[..end - offset].copy_from_slice(&bytes[offset..end]);
                }
                prepared.push_int(u64::from_le_bytes(word))?;
                offset += 8;
            }
            Ok(())
        }
        NativeType::Void => Ok(()),
    }
}

/// Address a pointer slot passes to the callee, pinning intermediate
/// pointer levels in `extra`.
fn pin_slot(slot: &mut NativeSlot, extra: &mut Vec<Vec<u8>>) -> u64 {
    match slot {
        NativeSlot::Mem { bytes, .. } => bytes.as_mut_ptr() as u64,
        NativeSlot::PtrTo(inner) => {
            let addr = pin_slot(inner, extra);
            extra.push(addr.to_le_bytes().to_vec());
            extra.last().map(|b| b.as_ptr() as u64).unwrap_or(0)
        }
        NativeSlot::Null | NativeSlot::Placeholder => 0,
        _ => 0,
    }
}

fn ret_class(native: &NativeType) -> Result<RetClass> {
    Ok(match native {
        NativeType::Void => RetClass::Void,
        NativeType::Int(base) => RetClass::Int(*base),
        NativeType::Float(base) => RetClass::Float(*base),
        NativeType::Pointer => RetClass::Int(BaseType::UsizePtr),
        NativeType::StructByValue(_) => {
            return Err(Error::unsupported("struct return value"))
        }
    })
}

/// Default argument assumptions for an unregistered routine: every slot the
/// platform default integer, likewise the return value.
fn default_signature(argc: usize) -> Result<CompiledSignature> {
    let arg_types: Vec<TypeDescriptor> = (0..argc)
        .map(|_| TypeDescriptor::fundamental(BaseType::I32))
        .collect();
    CallSignature::new(arg_types, TypeDescriptor::fundamental(BaseType::I32))
        .compile(&TypeResolver::new())
}

/// Per-library routine map; routine servers are created on first access.
pub struct DllServer {
    exec_path: String,
    lib: Library,
    routines: HashMap<String, RoutineServer>,
}

impl DllServer {
    fn new(exec_path: String, lib: Library) -> Self {
        Self {
            exec_path,
            lib,
            routines: HashMap::new(),
        }
    }

    fn routine_mut(&mut self, name: &str) -> Result<&mut RoutineServer> {
        if !self.routines.contains_key(name) {
            let sym = self.lib.routine(name)?;
            debug!(dll = %self.exec_path, routine = %name, "routine server created");
            self.routines
                .insert(name.to_string(), RoutineServer::new(name.to_string(), sym));
        }
        Ok(self
            .routines
            .get_mut(name)
            .expect("routine entry just inserted"))
    }
}

/// The per-session executor: owns the DLL registry, the struct registry and
/// the serving state. Serves exactly one request at a time.
pub struct Executor {
    session: String,
    arch: Arch,
    libraries: HashMap<String, DllServer>,
    virtual_libs: HashMap<String, InProcessLibrary>,
    structs: StructRegistry,
}

impl Executor {
    pub fn new(session: impl Into<String>, arch: Arch) -> Self {
        Self {
            session: session.into(),
            arch,
            libraries: HashMap::new(),
            virtual_libs: HashMap::new(),
            structs: StructRegistry::new(),
        }
    }

    /// Serve a routine table from within the executor process under the
    /// given library name.
    pub fn with_virtual_library(mut self, name: impl Into<String>, lib: InProcessLibrary) -> Self {
        self.virtual_libs.insert(name.into(), lib);
        self
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// Handle one request. Never panics the loop: failures become typed
    /// error responses.
    pub fn handle(&mut self, request: Request) -> Response {
        match self.dispatch(request) {
            Ok(response) => response,
            Err(err) => Response::Failed(err),
        }
    }

    fn dispatch(&mut self, request: Request) -> Result<Response> {
        match request {
            Request::LoadLibrary { path, kind } => self.load_library(&path, kind),
            Request::ResolveRoutine { dll, routine } => {
                let server = self.library_mut(&dll)?.routine_mut(&routine)?;
                Ok(Response::Resolved {
                    stdcall_arity: server.stdcall_arity(),
                })
            }
            Request::Register {
                dll,
                routine,
                signature,
            } => {
                let structs = &self.structs;
                // Split borrow: the library map and the struct registry are
                // disjoint fields.
                let server = self
                    .libraries
                    .get_mut(&dll)
                    .ok_or_else(|| Error::Load {
                        what: format!("library '{}' not loaded", dll),
                    })?
                    .routine_mut(&routine)?;
                server.register(signature, structs)?;
                Ok(Response::Registered)
            }
            Request::Call(env) => {
                let structs = &self.structs;
                let server = self
                    .libraries
                    .get_mut(&env.dll)
                    .ok_or_else(|| Error::Load {
                        what: format!("library '{}' not loaded", env.dll),
                    })?
                    .routine_mut(&env.routine)?;
                let envelope = server.call(&env, structs)?;
                Ok(Response::Returned(envelope))
            }
            Request::Log { session, message } => {
                info!(target: "callbridge::remote", %session, "{}", message);
                Ok(Response::Ack)
            }
            Request::Terminate => {
                info!(session = %self.session, "executor terminating");
                Ok(Response::Ack)
            }
        }
    }

    fn library_mut(&mut self, exec_path: &str) -> Result<&mut DllServer> {
        self.libraries.get_mut(exec_path).ok_or_else(|| Error::Load {
            what: format!("library '{}' not loaded", exec_path),
        })
    }

    /// Idempotent per path: a second load of the same library returns the
    /// existing entry.
    fn load_library(&mut self, path: &str, kind: LibraryKind) -> Result<Response> {
        let exec_path = path_to_exec(path);
        if !self.libraries.contains_key(&exec_path) {
            let lib = match self.virtual_libs.remove(path) {
                Some(table) => Library::InProcess(table),
                None => Library::open(path)?,
            };
            info!(session = %self.session, %path, ?kind, "library loaded");
            self.libraries
                .insert(exec_path.clone(), DllServer::new(exec_path.clone(), lib));
        }
        Ok(Response::Loaded { exec_path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::WireEntry;

    extern "C" fn add_ints(a: i16, b: i16) -> i16 {
        a + b
    }

    fn executor() -> Executor {
        Executor::new("test", Arch::Win64).with_virtual_library(
            "demo",
            InProcessLibrary::new().routine("add_ints", add_ints as *const (), 2),
        )
    }

    fn load(exec: &mut Executor) -> String {
        match exec.handle(Request::LoadLibrary {
            path: "demo".into(),
            kind: LibraryKind::Cdll,
        }) {
            Response::Loaded { exec_path } => exec_path,
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn load_is_idempotent_per_path() {
        let mut exec = executor();
        let first = load(&mut exec);
        let second = load(&mut exec);
        assert_eq!(first, second);
        assert_eq!(exec.libraries.len(), 1);
    }

    #[test]
    fn registered_call_roundtrip() {
        let mut exec = executor();
        let dll = load(&mut exec);
        let sig = CallSignature::new(
            vec![
                TypeDescriptor::fundamental(BaseType::I16),
                TypeDescriptor::fundamental(BaseType::I16),
            ],
            TypeDescriptor::fundamental(BaseType::I16),
        );
        let resp = exec.handle(Request::Register {
            dll: dll.clone(),
            routine: "add_ints".into(),
            signature: sig,
        });
        assert!(matches!(resp, Response::Registered));

        let env = CallEnvelope {
            dll,
            routine: "add_ints".into(),
            args: vec![
                WireEntry::scalar(None, Scalar::I16(3)),
                WireEntry::scalar(None, Scalar::I16(4)),
            ],
            blocks: vec![],
        };
        match exec.handle(Request::Call(env)) {
            Response::Returned(envelope) => {
                assert_eq!(envelope.outcome, CallOutcome::Success(Some(Scalar::I16(7))));
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn unknown_routine_fails_by_name() {
        let mut exec = executor();
        let dll = load(&mut exec);
        let resp = exec.handle(Request::ResolveRoutine {
            dll,
            routine: "absent".into(),
        });
        assert!(matches!(
            resp,
            Response::Failed(Error::Symbol { .. })
        ));
    }

    #[test]
    fn null_routine_faults_without_killing_the_executor() {
        let mut exec = Executor::new("test", Arch::Win64).with_virtual_library(
            "demo",
            InProcessLibrary::new()
                .routine("broken", core::ptr::null(), 0)
                .routine("add_ints", add_ints as *const (), 2),
        );
        let dll = load(&mut exec);
        let env = CallEnvelope {
            dll: dll.clone(),
            routine: "broken".into(),
            args: vec![],
            blocks: vec![],
        };
        match exec.handle(Request::Call(env)) {
            Response::Returned(envelope) => assert!(envelope.outcome.is_fault()),
            other => panic!("unexpected response: {:?}", other),
        }
        // The serving state survives; the next call succeeds.
        let sig = CallSignature::new(
            vec![
                TypeDescriptor::fundamental(BaseType::I16),
                TypeDescriptor::fundamental(BaseType::I16),
            ],
            TypeDescriptor::fundamental(BaseType::I16),
        );
        exec.handle(Request::Register {
            dll: dll.clone(),
            routine: "add_ints".into(),
            signature: sig,
        });
        let env = CallEnvelope {
            dll,
            routine: "add_ints".into(),
            args: vec![
                WireEntry::scalar(None, Scalar::I16(1)),
                WireEntry::scalar(None, Scalar::I16(2)),
            ],
            blocks: vec![],
        };
        match exec.handle(Request::Call(env)) {
            Response::Returned(envelope) => {
                assert_eq!(envelope.outcome, CallOutcome::Success(Some(Scalar::I16(3))));
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }
}
