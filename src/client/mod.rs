//! Call-site adapter - the origin side of every call
//!
//! Turns a local call expression into a signature lookup, a packed envelope
//! and, on response, in-place rewrites of the caller's mutable arguments.
//! Registration validates everything locally before the executor is asked
//! to apply it, so a misregistered routine is never callable.

use crate::codec::{ArgCodec, CallValue, Scalar};
use crate::desc::{TypeDescriptor, TypeResolver};
use crate::errors::{Error, Result};
use crate::native::{Arch, LibraryKind};
use crate::proto::{CallEnvelope, CallOutcome};
use crate::registry::{CallSignature, CompiledSignature};
use crate::sync::{SyncDirective, SyncEngine};
use crate::transport::{Request, Response, Transport};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of one invocation. On a native fault the value degrades to `None`
/// and the executor's diagnostic is carried alongside; mutated arguments are
/// the caller's own cells, already rewritten in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub value: Option<Scalar>,
    pub fault: Option<String>,
}

impl Invocation {
    pub fn faulted(&self) -> bool {
        self.fault.is_some()
    }
}

/// Client face of one loaded library
pub struct DllClient {
    name: String,
    exec_path: String,
    kind: LibraryKind,
    arch: Arch,
    session_id: String,
    transport: Arc<dyn Transport>,
    routines: DashMap<String, Arc<RoutineClient>>,
}

impl DllClient {
    pub(crate) fn new(
        name: String,
        exec_path: String,
        kind: LibraryKind,
        arch: Arch,
        session_id: String,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            name,
            exec_path,
            kind,
            arch,
            session_id,
            transport,
            routines: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execution-side path form of this library
    pub fn exec_path(&self) -> &str {
        &self.exec_path
    }

    pub fn kind(&self) -> LibraryKind {
        self.kind
    }

    /// Access a routine by name; resolved once, cached for the session.
    pub fn routine(&self, name: &str) -> Result<Arc<RoutineClient>> {
        if let Some(existing) = self.routines.get(name) {
            return Ok(existing.value().clone());
        }
        let response = self.transport.send(Request::ResolveRoutine {
            dll: self.exec_path.clone(),
            routine: name.to_string(),
        })?;
        let stdcall_arity = match response {
            Response::Resolved { stdcall_arity } => stdcall_arity,
            Response::Failed(err) => return Err(err),
            other => {
                return Err(Error::transport(format!(
                    "unexpected response to resolve: {:?}",
                    other
                )))
            }
        };
        let routine = Arc::new(RoutineClient {
            dll: self.exec_path.clone(),
            name: name.to_string(),
            kind: self.kind,
            arch: self.arch,
            session_id: self.session_id.clone(),
            transport: self.transport.clone(),
            stdcall_arity,
            codec: ArgCodec::new(),
            sync: SyncEngine::new(),
            resolver: TypeResolver::new(),
            signature: RwLock::new(None),
        });
        self.routines.insert(name.to_string(), routine.clone());
        Ok(routine)
    }
}

/// Client face of one routine
pub struct RoutineClient {
    dll: String,
    name: String,
    kind: LibraryKind,
    arch: Arch,
    session_id: String,
    transport: Arc<dyn Transport>,
    stdcall_arity: Option<usize>,
    codec: ArgCodec,
    sync: SyncEngine,
    resolver: TypeResolver,
    signature: RwLock<Option<Arc<CompiledSignature>>>,
}

impl RoutineClient {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a signature currently governs this routine
    pub fn registered(&self) -> bool {
        self.signature.read().is_some()
    }

    /// Register argument and return descriptors plus sync directives.
    ///
    /// Validation runs locally first; only a signature that compiles is sent
    /// to the executor. Re-registration replaces the previous signature
    /// atomically, never merging with it.
    pub fn register(
        &self,
        arg_types: Vec<TypeDescriptor>,
        return_type: TypeDescriptor,
        sync: Vec<SyncDirective>,
    ) -> Result<()> {
        let declared = CallSignature::new(arg_types, return_type).with_sync(sync);
        let compiled = declared.compile(&self.resolver)?;
        let response = self.transport.send(Request::Register {
            dll: self.dll.clone(),
            routine: self.name.clone(),
            signature: declared,
        })?;
        match response {
            Response::Registered => {
                *self.signature.write() = Some(Arc::new(compiled));
                debug!(routine = %self.name, "signature registered");
                Ok(())
            }
            Response::Failed(err) => Err(err),
            other => Err(Error::transport(format!(
                "unexpected response to register: {:?}",
                other
            ))),
        }
    }

    /// Invoke the routine with positional arguments.
    ///
    /// By-reference cells among `args` are rewritten in place before this
    /// returns, so every alias the caller holds observes the mutations.
    pub fn invoke(&self, args: &[CallValue]) -> Result<Invocation> {
        self.transport
            .log(&self.session_id, &format!("calling '{}'", self.name));
        let signature = self.signature.read().clone();
        match signature {
            Some(signature) => self.invoke_registered(&signature, args),
            None => self.invoke_default(args),
        }
    }

    fn invoke_registered(
        &self,
        signature: &CompiledSignature,
        args: &[CallValue],
    ) -> Result<Invocation> {
        if args.len() != signature.arg_types.len() {
            return Err(Error::marshal(format!(
                "'{}' takes {} arguments, got {}",
                self.name,
                signature.arg_types.len(),
                args.len()
            )));
        }
        let wire = self.codec.pack_args(&signature.arg_types, args)?;
        let blocks = self.sync.capture(&signature.sync, &signature.arg_types, args)?;
        let envelope = self.dispatch(CallEnvelope {
            dll: self.dll.clone(),
            routine: self.name.clone(),
            args: wire,
            blocks,
        })?;
        self.sync.restore(&signature.sync, args, &envelope.blocks)?;
        self.codec
            .apply_return_slots(&signature.arg_types, args, &envelope.args)?;
        self.finish(envelope.outcome)
    }

    /// Unregistered call: platform default argument assumptions. Every slot
    /// is coerced to the default integer; the convention/width combination
    /// decides whether a count mismatch is tolerated or raised.
    fn invoke_default(&self, args: &[CallValue]) -> Result<Invocation> {
        if !self.arch.tolerates_count_mismatch(self.kind.convention()) {
            if let Some(arity) = self.stdcall_arity {
                if args.len() != arity {
                    return Err(Error::marshal(format!(
                        "procedure '{}' called with {} arguments, stack expects {}",
                        self.name,
                        args.len(),
                        arity
                    )));
                }
            }
        }
        let mut wire = Vec::with_capacity(args.len());
        for (index, arg) in args.iter().enumerate() {
            let scalar = arg
                .scalar()
                .ok_or_else(|| {
                    Error::marshal(format!(
                        "argument {}: unregistered routines take plain integers",
                        index + 1
                    ))
                })?
                .coerce(crate::desc::BaseType::I32)?;
            wire.push(crate::codec::WireEntry::scalar(None, scalar));
        }
        let envelope = self.dispatch(CallEnvelope {
            dll: self.dll.clone(),
            routine: self.name.clone(),
            args: wire,
            blocks: Vec::new(),
        })?;
        self.finish(envelope.outcome)
    }

    fn dispatch(&self, envelope: CallEnvelope) -> Result<crate::proto::ReturnEnvelope> {
        match self.transport.send(Request::Call(envelope))? {
            Response::Returned(envelope) => Ok(envelope),
            Response::Failed(err) => Err(err),
            other => Err(Error::transport(format!(
                "unexpected response to call: {:?}",
                other
            ))),
        }
    }

    fn finish(&self, outcome: CallOutcome) -> Result<Invocation> {
        match outcome {
            CallOutcome::Success(value) => {
                if self.kind.checks_hresult() {
                    if let Some(hresult) = value.as_ref().and_then(Scalar::as_i128) {
                        if (hresult as i32) < 0 {
                            return Err(Error::NativeFault {
                                what: format!(
                                    "'{}' returned HRESULT 0x{:08X}",
                                    self.name, hresult as i32 as u32
                                ),
                            });
                        }
                    }
                }
                Ok(Invocation {
                    value,
                    fault: None,
                })
            }
            CallOutcome::Fault(fault) => {
                // Degraded result: value absent, arguments left at whatever
                // state the executor harvested.
                warn!(routine = %self.name, %fault, "remote native fault");
                Ok(Invocation {
                    value: None,
                    fault: Some(fault),
                })
            }
        }
    }
}
