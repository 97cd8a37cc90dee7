//! Transport interface and the in-process loopback implementation
//!
//! The engine consumes a synchronous request/response channel; a channel
//! failure is fatal to the session and never retried. Log lines travel on a
//! separate fire-and-forget lane so they can never block or fail the call
//! path.
//!
//! The loopback transport pairs the call site with an executor on a
//! dedicated thread and round-trips every message through its serialized
//! form, so wire-safety is exercised even in-process.

use crate::errors::{Error, Result};
use crate::native::LibraryKind;
use crate::proto::{CallEnvelope, ReturnEnvelope};
use crate::registry::CallSignature;
use crate::server::Executor;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::thread::JoinHandle;

#[derive(Debug, Serialize, Deserialize)]
pub enum Request {
    LoadLibrary {
        path: String,
        kind: LibraryKind,
    },
    ResolveRoutine {
        dll: String,
        routine: String,
    },
    Register {
        dll: String,
        routine: String,
        signature: CallSignature,
    },
    Call(CallEnvelope),
    Log {
        session: String,
        message: String,
    },
    Terminate,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    Loaded { exec_path: String },
    Resolved { stdcall_arity: Option<usize> },
    Registered,
    Returned(ReturnEnvelope),
    Ack,
    Failed(Error),
}

/// Synchronous channel to the executing side
pub trait Transport: Send + Sync {
    /// One request, one response; blocks until the peer answers.
    fn send(&self, request: Request) -> Result<Response>;

    /// Best-effort log forwarding; must never block or fail the call path.
    fn log(&self, session: &str, message: &str);
}

/// In-process reference transport: an executor thread behind bounded
/// channels, messages crossing in bincode form.
pub struct LoopbackTransport {
    req_tx: flume::Sender<Vec<u8>>,
    resp_rx: flume::Receiver<Vec<u8>>,
    log_tx: flume::Sender<(String, String)>,
    // One in-flight request at a time; memsync ordering depends on it
    pairing: Mutex<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LoopbackTransport {
    pub fn spawn(executor: Executor) -> Result<Self> {
        let (req_tx, req_rx) = flume::bounded::<Vec<u8>>(1);
        let (resp_tx, resp_rx) = flume::bounded::<Vec<u8>>(1);
        let (log_tx, log_rx) = flume::unbounded::<(String, String)>();
        let handle = std::thread::Builder::new()
            .name("callbridge-executor".into())
            .spawn(move || serve(executor, req_rx, resp_tx, log_rx))
            .map_err(|e| Error::transport(format!("failed to spawn executor: {}", e)))?;
        Ok(Self {
            req_tx,
            resp_rx,
            log_tx,
            pairing: Mutex::new(()),
            handle: Mutex::new(Some(handle)),
        })
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, request: Request) -> Result<Response> {
        let _guard = self.pairing.lock();
        let frame =
            bincode::serialize(&request).map_err(|e| Error::transport(e.to_string()))?;
        self.req_tx
            .send(frame)
            .map_err(|_| Error::transport("executor channel closed"))?;
        let frame = self
            .resp_rx
            .recv()
            .map_err(|_| Error::transport("executor channel closed"))?;
        bincode::deserialize(&frame).map_err(|e| Error::transport(e.to_string()))
    }

    fn log(&self, session: &str, message: &str) {
        let _ = self
            .log_tx
            .try_send((session.to_string(), message.to_string()));
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        if let Ok(frame) = bincode::serialize(&Request::Terminate) {
            let _ = self.req_tx.try_send(frame);
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

fn serve(
    mut executor: Executor,
    req_rx: flume::Receiver<Vec<u8>>,
    resp_tx: flume::Sender<Vec<u8>>,
    log_rx: flume::Receiver<(String, String)>,
) {
    while let Ok(frame) = req_rx.recv() {
        // Drain pending log lines before touching the call path
        while let Ok((session, message)) = log_rx.try_recv() {
            executor.handle(Request::Log { session, message });
        }
        let response = match bincode::deserialize::<Request>(&frame) {
            Ok(request) => {
                let terminate = matches!(request, Request::Terminate);
                let response = executor.handle(request);
                if terminate {
                    let _ = resp_tx.send(encode_response(&response));
                    break;
                }
                response
            }
            Err(e) => Response::Failed(Error::transport(e.to_string())),
        };
        if resp_tx.send(encode_response(&response)).is_err() {
            break;
        }
    }
}

fn encode_response(response: &Response) -> Vec<u8> {
    bincode::serialize(response).unwrap_or_default()
}
