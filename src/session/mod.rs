//! Session - one origin process paired with one executor
//!
//! Owns the configuration, the transport and the DLL registry. Calls within
//! a session are strictly synchronous and sequential; independent sessions
//! share nothing.

use crate::client::DllClient;
use crate::config::SessionConfig;
use crate::errors::Result;
use crate::native::LibraryKind;
use crate::server::Executor;
use crate::transport::{LoopbackTransport, Request, Transport};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

pub struct Session {
    id: String,
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    dlls: DashMap<String, Arc<DllClient>>,
}

impl Session {
    /// Start a session with an in-process executor built from the config.
    pub fn new(config: SessionConfig) -> Result<Self> {
        let executor = Executor::new(config.id.clone(), config.arch);
        Self::with_executor(config, executor)
    }

    /// Start a session over a caller-built executor; used to serve virtual
    /// routine tables.
    pub fn with_executor(config: SessionConfig, executor: Executor) -> Result<Self> {
        let transport = Arc::new(LoopbackTransport::spawn(executor)?);
        Ok(Self::with_transport(config, transport))
    }

    /// Attach to an already-running executor through any transport.
    pub fn with_transport(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        crate::logging::init_with_config(crate::logging::LogConfig::from_session(&config));
        info!(session = %config.id, arch = ?config.arch, "session up");
        Self {
            id: config.id.clone(),
            config,
            transport,
            dlls: DashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Load a library on the executing side; idempotent per path.
    pub fn load_library(&self, path: &str, kind: LibraryKind) -> Result<Arc<DllClient>> {
        if let Some(existing) = self.dlls.get(path) {
            return Ok(existing.value().clone());
        }
        let response = self.transport.send(Request::LoadLibrary {
            path: path.to_string(),
            kind,
        })?;
        let exec_path = match response {
            crate::transport::Response::Loaded { exec_path } => exec_path,
            crate::transport::Response::Failed(err) => return Err(err),
            other => {
                return Err(crate::errors::Error::transport(format!(
                    "unexpected response to load: {:?}",
                    other
                )))
            }
        };
        let dll = Arc::new(DllClient::new(
            path.to_string(),
            exec_path,
            kind,
            self.config.arch,
            self.id.clone(),
            self.transport.clone(),
        ));
        self.dlls.insert(path.to_string(), dll.clone());
        Ok(dll)
    }

    /// Best-effort log line onto the side channel.
    pub fn log(&self, message: &str) {
        self.transport.log(&self.id, message);
    }

    /// Shut the executor down and drop the registries. The session is not
    /// usable afterwards.
    pub fn terminate(&self) {
        let _ = self.transport.send(Request::Terminate);
        self.dlls.clear();
        info!(session = %self.id, "session down");
    }
}

/// Origin-side path to its execution-side form: absolute unix paths map
/// onto the `Z:` drive, names and already-windows paths pass through.
pub fn path_to_exec(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('/') {
        format!("Z:\\{}", rest.replace('/', "\\"))
    } else {
        path.to_string()
    }
}

/// Execution-side path back to its origin form.
pub fn path_from_exec(path: &str) -> String {
    let lower = path.get(..2).map(str::to_ascii_lowercase);
    if lower.as_deref() == Some("z:") {
        path[2..].replace('\\', "/")
    } else {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_paths_map_onto_the_z_drive() {
        assert_eq!(path_to_exec("/opt/demo.dll"), "Z:\\opt\\demo.dll");
        assert_eq!(path_from_exec("Z:\\opt\\demo.dll"), "/opt/demo.dll");
    }

    #[test]
    fn bare_names_pass_through() {
        assert_eq!(path_to_exec("demo.dll"), "demo.dll");
        assert_eq!(path_from_exec("demo.dll"), "demo.dll");
    }

    #[test]
    fn translation_roundtrips() {
        let origin = "/usr/lib/sample.dll";
        assert_eq!(path_from_exec(&path_to_exec(origin)), origin);
    }
}
