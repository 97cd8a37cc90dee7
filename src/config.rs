//! Layered session configuration
//!
//! Resolution order, high to low: explicit overrides, `.callbridge.json`
//! found in the working directory, the `$CALLBRIDGE` directory, the home
//! directory, `/etc/callbridge`, then built-in defaults.

use crate::errors::{Error, Result};
use crate::native::Arch;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = ".callbridge.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unique session id; generated when absent
    #[serde(default = "generate_session_id")]
    pub id: String,

    /// Mirror executor stdout into the session log
    #[serde(default = "default_true")]
    pub stdout: bool,

    /// Mirror executor stderr into the session log
    #[serde(default = "default_true")]
    pub stderr: bool,

    /// Write log output to a file
    #[serde(default)]
    pub log_write: bool,

    /// 0 = off, 1 = info, 2 = debug, 3+ = trace
    #[serde(default)]
    pub log_level: u8,

    /// Declared architecture of the executing side
    #[serde(default)]
    pub arch: Arch,

    /// Session working directory
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            id: generate_session_id(),
            stdout: true,
            stderr: true,
            log_write: false,
            log_level: 0,
            arch: Arch::default(),
            dir: None,
        }
    }
}

/// Partial configuration, merged over lower-priority layers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigOverlay {
    pub id: Option<String>,
    pub stdout: Option<bool>,
    pub stderr: Option<bool>,
    pub log_write: Option<bool>,
    pub log_level: Option<u8>,
    pub arch: Option<Arch>,
    pub dir: Option<PathBuf>,
}

impl SessionConfig {
    /// Resolve the full configuration with `overlay` as the highest layer.
    pub fn load(overlay: ConfigOverlay) -> Result<Self> {
        let mut config = Self::default();
        for location in search_locations().iter().rev() {
            let path = location.join(CONFIG_FILE);
            if path.is_file() {
                config.apply(read_config_file(&path)?);
            }
        }
        config.apply(overlay);
        Ok(config)
    }

    fn apply(&mut self, overlay: ConfigOverlay) {
        if let Some(id) = overlay.id {
            self.id = id;
        }
        if let Some(stdout) = overlay.stdout {
            self.stdout = stdout;
        }
        if let Some(stderr) = overlay.stderr {
            self.stderr = stderr;
        }
        if let Some(log_write) = overlay.log_write {
            self.log_write = log_write;
        }
        if let Some(log_level) = overlay.log_level {
            self.log_level = log_level;
        }
        if let Some(arch) = overlay.arch {
            self.arch = arch;
        }
        if let Some(dir) = overlay.dir {
            self.dir = Some(dir);
        }
    }
}

/// Parse one configuration file, naming it on failure.
pub fn read_config_file(path: &Path) -> Result<ConfigOverlay> {
    let content = std::fs::read_to_string(path).map_err(|_| Error::Config {
        what: format!("config file could not be read: '{}'", path.display()),
    })?;
    serde_json::from_str(&content).map_err(|_| Error::Config {
        what: format!("config file could not be parsed: '{}'", path.display()),
    })
}

/// Config file locations, high priority first
fn search_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        locations.push(cwd);
    }
    if let Some(dir) = std::env::var_os("CALLBRIDGE") {
        locations.push(PathBuf::from(dir));
    }
    if let Some(home) = std::env::var_os("HOME") {
        locations.push(PathBuf::from(home));
    }
    locations.push(PathBuf::from("/etc/callbridge"));
    locations
}

fn generate_session_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let mut hasher = DefaultHasher::new();
    std::process::id().hash(&mut hasher);
    COUNTER.fetch_add(1, Ordering::Relaxed).hash(&mut hasher);
    if let Ok(now) = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        now.subsec_nanos().hash(&mut hasher);
        now.as_secs().hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_quiet_and_win64() {
        let config = SessionConfig::default();
        assert_eq!(config.log_level, 0);
        assert_eq!(config.arch, Arch::Win64);
        assert!(config.stdout);
        assert_eq!(config.id.len(), 16);
    }

    #[test]
    fn overlay_wins_over_defaults() {
        let mut config = SessionConfig::default();
        config.apply(ConfigOverlay {
            log_level: Some(2),
            arch: Some(Arch::Win32),
            ..Default::default()
        });
        assert_eq!(config.log_level, 2);
        assert_eq!(config.arch, Arch::Win32);
        assert!(config.stderr);
    }

    #[test]
    fn config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{"arch": "win32", "log_level": 1}"#).unwrap();
        let overlay = read_config_file(&path).unwrap();
        assert_eq!(overlay.arch, Some(Arch::Win32));
        assert_eq!(overlay.log_level, Some(1));
        assert!(overlay.id.is_none());
    }

    #[test]
    fn unparsable_config_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "{ not json").unwrap();
        let err = read_config_file(&path).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains(".callbridge.json"));
    }

    #[test]
    fn session_ids_are_unique_enough() {
        assert_ne!(generate_session_id(), generate_session_id());
    }
}
