//! Scoped mutation of process-wide environment variables and working directory.
//!
//! Backends read `PATH`, `NODE_PATH` and `RAYON_NUM_THREADS` from the
//! inherited environment, and npm must run inside the install directory.
//! [`ScopedEnv`] records the prior value the first time each variable (or the
//! working directory) is touched and puts everything back when dropped, on
//! every exit path.
//!
//! Only one `ScopedEnv` should be live at a time; concurrent compiles are the
//! caller's to serialize.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{CompileKitError, Result};

/// Restores touched environment state on drop
#[derive(Debug, Default)]
pub struct ScopedEnv {
    saved_vars: Vec<(OsString, Option<OsString>)>,
    saved_cwd: Option<PathBuf>,
}

impl ScopedEnv {
    pub fn new() -> Self {
        Self::default()
    }

    fn remember(&mut self, key: &OsStr) {
        if self.saved_vars.iter().any(|(k, _)| k == key) {
            return;
        }
        self.saved_vars
            .push((key.to_os_string(), std::env::var_os(key)));
    }

    /// Set `key` for the lifetime of the guard.
    pub fn set_var(&mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> &mut Self {
        let key = key.as_ref();
        self.remember(key);
        std::env::set_var(key, value);
        self
    }

    /// Put `dirs` in front of the current `PATH`.
    pub fn prepend_path(&mut self, dirs: &[PathBuf]) -> Result<&mut Self> {
        if dirs.is_empty() {
            return Ok(self);
        }
        let mut entries: Vec<PathBuf> = dirs.to_vec();
        if let Some(current) = std::env::var_os("PATH") {
            entries.extend(std::env::split_paths(&current));
        }
        let joined = std::env::join_paths(entries)
            .map_err(|e| CompileKitError::Environment(format!("Invalid PATH entry: {e}")))?;
        debug!("Widening PATH with {:?}", dirs);
        Ok(self.set_var("PATH", joined))
    }

    /// Change the process working directory for the lifetime of the guard.
    pub fn change_dir(&mut self, dir: &Path) -> Result<&mut Self> {
        if self.saved_cwd.is_none() {
            self.saved_cwd = Some(std::env::current_dir().map_err(|e| {
                CompileKitError::Environment(format!("Cannot read working directory: {e}"))
            })?);
        }
        std::env::set_current_dir(dir).map_err(|e| {
            CompileKitError::Io(format!("Cannot change into {}: {e}", dir.display()))
        })?;
        Ok(self)
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (key, previous) in self.saved_vars.drain(..).rev() {
            match previous {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
        if let Some(cwd) = self.saved_cwd.take() {
            if let Err(e) = std::env::set_current_dir(&cwd) {
                warn!("Failed to restore working directory {:?}: {}", cwd, e);
            }
        }
    }
}
