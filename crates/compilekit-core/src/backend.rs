//! Backend detection and selection
//!
//! Two backends can be installed under the modules directory: the standalone
//! `tailwindcli` executable and the `tailwindcss` npm packages. Presence is
//! re-checked on the filesystem every time; only version strings are cached.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::fsutil;
use crate::platform::Platform;
use crate::settings::{CompilerMode, EnvironmentTier};
use crate::state::{StateStore, NODE_VERSION_KEY, STANDALONE_VERSION_KEY};

/// Compiler backend tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Standalone,
    Node,
}

impl Backend {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Standalone => "Standalone CLI",
            Self::Node => "Node.js",
        }
    }

    fn version_key(&self) -> &'static str {
        match self {
            Self::Standalone => STANDALONE_VERSION_KEY,
            Self::Node => NODE_VERSION_KEY,
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Deterministic file locations under the modules directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    root: PathBuf,
    windows: bool,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>, platform: &Platform) -> Self {
        InstallLayout {
            root: root.into(),
            windows: platform.is_windows(),
        }
    }

    pub fn for_host(root: impl Into<PathBuf>) -> Self {
        Self::new(root, &Platform::detect())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_windows(&self) -> bool {
        self.windows
    }

    /// Installed standalone binary for this platform
    pub fn standalone_binary(&self) -> PathBuf {
        if self.windows {
            self.root.join("tailwindcli.exe")
        } else {
            self.root.join("tailwindcli")
        }
    }

    /// Both unix and windows binary names, platform name first
    pub fn standalone_candidates(&self) -> [PathBuf; 2] {
        let unix = self.root.join("tailwindcli");
        let win = self.root.join("tailwindcli.exe");
        if self.windows {
            [win, unix]
        } else {
            [unix, win]
        }
    }

    pub fn node_modules(&self) -> PathBuf {
        self.root.join("node_modules")
    }

    /// Directory whose presence marks the npm packages as installed
    pub fn node_package_dir(&self) -> PathBuf {
        self.node_modules().join("tailwindcss")
    }

    pub fn node_bin_dir(&self) -> PathBuf {
        self.node_modules().join(".bin")
    }

    /// Possible CLI shims in `node_modules/.bin`, in preference order
    pub fn node_entry_candidates(&self) -> Vec<PathBuf> {
        let bin = self.node_bin_dir();
        if self.windows {
            vec![
                bin.join("tailwindcss.cmd"),
                bin.join("tailwindcss.ps1"),
                bin.join("tailwindcss.exe"),
            ]
        } else {
            vec![bin.join("tailwindcss")]
        }
    }

    /// Manifests checked, in order, for the installed npm package version
    pub fn node_version_manifests(&self) -> [PathBuf; 2] {
        let modules = self.node_modules();
        [
            modules.join("tailwindcss/package.json"),
            modules.join("@tailwindcss/cli/package.json"),
        ]
    }

    pub fn package_json(&self) -> PathBuf {
        self.root.join("package.json")
    }

    pub fn package_lock(&self) -> PathBuf {
        self.root.join("package-lock.json")
    }

    /// Default location of the file-backed state store
    pub fn state_file(&self) -> PathBuf {
        self.root.join("compilekit-state.json")
    }
}

/// An installed backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendDescriptor {
    pub kind: Backend,
    pub install_dir: PathBuf,
    /// Binary (standalone) or `.bin` shim (node)
    pub entry_point: PathBuf,
    /// Cached version string, if one was recorded at install time
    pub version: Option<String>,
}

impl BackendDescriptor {
    /// Describe `kind` if it is currently installed under `layout`.
    pub fn try_load(kind: Backend, layout: &InstallLayout) -> Option<Self> {
        match kind {
            Backend::Standalone => {
                let entry = layout
                    .standalone_candidates()
                    .into_iter()
                    .find(|p| fsutil::is_readable_file(p))?;
                Some(BackendDescriptor {
                    kind,
                    install_dir: layout.root().to_path_buf(),
                    entry_point: entry,
                    version: None,
                })
            }
            Backend::Node => {
                if !node_package_present(layout) {
                    return None;
                }
                let candidates = layout.node_entry_candidates();
                let entry = candidates
                    .iter()
                    .find(|p| fsutil::is_readable_file(p))
                    .cloned()
                    .unwrap_or_else(|| candidates[0].clone());
                Some(BackendDescriptor {
                    kind,
                    install_dir: layout.node_modules(),
                    entry_point: entry,
                    version: None,
                })
            }
        }
    }

    /// Re-check presence on disk.
    pub fn exists(&self) -> bool {
        match self.kind {
            Backend::Standalone => fsutil::is_readable_file(&self.entry_point),
            Backend::Node => {
                self.install_dir.is_dir() && self.install_dir.join("tailwindcss").is_dir()
            }
        }
    }
}

/// Version strings recorded at install time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CachedVersions {
    pub standalone: Option<String>,
    pub node: Option<String>,
}

fn node_package_present(layout: &InstallLayout) -> bool {
    layout.node_modules().is_dir() && layout.node_package_dir().is_dir()
}

/// Detects installed backends and picks the one to use
#[derive(Clone)]
pub struct BackendManager {
    layout: InstallLayout,
    store: Arc<dyn StateStore>,
}

impl BackendManager {
    pub fn new(layout: InstallLayout, store: Arc<dyn StateStore>) -> Self {
        BackendManager { layout, store }
    }

    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    /// The standalone binary exists and is readable.
    pub fn standalone_exists(&self) -> bool {
        self.layout
            .standalone_candidates()
            .iter()
            .any(|p| fsutil::is_readable_file(p))
    }

    /// `node_modules/` and `node_modules/tailwindcss/` both exist.
    pub fn node_package_exists(&self) -> bool {
        node_package_present(&self.layout)
    }

    pub fn is_installed(&self, backend: Backend) -> bool {
        match backend {
            Backend::Standalone => self.standalone_exists(),
            Backend::Node => self.node_package_exists(),
        }
    }

    /// Backend to use for `mode`, if any.
    ///
    /// Explicit modes never substitute the other backend. `Auto` prefers the
    /// standalone binary since it has no runtime dependencies.
    pub fn active_backend(&self, mode: CompilerMode) -> Option<Backend> {
        let standalone = self.standalone_exists();
        let node = self.node_package_exists();
        debug!(
            "Backend probe: standalone={} node={} mode={}",
            standalone, node, mode
        );

        match mode {
            CompilerMode::PreferStandalone => standalone.then_some(Backend::Standalone),
            CompilerMode::PreferNode => node.then_some(Backend::Node),
            CompilerMode::Auto if standalone => Some(Backend::Standalone),
            CompilerMode::Auto if node => Some(Backend::Node),
            CompilerMode::Auto => None,
        }
    }

    /// Installed descriptor for `backend` with its cached version.
    pub fn descriptor(&self, backend: Backend) -> Option<BackendDescriptor> {
        let mut descriptor = BackendDescriptor::try_load(backend, &self.layout)?;
        descriptor.version = self.cached_version(backend);
        Some(descriptor)
    }

    pub fn cached_version(&self, backend: Backend) -> Option<String> {
        self.store
            .get(backend.version_key())
            .ok()
            .flatten()
            .filter(|v| !v.is_empty())
    }

    pub fn cached_versions(&self) -> CachedVersions {
        CachedVersions {
            standalone: self.cached_version(Backend::Standalone),
            node: self.cached_version(Backend::Node),
        }
    }

    pub(crate) fn cache_version(&self, backend: Backend, version: Option<&str>) {
        let key = backend.version_key();
        let result = match version {
            Some(v) => self.store.set(key, v, None),
            None => self.store.delete(key),
        };
        if let Err(e) = result {
            warn!("Failed to update cached {} version: {}", backend, e);
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Minify only for the live tier.
    pub fn should_minify(tier: EnvironmentTier) -> bool {
        tier == EnvironmentTier::Live
    }

    /// Source maps only for the local tier.
    pub fn should_generate_sourcemap(tier: EnvironmentTier) -> bool {
        tier == EnvironmentTier::Local
    }
}
