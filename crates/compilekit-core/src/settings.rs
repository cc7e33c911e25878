//! CompileKit settings
//!
//! Settings come from a TOML file and can be overridden with `COMPILEKIT_*`
//! environment variables. Every field has a default so a missing file yields
//! a usable (if unconfigured) instance.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::error::{CompileKitError, Result};
use crate::paths::CompileRequest;
use crate::runner::RunnerMode;

/// Default settings file name, looked up in the working directory
pub const DEFAULT_SETTINGS_FILE: &str = "compilekit.toml";

/// Upstream "latest release" download location
pub const DEFAULT_RELEASE_BASE_URL: &str =
    "https://github.com/tailwindlabs/tailwindcss/releases/latest/download";

/// Default value of the concurrency hint passed to backends
pub const DEFAULT_WORKER_THREADS: u32 = 33;

/// Deployment tier the stylesheet is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentTier {
    #[default]
    Local,
    Staging,
    Live,
}

impl EnvironmentTier {
    /// Unknown values fall back to `Local`.
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }
}

impl FromStr for EnvironmentTier {
    type Err = CompileKitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "staging" => Ok(Self::Staging),
            "live" => Ok(Self::Live),
            other => Err(CompileKitError::Config(format!(
                "Unknown environment '{other}' (expected local, staging or live)"
            ))),
        }
    }
}

impl std::fmt::Display for EnvironmentTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Local => "local",
            Self::Staging => "staging",
            Self::Live => "live",
        };
        f.write_str(name)
    }
}

impl<'de> Deserialize<'de> for EnvironmentTier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse_lenient(&raw))
    }
}

/// Which backend the operator wants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum CompilerMode {
    #[default]
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "standalone")]
    PreferStandalone,
    #[serde(rename = "node")]
    PreferNode,
}

impl CompilerMode {
    /// Unknown values fall back to `Auto`.
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Auto => "Auto",
            Self::PreferStandalone => "Tailwind Standalone CLI",
            Self::PreferNode => "Node.js (npm)",
        }
    }
}

impl FromStr for CompilerMode {
    type Err = CompileKitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "standalone" | "cli" => Ok(Self::PreferStandalone),
            "node" | "npm" => Ok(Self::PreferNode),
            other => Err(CompileKitError::Config(format!(
                "Unknown compiler mode '{other}' (expected auto, standalone or node)"
            ))),
        }
    }
}

impl std::fmt::Display for CompilerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::PreferStandalone => "standalone",
            Self::PreferNode => "node",
        };
        f.write_str(name)
    }
}

impl<'de> Deserialize<'de> for CompilerMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse_lenient(&raw))
    }
}

/// CompileKit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Trusted root; input and output must stay inside it
    pub theme_root: PathBuf,
    /// Input stylesheet, relative to `theme_root`
    pub input_css: String,
    /// Output stylesheet, relative to `theme_root`
    pub output_css: String,
    pub environment: EnvironmentTier,
    pub compiler_mode: CompilerMode,
    /// Thread-count hint exported to backends as `RAYON_NUM_THREADS`
    pub worker_threads: u32,
    /// Where backends are installed
    pub modules_dir: PathBuf,
    /// Compile automatically on page loads by managers
    pub run_on_refresh: bool,
    /// Actors allowed to trigger compiles
    pub managers: Vec<String>,
    pub release_base_url: String,
    pub download_timeout_secs: u64,
    pub manifest_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_timeout_secs: Option<u64>,
    pub runner: RunnerMode,
    pub node_binary: String,
    pub npm_binary: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            theme_root: PathBuf::from("."),
            input_css: String::new(),
            output_css: String::new(),
            environment: EnvironmentTier::Local,
            compiler_mode: CompilerMode::Auto,
            worker_threads: DEFAULT_WORKER_THREADS,
            modules_dir: PathBuf::from(".compilekit"),
            run_on_refresh: false,
            managers: Vec::new(),
            release_base_url: DEFAULT_RELEASE_BASE_URL.to_string(),
            download_timeout_secs: 300,
            manifest_timeout_secs: 30,
            process_timeout_secs: None,
            runner: RunnerMode::Auto,
            node_binary: "node".to_string(),
            npm_binary: "npm".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from [`DEFAULT_SETTINGS_FILE`] when `None`.
    ///
    /// An explicitly named file must exist; a missing default file yields
    /// defaults. Environment overrides are applied afterwards and relative
    /// directories are anchored at the settings file's directory.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (file, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_SETTINGS_FILE), false),
        };

        let mut settings = if file.is_file() {
            debug!("Loading settings from {:?}", file);
            Self::from_toml(&std::fs::read_to_string(&file)?)?
        } else if explicit {
            return Err(CompileKitError::Config(format!(
                "Settings file not found: {}",
                file.display()
            )));
        } else {
            Settings::default()
        };

        settings.apply_overrides(|key| std::env::var(key).ok());

        let base = match file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::env::current_dir()?,
        };
        settings.anchor_at(&base);
        Ok(settings)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Write the settings back as TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, raw)
            .map_err(|e| CompileKitError::Io(format!("Failed to write {}: {e}", path.display())))
    }

    /// Persist `mode` into the settings file at `path`.
    ///
    /// Reads the file as written (no environment overrides, no anchoring) so
    /// only the mode changes. A missing file is created from defaults.
    pub fn store_compiler_mode(path: &Path, mode: CompilerMode) -> Result<()> {
        let mut stored = if path.is_file() {
            Self::from_toml(&std::fs::read_to_string(path)?)?
        } else {
            Settings::default()
        };
        stored.compiler_mode = mode;
        stored.save(path)
    }

    /// Apply `COMPILEKIT_*` overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("COMPILEKIT_THEME_ROOT") {
            self.theme_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("COMPILEKIT_INPUT_CSS") {
            self.input_css = v;
        }
        if let Some(v) = lookup("COMPILEKIT_OUTPUT_CSS") {
            self.output_css = v;
        }
        if let Some(v) = lookup("COMPILEKIT_ENVIRONMENT") {
            self.environment = EnvironmentTier::parse_lenient(&v);
        }
        if let Some(v) = lookup("COMPILEKIT_COMPILER_MODE") {
            self.compiler_mode = CompilerMode::parse_lenient(&v);
        }
        if let Some(v) = lookup("COMPILEKIT_WORKER_THREADS") {
            if let Ok(n) = v.trim().parse() {
                self.worker_threads = n;
            }
        }
        if let Some(v) = lookup("COMPILEKIT_MODULES_DIR") {
            self.modules_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("COMPILEKIT_RELEASE_BASE_URL") {
            self.release_base_url = v;
        }
        if let Some(v) = lookup("COMPILEKIT_RUNNER") {
            self.runner = RunnerMode::parse_lenient(&v);
        }
        if let Some(v) = lookup("COMPILEKIT_RUN_ON_REFRESH") {
            if let Some(flag) = parse_flag(&v) {
                self.run_on_refresh = flag;
            }
        }
        if let Some(v) = lookup("COMPILEKIT_MANAGERS") {
            self.managers = v
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("COMPILEKIT_DOWNLOAD_TIMEOUT_SECS") {
            if let Ok(n) = v.trim().parse() {
                self.download_timeout_secs = n;
            }
        }
        if let Some(v) = lookup("COMPILEKIT_MANIFEST_TIMEOUT_SECS") {
            if let Ok(n) = v.trim().parse() {
                self.manifest_timeout_secs = n;
            }
        }
        if let Some(v) = lookup("COMPILEKIT_PROCESS_TIMEOUT_SECS") {
            // 0 or empty clears the timeout
            self.process_timeout_secs = v.trim().parse().ok().filter(|n| *n > 0);
        }
        if let Some(v) = lookup("COMPILEKIT_NODE_BINARY") {
            self.node_binary = v;
        }
        if let Some(v) = lookup("COMPILEKIT_NPM_BINARY") {
            self.npm_binary = v;
        }
    }

    /// Make relative directories absolute against `base`.
    pub fn anchor_at(&mut self, base: &Path) {
        if self.theme_root.is_relative() {
            self.theme_root = base.join(&self.theme_root);
        }
        if self.modules_dir.is_relative() {
            self.modules_dir = base.join(&self.modules_dir);
        }
    }

    /// Concurrency hint, never below one
    pub fn worker_threads(&self) -> u32 {
        self.worker_threads.max(1)
    }

    pub fn compile_request(&self) -> CompileRequest {
        CompileRequest {
            input_path: self.input_css.clone(),
            output_path: self.output_css.clone(),
            trusted_root: self.theme_root.clone(),
        }
    }

    pub fn is_manager(&self, actor: &str) -> bool {
        !actor.is_empty() && self.managers.iter().any(|m| m == actor)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
