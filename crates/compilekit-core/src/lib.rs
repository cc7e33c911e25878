//! CompileKit Core Library
//!
//! Drives the Tailwind CSS compiler from a server process: validates the
//! configured input/output paths, picks between the standalone binary and the
//! npm packages, runs the compiler and reports a tri-state outcome. Also
//! manages both backends' install lifecycle.

pub mod backend;
pub mod checksum;
pub mod compiler;
pub mod dispatch;
pub mod error;
pub mod fsutil;
pub mod installer;
pub mod outcome;
pub mod paths;
pub mod platform;
pub mod runner;
pub mod scoped_env;
pub mod settings;
pub mod state;
pub mod stylesheets;
pub mod telemetry;
pub mod trigger;

pub use backend::{Backend, BackendDescriptor, BackendManager, CachedVersions, InstallLayout};
pub use compiler::Compiler;
pub use dispatch::compile_active;
pub use error::{CompileKitError, ErrorKind, Result};
pub use installer::Installer;
pub use outcome::{CompileOutcome, CompileStatus};
pub use paths::{CompileRequest, PathResolver, ResolvedPaths};
pub use platform::Platform;
pub use runner::{ProcessRunner, RunOutcome, RunResult, RunnerMode};
pub use scoped_env::ScopedEnv;
pub use settings::{CompilerMode, EnvironmentTier, Settings};
pub use state::{FileStateStore, MemoryStateStore, StateStore};
pub use stylesheets::discover_stylesheets;
pub use trigger::{PageLoad, Trigger};
