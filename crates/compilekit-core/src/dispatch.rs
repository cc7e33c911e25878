//! Backend choice, Auto fallback and remediation hints.

use tracing::{info, warn};

use crate::backend::{Backend, BackendManager};
use crate::compiler::Compiler;
use crate::error::{CompileKitError, ErrorKind};
use crate::outcome::CompileOutcome;
use crate::settings::CompilerMode;

/// Compile with whichever backend `mode` selects.
///
/// In `Auto` mode a hard standalone failure is retried with the Node backend
/// when it is installed. An uncertain standalone result is accepted as is.
pub async fn compile_active(compiler: &Compiler, mode: CompilerMode) -> CompileOutcome {
    let manager = compiler.manager();
    let Some(backend) = manager.active_backend(mode) else {
        warn!("No compiler backend available for mode {}", mode);
        return no_backend_outcome(mode);
    };

    let first = compiler.compile(backend).await;
    if !first.is_failed() {
        return first;
    }

    let can_fall_back = mode == CompilerMode::Auto
        && backend == Backend::Standalone
        && manager.node_package_exists();
    if !can_fall_back {
        return with_remediation(first, mode, backend, manager);
    }

    info!("Standalone compile failed, falling back to Node.js");
    let second = compiler.compile(Backend::Node).await;
    if second.status.is_acceptable() {
        return second;
    }

    warn!("Node.js fallback failed as well");
    let mut combined = CompileOutcome::failed(format!(
        "{}\n\nNode.js fallback failed:\n{}",
        first.message, second.message
    ))
    .with_backend(Backend::Node)
    .with_output(join_outputs(&first.output, &second.output));
    combined.error_kind = second.error_kind;
    combined
}

fn no_backend_outcome(mode: CompilerMode) -> CompileOutcome {
    let message = match mode {
        CompilerMode::PreferNode => {
            "The compiler mode is set to Node.js, but the Tailwind CSS npm packages are not installed. Install the Node packages first."
        }
        CompilerMode::PreferStandalone => {
            "The compiler mode is set to the standalone CLI, but it is not installed. Download the standalone CLI first."
        }
        CompilerMode::Auto => {
            "No Tailwind compiler is installed. Download the standalone CLI or install the Node packages first."
        }
    };
    CompileOutcome::from_error(CompileKitError::Config(message.to_string()))
}

/// Suggest the other backend when the failure came from the backend itself.
///
/// Path and settings problems are not fixed by switching backends, and
/// environment failures already carry their own hint.
fn with_remediation(
    mut outcome: CompileOutcome,
    mode: CompilerMode,
    backend: Backend,
    manager: &BackendManager,
) -> CompileOutcome {
    if !matches!(outcome.error_kind, None | Some(ErrorKind::NotFound)) {
        return outcome;
    }

    let hint = match backend {
        Backend::Standalone if manager.node_package_exists() && mode != CompilerMode::Auto => {
            "The Node.js packages are installed: try switching the compiler mode to Node.js."
        }
        Backend::Standalone if manager.node_package_exists() => return outcome,
        Backend::Standalone => {
            "Install the Node.js packages to have a fallback compiler."
        }
        Backend::Node if manager.standalone_exists() => {
            "The standalone CLI is installed: try switching the compiler mode to the standalone CLI."
        }
        Backend::Node => "Download the standalone CLI to have an alternative compiler.",
    };
    outcome.message = format!("{}\n\n{}", outcome.message, hint);
    outcome
}

fn join_outputs(first: &str, second: &str) -> String {
    match (first.is_empty(), second.is_empty()) {
        (true, _) => second.to_string(),
        (_, true) => first.to_string(),
        _ => format!("{first}\n\n{second}"),
    }
}
