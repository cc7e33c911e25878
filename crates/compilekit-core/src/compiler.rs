//! Compile orchestration for one backend
//!
//! Each compile goes preflight → path resolution → command build → execute →
//! output validation. The only state carried between steps is the output
//! file snapshot taken right before the backend runs.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendManager};
use crate::error::{CompileKitError, Result};
use crate::fsutil::{self, make_executable, FileSnapshot};
use crate::outcome::{CompileOutcome, CompileStatus};
use crate::paths::{CompileRequest, PathResolver, ResolvedPaths};
use crate::platform::Platform;
use crate::runner::{shell_quote, ProcessRunner, RunOutcome, RunResult};
use crate::scoped_env::ScopedEnv;
use crate::settings::{EnvironmentTier, Settings};

/// Thread-count hint read by the Tailwind oxide engine
pub const WORKER_THREADS_VAR: &str = "RAYON_NUM_THREADS";

/// Runs a compile with a chosen backend
pub struct Compiler {
    manager: BackendManager,
    runner: ProcessRunner,
    resolver: PathResolver,
    platform: Platform,
    request: CompileRequest,
    environment: EnvironmentTier,
    worker_threads: u32,
    node_binary: String,
}

impl Compiler {
    pub fn new(settings: &Settings, manager: BackendManager, runner: ProcessRunner) -> Self {
        Compiler {
            manager,
            runner,
            resolver: PathResolver::default(),
            platform: Platform::detect(),
            request: settings.compile_request(),
            environment: settings.environment,
            worker_threads: settings.worker_threads(),
            node_binary: settings.node_binary.clone(),
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn manager(&self) -> &BackendManager {
        &self.manager
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    /// Compile with `backend` and report a tri-state outcome.
    pub async fn compile(&self, backend: Backend) -> CompileOutcome {
        info!("Compiling CSS with {}", backend);
        let result = match backend {
            Backend::Standalone => self.compile_standalone().await,
            Backend::Node => self.compile_node().await,
        };
        let outcome = result
            .unwrap_or_else(CompileOutcome::from_error)
            .with_backend(backend);

        match outcome.status {
            CompileStatus::Succeeded => info!("{}", outcome.message),
            CompileStatus::Uncertain => warn!("{}", outcome.message),
            CompileStatus::Failed => warn!("Compile failed: {}", outcome.message),
        }
        outcome
    }

    async fn compile_standalone(&self) -> Result<CompileOutcome> {
        self.require_runner()?;
        let descriptor = self.manager.descriptor(Backend::Standalone).ok_or_else(|| {
            CompileKitError::NotFound(
                "The Tailwind standalone CLI is not installed. Download it first.".to_string(),
            )
        })?;
        let binary = descriptor.entry_point;
        make_executable(&binary)?;

        let smoke = self
            .runner
            .run(&format!("{} --help", quote_path(&binary)))
            .await;
        if smoke.is_failure() {
            warn!("Standalone smoke test failed: {}", smoke.output);
            let message = self.smoke_test_message(&smoke);
            return Ok(CompileOutcome::from_error(CompileKitError::Environment(message))
                .with_output(smoke.output));
        }

        let paths = self.resolve_paths()?;
        let command = format!("{}{}", quote_path(&binary), self.build_args(&paths));

        let mut env = ScopedEnv::new();
        env.set_var(WORKER_THREADS_VAR, self.worker_threads.to_string());
        let (result, fresh) = self.execute(Backend::Standalone, &command, &paths).await;
        drop(env);

        Ok(self.collapse(Backend::Standalone, &result, fresh, &paths))
    }

    async fn compile_node(&self) -> Result<CompileOutcome> {
        self.require_runner()?;
        let descriptor = self.manager.descriptor(Backend::Node).ok_or_else(|| {
            CompileKitError::NotFound(
                "The Tailwind CSS npm packages are not installed. Install them first.".to_string(),
            )
        })?;
        if !fsutil::is_readable_file(&descriptor.entry_point) {
            return Err(CompileKitError::NotFound(format!(
                "Tailwind CLI executable was not found in {}",
                self.manager.layout().node_bin_dir().display()
            )));
        }

        let paths = self.resolve_paths()?;

        let layout = self.manager.layout();
        let mut search = vec![layout.node_bin_dir()];
        search.extend(
            self.platform
                .default_search_dirs()
                .into_iter()
                .filter(|d| d.is_dir()),
        );

        let mut env = ScopedEnv::new();
        env.prepend_path(&search)?;
        env.set_var("NODE_PATH", layout.node_modules());
        env.set_var(WORKER_THREADS_VAR, self.worker_threads.to_string());

        let node = self
            .runner
            .run(&format!("{} --version", shell_quote(&self.node_binary)))
            .await;
        if node.is_failure() || node.output.is_empty() {
            return Err(CompileKitError::Environment(format!(
                "Node.js runtime was not found ({}). Install Node.js or switch to the standalone CLI.",
                self.node_binary
            )));
        }
        debug!("Node.js runtime {}", node.output);

        let command = format!(
            "{}{}",
            quote_path(&descriptor.entry_point),
            self.build_args(&paths)
        );
        let (result, fresh) = self.execute(Backend::Node, &command, &paths).await;
        drop(env);

        Ok(self.collapse(Backend::Node, &result, fresh, &paths))
    }

    fn require_runner(&self) -> Result<()> {
        if self.runner.is_available() {
            Ok(())
        } else {
            Err(CompileKitError::Environment(
                "Command execution is disabled on this server; the compiler cannot run."
                    .to_string(),
            ))
        }
    }

    fn resolve_paths(&self) -> Result<ResolvedPaths> {
        let paths = self.resolver.resolve_request(&self.request)?;
        if !fsutil::is_non_empty_file(&paths.input_absolute) {
            return Err(CompileKitError::Config(format!(
                "Input CSS file is empty: {}",
                paths.input_absolute.display()
            )));
        }
        debug!(
            "Resolved input {:?} output {:?}",
            paths.input_absolute, paths.output_absolute
        );
        Ok(paths)
    }

    /// Arguments shared by both backends, each path quoted as one token.
    fn build_args(&self, paths: &ResolvedPaths) -> String {
        let mut args = format!(
            " --input {} --output {} --cwd {}",
            quote_path(&paths.input_absolute),
            quote_path(&paths.output_absolute),
            quote_path(&paths.working_directory)
        );
        if BackendManager::should_minify(self.environment) {
            args.push_str(" --minify");
        }
        if BackendManager::should_generate_sourcemap(self.environment) {
            args.push_str(" --map");
        }
        args
    }

    async fn execute(
        &self,
        backend: Backend,
        command: &str,
        paths: &ResolvedPaths,
    ) -> (RunResult, bool) {
        let before = FileSnapshot::take(&paths.output_absolute);
        let result = self.runner.run(command).await.with_backend(backend);
        let after = FileSnapshot::take(&paths.output_absolute);
        debug!(
            "Backend finished: outcome={:?} exit={:?} before={:?} after={:?}",
            result.outcome, result.exit_code, before, after
        );
        (result, artifact_is_fresh(before, after))
    }

    fn collapse(
        &self,
        backend: Backend,
        result: &RunResult,
        fresh: bool,
        paths: &ResolvedPaths,
    ) -> CompileOutcome {
        let output = &paths.output_absolute;
        let minified = if BackendManager::should_minify(self.environment) {
            " (minified)"
        } else {
            ""
        };

        let outcome = match result.outcome {
            RunOutcome::Failure => CompileOutcome::failed(failure_message(backend, result)),
            RunOutcome::Success if fresh => CompileOutcome::succeeded(format!(
                "CSS compiled successfully with {}{minified}: {}",
                backend.label(),
                output.display()
            ))
            .with_path(output),
            RunOutcome::Unknown if fresh => CompileOutcome::uncertain(format!(
                "CSS was likely compiled with {}{minified}, but the exit code could not be confirmed: {}",
                backend.label(),
                output.display()
            ))
            .with_path(output),
            RunOutcome::Success | RunOutcome::Unknown => {
                let mut message = format!(
                    "{} ran but the output file was not created or updated: {}",
                    backend.label(),
                    output.display()
                );
                let details = result.joined_output("\n");
                if !details.is_empty() {
                    message.push('\n');
                    message.push_str(&details);
                }
                CompileOutcome::failed(message)
            }
        };
        outcome.with_output(result.output.clone())
    }

    fn smoke_test_message(&self, smoke: &RunResult) -> String {
        let mut message = String::from(
            "The Tailwind standalone CLI could not run on this server. \
             Sandboxed hosts that restrict access to /proc and /sys commonly block it.",
        );
        if self.manager.node_package_exists() {
            message.push_str(" The Node.js packages are installed: switch the compiler mode to Node.js.");
        } else {
            message.push_str(
                " Install the Node.js packages and switch the compiler mode to Node.js.",
            );
        }
        let details = smoke.joined_output(" | ");
        if !details.is_empty() {
            message.push_str(&format!(" ({details})"));
        }
        message
    }
}

/// Freshness rule for the output artifact.
///
/// The file must exist and be non-empty, its mtime must not go backwards, and
/// a pre-existing file must show a newer mtime or a different size.
pub fn artifact_is_fresh(before: Option<FileSnapshot>, after: Option<FileSnapshot>) -> bool {
    let Some(after) = after else {
        return false;
    };
    if after.len == 0 {
        return false;
    }
    let Some(before) = before else {
        return true;
    };

    let advanced = match (before.modified, after.modified) {
        (Some(b), Some(a)) if a < b => return false,
        (Some(b), Some(a)) => a > b,
        _ => false,
    };
    advanced || after.len != before.len
}

fn failure_message(backend: Backend, result: &RunResult) -> String {
    let details = result.joined_output(" | ");
    let mut message = match (backend, result.exit_code) {
        (Backend::Standalone, Some(134)) => "Tailwind CLI binary compatibility error \
             (exit code 134); the binary may not match this server's CPU or C library"
            .to_string(),
        (_, Some(127)) => format!(
            "{} binary not found or not executable (exit code 127)",
            backend.label()
        ),
        (_, Some(code)) => format!(
            "{} compilation has failed. Last exit code {code}",
            backend.label()
        ),
        (_, None) => format!("{} compilation has failed", backend.label()),
    };
    if details.is_empty() {
        message.push('.');
    } else {
        message.push_str(": ");
        message.push_str(&details);
    }
    message
}

fn quote_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}
