//! CompileKit CLI
//!
//! The `compilekit` command drives the Tailwind CSS compiler and manages its
//! backends.
//!
//! ## Commands
//!
//! - `compile`: Compile with the active backend (Auto mode falls back to Node.js)
//! - `trigger`: Run the page-load auto-compile gate for an actor
//! - `status`: Show installed backends, versions and the active mode
//! - `install` / `remove`: Manage the standalone CLI or the npm packages
//! - `mode`: Persist the compiler mode
//! - `stylesheets`: List candidate stylesheets under the theme root
//! - `purge`: Remove every installed backend

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use compilekit_core::settings::DEFAULT_SETTINGS_FILE;
use compilekit_core::{
    compile_active, discover_stylesheets, trigger, Backend, BackendManager, CompileOutcome,
    CompileStatus, Compiler, CompilerMode, FileStateStore, InstallLayout, Installer, PageLoad,
    ProcessRunner, Settings, StateStore, Trigger,
};
use serde_json::json;
use tracing::{debug, Level};

#[derive(Parser)]
#[command(name = "compilekit")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Server-side Tailwind CSS compiler orchestration", long_about = None)]
struct Cli {
    /// Settings file (default: ./compilekit.toml)
    #[arg(short, long, global = true, env = "COMPILEKIT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and results
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile the configured stylesheet
    Compile {
        /// Use this backend only, ignoring the compiler mode and fallback
        #[arg(long, value_enum)]
        backend: Option<BackendArg>,
    },

    /// Page-load auto compile for an actor (debounced, manager-only)
    Trigger {
        /// Acting user id
        #[arg(long)]
        actor: String,
    },

    /// Show backend status
    Status {
        /// Also take the pending compilation status flag for this actor
        #[arg(long)]
        actor: Option<String>,
    },

    /// Install a backend
    Install {
        #[command(subcommand)]
        target: InstallTarget,
    },

    /// Remove a backend
    Remove {
        #[command(subcommand)]
        target: RemoveTarget,
    },

    /// Set the compiler mode (auto, standalone, node)
    Mode {
        mode: String,
    },

    /// List stylesheets under the theme root
    Stylesheets,

    /// Remove the modules directory and all cached versions
    Purge,
}

#[derive(Subcommand)]
enum InstallTarget {
    /// Download and verify the standalone CLI
    Standalone {
        /// Re-download even if a binary is present
        #[arg(short, long)]
        force: bool,
    },
    /// Install the npm packages
    Node,
}

#[derive(Subcommand)]
enum RemoveTarget {
    Standalone,
    Node,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Standalone,
    Node,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Standalone => Backend::Standalone,
            BackendArg::Node => Backend::Node,
        }
    }
}

/// Everything a command needs, built once from settings
struct App {
    settings: Settings,
    store: Arc<dyn StateStore>,
    manager: BackendManager,
    runner: ProcessRunner,
    json: bool,
}

impl App {
    fn load(config: Option<&Path>, json: bool) -> Result<Self> {
        let settings = Settings::load(config).context("Failed to load settings")?;
        debug!("Settings: {:?}", settings);

        let layout = InstallLayout::for_host(&settings.modules_dir);
        let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(layout.state_file()));
        let manager = BackendManager::new(layout, store.clone());
        let runner = ProcessRunner::new(settings.runner)
            .with_timeout(settings.process_timeout_secs.map(Duration::from_secs));

        Ok(App {
            settings,
            store,
            manager,
            runner,
            json,
        })
    }

    fn compiler(&self) -> Compiler {
        Compiler::new(&self.settings, self.manager.clone(), self.runner.clone())
    }

    fn installer(&self) -> Result<Installer> {
        Installer::new(&self.settings, self.manager.clone(), self.runner.clone())
            .context("Failed to create HTTP client")
    }

    /// Print `outcome` and map its status to a process exit code.
    fn report(&self, outcome: &CompileOutcome, verbose: bool) -> Result<ExitCode> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(outcome)?);
        } else {
            let tag = match outcome.status {
                CompileStatus::Succeeded => "ok",
                CompileStatus::Uncertain => "uncertain",
                CompileStatus::Failed => "failed",
            };
            println!("[{}] {}", tag, outcome.message);
            if verbose && !outcome.output.is_empty() {
                println!("\nOutput:\n{}", outcome.output);
            }
        }
        Ok(exit_code(outcome.status))
    }
}

fn exit_code(status: CompileStatus) -> ExitCode {
    match status {
        CompileStatus::Succeeded => ExitCode::SUCCESS,
        CompileStatus::Failed => ExitCode::from(1),
        CompileStatus::Uncertain => ExitCode::from(3),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    compilekit_core::telemetry::init_tracing(cli.json, level);

    // Mode edits the settings file as written, so it runs before loading
    let command = match cli.command {
        Commands::Mode { mode } => return cmd_mode(cli.config.as_deref(), &mode, cli.json),
        command => command,
    };

    let app = App::load(cli.config.as_deref(), cli.json)?;

    match command {
        Commands::Compile { backend } => cmd_compile(&app, backend, cli.verbose).await,
        Commands::Trigger { actor } => cmd_trigger(&app, &actor, cli.verbose).await,
        Commands::Status { actor } => cmd_status(&app, actor.as_deref()),
        Commands::Install { target } => {
            let installer = app.installer()?;
            let outcome = match target {
                InstallTarget::Standalone { force } => installer.install_standalone(force).await,
                InstallTarget::Node => installer.install_node_packages().await,
            };
            app.report(&outcome, cli.verbose)
        }
        Commands::Remove { target } => {
            let installer = app.installer()?;
            let outcome = match target {
                RemoveTarget::Standalone => installer.remove_standalone(),
                RemoveTarget::Node => installer.remove_node_packages(),
            };
            app.report(&outcome, cli.verbose)
        }
        Commands::Stylesheets => cmd_stylesheets(&app),
        Commands::Purge => {
            let outcome = app.installer()?.purge();
            app.report(&outcome, cli.verbose)
        }
        Commands::Mode { .. } => Ok(ExitCode::SUCCESS),
    }
}

/// Compile with the active backend, or a forced one
async fn cmd_compile(app: &App, backend: Option<BackendArg>, verbose: bool) -> Result<ExitCode> {
    let compiler = app.compiler();
    let outcome = match backend {
        Some(backend) => compiler.compile(backend.into()).await,
        None => compile_active(&compiler, app.settings.compiler_mode).await,
    };
    app.report(&outcome, verbose)
}

/// Run the page-load gate for `actor`
async fn cmd_trigger(app: &App, actor: &str, verbose: bool) -> Result<ExitCode> {
    let trigger = Trigger::new(app.settings.clone(), app.compiler(), app.store.clone());

    let skipped = match trigger.on_page_load(actor).await {
        PageLoad::Compiled(outcome) => return app.report(&outcome, verbose),
        PageLoad::Disabled => "run_on_refresh is disabled",
        PageLoad::NotManager => "actor is not a manager",
        PageLoad::Debounced => "a compile ran moments ago",
    };

    if app.json {
        println!("{}", json!({ "skipped": skipped }));
    } else {
        println!("Skipped: {}", skipped);
    }
    Ok(ExitCode::SUCCESS)
}

/// Show installed backends and versions
fn cmd_status(app: &App, actor: Option<&str>) -> Result<ExitCode> {
    let manager = &app.manager;
    let versions = manager.cached_versions();
    let mode = app.settings.compiler_mode;
    let active = manager.active_backend(mode);
    let pending = actor.and_then(|a| trigger::take_status(app.store.as_ref(), a));

    if app.json {
        let status = json!({
            "mode": mode,
            "environment": app.settings.environment,
            "runner_available": app.runner.is_available(),
            "standalone": {
                "installed": manager.standalone_exists(),
                "version": versions.standalone,
            },
            "node": {
                "installed": manager.node_package_exists(),
                "version": versions.node,
            },
            "active_backend": active,
            "pending_status": pending.map(|s| s.as_flag()),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(ExitCode::SUCCESS);
    }

    let installed = |yes: bool, version: Option<&str>| match (yes, version) {
        (true, Some(v)) => format!("installed ({v})"),
        (true, None) => "installed".to_string(),
        (false, _) => "not installed".to_string(),
    };

    println!("CompileKit Status");
    println!("=================");
    println!();
    println!("Compiler mode:  {} ({})", mode, mode.label());
    println!("Environment:    {}", app.settings.environment);
    println!(
        "Runner:         {}",
        if app.runner.is_available() {
            "available"
        } else {
            "unavailable"
        }
    );
    println!(
        "Standalone CLI: {}",
        installed(manager.standalone_exists(), versions.standalone.as_deref())
    );
    println!(
        "Node packages:  {}",
        installed(manager.node_package_exists(), versions.node.as_deref())
    );
    println!(
        "Active backend: {}",
        active.map_or_else(|| "none".to_string(), |b| b.to_string())
    );
    if let Some(status) = pending {
        println!("Last compile:   {}", status.as_flag());
    }

    Ok(ExitCode::SUCCESS)
}

/// Persist the compiler mode into the settings file
fn cmd_mode(config: Option<&Path>, mode: &str, json: bool) -> Result<ExitCode> {
    let mode: CompilerMode = mode.parse()?;
    let path = config.unwrap_or_else(|| Path::new(DEFAULT_SETTINGS_FILE));
    Settings::store_compiler_mode(path, mode)
        .with_context(|| format!("Failed to update {}", path.display()))?;

    if json {
        println!("{}", json!({ "mode": mode }));
    } else {
        println!("Compiler mode set to {} ({})", mode, mode.label());
    }
    Ok(ExitCode::SUCCESS)
}

/// List candidate stylesheets
fn cmd_stylesheets(app: &App) -> Result<ExitCode> {
    let found = discover_stylesheets(&app.settings.theme_root).context(format!(
        "Failed to list stylesheets under {:?}",
        app.settings.theme_root
    ))?;

    if app.json {
        println!("{}", serde_json::to_string_pretty(&found)?);
    } else if found.is_empty() {
        println!("No stylesheets found.");
    } else {
        for path in found {
            println!("{}", path);
        }
    }
    Ok(ExitCode::SUCCESS)
}
