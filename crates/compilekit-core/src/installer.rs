//! Backend install lifecycle
//!
//! The standalone binary is streamed from the release download location into
//! a temporary file next to its final path, checked against the published
//! `sha256sums.txt`, and only then renamed into place. The npm packages are
//! installed by running the package manager inside the modules directory.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendManager};
use crate::checksum;
use crate::error::{CompileKitError, Result};
use crate::fsutil;
use crate::outcome::CompileOutcome;
use crate::platform::Platform;
use crate::runner::{shell_quote, ProcessRunner, RunOutcome};
use crate::scoped_env::ScopedEnv;
use crate::settings::Settings;

/// Checksum manifest published next to the release assets
pub const CHECKSUM_MANIFEST: &str = "sha256sums.txt";

/// Packages installed for the Node backend
pub const NODE_PACKAGES: &[&str] = &[
    "tailwindcss",
    "@tailwindcss/cli",
    "@tailwindcss/forms",
    "@tailwindcss/typography",
];

const USER_AGENT: &str = concat!("compilekit/", env!("CARGO_PKG_VERSION"));

/// Downloads, verifies, installs and removes backends
pub struct Installer {
    manager: BackendManager,
    runner: ProcessRunner,
    platform: Platform,
    http_client: reqwest::Client,
    release_base_url: String,
    download_timeout: Duration,
    manifest_timeout: Duration,
    npm_binary: String,
}

impl Installer {
    pub fn new(settings: &Settings, manager: BackendManager, runner: ProcessRunner) -> Result<Self> {
        let http_client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;

        Ok(Installer {
            manager,
            runner,
            platform: Platform::detect(),
            http_client,
            release_base_url: settings.release_base_url.trim_end_matches('/').to_string(),
            download_timeout: Duration::from_secs(settings.download_timeout_secs),
            manifest_timeout: Duration::from_secs(settings.manifest_timeout_secs),
            npm_binary: settings.npm_binary.clone(),
        })
    }

    /// Override the detected platform (asset selection and search dirs).
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Download and install the standalone binary.
    ///
    /// Without `force`, an existing non-empty binary short-circuits with no
    /// network traffic.
    pub async fn install_standalone(&self, force: bool) -> CompileOutcome {
        info!("Installing Tailwind standalone CLI (force: {})", force);
        let outcome = match self.try_install_standalone(force).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Standalone install failed: {}", e);
                CompileOutcome::from_error(e)
            }
        };
        outcome.with_backend(Backend::Standalone)
    }

    async fn try_install_standalone(&self, force: bool) -> Result<CompileOutcome> {
        let asset = self.platform.standalone_asset_name().ok_or_else(|| {
            CompileKitError::Config(format!(
                "Unsupported OS/architecture for the standalone CLI: {:?}/{:?}",
                self.platform.os, self.platform.arch
            ))
        })?;

        let layout = self.manager.layout();
        let install_dir = layout.root();
        fsutil::ensure_writable_dir(install_dir, "install directory")?;
        let target = layout.standalone_binary();

        if target.exists() {
            if !force && fsutil::is_non_empty_file(&target) {
                debug!("Standalone CLI already present at {:?}", target);
                return Ok(CompileOutcome::succeeded("Tailwind standalone CLI is already installed.")
                    .with_path(target));
            }
            std::fs::remove_file(&target).map_err(|e| {
                CompileKitError::Io(format!(
                    "Failed to remove existing binary {}: {e}",
                    target.display()
                ))
            })?;
        }

        let asset_url = format!("{}/{}", self.release_base_url, asset);
        let temp = tempfile::Builder::new()
            .prefix(".tailwindcli-")
            .suffix(".download")
            .tempfile_in(install_dir)?;

        let mut file = tokio::fs::File::from_std(temp.as_file().try_clone()?);
        let bytes = self.download_to(&asset_url, &mut file).await?;
        drop(file);
        if bytes == 0 {
            return Err(CompileKitError::remote(format!(
                "Downloaded file is empty: {asset_url}"
            )));
        }
        debug!("Downloaded {} bytes from {}", bytes, asset_url);

        let manifest = self.fetch_manifest().await?;
        let expected = checksum::expected_sha256(&manifest, asset).ok_or_else(|| {
            CompileKitError::Integrity(format!(
                "Checksum for {asset} was not found in {CHECKSUM_MANIFEST}."
            ))
        })?;
        if !checksum::verify_file_sha256(temp.path(), &expected)? {
            return Err(CompileKitError::Integrity(format!(
                "Checksum verification failed for {asset}. The download was discarded."
            )));
        }

        set_release_mode(temp.path())?;
        temp.persist(&target).map_err(|e| {
            CompileKitError::Io(format!(
                "Failed to move the binary into {}: {}",
                target.display(),
                e.error
            ))
        })?;

        let version = self.probe_standalone_version(&target).await;
        self.manager
            .cache_version(Backend::Standalone, version.as_deref());

        info!("Installed standalone CLI at {:?}", target);
        let message = match &version {
            Some(v) => format!("Tailwind standalone CLI {v} installed successfully."),
            None => "Tailwind standalone CLI installed successfully.".to_string(),
        };
        Ok(CompileOutcome::succeeded(message).with_path(target))
    }

    /// Stream `url` into `file`, returning the number of bytes written.
    async fn download_to(&self, url: &str, file: &mut tokio::fs::File) -> Result<u64> {
        let mut response = self
            .http_client
            .get(url)
            .timeout(self.download_timeout)
            .send()
            .await?;
        check_status(&response, "release asset")?;

        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await.map_err(|e| {
                CompileKitError::Io(format!("Failed to write download to disk: {e}"))
            })?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    async fn fetch_manifest(&self) -> Result<String> {
        let url = format!("{}/{}", self.release_base_url, CHECKSUM_MANIFEST);
        let response = self
            .http_client
            .get(&url)
            .timeout(self.manifest_timeout)
            .send()
            .await?;
        check_status(&response, "checksum manifest")?;
        Ok(response.text().await?)
    }

    async fn probe_standalone_version(&self, binary: &Path) -> Option<String> {
        let result = self
            .runner
            .run(&format!("{} --version", shell_quote(&binary.to_string_lossy())))
            .await;
        if result.is_failure() {
            debug!("Version probe failed: {}", result.output);
            return None;
        }
        extract_version(&result.output)
    }

    /// Delete the standalone binary (both platform names) and its cached version.
    pub fn remove_standalone(&self) -> CompileOutcome {
        let mut removed = false;
        for candidate in self.manager.layout().standalone_candidates() {
            if !candidate.exists() {
                continue;
            }
            if let Err(e) = std::fs::remove_file(&candidate) {
                return CompileOutcome::from_error(CompileKitError::Io(format!(
                    "Failed to remove {}: {e}",
                    candidate.display()
                )))
                .with_backend(Backend::Standalone);
            }
            removed = true;
        }
        self.manager.cache_version(Backend::Standalone, None);

        let message = if removed {
            info!("Removed standalone CLI");
            "Tailwind standalone CLI removed."
        } else {
            "Tailwind standalone CLI was not installed."
        };
        CompileOutcome::succeeded(message).with_backend(Backend::Standalone)
    }

    /// Install the npm packages into the modules directory.
    pub async fn install_node_packages(&self) -> CompileOutcome {
        info!("Installing Tailwind CSS npm packages");
        let outcome = match self.try_install_node_packages().await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("npm install failed: {}", e);
                CompileOutcome::from_error(e)
            }
        };
        outcome.with_backend(Backend::Node)
    }

    async fn try_install_node_packages(&self) -> Result<CompileOutcome> {
        let layout = self.manager.layout();
        let install_dir = layout.root().to_path_buf();
        fsutil::ensure_writable_dir(&install_dir, "install directory")?;

        let mut env = ScopedEnv::new();
        env.prepend_path(&existing_dirs(self.platform.default_search_dirs()))?;

        let npm = shell_quote(&self.npm_binary);
        let probe = self.runner.run(&format!("{npm} --version")).await;
        if probe.is_failure() || probe.output.is_empty() {
            return Err(CompileKitError::Environment(format!(
                "npm was not found on this server ({}). Install Node.js and npm, or use the standalone CLI.",
                self.npm_binary
            )));
        }
        debug!("npm version {}", probe.output);

        write_package_manifest(&layout.package_json())?;

        env.change_dir(&install_dir)?;
        let command = format!(
            "{npm} install -D {} --no-audit --no-fund",
            NODE_PACKAGES.join(" ")
        );
        let result = self.runner.run(&command).await;
        drop(env);

        if result.is_failure() {
            let code = result
                .exit_code
                .map_or_else(|| "unknown".to_string(), |c| c.to_string());
            return Ok(CompileOutcome::failed(format!(
                "npm install failed (exit code {code}): {}",
                result.joined_output("\n")
            ))
            .with_output(result.output));
        }
        if !self.manager.node_package_exists() {
            return Ok(CompileOutcome::failed(format!(
                "npm install finished but {} was not created. {}",
                layout.node_package_dir().display(),
                result.joined_output("\n")
            ))
            .with_output(result.output));
        }

        let version = read_node_version(&layout.node_version_manifests());
        self.manager.cache_version(Backend::Node, version.as_deref());
        let version_label = version.as_deref().unwrap_or("(unknown version)");

        let outcome = if result.outcome == RunOutcome::Success {
            info!("Installed Tailwind CSS npm packages {}", version_label);
            CompileOutcome::succeeded(format!(
                "Tailwind CSS npm packages {version_label} installed successfully."
            ))
        } else {
            warn!("npm install exit code unavailable; packages appear installed");
            CompileOutcome::uncertain(format!(
                "Tailwind CSS npm packages {version_label} appear to be installed, but npm's exit code could not be confirmed."
            ))
        };
        Ok(outcome
            .with_path(layout.node_modules())
            .with_output(result.output))
    }

    /// Delete `node_modules`, `package.json` and the lock file.
    pub fn remove_node_packages(&self) -> CompileOutcome {
        let layout = self.manager.layout();
        let result = remove_all(&[
            layout.node_modules(),
            layout.package_json(),
            layout.package_lock(),
        ]);
        self.manager.cache_version(Backend::Node, None);

        let outcome = match result {
            Ok(true) => {
                info!("Removed Tailwind CSS npm packages");
                CompileOutcome::succeeded("Tailwind CSS npm packages removed.")
            }
            Ok(false) => CompileOutcome::succeeded("Tailwind CSS npm packages were not installed."),
            Err(e) => CompileOutcome::from_error(e),
        };
        outcome.with_backend(Backend::Node)
    }

    /// Remove the whole modules directory and every cached version.
    pub fn purge(&self) -> CompileOutcome {
        let root = self.manager.layout().root().to_path_buf();
        let result = remove_all(&[root.clone()]);
        self.manager.cache_version(Backend::Standalone, None);
        self.manager.cache_version(Backend::Node, None);

        match result {
            Ok(true) => {
                info!("Purged {:?}", root);
                CompileOutcome::succeeded(format!("Removed {}.", root.display()))
            }
            Ok(false) => CompileOutcome::succeeded("Nothing to remove."),
            Err(e) => CompileOutcome::from_error(e),
        }
    }
}

/// Give a freshly downloaded binary the usual 0755 release mode.
#[cfg(unix)]
fn set_release_mode(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).map_err(|e| {
        CompileKitError::Io(format!("Failed to set permissions on {}: {e}", path.display()))
    })
}

#[cfg(not(unix))]
fn set_release_mode(_path: &Path) -> Result<()> {
    Ok(())
}

fn check_status(response: &reqwest::Response, what: &str) -> Result<()> {
    let status = response.status();
    if status == StatusCode::OK {
        return Ok(());
    }
    Err(match status.as_u16() {
        403 | 429 => rate_limit_error(response.headers()),
        404 => CompileKitError::remote(format!(
            "The {what} was not found (HTTP 404): {}",
            response.url()
        )),
        code => CompileKitError::remote(format!("Failed to download the {what} (HTTP {code}).")),
    })
}

/// Build a rate-limit error from GitHub-style headers.
fn rate_limit_error(headers: &HeaderMap) -> CompileKitError {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
    };
    let limit = header("x-ratelimit-limit").and_then(|v| v.parse::<u64>().ok());
    let reset = header("x-ratelimit-reset")
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0));
    let retry_after_header = header("retry-after").and_then(|v| v.parse::<u64>().ok());

    let mut message = "Download rate limit exceeded".to_string();
    if let Some(limit) = limit {
        message.push_str(&format!(" (limit: {limit} requests per hour)"));
    }
    message.push('.');
    if let Some(reset) = reset {
        message.push_str(&format!(
            " Try again after {} UTC.",
            reset.format("%Y-%m-%d %H:%M:%S")
        ));
    } else if let Some(secs) = retry_after_header {
        message.push_str(&format!(" Try again in {secs} seconds."));
    }

    let retry_after = retry_after_header.or_else(|| {
        reset.map(|r| u64::try_from((r - Utc::now()).num_seconds()).unwrap_or(0))
    });
    CompileKitError::Remote {
        message,
        retry_after,
    }
}

fn version_pattern() -> &'static Regex {
    static VERSION: OnceLock<Regex> = OnceLock::new();
    VERSION.get_or_init(|| Regex::new(r"\bv?\d+\.\d+\.\d+\b").expect("static regex"))
}

/// First `x.y.z` token in `text`, normalised to a leading `v`.
pub fn extract_version(text: &str) -> Option<String> {
    version_pattern()
        .find(text)
        .map(|m| normalize_version(m.as_str()))
}

fn normalize_version(version: &str) -> String {
    let version = version.trim();
    if version.starts_with('v') {
        version.to_string()
    } else {
        format!("v{version}")
    }
}

/// Version from the first readable package manifest.
fn read_node_version(manifests: &[PathBuf]) -> Option<String> {
    manifests.iter().find_map(|path| {
        let raw = std::fs::read_to_string(path).ok()?;
        let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
        let version = value.get("version")?.as_str()?;
        (!version.trim().is_empty()).then(|| normalize_version(version))
    })
}

fn write_package_manifest(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    let manifest = serde_json::json!({
        "name": "compilekit-tailwind",
        "version": "1.0.0",
        "private": true,
        "license": "ISC",
        "devDependencies": {},
    });
    let raw = serde_json::to_string_pretty(&manifest)?;
    std::fs::write(path, raw)
        .map_err(|e| CompileKitError::Io(format!("Failed to write {}: {e}", path.display())))
}

/// Remove each path that exists. Returns whether anything was removed.
fn remove_all(paths: &[PathBuf]) -> Result<bool> {
    let mut removed = false;
    for path in paths {
        let result = if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else if path.exists() {
            std::fs::remove_file(path)
        } else {
            continue;
        };
        result.map_err(|e| {
            CompileKitError::Io(format!("Failed to remove {}: {e}", path.display()))
        })?;
        removed = true;
    }
    Ok(removed)
}

fn existing_dirs(dirs: Vec<PathBuf>) -> Vec<PathBuf> {
    dirs.into_iter().filter(|d| d.is_dir()).collect()
}
