//! Install and removal flows against a local release server and a fake npm.
#![cfg(unix)]

mod common;

use std::os::unix::fs::PermissionsExt;

use common::{env_lock, serve, write_script, Fixture, Route};
use compilekit_core::platform::{Arch, Libc, OsFamily};
use compilekit_core::{
    Backend, CompileStatus, ErrorKind, Installer, Platform, ProcessRunner, Settings,
};
use sha2::{Digest, Sha256};

const ASSET: &str = "tailwindcss-linux-x64";
const BINARY: &[u8] = b"#!/bin/sh\necho 'tailwindcss v4.1.3'\n";

fn linux_x64() -> Platform {
    Platform {
        os: OsFamily::Linux,
        arch: Arch::X64,
        libc: Some(Libc::Glibc),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn installer(fx: &Fixture, settings: &Settings) -> Installer {
    // keep requests to the local server away from any configured proxy
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    Installer::new(settings, fx.manager(), ProcessRunner::default())
        .unwrap()
        .with_platform(linux_x64())
}

fn settings_for(fx: &Fixture, base_url: &str) -> Settings {
    Settings {
        release_base_url: base_url.to_string(),
        ..fx.settings()
    }
}

fn dir_entries(path: &std::path::Path) -> Vec<String> {
    std::fs::read_dir(path)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

#[tokio::test]
async fn test_install_standalone_verifies_and_installs() {
    let _lock = env_lock();
    let fx = Fixture::new();
    let manifest = format!(
        "{}  ./tailwindcss-linux-arm64\n{}  ./{ASSET}\n",
        "0".repeat(64),
        sha256_hex(BINARY)
    );
    let server = serve(vec![
        ("/download/tailwindcss-linux-x64", Route::ok(BINARY)),
        ("/download/sha256sums.txt", Route::ok(manifest)),
    ])
    .await;
    let settings = settings_for(&fx, &server.base_url);

    let outcome = installer(&fx, &settings).install_standalone(false).await;

    assert_eq!(outcome.status, CompileStatus::Succeeded, "{}", outcome.message);
    assert_eq!(outcome.backend, Some(Backend::Standalone));
    assert!(outcome.message.contains("v4.1.3"));
    let mode = std::fs::metadata(fx.standalone()).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
    assert_eq!(std::fs::read(fx.standalone()).unwrap(), BINARY);
    assert_eq!(
        fx.manager().cached_versions().standalone.as_deref(),
        Some("v4.1.3")
    );
    assert_eq!(dir_entries(&fx.modules()), vec!["tailwindcli"]);
}

#[tokio::test]
async fn test_missing_manifest_entry_is_integrity_error() {
    let _lock = env_lock();
    let fx = Fixture::new();
    let manifest = format!("{}  ./tailwindcss-macos-arm64\n", sha256_hex(BINARY));
    let server = serve(vec![
        ("/download/tailwindcss-linux-x64", Route::ok(BINARY)),
        ("/download/sha256sums.txt", Route::ok(manifest)),
    ])
    .await;
    let settings = settings_for(&fx, &server.base_url);

    let outcome = installer(&fx, &settings).install_standalone(false).await;

    assert_eq!(outcome.status, CompileStatus::Failed);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Integrity));
    assert!(!fx.standalone().exists());
    assert!(dir_entries(&fx.modules()).is_empty());
}

#[tokio::test]
async fn test_checksum_mismatch_discards_download() {
    let _lock = env_lock();
    let fx = Fixture::new();
    let manifest = format!("{}  {ASSET}\n", "a".repeat(64));
    let server = serve(vec![
        ("/download/tailwindcss-linux-x64", Route::ok(BINARY)),
        ("/download/sha256sums.txt", Route::ok(manifest)),
    ])
    .await;
    let settings = settings_for(&fx, &server.base_url);

    let outcome = installer(&fx, &settings).install_standalone(false).await;

    assert_eq!(outcome.error_kind, Some(ErrorKind::Integrity));
    assert!(outcome.message.contains("Checksum verification failed"));
    assert!(dir_entries(&fx.modules()).is_empty());
}

#[tokio::test]
async fn test_existing_binary_short_circuits_without_network() {
    let _lock = env_lock();
    let fx = Fixture::new();
    write_script(&fx.standalone(), "echo old");
    let server = serve(Vec::new()).await;
    let settings = settings_for(&fx, &server.base_url);

    let outcome = installer(&fx, &settings).install_standalone(false).await;

    assert_eq!(outcome.status, CompileStatus::Succeeded);
    assert!(outcome.message.contains("already installed"));
    assert!(server.hits().is_empty());
}

#[tokio::test]
async fn test_force_replaces_existing_binary() {
    let _lock = env_lock();
    let fx = Fixture::new();
    write_script(&fx.standalone(), "echo old");
    let manifest = format!("{}  ./{ASSET}\n", sha256_hex(BINARY));
    let server = serve(vec![
        ("/download/tailwindcss-linux-x64", Route::ok(BINARY)),
        ("/download/sha256sums.txt", Route::ok(manifest)),
    ])
    .await;
    let settings = settings_for(&fx, &server.base_url);

    let outcome = installer(&fx, &settings).install_standalone(true).await;

    assert_eq!(outcome.status, CompileStatus::Succeeded, "{}", outcome.message);
    assert_eq!(std::fs::read(fx.standalone()).unwrap(), BINARY);
    assert_eq!(server.hits().len(), 2);
}

#[tokio::test]
async fn test_rate_limit_is_remote_error_with_hint() {
    let _lock = env_lock();
    let fx = Fixture::new();
    let server = serve(vec![(
        "/download/tailwindcss-linux-x64",
        Route::status(429).header("retry-after", "90"),
    )])
    .await;
    let settings = settings_for(&fx, &server.base_url);

    let outcome = installer(&fx, &settings).install_standalone(false).await;

    assert_eq!(outcome.error_kind, Some(ErrorKind::Remote));
    assert!(outcome.message.contains("rate limit exceeded"));
    assert!(outcome.message.contains("90 seconds"));
    assert!(dir_entries(&fx.modules()).is_empty());
}

#[tokio::test]
async fn test_missing_asset_is_remote_error() {
    let _lock = env_lock();
    let fx = Fixture::new();
    let server = serve(Vec::new()).await;
    let settings = settings_for(&fx, &server.base_url);

    let outcome = installer(&fx, &settings).install_standalone(false).await;

    assert_eq!(outcome.error_kind, Some(ErrorKind::Remote));
    assert!(outcome.message.contains("HTTP 404"));
}

#[tokio::test]
async fn test_remove_standalone_is_idempotent() {
    let _lock = env_lock();
    let fx = Fixture::new();
    write_script(&fx.standalone(), "echo old");
    std::fs::write(fx.modules().join("tailwindcli.exe"), "MZ").unwrap();
    let settings = fx.settings();
    let installer = installer(&fx, &settings);

    let first = installer.remove_standalone();
    assert_eq!(first.status, CompileStatus::Succeeded);
    assert!(first.message.contains("removed"));
    assert!(!fx.standalone().exists());
    assert!(!fx.modules().join("tailwindcli.exe").exists());

    let second = installer.remove_standalone();
    assert_eq!(second.status, CompileStatus::Succeeded);
    assert!(second.message.contains("not installed"));
}

fn fake_npm(fx: &Fixture, install: &str) {
    write_script(
        &fx.dir.path().join("bin/npm"),
        &format!(
            r#"case "$1" in
  --version) echo "10.2.4"; exit 0;;
  install) {install};;
esac"#
        ),
    );
}

const NPM_INSTALL_OK: &str = r#"mkdir -p node_modules/tailwindcss node_modules/.bin
    echo '{"name":"tailwindcss","version":"4.1.5"}' > node_modules/tailwindcss/package.json
    printf '#!/bin/sh\n' > node_modules/.bin/tailwindcss
    echo "added 4 packages""#;

#[tokio::test]
async fn test_install_node_packages_in_modules_dir() {
    let _lock = env_lock();
    let fx = Fixture::new();
    fake_npm(&fx, NPM_INSTALL_OK);
    let settings = fx.settings();
    let cwd = std::env::current_dir().unwrap();

    let outcome = installer(&fx, &settings).install_node_packages().await;

    assert_eq!(outcome.status, CompileStatus::Succeeded, "{}", outcome.message);
    assert!(outcome.message.contains("v4.1.5"));
    assert_eq!(std::env::current_dir().unwrap(), cwd);
    assert!(fx.manager().node_package_exists());
    assert!(fx.modules().join("package.json").is_file());
    assert_eq!(fx.manager().cached_versions().node.as_deref(), Some("v4.1.5"));
}

#[tokio::test]
async fn test_failed_npm_install_restores_cwd() {
    let _lock = env_lock();
    let fx = Fixture::new();
    fake_npm(&fx, "echo 'npm ERR! network'; exit 1");
    let settings = fx.settings();
    let cwd = std::env::current_dir().unwrap();

    let outcome = installer(&fx, &settings).install_node_packages().await;

    assert_eq!(outcome.status, CompileStatus::Failed);
    assert!(outcome.message.contains("npm ERR! network"));
    assert_eq!(std::env::current_dir().unwrap(), cwd);
    assert!(!fx.manager().node_package_exists());
}

#[tokio::test]
async fn test_missing_npm_is_environment_error() {
    let _lock = env_lock();
    let fx = Fixture::new();
    let settings = fx.settings();

    let outcome = installer(&fx, &settings).install_node_packages().await;

    assert_eq!(outcome.error_kind, Some(ErrorKind::Environment));
    assert!(!fx.modules().join("package.json").exists());
}

#[tokio::test]
async fn test_remove_node_packages_and_purge() {
    let _lock = env_lock();
    let fx = Fixture::new();
    fake_npm(&fx, NPM_INSTALL_OK);
    let settings = fx.settings();
    let installer = installer(&fx, &settings);
    installer.install_node_packages().await;

    let removed = installer.remove_node_packages();
    assert_eq!(removed.status, CompileStatus::Succeeded);
    assert!(!fx.modules().join("node_modules").exists());
    assert!(!fx.modules().join("package.json").exists());
    assert_eq!(fx.manager().cached_versions().node, None);

    write_script(&fx.standalone(), "echo old");
    let purged = installer.purge();
    assert_eq!(purged.status, CompileStatus::Succeeded);
    assert!(!fx.modules().exists());
    assert!(installer.purge().message.contains("Nothing to remove"));
}
