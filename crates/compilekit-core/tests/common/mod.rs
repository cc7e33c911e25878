//! Shared fixtures: fake backends as shell scripts and a tiny HTTP server.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use compilekit_core::{
    BackendManager, Compiler, InstallLayout, MemoryStateStore, ProcessRunner, RunnerMode,
    Settings, StateStore,
};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Serializes tests that touch the process environment or working directory.
pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

pub fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Fake Tailwind CLI.
///
/// Records its arguments to `<script>.args` and `RAYON_NUM_THREADS` to
/// `<script>.env`, answers `--help` with `help_exit`, then runs `compile`
/// with `$out` set to the `--output` argument.
pub fn tailwind_script(help_exit: i32, compile: &str) -> String {
    format!(
        r#"case "$1" in
  --help) echo "Usage: tailwindcss [options]"; exit {help_exit};;
  --version) echo "tailwindcss v4.1.3"; exit 0;;
esac
echo "$@" > "$0.args"
echo "$RAYON_NUM_THREADS" > "$0.env"
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output) out="$2"; shift;;
  esac
  shift
done
{compile}"#
    )
}

pub const WRITE_OUTPUT: &str = r#"printf '.btn{color:red}\n' > "$out""#;

/// Temporary theme root plus modules directory
pub struct Fixture {
    pub dir: TempDir,
    pub store: Arc<MemoryStateStore>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("theme/assets")).unwrap();
        std::fs::create_dir_all(dir.path().join("modules")).unwrap();
        std::fs::write(dir.path().join("theme/assets/in.css"), "a".repeat(120)).unwrap();
        Fixture {
            dir,
            store: Arc::new(MemoryStateStore::new()),
        }
    }

    pub fn theme(&self) -> PathBuf {
        self.dir.path().join("theme")
    }

    pub fn modules(&self) -> PathBuf {
        self.dir.path().join("modules")
    }

    pub fn output(&self) -> PathBuf {
        self.theme().join("assets/out.css")
    }

    pub fn standalone(&self) -> PathBuf {
        self.modules().join("tailwindcli")
    }

    pub fn node_entry(&self) -> PathBuf {
        self.modules().join("node_modules/.bin/tailwindcss")
    }

    pub fn settings(&self) -> Settings {
        Settings {
            theme_root: self.theme(),
            input_css: "assets/in.css".to_string(),
            output_css: "assets/out.css".to_string(),
            modules_dir: self.modules(),
            worker_threads: 4,
            node_binary: self.dir.path().join("bin/node").display().to_string(),
            npm_binary: self.dir.path().join("bin/npm").display().to_string(),
            ..Settings::default()
        }
    }

    pub fn install_standalone(&self, script: &str) {
        write_script(&self.standalone(), script);
    }

    /// Fake npm packages, `.bin` shim and a working `node` binary.
    pub fn install_node(&self, script: &str) {
        std::fs::create_dir_all(self.modules().join("node_modules/tailwindcss")).unwrap();
        write_script(&self.node_entry(), script);
        write_script(&self.dir.path().join("bin/node"), "echo v20.11.0");
    }

    pub fn store(&self) -> Arc<dyn StateStore> {
        self.store.clone()
    }

    pub fn manager(&self) -> BackendManager {
        BackendManager::new(InstallLayout::for_host(self.modules()), self.store())
    }

    pub fn compiler(&self, settings: &Settings, mode: RunnerMode) -> Compiler {
        Compiler::new(settings, self.manager(), ProcessRunner::new(mode))
    }
}

/// Canned HTTP response
#[derive(Clone)]
pub struct Route {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Route {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Route {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Route {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Local HTTP server answering from a fixed route table
pub struct TestServer {
    pub base_url: String,
    hits: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    /// Paths requested so far
    pub fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }
}

pub async fn serve(routes: Vec<(&str, Route)>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let routes: Arc<HashMap<String, Route>> = Arc::new(
        routes
            .into_iter()
            .map(|(path, route)| (path.to_string(), route))
            .collect(),
    );
    let hits = Arc::new(Mutex::new(Vec::new()));

    let server_hits = hits.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let routes = routes.clone();
            let hits = server_hits.clone();
            tokio::spawn(async move {
                respond(socket, &routes, &hits).await;
            });
        }
    });

    TestServer {
        base_url: format!("http://{addr}/download"),
        hits,
    }
}

async fn respond(
    mut socket: TcpStream,
    routes: &HashMap<String, Route>,
    hits: &Mutex<Vec<String>>,
) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = socket.read(&mut buf).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buf[..n]);
        if request.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let request = String::from_utf8_lossy(&request);
    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
    hits.lock().unwrap().push(path.clone());

    let route = routes
        .get(&path)
        .cloned()
        .unwrap_or_else(|| Route::status(404));
    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        route.status,
        if route.status == 200 { "OK" } else { "Error" },
        route.body.len()
    );
    for (name, value) in &route.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");

    let _ = socket.write_all(head.as_bytes()).await;
    let _ = socket.write_all(&route.body).await;
    let _ = socket.shutdown().await;
}
