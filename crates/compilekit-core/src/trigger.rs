//! Page-load auto compile gate
//!
//! Compiles run only for configured managers with `run_on_refresh` on. A short
//! per-actor lock debounces rapid reloads, and the last outcome is kept as a
//! per-actor flag for the next page view to display.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::compiler::Compiler;
use crate::dispatch;
use crate::outcome::{CompileOutcome, CompileStatus};
use crate::settings::Settings;
use crate::state::{compilation_status_key, compile_lock_key, StateStore};

/// How long a triggered compile blocks further triggers by the same actor
pub const COMPILE_LOCK_TTL: Duration = Duration::from_secs(5);
/// How long the status flag stays available for display
pub const STATUS_FLAG_TTL: Duration = Duration::from_secs(30);

/// What a page load did
#[derive(Debug, Clone)]
pub enum PageLoad {
    /// `run_on_refresh` is off
    Disabled,
    /// Actor may not trigger compiles
    NotManager,
    /// A compile for this actor ran within the lock window
    Debounced,
    Compiled(CompileOutcome),
}

pub struct Trigger {
    settings: Settings,
    compiler: Compiler,
    store: Arc<dyn StateStore>,
}

impl Trigger {
    pub fn new(settings: Settings, compiler: Compiler, store: Arc<dyn StateStore>) -> Self {
        Trigger {
            settings,
            compiler,
            store,
        }
    }

    pub async fn on_page_load(&self, actor: &str) -> PageLoad {
        if !self.settings.run_on_refresh {
            return PageLoad::Disabled;
        }
        if !self.settings.is_manager(actor) {
            debug!("Actor {:?} may not trigger compiles", actor);
            return PageLoad::NotManager;
        }

        let lock_key = compile_lock_key(actor);
        match self.store.get(&lock_key) {
            Ok(Some(_)) => {
                debug!("Compile for {} debounced", actor);
                return PageLoad::Debounced;
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to read compile lock: {}", e),
        }
        if let Err(e) = self.store.set(&lock_key, "1", Some(COMPILE_LOCK_TTL)) {
            warn!("Failed to set compile lock: {}", e);
        }

        let outcome = dispatch::compile_active(&self.compiler, self.settings.compiler_mode).await;
        if let Err(e) = self.store.set(
            &compilation_status_key(actor),
            outcome.status.as_flag(),
            Some(STATUS_FLAG_TTL),
        ) {
            warn!("Failed to store compilation status: {}", e);
        }
        PageLoad::Compiled(outcome)
    }

    /// Return and clear the actor's pending status flag.
    pub fn take_status(&self, actor: &str) -> Option<CompileStatus> {
        take_status(self.store.as_ref(), actor)
    }
}

/// Return and clear `actor`'s status flag in `store`.
pub fn take_status(store: &dyn StateStore, actor: &str) -> Option<CompileStatus> {
    let key = compilation_status_key(actor);
    let flag = match store.get(&key) {
        Ok(flag) => flag?,
        Err(e) => {
            warn!("Failed to read compilation status: {}", e);
            return None;
        }
    };
    if let Err(e) = store.delete(&key) {
        warn!("Failed to clear compilation status: {}", e);
    }
    CompileStatus::from_flag(&flag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendManager, InstallLayout};
    use crate::runner::{ProcessRunner, RunnerMode};
    use crate::state::MemoryStateStore;
    use tempfile::tempdir;

    fn trigger(root: &std::path::Path, settings: &Settings) -> (Trigger, Arc<MemoryStateStore>) {
        let store = Arc::new(MemoryStateStore::new());
        let manager = BackendManager::new(InstallLayout::for_host(root), store.clone());
        let compiler = Compiler::new(settings, manager, ProcessRunner::new(RunnerMode::Disabled));
        (Trigger::new(settings.clone(), compiler, store.clone()), store)
    }

    fn enabled_settings() -> Settings {
        Settings {
            run_on_refresh: true,
            managers: vec!["admin".to_string()],
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn test_disabled_gate() {
        let dir = tempdir().unwrap();
        let (trigger, _) = trigger(dir.path(), &Settings::default());
        assert!(matches!(trigger.on_page_load("admin").await, PageLoad::Disabled));
    }

    #[tokio::test]
    async fn test_non_manager_skipped() {
        let dir = tempdir().unwrap();
        let (trigger, store) = trigger(dir.path(), &enabled_settings());
        assert!(matches!(trigger.on_page_load("guest").await, PageLoad::NotManager));
        assert!(store.get(&compile_lock_key("guest")).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_load_is_debounced_and_status_is_one_shot() {
        let dir = tempdir().unwrap();
        let (trigger, _) = trigger(dir.path(), &enabled_settings());

        match trigger.on_page_load("admin").await {
            PageLoad::Compiled(outcome) => assert!(outcome.is_failed()),
            other => panic!("expected a compile, got {other:?}"),
        }
        assert!(matches!(trigger.on_page_load("admin").await, PageLoad::Debounced));

        assert_eq!(trigger.take_status("admin"), Some(CompileStatus::Failed));
        assert_eq!(trigger.take_status("admin"), None);
    }

    #[test]
    fn test_take_status_unknown_flag() {
        let store = MemoryStateStore::new();
        store
            .set(&compilation_status_key("7"), "unknown", None)
            .unwrap();
        assert_eq!(take_status(&store, "7"), Some(CompileStatus::Uncertain));
    }
}
