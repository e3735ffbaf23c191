//! Runtime context
//!
//! A [`Runtime`] owns everything that would otherwise be process-wide: the
//! class registry, the tree lock, the timer queue, the search-path table and
//! the diagnostics state. Handles are cheap to clone; independent runtimes
//! can coexist in one process.
//!
//! Locks are taken object first, then the tree lock, then the timer queue.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::classes::{ClassDef, ClassRegistry, Namespace, ObjectClass};
use crate::codec::CodecConfig;
use crate::config::Config;
use crate::diag::{Diagnostics, LastError};
use crate::error::CoreResult;
use crate::events::{AsyncDispatcher, TimerQueue};
use crate::paths::{PathGroup, SearchPaths};

pub(crate) struct RuntimeInner {
    config: Config,
    diag: Diagnostics,
    classes: Mutex<ClassRegistry>,
    pub(crate) tree_lock: ReentrantMutex<()>,
    pub(crate) timers: Arc<TimerQueue>,
    paths: Mutex<SearchPaths>,
    pub(crate) dispatcher: Mutex<Option<AsyncDispatcher>>,
    next_object: AtomicU64,
}

/// Handle to a runtime instance
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Arc<RuntimeInner>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("diag", &self.inner.diag)
            .field("timers", &self.inner.timers)
            .field("dispatcher", &self.inner.dispatcher.lock().is_some())
            .finish()
    }
}

impl Runtime {
    /// Initialize a runtime holding only the root class
    pub fn new(config: Config) -> CoreResult<Self> {
        let paths = SearchPaths::from_config(&config)?;
        let mut classes = ClassRegistry::new();
        for dir in &config.module_dirs {
            classes.register_module_dir(dir);
        }
        let diag = Diagnostics::new(config.threaded, config.verbosity);
        info!(
            "runtime initialized (threaded={}, byte_order={:?})",
            config.threaded, config.byte_order
        );

        Ok(Self {
            inner: Arc::new(RuntimeInner {
                config,
                diag,
                classes: Mutex::new(classes),
                tree_lock: ReentrantMutex::new(()),
                timers: TimerQueue::shared(),
                paths: Mutex::new(paths),
                dispatcher: Mutex::new(None),
                next_object: AtomicU64::new(1),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn diag(&self) -> &Diagnostics {
        &self.inner.diag
    }

    /// Codec settings for data sources opened by this runtime
    pub fn codec(&self) -> CodecConfig {
        self.inner.config.codec()
    }

    /// Record a failed result in the last-error slot
    pub(crate) fn track<T>(&self, result: CoreResult<T>) -> CoreResult<T> {
        self.inner.diag.track(result)
    }

    pub fn last_error(&self) -> Option<LastError> {
        self.inner.diag.last_error()
    }

    pub fn clear_error(&self) {
        self.inner.diag.clear_error();
    }

    pub(crate) fn next_object_id(&self) -> u64 {
        self.inner.next_object.fetch_add(1, Ordering::Relaxed)
    }

    // Classes

    /// Register a class during startup.
    ///
    /// A malformed spec or an undefined namespace is a configuration error
    /// and aborts the process; other failures are returned.
    pub fn register_class(&self, def: ClassDef) -> CoreResult<Arc<ObjectClass>> {
        let spec = def.name.clone();
        match self.try_register_class(def) {
            Err(e) if e.is_fatal_at_init() => {
                self.inner
                    .diag
                    .fatal(&format!("cannot register class {}: {}", spec, e))
            }
            other => other,
        }
    }

    /// Register a class, returning every failure
    pub fn try_register_class(&self, def: ClassDef) -> CoreResult<Arc<ObjectClass>> {
        self.track(self.inner.classes.lock().register(def))
    }

    pub fn unregister_class(&self, spec: &str) -> CoreResult<()> {
        self.track(self.inner.classes.lock().unregister(spec)).map(|class| {
            debug!("class {} released", class.name());
        })
    }

    pub fn lookup_class(&self, spec: &str) -> CoreResult<Arc<ObjectClass>> {
        self.track(self.inner.classes.lock().lookup(spec))
    }

    /// Load a class from the modules named by its `@lib` suffix
    pub fn load_class(&self, spec: &str) -> CoreResult<Arc<ObjectClass>> {
        self.track(self.inner.classes.lock().load(spec))
    }

    /// Is-a test by class name; unknown classes are not anything
    pub fn class_is_a(&self, class: &str, pattern: &str) -> bool {
        self.inner.classes.lock().is_a(class, pattern)
    }

    /// Every class in pre-order with its depth
    pub fn class_tree(&self) -> Vec<(usize, Arc<ObjectClass>)> {
        self.inner.classes.lock().walk()
    }

    pub fn register_namespace(&self, name: &str, prefix: &str, url: &str) {
        self.inner.classes.lock().register_namespace(name, prefix, url);
    }

    pub fn unregister_namespace(&self, name: &str) -> bool {
        self.inner.classes.lock().unregister_namespace(name)
    }

    pub fn namespaces(&self) -> Vec<Namespace> {
        self.inner.classes.lock().namespaces().cloned().collect()
    }

    pub fn register_module_dir(&self, dir: impl AsRef<Path>) {
        self.inner.classes.lock().register_module_dir(dir);
    }

    pub fn unregister_module_dir(&self, dir: impl AsRef<Path>) -> bool {
        self.inner.classes.lock().unregister_module_dir(dir)
    }

    // Search paths

    pub fn add_path(&self, group: PathGroup, dir: impl AsRef<Path>) -> CoreResult<()> {
        self.track(self.inner.paths.lock().add(group, dir))
    }

    pub fn remove_path(&self, group: PathGroup, dir: impl AsRef<Path>) -> bool {
        self.inner.paths.lock().remove(group, dir)
    }

    pub fn paths(&self, group: PathGroup) -> Vec<PathBuf> {
        self.inner.paths.lock().get(group).to_vec()
    }

    /// First existing `file` in the group; font hits are promoted
    pub fn find_file(&self, group: PathGroup, file: &str) -> CoreResult<PathBuf> {
        self.track(self.inner.paths.lock().find(group, file))
    }

    /// Where a new `file` would be written in the group
    pub fn output_path(&self, group: PathGroup, file: &str) -> CoreResult<PathBuf> {
        self.track(self.inner.paths.lock().first_dir_path(group, file))
    }

    // Async dispatch and timers

    /// Route async events through a channel dispatcher on `handle`
    pub fn start_dispatcher(&self, handle: &Handle) {
        let mut slot = self.inner.dispatcher.lock();
        if slot.is_none() {
            *slot = Some(AsyncDispatcher::start(handle));
            debug!("async dispatcher started");
        }
    }

    /// Stop the dispatcher, waiting for queued events to finish
    pub async fn stop_dispatcher(&self) {
        let dispatcher = self.inner.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.stop().await;
        }
    }

    pub fn has_dispatcher(&self) -> bool {
        self.inner.dispatcher.lock().is_some()
    }

    /// Drive the timer clock one tick every `tick_ms` until `shutdown` turns true
    pub async fn run_timers(&self, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_millis(self.inner.config.tick_ms.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("timer driver started ({:?} per tick)", period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let rt = self.clone();
                    if let Err(e) = tokio::task::spawn_blocking(move || rt.advance_ticks(1)).await {
                        tracing::error!("timer tick failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("timer driver stopped at tick {}", self.now_ticks());
    }

    /// Tear down: disarm timers, drop the dispatcher and unregister every
    /// class, releasing loaded modules
    pub fn shutdown(&self) {
        let disarmed = self.inner.timers.clear();
        self.inner.dispatcher.lock().take();
        let classes = self.inner.classes.lock().clear();
        info!(
            "runtime shut down ({} timers disarmed, {} classes unregistered)",
            disarmed, classes
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CoreError, ErrorCode};

    #[test]
    fn test_independent_runtimes() {
        let a = Runtime::new(Config::default()).unwrap();
        let b = Runtime::new(Config::default()).unwrap();
        a.try_register_class(ClassDef::new("Widget")).unwrap();
        assert!(a.lookup_class("Widget").is_ok());
        assert!(b.lookup_class("Widget").is_err());
        assert_eq!(b.last_error().unwrap().code, ErrorCode::NoSuchClass);
        assert!(a.last_error().is_none());
    }

    #[test]
    fn test_shutdown_clears_classes() {
        let rt = Runtime::new(Config::default()).unwrap();
        rt.try_register_class(ClassDef::new("A")).unwrap();
        rt.try_register_class(ClassDef::new("A:B")).unwrap();
        assert!(matches!(
            rt.unregister_class("A"),
            Err(CoreError::ClassInUse(_))
        ));
        rt.shutdown();
        assert_eq!(rt.class_tree().len(), 1);
    }

    #[test]
    fn test_recoverable_registration_error() {
        let rt = Runtime::new(Config::default()).unwrap();
        let err = rt.register_class(ClassDef::new("Missing:Child")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoSuchClass);
        assert_eq!(rt.last_error().unwrap().code, ErrorCode::NoSuchClass);
    }
}
