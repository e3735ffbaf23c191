//! Diagnostics state: last error, fatal errors, verbose/debug output
//!
//! Recoverable failures are returned as `Err` and additionally recorded in a
//! last-error slot so that callers holding only a failure sentinel can still
//! report what happened. When the runtime is threaded the slot is per thread;
//! otherwise one slot is shared by the whole runtime.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::error::{CoreError, CoreResult, ErrorCode};

/// Most recent recoverable failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub code: ErrorCode,
    pub message: String,
}

/// Kind of diagnostic message passed to the output callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Verbose,
    Debug(u8),
}

/// Invoked before aborting on a fatal error
pub type FatalCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Intercepts verbose/debug output; returning `true` swallows the message
pub type OutputCallback = Box<dyn Fn(OutputKind, &str) -> bool + Send + Sync>;

static NEXT_DIAG_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Per-thread last errors, keyed by diagnostics id; dropped with the thread
    static THREAD_ERRORS: RefCell<HashMap<u64, LastError>> = RefCell::new(HashMap::new());
}

pub struct Diagnostics {
    id: u64,
    threaded: bool,
    verbosity: AtomicU8,
    global: Mutex<Option<LastError>>,
    fatal_cb: RwLock<Option<FatalCallback>>,
    output_cb: RwLock<Option<OutputCallback>>,
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("threaded", &self.threaded)
            .field("verbosity", &self.verbosity())
            .field("fatal_cb", &self.fatal_cb.read().is_some())
            .field("output_cb", &self.output_cb.read().is_some())
            .finish()
    }
}

impl Diagnostics {
    pub fn new(threaded: bool, verbosity: u8) -> Self {
        Self {
            id: NEXT_DIAG_ID.fetch_add(1, Ordering::Relaxed),
            threaded,
            verbosity: AtomicU8::new(verbosity),
            global: Mutex::new(None),
            fatal_cb: RwLock::new(None),
            output_cb: RwLock::new(None),
        }
    }

    /// Whether the last-error slot is kept per thread
    pub fn is_threaded(&self) -> bool {
        self.threaded
    }

    /// Set the last error message and code
    pub fn set_error(&self, code: ErrorCode, message: impl Into<String>) {
        let last = LastError {
            code,
            message: message.into(),
        };
        if self.threaded {
            THREAD_ERRORS.with(|slots| slots.borrow_mut().insert(self.id, last));
        } else {
            *self.global.lock() = Some(last);
        }
    }

    /// Record a failure into the last-error slot
    pub fn record(&self, err: &CoreError) {
        debug!("recording error: {}", err);
        self.set_error(err.code(), err.to_string());
    }

    /// Pass a result through, recording it if it is a failure
    pub fn track<T>(&self, result: CoreResult<T>) -> CoreResult<T> {
        if let Err(ref e) = result {
            self.record(e);
        }
        result
    }

    /// Most recent failure visible from the calling thread
    pub fn last_error(&self) -> Option<LastError> {
        if self.threaded {
            THREAD_ERRORS.with(|slots| slots.borrow().get(&self.id).cloned())
        } else {
            self.global.lock().clone()
        }
    }

    pub fn clear_error(&self) {
        if self.threaded {
            THREAD_ERRORS.with(|slots| slots.borrow_mut().remove(&self.id));
        } else {
            *self.global.lock() = None;
        }
    }

    pub fn set_fatal_callback(&self, cb: Option<FatalCallback>) {
        *self.fatal_cb.write() = cb;
    }

    pub fn set_output_callback(&self, cb: Option<OutputCallback>) {
        *self.output_cb.write() = cb;
    }

    pub fn verbosity(&self) -> u8 {
        self.verbosity.load(Ordering::Relaxed)
    }

    pub fn set_verbosity(&self, level: u8) {
        self.verbosity.store(level, Ordering::Relaxed);
    }

    /// Emit a verbose message (verbosity >= 1)
    pub fn verbose(&self, msg: &str) {
        if self.verbosity() < 1 {
            return;
        }
        if !self.intercept(OutputKind::Verbose, msg) {
            info!("{}", msg);
        }
    }

    /// Emit a debug message if the verbosity level is at least `level`
    pub fn debug(&self, level: u8, msg: &str) {
        if self.verbosity() < level {
            return;
        }
        if !self.intercept(OutputKind::Debug(level), msg) {
            debug!(debug_level = level, "{}", msg);
        }
    }

    fn intercept(&self, kind: OutputKind, msg: &str) -> bool {
        match self.output_cb.read().as_ref() {
            Some(cb) => cb(kind, msg),
            None => false,
        }
    }

    /// Report an unrecoverable error and abort the process
    pub fn fatal(&self, msg: &str) -> ! {
        error!("fatal: {}", msg);
        if let Some(cb) = self.fatal_cb.read().as_ref() {
            cb(msg);
        } else {
            eprintln!("fatal: {}", msg);
        }
        std::process::abort();
    }
}

impl Drop for Diagnostics {
    fn drop(&mut self) {
        // Slots of other threads go away when those threads exit
        let _ = THREAD_ERRORS.try_with(|slots| slots.borrow_mut().remove(&self.id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_process_wide_last_error() {
        let diag = Diagnostics::new(false, 0);
        assert!(diag.last_error().is_none());

        diag.set_error(ErrorCode::NoSuchClass, "no such class: Foo");
        let seen = thread::scope(|s| s.spawn(|| diag.last_error()).join().unwrap());
        assert_eq!(seen.unwrap().code, ErrorCode::NoSuchClass);

        diag.clear_error();
        assert!(diag.last_error().is_none());
    }

    #[test]
    fn test_thread_local_last_error() {
        let diag = Diagnostics::new(true, 0);
        diag.set_error(ErrorCode::NoSuchEvent, "no such event: tick");

        let seen = thread::scope(|s| s.spawn(|| diag.last_error()).join().unwrap());
        assert!(seen.is_none());
        assert_eq!(diag.last_error().unwrap().code, ErrorCode::NoSuchEvent);
    }

    #[test]
    fn test_thread_slots_are_per_runtime() {
        let a = Diagnostics::new(true, 0);
        let b = Diagnostics::new(true, 0);
        a.set_error(ErrorCode::NoSuchClass, "a");
        assert!(b.last_error().is_none());
        b.set_error(ErrorCode::NoSuchPath, "b");
        assert_eq!(a.last_error().unwrap().code, ErrorCode::NoSuchClass);

        a.clear_error();
        assert!(a.last_error().is_none());
        assert_eq!(b.last_error().unwrap().code, ErrorCode::NoSuchPath);
    }

    #[test]
    fn test_thread_slots_stay_on_their_thread() {
        let diag = Diagnostics::new(true, 0);
        for _ in 0..50 {
            thread::scope(|s| {
                s.spawn(|| diag.set_error(ErrorCode::NoSuchClass, "gone"));
            });
        }
        let here = THREAD_ERRORS.with(|slots| slots.borrow().contains_key(&diag.id));
        assert!(!here);
        assert!(diag.last_error().is_none());
    }

    #[test]
    fn test_track_records_failures_only() {
        let diag = Diagnostics::new(false, 0);
        let ok: CoreResult<u32> = diag.track(Ok(1));
        assert!(ok.is_ok());
        assert!(diag.last_error().is_none());

        let err: CoreResult<u32> = diag.track(Err(CoreError::NoSuchVariable("x".into())));
        assert!(err.is_err());
        let last = diag.last_error().unwrap();
        assert_eq!(last.code, ErrorCode::NoSuchVariable);
        assert_eq!(last.message, "no such variable: x");
    }

    #[test]
    fn test_output_gated_by_verbosity() {
        let diag = Diagnostics::new(false, 0);
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        diag.set_output_callback(Some(Box::new(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
            true
        })));

        diag.verbose("hidden");
        diag.debug(2, "hidden");
        assert_eq!(count.load(Ordering::SeqCst), 0);

        diag.set_verbosity(2);
        diag.verbose("shown");
        diag.debug(2, "shown");
        diag.debug(3, "hidden");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
