//! Common test utilities - runtime fixture with scratch search paths

#![allow(dead_code)]

use std::sync::Arc;

use hemirt::classes::ClassDef;
use hemirt::events::{handler, EventCall, Handler};
use hemirt::objects::ObjectRef;
use hemirt::{Config, Runtime};
use parking_lot::Mutex;
use tempfile::TempDir;

/// A runtime whose data and temp groups point at a scratch directory
pub struct RtTest {
    pub rt: Runtime,
    pub dir: TempDir,
}

impl RtTest {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut config = Config {
            data_paths: vec![dir.path().to_path_buf()],
            temp_paths: vec![dir.path().to_path_buf()],
            ..Config::default()
        };
        tweak(&mut config);
        let rt = Runtime::new(config).expect("Failed to create runtime");
        rt.try_register_class(ClassDef::new("Root")).unwrap();
        rt.try_register_class(ClassDef::new("Root:Group")).unwrap();
        rt.try_register_class(ClassDef::new("Root:Group:Leaf")).unwrap();
        Self { rt, dir }
    }

    /// Create and attach a named `Root:Group` object
    pub fn node(&self, parent: Option<&ObjectRef>, name: &str) -> ObjectRef {
        let obj = self.rt.create_object("Root:Group", Some(name)).unwrap();
        if let Some(parent) = parent {
            self.rt.attach(parent, &obj).unwrap();
        }
        obj
    }
}

/// Shared log of handler invocations
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler that records `<receiver name>:<event name>`
    pub fn recorder(&self) -> Handler {
        let log = self.0.clone();
        handler(move |call: &EventCall<'_>| {
            let who = call.receiver.name().unwrap_or_else(|| "?".into());
            log.lock().push(format!("{}:{}", who, call.name));
        })
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }
}
