//! Object instances
//!
//! An object is an instance of a registered class living in a tree. It owns
//! its children, its variables and its event handlers. Variable and event
//! lists are guarded by the object's re-entrant lock. Tree links (name,
//! parent, children) sit behind a small leaf lock and are only changed while
//! the runtime's tree lock is held.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};

use super::legacy::{prop_get, prop_set, PropType};
use super::path::{join_path, split_path, PathStep};
use super::variable::{Binding, VarKind, VarType, VarValue, VariableList};
use crate::classes::ObjectClass;
use crate::error::{CoreError, CoreResult};
use crate::events::{Arg, Event, EventFlags, Handler, MAX_EVENT_ARGS};

/// Shared handle to an object
pub type ObjectRef = Arc<Object>;

/// Object bookkeeping flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ObjectFlags(u32);

impl ObjectFlags {
    pub const NONE: Self = Self(0);
    /// Keep variables across a reset
    pub const RETAIN_DATA: Self = Self(0x0001);
    /// The object is being destroyed
    pub const TERMINATING: Self = Self(0x0002);

    /// Flags that are written when an object is saved
    pub const PERSISTENT: Self = Self(0x0001);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Tree links of an object.
///
/// At most one `links` lock is held at a time. Readers snapshot what they
/// need and release before touching another object's links; writers hold
/// the runtime's tree lock.
#[derive(Debug, Default)]
pub(crate) struct Links {
    pub(crate) name: Option<String>,
    pub(crate) parent: Weak<Object>,
    pub(crate) children: Vec<ObjectRef>,
    /// Counter for generated child names
    pub(crate) next_child: u64,
}

#[derive(Default)]
pub(crate) struct ObjectState {
    pub(crate) vars: VariableList,
    pub(crate) events: Vec<Arc<Event>>,
    next_event: u64,
}

/// Held lock on an object; the lock is re-entrant on the owning thread
pub struct ObjectLock<'a> {
    _guard: ReentrantMutexGuard<'a, RefCell<ObjectState>>,
}

/// A live object
pub struct Object {
    id: u64,
    class: Arc<ObjectClass>,
    flags: AtomicU32,
    state: ReentrantMutex<RefCell<ObjectState>>,
    pub(crate) links: Mutex<Links>,
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id)
            .field("class", &self.class.name())
            .field("name", &self.name())
            .field("flags", &self.flags())
            .finish()
    }
}

impl Object {
    /// A detached instance with no variables or events
    pub(crate) fn new(id: u64, class: Arc<ObjectClass>) -> ObjectRef {
        Arc::new(Self {
            id,
            class,
            flags: AtomicU32::new(0),
            state: ReentrantMutex::new(RefCell::new(ObjectState::default())),
            links: Mutex::new(Links::default()),
        })
    }

    /// Runtime-unique instance number
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn class(&self) -> &Arc<ObjectClass> {
        &self.class
    }

    pub fn is_a(&self, pattern: &str) -> bool {
        self.class.is_a(pattern)
    }

    /// Lock the object for a sequence of operations
    pub fn lock(&self) -> ObjectLock<'_> {
        ObjectLock {
            _guard: self.state.lock(),
        }
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&ObjectState) -> R) -> R {
        let guard = self.state.lock();
        let state = guard.borrow();
        f(&state)
    }

    pub(crate) fn with_state_mut<R>(&self, f: impl FnOnce(&mut ObjectState) -> R) -> R {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    // Tree

    pub fn name(&self) -> Option<String> {
        self.links.lock().name.clone()
    }

    pub fn parent(&self) -> Option<ObjectRef> {
        self.links.lock().parent.upgrade()
    }

    pub fn is_attached(&self) -> bool {
        self.parent().is_some()
    }

    pub fn children(&self) -> Vec<ObjectRef> {
        self.links.lock().children.clone()
    }

    pub fn child(&self, name: &str) -> Option<ObjectRef> {
        self.children()
            .into_iter()
            .find(|c| c.name().as_deref() == Some(name))
    }

    /// Topmost ancestor, or the object itself if detached
    pub fn top(self: &Arc<Self>) -> ObjectRef {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Path from the topmost ancestor, e.g. `/desktop/window/button`
    pub fn path(&self) -> String {
        let mut names = Vec::new();
        let (mut name, mut parent) = {
            let links = self.links.lock();
            (links.name.clone(), links.parent.upgrade())
        };
        while let Some(p) = parent {
            names.push(name.unwrap_or_else(|| "?".to_string()));
            let links = p.links.lock();
            name = links.name.clone();
            parent = links.parent.upgrade();
        }
        names.reverse();
        join_path(&names)
    }

    /// Resolve a path relative to this object (absolute paths start at the top)
    pub fn find(self: &Arc<Self>, path: &str) -> CoreResult<ObjectRef> {
        let (absolute, steps) = split_path(path);
        let mut current = if absolute { self.top() } else { self.clone() };
        for step in steps {
            current = match step {
                PathStep::Parent => current.parent(),
                PathStep::Child(name) => current.child(name),
            }
            .ok_or_else(|| CoreError::NoSuchPath(path.to_string()))?;
        }
        Ok(current)
    }

    // Flags

    pub fn flags(&self) -> ObjectFlags {
        ObjectFlags(self.flags.load(Ordering::Acquire))
    }

    pub fn set_flag(&self, flag: ObjectFlags, on: bool) {
        if on {
            self.flags.fetch_or(flag.0, Ordering::AcqRel);
        } else {
            self.flags.fetch_and(!flag.0, Ordering::AcqRel);
        }
    }

    pub fn is_terminating(&self) -> bool {
        self.flags().contains(ObjectFlags::TERMINATING)
    }

    /// Keep variables when the object is reset
    pub fn set_retain_data(&self, on: bool) {
        self.set_flag(ObjectFlags::RETAIN_DATA, on);
    }

    // Variables

    /// Set a variable, replacing an existing one of the same name
    pub fn set_var(&self, key: &str, value: impl Into<VarValue>) {
        let value = value.into();
        self.with_state_mut(|s| s.vars.set(key, value));
    }

    /// Read a variable, optionally requiring an exact type
    pub fn get_var(&self, key: &str, expected: Option<VarType>) -> CoreResult<VarValue> {
        self.with_state(|s| s.vars.get(key, expected))
    }

    /// Typed read
    pub fn get<T: VarKind>(&self, key: &str) -> CoreResult<T> {
        let value = self.get_var(key, Some(T::TYPE))?;
        T::from_value(&value).ok_or_else(|| CoreError::TypeMismatch {
            key: key.to_string(),
            expected: T::TYPE.to_string(),
            found: value.var_type().to_string(),
        })
    }

    /// Bind a variable to caller-owned storage
    pub fn bind_var(&self, key: &str, binding: &Binding) {
        self.with_state_mut(|s| s.vars.bind(key, binding));
    }

    pub fn unset_var(&self, key: &str) -> bool {
        self.with_state_mut(|s| s.vars.unset(key))
    }

    pub fn has_var(&self, key: &str) -> bool {
        self.with_state(|s| s.vars.contains(key))
    }

    pub fn var_names(&self) -> Vec<String> {
        self.with_state(|s| s.vars.iter().map(|v| v.name().to_string()).collect())
    }

    /// Run `f` on the variable list under the object lock
    pub fn with_vars<R>(&self, f: impl FnOnce(&VariableList) -> R) -> R {
        self.with_state(|s| f(&s.vars))
    }

    pub fn with_vars_mut<R>(&self, f: impl FnOnce(&mut VariableList) -> R) -> R {
        self.with_state_mut(|s| f(&mut s.vars))
    }

    /// Legacy typed property read (strict type match)
    pub fn get_prop(&self, name: &str, ty: PropType) -> CoreResult<VarValue> {
        self.with_state(|s| prop_get(&s.vars, name, ty))
    }

    /// Legacy typed property write
    pub fn set_prop(&self, name: &str, ty: PropType, value: VarValue) -> CoreResult<()> {
        self.with_state_mut(|s| prop_set(&mut s.vars, name, ty, value))
    }

    // Events

    fn new_event(
        &self,
        state: &mut ObjectState,
        name: Option<&str>,
        handler: Handler,
        args: Vec<Arg>,
        flags: EventFlags,
    ) -> Arc<Event> {
        state.next_event += 1;
        let name = match name {
            Some(n) => n.to_string(),
            None => format!("_ev{}", state.next_event),
        };
        let event = Arc::new(Event::new(state.next_event, name, handler, args, flags));
        state.events.push(event.clone());
        event
    }

    fn check_event_args(&self, name: Option<&str>, args: &[Arg]) -> CoreResult<()> {
        if self.is_terminating() {
            return Err(CoreError::Terminating(self.path()));
        }
        if args.len() > MAX_EVENT_ARGS {
            return Err(CoreError::TooManyArgs(args.len(), MAX_EVENT_ARGS));
        }
        if name == Some("") {
            return Err(CoreError::NoSuchEvent(String::new()));
        }
        Ok(())
    }

    /// Register a handler under `name`, reinitializing an existing event of
    /// that name in place. Anonymous events get a generated name.
    pub fn set_event(
        &self,
        name: Option<&str>,
        handler: Handler,
        args: Vec<Arg>,
        flags: EventFlags,
    ) -> CoreResult<Arc<Event>> {
        self.check_event_args(name, &args)?;
        Ok(self.with_state_mut(|s| {
            let existing = name.and_then(|n| s.events.iter().find(|e| e.name() == n).cloned());
            match existing {
                Some(event) => {
                    event.reinit(handler, args, flags);
                    event
                }
                None => self.new_event(s, name, handler, args, flags),
            }
        }))
    }

    /// Append a handler; several handlers may share a name
    pub fn add_event(
        &self,
        name: Option<&str>,
        handler: Handler,
        args: Vec<Arg>,
        flags: EventFlags,
    ) -> CoreResult<Arc<Event>> {
        self.check_event_args(name, &args)?;
        Ok(self.with_state_mut(|s| self.new_event(s, name, handler, args, flags)))
    }

    /// First event registered under `name`
    pub fn find_event(&self, name: &str) -> Option<Arc<Event>> {
        self.with_state(|s| s.events.iter().find(|e| e.name() == name).cloned())
    }

    /// Every event registered under `name`, in registration order
    pub fn find_events(&self, name: &str) -> Vec<Arc<Event>> {
        self.with_state(|s| {
            s.events
                .iter()
                .filter(|e| e.name() == name)
                .cloned()
                .collect()
        })
    }

    pub fn events(&self) -> Vec<Arc<Event>> {
        self.with_state(|s| s.events.clone())
    }

    /// Remove every event named `name`, disarming their timers
    pub fn unset_event(&self, name: &str) -> CoreResult<usize> {
        let removed: Vec<Arc<Event>> = self.with_state_mut(|s| {
            let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut s.events)
                .into_iter()
                .partition(|e| e.name() == name);
            s.events = kept;
            removed
        });
        if removed.is_empty() {
            return Err(CoreError::NoSuchEvent(name.to_string()));
        }
        for event in &removed {
            event.cancel_timer();
        }
        Ok(removed.len())
    }

    /// Remove a specific event record
    pub fn remove_event(&self, event: &Arc<Event>) -> bool {
        let found = self.with_state_mut(|s| {
            let before = s.events.len();
            s.events.retain(|e| !Arc::ptr_eq(e, event));
            s.events.len() != before
        });
        if found {
            event.cancel_timer();
        }
        found
    }

    /// Drop all variables and events, disarming timers
    pub(crate) fn release_data(&self) {
        let events = self.with_state_mut(|s| {
            s.vars.clear();
            std::mem::take(&mut s.events)
        });
        for event in events {
            event.cancel_timer();
        }
    }
}
