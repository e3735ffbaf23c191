//! Object lifecycle and the object tree
//!
//! Structural changes hold the runtime's tree lock; attach takes the
//! parent's lock first. Notifications are posted after both are released:
//!
//! - attach: `attached` to the child (sent by the parent), then
//!   `child-attached` to each ancestor (sent by the child)
//! - detach: `detached` and `child-detached` the same way

use std::sync::{Arc, Weak};

use tracing::{debug, warn};

use super::object::{Object, ObjectFlags, ObjectRef};
use super::path::validate_name;
use crate::classes::ObjectClass;
use crate::error::{CoreError, CoreResult};
use crate::events::Arg;
use crate::runtime::Runtime;

pub const EV_ATTACHED: &str = "attached";
pub const EV_CHILD_ATTACHED: &str = "child-attached";
pub const EV_DETACHED: &str = "detached";
pub const EV_CHILD_DETACHED: &str = "child-detached";

fn is_ancestor(candidate: &ObjectRef, of: &ObjectRef) -> bool {
    let mut current = Some(of.clone());
    while let Some(obj) = current {
        if Arc::ptr_eq(&obj, candidate) {
            return true;
        }
        current = obj.parent();
    }
    false
}

impl Runtime {
    /// Create a detached instance of a registered class
    pub fn create_object(&self, spec: &str, name: Option<&str>) -> CoreResult<ObjectRef> {
        let class = self.lookup_class(spec)?;
        let obj = self.instantiate(&class);
        if let Some(name) = name {
            self.track(validate_name(name))?;
            obj.links.lock().name = Some(name.to_string());
        }
        Ok(obj)
    }

    /// Create a detached instance: class defaults are applied, then init
    /// callbacks run from the root class down
    pub fn instantiate(&self, class: &Arc<ObjectClass>) -> ObjectRef {
        let obj = Object::new(self.next_object_id(), class.clone());
        self.apply_defaults(&obj);
        for c in class.chain().iter().rev() {
            if let Some(init) = c.callbacks().init {
                init(&obj);
            }
        }
        debug!("created {} #{}", class.name(), obj.id());
        obj
    }

    fn apply_defaults(&self, obj: &ObjectRef) {
        let defaults = obj.class().resolve_defaults();
        obj.with_vars_mut(|vars| {
            for (key, value) in defaults {
                vars.set(&key, value);
            }
        });
    }

    /// Pre-order snapshot of every object below `obj`
    pub fn descendants(&self, obj: &ObjectRef) -> Vec<ObjectRef> {
        let _tree = self.inner.tree_lock.lock();
        let mut out = Vec::new();
        let mut stack: Vec<ObjectRef> = obj.children().into_iter().rev().collect();
        while let Some(next) = stack.pop() {
            stack.extend(next.children().into_iter().rev());
            out.push(next);
        }
        out
    }

    /// Insert `child` under `parent`.
    ///
    /// An unnamed child is named `_<n>` from the parent's counter. A child
    /// attached elsewhere is moved; attaching to the current parent is a
    /// no-op.
    pub fn attach(&self, parent: &ObjectRef, child: &ObjectRef) -> CoreResult<()> {
        let moved_from = {
            let _parent_lock = parent.lock();
            let _tree = self.inner.tree_lock.lock();
            self.track(self.link(parent, child))?
        };
        let Some(old_parent) = moved_from else {
            return Ok(());
        };
        if let Some(old) = old_parent {
            self.notify(&old, child, EV_DETACHED, EV_CHILD_DETACHED);
        }
        self.notify(parent, child, EV_ATTACHED, EV_CHILD_ATTACHED);
        Ok(())
    }

    /// Structural half of attach; caller holds the parent and tree locks.
    /// Returns `None` if nothing changed, otherwise the previous parent.
    fn link(&self, parent: &ObjectRef, child: &ObjectRef) -> CoreResult<Option<Option<ObjectRef>>> {
        if parent.is_terminating() {
            return Err(CoreError::Terminating(parent.path()));
        }
        if child.is_terminating() {
            return Err(CoreError::Terminating(child.path()));
        }
        if is_ancestor(child, parent) {
            return Err(CoreError::Cycle(child.path()));
        }
        let old_parent = child.parent();
        if old_parent.as_ref().is_some_and(|p| Arc::ptr_eq(p, parent)) {
            return Ok(None);
        }

        let siblings = parent.children();
        let taken = |name: &str| siblings.iter().any(|c| c.name().as_deref() == Some(name));
        let name = match child.name() {
            Some(name) if taken(&name) => return Err(CoreError::DuplicateName(name)),
            Some(name) => name,
            None => loop {
                let candidate = {
                    let mut links = parent.links.lock();
                    links.next_child += 1;
                    format!("_{}", links.next_child)
                };
                if !taken(&candidate) {
                    break candidate;
                }
            },
        };

        if let Some(old) = &old_parent {
            old.links.lock().children.retain(|c| !Arc::ptr_eq(c, child));
        }
        parent.links.lock().children.push(child.clone());
        {
            let mut links = child.links.lock();
            links.name = Some(name);
            links.parent = Arc::downgrade(parent);
        }
        debug!("attached {}", child.path());
        Ok(Some(old_parent))
    }

    /// Remove `child` from its parent. Returns false if it was not attached.
    /// The child keeps its name.
    pub fn detach(&self, child: &ObjectRef) -> bool {
        let parent = {
            let _tree = self.inner.tree_lock.lock();
            let Some(parent) = child.parent() else {
                return false;
            };
            parent.links.lock().children.retain(|c| !Arc::ptr_eq(c, child));
            child.links.lock().parent = Weak::new();
            parent
        };
        debug!("detached {} from {}", child.name().unwrap_or_default(), parent.path());
        self.notify(&parent, child, EV_DETACHED, EV_CHILD_DETACHED);
        true
    }

    fn notify(&self, parent: &ObjectRef, child: &ObjectRef, own: &str, ancestors: &str) {
        if let Err(e) = self.post_event(Some(parent), child, own, Vec::new()) {
            warn!("{} notification for {}: {}", own, child.path(), e);
        }
        let mut current = Some(parent.clone());
        while let Some(ancestor) = current {
            if let Err(e) =
                self.post_event(Some(child), &ancestor, ancestors, vec![Arg::from(child)])
            {
                warn!("{} notification for {}: {}", ancestors, ancestor.path(), e);
            }
            current = ancestor.parent();
        }
    }

    /// Rename an object, keeping names unique among siblings
    pub fn rename_object(&self, obj: &ObjectRef, name: &str) -> CoreResult<()> {
        self.track(validate_name(name))?;
        let _tree = self.inner.tree_lock.lock();
        if let Some(parent) = obj.parent() {
            let clash = parent
                .children()
                .iter()
                .any(|c| !Arc::ptr_eq(c, obj) && c.name().as_deref() == Some(name));
            if clash {
                return self.track(Err(CoreError::DuplicateName(name.to_string())));
            }
        }
        obj.links.lock().name = Some(name.to_string());
        Ok(())
    }

    /// Resolve `path` below `root`
    pub fn find(&self, root: &ObjectRef, path: &str) -> CoreResult<ObjectRef> {
        let _tree = self.inner.tree_lock.lock();
        self.track(root.find(path))
    }

    /// Run reset callbacks from the leaf class up. Variables are cleared and
    /// class defaults reapplied unless the object retains its data.
    pub fn reset_object(&self, obj: &ObjectRef) {
        for class in obj.class().chain() {
            if let Some(reset) = class.callbacks().reset {
                reset(obj);
            }
        }
        if !obj.flags().contains(ObjectFlags::RETAIN_DATA) {
            obj.with_vars_mut(|vars| vars.clear());
            self.apply_defaults(obj);
        }
    }

    /// Editor object for `obj`, from the most derived class that provides one
    pub fn edit_object(&self, obj: &ObjectRef) -> Option<ObjectRef> {
        obj.class()
            .chain()
            .iter()
            .find_map(|c| c.callbacks().edit)
            .and_then(|edit| edit(obj))
    }

    /// Detach `obj` and tear down it and its subtree, leaves first.
    ///
    /// Timers are disarmed, destroy callbacks run from the leaf class up,
    /// then variables, events and children are released.
    pub fn destroy(&self, obj: &ObjectRef) {
        if obj.is_terminating() {
            return;
        }
        self.detach(obj);

        let mut doomed = vec![obj.clone()];
        doomed.extend(self.descendants(obj));
        for o in &doomed {
            o.set_flag(ObjectFlags::TERMINATING, true);
        }

        for o in doomed.iter().rev() {
            for class in o.class().chain() {
                if let Some(destroy) = class.callbacks().destroy {
                    destroy(o);
                }
            }
            o.release_data();
        }

        let _tree = self.inner.tree_lock.lock();
        for o in &doomed {
            let children = std::mem::take(&mut o.links.lock().children);
            for c in children {
                c.links.lock().parent = Weak::new();
            }
        }
        debug!("destroyed {} objects", doomed.len());
    }
}
