//! Class registry - the inheritance tree of registered classes
//!
//! Classes are kept in an arena indexed by [`ClassId`]. Each node records its
//! superclass and subclasses; slot 0 is always the root class.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::class::{ClassDef, ClassId, ObjectClass, ROOT_CLASS};
use super::loader::{ModuleArena, ModuleGuard};
use super::spec::{parse_class_spec, ClassSpec, Namespace, Namespaces};
use crate::error::{CoreError, CoreResult};

#[derive(Debug)]
struct ClassNode {
    class: Arc<ObjectClass>,
    parent: Option<ClassId>,
    children: Vec<ClassId>,
}

/// Registry of all classes, namespaces and module directories
#[derive(Debug)]
pub struct ClassRegistry {
    nodes: Vec<Option<ClassNode>>,
    namespaces: Namespaces,
    module_dirs: Vec<PathBuf>,
    modules: ModuleArena,
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassRegistry {
    /// Create a registry holding only the root class
    pub fn new() -> Self {
        Self {
            nodes: vec![Some(ClassNode {
                class: Arc::new(ObjectClass::root()),
                parent: None,
                children: Vec::new(),
            })],
            namespaces: Namespaces::new(),
            module_dirs: Vec::new(),
            modules: ModuleArena::new(),
        }
    }

    fn node(&self, id: ClassId) -> Option<&ClassNode> {
        self.nodes.get(id).and_then(Option::as_ref)
    }

    pub fn root(&self) -> Arc<ObjectClass> {
        self.nodes[0]
            .as_ref()
            .map(|n| n.class.clone())
            .unwrap_or_else(|| Arc::new(ObjectClass::root()))
    }

    /// Parse a spec against the current namespace table
    pub fn parse(&self, spec: &str) -> CoreResult<ClassSpec> {
        parse_class_spec(spec, &self.namespaces)
    }

    /// Depth-first search from the root for an exact, case-sensitive name
    fn find_id(&self, name: &str) -> Option<ClassId> {
        let mut stack = vec![0usize];
        while let Some(id) = stack.pop() {
            let node = self.node(id)?;
            if node.class.name() == name {
                return Some(id);
            }
            stack.extend(node.children.iter().rev());
        }
        None
    }

    /// Look up a class by spec
    pub fn lookup(&self, spec: &str) -> CoreResult<Arc<ObjectClass>> {
        let name = self.parse(spec)?.name();
        self.find_id(&name)
            .and_then(|id| self.node(id))
            .map(|n| n.class.clone())
            .ok_or(CoreError::NoSuchClass(name))
    }

    /// Register a class under the superclass named by its spec minus the last segment
    pub fn register(&mut self, def: ClassDef) -> CoreResult<Arc<ObjectClass>> {
        self.insert(def, None)
    }

    fn insert(&mut self, def: ClassDef, module: Option<ModuleGuard>) -> CoreResult<Arc<ObjectClass>> {
        let spec = self.parse(&def.name)?;
        let name = spec.name();
        if name == ROOT_CLASS || self.find_id(&name).is_some() {
            return Err(CoreError::DuplicateName(name));
        }

        let parent_id = match spec.parent_name() {
            Some(parent) => self
                .find_id(&parent)
                .ok_or(CoreError::NoSuchClass(parent))?,
            None => 0,
        };
        let superclass = self
            .node(parent_id)
            .map(|n| n.class.clone())
            .ok_or_else(|| CoreError::NoSuchClass(format!("#{}", parent_id)))?;

        let id = match self.nodes.iter().skip(1).position(Option::is_none) {
            Some(free) => free + 1,
            None => {
                self.nodes.push(None);
                self.nodes.len() - 1
            }
        };
        let namespace = self
            .namespaces
            .owner_of(spec.short_name())
            .map(|ns| ns.name.clone());
        let class = Arc::new(ObjectClass::from_def(
            id,
            def,
            spec.segments,
            namespace,
            superclass,
            module,
        ));

        self.nodes[id] = Some(ClassNode {
            class: class.clone(),
            parent: Some(parent_id),
            children: Vec::new(),
        });
        if let Some(parent) = self.nodes[parent_id].as_mut() {
            parent.children.push(id);
        }
        debug!("registered class {} (#{})", class.name(), id);
        Ok(class)
    }

    /// Remove a class without subclasses; releases its module reference
    pub fn unregister(&mut self, spec: &str) -> CoreResult<Arc<ObjectClass>> {
        let name = self.parse(spec)?.name();
        let id = self
            .find_id(&name)
            .ok_or_else(|| CoreError::NoSuchClass(name.clone()))?;
        self.remove(id)
    }

    fn remove(&mut self, id: ClassId) -> CoreResult<Arc<ObjectClass>> {
        let node = self.node(id).ok_or_else(|| CoreError::NoSuchClass(format!("#{}", id)))?;
        if id == 0 || !node.children.is_empty() {
            return Err(CoreError::ClassInUse(node.class.name().to_string()));
        }
        let Some(node) = self.nodes[id].take() else {
            return Err(CoreError::NoSuchClass(format!("#{}", id)));
        };
        if let Some(parent) = node.parent.and_then(|p| self.nodes[p].as_mut()) {
            parent.children.retain(|&c| c != id);
        }
        debug!("unregistered class {}", node.class.name());
        Ok(node.class)
    }

    /// Unregister every class except the root, leaves first. Returns the
    /// number removed.
    pub fn clear(&mut self) -> usize {
        let mut removed = 0;
        for (_, class) in self.walk().into_iter().rev() {
            if class.is_root() {
                continue;
            }
            match self.remove(class.id) {
                Ok(_) => removed += 1,
                Err(e) => warn!("cannot unregister {} at shutdown: {}", class.name(), e),
            }
        }
        removed
    }

    /// Load a class from the modules listed in its `@lib` suffix.
    ///
    /// An already registered class is returned as is.
    pub fn load(&mut self, spec: &str) -> CoreResult<Arc<ObjectClass>> {
        let parsed = self.parse(spec)?;
        if let Some(node) = self.find_id(&parsed.name()).and_then(|id| self.node(id)) {
            return Ok(node.class.clone());
        }
        if parsed.libs.is_empty() {
            return Err(CoreError::NoSuchClass(parsed.name()));
        }

        let symbol = parsed.symbol();
        let (mut def, guard) = self
            .modules
            .load_class_def(&parsed.libs, &symbol, &self.module_dirs)?;
        def.name = parsed.name();
        let class = self.insert(def, Some(guard))?;
        info!("loaded class {} via {}", class.name(), symbol);
        Ok(class)
    }

    /// Direct subclasses of a class
    pub fn subclasses(&self, class: &ObjectClass) -> Vec<Arc<ObjectClass>> {
        self.node(class.id)
            .map(|n| {
                n.children
                    .iter()
                    .filter_map(|&c| self.node(c).map(|cn| cn.class.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All classes in pre-order with their depth below the root
    pub fn walk(&self) -> Vec<(usize, Arc<ObjectClass>)> {
        let mut out = Vec::new();
        let mut stack = vec![(0usize, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let Some(node) = self.node(id) else { continue };
            out.push((depth, node.class.clone()));
            stack.extend(node.children.iter().rev().map(|&c| (c, depth + 1)));
        }
        out
    }

    /// Is-a test by class name
    pub fn is_a(&self, class: &str, pattern: &str) -> bool {
        self.lookup(class).is_ok_and(|c| c.is_a(pattern))
    }

    pub fn register_namespace(&mut self, name: &str, prefix: &str, url: &str) {
        self.namespaces.register(name, prefix, url);
    }

    pub fn unregister_namespace(&mut self, name: &str) -> bool {
        self.namespaces.unregister(name)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &Namespace> {
        self.namespaces.iter()
    }

    pub fn register_module_dir(&mut self, dir: impl AsRef<Path>) {
        let dir = dir.as_ref().to_path_buf();
        if !self.module_dirs.contains(&dir) {
            self.module_dirs.push(dir);
        }
    }

    pub fn unregister_module_dir(&mut self, dir: impl AsRef<Path>) -> bool {
        let dir = dir.as_ref();
        let before = self.module_dirs.len();
        self.module_dirs.retain(|d| d != dir);
        self.module_dirs.len() != before
    }

    pub fn module_dirs(&self) -> &[PathBuf] {
        &self.module_dirs
    }

    pub fn loaded_module_count(&self) -> usize {
        self.modules.live_count()
    }
}
