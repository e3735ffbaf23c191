//! Class definitions and registered class descriptors

use std::fmt;
use std::sync::Arc;

use super::loader::ModuleGuard;
use super::spec::lineage_matches;
use crate::codec::{DataSource, Version};
use crate::error::CoreResult;
use crate::objects::{ObjectRef, VarValue};

/// Name of the class every other class descends from
pub const ROOT_CLASS: &str = "Object";

/// Index of a class in the registry arena
pub type ClassId = usize;

pub type InitFn = fn(&ObjectRef);
pub type ResetFn = fn(&ObjectRef);
pub type DestroyFn = fn(&ObjectRef);
pub type LoadFn = fn(&ObjectRef, &mut dyn DataSource, &Version) -> CoreResult<()>;
pub type SaveFn = fn(&ObjectRef, &mut dyn DataSource) -> CoreResult<()>;
pub type EditFn = fn(&ObjectRef) -> Option<ObjectRef>;

/// Lifecycle callback slots
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassCallbacks {
    /// Run root to leaf when an instance is created
    pub init: Option<InitFn>,
    /// Run leaf to root when an instance is reset
    pub reset: Option<ResetFn>,
    /// Run leaf to root when an instance is destroyed
    pub destroy: Option<DestroyFn>,
    pub load: Option<LoadFn>,
    pub save: Option<SaveFn>,
    /// Returns an editor object for an instance
    pub edit: Option<EditFn>,
}

/// A class definition, as handed to the registry
#[derive(Debug, Clone)]
pub struct ClassDef {
    /// Class spec; may use namespace shorthand
    pub name: String,
    /// Size of the instance payload, for accounting
    pub instance_size: usize,
    pub version: Version,
    pub callbacks: ClassCallbacks,
    /// Default variables for instances of this class
    pub defaults: Vec<(String, VarValue)>,
}

impl ClassDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            instance_size: 0,
            version: Version::new(1, 0),
            callbacks: ClassCallbacks::default(),
            defaults: Vec::new(),
        }
    }

    pub fn with_version(mut self, major: u32, minor: u32) -> Self {
        self.version = Version::new(major, minor);
        self
    }

    pub fn with_instance_size(mut self, size: usize) -> Self {
        self.instance_size = size;
        self
    }

    pub fn with_callbacks(mut self, callbacks: ClassCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Set a default variable, replacing an earlier default of the same key
    pub fn set_default(&mut self, key: &str, value: impl Into<VarValue>) {
        let value = value.into();
        match self.defaults.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.defaults.push((key.to_string(), value)),
        }
    }

    pub fn with_default(mut self, key: &str, value: impl Into<VarValue>) -> Self {
        self.set_default(key, value);
        self
    }
}

/// A registered class
pub struct ObjectClass {
    pub(crate) id: ClassId,
    name: String,
    lineage: Vec<String>,
    namespace: Option<String>,
    instance_size: usize,
    version: Version,
    callbacks: ClassCallbacks,
    defaults: Vec<(String, VarValue)>,
    superclass: Option<Arc<ObjectClass>>,
    _module: Option<ModuleGuard>,
}

impl fmt::Debug for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectClass")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("version", &self.version)
            .field("module", &self._module.is_some())
            .finish()
    }
}

impl ObjectClass {
    pub(crate) fn root() -> Self {
        Self {
            id: 0,
            name: ROOT_CLASS.to_string(),
            lineage: Vec::new(),
            namespace: None,
            instance_size: 0,
            version: Version::new(1, 0),
            callbacks: ClassCallbacks::default(),
            defaults: Vec::new(),
            superclass: None,
            _module: None,
        }
    }

    pub(crate) fn from_def(
        id: ClassId,
        def: ClassDef,
        lineage: Vec<String>,
        namespace: Option<String>,
        superclass: Arc<ObjectClass>,
        module: Option<ModuleGuard>,
    ) -> Self {
        Self {
            id,
            name: lineage.join(":"),
            lineage,
            namespace,
            instance_size: def.instance_size,
            version: def.version,
            callbacks: def.callbacks,
            defaults: def.defaults,
            superclass: Some(superclass),
            _module: module,
        }
    }

    /// Fully-qualified name (e.g. "HM_Widget:HM_Button")
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last segment of the name
    pub fn short_name(&self) -> &str {
        self.lineage.last().map(String::as_str).unwrap_or(&self.name)
    }

    /// Name segments, root-most first; empty for the root class
    pub fn lineage(&self) -> &[String] {
        &self.lineage
    }

    /// Name of the namespace owning the short name, if any
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn instance_size(&self) -> usize {
        self.instance_size
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn callbacks(&self) -> &ClassCallbacks {
        &self.callbacks
    }

    pub fn defaults(&self) -> &[(String, VarValue)] {
        &self.defaults
    }

    pub fn superclass(&self) -> Option<&Arc<ObjectClass>> {
        self.superclass.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.superclass.is_none()
    }

    /// Whether the class was provided by a dynamically loaded module
    pub fn is_loaded_from_module(&self) -> bool {
        self._module.is_some()
    }

    /// Is-a test against a class name pattern (see [`lineage_matches`])
    pub fn is_a(&self, pattern: &str) -> bool {
        pattern == ROOT_CLASS || lineage_matches(&self.lineage, pattern)
    }

    /// This class followed by its superclasses (leaf -> root)
    pub fn chain(self: &Arc<Self>) -> Vec<Arc<ObjectClass>> {
        let mut chain = vec![self.clone()];
        let mut current = self.superclass.clone();
        while let Some(class) = current {
            current = class.superclass.clone();
            chain.push(class);
        }
        chain
    }

    /// Default variables including inherited ones; subclasses override
    pub fn resolve_defaults(self: &Arc<Self>) -> Vec<(String, VarValue)> {
        let mut resolved: Vec<(String, VarValue)> = Vec::new();
        for class in self.chain().into_iter().rev() {
            for (k, v) in &class.defaults {
                match resolved.iter_mut().find(|(rk, _)| rk == k) {
                    Some(slot) => slot.1 = v.clone(),
                    None => resolved.push((k.clone(), v.clone())),
                }
            }
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(name: &str, parent: Arc<ObjectClass>, def: ClassDef) -> Arc<ObjectClass> {
        let lineage = name.split(':').map(str::to_string).collect();
        Arc::new(ObjectClass::from_def(1, def, lineage, None, parent, None))
    }

    #[test]
    fn test_class_def_builder() {
        let def = ClassDef::new("HM_Widget")
            .with_version(3, 2)
            .with_default("x", 0i32)
            .with_default("x", 5i32);
        assert_eq!(def.version, Version::new(3, 2));
        assert_eq!(def.defaults, vec![("x".to_string(), VarValue::I32(5))]);
    }

    #[test]
    fn test_chain_and_defaults() {
        let root = Arc::new(ObjectClass::root());
        let item = class(
            "Item",
            root.clone(),
            ClassDef::new("Item").with_default("weight", 1u32).with_default("value", 0u32),
        );
        let weapon = class(
            "Item:Weapon",
            item.clone(),
            ClassDef::new("Item:Weapon")
                .with_default("damage", "1d6")
                .with_default("weight", 4u32),
        );

        let names: Vec<String> = weapon.chain().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["Item:Weapon", "Item", "Object"]);

        let defaults = weapon.resolve_defaults();
        assert_eq!(defaults.len(), 3);
        assert!(defaults.contains(&("weight".to_string(), VarValue::U32(4))));
        assert!(defaults.contains(&("damage".to_string(), VarValue::Str("1d6".into()))));
    }

    #[test]
    fn test_is_a() {
        let root = Arc::new(ObjectClass::root());
        let item = class("Item", root.clone(), ClassDef::new("Item"));
        let weapon = class("Item:Weapon", item, ClassDef::new("Item:Weapon"));

        assert!(weapon.is_a("Item:*"));
        assert!(weapon.is_a("Item:Weapon"));
        assert!(weapon.is_a("Object"));
        assert!(!weapon.is_a("Item"));
        assert!(root.is_a("*"));
        assert_eq!(weapon.short_name(), "Weapon");
        assert_eq!(root.short_name(), "Object");
    }
}
