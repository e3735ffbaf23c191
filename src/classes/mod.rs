//! Class system
//!
//! Classes form a single inheritance tree rooted at [`ROOT_CLASS`]. A class's
//! superclass is named by its spec minus the last segment.

mod class;
mod loader;
mod registry;
mod spec;

pub use class::{
    ClassCallbacks, ClassDef, ClassId, DestroyFn, EditFn, InitFn, LoadFn, ObjectClass, ResetFn,
    SaveFn, ROOT_CLASS,
};
pub use loader::{ClassCtor, LoadedModule, ModuleArena, ModuleGuard};
pub use registry::ClassRegistry;
pub use spec::{
    class_symbol, lineage_matches, parse_class_spec, ClassSpec, Namespace, Namespaces,
    CLASS_SYMBOL_SUFFIX,
};
