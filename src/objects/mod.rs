//! Object system - class instances in a tree, with variables and events

mod hierarchy;
pub mod legacy;
mod object;
mod path;
mod persist;
mod variable;

pub use hierarchy::{EV_ATTACHED, EV_CHILD_ATTACHED, EV_CHILD_DETACHED, EV_DETACHED};
pub use legacy::PropType;
pub use object::{Object, ObjectFlags, ObjectLock, ObjectRef};
pub use path::{join_path, split_path, validate_name, PathStep, MAX_NAME_LEN};
pub use persist::{dump_object, OBJECT_FILE_EXT, OBJECT_FORMAT, OBJECT_VERSION};
pub use variable::{Binding, Opaque, VarKind, VarType, VarValue, Variable, VariableList};
