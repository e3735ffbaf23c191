//! Object persistence
//!
//! Layout, after an `hemirt.Object` version header:
//!
//! ```text
//! body     := flags:u32 class:str vars sections children
//! vars     := variable table (minor >= 1) | legacy property table (minor 0)
//! sections := count:u32 { class:str len:u32 payload[len] }   (minor >= 1)
//! children := count:u32 { name:str body }
//! ```
//!
//! Each section holds one class's own data: a version header for that class
//! followed by whatever its save callback wrote. Sections for classes an
//! object no longer derives from are skipped.

use std::path::PathBuf;

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::legacy::read_legacy_table;
use super::object::{ObjectFlags, ObjectRef};
use super::path::validate_name;
use super::variable::VariableList;
use crate::codec::{
    read_version, write_version, Codec, CodecConfig, DataSource, FileSource, MemSource, Version,
};
use crate::error::{CoreError, CoreResult};
use crate::paths::PathGroup;
use crate::runtime::Runtime;

/// Magic name of the object format
pub const OBJECT_FORMAT: &str = "hemirt.Object";

/// Current object format version
pub const OBJECT_VERSION: Version = Version::new(2, 1);

pub const OBJECT_FILE_EXT: &str = "obj";

fn object_file_name(name: &str) -> String {
    format!("{}.{}", name, OBJECT_FILE_EXT)
}

/// Fields preceding the variables of every body
struct BodyHead {
    flags: ObjectFlags,
    class: String,
}

fn read_head(ds: &mut dyn DataSource) -> CoreResult<BodyHead> {
    Ok(BodyHead {
        flags: ObjectFlags::from_bits(ds.read_u32()?),
        class: ds.read_string()?,
    })
}

fn read_vars(ds: &mut dyn DataSource, vars: &mut VariableList, found: &Version) -> CoreResult<usize> {
    if found.minor == 0 {
        read_legacy_table(ds, vars)
    } else {
        vars.read_table(ds)
    }
}

impl Runtime {
    /// Write `obj` and its subtree
    pub fn save_object(&self, obj: &ObjectRef, ds: &mut dyn DataSource) -> CoreResult<()> {
        let result = write_version(ds, OBJECT_FORMAT, &OBJECT_VERSION)
            .and_then(|_| self.write_body(obj, ds))
            .and_then(|_| ds.flush());
        self.track(result)
    }

    fn write_body(&self, obj: &ObjectRef, ds: &mut dyn DataSource) -> CoreResult<()> {
        let _lock = obj.lock();
        ds.write_u32(obj.flags().bits() & ObjectFlags::PERSISTENT.bits())?;
        ds.write_string(obj.class().name())?;
        obj.with_vars(|vars| vars.write_table(ds))?;

        let savers: Vec<_> = obj
            .class()
            .chain()
            .into_iter()
            .rev()
            .filter_map(|c| c.callbacks().save.map(|save| (c.clone(), save)))
            .collect();
        ds.write_u32(savers.len() as u32)?;
        for (class, save) in savers {
            let mut section = MemSource::memory(*ds.codec());
            write_version(&mut section, class.name(), class.version())?;
            save(obj, &mut section)?;
            ds.write_string(class.name())?;
            ds.write_u32(section.bytes().len() as u32)?;
            ds.write_bytes(section.bytes())?;
        }

        let children = obj.children();
        ds.write_u32(children.len() as u32)?;
        for child in &children {
            ds.write_string(&child.name().unwrap_or_default())?;
            self.write_body(child, ds)?;
        }
        Ok(())
    }

    /// Read saved state into `obj`, creating children that do not exist yet.
    /// Returns the format version found in the stream.
    pub fn load_object(&self, obj: &ObjectRef, ds: &mut dyn DataSource) -> CoreResult<Version> {
        let result = read_version(ds, OBJECT_FORMAT, &OBJECT_VERSION).and_then(|found| {
            let head = read_head(ds)?;
            self.read_contents(obj, head, ds, &found)?;
            Ok(found)
        });
        self.track(result)
    }

    /// Create a detached object from a stream
    pub fn read_object(&self, ds: &mut dyn DataSource) -> CoreResult<ObjectRef> {
        let result = read_version(ds, OBJECT_FORMAT, &OBJECT_VERSION).and_then(|found| {
            let head = read_head(ds)?;
            let obj = self.instantiate(&self.lookup_class(&head.class)?);
            self.read_contents(&obj, head, ds, &found)?;
            Ok(obj)
        });
        self.track(result)
    }

    fn read_contents(
        &self,
        obj: &ObjectRef,
        head: BodyHead,
        ds: &mut dyn DataSource,
        found: &Version,
    ) -> CoreResult<()> {
        let _lock = obj.lock();
        if head.class != obj.class().name() {
            return Err(CoreError::TypeMismatch {
                key: obj.path(),
                expected: obj.class().name().to_string(),
                found: head.class,
            });
        }
        obj.set_flag(ObjectFlags::PERSISTENT, false);
        obj.set_flag(
            ObjectFlags::from_bits(head.flags.bits() & ObjectFlags::PERSISTENT.bits()),
            true,
        );

        obj.with_vars_mut(|vars| read_vars(ds, vars, found))?;
        if found.minor > 0 {
            let sections = ds.read_u32()?;
            for _ in 0..sections {
                let class_name = ds.read_string()?;
                let len = ds.read_u32()? as usize;
                let payload = ds.read_blob(len)?;
                self.load_section(obj, &class_name, payload, *ds.codec())?;
            }
        }

        let children = ds.read_u32()?;
        for _ in 0..children {
            let name = ds.read_string()?;
            validate_name(&name)?;
            let head = read_head(ds)?;
            let child = match obj.child(&name) {
                Some(child) => child,
                None => {
                    let child = self.instantiate(&self.lookup_class(&head.class)?);
                    child.links.lock().name = Some(name);
                    self.attach(obj, &child)?;
                    debug!("created {} while loading", child.path());
                    child
                }
            };
            self.read_contents(&child, head, ds, found)?;
        }
        Ok(())
    }

    fn load_section(
        &self,
        obj: &ObjectRef,
        class_name: &str,
        payload: Vec<u8>,
        codec: CodecConfig,
    ) -> CoreResult<()> {
        let chain = obj.class().chain();
        let Some(class) = chain.iter().find(|c| c.name() == class_name) else {
            debug!("skipping section for foreign class {}", class_name);
            return Ok(());
        };
        let Some(load) = class.callbacks().load else {
            return Ok(());
        };
        let mut section = MemSource::from_bytes(payload, codec);
        let version = read_version(&mut section, class.name(), class.version())?;
        load(obj, &mut section, &version)
    }

    /// Save `obj` as `<name>.obj` in the first data directory
    pub fn save_object_file(&self, obj: &ObjectRef) -> CoreResult<PathBuf> {
        let name = obj
            .name()
            .ok_or_else(|| CoreError::NotAttached(obj.path()));
        let name = self.track(name)?;
        let path = self.output_path(PathGroup::Data, &object_file_name(&name))?;
        let mut file = self.track(FileSource::create(&path, self.codec()))?;
        self.save_object(obj, &mut file)?;
        info!("saved {} to {}", obj.path(), path.display());
        Ok(path)
    }

    /// Load `<name>.obj` from the data search path into `obj`; `name`
    /// defaults to the object's own name
    pub fn load_object_file(&self, obj: &ObjectRef, name: Option<&str>) -> CoreResult<Version> {
        let name = match name {
            Some(n) => n.to_string(),
            None => self.track(obj.name().ok_or_else(|| CoreError::NotAttached(obj.path())))?,
        };
        let path = self.find_file(PathGroup::Data, &object_file_name(&name))?;
        let mut file = self.track(FileSource::open(&path, self.codec()))?;
        let version = self.load_object(obj, &mut file)?;
        info!("loaded {} from {} (format {})", obj.path(), path.display(), version);
        Ok(version)
    }
}

/// Decode an object stream into JSON without instantiating anything
pub fn dump_object(ds: &mut dyn DataSource) -> CoreResult<Value> {
    let found = read_version(ds, OBJECT_FORMAT, &OBJECT_VERSION)?;
    let mut body = dump_body(ds, &found)?;
    if let Value::Object(map) = &mut body {
        map.insert("format".into(), json!(found.to_string()));
    }
    Ok(body)
}

fn dump_body(ds: &mut dyn DataSource, found: &Version) -> CoreResult<Value> {
    let head = read_head(ds)?;
    let mut vars = VariableList::new();
    read_vars(ds, &mut vars, found)?;
    let vars: Map<String, Value> = vars
        .iter()
        .filter_map(|v| v.value().map(|val| (v.name().to_string(), val.to_json())))
        .collect();

    let mut sections = Vec::new();
    if found.minor > 0 {
        for _ in 0..ds.read_u32()? {
            let class = ds.read_string()?;
            let len = ds.read_u32()? as usize;
            ds.skip(len)?;
            sections.push(json!({ "class": class, "bytes": len }));
        }
    }

    let mut children = Map::new();
    for _ in 0..ds.read_u32()? {
        let name = ds.read_string()?;
        children.insert(name, dump_body(ds, found)?);
    }

    Ok(json!({
        "class": head.class,
        "flags": head.flags.bits(),
        "vars": vars,
        "sections": sections,
        "children": children,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::{ClassCallbacks, ClassDef};
    use crate::config::Config;
    use crate::error::ErrorCode;
    use crate::objects::legacy::PropType;

    fn save_score(obj: &ObjectRef, ds: &mut dyn DataSource) -> CoreResult<()> {
        ds.write_u64(obj.get::<u64>("score").unwrap_or(0) * 2)
    }

    fn load_score(obj: &ObjectRef, ds: &mut dyn DataSource, _: &Version) -> CoreResult<()> {
        obj.set_var("doubled", ds.read_u64()?);
        Ok(())
    }

    fn runtime() -> Runtime {
        let rt = Runtime::new(Config::default()).unwrap();
        rt.try_register_class(ClassDef::new("Panel")).unwrap();
        rt.try_register_class(ClassDef::new("Panel:Board").with_callbacks(ClassCallbacks {
            save: Some(save_score),
            load: Some(load_score),
            ..Default::default()
        }))
        .unwrap();
        rt
    }

    #[test]
    fn test_round_trip_with_children() {
        let rt = runtime();
        let root = rt.create_object("Panel", Some("main")).unwrap();
        let board = rt.create_object("Panel:Board", Some("board")).unwrap();
        rt.attach(&root, &board).unwrap();
        root.set_var("title", "Main");
        root.set_retain_data(true);
        board.set_var("score", 21u64);

        let mut ds = MemSource::memory(rt.codec());
        rt.save_object(&root, &mut ds).unwrap();
        ds.rewind();

        let copy = rt.read_object(&mut ds).unwrap();
        assert_eq!(copy.get::<String>("title").unwrap(), "Main");
        assert!(copy.flags().contains(ObjectFlags::RETAIN_DATA));
        let board = copy.child("board").unwrap();
        assert!(board.is_a("Panel:Board"));
        assert_eq!(board.get::<u64>("score").unwrap(), 21);
        assert_eq!(board.get::<u64>("doubled").unwrap(), 42);
    }

    #[test]
    fn test_class_mismatch() {
        let rt = runtime();
        let board = rt.create_object("Panel:Board", None).unwrap();
        let mut ds = MemSource::memory(rt.codec());
        rt.save_object(&board, &mut ds).unwrap();
        ds.rewind();

        let panel = rt.create_object("Panel", None).unwrap();
        assert!(matches!(
            rt.load_object(&panel, &mut ds),
            Err(CoreError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_major_mismatch() {
        let rt = runtime();
        let mut ds = MemSource::memory(rt.codec());
        write_version(&mut ds, OBJECT_FORMAT, &Version::new(3, 0)).unwrap();
        ds.rewind();
        let obj = rt.create_object("Panel", None).unwrap();
        assert!(matches!(
            rt.load_object(&obj, &mut ds),
            Err(CoreError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_legacy_minor_zero() {
        let rt = runtime();
        let mut ds = MemSource::memory(rt.codec());
        write_version(&mut ds, OBJECT_FORMAT, &Version::new(2, 0)).unwrap();
        ds.write_u32(0).unwrap();
        ds.write_string("Panel").unwrap();
        ds.write_u32(1).unwrap();
        ds.write_string("visible").unwrap();
        ds.write_u32(PropType::Bool as u32).unwrap();
        ds.write_i32(1).unwrap();
        ds.write_u32(0).unwrap();
        ds.rewind();

        let obj = rt.create_object("Panel", None).unwrap();
        assert_eq!(rt.load_object(&obj, &mut ds).unwrap(), Version::new(2, 0));
        assert_eq!(obj.get_prop("visible", PropType::Bool).unwrap().as_i64(), Some(1));
    }

    /// Start a 2.1 `Panel` body with no variables
    fn panel_head(rt: &Runtime) -> MemSource {
        let mut ds = MemSource::memory(rt.codec());
        write_version(&mut ds, OBJECT_FORMAT, &OBJECT_VERSION).unwrap();
        ds.write_u32(0).unwrap();
        ds.write_string("Panel").unwrap();
        VariableList::new().write_table(&mut ds).unwrap();
        ds
    }

    #[test]
    fn test_oversized_section_is_truncated() {
        let rt = runtime();
        let mut ds = panel_head(&rt);
        ds.write_u32(1).unwrap();
        ds.write_string("Panel").unwrap();
        ds.write_u32(0xffff_fff0).unwrap();
        ds.write_bytes(&[0u8; 8]).unwrap();
        ds.rewind();

        let obj = rt.create_object("Panel", None).unwrap();
        assert!(matches!(
            rt.load_object(&obj, &mut ds),
            Err(CoreError::Truncated(0xffff_fff0))
        ));
    }

    #[test]
    fn test_bad_child_name_rejected() {
        let rt = runtime();
        for bad in ["a/b".to_string(), "x".repeat(10_000)] {
            let mut ds = panel_head(&rt);
            ds.write_u32(0).unwrap();
            ds.write_u32(1).unwrap();
            ds.write_string(&bad).unwrap();
            ds.write_u32(0).unwrap();
            ds.write_string("Panel").unwrap();
            VariableList::new().write_table(&mut ds).unwrap();
            ds.write_u32(0).unwrap();
            ds.write_u32(0).unwrap();
            ds.rewind();

            let obj = rt.create_object("Panel", None).unwrap();
            assert!(matches!(
                rt.load_object(&obj, &mut ds),
                Err(CoreError::InvalidName(_))
            ));
            assert!(obj.children().is_empty());
            assert_eq!(rt.last_error().unwrap().code, ErrorCode::InvalidName);
        }
    }

    #[test]
    fn test_dump_json() {
        let rt = runtime();
        let root = rt.create_object("Panel", Some("main")).unwrap();
        let board = rt.create_object("Panel:Board", Some("board")).unwrap();
        rt.attach(&root, &board).unwrap();
        root.set_var("w", 640u16);

        let mut ds = MemSource::memory(rt.codec());
        rt.save_object(&root, &mut ds).unwrap();
        ds.rewind();
        let dump = dump_object(&mut ds).unwrap();
        assert_eq!(dump["class"], "Panel");
        assert_eq!(dump["vars"]["w"], 640);
        assert_eq!(dump["format"], "2.1");
        assert_eq!(dump["children"]["board"]["sections"][0]["class"], "Panel:Board");
    }
}
