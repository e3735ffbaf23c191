//! Search paths and object files on disk

mod common;

use std::fs;
use std::sync::Arc;

use common::RtTest;
use hemirt::codec::FileSource;
use hemirt::objects::{dump_object, OBJECT_VERSION};
use hemirt::paths::PathGroup;
use hemirt::{Config, CoreError, ErrorCode, Runtime};

#[test]
fn test_object_file_round_trip() {
    let t = RtTest::new();
    let desk = t.node(None, "desk");
    let drawer = t.node(Some(&desk), "drawer");
    desk.set_var("colour", "oak");
    drawer.set_var("items", 3u32);

    let path = t.rt.save_object_file(&desk).unwrap();
    assert_eq!(path, t.dir.path().join("desk.obj"));
    assert!(path.is_file());

    let fresh = t.rt.create_object("Root:Group", Some("desk")).unwrap();
    let version = t.rt.load_object_file(&fresh, None).unwrap();
    assert_eq!(version, OBJECT_VERSION);
    assert_eq!(fresh.get::<String>("colour").unwrap(), "oak");
    let drawer = fresh.child("drawer").unwrap();
    assert_eq!(drawer.get::<u32>("items").unwrap(), 3);
}

#[test]
fn test_load_into_existing_children() {
    let t = RtTest::new();
    let shelf = t.node(None, "shelf");
    let book = t.node(Some(&shelf), "book");
    book.set_var("pages", 200u16);
    t.rt.save_object_file(&shelf).unwrap();

    book.set_var("pages", 1u16);
    t.rt.load_object_file(&shelf, None).unwrap();

    let reloaded = shelf.child("book").unwrap();
    assert!(Arc::ptr_eq(&reloaded, &book));
    assert_eq!(book.get::<u16>("pages").unwrap(), 200);
    assert_eq!(shelf.children().len(), 1);
}

#[test]
fn test_load_under_another_name() {
    let t = RtTest::new();
    let a = t.node(None, "template");
    a.set_var("x", 1i64);
    t.rt.save_object_file(&a).unwrap();

    let b = t.rt.create_object("Root:Group", None).unwrap();
    t.rt.load_object_file(&b, Some("template")).unwrap();
    assert_eq!(b.get::<i64>("x").unwrap(), 1);

    assert!(t.rt.load_object_file(&b, Some("absent")).is_err());
    assert_eq!(t.rt.last_error().unwrap().code, ErrorCode::NoSuchPath);
}

#[test]
fn test_unnamed_object_cannot_be_saved() {
    let t = RtTest::new();
    let anon = t.rt.create_object("Root:Group", None).unwrap();
    assert!(matches!(
        t.rt.save_object_file(&anon),
        Err(CoreError::NotAttached(_))
    ));
}

#[test]
fn test_save_without_data_paths_fails() {
    let rt = Runtime::new(Config::default()).unwrap();
    rt.register_class(hemirt::classes::ClassDef::new("Thing"))
        .unwrap();
    let obj = rt.create_object("Thing", Some("thing")).unwrap();
    let err = rt.save_object_file(&obj).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NoSuchPath);
}

#[test]
fn test_dump_saved_file() {
    let t = RtTest::new();
    let root = t.node(None, "root");
    root.set_var("level", 4u8);
    t.node(Some(&root), "child");
    let path = t.rt.save_object_file(&root).unwrap();

    let mut file = FileSource::open(&path, t.rt.codec()).unwrap();
    let dump = dump_object(&mut file).unwrap();
    assert_eq!(dump["class"], "Root:Group");
    assert_eq!(dump["children"]["child"]["class"], "Root:Group");
}

#[test]
fn test_font_lookup_order_follows_hits() {
    let t = RtTest::new();
    let a = t.dir.path().join("fonts-a");
    let b = t.dir.path().join("fonts-b");
    fs::create_dir_all(&a).unwrap();
    fs::create_dir_all(&b).unwrap();
    fs::write(a.join("sans.ttf"), b"a").unwrap();
    fs::write(b.join("sans.ttf"), b"b").unwrap();
    fs::write(b.join("mono.ttf"), b"b").unwrap();

    t.rt.add_path(PathGroup::Fonts, &a).unwrap();
    t.rt.add_path(PathGroup::Fonts, &b).unwrap();

    assert_eq!(
        t.rt.find_file(PathGroup::Fonts, "sans.ttf").unwrap(),
        a.join("sans.ttf")
    );
    assert_eq!(
        t.rt.find_file(PathGroup::Fonts, "mono.ttf").unwrap(),
        b.join("mono.ttf")
    );
    assert_eq!(t.rt.paths(PathGroup::Fonts), vec![b.clone(), a.clone()]);
    assert_eq!(
        t.rt.find_file(PathGroup::Fonts, "sans.ttf").unwrap(),
        b.join("sans.ttf")
    );
}

#[test]
fn test_data_lookup_order_is_fixed() {
    let t = RtTest::new();
    let extra = t.dir.path().join("extra");
    fs::create_dir_all(&extra).unwrap();
    fs::write(extra.join("only.dat"), b"x").unwrap();
    t.rt.add_path(PathGroup::Data, &extra).unwrap();

    t.rt.find_file(PathGroup::Data, "only.dat").unwrap();
    assert_eq!(
        t.rt.paths(PathGroup::Data),
        vec![t.dir.path().to_path_buf(), extra.clone()]
    );
    assert!(t.rt.remove_path(PathGroup::Data, &extra));
    assert!(t.rt.find_file(PathGroup::Data, "only.dat").is_err());
}
