//! Async events, with and without a dispatcher

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use common::{CallLog, RtTest};
use hemirt::events::{handler, EventCall, EventFlags};
use tokio::runtime::Handle;

#[test]
fn test_async_event_without_dispatcher_uses_thread() {
    let t = RtTest::new();
    let obj = t.node(None, "obj");
    let (tx, rx) = mpsc::channel();
    let tx = parking_lot::Mutex::new(tx);
    obj.set_event(
        Some("bg"),
        handler(move |call: &EventCall<'_>| {
            let name = std::thread::current().name().map(str::to_string);
            let _ = tx.lock().send((name, call.int(0)));
        }),
        vec![],
        EventFlags::ASYNC,
    )
    .unwrap();

    assert!(!t.rt.has_dispatcher());
    let queued = t
        .rt
        .post_event(None, &obj, "bg", vec![5i64.into()])
        .unwrap();
    assert_eq!(queued, 1);

    let (thread, arg) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(thread.as_deref(), Some("hemirt-ev-bg"));
    assert_eq!(arg, Some(5));
}

#[tokio::test]
async fn test_dispatcher_runs_all_before_stop() {
    let t = RtTest::new();
    let obj = t.node(None, "obj");
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    obj.set_event(
        Some("work"),
        handler(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }),
        vec![],
        EventFlags::ASYNC,
    )
    .unwrap();

    t.rt.start_dispatcher(&Handle::current());
    assert!(t.rt.has_dispatcher());
    for _ in 0..10 {
        assert_eq!(t.rt.post_event(None, &obj, "work", vec![]).unwrap(), 1);
    }
    t.rt.stop_dispatcher().await;

    assert!(!t.rt.has_dispatcher());
    assert_eq!(count.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn test_async_propagation_reaches_descendants() {
    let t = RtTest::new();
    let root = t.node(None, "root");
    let child = t.node(Some(&root), "child");
    let grandchild = t.node(Some(&child), "grandchild");
    let log = CallLog::new();

    root.set_event(
        Some("sync"),
        log.recorder(),
        vec![],
        EventFlags::ASYNC | EventFlags::PROPAGATE,
    )
    .unwrap();
    child
        .set_event(Some("sync"), log.recorder(), vec![], EventFlags::NONE)
        .unwrap();
    grandchild
        .set_event(Some("sync"), log.recorder(), vec![], EventFlags::NONE)
        .unwrap();

    t.rt.start_dispatcher(&Handle::current());
    t.rt.post_event(None, &root, "sync", vec![]).unwrap();
    t.rt.stop_dispatcher().await;

    assert_eq!(
        log.entries(),
        vec!["child:sync", "grandchild:sync", "root:sync"]
    );
}
