// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Barrier};
use std::thread;

use super::static_text;
use crate::{Callbacks, Caller, Error, Filesystem, OpenMode, PodValue, TypedBinding, Unregistered};

#[test]
fn test_unregister_while_acquired_defers_removal() {
    let fs = Filesystem::default();
    fs.register_leaf("/dir/node", static_text("x")).unwrap();

    let access = fs.acquire("/dir/node").unwrap();
    assert_eq!(fs.unregister("/dir/node").unwrap(), Unregistered::Deferred);

    // Still resolvable, but hidden from listings and from new opens.
    assert!(fs.exists("/dir/node"));
    assert!(fs.list("/dir").unwrap().is_empty());
    assert!(matches!(
        fs.open("/dir/node", OpenMode::ReadOnly, &Caller::current()),
        Err(Error::NotFound(_))
    ));
    assert!(fs.tree().contains("(pending unlink)"));

    drop(access);
    assert!(!fs.exists("/dir/node"));
    assert!(fs.list("/").unwrap().is_empty());
    assert_eq!(fs.leaf_count(), 0);
}

#[test]
fn test_unregister_during_blocked_read_on_other_thread() {
    let fs = Arc::new(Filesystem::default());
    let entered = Arc::new(Barrier::new(2));
    let resume = Arc::new(Barrier::new(2));

    let callbacks = {
        let entered = entered.clone();
        let resume = resume.clone();
        Callbacks::new().on_read(move |_req, buf, _offset| {
            _ = entered.wait();
            _ = resume.wait();
            buf[0] = b'!';
            Ok(1)
        })
    };
    fs.register_leaf("/slow", callbacks).unwrap();

    let caller = Caller::current();
    let tid = fs.open("/slow", OpenMode::ReadOnly, &caller).unwrap();
    let reader = {
        let fs = fs.clone();
        thread::spawn(move || {
            let mut buf = [0u8; 4];
            let n = fs.read("/slow", &mut buf, 0, tid, &caller)?;
            Ok::<_, Error>(buf[..n].to_vec())
        })
    };

    _ = entered.wait();
    assert_eq!(fs.unregister("/slow").unwrap(), Unregistered::Deferred);
    assert!(fs.exists("/slow"));
    assert!(fs.list("/").unwrap().is_empty());

    _ = resume.wait();
    assert_eq!(reader.join().unwrap().unwrap(), b"!");
    assert!(!fs.exists("/slow"));
}

#[test]
fn test_open_write_handle_keeps_typed_leaf_alive() {
    let fs = Filesystem::default();
    let caller = Caller::current();
    fs.register_typed("/port", TypedBinding::read_write(PodValue::Int(80)))
        .unwrap();

    let tid = fs.open("/port", OpenMode::WriteOnly, &caller).unwrap();
    assert_eq!(fs.unregister("/port").unwrap(), Unregistered::Deferred);

    // The handle still works until it is released.
    assert_eq!(fs.write("/port", b"81", 0, tid, &caller).unwrap(), 2);
    assert!(fs.exists("/port"));
    fs.release("/port", tid, &caller).unwrap();
    assert!(!fs.exists("/port"));
}

#[test]
fn test_read_only_handle_does_not_pin_typed_leaf() {
    let fs = Filesystem::default();
    let caller = Caller::current();
    fs.register_typed("/speed", TypedBinding::read_only(PodValue::Float(1.5)))
        .unwrap();

    let tid = fs.open("/speed", OpenMode::ReadOnly, &caller).unwrap();
    assert_eq!(fs.unregister("/speed").unwrap(), Unregistered::Removed);
    assert!(matches!(
        fs.release("/speed", tid, &caller),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_path_is_reusable_after_deferred_removal() {
    let fs = Filesystem::default();
    fs.register_leaf("/a/x", static_text("old")).unwrap();

    let access = fs.acquire("/a/x").unwrap();
    assert_eq!(fs.unregister("/a/x").unwrap(), Unregistered::Deferred);
    assert!(matches!(
        fs.register_leaf("/a/x", static_text("new")),
        Err(Error::AlreadyExists(_))
    ));
    // A second unregister of a pending leaf stays deferred.
    assert_eq!(fs.unregister("/a/x").unwrap(), Unregistered::Deferred);
    drop(access);

    fs.register_leaf("/a/x", static_text("new")).unwrap();
    assert_eq!(super::read_all(&fs, "/a/x").unwrap(), b"new");
}
