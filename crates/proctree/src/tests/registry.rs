// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use super::{read_all, static_text};
use crate::{
    AppData, Callbacks, Caller, EntryKind, Error, Filesystem, FsOptions, OpenMode, PodValue,
    TypedBinding, Unregistered,
};

fn names(fs: &Filesystem, path: &str) -> Vec<String> {
    fs.list(path)
        .unwrap()
        .into_iter()
        .map(|entry| entry.name)
        .collect()
}

#[test]
fn test_registered_leaf_is_listed_by_every_ancestor() {
    let fs = Filesystem::default();
    fs.register_leaf("/net/hosts/list", static_text("a\nb\n"))
        .unwrap();

    assert_eq!(names(&fs, "/"), vec!["net"]);
    assert_eq!(names(&fs, "/net"), vec!["hosts"]);
    assert_eq!(names(&fs, "/net/hosts"), vec!["list"]);

    let attr = fs.getattr("/net/hosts/list").unwrap();
    assert_eq!(attr.kind, EntryKind::Leaf);
    assert_eq!(attr.perm, 0o444);
    assert_eq!(attr.size, 0);
    assert_eq!(read_all(&fs, "/net/hosts/list").unwrap(), b"a\nb\n");
}

#[test]
fn test_paths_are_normalised() {
    let fs = Filesystem::default();
    fs.register_leaf("//a//b/", static_text("x")).unwrap();
    assert!(fs.exists("/a/b"));
    assert!(fs.exists("a/b"));
    assert!(matches!(
        fs.register_leaf("/a/b", static_text("y")),
        Err(Error::AlreadyExists(_))
    ));
}

#[test]
fn test_invalid_paths_rejected() {
    let fs = Filesystem::default();
    for path in ["", "/", "///", "/a/../b", "/a/./b"] {
        assert!(
            matches!(fs.register_leaf(path, static_text("x")), Err(Error::InvalidArgument(_))),
            "{path} should be rejected"
        );
    }
    assert_eq!(fs.leaf_count(), 0);
}

#[test]
fn test_kind_conflicts_leave_tree_unchanged() {
    let fs = Filesystem::default();
    fs.register_leaf("/a/b", static_text("x")).unwrap();

    // A directory already lives at /a.
    assert!(matches!(
        fs.register_leaf("/a", static_text("x")),
        Err(Error::WrongKind(_))
    ));
    // /a/b is a leaf, so it cannot become a directory.
    assert!(matches!(
        fs.register_leaf("/a/b/c/d", static_text("x")),
        Err(Error::WrongKind(_))
    ));

    assert_eq!(fs.leaf_count(), 1);
    assert_eq!(names(&fs, "/a"), vec!["b"]);
    assert_eq!(fs.tree(), "/\n  a/\n    b [leaf 444 refs=0]\n");
}

#[test]
fn test_unregister_prunes_empty_directories() {
    let fs = Filesystem::default();
    fs.register_leaf("/a/b/c", static_text("x")).unwrap();
    fs.register_leaf("/a/d", static_text("y")).unwrap();

    assert_eq!(fs.unregister("/a/b/c").unwrap(), Unregistered::Removed);
    assert_eq!(names(&fs, "/a"), vec!["d"]);
    assert!(matches!(fs.list("/a/b"), Err(Error::NotFound(_))));

    assert_eq!(fs.unregister("/a/d").unwrap(), Unregistered::Removed);
    assert!(names(&fs, "/").is_empty());
    assert!(matches!(fs.unregister("/a/d"), Err(Error::NotFound(_))));
}

#[test]
fn test_getattr_on_directories_and_missing_paths() {
    let fs = Filesystem::default();
    fs.register_leaf("/dir/leaf", static_text("x")).unwrap();

    let root = fs.getattr("/").unwrap();
    assert_eq!(root.kind, EntryKind::Directory);
    assert_eq!(root.mode(), libc::S_IFDIR as u32 | 0o777);
    assert_eq!(root.nlink, 2);

    assert!(fs.getattr("/dir").unwrap().kind.is_dir());
    assert!(matches!(fs.getattr("/missing"), Err(Error::NotFound(_))));
    assert!(matches!(fs.list("/dir/leaf"), Err(Error::NotADirectory(_))));
}

#[test]
fn test_open_checks_capabilities() {
    let fs = Filesystem::default();
    let caller = Caller::current();
    fs.register_leaf("/ro", static_text("x")).unwrap();
    fs.register_typed("/wo", TypedBinding::new(PodValue::Int(1), crate::AccessMode::WriteOnly))
        .unwrap();

    assert!(matches!(
        fs.open("/ro", OpenMode::WriteOnly, &caller),
        Err(Error::AccessDenied(_))
    ));
    assert!(matches!(
        fs.open("/ro", OpenMode::ReadWrite, &caller),
        Err(Error::AccessDenied(_))
    ));
    assert!(matches!(
        fs.open("/wo", OpenMode::ReadOnly, &caller),
        Err(Error::AccessDenied(_))
    ));
    assert_eq!(fs.getattr("/wo").unwrap().perm, 0o222);
}

#[test]
fn test_handle_ids_are_unique() {
    let fs = Filesystem::default();
    let caller = Caller::current();
    fs.register_leaf("/x", static_text("x")).unwrap();

    let a = fs.open("/x", OpenMode::ReadOnly, &caller).unwrap();
    let b = fs.open("/x", OpenMode::ReadOnly, &caller).unwrap();
    assert_ne!(a, b);
    fs.release("/x", a, &caller).unwrap();
    fs.release("/x", b, &caller).unwrap();
    let c = fs.open("/x", OpenMode::ReadOnly, &caller).unwrap();
    assert!(c > b);
}

#[test]
fn test_plain_write_semantics() {
    let fs = Filesystem::default();
    let caller = Caller::current();
    fs.register_leaf(
        "/sink",
        Callbacks::new().on_write(|_req, data, _offset| Ok(data.len().min(2))),
    )
    .unwrap();
    fs.register_leaf("/hole", Callbacks::new().on_write(|_req, _data, _offset| Ok(0)))
        .unwrap();

    let tid = fs.open("/sink", OpenMode::WriteOnly, &caller).unwrap();
    assert_eq!(fs.write("/sink", b"", 0, tid, &caller).unwrap(), 0);
    assert_eq!(fs.write("/sink", b"abcd", 0, tid, &caller).unwrap(), 2);
    assert!(matches!(
        fs.read("/sink", &mut [0u8; 4], 0, tid, &caller),
        Err(Error::InvalidHandle(_))
    ));

    let tid = fs.open("/hole", OpenMode::WriteOnly, &caller).unwrap();
    let err = fs.write("/hole", b"abcd", 0, tid, &caller).unwrap_err();
    assert!(matches!(err, Error::IoFault(_)));
    assert_eq!(err.errno(), libc::EIO);
}

#[test]
fn test_handlers_see_request_context() {
    struct Counter(std::sync::atomic::AtomicUsize);

    let counter = Arc::new(Counter(Default::default()));
    let fs = Filesystem::new(FsOptions::default(), Some(counter.clone() as AppData));
    let caller = Caller {
        uid: 1000,
        gid: 100,
        pid: 42,
        umask: 0o022,
    };
    fs.register_leaf(
        "/ctx",
        Callbacks::new()
            .on_open(|req| {
                assert_eq!(req.path, "/ctx");
                assert_eq!(req.caller.uid, 1000);
                req.appdata::<Counter>()
                    .ok_or_else(|| Error::invalid_argument("no appdata"))?
                    .0
                    .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .on_read(|req, buf, _offset| {
                let text = format!("{}:{}", req.caller.pid, req.tid);
                let n = buf.len().min(text.len());
                buf[..n].copy_from_slice(&text.as_bytes()[..n]);
                Ok(n)
            }),
    )
    .unwrap();

    let tid = fs.open("/ctx", OpenMode::ReadOnly, &caller).unwrap();
    let mut buf = [0u8; 32];
    let n = fs.read("/ctx", &mut buf, 0, tid, &caller).unwrap();
    assert_eq!(std::str::from_utf8(&buf[..n]).unwrap(), format!("42:{tid}"));
    assert_eq!(counter.0.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[test]
fn test_truncate_without_handler_is_accepted() {
    let fs = Filesystem::default();
    let caller = Caller::current();
    fs.register_leaf("/x", static_text("x")).unwrap();
    fs.truncate("/x", 0, &caller).unwrap();
    assert_eq!(read_all(&fs, "/x").unwrap(), b"x");
}

#[test]
fn test_metadata_setters() {
    let fs = Filesystem::default();
    fs.register_leaf("/x", static_text("x")).unwrap();

    fs.chmod("/x", 0o600).unwrap();
    fs.chown("/x", Some(1000), None).unwrap();
    let then = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
    fs.utime("/x", None, Some(then)).unwrap();

    let attr = fs.stat("/x").unwrap();
    assert_eq!(attr.perm, 0o600);
    assert_eq!(attr.uid, 1000);
    assert_eq!(attr.gid, 0);
    assert_eq!(attr.modified, then);
    assert_eq!(fs.list("/").unwrap()[0].perm, 0o600);

    assert!(matches!(fs.chmod("/nope", 0o600), Err(Error::NotFound(_))));
}

#[test]
fn test_last_error_is_per_thread() {
    let fs = Arc::new(Filesystem::default());
    assert!(fs.last_error().is_none());
    assert!(fs.unregister("/missing").is_err());

    let last = fs.last_error().unwrap();
    assert!(last.message.contains("/missing"));
    assert!(last.remedy.is_some());

    let other = {
        let fs = fs.clone();
        std::thread::spawn(move || fs.last_error()).join().unwrap()
    };
    assert!(other.is_none());

    fs.clear_last_error();
    assert!(fs.last_error().is_none());
}

#[test]
fn test_last_errors_go_away_with_their_threads() {
    std::thread::spawn(|| {
        let fs = Arc::new(Filesystem::default());
        let workers: Vec<_> = (0..64)
            .map(|_| {
                let fs = fs.clone();
                std::thread::spawn(move || {
                    let caller = Caller::current();
                    assert!(fs.open("/missing", OpenMode::ReadOnly, &caller).is_err());
                    assert!(fs.last_error().is_some());
                    crate::fs::recorded_errors()
                })
            })
            .collect();
        for worker in workers {
            assert_eq!(worker.join().unwrap(), 1);
        }
        assert_eq!(crate::fs::recorded_errors(), 0);
        assert!(fs.last_error().is_none());

        // Two instances on one thread keep separate slots.
        let other = Filesystem::default();
        assert!(fs.unregister("/missing").is_err());
        assert!(other.last_error().is_none());
        assert!(other.unregister("/gone").is_err());
        assert_eq!(crate::fs::recorded_errors(), 2);
        assert!(fs.last_error().unwrap().message.contains("/missing"));
    })
    .join()
    .unwrap();
}

#[test]
fn test_default_metadata_from_options() {
    let options = FsOptions {
        default_uid: 7,
        default_gid: 8,
        default_mode: Some(0o640),
        ..FsOptions::default()
    };
    let fs = Filesystem::new(options, None);
    fs.register_leaf("/a/x", static_text("x")).unwrap();

    let attr = fs.getattr("/a/x").unwrap();
    assert_eq!((attr.uid, attr.gid, attr.perm), (7, 8, 0o640));
    let dir = fs.getattr("/a").unwrap();
    assert_eq!((dir.uid, dir.gid), (7, 8));
}
