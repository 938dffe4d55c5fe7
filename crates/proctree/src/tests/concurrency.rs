// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::{Callbacks, Caller, Error, Filesystem, OpenMode, PodValue, TypedBinding, Unregistered};

/// Counts how many times the leaf owning it is freed.
struct DropProbe(Arc<AtomicUsize>);

impl Drop for DropProbe {
    fn drop(&mut self) {
        _ = self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn jitter() {
    let micros = rand::thread_rng().gen_range(0..200);
    thread::sleep(Duration::from_micros(micros));
}

fn tolerate_removal<T>(result: crate::Result<T>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(Error::NotFound(_)) => None,
        Err(e) => panic!("unexpected error: {e}"),
    }
}

#[test]
fn test_concurrent_access_with_unregister_removes_once() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 50;

    for _ in 0..10 {
        let drops = Arc::new(AtomicUsize::new(0));
        let fs = Arc::new(Filesystem::default());
        let probe = DropProbe(drops.clone());
        fs.register_leaf(
            "/hot/node",
            Callbacks::new().on_read(move |_req, buf, _offset| {
                let _keep = &probe;
                jitter();
                buf[0] = b'x';
                Ok(1)
            }),
        )
        .unwrap();

        let start = Arc::new(Barrier::new(THREADS + 1));
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let fs = fs.clone();
                let start = start.clone();
                thread::spawn(move || {
                    let caller = Caller::current();
                    _ = start.wait();
                    for _ in 0..ROUNDS {
                        let Some(tid) =
                            tolerate_removal(fs.open("/hot/node", OpenMode::ReadOnly, &caller))
                        else {
                            break;
                        };
                        let mut buf = [0u8; 1];
                        _ = tolerate_removal(fs.read("/hot/node", &mut buf, 0, tid, &caller));
                        jitter();
                        _ = tolerate_removal(fs.release("/hot/node", tid, &caller));
                    }
                })
            })
            .collect();

        _ = start.wait();
        thread::sleep(Duration::from_micros(rand::thread_rng().gen_range(0..2000)));
        let outcome = fs.unregister("/hot/node").unwrap();
        assert!(matches!(outcome, Unregistered::Removed | Unregistered::Deferred));

        for worker in workers {
            worker.join().unwrap();
        }

        assert!(!fs.exists("/hot/node"));
        assert!(fs.list("/").unwrap().is_empty());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn test_concurrent_writers_never_tear() {
    for _ in 0..20 {
        let fs = Arc::new(Filesystem::default());
        fs.register_typed("/port", TypedBinding::read_write(PodValue::Int(80)))
            .unwrap();

        let start = Arc::new(Barrier::new(2));
        let writers: Vec<_> = ["8080", "9191"]
            .into_iter()
            .map(|text| {
                let fs = fs.clone();
                let start = start.clone();
                thread::spawn(move || {
                    let caller = Caller::current();
                    let tid = fs.open("/port", OpenMode::WriteOnly, &caller)?;
                    _ = start.wait();
                    // One byte at a time so the two handles interleave.
                    for (i, byte) in text.bytes().enumerate() {
                        _ = fs.write("/port", &[byte], i as u64, tid, &caller)?;
                        jitter();
                    }
                    fs.release("/port", tid, &caller)
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap().unwrap();
        }

        let value = fs.read_as::<i32>("/port").unwrap();
        assert!(value == 8080 || value == 9191, "torn value {value}");
    }
}

#[test]
fn test_readers_see_only_committed_values() {
    let fs = Arc::new(Filesystem::default());
    fs.register_typed("/n", TypedBinding::read_write(PodValue::Int64(0)))
        .unwrap();

    let writer = {
        let fs = fs.clone();
        thread::spawn(move || {
            for i in 1..=200i64 {
                // Committed values are always a multiple of 1111.
                super::write_text(&fs, "/n", &(i * 1111).to_string())?;
            }
            Ok::<_, Error>(())
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let fs = fs.clone();
            thread::spawn(move || {
                let caller = Caller::current();
                for _ in 0..200 {
                    let tid = fs.open("/n", OpenMode::ReadOnly, &caller)?;
                    let mut buf = [0u8; 64];
                    let n = fs.read("/n", &mut buf, 0, tid, &caller)?;
                    fs.release("/n", tid, &caller)?;
                    let value: i64 = String::from_utf8_lossy(&buf[..n]).parse().unwrap_or(-1);
                    assert_eq!(value % 1111, 0, "read uncommitted text {value}");
                }
                Ok::<_, Error>(())
            })
        })
        .collect();

    writer.join().unwrap().unwrap();
    for reader in readers {
        reader.join().unwrap().unwrap();
    }
    assert_eq!(fs.read_as::<i64>("/n").unwrap(), 200 * 1111);
}

#[test]
fn test_handler_may_query_filesystem_while_writer_waits() {
    let fs = Arc::new(Filesystem::default());
    let weak = Arc::downgrade(&fs);
    let (entered_tx, entered_rx) = mpsc::channel();
    fs.register_leaf(
        "/status",
        Callbacks::new().on_read(move |_req, buf, _offset| {
            _ = entered_tx.send(());
            thread::sleep(Duration::from_millis(100));
            let listed = weak.upgrade().map_or(0, |fs| fs.list("/").map_or(0, |l| l.len()));
            buf[0] = b'0' + listed as u8;
            Ok(1)
        }),
    )
    .unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let reader = |done: mpsc::Sender<bool>| {
        let fs = fs.clone();
        thread::spawn(move || {
            let caller = Caller::current();
            let mut buf = [0u8; 1];
            let ok = fs
                .open("/status", OpenMode::ReadOnly, &caller)
                .and_then(|tid| {
                    let n = fs.read("/status", &mut buf, 0, tid, &caller)?;
                    fs.release("/status", tid, &caller)?;
                    Ok(n == 1 && buf[0] == b'1')
                })
                .unwrap_or(false);
            _ = done.send(ok);
        })
    };

    let first = reader(done_tx.clone());
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let chmod = {
        let fs = fs.clone();
        let done = done_tx.clone();
        thread::spawn(move || {
            _ = done.send(fs.chmod("/status", 0o400).is_ok());
        })
    };
    thread::sleep(Duration::from_millis(20));
    let second = reader(done_tx);

    for _ in 0..3 {
        let ok = done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("filesystem stalled");
        assert!(ok);
    }
    for handle in [first, chmod, second] {
        handle.join().unwrap();
    }
}
