// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::accessor::{AppData, Callbacks, Caller, OpenMode, Request};
use crate::config::FsOptions;
use crate::error::{Error, LastError, Result};
use crate::lock::{self, LeafAccess, Unregistered};
use crate::node::{Attr, DirEntry, EntryKind, Leaf, LeafBody, LeafState, Metadata, TypedState};
use crate::path;
use crate::pod::{Pod, PodType, PodValue};
use crate::store::{Directory, Node};
use crate::typed::{self, TypedBinding};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Last error of the current thread, per filesystem instance. Entries go
    /// away with the thread.
    static LAST_ERRORS: RefCell<HashMap<u64, LastError>> = RefCell::new(HashMap::new());
}

/// Number of last errors held for the calling thread, across instances.
#[cfg(test)]
pub(crate) fn recorded_errors() -> usize {
    LAST_ERRORS.with_borrow(HashMap::len)
}

/// A virtual file tree.
///
/// Registration and the value helpers are used by the application; `open`,
/// `read`, `write`, `truncate`, `release`, `list` and `getattr` are the
/// operations a transport forwards kernel requests to. All of them may be
/// called concurrently from any number of threads.
///
/// ```
/// use proctree::{Caller, Filesystem, OpenMode, PodValue, TypedBinding};
///
/// let fs = Filesystem::default();
/// fs.register_typed("/net/port", TypedBinding::read_write(PodValue::Int(80)))?;
///
/// let caller = Caller::current();
/// let tid = fs.open("/net/port", OpenMode::WriteOnly, &caller)?;
/// fs.write("/net/port", b"8080\n", 0, tid, &caller)?;
/// fs.release("/net/port", tid, &caller)?;
///
/// assert_eq!(fs.read_as::<i32>("/net/port")?, 8080);
/// # Ok::<(), proctree::Error>(())
/// ```
pub struct Filesystem {
    root: Mutex<Directory>,
    next_tid: AtomicU64,
    single_threaded: AtomicBool,
    appdata: Option<AppData>,
    options: FsOptions,
    instance: u64,
}

impl Default for Filesystem {
    fn default() -> Self {
        Self::new(FsOptions::default(), None)
    }
}

impl Filesystem {
    pub fn new(options: FsOptions, appdata: Option<AppData>) -> Self {
        Self {
            root: Mutex::new(Directory::default()),
            next_tid: AtomicU64::new(1),
            single_threaded: AtomicBool::new(options.single_threaded),
            appdata,
            options,
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn name(&self) -> &str {
        &self.options.fs_name
    }

    pub fn options(&self) -> &FsOptions {
        &self.options
    }

    /// Whether transports should serve requests on one thread.
    pub fn single_threaded(&self) -> bool {
        self.single_threaded.load(Ordering::Relaxed)
    }

    pub(crate) fn set_single_threaded(&self, single: bool) {
        self.single_threaded.store(single, Ordering::Relaxed);
    }

    pub fn appdata(&self) -> Option<&AppData> {
        self.appdata.as_ref()
    }

    /// The last error recorded by a failing operation on the calling thread.
    pub fn last_error(&self) -> Option<LastError> {
        LAST_ERRORS.with_borrow(|errors| errors.get(&self.instance).cloned())
    }

    pub fn clear_last_error(&self) {
        _ = LAST_ERRORS.with_borrow_mut(|errors| errors.remove(&self.instance));
    }

    fn record<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            _ = LAST_ERRORS
                .with_borrow_mut(|errors| errors.insert(self.instance, LastError::from(err)));
        }
        result
    }

    pub(crate) fn acquire(&self, path: &str) -> Result<LeafAccess<'_>> {
        LeafAccess::acquire(&self.root, path)
    }

    fn request<'r>(&'r self, leaf: &'r Leaf, tid: u64, caller: &Caller) -> Request<'r> {
        Request {
            path: &leaf.path,
            tid,
            caller: *caller,
            appdata: self.appdata.as_ref(),
        }
    }

    // Registration

    /// Registers a leaf served by `callbacks`, creating parent directories.
    pub fn register_leaf(&self, path: &str, callbacks: Callbacks) -> Result<()> {
        self.record(self.insert(path, LeafBody::Plain(callbacks), None))
    }

    /// Registers a leaf bound to a typed value.
    pub fn register_typed(&self, path: &str, binding: TypedBinding) -> Result<()> {
        let (profile, state) = binding.into_parts(self.options.string_capacity);
        self.record(self.insert(path, LeafBody::Typed(profile), Some(state)))
    }

    fn insert(&self, path: &str, body: LeafBody, typed: Option<TypedState>) -> Result<()> {
        let segs = path::leaf_segments(path)?;
        let canonical = path::canonical(&segs);
        let meta = Metadata::new(
            self.options.default_mode,
            self.options.default_uid,
            self.options.default_gid,
        );
        let leaf = Arc::new(Leaf::new(
            canonical.clone(),
            segs.iter().map(|s| s.to_string()).collect(),
            body,
            LeafState { meta, typed },
        ));

        self.root.lock().insert_leaf(&segs, leaf)?;
        diagnostics::log_info!("Registered {path}", path: canonical.as_str());
        Ok(())
    }

    /// Removes a leaf. A leaf with requests in flight or open write handles
    /// disappears from listings at once and is removed when the last of them
    /// is released.
    pub fn unregister(&self, path: &str) -> Result<Unregistered> {
        let result = lock::unregister(&self.root, path);
        if let Ok(outcome) = &result {
            let outcome = format!("{outcome:?}");
            diagnostics::log_info!("Unregistered {path}: {outcome}", path: path, outcome: outcome.as_str());
        }
        self.record(result)
    }

    /// Drops every node. Used by session teardown once the transport is gone.
    pub(crate) fn clear(&self) -> usize {
        let mut leaves = Vec::new();
        self.root.lock().drain_leaves(&mut leaves);
        leaves.len()
    }

    // Queries

    /// Children of the directory at `path` (`/` is the root).
    pub fn list(&self, path: &str) -> Result<Vec<DirEntry>> {
        self.record(self.list_inner(path))
    }

    fn list_inner(&self, path: &str) -> Result<Vec<DirEntry>> {
        let segs = path::segments(path)?;
        let tree = self.root.lock();
        if segs.is_empty() {
            return Ok(tree.list());
        }
        match tree.lookup(&segs) {
            Some(Node::Directory(dir)) => Ok(dir.list()),
            Some(Node::Leaf(_)) => Err(Error::not_a_directory(path)),
            None => Err(Error::not_found(path)),
        }
    }

    /// Attributes of a directory or leaf. The root always exists.
    pub fn getattr(&self, path: &str) -> Result<Attr> {
        self.record(self.getattr_inner(path))
    }

    /// Same as [`Filesystem::getattr`].
    pub fn stat(&self, path: &str) -> Result<Attr> {
        self.getattr(path)
    }

    fn getattr_inner(&self, path: &str) -> Result<Attr> {
        let segs = path::segments(path)?;
        {
            let tree = self.root.lock();
            let node = if segs.is_empty() {
                None
            } else {
                Some(tree.lookup(&segs).ok_or_else(|| Error::not_found(path))?)
            };
            if !matches!(node, Some(Node::Leaf(_))) {
                let mut attr = Attr::directory();
                attr.uid = self.options.default_uid;
                attr.gid = self.options.default_gid;
                return Ok(attr);
            }
        }
        let access = self.acquire(path)?;
        Ok(access.leaf().attr(access.state()))
    }

    /// Whether `path` resolves to a leaf, including one pending removal.
    pub fn exists(&self, path: &str) -> bool {
        let Ok(segs) = path::leaf_segments(path) else {
            return false;
        };
        matches!(self.root.lock().lookup(&segs), Some(Node::Leaf(_)))
    }

    pub fn is_typed(&self, path: &str) -> Result<bool> {
        let kind = self
            .acquire(path)
            .map(|access| access.leaf().kind());
        self.record(kind).map(|kind| kind == EntryKind::TypedLeaf)
    }

    /// Number of registered leaves, including those pending removal.
    pub fn leaf_count(&self) -> usize {
        self.root.lock().count_leaves()
    }

    /// Human-readable dump of the registered tree.
    pub fn tree(&self) -> String {
        let mut out = String::from("/\n");
        self.root.lock().render_tree(1, &mut out);
        out
    }

    // Metadata

    /// Sets the permission bits, overriding the ones derived from the
    /// leaf's capabilities.
    pub fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        let result = self.acquire(path).map(|mut access| {
            access.with_write(|state| state.meta.mode = Some(mode & 0o7777));
        });
        self.record(result)
    }

    /// Sets the owner and/or group; `None` leaves a field unchanged.
    pub fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        let result = self.acquire(path).map(|mut access| {
            access.with_write(|state| {
                if let Some(uid) = uid {
                    state.meta.uid = uid;
                }
                if let Some(gid) = gid {
                    state.meta.gid = gid;
                }
            });
        });
        self.record(result)
    }

    /// Sets the access and/or modification time.
    pub fn utime(
        &self,
        path: &str,
        accessed: Option<SystemTime>,
        modified: Option<SystemTime>,
    ) -> Result<()> {
        let result = self.acquire(path).map(|mut access| {
            access.with_write(|state| {
                if let Some(t) = accessed {
                    *state.meta.accessed.get_mut() = t;
                }
                if let Some(t) = modified {
                    state.meta.modified = t;
                }
            });
        });
        self.record(result)
    }

    // Transport operations

    /// Opens a leaf and returns a new handle id.
    ///
    /// Fails with `NotFound` for a leaf pending removal and with
    /// `AccessDenied` when `mode` asks for a capability the leaf lacks.
    pub fn open(&self, path: &str, mode: OpenMode, caller: &Caller) -> Result<u64> {
        self.record(self.open_inner(path, mode, caller))
    }

    fn open_inner(&self, path: &str, mode: OpenMode, caller: &Caller) -> Result<u64> {
        let mut access = self.acquire(path)?;
        if access.is_pending() {
            return Err(Error::not_found(path));
        }
        let leaf = access.leaf_arc();
        if (mode.reads() && !leaf.readable()) || (mode.writes() && !leaf.writable()) {
            return Err(Error::access_denied(path));
        }

        let tid = self.next_tid.fetch_add(1, Ordering::SeqCst);
        match &leaf.body {
            LeafBody::Plain(cb) => {
                if let Some(on_open) = &cb.open {
                    on_open(&self.request(&leaf, tid, caller))?;
                }
            }
            LeafBody::Typed(profile) => typed::open(&mut access, profile, tid, mode)?,
        }
        diagnostics::log_debug!("Opened {path} as handle {tid}", path: leaf.path.as_str(), tid: tid);
        Ok(tid)
    }

    /// Reads from `offset` into `buf`. Reading past the end returns 0.
    pub fn read(
        &self,
        path: &str,
        buf: &mut [u8],
        offset: u64,
        tid: u64,
        caller: &Caller,
    ) -> Result<usize> {
        self.record(self.read_inner(path, buf, offset, tid, caller))
    }

    fn read_inner(
        &self,
        path: &str,
        buf: &mut [u8],
        offset: u64,
        tid: u64,
        caller: &Caller,
    ) -> Result<usize> {
        let access = self.acquire(path)?;
        let leaf = access.leaf_arc();
        if !leaf.readable() {
            return Err(Error::InvalidHandle(tid));
        }
        match &leaf.body {
            LeafBody::Plain(cb) => match &cb.read {
                Some(on_read) => {
                    let n = on_read(&self.request(&leaf, tid, caller), buf, offset)?;
                    Ok(n.min(buf.len()))
                }
                None => Err(Error::InvalidHandle(tid)),
            },
            LeafBody::Typed(_) => typed::read(&access, buf, offset),
        }
    }

    /// Writes `data` at `offset`. Empty writes succeed without doing
    /// anything; a handler that accepts nothing of a non-empty write is an
    /// I/O fault.
    pub fn write(
        &self,
        path: &str,
        data: &[u8],
        offset: u64,
        tid: u64,
        caller: &Caller,
    ) -> Result<usize> {
        self.record(self.write_inner(path, data, offset, tid, caller))
    }

    fn write_inner(
        &self,
        path: &str,
        data: &[u8],
        offset: u64,
        tid: u64,
        caller: &Caller,
    ) -> Result<usize> {
        let mut access = self.acquire(path)?;
        if data.is_empty() {
            return Ok(0);
        }
        let leaf = access.leaf_arc();
        if !leaf.writable() {
            return Err(Error::InvalidHandle(tid));
        }
        let n = match &leaf.body {
            LeafBody::Plain(cb) => match &cb.write {
                Some(on_write) => on_write(&self.request(&leaf, tid, caller), data, offset)?,
                None => return Err(Error::InvalidHandle(tid)),
            },
            LeafBody::Typed(profile) => typed::write(&mut access, profile, data, offset, tid)?,
        };
        if n == 0 {
            return Err(Error::io_fault(format!(
                "write handler for {} accepted 0 of {} bytes",
                leaf.path,
                data.len()
            )));
        }
        Ok(n.min(data.len()))
    }

    /// Resizes a leaf. Only String leaves and plain leaves with a truncate
    /// handler react; everything else accepts it unchanged.
    pub fn truncate(&self, path: &str, size: u64, caller: &Caller) -> Result<()> {
        self.record(self.truncate_inner(path, size, caller))
    }

    fn truncate_inner(&self, path: &str, size: u64, caller: &Caller) -> Result<()> {
        let mut access = self.acquire(path)?;
        let leaf = access.leaf_arc();
        match &leaf.body {
            LeafBody::Plain(cb) => match &cb.truncate {
                Some(on_truncate) => on_truncate(&self.request(&leaf, 0, caller), size),
                None => Ok(()),
            },
            LeafBody::Typed(profile) => {
                if !profile.access.writable() {
                    return Err(Error::access_denied(path));
                }
                typed::truncate(&mut access, profile, size)
            }
        }
    }

    /// Ends a handle. Typed scalars commit their buffered write here.
    pub fn release(&self, path: &str, tid: u64, caller: &Caller) -> Result<()> {
        self.record(self.release_inner(path, tid, caller))
    }

    fn release_inner(&self, path: &str, tid: u64, caller: &Caller) -> Result<()> {
        let mut access = self.acquire(path)?;
        let leaf = access.leaf_arc();
        match &leaf.body {
            LeafBody::Plain(cb) => match &cb.release {
                Some(on_release) => on_release(&self.request(&leaf, tid, caller)),
                None => Ok(()),
            },
            LeafBody::Typed(profile) => typed::release(&mut access, profile, tid),
        }
    }

    // Typed values

    /// The committed value of a typed leaf, converted to `ty`.
    pub fn read_value(&self, path: &str, ty: PodType) -> Result<PodValue> {
        let result = self
            .acquire(path)
            .and_then(|access| typed::read_value(&access))
            .and_then(|value| value.coerce(ty));
        self.record(result)
    }

    /// Converts `value` to the leaf's type and commits it.
    pub fn write_value(&self, path: &str, value: PodValue) -> Result<()> {
        let result = self.acquire(path).and_then(|mut access| {
            let leaf = access.leaf_arc();
            match &leaf.body {
                LeafBody::Typed(profile) => typed::write_value(&mut access, profile, value),
                LeafBody::Plain(_) => Err(Error::wrong_kind(path)),
            }
        });
        self.record(result)
    }

    pub fn read_as<T: Pod>(&self, path: &str) -> Result<T> {
        let value = self.read_value(path, T::TYPE)?;
        let result = T::from_value(value)
            .ok_or_else(|| Error::invalid_argument(format!("{path} does not hold a valid {}", T::TYPE)));
        self.record(result)
    }

    pub fn write_as<T: Pod>(&self, path: &str, value: T) -> Result<()> {
        self.write_value(path, value.into_value())
    }
}

impl std::fmt::Debug for Filesystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filesystem")
            .field("name", &self.options.fs_name)
            .field("leaves", &self.leaf_count())
            .field("next_tid", &self.next_tid.load(Ordering::Relaxed))
            .finish()
    }
}
