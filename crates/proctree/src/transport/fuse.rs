// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Kernel mount through FUSE.
//!
//! Inodes are assigned lazily as paths are looked up and never reused. A
//! leaf that is unregistered keeps its inode entry; requests on it simply
//! fail with `ENOENT` once it is gone from the tree.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, MountOption, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyWrite, TimeOrNow,
};
use parking_lot::RwLock;

use crate::accessor::{Caller, OpenMode};
use crate::config::FsOptions;
use crate::error::{Error, Result};
use crate::fs::Filesystem;
use crate::node::{Attr, EntryKind};
use crate::transport::{CancelToken, Transport};

const ROOT_INODE: u64 = 1;
const TTL: Duration = Duration::from_secs(0);
const BLOCK_SIZE: u32 = 512;

/// Serves a [`Filesystem`] at a host mount point.
#[derive(Debug)]
pub struct FuseTransport {
    mountpoint: PathBuf,
}

impl FuseTransport {
    pub fn new<P: Into<PathBuf>>(mountpoint: P) -> Self {
        Self {
            mountpoint: mountpoint.into(),
        }
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }
}

fn mount_options(options: &FsOptions) -> Vec<MountOption> {
    let mut out = vec![
        MountOption::FSName(options.fs_name.clone()),
        MountOption::DefaultPermissions,
    ];
    if options.allow_other {
        out.push(MountOption::AllowOther);
    }
    if options.auto_unmount {
        out.push(MountOption::AutoUnmount);
    }
    out.extend(
        options
            .extra_options
            .iter()
            .map(|opt| MountOption::CUSTOM(opt.clone())),
    );
    out
}

impl Transport for FuseTransport {
    fn name(&self) -> &str {
        "fuse"
    }

    fn serve(self: Box<Self>, fs: Arc<Filesystem>, cancel: CancelToken) -> Result<()> {
        let options = mount_options(fs.options());
        let single_threaded = fs.single_threaded();
        let adapter = FuseAdapter {
            fs,
            inodes: RwLock::new(InodeTable::new()),
            single_threaded,
        };

        let mountpoint = self.mountpoint.display().to_string();
        let mut session = fuser::Session::new(adapter, &self.mountpoint, &options)
            .map_err(|e| Error::Transport(format!("mount {mountpoint}: {e}")))?;
        diagnostics::log_info!("Mounted at {mountpoint}", mountpoint: mountpoint.as_str());

        let mut unmounter = session.unmount_callable();
        let watcher = thread::Builder::new()
            .name("proctree-unmount".to_string())
            .spawn(move || {
                cancel.wait();
                if let Err(e) = unmounter.unmount() {
                    let error = e.to_string();
                    diagnostics::log_warn!("Unmount failed: {error}", error: error.as_str());
                }
            })?;

        let served = session.run();
        drop(session);
        if watcher.join().is_err() {
            diagnostics::log_warn!("Unmount watcher panicked");
        }
        diagnostics::log_info!("Unmounted {mountpoint}", mountpoint: mountpoint.as_str());
        served.map_err(|e| Error::Transport(format!("serve {mountpoint}: {e}")))
    }
}

/// Lazily unmounts a dead mount left behind at `mountpoint`.
pub fn unmount_stale(mountpoint: &Path) -> Result<()> {
    let status = Command::new("fusermount")
        .arg("-u")
        .arg("-z")
        .arg(mountpoint)
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(Error::Transport(format!(
            "fusermount -u -z {} exited with {status}",
            mountpoint.display()
        )))
    }
}

/// Inode numbers handed to the kernel. An inode lives while the kernel holds
/// lookups on it; readdir numbers without lookups go when their path stops
/// resolving.
#[derive(Debug)]
struct InodeTable {
    by_inode: HashMap<u64, String>,
    by_path: HashMap<String, u64>,
    lookups: HashMap<u64, u64>,
    next_inode: u64,
}

impl InodeTable {
    fn new() -> Self {
        let mut table = Self {
            by_inode: HashMap::new(),
            by_path: HashMap::new(),
            lookups: HashMap::new(),
            next_inode: ROOT_INODE + 1,
        };
        _ = table.by_inode.insert(ROOT_INODE, "/".to_string());
        _ = table.by_path.insert("/".to_string(), ROOT_INODE);
        table
    }

    fn insert(&mut self, path: &str) -> u64 {
        if let Some(existing) = self.by_path.get(path) {
            return *existing;
        }
        let inode = self.next_inode;
        self.next_inode += 1;
        _ = self.by_inode.insert(inode, path.to_string());
        _ = self.by_path.insert(path.to_string(), inode);
        inode
    }

    /// Like `insert`, counting a kernel reference that `forget` drops.
    fn lookup(&mut self, path: &str) -> u64 {
        let inode = self.insert(path);
        *self.lookups.entry(inode).or_insert(0) += 1;
        inode
    }

    fn forget(&mut self, inode: u64, nlookup: u64) {
        let left = match self.lookups.get_mut(&inode) {
            Some(count) => {
                *count = count.saturating_sub(nlookup);
                *count
            }
            None => 0,
        };
        if left == 0 {
            self.evict(inode);
        }
    }

    /// Drops the inode of a path that no longer resolves, unless the kernel
    /// still references it.
    fn evict_missing(&mut self, path: &str) {
        let unreferenced = self
            .by_path
            .get(path)
            .copied()
            .filter(|inode| self.lookups.get(inode).is_none_or(|&count| count == 0));
        if let Some(inode) = unreferenced {
            self.evict(inode);
        }
    }

    fn evict(&mut self, inode: u64) {
        if inode == ROOT_INODE {
            return;
        }
        _ = self.lookups.remove(&inode);
        if let Some(path) = self.by_inode.remove(&inode) {
            _ = self.by_path.remove(&path);
        }
    }

    fn path(&self, inode: u64) -> Option<String> {
        self.by_inode.get(&inode).cloned()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.by_inode.len()
    }
}

fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

fn file_type(kind: EntryKind) -> FileType {
    if kind.is_dir() {
        FileType::Directory
    } else {
        FileType::RegularFile
    }
}

fn file_attr(ino: u64, attr: &Attr) -> FileAttr {
    FileAttr {
        ino,
        size: attr.size,
        blocks: attr.size.div_ceil(u64::from(BLOCK_SIZE)),
        atime: attr.accessed,
        mtime: attr.modified,
        ctime: attr.modified,
        crtime: attr.created,
        kind: file_type(attr.kind),
        perm: (attr.perm & 0o7777) as u16,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        flags: 0,
        blksize: BLOCK_SIZE,
    }
}

fn caller(req: &fuser::Request<'_>) -> Caller {
    Caller {
        uid: req.uid(),
        gid: req.gid(),
        pid: req.pid(),
        umask: 0o022,
    }
}

fn time_or_now(t: TimeOrNow) -> SystemTime {
    match t {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => SystemTime::now(),
    }
}

struct FuseAdapter {
    fs: Arc<Filesystem>,
    inodes: RwLock<InodeTable>,
    single_threaded: bool,
}

impl FuseAdapter {
    fn path(&self, ino: u64) -> Option<String> {
        self.inodes.read().path(ino)
    }

    /// Runs a request inline or on its own worker thread.
    fn dispatch<F>(&self, job: F)
    where
        F: FnOnce(&Filesystem) + Send + 'static,
    {
        if self.single_threaded {
            job(&self.fs);
            return;
        }
        let fs = self.fs.clone();
        let spawned = thread::Builder::new()
            .name("proctree-request".to_string())
            .spawn(move || job(&fs));
        if let Err(e) = spawned {
            let error = e.to_string();
            diagnostics::log_error!("Cannot spawn request thread: {error}", error: error.as_str());
        }
    }

    fn attr_reply(&self, ino: u64, path: &str, reply: ReplyAttr) {
        match self.fs.getattr(path) {
            Ok(attr) => reply.attr(&TTL, &file_attr(ino, &attr)),
            Err(e) => reply.error(e.errno()),
        }
    }
}

impl fuser::Filesystem for FuseAdapter {
    fn lookup(&mut self, _req: &fuser::Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let (Some(parent), Some(name)) = (self.path(parent), name.to_str()) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = child_path(&parent, name);
        match self.fs.getattr(&path) {
            Ok(attr) => {
                let ino = self.inodes.write().lookup(&path);
                reply.entry(&TTL, &file_attr(ino, &attr), 0);
            }
            Err(e) => {
                if matches!(e, Error::NotFound(_)) {
                    self.inodes.write().evict_missing(&path);
                }
                reply.error(e.errno());
            }
        }
    }

    fn forget(&mut self, _req: &fuser::Request<'_>, ino: u64, nlookup: u64) {
        self.inodes.write().forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &fuser::Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.path(ino) {
            Some(path) => self.attr_reply(ino, &path, reply),
            None => reply.error(libc::ENOENT),
        }
    }

    fn setattr(
        &mut self,
        req: &fuser::Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let caller = caller(req);
        let applied = (|| -> Result<()> {
            if let Some(size) = size {
                self.fs.truncate(&path, size, &caller)?;
            }
            if let Some(mode) = mode {
                self.fs.chmod(&path, mode)?;
            }
            if uid.is_some() || gid.is_some() {
                self.fs.chown(&path, uid, gid)?;
            }
            if atime.is_some() || mtime.is_some() {
                self.fs
                    .utime(&path, atime.map(time_or_now), mtime.map(time_or_now))?;
            }
            Ok(())
        })();
        match applied {
            Ok(()) => self.attr_reply(ino, &path, reply),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let children = match self.fs.list(&path) {
            Ok(children) => children,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        let mut entries = Vec::with_capacity(children.len() + 2);
        {
            let mut inodes = self.inodes.write();
            let parent = inodes.insert(parent_path(&path));
            entries.push((ino, FileType::Directory, ".".to_string()));
            entries.push((parent, FileType::Directory, "..".to_string()));
            for child in children {
                let child_ino = inodes.insert(&child_path(&path, &child.name));
                entries.push((child_ino, file_type(child.kind), child.name));
            }
        }

        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, (entry_ino, kind, name)) in entries.into_iter().enumerate().skip(skip) {
            if reply.add(entry_ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, req: &fuser::Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let caller = caller(req);
        self.dispatch(move |fs| {
            match fs.open(&path, OpenMode::from_flags(flags), &caller) {
                Ok(tid) => reply.opened(tid, fuser::consts::FOPEN_DIRECT_IO),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn read(
        &mut self,
        req: &fuser::Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        let caller = caller(req);
        self.dispatch(move |fs| {
            let mut buf = vec![0u8; size as usize];
            match fs.read(&path, &mut buf, offset, fh, &caller) {
                Ok(n) => reply.data(&buf[..n]),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn write(
        &mut self,
        req: &fuser::Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        let caller = caller(req);
        let data = data.to_vec();
        self.dispatch(move |fs| match fs.write(&path, &data, offset, fh, &caller) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(e.errno()),
        });
    }

    fn release(
        &mut self,
        req: &fuser::Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let Some(path) = self.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let caller = caller(req);
        self.dispatch(move |fs| match fs.release(&path, fh, &caller) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        });
    }
}
