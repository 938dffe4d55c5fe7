// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Handler sets for plain leaves and the context passed to every handler.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;

/// Opaque application state handed to every plain handler.
pub type AppData = Arc<dyn Any + Send + Sync>;

/// Identity of the process that issued a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Caller {
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
    pub umask: u32,
}

impl Caller {
    /// The current process, for requests made in-process.
    pub fn current() -> Self {
        // SAFETY: these calls have no preconditions and cannot fail.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self {
            uid,
            gid,
            pid: std::process::id(),
            umask: 0o022,
        }
    }
}

/// Context of one handler invocation.
pub struct Request<'a> {
    /// Canonical path of the leaf (`/a/b`).
    pub path: &'a str,
    /// Handle id assigned at open; 0 for truncate, which has no handle.
    pub tid: u64,
    pub caller: Caller,
    pub appdata: Option<&'a AppData>,
}

impl Request<'_> {
    /// Downcasts the application data to `T`.
    pub fn appdata<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.appdata.and_then(|data| data.downcast_ref::<T>())
    }
}

impl fmt::Debug for Request<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("path", &self.path)
            .field("tid", &self.tid)
            .field("caller", &self.caller)
            .field("appdata", &self.appdata.is_some())
            .finish()
    }
}

/// How a handle is being opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl OpenMode {
    pub fn reads(self) -> bool {
        matches!(self, OpenMode::ReadOnly | OpenMode::ReadWrite)
    }

    pub fn writes(self) -> bool {
        matches!(self, OpenMode::WriteOnly | OpenMode::ReadWrite)
    }

    /// Decodes the access mode bits of POSIX open flags.
    pub fn from_flags(flags: i32) -> Self {
        match flags & libc::O_ACCMODE {
            libc::O_WRONLY => OpenMode::WriteOnly,
            libc::O_RDWR => OpenMode::ReadWrite,
            _ => OpenMode::ReadOnly,
        }
    }
}

/// Capabilities a typed leaf is registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn readable(self) -> bool {
        matches!(self, AccessMode::ReadOnly | AccessMode::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, AccessMode::WriteOnly | AccessMode::ReadWrite)
    }
}

pub type OpenHandler = Box<dyn Fn(&Request<'_>) -> Result<()> + Send + Sync>;
pub type TruncateHandler = Box<dyn Fn(&Request<'_>, u64) -> Result<()> + Send + Sync>;
pub type ReadHandler = Box<dyn Fn(&Request<'_>, &mut [u8], u64) -> Result<usize> + Send + Sync>;
pub type WriteHandler = Box<dyn Fn(&Request<'_>, &[u8], u64) -> Result<usize> + Send + Sync>;
pub type ReleaseHandler = Box<dyn Fn(&Request<'_>) -> Result<()> + Send + Sync>;

/// The handlers of a plain leaf. Every handler is optional; a leaf is
/// readable when it has a read handler and writable when it has a write
/// handler.
///
/// Handlers run while the leaf is held for access. They must not register,
/// unregister or use the value helpers of the same filesystem.
///
/// ```
/// use proctree::Callbacks;
///
/// let callbacks = Callbacks::new().on_read(|_req, buf, offset| {
///     let text = b"hello\n";
///     let start = (offset as usize).min(text.len());
///     let n = buf.len().min(text.len() - start);
///     buf[..n].copy_from_slice(&text[start..start + n]);
///     Ok(n)
/// });
/// assert!(callbacks.readable());
/// assert!(!callbacks.writable());
/// ```
#[derive(Default)]
pub struct Callbacks {
    pub(crate) open: Option<OpenHandler>,
    pub(crate) truncate: Option<TruncateHandler>,
    pub(crate) read: Option<ReadHandler>,
    pub(crate) write: Option<WriteHandler>,
    pub(crate) release: Option<ReleaseHandler>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.open = Some(Box::new(f));
        self
    }

    pub fn on_truncate<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request<'_>, u64) -> Result<()> + Send + Sync + 'static,
    {
        self.truncate = Some(Box::new(f));
        self
    }

    pub fn on_read<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request<'_>, &mut [u8], u64) -> Result<usize> + Send + Sync + 'static,
    {
        self.read = Some(Box::new(f));
        self
    }

    pub fn on_write<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request<'_>, &[u8], u64) -> Result<usize> + Send + Sync + 'static,
    {
        self.write = Some(Box::new(f));
        self
    }

    pub fn on_release<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.release = Some(Box::new(f));
        self
    }

    pub fn readable(&self) -> bool {
        self.read.is_some()
    }

    pub fn writable(&self) -> bool {
        self.write.is_some()
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("open", &self.open.is_some())
            .field("truncate", &self.truncate.is_some())
            .field("read", &self.read.is_some())
            .field("write", &self.write.is_some())
            .field("release", &self.release.is_some())
            .finish()
    }
}
