// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};

use crate::accessor::{AccessMode, Callbacks};
use crate::pod::{PodType, PodValue, StringRegion, Transaction};
use crate::typed::OnChange;

/// Permission bits reported for directories.
pub const DIRECTORY_PERM: u32 = 0o777;

/// What a trie entry is. Fixed for the lifetime of the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    Leaf,
    TypedLeaf,
}

impl EntryKind {
    pub fn is_dir(self) -> bool {
        self == EntryKind::Directory
    }
}

/// One child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
    /// Permission bits, without the file type.
    pub perm: u32,
}

/// Attributes of a path as reported to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub kind: EntryKind,
    pub perm: u32,
    pub size: u64,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub created: SystemTime,
    pub accessed: SystemTime,
    pub modified: SystemTime,
}

impl Attr {
    pub(crate) fn directory() -> Self {
        Self {
            kind: EntryKind::Directory,
            perm: DIRECTORY_PERM,
            size: 0,
            nlink: 2,
            uid: 0,
            gid: 0,
            created: SystemTime::UNIX_EPOCH,
            accessed: SystemTime::UNIX_EPOCH,
            modified: SystemTime::UNIX_EPOCH,
        }
    }

    /// `st_mode`: file type plus permission bits.
    pub fn mode(&self) -> u32 {
        let file_type = if self.kind.is_dir() {
            libc::S_IFDIR
        } else {
            libc::S_IFREG
        };
        file_type as u32 | self.perm
    }
}

/// Ownership, permissions and timestamps of a leaf.
#[derive(Debug)]
pub(crate) struct Metadata {
    /// Set by chmod; otherwise permissions follow the capabilities.
    pub mode: Option<u32>,
    pub uid: u32,
    pub gid: u32,
    pub created: SystemTime,
    /// Reads only hold the leaf lock shared, so the access time has a lock
    /// of its own.
    pub accessed: Mutex<SystemTime>,
    pub modified: SystemTime,
}

impl Metadata {
    pub fn new(mode: Option<u32>, uid: u32, gid: u32) -> Self {
        let now = SystemTime::now();
        Self {
            mode,
            uid,
            gid,
            created: now,
            accessed: Mutex::new(now),
            modified: now,
        }
    }

    pub fn touch_accessed(&self) {
        *self.accessed.lock() = SystemTime::now();
    }

    pub fn touch_modified(&mut self) {
        let now = SystemTime::now();
        *self.accessed.get_mut() = now;
        self.modified = now;
    }
}

/// Committed value of a typed leaf.
pub(crate) enum Storage {
    Scalar(PodValue),
    Text(StringRegion),
}

impl Storage {
    pub fn snapshot(&self) -> PodValue {
        match self {
            Storage::Scalar(v) => v.clone(),
            Storage::Text(region) => PodValue::String(region.as_bytes().to_vec()),
        }
    }
}

/// Mutable part of a typed leaf.
pub(crate) struct TypedState {
    pub value: Storage,
    /// Open write handles of a scalar leaf, keyed by tid. Each transaction is
    /// only touched by requests on its own handle, so the map needs the
    /// leaf's write lock only to insert and remove.
    pub transactions: HashMap<u64, Mutex<Transaction>>,
}

/// Everything about a leaf that changes after registration; guarded by the
/// leaf's reader/writer lock.
pub(crate) struct LeafState {
    pub meta: Metadata,
    pub typed: Option<TypedState>,
}

impl LeafState {
    pub fn open_transactions(&self) -> usize {
        self.typed.as_ref().map_or(0, |t| t.transactions.len())
    }
}

pub(crate) struct TypedProfile {
    pub pod_type: PodType,
    pub access: AccessMode,
    pub on_change: Option<OnChange>,
}

pub(crate) enum LeafBody {
    Plain(Callbacks),
    Typed(TypedProfile),
}

/// A registered file-like entry.
pub(crate) struct Leaf {
    pub path: String,
    pub segments: Vec<String>,
    pub body: LeafBody,
    pub state: Arc<RwLock<LeafState>>,
}

impl Leaf {
    pub fn new(path: String, segments: Vec<String>, body: LeafBody, state: LeafState) -> Self {
        Self {
            path,
            segments,
            body,
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self.body {
            LeafBody::Plain(_) => EntryKind::Leaf,
            LeafBody::Typed(_) => EntryKind::TypedLeaf,
        }
    }

    pub fn readable(&self) -> bool {
        match &self.body {
            LeafBody::Plain(cb) => cb.readable(),
            LeafBody::Typed(profile) => profile.access.readable(),
        }
    }

    pub fn writable(&self) -> bool {
        match &self.body {
            LeafBody::Plain(cb) => cb.writable(),
            LeafBody::Typed(profile) => profile.access.writable(),
        }
    }

    /// Read bits for every class if readable, write bits if writable.
    pub fn capability_perm(&self) -> u32 {
        let mut perm = 0;
        if self.readable() {
            perm |= 0o444;
        }
        if self.writable() {
            perm |= 0o222;
        }
        perm
    }

    pub fn perm(&self, meta: &Metadata) -> u32 {
        meta.mode.map_or_else(|| self.capability_perm(), |m| m & 0o7777)
    }

    pub fn attr(&self, state: &LeafState) -> Attr {
        Attr {
            kind: self.kind(),
            perm: self.perm(&state.meta),
            size: 0,
            nlink: 1,
            uid: state.meta.uid,
            gid: state.meta.gid,
            created: state.meta.created,
            accessed: *state.meta.accessed.lock(),
            modified: state.meta.modified,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(callbacks: Callbacks) -> Leaf {
        Leaf::new(
            "/x".to_string(),
            vec!["x".to_string()],
            LeafBody::Plain(callbacks),
            LeafState {
                meta: Metadata::new(None, 0, 0),
                typed: None,
            },
        )
    }

    #[test]
    fn test_capability_perm() {
        let ro = plain(Callbacks::new().on_read(|_, _, _| Ok(0)));
        assert_eq!(ro.capability_perm(), 0o444);
        let rw = plain(
            Callbacks::new()
                .on_read(|_, _, _| Ok(0))
                .on_write(|_, data, _| Ok(data.len())),
        );
        assert_eq!(rw.capability_perm(), 0o666);
        assert_eq!(plain(Callbacks::new()).capability_perm(), 0);
    }

    #[test]
    fn test_chmod_overrides_capabilities() {
        let leaf = plain(Callbacks::new().on_read(|_, _, _| Ok(0)));
        let state = leaf.state.read();
        assert_eq!(leaf.attr(&state).mode(), libc::S_IFREG as u32 | 0o444);

        let meta = Metadata::new(Some(0o600), 0, 0);
        assert_eq!(leaf.perm(&meta), 0o600);
    }
}
