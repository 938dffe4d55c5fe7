// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Reference-counted access to a leaf.
//!
//! Every request on a leaf runs inside a [`LeafAccess`]:
//!
//! 1. `acquire` takes the global lock, resolves the path, bumps the leaf's
//!    access count, takes the leaf lock in read mode and drops the global
//!    lock again. The read is recursive: it only waits for an active writer,
//!    never for a queued one, so holding the global lock here cannot wait on
//!    a reader that is itself waiting for the global lock.
//! 2. The request runs with the read lock held. Mutations go through
//!    [`LeafAccess::with_write`], which upgrades to write mode only for the
//!    mutation itself and downgrades afterwards.
//! 3. Dropping the access releases the read lock, then takes the global lock
//!    and decrements the count. The last releaser of a leaf that was
//!    unregistered while busy removes it from the trie.

use std::sync::Arc;

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, Mutex, RawRwLock};

use crate::error::{Error, Result};
use crate::node::{Leaf, LeafState};
use crate::path;
use crate::store::Directory;

pub(crate) struct LeafAccess<'a> {
    root: &'a Mutex<Directory>,
    leaf: Arc<Leaf>,
    held: Option<ArcRwLockReadGuard<RawRwLock, LeafState>>,
    pending: bool,
}

impl<'a> LeafAccess<'a> {
    pub fn acquire(root: &'a Mutex<Directory>, path: &str) -> Result<Self> {
        let segs = path::leaf_segments(path)?;

        let mut tree = root.lock();
        let slot = tree
            .lookup_slot(&segs)
            .ok_or_else(|| Error::not_found(path))?;
        slot.access_count += 1;
        let pending = slot.pending_unlink;
        let leaf = slot.leaf.clone();
        let held = leaf.state.read_arc_recursive();
        drop(tree);

        Ok(Self {
            root,
            leaf,
            held: Some(held),
            pending,
        })
    }

    pub fn leaf(&self) -> &Leaf {
        &self.leaf
    }

    pub fn leaf_arc(&self) -> Arc<Leaf> {
        self.leaf.clone()
    }

    /// Whether the leaf had been unregistered when it was acquired.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Leaf state as seen under the read lock.
    pub fn state(&self) -> &LeafState {
        match &self.held {
            Some(guard) => guard,
            None => unreachable!("leaf access used after release"),
        }
    }

    /// Runs `f` with the leaf lock upgraded to write mode.
    ///
    /// The read lock is given up before write mode is taken, so other
    /// requests may commit in between; `f` must not rely on anything read
    /// before the upgrade. `f` runs no application code.
    pub fn with_write<R>(&mut self, f: impl FnOnce(&mut LeafState) -> R) -> R {
        drop(self.held.take());
        let mut guard = self.leaf.state.write_arc();
        let out = f(&mut guard);
        self.held = Some(ArcRwLockWriteGuard::downgrade(guard));
        out
    }
}

impl Drop for LeafAccess<'_> {
    fn drop(&mut self) {
        drop(self.held.take());

        let mut tree = self.root.lock();
        let segs: Vec<&str> = self.leaf.segments.iter().map(String::as_str).collect();

        let unlink = match tree.lookup_slot(&segs) {
            Some(slot) if Arc::ptr_eq(&slot.leaf, &self.leaf) => {
                slot.access_count -= 1;
                slot.access_count <= 0
                    && slot.pending_unlink
                    && self.leaf.state.read_recursive().open_transactions() == 0
            }
            _ => false,
        };

        if unlink && tree.remove_leaf(&segs, Some(&self.leaf)).is_some() {
            diagnostics::log_debug!("Removed deferred leaf {path}", path: self.leaf.path.as_str());
        }
    }
}

/// What `unregister` did with a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unregistered {
    /// The leaf was removed from the trie.
    Removed,
    /// The leaf was busy; it is hidden from listings and goes away when the
    /// last request or open handle on it is released.
    Deferred,
}

/// Marks the leaf at `path` for removal, removing it at once if idle.
pub(crate) fn unregister(root: &Mutex<Directory>, path: &str) -> Result<Unregistered> {
    let segs = path::leaf_segments(path)?;
    let mut tree = root.lock();

    let slot = tree
        .lookup_slot(&segs)
        .ok_or_else(|| Error::not_found(path))?;
    slot.pending_unlink = true;
    // Recursive read: the calling thread may itself be inside a request on
    // this leaf.
    let in_use = slot.access_count > 0 || slot.leaf.state.read_recursive().open_transactions() > 0;
    if in_use {
        diagnostics::log_debug!(
            "Deferring unlink of {path}, refs={refs}",
            path: path,
            refs: slot.access_count
        );
        return Ok(Unregistered::Deferred);
    }

    _ = tree.remove_leaf(&segs, None);
    Ok(Unregistered::Removed)
}
