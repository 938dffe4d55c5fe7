// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Transports feed host file-system requests into a [`Filesystem`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::Result;
use crate::fs::Filesystem;

#[cfg(feature = "fuse")]
mod fuse;
mod idle;

#[cfg(feature = "fuse")]
pub use fuse::{FuseTransport, unmount_stale};
pub use idle::IdleTransport;

/// Serves requests until cancelled.
///
/// `serve` runs on the session's transport thread, which has every signal
/// blocked, and must return soon after `cancel` fires.
pub trait Transport: Send {
    fn name(&self) -> &str;

    fn serve(self: Box<Self>, fs: Arc<Filesystem>, cancel: CancelToken) -> Result<()>;
}

#[derive(Default)]
struct CancelState {
    cancelled: Mutex<bool>,
    cond: Condvar,
}

/// One-shot cancellation flag shared between a session and its transport.
#[derive(Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the token. Later calls do nothing.
    pub fn cancel(&self) {
        let mut cancelled = self.state.cancelled.lock();
        if !*cancelled {
            *cancelled = true;
            _ = self.state.cond.notify_all();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.cancelled.lock()
    }

    /// Waits up to `timeout` for cancellation; returns whether it happened.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut cancelled = self.state.cancelled.lock();
        if !*cancelled {
            _ = self.state.cond.wait_for(&mut cancelled, timeout);
        }
        *cancelled
    }

    /// Blocks until cancelled.
    pub fn wait(&self) {
        let mut cancelled = self.state.cancelled.lock();
        while !*cancelled {
            self.state.cond.wait(&mut cancelled);
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
