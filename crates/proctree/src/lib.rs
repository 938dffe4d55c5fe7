// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Expose in-memory process state as a virtual file tree.
//!
//! Applications register leaves at slash-separated paths. A leaf is either
//! served by callbacks ([`Callbacks`]) or bound to a typed value
//! ([`TypedBinding`]) that readers see as text and writers update by writing
//! text. Directories are implied by the leaves below them.
//!
//! A [`Session`] mounts the tree through a [`Transport`] and owns the thread
//! requests are served on. Leaves may be unregistered at any time, even
//! while requests on them are in flight; removal then waits for the last
//! of them.

mod accessor;
mod config;
mod error;
mod fs;
mod lock;
mod node;
mod path;
mod pod;
mod session;
mod store;
mod transport;
mod typed;

#[cfg(test)]
mod tests;

pub use accessor::{AccessMode, AppData, Callbacks, Caller, OpenMode, Request};
pub use config::FsOptions;
pub use error::{Error, LastError, Result};
pub use fs::Filesystem;
pub use lock::Unregistered;
pub use node::{Attr, DirEntry, EntryKind};
pub use pod::{LongDouble, Pod, PodType, PodValue};
pub use session::{Session, TeardownHandle};
pub use transport::{CancelToken, IdleTransport, Transport};
#[cfg(feature = "fuse")]
pub use transport::{FuseTransport, unmount_stale};
pub use typed::{ChangeEvent, OnChange, TypedBinding};
