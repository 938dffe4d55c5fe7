// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

//! The tree served by `proctree mount`.
//!
//! ```text
//! /port             Int, read-write
//! /speed            Float, read-only
//! /log/file         String, write-only
//! /net/hosts/list   host entries, read-only
//! /net/hosts/add    write a host to add it
//! /net/hosts/del    write a host to remove it
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use proctree::{
    AccessMode, AppData, Callbacks, Error, Filesystem, PodValue, Request, TypedBinding,
};

/// Host entries shared by the `/net/hosts` leaves, kept as `name;` records.
#[derive(Debug, Default)]
pub struct HostsTable {
    entries: Mutex<String>,
}

impl HostsTable {
    fn record(text: &[u8]) -> String {
        let mut record = String::from_utf8_lossy(text).trim_end().to_string();
        record.push(';');
        record
    }

    /// Adds a host unless it is already listed.
    pub fn add(&self, text: &[u8]) {
        let record = Self::record(text);
        let mut entries = self.entries.lock();
        if !entries.contains(&record) {
            entries.push_str(&record);
        }
    }

    /// Removes a listed host.
    pub fn remove(&self, text: &[u8]) {
        let record = Self::record(text);
        let mut entries = self.entries.lock();
        if let Some(pos) = entries.find(&record) {
            entries.replace_range(pos..pos + record.len(), "");
        }
    }

    pub fn snapshot(&self) -> String {
        self.entries.lock().clone()
    }
}

/// Application data to create the session with.
pub fn appdata() -> AppData {
    Arc::new(HostsTable::default())
}

fn hosts<'r>(req: &'r Request<'_>) -> proctree::Result<&'r HostsTable> {
    req.appdata::<HostsTable>()
        .ok_or_else(|| Error::io_fault(format!("{} needs the hosts table as appdata", req.path)))
}

fn read_hosts(req: &Request<'_>, buf: &mut [u8], offset: u64) -> proctree::Result<usize> {
    let text = hosts(req)?.snapshot();
    let bytes = text.as_bytes();
    let start = usize::try_from(offset).unwrap_or(usize::MAX).min(bytes.len());
    let n = buf.len().min(bytes.len() - start);
    buf[..n].copy_from_slice(&bytes[start..start + n]);
    Ok(n)
}

/// Registers the demo leaves on `fs`.
pub fn register(fs: &Filesystem) -> proctree::Result<()> {
    fs.register_typed(
        "/port",
        TypedBinding::read_write(PodValue::Int(80))
            .on_change(|change| matches!(change.new, PodValue::Int(p) if (1..=65535).contains(p))),
    )?;
    fs.register_typed("/speed", TypedBinding::read_only(PodValue::Float(123.45)))?;
    fs.register_typed(
        "/log/file",
        TypedBinding::new(PodValue::String(Vec::new()), AccessMode::WriteOnly)
            .with_capacity(4096),
    )?;

    fs.register_leaf("/net/hosts/list", Callbacks::new().on_read(read_hosts))?;
    fs.register_leaf(
        "/net/hosts/add",
        Callbacks::new().on_write(|req, data, _offset| {
            hosts(req)?.add(data);
            Ok(data.len())
        }),
    )?;
    fs.register_leaf(
        "/net/hosts/del",
        Callbacks::new().on_write(|req, data, _offset| {
            hosts(req)?.remove(data);
            Ok(data.len())
        }),
    )?;
    Ok(())
}
