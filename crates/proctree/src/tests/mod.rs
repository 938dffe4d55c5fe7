// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

mod concurrency;
mod deferred_unlink;
mod registry;

use crate::{Callbacks, Caller, Filesystem, OpenMode, Result};

/// Opens, reads everything and releases.
fn read_all(fs: &Filesystem, path: &str) -> Result<Vec<u8>> {
    let caller = Caller::current();
    let tid = fs.open(path, OpenMode::ReadOnly, &caller)?;
    let mut out = Vec::new();
    let mut buf = [0u8; 64];
    loop {
        let n = fs.read(path, &mut buf, out.len() as u64, tid, &caller)?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    fs.release(path, tid, &caller)?;
    Ok(out)
}

/// Opens for writing, writes `text` at offset 0 and releases.
fn write_text(fs: &Filesystem, path: &str, text: &str) -> Result<()> {
    let caller = Caller::current();
    let tid = fs.open(path, OpenMode::WriteOnly, &caller)?;
    let written = fs.write(path, text.as_bytes(), 0, tid, &caller);
    let released = fs.release(path, tid, &caller);
    written?;
    released
}

/// A read-only leaf serving fixed text.
fn static_text(text: &'static str) -> Callbacks {
    Callbacks::new().on_read(move |_req, buf, offset| {
        let bytes = text.as_bytes();
        let start = (offset as usize).min(bytes.len());
        let n = buf.len().min(bytes.len() - start);
        buf[..n].copy_from_slice(&bytes[start..start + n]);
        Ok(n)
    })
}
