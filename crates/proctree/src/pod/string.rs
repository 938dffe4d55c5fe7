// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Error, Result};

/// Growable backing store of a String leaf.
///
/// `len` is what readers see; `capacity` bounds how far writes may extend it.
/// Only truncate grows the capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringRegion {
    data: Vec<u8>,
    capacity: usize,
}

impl StringRegion {
    pub fn new(initial: Vec<u8>, capacity: usize) -> Self {
        let capacity = capacity.max(initial.len());
        Self {
            data: initial,
            capacity,
        }
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Copies `[offset, offset + buf.len())` into `buf`; short past the end.
    pub fn read(&self, buf: &mut [u8], offset: u64) -> usize {
        read_range(&self.data, buf, offset)
    }

    /// Writes `data` at `offset`, clamped to the capacity.
    ///
    /// The offset may not lie beyond the current length, so a region never
    /// contains unwritten gaps.
    pub fn write(&mut self, path: &str, data: &[u8], offset: u64) -> Result<usize> {
        let start = usize::try_from(offset)
            .ok()
            .filter(|start| *start <= self.data.len())
            .ok_or_else(|| Error::too_large(path, self.data.len()))?;
        let n = data.len().min(self.capacity - start);
        if n == 0 && !data.is_empty() {
            return Err(Error::too_large(path, self.capacity));
        }

        let end = start + n;
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(&data[..n]);
        Ok(n)
    }

    /// Contents as they would be after `truncate(size)`.
    pub fn proposed(&self, size: usize) -> Vec<u8> {
        let mut out = self.data.clone();
        out.resize(size, 0);
        out
    }

    /// Resizes to `size`, zero-filling on growth.
    pub fn truncate(&mut self, size: usize) {
        if size > self.data.len() {
            self.data.resize(size, 0);
            self.capacity = self.capacity.max(size);
        } else {
            self.data[size..].fill(0);
            self.data.truncate(size);
        }
    }

    /// Replaces the contents, growing the capacity when needed.
    pub fn replace(&mut self, data: Vec<u8>) {
        self.capacity = self.capacity.max(data.len());
        self.data = data;
    }
}

/// Copies the byte range starting at `offset` of `src` into `buf`.
pub(crate) fn read_range(src: &[u8], buf: &mut [u8], offset: u64) -> usize {
    let Ok(start) = usize::try_from(offset) else {
        return 0;
    };
    if start >= src.len() {
        return 0;
    }
    let n = buf.len().min(src.len() - start);
    buf[..n].copy_from_slice(&src[start..start + n]);
    n
}
