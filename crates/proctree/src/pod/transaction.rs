// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Error, Result};

/// Size of the per-handle write buffer.
pub const TRANSACTION_CAPACITY: usize = 8192;

/// Text written through one open handle of a scalar leaf.
///
/// The committed value is untouched until the handle is released, at which
/// point the buffer is parsed and committed as a whole.
pub struct Transaction {
    buffer: Box<[u8]>,
    has_written: bool,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            buffer: vec![0; TRANSACTION_CAPACITY].into_boxed_slice(),
            has_written: false,
        }
    }

    pub fn has_written(&self) -> bool {
        self.has_written
    }

    /// Copies `data` into the buffer at `offset`.
    pub fn write(&mut self, path: &str, data: &[u8], offset: u64) -> Result<usize> {
        let start = usize::try_from(offset)
            .ok()
            .filter(|start| *start <= TRANSACTION_CAPACITY)
            .ok_or_else(|| Error::too_large(path, TRANSACTION_CAPACITY))?;
        let end = start
            .checked_add(data.len())
            .filter(|end| *end <= TRANSACTION_CAPACITY)
            .ok_or_else(|| Error::too_large(path, TRANSACTION_CAPACITY))?;

        self.buffer[start..end].copy_from_slice(data);
        self.has_written = true;
        Ok(data.len())
    }

    /// The buffered text, up to the first NUL.
    pub fn text(&self) -> &[u8] {
        let end = self
            .buffer
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(self.buffer.len());
        &self.buffer[..end]
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_writes_compose() {
        let mut tx = Transaction::new();
        assert!(!tx.has_written());
        assert_eq!(tx.write("/port", b"1", 0).unwrap(), 1);
        assert_eq!(tx.write("/port", b"23", 1).unwrap(), 2);
        assert!(tx.has_written());
        assert_eq!(tx.text(), b"123");
    }

    #[test]
    fn test_capacity_bound() {
        let mut tx = Transaction::new();
        let full = vec![b'1'; TRANSACTION_CAPACITY];
        assert!(tx.write("/port", &full, 0).is_ok());
        assert!(matches!(
            tx.write("/port", b"1", TRANSACTION_CAPACITY as u64),
            Err(Error::TooLarge { limit: TRANSACTION_CAPACITY, .. })
        ));
        assert!(tx.write("/port", b"12", (TRANSACTION_CAPACITY - 1) as u64).is_err());
        assert!(tx.write("/port", b"", u64::MAX).is_err());
    }
}
