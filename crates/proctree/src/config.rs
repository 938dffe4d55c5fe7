// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Filesystem and mount options.
//!
//! ```yaml
//! fs_name: myapp
//! single_threaded: false
//! allow_other: false
//! string_capacity: 65536
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Options for a filesystem instance and its mount.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FsOptions {
    /// Name shown as the mount source (default: "proctree")
    pub fs_name: String,

    /// Serve requests on a single thread (default: false)
    pub single_threaded: bool,

    /// Let users other than the mounting user access the tree (default: true)
    pub allow_other: bool,

    /// Ask the kernel to unmount when the process exits (default: false)
    pub auto_unmount: bool,

    /// Raw `-o` mount options passed through to the transport
    pub extra_options: Vec<String>,

    /// Owner reported for new leaves (default: 0)
    pub default_uid: u32,

    /// Group reported for new leaves (default: 0)
    pub default_gid: u32,

    /// Permission bits for new leaves; derived from capabilities when unset
    pub default_mode: Option<u32>,

    /// Region size of a String leaf registered without a capacity (default: 4 MiB)
    pub string_capacity: usize,

    /// Poll period while waiting for the transport thread to exit (default: 100)
    pub join_retry_ms: u64,
}

pub const DEFAULT_FS_NAME: &str = "proctree";
pub const DEFAULT_STRING_CAPACITY: usize = 4 * 1024 * 1024;
pub const DEFAULT_JOIN_RETRY_MS: u64 = 100;

impl Default for FsOptions {
    fn default() -> Self {
        Self {
            fs_name: DEFAULT_FS_NAME.to_string(),
            single_threaded: false,
            allow_other: true,
            auto_unmount: false,
            extra_options: Vec::new(),
            default_uid: 0,
            default_gid: 0,
            default_mode: None,
            string_capacity: DEFAULT_STRING_CAPACITY,
            join_retry_ms: DEFAULT_JOIN_RETRY_MS,
        }
    }
}

impl FsOptions {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let options: FsOptions = serde_yaml_ng::from_str(text)
            .map_err(|e| Error::Config(format!("invalid options: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    /// Loads options from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml_ng::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.fs_name.is_empty() {
            return Err(Error::Config("fs_name cannot be empty".to_string()));
        }
        if self.fs_name.contains(',') {
            return Err(Error::Config(format!(
                "fs_name '{}' cannot contain ','",
                self.fs_name
            )));
        }
        if self.join_retry_ms == 0 {
            return Err(Error::Config(
                "join_retry_ms must be greater than 0".to_string(),
            ));
        }
        if let Some(mode) = self.default_mode {
            if mode > 0o7777 {
                return Err(Error::Config(format!(
                    "default_mode {mode:o} has bits outside 0o7777"
                )));
            }
        }
        Ok(())
    }
}
