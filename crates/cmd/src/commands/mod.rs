// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod mount;
pub mod tree;

pub use config::config_command;
pub use mount::{MountArgs, mount_command};
pub use tree::tree_command;

use std::path::Path;

use anyhow::{Context, Result};
use proctree::FsOptions;

/// Options from `path`, or the defaults.
pub fn load_options(path: Option<&Path>) -> Result<FsOptions> {
    match path {
        Some(path) => FsOptions::load(path)
            .with_context(|| format!("loading options from {}", path.display())),
        None => Ok(FsOptions::default()),
    }
}
