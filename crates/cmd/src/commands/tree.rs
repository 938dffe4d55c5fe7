// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use proctree::Filesystem;

use super::load_options;
use crate::demo;

/// Builds the demo tree in memory and prints it.
pub fn tree_command(config: Option<&Path>, out: &mut impl Write) -> Result<()> {
    let options = load_options(config)?;
    let fs = Filesystem::new(options, Some(demo::appdata()));
    demo::register(&fs)?;
    write!(out, "{}", fs.tree())?;
    Ok(())
}
