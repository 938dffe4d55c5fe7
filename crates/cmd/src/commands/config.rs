// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::path::Path;

use anyhow::Result;

use super::load_options;

/// Prints the effective options as YAML.
pub fn config_command(config: Option<&Path>, out: &mut impl Write) -> Result<()> {
    let options = load_options(config)?;
    out.write_all(options.to_yaml_string()?.as_bytes())?;
    Ok(())
}
