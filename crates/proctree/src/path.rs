// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Error, Result};

/// Longest segment accepted; matches the usual NAME_MAX-style bound with room
/// for a terminator in a 512-byte buffer.
pub const MAX_SEGMENT_LEN: usize = 511;

/// Splits a `/`-delimited path into its segments.
///
/// Leading, trailing and repeated delimiters are ignored, so `/a//b/` and
/// `a/b` both yield `["a", "b"]`. The root yields an empty list.
pub fn segments(path: &str) -> Result<Vec<&str>> {
    let mut out = Vec::new();
    for seg in path.split('/').filter(|s| !s.is_empty()) {
        if seg == "." || seg == ".." {
            return Err(Error::invalid_argument(format!(
                "relative segment '{seg}' in path '{path}'"
            )));
        }
        if seg.len() > MAX_SEGMENT_LEN {
            return Err(Error::invalid_argument(format!(
                "segment longer than {MAX_SEGMENT_LEN} bytes in path '{path}'"
            )));
        }
        if seg.contains('\0') {
            return Err(Error::invalid_argument(format!(
                "NUL byte in path '{}'",
                path.escape_default()
            )));
        }
        out.push(seg);
    }
    Ok(out)
}

/// Segments of a path that must name a leaf (at least one segment).
pub fn leaf_segments(path: &str) -> Result<Vec<&str>> {
    let segs = segments(path)?;
    if segs.is_empty() {
        return Err(Error::invalid_argument(format!(
            "path '{path}' does not name a leaf"
        )));
    }
    Ok(segs)
}

/// Canonical form of a path: `/` followed by the segments joined with `/`.
pub fn canonical(segs: &[&str]) -> String {
    let mut s = String::with_capacity(segs.iter().map(|x| x.len() + 1).sum::<usize>().max(1));
    for seg in segs {
        s.push('/');
        s.push_str(seg);
    }
    if s.is_empty() {
        s.push('/');
    }
    s
}
