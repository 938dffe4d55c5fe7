// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use crate::error::Result;
use crate::fs::Filesystem;
use crate::transport::{CancelToken, Transport};

/// A transport that serves nothing and returns once cancelled.
///
/// Useful where no kernel mount is available: the tree is still reachable
/// through the [`Filesystem`] methods and the session lifecycle runs as usual.
#[derive(Debug, Default)]
pub struct IdleTransport;

impl Transport for IdleTransport {
    fn name(&self) -> &str {
        "idle"
    }

    fn serve(self: Box<Self>, fs: Arc<Filesystem>, cancel: CancelToken) -> Result<()> {
        let name = fs.name().to_string();
        diagnostics::log_debug!("Idle transport serving {name}", name: name.as_str());
        cancel.wait();
        diagnostics::log_debug!("Idle transport for {name} cancelled", name: name.as_str());
        Ok(())
    }
}
