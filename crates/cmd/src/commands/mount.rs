// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Args;
use proctree::{IdleTransport, Session, Transport};
use tokio::signal::unix::{SignalKind, signal};

use super::load_options;
use crate::demo;

#[derive(Args, Debug)]
pub struct MountArgs {
    /// Directory to mount the tree on
    pub mountpoint: PathBuf,

    /// YAML options file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Name shown as the mount source (overrides the options file)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Serve requests on a single thread
    #[arg(long)]
    pub single_threaded: bool,

    /// Host the tree in-process without a kernel mount
    #[arg(long)]
    pub no_mount: bool,
}

#[cfg(feature = "fuse")]
fn transport(mountpoint: &Path, no_mount: bool) -> Box<dyn Transport> {
    if no_mount {
        Box::new(IdleTransport)
    } else {
        Box::new(proctree::FuseTransport::new(mountpoint))
    }
}

#[cfg(not(feature = "fuse"))]
fn transport(_mountpoint: &Path, no_mount: bool) -> Box<dyn Transport> {
    if !no_mount {
        diagnostics::log_warn!("Built without FUSE support; serving in-process only");
    }
    Box::new(IdleTransport)
}

/// Mounts the demo tree and serves it until SIGINT or SIGTERM.
pub async fn mount_command(args: &MountArgs) -> Result<()> {
    let options = load_options(args.config.as_deref())?;
    let name = args.name.clone().unwrap_or_default();
    let mut session = Session::create(&name, &args.mountpoint, options, Some(demo::appdata()))
        .with_context(|| format!("preparing mount at {}", args.mountpoint.display()))?;
    if args.single_threaded {
        session.set_single_threaded(true)?;
    }
    demo::register(&session.filesystem())?;

    let transport = transport(session.mountpoint(), args.no_mount);
    session.run(transport, false)?;

    let mountpoint = session.mountpoint().display().to_string();
    diagnostics::log_info!("Serving {mountpoint}", mountpoint: mountpoint.as_str());

    let mut terminate = signal(SignalKind::terminate())?;
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = terminate.recv() => break,
            _ = ticker.tick() => {
                if !session.is_running() {
                    diagnostics::log_warn!("Transport stopped on its own");
                    break;
                }
            }
        }
    }

    session.teardown_handle().teardown();
    tokio::task::spawn_blocking(move || session.destroy())
        .await
        .map_err(|e| anyhow!("teardown task failed: {e}"))??;
    diagnostics::log_info!("Unmounted {mountpoint}", mountpoint: mountpoint.as_str());
    Ok(())
}
