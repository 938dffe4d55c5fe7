// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle of a mounted filesystem.
//!
//! A [`Session`] owns the [`Filesystem`] and the thread its transport runs
//! on. The transport thread blocks every signal, so signals are always
//! delivered to the controlling threads, which stop the session through a
//! [`TeardownHandle`].

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::accessor::AppData;
use crate::config::FsOptions;
use crate::error::{Error, Result};
use crate::fs::Filesystem;
use crate::transport::{CancelToken, Transport};

pub struct Session {
    fs: Arc<Filesystem>,
    mountpoint: PathBuf,
    cancel: CancelToken,
    worker: Option<JoinHandle<Result<()>>>,
    started: bool,
    destroyed: bool,
}

/// Stops a running session from any thread.
#[derive(Debug, Clone)]
pub struct TeardownHandle {
    cancel: CancelToken,
    mountpoint: PathBuf,
}

impl TeardownHandle {
    /// Cancels the transport and nudges it with a stat of the mount point.
    /// Calling it again does nothing new.
    pub fn teardown(&self) {
        self.cancel.cancel();
        _ = std::fs::metadata(&self.mountpoint);
    }
}

impl Session {
    /// Prepares a filesystem to be served at `mountpoint`.
    ///
    /// The mount point must be an existing directory. A disconnected mount
    /// left there by a crashed process is unmounted first when the `fuse`
    /// feature is enabled.
    pub fn create<P: AsRef<Path>>(
        fs_name: &str,
        mountpoint: P,
        mut options: FsOptions,
        appdata: Option<AppData>,
    ) -> Result<Self> {
        if !fs_name.is_empty() {
            options.fs_name = fs_name.to_string();
        }
        options.validate()?;

        let mountpoint = check_mountpoint(mountpoint.as_ref())?;
        let display = mountpoint.display().to_string();
        diagnostics::log_info!(
            "Created session {name} at {mountpoint}",
            name: options.fs_name.as_str(),
            mountpoint: display.as_str()
        );

        Ok(Self {
            fs: Arc::new(Filesystem::new(options, appdata)),
            mountpoint,
            cancel: CancelToken::new(),
            worker: None,
            started: false,
            destroyed: false,
        })
    }

    /// The filesystem, for registering leaves.
    pub fn filesystem(&self) -> Arc<Filesystem> {
        self.fs.clone()
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Serves requests on a single thread. Must be set before `run`.
    pub fn set_single_threaded(&self, single: bool) -> Result<()> {
        if self.started {
            return Err(Error::invalid_argument(
                "threading mode cannot change once the session is running",
            ));
        }
        self.fs.set_single_threaded(single);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    pub fn teardown_handle(&self) -> TeardownHandle {
        TeardownHandle {
            cancel: self.cancel.clone(),
            mountpoint: self.mountpoint.clone(),
        }
    }

    /// Starts `transport` on a dedicated thread. With `blocking`, waits
    /// until the transport returns and hands back its result.
    pub fn run(&mut self, transport: Box<dyn Transport>, blocking: bool) -> Result<()> {
        if self.started {
            return Err(Error::invalid_argument("session is already running"));
        }
        if self.destroyed {
            return Err(Error::invalid_argument("session has been destroyed"));
        }

        let name = transport.name().to_string();
        let fs = self.fs.clone();
        let cancel = self.cancel.clone();
        let worker = thread::Builder::new()
            .name(format!("proctree-{name}"))
            .spawn(move || {
                block_all_signals();
                transport.serve(fs, cancel)
            })?;
        self.started = true;
        diagnostics::log_info!("Started {name} transport", name: name.as_str());

        if blocking {
            return join(worker);
        }
        self.worker = Some(worker);
        Ok(())
    }

    /// Asks the transport to stop. Idempotent.
    pub fn teardown(&self) {
        self.teardown_handle().teardown();
    }

    /// Stops the transport, waits for its thread to exit and drops every
    /// node. Returns the transport's result.
    pub fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;

        let retry = Duration::from_millis(self.fs.options().join_retry_ms);
        let mut result = Ok(());
        if let Some(worker) = self.worker.take() {
            let mut attempts: u64 = 0;
            while !worker.is_finished() {
                self.teardown();
                attempts += 1;
                if attempts > 1 {
                    diagnostics::log_debug!("Transport still running, retry {attempts}", attempts: attempts);
                }
                thread::sleep(retry);
            }
            result = join(worker);
        } else {
            self.teardown();
        }

        let removed = self.fs.clear();
        diagnostics::log_info!("Destroyed session, freed {removed} leaves", removed: removed);
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            let error = e.to_string();
            diagnostics::log_warn!("Transport exited with error: {error}", error: error.as_str());
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("fs", &self.fs)
            .field("mountpoint", &self.mountpoint)
            .field("running", &self.is_running())
            .finish()
    }
}

fn join(worker: JoinHandle<Result<()>>) -> Result<()> {
    worker
        .join()
        .map_err(|_| Error::Transport("transport thread panicked".to_string()))?
}

fn check_mountpoint(path: &Path) -> Result<PathBuf> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.raw_os_error() == Some(libc::ENOTCONN) => {
            recover_stale(path)?;
            std::fs::metadata(path)?
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::not_found(path)),
        Err(e) => return Err(e.into()),
    };
    if !meta.is_dir() {
        return Err(Error::not_a_directory(path));
    }
    Ok(path.canonicalize()?)
}

#[cfg(feature = "fuse")]
fn recover_stale(path: &Path) -> Result<()> {
    let display = path.display().to_string();
    diagnostics::log_warn!("Unmounting stale mount at {path}", path: display.as_str());
    crate::transport::unmount_stale(path)
}

#[cfg(not(feature = "fuse"))]
fn recover_stale(path: &Path) -> Result<()> {
    Err(Error::Transport(format!(
        "{} is a disconnected mount; unmount it first",
        path.display()
    )))
}

fn block_all_signals() {
    // SAFETY: the set is initialised by sigfillset before use and the old
    // mask is not requested.
    let rc = unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        _ = libc::sigfillset(&mut set);
        libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut())
    };
    if rc != 0 {
        diagnostics::log_warn!("Cannot mask signals on transport thread: {rc}", rc: rc);
    }
}
