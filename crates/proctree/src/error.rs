// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

use crate::pod::PodType;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by registration, lookup and per-request operations.
///
/// Structural errors never leave the tree partially modified; per-request
/// errors affect only the request that produced them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Entry already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("Entry has the wrong kind for this operation: {}", .0.display())]
    WrongKind(PathBuf),

    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Access denied: {}", .0.display())]
    AccessDenied(PathBuf),

    #[error("Too large for {}: limit is {limit} bytes", path.display())]
    TooLarge { path: PathBuf, limit: usize },

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("I/O fault: {0}")]
    IoFault(String),

    #[error("No open handle with id {0}")]
    InvalidHandle(u64),

    #[error("Cannot convert {from} to {to}")]
    UnsupportedCoercion { from: PodType, to: PodType },

    #[error("Change rejected by on-change callback: {}", .0.display())]
    Rejected(PathBuf),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn not_found<P: AsRef<Path>>(path: P) -> Self {
        Error::NotFound(path.as_ref().to_path_buf())
    }

    pub fn already_exists<P: AsRef<Path>>(path: P) -> Self {
        Error::AlreadyExists(path.as_ref().to_path_buf())
    }

    pub fn wrong_kind<P: AsRef<Path>>(path: P) -> Self {
        Error::WrongKind(path.as_ref().to_path_buf())
    }

    pub fn not_a_directory<P: AsRef<Path>>(path: P) -> Self {
        Error::NotADirectory(path.as_ref().to_path_buf())
    }

    pub fn access_denied<P: AsRef<Path>>(path: P) -> Self {
        Error::AccessDenied(path.as_ref().to_path_buf())
    }

    pub fn too_large<P: AsRef<Path>>(path: P, limit: usize) -> Self {
        Error::TooLarge {
            path: path.as_ref().to_path_buf(),
            limit,
        }
    }

    pub fn io_fault<S: Into<String>>(msg: S) -> Self {
        Error::IoFault(msg.into())
    }

    pub fn rejected<P: AsRef<Path>>(path: P) -> Self {
        Error::Rejected(path.as_ref().to_path_buf())
    }

    /// The errno a transport should hand back to the kernel (positive).
    pub fn errno(&self) -> i32 {
        match self {
            Error::InvalidArgument(_) => libc::EINVAL,
            Error::NotFound(_) => libc::ENOENT,
            Error::AlreadyExists(_) => libc::EEXIST,
            Error::WrongKind(_) => libc::EEXIST,
            Error::NotADirectory(_) => libc::ENOTDIR,
            Error::AccessDenied(_) => libc::EACCES,
            Error::TooLarge { .. } => libc::EFBIG,
            Error::OutOfMemory(_) => libc::ENOMEM,
            Error::IoFault(_) => libc::EIO,
            Error::InvalidHandle(_) => libc::EBADF,
            Error::UnsupportedCoercion { .. } => libc::EINVAL,
            Error::Rejected(_) => libc::EIO,
            Error::Transport(_) => libc::EIO,
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            Error::Config(_) => libc::EINVAL,
        }
    }

    /// A short hint for the per-thread last-error slot.
    pub fn remedy(&self) -> Option<&'static str> {
        match self {
            Error::InvalidArgument(_) => Some("check the path and arguments; paths need at least one segment"),
            Error::NotFound(_) => Some("register the path before accessing it"),
            Error::AlreadyExists(_) => Some("unregister the existing entry first"),
            Error::WrongKind(_) => {
                Some("a directory and a leaf cannot share a path; pick another name")
            }
            Error::NotADirectory(_) => Some("list a directory path, not a leaf"),
            Error::AccessDenied(_) => {
                Some("register the leaf with the capability needed for this open mode")
            }
            Error::TooLarge { .. } => Some("write less data or truncate the leaf to grow it"),
            Error::OutOfMemory(_) => Some("free memory or reduce the string capacity"),
            Error::IoFault(_) => Some("handlers must return a positive byte count for non-empty writes"),
            Error::InvalidHandle(_) => Some("open the leaf for writing before writing to it"),
            Error::UnsupportedCoercion { .. } => Some("read the value as a wider type or as text"),
            Error::Rejected(_) => None,
            Error::Transport(_) => Some("check that FUSE is available and the mountpoint is usable"),
            Error::Io(_) => None,
            Error::Config(_) => Some("fix the configuration file"),
        }
    }
}

/// Diagnostic record kept per calling thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub message: String,
    pub remedy: Option<String>,
}

impl From<&Error> for LastError {
    fn from(err: &Error) -> Self {
        LastError {
            message: err.to_string(),
            remedy: err.remedy().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(Error::not_found("/a").errno(), libc::ENOENT);
        assert_eq!(Error::access_denied("/a").errno(), libc::EACCES);
        assert_eq!(Error::too_large("/a", 8192).errno(), libc::EFBIG);
        assert_eq!(Error::InvalidHandle(7).errno(), libc::EBADF);
        assert_eq!(Error::io_fault("zero write").errno(), libc::EIO);
    }

    #[test]
    fn test_last_error_carries_remedy() {
        let err = Error::already_exists("/port");
        let last = LastError::from(&err);
        assert_eq!(last.message, "Entry already exists: /port");
        assert!(last.remedy.is_some());
    }
}
