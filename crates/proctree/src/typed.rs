// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Open/read/write/truncate/release for leaves bound to a [`PodValue`].
//!
//! Scalars (everything except Char and String) buffer writes in a
//! per-handle [`Transaction`] and commit on release. Char and String write
//! straight into the committed value.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

use crate::accessor::{AccessMode, OpenMode};
use crate::error::{Error, Result};
use crate::lock::LeafAccess;
use crate::node::{LeafState, Storage, TypedProfile, TypedState};
use crate::pod::{PodType, PodValue, StringRegion, Transaction, read_range};

/// Veto hook for changes to a typed leaf; `false` rejects the change.
///
/// The hook runs with the leaf held for shared access only. It may query or
/// register other paths and read this leaf, but must not write to this leaf.
/// Another commit may land between the hook's approval and this one.
pub type OnChange = Box<dyn Fn(&ChangeEvent<'_>) -> bool + Send + Sync>;

/// A proposed change to a typed leaf.
#[derive(Debug)]
pub struct ChangeEvent<'a> {
    pub path: &'a str,
    pub old: &'a PodValue,
    pub new: &'a PodValue,
}

/// Initial value, capabilities and hooks of a typed leaf.
///
/// ```
/// use proctree::{AccessMode, PodValue, TypedBinding};
///
/// let port = TypedBinding::new(PodValue::Int(80), AccessMode::ReadWrite)
///     .on_change(|change| matches!(change.new, PodValue::Int(p) if *p > 0));
/// assert_eq!(port.pod_type(), proctree::PodType::Int);
/// ```
pub struct TypedBinding {
    pub(crate) initial: PodValue,
    pub(crate) access: AccessMode,
    pub(crate) on_change: Option<OnChange>,
    pub(crate) capacity: Option<usize>,
}

impl TypedBinding {
    pub fn new(initial: PodValue, access: AccessMode) -> Self {
        Self {
            initial,
            access,
            on_change: None,
            capacity: None,
        }
    }

    pub fn read_only(initial: PodValue) -> Self {
        Self::new(initial, AccessMode::ReadOnly)
    }

    pub fn read_write(initial: PodValue) -> Self {
        Self::new(initial, AccessMode::ReadWrite)
    }

    pub fn on_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&ChangeEvent<'_>) -> bool + Send + Sync + 'static,
    {
        self.on_change = Some(Box::new(f));
        self
    }

    /// Capacity of a String leaf's region. Defaults to the filesystem's
    /// `string_capacity`.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn pod_type(&self) -> PodType {
        self.initial.pod_type()
    }

    pub(crate) fn into_parts(self, default_capacity: usize) -> (TypedProfile, TypedState) {
        let pod_type = self.initial.pod_type();
        let value = match self.initial {
            PodValue::String(bytes) => {
                Storage::Text(StringRegion::new(bytes, self.capacity.unwrap_or(default_capacity)))
            }
            other => Storage::Scalar(other),
        };
        (
            TypedProfile {
                pod_type,
                access: self.access,
                on_change: self.on_change,
            },
            TypedState {
                value,
                transactions: HashMap::new(),
            },
        )
    }
}

impl fmt::Debug for TypedBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedBinding")
            .field("initial", &self.initial)
            .field("access", &self.access)
            .field("on_change", &self.on_change.is_some())
            .field("capacity", &self.capacity)
            .finish()
    }
}

fn typed<'s>(state: &'s LeafState, path: &str) -> Result<&'s TypedState> {
    state.typed.as_ref().ok_or_else(|| Error::wrong_kind(path))
}

fn typed_mut<'s>(state: &'s mut LeafState, path: &str) -> Result<&'s mut TypedState> {
    state.typed.as_mut().ok_or_else(|| Error::wrong_kind(path))
}

fn approve(profile: &TypedProfile, path: &str, old: &PodValue, new: &PodValue) -> Result<()> {
    match &profile.on_change {
        Some(hook) if !hook(&ChangeEvent { path, old, new }) => {
            diagnostics::log_warn!("Change to {path} rejected", path: path);
            Err(Error::rejected(path))
        }
        _ => Ok(()),
    }
}

pub(crate) fn open(
    access: &mut LeafAccess<'_>,
    profile: &TypedProfile,
    tid: u64,
    mode: OpenMode,
) -> Result<()> {
    if !(profile.pod_type.uses_transaction() && profile.access.writable() && mode.writes()) {
        return Ok(());
    }
    let path = access.leaf().path.clone();
    access.with_write(|state| {
        let typed = typed_mut(state, &path)?;
        _ = typed
            .transactions
            .insert(tid, Mutex::new(Transaction::new()));
        Ok(())
    })
}

/// Copies the rendered committed value into `buf`. Never reads a
/// transaction in progress.
pub(crate) fn read(access: &LeafAccess<'_>, buf: &mut [u8], offset: u64) -> Result<usize> {
    let path = access.leaf().path.clone();
    let n = match &typed(access.state(), &path)?.value {
        Storage::Scalar(v) => read_range(&v.render(), buf, offset),
        Storage::Text(region) => region.read(buf, offset),
    };
    access.state().meta.touch_accessed();
    Ok(n)
}

pub(crate) fn write(
    access: &mut LeafAccess<'_>,
    profile: &TypedProfile,
    data: &[u8],
    offset: u64,
    tid: u64,
) -> Result<usize> {
    let path = access.leaf().path.clone();
    match profile.pod_type {
        PodType::Char => {
            let Some(&last) = data.last() else {
                return Ok(0);
            };
            let new = PodValue::Char(last);
            if profile.on_change.is_some() {
                let old = typed(access.state(), &path)?.value.snapshot();
                approve(profile, &path, &old, &new)?;
            }
            access.with_write(|state| {
                typed_mut(state, &path)?.value = Storage::Scalar(new);
                state.meta.touch_modified();
                Ok(data.len())
            })
        }
        PodType::String => access.with_write(|state| {
            let Storage::Text(region) = &mut typed_mut(state, &path)?.value else {
                return Err(Error::wrong_kind(&path));
            };
            let n = region.write(&path, data, offset)?;
            state.meta.touch_modified();
            Ok(n)
        }),
        _ => {
            let entry = typed(access.state(), &path)?;
            let tx = entry
                .transactions
                .get(&tid)
                .ok_or(Error::InvalidHandle(tid))?;
            let n = tx.lock().write(&path, data, offset)?;
            Ok(n)
        }
    }
}

/// Resizes a String leaf. Other types accept and ignore truncation; their
/// committed value only changes through a commit.
pub(crate) fn truncate(
    access: &mut LeafAccess<'_>,
    profile: &TypedProfile,
    size: u64,
) -> Result<()> {
    if profile.pod_type != PodType::String {
        return Ok(());
    }
    let path = access.leaf().path.clone();
    let size = usize::try_from(size).map_err(|_| Error::too_large(&path, usize::MAX))?;

    if profile.on_change.is_some() {
        let Storage::Text(region) = &typed(access.state(), &path)?.value else {
            return Err(Error::wrong_kind(&path));
        };
        let old = PodValue::String(region.as_bytes().to_vec());
        let new = PodValue::String(region.proposed(size));
        approve(profile, &path, &old, &new)?;
    }

    access.with_write(|state| {
        let Storage::Text(region) = &mut typed_mut(state, &path)?.value else {
            return Err(Error::wrong_kind(&path));
        };
        region.truncate(size);
        state.meta.touch_modified();
        Ok(())
    })
}

/// Ends a handle: parses and commits its transaction if anything was
/// written. The transaction is dropped even when the commit fails.
pub(crate) fn release(access: &mut LeafAccess<'_>, profile: &TypedProfile, tid: u64) -> Result<()> {
    if !profile.pod_type.uses_transaction() {
        return Ok(());
    }
    let path = access.leaf().path.clone();

    let tx = access.with_write(|state| {
        typed_mut(state, &path).map(|typed| typed.transactions.remove(&tid))
    })?;
    let Some(tx) = tx.map(Mutex::into_inner) else {
        return Ok(());
    };
    if !tx.has_written() {
        return Ok(());
    }

    let Some(new) = PodValue::parse_lenient(profile.pod_type, tx.text()) else {
        let text = String::from_utf8_lossy(tx.text()).into_owned();
        diagnostics::log_warn!(
            "Discarding unparsable write to {path}: {text}",
            path: path.as_str(),
            text: text.as_str()
        );
        return Err(Error::invalid_argument(format!(
            "'{text}' is not a valid {}",
            profile.pod_type
        )));
    };

    if profile.on_change.is_some() {
        let old = typed(access.state(), &path)?.value.snapshot();
        approve(profile, &path, &old, &new)?;
    }
    let value = new.to_string();
    access.with_write(|state| {
        typed_mut(state, &path)?.value = Storage::Scalar(new);
        state.meta.touch_modified();
        Ok::<_, Error>(())
    })?;
    diagnostics::log_debug!(
        "Committed {path} = {value}",
        path: path.as_str(),
        value: value.as_str()
    );
    Ok(())
}

pub(crate) fn read_value(access: &LeafAccess<'_>) -> Result<PodValue> {
    let path = &access.leaf().path;
    Ok(typed(access.state(), path)?.value.snapshot())
}

/// Coerces `value` into the leaf's type and commits it.
pub(crate) fn write_value(
    access: &mut LeafAccess<'_>,
    profile: &TypedProfile,
    value: PodValue,
) -> Result<()> {
    let new = value.coerce(profile.pod_type)?;
    let path = access.leaf().path.clone();

    if profile.on_change.is_some() {
        let old = typed(access.state(), &path)?.value.snapshot();
        approve(profile, &path, &old, &new)?;
    }

    access.with_write(|state| {
        match (&mut typed_mut(state, &path)?.value, new) {
            (Storage::Text(region), PodValue::String(bytes)) => region.replace(bytes),
            (slot, new) => *slot = Storage::Scalar(new),
        }
        state.meta.touch_modified();
        Ok(())
    })
}
