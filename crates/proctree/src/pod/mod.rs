// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Plain scalar values exposed as text files.
//!
//! A typed leaf holds one [`PodValue`]. Reads render the committed value as
//! text, writes through an open handle buffer into a [`Transaction`] until the
//! handle is released, and the value helpers on the filesystem convert
//! between types using [`PodValue::coerce`].

mod format;
mod string;
mod transaction;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use format::{format_g, format_le, parse_float_prefix, parse_int_prefix};
pub use string::StringRegion;
pub(crate) use string::read_range;
pub use transaction::Transaction;

/// The scalar kinds a typed leaf can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PodType {
    Char,
    Int,
    Int64,
    Float,
    Double,
    LongDouble,
    String,
}

impl PodType {
    /// Scalars commit through a per-handle transaction; Char and String
    /// write straight into the committed value.
    pub fn uses_transaction(self) -> bool {
        !matches!(self, PodType::Char | PodType::String)
    }
}

impl fmt::Display for PodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PodType::Char => "char",
            PodType::Int => "int",
            PodType::Int64 => "int64",
            PodType::Float => "float",
            PodType::Double => "double",
            PodType::LongDouble => "long double",
            PodType::String => "string",
        };
        f.write_str(name)
    }
}

/// A value of one of the [`PodType`]s.
///
/// `LongDouble` carries an `f64`; it differs from `Double` only in how it is
/// rendered (`%Le` instead of `%g`).
#[derive(Debug, Clone, PartialEq)]
pub enum PodValue {
    Char(u8),
    Int(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    LongDouble(f64),
    String(Vec<u8>),
}

impl PodValue {
    pub fn pod_type(&self) -> PodType {
        match self {
            PodValue::Char(_) => PodType::Char,
            PodValue::Int(_) => PodType::Int,
            PodValue::Int64(_) => PodType::Int64,
            PodValue::Float(_) => PodType::Float,
            PodValue::Double(_) => PodType::Double,
            PodValue::LongDouble(_) => PodType::LongDouble,
            PodValue::String(_) => PodType::String,
        }
    }

    /// Text served to readers. Char is the raw byte, not a number.
    pub fn render(&self) -> Vec<u8> {
        match self {
            PodValue::Char(c) => vec![*c],
            PodValue::Int(v) => v.to_string().into_bytes(),
            PodValue::Int64(v) => v.to_string().into_bytes(),
            PodValue::Float(v) => format_g(f64::from(*v)).into_bytes(),
            PodValue::Double(v) => format_g(*v).into_bytes(),
            PodValue::LongDouble(v) => format_le(*v).into_bytes(),
            PodValue::String(s) => s.clone(),
        }
    }

    /// Parses transaction text into a scalar of type `ty`.
    ///
    /// Uses the longest valid prefix, so trailing newlines and garbage are
    /// ignored. `None` when no prefix parses or `ty` is not a scalar.
    pub fn parse_lenient(ty: PodType, text: &[u8]) -> Option<Self> {
        match ty {
            PodType::Int => {
                let (v, _) = parse_int_prefix(text)?;
                Some(PodValue::Int(saturate_i32(v)))
            }
            PodType::Int64 => {
                let (v, _) = parse_int_prefix(text)?;
                Some(PodValue::Int64(saturate_i64(v)))
            }
            PodType::Float => parse_float_prefix(text).map(|(v, _)| PodValue::Float(v as f32)),
            PodType::Double => parse_float_prefix(text).map(|(v, _)| PodValue::Double(v)),
            PodType::LongDouble => {
                parse_float_prefix(text).map(|(v, _)| PodValue::LongDouble(v))
            }
            PodType::Char | PodType::String => None,
        }
    }

    /// Like [`PodValue::parse_lenient`] but the whole input, apart from
    /// surrounding whitespace, must be consumed.
    fn parse_exact(ty: PodType, text: &[u8]) -> Option<Self> {
        let trimmed = text.trim_ascii();
        let consumed = match ty {
            PodType::Int | PodType::Int64 => parse_int_prefix(trimmed)?.1,
            PodType::Float | PodType::Double | PodType::LongDouble => {
                parse_float_prefix(trimmed)?.1
            }
            PodType::Char | PodType::String => return None,
        };
        if consumed != trimmed.len() {
            return None;
        }
        Self::parse_lenient(ty, trimmed)
    }

    /// Converts to another type following the widening rules.
    ///
    /// Integers widen to larger integers and to floating point (except
    /// `Int64 -> Float`, which would lose precision), floating point widens
    /// to larger floating point, everything renders to `String`, and a
    /// `String` converts back only when it is a single byte (`Char`) or
    /// parses completely (other scalars).
    pub fn coerce(&self, to: PodType) -> Result<PodValue> {
        let unsupported = || Error::UnsupportedCoercion {
            from: self.pod_type(),
            to,
        };

        if to == PodType::String {
            return Ok(PodValue::String(self.render()));
        }

        let out = match (self, to) {
            (PodValue::Char(c), PodType::Char) => PodValue::Char(*c),
            (PodValue::Char(c), PodType::Int) => PodValue::Int(i32::from(*c)),
            (PodValue::Char(c), PodType::Int64) => PodValue::Int64(i64::from(*c)),
            (PodValue::Char(c), PodType::Float) => PodValue::Float(f32::from(*c)),
            (PodValue::Char(c), PodType::Double) => PodValue::Double(f64::from(*c)),
            (PodValue::Char(c), PodType::LongDouble) => PodValue::LongDouble(f64::from(*c)),

            (PodValue::Int(v), PodType::Int) => PodValue::Int(*v),
            (PodValue::Int(v), PodType::Int64) => PodValue::Int64(i64::from(*v)),
            (PodValue::Int(v), PodType::Float) => PodValue::Float(*v as f32),
            (PodValue::Int(v), PodType::Double) => PodValue::Double(f64::from(*v)),
            (PodValue::Int(v), PodType::LongDouble) => PodValue::LongDouble(f64::from(*v)),

            (PodValue::Int64(v), PodType::Int64) => PodValue::Int64(*v),
            (PodValue::Int64(v), PodType::Double) => PodValue::Double(*v as f64),
            (PodValue::Int64(v), PodType::LongDouble) => PodValue::LongDouble(*v as f64),

            (PodValue::Float(v), PodType::Float) => PodValue::Float(*v),
            (PodValue::Float(v), PodType::Double) => PodValue::Double(f64::from(*v)),
            (PodValue::Float(v), PodType::LongDouble) => PodValue::LongDouble(f64::from(*v)),

            (PodValue::Double(v), PodType::Double) => PodValue::Double(*v),
            (PodValue::Double(v), PodType::LongDouble) => PodValue::LongDouble(*v),

            (PodValue::LongDouble(v), PodType::LongDouble) => PodValue::LongDouble(*v),

            (PodValue::String(s), PodType::Char) => match s.as_slice() {
                [c] => PodValue::Char(*c),
                _ => return Err(unsupported()),
            },
            (PodValue::String(s), ty) => Self::parse_exact(ty, s).ok_or_else(unsupported)?,

            _ => return Err(unsupported()),
        };
        Ok(out)
    }
}

impl fmt::Display for PodValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.render()))
    }
}

fn saturate_i32(v: i128) -> i32 {
    v.clamp(i128::from(i32::MIN), i128::from(i32::MAX)) as i32
}

fn saturate_i64(v: i128) -> i64 {
    v.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

/// An `f64` that reads and writes as a `LongDouble` leaf.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct LongDouble(pub f64);

/// Rust types usable with `Filesystem::read_as` and `Filesystem::write_as`.
pub trait Pod: Sized {
    const TYPE: PodType;

    fn into_value(self) -> PodValue;

    fn from_value(value: PodValue) -> Option<Self>;
}

macro_rules! scalar_pod {
    ($ty:ty, $variant:ident) => {
        impl Pod for $ty {
            const TYPE: PodType = PodType::$variant;

            fn into_value(self) -> PodValue {
                PodValue::$variant(self)
            }

            fn from_value(value: PodValue) -> Option<Self> {
                match value {
                    PodValue::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

scalar_pod!(u8, Char);
scalar_pod!(i32, Int);
scalar_pod!(i64, Int64);
scalar_pod!(f32, Float);
scalar_pod!(f64, Double);
scalar_pod!(Vec<u8>, String);

impl Pod for LongDouble {
    const TYPE: PodType = PodType::LongDouble;

    fn into_value(self) -> PodValue {
        PodValue::LongDouble(self.0)
    }

    fn from_value(value: PodValue) -> Option<Self> {
        match value {
            PodValue::LongDouble(v) => Some(LongDouble(v)),
            _ => None,
        }
    }
}

impl Pod for String {
    const TYPE: PodType = PodType::String;

    fn into_value(self) -> PodValue {
        PodValue::String(self.into_bytes())
    }

    fn from_value(value: PodValue) -> Option<Self> {
        match value {
            PodValue::String(bytes) => String::from_utf8(bytes).ok(),
            _ => None,
        }
    }
}
