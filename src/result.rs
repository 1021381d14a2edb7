// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{error::Error, fmt};

use crate::core::errors;

/// A very simple breakdown of outer layer errors.
///
/// `Busy`, `IdExists` and `NoSuchDevice` are benign conflicts: the caller
/// may retry, possibly with a different thin id or after a backoff.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ErrorEnum {
    /// generic error code
    Error,
    /// invalid value passed as argument
    Invalid,
    /// something not found
    NotFound,
    /// the device was busy when the operation ran
    Busy,
    /// the thin device id is already in use in the pool
    IdExists,
    /// the device vanished or was never there
    NoSuchDevice,
}

impl fmt::Display for ErrorEnum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Super error type, with constructors distinguishing outer errors from
/// core errors.
#[derive(Clone, Debug)]
pub enum DmError {
    /// DM errors
    Dm(ErrorEnum, String),
    /// Errors in the core devicemapper functionality
    Core(errors::Error),
}

impl DmError {
    /// The outer error kind, if this is an outer error.
    pub fn kind(&self) -> Option<&ErrorEnum> {
        match self {
            DmError::Dm(kind, _) => Some(kind),
            DmError::Core(_) => None,
        }
    }
}

/// return result for DM functions
pub type DmResult<T> = Result<T, DmError>;

impl From<errors::Error> for DmError {
    fn from(err: errors::Error) -> DmError {
        DmError::Core(err)
    }
}

impl fmt::Display for DmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DmError::Core(ref err) => write!(f, "DM Core error: {err}"),
            DmError::Dm(ref err, ref msg) => write!(f, "DM error: {err}: {msg}"),
        }
    }
}

impl Error for DmError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DmError::Core(err) => Some(err),
            DmError::Dm(_, _) => None,
        }
    }
}
