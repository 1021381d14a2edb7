// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*! Definition for low level error class for core methods !*/

use std::{self, path::PathBuf};

use nix::errno::Errno;

use crate::{backend::TaskKind, task::TaskSetter};

#[derive(Clone, Debug)]
/// Internal error for low-level devicemapper operations
pub enum Error {
    /// An error returned on failure to create a devicemapper context
    ContextInit(String),

    /// This is a generic error that can be returned when a method
    /// receives an invalid argument. Ideally, the argument should be
    /// invalid in itself, i.e., it should not be made invalid by some
    /// part of the program state or the environment.
    InvalidArgument(String),

    /// An error returned exclusively by DM::do_ioctl.
    /// Holds the ioctl command number and the errno the kernel returned.
    Ioctl(u8, Errno),

    /// An error returned when the response exceeds the maximum possible
    /// size of the ioctl buffer.
    IoctlResultTooLarge,

    /// An error returned on general IO failure
    GeneralIo(String),

    /// An error synchronizing with udev
    UdevSync(String),

    /// The native layer refused to change its device directory.
    SetDevDir(PathBuf),

    /// The native layer refused to create a task of the given kind.
    TaskCreate(TaskKind),

    /// The native layer rejected a task setter. The string names the
    /// argument that was rejected.
    TaskSetup(TaskSetter, String),

    /// The task ran and the native layer reported failure.
    TaskRun(String),

    /// A completed task did not yield the requested result.
    TaskOutput(String),

    /// Waiting on the udev cookie with the given value failed.
    UdevWait(u32),

    /// No location was supplied for the udev cookie.
    NilCookie,

    /// The raw value does not name an add node mode.
    InvalidAddNode(u32),

    /// A query which requires the device to exist found no such device.
    NonExistingDevice(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ContextInit(err) => {
                write!(f, "DM context not initialized due to IO error: {err}")
            }
            Error::InvalidArgument(err) => write!(f, "invalid argument: {err}"),
            Error::Ioctl(op, err) => write!(
                f,
                "low-level ioctl error; ioctl number: {op}, error: {err}"
            ),
            Error::IoctlResultTooLarge => write!(
                f,
                "ioctl result too large for maximum buffer size: {} bytes",
                u32::MAX
            ),
            Error::GeneralIo(err) => {
                write!(f, "failed to perform operation due to IO error: {err}")
            }
            Error::UdevSync(err) => {
                write!(f, "failed to perform udev sync operation: {err}")
            }
            Error::SetDevDir(dir) => {
                write!(f, "failed to set device directory to {}", dir.display())
            }
            Error::TaskCreate(kind) => write!(f, "can't create task of type {kind}"),
            Error::TaskSetup(setter, detail) => {
                write!(f, "task {setter} failed: {detail}")
            }
            Error::TaskRun(task) => write!(f, "task run failed: {task}"),
            Error::TaskOutput(what) => write!(f, "task did not yield {what}"),
            Error::UdevWait(cookie) => write!(f, "wait on udev cookie {cookie} failed"),
            Error::NilCookie => write!(f, "cookie location can't be nil"),
            Error::InvalidAddNode(val) => write!(f, "invalid add node type {val}"),
            Error::NonExistingDevice(name) => write!(f, "non existing device {name}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Ioctl(_, err) => Some(err),
            _ => None,
        }
    }
}
