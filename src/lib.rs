// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Thin-provisioning control plane over Linux devicemapper.
//!
//! # Overview
//!
//! A devicemapper thin pool combines a metadata device and a data device
//! into shared backing space. Thin devices are allocated within the pool
//! and identified by a pool-local 24 bit id; snapshots are thin devices
//! created as copy-on-write derivatives of another thin device.
//!
//! This crate drives those objects through one-shot devicemapper tasks.
//! A `Task` is created for a single kind of operation, configured, run
//! exactly once and then released. The native layer only reports whether
//! a task succeeded, so an `ErrorBridge` listens to the diagnostics that
//! are emitted while a task runs and turns the interesting ones into
//! `ErrorEnum::Busy`, `ErrorEnum::IdExists` and `ErrorEnum::NoSuchDevice`.
//!
//! # Usage
//!
//! All multi-step operations are methods on `DmContext`:
//!
//! ```no_run
//! use dmtask::{Bytes, DmConfig, DmContext, Sectors, ThinDevId, IEC};
//! use std::path::Path;
//!
//! let ctx = DmContext::open(&DmConfig::default()).unwrap();
//! ctx.create_pool(
//!     "pool",
//!     Path::new("/dev/loop0"),
//!     Path::new("/dev/loop1"),
//!     Sectors(128),
//! )
//! .unwrap();
//!
//! let id = ThinDevId::new_u64(1).unwrap();
//! ctx.create_device("pool", id).unwrap();
//! ctx.activate_device("pool", "thin1", id, Bytes(u128::from(IEC::Gi)), None)
//!     .unwrap();
//! ```
//!
//! Operations which change visible device nodes attach a udev cookie and
//! wait for udev to finish processing it before returning, on every exit
//! path.

#![allow(clippy::doc_markdown)]
#![warn(missing_docs)]

#[macro_use]
extern crate log;

#[macro_use]
extern crate bitflags;

#[cfg(test)]
#[macro_use]
extern crate assert_matches;

/// the native control primitive
mod backend;
/// block device and loopback helpers
mod blockdev;
/// context holding the backend, bridge and configuration
mod context;
/// udev synchronization cookies
mod cookie;
/// low-level devicemapper ioctl interface
mod core;
/// read-only device and topology queries
mod query;
/// return results container
mod result;
/// suspend, resume and remove protocols
mod shared;
/// error classification from native diagnostics
mod signals;
/// the one-shot operation handle
mod task;
/// thin device lifecycle and snapshots
mod thindev;
/// the id the pool uses to track its devices
mod thindevid;
/// thin pool lifecycle
mod thinpooldev;
/// sizes in bytes and sectors
mod units;

#[cfg(test)]
mod testing;

pub use crate::{
    backend::{
        AddNodeMode, Diagnostic, DiagnosticCallback, DmControl, NativeResult, Rejected, TaskKind,
    },
    blockdev::{
        blkdev_size, block_device_discard, find_loop_device_for, loopback_backing_file,
        loopback_set_capacity, BlockDevices, SysBlockDevices,
    },
    context::{DmConfig, DmContext},
    cookie::{udev_wait, CookieWait, UdevCookie},
    core::{
        errors, Device, DeviceInfo, DmFlags, DmName, DmNameBuf, DmUdevFlags, IoctlControl,
        IoctlTask,
    },
    query::{DependencySet, TableEntry},
    result::{DmError, DmResult, ErrorEnum},
    shared::SuspendGuard,
    signals::{
        device_id_exists, ErrorBridge, ErrorSignals, SignalPattern, SignalPatterns, Signals,
    },
    task::{CompletedTask, TableEntries, Task, TaskSetter},
    thindev::THIN_TARGET_NAME,
    thindevid::ThinDevId,
    thinpooldev::{THIN_POOL_LOW_WATER_MARK, THIN_POOL_TARGET_NAME},
    units::{Bytes, Sectors, IEC, SECTOR_SIZE},
};
