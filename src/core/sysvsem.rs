// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! SysV semaphore definitions the libc crate does not carry for Linux.

use nix::libc::{c_int, c_ushort, semid_ds};

// semctl commands, from linux/sem.h
pub const GETVAL: c_int = 12;
pub const SETVAL: c_int = 16;
pub const SEM_INFO: c_int = 19;

/// System wide semaphore limits, filled in by SEM_INFO.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SemInfo {
    pub semmap: c_int,
    pub semmni: c_int,
    pub semmns: c_int,
    pub semmnu: c_int,
    pub semmsl: c_int,
    pub semopm: c_int,
    pub semume: c_int,
    pub semusz: c_int,
    pub semvmx: c_int,
    pub semaem: c_int,
}

/// The optional fourth argument of semctl. The caller must define it.
#[repr(C)]
#[derive(Clone, Copy)]
pub union SemUn {
    pub val: c_int,
    pub buf: *mut semid_ds,
    pub array: *mut c_ushort,
    pub info: *mut SemInfo,
}

impl Default for SemUn {
    fn default() -> SemUn {
        SemUn { val: 0 }
    }
}
