// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Layouts and constants of the devicemapper ioctl interface, as defined
//! in the kernel's include/uapi/linux/dm-ioctl.h.

use std::fmt::{self, Debug};

use crate::core::util::str_from_byte_slice;

pub const DM_NAME_LEN: usize = 128;
pub const DM_UUID_LEN: usize = 129;
pub const DM_MAX_TYPE_NAME: usize = 16;

pub const DM_VERSION_CMD: u8 = 0;
pub const DM_REMOVE_ALL_CMD: u8 = 1;
pub const DM_LIST_DEVICES_CMD: u8 = 2;
pub const DM_DEV_CREATE_CMD: u8 = 3;
pub const DM_DEV_REMOVE_CMD: u8 = 4;
pub const DM_DEV_RENAME_CMD: u8 = 5;
pub const DM_DEV_SUSPEND_CMD: u8 = 6;
pub const DM_DEV_STATUS_CMD: u8 = 7;
pub const DM_DEV_WAIT_CMD: u8 = 8;
pub const DM_TABLE_LOAD_CMD: u8 = 9;
pub const DM_TABLE_CLEAR_CMD: u8 = 10;
pub const DM_TABLE_DEPS_CMD: u8 = 11;
pub const DM_TABLE_STATUS_CMD: u8 = 12;
pub const DM_LIST_VERSIONS_CMD: u8 = 13;
pub const DM_TARGET_MSG_CMD: u8 = 14;
pub const DM_DEV_SET_GEOMETRY_CMD: u8 = 15;

pub const DM_READONLY_FLAG: u32 = 1 << 0;
pub const DM_SUSPEND_FLAG: u32 = 1 << 1;
pub const DM_PERSISTENT_DEV_FLAG: u32 = 1 << 3;
pub const DM_STATUS_TABLE_FLAG: u32 = 1 << 4;
pub const DM_ACTIVE_PRESENT_FLAG: u32 = 1 << 5;
pub const DM_INACTIVE_PRESENT_FLAG: u32 = 1 << 6;
pub const DM_BUFFER_FULL_FLAG: u32 = 1 << 8;
pub const DM_SKIP_BDGET_FLAG: u32 = 1 << 9;
pub const DM_SKIP_LOCKFS_FLAG: u32 = 1 << 10;
pub const DM_NOFLUSH_FLAG: u32 = 1 << 11;
pub const DM_QUERY_INACTIVE_TABLE_FLAG: u32 = 1 << 12;
pub const DM_UEVENT_GENERATED_FLAG: u32 = 1 << 13;
pub const DM_UUID_FLAG: u32 = 1 << 14;
pub const DM_SECURE_DATA_FLAG: u32 = 1 << 15;
pub const DM_DATA_OUT_FLAG: u32 = 1 << 16;
pub const DM_DEFERRED_REMOVE: u32 = 1 << 17;
pub const DM_INTERNAL_SUSPEND_FLAG: u32 = 1 << 18;

// Udev flags live in the high 16 bits of the cookie, see libdevmapper.h.
pub const DM_UDEV_DISABLE_DM_RULES_FLAG: u32 = 0x0001;
pub const DM_UDEV_DISABLE_SUBSYSTEM_RULES_FLAG: u32 = 0x0002;
pub const DM_UDEV_DISABLE_DISK_RULES_FLAG: u32 = 0x0004;
pub const DM_UDEV_DISABLE_OTHER_RULES_FLAG: u32 = 0x0008;
pub const DM_UDEV_LOW_PRIORITY_FLAG: u32 = 0x0010;
pub const DM_UDEV_DISABLE_LIBRARY_FALLBACK: u32 = 0x0020;
pub const DM_UDEV_PRIMARY_SOURCE_FLAG: u32 = 0x0040;

pub const DM_COOKIE_MAGIC: u32 = 0x0D4D;
pub const DM_UDEV_FLAGS_MASK: u32 = 0xFFFF_0000;
pub const DM_UDEV_FLAGS_SHIFT: u32 = 16;

/// The header of every devicemapper ioctl.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DmIoctl {
    pub version: [u32; 3],
    pub data_size: u32,
    pub data_start: u32,
    pub target_count: u32,
    pub open_count: i32,
    pub flags: u32,
    pub event_nr: u32,
    pub padding: u32,
    pub dev: u64,
    pub name: [u8; DM_NAME_LEN],
    pub uuid: [u8; DM_UUID_LEN],
    pub data: [u8; 7],
}

impl Default for DmIoctl {
    fn default() -> DmIoctl {
        DmIoctl {
            version: [0; 3],
            data_size: 0,
            data_start: 0,
            target_count: 0,
            open_count: 0,
            flags: 0,
            event_nr: 0,
            padding: 0,
            dev: 0,
            name: [0; DM_NAME_LEN],
            uuid: [0; DM_UUID_LEN],
            data: [0; 7],
        }
    }
}

impl Debug for DmIoctl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmIoctl")
            .field("version", &self.version)
            .field("data_size", &self.data_size)
            .field("data_start", &self.data_start)
            .field("target_count", &self.target_count)
            .field("open_count", &self.open_count)
            .field("flags", &self.flags)
            .field("event_nr", &self.event_nr)
            .field("dev", &self.dev)
            .field(
                "name",
                &str_from_byte_slice(&self.name).unwrap_or("Could not parse string"),
            )
            .field(
                "uuid",
                &str_from_byte_slice(&self.uuid).unwrap_or("Could not parse string"),
            )
            .finish()
    }
}

/// One target of a table, followed in the buffer by its parameter string.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct DmTargetSpec {
    pub sector_start: u64,
    pub length: u64,
    pub status: i32,
    pub next: u32,
    pub target_type: [u8; DM_MAX_TYPE_NAME],
}

/// Followed in the buffer by `count` u64 device numbers.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct DmTargetDeps {
    pub count: u32,
    pub padding: u32,
}

/// Followed in the buffer by a NUL terminated device name.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct DmNameList {
    pub dev: u64,
    pub next: u32,
}

/// offsetof(struct dm_name_list, name)
pub const DM_NAME_LIST_NAME_OFFSET: usize = 12;

/// Followed in the buffer by a NUL terminated message.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct DmTargetMsg {
    pub sector: u64,
}
