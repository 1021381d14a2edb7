// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use semver::Version;

use crate::core::{device::Device, dm_flags::DmFlags, dm_ioctl as dmi};

/// The first driver version which reports deferred removal in the flags.
const DEFERRED_REMOVE_MIN_VERSION: Version = Version::new(4, 27, 0);

/// A snapshot of a device's state, as returned by an info query.
///
/// A device which does not exist yields a `DeviceInfo` with `exists()`
/// false and every other field zeroed, rather than an error.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceInfo {
    exists: bool,
    flags: DmFlags,
    open_count: i32,
    event_nr: u32,
    device: Device,
    target_count: u32,
    deferred_remove: Option<bool>,
}

impl DeviceInfo {
    /// The info of a device which does not exist.
    pub fn absent() -> DeviceInfo {
        DeviceInfo::default()
    }

    /// The info of an existing device.
    pub fn new(
        device: Device,
        flags: DmFlags,
        open_count: i32,
        event_nr: u32,
        target_count: u32,
    ) -> DeviceInfo {
        DeviceInfo {
            exists: true,
            flags,
            open_count,
            event_nr,
            device,
            target_count,
            deferred_remove: None,
        }
    }

    /// Record whether removal of the device is deferred.
    pub fn with_deferred_remove(mut self, deferred: bool) -> DeviceInfo {
        self.deferred_remove = Some(deferred);
        self
    }

    /// Decode the header returned by a successful status ioctl.
    /// The deferred remove flag is only decoded when asked for and when
    /// the driver which filled in the header reports it.
    pub(crate) fn from_ioctl(hdr: &dmi::DmIoctl, decode_deferred: bool) -> DeviceInfo {
        let flags = DmFlags::from_bits_truncate(hdr.flags);
        // dm_ioctl struct reserves 64 bits for device but kernel "huge"
        // encoding is only 32 bits.
        let info = DeviceInfo::new(
            Device::from_kdev_t(hdr.dev as u32),
            flags,
            hdr.open_count,
            hdr.event_nr,
            hdr.target_count,
        );
        let version = Version::new(
            u64::from(hdr.version[0]),
            u64::from(hdr.version[1]),
            u64::from(hdr.version[2]),
        );
        if decode_deferred && version >= DEFERRED_REMOVE_MIN_VERSION {
            info.with_deferred_remove(flags.contains(DmFlags::DM_DEFERRED_REMOVE))
        } else {
            info
        }
    }

    /// Whether the device exists.
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Whether the device is suspended.
    pub fn suspended(&self) -> bool {
        self.flags.contains(DmFlags::DM_SUSPEND)
    }

    /// Whether the device has a live table.
    pub fn live_table(&self) -> bool {
        self.flags.contains(DmFlags::DM_ACTIVE_PRESENT)
    }

    /// Whether the device has a table loaded in its inactive slot.
    pub fn inactive_table(&self) -> bool {
        self.flags.contains(DmFlags::DM_INACTIVE_PRESENT)
    }

    /// Whether the device is read-only.
    pub fn read_only(&self) -> bool {
        self.flags.contains(DmFlags::DM_READONLY)
    }

    /// The number of times the device is currently open.
    pub fn open_count(&self) -> i32 {
        self.open_count
    }

    /// The last event number for the device.
    pub fn event_nr(&self) -> u32 {
        self.event_nr
    }

    /// The device's major and minor device numbers, as a Device.
    pub fn device(&self) -> Device {
        self.device
    }

    /// The number of targets in the device's live table.
    pub fn target_count(&self) -> u32 {
        self.target_count
    }

    /// Whether removal of the device is deferred until it is closed.
    /// None if this was not decoded.
    pub fn deferred_remove(&self) -> Option<bool> {
        self.deferred_remove
    }

    /// The flags returned from the device.
    pub fn flags(&self) -> DmFlags {
        self.flags
    }
}
