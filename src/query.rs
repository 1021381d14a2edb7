// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use crate::{
    backend::{DmControl, TaskKind},
    context::DmContext,
    core::{errors, Device, DeviceInfo, DmNameBuf},
    result::{DmError, DmResult, ErrorEnum},
    task::{CompletedTask, Task},
};

/// One line of a device's table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableEntry {
    /// The first sector the target maps, in 512 byte sectors
    pub start: u64,
    /// The number of sectors the target maps
    pub length: u64,
    /// The target type, e.g. "thin-pool"
    pub target_type: String,
    /// Target parameters for a table load, or the target's status
    pub params: String,
}

impl TableEntry {
    /// Make a new table entry.
    pub fn new(start: u64, length: u64, target_type: String, params: String) -> TableEntry {
        TableEntry {
            start,
            length,
            target_type,
            params,
        }
    }
}

/// The devices a device's live table references.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DependencySet {
    /// The number of devices
    pub count: u32,
    /// The devices, in the order the driver reports them
    pub devices: Vec<Device>,
}

impl DependencySet {
    /// A set of the given devices.
    pub fn new(devices: Vec<Device>) -> DependencySet {
        DependencySet {
            count: devices.len() as u32,
            devices,
        }
    }
}

impl<B: DmControl> DmContext<B> {
    fn run_query(&self, kind: TaskKind, name: &str) -> DmResult<CompletedTask<'_, B>> {
        Task::create_named(self.control(), kind, name)?.run()
    }

    // The first entry of a status or table query, provided the device
    // exists.
    fn first_entry(&self, kind: TaskKind, name: &str) -> DmResult<TableEntry> {
        let completed = self.run_query(kind, name)?;
        if !completed.info()?.exists() {
            return Err(DmError::Core(errors::Error::NonExistingDevice(name.into())));
        }
        let first = completed.targets().next();
        first.ok_or_else(|| DmError::Dm(ErrorEnum::NotFound, format!("device {name} has no table")))
    }

    /// The info of the device `name`. A device which does not exist yields
    /// an info whose `exists()` is false.
    pub fn get_info(&self, name: &str) -> DmResult<DeviceInfo> {
        self.run_query(TaskKind::Info, name)?.info()
    }

    /// As `get_info`, and also whether removal of the device is deferred.
    pub fn get_info_with_deferred(&self, name: &str) -> DmResult<DeviceInfo> {
        self.run_query(TaskKind::Info, name)?.info_with_deferred()
    }

    /// The devices the live table of `name` references.
    pub fn get_deps(&self, name: &str) -> DmResult<DependencySet> {
        self.run_query(TaskKind::Deps, name)?.deps()
    }

    /// The status of the first target of `name`.
    pub fn get_status(&self, name: &str) -> DmResult<TableEntry> {
        self.first_entry(TaskKind::Status, name)
    }

    /// The first line of the live table of `name`.
    pub fn get_table(&self, name: &str) -> DmResult<TableEntry> {
        self.first_entry(TaskKind::Table, name)
    }

    /// Every line of the live table of `name`, in order.
    pub fn table_entries(&self, name: &str) -> DmResult<Vec<TableEntry>> {
        let completed = self.run_query(TaskKind::Table, name)?;
        if !completed.info()?.exists() {
            return Err(DmError::Core(errors::Error::NonExistingDevice(name.into())));
        }
        let entries = completed.targets().collect();
        Ok(entries)
    }

    /// The version of the devicemapper driver.
    pub fn get_driver_version(&self) -> DmResult<String> {
        Task::create(self.control(), TaskKind::Version)
            .ok_or(DmError::Core(errors::Error::TaskCreate(TaskKind::Version)))?
            .run()?
            .driver_version()
    }

    /// The version of the native layer.
    pub fn get_library_version(&self) -> DmResult<String> {
        self.control().library_version().map_err(|_| {
            DmError::Core(errors::Error::TaskOutput("library version".into()))
        })
    }

    /// The name and device number of every devicemapper device.
    pub fn list_devices(&self) -> DmResult<Vec<(DmNameBuf, Device)>> {
        Task::create(self.control(), TaskKind::List)
            .ok_or(DmError::Core(errors::Error::TaskCreate(TaskKind::List)))?
            .run()?
            .names()
    }

    /// Whether the device `name` exists.
    pub fn device_exists(&self, name: &str) -> DmResult<bool> {
        Ok(self.get_info(name)?.exists())
    }
}
