// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The native devicemapper task primitive.
//!
//! Everything above this module talks to devicemapper through `DmControl`.
//! A native task is created for one kind of operation, configured, run
//! once, queried and destroyed. The native layer reports only whether a
//! call succeeded; the detail of a failure is delivered as `Diagnostic`s to
//! the registered callback while the task runs.

use std::{error::Error, fmt, path::Path};

use nix::errno::Errno;

use crate::{
    core::{errors, Device, DeviceInfo, DmName, DmNameBuf, DmUdevFlags},
    query::{DependencySet, TableEntry},
    result::{DmError, DmResult},
};

/// The kind of operation a task performs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TaskKind {
    /// Create a device, load its table and resume it
    Create,
    /// Load a table into the inactive slot
    Reload,
    /// Remove a device
    Remove,
    /// Remove all devices
    RemoveAll,
    /// Suspend a device
    Suspend,
    /// Resume a device, activating its inactive table
    Resume,
    /// Device info
    Info,
    /// Devices referenced by the live table
    Deps,
    /// Rename a device
    Rename,
    /// Driver version
    Version,
    /// Target status
    Status,
    /// Live table
    Table,
    /// Wait for a device event
    WaitEvent,
    /// List devices
    List,
    /// Clear the inactive table
    Clear,
    /// Ensure device nodes are present
    MakeNodes,
    /// List target types and their versions
    ListVersions,
    /// Send a message to a target
    TargetMsg,
    /// Set the geometry of a device
    SetGeometry,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::Create => "create",
            TaskKind::Reload => "reload",
            TaskKind::Remove => "remove",
            TaskKind::RemoveAll => "remove_all",
            TaskKind::Suspend => "suspend",
            TaskKind::Resume => "resume",
            TaskKind::Info => "info",
            TaskKind::Deps => "deps",
            TaskKind::Rename => "rename",
            TaskKind::Version => "version",
            TaskKind::Status => "status",
            TaskKind::Table => "table",
            TaskKind::WaitEvent => "waitevent",
            TaskKind::List => "ls",
            TaskKind::Clear => "clear",
            TaskKind::MakeNodes => "mknodes",
            TaskKind::ListVersions => "targets",
            TaskKind::TargetMsg => "message",
            TaskKind::SetGeometry => "setgeometry",
        };
        write!(f, "{name}")
    }
}

/// When the native layer creates a device node for a new device.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum AddNodeMode {
    /// When the device is resumed
    #[default]
    OnResume,
    /// As soon as the device is created
    OnCreate,
}

impl TryFrom<u32> for AddNodeMode {
    type Error = DmError;

    fn try_from(val: u32) -> DmResult<AddNodeMode> {
        match val {
            0 => Ok(AddNodeMode::OnResume),
            1 => Ok(AddNodeMode::OnCreate),
            _ => Err(DmError::Core(errors::Error::InvalidAddNode(val))),
        }
    }
}

/// A diagnostic emitted by the native layer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Diagnostic {
    /// severity
    pub level: log::Level,
    /// source file which emitted it
    pub file: &'static str,
    /// source line which emitted it
    pub line: u32,
    /// the errno of the failed call, if any
    pub errno: Option<Errno>,
    /// free text
    pub message: String,
}

/// The least severe diagnostic level logged at native verbosity `verbosity`.
pub(crate) fn verbosity_level(verbosity: i32) -> log::Level {
    match verbosity {
        i32::MIN..=3 => log::Level::Error,
        4 => log::Level::Warn,
        5 | 6 => log::Level::Info,
        _ => log::Level::Debug,
    }
}

/// Receives every diagnostic the native layer emits.
pub type DiagnosticCallback = Box<dyn Fn(&Diagnostic) + Send + Sync>;

/// The native layer refused a call. It says nothing more; the reason, if
/// any, was delivered as a `Diagnostic`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Rejected;

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rejected by the native devicemapper layer")
    }
}

impl Error for Rejected {}

/// The result of a native call.
pub type NativeResult<T> = Result<T, Rejected>;

/// The native devicemapper task primitive.
///
/// Handles are owned by exactly one caller and are always passed back to
/// `task_destroy` exactly once. The getters are only meaningful after a
/// successful `task_run`.
pub trait DmControl: Send + Sync {
    /// A native task.
    type Handle;

    /// Create a task of the given kind. None if the native layer refused.
    fn task_create(&self, kind: TaskKind) -> Option<Self::Handle>;

    /// Set the name of the device the task operates on.
    fn task_set_name(&self, task: &mut Self::Handle, name: &DmName) -> NativeResult<()>;

    /// Set the new name of a rename task.
    fn task_set_new_name(&self, task: &mut Self::Handle, name: &DmName) -> NativeResult<()>;

    /// Set the message of a target message task.
    fn task_set_message(&self, task: &mut Self::Handle, message: &str) -> NativeResult<()>;

    /// Set the sector a target message is sent to.
    fn task_set_sector(&self, task: &mut Self::Handle, sector: u64) -> NativeResult<()>;

    /// Set the event number a wait event task waits past.
    fn task_set_event_nr(&self, task: &mut Self::Handle, event_nr: u32) -> NativeResult<()>;

    /// Set when the device node of a created device appears.
    fn task_set_add_node(&self, task: &mut Self::Handle, mode: AddNodeMode) -> NativeResult<()>;

    /// Make the device read-only.
    fn task_set_ro(&self, task: &mut Self::Handle) -> NativeResult<()>;

    /// Make a remove task defer removal until the device is closed.
    fn task_deferred_remove(&self, task: &mut Self::Handle) -> NativeResult<()>;

    /// Append a line to the task's table.
    fn task_add_target(
        &self,
        task: &mut Self::Handle,
        start: u64,
        size: u64,
        target_type: &str,
        params: &str,
    ) -> NativeResult<()>;

    /// Attach a udev cookie to the task and store its value in `cookie`.
    /// A value of 0 means there is nothing to wait for.
    fn task_set_cookie(
        &self,
        task: &mut Self::Handle,
        cookie: &mut u32,
        flags: DmUdevFlags,
    ) -> NativeResult<()>;

    /// Run the task.
    fn task_run(&self, task: &mut Self::Handle) -> NativeResult<()>;

    /// The info of the device the task ran against.
    fn task_get_info(&self, task: &Self::Handle) -> NativeResult<DeviceInfo>;

    /// As `task_get_info` and also decode the deferred remove flag.
    fn task_get_info_with_deferred(&self, task: &Self::Handle) -> NativeResult<DeviceInfo>;

    /// The result of a deps task.
    fn task_get_deps(&self, task: &Self::Handle) -> NativeResult<DependencySet>;

    /// The result of a version task.
    fn task_get_driver_version(&self, task: &Self::Handle) -> NativeResult<String>;

    /// The result of a list task.
    fn task_get_names(&self, task: &Self::Handle) -> NativeResult<Vec<(DmNameBuf, Device)>>;

    /// The table entry at `cursor`, and the cursor of the entry after it.
    /// None once the table is exhausted.
    fn task_get_next_target(&self, task: &Self::Handle, cursor: usize)
        -> Option<(usize, TableEntry)>;

    /// Release the task.
    fn task_destroy(&self, task: Self::Handle);

    /// Set the directory device nodes live in.
    fn set_dev_dir(&self, dir: &Path) -> NativeResult<()>;

    /// The version of the native layer.
    fn library_version(&self) -> NativeResult<String>;

    /// Whether tasks synchronize with udev.
    fn udev_sync_supported(&self) -> bool;

    /// Enable or disable udev synchronization.
    fn udev_set_sync_support(&self, enable: bool);

    /// Whether the driver understands udev cookies.
    fn cookie_supported(&self) -> bool;

    /// Block until udev is done with every uevent tagged with `cookie`.
    fn udev_wait(&self, cookie: u32) -> NativeResult<()>;

    /// Set the verbosity of the native layer's own logging.
    fn log_init_verbose(&self, level: i32);

    /// Route all diagnostics to `callback`.
    fn register_diagnostic_callback(&self, callback: DiagnosticCallback);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// Only the two defined modes convert.
    fn test_add_node_mode_try_from() {
        assert_eq!(AddNodeMode::try_from(0).unwrap(), AddNodeMode::OnResume);
        assert_eq!(AddNodeMode::try_from(1).unwrap(), AddNodeMode::OnCreate);
        assert_matches!(
            AddNodeMode::try_from(2),
            Err(DmError::Core(errors::Error::InvalidAddNode(2)))
        );
    }
}
