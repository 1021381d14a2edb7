// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{fmt, iter::FusedIterator};

use crate::{
    backend::{AddNodeMode, DmControl, TaskKind},
    cookie::UdevCookie,
    core::{errors, Device, DeviceInfo, DmName, DmNameBuf, DmUdevFlags},
    query::{DependencySet, TableEntry},
    result::{DmError, DmResult},
    units::Sectors,
};

/// The setter of a task which failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskSetter {
    /// set name
    Name,
    /// set new name
    NewName,
    /// set message
    Message,
    /// set sector
    Sector,
    /// set event number
    EventNr,
    /// set add node mode
    AddNode,
    /// set read-only
    ReadOnly,
    /// set deferred remove
    DeferredRemove,
    /// add target
    AddTarget,
    /// set cookie
    Cookie,
}

impl fmt::Display for TaskSetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskSetter::Name => "set name",
            TaskSetter::NewName => "set new name",
            TaskSetter::Message => "set message",
            TaskSetter::Sector => "set sector",
            TaskSetter::EventNr => "set event number",
            TaskSetter::AddNode => "set add node",
            TaskSetter::ReadOnly => "set read-only",
            TaskSetter::DeferredRemove => "set deferred remove",
            TaskSetter::AddTarget => "add target",
            TaskSetter::Cookie => "set cookie",
        };
        write!(f, "{name}")
    }
}

// The single owner of a native handle. Destroys it when dropped.
struct NativeTask<'a, B: DmControl> {
    control: &'a B,
    handle: Option<B::Handle>,
    kind: TaskKind,
    name: Option<DmNameBuf>,
}

impl<B: DmControl> NativeTask<'_, B> {
    fn handle(&self) -> &B::Handle {
        self.handle
            .as_ref()
            .expect("handle is only taken when the task is dropped")
    }

    fn handle_mut(&mut self) -> &mut B::Handle {
        self.handle
            .as_mut()
            .expect("handle is only taken when the task is dropped")
    }

    fn describe(&self) -> String {
        match self.name {
            Some(ref name) => format!("{} {}", self.kind, name),
            None => self.kind.to_string(),
        }
    }
}

impl<B: DmControl> fmt::Debug for NativeTask<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeTask")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("live", &self.handle.is_some())
            .finish()
    }
}

impl<B: DmControl> Drop for NativeTask<'_, B> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.control.task_destroy(handle);
        }
    }
}

/// A devicemapper task which has not run yet.
///
/// A task runs at most once: `run` consumes it. The native task is
/// released when the `Task`, or the `CompletedTask` it becomes, is
/// dropped.
pub struct Task<'a, B: DmControl> {
    inner: NativeTask<'a, B>,
}

impl<B: DmControl> fmt::Debug for Task<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Task").field(&self.inner).finish()
    }
}

impl<'a, B: DmControl> Task<'a, B> {
    /// Create a task of the given kind. None if the native layer refused.
    pub fn create(control: &'a B, kind: TaskKind) -> Option<Task<'a, B>> {
        control.task_create(kind).map(|handle| Task {
            inner: NativeTask {
                control,
                handle: Some(handle),
                kind,
                name: None,
            },
        })
    }

    /// Create a task of the given kind operating on the device `name`.
    pub fn create_named(control: &'a B, kind: TaskKind, name: &str) -> DmResult<Task<'a, B>> {
        let mut task = Task::create(control, kind)
            .ok_or(DmError::Core(errors::Error::TaskCreate(kind)))?;
        task.set_name(name)?;
        Ok(task)
    }

    /// The kind of the task.
    pub fn kind(&self) -> TaskKind {
        self.inner.kind
    }

    fn setup_error(setter: TaskSetter, detail: String) -> DmError {
        DmError::Core(errors::Error::TaskSetup(setter, detail))
    }

    /// Set the device the task operates on.
    pub fn set_name(&mut self, name: &str) -> DmResult<()> {
        let name = DmName::new(name).map_err(|err| {
            Task::<B>::setup_error(TaskSetter::Name, format!("can't set task name {name}: {err}"))
        })?;
        self.inner
            .control
            .task_set_name(self.inner.handle_mut(), name)
            .map_err(|_| {
                Task::<B>::setup_error(TaskSetter::Name, format!("can't set task name {name}"))
            })?;
        self.inner.name = Some(name.to_owned());
        Ok(())
    }

    /// Set the name a rename task gives the device.
    pub fn set_new_name(&mut self, name: &str) -> DmResult<()> {
        let name = DmName::new(name).map_err(|err| {
            Task::<B>::setup_error(TaskSetter::NewName, format!("can't set new name {name}: {err}"))
        })?;
        self.inner
            .control
            .task_set_new_name(self.inner.handle_mut(), name)
            .map_err(|_| {
                Task::<B>::setup_error(TaskSetter::NewName, format!("can't set new name {name}"))
            })
    }

    /// Set the message of a target message task.
    pub fn set_message(&mut self, message: &str) -> DmResult<()> {
        self.inner
            .control
            .task_set_message(self.inner.handle_mut(), message)
            .map_err(|_| {
                Task::<B>::setup_error(TaskSetter::Message, format!("can't set message {message}"))
            })
    }

    /// Set the sector a target message is sent to.
    pub fn set_sector(&mut self, sector: u64) -> DmResult<()> {
        self.inner
            .control
            .task_set_sector(self.inner.handle_mut(), sector)
            .map_err(|_| {
                Task::<B>::setup_error(TaskSetter::Sector, format!("can't set sector {sector}"))
            })
    }

    /// Set the event number a wait event task waits past.
    pub fn set_event_nr(&mut self, event_nr: u32) -> DmResult<()> {
        self.inner
            .control
            .task_set_event_nr(self.inner.handle_mut(), event_nr)
            .map_err(|_| {
                Task::<B>::setup_error(
                    TaskSetter::EventNr,
                    format!("can't set event number {event_nr}"),
                )
            })
    }

    /// Set when the device node of a created device appears.
    pub fn set_add_node(&mut self, mode: AddNodeMode) -> DmResult<()> {
        self.inner
            .control
            .task_set_add_node(self.inner.handle_mut(), mode)
            .map_err(|_| {
                Task::<B>::setup_error(TaskSetter::AddNode, format!("can't add node {mode:?}"))
            })
    }

    /// Make the device read-only.
    pub fn set_ro(&mut self) -> DmResult<()> {
        self.inner
            .control
            .task_set_ro(self.inner.handle_mut())
            .map_err(|_| {
                Task::<B>::setup_error(TaskSetter::ReadOnly, "can't set read-only".into())
            })
    }

    /// Defer removal of the device until it is closed.
    pub fn set_deferred_remove(&mut self) -> DmResult<()> {
        self.inner
            .control
            .task_deferred_remove(self.inner.handle_mut())
            .map_err(|_| {
                Task::<B>::setup_error(
                    TaskSetter::DeferredRemove,
                    "can't set deferred remove".into(),
                )
            })
    }

    /// Append a line to the task's table.
    pub fn add_target(
        &mut self,
        start: Sectors,
        size: Sectors,
        target_type: &str,
        params: &str,
    ) -> DmResult<()> {
        self.inner
            .control
            .task_add_target(self.inner.handle_mut(), *start, *size, target_type, params)
            .map_err(|_| {
                Task::<B>::setup_error(
                    TaskSetter::AddTarget,
                    format!("can't add target {target_type} {params}"),
                )
            })
    }

    /// Attach a udev cookie. The caller owns the cookie and must wait on it
    /// once the task has run, or been dropped.
    pub fn set_cookie(
        &mut self,
        cookie: Option<&mut UdevCookie>,
        flags: DmUdevFlags,
    ) -> DmResult<()> {
        let cookie = cookie.ok_or(DmError::Core(errors::Error::NilCookie))?;
        self.inner
            .control
            .task_set_cookie(self.inner.handle_mut(), cookie.value_mut(), flags)
            .map_err(|_| Task::<B>::setup_error(TaskSetter::Cookie, "can't set cookie".into()))
    }

    /// Run the task. The native task is released whether or not it
    /// succeeds, once the result is dropped.
    pub fn run(mut self) -> DmResult<CompletedTask<'a, B>> {
        trace!("Running task {}", self.inner.describe());
        match self.inner.control.task_run(self.inner.handle_mut()) {
            Ok(()) => Ok(CompletedTask { inner: self.inner }),
            Err(_) => Err(DmError::Core(errors::Error::TaskRun(self.inner.describe()))),
        }
    }
}

/// A devicemapper task which ran successfully, and its results.
pub struct CompletedTask<'a, B: DmControl> {
    inner: NativeTask<'a, B>,
}

impl<B: DmControl> fmt::Debug for CompletedTask<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CompletedTask").field(&self.inner).finish()
    }
}

impl<B: DmControl> CompletedTask<'_, B> {
    fn output_error(what: &str) -> DmError {
        DmError::Core(errors::Error::TaskOutput(what.into()))
    }

    /// The kind of the task.
    pub fn kind(&self) -> TaskKind {
        self.inner.kind
    }

    /// The info of the device the task ran against.
    pub fn info(&self) -> DmResult<DeviceInfo> {
        self.inner
            .control
            .task_get_info(self.inner.handle())
            .map_err(|_| Self::output_error("device info"))
    }

    /// As `info`, also decoding whether removal of the device is deferred.
    pub fn info_with_deferred(&self) -> DmResult<DeviceInfo> {
        self.inner
            .control
            .task_get_info_with_deferred(self.inner.handle())
            .map_err(|_| Self::output_error("device info"))
    }

    /// The devices the device's live table references.
    pub fn deps(&self) -> DmResult<DependencySet> {
        self.inner
            .control
            .task_get_deps(self.inner.handle())
            .map_err(|_| Self::output_error("dependencies"))
    }

    /// The devicemapper driver version, as reported by a version task.
    pub fn driver_version(&self) -> DmResult<String> {
        self.inner
            .control
            .task_get_driver_version(self.inner.handle())
            .map_err(|_| Self::output_error("driver version"))
    }

    /// The devices reported by a list task.
    pub fn names(&self) -> DmResult<Vec<(DmNameBuf, Device)>> {
        self.inner
            .control
            .task_get_names(self.inner.handle())
            .map_err(|_| Self::output_error("device names"))
    }

    /// The entries of the device's table, in order.
    pub fn targets(&self) -> TableEntries<'_, B> {
        TableEntries {
            control: self.inner.control,
            handle: self.inner.handle(),
            cursor: Some(0),
        }
    }
}

/// A lazy cursor over the entries of a table. Each entry is decoded when
/// it is reached; once exhausted the cursor stays exhausted.
pub struct TableEntries<'t, B: DmControl> {
    control: &'t B,
    handle: &'t B::Handle,
    cursor: Option<usize>,
}

impl<B: DmControl> Iterator for TableEntries<'_, B> {
    type Item = TableEntry;

    fn next(&mut self) -> Option<TableEntry> {
        let cursor = self.cursor?;
        match self.control.task_get_next_target(self.handle, cursor) {
            Some((next, entry)) => {
                self.cursor = Some(next);
                Some(entry)
            }
            None => {
                self.cursor = None;
                None
            }
        }
    }
}

impl<B: DmControl> FusedIterator for TableEntries<'_, B> {}
