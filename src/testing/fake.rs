// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// An in-memory devicemapper which records what it is asked to do and
// fails on request.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, RwLock},
};

use nix::errno::Errno;

use crate::{
    backend::{
        AddNodeMode, Diagnostic, DiagnosticCallback, DmControl, NativeResult, Rejected, TaskKind,
    },
    blockdev::BlockDevices,
    context::{DmConfig, DmContext},
    core::{errors, Device, DeviceInfo, DmFlags, DmName, DmNameBuf, DmUdevFlags},
    query::{DependencySet, TableEntry},
    result::{DmError, DmResult},
    task::TaskSetter,
    units::Bytes,
};

use super::logger::init_logger;

/// A failure to inject. Faults persist until cleared.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Fault {
    /// refuse to create tasks of this kind
    Create(TaskKind),
    /// reject this setter
    Setter(TaskSetter),
    /// fail runs of this kind, with no errno
    Run(TaskKind),
    /// fail runs of this kind, emitting a diagnostic with the errno
    RunErrno(TaskKind, Errno),
}

/// What the fake has been asked to do.
#[derive(Clone, Debug, Default)]
pub struct Counters {
    pub live_handles: usize,
    pub destroyed: usize,
    pub waits: usize,
    pub suspends: usize,
    pub resumes: usize,
    pub targets_decoded: usize,
    runs: HashMap<TaskKind, usize>,
}

impl Counters {
    /// The number of runs attempted of tasks of `kind`.
    pub fn runs(&self, kind: TaskKind) -> usize {
        self.runs.get(&kind).copied().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct FakeDevice {
    minor: u32,
    flags: DmFlags,
    open_count: i32,
    event_nr: u32,
    table: Vec<TableEntry>,
    inactive: Option<Vec<TableEntry>>,
    deps: Vec<Device>,
    add_node: Option<AddNodeMode>,
    messages: Vec<(u64, String)>,
    pool: Option<FakePool>,
}

impl FakeDevice {
    fn info(&self) -> DeviceInfo {
        DeviceInfo::new(
            Device {
                major: 253,
                minor: self.minor,
            },
            self.flags,
            self.open_count,
            self.event_nr,
            self.table.len() as u32,
        )
    }
}

#[derive(Debug, Default)]
struct FakePool {
    transaction_id: u64,
    thin_ids: BTreeSet<u32>,
}

#[derive(Debug, Default)]
struct State {
    devices: BTreeMap<String, FakeDevice>,
    next_minor: u32,
    faults: Vec<Fault>,
    created: usize,
    destroyed: usize,
    waits: usize,
    targets_decoded: usize,
    runs: HashMap<TaskKind, usize>,
    fail_udev_wait: bool,
    next_cookie: u32,
    last_cookie_flags: Option<DmUdevFlags>,
    dev_dir: Option<PathBuf>,
    refuse_dev_dir: bool,
    udev_sync: bool,
    verbosity: i32,
}

impl State {
    fn add_device(&mut self, name: &str, table: Vec<TableEntry>) -> &mut FakeDevice {
        self.next_minor += 1;
        let device = FakeDevice {
            minor: self.next_minor,
            flags: DmFlags::DM_ACTIVE_PRESENT,
            table,
            ..Default::default()
        };
        self.devices.insert(name.to_owned(), device);
        self.devices
            .get_mut(name)
            .expect("device was just inserted")
    }
}

/// The results of a run task.
#[derive(Debug, Default)]
struct Output {
    info: DeviceInfo,
    deferred: bool,
    table: Vec<TableEntry>,
    deps: Vec<Device>,
    names: Vec<(DmNameBuf, Device)>,
    version: Option<String>,
}

#[derive(Debug)]
pub struct FakeTask {
    kind: TaskKind,
    name: Option<String>,
    new_name: Option<String>,
    message: Option<String>,
    sector: u64,
    add_node: AddNodeMode,
    read_only: bool,
    deferred_remove: bool,
    targets: Vec<TableEntry>,
    output: Option<Output>,
}

/// An in-memory stand in for the devicemapper driver.
pub struct FakeControl {
    state: Mutex<State>,
    callback: RwLock<Option<DiagnosticCallback>>,
    blockdev: FakeBlockDevices,
}

impl Default for FakeControl {
    fn default() -> FakeControl {
        FakeControl::new()
    }
}

impl FakeControl {
    pub fn new() -> FakeControl {
        FakeControl {
            state: Mutex::new(State {
                udev_sync: true,
                ..Default::default()
            }),
            callback: RwLock::new(None),
            blockdev: FakeBlockDevices::new(),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn emit(&self, errno: Option<Errno>, message: String) {
        let diagnostic = Diagnostic {
            level: log::Level::Error,
            file: file!(),
            line: line!(),
            errno,
            message,
        };
        if let Some(ref callback) = *self.callback.read().unwrap() {
            callback(&diagnostic);
        }
    }

    fn fail_errno(&self, task: &FakeTask, errno: Errno) -> NativeResult<()> {
        self.emit(
            Some(errno),
            format!(
                "device-mapper: {} ioctl on {} failed: {}",
                task.kind,
                task.name.as_deref().unwrap_or(""),
                errno.desc()
            ),
        );
        Err(Rejected)
    }

    fn check_setter(&self, setter: TaskSetter) -> NativeResult<()> {
        if self.state().faults.contains(&Fault::Setter(setter)) {
            self.emit(None, format!("device-mapper: {setter} rejected"));
            return Err(Rejected);
        }
        Ok(())
    }

    pub fn inject(&self, fault: Fault) {
        self.state().faults.push(fault);
    }

    pub fn clear_faults(&self) {
        self.state().faults.clear();
    }

    pub fn fail_udev_wait(&self, fail: bool) {
        self.state().fail_udev_wait = fail;
    }

    pub fn refuse_dev_dir(&self) {
        self.state().refuse_dev_dir = true;
    }

    pub fn counters(&self) -> Counters {
        let state = self.state();
        Counters {
            live_handles: state.created - state.destroyed,
            destroyed: state.destroyed,
            waits: state.waits,
            suspends: state.runs.get(&TaskKind::Suspend).copied().unwrap_or(0),
            resumes: state.runs.get(&TaskKind::Resume).copied().unwrap_or(0),
            targets_decoded: state.targets_decoded,
            runs: state.runs.clone(),
        }
    }

    pub fn add_device(&self, name: &str, table: Vec<TableEntry>) {
        self.state().add_device(name, table);
    }

    pub fn add_pool(&self, name: &str) {
        let table = vec![TableEntry::new(
            0,
            2048,
            "thin-pool".into(),
            "7:1 7:0 128 32768 1 skip_block_zeroing".into(),
        )];
        self.state().add_device(name, table).pool = Some(FakePool::default());
    }

    pub fn set_flags(&self, name: &str, flags: DmFlags) {
        if let Some(device) = self.state().devices.get_mut(name) {
            device.flags |= flags;
        }
    }

    pub fn set_open(&self, name: &str, open_count: i32) {
        if let Some(device) = self.state().devices.get_mut(name) {
            device.open_count = open_count;
        }
    }

    pub fn set_deps(&self, name: &str, deps: Vec<Device>) {
        if let Some(device) = self.state().devices.get_mut(name) {
            device.deps = deps;
        }
    }

    pub fn thin_ids(&self, pool: &str) -> Vec<u32> {
        self.state()
            .devices
            .get(pool)
            .and_then(|d| d.pool.as_ref())
            .map(|p| p.thin_ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn last_message(&self, name: &str) -> Option<(u64, String)> {
        self.state()
            .devices
            .get(name)
            .and_then(|d| d.messages.last().cloned())
    }

    pub fn add_node(&self, name: &str) -> Option<AddNodeMode> {
        self.state().devices.get(name).and_then(|d| d.add_node)
    }

    pub fn last_cookie_flags(&self) -> Option<DmUdevFlags> {
        self.state().last_cookie_flags
    }

    pub fn dev_dir(&self) -> Option<PathBuf> {
        self.state().dev_dir.clone()
    }

    pub fn verbosity(&self) -> i32 {
        self.state().verbosity
    }

    pub fn has_callback(&self) -> bool {
        self.callback.read().unwrap().is_some()
    }

    pub fn block_devices(&self) -> &FakeBlockDevices {
        &self.blockdev
    }

    // Apply a target message to the pool it is sent to.
    fn message(&self, task: &FakeTask, state: &mut State) -> Result<(), Errno> {
        let name = task.name.as_deref().unwrap_or("");
        let device = state.devices.get_mut(name).ok_or(Errno::ENXIO)?;
        let message = task.message.clone().unwrap_or_default();
        device.messages.push((task.sector, message.clone()));

        let words = message.split(' ').collect::<Vec<_>>();
        if words == ["@cancel_deferred_remove"] {
            device.flags.remove(DmFlags::DM_DEFERRED_REMOVE);
            return Ok(());
        }

        let pool = device.pool.as_mut().ok_or(Errno::EINVAL)?;
        let arg = |i: usize| -> Result<u64, Errno> {
            words
                .get(i)
                .and_then(|w| w.parse::<u64>().ok())
                .ok_or(Errno::EINVAL)
        };
        match words.first().copied() {
            Some("create_thin") => {
                if !pool.thin_ids.insert(arg(1)? as u32) {
                    return Err(Errno::EEXIST);
                }
            }
            Some("create_snap") => {
                let (new, base) = (arg(1)? as u32, arg(2)? as u32);
                if pool.thin_ids.contains(&new) {
                    return Err(Errno::EEXIST);
                }
                if !pool.thin_ids.contains(&base) {
                    return Err(Errno::ENODATA);
                }
                pool.thin_ids.insert(new);
            }
            Some("delete") => {
                if !pool.thin_ids.remove(&(arg(1)? as u32)) {
                    return Err(Errno::ENODATA);
                }
            }
            Some("set_transaction_id") => {
                if arg(1)? != pool.transaction_id {
                    return Err(Errno::EINVAL);
                }
                pool.transaction_id = arg(2)?;
            }
            _ => return Err(Errno::EINVAL),
        }
        Ok(())
    }

    // Apply a run task to the devices. Returns its output, or the errno
    // the driver would have failed with.
    fn apply(&self, task: &FakeTask) -> Result<Output, Errno> {
        let mut state = self.state();
        let name = task.name.clone().unwrap_or_default();
        let mut output = Output::default();

        match task.kind {
            TaskKind::Create => {
                if state.devices.contains_key(&name) {
                    return Err(Errno::EEXIST);
                }
                let device = state.add_device(&name, task.targets.clone());
                device.add_node = Some(task.add_node);
                if task.read_only {
                    device.flags |= DmFlags::DM_READONLY;
                }
                output.info = device.info();
            }
            TaskKind::Reload => {
                let device = state.devices.get_mut(&name).ok_or(Errno::ENXIO)?;
                device.inactive = Some(task.targets.clone());
                device.flags |= DmFlags::DM_INACTIVE_PRESENT;
                output.info = device.info();
            }
            TaskKind::Remove => {
                let device = state.devices.get_mut(&name).ok_or(Errno::ENXIO)?;
                if device.open_count > 0 {
                    if !task.deferred_remove {
                        return Err(Errno::EBUSY);
                    }
                    device.flags |= DmFlags::DM_DEFERRED_REMOVE;
                    output.info = device.info();
                } else {
                    state.devices.remove(&name);
                }
            }
            TaskKind::RemoveAll => {
                state.devices.retain(|_, d| d.open_count > 0);
            }
            TaskKind::Suspend => {
                let device = state.devices.get_mut(&name).ok_or(Errno::ENXIO)?;
                device.flags |= DmFlags::DM_SUSPEND;
                output.info = device.info();
            }
            TaskKind::Resume => {
                let device = state.devices.get_mut(&name).ok_or(Errno::ENXIO)?;
                device.flags.remove(DmFlags::DM_SUSPEND);
                if let Some(table) = device.inactive.take() {
                    device.table = table;
                    device.flags.remove(DmFlags::DM_INACTIVE_PRESENT);
                    device.event_nr += 1;
                }
                output.info = device.info();
            }
            TaskKind::Info | TaskKind::MakeNodes | TaskKind::Status | TaskKind::Table => {
                if let Some(device) = state.devices.get(&name) {
                    output.info = device.info();
                    output.deferred = device.flags.contains(DmFlags::DM_DEFERRED_REMOVE);
                    if matches!(task.kind, TaskKind::Status | TaskKind::Table) {
                        output.table = device.table.clone();
                    }
                }
            }
            TaskKind::Deps => {
                let device = state.devices.get(&name).ok_or(Errno::ENXIO)?;
                output.info = device.info();
                output.deps = device.deps.clone();
            }
            TaskKind::Rename => {
                let new_name = task.new_name.clone().ok_or(Errno::EINVAL)?;
                if state.devices.contains_key(&new_name) {
                    return Err(Errno::EEXIST);
                }
                let device = state.devices.remove(&name).ok_or(Errno::ENXIO)?;
                state.devices.insert(new_name, device);
            }
            TaskKind::Version => output.version = Some("4.48.0".into()),
            TaskKind::List => {
                output.names = state
                    .devices
                    .iter()
                    .map(|(name, d)| {
                        (
                            DmNameBuf::new(name.clone()).unwrap(),
                            Device {
                                major: 253,
                                minor: d.minor,
                            },
                        )
                    })
                    .collect();
            }
            TaskKind::Clear => {
                let device = state.devices.get_mut(&name).ok_or(Errno::ENXIO)?;
                device.inactive = None;
                device.flags.remove(DmFlags::DM_INACTIVE_PRESENT);
            }
            TaskKind::TargetMsg => self.message(task, &mut state)?,
            TaskKind::WaitEvent | TaskKind::ListVersions | TaskKind::SetGeometry => (),
        }

        Ok(output)
    }
}

impl DmControl for FakeControl {
    type Handle = FakeTask;

    fn task_create(&self, kind: TaskKind) -> Option<FakeTask> {
        let mut state = self.state();
        if state.faults.contains(&Fault::Create(kind)) {
            return None;
        }
        state.created += 1;
        Some(FakeTask {
            kind,
            name: None,
            new_name: None,
            message: None,
            sector: 0,
            add_node: AddNodeMode::default(),
            read_only: false,
            deferred_remove: false,
            targets: Vec::new(),
            output: None,
        })
    }

    fn task_set_name(&self, task: &mut FakeTask, name: &DmName) -> NativeResult<()> {
        self.check_setter(TaskSetter::Name)?;
        task.name = Some(name.as_str().to_owned());
        Ok(())
    }

    fn task_set_new_name(&self, task: &mut FakeTask, name: &DmName) -> NativeResult<()> {
        self.check_setter(TaskSetter::NewName)?;
        task.new_name = Some(name.as_str().to_owned());
        Ok(())
    }

    fn task_set_message(&self, task: &mut FakeTask, message: &str) -> NativeResult<()> {
        self.check_setter(TaskSetter::Message)?;
        task.message = Some(message.to_owned());
        Ok(())
    }

    fn task_set_sector(&self, task: &mut FakeTask, sector: u64) -> NativeResult<()> {
        self.check_setter(TaskSetter::Sector)?;
        task.sector = sector;
        Ok(())
    }

    fn task_set_event_nr(&self, _task: &mut FakeTask, _event_nr: u32) -> NativeResult<()> {
        self.check_setter(TaskSetter::EventNr)
    }

    fn task_set_add_node(&self, task: &mut FakeTask, mode: AddNodeMode) -> NativeResult<()> {
        self.check_setter(TaskSetter::AddNode)?;
        task.add_node = mode;
        Ok(())
    }

    fn task_set_ro(&self, task: &mut FakeTask) -> NativeResult<()> {
        self.check_setter(TaskSetter::ReadOnly)?;
        task.read_only = true;
        Ok(())
    }

    fn task_deferred_remove(&self, task: &mut FakeTask) -> NativeResult<()> {
        self.check_setter(TaskSetter::DeferredRemove)?;
        task.deferred_remove = true;
        Ok(())
    }

    fn task_add_target(
        &self,
        task: &mut FakeTask,
        start: u64,
        size: u64,
        target_type: &str,
        params: &str,
    ) -> NativeResult<()> {
        self.check_setter(TaskSetter::AddTarget)?;
        task.targets.push(TableEntry::new(
            start,
            size,
            target_type.to_owned(),
            params.to_owned(),
        ));
        Ok(())
    }

    fn task_set_cookie(
        &self,
        _task: &mut FakeTask,
        cookie: &mut u32,
        flags: DmUdevFlags,
    ) -> NativeResult<()> {
        self.check_setter(TaskSetter::Cookie)?;
        let mut state = self.state();
        state.next_cookie += 1;
        *cookie = 0x0d4d_0000 | state.next_cookie;
        state.last_cookie_flags = Some(flags);
        Ok(())
    }

    fn task_run(&self, task: &mut FakeTask) -> NativeResult<()> {
        let faults = {
            let mut state = self.state();
            *state.runs.entry(task.kind).or_insert(0) += 1;
            state
                .faults
                .iter()
                .filter(|f| matches!(f, Fault::Run(k) | Fault::RunErrno(k, _) if *k == task.kind))
                .copied()
                .collect::<Vec<_>>()
        };

        if !faults.is_empty() {
            for fault in faults {
                match fault {
                    Fault::RunErrno(_, errno) => {
                        let _ = self.fail_errno(task, errno);
                    }
                    _ => self.emit(None, format!("device-mapper: {} failed", task.kind)),
                }
            }
            return Err(Rejected);
        }

        match self.apply(task) {
            Ok(output) => {
                task.output = Some(output);
                Ok(())
            }
            Err(errno) => self.fail_errno(task, errno),
        }
    }

    fn task_get_info(&self, task: &FakeTask) -> NativeResult<DeviceInfo> {
        task.output.as_ref().map(|o| o.info.clone()).ok_or(Rejected)
    }

    fn task_get_info_with_deferred(&self, task: &FakeTask) -> NativeResult<DeviceInfo> {
        let output = task.output.as_ref().ok_or(Rejected)?;
        if output.info.exists() {
            Ok(output.info.clone().with_deferred_remove(output.deferred))
        } else {
            Ok(output.info.clone())
        }
    }

    fn task_get_deps(&self, task: &FakeTask) -> NativeResult<DependencySet> {
        let output = task.output.as_ref().ok_or(Rejected)?;
        Ok(DependencySet::new(output.deps.clone()))
    }

    fn task_get_driver_version(&self, task: &FakeTask) -> NativeResult<String> {
        task.output
            .as_ref()
            .and_then(|o| o.version.clone())
            .ok_or(Rejected)
    }

    fn task_get_names(&self, task: &FakeTask) -> NativeResult<Vec<(DmNameBuf, Device)>> {
        let output = task.output.as_ref().ok_or(Rejected)?;
        Ok(output.names.clone())
    }

    fn task_get_next_target(&self, task: &FakeTask, cursor: usize) -> Option<(usize, TableEntry)> {
        let entry = task.output.as_ref()?.table.get(cursor)?.clone();
        self.state().targets_decoded += 1;
        Some((cursor + 1, entry))
    }

    fn task_destroy(&self, _task: FakeTask) {
        self.state().destroyed += 1;
    }

    fn set_dev_dir(&self, dir: &Path) -> NativeResult<()> {
        let mut state = self.state();
        if state.refuse_dev_dir {
            return Err(Rejected);
        }
        state.dev_dir = Some(dir.to_owned());
        Ok(())
    }

    fn library_version(&self) -> NativeResult<String> {
        Ok("fake".into())
    }

    fn udev_sync_supported(&self) -> bool {
        self.state().udev_sync
    }

    fn udev_set_sync_support(&self, enable: bool) {
        self.state().udev_sync = enable;
    }

    fn cookie_supported(&self) -> bool {
        true
    }

    fn udev_wait(&self, cookie: u32) -> NativeResult<()> {
        let fail = {
            let mut state = self.state();
            state.waits += 1;
            state.fail_udev_wait
        };
        if fail {
            self.emit(None, format!("udev wait on cookie {cookie} failed"));
            return Err(Rejected);
        }
        Ok(())
    }

    fn log_init_verbose(&self, level: i32) {
        self.state().verbosity = level;
    }

    fn register_diagnostic_callback(&self, callback: DiagnosticCallback) {
        *self.callback.write().unwrap() = Some(callback);
    }
}

/// Block device sizes, set by the test.
#[derive(Clone, Debug, Default)]
pub struct FakeBlockDevices {
    sizes: Arc<Mutex<HashMap<PathBuf, Bytes>>>,
}

impl FakeBlockDevices {
    pub fn new() -> FakeBlockDevices {
        FakeBlockDevices::default()
    }

    pub fn set_size(&self, path: &Path, size: Bytes) {
        self.sizes.lock().unwrap().insert(path.to_owned(), size);
    }
}

impl BlockDevices for FakeBlockDevices {
    fn size(&self, path: &Path) -> DmResult<Bytes> {
        self.sizes
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .ok_or_else(|| {
                DmError::Core(errors::Error::GeneralIo(format!(
                    "{}: no such block device",
                    path.display()
                )))
            })
    }
}

impl DmContext<FakeControl> {
    /// The block devices the context's pools are made of.
    pub fn blockdev_fake(&self) -> &FakeBlockDevices {
        self.control().block_devices()
    }
}

/// A context over a fresh fake, configured by `config`.
pub fn fake_context_with(config: &DmConfig) -> DmContext<FakeControl> {
    init_logger();
    let control = FakeControl::new();
    let blockdev = control.block_devices().clone();
    DmContext::new(control, Box::new(blockdev), config).unwrap()
}

/// A context over a fresh fake, with the default configuration.
pub fn fake_context() -> DmContext<FakeControl> {
    fake_context_with(&DmConfig::default())
}
