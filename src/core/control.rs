// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The native task primitive over the devicemapper ioctl interface.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicI32, Ordering},
        RwLock,
    },
};

use nix::errno::Errno;
use once_cell::sync::OnceCell;
use semver::Version;

use crate::{
    backend::{
        verbosity_level, AddNodeMode, Diagnostic, DiagnosticCallback, DmControl, NativeResult,
        Rejected, TaskKind,
    },
    core::{
        device::Device,
        deviceinfo::DeviceInfo,
        dm::{encode_message, encode_targets, parse_deps, parse_name_list, parse_table, DM},
        dm_flags::{DmFlags, DmUdevFlags},
        dm_ioctl as dmi,
        dm_udev_sync::{sync_supported, udev_wait, UdevSync},
        errors,
        types::{DmName, DmNameBuf},
    },
    query::{DependencySet, TableEntry},
    result::{DmError, DmResult},
};

/// The first driver version which understands udev cookies.
const COOKIE_MIN_VERSION: Version = Version::new(4, 15, 0);

const DEFAULT_DEV_DIR: &str = "/dev";

/// A task destined for the devicemapper ioctl interface.
///
/// Nothing touches the kernel until the task runs.
#[derive(Debug)]
pub struct IoctlTask {
    kind: TaskKind,
    name: Option<DmNameBuf>,
    new_name: Option<DmNameBuf>,
    message: Option<String>,
    sector: u64,
    event_nr: u32,
    add_node: AddNodeMode,
    read_only: bool,
    deferred_remove: bool,
    targets: Vec<TableEntry>,
    sync: Option<UdevSync>,
    ran: bool,
    absent: bool,
    hdr: dmi::DmIoctl,
    data: Vec<u8>,
    table: Vec<TableEntry>,
}

impl IoctlTask {
    fn new(kind: TaskKind) -> IoctlTask {
        IoctlTask {
            kind,
            name: None,
            new_name: None,
            message: None,
            sector: 0,
            event_nr: 0,
            add_node: AddNodeMode::default(),
            read_only: false,
            deferred_remove: false,
            targets: Vec::new(),
            sync: None,
            ran: false,
            absent: false,
            hdr: dmi::DmIoctl::default(),
            data: Vec::new(),
            table: Vec::new(),
        }
    }

    fn describe(&self) -> String {
        match self.name {
            Some(ref name) => format!("{} ioctl on {}", self.kind, name),
            None => format!("{} ioctl", self.kind),
        }
    }

    // Kinds for which a missing device is reported as absent rather than
    // as a failure.
    fn absent_is_success(&self) -> bool {
        matches!(
            self.kind,
            TaskKind::Info | TaskKind::MakeNodes | TaskKind::Status | TaskKind::Table
        )
    }
}

/// Drives devicemapper through `<dev_dir>/mapper/control`.
///
/// The control node is opened on first use, after which the device
/// directory can no longer change.
pub struct IoctlControl {
    dev_dir: RwLock<PathBuf>,
    dm: OnceCell<DM>,
    udev_sync: AtomicBool,
    verbosity: AtomicI32,
    callback: RwLock<Option<DiagnosticCallback>>,
}

impl Default for IoctlControl {
    fn default() -> IoctlControl {
        IoctlControl::new()
    }
}

impl IoctlControl {
    /// A control using `/dev`, with udev synchronization enabled.
    pub fn new() -> IoctlControl {
        IoctlControl {
            dev_dir: RwLock::new(PathBuf::from(DEFAULT_DEV_DIR)),
            dm: OnceCell::new(),
            udev_sync: AtomicBool::new(true),
            verbosity: AtomicI32::new(0),
            callback: RwLock::new(None),
        }
    }

    fn dm(&self) -> DmResult<&DM> {
        self.dm.get_or_try_init(|| {
            let dev_dir = self.dev_dir.read().unwrap_or_else(|e| e.into_inner());
            DM::new(&dev_dir.join("mapper").join("control"))
        })
    }

    fn driver_version(&self) -> DmResult<Version> {
        let (major, minor, patch) = self.dm()?.version()?;
        Ok(Version::new(
            u64::from(major),
            u64::from(minor),
            u64::from(patch),
        ))
    }

    // Deliver a diagnostic to the registered callback, or failing that to
    // the log, subject to the configured verbosity.
    fn emit(&self, level: log::Level, line: u32, errno: Option<Errno>, message: String) {
        let diagnostic = Diagnostic {
            level,
            file: file!(),
            line,
            errno,
            message,
        };
        let callback = self.callback.read().unwrap_or_else(|e| e.into_inner());
        match *callback {
            Some(ref callback) => callback(&diagnostic),
            None => {
                if diagnostic.level <= verbosity_level(self.verbosity.load(Ordering::Relaxed)) {
                    log!(diagnostic.level, "{}", diagnostic.message);
                }
            }
        }
    }

    fn emit_error(&self, line: u32, context: &str, err: &DmError) {
        match err {
            DmError::Core(errors::Error::Ioctl(_, errno)) => self.emit(
                log::Level::Error,
                line,
                Some(*errno),
                format!("device-mapper: {} failed: {}", context, errno.desc()),
            ),
            err => self.emit(
                log::Level::Error,
                line,
                None,
                format!("device-mapper: {context} failed: {err}"),
            ),
        }
    }

    // Issue one ioctl for `task`. If `with_cookie`, the task's cookie, if
    // any, is attached to this ioctl and its transaction is finished.
    fn ioctl(
        &self,
        task: &mut IoctlTask,
        cmd: u8,
        flags: DmFlags,
        in_data: Option<&[u8]>,
        with_cookie: bool,
    ) -> DmResult<()> {
        let dm = self.dm()?;
        let mut hdr = DM::header(task.name.as_deref(), flags);
        hdr.event_nr = task.event_nr;

        let sync = if with_cookie { task.sync.take() } else { None };
        if let Some(ref sync) = sync {
            hdr.event_nr = sync.event_nr();
        }

        let result = dm.do_ioctl(cmd, &mut hdr, in_data);

        if let Some(sync) = sync {
            let generated = result.is_ok()
                && DmFlags::from_bits_truncate(hdr.flags).contains(DmFlags::DM_UEVENT_GENERATED);
            if let Err(err) = sync.end(generated) {
                error!("Failed to finish udev transaction: {}", err);
            }
        }

        task.data = result?;
        task.hdr = hdr;
        Ok(())
    }

    fn run_create(&self, task: &mut IoctlTask) -> DmResult<()> {
        trace!("Creating {}, node added {:?}", task.describe(), task.add_node);
        let flags = if task.read_only {
            DmFlags::DM_READONLY
        } else {
            DmFlags::empty()
        };

        if task.targets.is_empty() {
            return self.ioctl(task, dmi::DM_DEV_CREATE_CMD, flags, None, true);
        }

        let targets = encode_targets(&task.targets)?;
        self.ioctl(task, dmi::DM_DEV_CREATE_CMD, flags, None, false)?;

        if let Err(err) = self.ioctl(
            task,
            dmi::DM_TABLE_LOAD_CMD,
            flags,
            Some(&targets),
            false,
        ) {
            if let Err(err2) =
                self.ioctl(task, dmi::DM_DEV_REMOVE_CMD, DmFlags::empty(), None, false)
            {
                error!(
                    "Failed to remove {} after its table failed to load: {}",
                    task.describe(),
                    err2
                );
            }
            return Err(err);
        }

        self.ioctl(task, dmi::DM_DEV_SUSPEND_CMD, DmFlags::empty(), None, true)
    }

    fn run_ioctls(&self, task: &mut IoctlTask) -> DmResult<()> {
        match task.kind {
            TaskKind::Create => self.run_create(task),
            TaskKind::Reload => {
                let targets = encode_targets(&task.targets)?;
                let flags = if task.read_only {
                    DmFlags::DM_READONLY
                } else {
                    DmFlags::empty()
                };
                self.ioctl(task, dmi::DM_TABLE_LOAD_CMD, flags, Some(&targets), true)
            }
            TaskKind::Remove => {
                let flags = if task.deferred_remove {
                    DmFlags::DM_DEFERRED_REMOVE
                } else {
                    DmFlags::empty()
                };
                self.ioctl(task, dmi::DM_DEV_REMOVE_CMD, flags, None, true)
            }
            TaskKind::RemoveAll => {
                self.ioctl(task, dmi::DM_REMOVE_ALL_CMD, DmFlags::empty(), None, true)
            }
            TaskKind::Suspend => {
                self.ioctl(task, dmi::DM_DEV_SUSPEND_CMD, DmFlags::DM_SUSPEND, None, false)
            }
            TaskKind::Resume => {
                self.ioctl(task, dmi::DM_DEV_SUSPEND_CMD, DmFlags::empty(), None, true)
            }
            TaskKind::Info | TaskKind::MakeNodes => {
                self.ioctl(task, dmi::DM_DEV_STATUS_CMD, DmFlags::empty(), None, true)
            }
            TaskKind::Deps => {
                self.ioctl(task, dmi::DM_TABLE_DEPS_CMD, DmFlags::empty(), None, true)
            }
            TaskKind::Rename => {
                let mut data = task
                    .new_name
                    .as_ref()
                    .ok_or_else(|| {
                        DmError::Core(errors::Error::InvalidArgument(
                            "rename requires a new name".into(),
                        ))
                    })?
                    .as_bytes()
                    .to_vec();
                data.push(b'\0');
                self.ioctl(task, dmi::DM_DEV_RENAME_CMD, DmFlags::empty(), Some(&data), true)
            }
            TaskKind::Version => {
                self.ioctl(task, dmi::DM_VERSION_CMD, DmFlags::empty(), None, true)
            }
            TaskKind::Status => {
                self.ioctl(task, dmi::DM_TABLE_STATUS_CMD, DmFlags::empty(), None, true)
            }
            TaskKind::Table => self.ioctl(
                task,
                dmi::DM_TABLE_STATUS_CMD,
                DmFlags::DM_STATUS_TABLE,
                None,
                true,
            ),
            // The header's event_nr is the event to wait past, so no
            // cookie can ride along.
            TaskKind::WaitEvent => {
                self.ioctl(task, dmi::DM_DEV_WAIT_CMD, DmFlags::empty(), None, false)
            }
            TaskKind::List => {
                self.ioctl(task, dmi::DM_LIST_DEVICES_CMD, DmFlags::empty(), None, true)
            }
            TaskKind::Clear => {
                self.ioctl(task, dmi::DM_TABLE_CLEAR_CMD, DmFlags::empty(), None, true)
            }
            TaskKind::ListVersions => {
                self.ioctl(task, dmi::DM_LIST_VERSIONS_CMD, DmFlags::empty(), None, true)
            }
            TaskKind::TargetMsg => {
                let data = encode_message(task.sector, task.message.as_deref().unwrap_or(""));
                self.ioctl(task, dmi::DM_TARGET_MSG_CMD, DmFlags::empty(), Some(&data), true)
            }
            TaskKind::SetGeometry => {
                let mut data = task.message.clone().unwrap_or_default().into_bytes();
                data.push(b'\0');
                self.ioctl(
                    task,
                    dmi::DM_DEV_SET_GEOMETRY_CMD,
                    DmFlags::empty(),
                    Some(&data),
                    true,
                )
            }
        }
    }

    // Every native call which needs a run task goes through here.
    fn ran<'t>(&self, task: &'t IoctlTask, what: &str) -> NativeResult<&'t IoctlTask> {
        if task.ran {
            Ok(task)
        } else {
            self.emit(
                log::Level::Error,
                line!(),
                None,
                format!("device-mapper: {what} requested before {} ran", task.describe()),
            );
            Err(Rejected)
        }
    }
}

impl DmControl for IoctlControl {
    type Handle = IoctlTask;

    fn task_create(&self, kind: TaskKind) -> Option<IoctlTask> {
        Some(IoctlTask::new(kind))
    }

    fn task_set_name(&self, task: &mut IoctlTask, name: &DmName) -> NativeResult<()> {
        task.name = Some(name.to_owned());
        Ok(())
    }

    fn task_set_new_name(&self, task: &mut IoctlTask, name: &DmName) -> NativeResult<()> {
        task.new_name = Some(name.to_owned());
        Ok(())
    }

    fn task_set_message(&self, task: &mut IoctlTask, message: &str) -> NativeResult<()> {
        task.message = Some(message.to_owned());
        Ok(())
    }

    fn task_set_sector(&self, task: &mut IoctlTask, sector: u64) -> NativeResult<()> {
        task.sector = sector;
        Ok(())
    }

    fn task_set_event_nr(&self, task: &mut IoctlTask, event_nr: u32) -> NativeResult<()> {
        task.event_nr = event_nr;
        Ok(())
    }

    fn task_set_add_node(&self, task: &mut IoctlTask, mode: AddNodeMode) -> NativeResult<()> {
        // Nodes are created by udev in either case; the mode only tells
        // when the caller expects them.
        task.add_node = mode;
        Ok(())
    }

    fn task_set_ro(&self, task: &mut IoctlTask) -> NativeResult<()> {
        task.read_only = true;
        Ok(())
    }

    fn task_deferred_remove(&self, task: &mut IoctlTask) -> NativeResult<()> {
        if task.kind != TaskKind::Remove {
            self.emit(
                log::Level::Error,
                line!(),
                None,
                format!("device-mapper: deferred remove is only valid for remove, not {}", task.kind),
            );
            return Err(Rejected);
        }
        task.deferred_remove = true;
        Ok(())
    }

    fn task_add_target(
        &self,
        task: &mut IoctlTask,
        start: u64,
        size: u64,
        target_type: &str,
        params: &str,
    ) -> NativeResult<()> {
        if target_type.len() >= dmi::DM_MAX_TYPE_NAME || target_type.contains('\0') {
            self.emit(
                log::Level::Error,
                line!(),
                None,
                format!("device-mapper: invalid target type {target_type:?}"),
            );
            return Err(Rejected);
        }
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
        task: &mut IoctlTask,
        cookie: &mut u32,
        flags: DmUdevFlags,
    ) -> NativeResult<()> {
        if task.sync.is_some() {
            self.emit(
                log::Level::Error,
                line!(),
                None,
                format!("device-mapper: {} already has a cookie", task.describe()),
            );
            return Err(Rejected);
        }

        if !self.udev_sync_supported() || !self.cookie_supported() {
            trace!("Udev synchronization unavailable, no cookie for {}", task.describe());
            *cookie = 0;
            return Ok(());
        }

        match UdevSync::begin(flags) {
            Ok(sync) => {
                *cookie = sync.cookie();
                task.sync = Some(sync);
                Ok(())
            }
            Err(err) => {
                self.emit_error(line!(), "udev cookie creation", &err);
                Err(Rejected)
            }
        }
    }

    fn task_run(&self, task: &mut IoctlTask) -> NativeResult<()> {
        if task.ran {
            self.emit(
                log::Level::Error,
                line!(),
                None,
                format!("device-mapper: {} already ran", task.describe()),
            );
            return Err(Rejected);
        }

        let result = self.run_ioctls(task);
        task.ran = true;

        // A cookie which never rode on an ioctl still gets one waiter.
        if let Some(sync) = task.sync.take() {
            sync.cancel();
        }

        match result {
            Ok(()) => {
                if matches!(task.kind, TaskKind::Status | TaskKind::Table) {
                    task.table = parse_table(task.hdr.target_count, &task.data);
                }
                Ok(())
            }
            Err(DmError::Core(errors::Error::Ioctl(_, Errno::ENXIO)))
                if task.absent_is_success() =>
            {
                task.absent = true;
                Ok(())
            }
            Err(err) => {
                self.emit_error(line!(), &task.describe(), &err);
                Err(Rejected)
            }
        }
    }

    fn task_get_info(&self, task: &IoctlTask) -> NativeResult<DeviceInfo> {
        let task = self.ran(task, "info")?;
        if task.absent {
            return Ok(DeviceInfo::absent());
        }
        Ok(DeviceInfo::from_ioctl(&task.hdr, false))
    }

    fn task_get_info_with_deferred(&self, task: &IoctlTask) -> NativeResult<DeviceInfo> {
        let task = self.ran(task, "info")?;
        if task.absent {
            return Ok(DeviceInfo::absent());
        }
        Ok(DeviceInfo::from_ioctl(&task.hdr, true))
    }

    fn task_get_deps(&self, task: &IoctlTask) -> NativeResult<DependencySet> {
        let task = self.ran(task, "deps")?;
        if task.kind != TaskKind::Deps {
            return Err(Rejected);
        }
        Ok(DependencySet::new(parse_deps(&task.data)))
    }

    fn task_get_driver_version(&self, task: &IoctlTask) -> NativeResult<String> {
        let task = self.ran(task, "driver version")?;
        if task.kind != TaskKind::Version {
            return Err(Rejected);
        }
        let [major, minor, patch] = task.hdr.version;
        Ok(format!("{major}.{minor}.{patch}"))
    }

    fn task_get_names(&self, task: &IoctlTask) -> NativeResult<Vec<(DmNameBuf, Device)>> {
        let task = self.ran(task, "names")?;
        if task.kind != TaskKind::List {
            return Err(Rejected);
        }
        Ok(parse_name_list(&task.data))
    }

    fn task_get_next_target(
        &self,
        task: &IoctlTask,
        cursor: usize,
    ) -> Option<(usize, TableEntry)> {
        task.table.get(cursor).map(|entry| (cursor + 1, entry.clone()))
    }

    fn task_destroy(&self, mut task: IoctlTask) {
        if let Some(sync) = task.sync.take() {
            sync.cancel();
        }
    }

    fn set_dev_dir(&self, dir: &Path) -> NativeResult<()> {
        if self.dm.get().is_some() {
            self.emit(
                log::Level::Error,
                line!(),
                None,
                format!(
                    "device-mapper: can't set device directory to {} once the control node is open",
                    dir.display()
                ),
            );
            return Err(Rejected);
        }
        *self.dev_dir.write().unwrap_or_else(|e| e.into_inner()) = dir.to_owned();
        Ok(())
    }

    fn library_version(&self) -> NativeResult<String> {
        Ok(env!("CARGO_PKG_VERSION").to_owned())
    }

    fn udev_sync_supported(&self) -> bool {
        self.udev_sync.load(Ordering::SeqCst) && sync_supported()
    }

    fn udev_set_sync_support(&self, enable: bool) {
        self.udev_sync.store(enable, Ordering::SeqCst);
    }

    fn cookie_supported(&self) -> bool {
        match self.driver_version() {
            Ok(version) => version >= COOKIE_MIN_VERSION,
            Err(err) => {
                debug!("Unable to determine driver version: {}", err);
                false
            }
        }
    }

    fn udev_wait(&self, cookie: u32) -> NativeResult<()> {
        udev_wait(cookie).map_err(|err| {
            self.emit_error(line!(), &format!("wait on udev cookie {cookie}"), &err);
            Rejected
        })
    }

    fn log_init_verbose(&self, level: i32) {
        self.verbosity.store(level, Ordering::Relaxed);
    }

    fn register_diagnostic_callback(&self, callback: DiagnosticCallback) {
        *self.callback.write().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::testing::{init_logger, test_name};

    use super::*;

    fn capture(control: &IoctlControl) -> Arc<Mutex<Vec<Diagnostic>>> {
        init_logger();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        control.register_diagnostic_callback(Box::new(move |d: &Diagnostic| {
            sink.lock().unwrap().push(d.clone());
        }));
        seen
    }

    #[test]
    /// A missing control node fails the run and says so through the
    /// callback.
    fn test_run_without_control_node() {
        let control = IoctlControl::new();
        let seen = capture(&control);
        assert_matches!(control.set_dev_dir(Path::new("/nonexistent/dev")), Ok(()));

        let mut task = control.task_create(TaskKind::Version).unwrap();
        assert_matches!(control.task_run(&mut task), Err(Rejected));
        control.task_destroy(task);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].level, log::Level::Error);
        assert!(seen[0].message.contains("/nonexistent/dev/mapper/control"));
    }

    #[test]
    /// Results are not available before the task runs, and a task runs
    /// only once.
    fn test_results_require_run() {
        let control = IoctlControl::new();
        let seen = capture(&control);
        let task = control.task_create(TaskKind::Info).unwrap();
        assert_matches!(control.task_get_info(&task), Err(Rejected));
        assert_eq!(control.task_get_next_target(&task, 0), None);
        control.task_destroy(task);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    /// Target types must fit the fixed size field of a target spec.
    fn test_add_target_type_too_long() {
        let control = IoctlControl::new();
        let _seen = capture(&control);
        let mut task = control.task_create(TaskKind::Reload).unwrap();
        assert_matches!(
            control.task_add_target(&mut task, 0, 8, &"t".repeat(dmi::DM_MAX_TYPE_NAME), ""),
            Err(Rejected)
        );
        assert_matches!(control.task_add_target(&mut task, 0, 8, "zero", ""), Ok(()));
        control.task_destroy(task);
    }

    #[test]
    /// Deferral only applies to removal.
    fn test_deferred_remove_kind() {
        let control = IoctlControl::new();
        let _seen = capture(&control);
        let mut task = control.task_create(TaskKind::Info).unwrap();
        assert_matches!(control.task_deferred_remove(&mut task), Err(Rejected));
        control.task_destroy(task);
        let mut task = control.task_create(TaskKind::Remove).unwrap();
        assert_matches!(control.task_deferred_remove(&mut task), Ok(()));
        control.task_destroy(task);
    }

    #[test]
    /// With synchronization off the cookie is 0 and nothing is allocated.
    fn test_cookie_without_sync() {
        let control = IoctlControl::new();
        control.udev_set_sync_support(false);
        assert!(!control.udev_sync_supported());

        let mut task = control.task_create(TaskKind::Resume).unwrap();
        let mut cookie = 17;
        assert_matches!(
            control.task_set_cookie(&mut task, &mut cookie, DmUdevFlags::empty()),
            Ok(())
        );
        assert_eq!(cookie, 0);
        control.task_destroy(task);
        assert_matches!(control.udev_wait(cookie), Ok(()));
    }

    #[test]
    fn test_library_version() {
        assert_eq!(
            IoctlControl::new().library_version().unwrap(),
            env!("CARGO_PKG_VERSION")
        );
    }

    #[test]
    #[ignore]
    /// Requires root. Check that the driver answers a version query.
    fn sudo_test_driver_version() {
        let control = IoctlControl::new();
        let mut task = control.task_create(TaskKind::Version).unwrap();
        assert_matches!(control.task_run(&mut task), Ok(()));
        let version = control.task_get_driver_version(&task).unwrap();
        assert!(version.starts_with("4."));
        control.task_destroy(task);
        assert!(control.cookie_supported());
    }

    #[test]
    #[ignore]
    /// Requires root. A device which is not there is absent, not an error,
    /// for info and table queries.
    fn sudo_test_absent_device() {
        let control = IoctlControl::new();
        let name = test_name("absent").unwrap();
        for kind in [TaskKind::Info, TaskKind::Table] {
            let mut task = control.task_create(kind).unwrap();
            control.task_set_name(&mut task, &name).unwrap();
            assert_matches!(control.task_run(&mut task), Ok(()));
            assert!(!control.task_get_info(&task).unwrap().exists());
            assert_eq!(control.task_get_next_target(&task, 0), None);
            control.task_destroy(task);
        }
    }

    #[test]
    #[ignore]
    /// Requires root. Create a device over a zero target, read its table
    /// and status back, then remove it.
    fn sudo_test_create_table_remove() {
        let control = IoctlControl::new();
        let name = test_name("zero").unwrap();

        let mut task = control.task_create(TaskKind::Create).unwrap();
        control.task_set_name(&mut task, &name).unwrap();
        control.task_add_target(&mut task, 0, 2048, "zero", "").unwrap();
        control.task_add_target(&mut task, 2048, 2048, "error", "").unwrap();
        let mut cookie = 0;
        control
            .task_set_cookie(&mut task, &mut cookie, DmUdevFlags::empty())
            .unwrap();
        assert_matches!(control.task_run(&mut task), Ok(()));
        let info = control.task_get_info(&task).unwrap();
        assert!(info.exists());
        assert!(info.live_table());
        control.task_destroy(task);
        assert_matches!(control.udev_wait(cookie), Ok(()));

        let mut task = control.task_create(TaskKind::Table).unwrap();
        control.task_set_name(&mut task, &name).unwrap();
        assert_matches!(control.task_run(&mut task), Ok(()));
        let (next, first) = control.task_get_next_target(&task, 0).unwrap();
        assert_eq!(first, TableEntry::new(0, 2048, "zero".into(), "".into()));
        let (next, second) = control.task_get_next_target(&task, next).unwrap();
        assert_eq!(second.target_type, "error");
        assert_eq!(control.task_get_next_target(&task, next), None);
        control.task_destroy(task);

        let mut task = control.task_create(TaskKind::Remove).unwrap();
        control.task_set_name(&mut task, &name).unwrap();
        let mut cookie = 0;
        control
            .task_set_cookie(&mut task, &mut cookie, DmUdevFlags::empty())
            .unwrap();
        assert_matches!(control.task_run(&mut task), Ok(()));
        control.task_destroy(task);
        assert_matches!(control.udev_wait(cookie), Ok(()));
    }
}
