// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The devicemapper udev cookie protocol.
//!
//! A cookie names a SysV semaphore. Setting a cookie on a task creates the
//! semaphore with a count of 2. udev decrements it once rule processing
//! for the uevent tagged with the cookie is done; if the task generated no
//! uevent the task itself takes udev's place. Waiting on the cookie takes
//! the final decrement, blocks until the count reaches zero and destroys
//! the semaphore.

cfg_if::cfg_if! {
    if #[cfg(target_os = "android")] {
        pub use self::sync_noop::{sync_supported, udev_wait, UdevSync};
    } else {
        pub use self::sync_semaphore::{sync_supported, udev_wait, UdevSync};
    }
}

#[cfg(not(target_os = "android"))]
mod sync_semaphore {
    use nix::libc::{
        c_int, key_t, sembuf, semctl as libc_semctl, semget as libc_semget,
        semop as libc_semop, EEXIST, IPC_CREAT, IPC_EXCL, IPC_NOWAIT, IPC_RMID,
    };
    use nix::unistd::{access, AccessFlags};

    use once_cell::sync::Lazy;

    use rand::Rng;
    use retry::{delay::NoDelay, retry, OperationResult};
    use std::{io, path::Path};

    use crate::{
        core::{
            dm_flags::DmUdevFlags,
            dm_ioctl as dmi, errors,
            sysvsem::{SemInfo, SemUn, GETVAL, SEM_INFO, SETVAL},
        },
        result::{DmError, DmResult},
    };

    // Mode for cookie semaphore creation
    const COOKIE_MODE: i32 = 0o600;

    const UDEV_SOCKET_PATH: &str = "/run/udev/control";

    fn udev_sync_error_from_os() -> DmError {
        DmError::Core(errors::Error::UdevSync(
            io::Error::last_os_error().to_string(),
        ))
    }

    static SYSV_SEM_SUPPORTED: Lazy<bool> = Lazy::new(sysv_sem_supported);

    /// Test whether the system is configured for SysV semaphore support.
    fn sysv_sem_supported() -> bool {
        let mut info = SemInfo::default();
        let arg = SemUn { info: &mut info };
        match semctl(0, 0, SEM_INFO, Some(arg)) {
            Ok(maxid) if maxid < 0 => {
                warn!(concat!(
                    "Kernel not configured for System V IPC semaphores. ",
                    "Disabling udev notifications."
                ));
                false
            }
            Err(err) => {
                error!(
                    concat!(
                        "Error retrieving System V semaphore limits: {}. ",
                        "Disabling udev notifications."
                    ),
                    err
                );
                false
            }
            Ok(_) => {
                if info.semmsl > 0 && info.semmni > 0 && info.semmns > 0 {
                    if info.semmsl < 1000 || info.semmni < 1000 || info.semmns < 1000 {
                        warn!(concat!(
                            "Low System V IPC semaphore limits detected: consider ",
                            "increasing values in /proc/sys/kernel/sem to avoid exhaustion."
                        ));
                    }
                    true
                } else {
                    false
                }
            }
        }
    }

    fn udev_running() -> bool {
        matches!(
            access(Path::new(UDEV_SOCKET_PATH), AccessFlags::F_OK),
            Ok(())
        )
    }

    /// Whether cookies can be backed by semaphores which udev will signal.
    pub fn sync_supported() -> bool {
        if !udev_running() {
            debug!("Udev daemon is not running, udev synchronization unavailable");
            return false;
        }
        *SYSV_SEM_SUPPORTED
    }

    /// Allocate or retrieve a SysV semaphore set identifier
    fn semget(key: i32, nsems: i32, semflg: i32) -> Result<i32, io::Error> {
        let semid = unsafe { libc_semget(key as key_t, nsems as c_int, semflg as c_int) };
        match semid {
            i if i < 0 => Err(io::Error::last_os_error()),
            _ => Ok(semid),
        }
    }

    fn semctl_cmd_allowed(cmd: i32) -> Result<(), io::Error> {
        match cmd {
            IPC_RMID | GETVAL | SETVAL | SEM_INFO => Ok(()),
            _ => Err(io::Error::from(io::ErrorKind::Unsupported)),
        }
    }

    /// SysV semaphore set control operations
    fn semctl(semid: i32, semnum: i32, cmd: i32, semun: Option<SemUn>) -> Result<i32, io::Error> {
        semctl_cmd_allowed(cmd)?;
        let semun = semun.unwrap_or_default();
        let r = unsafe { libc_semctl(semid as c_int, semnum as c_int, cmd as c_int, semun) };
        match r {
            i if i < 0 => Err(io::Error::last_os_error()),
            _ => Ok(r),
        }
    }

    /// Apply `sem_op` to the single semaphore of the set.
    fn semop(semid: i32, sem_op: i16, sem_flg: i16) -> Result<(), io::Error> {
        // DM protocol always uses the 0th semaphore in the set identified by semid
        let mut sb = sembuf {
            sem_num: 0,
            sem_op,
            sem_flg,
        };
        match unsafe { libc_semop(semid, &mut sb, 1) } {
            i if i < 0 => Err(io::Error::last_os_error()),
            _ => Ok(()),
        }
    }

    /// Attempt to generate a unique, non-zero SysV IPC key and allocate a semaphore
    /// set for notifications.
    fn generate_semaphore_cookie() -> OperationResult<(u32, i32), io::Error> {
        let mut base_cookie = 0u16;
        while base_cookie == 0 {
            base_cookie = rand::rng().random::<u16>();
        }
        let cookie = dmi::DM_COOKIE_MAGIC << dmi::DM_UDEV_FLAGS_SHIFT | u32::from(base_cookie);
        match semget(cookie as i32, 1, COOKIE_MODE | IPC_CREAT | IPC_EXCL) {
            Ok(semid) => OperationResult::Ok((cookie, semid)),
            Err(err) => match err.raw_os_error() {
                Some(EEXIST) => OperationResult::Retry(err),
                _ => OperationResult::Err(err),
            },
        }
    }

    /// Create a new, unique udev notification semaphore and return the cookie
    /// value and semid. The count starts at 1.
    fn notify_sem_create() -> DmResult<(u32, i32)> {
        let (cookie, semid) = match retry(NoDelay.take(4), generate_semaphore_cookie) {
            Ok((cookie, semid)) => (cookie, semid),
            Err(err) => {
                error!("Failed to generate udev notification semaphore: {}", err);
                return Err(DmError::Core(errors::Error::UdevSync(err.to_string())));
            }
        };
        let sem_arg = SemUn { val: 1 };
        if let Err(err) = semctl(semid, 0, SETVAL, Some(sem_arg)) {
            error!("Failed to initialize udev notification semaphore: {}", err);
            if let Err(err2) = notify_sem_destroy(cookie, semid) {
                error!("Failed to clean up udev notification semaphore: {}", err2);
            }
            return Err(DmError::Core(errors::Error::UdevSync(err.to_string())));
        }
        match semctl(semid, 0, GETVAL, None) {
            Ok(1) => Ok((cookie, semid)),
            _ => {
                error!(
                    "Initialization of udev notification semaphore returned inconsistent value."
                );
                if let Err(err2) = notify_sem_destroy(cookie, semid) {
                    error!("Failed to clean up udev notification semaphore: {}", err2);
                }
                Err(udev_sync_error_from_os())
            }
        }
    }

    /// Destroy the notification semaphore identified by semid.
    fn notify_sem_destroy(cookie: u32, semid: i32) -> DmResult<()> {
        if let Err(err) = semctl(semid, 0, IPC_RMID, None) {
            error!(
                "Failed to remove udev synchronization semaphore {} for cookie {}",
                semid, cookie
            );
            return Err(DmError::Core(errors::Error::UdevSync(err.to_string())));
        };
        Ok(())
    }

    /// Increment the semaphore identified by SysV IPC ID semid.
    fn notify_sem_inc(cookie: u32, semid: i32) -> DmResult<()> {
        semop(semid, 1, 0).map_err(|err| {
            error!(
                "Failed to increment udev synchronization semaphore {} for cookie {}",
                semid, cookie
            );
            DmError::Core(errors::Error::UdevSync(err.to_string()))
        })
    }

    /// Decrement the semaphore identified by SysV IPC ID semid.
    fn notify_sem_dec(cookie: u32, semid: i32) -> DmResult<()> {
        semop(semid, -1, IPC_NOWAIT as i16).map_err(|err| {
            error!(
                "Failed to decrement udev synchronization semaphore {} for cookie {}",
                semid, cookie
            );
            DmError::Core(errors::Error::UdevSync(err.to_string()))
        })
    }

    /// Wait for completion of notification semaphore identified by SysV IPC ID semid.
    ///
    /// This function blocks until the value of the first semaphore in the set
    /// identified by semid reaches zero (normally as a result of the dmsetup
    /// udev_complete invoked at the end of udev rule processing).
    ///
    /// A signal interrupting the wait does not end it; semop is never
    /// restarted by the kernel, so the wait is retried here.
    fn notify_sem_wait(cookie: u32, semid: i32) -> DmResult<()> {
        if let Err(err) = notify_sem_dec(cookie, semid) {
            error!(
                concat!(
                    "Failed to set initial state for notification ",
                    "semaphore identified by cookie value {}: {}"
                ),
                cookie, err
            );
            return Err(err);
        }
        loop {
            match semop(semid, 0, 0) {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                    trace!(
                        "Wait on notification semaphore {} for cookie {} interrupted, retrying",
                        semid,
                        cookie
                    );
                }
                Err(err) => {
                    error!(
                        "Failed to wait on notification semaphore {} for cookie {}",
                        semid, cookie
                    );
                    return Err(DmError::Core(errors::Error::UdevSync(err.to_string())));
                }
            }
        }
    }

    /// Block until udev has processed every uevent tagged with `cookie`,
    /// then destroy the cookie's semaphore. A zero cookie was never backed
    /// by a semaphore and needs no wait.
    pub fn udev_wait(cookie: u32) -> DmResult<()> {
        if cookie == 0 {
            return Ok(());
        }
        let semid = semget(cookie as i32, 1, 0).map_err(|err| {
            error!(
                "Failed to find udev notification semaphore for cookie {}: {}",
                cookie, err
            );
            DmError::Core(errors::Error::UdevSync(err.to_string()))
        })?;
        trace!("Waiting on udev cookie {} (semid {})", cookie, semid);
        let result = notify_sem_wait(cookie, semid);
        trace!("Destroying udev cookie {} (semid {})", cookie, semid);
        // The semaphore is system wide and outlives the process, so it
        // goes whatever the outcome of the wait.
        match result {
            Ok(()) => notify_sem_destroy(cookie, semid),
            Err(err) => {
                if let Err(err2) = notify_sem_destroy(cookie, semid) {
                    error!("Failed to clean up udev notification semaphore: {}", err2);
                }
                Err(err)
            }
        }
    }

    /// A cookie attached to a task which has not yet run.
    #[derive(Debug)]
    pub struct UdevSync {
        cookie: u32,
        semid: i32,
        flags: DmUdevFlags,
    }

    impl UdevSync {
        /// Allocate a semaphore according to the devicemapper udev cookie
        /// protocol and set its count to 2: one for udev, one for the
        /// eventual waiter.
        pub fn begin(flags: DmUdevFlags) -> DmResult<UdevSync> {
            let (cookie, semid) = notify_sem_create()?;

            if let Err(err) = notify_sem_inc(cookie, semid) {
                error!(
                    "Failed to set udev notification semaphore initial state: {}",
                    err
                );
                if let Err(err2) = notify_sem_destroy(cookie, semid) {
                    error!("Failed to clean up udev notification semaphore: {}", err2);
                }
                return Err(err);
            }

            debug!(
                "Created UdevSync {{ cookie: {}, semid: {} }}",
                cookie, semid
            );
            Ok(UdevSync {
                cookie,
                semid,
                flags,
            })
        }

        /// The value the waiter passes to `udev_wait`.
        pub fn cookie(&self) -> u32 {
            self.cookie
        }

        /// The event_nr header field of the ioctl which carries the cookie.
        pub fn event_nr(&self) -> u32 {
            self.flags.encode_event_nr(self.cookie)
        }

        /// Finish the transaction once the cookie-carrying ioctl returned.
        /// If the kernel generated no uevent udev will never decrement the
        /// semaphore, so take its place.
        pub fn end(self, uevent_generated: bool) -> DmResult<()> {
            if !uevent_generated {
                trace!("No uevent generated for {:?}", self);
                notify_sem_dec(self.cookie, self.semid)?;
            }
            Ok(())
        }

        /// Give up a transaction whose ioctl was never issued. The cookie
        /// stays valid for exactly one `udev_wait`.
        pub fn cancel(self) {
            trace!("Canceling {:?}", self);
            if let Err(err) = notify_sem_dec(self.cookie, self.semid) {
                error!("Failed to clear notification semaphore state: {}", err);
            }
        }
    }

}

#[cfg(target_os = "android")]
mod sync_noop {
    use crate::{core::dm_flags::DmUdevFlags, result::DmResult};

    pub fn sync_supported() -> bool {
        false
    }

    pub fn udev_wait(_cookie: u32) -> DmResult<()> {
        Ok(())
    }

    #[derive(Debug)]
    pub struct UdevSync {
        flags: DmUdevFlags,
    }

    impl UdevSync {
        pub fn begin(flags: DmUdevFlags) -> DmResult<UdevSync> {
            debug!("Created noop UdevSync {{ cookie: {}, semid: {} }}", 0, -1);
            Ok(UdevSync { flags })
        }

        pub fn cookie(&self) -> u32 {
            0
        }

        pub fn event_nr(&self) -> u32 {
            self.flags.bits() << crate::core::dm_ioctl::DM_UDEV_FLAGS_SHIFT
        }

        pub fn end(self, _uevent_generated: bool) -> DmResult<()> {
            trace!("Destroying noop {:?}", self);
            Ok(())
        }

        pub fn cancel(self) {
            trace!("Canceling noop {:?}", self);
        }
    }
}
