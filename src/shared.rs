// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Protocols shared by pools and thin devices.

use crate::{
    backend::{DmControl, TaskKind},
    context::DmContext,
    cookie::{CookieWait, UdevCookie},
    core::DmUdevFlags,
    result::DmResult,
    signals::Signals,
};

impl<B: DmControl> DmContext<B> {
    /// Send `msg` to sector 0 of the target of `name`. A failure is
    /// classified by the conditions in `interest`.
    pub(crate) fn send_message(&self, name: &str, msg: &str, interest: Signals) -> DmResult<()> {
        let mut task = self.task(TaskKind::TargetMsg, name)?;
        task.set_sector(0)?;
        task.set_message(msg)?;
        self.bridge().run_classified(task, interest)?;
        Ok(())
    }

    /// Suspend the device `name`.
    pub fn suspend_device(&self, name: &str) -> DmResult<()> {
        debug!("suspend_device START {}", name);
        self.task(TaskKind::Suspend, name)?.run()?;
        debug!("suspend_device END {}", name);
        Ok(())
    }

    /// Resume the device `name`, and wait for udev to process the change.
    pub fn resume_device(&self, name: &str) -> DmResult<()> {
        debug!("resume_device START {}", name);
        let mut task = self.task(TaskKind::Resume, name)?;
        let mut cookie = UdevCookie::new();
        task.set_cookie(Some(&mut cookie), DmUdevFlags::empty())?;
        let _wait = CookieWait::new(self.control(), cookie);
        task.run()?;
        debug!("resume_device END {}", name);
        Ok(())
    }

    /// Remove the device `name`. A device which is in use is reported as
    /// `ErrorEnum::Busy`.
    pub fn remove_device(&self, name: &str) -> DmResult<()> {
        debug!("remove_device START {}", name);
        let mut task = self.task(TaskKind::Remove, name)?;
        let mut cookie = UdevCookie::new();
        task.set_cookie(Some(&mut cookie), DmUdevFlags::empty())?;
        let _wait = CookieWait::new(self.control(), cookie);
        self.bridge().run_classified(task, Signals::BUSY)?;
        debug!("remove_device END {}", name);
        Ok(())
    }

    /// Remove the device `name` once it is no longer open.
    pub fn remove_device_deferred(&self, name: &str) -> DmResult<()> {
        debug!("remove_device_deferred START {}", name);
        let mut task = self.task(TaskKind::Remove, name)?;
        task.set_deferred_remove()?;
        // Removal may happen long after this returns, so the node must be
        // left to udev rather than removed here.
        let mut cookie = UdevCookie::new();
        task.set_cookie(
            Some(&mut cookie),
            DmUdevFlags::DM_UDEV_DISABLE_LIBRARY_FALLBACK,
        )?;
        let _wait = CookieWait::new(self.control(), cookie);
        task.run()?;
        debug!("remove_device_deferred END {}", name);
        Ok(())
    }

    /// Cancel a deferred removal of `name`. A device which is being removed
    /// already is reported as `ErrorEnum::Busy` or `ErrorEnum::NoSuchDevice`.
    pub fn cancel_deferred_remove(&self, name: &str) -> DmResult<()> {
        debug!("cancel_deferred_remove START {}", name);
        self.send_message(
            name,
            "@cancel_deferred_remove",
            Signals::BUSY | Signals::NO_SUCH_DEVICE,
        )?;
        debug!("cancel_deferred_remove END {}", name);
        Ok(())
    }
}

/// Keeps a device suspended. The device is resumed when the guard is
/// dropped, or explicitly with `resume`.
pub struct SuspendGuard<'a, B: DmControl> {
    ctx: &'a DmContext<B>,
    name: String,
    suspended: bool,
}

impl<'a, B: DmControl> SuspendGuard<'a, B> {
    /// Suspend `name`.
    pub fn suspend(ctx: &'a DmContext<B>, name: &str) -> DmResult<SuspendGuard<'a, B>> {
        ctx.suspend_device(name)?;
        Ok(SuspendGuard {
            ctx,
            name: name.to_owned(),
            suspended: true,
        })
    }

    /// Resume the device now and report the outcome.
    pub fn resume(mut self) -> DmResult<()> {
        self.suspended = false;
        self.ctx.resume_device(&self.name)
    }
}

impl<B: DmControl> Drop for SuspendGuard<'_, B> {
    fn drop(&mut self) {
        if self.suspended {
            if let Err(err) = self.ctx.resume_device(&self.name) {
                error!("Failed to resume device {}: {}", self.name, err);
            }
        }
    }
}
