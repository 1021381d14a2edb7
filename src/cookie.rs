// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use crate::{
    backend::DmControl,
    core::errors,
    result::{DmError, DmResult},
};

/// Correlates a task with udev's processing of the uevents it causes.
///
/// A cookie is filled in by `Task::set_cookie` and must be waited on
/// exactly once afterwards, whatever the outcome of the run. It can not be
/// copied, and waiting consumes it.
#[derive(Debug, Default, Eq, PartialEq)]
pub struct UdevCookie {
    value: u32,
}

impl UdevCookie {
    /// A cookie not yet attached to any task.
    pub fn new() -> UdevCookie {
        UdevCookie::default()
    }

    /// The raw cookie value. 0 if there is nothing to wait for.
    pub fn value(&self) -> u32 {
        self.value
    }

    pub(crate) fn value_mut(&mut self) -> &mut u32 {
        &mut self.value
    }
}

/// Block until udev has finished with `cookie`.
pub fn udev_wait<B: DmControl>(control: &B, cookie: UdevCookie) -> DmResult<()> {
    control.udev_wait(cookie.value).map_err(|_| {
        debug!("Failed to wait on udev cookie {}", cookie.value);
        DmError::Core(errors::Error::UdevWait(cookie.value))
    })
}

/// Waits on a cookie when dropped, so that every exit path after the
/// cookie was attached also waits.
///
/// A failed wait is logged; udev may well have created the nodes anyway.
pub struct CookieWait<'a, B: DmControl> {
    control: &'a B,
    cookie: Option<UdevCookie>,
}

impl<'a, B: DmControl> CookieWait<'a, B> {
    /// Take responsibility for waiting on `cookie`.
    pub fn new(control: &'a B, cookie: UdevCookie) -> CookieWait<'a, B> {
        CookieWait {
            control,
            cookie: Some(cookie),
        }
    }

    /// Wait now and report the outcome.
    pub fn wait(mut self) -> DmResult<()> {
        match self.cookie.take() {
            Some(cookie) => udev_wait(self.control, cookie),
            None => Ok(()),
        }
    }
}

impl<B: DmControl> Drop for CookieWait<'_, B> {
    fn drop(&mut self) {
        if let Some(cookie) = self.cookie.take() {
            if let Err(err) = udev_wait(self.control, cookie) {
                warn!("{}", err);
            }
        }
    }
}
