// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::Path;

use crate::{
    backend::{AddNodeMode, DmControl, TaskKind},
    context::DmContext,
    cookie::{CookieWait, UdevCookie},
    core::DmUdevFlags,
    result::DmResult,
    shared::SuspendGuard,
    signals::Signals,
    thindevid::ThinDevId,
    units::{Bytes, Sectors},
};

/// The target type of a thin device
pub const THIN_TARGET_NAME: &str = "thin";

impl<B: DmControl> DmContext<B> {
    /// Allocate the thin device `id` in `pool`. An id already in use is
    /// reported as `ErrorEnum::IdExists`, see `device_id_exists`.
    pub fn create_device(&self, pool: &str, id: ThinDevId) -> DmResult<()> {
        debug!("create_device START {} {}", pool, id);
        self.send_message(pool, &format!("create_thin {id}"), Signals::EXISTS)?;
        debug!("create_device END {} {}", pool, id);
        Ok(())
    }

    /// Release the thin device `id` of `pool` and the space it occupies.
    pub fn delete_device(&self, pool: &str, id: ThinDevId) -> DmResult<()> {
        debug!("delete_device START {} {}", pool, id);
        self.send_message(pool, &format!("delete {id}"), Signals::empty())?;
        debug!("delete_device END {} {}", pool, id);
        Ok(())
    }

    /// Activate the thin device `id` of `pool` as the device `name`, `size`
    /// bytes long. Reads of unprovisioned regions are served from
    /// `external`, if given.
    pub fn activate_device(
        &self,
        pool: &str,
        name: &str,
        id: ThinDevId,
        size: Bytes,
        external: Option<&Path>,
    ) -> DmResult<()> {
        debug!("activate_device START {} {} {}", pool, name, id);
        let mut task = self.task(TaskKind::Create, name)?;

        let mut params = format!("{pool} {id}");
        if let Some(external) = external {
            params.push(' ');
            params.push_str(&external.display().to_string());
        }
        task.add_target(Sectors(0), size.sectors(), THIN_TARGET_NAME, &params)?;
        task.set_add_node(AddNodeMode::OnCreate)?;

        let mut cookie = UdevCookie::new();
        task.set_cookie(Some(&mut cookie), DmUdevFlags::empty())?;
        let _wait = CookieWait::new(self.control(), cookie);
        task.run()?;
        debug!("activate_device END {} {} {}", pool, name, id);
        Ok(())
    }

    /// Allocate the thin device `new_id` in `pool` as a snapshot of the
    /// thin device `base_id`, without regard to whether the base is active.
    pub fn create_snap_device_raw(
        &self,
        pool: &str,
        new_id: ThinDevId,
        base_id: ThinDevId,
    ) -> DmResult<()> {
        self.send_message(
            pool,
            &format!("create_snap {new_id} {base_id}"),
            Signals::EXISTS,
        )
    }

    /// Allocate the thin device `new_id` in `pool` as a snapshot of the
    /// thin device `base_id`, which may be active as `base_name`.
    ///
    /// An active base is suspended while the snapshot is taken and resumed
    /// afterwards, whatever the outcome. If the snapshot was taken but the
    /// base could not be resumed, that is the error reported.
    pub fn create_snap_device(
        &self,
        pool: &str,
        new_id: ThinDevId,
        base_name: &str,
        base_id: ThinDevId,
    ) -> DmResult<()> {
        debug!("create_snap_device START {} {} {}", pool, new_id, base_name);
        let base_exists = match self.get_info(base_name) {
            Ok(info) => info.exists(),
            Err(err) => {
                debug!("Treating {} as inactive, no info: {}", base_name, err);
                false
            }
        };

        let guard = if base_exists {
            Some(SuspendGuard::suspend(self, base_name)?)
        } else {
            None
        };

        self.create_snap_device_raw(pool, new_id, base_id)?;

        if let Some(guard) = guard {
            guard.resume()?;
        }
        debug!("create_snap_device END {} {} {}", pool, new_id, base_name);
        Ok(())
    }
}
