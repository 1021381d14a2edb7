// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::Path;

use crate::{
    backend::{DmControl, TaskKind},
    context::DmContext,
    cookie::{CookieWait, UdevCookie},
    core::DmUdevFlags,
    result::DmResult,
    signals::Signals,
    task::Task,
    units::Sectors,
};

/// The target type of a thin pool
pub const THIN_POOL_TARGET_NAME: &str = "thin-pool";

/// The free space, in pool blocks, below which the pool raises an event
pub const THIN_POOL_LOW_WATER_MARK: u64 = 32768;

impl<B: DmControl> DmContext<B> {
    // The parameters of a thin-pool target over the given devices.
    fn pool_params(&self, data: &Path, metadata: &Path, block_size: Sectors) -> String {
        let feature_args = self.config().feature_args();
        let mut params = format!(
            "{} {} {} {} {}",
            metadata.display(),
            data.display(),
            *block_size,
            self.config().low_water_mark(),
            feature_args.len()
        );
        for arg in feature_args {
            params.push(' ');
            params.push_str(arg);
        }
        params
    }

    // Add a single thin-pool target spanning the whole data device.
    fn add_pool_target(
        &self,
        task: &mut Task<'_, B>,
        data: &Path,
        metadata: &Path,
        block_size: Sectors,
    ) -> DmResult<()> {
        let size = self.blockdev().size(data)?;
        task.add_target(
            Sectors(0),
            size.sectors(),
            THIN_POOL_TARGET_NAME,
            &self.pool_params(data, metadata, block_size),
        )
    }

    /// Create and activate the pool `pool` over the `data` and `metadata`
    /// devices, with data blocks of `block_size`.
    pub fn create_pool(
        &self,
        pool: &str,
        data: &Path,
        metadata: &Path,
        block_size: Sectors,
    ) -> DmResult<()> {
        debug!("create_pool START {}", pool);
        let mut task = self.task(TaskKind::Create, pool)?;
        self.add_pool_target(&mut task, data, metadata, block_size)?;

        let mut cookie = UdevCookie::new();
        task.set_cookie(Some(&mut cookie), DmUdevFlags::pool_rules())?;
        let _wait = CookieWait::new(self.control(), cookie);
        task.run()?;
        debug!("create_pool END {}", pool);
        Ok(())
    }

    /// Load a new table for `pool`. It takes effect when the pool is
    /// resumed.
    pub fn reload_pool(
        &self,
        pool: &str,
        data: &Path,
        metadata: &Path,
        block_size: Sectors,
    ) -> DmResult<()> {
        debug!("reload_pool START {}", pool);
        let mut task = self.task(TaskKind::Reload, pool)?;
        self.add_pool_target(&mut task, data, metadata, block_size)?;
        task.run()?;
        debug!("reload_pool END {}", pool);
        Ok(())
    }

    /// Change the transaction id of `pool` from `old` to `new`.
    pub fn set_transaction_id(&self, pool: &str, old: u64, new: u64) -> DmResult<()> {
        self.send_message(
            pool,
            &format!("set_transaction_id {old} {new}"),
            Signals::empty(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crate::{
        context::DmConfig,
        core::errors,
        query::TableEntry,
        result::DmError,
        testing::{fake_context, fake_context_with, Fault},
        units::{Bytes, IEC},
    };

    use super::*;

    const DATA: &str = "/dev/loop0";
    const META: &str = "/dev/loop1";

    #[test]
    /// The pool's single target spans the data device and its cookie
    /// disables the rules a pool does not need.
    fn test_create_pool() {
        let ctx = fake_context();
        ctx.blockdev_fake()
            .set_size(Path::new(DATA), Bytes(u128::from(IEC::Gi)));

        assert_matches!(
            ctx.create_pool("pool", Path::new(DATA), Path::new(META), Sectors(128)),
            Ok(())
        );
        assert_eq!(
            ctx.table_entries("pool").unwrap(),
            vec![TableEntry::new(
                0,
                2 * 1024 * 1024,
                THIN_POOL_TARGET_NAME.into(),
                "/dev/loop1 /dev/loop0 128 32768 1 skip_block_zeroing".into(),
            )]
        );
        assert_eq!(
            ctx.control().last_cookie_flags(),
            Some(DmUdevFlags::pool_rules())
        );
        assert_eq!(ctx.control().counters().waits, 1);
        assert_eq!(ctx.control().counters().live_handles, 0);
    }

    #[test]
    /// Pool parameters follow the configuration.
    fn test_create_pool_configured() {
        let mut config = DmConfig::default();
        config
            .set_low_water_mark(64)
            .set_feature_args(vec!["skip_block_zeroing".into(), "no_discard_passdown".into()]);
        let ctx = fake_context_with(&config);
        ctx.blockdev_fake().set_size(Path::new(DATA), Bytes(1024 * 1024));

        ctx.create_pool("pool", Path::new(DATA), Path::new(META), Sectors(128))
            .unwrap();
        assert_eq!(
            ctx.get_table("pool").unwrap().params,
            "/dev/loop1 /dev/loop0 128 64 2 skip_block_zeroing no_discard_passdown"
        );
    }

    #[test]
    /// A data device whose size is unknown creates nothing.
    fn test_create_pool_no_size() {
        let ctx = fake_context();
        assert_matches!(
            ctx.create_pool("pool", Path::new(DATA), Path::new(META), Sectors(128)),
            Err(DmError::Core(errors::Error::GeneralIo(_)))
        );
        assert_eq!(ctx.control().counters().runs(TaskKind::Create), 0);
        assert_eq!(ctx.control().counters().waits, 0);
        assert_eq!(ctx.control().counters().live_handles, 0);
    }

    #[test]
    /// A failed run still waits on the cookie.
    fn test_create_pool_run_failure() {
        let ctx = fake_context();
        ctx.blockdev_fake().set_size(Path::new(DATA), Bytes(1024 * 1024));
        ctx.control().inject(Fault::Run(TaskKind::Create));
        assert_matches!(
            ctx.create_pool("pool", Path::new(DATA), Path::new(META), Sectors(128)),
            Err(DmError::Core(errors::Error::TaskRun(_)))
        );
        assert_eq!(ctx.control().counters().waits, 1);
        assert_eq!(ctx.control().counters().live_handles, 0);
    }

    #[test]
    /// A reload loads an inactive table and attaches no cookie.
    fn test_reload_pool() {
        let ctx = fake_context();
        ctx.blockdev_fake().set_size(Path::new(DATA), Bytes(1024 * 1024));
        ctx.create_pool("pool", Path::new(DATA), Path::new(META), Sectors(128))
            .unwrap();

        let bigger = PathBuf::from("/dev/loop2");
        ctx.blockdev_fake().set_size(&bigger, Bytes(2 * 1024 * 1024));
        assert_matches!(
            ctx.reload_pool("pool", &bigger, Path::new(META), Sectors(128)),
            Ok(())
        );
        assert!(ctx.get_info("pool").unwrap().inactive_table());
        assert_eq!(ctx.control().counters().waits, 1);
    }

    #[test]
    fn test_set_transaction_id() {
        let ctx = fake_context();
        ctx.control().add_pool("pool");
        assert_matches!(ctx.set_transaction_id("pool", 0, 1), Ok(()));
        assert_eq!(
            ctx.control().last_message("pool"),
            Some((0, "set_transaction_id 0 1".to_owned()))
        );
        // The pool is at 1 now, so 0 is stale.
        assert_matches!(
            ctx.set_transaction_id("pool", 0, 2),
            Err(DmError::Core(errors::Error::TaskRun(_)))
        );
        assert_eq!(ctx.control().counters().live_handles, 0);
    }
}
