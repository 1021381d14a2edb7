// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use crate::{
    backend::{DmControl, TaskKind},
    blockdev::{BlockDevices, SysBlockDevices},
    core::{errors, IoctlControl},
    result::{DmError, DmResult},
    signals::{ErrorBridge, SignalPatterns},
    task::Task,
    thinpooldev::THIN_POOL_LOW_WATER_MARK,
};

/// Configuration applied to the native layer when a context is made.
///
/// ```
/// use dmtask::DmConfig;
///
/// let mut config = DmConfig::default();
/// config.set_udev_sync(false).set_verbosity(7);
/// assert!(!config.udev_sync());
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DmConfig {
    dev_dir: PathBuf,
    udev_sync: bool,
    verbosity: i32,
    low_water_mark: u64,
    feature_args: Vec<String>,
    patterns: SignalPatterns,
}

impl Default for DmConfig {
    fn default() -> DmConfig {
        DmConfig {
            dev_dir: PathBuf::from("/dev"),
            udev_sync: true,
            verbosity: 3,
            low_water_mark: THIN_POOL_LOW_WATER_MARK,
            feature_args: vec!["skip_block_zeroing".to_owned()],
            patterns: SignalPatterns::default(),
        }
    }
}

impl DmConfig {
    /// Set the directory device nodes live in.
    pub fn set_dev_dir(&mut self, dir: &Path) -> &mut Self {
        self.dev_dir = dir.to_owned();
        self
    }

    /// Enable or disable udev synchronization.
    pub fn set_udev_sync(&mut self, enable: bool) -> &mut Self {
        self.udev_sync = enable;
        self
    }

    /// Set the verbosity of the native layer.
    pub fn set_verbosity(&mut self, level: i32) -> &mut Self {
        self.verbosity = level;
        self
    }

    /// Set the low water mark of created pools, in pool blocks.
    pub fn set_low_water_mark(&mut self, blocks: u64) -> &mut Self {
        self.low_water_mark = blocks;
        self
    }

    /// Set the feature arguments of created pools.
    pub fn set_feature_args(&mut self, args: Vec<String>) -> &mut Self {
        self.feature_args = args;
        self
    }

    /// Set how busy, exists and no such device are recognized.
    pub fn set_patterns(&mut self, patterns: SignalPatterns) -> &mut Self {
        self.patterns = patterns;
        self
    }

    /// The directory device nodes live in
    pub fn dev_dir(&self) -> &Path {
        &self.dev_dir
    }

    /// Whether udev synchronization is enabled
    pub fn udev_sync(&self) -> bool {
        self.udev_sync
    }

    /// The verbosity of the native layer
    pub fn verbosity(&self) -> i32 {
        self.verbosity
    }

    /// The low water mark of created pools
    pub fn low_water_mark(&self) -> u64 {
        self.low_water_mark
    }

    /// The feature arguments of created pools
    pub fn feature_args(&self) -> &[String] {
        &self.feature_args
    }

    /// The recognized signal patterns
    pub fn patterns(&self) -> &SignalPatterns {
        &self.patterns
    }
}

/// Owns the native layer, the error bridge listening to it, the block
/// device collaborator and the configuration. Every protocol is a method
/// on a context.
pub struct DmContext<B: DmControl = IoctlControl> {
    control: B,
    blockdev: Box<dyn BlockDevices>,
    bridge: ErrorBridge,
    config: DmConfig,
}

impl<B: DmControl> fmt::Debug for DmContext<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmContext")
            .field("bridge", &self.bridge)
            .field("config", &self.config)
            .finish()
    }
}

impl DmContext<IoctlControl> {
    /// A context over the kernel's devicemapper.
    pub fn open(config: &DmConfig) -> DmResult<DmContext<IoctlControl>> {
        DmContext::new(IoctlControl::new(), Box::new(SysBlockDevices), config)
    }
}

impl<B: DmControl> DmContext<B> {
    /// Apply `config` to `control` and register the error bridge as its
    /// diagnostic callback.
    pub fn new(
        control: B,
        blockdev: Box<dyn BlockDevices>,
        config: &DmConfig,
    ) -> DmResult<DmContext<B>> {
        control
            .set_dev_dir(config.dev_dir())
            .map_err(|_| DmError::Core(errors::Error::SetDevDir(config.dev_dir().to_owned())))?;
        control.udev_set_sync_support(config.udev_sync());
        control.log_init_verbose(config.verbosity());

        let bridge = ErrorBridge::new(config.patterns().clone(), config.verbosity());
        control.register_diagnostic_callback(bridge.callback());

        debug!(
            "Initialized devicemapper context: dev dir {}, udev sync {}",
            config.dev_dir().display(),
            control.udev_sync_supported()
        );

        Ok(DmContext {
            control,
            blockdev,
            bridge,
            config: config.clone(),
        })
    }

    /// The native layer.
    pub fn control(&self) -> &B {
        &self.control
    }

    /// The error bridge.
    pub fn bridge(&self) -> &ErrorBridge {
        &self.bridge
    }

    /// The configuration the context was made with.
    pub fn config(&self) -> &DmConfig {
        &self.config
    }

    pub(crate) fn blockdev(&self) -> &dyn BlockDevices {
        self.blockdev.as_ref()
    }

    pub(crate) fn task(&self, kind: TaskKind, name: &str) -> DmResult<Task<'_, B>> {
        Task::create_named(&self.control, kind, name)
    }
}
