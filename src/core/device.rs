// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{fmt, str::FromStr};

use crate::{core::errors, result::DmError};

/// A struct containing the device's major and minor numbers
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy, Hash)]
pub struct Device {
    /// Device major number
    pub major: u32,
    /// Device minor number
    pub minor: u32,
}

/// Display format is the device number in "<major>:<minor>" format
impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

impl FromStr for Device {
    type Err = DmError;

    fn from_str(s: &str) -> Result<Device, DmError> {
        let invalid = |msg: String| DmError::Core(errors::Error::InvalidArgument(msg));
        let (major, minor) = s
            .split_once(':')
            .ok_or_else(|| invalid(format!("value \"{s}\" is not of the form major:minor")))?;
        let major = major
            .parse::<u32>()
            .map_err(|_| invalid(format!("could not parse \"{major}\" to obtain major number")))?;
        let minor = minor
            .parse::<u32>()
            .map_err(|_| invalid(format!("could not parse \"{minor}\" to obtain minor number")))?;
        Ok(Device { major, minor })
    }
}

/// The Linux kernel's kdev_t encodes major/minor values as mmmM MMmm.
impl Device {
    /// Make a Device from a kdev_t.
    pub fn from_kdev_t(val: u32) -> Device {
        Device {
            major: (val & 0xf_ff00) >> 8,
            minor: (val & 0xff) | ((val >> 12) & 0xf_ff00),
        }
    }

    /// Convert to a kdev_t. Return None if values are not expressible as a
    /// kdev_t.
    pub fn to_kdev_t(self) -> Option<u32> {
        if self.major > 0xfff || self.minor > 0xf_ffff {
            return None;
        }

        Some((self.minor & 0xff) | (self.major << 8) | ((self.minor & !0xff) << 12))
    }
}
