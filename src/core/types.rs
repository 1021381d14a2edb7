// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{borrow::Borrow, fmt, ops::Deref};

use crate::{
    core::{dm_ioctl::DM_NAME_LEN, errors},
    result::{DmError, DmResult},
};

// Names end up in the fixed size name field of the ioctl header, NUL
// terminated.
fn check_name(value: &str) -> DmResult<()> {
    let reason = if !value.is_ascii() {
        format!("name {value} has some non-ascii characters")
    } else if value.is_empty() {
        "name has zero characters".to_owned()
    } else if value.contains('\0') {
        format!("name {value:?} contains a NUL character")
    } else if value.len() >= DM_NAME_LEN {
        format!(
            "name {} has {} chars which is greater than maximum allowed {}",
            value,
            value.len(),
            DM_NAME_LEN - 1
        )
    } else {
        return Ok(());
    };
    Err(DmError::Core(errors::Error::InvalidArgument(reason)))
}

/// A devicemapper name. Really just a string, but one which fits in the
/// name field of the ioctl header with its terminating NUL.
// Modeled on Path/PathBuf.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct DmName {
    inner: str,
}

/// The owned version of `DmName`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DmNameBuf {
    inner: String,
}

impl DmName {
    /// Borrow `value` as a name, if it is a valid one.
    pub fn new(value: &str) -> DmResult<&DmName> {
        check_name(value)?;
        Ok(unsafe { &*(value as *const str as *const DmName) })
    }

    /// The name as a `&str`.
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// The name as bytes, without a terminating NUL.
    pub fn as_bytes(&self) -> &[u8] {
        self.inner.as_bytes()
    }
}

impl DmNameBuf {
    /// Take ownership of `value` as a name, if it is a valid one.
    pub fn new(value: String) -> DmResult<DmNameBuf> {
        check_name(&value)?;
        Ok(DmNameBuf { inner: value })
    }
}

impl ToOwned for DmName {
    type Owned = DmNameBuf;
    fn to_owned(&self) -> DmNameBuf {
        DmNameBuf {
            inner: self.inner.to_owned(),
        }
    }
}

impl fmt::Display for DmName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.inner)
    }
}

impl fmt::Display for DmNameBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.inner)
    }
}

impl PartialEq<str> for DmName {
    fn eq(&self, other: &str) -> bool {
        &self.inner == other
    }
}

impl Deref for DmNameBuf {
    type Target = DmName;
    fn deref(&self) -> &DmName {
        DmName::new(&self.inner).expect("inner was checked on construction")
    }
}

impl AsRef<DmName> for DmNameBuf {
    fn as_ref(&self) -> &DmName {
        self
    }
}

impl Borrow<DmName> for DmNameBuf {
    fn borrow(&self) -> &DmName {
        self.deref()
    }
}
