// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    fs::{File, OpenOptions},
    io,
    os::unix::{fs::MetadataExt, io::AsRawFd},
    path::Path,
};

use crate::{
    core::errors,
    result::{DmError, DmResult},
    units::Bytes,
};

// send IOCTL via blkgetsize64
nix::ioctl_read!(blkgetsize64, 0x12, 114, u64);

// discard a byte range of a block device, given as [offset, length]
nix::ioctl_write_ptr_bad!(blkdiscard, nix::request_code_none!(0x12, 119), [u64; 2]);

nix::ioctl_read_bad!(loop_get_status64, 0x4C05, LoopInfo64);

nix::ioctl_write_int_bad!(loop_set_capacity, 0x4C07);

/// The status of a loop device, as struct loop_info64 in linux/loop.h.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct LoopInfo64 {
    lo_device: u64,
    lo_inode: u64,
    lo_rdevice: u64,
    lo_offset: u64,
    lo_sizelimit: u64,
    lo_number: u32,
    lo_encrypt_type: u32,
    lo_encrypt_key_size: u32,
    lo_flags: u32,
    lo_file_name: [u8; 64],
    lo_crypt_name: [u8; 64],
    lo_encrypt_key: [u8; 32],
    lo_init: [u64; 2],
}

impl Default for LoopInfo64 {
    fn default() -> LoopInfo64 {
        LoopInfo64 {
            lo_device: 0,
            lo_inode: 0,
            lo_rdevice: 0,
            lo_offset: 0,
            lo_sizelimit: 0,
            lo_number: 0,
            lo_encrypt_type: 0,
            lo_encrypt_key_size: 0,
            lo_flags: 0,
            lo_file_name: [0; 64],
            lo_crypt_name: [0; 64],
            lo_encrypt_key: [0; 32],
            lo_init: [0; 2],
        }
    }
}

fn io_error(what: &str, path: &Path, err: io::Error) -> DmError {
    DmError::Core(errors::Error::GeneralIo(format!(
        "{} {}: {}",
        what,
        path.display(),
        err
    )))
}

/// Answers questions about block devices for the pool protocols.
pub trait BlockDevices: Send + Sync {
    /// The size of the block device at `path`.
    fn size(&self, path: &Path) -> DmResult<Bytes>;
}

/// Block devices as the kernel sees them.
#[derive(Clone, Copy, Debug, Default)]
pub struct SysBlockDevices;

impl BlockDevices for SysBlockDevices {
    fn size(&self, path: &Path) -> DmResult<Bytes> {
        let file = File::open(path).map_err(|e| io_error("failed to open", path, e))?;
        blkdev_size(&file)
    }
}

/// get the size of a given block device file
pub fn blkdev_size(file: &File) -> DmResult<Bytes> {
    let mut val: u64 = 0;

    match unsafe { blkgetsize64(file.as_raw_fd(), &mut val) } {
        Err(x) => {
            error!("Failed to get block device size: {}", x);
            Err(DmError::Core(errors::Error::GeneralIo(format!(
                "failed to get block device size: {}",
                x.desc()
            ))))
        }
        Ok(_) => Ok(Bytes(u128::from(val))),
    }
}

/// Discard every block of the device at `path`, then flush.
pub fn block_device_discard(path: &Path) -> DmResult<()> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| io_error("failed to open", path, e))?;

    let size = blkdev_size(&file)?;
    let range = [0u64, *size as u64];
    unsafe { blkdiscard(file.as_raw_fd(), &range) }.map_err(|err| {
        DmError::Core(errors::Error::GeneralIo(format!(
            "failed to discard {}: {}",
            path.display(),
            err.desc()
        )))
    })?;

    // A remove straight after a discard may otherwise find the device busy.
    nix::unistd::sync();
    Ok(())
}

/// The device and inode numbers of the file backing the loop device
/// `file`.
pub fn loopback_backing_file(file: &File) -> DmResult<(u64, u64)> {
    let mut info = LoopInfo64::default();
    match unsafe { loop_get_status64(file.as_raw_fd(), &mut info) } {
        Ok(_) => Ok((info.lo_device, info.lo_inode)),
        Err(err) => {
            error!("Failed to get loopback backing file: {}", err);
            Err(DmError::Core(errors::Error::GeneralIo(format!(
                "unable to get loopback backing file: {}",
                err.desc()
            ))))
        }
    }
}

/// Make the loop device `file` pick up the current size of its backing
/// file.
pub fn loopback_set_capacity(file: &File) -> DmResult<()> {
    match unsafe { loop_set_capacity(file.as_raw_fd(), 0) } {
        Ok(_) => Ok(()),
        Err(err) => {
            error!("Failed to set loopback capacity: {}", err);
            Err(DmError::Core(errors::Error::GeneralIo(format!(
                "unable to set loopback capacity: {}",
                err.desc()
            ))))
        }
    }
}

/// The loop device whose backing file is `file`, if there is one.
///
/// Loop devices are probed in order until the first which does not exist.
/// Devices which can not be opened are skipped.
pub fn find_loop_device_for(file: &File) -> Option<File> {
    let metadata = file.metadata().ok()?;
    let (target_dev, target_ino) = (metadata.dev(), metadata.ino());

    for i in 0.. {
        let path = format!("/dev/loop{i}");
        let loop_file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(f) => f,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                trace!("Skipping {}: {}", path, err);
                continue;
            }
        };

        if let Ok((dev, ino)) = loopback_backing_file(&loop_file) {
            if dev == target_dev && ino == target_ino {
                debug!("Found loop device {} for inode {}", path, target_ino);
                return Some(loop_file);
            }
        }
    }

    None
}
