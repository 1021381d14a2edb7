// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{cmp, fs::File, iter, mem::size_of, os::unix::io::AsRawFd, path::Path};

use nix::libc::ioctl as nix_ioctl;

use crate::{
    core::{
        device::Device,
        dm_flags::DmFlags,
        dm_ioctl as dmi, errors,
        types::{DmName, DmNameBuf},
        util::{align_to, copy_c_str, read_struct, slice_to_null, str_from_byte_slice, struct_bytes},
    },
    query::TableEntry,
    result::{DmError, DmResult},
};

/// Indicator to send IOCTL to DM
const DM_IOCTL: u8 = 0xfd;
/// Major version
const DM_VERSION_MAJOR: u32 = 4;
/// Minor version
const DM_VERSION_MINOR: u32 = 30;
/// Patch level
const DM_VERSION_PATCHLEVEL: u32 = 0;

/// Start with a large buffer to make BUFFER_FULL rare. Libdm does this too.
const MIN_BUF_SIZE: usize = 16 * 1024;

/// An open devicemapper control node.
#[derive(Debug)]
pub struct DM {
    file: File,
}

impl DM {
    /// Open the control node at `control`.
    pub fn new(control: &Path) -> DmResult<DM> {
        Ok(DM {
            file: File::open(control).map_err(|e| {
                DmError::Core(errors::Error::ContextInit(format!(
                    "{}: {}",
                    control.display(),
                    e
                )))
            })?,
        })
    }

    /// Generate a header to be used for IOCTL.
    pub fn header(name: Option<&DmName>, flags: DmFlags) -> dmi::DmIoctl {
        let mut hdr = dmi::DmIoctl {
            version: [DM_VERSION_MAJOR, DM_VERSION_MINOR, DM_VERSION_PATCHLEVEL],
            flags: flags.bits(),
            data_start: size_of::<dmi::DmIoctl>() as u32,
            ..Default::default()
        };

        if let Some(name) = name {
            // DmName guarantees room for the terminating NUL.
            copy_c_str(&mut hdr.name, name.as_bytes());
        }

        hdr
    }

    // Give this a filled-in header and optionally add'l stuff.
    // Does the ioctl and maybe returns stuff. Handles BUFFER_FULL flag.
    // On return, hdr holds the header as the kernel left it.
    pub fn do_ioctl(
        &self,
        ioctl: u8,
        hdr: &mut dmi::DmIoctl,
        in_data: Option<&[u8]>,
    ) -> DmResult<Vec<u8>> {
        let hdr_size = size_of::<dmi::DmIoctl>();
        hdr.data_start = hdr_size as u32;
        hdr.data_size = cmp::max(MIN_BUF_SIZE, hdr_size + in_data.map_or(0, |x| x.len())) as u32;

        let mut v: Vec<u8> = Vec::with_capacity(hdr.data_size as usize);
        v.extend_from_slice(struct_bytes(hdr));
        if let Some(in_data) = in_data {
            v.extend_from_slice(in_data);
        }
        // zero out the rest
        v.resize(hdr.data_size as usize, 0);

        let op = nix::request_code_readwrite!(DM_IOCTL, ioctl, hdr_size);
        loop {
            let res =
                unsafe { nix::convert_ioctl_res!(nix_ioctl(self.file.as_raw_fd(), op, v.as_mut_ptr())) };

            // hdr possibly modified so copy back
            if let Some(out) = read_struct::<dmi::DmIoctl>(&v) {
                *hdr = out;
            }

            if let Err(err) = res {
                return Err(DmError::Core(errors::Error::Ioctl(ioctl, err)));
            }

            // If DM was able to write the requested data into the provided buffer, break the loop
            if (hdr.flags & DmFlags::DM_BUFFER_FULL.bits()) == 0 {
                break;
            }

            // If DM_BUFFER_FULL is set, DM requires more space for the
            // response.  Double the size of the buffer and re-try the ioctl.
            // Never allow the size to exceed u32::MAX.
            let len = v.len();
            if len == u32::MAX as usize {
                return Err(DmError::Core(errors::Error::IoctlResultTooLarge));
            }
            v.resize((len as u32).saturating_mul(2) as usize, 0);
            hdr.data_size = v.len() as u32;
            v[..hdr_size].copy_from_slice(struct_bytes(hdr));
        }

        // Return header data section.
        let data_start = cmp::min(hdr.data_start as usize, v.len());
        let data_end = cmp::min(cmp::max(hdr.data_start, hdr.data_size) as usize, v.len());
        Ok(v[data_start..data_end].to_vec())
    }

    /// Devicemapper version information: Major, Minor, and patchlevel versions.
    pub fn version(&self) -> DmResult<(u32, u32, u32)> {
        let mut hdr = DM::header(None, DmFlags::empty());

        self.do_ioctl(dmi::DM_VERSION_CMD, &mut hdr, None)?;

        Ok((hdr.version[0], hdr.version[1], hdr.version[2]))
    }
}

/// Flatten table lines into the payload of a table load ioctl.
pub fn encode_targets(targets: &[TableEntry]) -> DmResult<Vec<u8>> {
    let mut data_in = Vec::new();

    for t in targets {
        let mut targ = dmi::DmTargetSpec {
            sector_start: t.start,
            length: t.length,
            ..Default::default()
        };

        if !copy_c_str(&mut targ.target_type, t.target_type.as_bytes()) {
            return Err(DmError::Core(errors::Error::InvalidArgument(format!(
                "target type {} is longer than {} characters",
                t.target_type,
                dmi::DM_MAX_TYPE_NAME - 1
            ))));
        }

        // Each parameter string is NUL terminated and padded so that the
        // next spec is 8 byte aligned.
        let mut params = t.params.as_bytes().to_vec();
        let pad_bytes = align_to(params.len() + 1, 8) - params.len();
        params.extend(iter::repeat(0u8).take(pad_bytes));

        targ.next = (size_of::<dmi::DmTargetSpec>() + params.len()) as u32;

        data_in.extend_from_slice(struct_bytes(&targ));
        data_in.extend(params);
    }

    Ok(data_in)
}

/// The payload of a target message ioctl.
pub fn encode_message(sector: u64, msg: &str) -> Vec<u8> {
    let msg_struct = dmi::DmTargetMsg { sector };
    let mut data_in = struct_bytes(&msg_struct).to_vec();
    data_in.extend(msg.as_bytes());
    data_in.push(b'\0');
    data_in
}

/// Parse a device's table. The table value is in buf, count indicates the
/// expected number of lines.
/// Trims trailing white space off final entry on each line.
/// Parsing stops early at the first malformed entry.
// If the ioctl succeeded, the data is correct and complete. We rely on
// DM's interface versioning system: calls made with a non-matching major
// version fail, which protects against parsing unknown formats.
pub fn parse_table(count: u32, buf: &[u8]) -> Vec<TableEntry> {
    let mut targets = Vec::new();
    let mut next_off = 0;

    for _ in 0..count {
        let result = match buf.get(next_off..) {
            Some(result) => result,
            None => break,
        };
        let targ = match read_struct::<dmi::DmTargetSpec>(result) {
            Some(targ) => targ,
            None => break,
        };

        let target_type = slice_to_null(&targ.target_type)
            .map(|slc| String::from_utf8_lossy(slc).trim_end().to_owned())
            .unwrap_or_default();

        let params = slice_to_null(&result[size_of::<dmi::DmTargetSpec>()..])
            .map(|slc| String::from_utf8_lossy(slc).trim_end().to_owned())
            .unwrap_or_default();

        targets.push(TableEntry::new(
            targ.sector_start,
            targ.length,
            target_type,
            params,
        ));

        // The kernel's next is an offset from the start of the data.
        next_off = targ.next as usize;
    }

    targets
}

/// Parse the devices referenced by a table.
pub fn parse_deps(buf: &[u8]) -> Vec<Device> {
    let target_deps = match read_struct::<dmi::DmTargetDeps>(buf) {
        Some(deps) => deps,
        None => return Vec::new(),
    };

    // Note: The DM target_deps struct reserves 64 bits for each entry
    // but only 32 bits is used by kernel "huge" dev_t encoding.
    buf[size_of::<dmi::DmTargetDeps>()..]
        .chunks_exact(size_of::<u64>())
        .take(target_deps.count as usize)
        .filter_map(read_struct::<u64>)
        .map(|d| Device::from_kdev_t(d as u32))
        .collect()
}

/// Parse the names and device numbers of the list devices ioctl.
pub fn parse_name_list(buf: &[u8]) -> Vec<(DmNameBuf, Device)> {
    let mut devs = Vec::new();
    let mut result = buf;

    while let Some(device) = read_struct::<dmi::DmNameList>(result) {
        // An empty list is a single entry with a zero device.
        if device.dev == 0 && device.next == 0 {
            break;
        }

        let name = result
            .get(dmi::DM_NAME_LIST_NAME_OFFSET..)
            .and_then(str_from_byte_slice)
            .and_then(|name| DmNameBuf::new(name.to_owned()).ok());
        match name {
            Some(name) => devs.push((name, Device::from_kdev_t(device.dev as u32))),
            None => warn!("Skipping malformed entry in devicemapper device list"),
        }

        if device.next == 0 {
            break;
        }

        result = match result.get(device.next as usize..) {
            Some(rest) => rest,
            None => break,
        };
    }

    devs
}
