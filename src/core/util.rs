// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{mem::size_of, ptr, slice, str};

/// The smallest number divisible by `align_to` and at least `num`.
/// Precondition: `align_to` is a power of 2.
/// Precondition: `num` + `align_to` < usize::MAX + 1.
#[inline]
pub fn align_to(num: usize, align_to: usize) -> usize {
    let agn = align_to - 1;

    (num + agn) & !agn
}

/// Return the bytes up to the first \0, or None if there is no \0.
pub fn slice_to_null(slc: &[u8]) -> Option<&[u8]> {
    slc.iter().position(|c| *c == b'\0').map(|i| &slc[..i])
}

/// Return a str parsed from the byte slice up to the first \0, or None
pub fn str_from_byte_slice(slc: &[u8]) -> Option<&str> {
    slice_to_null(slc).and_then(|s| str::from_utf8(s).ok())
}

/// Copy `src` into the fixed size C string `dst`, always leaving room for
/// the terminating \0. Return false if `src` does not fit.
pub fn copy_c_str(dst: &mut [u8], src: &[u8]) -> bool {
    if src.len() >= dst.len() {
        return false;
    }
    dst[..src.len()].copy_from_slice(src);
    dst[src.len()..].iter_mut().for_each(|b| *b = 0);
    true
}

/// View a plain C struct as its bytes.
pub fn struct_bytes<T: Copy>(strct: &T) -> &[u8] {
    unsafe { slice::from_raw_parts(strct as *const T as *const u8, size_of::<T>()) }
}

/// Read a plain C struct from the front of a byte buffer, which need not
/// be aligned. Return None if the buffer is too short.
pub fn read_struct<T: Copy>(buf: &[u8]) -> Option<T> {
    if buf.len() < size_of::<T>() {
        return None;
    }
    Some(unsafe { ptr::read_unaligned(buf.as_ptr() as *const T) })
}
