// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::ffi::CString;

use libc::c_char;
use libc::c_int;
use libc::c_long;
use libc::c_uint;
use libc::syscall;
use libc::SYS_memfd_create;
use libc::EINVAL;

use crate::descriptor::AsRawDescriptor;
use crate::descriptor::FromRawDescriptor;
use crate::descriptor::IntoRawDescriptor;
use crate::descriptor::RawDescriptor;
use crate::descriptor::SafeDescriptor;
use crate::errno::errno_result;
use crate::errno::Error;
use crate::errno::Result;

// from <sys/memfd.h>
const MFD_CLOEXEC: c_uint = 0x0001;

unsafe fn memfd_create(name: *const c_char, flags: c_uint) -> c_int {
    syscall(SYS_memfd_create as c_long, name, flags) as c_int
}

/// A shared memory file descriptor and its size.
#[derive(Debug)]
pub struct SharedMemory {
    descriptor: SafeDescriptor,
    size: u64,
}

impl SharedMemory {
    /// Creates a new shared memory object of the given size.
    ///
    /// |name| is purely for debugging purposes. It does not need to be unique, and it does
    /// not affect any non-debugging related properties of the constructed shared memory.
    pub fn new<T: Into<Vec<u8>>>(debug_name: T, size: u64) -> Result<SharedMemory> {
        let debug_name = CString::new(debug_name).map_err(|_| Error::new(EINVAL))?;
        // SAFETY:
        // Safe because this call only creates a new descriptor and we check the return value.
        let fd = unsafe { memfd_create(debug_name.as_ptr(), MFD_CLOEXEC) };
        if fd < 0 {
            return errno_result();
        }
        // SAFETY:
        // Safe because we checked the return value and nothing else owns `fd`.
        let descriptor = unsafe { SafeDescriptor::from_raw_descriptor(fd) };
        let len: libc::off64_t = size.try_into().map_err(|_| Error::new(EINVAL))?;
        // SAFETY:
        // Safe because we own the descriptor and check the return value.
        let ret = unsafe { libc::ftruncate64(descriptor.as_raw_descriptor(), len) };
        if ret < 0 {
            return errno_result();
        }
        Ok(SharedMemory { descriptor, size })
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl AsRawDescriptor for SharedMemory {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.descriptor.as_raw_descriptor()
    }
}

impl IntoRawDescriptor for SharedMemory {
    fn into_raw_descriptor(self) -> RawDescriptor {
        self.descriptor.into_raw_descriptor()
    }
}

impl From<SharedMemory> for SafeDescriptor {
    fn from(sm: SharedMemory) -> SafeDescriptor {
        sm.descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sized() {
        let shm = SharedMemory::new("name", 4096).unwrap();
        assert_eq!(shm.size(), 4096);
        // SAFETY:
        // Safe because fstat only writes into `st`.
        let mut st: libc::stat64 = unsafe { std::mem::zeroed() };
        assert_eq!(
            unsafe { libc::fstat64(shm.as_raw_descriptor(), &mut st) },
            0
        );
        assert_eq!(st.st_size, 4096);
    }

    #[test]
    fn nul_in_name_rejected() {
        assert!(SharedMemory::new("a\0b", 4096).is_err());
    }
}
