// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::cmp::min;
use std::ptr::copy_nonoverlapping;
use std::ptr::null_mut;

use libc::c_int;
use remain::sorted;

use crate::descriptor::AsRawDescriptor;
use crate::pagesize;

#[sorted]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("requested offset is out of range of off_t")]
    InvalidOffset,
    #[error("requested memory range spans past the end of the region: offset={0} count={1} region_size={2}")]
    InvalidRange(usize, usize, usize),
    #[error("requested memory is not page aligned")]
    NotPageAligned,
    #[error("mmap related system call failed: {0}")]
    SystemCallFailed(#[source] crate::Error),
}
pub type Result<T> = std::result::Result<T, Error>;

/// Memory access type for a mapping.
#[derive(Copy, Clone, Default, Eq, PartialEq, Debug)]
pub struct Protection {
    read: bool,
    write: bool,
}

impl Protection {
    /// Returns Protection allowing read/write access.
    #[inline(always)]
    pub fn read_write() -> Protection {
        Protection {
            read: true,
            write: true,
        }
    }

    /// Returns Protection allowing read access.
    #[inline(always)]
    pub fn read() -> Protection {
        Protection {
            read: true,
            ..Default::default()
        }
    }

    fn as_prot(self) -> c_int {
        let mut prot = libc::PROT_NONE;
        if self.read {
            prot |= libc::PROT_READ;
        }
        if self.write {
            prot |= libc::PROT_WRITE;
        }
        prot
    }
}

/// A shared mapping of a descriptor into this process's address space, unmapped on drop.
#[derive(Debug)]
pub struct MemoryMapping {
    addr: *mut u8,
    size: usize,
}

// SAFETY:
// Send and Sync aren't automatically inherited for the raw address pointer. Accessing that
// pointer is only done through the stateless interface which allows the object to be shared by
// multiple threads without a decrease in safety.
unsafe impl Send for MemoryMapping {}
// SAFETY: See safety comments for impl Send
unsafe impl Sync for MemoryMapping {}

impl MemoryMapping {
    /// Returns the size of the mapping in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns a pointer to the beginning of the mapping.
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr
    }

    /// Writes `buf` at `offset`, returning the number of bytes copied. Copies are truncated at the
    /// end of the mapping.
    pub fn write_slice(&self, buf: &[u8], offset: usize) -> Result<usize> {
        match self.size.checked_sub(offset) {
            Some(size_past_offset) => {
                let bytes_copied = min(size_past_offset, buf.len());
                // SAFETY:
                // The bytes_copied equation above ensures we don't copy bytes out of range of
                // either buf or this mapping. The buffers do not overlap because `buf` is a
                // borrowed slice of process memory that was not handed out from this mapping.
                unsafe {
                    copy_nonoverlapping(buf.as_ptr(), self.addr.add(offset), bytes_copied);
                }
                Ok(bytes_copied)
            }
            None => Err(Error::InvalidRange(offset, buf.len(), self.size)),
        }
    }

    /// Reads into `buf` from `offset`, returning the number of bytes copied. Copies are truncated
    /// at the end of the mapping.
    pub fn read_slice(&self, buf: &mut [u8], offset: usize) -> Result<usize> {
        match self.size.checked_sub(offset) {
            Some(size_past_offset) => {
                let bytes_copied = min(size_past_offset, buf.len());
                // SAFETY:
                // Same reasoning as in `write_slice`.
                unsafe {
                    copy_nonoverlapping(self.addr.add(offset), buf.as_mut_ptr(), bytes_copied);
                }
                Ok(bytes_copied)
            }
            None => Err(Error::InvalidRange(offset, buf.len(), self.size)),
        }
    }

    /// Fills `count` bytes starting at `offset` with zeroes.
    pub fn zero_range(&self, offset: usize, count: usize) -> Result<()> {
        match offset.checked_add(count) {
            Some(end) if end <= self.size => {
                // SAFETY:
                // The range was checked against the mapping size above.
                unsafe { std::ptr::write_bytes(self.addr.add(offset), 0, count) };
                Ok(())
            }
            _ => Err(Error::InvalidRange(offset, count, self.size)),
        }
    }
}

impl Drop for MemoryMapping {
    fn drop(&mut self) {
        // SAFETY:
        // This is safe because we mmap the area at addr ourselves, and nobody else is holding a
        // reference to it.
        unsafe {
            libc::munmap(self.addr as *mut libc::c_void, self.size);
        }
    }
}

/// Builds a [`MemoryMapping`] over a descriptor.
pub struct MemoryMappingBuilder<'a> {
    descriptor: Option<&'a dyn AsRawDescriptor>,
    size: usize,
    offset: Option<u64>,
    protection: Option<Protection>,
}

impl<'a> MemoryMappingBuilder<'a> {
    /// Creates a new builder specifying size of the memory region in bytes.
    pub fn new(size: usize) -> MemoryMappingBuilder<'a> {
        MemoryMappingBuilder {
            descriptor: None,
            size,
            offset: None,
            protection: None,
        }
    }

    /// Build the memory mapping given the specified descriptor to mapped memory.
    ///
    /// Default: Create a new memory mapping.
    pub fn from_descriptor(mut self, descriptor: &'a dyn AsRawDescriptor) -> MemoryMappingBuilder {
        self.descriptor = Some(descriptor);
        self
    }

    /// Offset in bytes from the beginning of the mapping to start the mmap. Must be page aligned.
    ///
    /// Default: No offset
    pub fn offset(mut self, offset: u64) -> MemoryMappingBuilder<'a> {
        self.offset = Some(offset);
        self
    }

    /// Protection (e.g. readable/writable) of the memory region.
    ///
    /// Default: Read/write
    pub fn protection(mut self, protection: Protection) -> MemoryMappingBuilder<'a> {
        self.protection = Some(protection);
        self
    }

    /// Build a MemoryMapping from the provided options.
    pub fn build(self) -> Result<MemoryMapping> {
        let offset = self.offset.unwrap_or(0);
        if offset % pagesize() as u64 != 0 {
            return Err(Error::NotPageAligned);
        }
        let offset: libc::off_t = offset.try_into().map_err(|_| Error::InvalidOffset)?;
        let prot = self.protection.unwrap_or_else(Protection::read_write).as_prot();
        let (flags, fd) = match self.descriptor {
            Some(descriptor) => (libc::MAP_SHARED, descriptor.as_raw_descriptor()),
            None => (libc::MAP_ANONYMOUS | libc::MAP_SHARED | libc::MAP_NORESERVE, -1),
        };
        // SAFETY:
        // This is safe because we are creating a mapping in a place not already used by any other
        // area in this process, and we check the return value.
        let addr = unsafe { libc::mmap(null_mut(), self.size, prot, flags, fd, offset) };
        if addr == libc::MAP_FAILED {
            return Err(Error::SystemCallFailed(crate::Error::last()));
        }
        Ok(MemoryMapping {
            addr: addr as *mut u8,
            size: self.size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SharedMemory;

    #[test]
    fn anonymous_read_write() {
        let m = MemoryMappingBuilder::new(1024).build().unwrap();
        assert_eq!(m.write_slice(&[1, 2, 3], 10).unwrap(), 3);
        let mut buf = [0u8; 3];
        assert_eq!(m.read_slice(&mut buf, 10).unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn writes_truncate_at_end() {
        let m = MemoryMappingBuilder::new(16).build().unwrap();
        assert_eq!(m.write_slice(&[7u8; 8], 12).unwrap(), 4);
        assert!(m.write_slice(&[7u8; 8], 17).is_err());
    }

    #[test]
    fn shared_memory_visible_through_two_mappings() {
        let shm = SharedMemory::new("mmap_test", 4096).unwrap();
        let a = MemoryMappingBuilder::new(4096)
            .from_descriptor(&shm)
            .build()
            .unwrap();
        let b = MemoryMappingBuilder::new(4096)
            .from_descriptor(&shm)
            .protection(Protection::read())
            .build()
            .unwrap();
        a.write_slice(b"frame", 0).unwrap();
        let mut buf = [0u8; 5];
        b.read_slice(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"frame");
    }

    #[test]
    fn unaligned_offset_rejected() {
        let shm = SharedMemory::new("mmap_test", 8192).unwrap();
        let res = MemoryMappingBuilder::new(4096)
            .from_descriptor(&shm)
            .offset(1)
            .build();
        assert!(matches!(res, Err(Error::NotPageAligned)));
    }
}
