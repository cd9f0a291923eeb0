// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-port DMA-BUF regions that carry per-frame extradata alongside the primary planes.
//!
//! A region holds `count` consecutive extradata buffers of `buffer_size` bytes each. Buffer `i`
//! lives at offset `i * buffer_size` and is addressed through the slot an [`FdIndexTable`]
//! assigns to the frame's memory descriptor.
//!
//! [`FdIndexTable`]: crate::fd_index::FdIndexTable

use std::fs::File;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use base::debug;
use base::errno_result;
use base::ioctl_with_mut_ref;
use base::ioctl_with_ref;
use base::round_up_to_page_size;
use base::AsRawDescriptor;
use base::FromRawDescriptor;
use base::MemoryMapping;
use base::MemoryMappingBuilder;
use base::MmapError;
use base::SafeDescriptor;
use base::SharedMemory;
use remain::sorted;
use thiserror::Error;
use videodev2_sys::dma_buf::*;

use crate::device::Port;

#[sorted]
#[derive(Error, Debug)]
pub enum ExtradataError {
    #[error("failed to allocate {size} bytes of extradata: {source}")]
    Allocate {
        size: usize,
        #[source]
        source: base::Error,
    },
    #[error("extradata region would be empty ({count} buffers of {buffer_size} bytes)")]
    EmptyRegion { count: u32, buffer_size: usize },
    #[error("failed to map extradata region: {0}")]
    Map(MmapError),
    #[error("failed to open allocation device: {0}")]
    OpenDevice(base::Error),
    #[error("extradata slot {slot} is outside the region of {count} buffers")]
    SlotOutOfRange { slot: u32, count: u32 },
    #[error("failed to synchronize CPU access to extradata: {0}")]
    Sync(base::Error),
}

pub type Result<T> = std::result::Result<T, ExtradataError>;

/// Source of DMA-BUF memory for extradata regions.
pub trait DmaBufAllocator: Send + Sync {
    /// Opens the raw device handle through which buffers are allocated and synchronized.
    fn open_device(&self) -> base::Result<SafeDescriptor>;

    /// Allocates a shareable buffer of exactly `size` bytes from `device`.
    fn allocate(&self, device: &SafeDescriptor, size: usize) -> base::Result<SafeDescriptor>;

    /// Called before the CPU touches the mapping of `buffer`.
    fn begin_cpu_access(&self, _buffer: &SafeDescriptor) -> base::Result<()> {
        Ok(())
    }

    /// Called after the CPU is done with the mapping of `buffer`.
    fn end_cpu_access(&self, _buffer: &SafeDescriptor) -> base::Result<()> {
        Ok(())
    }
}

/// Allocates from a Linux DMA heap such as `/dev/dma_heap/system`.
pub struct DmaHeapAllocator {
    heap: PathBuf,
}

impl DmaHeapAllocator {
    pub const SYSTEM_HEAP: &'static str = "/dev/dma_heap/system";

    pub fn new<P: Into<PathBuf>>(heap: P) -> DmaHeapAllocator {
        DmaHeapAllocator { heap: heap.into() }
    }

    fn sync(buffer: &SafeDescriptor, flags: u64) -> base::Result<()> {
        let sync = dma_buf_sync {
            flags: flags | DMA_BUF_SYNC_RW,
        };
        // SAFETY:
        // Safe because the kernel only reads `sync` and we check the return value.
        let ret = unsafe { ioctl_with_ref(buffer, DMA_BUF_IOCTL_SYNC(), &sync) };
        if ret < 0 {
            return errno_result();
        }
        Ok(())
    }
}

impl Default for DmaHeapAllocator {
    fn default() -> Self {
        DmaHeapAllocator::new(DmaHeapAllocator::SYSTEM_HEAP)
    }
}

impl DmaBufAllocator for DmaHeapAllocator {
    fn open_device(&self) -> base::Result<SafeDescriptor> {
        let heap = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(&self.heap)?;
        Ok(SafeDescriptor::from(heap))
    }

    fn allocate(&self, device: &SafeDescriptor, size: usize) -> base::Result<SafeDescriptor> {
        let mut data = dma_heap_allocation_data {
            len: size as u64,
            fd_flags: (libc::O_RDWR | libc::O_CLOEXEC) as u32,
            ..Default::default()
        };
        // SAFETY:
        // Safe because the kernel only writes the new descriptor into `data` and we check the
        // return value.
        let ret = unsafe { ioctl_with_mut_ref(device, DMA_HEAP_IOCTL_ALLOC(), &mut data) };
        if ret < 0 {
            return errno_result();
        }
        // SAFETY:
        // Safe because the ioctl succeeded and handed us sole ownership of `data.fd`.
        Ok(unsafe { SafeDescriptor::from_raw_descriptor(data.fd as i32) })
    }

    fn begin_cpu_access(&self, buffer: &SafeDescriptor) -> base::Result<()> {
        DmaHeapAllocator::sync(buffer, DMA_BUF_SYNC_START)
    }

    fn end_cpu_access(&self, buffer: &SafeDescriptor) -> base::Result<()> {
        DmaHeapAllocator::sync(buffer, DMA_BUF_SYNC_END)
    }
}

/// Allocates from anonymous shared memory. Suitable for drivers that accept any shareable
/// descriptor and for running without DMA heaps.
#[derive(Default)]
pub struct MemfdAllocator;

impl DmaBufAllocator for MemfdAllocator {
    fn open_device(&self) -> base::Result<SafeDescriptor> {
        let null = File::open("/dev/null")?;
        Ok(SafeDescriptor::from(null))
    }

    fn allocate(&self, _device: &SafeDescriptor, size: usize) -> base::Result<SafeDescriptor> {
        let shm = SharedMemory::new("venc_extradata", size as u64)?;
        Ok(SafeDescriptor::from(shm))
    }
}

/// The allocator used when a session is created without one.
pub fn default_allocator() -> Arc<dyn DmaBufAllocator> {
    if cfg!(feature = "dma-heap") {
        Arc::new(DmaHeapAllocator::default())
    } else {
        Arc::new(MemfdAllocator)
    }
}

/// A mapped extradata region. Unmapped and released when dropped.
pub struct ExtradataRegion {
    // Declared first so the mapping goes away before the descriptors are closed.
    mapping: MemoryMapping,
    buffer: SafeDescriptor,
    device: SafeDescriptor,
    allocator: Arc<dyn DmaBufAllocator>,
    port: Port,
    buffer_size: usize,
    count: u32,
}

impl ExtradataRegion {
    pub fn port(&self) -> Port {
        self.port
    }

    /// Bytes reserved per buffer.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Size of the mapping, a whole number of pages.
    pub fn size(&self) -> usize {
        self.mapping.size()
    }

    /// Descriptor of the underlying DMA-BUF, passed to the driver as the extradata plane.
    pub fn buffer(&self) -> &SafeDescriptor {
        &self.buffer
    }

    /// Raw device handle the region was allocated from.
    pub fn device(&self) -> &SafeDescriptor {
        &self.device
    }

    pub fn offset_of(&self, slot: u32) -> Result<usize> {
        if slot >= self.count {
            return Err(ExtradataError::SlotOutOfRange {
                slot,
                count: self.count,
            });
        }
        Ok(slot as usize * self.buffer_size)
    }

    /// Copies `data` into the buffer of `slot`, zeroing the rest of it. Returns the bytes
    /// written, which is at most the per-buffer size.
    pub fn write_slot(&self, slot: u32, data: &[u8]) -> Result<usize> {
        let offset = self.offset_of(slot)?;
        let len = data.len().min(self.buffer_size);
        self.with_cpu_access(|mapping| {
            mapping.zero_range(offset, self.buffer_size)?;
            mapping.write_slice(&data[..len], offset)
        })
    }

    /// Copies the whole buffer of `slot` out of the region.
    pub fn read_slot(&self, slot: u32) -> Result<Vec<u8>> {
        let offset = self.offset_of(slot)?;
        let mut data = vec![0u8; self.buffer_size];
        self.with_cpu_access(|mapping| mapping.read_slice(&mut data, offset))?;
        Ok(data)
    }

    fn with_cpu_access<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&MemoryMapping) -> base::MmapResult<T>,
    {
        self.allocator
            .begin_cpu_access(&self.buffer)
            .map_err(ExtradataError::Sync)?;
        let res = f(&self.mapping).map_err(ExtradataError::Map);
        self.allocator
            .end_cpu_access(&self.buffer)
            .map_err(ExtradataError::Sync)?;
        res
    }
}

impl std::fmt::Debug for ExtradataRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ExtradataRegion")
            .field("port", &self.port)
            .field("buffer_size", &self.buffer_size)
            .field("count", &self.count)
            .field("buffer", &self.buffer.as_raw_descriptor())
            .finish()
    }
}

impl Drop for ExtradataRegion {
    fn drop(&mut self) {
        debug!(
            "releasing {} port extradata region ({} bytes)",
            self.port,
            self.mapping.size()
        );
    }
}

/// Owns at most one extradata region per port.
pub struct ExtradataAllocator {
    allocator: Arc<dyn DmaBufAllocator>,
    regions: [Option<Arc<ExtradataRegion>>; 2],
}

impl ExtradataAllocator {
    pub fn new(allocator: Arc<dyn DmaBufAllocator>) -> ExtradataAllocator {
        ExtradataAllocator {
            allocator,
            regions: [None, None],
        }
    }

    /// Allocates and maps a region of `count` buffers of `buffer_size` bytes for `port`,
    /// replacing any region the port already had.
    pub fn allocate(
        &mut self,
        port: Port,
        count: u32,
        buffer_size: usize,
    ) -> Result<Arc<ExtradataRegion>> {
        if count == 0 || buffer_size == 0 {
            return Err(ExtradataError::EmptyRegion { count, buffer_size });
        }
        self.free(port);

        let size = round_up_to_page_size(count as usize * buffer_size);
        let device = self
            .allocator
            .open_device()
            .map_err(ExtradataError::OpenDevice)?;
        let buffer = self
            .allocator
            .allocate(&device, size)
            .map_err(|source| ExtradataError::Allocate { size, source })?;
        let mapping = MemoryMappingBuilder::new(size)
            .from_descriptor(&buffer)
            .build()
            .map_err(ExtradataError::Map)?;

        debug!(
            "allocated {} port extradata: {} x {} bytes ({} mapped)",
            port, count, buffer_size, size
        );
        let region = Arc::new(ExtradataRegion {
            mapping,
            buffer,
            device,
            allocator: self.allocator.clone(),
            port,
            buffer_size,
            count,
        });
        self.regions[port.index()] = Some(region.clone());
        Ok(region)
    }

    pub fn region(&self, port: Port) -> Option<Arc<ExtradataRegion>> {
        self.regions[port.index()].clone()
    }

    /// Releases the region of `port`. Does nothing if the port has none.
    ///
    /// The memory is unmapped once the last outstanding reference is dropped.
    pub fn free(&mut self, port: Port) {
        self.regions[port.index()] = None;
    }

    pub fn free_all(&mut self) {
        for port in Port::ALL {
            self.free(port);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator() -> ExtradataAllocator {
        ExtradataAllocator::new(Arc::new(MemfdAllocator))
    }

    #[test]
    fn region_is_page_rounded() {
        let mut extradata = allocator();
        let region = extradata.allocate(Port::Input, 3, 100).unwrap();
        assert_eq!(region.size(), base::pagesize());
        assert_eq!(region.count(), 3);
        assert_eq!(region.offset_of(2).unwrap(), 200);
        assert!(matches!(
            region.offset_of(3),
            Err(ExtradataError::SlotOutOfRange { slot: 3, count: 3 })
        ));
    }

    #[test]
    fn slots_are_independent() {
        let mut extradata = allocator();
        let region = extradata.allocate(Port::Output, 4, 16).unwrap();
        region.write_slot(1, b"roi map").unwrap();
        region.write_slot(2, &[0xffu8; 32]).unwrap();

        let one = region.read_slot(1).unwrap();
        assert_eq!(&one[..7], b"roi map");
        assert!(one[7..].iter().all(|b| *b == 0));
        assert_eq!(region.read_slot(2).unwrap(), vec![0xffu8; 16]);
        assert_eq!(region.read_slot(0).unwrap(), vec![0u8; 16]);
    }

    #[test]
    fn free_is_idempotent() {
        let mut extradata = allocator();
        extradata.allocate(Port::Input, 2, 64).unwrap();
        extradata.free(Port::Input);
        extradata.free(Port::Input);
        assert!(extradata.region(Port::Input).is_none());
        extradata.free_all();
    }

    #[test]
    fn empty_region_rejected() {
        let mut extradata = allocator();
        assert!(matches!(
            extradata.allocate(Port::Input, 0, 64),
            Err(ExtradataError::EmptyRegion { .. })
        ));
    }

    #[test]
    fn reallocation_replaces_region() {
        let mut extradata = allocator();
        let first = extradata.allocate(Port::Input, 2, 64).unwrap();
        let second = extradata.allocate(Port::Input, 8, 64).unwrap();
        assert_ne!(
            first.buffer().as_raw_descriptor(),
            second.buffer().as_raw_descriptor()
        );
        assert_eq!(extradata.region(Port::Input).unwrap().count(), 8);
    }
}
