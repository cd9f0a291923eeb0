// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! DMA-BUF heap allocation and CPU access synchronization.

// Translated from include/uapi/linux/dma-heap.h and include/uapi/linux/dma-buf.h

use base::ioctl_iow_nr;
use base::ioctl_iowr_nr;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct dma_heap_allocation_data {
    pub len: u64,
    pub fd: u32,
    pub fd_flags: u32,
    pub heap_flags: u64,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct dma_buf_sync {
    pub flags: u64,
}

pub const DMA_BUF_SYNC_READ: u64 = 1 << 0;
pub const DMA_BUF_SYNC_WRITE: u64 = 2 << 0;
pub const DMA_BUF_SYNC_RW: u64 = DMA_BUF_SYNC_READ | DMA_BUF_SYNC_WRITE;
pub const DMA_BUF_SYNC_START: u64 = 0 << 2;
pub const DMA_BUF_SYNC_END: u64 = 1 << 2;

pub const DMA_HEAP_IOC_MAGIC: u32 = 0x48;
pub const DMA_BUF_BASE: u32 = 0x62;

ioctl_iowr_nr!(
    DMA_HEAP_IOCTL_ALLOC,
    DMA_HEAP_IOC_MAGIC,
    0x0,
    dma_heap_allocation_data
);
ioctl_iow_nr!(DMA_BUF_IOCTL_SYNC, DMA_BUF_BASE, 0, dma_buf_sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ioctl_numbers() {
        assert_eq!(DMA_HEAP_IOCTL_ALLOC(), 0xc0184800);
        assert_eq!(DMA_BUF_IOCTL_SYNC(), 0x40086200);
    }
}
