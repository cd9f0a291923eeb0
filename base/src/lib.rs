// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Safe wrappers for the Linux system interfaces used by the encoder control plane.

pub mod descriptor;
mod errno;
mod event;
pub mod ioctl;
mod mmap;
mod shm;
pub mod syslog;
mod wait_context;
mod worker_thread;

pub use descriptor::clone_descriptor;
pub use descriptor::AsRawDescriptor;
pub use descriptor::Descriptor;
pub use descriptor::FromRawDescriptor;
pub use descriptor::IntoRawDescriptor;
pub use descriptor::RawDescriptor;
pub use descriptor::SafeDescriptor;
pub use errno::errno_result;
pub use errno::Error;
pub use errno::Result;
pub use event::Event;
pub use event::EventWaitResult;
pub use ioctl::ioctl;
pub use ioctl::ioctl_with_mut_ptr;
pub use ioctl::ioctl_with_mut_ref;
pub use ioctl::ioctl_with_ptr;
pub use ioctl::ioctl_with_ref;
pub use ioctl::ioctl_with_val;
pub use ioctl::IoctlNr;
pub use log::debug;
pub use log::error;
pub use log::info;
pub use log::trace;
pub use log::warn;
pub use mmap::Error as MmapError;
pub use mmap::MemoryMapping;
pub use mmap::MemoryMappingBuilder;
pub use mmap::Protection;
pub use mmap::Result as MmapResult;
pub use shm::SharedMemory;
pub use wait_context::EventToken;
pub use wait_context::EventType;
pub use wait_context::TriggeredEvent;
pub use wait_context::WaitContext;
pub use worker_thread::WorkerThread;

/// Safe wrapper for `sysconf(_SC_PAGESIZE)`.
#[inline(always)]
pub fn pagesize() -> usize {
    // SAFETY:
    // Trivially safe.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Rounds `size` up to the next multiple of the page size.
pub fn round_up_to_page_size(size: usize) -> usize {
    let page_mask = pagesize() - 1;
    (size + page_mask) & !page_mask
}

/// Uses the system's page size in bytes to round `offset` down to a page boundary.
pub fn round_down_to_page_size(offset: usize) -> usize {
    offset & !(pagesize() - 1)
}

/// Retries `f` while it fails with `EINTR`.
#[macro_export]
macro_rules! handle_eintr_errno {
    ($x:expr) => {{
        let mut res;
        loop {
            res = $x;
            if res != -1 || $crate::Error::last() != $crate::Error::new(libc::EINTR) {
                break;
            }
        }
        res
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_rounding() {
        let page = pagesize();
        assert_eq!(round_up_to_page_size(0), 0);
        assert_eq!(round_up_to_page_size(1), page);
        assert_eq!(round_up_to_page_size(page), page);
        assert_eq!(round_up_to_page_size(page + 1), 2 * page);
        assert_eq!(round_down_to_page_size(page + 1), page);
        assert_eq!(round_down_to_page_size(page - 1), 0);
    }
}
