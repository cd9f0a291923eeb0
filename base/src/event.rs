// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::mem;
use std::ptr;
use std::time::Duration;

use libc::c_void;
use libc::eventfd;
use libc::read;
use libc::write;
use libc::POLLIN;

use crate::descriptor::AsRawDescriptor;
use crate::descriptor::FromRawDescriptor;
use crate::descriptor::IntoRawDescriptor;
use crate::descriptor::RawDescriptor;
use crate::descriptor::SafeDescriptor;
use crate::errno::errno_result;
use crate::errno::Result;

/// A wait/notify mechanism backed by a Linux eventfd (man 2 eventfd). Writes signal the event.
/// Reads block until the event is signaled and then clear the signal.
///
/// Supports multiple simultaneous signalers but only one waiter.
///
/// Multiple `Event`s can be polled at once via `WaitContext`.
#[derive(Debug, PartialEq, Eq)]
pub struct Event {
    event_handle: SafeDescriptor,
}

#[derive(PartialEq, Eq, Debug)]
pub enum EventWaitResult {
    /// The `Event` was signaled.
    Signaled,
    /// Timeout limit reached.
    TimedOut,
}

impl Event {
    /// Creates new event in an unsignaled state.
    pub fn new() -> Result<Event> {
        // SAFETY:
        // This is safe because eventfd merely allocated an eventfd for our process and we handle
        // the error case.
        let ret = unsafe { eventfd(0, libc::EFD_CLOEXEC) };
        if ret < 0 {
            return errno_result();
        }
        Ok(Event {
            // SAFETY:
            // This is safe because we checked ret for success and know the kernel gave us an fd
            // that we own.
            event_handle: unsafe { SafeDescriptor::from_raw_descriptor(ret) },
        })
    }

    /// Signals the event.
    pub fn signal(&self) -> Result<()> {
        self.write_count(1)
    }

    /// Blocks until the event is signaled and clears the signal.
    pub fn wait(&self) -> Result<()> {
        self.read_count().map(|_| ())
    }

    /// Blocks until the event is signaled and clears the signal, or until the timeout duration
    /// expires.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<EventWaitResult> {
        let mut pfd = libc::pollfd {
            fd: self.as_raw_descriptor(),
            events: POLLIN,
            revents: 0,
        };
        let timeoutspec = libc::timespec {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_nsec: timeout.subsec_nanos() as libc::c_long,
        };
        // SAFETY:
        // Safe because this only modifies |pfd| and we check the return value
        let ret = unsafe { libc::ppoll(&mut pfd, 1, &timeoutspec, ptr::null_mut()) };
        if ret < 0 {
            return errno_result();
        }

        // no return events (revents) means we got a timeout
        if pfd.revents == 0 {
            return Ok(EventWaitResult::TimedOut);
        }

        self.read_count()?;
        Ok(EventWaitResult::Signaled)
    }

    /// Clears a pending signal without blocking. Returns whether the event was signaled.
    pub fn reset(&self) -> Result<bool> {
        match self.wait_timeout(Duration::ZERO)? {
            EventWaitResult::Signaled => Ok(true),
            EventWaitResult::TimedOut => Ok(false),
        }
    }

    /// Clones the event. The event's state is shared between cloned instances.
    pub fn try_clone(&self) -> Result<Event> {
        self.event_handle
            .try_clone()
            .map(|event_handle| Event { event_handle })
    }

    /// Adds `v` to the eventfd's count, blocking until this won't overflow the count.
    fn write_count(&self, v: u64) -> Result<()> {
        // SAFETY:
        // This is safe because we made this fd and the pointer we pass can not overflow because we
        // give the syscall's size parameter properly.
        let ret = unsafe {
            write(
                self.as_raw_descriptor(),
                &v as *const u64 as *const c_void,
                mem::size_of::<u64>(),
            )
        };
        if ret <= 0 {
            return errno_result();
        }
        Ok(())
    }

    /// Blocks until the the eventfd's count is non-zero, then resets the count to zero.
    fn read_count(&self) -> Result<u64> {
        let mut buf: u64 = 0;
        // SAFETY:
        // This is safe because we made this fd and the pointer we pass can not overflow because
        // we give the syscall's size parameter properly.
        let ret = unsafe {
            read(
                self.as_raw_descriptor(),
                &mut buf as *mut u64 as *mut c_void,
                mem::size_of::<u64>(),
            )
        };
        if ret <= 0 {
            return errno_result();
        }
        Ok(buf)
    }
}

impl AsRawDescriptor for Event {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.event_handle.as_raw_descriptor()
    }
}

impl FromRawDescriptor for Event {
    unsafe fn from_raw_descriptor(descriptor: RawDescriptor) -> Self {
        Event {
            event_handle: SafeDescriptor::from_raw_descriptor(descriptor),
        }
    }
}

impl IntoRawDescriptor for Event {
    fn into_raw_descriptor(self) -> RawDescriptor {
        self.event_handle.into_raw_descriptor()
    }
}

impl From<Event> for SafeDescriptor {
    fn from(evt: Event) -> Self {
        evt.event_handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_then_wait() {
        let evt = Event::new().unwrap();
        evt.signal().unwrap();
        evt.wait().unwrap();
    }

    #[test]
    fn clone_shares_state() {
        let evt = Event::new().unwrap();
        let evt_clone = evt.try_clone().unwrap();
        evt.signal().unwrap();
        assert_eq!(
            evt_clone.wait_timeout(Duration::from_millis(1)).unwrap(),
            EventWaitResult::Signaled
        );
    }

    #[test]
    fn timeout() {
        let evt = Event::new().unwrap();
        assert_eq!(
            evt.wait_timeout(Duration::from_millis(1)).unwrap(),
            EventWaitResult::TimedOut
        );
    }

    #[test]
    fn reset_clears_signal() {
        let evt = Event::new().unwrap();
        assert!(!evt.reset().unwrap());
        evt.signal().unwrap();
        evt.signal().unwrap();
        assert!(evt.reset().unwrap());
        assert!(!evt.reset().unwrap());
    }
}
