// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::cmp::min;
use std::fs::File;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr::null_mut;
use std::time::Duration;

use libc::c_int;
use libc::epoll_create1;
use libc::epoll_ctl;
use libc::epoll_event;
use libc::epoll_wait;
use libc::EPOLLHUP;
use libc::EPOLLIN;
use libc::EPOLLOUT;
use libc::EPOLLPRI;
use libc::EPOLLRDHUP;
use libc::EPOLL_CLOEXEC;
use libc::EPOLL_CTL_ADD;
use libc::EPOLL_CTL_DEL;
use libc::EPOLL_CTL_MOD;
use smallvec::SmallVec;

use crate::descriptor::AsRawDescriptor;
use crate::descriptor::FromRawDescriptor;
use crate::descriptor::RawDescriptor;
use crate::descriptor::SafeDescriptor;
use crate::errno::errno_result;
use crate::errno::Result;
use crate::handle_eintr_errno;

const EVENT_CONTEXT_MAX_EVENTS: usize = 16;

/// Trait that can be used to associate events with arbitrary enums when using `WaitContext`.
///
/// Simple enums that have no or primitive variant data can use a bit-packed layout.
pub trait EventToken {
    /// Converts this token into a u64 that can be turned back into a token via `from_raw_token`.
    fn as_raw_token(&self) -> u64;

    /// Converts a raw token as returned from `as_raw_token` back into a token.
    ///
    /// It is invalid to give a raw token that was not returned via `as_raw_token` from the same
    /// `Self`. The implementation can expect that this will never happen as a result of its usage
    /// in `WaitContext`.
    fn from_raw_token(data: u64) -> Self;
}

impl EventToken for u64 {
    fn as_raw_token(&self) -> u64 {
        *self
    }

    fn from_raw_token(data: u64) -> Self {
        data
    }
}

impl EventToken for u32 {
    fn as_raw_token(&self) -> u64 {
        u64::from(*self)
    }

    fn from_raw_token(data: u64) -> Self {
        data as Self
    }
}

/// Represents an event that has been signaled and waited for via a wait function.
#[derive(Copy, Clone, Debug)]
pub struct TriggeredEvent<T: EventToken> {
    pub token: T,
    pub is_readable: bool,
    pub is_writable: bool,
    pub is_hungup: bool,
    /// Set when exceptional data is available, which is how V4L2 devices report pending events.
    pub is_priority: bool,
}

/// Represents types of events to watch for.
pub enum EventType {
    // Used to to temporarily stop waiting for events without
    // removing the associated descriptor from the WaitContext.
    None,
    Read,
    Write,
    ReadWrite,
    /// Readable, writable and priority events.
    All,
}

impl From<EventType> for u32 {
    fn from(et: EventType) -> u32 {
        let v = match et {
            EventType::None => 0,
            EventType::Read => EPOLLIN,
            EventType::Write => EPOLLOUT,
            EventType::ReadWrite => EPOLLIN | EPOLLOUT,
            EventType::All => EPOLLIN | EPOLLOUT | EPOLLPRI,
        };
        v as u32
    }
}

/// Used to wait for multiple objects which are eligible for waiting.
///
/// # Example
///
/// ```
/// use base::{Event, EventToken, Result, WaitContext};
///
/// let evt1 = Event::new()?;
/// let evt2 = Event::new()?;
///
/// let ctx: WaitContext<u32> = WaitContext::build_with(&[(&evt1, 1), (&evt2, 2)])?;
///
/// evt2.signal()?;
///
/// let events = ctx.wait()?;
/// let tokens: Vec<u32> = events.iter().filter(|e| e.is_readable).map(|e| e.token).collect();
/// assert_eq!(tokens, [2]);
/// # Ok::<(), base::Error>(())
/// ```
pub struct WaitContext<T: EventToken> {
    epoll_ctx: File,
    // Needed to satisfy usage of T
    tokens: PhantomData<[T]>,
}

impl<T: EventToken> WaitContext<T> {
    /// Creates a new WaitContext.
    pub fn new() -> Result<WaitContext<T>> {
        // SAFETY:
        // Safe because we check the return value.
        let epoll_fd = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return errno_result();
        }
        Ok(WaitContext {
            // SAFETY:
            // Safe because we checked the return value and own the new descriptor.
            epoll_ctx: File::from(unsafe { SafeDescriptor::from_raw_descriptor(epoll_fd) }),
            tokens: PhantomData,
        })
    }

    /// Creates a new WaitContext with the the associated triggers.
    pub fn build_with(triggers: &[(&dyn AsRawDescriptor, T)]) -> Result<WaitContext<T>> {
        let ctx = WaitContext::new()?;
        ctx.add_many(triggers)?;
        Ok(ctx)
    }

    /// Adds a trigger to the WaitContext.
    pub fn add(&self, descriptor: &dyn AsRawDescriptor, token: T) -> Result<()> {
        self.add_for_event(descriptor, EventType::Read, token)
    }

    /// Adds multiple triggers to the WaitContext.
    pub fn add_many(&self, triggers: &[(&dyn AsRawDescriptor, T)]) -> Result<()> {
        for (descriptor, token) in triggers {
            self.add(*descriptor, T::from_raw_token(token.as_raw_token()))?;
        }
        Ok(())
    }

    /// Adds a trigger to the WaitContext watching for a specific type of event
    pub fn add_for_event(
        &self,
        descriptor: &dyn AsRawDescriptor,
        event_type: EventType,
        token: T,
    ) -> Result<()> {
        self.ctl(EPOLL_CTL_ADD, descriptor, event_type, token)
    }

    /// Modifies a trigger already added to the WaitContext. If the descriptor is
    /// already registered, its associated token will be updated.
    pub fn modify(
        &self,
        descriptor: &dyn AsRawDescriptor,
        event_type: EventType,
        token: T,
    ) -> Result<()> {
        self.ctl(EPOLL_CTL_MOD, descriptor, event_type, token)
    }

    /// Removes the given handle from triggers registered in the WaitContext if
    /// present.
    pub fn delete(&self, descriptor: &dyn AsRawDescriptor) -> Result<()> {
        // SAFETY:
        // Safe because we give a valid epoll FD and FD to stop watching. Then we check the return
        // value.
        let ret = unsafe {
            epoll_ctl(
                self.epoll_ctx.as_raw_descriptor(),
                EPOLL_CTL_DEL,
                descriptor.as_raw_descriptor(),
                null_mut(),
            )
        };
        if ret < 0 {
            return errno_result();
        };
        Ok(())
    }

    fn ctl(
        &self,
        op: c_int,
        descriptor: &dyn AsRawDescriptor,
        event_type: EventType,
        token: T,
    ) -> Result<()> {
        let mut evt = epoll_event {
            events: event_type.into(),
            u64: token.as_raw_token(),
        };
        // SAFETY:
        // Safe because we give a valid epoll FD and FD to watch, as well as a valid epoll_event
        // structure. Then we check the return value.
        let ret = unsafe {
            epoll_ctl(
                self.epoll_ctx.as_raw_descriptor(),
                op,
                descriptor.as_raw_descriptor(),
                &mut evt,
            )
        };
        if ret < 0 {
            return errno_result();
        };
        Ok(())
    }

    /// Waits for one or more of the registered triggers to become signaled.
    pub fn wait(&self) -> Result<SmallVec<[TriggeredEvent<T>; 16]>> {
        self.wait_timeout(Duration::new(i64::MAX as u64, 0))
    }

    /// Waits for one or more of the registered triggers to become signaled, failing if no triggers
    /// are signaled before the designated timeout has elapsed.
    ///
    /// The events are level-triggered. An empty result means the timeout elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<SmallVec<[TriggeredEvent<T>; 16]>> {
        let mut epoll_events: [MaybeUninit<epoll_event>; EVENT_CONTEXT_MAX_EVENTS] =
            [MaybeUninit::uninit(); EVENT_CONTEXT_MAX_EVENTS];

        let timeout_millis = if timeout.as_secs() as i64 == i64::MAX {
            // 2^63 seconds is treated as an unbounded wait.
            -1
        } else {
            let millis = timeout
                .as_secs()
                .checked_mul(1_000)
                .and_then(|ms| ms.checked_add(u64::from(timeout.subsec_nanos()) / 1_000_000))
                .unwrap_or(i32::MAX as u64);
            min(i32::MAX as u64, millis) as i32
        };
        let max_events = epoll_events.len() as c_int;
        // SAFETY:
        // Safe because we give an epoll context and a properly sized epoll_events array pointer,
        // which we trust the kernel to fill in properly. `MaybeUninit<epoll_event>` has the same
        // layout as `epoll_event`.
        let ret = unsafe {
            handle_eintr_errno!(epoll_wait(
                self.epoll_ctx.as_raw_descriptor(),
                epoll_events.as_mut_ptr() as *mut epoll_event,
                max_events,
                timeout_millis
            ))
        };
        if ret < 0 {
            return errno_result();
        }
        let count = ret as usize;

        let events = epoll_events[0..count]
            .iter()
            .map(|e| {
                // SAFETY:
                // Only elements initialized by the `epoll_wait` system call are visited.
                let e = unsafe { e.assume_init() };
                TriggeredEvent {
                    token: T::from_raw_token(e.u64),
                    is_readable: e.events & (EPOLLIN as u32) != 0,
                    is_writable: e.events & (EPOLLOUT as u32) != 0,
                    is_hungup: e.events & ((EPOLLHUP | EPOLLRDHUP) as u32) != 0,
                    is_priority: e.events & (EPOLLPRI as u32) != 0,
                }
            })
            .collect();
        Ok(events)
    }
}

impl<T: EventToken> AsRawDescriptor for WaitContext<T> {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.epoll_ctx.as_raw_descriptor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Event;

    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    enum Token {
        First,
        Second,
    }

    impl EventToken for Token {
        fn as_raw_token(&self) -> u64 {
            *self as u64
        }

        fn from_raw_token(data: u64) -> Self {
            match data {
                0 => Token::First,
                _ => Token::Second,
            }
        }
    }

    #[test]
    fn reports_signaled_token() {
        let evt1 = Event::new().unwrap();
        let evt2 = Event::new().unwrap();
        let ctx: WaitContext<Token> =
            WaitContext::build_with(&[(&evt1, Token::First), (&evt2, Token::Second)]).unwrap();

        evt1.signal().unwrap();
        let events = ctx.wait().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token, Token::First);
        assert!(events[0].is_readable);
        assert!(!events[0].is_priority);
    }

    #[test]
    fn timeout_returns_empty() {
        let evt = Event::new().unwrap();
        let ctx: WaitContext<Token> = WaitContext::build_with(&[(&evt, Token::First)]).unwrap();
        let events = ctx.wait_timeout(Duration::from_millis(1)).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn deleted_descriptor_not_reported() {
        let evt = Event::new().unwrap();
        let ctx: WaitContext<Token> = WaitContext::build_with(&[(&evt, Token::First)]).unwrap();
        ctx.delete(&evt).unwrap();
        evt.signal().unwrap();
        let events = ctx.wait_timeout(Duration::from_millis(1)).unwrap();
        assert!(events.is_empty());
    }
}
