// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! An in-memory encoder driver for tests and dry runs.
//!
//! The fake accepts the same requests as a real encoder, records every one of them, and only
//! completes buffers when told to. Readiness is reported through an [`Event`] that is signaled
//! while any completed buffer or event is waiting to be dequeued.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;

use base::AsRawDescriptor;
use base::Event;
use base::EventType;
use base::RawDescriptor;
use smallvec::smallvec;
use sync::Mutex;
use videodev2_sys::*;

use super::Control;
use super::DequeuedBuffer;
use super::DeviceBuffer;
use super::DeviceError;
use super::DeviceEvent;
use super::EncoderCommand;
use super::FormatRequest;
use super::NegotiatedFormat;
use super::PlaneLayout;
use super::Port;
use super::Result;
use super::VencDevice;
use crate::format::Codec;
use crate::format::PixelFormat;

/// Per-buffer size of the extradata plane the fake reports.
pub const FAKE_EXTRADATA_PLANE_SIZE: u32 = 8192;

/// A request received by the fake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    SetFormat(Port, FormatRequest),
    RequestBuffers(Port, u32),
    QueueBuffer(DeviceBuffer),
    DequeueBuffer(Port),
    StreamOn(Port),
    StreamOff(Port),
    SetControls(Vec<Control>),
    EncoderCommand(EncoderCommand),
    SubscribeEvent(u32),
    UnsubscribeEvent(u32),
    DequeueEvent,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<Call>,
    ioctl_count: usize,
    failures: BTreeMap<&'static str, i32>,
    requested: [u32; 2],
    min_buffers: [u32; 2],
    streaming: [bool; 2],
    queued: [VecDeque<DeviceBuffer>; 2],
    done: [VecDeque<DequeuedBuffer>; 2],
    events: VecDeque<DeviceEvent>,
    subscribed: BTreeSet<u32>,
    controls: BTreeMap<u32, i64>,
    sequence: u32,
}

impl FakeState {
    fn request(&mut self, op: &'static str, call: Call) -> Result<()> {
        self.calls.push(call);
        self.ioctl_count += 1;
        match self.failures.remove(op) {
            Some(errno) => Err(DeviceError::new(op, base::Error::new(errno))),
            None => Ok(()),
        }
    }

    fn has_pending(&self) -> bool {
        !self.events.is_empty() || self.done.iter().any(|done| !done.is_empty())
    }
}

fn invalid(op: &'static str) -> DeviceError {
    DeviceError::new(op, base::Error::new(libc::EINVAL))
}

pub struct FakeDevice {
    state: Mutex<FakeState>,
    ready: Event,
}

impl FakeDevice {
    pub fn new() -> base::Result<FakeDevice> {
        Ok(FakeDevice {
            state: Mutex::new(FakeState::default()),
            ready: Event::new()?,
        })
    }

    /// Makes the next request named `op` (a V4L2 ioctl name such as `"VIDIOC_STREAMON"`) fail
    /// with `errno`.
    pub fn fail_next(&self, op: &'static str, errno: i32) {
        self.state.lock().failures.insert(op, errno);
    }

    /// Makes `request_buffers` on `port` grant at least `count` buffers.
    pub fn set_min_buffers(&self, port: Port, count: u32) {
        self.state.lock().min_buffers[port.index()] = count;
    }

    /// Completes the oldest buffer queued on `port`. Input buffers report the bytes they were
    /// queued with; output buffers report `bytes_used`. Returns the completed index.
    pub fn complete_next(&self, port: Port, bytes_used: u32, flags: u32) -> Option<u32> {
        let mut state = self.state.lock();
        let buffer = state.queued[port.index()].pop_front()?;
        self.complete_locked(&mut state, buffer, bytes_used, flags)
    }

    /// Completes the buffer with `index` on `port`, wherever it is in the queue.
    pub fn complete_index(&self, port: Port, index: u32, bytes_used: u32, flags: u32) -> bool {
        let mut state = self.state.lock();
        let queue = &mut state.queued[port.index()];
        let buffer = match queue.iter().position(|b| b.index == index) {
            Some(pos) => queue.remove(pos),
            None => None,
        };
        match buffer {
            Some(buffer) => self
                .complete_locked(&mut state, buffer, bytes_used, flags)
                .is_some(),
            None => false,
        }
    }

    /// Completes every buffer queued on `port`, oldest first. Returns how many completed.
    pub fn complete_all(&self, port: Port, bytes_used: u32, flags: u32) -> usize {
        let mut completed = 0;
        while self.complete_next(port, bytes_used, flags).is_some() {
            completed += 1;
        }
        completed
    }

    fn complete_locked(
        &self,
        state: &mut FakeState,
        buffer: DeviceBuffer,
        bytes_used: u32,
        flags: u32,
    ) -> Option<u32> {
        let bytes_used = match buffer.port {
            Port::Input => buffer.planes.first().map_or(0, |p| p.bytes_used),
            Port::Output => bytes_used,
        };
        state.sequence += 1;
        let index = buffer.index;
        state.done[buffer.port.index()].push_back(DequeuedBuffer {
            port: buffer.port,
            index,
            flags: (buffer.flags & !V4L2_BUF_FLAG_QUEUED) | flags | V4L2_BUF_FLAG_DONE,
            timestamp_us: buffer.timestamp_us,
            bytes_used,
            data_offset: buffer.planes.first().map_or(0, |p| p.offset),
        });
        self.ready.signal().ok()?;
        Some(index)
    }

    /// Raises a driver event.
    pub fn push_event(&self, event: DeviceEvent) {
        let mut state = self.state.lock();
        state.events.push_back(event);
        // The eventfd can only fail on counter overflow.
        let _ = self.ready.signal();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Number of requests received so far, failed ones included.
    pub fn ioctl_count(&self) -> usize {
        self.state.lock().ioctl_count
    }

    /// Last value applied to control `id`.
    pub fn control(&self, id: u32) -> Option<i64> {
        self.state.lock().controls.get(&id).copied()
    }

    /// Buffers currently owned by the fake on `port`, oldest first.
    pub fn queued(&self, port: Port) -> Vec<DeviceBuffer> {
        self.state.lock().queued[port.index()].iter().cloned().collect()
    }

    pub fn is_streaming(&self, port: Port) -> bool {
        self.state.lock().streaming[port.index()]
    }

    pub fn subscribed_events(&self) -> Vec<u32> {
        self.state.lock().subscribed.iter().copied().collect()
    }
}

impl AsRawDescriptor for FakeDevice {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.ready.as_raw_descriptor()
    }
}

impl VencDevice for FakeDevice {
    fn set_format(&self, port: Port, request: &FormatRequest) -> Result<NegotiatedFormat> {
        const OP: &str = "VIDIOC_S_FMT";
        let mut state = self.state.lock();
        state.request(OP, Call::SetFormat(port, *request))?;
        let data = match port {
            Port::Input => {
                let format = PixelFormat::from_fourcc(request.fourcc).ok_or_else(|| invalid(OP))?;
                PlaneLayout {
                    size: format.frame_size(request.width, request.height),
                    stride: format.stride(request.width),
                }
            }
            Port::Output => {
                Codec::from_fourcc(request.fourcc).ok_or_else(|| invalid(OP))?;
                PlaneLayout {
                    size: PixelFormat::Nv12.frame_size(request.width, request.height) / 2,
                    stride: 0,
                }
            }
        };
        let mut planes = smallvec![data];
        if request.extradata {
            planes.push(PlaneLayout {
                size: FAKE_EXTRADATA_PLANE_SIZE,
                stride: 0,
            });
        }
        Ok(NegotiatedFormat {
            width: request.width,
            height: request.height,
            fourcc: request.fourcc,
            planes,
        })
    }

    fn request_buffers(&self, port: Port, count: u32) -> Result<u32> {
        const OP: &str = "VIDIOC_REQBUFS";
        let mut state = self.state.lock();
        state.request(OP, Call::RequestBuffers(port, count))?;
        if state.streaming[port.index()] {
            return Err(DeviceError::new(OP, base::Error::new(libc::EBUSY)));
        }
        let granted = if count == 0 {
            0
        } else {
            count.max(state.min_buffers[port.index()])
        };
        state.requested[port.index()] = granted;
        Ok(granted)
    }

    fn queue_buffer(&self, buffer: &DeviceBuffer) -> Result<()> {
        const OP: &str = "VIDIOC_QBUF";
        let mut state = self.state.lock();
        state.request(OP, Call::QueueBuffer(buffer.clone()))?;
        let port = buffer.port.index();
        if buffer.index >= state.requested[port]
            || buffer.planes.is_empty()
            || state.queued[port].iter().any(|b| b.index == buffer.index)
        {
            return Err(invalid(OP));
        }
        let mut buffer = buffer.clone();
        buffer.flags |= V4L2_BUF_FLAG_QUEUED;
        state.queued[port].push_back(buffer);
        Ok(())
    }

    fn dequeue_buffer(&self, port: Port) -> Result<Option<DequeuedBuffer>> {
        let mut state = self.state.lock();
        state.request("VIDIOC_DQBUF", Call::DequeueBuffer(port))?;
        let buffer = state.done[port.index()].pop_front();
        if !state.has_pending() {
            self.ready
                .reset()
                .map_err(|e| DeviceError::new("VIDIOC_DQBUF", e))?;
        }
        Ok(buffer)
    }

    fn stream_on(&self, port: Port) -> Result<()> {
        let mut state = self.state.lock();
        state.request("VIDIOC_STREAMON", Call::StreamOn(port))?;
        state.streaming[port.index()] = true;
        Ok(())
    }

    fn stream_off(&self, port: Port) -> Result<()> {
        let mut state = self.state.lock();
        state.request("VIDIOC_STREAMOFF", Call::StreamOff(port))?;
        state.streaming[port.index()] = false;
        state.queued[port.index()].clear();
        state.done[port.index()].clear();
        if !state.has_pending() {
            self.ready
                .reset()
                .map_err(|e| DeviceError::new("VIDIOC_STREAMOFF", e))?;
        }
        Ok(())
    }

    fn set_controls(&self, controls: &[Control]) -> Result<()> {
        let mut state = self.state.lock();
        state.request("VIDIOC_S_EXT_CTRLS", Call::SetControls(controls.to_vec()))?;
        for control in controls {
            state.controls.insert(control.id, control.value);
        }
        Ok(())
    }

    fn encoder_command(&self, command: EncoderCommand) -> Result<()> {
        let mut state = self.state.lock();
        state.request("VIDIOC_ENCODER_CMD", Call::EncoderCommand(command))?;
        if let EncoderCommand::Flush { input, output } = command {
            for (port, selected) in [(Port::Input, input), (Port::Output, output)] {
                if selected {
                    state.queued[port.index()].clear();
                }
            }
            state.events.push_back(DeviceEvent::FlushDone);
            let _ = self.ready.signal();
        }
        Ok(())
    }

    fn subscribe_event(&self, event_type: u32) -> Result<()> {
        let mut state = self.state.lock();
        state.request("VIDIOC_SUBSCRIBE_EVENT", Call::SubscribeEvent(event_type))?;
        state.subscribed.insert(event_type);
        Ok(())
    }

    fn unsubscribe_event(&self, event_type: u32) -> Result<()> {
        let mut state = self.state.lock();
        state.request(
            "VIDIOC_UNSUBSCRIBE_EVENT",
            Call::UnsubscribeEvent(event_type),
        )?;
        state.subscribed.remove(&event_type);
        Ok(())
    }

    fn dequeue_event(&self) -> Result<Option<DeviceEvent>> {
        let mut state = self.state.lock();
        state.request("VIDIOC_DQEVENT", Call::DequeueEvent)?;
        let event = state.events.pop_front();
        if !state.has_pending() {
            self.ready
                .reset()
                .map_err(|e| DeviceError::new("VIDIOC_DQEVENT", e))?;
        }
        Ok(event)
    }

    fn readiness(&self) -> EventType {
        EventType::Read
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use base::EventWaitResult;
    use smallvec::smallvec;

    use super::*;
    use crate::device::BufferPlane;

    fn buffer(port: Port, index: u32, bytes_used: u32) -> DeviceBuffer {
        DeviceBuffer {
            port,
            index,
            flags: 0,
            timestamp_us: 33_333 * index as i64,
            planes: smallvec![BufferPlane {
                fd: 40 + index as i32,
                length: 4096,
                offset: 0,
                bytes_used,
            }],
        }
    }

    #[test]
    fn completes_in_queue_order() {
        let fake = FakeDevice::new().unwrap();
        fake.request_buffers(Port::Output, 4).unwrap();
        fake.queue_buffer(&buffer(Port::Output, 2, 0)).unwrap();
        fake.queue_buffer(&buffer(Port::Output, 0, 0)).unwrap();

        assert_eq!(fake.dequeue_buffer(Port::Output).unwrap(), None);
        assert_eq!(fake.complete_next(Port::Output, 1000, 0), Some(2));
        assert_eq!(
            fake.ready.wait_timeout(Duration::from_millis(1)).unwrap(),
            EventWaitResult::Signaled
        );
        fake.ready.signal().unwrap();

        let done = fake.dequeue_buffer(Port::Output).unwrap().unwrap();
        assert_eq!(done.index, 2);
        assert_eq!(done.bytes_used, 1000);
        assert_eq!(done.timestamp_us, 66_666);
        // Nothing left: readiness cleared.
        assert_eq!(
            fake.ready.wait_timeout(Duration::from_millis(1)).unwrap(),
            EventWaitResult::TimedOut
        );
    }

    #[test]
    fn rejects_double_queue_and_unrequested_index() {
        let fake = FakeDevice::new().unwrap();
        assert!(fake.queue_buffer(&buffer(Port::Input, 0, 10)).is_err());
        fake.request_buffers(Port::Input, 2).unwrap();
        fake.queue_buffer(&buffer(Port::Input, 1, 10)).unwrap();
        assert!(fake.queue_buffer(&buffer(Port::Input, 1, 10)).is_err());
        assert!(fake.queue_buffer(&buffer(Port::Input, 2, 10)).is_err());
    }

    #[test]
    fn injected_failure_fires_once() {
        let fake = FakeDevice::new().unwrap();
        fake.fail_next("VIDIOC_STREAMON", libc::EBUSY);
        let err = fake.stream_on(Port::Output).unwrap_err();
        assert!(err.is_overload());
        assert!(!fake.is_streaming(Port::Output));
        fake.stream_on(Port::Output).unwrap();
        assert!(fake.is_streaming(Port::Output));
        assert_eq!(fake.ioctl_count(), 2);
    }

    #[test]
    fn stream_off_returns_buffers() {
        let fake = FakeDevice::new().unwrap();
        fake.request_buffers(Port::Input, 2).unwrap();
        fake.stream_on(Port::Input).unwrap();
        fake.queue_buffer(&buffer(Port::Input, 0, 10)).unwrap();
        fake.stream_off(Port::Input).unwrap();
        assert!(fake.queued(Port::Input).is_empty());
        assert_eq!(fake.complete_next(Port::Input, 0, 0), None);
    }

    #[test]
    fn extradata_plane_reported() {
        let fake = FakeDevice::new().unwrap();
        let format = fake
            .set_format(
                Port::Input,
                &FormatRequest {
                    width: 640,
                    height: 480,
                    fourcc: V4L2_PIX_FMT_NV12,
                    extradata: true,
                },
            )
            .unwrap();
        assert!(format.has_extradata_plane());
        assert_eq!(format.data_plane().stride, 640);
        assert_eq!(
            format.extradata_plane().map(|p| p.size),
            Some(FAKE_EXTRADATA_PLANE_SIZE)
        );
    }
}
