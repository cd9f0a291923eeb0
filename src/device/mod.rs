// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The queue-pair ioctl protocol the control plane drives, abstracted over the kernel driver.

pub mod fake;
mod v4l2;

use std::fmt;
use std::fmt::Display;

use base::AsRawDescriptor;
use base::EventType;
use base::RawDescriptor;
use smallvec::SmallVec;
use thiserror::Error;
use videodev2_sys::*;

pub use self::v4l2::V4l2Device;

/// One of the two buffer queues of an encoder.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Port {
    /// Raw frames flowing into the encoder (the V4L2 OUTPUT queue).
    Input,
    /// Encoded bitstream flowing out of the encoder (the V4L2 CAPTURE queue).
    Output,
}

impl Port {
    pub const ALL: [Port; 2] = [Port::Input, Port::Output];

    pub fn buf_type(self) -> u32 {
        match self {
            Port::Input => V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE,
            Port::Output => V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE,
        }
    }

    pub fn from_buf_type(buf_type: u32) -> Option<Port> {
        match buf_type {
            V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE => Some(Port::Input),
            V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE => Some(Port::Output),
            _ => None,
        }
    }

    /// Index for per-port arrays.
    pub fn index(self) -> usize {
        match self {
            Port::Input => 0,
            Port::Output => 1,
        }
    }

    pub fn other(self) -> Port {
        match self {
            Port::Input => Port::Output,
            Port::Output => Port::Input,
        }
    }
}

impl Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Port::Input => write!(f, "input"),
            Port::Output => write!(f, "output"),
        }
    }
}

/// A failed driver request.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{op} failed: {errno}")]
pub struct DeviceError {
    pub op: &'static str,
    pub errno: base::Error,
}

impl DeviceError {
    pub fn new(op: &'static str, errno: base::Error) -> DeviceError {
        DeviceError { op, errno }
    }

    /// Builds the error from the calling thread's `errno`.
    pub fn last(op: &'static str) -> DeviceError {
        DeviceError::new(op, base::Error::last())
    }

    /// True when the driver reported that it has no capacity left for this session.
    pub fn is_overload(&self) -> bool {
        matches!(self.errno.errno(), libc::EBUSY | libc::ENOMEM)
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;

/// Format requested for one port.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FormatRequest {
    pub width: u32,
    pub height: u32,
    pub fourcc: u32,
    /// Ask the driver for an additional extradata plane.
    pub extradata: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaneLayout {
    pub size: u32,
    pub stride: u32,
}

/// Format the driver settled on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub width: u32,
    pub height: u32,
    pub fourcc: u32,
    pub planes: SmallVec<[PlaneLayout; 2]>,
}

impl NegotiatedFormat {
    /// The driver appends the extradata plane after the data plane.
    pub fn has_extradata_plane(&self) -> bool {
        self.planes.len() >= 2
    }

    pub fn data_plane(&self) -> PlaneLayout {
        self.planes.first().copied().unwrap_or_default()
    }

    pub fn extradata_plane(&self) -> Option<PlaneLayout> {
        if self.has_extradata_plane() {
            self.planes.last().copied()
        } else {
            None
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BufferPlane {
    pub fd: RawDescriptor,
    pub length: u32,
    pub offset: u32,
    pub bytes_used: u32,
}

/// A buffer handed to the driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceBuffer {
    pub port: Port,
    pub index: u32,
    /// `V4L2_BUF_FLAG_*` bits.
    pub flags: u32,
    pub timestamp_us: i64,
    pub planes: SmallVec<[BufferPlane; 2]>,
}

/// A buffer the driver handed back.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DequeuedBuffer {
    pub port: Port,
    pub index: u32,
    pub flags: u32,
    pub timestamp_us: i64,
    pub bytes_used: u32,
    pub data_offset: u32,
}

/// Asynchronous notifications raised by the driver.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceEvent {
    FlushDone,
    HardwareOverload,
    SystemError,
    InsufficientResources,
    EndOfStream,
    Other(u32),
}

impl DeviceEvent {
    pub fn from_v4l2(event_type: u32) -> DeviceEvent {
        match event_type {
            V4L2_EVENT_MSM_VIDC_FLUSH_DONE => DeviceEvent::FlushDone,
            V4L2_EVENT_MSM_VIDC_HW_OVERLOAD | V4L2_EVENT_MSM_VIDC_MAX_CLIENTS => {
                DeviceEvent::HardwareOverload
            }
            V4L2_EVENT_MSM_VIDC_SYS_ERROR => DeviceEvent::SystemError,
            V4L2_EVENT_MSM_VIDC_PORT_SETTINGS_CHANGED_INSUFFICIENT
            | V4L2_EVENT_MSM_VIDC_HW_UNSUPPORTED => DeviceEvent::InsufficientResources,
            V4L2_EVENT_EOS => DeviceEvent::EndOfStream,
            other => DeviceEvent::Other(other),
        }
    }

    /// Events the control plane subscribes to when streaming starts.
    pub const SUBSCRIBED: [u32; 6] = [
        V4L2_EVENT_MSM_VIDC_FLUSH_DONE,
        V4L2_EVENT_MSM_VIDC_SYS_ERROR,
        V4L2_EVENT_MSM_VIDC_HW_OVERLOAD,
        V4L2_EVENT_MSM_VIDC_MAX_CLIENTS,
        V4L2_EVENT_MSM_VIDC_HW_UNSUPPORTED,
        V4L2_EVENT_MSM_VIDC_PORT_SETTINGS_CHANGED_INSUFFICIENT,
    ];
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EncoderCommand {
    /// Return every queued buffer on the selected ports.
    Flush { input: bool, output: bool },
    /// Finish the stream after the last queued frame.
    Stop,
}

/// A control id and its value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Control {
    pub id: u32,
    pub value: i64,
}

impl Control {
    pub fn new(id: u32, value: impl Into<i64>) -> Control {
        Control {
            id,
            value: value.into(),
        }
    }
}

/// The encoder driver.
///
/// Every method issues at most one request to the driver and never blocks. The descriptor
/// returned by `as_raw_descriptor` becomes ready when buffers or events can be dequeued.
pub trait VencDevice: AsRawDescriptor + Send + Sync {
    fn set_format(&self, port: Port, request: &FormatRequest) -> Result<NegotiatedFormat>;

    /// Asks for `count` buffer slots on `port`. Returns the count the driver granted.
    fn request_buffers(&self, port: Port, count: u32) -> Result<u32>;

    fn queue_buffer(&self, buffer: &DeviceBuffer) -> Result<()>;

    /// Takes a completed buffer off `port`, or `None` if there is none yet.
    fn dequeue_buffer(&self, port: Port) -> Result<Option<DequeuedBuffer>>;

    fn stream_on(&self, port: Port) -> Result<()>;

    /// Stops `port`. The driver gives up every buffer queued on it.
    fn stream_off(&self, port: Port) -> Result<()>;

    /// Applies all of `controls`, or none of them.
    fn set_controls(&self, controls: &[Control]) -> Result<()>;

    fn encoder_command(&self, command: EncoderCommand) -> Result<()>;

    fn subscribe_event(&self, event_type: u32) -> Result<()>;

    fn unsubscribe_event(&self, event_type: u32) -> Result<()>;

    fn dequeue_event(&self) -> Result<Option<DeviceEvent>>;

    /// Readiness conditions to wait for on the device descriptor.
    fn readiness(&self) -> EventType {
        EventType::All
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_mapping() {
        assert_eq!(Port::Input.buf_type(), V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE);
        assert_eq!(
            Port::from_buf_type(V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE),
            Some(Port::Output)
        );
        assert_eq!(Port::Input.other(), Port::Output);
        assert_eq!(Port::Output.index(), 1);
    }

    #[test]
    fn overload_classification() {
        assert!(DeviceError::new("stream_on", base::Error::new(libc::EBUSY)).is_overload());
        assert!(DeviceError::new("stream_on", base::Error::new(libc::ENOMEM)).is_overload());
        assert!(!DeviceError::new("stream_on", base::Error::new(libc::EINVAL)).is_overload());
    }

    #[test]
    fn event_translation() {
        assert_eq!(
            DeviceEvent::from_v4l2(V4L2_EVENT_MSM_VIDC_FLUSH_DONE),
            DeviceEvent::FlushDone
        );
        assert_eq!(
            DeviceEvent::from_v4l2(V4L2_EVENT_MSM_VIDC_MAX_CLIENTS),
            DeviceEvent::HardwareOverload
        );
        assert_eq!(DeviceEvent::from_v4l2(1234), DeviceEvent::Other(1234));
    }
}
