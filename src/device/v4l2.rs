// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! [`VencDevice`] over a V4L2 memory-to-memory encoder node.

use std::fs::File;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use base::ioctl_with_mut_ref;
use base::ioctl_with_ref;
use base::AsRawDescriptor;
use base::RawDescriptor;
use videodev2_sys::controls::V4L2_CTRL_CLASS_MPEG;
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

/// An opened encoder node, e.g. `/dev/video33`.
pub struct V4l2Device {
    file: File,
    card: String,
}

fn check(op: &'static str, ret: i32) -> Result<()> {
    if ret < 0 {
        Err(DeviceError::last(op))
    } else {
        Ok(())
    }
}

impl V4l2Device {
    /// Opens `path` in non-blocking mode and checks that it is a multi-planar M2M device.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<V4l2Device> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
            .open(path)
            .map_err(|e| DeviceError::new("open", e.into()))?;

        let mut caps = v4l2_capability::default();
        // SAFETY:
        // Safe because the kernel only writes within `caps` and we check the return value.
        check("VIDIOC_QUERYCAP", unsafe {
            ioctl_with_mut_ref(&file, VIDIOC_QUERYCAP(), &mut caps)
        })?;
        let capabilities = if caps.capabilities & V4L2_CAP_DEVICE_CAPS != 0 {
            caps.device_caps
        } else {
            caps.capabilities
        };
        let required = V4L2_CAP_VIDEO_M2M_MPLANE | V4L2_CAP_STREAMING;
        if capabilities & required != required {
            return Err(DeviceError::new(
                "VIDIOC_QUERYCAP",
                base::Error::new(libc::ENODEV),
            ));
        }

        let card_len = caps.card.iter().position(|c| *c == 0).unwrap_or(caps.card.len());
        let card = String::from_utf8_lossy(&caps.card[..card_len]).into_owned();
        Ok(V4l2Device { file, card })
    }

    /// Name of the device as reported by the driver.
    pub fn card(&self) -> &str {
        &self.card
    }
}

impl AsRawDescriptor for V4l2Device {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.file.as_raw_descriptor()
    }
}

impl VencDevice for V4l2Device {
    fn set_format(&self, port: Port, request: &FormatRequest) -> Result<NegotiatedFormat> {
        let mut fmt = v4l2_format {
            type_: port.buf_type(),
            ..Default::default()
        };
        fmt.fmt.pix_mp = v4l2_pix_format_mplane {
            width: request.width,
            height: request.height,
            pixelformat: request.fourcc,
            field: V4L2_FIELD_NONE,
            num_planes: if request.extradata { 2 } else { 1 },
            ..Default::default()
        };
        // SAFETY:
        // Safe because the kernel only accesses `fmt` and we check the return value.
        check("VIDIOC_S_FMT", unsafe {
            ioctl_with_mut_ref(&self.file, VIDIOC_S_FMT(), &mut fmt)
        })?;

        // SAFETY:
        // Safe because the kernel filled the multi-planar member for an `_MPLANE` type.
        let pix = unsafe { fmt.fmt.pix_mp };
        let plane_fmt = pix.plane_fmt;
        let num_planes = (pix.num_planes as usize).min(VIDEO_MAX_PLANES);
        let planes = plane_fmt[..num_planes]
            .iter()
            .map(|plane| PlaneLayout {
                size: plane.sizeimage,
                stride: plane.bytesperline,
            })
            .collect();
        Ok(NegotiatedFormat {
            width: pix.width,
            height: pix.height,
            fourcc: pix.pixelformat,
            planes,
        })
    }

    fn request_buffers(&self, port: Port, count: u32) -> Result<u32> {
        let mut req = v4l2_requestbuffers {
            count,
            type_: port.buf_type(),
            memory: V4L2_MEMORY_DMABUF,
            ..Default::default()
        };
        // SAFETY:
        // Safe because the kernel only accesses `req` and we check the return value.
        check("VIDIOC_REQBUFS", unsafe {
            ioctl_with_mut_ref(&self.file, VIDIOC_REQBUFS(), &mut req)
        })?;
        Ok(req.count)
    }

    fn queue_buffer(&self, buffer: &DeviceBuffer) -> Result<()> {
        let mut planes = [v4l2_plane::default(); VIDEO_MAX_PLANES];
        for (plane, desc) in planes.iter_mut().zip(buffer.planes.iter()) {
            plane.bytesused = desc.bytes_used;
            plane.length = desc.length;
            plane.m.fd = desc.fd;
            plane.data_offset = desc.offset;
            // msm-vidc looks the buffer up by descriptor and offset.
            plane.reserved[0] = desc.fd as u32;
            plane.reserved[1] = desc.offset;
        }
        let mut buf = v4l2_buffer {
            index: buffer.index,
            type_: buffer.port.buf_type(),
            flags: buffer.flags,
            field: V4L2_FIELD_NONE,
            memory: V4L2_MEMORY_DMABUF,
            length: buffer.planes.len() as u32,
            timestamp: libc::timeval {
                tv_sec: (buffer.timestamp_us / 1_000_000) as libc::time_t,
                tv_usec: (buffer.timestamp_us % 1_000_000) as libc::suseconds_t,
            },
            ..Default::default()
        };
        buf.m.planes = planes.as_mut_ptr();
        // SAFETY:
        // Safe because `planes` outlives the call, `length` bounds the plane array and we check
        // the return value.
        check("VIDIOC_QBUF", unsafe {
            ioctl_with_mut_ref(&self.file, VIDIOC_QBUF(), &mut buf)
        })
    }

    fn dequeue_buffer(&self, port: Port) -> Result<Option<DequeuedBuffer>> {
        let mut planes = [v4l2_plane::default(); VIDEO_MAX_PLANES];
        let mut buf = v4l2_buffer {
            type_: port.buf_type(),
            memory: V4L2_MEMORY_DMABUF,
            length: VIDEO_MAX_PLANES as u32,
            ..Default::default()
        };
        buf.m.planes = planes.as_mut_ptr();
        // SAFETY:
        // Safe because `planes` has room for `length` entries and we check the return value.
        let ret = unsafe { ioctl_with_mut_ref(&self.file, VIDIOC_DQBUF(), &mut buf) };
        if ret < 0 {
            let err = DeviceError::last("VIDIOC_DQBUF");
            return match err.errno.errno() {
                libc::EAGAIN => Ok(None),
                _ => Err(err),
            };
        }
        Ok(Some(DequeuedBuffer {
            port,
            index: buf.index,
            flags: buf.flags,
            timestamp_us: buf.timestamp.tv_sec as i64 * 1_000_000 + buf.timestamp.tv_usec as i64,
            bytes_used: planes[0].bytesused,
            data_offset: planes[0].data_offset,
        }))
    }

    fn stream_on(&self, port: Port) -> Result<()> {
        let buf_type = port.buf_type() as libc::c_int;
        // SAFETY:
        // Safe because the kernel only reads `buf_type` and we check the return value.
        check("VIDIOC_STREAMON", unsafe {
            ioctl_with_ref(&self.file, VIDIOC_STREAMON(), &buf_type)
        })
    }

    fn stream_off(&self, port: Port) -> Result<()> {
        let buf_type = port.buf_type() as libc::c_int;
        // SAFETY:
        // Safe because the kernel only reads `buf_type` and we check the return value.
        check("VIDIOC_STREAMOFF", unsafe {
            ioctl_with_ref(&self.file, VIDIOC_STREAMOFF(), &buf_type)
        })
    }

    fn set_controls(&self, controls: &[Control]) -> Result<()> {
        if controls.is_empty() {
            return Ok(());
        }
        let mut ext: Vec<v4l2_ext_control> = controls
            .iter()
            .map(|control| {
                let mut ext = v4l2_ext_control {
                    id: control.id,
                    ..Default::default()
                };
                if control.value > i32::MAX as i64 || control.value < i32::MIN as i64 {
                    ext.u.value64 = control.value;
                } else {
                    ext.u.value = control.value as i32;
                }
                ext
            })
            .collect();
        let mut ctrls = v4l2_ext_controls {
            which: V4L2_CTRL_CLASS_MPEG,
            count: ext.len() as u32,
            ..Default::default()
        };
        ctrls.controls = ext.as_mut_ptr();
        // SAFETY:
        // Safe because `ext` outlives the call, `count` bounds it and we check the return value.
        check("VIDIOC_S_EXT_CTRLS", unsafe {
            ioctl_with_mut_ref(&self.file, VIDIOC_S_EXT_CTRLS(), &mut ctrls)
        })
    }

    fn encoder_command(&self, command: EncoderCommand) -> Result<()> {
        let mut cmd = match command {
            EncoderCommand::Flush { input, output } => {
                let mut flags = 0;
                if input {
                    flags |= V4L2_QCOM_CMD_FLUSH_OUTPUT;
                }
                if output {
                    flags |= V4L2_QCOM_CMD_FLUSH_CAPTURE;
                }
                v4l2_encoder_cmd {
                    cmd: V4L2_QCOM_CMD_FLUSH,
                    flags,
                    ..Default::default()
                }
            }
            EncoderCommand::Stop => v4l2_encoder_cmd {
                cmd: V4L2_ENC_CMD_STOP,
                ..Default::default()
            },
        };
        // SAFETY:
        // Safe because the kernel only accesses `cmd` and we check the return value.
        check("VIDIOC_ENCODER_CMD", unsafe {
            ioctl_with_mut_ref(&self.file, VIDIOC_ENCODER_CMD(), &mut cmd)
        })
    }

    fn subscribe_event(&self, event_type: u32) -> Result<()> {
        let sub = v4l2_event_subscription {
            type_: event_type,
            ..Default::default()
        };
        // SAFETY:
        // Safe because the kernel only reads `sub` and we check the return value.
        check("VIDIOC_SUBSCRIBE_EVENT", unsafe {
            ioctl_with_ref(&self.file, VIDIOC_SUBSCRIBE_EVENT(), &sub)
        })
    }

    fn unsubscribe_event(&self, event_type: u32) -> Result<()> {
        let sub = v4l2_event_subscription {
            type_: event_type,
            ..Default::default()
        };
        // SAFETY:
        // Safe because the kernel only reads `sub` and we check the return value.
        check("VIDIOC_UNSUBSCRIBE_EVENT", unsafe {
            ioctl_with_ref(&self.file, VIDIOC_UNSUBSCRIBE_EVENT(), &sub)
        })
    }

    fn dequeue_event(&self) -> Result<Option<DeviceEvent>> {
        let mut event = v4l2_event::default();
        // SAFETY:
        // Safe because the kernel only writes within `event` and we check the return value.
        let ret = unsafe { ioctl_with_mut_ref(&self.file, VIDIOC_DQEVENT(), &mut event) };
        if ret < 0 {
            let err = DeviceError::last("VIDIOC_DQEVENT");
            return match err.errno.errno() {
                libc::ENOENT | libc::EAGAIN => Ok(None),
                _ => Err(err),
            };
        }
        Ok(Some(DeviceEvent::from_v4l2(event.type_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_rejects_non_v4l2_node() {
        let err = match V4l2Device::open("/dev/null") {
            Ok(_) => panic!("/dev/null accepted as an encoder"),
            Err(e) => e,
        };
        assert_eq!(err.op, "VIDIOC_QUERYCAP");
    }

    #[test]
    fn open_missing_node() {
        let err = match V4l2Device::open("/nonexistent/video0") {
            Ok(_) => panic!("missing node opened"),
            Err(e) => e,
        };
        assert_eq!(err.op, "open");
        assert_eq!(err.errno.errno(), libc::ENOENT);
    }
}
