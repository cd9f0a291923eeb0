// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Linux V4L2 memory-to-memory encoder ioctl bindings, including the msm-vidc vendor extensions.

// Translated from include/uapi/linux/videodev2.h, include/uapi/linux/v4l2-controls.h and
// include/media/msm_vidc_utils.h

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

pub mod controls;
pub mod dma_buf;
pub mod extradata;

use std::os::raw::c_int;
use std::os::raw::c_ulong;
use std::os::raw::c_void;

use base::ioctl_ior_nr;
use base::ioctl_iow_nr;
use base::ioctl_iowr_nr;

pub const VIDEO_MAX_PLANES: usize = 8;

/// Packs a four character code the way `v4l2_fourcc` does.
pub const fn v4l2_fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24)
}

pub const V4L2_PIX_FMT_NV12: u32 = v4l2_fourcc(b'N', b'V', b'1', b'2');
pub const V4L2_PIX_FMT_NV21: u32 = v4l2_fourcc(b'N', b'V', b'2', b'1');
pub const V4L2_PIX_FMT_YUV420: u32 = v4l2_fourcc(b'Y', b'U', b'1', b'2');
pub const V4L2_PIX_FMT_NV12_UBWC: u32 = v4l2_fourcc(b'Q', b'1', b'2', b'8');
pub const V4L2_PIX_FMT_H264: u32 = v4l2_fourcc(b'H', b'2', b'6', b'4');
pub const V4L2_PIX_FMT_HEVC: u32 = v4l2_fourcc(b'H', b'E', b'V', b'C');
pub const V4L2_PIX_FMT_VP8: u32 = v4l2_fourcc(b'V', b'P', b'8', b'0');

pub const V4L2_CAP_VIDEO_M2M_MPLANE: u32 = 0x00004000;
pub const V4L2_CAP_STREAMING: u32 = 0x04000000;
pub const V4L2_CAP_DEVICE_CAPS: u32 = 0x80000000;
pub const V4L2_CAP_TIMEPERFRAME: u32 = 0x1000;

pub const V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE: u32 = 9;
pub const V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE: u32 = 10;

pub const V4L2_MEMORY_MMAP: u32 = 1;
pub const V4L2_MEMORY_USERPTR: u32 = 2;
pub const V4L2_MEMORY_DMABUF: u32 = 4;

pub const V4L2_FIELD_NONE: u32 = 1;

pub const V4L2_BUF_FLAG_MAPPED: u32 = 0x00000001;
pub const V4L2_BUF_FLAG_QUEUED: u32 = 0x00000002;
pub const V4L2_BUF_FLAG_DONE: u32 = 0x00000004;
pub const V4L2_BUF_FLAG_KEYFRAME: u32 = 0x00000008;
pub const V4L2_BUF_FLAG_PFRAME: u32 = 0x00000010;
pub const V4L2_BUF_FLAG_BFRAME: u32 = 0x00000020;
pub const V4L2_BUF_FLAG_ERROR: u32 = 0x00000040;
pub const V4L2_BUF_FLAG_TIMESTAMP_COPY: u32 = 0x00004000;
pub const V4L2_BUF_FLAG_LAST: u32 = 0x00100000;
pub const V4L2_QCOM_BUF_FLAG_CODECCONFIG: u32 = 0x00020000;
pub const V4L2_QCOM_BUF_FLAG_EOSEQ: u32 = 0x00040000;
pub const V4L2_QCOM_BUF_DATA_CORRUPT: u32 = 0x00400000;
pub const V4L2_QCOM_BUF_FLAG_EOS: u32 = 0x02000000;
pub const V4L2_MSM_BUF_FLAG_DEFER: u32 = 0x40000000;

pub const V4L2_ENC_CMD_START: u32 = 0;
pub const V4L2_ENC_CMD_STOP: u32 = 1;
pub const V4L2_ENC_CMD_PAUSE: u32 = 2;
pub const V4L2_ENC_CMD_RESUME: u32 = 3;
pub const V4L2_QCOM_CMD_FLUSH: u32 = 4;
pub const V4L2_QCOM_CMD_FLUSH_OUTPUT: u32 = 1 << 0;
pub const V4L2_QCOM_CMD_FLUSH_CAPTURE: u32 = 1 << 1;

pub const V4L2_EVENT_ALL: u32 = 0;
pub const V4L2_EVENT_EOS: u32 = 2;
pub const V4L2_EVENT_PRIVATE_START: u32 = 0x08000000;
pub const V4L2_EVENT_MSM_VIDC_START: u32 = V4L2_EVENT_PRIVATE_START + 0x00001000;
pub const V4L2_EVENT_MSM_VIDC_FLUSH_DONE: u32 = V4L2_EVENT_MSM_VIDC_START + 1;
pub const V4L2_EVENT_MSM_VIDC_PORT_SETTINGS_CHANGED_SUFFICIENT: u32 =
    V4L2_EVENT_MSM_VIDC_START + 2;
pub const V4L2_EVENT_MSM_VIDC_PORT_SETTINGS_CHANGED_INSUFFICIENT: u32 =
    V4L2_EVENT_MSM_VIDC_START + 3;
pub const V4L2_EVENT_MSM_VIDC_SYS_ERROR: u32 = V4L2_EVENT_MSM_VIDC_START + 5;
pub const V4L2_EVENT_MSM_VIDC_RELEASE_BUFFER_REFERENCE: u32 = V4L2_EVENT_MSM_VIDC_START + 6;
pub const V4L2_EVENT_MSM_VIDC_HW_OVERLOAD: u32 = V4L2_EVENT_MSM_VIDC_START + 8;
pub const V4L2_EVENT_MSM_VIDC_MAX_CLIENTS: u32 = V4L2_EVENT_MSM_VIDC_START + 9;
pub const V4L2_EVENT_MSM_VIDC_HW_UNSUPPORTED: u32 = V4L2_EVENT_MSM_VIDC_START + 10;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct v4l2_capability {
    pub driver: [u8; 16],
    pub card: [u8; 32],
    pub bus_info: [u8; 32],
    pub version: u32,
    pub capabilities: u32,
    pub device_caps: u32,
    pub reserved: [u32; 3],
}

#[repr(C, packed)]
#[derive(Debug, Default, Copy, Clone)]
pub struct v4l2_plane_pix_format {
    pub sizeimage: u32,
    pub bytesperline: u32,
    pub reserved: [u16; 6],
}

#[repr(C, packed)]
#[derive(Debug, Default, Copy, Clone)]
pub struct v4l2_pix_format_mplane {
    pub width: u32,
    pub height: u32,
    pub pixelformat: u32,
    pub field: u32,
    pub colorspace: u32,
    pub plane_fmt: [v4l2_plane_pix_format; VIDEO_MAX_PLANES],
    pub num_planes: u8,
    pub flags: u8,
    pub ycbcr_enc: u8,
    pub quantization: u8,
    pub xfer_func: u8,
    pub reserved: [u8; 7],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union v4l2_format__bindgen_ty_1 {
    pub pix_mp: v4l2_pix_format_mplane,
    pub raw_data: [u8; 200usize],
    // The kernel union holds pointer-bearing members, which makes it 8-byte aligned.
    _align: [u64; 25usize],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct v4l2_format {
    pub type_: u32,
    pub fmt: v4l2_format__bindgen_ty_1,
}

impl Default for v4l2_format {
    fn default() -> Self {
        // SAFETY: trivially safe
        unsafe { ::std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct v4l2_requestbuffers {
    pub count: u32,
    pub type_: u32,
    pub memory: u32,
    pub capabilities: u32,
    pub flags: u8,
    pub reserved: [u8; 3],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct v4l2_timecode {
    pub type_: u32,
    pub flags: u32,
    pub frames: u8,
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub userbits: [u8; 4],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union v4l2_plane__bindgen_ty_1 {
    pub mem_offset: u32,
    pub userptr: c_ulong,
    pub fd: i32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct v4l2_plane {
    pub bytesused: u32,
    pub length: u32,
    pub m: v4l2_plane__bindgen_ty_1,
    pub data_offset: u32,
    pub reserved: [u32; 11],
}

impl Default for v4l2_plane {
    fn default() -> Self {
        // SAFETY: trivially safe
        unsafe { ::std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union v4l2_buffer__bindgen_ty_1 {
    pub offset: u32,
    pub userptr: c_ulong,
    pub planes: *mut v4l2_plane,
    pub fd: i32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct v4l2_buffer {
    pub index: u32,
    pub type_: u32,
    pub bytesused: u32,
    pub flags: u32,
    pub field: u32,
    pub timestamp: libc::timeval,
    pub timecode: v4l2_timecode,
    pub sequence: u32,
    pub memory: u32,
    pub m: v4l2_buffer__bindgen_ty_1,
    pub length: u32,
    pub reserved2: u32,
    pub request_fd: i32,
}

impl Default for v4l2_buffer {
    fn default() -> Self {
        // SAFETY: trivially safe
        unsafe { ::std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct v4l2_control {
    pub id: u32,
    pub value: i32,
}

#[repr(C, packed)]
#[derive(Copy, Clone)]
pub union v4l2_ext_control__bindgen_ty_1 {
    pub value: i32,
    pub value64: i64,
    pub ptr: *mut c_void,
}

#[repr(C, packed)]
#[derive(Copy, Clone)]
pub struct v4l2_ext_control {
    pub id: u32,
    pub size: u32,
    pub reserved2: [u32; 1],
    pub u: v4l2_ext_control__bindgen_ty_1,
}

impl Default for v4l2_ext_control {
    fn default() -> Self {
        // SAFETY: trivially safe
        unsafe { ::std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct v4l2_ext_controls {
    pub which: u32,
    pub count: u32,
    pub error_idx: u32,
    pub request_fd: i32,
    pub reserved: [u32; 1],
    pub controls: *mut v4l2_ext_control,
}

impl Default for v4l2_ext_controls {
    fn default() -> Self {
        // SAFETY: trivially safe
        unsafe { ::std::mem::zeroed() }
    }
}

pub const V4L2_CTRL_WHICH_CUR_VAL: u32 = 0;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct v4l2_encoder_cmd {
    pub cmd: u32,
    pub flags: u32,
    pub raw: [u32; 8],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct v4l2_event_subscription {
    pub type_: u32,
    pub id: u32,
    pub flags: u32,
    pub reserved: [u32; 5],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct v4l2_event {
    pub type_: u32,
    pub u: [u64; 8],
    pub pending: u32,
    pub sequence: u32,
    pub timestamp: libc::timespec,
    pub id: u32,
    pub reserved: [u32; 8],
}

impl Default for v4l2_event {
    fn default() -> Self {
        // SAFETY: trivially safe
        unsafe { ::std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct v4l2_fract {
    pub numerator: u32,
    pub denominator: u32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct v4l2_outputparm {
    pub capability: u32,
    pub outputmode: u32,
    pub timeperframe: v4l2_fract,
    pub extendedmode: u32,
    pub writebuffers: u32,
    pub reserved: [u32; 4],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union v4l2_streamparm__bindgen_ty_1 {
    pub output: v4l2_outputparm,
    pub raw_data: [u8; 200usize],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct v4l2_streamparm {
    pub type_: u32,
    pub parm: v4l2_streamparm__bindgen_ty_1,
}

impl Default for v4l2_streamparm {
    fn default() -> Self {
        // SAFETY: trivially safe
        unsafe { ::std::mem::zeroed() }
    }
}

pub const VIDEO_IOCTL_MAGIC: u32 = 0x56;

ioctl_ior_nr!(VIDIOC_QUERYCAP, VIDEO_IOCTL_MAGIC, 0, v4l2_capability);
ioctl_iowr_nr!(VIDIOC_G_FMT, VIDEO_IOCTL_MAGIC, 4, v4l2_format);
ioctl_iowr_nr!(VIDIOC_S_FMT, VIDEO_IOCTL_MAGIC, 5, v4l2_format);
ioctl_iowr_nr!(VIDIOC_REQBUFS, VIDEO_IOCTL_MAGIC, 8, v4l2_requestbuffers);
ioctl_iowr_nr!(VIDIOC_QBUF, VIDEO_IOCTL_MAGIC, 15, v4l2_buffer);
ioctl_iowr_nr!(VIDIOC_DQBUF, VIDEO_IOCTL_MAGIC, 17, v4l2_buffer);
ioctl_iow_nr!(VIDIOC_STREAMON, VIDEO_IOCTL_MAGIC, 18, c_int);
ioctl_iow_nr!(VIDIOC_STREAMOFF, VIDEO_IOCTL_MAGIC, 19, c_int);
ioctl_iowr_nr!(VIDIOC_S_PARM, VIDEO_IOCTL_MAGIC, 22, v4l2_streamparm);
ioctl_iowr_nr!(VIDIOC_S_CTRL, VIDEO_IOCTL_MAGIC, 28, v4l2_control);
ioctl_iowr_nr!(VIDIOC_S_EXT_CTRLS, VIDEO_IOCTL_MAGIC, 72, v4l2_ext_controls);
ioctl_iowr_nr!(VIDIOC_ENCODER_CMD, VIDEO_IOCTL_MAGIC, 77, v4l2_encoder_cmd);
ioctl_ior_nr!(VIDIOC_DQEVENT, VIDEO_IOCTL_MAGIC, 89, v4l2_event);
ioctl_iow_nr!(
    VIDIOC_SUBSCRIBE_EVENT,
    VIDEO_IOCTL_MAGIC,
    90,
    v4l2_event_subscription
);
ioctl_iow_nr!(
    VIDIOC_UNSUBSCRIBE_EVENT,
    VIDEO_IOCTL_MAGIC,
    91,
    v4l2_event_subscription
);
