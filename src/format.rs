// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Codec, profile, level and pixel format descriptions shared by the configuration and queue
//! layers.

use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

use bitflags::bitflags;
use enumn::N;
use serde::Deserialize;
use serde::Serialize;
use videodev2_sys::controls::*;
use videodev2_sys::*;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    #[default]
    H264,
    Hevc,
    Vp8,
}

impl Codec {
    pub fn fourcc(self) -> u32 {
        match self {
            Codec::H264 => V4L2_PIX_FMT_H264,
            Codec::Hevc => V4L2_PIX_FMT_HEVC,
            Codec::Vp8 => V4L2_PIX_FMT_VP8,
        }
    }

    pub fn from_fourcc(fourcc: u32) -> Option<Codec> {
        match fourcc {
            V4L2_PIX_FMT_H264 => Some(Codec::H264),
            V4L2_PIX_FMT_HEVC => Some(Codec::Hevc),
            V4L2_PIX_FMT_VP8 => Some(Codec::Vp8),
            _ => None,
        }
    }

    /// Largest quantization parameter accepted by the codec.
    pub fn max_qp(self) -> u32 {
        match self {
            Codec::H264 | Codec::Hevc => 51,
            Codec::Vp8 => 127,
        }
    }

    /// Profile used when the client leaves the profile unspecified.
    pub fn default_profile(self) -> Profile {
        match self {
            Codec::H264 => Profile::H264High,
            Codec::Hevc => Profile::HevcMain,
            Codec::Vp8 => Profile::VP8Profile0,
        }
    }

    /// File extension of an elementary stream dump.
    pub fn dump_extension(self) -> &'static str {
        match self {
            Codec::H264 => "264",
            Codec::Hevc => "265",
            Codec::Vp8 => "ivf",
        }
    }

    pub(crate) fn profile_control(self) -> u32 {
        match self {
            Codec::H264 => V4L2_CID_MPEG_VIDEO_H264_PROFILE,
            Codec::Hevc => V4L2_CID_MPEG_VIDEO_HEVC_PROFILE,
            Codec::Vp8 => V4L2_CID_MPEG_VIDEO_VP8_PROFILE,
        }
    }

    /// VP8 carries its version in the profile control and has no separate level control.
    pub(crate) fn level_control(self) -> Option<u32> {
        match self {
            Codec::H264 => Some(V4L2_CID_MPEG_VIDEO_H264_LEVEL),
            Codec::Hevc => Some(V4L2_CID_MPEG_VIDEO_HEVC_LEVEL),
            Codec::Vp8 => None,
        }
    }
}

impl Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Codec::H264 => write!(f, "h264"),
            Codec::Hevc => write!(f, "hevc"),
            Codec::Vp8 => write!(f, "vp8"),
        }
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h264" | "avc" => Ok(Codec::H264),
            "hevc" | "h265" => Ok(Codec::Hevc),
            "vp8" => Ok(Codec::Vp8),
            _ => Err(format!("unknown codec \"{}\"", s)),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    H264Baseline,
    H264ConstrainedBaseline,
    H264Main,
    H264High,
    H264ConstrainedHigh,
    HevcMain,
    HevcMain10,
    VP8Profile0,
    VP8Profile1,
    VP8Profile2,
    VP8Profile3,
}

impl Profile {
    pub fn codec(self) -> Codec {
        use Profile::*;
        match self {
            H264Baseline | H264ConstrainedBaseline | H264Main | H264High | H264ConstrainedHigh => {
                Codec::H264
            }
            HevcMain | HevcMain10 => Codec::Hevc,
            VP8Profile0 | VP8Profile1 | VP8Profile2 | VP8Profile3 => Codec::Vp8,
        }
    }

    /// Whether the profile allows bi-directionally predicted frames.
    pub fn supports_b_frames(self) -> bool {
        matches!(
            self,
            Profile::H264Main | Profile::H264High | Profile::HevcMain | Profile::HevcMain10
        )
    }

    /// Whether the profile allows CABAC entropy coding.
    pub fn supports_cabac(self) -> bool {
        matches!(
            self,
            Profile::H264Main | Profile::H264High | Profile::H264ConstrainedHigh
        )
    }

    /// Scale applied to a level's maximum bitrate (cpbBrVclFactor / 1000).
    pub(crate) fn bitrate_factor_permille(self) -> u64 {
        match self {
            Profile::H264High | Profile::H264ConstrainedHigh => 1250,
            _ => 1000,
        }
    }

    pub(crate) fn v4l2_value(self) -> i32 {
        use Profile::*;
        match self {
            H264Baseline => V4L2_MPEG_VIDEO_H264_PROFILE_BASELINE,
            H264ConstrainedBaseline => V4L2_MPEG_VIDEO_H264_PROFILE_CONSTRAINED_BASELINE,
            H264Main => V4L2_MPEG_VIDEO_H264_PROFILE_MAIN,
            H264High => V4L2_MPEG_VIDEO_H264_PROFILE_HIGH,
            H264ConstrainedHigh => V4L2_MPEG_VIDEO_H264_PROFILE_CONSTRAINED_HIGH,
            HevcMain => V4L2_MPEG_VIDEO_HEVC_PROFILE_MAIN,
            HevcMain10 => V4L2_MPEG_VIDEO_HEVC_PROFILE_MAIN_10,
            VP8Profile0 => 0,
            VP8Profile1 => 1,
            VP8Profile2 => 2,
            VP8Profile3 => 3,
        }
    }
}

impl Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Profile::*;
        let name = match self {
            H264Baseline => "baseline",
            H264ConstrainedBaseline => "constrained baseline",
            H264Main => "main",
            H264High => "high",
            H264ConstrainedHigh => "constrained high",
            HevcMain => "main",
            HevcMain10 => "main10",
            VP8Profile0 => "profile 0",
            VP8Profile1 => "profile 1",
            VP8Profile2 => "profile 2",
            VP8Profile3 => "profile 3",
        };
        write!(f, "{} {}", self.codec(), name)
    }
}

/// Codec levels. Discriminants are ordered so that a higher level within a codec compares
/// greater.
#[allow(non_camel_case_types)]
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, N, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum Level {
    H264_1_0 = 0,
    H264_1b,
    H264_1_1,
    H264_1_2,
    H264_1_3,
    H264_2_0,
    H264_2_1,
    H264_2_2,
    H264_3_0,
    H264_3_1,
    H264_3_2,
    H264_4_0,
    H264_4_1,
    H264_4_2,
    H264_5_0,
    H264_5_1,
    H264_5_2,
    Hevc_1 = 0x100,
    Hevc_2,
    Hevc_2_1,
    Hevc_3,
    Hevc_3_1,
    Hevc_4,
    Hevc_4_1,
    Hevc_5,
    Hevc_5_1,
    Hevc_5_2,
    Hevc_6,
    Hevc_6_1,
    Hevc_6_2,
    VP8Version0 = 0x200,
    VP8Version1,
    VP8Version2,
    VP8Version3,
}

impl Level {
    pub fn codec(self) -> Codec {
        match (self as u32) >> 8 {
            0 => Codec::H264,
            1 => Codec::Hevc,
            _ => Codec::Vp8,
        }
    }

    /// Value of the level in the codec's V4L2 level enumeration.
    pub(crate) fn v4l2_value(self) -> i32 {
        (self as u32 & 0xff) as i32
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = format!("{:?}", self);
        // "H264_4_0" -> "4.0", "Hevc_5_1" -> "5.1", "VP8Version2" -> "version 2"
        match name.split_once('_') {
            Some((_, number)) => write!(f, "{} level {}", self.codec(), number.replace('_', ".")),
            None => write!(
                f,
                "{} version {}",
                self.codec(),
                name.trim_start_matches("VP8Version")
            ),
        }
    }
}

/// Raw frame layouts accepted on the input queue.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    #[default]
    Nv12,
    Nv21,
    Nv12Ubwc,
    Yuv420,
}

fn align(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

impl PixelFormat {
    pub fn fourcc(self) -> u32 {
        match self {
            PixelFormat::Nv12 => V4L2_PIX_FMT_NV12,
            PixelFormat::Nv21 => V4L2_PIX_FMT_NV21,
            PixelFormat::Nv12Ubwc => V4L2_PIX_FMT_NV12_UBWC,
            PixelFormat::Yuv420 => V4L2_PIX_FMT_YUV420,
        }
    }

    pub fn from_fourcc(fourcc: u32) -> Option<PixelFormat> {
        match fourcc {
            V4L2_PIX_FMT_NV12 => Some(PixelFormat::Nv12),
            V4L2_PIX_FMT_NV21 => Some(PixelFormat::Nv21),
            V4L2_PIX_FMT_NV12_UBWC => Some(PixelFormat::Nv12Ubwc),
            V4L2_PIX_FMT_YUV420 => Some(PixelFormat::Yuv420),
            _ => None,
        }
    }

    /// Line stride in bytes of the luma plane as laid out by the video hardware.
    pub fn stride(self, width: u32) -> u32 {
        match self {
            PixelFormat::Yuv420 => align(width, 16),
            _ => align(width, 128),
        }
    }

    /// Size in bytes of one frame in the hardware's buffer layout.
    pub fn frame_size(self, width: u32, height: u32) -> u32 {
        let stride = self.stride(width);
        match self {
            PixelFormat::Nv12 | PixelFormat::Nv21 => {
                let y_scanlines = align(height, 32);
                let uv_scanlines = align(height.div_ceil(2), 16);
                align(stride * y_scanlines + stride * uv_scanlines, 4096)
            }
            PixelFormat::Nv12Ubwc => {
                let y_plane = align(stride * align(height, 32), 4096);
                let uv_plane = align(stride * align(height.div_ceil(2), 32), 4096);
                let meta_stride = align(width.div_ceil(32), 64);
                let y_meta = align(meta_stride * align(height.div_ceil(8), 16), 4096);
                let uv_meta = align(meta_stride * align(height.div_ceil(16), 16), 4096);
                y_plane + uv_plane + y_meta + uv_meta
            }
            PixelFormat::Yuv420 => {
                let luma = stride * height;
                let chroma = (stride / 2) * height.div_ceil(2);
                align(luma + 2 * chroma, 4096)
            }
        }
    }
}

/// Rate control algorithms offered by the encoder firmware.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateControlMode {
    Off,
    VbrVfr,
    #[default]
    VbrCfr,
    CbrVfr,
    CbrCfr,
    MbrCfr,
    MbrVfr,
}

bitflags! {
    /// Set of rate control modes a device accepts.
    #[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
    #[repr(transparent)]
    pub struct RateControlModes: u32 {
        const OFF = 1 << 0;
        const VBR_VFR = 1 << 1;
        const VBR_CFR = 1 << 2;
        const CBR_VFR = 1 << 3;
        const CBR_CFR = 1 << 4;
        const MBR_CFR = 1 << 5;
        const MBR_VFR = 1 << 6;
    }
}

impl RateControlMode {
    pub fn is_off(self) -> bool {
        self == RateControlMode::Off
    }

    pub fn mask(self) -> RateControlModes {
        match self {
            RateControlMode::Off => RateControlModes::OFF,
            RateControlMode::VbrVfr => RateControlModes::VBR_VFR,
            RateControlMode::VbrCfr => RateControlModes::VBR_CFR,
            RateControlMode::CbrVfr => RateControlModes::CBR_VFR,
            RateControlMode::CbrCfr => RateControlModes::CBR_CFR,
            RateControlMode::MbrCfr => RateControlModes::MBR_CFR,
            RateControlMode::MbrVfr => RateControlModes::MBR_VFR,
        }
    }

    pub(crate) fn v4l2_value(self) -> i32 {
        match self {
            RateControlMode::Off => V4L2_CID_MPEG_VIDC_VIDEO_RATE_CONTROL_OFF,
            RateControlMode::VbrVfr => V4L2_CID_MPEG_VIDC_VIDEO_RATE_CONTROL_VBR_VFR,
            RateControlMode::VbrCfr => V4L2_CID_MPEG_VIDC_VIDEO_RATE_CONTROL_VBR_CFR,
            RateControlMode::CbrVfr => V4L2_CID_MPEG_VIDC_VIDEO_RATE_CONTROL_CBR_VFR,
            RateControlMode::CbrCfr => V4L2_CID_MPEG_VIDC_VIDEO_RATE_CONTROL_CBR_CFR,
            RateControlMode::MbrCfr => V4L2_CID_MPEG_VIDC_VIDEO_RATE_CONTROL_MBR_CFR,
            RateControlMode::MbrVfr => V4L2_CID_MPEG_VIDC_VIDEO_RATE_CONTROL_MBR_VFR,
        }
    }
}

/// Hierarchical reference structure.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierMode {
    #[default]
    None,
    HierP,
    HierB,
    HybridHierP,
}

/// Frame rate as a fraction of frames per second.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    pub fn new(numerator: u32, denominator: u32) -> FrameRate {
        FrameRate {
            numerator,
            denominator,
        }
    }

    /// Frames per second rounded up to a whole number.
    pub fn ceil_fps(self) -> u32 {
        if self.denominator == 0 {
            0
        } else {
            self.numerator.div_ceil(self.denominator)
        }
    }

    /// Frame rate in Q16 fixed point, as the firmware expects it.
    pub(crate) fn q16(self) -> i64 {
        if self.denominator == 0 {
            0
        } else {
            ((self.numerator as i64) << 16) / self.denominator as i64
        }
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        FrameRate::new(30, 1)
    }
}

impl Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_codec_and_value() {
        assert_eq!(Level::H264_4_0.codec(), Codec::H264);
        assert_eq!(Level::H264_4_0.v4l2_value(), 11);
        assert_eq!(Level::H264_5_2.v4l2_value(), V4L2_MPEG_VIDEO_H264_LEVEL_5_2);
        assert_eq!(Level::Hevc_5_1.codec(), Codec::Hevc);
        assert_eq!(Level::Hevc_5_1.v4l2_value(), 8);
        assert_eq!(Level::VP8Version3.codec(), Codec::Vp8);
        assert_eq!(Level::n(0x102), Some(Level::Hevc_2_1));
    }

    #[test]
    fn level_display() {
        assert_eq!(Level::H264_3_1.to_string(), "h264 level 3.1");
        assert_eq!(Level::H264_1b.to_string(), "h264 level 1b");
        assert_eq!(Level::VP8Version2.to_string(), "vp8 version 2");
    }

    #[test]
    fn b_frame_support() {
        assert!(Profile::H264High.supports_b_frames());
        assert!(!Profile::H264Baseline.supports_b_frames());
        assert!(!Profile::H264ConstrainedHigh.supports_b_frames());
        assert!(!Profile::VP8Profile0.supports_b_frames());
        assert!(Profile::HevcMain10.supports_b_frames());
        assert!(Profile::H264ConstrainedHigh.supports_cabac());
        assert!(!Profile::H264ConstrainedBaseline.supports_cabac());
        assert!(!Profile::HevcMain.supports_cabac());
    }

    #[test]
    fn codec_parsing() {
        assert_eq!("H264".parse::<Codec>(), Ok(Codec::H264));
        assert_eq!("h265".parse::<Codec>(), Ok(Codec::Hevc));
        assert!("mpeg2".parse::<Codec>().is_err());
        assert_eq!(Codec::from_fourcc(Codec::Vp8.fourcc()), Some(Codec::Vp8));
    }

    #[test]
    fn nv12_frame_size_is_page_aligned() {
        let size = PixelFormat::Nv12.frame_size(1920, 1080);
        assert_eq!(size % 4096, 0);
        // 2048 stride * (1088 + 544) scanlines.
        assert_eq!(size, 3342336);
    }

    #[test]
    fn frame_rate_fixed_point() {
        assert_eq!(FrameRate::new(30, 1).q16(), 30 << 16);
        assert_eq!(FrameRate::new(30000, 1001).ceil_fps(), 30);
    }
}
