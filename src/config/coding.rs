// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bitstream coding tools: intra refresh, slicing, entropy coding, deblocking, stream headers,
//! session scheduling hints and per-frame ROI QP maps.

use base::warn;
use serde::Deserialize;
use serde::Serialize;
use videodev2_sys::controls::*;
use videodev2_sys::extradata::msm_vidc_extradata_header;
use videodev2_sys::extradata::msm_vidc_roi_deltaqp_payload;
use videodev2_sys::extradata::MSM_VIDC_EXTRADATA_NONE;
use videodev2_sys::extradata::MSM_VIDC_EXTRADATA_ROI_QP;
use videodev2_sys::extradata::MSM_VIDC_EXTRADATA_VERSION;

use super::ConfigError;
use super::ConfigurationController;
use super::EncoderConfig;
use crate::device::Control;
use crate::error::Error;
use crate::format::Codec;
use crate::format::FrameRate;

/// Smallest slice the firmware accepts in `MaxBytes` mode.
pub const MIN_SLICE_BYTES: u32 = 512;

/// ROI maps kept waiting for their frame. The oldest is dropped beyond this.
pub const MAX_PENDING_ROI: usize = 32;

const MACROBLOCK_SIZE: u32 = 16;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntraRefreshMode {
    #[default]
    None,
    Cyclic,
    Adaptive,
    CyclicAdaptive,
    Random,
}

impl IntraRefreshMode {
    fn v4l2_value(self) -> i32 {
        match self {
            IntraRefreshMode::None => V4L2_CID_MPEG_VIDC_VIDEO_INTRA_REFRESH_NONE,
            IntraRefreshMode::Cyclic => V4L2_CID_MPEG_VIDC_VIDEO_INTRA_REFRESH_CYCLIC,
            IntraRefreshMode::Adaptive => V4L2_CID_MPEG_VIDC_VIDEO_INTRA_REFRESH_ADAPTIVE,
            IntraRefreshMode::CyclicAdaptive => {
                V4L2_CID_MPEG_VIDC_VIDEO_INTRA_REFRESH_CYCLIC_ADAPTIVE
            }
            IntraRefreshMode::Random => V4L2_CID_MPEG_VIDC_VIDEO_INTRA_REFRESH_RANDOM,
        }
    }
}

/// Spreads intra coding over `mbs` macroblocks of every frame instead of sending key frames.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntraRefresh {
    pub mode: IntraRefreshMode,
    #[serde(default)]
    pub mbs: u32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceMode {
    #[default]
    Single,
    MaxMacroblocks(u32),
    MaxBytes(u32),
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopFilterMode {
    #[default]
    Enabled,
    Disabled,
    DisabledAtSliceBoundary,
}

/// H.264 deblocking filter with its alpha and beta offsets.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopFilter {
    pub mode: LoopFilterMode,
    #[serde(default)]
    pub alpha: i32,
    #[serde(default)]
    pub beta: i32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPriority {
    Realtime,
    #[default]
    NonRealtime,
}

/// Clockwise rotation applied by the hardware before encoding.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    #[default]
    None,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> Option<Rotation> {
        match degrees {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    fn v4l2_value(self) -> i32 {
        match self {
            Rotation::None => V4L2_CID_MPEG_VIDC_VIDEO_ROTATION_NONE,
            Rotation::Deg90 => V4L2_CID_MPEG_VIDC_VIDEO_ROTATION_90,
            Rotation::Deg180 => V4L2_CID_MPEG_VIDC_VIDEO_ROTATION_180,
            Rotation::Deg270 => V4L2_CID_MPEG_VIDC_VIDEO_ROTATION_270,
        }
    }
}

/// QP offsets for one input frame, one signed byte per ROI block in raster order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoiQp {
    /// Applies to the first input frame whose timestamp is at or after this one.
    pub timestamp_us: i64,
    pub delta_qp: Vec<i8>,
}

impl RoiQp {
    /// Side of a square ROI block, in pixels.
    pub fn block_size(codec: Codec) -> Option<u32> {
        match codec {
            Codec::H264 => Some(16),
            Codec::Hevc => Some(32),
            Codec::Vp8 => None,
        }
    }

    /// Encodes the map as an extradata plane: the ROI record followed by the terminator.
    pub fn to_extradata(&self) -> Vec<u8> {
        let deltas = self.delta_qp.len();
        let padded = deltas.next_multiple_of(4);
        let data_size = std::mem::size_of::<msm_vidc_roi_deltaqp_payload>() + padded;
        let size = std::mem::size_of::<msm_vidc_extradata_header>() + data_size;
        let header = msm_vidc_extradata_header {
            size: size as u32,
            version: MSM_VIDC_EXTRADATA_VERSION,
            port_index: 0,
            type_: MSM_VIDC_EXTRADATA_ROI_QP,
            data_size: data_size as u32,
        };
        let payload = msm_vidc_roi_deltaqp_payload {
            b_roi_info: 1,
            mbi_info_size: deltas as i32,
        };

        let mut data = Vec::with_capacity(size + std::mem::size_of::<msm_vidc_extradata_header>());
        put_header(&mut data, &header);
        data.extend_from_slice(&payload.b_roi_info.to_ne_bytes());
        data.extend_from_slice(&payload.mbi_info_size.to_ne_bytes());
        data.extend(self.delta_qp.iter().map(|&delta| delta as u8));
        data.resize(size, 0);
        data.extend_from_slice(&extradata_terminator());
        data
    }
}

fn put_header(data: &mut Vec<u8>, header: &msm_vidc_extradata_header) {
    for field in [
        header.size,
        header.version,
        header.port_index,
        header.type_,
        header.data_size,
    ] {
        data.extend_from_slice(&field.to_ne_bytes());
    }
}

/// An extradata plane holding nothing but the terminating record.
pub fn extradata_terminator() -> Vec<u8> {
    let mut data = Vec::with_capacity(std::mem::size_of::<msm_vidc_extradata_header>());
    put_header(
        &mut data,
        &msm_vidc_extradata_header {
            size: std::mem::size_of::<msm_vidc_extradata_header>() as u32,
            version: MSM_VIDC_EXTRADATA_VERSION,
            port_index: 0,
            type_: MSM_VIDC_EXTRADATA_NONE,
            data_size: 0,
        },
    );
    data
}

pub(super) fn entropy_control(cabac: bool) -> Control {
    Control::new(
        V4L2_CID_MPEG_VIDEO_H264_ENTROPY_MODE,
        if cabac {
            V4L2_MPEG_VIDEO_H264_ENTROPY_MODE_CABAC
        } else {
            V4L2_MPEG_VIDEO_H264_ENTROPY_MODE_CAVLC
        },
    )
}

fn blocks(width: u32, height: u32, block: u32) -> u32 {
    width.div_ceil(block) * height.div_ceil(block)
}

fn require_codec(
    cfg: &EncoderConfig,
    feature: &'static str,
    codecs: &[Codec],
) -> Result<(), ConfigError> {
    if codecs.contains(&cfg.codec) {
        Ok(())
    } else {
        Err(ConfigError::UnsupportedForCodec {
            feature,
            codec: cfg.codec,
        })
    }
}

impl EncoderConfig {
    /// Removes every pending ROI map due at or before `timestamp_us` and returns the latest.
    pub(crate) fn take_roi(&mut self, timestamp_us: i64) -> Option<RoiQp> {
        let mut due = None;
        while self
            .roi_qp
            .front()
            .map_or(false, |roi| roi.timestamp_us <= timestamp_us)
        {
            due = self.roi_qp.pop_front();
        }
        due
    }
}

impl ConfigurationController {
    pub fn set_intra_refresh(&self, refresh: IntraRefresh) -> crate::Result<()> {
        self.update("intra refresh", |cfg, _| {
            let total = blocks(cfg.width, cfg.height, MACROBLOCK_SIZE);
            let mbs = match refresh.mode {
                IntraRefreshMode::None => 0,
                _ if refresh.mbs == 0 || refresh.mbs > total => {
                    return Err(ConfigError::InvalidIntraRefresh {
                        mbs: refresh.mbs,
                        total,
                    })
                }
                _ => refresh.mbs,
            };
            cfg.intra_refresh = IntraRefresh {
                mode: refresh.mode,
                mbs,
            };
            let mut controls = vec![Control::new(
                V4L2_CID_MPEG_VIDC_VIDEO_INTRA_REFRESH_MODE,
                refresh.mode.v4l2_value(),
            )];
            if mbs > 0 {
                controls.push(Control::new(V4L2_CID_MPEG_VIDC_VIDEO_IR_MBS, mbs));
            }
            Ok(controls)
        })
    }

    pub fn set_multislice(&self, mode: SliceMode) -> crate::Result<()> {
        self.update("slice mode", |cfg, _| {
            require_codec(cfg, "multi-slice", &[Codec::H264, Codec::Hevc])?;
            let controls = match mode {
                SliceMode::Single => vec![Control::new(
                    V4L2_CID_MPEG_VIDEO_MULTI_SLICE_MODE,
                    V4L2_MPEG_VIDEO_MULTI_SLICE_MODE_SINGLE,
                )],
                SliceMode::MaxMacroblocks(mbs) => {
                    let total = blocks(cfg.width, cfg.height, MACROBLOCK_SIZE);
                    if mbs == 0 || mbs > total {
                        return Err(ConfigError::InvalidSliceSize {
                            size: mbs,
                            min: 1,
                            max: total,
                        });
                    }
                    vec![
                        Control::new(
                            V4L2_CID_MPEG_VIDEO_MULTI_SLICE_MODE,
                            V4L2_MPEG_VIDEO_MULTI_SLICE_MODE_MAX_MB,
                        ),
                        Control::new(V4L2_CID_MPEG_VIDEO_MULTI_SLICE_MAX_MB, mbs),
                    ]
                }
                SliceMode::MaxBytes(bytes) => {
                    if bytes < MIN_SLICE_BYTES {
                        return Err(ConfigError::InvalidSliceSize {
                            size: bytes,
                            min: MIN_SLICE_BYTES,
                            max: u32::MAX,
                        });
                    }
                    vec![
                        Control::new(
                            V4L2_CID_MPEG_VIDEO_MULTI_SLICE_MODE,
                            V4L2_MPEG_VIDEO_MULTI_SLICE_MODE_MAX_BYTES,
                        ),
                        Control::new(V4L2_CID_MPEG_VIDEO_MULTI_SLICE_MAX_BYTES, bytes),
                    ]
                }
            };
            cfg.slice_mode = mode;
            Ok(controls)
        })
    }

    /// Selects CABAC when `cabac` is set, CAVLC otherwise.
    pub fn set_entropy(&self, cabac: bool) -> crate::Result<()> {
        self.update("entropy mode", |cfg, _| {
            require_codec(cfg, "entropy mode", &[Codec::H264])?;
            if cabac && !cfg.profile.supports_cabac() {
                return Err(ConfigError::CabacUnsupported(cfg.profile));
            }
            cfg.cabac = cabac;
            Ok(vec![entropy_control(cabac)])
        })
    }

    pub fn set_loop_filter(&self, filter: LoopFilter) -> crate::Result<()> {
        self.update("loop filter", |cfg, _| {
            require_codec(cfg, "loop filter", &[Codec::H264])?;
            for offset in [filter.alpha, filter.beta] {
                if !(-6..=6).contains(&offset) {
                    return Err(ConfigError::LoopFilterOffsetOutOfRange(offset));
                }
            }
            cfg.loop_filter = filter;
            let mode = match filter.mode {
                LoopFilterMode::Enabled => V4L2_MPEG_VIDEO_H264_LOOP_FILTER_MODE_ENABLED,
                LoopFilterMode::Disabled => V4L2_MPEG_VIDEO_H264_LOOP_FILTER_MODE_DISABLED,
                LoopFilterMode::DisabledAtSliceBoundary => {
                    V4L2_MPEG_VIDEO_H264_LOOP_FILTER_MODE_DISABLED_AT_SLICE_BOUNDARY
                }
            };
            Ok(vec![
                Control::new(V4L2_CID_MPEG_VIDEO_H264_LOOP_FILTER_MODE, mode),
                Control::new(V4L2_CID_MPEG_VIDEO_H264_LOOP_FILTER_ALPHA, filter.alpha),
                Control::new(V4L2_CID_MPEG_VIDEO_H264_LOOP_FILTER_BETA, filter.beta),
            ])
        })
    }

    pub fn set_vui_timing_info(&self, enable: bool) -> crate::Result<()> {
        self.update("VUI timing info", |cfg, _| {
            require_codec(cfg, "VUI timing info", &[Codec::H264])?;
            cfg.vui_timing_info = enable;
            Ok(vec![Control::new(
                V4L2_CID_MPEG_VIDC_VIDEO_H264_VUI_TIMING_INFO,
                enable as i32,
            )])
        })
    }

    pub fn set_au_delimiter(&self, enable: bool) -> crate::Result<()> {
        self.update("AU delimiter", |cfg, _| {
            require_codec(cfg, "AU delimiter", &[Codec::H264, Codec::Hevc])?;
            cfg.au_delimiter = enable;
            Ok(vec![Control::new(
                V4L2_CID_MPEG_VIDC_VIDEO_H264_AU_DELIMITER,
                enable as i32,
            )])
        })
    }

    /// Repeats the stream headers in front of every sync frame instead of sending them once.
    pub fn set_inband_header(&self, enable: bool) -> crate::Result<()> {
        self.update("in-band header", |cfg, _| {
            require_codec(cfg, "in-band header", &[Codec::H264, Codec::Hevc])?;
            cfg.inband_header = enable;
            let mode = if enable {
                V4L2_MPEG_VIDEO_HEADER_MODE_JOINED_WITH_I_FRAME
            } else {
                V4L2_MPEG_VIDEO_HEADER_MODE_SEPARATE
            };
            Ok(vec![Control::new(V4L2_CID_MPEG_VIDEO_HEADER_MODE, mode)])
        })
    }

    /// Asks the hardware to process frames at `rate`, which may exceed the stream's frame rate.
    /// The driver refusing the load is reported as resource exhaustion.
    pub fn set_operating_rate(&self, rate: FrameRate) -> crate::Result<()> {
        self.update("operating rate", |cfg, caps| {
            let fps = rate.ceil_fps();
            if rate.numerator == 0 || rate.denominator == 0 || fps > caps.max_fps {
                return Err(ConfigError::OperatingRateOutOfRange(rate, caps.max_fps));
            }
            cfg.operating_rate = Some(rate);
            Ok(vec![Control::new(
                V4L2_CID_MPEG_VIDC_VIDEO_OPERATING_RATE,
                rate.q16(),
            )])
        })
        .map_err(|e| match e {
            Error::DriverFailure { source, .. } if source.is_overload() => {
                warn!("operating rate {} refused: {}", rate, source);
                Error::ResourceExhausted(format!("operating rate {}: {}", rate, source))
            }
            e => e,
        })
    }

    pub fn set_priority(&self, priority: SessionPriority) -> crate::Result<()> {
        self.update("priority", |cfg, _| {
            cfg.priority = priority;
            let value = match priority {
                SessionPriority::Realtime => V4L2_MPEG_VIDC_VIDEO_PRIORITY_REALTIME_ENABLE,
                SessionPriority::NonRealtime => V4L2_MPEG_VIDC_VIDEO_PRIORITY_REALTIME_DISABLE,
            };
            Ok(vec![Control::new(V4L2_CID_MPEG_VIDC_VIDEO_PRIORITY, value)])
        })
    }

    /// Rotates input frames clockwise by `degrees`, one of 0, 90, 180 and 270.
    pub fn set_rotation(&self, degrees: u32) -> crate::Result<()> {
        self.update("rotation", |cfg, _| {
            let rotation =
                Rotation::from_degrees(degrees).ok_or(ConfigError::UnsupportedRotation(degrees))?;
            cfg.rotation = rotation;
            Ok(vec![Control::new(
                V4L2_CID_MPEG_VIDC_VIDEO_ROTATION,
                rotation.v4l2_value(),
            )])
        })
    }

    /// Queues an ROI QP map for the input frame at `roi.timestamp_us`. The map travels in that
    /// frame's extradata, so extradata must be enabled.
    pub fn set_roi_qp(&self, roi: RoiQp) -> crate::Result<()> {
        self.update("ROI QP", |cfg, _| {
            let block = RoiQp::block_size(cfg.codec).ok_or(ConfigError::UnsupportedForCodec {
                feature: "ROI QP",
                codec: cfg.codec,
            })?;
            if !cfg.extradata {
                return Err(ConfigError::ExtradataRequired("ROI QP"));
            }
            let expected = blocks(cfg.width, cfg.height, block) as usize;
            if roi.delta_qp.len() != expected {
                return Err(ConfigError::RoiMapMismatch {
                    len: roi.delta_qp.len(),
                    blocks: expected,
                });
            }
            let max = cfg.codec.max_qp();
            if let Some(delta) = roi
                .delta_qp
                .iter()
                .map(|delta| delta.unsigned_abs() as u32)
                .find(|&delta| delta > max)
            {
                return Err(ConfigError::QpOutOfRange { qp: delta, max });
            }
            if cfg.roi_qp.len() >= MAX_PENDING_ROI {
                if let Some(dropped) = cfg.roi_qp.pop_front() {
                    warn!("dropping unused ROI map for {} us", dropped.timestamp_us);
                }
            }
            cfg.roi_qp.push_back(roi);
            Ok(Vec::new())
        })
    }
}
