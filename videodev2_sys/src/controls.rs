// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Codec control ids and their enumerated values.

pub const V4L2_CTRL_CLASS_MPEG: u32 = 0x00990000;
pub const V4L2_CID_MPEG_BASE: u32 = V4L2_CTRL_CLASS_MPEG | 0x900;

pub const V4L2_CID_MPEG_VIDEO_B_FRAMES: u32 = V4L2_CID_MPEG_BASE + 202;
pub const V4L2_CID_MPEG_VIDEO_GOP_SIZE: u32 = V4L2_CID_MPEG_BASE + 203;
pub const V4L2_CID_MPEG_VIDEO_BITRATE_MODE: u32 = V4L2_CID_MPEG_BASE + 206;
pub const V4L2_CID_MPEG_VIDEO_BITRATE: u32 = V4L2_CID_MPEG_BASE + 207;
pub const V4L2_CID_MPEG_VIDEO_BITRATE_PEAK: u32 = V4L2_CID_MPEG_BASE + 208;
pub const V4L2_CID_MPEG_VIDEO_CYCLIC_INTRA_REFRESH_MB: u32 = V4L2_CID_MPEG_BASE + 214;
pub const V4L2_CID_MPEG_VIDEO_FRAME_RC_ENABLE: u32 = V4L2_CID_MPEG_BASE + 215;
pub const V4L2_CID_MPEG_VIDEO_HEADER_MODE: u32 = V4L2_CID_MPEG_BASE + 216;
pub const V4L2_CID_MPEG_VIDEO_MULTI_SLICE_MAX_BYTES: u32 = V4L2_CID_MPEG_BASE + 220;
pub const V4L2_CID_MPEG_VIDEO_MULTI_SLICE_MODE: u32 = V4L2_CID_MPEG_BASE + 221;
pub const V4L2_CID_MPEG_VIDEO_MULTI_SLICE_MAX_MB: u32 = V4L2_CID_MPEG_BASE + 222;
pub const V4L2_CID_MPEG_VIDEO_FORCE_KEY_FRAME: u32 = V4L2_CID_MPEG_BASE + 229;
pub const V4L2_CID_MPEG_VIDEO_LTR_COUNT: u32 = V4L2_CID_MPEG_BASE + 232;
pub const V4L2_CID_MPEG_VIDEO_FRAME_LTR_INDEX: u32 = V4L2_CID_MPEG_BASE + 233;
pub const V4L2_CID_MPEG_VIDEO_USE_LTR_FRAMES: u32 = V4L2_CID_MPEG_BASE + 234;

pub const V4L2_MPEG_VIDEO_BITRATE_MODE_VBR: i32 = 0;
pub const V4L2_MPEG_VIDEO_BITRATE_MODE_CBR: i32 = 1;

pub const V4L2_MPEG_VIDEO_HEADER_MODE_SEPARATE: i32 = 0;
pub const V4L2_MPEG_VIDEO_HEADER_MODE_JOINED_WITH_1ST_FRAME: i32 = 1;
// msm-vidc extension: sequence headers are repeated ahead of every intra frame.
pub const V4L2_MPEG_VIDEO_HEADER_MODE_JOINED_WITH_I_FRAME: i32 = 2;

pub const V4L2_MPEG_VIDEO_MULTI_SLICE_MODE_SINGLE: i32 = 0;
pub const V4L2_MPEG_VIDEO_MULTI_SLICE_MODE_MAX_MB: i32 = 1;
pub const V4L2_MPEG_VIDEO_MULTI_SLICE_MODE_MAX_BYTES: i32 = 2;

pub const V4L2_CID_MPEG_VIDEO_H264_I_FRAME_QP: u32 = V4L2_CID_MPEG_BASE + 350;
pub const V4L2_CID_MPEG_VIDEO_H264_P_FRAME_QP: u32 = V4L2_CID_MPEG_BASE + 351;
pub const V4L2_CID_MPEG_VIDEO_H264_B_FRAME_QP: u32 = V4L2_CID_MPEG_BASE + 352;
pub const V4L2_CID_MPEG_VIDEO_H264_MIN_QP: u32 = V4L2_CID_MPEG_BASE + 353;
pub const V4L2_CID_MPEG_VIDEO_H264_MAX_QP: u32 = V4L2_CID_MPEG_BASE + 354;
pub const V4L2_CID_MPEG_VIDEO_H264_ENTROPY_MODE: u32 = V4L2_CID_MPEG_BASE + 357;
pub const V4L2_CID_MPEG_VIDEO_H264_I_PERIOD: u32 = V4L2_CID_MPEG_BASE + 358;
pub const V4L2_CID_MPEG_VIDEO_H264_LEVEL: u32 = V4L2_CID_MPEG_BASE + 359;
pub const V4L2_CID_MPEG_VIDEO_H264_LOOP_FILTER_ALPHA: u32 = V4L2_CID_MPEG_BASE + 360;
pub const V4L2_CID_MPEG_VIDEO_H264_LOOP_FILTER_BETA: u32 = V4L2_CID_MPEG_BASE + 361;
pub const V4L2_CID_MPEG_VIDEO_H264_LOOP_FILTER_MODE: u32 = V4L2_CID_MPEG_BASE + 362;
pub const V4L2_CID_MPEG_VIDEO_H264_PROFILE: u32 = V4L2_CID_MPEG_BASE + 363;
pub const V4L2_CID_MPEG_VIDEO_H264_HIERARCHICAL_CODING: u32 = V4L2_CID_MPEG_BASE + 381;
pub const V4L2_CID_MPEG_VIDEO_H264_HIERARCHICAL_CODING_TYPE: u32 = V4L2_CID_MPEG_BASE + 382;
pub const V4L2_CID_MPEG_VIDEO_H264_HIERARCHICAL_CODING_LAYER: u32 = V4L2_CID_MPEG_BASE + 383;
pub const V4L2_CID_MPEG_VIDEO_H264_HIER_CODING_L0_BR: u32 = V4L2_CID_MPEG_BASE + 391;

pub const V4L2_MPEG_VIDEO_H264_ENTROPY_MODE_CAVLC: i32 = 0;
pub const V4L2_MPEG_VIDEO_H264_ENTROPY_MODE_CABAC: i32 = 1;

pub const V4L2_MPEG_VIDEO_H264_LOOP_FILTER_MODE_ENABLED: i32 = 0;
pub const V4L2_MPEG_VIDEO_H264_LOOP_FILTER_MODE_DISABLED: i32 = 1;
pub const V4L2_MPEG_VIDEO_H264_LOOP_FILTER_MODE_DISABLED_AT_SLICE_BOUNDARY: i32 = 2;

pub const V4L2_MPEG_VIDEO_H264_HIERARCHICAL_CODING_B: i32 = 0;
pub const V4L2_MPEG_VIDEO_H264_HIERARCHICAL_CODING_P: i32 = 1;

pub const V4L2_MPEG_VIDEO_H264_PROFILE_BASELINE: i32 = 0;
pub const V4L2_MPEG_VIDEO_H264_PROFILE_CONSTRAINED_BASELINE: i32 = 1;
pub const V4L2_MPEG_VIDEO_H264_PROFILE_MAIN: i32 = 2;
pub const V4L2_MPEG_VIDEO_H264_PROFILE_HIGH: i32 = 4;
pub const V4L2_MPEG_VIDEO_H264_PROFILE_CONSTRAINED_HIGH: i32 = 17;

// H.264 levels are numbered consecutively from 1.0 (0) through 5.2 (16), with 1b at 1.
pub const V4L2_MPEG_VIDEO_H264_LEVEL_1_0: i32 = 0;
pub const V4L2_MPEG_VIDEO_H264_LEVEL_5_2: i32 = 16;

pub const V4L2_CID_MPEG_VIDEO_VPX_MIN_QP: u32 = V4L2_CID_MPEG_BASE + 507;
pub const V4L2_CID_MPEG_VIDEO_VPX_MAX_QP: u32 = V4L2_CID_MPEG_BASE + 508;
pub const V4L2_CID_MPEG_VIDEO_VPX_I_FRAME_QP: u32 = V4L2_CID_MPEG_BASE + 509;
pub const V4L2_CID_MPEG_VIDEO_VPX_P_FRAME_QP: u32 = V4L2_CID_MPEG_BASE + 510;
pub const V4L2_CID_MPEG_VIDEO_VP8_PROFILE: u32 = V4L2_CID_MPEG_BASE + 511;

pub const V4L2_CID_MPEG_VIDEO_HEVC_MIN_QP: u32 = V4L2_CID_MPEG_BASE + 600;
pub const V4L2_CID_MPEG_VIDEO_HEVC_MAX_QP: u32 = V4L2_CID_MPEG_BASE + 601;
pub const V4L2_CID_MPEG_VIDEO_HEVC_I_FRAME_QP: u32 = V4L2_CID_MPEG_BASE + 602;
pub const V4L2_CID_MPEG_VIDEO_HEVC_P_FRAME_QP: u32 = V4L2_CID_MPEG_BASE + 603;
pub const V4L2_CID_MPEG_VIDEO_HEVC_B_FRAME_QP: u32 = V4L2_CID_MPEG_BASE + 604;
pub const V4L2_CID_MPEG_VIDEO_HEVC_HIER_CODING_TYPE: u32 = V4L2_CID_MPEG_BASE + 606;
pub const V4L2_CID_MPEG_VIDEO_HEVC_HIER_CODING_LAYER: u32 = V4L2_CID_MPEG_BASE + 607;
pub const V4L2_CID_MPEG_VIDEO_HEVC_PROFILE: u32 = V4L2_CID_MPEG_BASE + 615;
pub const V4L2_CID_MPEG_VIDEO_HEVC_LEVEL: u32 = V4L2_CID_MPEG_BASE + 616;
pub const V4L2_CID_MPEG_VIDEO_HEVC_HIER_CODING_L0_BR: u32 = V4L2_CID_MPEG_BASE + 642;

pub const V4L2_MPEG_VIDEO_HEVC_HIERARCHICAL_CODING_B: i32 = 0;
pub const V4L2_MPEG_VIDEO_HEVC_HIERARCHICAL_CODING_P: i32 = 1;

pub const V4L2_MPEG_VIDEO_HEVC_PROFILE_MAIN: i32 = 0;
pub const V4L2_MPEG_VIDEO_HEVC_PROFILE_MAIN_10: i32 = 2;

// Vendor controls exposed by the msm-vidc driver.
pub const V4L2_CID_MPEG_MSM_VIDC_BASE: u32 = V4L2_CTRL_CLASS_MPEG | 0x2000;

pub const V4L2_CID_MPEG_VIDC_VIDEO_NUM_P_FRAMES: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 4;
pub const V4L2_CID_MPEG_VIDC_VIDEO_NUM_B_FRAMES: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 5;
pub const V4L2_CID_MPEG_VIDC_VIDEO_IDR_PERIOD: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 7;
pub const V4L2_CID_MPEG_VIDC_VIDEO_RATE_CONTROL: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 8;
pub const V4L2_CID_MPEG_VIDC_VIDEO_ROTATION: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 14;
pub const V4L2_CID_MPEG_VIDC_VIDEO_INTRA_REFRESH_MODE: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 19;
pub const V4L2_CID_MPEG_VIDC_VIDEO_IR_MBS: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 21;
pub const V4L2_CID_MPEG_VIDC_VIDEO_LTRMODE: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 26;
pub const V4L2_CID_MPEG_VIDC_VIDEO_LTRCOUNT: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 27;
pub const V4L2_CID_MPEG_VIDC_VIDEO_USELTRFRAME: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 29;
pub const V4L2_CID_MPEG_VIDC_VIDEO_MARKLTRFRAME: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 30;
pub const V4L2_CID_MPEG_VIDC_VIDEO_HIER_P_NUM_LAYERS: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 31;
pub const V4L2_CID_MPEG_VIDC_VIDEO_H264_VUI_TIMING_INFO: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 36;
pub const V4L2_CID_MPEG_VIDC_VIDEO_H264_AU_DELIMITER: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 37;
pub const V4L2_CID_MPEG_VIDC_VIDEO_HIER_B_NUM_LAYERS: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 40;
pub const V4L2_CID_MPEG_VIDC_VIDEO_HYBRID_HIERP_MODE: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 41;
pub const V4L2_CID_MPEG_VIDC_VIDEO_MAX_HIERP_LAYERS: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 43;
pub const V4L2_CID_MPEG_VIDC_VIDEO_FRAME_RATE: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 51;
pub const V4L2_CID_MPEG_VIDC_VIDEO_PRIORITY: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 56;
pub const V4L2_CID_MPEG_VIDC_VIDEO_OPERATING_RATE: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 57;
pub const V4L2_CID_MPEG_VIDC_VIDEO_I_FRAME_QP_MIN: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 60;
pub const V4L2_CID_MPEG_VIDC_VIDEO_I_FRAME_QP_MAX: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 61;
pub const V4L2_CID_MPEG_VIDC_VIDEO_P_FRAME_QP_MIN: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 62;
pub const V4L2_CID_MPEG_VIDC_VIDEO_P_FRAME_QP_MAX: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 63;
pub const V4L2_CID_MPEG_VIDC_VIDEO_B_FRAME_QP_MIN: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 64;
pub const V4L2_CID_MPEG_VIDC_VIDEO_B_FRAME_QP_MAX: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 65;
pub const V4L2_CID_MPEG_VIDC_VIDEO_EXTRADATA: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 104;
pub const V4L2_CID_MPEG_VIDC_VIDEO_BATCH_SIZE: u32 = V4L2_CID_MPEG_MSM_VIDC_BASE + 110;

pub const V4L2_CID_MPEG_VIDC_VIDEO_RATE_CONTROL_OFF: i32 = 0;
pub const V4L2_CID_MPEG_VIDC_VIDEO_RATE_CONTROL_VBR_VFR: i32 = 1;
pub const V4L2_CID_MPEG_VIDC_VIDEO_RATE_CONTROL_VBR_CFR: i32 = 2;
pub const V4L2_CID_MPEG_VIDC_VIDEO_RATE_CONTROL_CBR_VFR: i32 = 3;
pub const V4L2_CID_MPEG_VIDC_VIDEO_RATE_CONTROL_CBR_CFR: i32 = 4;
pub const V4L2_CID_MPEG_VIDC_VIDEO_RATE_CONTROL_MBR_CFR: i32 = 5;
pub const V4L2_CID_MPEG_VIDC_VIDEO_RATE_CONTROL_MBR_VFR: i32 = 6;

pub const V4L2_MPEG_VIDC_VIDEO_LTR_MODE_DISABLE: i32 = 0;
pub const V4L2_MPEG_VIDC_VIDEO_LTR_MODE_MANUAL: i32 = 1;

pub const V4L2_CID_MPEG_VIDC_VIDEO_ROTATION_NONE: i32 = 0;
pub const V4L2_CID_MPEG_VIDC_VIDEO_ROTATION_90: i32 = 1;
pub const V4L2_CID_MPEG_VIDC_VIDEO_ROTATION_180: i32 = 2;
pub const V4L2_CID_MPEG_VIDC_VIDEO_ROTATION_270: i32 = 3;

pub const V4L2_CID_MPEG_VIDC_VIDEO_INTRA_REFRESH_NONE: i32 = 0;
pub const V4L2_CID_MPEG_VIDC_VIDEO_INTRA_REFRESH_CYCLIC: i32 = 1;
pub const V4L2_CID_MPEG_VIDC_VIDEO_INTRA_REFRESH_ADAPTIVE: i32 = 2;
pub const V4L2_CID_MPEG_VIDC_VIDEO_INTRA_REFRESH_CYCLIC_ADAPTIVE: i32 = 3;
pub const V4L2_CID_MPEG_VIDC_VIDEO_INTRA_REFRESH_RANDOM: i32 = 4;

pub const V4L2_MPEG_VIDC_VIDEO_PRIORITY_REALTIME_ENABLE: i32 = 0;
pub const V4L2_MPEG_VIDC_VIDEO_PRIORITY_REALTIME_DISABLE: i32 = 1;
