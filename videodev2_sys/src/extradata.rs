// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Layout of the msm-vidc extradata plane. A plane holds a sequence of 4-byte aligned records,
//! each a header followed by its payload, and ends with a record of type
//! `MSM_VIDC_EXTRADATA_NONE`.

pub const MSM_VIDC_EXTRADATA_NONE: u32 = 0x00000000;
pub const MSM_VIDC_EXTRADATA_ROI_QP: u32 = 0x00000013;

pub const MSM_VIDC_EXTRADATA_VERSION: u32 = 1;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct msm_vidc_extradata_header {
    /// Bytes of the whole record, header included.
    pub size: u32,
    pub version: u32,
    pub port_index: u32,
    pub type_: u32,
    pub data_size: u32,
}

/// Payload of `MSM_VIDC_EXTRADATA_ROI_QP`, followed by one signed QP delta byte per block.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct msm_vidc_roi_deltaqp_payload {
    pub b_roi_info: u32,
    pub mbi_info_size: i32,
}
