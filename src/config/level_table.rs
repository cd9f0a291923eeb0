// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-codec level limits and automatic level selection.

use crate::format::Codec;
use crate::format::FrameRate;
use crate::format::Level;
use crate::format::Profile;

/// Resource bounds of one level.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LevelLimits {
    pub level: Level,
    pub max_mbs_per_frame: u64,
    pub max_mbs_per_sec: u64,
    pub max_bitrate_kbps: u64,
}

const fn limits(
    level: Level,
    max_mbs_per_frame: u64,
    max_mbs_per_sec: u64,
    max_bitrate_kbps: u64,
) -> LevelLimits {
    LevelLimits {
        level,
        max_mbs_per_frame,
        max_mbs_per_sec,
        max_bitrate_kbps,
    }
}

// H.264 Table A-1. Bitrates are the Baseline/Main values; High scales them.
const H264_LEVELS: &[LevelLimits] = &[
    limits(Level::H264_1_0, 99, 1485, 64),
    limits(Level::H264_1b, 99, 1485, 128),
    limits(Level::H264_1_1, 396, 3000, 192),
    limits(Level::H264_1_2, 396, 6000, 384),
    limits(Level::H264_1_3, 396, 11880, 768),
    limits(Level::H264_2_0, 396, 11880, 2000),
    limits(Level::H264_2_1, 792, 19800, 4000),
    limits(Level::H264_2_2, 1620, 20250, 4000),
    limits(Level::H264_3_0, 1620, 40500, 10000),
    limits(Level::H264_3_1, 3600, 108000, 14000),
    limits(Level::H264_3_2, 5120, 216000, 20000),
    limits(Level::H264_4_0, 8192, 245760, 20000),
    limits(Level::H264_4_1, 8192, 245760, 50000),
    limits(Level::H264_4_2, 8704, 522240, 50000),
    limits(Level::H264_5_0, 22080, 589824, 135000),
    limits(Level::H264_5_1, 36864, 983040, 240000),
    limits(Level::H264_5_2, 36864, 2073600, 240000),
];

// HEVC limits expressed in 16x16 macroblocks, Main tier.
const HEVC_LEVELS: &[LevelLimits] = &[
    limits(Level::Hevc_1, 144, 2160, 128),
    limits(Level::Hevc_2, 480, 14400, 1500),
    limits(Level::Hevc_2_1, 960, 28800, 3000),
    limits(Level::Hevc_3, 2160, 64800, 6000),
    limits(Level::Hevc_3_1, 3840, 129600, 10000),
    limits(Level::Hevc_4, 8704, 261120, 12000),
    limits(Level::Hevc_4_1, 8704, 522240, 20000),
    limits(Level::Hevc_5, 34816, 1044480, 25000),
    limits(Level::Hevc_5_1, 34816, 2088960, 40000),
    limits(Level::Hevc_5_2, 34816, 4177920, 60000),
    limits(Level::Hevc_6, 139264, 4177920, 60000),
    limits(Level::Hevc_6_1, 139264, 8355840, 120000),
    limits(Level::Hevc_6_2, 139264, 16711680, 240000),
];

// VP8 versions do not constrain resources; every version shares the hardware limit.
const VP8_LEVELS: &[LevelLimits] = &[
    limits(Level::VP8Version0, 8160, 244800, 40000),
    limits(Level::VP8Version1, 8160, 244800, 40000),
    limits(Level::VP8Version2, 8160, 244800, 40000),
    limits(Level::VP8Version3, 8160, 244800, 40000),
];

pub fn levels(codec: Codec) -> &'static [LevelLimits] {
    match codec {
        Codec::H264 => H264_LEVELS,
        Codec::Hevc => HEVC_LEVELS,
        Codec::Vp8 => VP8_LEVELS,
    }
}

pub fn limits_of(level: Level) -> Option<&'static LevelLimits> {
    levels(level.codec()).iter().find(|l| l.level == level)
}

/// Resources a stream needs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Demand {
    pub mbs_per_frame: u64,
    pub mbs_per_sec: u64,
    /// Zero when no bitrate is configured.
    pub bitrate_bps: u64,
}

impl Demand {
    pub fn new(width: u32, height: u32, frame_rate: FrameRate, bitrate_bps: u32) -> Demand {
        let mbs_per_frame = width.div_ceil(16) as u64 * height.div_ceil(16) as u64;
        let mbs_per_sec = if frame_rate.denominator == 0 {
            0
        } else {
            (mbs_per_frame * frame_rate.numerator as u64).div_ceil(frame_rate.denominator as u64)
        };
        Demand {
            mbs_per_frame,
            mbs_per_sec,
            bitrate_bps: bitrate_bps as u64,
        }
    }
}

/// Whether `limits` accommodates `demand` for `profile`.
pub fn satisfies(limits: &LevelLimits, profile: Profile, demand: &Demand) -> bool {
    let max_bitrate_bps = limits.max_bitrate_kbps * profile.bitrate_factor_permille();
    demand.mbs_per_frame <= limits.max_mbs_per_frame
        && demand.mbs_per_sec <= limits.max_mbs_per_sec
        && demand.bitrate_bps <= max_bitrate_bps
}

/// Returns the lowest level of `profile`'s codec whose bounds all accommodate `demand`.
pub fn select_level(profile: Profile, demand: &Demand) -> Option<Level> {
    levels(profile.codec())
        .iter()
        .find(|limits| satisfies(limits, profile, demand))
        .map(|limits| limits.level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demand_rounds_up() {
        let demand = Demand::new(1920, 1080, FrameRate::new(30, 1), 14_000_000);
        assert_eq!(demand.mbs_per_frame, 120 * 68);
        assert_eq!(demand.mbs_per_sec, 120 * 68 * 30);
        let ntsc = Demand::new(16, 16, FrameRate::new(30000, 1001), 0);
        assert_eq!(ntsc.mbs_per_sec, 30);
    }

    #[test]
    fn full_hd_high_profile() {
        let demand = Demand::new(1920, 1080, FrameRate::new(30, 1), 14_000_000);
        assert_eq!(
            select_level(Profile::H264High, &demand),
            Some(Level::H264_4_0)
        );
        // 60 fps needs level 4.2.
        let demand = Demand::new(1920, 1080, FrameRate::new(60, 1), 14_000_000);
        assert_eq!(
            select_level(Profile::H264High, &demand),
            Some(Level::H264_4_2)
        );
    }

    #[test]
    fn bitrate_drives_level() {
        let demand = Demand::new(176, 144, FrameRate::new(15, 1), 0);
        assert_eq!(
            select_level(Profile::H264Baseline, &demand),
            Some(Level::H264_1_0)
        );
        let demand = Demand::new(176, 144, FrameRate::new(15, 1), 100_000);
        assert_eq!(
            select_level(Profile::H264Baseline, &demand),
            Some(Level::H264_1b)
        );
        // 64 kbps * 1.25 covers 80 kbps on High.
        let demand = Demand::new(176, 144, FrameRate::new(15, 1), 80_000);
        assert_eq!(
            select_level(Profile::H264High, &demand),
            Some(Level::H264_1_0)
        );
    }

    #[test]
    fn hevc_and_vp8() {
        let demand = Demand::new(3840, 2160, FrameRate::new(30, 1), 20_000_000);
        assert_eq!(
            select_level(Profile::HevcMain, &demand),
            Some(Level::Hevc_5)
        );
        let demand = Demand::new(1280, 720, FrameRate::new(30, 1), 4_000_000);
        assert_eq!(
            select_level(Profile::VP8Profile0, &demand),
            Some(Level::VP8Version0)
        );
    }

    #[test]
    fn nothing_fits() {
        let demand = Demand::new(8192, 8192, FrameRate::new(120, 1), 0);
        assert_eq!(select_level(Profile::H264High, &demand), None);
    }

    #[test]
    fn table_is_monotonic() {
        for codec in [Codec::H264, Codec::Hevc, Codec::Vp8] {
            for pair in levels(codec).windows(2) {
                assert!(pair[0].level < pair[1].level);
                assert!(pair[0].max_mbs_per_frame <= pair[1].max_mbs_per_frame);
                assert!(pair[0].max_mbs_per_sec <= pair[1].max_mbs_per_sec);
                assert!(pair[0].max_bitrate_kbps <= pair[1].max_bitrate_kbps);
            }
        }
    }
}
