// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! GOP sizing for hierarchical coding.

use crate::config::ConfigError;
use crate::format::HierMode;

/// Deepest temporal hierarchy any mode supports.
pub const MAX_TEMPORAL_LAYERS: u32 = 6;

/// Frame counts of one intra period.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Gop {
    pub p_frames: u32,
    pub b_frames: u32,
    pub layers: u32,
}

/// Adjusts the P/B split so that an intra period holds a whole number of sub-GOPs of
/// `2^(layers - 1)` frames.
///
/// Hier-P and hybrid Hier-P code every non-intra frame as P. Hier-B codes one P frame per
/// sub-GOP and the rest as B. Single-layer configurations are returned unchanged. Applying the
/// function to its own output returns that output again.
pub fn calibrate_gop(
    p_frames: u32,
    b_frames: u32,
    layers: u32,
    mode: HierMode,
) -> Result<Gop, ConfigError> {
    let requested = Gop {
        p_frames,
        b_frames,
        layers,
    };
    if layers <= 1 || mode == HierMode::None {
        return Ok(requested);
    }
    if layers > MAX_TEMPORAL_LAYERS {
        return Err(ConfigError::TooManyLayers {
            requested: layers,
            max: MAX_TEMPORAL_LAYERS,
        });
    }
    if p_frames == 0 {
        return Err(ConfigError::InvalidGop(
            "hierarchical coding needs at least one P frame per intra period".to_string(),
        ));
    }

    let sub_gop = 1u32 << (layers - 1);
    let gop = p_frames
        .checked_add(b_frames)
        .and_then(|frames| frames.div_ceil(sub_gop).checked_mul(sub_gop))
        .ok_or_else(|| {
            ConfigError::InvalidGop(format!(
                "{} P and {} B frames do not fit whole sub-GOPs of {}",
                p_frames, b_frames, sub_gop
            ))
        })?;
    let gop = match mode {
        HierMode::HierP | HierMode::HybridHierP => Gop {
            p_frames: gop,
            b_frames: 0,
            layers,
        },
        HierMode::HierB => {
            let p_frames = gop / sub_gop;
            Gop {
                p_frames,
                b_frames: gop - p_frames,
                layers,
            }
        }
        HierMode::None => requested,
    };
    Ok(gop)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_layer_unchanged() {
        assert_eq!(
            calibrate_gop(29, 2, 1, HierMode::HierP).unwrap(),
            Gop {
                p_frames: 29,
                b_frames: 2,
                layers: 1
            }
        );
        assert_eq!(
            calibrate_gop(10, 3, 4, HierMode::None).unwrap(),
            Gop {
                p_frames: 10,
                b_frames: 3,
                layers: 4
            }
        );
    }

    #[test]
    fn hier_p_rounds_up_to_sub_gop() {
        // Sub-GOP of 4, 29 frames round up to 32.
        assert_eq!(
            calibrate_gop(29, 0, 3, HierMode::HierP).unwrap(),
            Gop {
                p_frames: 32,
                b_frames: 0,
                layers: 3
            }
        );
    }

    #[test]
    fn hier_b_one_p_per_sub_gop() {
        // Sub-GOP of 8, 20 frames round up to 24: 3 P and 21 B.
        assert_eq!(
            calibrate_gop(10, 10, 4, HierMode::HierB).unwrap(),
            Gop {
                p_frames: 3,
                b_frames: 21,
                layers: 4
            }
        );
    }

    #[test]
    fn oversized_period_rejected() {
        assert!(matches!(
            calibrate_gop(u32::MAX - 1, 0, 3, HierMode::HierP),
            Err(ConfigError::InvalidGop(_))
        ));
        assert!(matches!(
            calibrate_gop(u32::MAX, 1, 2, HierMode::HierB),
            Err(ConfigError::InvalidGop(_))
        ));
        // The largest period that still rounds into range.
        let gop = calibrate_gop(u32::MAX - 3, 0, 3, HierMode::HierP).unwrap();
        assert_eq!(gop.p_frames, u32::MAX - 3);
    }

    #[test]
    fn idempotent() {
        for mode in [HierMode::HierP, HierMode::HierB, HierMode::HybridHierP] {
            for layers in 1..=MAX_TEMPORAL_LAYERS {
                for p in 1..40 {
                    for b in 0..4 {
                        let once = calibrate_gop(p, b, layers, mode).unwrap();
                        let twice =
                            calibrate_gop(once.p_frames, once.b_frames, once.layers, mode)
                                .unwrap();
                        assert_eq!(once, twice, "p={} b={} layers={} {:?}", p, b, layers, mode);
                        if layers > 1 {
                            let sub_gop = 1 << (layers - 1);
                            assert_eq!((once.p_frames + once.b_frames) % sub_gop, 0);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn rejects_bad_requests() {
        assert!(matches!(
            calibrate_gop(0, 0, 3, HierMode::HierP),
            Err(ConfigError::InvalidGop(_))
        ));
        assert!(matches!(
            calibrate_gop(8, 0, 7, HierMode::HierP),
            Err(ConfigError::TooManyLayers { .. })
        ));
    }
}
