// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::sync::Arc;

use venc::config::calibrate_gop;
use venc::config::level_table::limits_of;
use venc::config::level_table::satisfies;
use venc::config::level_table::Demand;
use venc::config::ConfigError;
use venc::config::ConfigurationController;
use venc::config::EncoderSettings;
use venc::config::HybridHierPSettings;
use venc::device::fake::FakeDevice;
use venc::device::VencDevice;
use venc::format::Codec;
use venc::format::FrameRate;
use venc::format::HierMode;
use venc::format::Profile;
use venc::Error;
use venc::ErrorKind;

fn controller(codec: Codec) -> (Arc<FakeDevice>, ConfigurationController) {
    let device = Arc::new(FakeDevice::new().unwrap());
    let dyn_device: Arc<dyn VencDevice> = device.clone();
    (device, ConfigurationController::new(dyn_device, codec))
}

#[test]
fn calibration_is_idempotent() {
    for mode in [HierMode::HierP, HierMode::HierB, HierMode::HybridHierP] {
        for layers in 1..=6 {
            for p in 1..40 {
                for b in 0..4 {
                    let first = calibrate_gop(p, b, layers, mode).unwrap();
                    let second =
                        calibrate_gop(first.p_frames, first.b_frames, first.layers, mode).unwrap();
                    assert_eq!(first, second, "p {} b {} layers {} {:?}", p, b, layers, mode);
                    if layers > 1 {
                        let sub_gop = 1 << (layers - 1);
                        assert_eq!((first.p_frames + first.b_frames) % sub_gop, 0);
                        assert!(first.p_frames + first.b_frames >= p + b);
                    }
                }
            }
        }
    }
}

#[test]
fn b_frames_clipped_without_error() {
    for (codec, profile) in [
        (Codec::H264, Profile::H264Baseline),
        (Codec::H264, Profile::H264ConstrainedBaseline),
        (Codec::Vp8, Profile::VP8Profile0),
    ] {
        let (_device, controller) = controller(codec);
        controller.set_profile_level(Some(profile), None).unwrap();
        controller.set_intra_period(29, 2).unwrap();
        let config = controller.snapshot();
        assert_eq!(config.b_frames, 0, "{}", profile);
        assert_eq!(config.p_frames, 29);
    }

    // Profiles with B frames keep them.
    let (_device, controller) = controller(Codec::H264);
    controller
        .set_profile_level(Some(Profile::H264High), None)
        .unwrap();
    controller.set_intra_period(20, 2).unwrap();
    assert_eq!(controller.snapshot().b_frames, 2);
}

#[test]
fn hybrid_hierp_with_ltr_rejected_atomically() {
    let (device, controller) = controller(Codec::H264);
    controller.set_long_term_reference(2).unwrap();
    let before = controller.snapshot();
    let calls = device.calls().len();

    let hybrid = HybridHierPSettings {
        layers: 3,
        key_frame_interval: 30,
        qp_range: None,
        layer_bitrate_ratios: Vec::new(),
    };
    match controller.set_hybrid_hierp(&hybrid) {
        Err(Error::InvalidConfiguration(ConfigError::ConflictingFeatures { .. })) => {}
        other => panic!("expected a conflict, got {:?}", other),
    }
    assert_eq!(controller.snapshot(), before);
    assert_eq!(device.calls().len(), calls);

    // And the other way around.
    controller.set_long_term_reference(0).unwrap();
    controller.set_hybrid_hierp(&hybrid).unwrap();
    let err = controller.set_long_term_reference(1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    assert_eq!(controller.snapshot().ltr_count, 0);
}

#[test]
fn auto_profile_level_for_1080p30() {
    let (_device, controller) = controller(Codec::H264);
    controller.set_resolution(1920, 1080).unwrap();
    controller.set_frame_rate(30, 1).unwrap();
    controller.set_bitrate(14_000_000, None).unwrap();
    controller.set_profile_level(None, None).unwrap();
    let first = controller.snapshot();

    let demand = Demand::new(1920, 1080, FrameRate::new(30, 1), 14_000_000);
    let limits = limits_of(first.level).unwrap();
    assert!(satisfies(limits, first.profile, &demand));
    assert!(first.level_auto);

    controller.set_profile_level(None, None).unwrap();
    let second = controller.snapshot();
    assert_eq!(
        (first.profile, first.level),
        (second.profile, second.level)
    );
}

#[test]
fn layer_bitrates_need_bitrate_and_monotonic_ratios() {
    let (_device, controller) = controller(Codec::H264);
    controller
        .set_hierarchical_layers(HierMode::HierP, 3)
        .unwrap();
    match controller.set_layer_bitrates(&[40, 70, 100]) {
        Err(Error::InvalidConfiguration(ConfigError::MissingBitrate)) => {}
        other => panic!("expected a missing bitrate, got {:?}", other),
    }

    controller.set_bitrate(3_000_000, None).unwrap();
    let before = controller.snapshot();
    match controller.set_layer_bitrates(&[40, 30, 100]) {
        Err(Error::InvalidConfiguration(ConfigError::LayerRatiosNotMonotonic { layer, .. })) => {
            assert_eq!(layer, 1)
        }
        other => panic!("expected non-monotonic ratios, got {:?}", other),
    }
    assert_eq!(controller.snapshot(), before);

    controller.set_layer_bitrates(&[40, 70, 100]).unwrap();
    assert_eq!(
        controller.snapshot().layer_bitrates,
        vec![1_200_000, 900_000, 900_000]
    );
}

#[test]
fn settings_from_json_apply_in_order() {
    let json = r#"{
        "codec": "hevc",
        "width": 1280,
        "height": 720,
        "frame_rate": { "numerator": 60, "denominator": 1 },
        "rate_control": "cbr_cfr",
        "target_bitrate": 4000000,
        "intra_period": { "p_frames": 29, "b_frames": 0 },
        "hier": { "mode": "hier_b", "layers": 3 },
        "qp_range": { "min": 10, "max": 45 }
    }"#;
    let settings = EncoderSettings::from_json_str(json).unwrap();
    let (_device, controller) = controller(Codec::Hevc);
    controller.apply(&settings).unwrap();
    let config = controller.snapshot();
    assert_eq!((config.width, config.height), (1280, 720));
    assert_eq!(config.hier_mode, HierMode::HierB);
    assert_eq!(config.p_frames + config.b_frames, 32);
    assert_eq!(config.p_frames, 8);
    assert_eq!(config.qp_range.max, 45);
    assert!(config.level_auto);
}
