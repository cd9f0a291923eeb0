// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Encoder configuration state and the validated setters that change it.
//!
//! [`EncoderConfig`] is only ever modified through [`ConfigurationController`]. Each setter works
//! on a copy of the current configuration, derives dependent settings, pushes the resulting
//! controls to the driver and only then commits the copy. A rejected or failed setter leaves the
//! configuration exactly as it was.

pub mod coding;
pub mod gop;
pub mod level_table;
mod settings;

use std::collections::VecDeque;
use std::sync::Arc;

use base::debug;
use base::info;
use base::warn;
use bitflags::bitflags;
use remain::sorted;
use serde::Deserialize;
use serde::Serialize;
use sync::Mutex;
use thiserror::Error;
use videodev2_sys::controls::*;

pub use self::coding::IntraRefresh;
pub use self::coding::IntraRefreshMode;
pub use self::coding::LoopFilter;
pub use self::coding::LoopFilterMode;
pub use self::coding::RoiQp;
pub use self::coding::Rotation;
pub use self::coding::SessionPriority;
pub use self::coding::SliceMode;
pub use self::gop::calibrate_gop;
pub use self::gop::Gop;
pub use self::settings::DebugSettings;
pub use self::settings::EncoderSettings;
pub use self::settings::HierSettings;
pub use self::settings::IntraPeriod;
pub use self::settings::SettingsError;
use self::coding::entropy_control;
use self::level_table::Demand;
use crate::device::Control;
use crate::device::VencDevice;
use crate::format::Codec;
use crate::format::FrameRate;
use crate::format::HierMode;
use crate::format::Level;
use crate::format::Profile;
use crate::format::RateControlMode;
use crate::format::RateControlModes;

/// Largest number of frames one input submission may carry.
pub const MAX_BATCH_SIZE: u32 = 16;

#[sorted]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("CABAC is not available in {0}")]
    CabacUnsupported(Profile),
    #[error("settings are for {requested} but the session encodes {session}")]
    CodecMismatch { session: Codec, requested: Codec },
    #[error("cannot enable {requested:?} while {active:?} is active")]
    ConflictingFeatures {
        requested: Features,
        active: Features,
    },
    #[error("{0} needs extradata to be enabled")]
    ExtradataRequired(&'static str),
    #[error("frame rate {0} is outside 1..={1} fps")]
    FrameRateOutOfRange(FrameRate, u32),
    #[error("batch size {0} is outside 1..={MAX_BATCH_SIZE}")]
    InvalidBatchSize(u32),
    #[error("invalid bitrate: target {target}, peak {peak}")]
    InvalidBitrate { target: u32, peak: u32 },
    #[error("invalid GOP: {0}")]
    InvalidGop(String),
    #[error("intra refresh of {mbs} macroblocks is outside 1..={total}")]
    InvalidIntraRefresh { mbs: u32, total: u32 },
    #[error("key frame interval {0} leaves no room for P frames")]
    InvalidKeyFrameInterval(u32),
    #[error("QP range {min}..={max} is empty")]
    InvalidQpRange { min: u32, max: u32 },
    #[error("slice size {size} is outside {min}..={max}")]
    InvalidSliceSize { size: u32, min: u32, max: u32 },
    #[error("layer bitrate ratio {0}% is above 100%")]
    LayerRatioOutOfRange(u32),
    #[error("cumulative ratio {ratio}% of layer {layer} is below the previous layer's {previous}%")]
    LayerRatiosNotMonotonic {
        layer: usize,
        ratio: u32,
        previous: u32,
    },
    #[error("{level} cannot carry the stream, {required:?} is needed")]
    LevelTooLow {
        level: Level,
        required: Option<Level>,
    },
    #[error("loop filter offset {0} is outside -6..=6")]
    LoopFilterOffsetOutOfRange(i32),
    #[error("long-term references are disabled")]
    LtrDisabled,
    #[error("long-term reference {index} is outside the {count} configured")]
    LtrIndexOutOfRange { index: u32, count: u32 },
    #[error("layer bitrates need a target bitrate")]
    MissingBitrate,
    #[error("no {0} level accommodates the stream")]
    NoLevelSatisfies(Codec),
    #[error("operating rate {0} is outside 1..={1} fps")]
    OperatingRateOutOfRange(FrameRate, u32),
    #[error("QP {qp} is above the maximum of {max}")]
    QpOutOfRange { qp: u32, max: u32 },
    #[error("rate control mode {0:?} is not supported")]
    RateControlUnsupported(RateControlMode),
    #[error("resolution {0}x{1} is outside the supported range")]
    ResolutionOutOfRange(u32, u32),
    #[error("ROI map holds {len} entries for {blocks} blocks")]
    RoiMapMismatch { len: usize, blocks: usize },
    #[error("{requested} layers requested, at most {max} supported")]
    TooManyLayers { requested: u32, max: u32 },
    #[error("{requested} long-term references requested, at most {max} supported")]
    TooManyLtrFrames { requested: u32, max: u32 },
    #[error("{count} layer ratios given for {layers} layers")]
    TooManyRatios { count: usize, layers: u32 },
    #[error("{feature} is not supported for {codec}")]
    UnsupportedForCodec { feature: &'static str, codec: Codec },
    #[error("{mode:?} is not supported for {codec}")]
    UnsupportedHierMode { mode: HierMode, codec: Codec },
    #[error("{level} does not belong to {codec}")]
    UnsupportedLevel { level: Level, codec: Codec },
    #[error("{profile} does not belong to {codec}")]
    UnsupportedProfile { profile: Profile, codec: Codec },
    #[error("rotation by {0} degrees is not supported")]
    UnsupportedRotation(u32),
}

bitflags! {
    /// Reference structure features whose combinations are restricted.
    #[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
    #[repr(transparent)]
    pub struct Features: u32 {
        const B_FRAMES = 1 << 0;
        const LTR = 1 << 1;
        const HIER_P = 1 << 2;
        const HIER_B = 1 << 3;
        const HYBRID_HIER_P = 1 << 4;
    }
}

impl Features {
    /// Features that cannot be active together with `self`.
    fn conflicts(self) -> Features {
        let mut conflicts = Features::empty();
        if self.contains(Features::HYBRID_HIER_P) {
            conflicts |= Features::B_FRAMES | Features::LTR | Features::HIER_P | Features::HIER_B;
        }
        if self.contains(Features::HIER_B) {
            conflicts |= Features::LTR | Features::HYBRID_HIER_P;
        }
        if self.contains(Features::LTR) {
            conflicts |= Features::B_FRAMES | Features::HIER_B | Features::HYBRID_HIER_P;
        }
        if self.contains(Features::B_FRAMES) {
            conflicts |= Features::LTR | Features::HYBRID_HIER_P;
        }
        if self.contains(Features::HIER_P) {
            conflicts |= Features::HYBRID_HIER_P;
        }
        conflicts
    }
}

/// Rejects enabling `requested` while any conflicting feature in `active` is on.
pub fn check_compatible(requested: Features, active: Features) -> Result<(), ConfigError> {
    let clash = requested.conflicts() & active;
    if clash.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ConflictingFeatures {
            requested,
            active: clash,
        })
    }
}

/// Inclusive quantization parameter bounds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QpRange {
    pub min: u32,
    pub max: u32,
}

impl QpRange {
    fn validate(self, codec: Codec) -> Result<(), ConfigError> {
        if self.max > codec.max_qp() {
            return Err(ConfigError::QpOutOfRange {
                qp: self.max,
                max: codec.max_qp(),
            });
        }
        if self.min > self.max {
            return Err(ConfigError::InvalidQpRange {
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

/// QP bounds per frame type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpbQpRange {
    pub i: QpRange,
    pub p: QpRange,
    pub b: QpRange,
}

/// Initial QP per frame type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionQp {
    pub i: u32,
    pub p: u32,
    pub b: u32,
}

/// Parameters of hybrid hierarchical-P coding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HybridHierPSettings {
    /// Number of temporal layers. Zero turns hybrid Hier-P off.
    pub layers: u32,
    /// Distance between key frames; the intra period holds `key_frame_interval - 1` P frames.
    pub key_frame_interval: u32,
    #[serde(default)]
    pub qp_range: Option<QpRange>,
    /// Cumulative percentages of the target bitrate, one per layer.
    #[serde(default)]
    pub layer_bitrate_ratios: Vec<u32>,
}

/// Hardware limits of one codec.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Capabilities {
    pub min_width: u32,
    pub max_width: u32,
    pub min_height: u32,
    pub max_height: u32,
    pub max_fps: u32,
    pub supported_rc_modes: RateControlModes,
    pub max_hierp_layers: u32,
    /// Zero when the codec has no Hier-B support.
    pub max_hierb_layers: u32,
    /// Zero when the codec has no hybrid Hier-P support.
    pub max_hybrid_layers: u32,
    pub max_ltr_count: u32,
}

impl Capabilities {
    pub fn for_codec(codec: Codec) -> Capabilities {
        let base = Capabilities {
            min_width: 96,
            max_width: 4096,
            min_height: 96,
            max_height: 2304,
            max_fps: 240,
            supported_rc_modes: RateControlModes::all(),
            max_hierp_layers: 4,
            max_hierb_layers: 0,
            max_hybrid_layers: 0,
            max_ltr_count: 4,
        };
        match codec {
            Codec::H264 => Capabilities {
                max_hybrid_layers: 6,
                ..base
            },
            Codec::Hevc => Capabilities {
                max_hierp_layers: 6,
                max_hierb_layers: 6,
                ..base
            },
            Codec::Vp8 => Capabilities {
                max_width: 1920,
                max_height: 1088,
                max_fps: 120,
                max_ltr_count: 2,
                ..base
            },
        }
    }
}

/// The complete encoder configuration of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EncoderConfig {
    pub codec: Codec,
    pub profile: Profile,
    pub level: Level,
    /// The profile was derived rather than requested.
    pub profile_auto: bool,
    /// The level was derived rather than requested and follows resolution, frame rate and
    /// bitrate changes.
    pub level_auto: bool,
    pub rate_control: RateControlMode,
    /// Bits per second. Zero leaves the bitrate to the driver.
    pub target_bitrate: u32,
    /// Bits per second. Zero when unset.
    pub peak_bitrate: u32,
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub p_frames: u32,
    pub b_frames: u32,
    pub idr_period: u32,
    pub hier_mode: HierMode,
    pub hier_layers: u32,
    pub hybrid_key_frame_interval: u32,
    pub ltr_count: u32,
    pub qp_range: QpRange,
    pub ipb_qp: Option<IpbQpRange>,
    pub session_qp: Option<SessionQp>,
    pub layer_bitrate_ratios: Vec<u32>,
    /// Absolute bitrate of each layer derived from the ratios.
    pub layer_bitrates: Vec<u32>,
    pub batch_size: u32,
    pub extradata: bool,
    pub intra_refresh: IntraRefresh,
    pub slice_mode: SliceMode,
    /// CABAC entropy coding; CAVLC otherwise. H.264 only.
    pub cabac: bool,
    pub loop_filter: LoopFilter,
    pub vui_timing_info: bool,
    pub au_delimiter: bool,
    /// Stream headers repeat in front of every sync frame.
    pub inband_header: bool,
    /// Processing rate requested from the hardware when it differs from the frame rate.
    pub operating_rate: Option<FrameRate>,
    pub priority: SessionPriority,
    pub rotation: Rotation,
    /// ROI maps waiting for the input frame they apply to, oldest first.
    #[serde(skip)]
    pub roi_qp: VecDeque<RoiQp>,
}

impl EncoderConfig {
    /// A 640x480 30 fps stream with a one second intra period and automatic profile and level.
    pub fn new(codec: Codec) -> EncoderConfig {
        let profile = codec.default_profile();
        let frame_rate = FrameRate::default();
        let level = level_table::select_level(profile, &Demand::new(640, 480, frame_rate, 0))
            .unwrap_or(level_table::levels(codec)[0].level);
        EncoderConfig {
            codec,
            profile,
            level,
            profile_auto: true,
            level_auto: true,
            rate_control: RateControlMode::default(),
            target_bitrate: 0,
            peak_bitrate: 0,
            width: 640,
            height: 480,
            frame_rate,
            p_frames: 29,
            b_frames: 0,
            idr_period: 1,
            hier_mode: HierMode::None,
            hier_layers: 1,
            hybrid_key_frame_interval: 0,
            ltr_count: 0,
            qp_range: QpRange {
                min: 0,
                max: codec.max_qp(),
            },
            ipb_qp: None,
            session_qp: None,
            layer_bitrate_ratios: Vec::new(),
            layer_bitrates: Vec::new(),
            batch_size: 1,
            extradata: false,
            intra_refresh: IntraRefresh::default(),
            slice_mode: SliceMode::default(),
            cabac: false,
            loop_filter: LoopFilter::default(),
            vui_timing_info: false,
            au_delimiter: false,
            inband_header: false,
            operating_rate: None,
            priority: SessionPriority::default(),
            rotation: Rotation::default(),
            roi_qp: VecDeque::new(),
        }
    }

    pub fn active_features(&self) -> Features {
        let mut features = Features::empty();
        if self.b_frames > 0 && self.hier_mode != HierMode::HierB {
            features |= Features::B_FRAMES;
        }
        if self.ltr_count > 0 {
            features |= Features::LTR;
        }
        features |= match self.hier_mode {
            HierMode::None => Features::empty(),
            HierMode::HierP => Features::HIER_P,
            HierMode::HierB => Features::HIER_B,
            HierMode::HybridHierP => Features::HYBRID_HIER_P,
        };
        features
    }

    fn demand(&self) -> Demand {
        Demand::new(self.width, self.height, self.frame_rate, self.target_bitrate)
    }

    /// Re-derives an automatic level, or checks that an explicit one still carries the stream.
    fn refresh_level(&mut self, controls: &mut Vec<Control>) -> Result<(), ConfigError> {
        let demand = self.demand();
        let required = level_table::select_level(self.profile, &demand);
        if self.level_auto {
            let level = required.ok_or(ConfigError::NoLevelSatisfies(self.codec))?;
            if level != self.level {
                debug!("derived {} for {}x{}@{}", level, self.width, self.height, self.frame_rate);
                self.level = level;
                push_level(self, controls);
            }
            return Ok(());
        }
        if self.rate_control.is_off() {
            return Ok(());
        }
        let fits = level_table::limits_of(self.level)
            .map_or(false, |limits| level_table::satisfies(limits, self.profile, &demand));
        if !fits {
            return Err(ConfigError::LevelTooLow {
                level: self.level,
                required,
            });
        }
        Ok(())
    }

    fn recompute_layer_bitrates(&mut self) -> Result<(), ConfigError> {
        if self.layer_bitrate_ratios.is_empty() {
            self.layer_bitrates.clear();
            return Ok(());
        }
        if self.target_bitrate == 0 {
            return Err(ConfigError::MissingBitrate);
        }
        let mut previous = 0;
        let mut bitrates = Vec::with_capacity(self.layer_bitrate_ratios.len());
        for (layer, &ratio) in self.layer_bitrate_ratios.iter().enumerate() {
            if ratio > 100 {
                return Err(ConfigError::LayerRatioOutOfRange(ratio));
            }
            if ratio < previous {
                return Err(ConfigError::LayerRatiosNotMonotonic {
                    layer,
                    ratio,
                    previous,
                });
            }
            bitrates.push((self.target_bitrate as u64 * (ratio - previous) as u64 / 100) as u32);
            previous = ratio;
        }
        self.layer_bitrates = bitrates;
        Ok(())
    }
}

fn push_level(config: &EncoderConfig, controls: &mut Vec<Control>) {
    // VP8 has no level control; its version travels with the profile.
    if let Some(id) = config.codec.level_control() {
        if !controls.iter().any(|c| c.id == id) {
            controls.push(Control::new(id, config.level.v4l2_value()));
        }
    }
}

fn push_gop(config: &EncoderConfig, controls: &mut Vec<Control>) {
    controls.push(Control::new(
        V4L2_CID_MPEG_VIDC_VIDEO_NUM_P_FRAMES,
        config.p_frames,
    ));
    controls.push(Control::new(
        V4L2_CID_MPEG_VIDC_VIDEO_NUM_B_FRAMES,
        config.b_frames,
    ));
}

fn push_hier(config: &EncoderConfig, controls: &mut Vec<Control>) {
    let layers = config.hier_layers;
    match config.hier_mode {
        HierMode::None => {
            controls.push(Control::new(V4L2_CID_MPEG_VIDC_VIDEO_HIER_P_NUM_LAYERS, 0));
            if config.codec == Codec::Hevc {
                controls.push(Control::new(V4L2_CID_MPEG_VIDC_VIDEO_HIER_B_NUM_LAYERS, 0));
            }
        }
        HierMode::HierP => {
            controls.push(Control::new(V4L2_CID_MPEG_VIDC_VIDEO_MAX_HIERP_LAYERS, layers));
            controls.push(Control::new(V4L2_CID_MPEG_VIDC_VIDEO_HIER_P_NUM_LAYERS, layers));
            if config.codec == Codec::Hevc {
                controls.push(Control::new(
                    V4L2_CID_MPEG_VIDEO_HEVC_HIER_CODING_TYPE,
                    V4L2_MPEG_VIDEO_HEVC_HIERARCHICAL_CODING_P,
                ));
                controls.push(Control::new(V4L2_CID_MPEG_VIDEO_HEVC_HIER_CODING_LAYER, layers));
            }
        }
        HierMode::HierB => {
            controls.push(Control::new(V4L2_CID_MPEG_VIDC_VIDEO_HIER_B_NUM_LAYERS, layers));
            controls.push(Control::new(
                V4L2_CID_MPEG_VIDEO_HEVC_HIER_CODING_TYPE,
                V4L2_MPEG_VIDEO_HEVC_HIERARCHICAL_CODING_B,
            ));
            controls.push(Control::new(V4L2_CID_MPEG_VIDEO_HEVC_HIER_CODING_LAYER, layers));
        }
        HierMode::HybridHierP => {
            controls.push(Control::new(V4L2_CID_MPEG_VIDC_VIDEO_HYBRID_HIERP_MODE, layers));
        }
    }
}

fn push_layer_bitrates(config: &EncoderConfig, controls: &mut Vec<Control>) {
    let base = match config.codec {
        Codec::H264 => V4L2_CID_MPEG_VIDEO_H264_HIER_CODING_L0_BR,
        Codec::Hevc => V4L2_CID_MPEG_VIDEO_HEVC_HIER_CODING_L0_BR,
        Codec::Vp8 => return,
    };
    for (layer, bitrate) in config.layer_bitrates.iter().enumerate() {
        controls.push(Control::new(base + layer as u32, *bitrate));
    }
}

struct QpControls {
    min: u32,
    max: u32,
    i: u32,
    p: u32,
    b: Option<u32>,
}

fn qp_controls(codec: Codec) -> QpControls {
    match codec {
        Codec::H264 => QpControls {
            min: V4L2_CID_MPEG_VIDEO_H264_MIN_QP,
            max: V4L2_CID_MPEG_VIDEO_H264_MAX_QP,
            i: V4L2_CID_MPEG_VIDEO_H264_I_FRAME_QP,
            p: V4L2_CID_MPEG_VIDEO_H264_P_FRAME_QP,
            b: Some(V4L2_CID_MPEG_VIDEO_H264_B_FRAME_QP),
        },
        Codec::Hevc => QpControls {
            min: V4L2_CID_MPEG_VIDEO_HEVC_MIN_QP,
            max: V4L2_CID_MPEG_VIDEO_HEVC_MAX_QP,
            i: V4L2_CID_MPEG_VIDEO_HEVC_I_FRAME_QP,
            p: V4L2_CID_MPEG_VIDEO_HEVC_P_FRAME_QP,
            b: Some(V4L2_CID_MPEG_VIDEO_HEVC_B_FRAME_QP),
        },
        Codec::Vp8 => QpControls {
            min: V4L2_CID_MPEG_VIDEO_VPX_MIN_QP,
            max: V4L2_CID_MPEG_VIDEO_VPX_MAX_QP,
            i: V4L2_CID_MPEG_VIDEO_VPX_I_FRAME_QP,
            p: V4L2_CID_MPEG_VIDEO_VPX_P_FRAME_QP,
            b: None,
        },
    }
}

fn check_qp(qp: u32, codec: Codec) -> Result<(), ConfigError> {
    if qp > codec.max_qp() {
        Err(ConfigError::QpOutOfRange {
            qp,
            max: codec.max_qp(),
        })
    } else {
        Ok(())
    }
}

/// Validates and applies configuration changes for one session.
pub struct ConfigurationController {
    device: Arc<dyn VencDevice>,
    caps: Capabilities,
    config: Arc<Mutex<EncoderConfig>>,
}

impl ConfigurationController {
    pub fn new(device: Arc<dyn VencDevice>, codec: Codec) -> ConfigurationController {
        ConfigurationController::with_capabilities(device, codec, Capabilities::for_codec(codec))
    }

    pub fn with_capabilities(
        device: Arc<dyn VencDevice>,
        codec: Codec,
        caps: Capabilities,
    ) -> ConfigurationController {
        ConfigurationController {
            device,
            caps,
            config: Arc::new(Mutex::new(EncoderConfig::new(codec))),
        }
    }

    /// A copy of the current configuration.
    pub fn snapshot(&self) -> EncoderConfig {
        self.config.lock().clone()
    }

    /// The shared configuration, for read-only consumers.
    pub fn shared(&self) -> Arc<Mutex<EncoderConfig>> {
        self.config.clone()
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    pub fn set_capabilities(&mut self, caps: Capabilities) {
        self.caps = caps;
    }

    pub fn codec(&self) -> Codec {
        self.config.lock().codec
    }

    /// Maximum temporal layers, and maximum Hier-B layers.
    pub fn temporal_layer_caps(&self) -> (u32, u32) {
        (
            self.caps.max_hierp_layers.max(self.caps.max_hybrid_layers),
            self.caps.max_hierb_layers,
        )
    }

    /// Runs `change` on a copy of the configuration and commits the copy once the driver has
    /// accepted the controls `change` returns.
    fn update<F>(&self, what: &str, change: F) -> crate::Result<()>
    where
        F: FnOnce(&mut EncoderConfig, &Capabilities) -> Result<Vec<Control>, ConfigError>,
    {
        let mut config = self.config.lock();
        let mut candidate = config.clone();
        let controls = match change(&mut candidate, &self.caps) {
            Ok(controls) => controls,
            Err(e) => {
                warn!("rejected {}: {}", what, e);
                return Err(e.into());
            }
        };
        if !controls.is_empty() {
            self.device.set_controls(&controls)?;
        }
        if *config != candidate {
            info!("applied {}", what);
        }
        debug!("{}: {} controls", what, controls.len());
        *config = candidate;
        Ok(())
    }

    pub fn set_resolution(&self, width: u32, height: u32) -> crate::Result<()> {
        self.update("resolution", |cfg, caps| {
            if width < caps.min_width
                || width > caps.max_width
                || height < caps.min_height
                || height > caps.max_height
            {
                return Err(ConfigError::ResolutionOutOfRange(width, height));
            }
            cfg.width = width;
            cfg.height = height;
            let mut controls = Vec::new();
            cfg.refresh_level(&mut controls)?;
            Ok(controls)
        })
    }

    pub fn set_frame_rate(&self, numerator: u32, denominator: u32) -> crate::Result<()> {
        self.update("frame rate", |cfg, caps| {
            let frame_rate = FrameRate::new(numerator, denominator);
            if numerator == 0 || denominator == 0 || frame_rate.ceil_fps() > caps.max_fps {
                return Err(ConfigError::FrameRateOutOfRange(frame_rate, caps.max_fps));
            }
            cfg.frame_rate = frame_rate;
            let mut controls = vec![Control::new(
                V4L2_CID_MPEG_VIDC_VIDEO_FRAME_RATE,
                frame_rate.q16(),
            )];
            cfg.refresh_level(&mut controls)?;
            Ok(controls)
        })
    }

    pub fn set_rate_control(&self, mode: RateControlMode) -> crate::Result<()> {
        self.update("rate control", |cfg, caps| {
            if !caps.supported_rc_modes.contains(mode.mask()) {
                return Err(ConfigError::RateControlUnsupported(mode));
            }
            cfg.rate_control = mode;
            let mut controls = vec![
                Control::new(V4L2_CID_MPEG_VIDEO_FRAME_RC_ENABLE, !mode.is_off() as i32),
                Control::new(V4L2_CID_MPEG_VIDC_VIDEO_RATE_CONTROL, mode.v4l2_value()),
            ];
            cfg.refresh_level(&mut controls)?;
            Ok(controls)
        })
    }

    /// Sets the target bitrate and, optionally, the peak bitrate, both in bits per second.
    pub fn set_bitrate(&self, target: u32, peak: Option<u32>) -> crate::Result<()> {
        self.update("bitrate", |cfg, _| {
            let peak_value = peak.unwrap_or(0);
            if target == 0 || peak.map_or(false, |peak| peak < target) {
                return Err(ConfigError::InvalidBitrate {
                    target,
                    peak: peak_value,
                });
            }
            cfg.target_bitrate = target;
            let mut controls = vec![Control::new(V4L2_CID_MPEG_VIDEO_BITRATE, target)];
            if let Some(peak) = peak {
                cfg.peak_bitrate = peak;
                controls.push(Control::new(V4L2_CID_MPEG_VIDEO_BITRATE_PEAK, peak));
            }
            cfg.refresh_level(&mut controls)?;
            cfg.recompute_layer_bitrates()?;
            push_layer_bitrates(cfg, &mut controls);
            Ok(controls)
        })
    }

    /// Sets profile and level. `None` selects the value automatically: the codec's default
    /// profile, and the lowest level that accommodates the current resolution, frame rate and
    /// bitrate.
    pub fn set_profile_level(
        &self,
        profile: Option<Profile>,
        level: Option<Level>,
    ) -> crate::Result<()> {
        self.update("profile/level", |cfg, _| {
            let codec = cfg.codec;
            if let Some(profile) = profile {
                if profile.codec() != codec {
                    return Err(ConfigError::UnsupportedProfile { profile, codec });
                }
            }
            if let Some(level) = level {
                if level.codec() != codec {
                    return Err(ConfigError::UnsupportedLevel { level, codec });
                }
            }

            cfg.profile = profile.unwrap_or_else(|| codec.default_profile());
            cfg.profile_auto = profile.is_none();
            let mut controls = vec![Control::new(
                codec.profile_control(),
                cfg.profile.v4l2_value(),
            )];

            if !cfg.profile.supports_b_frames()
                && cfg.b_frames > 0
                && cfg.hier_mode != HierMode::HierB
            {
                debug!("{} has no B frames, dropping {}", cfg.profile, cfg.b_frames);
                cfg.b_frames = 0;
                push_gop(cfg, &mut controls);
            }

            if cfg.cabac && !cfg.profile.supports_cabac() {
                debug!("{} has no CABAC, falling back to CAVLC", cfg.profile);
                cfg.cabac = false;
                controls.push(entropy_control(false));
            }

            if let Some(level) = level {
                cfg.level = level;
            }
            cfg.level_auto = level.is_none();
            cfg.refresh_level(&mut controls)?;
            push_level(cfg, &mut controls);
            Ok(controls)
        })
    }

    /// Sets the P and B frames of an intra period. B frames are dropped without error when the
    /// profile cannot carry them. The split is recalibrated for the active hierarchy.
    pub fn set_intra_period(&self, p_frames: u32, b_frames: u32) -> crate::Result<()> {
        self.update("intra period", |cfg, _| {
            let mut b_frames = b_frames;
            if b_frames > 0 && !cfg.profile.supports_b_frames() {
                debug!("{} has no B frames, dropping {}", cfg.profile, b_frames);
                b_frames = 0;
            }
            if b_frames > 0 && cfg.hier_mode != HierMode::HierB {
                check_compatible(Features::B_FRAMES, cfg.active_features())?;
            }
            let gop = calibrate_gop(p_frames, b_frames, cfg.hier_layers, cfg.hier_mode)?;
            cfg.p_frames = gop.p_frames;
            cfg.b_frames = gop.b_frames;
            let mut controls = Vec::new();
            push_gop(cfg, &mut controls);
            Ok(controls)
        })
    }

    /// Recalibrates the current P/B split for the active hierarchy and returns the result.
    pub fn calibrate_gop(&self) -> crate::Result<Gop> {
        let mut result = Gop::default();
        self.update("GOP calibration", |cfg, _| {
            result = calibrate_gop(cfg.p_frames, cfg.b_frames, cfg.hier_layers, cfg.hier_mode)?;
            cfg.p_frames = result.p_frames;
            cfg.b_frames = result.b_frames;
            let mut controls = Vec::new();
            push_gop(cfg, &mut controls);
            Ok(controls)
        })?;
        Ok(result)
    }

    /// Enables Hier-P or Hier-B with `layers` temporal layers. `HierMode::None` or a single
    /// layer turns classic hierarchical coding off.
    pub fn set_hierarchical_layers(&self, mode: HierMode, layers: u32) -> crate::Result<()> {
        self.update("hierarchical layers", |cfg, caps| {
            let codec = cfg.codec;
            let requested = match mode {
                HierMode::None => Features::empty(),
                HierMode::HierP => Features::HIER_P,
                HierMode::HierB => Features::HIER_B,
                HierMode::HybridHierP => {
                    return Err(ConfigError::UnsupportedHierMode { mode, codec });
                }
            };
            if requested.is_empty() || layers <= 1 {
                if cfg.hier_mode == HierMode::HybridHierP {
                    return Err(ConfigError::ConflictingFeatures {
                        requested: Features::HIER_P | Features::HIER_B,
                        active: Features::HYBRID_HIER_P,
                    });
                }
                cfg.hier_mode = HierMode::None;
                cfg.hier_layers = 1;
                let mut controls = Vec::new();
                push_hier(cfg, &mut controls);
                return Ok(controls);
            }

            let max = if mode == HierMode::HierB {
                if codec != Codec::Hevc || caps.max_hierb_layers == 0 {
                    return Err(ConfigError::UnsupportedHierMode { mode, codec });
                }
                caps.max_hierb_layers
            } else {
                caps.max_hierp_layers
            };
            if layers > max {
                return Err(ConfigError::TooManyLayers {
                    requested: layers,
                    max,
                });
            }
            // Switching between Hier-P and Hier-B replaces the active hierarchy.
            let active = cfg.active_features() - (Features::HIER_P | Features::HIER_B);
            check_compatible(requested, active)?;

            let gop = calibrate_gop(cfg.p_frames, cfg.b_frames, layers, mode)?;
            cfg.hier_mode = mode;
            cfg.hier_layers = layers;
            cfg.p_frames = gop.p_frames;
            cfg.b_frames = gop.b_frames;
            let mut controls = Vec::new();
            push_hier(cfg, &mut controls);
            push_gop(cfg, &mut controls);
            Ok(controls)
        })
    }

    /// Enables `count` long-term reference frames, or disables them with zero.
    pub fn set_long_term_reference(&self, count: u32) -> crate::Result<()> {
        self.update("long-term references", |cfg, caps| {
            if count > caps.max_ltr_count {
                return Err(ConfigError::TooManyLtrFrames {
                    requested: count,
                    max: caps.max_ltr_count,
                });
            }
            if count > 0 {
                check_compatible(Features::LTR, cfg.active_features())?;
            }
            cfg.ltr_count = count;
            let mode = if count > 0 {
                V4L2_MPEG_VIDC_VIDEO_LTR_MODE_MANUAL
            } else {
                V4L2_MPEG_VIDC_VIDEO_LTR_MODE_DISABLE
            };
            Ok(vec![
                Control::new(V4L2_CID_MPEG_VIDC_VIDEO_LTRMODE, mode),
                Control::new(V4L2_CID_MPEG_VIDC_VIDEO_LTRCOUNT, count),
            ])
        })
    }

    /// Enables hybrid Hier-P, or disables it when `settings.layers` is zero.
    pub fn set_hybrid_hierp(&self, settings: &HybridHierPSettings) -> crate::Result<()> {
        self.update("hybrid Hier-P", |cfg, caps| {
            let codec = cfg.codec;
            if caps.max_hybrid_layers == 0 {
                return Err(ConfigError::UnsupportedForCodec {
                    feature: "hybrid Hier-P",
                    codec,
                });
            }
            let mut controls = Vec::new();
            if settings.layers == 0 {
                if cfg.hier_mode == HierMode::HybridHierP {
                    cfg.hier_mode = HierMode::None;
                    cfg.hier_layers = 1;
                    cfg.hybrid_key_frame_interval = 0;
                    controls.push(Control::new(V4L2_CID_MPEG_VIDC_VIDEO_HYBRID_HIERP_MODE, 0));
                }
                return Ok(controls);
            }
            if settings.layers > caps.max_hybrid_layers {
                return Err(ConfigError::TooManyLayers {
                    requested: settings.layers,
                    max: caps.max_hybrid_layers,
                });
            }
            if settings.key_frame_interval < 2 {
                return Err(ConfigError::InvalidKeyFrameInterval(
                    settings.key_frame_interval,
                ));
            }
            let active = cfg.active_features() - Features::HYBRID_HIER_P;
            check_compatible(Features::HYBRID_HIER_P, active)?;
            if let Some(range) = settings.qp_range {
                range.validate(codec)?;
            }

            let gop = calibrate_gop(
                settings.key_frame_interval - 1,
                0,
                settings.layers,
                HierMode::HybridHierP,
            )?;
            cfg.hier_mode = HierMode::HybridHierP;
            cfg.hier_layers = settings.layers;
            cfg.hybrid_key_frame_interval = settings.key_frame_interval;
            cfg.p_frames = gop.p_frames;
            cfg.b_frames = 0;
            push_hier(cfg, &mut controls);
            push_gop(cfg, &mut controls);

            if let Some(range) = settings.qp_range {
                cfg.qp_range = range;
                let ids = qp_controls(codec);
                controls.push(Control::new(ids.min, range.min));
                controls.push(Control::new(ids.max, range.max));
            }
            if !settings.layer_bitrate_ratios.is_empty() {
                if settings.layer_bitrate_ratios.len() > settings.layers as usize {
                    return Err(ConfigError::TooManyRatios {
                        count: settings.layer_bitrate_ratios.len(),
                        layers: settings.layers,
                    });
                }
                cfg.layer_bitrate_ratios = settings.layer_bitrate_ratios.clone();
                cfg.recompute_layer_bitrates()?;
                push_layer_bitrates(cfg, &mut controls);
            }
            Ok(controls)
        })
    }

    /// Splits the target bitrate across temporal layers. `ratios` are cumulative percentages
    /// of the target bitrate, one per layer, base layer first.
    pub fn set_layer_bitrates(&self, ratios: &[u32]) -> crate::Result<()> {
        self.update("layer bitrates", |cfg, _| {
            if cfg.codec == Codec::Vp8 {
                return Err(ConfigError::UnsupportedForCodec {
                    feature: "per-layer bitrates",
                    codec: cfg.codec,
                });
            }
            if cfg.target_bitrate == 0 {
                return Err(ConfigError::MissingBitrate);
            }
            let layers = cfg.hier_layers.max(1);
            if ratios.len() > layers as usize {
                return Err(ConfigError::TooManyRatios {
                    count: ratios.len(),
                    layers,
                });
            }
            cfg.layer_bitrate_ratios = ratios.to_vec();
            cfg.recompute_layer_bitrates()?;
            let mut controls = Vec::new();
            push_layer_bitrates(cfg, &mut controls);
            Ok(controls)
        })
    }

    /// Sets the initial QP of each frame type.
    pub fn set_session_qp(&self, qp: SessionQp) -> crate::Result<()> {
        self.update("session QP", |cfg, _| {
            for value in [qp.i, qp.p, qp.b] {
                check_qp(value, cfg.codec)?;
            }
            cfg.session_qp = Some(qp);
            let ids = qp_controls(cfg.codec);
            let mut controls = vec![Control::new(ids.i, qp.i), Control::new(ids.p, qp.p)];
            if let Some(b) = ids.b {
                controls.push(Control::new(b, qp.b));
            }
            Ok(controls)
        })
    }

    pub fn set_qp_range(&self, range: QpRange) -> crate::Result<()> {
        self.update("QP range", |cfg, _| {
            range.validate(cfg.codec)?;
            cfg.qp_range = range;
            let ids = qp_controls(cfg.codec);
            Ok(vec![
                Control::new(ids.min, range.min),
                Control::new(ids.max, range.max),
            ])
        })
    }

    pub fn set_ipb_qp_range(&self, range: IpbQpRange) -> crate::Result<()> {
        self.update("per-frame QP range", |cfg, _| {
            for r in [range.i, range.p, range.b] {
                r.validate(cfg.codec)?;
            }
            cfg.ipb_qp = Some(range);
            Ok(vec![
                Control::new(V4L2_CID_MPEG_VIDC_VIDEO_I_FRAME_QP_MIN, range.i.min),
                Control::new(V4L2_CID_MPEG_VIDC_VIDEO_I_FRAME_QP_MAX, range.i.max),
                Control::new(V4L2_CID_MPEG_VIDC_VIDEO_P_FRAME_QP_MIN, range.p.min),
                Control::new(V4L2_CID_MPEG_VIDC_VIDEO_P_FRAME_QP_MAX, range.p.max),
                Control::new(V4L2_CID_MPEG_VIDC_VIDEO_B_FRAME_QP_MIN, range.b.min),
                Control::new(V4L2_CID_MPEG_VIDC_VIDEO_B_FRAME_QP_MAX, range.b.max),
            ])
        })
    }

    /// Sets how many intra periods pass between IDR frames.
    pub fn set_idr_period(&self, period: u32) -> crate::Result<()> {
        self.update("IDR period", |cfg, _| {
            if period == 0 {
                return Err(ConfigError::InvalidGop("IDR period must be at least 1".to_string()));
            }
            cfg.idr_period = period;
            Ok(vec![Control::new(V4L2_CID_MPEG_VIDC_VIDEO_IDR_PERIOD, period)])
        })
    }

    /// Sets how many frames each input submission carries.
    pub fn set_batch_size(&self, size: u32) -> crate::Result<()> {
        self.update("batch size", |cfg, _| {
            if size == 0 || size > MAX_BATCH_SIZE {
                return Err(ConfigError::InvalidBatchSize(size));
            }
            cfg.batch_size = size;
            Ok(vec![Control::new(V4L2_CID_MPEG_VIDC_VIDEO_BATCH_SIZE, size)])
        })
    }

    pub fn set_extradata(&self, enable: bool) -> crate::Result<()> {
        self.update("extradata", |cfg, _| {
            cfg.extradata = enable;
            Ok(vec![Control::new(
                V4L2_CID_MPEG_VIDC_VIDEO_EXTRADATA,
                enable as i32,
            )])
        })
    }

    fn check_ltr_index(cfg: &EncoderConfig, index: u32) -> Result<(), ConfigError> {
        if cfg.ltr_count == 0 {
            return Err(ConfigError::LtrDisabled);
        }
        if index >= cfg.ltr_count {
            return Err(ConfigError::LtrIndexOutOfRange {
                index,
                count: cfg.ltr_count,
            });
        }
        Ok(())
    }

    /// Makes the next frame reference long-term reference `index`.
    pub fn use_ltr(&self, index: u32) -> crate::Result<()> {
        self.update("use LTR", |cfg, _| {
            ConfigurationController::check_ltr_index(cfg, index)?;
            Ok(vec![Control::new(
                V4L2_CID_MPEG_VIDC_VIDEO_USELTRFRAME,
                1i64 << index,
            )])
        })
    }

    /// Stores the next frame as long-term reference `index`.
    pub fn mark_ltr(&self, index: u32) -> crate::Result<()> {
        self.update("mark LTR", |cfg, _| {
            ConfigurationController::check_ltr_index(cfg, index)?;
            Ok(vec![Control::new(
                V4L2_CID_MPEG_VIDC_VIDEO_MARKLTRFRAME,
                index,
            )])
        })
    }

    /// Applies every setting in dependency order, stopping at the first failure. Settings
    /// applied before the failure stay applied.
    pub fn apply(&self, settings: &EncoderSettings) -> crate::Result<()> {
        let codec = self.codec();
        if settings.codec != codec {
            return Err(ConfigError::CodecMismatch {
                session: codec,
                requested: settings.codec,
            }
            .into());
        }
        self.set_resolution(settings.width, settings.height)?;
        self.set_frame_rate(settings.frame_rate.numerator, settings.frame_rate.denominator)?;
        self.set_rate_control(settings.rate_control)?;
        if settings.target_bitrate > 0 {
            self.set_bitrate(settings.target_bitrate, settings.peak_bitrate)?;
        }
        self.set_profile_level(settings.profile, settings.level)?;
        if let Some(intra) = settings.intra_period {
            self.set_intra_period(intra.p_frames, intra.b_frames)?;
        }
        if let Some(period) = settings.idr_period {
            self.set_idr_period(period)?;
        }
        if let Some(hier) = settings.hier {
            self.set_hierarchical_layers(hier.mode, hier.layers)?;
        }
        if settings.ltr_count > 0 {
            self.set_long_term_reference(settings.ltr_count)?;
        }
        if let Some(hybrid) = &settings.hybrid_hierp {
            self.set_hybrid_hierp(hybrid)?;
        }
        if let Some(qp) = settings.session_qp {
            self.set_session_qp(qp)?;
        }
        if let Some(range) = settings.qp_range {
            self.set_qp_range(range)?;
        }
        if let Some(range) = settings.ipb_qp_range {
            self.set_ipb_qp_range(range)?;
        }
        if !settings.layer_bitrate_ratios.is_empty() {
            self.set_layer_bitrates(&settings.layer_bitrate_ratios)?;
        }
        if let Some(refresh) = settings.intra_refresh {
            self.set_intra_refresh(refresh)?;
        }
        if let Some(mode) = settings.slice_mode {
            self.set_multislice(mode)?;
        }
        if let Some(cabac) = settings.cabac {
            self.set_entropy(cabac)?;
        }
        if let Some(filter) = settings.loop_filter {
            self.set_loop_filter(filter)?;
        }
        if settings.vui_timing_info {
            self.set_vui_timing_info(true)?;
        }
        if settings.au_delimiter {
            self.set_au_delimiter(true)?;
        }
        if settings.inband_header {
            self.set_inband_header(true)?;
        }
        if let Some(rate) = settings.operating_rate {
            self.set_operating_rate(rate)?;
        }
        if let Some(priority) = settings.priority {
            self.set_priority(priority)?;
        }
        if settings.rotation != 0 {
            self.set_rotation(settings.rotation)?;
        }
        self.set_batch_size(settings.batch_size)?;
        self.set_extradata(settings.extradata)?;
        Ok(())
    }
}
