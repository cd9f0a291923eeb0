// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::path::PathBuf;

use remain::sorted;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use super::HybridHierPSettings;
use super::IntraRefresh;
use super::IpbQpRange;
use super::LoopFilter;
use super::QpRange;
use super::SessionPriority;
use super::SessionQp;
use super::SliceMode;
use crate::format::Codec;
use crate::format::FrameRate;
use crate::format::HierMode;
use crate::format::Level;
use crate::format::PixelFormat;
use crate::format::Profile;
use crate::format::RateControlMode;

#[sorted]
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// P and B frames between two intra frames.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntraPeriod {
    pub p_frames: u32,
    #[serde(default)]
    pub b_frames: u32,
}

/// Classic hierarchical coding.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierSettings {
    pub mode: HierMode,
    pub layers: u32,
}

/// Side-channel dumps of the buffers a session moves.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSettings {
    /// Directory receiving the dump files. Dumping is off when unset.
    pub dump_dir: Option<PathBuf>,
    pub dump_input: bool,
    pub dump_output: bool,
    pub dump_extradata: bool,
    /// Log filter handed to `base::syslog::init_with_filter` by the CLI.
    pub log_level: Option<String>,
}

impl DebugSettings {
    pub fn dumps_anything(&self) -> bool {
        self.dump_dir.is_some() && (self.dump_input || self.dump_output || self.dump_extradata)
    }
}

/// Everything needed to configure an encoding session, as read from a JSON file.
///
/// Optional fields left unset keep the driver's or the controller's defaults; `profile` and
/// `level` are derived automatically when absent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    pub codec: Codec,
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub input_format: PixelFormat,
    pub rate_control: RateControlMode,
    /// Bits per second. Zero leaves the bitrate unset.
    pub target_bitrate: u32,
    pub peak_bitrate: Option<u32>,
    pub profile: Option<Profile>,
    pub level: Option<Level>,
    pub intra_period: Option<IntraPeriod>,
    pub idr_period: Option<u32>,
    pub hier: Option<HierSettings>,
    pub ltr_count: u32,
    pub hybrid_hierp: Option<HybridHierPSettings>,
    pub qp_range: Option<QpRange>,
    pub ipb_qp_range: Option<IpbQpRange>,
    pub session_qp: Option<SessionQp>,
    pub layer_bitrate_ratios: Vec<u32>,
    pub intra_refresh: Option<IntraRefresh>,
    pub slice_mode: Option<SliceMode>,
    /// CABAC when true, CAVLC when false, the driver's choice when unset.
    pub cabac: Option<bool>,
    pub loop_filter: Option<LoopFilter>,
    pub vui_timing_info: bool,
    pub au_delimiter: bool,
    pub inband_header: bool,
    pub operating_rate: Option<FrameRate>,
    pub priority: Option<SessionPriority>,
    /// Clockwise degrees: 0, 90, 180 or 270.
    pub rotation: u32,
    pub input_buffers: u32,
    pub output_buffers: u32,
    pub batch_size: u32,
    pub extradata: bool,
    pub debug: DebugSettings,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        EncoderSettings {
            codec: Codec::default(),
            width: 640,
            height: 480,
            frame_rate: FrameRate::default(),
            input_format: PixelFormat::default(),
            rate_control: RateControlMode::default(),
            target_bitrate: 0,
            peak_bitrate: None,
            profile: None,
            level: None,
            intra_period: None,
            idr_period: None,
            hier: None,
            ltr_count: 0,
            hybrid_hierp: None,
            qp_range: None,
            ipb_qp_range: None,
            session_qp: None,
            layer_bitrate_ratios: Vec::new(),
            intra_refresh: None,
            slice_mode: None,
            cabac: None,
            loop_filter: None,
            vui_timing_info: false,
            au_delimiter: false,
            inband_header: false,
            operating_rate: None,
            priority: None,
            rotation: 0,
            input_buffers: 4,
            output_buffers: 4,
            batch_size: 1,
            extradata: false,
            debug: DebugSettings::default(),
        }
    }
}

impl EncoderSettings {
    pub fn from_json_str(json: &str) -> serde_json::Result<EncoderSettings> {
        serde_json::from_str(json)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<EncoderSettings, SettingsError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| SettingsError::Open {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| SettingsError::Parse {
            path: path.to_owned(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let settings = EncoderSettings::from_json_str(r#"{ "codec": "vp8" }"#).unwrap();
        assert_eq!(settings.codec, Codec::Vp8);
        assert_eq!((settings.width, settings.height), (640, 480));
        assert_eq!(settings.batch_size, 1);
        assert_eq!(settings.input_buffers, 4);
        assert!(settings.profile.is_none());
        assert!(!settings.debug.dumps_anything());
    }

    #[test]
    fn nested_settings() {
        let settings = EncoderSettings::from_json_str(
            r#"{
                "codec": "h264",
                "profile": "h264_main",
                "level": "h264_3_1",
                "rate_control": "cbr_cfr",
                "hybrid_hierp": { "layers": 3, "key_frame_interval": 30 },
                "session_qp": { "i": 20, "p": 25, "b": 28 },
                "debug": { "dump_dir": "/tmp", "dump_output": true }
            }"#,
        )
        .unwrap();
        assert_eq!(settings.profile, Some(Profile::H264Main));
        assert_eq!(settings.level, Some(Level::H264_3_1));
        assert_eq!(settings.rate_control, RateControlMode::CbrCfr);
        let hybrid = settings.hybrid_hierp.unwrap();
        assert_eq!(hybrid.layers, 3);
        assert!(hybrid.layer_bitrate_ratios.is_empty());
        assert!(settings.debug.dumps_anything());
    }

    #[test]
    fn coding_tools() {
        let settings = EncoderSettings::from_json_str(
            r#"{
                "codec": "h264",
                "intra_refresh": { "mode": "cyclic", "mbs": 40 },
                "slice_mode": { "max_bytes": 1200 },
                "cabac": true,
                "loop_filter": { "mode": "disabled_at_slice_boundary", "alpha": -2 },
                "priority": "realtime",
                "rotation": 90
            }"#,
        )
        .unwrap();
        assert_eq!(settings.intra_refresh.unwrap().mbs, 40);
        assert_eq!(settings.slice_mode, Some(SliceMode::MaxBytes(1200)));
        assert_eq!(settings.cabac, Some(true));
        assert_eq!(settings.loop_filter.unwrap().beta, 0);
        assert_eq!(settings.priority, Some(SessionPriority::Realtime));
        assert_eq!(settings.rotation, 90);
        assert!(!settings.inband_header);
    }

    #[test]
    fn unknown_codec_rejected() {
        assert!(EncoderSettings::from_json_str(r#"{ "codec": "mpeg2" }"#).is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "codec": "hevc", "width": 1280, "height": 720 }}"#).unwrap();
        let settings = EncoderSettings::from_json_file(file.path()).unwrap();
        assert_eq!(settings.codec, Codec::Hevc);
        assert_eq!(settings.width, 1280);

        let missing = file.path().with_extension("missing");
        assert!(matches!(
            EncoderSettings::from_json_file(missing),
            Err(SettingsError::Open { .. })
        ));
    }
}
