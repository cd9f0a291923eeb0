// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Command line front end for probing an encoder node and the level tables.

use std::path::PathBuf;

use anyhow::anyhow;
use anyhow::Context;
use argh::FromArgs;
use base::info;
use base::syslog;
use log::LevelFilter;
use venc::config::level_table::select_level;
use venc::config::level_table::Demand;
use venc::config::EncoderSettings;
use venc::device::Port;
use venc::device::V4l2Device;
use venc::extradata::default_allocator;
use venc::format::Codec;
use venc::format::FrameRate;
use venc::SessionOptions;
use venc::VencSession;

#[derive(FromArgs)]
/// hardware video encoder control plane
struct Args {
    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Probe(ProbeCommand),
    Levels(LevelsCommand),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "probe")]
/// configure an encoder node and print the resulting configuration as JSON
struct ProbeCommand {
    /// path of the V4L2 encoder node
    #[argh(option, default = "PathBuf::from(\"/dev/video33\")")]
    device: PathBuf,
    /// encoder settings file in JSON; defaults are used when absent
    #[argh(option)]
    config: Option<PathBuf>,
    /// log at debug level
    #[argh(switch, short = 'v')]
    verbose: bool,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "levels")]
/// print the profile and level selected for a stream without opening a device
struct LevelsCommand {
    /// codec: h264, hevc or vp8
    #[argh(option, default = "Codec::H264")]
    codec: Codec,
    /// frame width in pixels
    #[argh(option)]
    width: u32,
    /// frame height in pixels
    #[argh(option)]
    height: u32,
    /// frames per second (default: 30)
    #[argh(option, default = "30")]
    fps: u32,
    /// target bitrate in bits per second (default: 0, ignored)
    #[argh(option, default = "0")]
    bitrate: u32,
}

fn probe(cmd: ProbeCommand) -> anyhow::Result<()> {
    let settings = match &cmd.config {
        Some(path) => EncoderSettings::from_json_file(path)?,
        None => EncoderSettings::default(),
    };
    let level = if cmd.verbose {
        LevelFilter::Debug
    } else {
        match settings.debug.log_level.as_deref() {
            Some(name) => {
                syslog::parse_level(name).ok_or_else(|| anyhow!("unknown log level {}", name))?
            }
            None => LevelFilter::Info,
        }
    };
    syslog::init_with_filter(level);

    let device = V4l2Device::open(&cmd.device)
        .with_context(|| format!("failed to open {}", cmd.device.display()))?;
    let mut session = VencSession::new(
        device,
        default_allocator(),
        SessionOptions::new(settings.codec),
    );
    session
        .configure(&settings)
        .context("failed to configure the encoder")?;

    let output = session
        .negotiate_format(
            Port::Output,
            settings.width,
            settings.height,
            settings.codec.fourcc(),
        )
        .context("failed to set the output format")?;
    let input = session
        .negotiate_format(
            Port::Input,
            settings.width,
            settings.height,
            settings.input_format.fourcc(),
        )
        .context("failed to set the input format")?;
    let input_count = session
        .set_buffer_count(Port::Input, settings.input_buffers)
        .context("failed to allocate input buffers")?;
    let output_count = session
        .set_buffer_count(Port::Output, settings.output_buffers)
        .context("failed to allocate output buffers")?;
    info!(
        "input: {} buffers of {} bytes, output: {} buffers of {} bytes",
        input_count, input.buffer_size, output_count, output.buffer_size
    );

    let json = serde_json::to_string_pretty(&session.config())
        .context("failed to serialize the configuration")?;
    println!("{}", json);
    session.stop().context("failed to release the encoder")?;
    Ok(())
}

fn levels(cmd: LevelsCommand) -> anyhow::Result<()> {
    syslog::init();
    let profile = cmd.codec.default_profile();
    let demand = Demand::new(cmd.width, cmd.height, FrameRate::new(cmd.fps, 1), cmd.bitrate);
    let level = select_level(profile, &demand).ok_or_else(|| {
        anyhow!(
            "no {} level fits {}x{} at {} fps and {} bps",
            cmd.codec,
            cmd.width,
            cmd.height,
            cmd.fps,
            cmd.bitrate
        )
    })?;
    let json = serde_json::json!({
        "codec": cmd.codec,
        "profile": profile,
        "level": level,
    });
    println!("{}", json);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();
    match args.command {
        Command::Probe(cmd) => probe(cmd),
        Command::Levels(cmd) => levels(cmd),
    }
}
