// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Diagnostic dumps of the buffers a session moves.
//!
//! Dumping is a side channel: every failure is logged and otherwise ignored.

use std::fs::File;
use std::io::BufWriter;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use base::debug;
use base::pagesize;
use base::warn;
use base::Descriptor;
use base::MemoryMappingBuilder;
use base::MmapResult;
use base::Protection;
use base::RawDescriptor;
use sync::Mutex;

use crate::config::DebugSettings;
use crate::dispatcher::Completion;
use crate::dispatcher::CompletionSink;
use crate::format::Codec;
use crate::format::FrameRate;

const IVF_FILE_HEADER_SIZE: usize = 32;
const IVF_FRAME_COUNT_OFFSET: u64 = 24;

/// Which stream a dump file holds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DumpKind {
    Input,
    Output,
    Extradata,
}

/// Name of the dump file of `kind` for a `width`x`height` `codec` session.
pub fn dump_file_name(kind: DumpKind, width: u32, height: u32, codec: Codec) -> String {
    match kind {
        DumpKind::Input => format!("input_enc_{}x{}_{}.yuv", width, height, codec),
        DumpKind::Output => format!(
            "output_enc_{}x{}_{}.{}",
            width,
            height,
            codec,
            codec.dump_extension()
        ),
        DumpKind::Extradata => format!("extradata_enc_{}x{}_{}.bin", width, height, codec),
    }
}

fn ivf_file_header(width: u32, height: u32, frame_rate: FrameRate) -> [u8; IVF_FILE_HEADER_SIZE] {
    let mut header = [0u8; IVF_FILE_HEADER_SIZE];
    header[0..4].copy_from_slice(b"DKIF");
    header[4..6].copy_from_slice(&0u16.to_le_bytes());
    header[6..8].copy_from_slice(&(IVF_FILE_HEADER_SIZE as u16).to_le_bytes());
    header[8..12].copy_from_slice(b"VP80");
    header[12..14].copy_from_slice(&(width as u16).to_le_bytes());
    header[14..16].copy_from_slice(&(height as u16).to_le_bytes());
    header[16..20].copy_from_slice(&frame_rate.numerator.to_le_bytes());
    header[20..24].copy_from_slice(&frame_rate.denominator.to_le_bytes());
    // Frame count at 24..28 is patched when the dumper is dropped.
    header
}

fn ivf_frame_header(size: u32, timestamp: u64) -> [u8; 12] {
    let mut header = [0u8; 12];
    header[0..4].copy_from_slice(&size.to_le_bytes());
    header[4..12].copy_from_slice(&timestamp.to_le_bytes());
    header
}

/// Copies `len` bytes at `offset` out of the memory behind `fd`.
pub fn read_buffer(fd: RawDescriptor, offset: u32, len: u32) -> MmapResult<Vec<u8>> {
    let page_offset = offset as usize % pagesize();
    let map_offset = offset as usize - page_offset;
    let descriptor = Descriptor(fd);
    let mapping = MemoryMappingBuilder::new(page_offset + len as usize)
        .from_descriptor(&descriptor)
        .offset(map_offset as u64)
        .protection(Protection::read())
        .build()?;
    let mut data = vec![0u8; len as usize];
    mapping.read_slice(&mut data, page_offset)?;
    Ok(data)
}

struct DumpFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl DumpFile {
    fn create(path: PathBuf) -> Option<DumpFile> {
        match File::create(&path) {
            Ok(file) => {
                debug!("dumping to {}", path.display());
                Some(DumpFile {
                    path,
                    writer: BufWriter::new(file),
                })
            }
            Err(e) => {
                warn!("failed to create dump file {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Writes `chunks` back to back. Returns false and logs on failure.
    fn write(&mut self, chunks: &[&[u8]]) -> bool {
        for chunk in chunks {
            if let Err(e) = self.writer.write_all(chunk) {
                warn!("failed to write {}: {}", self.path.display(), e);
                return false;
            }
        }
        true
    }
}

/// Writes input frames, encoded output and extradata of one session into a dump directory.
pub struct BufferDumper {
    codec: Codec,
    input: Option<DumpFile>,
    output: Option<DumpFile>,
    extradata: Option<DumpFile>,
    output_frames: u32,
}

impl BufferDumper {
    /// Opens the dump files selected by `settings`. Returns `None` when nothing is dumped.
    pub fn new(
        settings: &DebugSettings,
        width: u32,
        height: u32,
        codec: Codec,
        frame_rate: FrameRate,
    ) -> Option<BufferDumper> {
        if !settings.dumps_anything() {
            return None;
        }
        let dir = settings.dump_dir.as_deref()?;
        let open = |enabled: bool, kind: DumpKind| -> Option<DumpFile> {
            if !enabled {
                return None;
            }
            DumpFile::create(dump_path(dir, kind, width, height, codec))
        };
        let mut dumper = BufferDumper {
            codec,
            input: open(settings.dump_input, DumpKind::Input),
            output: open(settings.dump_output, DumpKind::Output),
            extradata: open(settings.dump_extradata, DumpKind::Extradata),
            output_frames: 0,
        };
        if codec == Codec::Vp8 {
            if let Some(output) = &mut dumper.output {
                if !output.write(&[&ivf_file_header(width, height, frame_rate)]) {
                    dumper.output = None;
                }
            }
        }
        Some(dumper)
    }

    pub fn dumps_input(&self) -> bool {
        self.input.is_some()
    }

    pub fn dumps_output(&self) -> bool {
        self.output.is_some()
    }

    pub fn dump_input(&mut self, frame: &[u8]) {
        if let Some(input) = &mut self.input {
            input.write(&[frame]);
        }
    }

    pub fn dump_output(&mut self, data: &[u8], timestamp_us: i64) {
        let output = match &mut self.output {
            Some(output) => output,
            None => return,
        };
        let written = if self.codec == Codec::Vp8 {
            let header = ivf_frame_header(data.len() as u32, timestamp_us.max(0) as u64);
            output.write(&[&header, data])
        } else {
            output.write(&[data])
        };
        if written {
            self.output_frames += 1;
        }
    }

    pub fn dump_extradata(&mut self, data: &[u8]) {
        if let Some(extradata) = &mut self.extradata {
            extradata.write(&[data]);
        }
    }

    fn finish_ivf(output: &mut DumpFile, frames: u32) -> std::io::Result<()> {
        output.writer.flush()?;
        let file = output.writer.get_mut();
        file.seek(SeekFrom::Start(IVF_FRAME_COUNT_OFFSET))?;
        file.write_all(&frames.to_le_bytes())?;
        file.seek(SeekFrom::End(0))?;
        Ok(())
    }
}

impl Drop for BufferDumper {
    fn drop(&mut self) {
        if self.codec == Codec::Vp8 {
            if let Some(output) = &mut self.output {
                if let Err(e) = BufferDumper::finish_ivf(output, self.output_frames) {
                    warn!("failed to finish {}: {}", output.path.display(), e);
                }
            }
        }
        for file in [&mut self.input, &mut self.output, &mut self.extradata]
            .into_iter()
            .flatten()
        {
            if let Err(e) = file.writer.flush() {
                warn!("failed to flush {}: {}", file.path.display(), e);
            }
        }
    }
}

/// Dumps output buffers and their extradata before passing completions on. The dumper slot is
/// empty until the session is configured with dumping enabled.
pub(crate) struct DumpingSink {
    pub inner: Box<dyn CompletionSink>,
    pub dumper: Arc<Mutex<Option<BufferDumper>>>,
}

impl CompletionSink for DumpingSink {
    fn deliver(&mut self, completion: Completion) {
        if let Completion::Output(done) = &completion {
            let mut dumper = self.dumper.lock();
            if let Some(dumper) = dumper.as_mut() {
                if !done.flushed && done.bytes_used > 0 && dumper.dumps_output() {
                    match read_buffer(done.fd, done.offset, done.bytes_used) {
                        Ok(data) => dumper.dump_output(&data, done.timestamp_us),
                        Err(e) => warn!("failed to map output buffer {}: {}", done.index, e),
                    }
                }
                if let Some(extradata) = &done.extradata {
                    dumper.dump_extradata(extradata);
                }
            }
        }
        self.inner.deliver(completion);
    }
}

/// Path of the dump file of `kind` inside `dir`.
pub fn dump_path(dir: &Path, kind: DumpKind, width: u32, height: u32, codec: Codec) -> PathBuf {
    dir.join(dump_file_name(kind, width, height, codec))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use base::AsRawDescriptor;
    use base::SharedMemory;

    use super::*;
    use crate::dispatcher::CompletionStream;
    use crate::dispatcher::OutputDone;
    use crate::queue::EntryFlags;

    fn settings(dir: &Path) -> DebugSettings {
        DebugSettings {
            dump_dir: Some(dir.to_owned()),
            dump_input: true,
            dump_output: true,
            dump_extradata: false,
            log_level: None,
        }
    }

    #[test]
    fn file_names() {
        assert_eq!(
            dump_file_name(DumpKind::Output, 1280, 720, Codec::Hevc),
            "output_enc_1280x720_hevc.265"
        );
        assert_eq!(
            dump_file_name(DumpKind::Input, 640, 480, Codec::H264),
            "input_enc_640x480_h264.yuv"
        );
        assert_eq!(
            dump_file_name(DumpKind::Extradata, 640, 480, Codec::Vp8),
            "extradata_enc_640x480_vp8.bin"
        );
    }

    #[test]
    fn disabled_without_directory() {
        let settings = DebugSettings {
            dump_input: true,
            ..Default::default()
        };
        assert!(BufferDumper::new(&settings, 64, 64, Codec::H264, FrameRate::default()).is_none());
    }

    #[test]
    fn raw_streams() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut dumper =
                BufferDumper::new(&settings(dir.path()), 64, 64, Codec::H264, FrameRate::default())
                    .unwrap();
            dumper.dump_input(&[1, 2, 3]);
            dumper.dump_output(&[9, 9], 0);
            dumper.dump_extradata(&[5]);
        }
        let input = dump_path(dir.path(), DumpKind::Input, 64, 64, Codec::H264);
        let output = dump_path(dir.path(), DumpKind::Output, 64, 64, Codec::H264);
        assert_eq!(fs::read(input).unwrap(), vec![1, 2, 3]);
        assert_eq!(fs::read(output).unwrap(), vec![9, 9]);
        assert!(!dump_path(dir.path(), DumpKind::Extradata, 64, 64, Codec::H264).exists());
    }

    #[test]
    fn vp8_output_is_ivf() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut dumper = BufferDumper::new(
                &settings(dir.path()),
                320,
                240,
                Codec::Vp8,
                FrameRate::new(30, 1),
            )
            .unwrap();
            dumper.dump_output(&[0xaa; 10], 33_000);
            dumper.dump_output(&[0xbb; 4], 66_000);
        }
        let data = fs::read(dump_path(dir.path(), DumpKind::Output, 320, 240, Codec::Vp8)).unwrap();
        assert_eq!(&data[0..4], b"DKIF");
        assert_eq!(u16::from_le_bytes([data[12], data[13]]), 320);
        assert_eq!(u32::from_le_bytes([data[24], data[25], data[26], data[27]]), 2);
        assert_eq!(data.len(), IVF_FILE_HEADER_SIZE + 12 + 10 + 12 + 4);
        assert_eq!(u32::from_le_bytes([data[32], data[33], data[34], data[35]]), 10);
    }

    #[test]
    fn read_buffer_at_unaligned_offset() {
        let shm = SharedMemory::new("dump", 8192).unwrap();
        let mapping = MemoryMappingBuilder::new(8192)
            .from_descriptor(&shm)
            .build()
            .unwrap();
        mapping.write_slice(&[1, 2, 3, 4], 4100).unwrap();
        assert_eq!(
            read_buffer(shm.as_raw_descriptor(), 4100, 4).unwrap(),
            vec![1, 2, 3, 4]
        );
    }

    #[test]
    fn sink_dumps_and_forwards_output() {
        let dir = tempfile::tempdir().unwrap();
        let shm = SharedMemory::new("output", 4096).unwrap();
        let mapping = MemoryMappingBuilder::new(4096)
            .from_descriptor(&shm)
            .build()
            .unwrap();
        mapping.write_slice(&[0x00, 0x00, 0x01, 0x67], 16).unwrap();

        let dumper =
            BufferDumper::new(&settings(dir.path()), 64, 64, Codec::H264, FrameRate::default());
        let slot = Arc::new(Mutex::new(dumper));
        let (channel, stream) = CompletionStream::new();
        let mut sink = DumpingSink {
            inner: Box::new(channel),
            dumper: slot.clone(),
        };
        let done = Completion::Output(OutputDone {
            client_id: 1,
            index: 0,
            fd: shm.as_raw_descriptor(),
            offset: 16,
            bytes_used: 4,
            timestamp_us: 0,
            flags: EntryFlags::KEY_FRAME,
            extradata: None,
            flushed: false,
        });
        sink.deliver(done.clone());
        assert_eq!(stream.try_next(), Some(done));

        // Dropping the dumper flushes the file.
        slot.lock().take();
        let output = dump_path(dir.path(), DumpKind::Output, 64, 64, Codec::H264);
        assert_eq!(fs::read(output).unwrap(), vec![0x00, 0x00, 0x01, 0x67]);
    }
}
