// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The encoder session: configuration, buffer queues and completion delivery behind one handle.

use std::sync::Arc;
use std::time::Duration;

use base::debug;
use base::error;
use base::info;
use base::warn;
use sync::Mutex;

use crate::config::Capabilities;
use crate::config::ConfigurationController;
use crate::config::EncoderConfig;
use crate::config::EncoderSettings;
use crate::device::EncoderCommand;
use crate::device::Port;
use crate::device::VencDevice;
use crate::dispatcher::CallbackSink;
use crate::dispatcher::Completion;
use crate::dispatcher::CompletionCallbacks;
use crate::dispatcher::CompletionDispatcher;
use crate::dispatcher::CompletionSink;
use crate::dispatcher::CompletionStream;
use crate::dispatcher::DiscardSink;
use crate::dispatcher::SharedSink;
use crate::dump::read_buffer;
use crate::dump::BufferDumper;
use crate::dump::DumpingSink;
use crate::error::Error;
use crate::error::Result;
use crate::extradata::DmaBufAllocator;
use crate::extradata::ExtradataAllocator;
use crate::format::Codec;
use crate::queue::BufferQueueManager;
use crate::queue::BufferRequirements;
use crate::queue::PortState;
use crate::queue::QueueEntry;
use crate::state::InFlight;
use crate::state::SessionShared;

/// How long the dispatcher waits for the device before reporting a stall.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub codec: Codec,
    pub poll_timeout: Duration,
    /// Device limits. Defaults to the codec's usual limits.
    pub capabilities: Option<Capabilities>,
}

impl SessionOptions {
    pub fn new(codec: Codec) -> SessionOptions {
        SessionOptions {
            codec,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            capabilities: None,
        }
    }
}

/// One encoding session on a device.
///
/// Completions are delivered to the sink installed with [`VencSession::set_callbacks`],
/// [`VencSession::set_sink`] or [`VencSession::completion_stream`]. Until one is installed they
/// are dropped.
pub struct VencSession<D: VencDevice + 'static> {
    device: Arc<D>,
    shared: Arc<SessionShared>,
    controller: ConfigurationController,
    queues: BufferQueueManager,
    sink: SharedSink,
    dumper: Arc<Mutex<Option<BufferDumper>>>,
    dispatcher: Option<CompletionDispatcher>,
    poll_timeout: Duration,
    running: bool,
}

impl<D: VencDevice + 'static> VencSession<D> {
    pub fn new(
        device: D,
        allocator: Arc<dyn DmaBufAllocator>,
        options: SessionOptions,
    ) -> VencSession<D> {
        let device = Arc::new(device);
        let dyn_device: Arc<dyn VencDevice> = device.clone();
        let caps = options
            .capabilities
            .unwrap_or_else(|| Capabilities::for_codec(options.codec));
        let controller =
            ConfigurationController::with_capabilities(dyn_device.clone(), options.codec, caps);
        let shared = Arc::new(SessionShared::new(controller.shared()));
        let queues = BufferQueueManager::new(
            dyn_device,
            shared.clone(),
            ExtradataAllocator::new(allocator),
        );
        let dumper = Arc::new(Mutex::new(None));
        let sink: SharedSink = Arc::new(Mutex::new(Box::new(DumpingSink {
            inner: Box::new(DiscardSink),
            dumper: dumper.clone(),
        })));
        VencSession {
            device,
            shared,
            controller,
            queues,
            sink,
            dumper,
            dispatcher: None,
            poll_timeout: options.poll_timeout,
            running: false,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Delivers completions to `sink` from now on.
    pub fn set_sink(&mut self, sink: Box<dyn CompletionSink>) {
        *self.sink.lock() = Box::new(DumpingSink {
            inner: sink,
            dumper: self.dumper.clone(),
        });
    }

    pub fn set_callbacks<C: CompletionCallbacks + 'static>(&mut self, callbacks: C) {
        self.set_sink(Box::new(CallbackSink(callbacks)));
    }

    /// Delivers completions into a new stream. A stream installed earlier ends.
    pub fn completion_stream(&mut self) -> CompletionStream {
        let (sink, stream) = CompletionStream::new();
        self.set_sink(Box::new(sink));
        stream
    }

    /// Applies `settings` and sets up the diagnostic dumps they ask for.
    pub fn configure(&mut self, settings: &EncoderSettings) -> Result<()> {
        self.controller.apply(settings)?;
        let config = self.controller.snapshot();
        let dumper = BufferDumper::new(
            &settings.debug,
            config.width,
            config.height,
            config.codec,
            config.frame_rate,
        );
        *self.dumper.lock() = dumper;
        info!(
            "configured {} {}x{} at {} fps",
            config.codec, config.width, config.height, config.frame_rate
        );
        Ok(())
    }

    pub fn controller(&self) -> &ConfigurationController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut ConfigurationController {
        &mut self.controller
    }

    pub fn config(&self) -> EncoderConfig {
        self.controller.snapshot()
    }

    pub fn port_state(&self, port: Port) -> PortState {
        self.queues.state(port)
    }

    pub fn negotiate_format(
        &mut self,
        port: Port,
        width: u32,
        height: u32,
        fourcc: u32,
    ) -> Result<BufferRequirements> {
        self.queues.negotiate_format(port, width, height, fourcc)
    }

    pub fn set_buffer_count(&mut self, port: Port, count: u32) -> Result<u32> {
        self.queues.set_buffer_count(port, count)
    }

    fn dump_input(&self, entry: &QueueEntry) {
        let mut dumper = self.dumper.lock();
        let dumper = match dumper.as_mut() {
            Some(dumper) if dumper.dumps_input() && entry.bytes_used > 0 => dumper,
            _ => return,
        };
        match read_buffer(entry.fd, entry.offset, entry.bytes_used) {
            Ok(data) => dumper.dump_input(&data),
            Err(e) => warn!("failed to map input buffer {}: {}", entry.index, e),
        }
    }

    pub fn submit_input(&mut self, entry: &QueueEntry) -> Result<()> {
        self.queues.submit(Port::Input, entry)?;
        self.dump_input(entry);
        Ok(())
    }

    /// Submits `entries` as one logical input buffer completed once all of them are done.
    pub fn submit_input_batch(&mut self, logical_id: u64, entries: &[QueueEntry]) -> Result<()> {
        self.queues.submit_batch(logical_id, entries)?;
        for entry in entries {
            self.dump_input(entry);
        }
        Ok(())
    }

    pub fn submit_output(&mut self, entry: &QueueEntry) -> Result<()> {
        self.queues.submit(Port::Output, entry)
    }

    fn start_dispatcher(&mut self) -> Result<()> {
        if self.dispatcher.is_some() {
            return Ok(());
        }
        let device: Arc<dyn VencDevice> = self.device.clone();
        let dispatcher = CompletionDispatcher::start(
            device,
            self.shared.clone(),
            self.sink.clone(),
            self.poll_timeout,
        )
        .map_err(|e| {
            Error::ResourceExhausted(format!("cannot start the completion dispatcher: {}", e))
        })?;
        self.dispatcher = Some(dispatcher);
        Ok(())
    }

    fn stop_dispatcher(&mut self) {
        if let Some(mut dispatcher) = self.dispatcher.take() {
            dispatcher.stop();
        }
    }

    fn deliver_flushed(&self, records: Vec<InFlight>) {
        if records.is_empty() {
            return;
        }
        let mut sink = self.sink.lock();
        for record in records {
            sink.deliver(Completion::flushed(record));
        }
    }

    /// Starts streaming on both ports and the completion dispatcher.
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }
        self.queues.start(Port::Output)?;
        if let Err(e) = self.queues.start(Port::Input) {
            let (flushed, result) = self.queues.stop(Port::Output);
            self.deliver_flushed(flushed);
            if let Err(stop_err) = result {
                warn!("failed to roll back the output port: {}", stop_err);
            }
            return Err(e);
        }
        if let Err(e) = self.start_dispatcher() {
            // Failures are logged by stop_ports; the dispatcher error is the one to report.
            let _ = self.stop_ports();
            return Err(e);
        }
        self.running = true;
        info!("session started");
        Ok(())
    }

    /// Stops both ports and returns the first failure, after trying both.
    fn stop_ports(&mut self) -> Result<()> {
        let mut result = Ok(());
        for port in [Port::Input, Port::Output] {
            let (flushed, stopped) = self.queues.stop(port);
            self.deliver_flushed(flushed);
            if let Err(e) = stopped {
                error!("failed to stop the {} port: {}", port, e);
                result = result.and(Err(e));
            }
        }
        result
    }

    /// Stops streaming. Every buffer still owned by the driver is returned as a flushed
    /// completion before this returns. Stopping a stopped session does nothing.
    pub fn stop(&mut self) -> Result<()> {
        self.stop_dispatcher();
        let result = self.stop_ports();
        if self.running {
            info!("session stopped");
        }
        self.running = false;
        result
    }

    /// Holds completions back until [`VencSession::resume`].
    pub fn pause(&self) {
        self.shared.poll.lock().paused = true;
        self.shared.pause_cv.notify_all();
        debug!("session paused");
    }

    pub fn resume(&self) {
        self.shared.poll.lock().paused = false;
        self.shared.pause_cv.notify_all();
        debug!("session resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.shared.poll.lock().paused
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Returns every queued buffer as a flushed completion. Streaming ports keep streaming.
    ///
    /// A port the driver fails to flush or restart is left failed, but its buffers are still
    /// returned before the error is.
    pub fn flush(&mut self) -> Result<()> {
        self.stop_dispatcher();
        let (flushed, result) = self.queues.flush();
        self.deliver_flushed(flushed);
        if self.running {
            self.start_dispatcher()?;
        }
        result
    }

    /// Asks the encoder to finish the stream. The last output buffer carries the end of stream
    /// flag.
    pub fn end_of_stream(&self) -> Result<()> {
        if !self.running {
            return Err(Error::ProtocolViolation(
                "end of stream requested on a stopped session".to_string(),
            ));
        }
        self.device.encoder_command(EncoderCommand::Stop)?;
        Ok(())
    }
}

impl<D: VencDevice + 'static> Drop for VencSession<D> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("failed to stop the session: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use base::AsRawDescriptor;
    use base::SharedMemory;
    use videodev2_sys::*;

    use super::*;
    use crate::device::fake::Call;
    use crate::device::fake::FakeDevice;
    use crate::error::ErrorKind;
    use crate::extradata::MemfdAllocator;
    use crate::format::PixelFormat;

    fn session() -> VencSession<FakeDevice> {
        let mut options = SessionOptions::new(Codec::H264);
        options.poll_timeout = Duration::from_millis(50);
        VencSession::new(FakeDevice::new().unwrap(), Arc::new(MemfdAllocator), options)
    }

    fn prepare(session: &mut VencSession<FakeDevice>) {
        session
            .negotiate_format(Port::Input, 320, 240, PixelFormat::Nv12.fourcc())
            .unwrap();
        session
            .negotiate_format(Port::Output, 320, 240, Codec::H264.fourcc())
            .unwrap();
        session.set_buffer_count(Port::Input, 2).unwrap();
        session.set_buffer_count(Port::Output, 2).unwrap();
    }

    #[test]
    fn codec_mismatch_rejected() {
        let mut session = session();
        let settings = EncoderSettings {
            codec: Codec::Vp8,
            ..Default::default()
        };
        let err = session.configure(&settings).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    }

    #[test]
    fn overloaded_start_can_be_retried() {
        let mut session = session();
        prepare(&mut session);
        session.device().fail_next("VIDIOC_STREAMON", libc::EBUSY);
        assert_eq!(
            session.start().unwrap_err().kind(),
            ErrorKind::ResourceExhausted
        );
        assert!(!session.is_running());
        session.start().unwrap();
        assert!(session.is_running());
        assert!(session.device().is_streaming(Port::Input));
        assert!(session.device().is_streaming(Port::Output));
    }

    #[test]
    fn stop_returns_outstanding_buffers() {
        let mut session = session();
        prepare(&mut session);
        let stream = session.completion_stream();
        session.start().unwrap();
        let shm = SharedMemory::new("output", 4096).unwrap();
        session
            .submit_output(&QueueEntry::new(1, shm.as_raw_descriptor(), 4096))
            .unwrap();
        session.stop().unwrap();

        match stream.try_next() {
            Some(Completion::Output(done)) => {
                assert!(done.flushed);
                assert_eq!(done.index, 1);
            }
            other => panic!("unexpected completion {:?}", other),
        }
        assert!(!session.device().is_streaming(Port::Output));
        session.stop().unwrap();
    }

    #[test]
    fn end_of_stream_requires_running_session() {
        let mut session = session();
        prepare(&mut session);
        assert_eq!(
            session.end_of_stream().unwrap_err().kind(),
            ErrorKind::ProtocolViolation
        );
        session.start().unwrap();
        session.end_of_stream().unwrap();
        assert!(session
            .device()
            .calls()
            .contains(&Call::EncoderCommand(EncoderCommand::Stop)));
    }

    #[test]
    fn pause_holds_completions() {
        let mut session = session();
        prepare(&mut session);
        let stream = session.completion_stream();
        session.start().unwrap();
        let shm = SharedMemory::new("output", 4096).unwrap();
        session
            .submit_output(&QueueEntry::new(0, shm.as_raw_descriptor(), 4096))
            .unwrap();

        session.pause();
        assert!(session.is_paused());
        session
            .device()
            .complete_next(Port::Output, 100, V4L2_BUF_FLAG_KEYFRAME);
        assert_eq!(stream.recv_timeout(Duration::from_millis(200)), None);

        session.resume();
        match stream.recv_timeout(Duration::from_secs(5)) {
            Some(Completion::Output(done)) => {
                assert_eq!(done.bytes_used, 100);
                assert!(!done.flushed);
            }
            other => panic!("unexpected completion {:?}", other),
        }
    }
}
