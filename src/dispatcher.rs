// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Asynchronous delivery of buffer completions and driver events.
//!
//! The dispatcher runs on its own thread and is the only place the control plane blocks. It waits
//! on the device descriptor and a kill event, dequeues whatever the driver has finished, turns it
//! into [`Completion`] records and hands them to a [`CompletionSink`]. Completions of one port are
//! delivered in the order the driver returned them.

use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::mpsc::Sender;
use std::sync::mpsc::TryRecvError;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use base::debug;
use base::error;
use base::warn;
use base::AsRawDescriptor;
use base::Descriptor;
use base::Event;
use base::EventToken;
use base::RawDescriptor;
use base::WaitContext;
use base::WorkerThread;
use sync::Mutex;

use crate::device::DequeuedBuffer;
use crate::device::DeviceError;
use crate::device::DeviceEvent;
use crate::device::Port;
use crate::device::VencDevice;
use crate::queue::EntryFlags;
use crate::state::InFlight;
use crate::state::SessionShared;

/// An input buffer the driver no longer needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputDone {
    /// The client id of the entry, or the logical id for a batch.
    pub client_id: u64,
    pub index: u32,
    pub fd: RawDescriptor,
    pub timestamp_us: i64,
    pub flags: EntryFlags,
    /// Returned by `stop` or `flush` rather than consumed by the encoder.
    pub flushed: bool,
}

/// An output buffer holding encoded data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputDone {
    pub client_id: u64,
    pub index: u32,
    pub fd: RawDescriptor,
    pub offset: u32,
    pub bytes_used: u32,
    pub timestamp_us: i64,
    pub flags: EntryFlags,
    /// Contents of the buffer's extradata slot.
    pub extradata: Option<Vec<u8>>,
    pub flushed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    Input(InputDone),
    Output(OutputDone),
    Event(DeviceEvent),
    /// Completions could no longer be dequeued from `port`. Its buffers stay with the driver
    /// until the port is stopped or flushed, and submissions to it are refused until then.
    QueueFailed { port: Port, error: DeviceError },
}

impl Completion {
    /// Builds the completion of a buffer that was taken back from the driver unprocessed.
    pub(crate) fn flushed(record: InFlight) -> Completion {
        match record.port {
            Port::Input => Completion::Input(InputDone {
                client_id: record.client_id,
                index: record.index,
                fd: record.fd,
                timestamp_us: record.timestamp_us,
                flags: record.flags - EntryFlags::DEFERRED,
                flushed: true,
            }),
            Port::Output => Completion::Output(OutputDone {
                client_id: record.client_id,
                index: record.index,
                fd: record.fd,
                offset: record.offset,
                bytes_used: 0,
                timestamp_us: record.timestamp_us,
                flags: record.flags,
                extradata: None,
                flushed: true,
            }),
        }
    }
}

/// Receives completion records, one at a time, on the dispatcher thread or during `stop` and
/// `flush` on the control thread.
pub trait CompletionSink: Send {
    fn deliver(&mut self, completion: Completion);
}

/// Per-kind completion callbacks.
pub trait CompletionCallbacks: Send {
    fn on_input_done(&mut self, done: InputDone);

    fn on_output_done(&mut self, done: OutputDone);

    fn on_event(&mut self, event: DeviceEvent) {
        debug!("unhandled encoder event {:?}", event);
    }

    fn on_queue_failed(&mut self, port: Port, error: DeviceError) {
        error!("unhandled failure of the {} port: {}", port, error);
    }
}

/// Adapts [`CompletionCallbacks`] to a [`CompletionSink`].
pub struct CallbackSink<C: CompletionCallbacks>(pub C);

impl<C: CompletionCallbacks> CompletionSink for CallbackSink<C> {
    fn deliver(&mut self, completion: Completion) {
        match completion {
            Completion::Input(done) => self.0.on_input_done(done),
            Completion::Output(done) => self.0.on_output_done(done),
            Completion::Event(event) => self.0.on_event(event),
            Completion::QueueFailed { port, error } => self.0.on_queue_failed(port, error),
        }
    }
}

/// Drops completions. Used until the client installs a sink.
pub(crate) struct DiscardSink;

impl CompletionSink for DiscardSink {
    fn deliver(&mut self, completion: Completion) {
        debug!("no sink installed, dropping {:?}", completion);
    }
}

/// Forwards completions into a channel read by a [`CompletionStream`].
pub struct ChannelSink {
    sender: Sender<Completion>,
}

impl CompletionSink for ChannelSink {
    fn deliver(&mut self, completion: Completion) {
        if self.sender.send(completion).is_err() {
            debug!("completion stream closed, dropping completion");
        }
    }
}

/// Blocking stream of completions. Iteration ends once the session replaced or dropped the
/// sink feeding it.
pub struct CompletionStream {
    receiver: Receiver<Completion>,
}

impl CompletionStream {
    pub fn new() -> (ChannelSink, CompletionStream) {
        let (sender, receiver) = mpsc::channel();
        (ChannelSink { sender }, CompletionStream { receiver })
    }

    /// Returns the next completion if one is already waiting.
    pub fn try_next(&self) -> Option<Completion> {
        match self.receiver.try_recv() {
            Ok(completion) => Some(completion),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Waits up to `timeout` for the next completion.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Completion> {
        match self.receiver.recv_timeout(timeout) {
            Ok(completion) => Some(completion),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl Iterator for CompletionStream {
    type Item = Completion;

    fn next(&mut self) -> Option<Completion> {
        self.receiver.recv().ok()
    }
}

pub(crate) type SharedSink = Arc<Mutex<Box<dyn CompletionSink>>>;

/// Output throughput over a sliding window.
#[derive(Debug)]
pub struct ThroughputStats {
    window: Duration,
    window_start: Instant,
    bytes: u64,
    frames: u64,
    /// Bits per second measured over the last complete window.
    last_bitrate: Option<u64>,
}

impl ThroughputStats {
    pub fn new(window: Duration) -> ThroughputStats {
        ThroughputStats {
            window,
            window_start: Instant::now(),
            bytes: 0,
            frames: 0,
            last_bitrate: None,
        }
    }

    /// Accounts one output buffer. Returns the bitrate when a window just closed.
    pub fn record(&mut self, bytes: u32, now: Instant) -> Option<u64> {
        self.bytes += bytes as u64;
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }
        let bitrate = (self.bytes * 8 * 1_000_000) / (elapsed.as_micros().max(1) as u64);
        debug!(
            "output: {} frames, {} bytes in {:?}, {} bps",
            self.frames, self.bytes, elapsed, bitrate
        );
        self.last_bitrate = Some(bitrate);
        self.bytes = 0;
        self.frames = 0;
        self.window_start = now;
        Some(bitrate)
    }

    pub fn last_bitrate(&self) -> Option<u64> {
        self.last_bitrate
    }

    /// Starts a fresh window, forgetting everything recorded so far.
    pub fn reset(&mut self, now: Instant) {
        self.window_start = now;
        self.bytes = 0;
        self.frames = 0;
        self.last_bitrate = None;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Token {
    Device,
    Kill,
}

impl EventToken for Token {
    fn as_raw_token(&self) -> u64 {
        match self {
            Token::Device => 0,
            Token::Kill => 1,
        }
    }

    fn from_raw_token(data: u64) -> Self {
        match data {
            0 => Token::Device,
            _ => Token::Kill,
        }
    }
}

struct Worker {
    device: Arc<dyn VencDevice>,
    shared: Arc<SessionShared>,
    sink: SharedSink,
    poll_timeout: Duration,
    stats: ThroughputStats,
}

impl Worker {
    fn run(&mut self, kill: Event) -> base::Result<()> {
        let wait_ctx: WaitContext<Token> = WaitContext::new()?;
        wait_ctx.add(&kill, Token::Kill)?;
        let device = Descriptor(self.device.as_raw_descriptor());
        wait_ctx.add_for_event(&device, self.device.readiness(), Token::Device)?;
        let mut device_attached = true;

        loop {
            if !self.wait_while_paused(&wait_ctx)? {
                return Ok(());
            }

            let events = wait_ctx.wait_timeout(self.poll_timeout)?;
            if events.is_empty() {
                let outstanding = self.shared.poll.lock().outstanding();
                if outstanding > 0 {
                    warn!(
                        "no completion within {:?}, {} buffers outstanding",
                        self.poll_timeout, outstanding
                    );
                }
                continue;
            }

            let mut device_ready = false;
            for event in events.iter() {
                match event.token {
                    Token::Kill => return Ok(()),
                    Token::Device => {
                        if event.is_hungup && device_attached {
                            error!("encoder device hung up");
                            wait_ctx.delete(&device)?;
                            device_attached = false;
                        }
                        device_ready |=
                            event.is_readable || event.is_writable || event.is_priority;
                    }
                }
            }
            // A pause requested during the wait takes effect before anything is dequeued.
            if device_ready && !self.shared.poll.lock().paused {
                self.drain();
            }
        }
    }

    /// Blocks while the session is paused. Returns false when the dispatcher must exit.
    fn wait_while_paused(&mut self, wait_ctx: &WaitContext<Token>) -> base::Result<bool> {
        let mut poll = self.shared.poll.lock();
        if poll.cancelled {
            return Ok(false);
        }
        if !poll.paused {
            return Ok(true);
        }
        debug!("completion dispatcher paused");
        while poll.paused && !poll.cancelled {
            let (guard, timeout) = self.shared.pause_cv.wait_timeout_while(
                poll,
                self.poll_timeout,
                |p| p.paused && !p.cancelled,
            );
            poll = guard;
            if timeout.timed_out() {
                // The kill event is the authoritative cancellation signal; check it without
                // blocking so a paused dispatcher still exits within one timeout.
                drop(poll);
                let events = wait_ctx.wait_timeout(Duration::ZERO)?;
                if events.iter().any(|e| e.token == Token::Kill) {
                    return Ok(false);
                }
                poll = self.shared.poll.lock();
            }
        }
        if poll.cancelled {
            return Ok(false);
        }
        drop(poll);
        self.stats.reset(Instant::now());
        debug!("completion dispatcher resumed");
        Ok(true)
    }

    /// Dequeues everything the driver has finished and delivers it.
    fn drain(&mut self) {
        let mut completions = Vec::new();
        for port in Port::ALL {
            if self.shared.poll.lock().failed[port.index()] {
                continue;
            }
            loop {
                match self.device.dequeue_buffer(port) {
                    Ok(Some(buffer)) => {
                        if let Some(completion) = self.translate(buffer) {
                            completions.push(completion);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("failed to dequeue from the {} port: {}", port, e);
                        self.shared.poll.lock().failed[port.index()] = true;
                        completions.push(Completion::QueueFailed { port, error: e });
                        break;
                    }
                }
            }
        }
        loop {
            match self.device.dequeue_event() {
                Ok(Some(event)) => {
                    match event {
                        DeviceEvent::HardwareOverload | DeviceEvent::SystemError => {
                            error!("encoder reported {:?}", event)
                        }
                        DeviceEvent::InsufficientResources => {
                            warn!("encoder reported insufficient resources")
                        }
                        _ => debug!("encoder event {:?}", event),
                    }
                    completions.push(Completion::Event(event));
                }
                Ok(None) => break,
                Err(e) => {
                    error!("failed to dequeue an event: {}", e);
                    break;
                }
            }
        }
        if completions.is_empty() {
            return;
        }

        let now = Instant::now();
        for completion in &completions {
            if let Completion::Output(done) = completion {
                self.stats.record(done.bytes_used, now);
            }
        }
        let mut sink = self.sink.lock();
        for completion in completions {
            sink.deliver(completion);
        }
    }

    /// Turns a dequeued buffer into a completion. Returns `None` for buffers nobody is waiting
    /// for, including batch members other than the last to complete.
    fn translate(&mut self, buffer: DequeuedBuffer) -> Option<Completion> {
        let record = self.shared.poll.lock().in_flight[buffer.port.index()].remove(&buffer.index);
        let record = match record {
            Some(record) => record,
            None => {
                warn!(
                    "driver returned unknown {} buffer {}",
                    buffer.port, buffer.index
                );
                return None;
            }
        };
        let completion = self.complete(&buffer, &record);
        // The extradata was copied out above, so the slot can go to the next descriptor.
        self.shared.release_extradata_slot(&record);
        completion
    }

    fn complete(&self, buffer: &DequeuedBuffer, record: &InFlight) -> Option<Completion> {
        let mut client_id = record.client_id;
        if let Some(slot) = record.batch_slot {
            match self.shared.batch.lock().retrieve(slot) {
                Ok(retrieved) if !retrieved.complete => return None,
                Ok(retrieved) => client_id = retrieved.logical_id,
                Err(e) => {
                    warn!("batch bookkeeping lost for {} buffer: {}", buffer.port, e);
                    return None;
                }
            }
        }

        let flags = EntryFlags::from_v4l2(buffer.flags);
        Some(match buffer.port {
            Port::Input => Completion::Input(InputDone {
                client_id,
                index: record.index,
                fd: record.fd,
                timestamp_us: record.timestamp_us,
                flags: flags - EntryFlags::DEFERRED,
                flushed: false,
            }),
            Port::Output => {
                let extradata = record.extradata.as_ref().and_then(|extradata| {
                    match extradata.region.read_slot(extradata.slot) {
                        Ok(data) => Some(data),
                        Err(e) => {
                            warn!("failed to read extradata of buffer {}: {}", record.index, e);
                            None
                        }
                    }
                });
                Completion::Output(OutputDone {
                    client_id,
                    index: record.index,
                    fd: record.fd,
                    offset: buffer.data_offset,
                    bytes_used: buffer.bytes_used,
                    timestamp_us: buffer.timestamp_us,
                    flags,
                    extradata,
                    flushed: false,
                })
            }
        })
    }
}

/// Handle to the dispatcher thread. Dropping it cancels and joins the thread.
pub struct CompletionDispatcher {
    shared: Arc<SessionShared>,
    worker: Option<WorkerThread<()>>,
}

impl CompletionDispatcher {
    pub(crate) fn start(
        device: Arc<dyn VencDevice>,
        shared: Arc<SessionShared>,
        sink: SharedSink,
        poll_timeout: Duration,
    ) -> base::Result<CompletionDispatcher> {
        shared.poll.lock().cancelled = false;
        let mut worker = Worker {
            device,
            shared: shared.clone(),
            sink,
            poll_timeout,
            stats: ThroughputStats::new(Duration::from_secs(1)),
        };
        let worker = WorkerThread::start("venc_completion", move |kill| {
            if let Err(e) = worker.run(kill) {
                error!("completion dispatcher failed: {}", e);
            }
        })?;
        Ok(CompletionDispatcher {
            shared,
            worker: Some(worker),
        })
    }

    /// Cancels the thread and waits for it to exit. No completion is delivered afterwards.
    pub fn stop(&mut self) {
        let worker = match self.worker.take() {
            Some(worker) => worker,
            None => return,
        };
        self.shared.poll.lock().cancelled = true;
        self.shared.pause_cv.notify_all();
        worker.stop();
        debug!("completion dispatcher stopped");
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for CompletionDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::config::EncoderConfig;
    use crate::device::fake::FakeDevice;
    use crate::format::Codec;

    fn shared() -> Arc<SessionShared> {
        Arc::new(SessionShared::new(Arc::new(Mutex::new(EncoderConfig::new(
            Codec::H264,
        )))))
    }

    #[test]
    fn throughput_window() {
        let start = Instant::now();
        let mut stats = ThroughputStats::new(Duration::from_secs(1));
        stats.reset(start);
        assert_eq!(stats.record(1000, start + Duration::from_millis(500)), None);
        assert_eq!(
            stats.record(1500, start + Duration::from_secs(1)),
            Some(20_000)
        );
        assert_eq!(stats.last_bitrate(), Some(20_000));
        stats.reset(start);
        assert_eq!(stats.last_bitrate(), None);
    }

    #[test]
    fn callbacks_receive_records() {
        #[derive(Default)]
        struct Counter {
            inputs: Vec<u64>,
            outputs: Vec<u64>,
        }
        impl CompletionCallbacks for Counter {
            fn on_input_done(&mut self, done: InputDone) {
                self.inputs.push(done.client_id);
            }
            fn on_output_done(&mut self, done: OutputDone) {
                self.outputs.push(done.client_id);
            }
        }

        let mut sink = CallbackSink(Counter::default());
        let input = Completion::Input(InputDone {
            client_id: 3,
            index: 0,
            fd: -1,
            timestamp_us: 0,
            flags: EntryFlags::empty(),
            flushed: false,
        });
        sink.deliver(input);
        sink.deliver(Completion::Event(DeviceEvent::FlushDone));
        assert_eq!(sink.0.inputs, vec![3]);
        assert!(sink.0.outputs.is_empty());
    }

    #[test]
    fn stream_ends_when_sink_dropped() {
        let (mut sink, stream) = CompletionStream::new();
        sink.deliver(Completion::Event(DeviceEvent::EndOfStream));
        drop(sink);
        let all: Vec<_> = stream.collect();
        assert_eq!(all, vec![Completion::Event(DeviceEvent::EndOfStream)]);
    }

    #[test]
    fn delivers_events() {
        let device = Arc::new(FakeDevice::new().unwrap());
        let (sink, stream) = CompletionStream::new();
        let sink: SharedSink = Arc::new(Mutex::new(Box::new(sink)));
        let mut dispatcher = CompletionDispatcher::start(
            device.clone(),
            shared(),
            sink,
            Duration::from_millis(50),
        )
        .unwrap();
        device.push_event(DeviceEvent::FlushDone);
        assert_eq!(
            stream.recv_timeout(Duration::from_secs(5)),
            Some(Completion::Event(DeviceEvent::FlushDone))
        );
        dispatcher.stop();
        assert!(!dispatcher.is_running());
    }

    #[test]
    fn dequeue_failure_reported_once() {
        let device = Arc::new(FakeDevice::new().unwrap());
        let shared = shared();
        let (sink, stream) = CompletionStream::new();
        let sink: SharedSink = Arc::new(Mutex::new(Box::new(sink)));
        let mut dispatcher = CompletionDispatcher::start(
            device.clone(),
            shared.clone(),
            sink,
            Duration::from_millis(50),
        )
        .unwrap();
        device.fail_next("VIDIOC_DQBUF", libc::EIO);
        device.push_event(DeviceEvent::FlushDone);

        match stream.recv_timeout(Duration::from_secs(5)) {
            Some(Completion::QueueFailed { port, error }) => {
                assert_eq!(port, Port::Input);
                assert_eq!(error.errno.errno(), libc::EIO);
            }
            other => panic!("expected a queue failure, got {:?}", other),
        }
        assert_eq!(
            stream.recv_timeout(Duration::from_secs(5)),
            Some(Completion::Event(DeviceEvent::FlushDone))
        );
        dispatcher.stop();
        assert!(shared.poll.lock().failed[Port::Input.index()]);
        assert!(!shared.poll.lock().failed[Port::Output.index()]);
        assert_eq!(stream.try_next(), None);
    }

    #[test]
    fn queue_failure_reaches_callback() {
        #[derive(Default)]
        struct Failures(Vec<Port>);
        impl CompletionCallbacks for Failures {
            fn on_input_done(&mut self, _done: InputDone) {}
            fn on_output_done(&mut self, _done: OutputDone) {}
            fn on_queue_failed(&mut self, port: Port, _error: DeviceError) {
                self.0.push(port);
            }
        }

        let mut sink = CallbackSink(Failures::default());
        sink.deliver(Completion::QueueFailed {
            port: Port::Output,
            error: DeviceError::new("VIDIOC_DQBUF", base::Error::new(libc::EIO)),
        });
        assert_eq!(sink.0 .0, vec![Port::Output]);
    }

    #[test]
    fn cancel_while_paused_exits() {
        let device = Arc::new(FakeDevice::new().unwrap());
        let shared = shared();
        let sink: SharedSink = Arc::new(Mutex::new(Box::new(DiscardSink)));
        let mut dispatcher = CompletionDispatcher::start(
            device,
            shared.clone(),
            sink,
            Duration::from_millis(50),
        )
        .unwrap();
        shared.poll.lock().paused = true;
        thread::sleep(Duration::from_millis(100));

        let start = Instant::now();
        dispatcher.stop();
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
