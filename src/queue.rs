// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Buffer lifecycle of the two driver queues.
//!
//! [`BufferQueueManager`] negotiates formats and buffer counts, attaches extradata to queued
//! buffers, and starts and stops streaming. Buffers handed to the driver are recorded in the
//! shared poll state before they are queued so the completion dispatcher can always find them.

use std::sync::Arc;

use base::debug;
use base::error;
use base::info;
use base::warn;
use base::AsRawDescriptor;
use base::RawDescriptor;
use bitflags::bitflags;
use smallvec::smallvec;
use videodev2_sys::*;

use crate::batch::MAX_FAN_OUT;
use crate::config::coding::extradata_terminator;
use crate::device::BufferPlane;
use crate::device::DeviceBuffer;
use crate::device::DeviceEvent;
use crate::device::FormatRequest;
use crate::device::NegotiatedFormat;
use crate::device::Port;
use crate::device::VencDevice;
use crate::error::Error;
use crate::error::Result;
use crate::extradata::ExtradataAllocator;
use crate::extradata::ExtradataRegion;
use crate::fd_index::FdIndexTable;
use crate::fd_index::FD_INDEX_CAPACITY;
use crate::state::ExtradataSlot;
use crate::state::InFlight;
use crate::state::SessionShared;

/// Largest buffer count a port accepts.
pub const MAX_BUFFERS: u32 = FD_INDEX_CAPACITY as u32;

bitflags! {
    #[derive(Copy, Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    #[repr(transparent)]
    pub struct EntryFlags: u32 {
        const END_OF_STREAM = 1 << 0;
        const KEY_FRAME = 1 << 1;
        const CODEC_CONFIG = 1 << 2;
        /// Not the last buffer of its batch; the driver holds the completion back.
        const DEFERRED = 1 << 3;
        /// The driver reported the buffer contents as corrupt.
        const ERROR = 1 << 4;
    }
}

impl EntryFlags {
    pub fn to_v4l2(self) -> u32 {
        let mut flags = 0;
        if self.contains(EntryFlags::END_OF_STREAM) {
            flags |= V4L2_QCOM_BUF_FLAG_EOS;
        }
        if self.contains(EntryFlags::KEY_FRAME) {
            flags |= V4L2_BUF_FLAG_KEYFRAME;
        }
        if self.contains(EntryFlags::CODEC_CONFIG) {
            flags |= V4L2_QCOM_BUF_FLAG_CODECCONFIG;
        }
        if self.contains(EntryFlags::DEFERRED) {
            flags |= V4L2_MSM_BUF_FLAG_DEFER;
        }
        flags
    }

    pub fn from_v4l2(flags: u32) -> EntryFlags {
        let mut entry = EntryFlags::empty();
        if flags & (V4L2_QCOM_BUF_FLAG_EOS | V4L2_BUF_FLAG_LAST) != 0 {
            entry |= EntryFlags::END_OF_STREAM;
        }
        if flags & V4L2_BUF_FLAG_KEYFRAME != 0 {
            entry |= EntryFlags::KEY_FRAME;
        }
        if flags & V4L2_QCOM_BUF_FLAG_CODECCONFIG != 0 {
            entry |= EntryFlags::CODEC_CONFIG;
        }
        if flags & V4L2_MSM_BUF_FLAG_DEFER != 0 {
            entry |= EntryFlags::DEFERRED;
        }
        if flags & (V4L2_BUF_FLAG_ERROR | V4L2_QCOM_BUF_DATA_CORRUPT) != 0 {
            entry |= EntryFlags::ERROR;
        }
        entry
    }
}

/// A client buffer to be queued on one port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueEntry {
    /// Driver buffer index, below the port's buffer count.
    pub index: u32,
    pub fd: RawDescriptor,
    /// Size of the memory behind `fd` available to the driver.
    pub length: u32,
    pub offset: u32,
    /// Bytes of payload. Only meaningful for input buffers.
    pub bytes_used: u32,
    pub timestamp_us: i64,
    pub flags: EntryFlags,
    /// Opaque value echoed back in the completion.
    pub client_id: u64,
    /// Metadata copied into the buffer's extradata slot before queuing.
    pub extradata: Option<Vec<u8>>,
}

impl QueueEntry {
    pub fn new(index: u32, fd: RawDescriptor, length: u32) -> QueueEntry {
        QueueEntry {
            index,
            fd,
            length,
            offset: 0,
            bytes_used: 0,
            timestamp_us: 0,
            flags: EntryFlags::empty(),
            client_id: index as u64,
            extradata: None,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum PortState {
    /// Not streaming and never stopped since the last reconfiguration.
    #[default]
    Idle,
    Streaming,
    Stopped,
    /// A driver request failed; only `stop` is accepted.
    Failed,
}

impl PortState {
    fn is_streaming(self) -> bool {
        self == PortState::Streaming
    }
}

/// What a port needs from the client after format negotiation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferRequirements {
    pub format: NegotiatedFormat,
    /// Bytes each client buffer must hold.
    pub buffer_size: u32,
    pub stride: u32,
    /// Per-buffer extradata size when the driver added an extradata plane.
    pub extradata_size: Option<u32>,
}

#[derive(Debug, Default)]
struct PortQueue {
    state: PortState,
    format: Option<NegotiatedFormat>,
    buffer_count: u32,
}

pub struct BufferQueueManager {
    device: Arc<dyn VencDevice>,
    shared: Arc<SessionShared>,
    extradata: ExtradataAllocator,
    ports: [PortQueue; 2],
    events_subscribed: bool,
}

impl BufferQueueManager {
    pub(crate) fn new(
        device: Arc<dyn VencDevice>,
        shared: Arc<SessionShared>,
        extradata: ExtradataAllocator,
    ) -> BufferQueueManager {
        BufferQueueManager {
            device,
            shared,
            extradata,
            ports: Default::default(),
            events_subscribed: false,
        }
    }

    /// State of `port`. A streaming port whose completions could not be dequeued reads as
    /// failed.
    pub fn state(&self, port: Port) -> PortState {
        let state = self.ports[port.index()].state;
        if state.is_streaming() && self.shared.poll.lock().failed[port.index()] {
            return PortState::Failed;
        }
        state
    }

    pub fn format(&self, port: Port) -> Option<&NegotiatedFormat> {
        self.ports[port.index()].format.as_ref()
    }

    pub fn buffer_count(&self, port: Port) -> u32 {
        self.ports[port.index()].buffer_count
    }

    pub fn extradata_region(&self, port: Port) -> Option<Arc<ExtradataRegion>> {
        self.extradata.region(port)
    }

    /// Whether the driver streams on either port.
    pub fn is_streaming(&self) -> bool {
        self.ports.iter().any(|queue| queue.state.is_streaming())
    }

    fn check_not_streaming(&self, port: Port, what: &str) -> Result<()> {
        if self.ports[port.index()].state.is_streaming() {
            return Err(Error::ProtocolViolation(format!(
                "cannot {} while the {} port is streaming",
                what, port
            )));
        }
        Ok(())
    }

    /// Sets the format of `port`. `fourcc` is a pixel format on the input port and a codec on
    /// the output port. An extradata plane is requested when the session enables extradata.
    pub fn negotiate_format(
        &mut self,
        port: Port,
        width: u32,
        height: u32,
        fourcc: u32,
    ) -> Result<BufferRequirements> {
        self.check_not_streaming(port, "change the format")?;
        let extradata = self.shared.config.lock().extradata;
        let request = FormatRequest {
            width,
            height,
            fourcc,
            extradata,
        };
        let format = self.device.set_format(port, &request)?;
        if format.planes.is_empty() {
            return Err(Error::ProtocolViolation(format!(
                "driver returned no planes for the {} port",
                port
            )));
        }
        info!(
            "{} port format {}x{} fourcc {:#010x}, {} planes",
            port,
            format.width,
            format.height,
            format.fourcc,
            format.planes.len()
        );
        let data = format.data_plane();
        let requirements = BufferRequirements {
            buffer_size: data.size,
            stride: data.stride,
            extradata_size: format.extradata_plane().map(|plane| plane.size),
            format: format.clone(),
        };
        let queue = &mut self.ports[port.index()];
        queue.format = Some(format);
        queue.state = PortState::Idle;
        Ok(requirements)
    }

    /// Asks the driver for `count` buffers on `port` and allocates their extradata. Returns the
    /// count the driver granted, which may be larger.
    pub fn set_buffer_count(&mut self, port: Port, count: u32) -> Result<u32> {
        self.check_not_streaming(port, "change the buffer count")?;
        if count == 0 || count > MAX_BUFFERS {
            return Err(Error::ProtocolViolation(format!(
                "buffer count {} is outside 1..={}",
                count, MAX_BUFFERS
            )));
        }
        if self.ports[port.index()].format.is_none() {
            return Err(Error::ProtocolViolation(format!(
                "the {} port has no format",
                port
            )));
        }
        if !self.shared.poll.lock().in_flight[port.index()].is_empty() {
            return Err(Error::ProtocolViolation(format!(
                "the {} port still has queued buffers",
                port
            )));
        }

        let granted = self.device.request_buffers(port, count)?;
        if granted > MAX_BUFFERS {
            return Err(Error::ResourceExhausted(format!(
                "driver wants {} buffers on the {} port",
                granted, port
            )));
        }
        let queue = &mut self.ports[port.index()];
        queue.buffer_count = granted;
        queue.state = PortState::Idle;
        self.shared.fd_index[port.index()].lock().clear();
        self.allocate_extradata(port)?;
        debug!("{} port has {} buffers", port, granted);
        Ok(granted)
    }

    fn allocate_extradata(&mut self, port: Port) -> Result<()> {
        let queue = &self.ports[port.index()];
        let plane = queue.format.as_ref().and_then(|f| f.extradata_plane());
        match plane {
            Some(plane) if queue.buffer_count > 0 => {
                self.extradata
                    .allocate(port, queue.buffer_count, plane.size as usize)?;
            }
            _ => self.extradata.free(port),
        }
        Ok(())
    }

    fn check_submittable(&self, port: Port, entry: &QueueEntry) -> Result<()> {
        match self.state(port) {
            PortState::Stopped => {
                return Err(Error::ProtocolViolation(format!(
                    "the {} port is stopped",
                    port
                )))
            }
            PortState::Failed => {
                return Err(Error::ProtocolViolation(format!(
                    "the {} port failed and must be stopped",
                    port
                )))
            }
            PortState::Idle | PortState::Streaming => {}
        }
        let count = self.buffer_count(port);
        if entry.index >= count {
            return Err(Error::ProtocolViolation(format!(
                "buffer index {} is outside the {} buffers of the {} port",
                entry.index, count, port
            )));
        }
        Ok(())
    }

    /// Binds the extradata slot of `entry`, filling it with the entry's metadata.
    fn attach_extradata(
        &self,
        port: Port,
        entry: &QueueEntry,
        fd_index: &mut FdIndexTable,
    ) -> Result<Option<ExtradataSlot>> {
        let region = match self.extradata.region(port) {
            Some(region) => region,
            None => return Ok(None),
        };
        let slot = fd_index.index_of_below(entry.fd, region.count())?;
        match &entry.extradata {
            Some(data) => {
                region.write_slot(slot, data)?;
            }
            None if port == Port::Input => {
                // Input slots are rewritten on every submission so a stale ROI map from an
                // earlier frame never reaches the driver again.
                let roi = self.shared.config.lock().take_roi(entry.timestamp_us);
                let data = match roi.map(|roi| roi.to_extradata()) {
                    Some(data) if data.len() <= region.buffer_size() => data,
                    Some(data) => {
                        warn!(
                            "ROI map of {} bytes does not fit {} bytes of extradata, dropped",
                            data.len(),
                            region.buffer_size()
                        );
                        extradata_terminator()
                    }
                    None => extradata_terminator(),
                };
                region.write_slot(slot, &data)?;
            }
            None => (),
        }
        Ok(Some(ExtradataSlot { region, slot }))
    }

    fn device_buffer(&self, port: Port, record: &InFlight) -> Result<DeviceBuffer> {
        let mut planes = smallvec![BufferPlane {
            fd: record.fd,
            length: record.length,
            offset: record.offset,
            bytes_used: record.bytes_used,
        }];
        if let Some(extradata) = &record.extradata {
            let size = extradata.region.buffer_size() as u32;
            planes.push(BufferPlane {
                fd: extradata.region.buffer().as_raw_descriptor(),
                length: size,
                offset: extradata.region.offset_of(extradata.slot)? as u32,
                bytes_used: size,
            });
        }
        Ok(DeviceBuffer {
            port,
            index: record.index,
            flags: record.flags.to_v4l2(),
            timestamp_us: record.timestamp_us,
            planes,
        })
    }

    /// Records `entry` as driver-owned and queues it. On failure the record is dropped again
    /// and the port is marked failed.
    fn queue(
        &mut self,
        port: Port,
        entry: &QueueEntry,
        flags: EntryFlags,
        client_id: u64,
        batch_slot: Option<u32>,
    ) -> Result<()> {
        // Held until the record is visible in the poll state so a completing buffer with the
        // same descriptor cannot unbind the slot in between.
        let mut fd_index = self.shared.fd_index[port.index()].lock();
        if self.shared.poll.lock().in_flight[port.index()].contains_key(&entry.index) {
            return Err(Error::ProtocolViolation(format!(
                "buffer {} is already queued on the {} port",
                entry.index, port
            )));
        }
        let extradata = self.attach_extradata(port, entry, &mut fd_index)?;
        let record = InFlight {
            port,
            index: entry.index,
            client_id,
            fd: entry.fd,
            length: entry.length,
            offset: entry.offset,
            bytes_used: match port {
                Port::Input => entry.bytes_used,
                Port::Output => 0,
            },
            timestamp_us: entry.timestamp_us,
            flags,
            extradata,
            batch_slot,
        };
        let buffer = match self.device_buffer(port, &record) {
            Ok(buffer) => buffer,
            Err(e) => {
                drop(fd_index);
                self.shared.release_extradata_slot(&record);
                return Err(e);
            }
        };
        self.shared.poll.lock().in_flight[port.index()].insert(entry.index, record);
        drop(fd_index);

        if let Err(e) = self.device.queue_buffer(&buffer) {
            error!("failed to queue {} buffer {}: {}", port, entry.index, e);
            let record = self.shared.poll.lock().in_flight[port.index()].remove(&entry.index);
            if let Some(record) = record {
                self.shared.release_extradata_slot(&record);
            }
            self.ports[port.index()].state = PortState::Failed;
            return Err(e.into());
        }
        Ok(())
    }

    /// Queues a single buffer on `port`.
    pub fn submit(&mut self, port: Port, entry: &QueueEntry) -> Result<()> {
        self.check_submittable(port, entry)?;
        if port == Port::Input {
            let batch_size = self.shared.config.lock().batch_size;
            if batch_size > 1 {
                return Err(Error::ProtocolViolation(format!(
                    "batch size is {}, input must be submitted in batches",
                    batch_size
                )));
            }
        }
        let flags = entry.flags - EntryFlags::DEFERRED;
        self.queue(port, entry, flags, entry.client_id, None)
    }

    /// Queues `entries` as the frames of one logical input buffer. Only the last entry
    /// produces a completion; the others are marked deferred.
    pub fn submit_batch(&mut self, logical_id: u64, entries: &[QueueEntry]) -> Result<()> {
        let port = Port::Input;
        let batch_size = self.shared.config.lock().batch_size as usize;
        if entries.is_empty() || entries.len() > batch_size.min(MAX_FAN_OUT) {
            return Err(Error::ProtocolViolation(format!(
                "batch of {} buffers does not fit batch size {}",
                entries.len(),
                batch_size
            )));
        }
        for (i, entry) in entries.iter().enumerate() {
            self.check_submittable(port, entry)?;
            if entries[..i].iter().any(|e| e.index == entry.index) {
                return Err(Error::ProtocolViolation(format!(
                    "buffer {} appears twice in batch {}",
                    entry.index, logical_id
                )));
            }
        }

        // Every slot is registered and sealed before the first buffer reaches the driver.
        let slots = self
            .shared
            .batch
            .lock()
            .register_group(logical_id, entries.len())?;
        let last = entries.len() - 1;
        for (i, (entry, slot)) in entries.iter().zip(slots.iter()).enumerate() {
            let mut flags = entry.flags - EntryFlags::DEFERRED;
            if i != last {
                flags |= EntryFlags::DEFERRED;
            }
            if let Err(e) = self.queue(port, entry, flags, logical_id, Some(*slot)) {
                // Slots of buffers that never reached the driver will not complete.
                let mut batch = self.shared.batch.lock();
                for unqueued in &slots[i..] {
                    if let Err(e) = batch.retrieve(*unqueued) {
                        warn!("batch {} slot {} already gone: {}", logical_id, unqueued, e);
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn subscribe_events(&mut self) -> Result<()> {
        if self.events_subscribed {
            return Ok(());
        }
        for (i, event) in DeviceEvent::SUBSCRIBED.iter().enumerate() {
            if let Err(e) = self.device.subscribe_event(*event) {
                for subscribed in &DeviceEvent::SUBSCRIBED[..i] {
                    let _ = self.device.unsubscribe_event(*subscribed);
                }
                return Err(e.into());
            }
        }
        self.events_subscribed = true;
        Ok(())
    }

    fn unsubscribe_events(&mut self) {
        if !self.events_subscribed {
            return;
        }
        for event in DeviceEvent::SUBSCRIBED {
            if let Err(e) = self.device.unsubscribe_event(event) {
                warn!("failed to unsubscribe event {:#x}: {}", event, e);
            }
        }
        self.events_subscribed = false;
    }

    /// Starts streaming on `port`. A driver without capacity left for the session is reported
    /// as `ResourceExhausted` and leaves the port as it was.
    pub fn start(&mut self, port: Port) -> Result<()> {
        match self.state(port) {
            PortState::Streaming => return Ok(()),
            PortState::Failed => {
                return Err(Error::ProtocolViolation(format!(
                    "the {} port failed and must be stopped",
                    port
                )))
            }
            PortState::Idle | PortState::Stopped => {}
        }
        let queue = &self.ports[port.index()];
        if queue.format.is_none() || queue.buffer_count == 0 {
            return Err(Error::ProtocolViolation(format!(
                "the {} port needs a format and buffers before streaming",
                port
            )));
        }
        if self.extradata.region(port).is_none() {
            self.allocate_extradata(port)?;
        }

        let first = !self.is_streaming();
        if first {
            self.subscribe_events()?;
        }
        if let Err(e) = self.device.stream_on(port) {
            if first {
                self.unsubscribe_events();
            }
            if e.is_overload() {
                warn!("hardware overloaded, {} port not started: {}", port, e);
                return Err(Error::ResourceExhausted(format!(
                    "hardware overloaded: {}",
                    e
                )));
            }
            error!("failed to start the {} port: {}", port, e);
            self.ports[port.index()].state = PortState::Failed;
            return Err(e.into());
        }
        self.ports[port.index()].state = PortState::Streaming;
        self.shared.poll.lock().failed[port.index()] = false;
        info!("{} port streaming", port);
        Ok(())
    }

    /// Stops `port` and takes back every buffer the driver still owned on it. Stopping a port
    /// that is not streaming and owns no buffers does nothing. Once neither port streams, all
    /// extradata is released.
    ///
    /// The buffers are returned even when the driver refuses to stop, together with the error.
    /// The completion dispatcher must not be running.
    pub(crate) fn stop(&mut self, port: Port) -> (Vec<InFlight>, Result<()>) {
        let state = self.state(port);
        let has_buffers = !self.shared.poll.lock().in_flight[port.index()].is_empty();
        let mut result = Ok(());
        let mut flushed = Vec::new();

        if state.is_streaming() || state == PortState::Failed || has_buffers {
            if let Err(e) = self.device.stream_off(port) {
                error!("failed to stop the {} port: {}", port, e);
                result = Err(Error::from(e));
            }
            flushed = self.reclaim(port);
            self.ports[port.index()].state = PortState::Stopped;
            info!("{} port stopped, {} buffers returned", port, flushed.len());
        }

        if !self.is_streaming() {
            self.release_all();
        }
        (flushed, result)
    }

    /// Takes the records of `port` out of the poll state and drops their batch and extradata
    /// slots.
    fn reclaim(&mut self, port: Port) -> Vec<InFlight> {
        let mut fd_index = self.shared.fd_index[port.index()].lock();
        let mut batch = self.shared.batch.lock();
        let flushed = {
            let mut poll = self.shared.poll.lock();
            poll.failed[port.index()] = false;
            poll.take_port(port)
        };
        fd_index.clear();
        for record in &flushed {
            if let Some(slot) = record.batch_slot {
                if let Err(e) = batch.retrieve(slot) {
                    warn!(
                        "{} buffer {} lost its batch slot {}: {}",
                        port, record.index, slot, e
                    );
                }
            }
        }
        flushed
    }

    fn release_all(&mut self) {
        self.unsubscribe_events();
        self.extradata.free_all();
        for table in &self.shared.fd_index {
            table.lock().clear();
        }
        self.shared.batch.lock().clear();
    }

    /// Returns every queued buffer to the client while keeping streaming ports streaming.
    ///
    /// Both ports are flushed even if one of them fails; a failing port is left failed and the
    /// first error is returned next to everything that was taken back.
    /// The completion dispatcher must not be running.
    pub(crate) fn flush(&mut self) -> (Vec<InFlight>, Result<()>) {
        let mut flushed = Vec::new();
        let mut result = Ok(());
        for port in Port::ALL {
            let state = self.state(port);
            let has_buffers = !self.shared.poll.lock().in_flight[port.index()].is_empty();
            if !state.is_streaming() && state != PortState::Failed && !has_buffers {
                continue;
            }
            let stopped = self.device.stream_off(port);
            flushed.extend(self.reclaim(port));
            if let Err(e) = stopped {
                error!("failed to flush the {} port: {}", port, e);
                self.ports[port.index()].state = PortState::Failed;
                result = result.and(Err(e.into()));
                continue;
            }
            match state {
                PortState::Streaming => {
                    if let Err(e) = self.device.stream_on(port) {
                        error!("failed to restart the {} port after flush: {}", port, e);
                        self.ports[port.index()].state = PortState::Failed;
                        result = result.and(Err(e.into()));
                    }
                }
                // The dequeue failure is cleared with the records; the port stays failed.
                PortState::Failed => self.ports[port.index()].state = PortState::Failed,
                PortState::Idle | PortState::Stopped => {}
            }
        }
        debug!("flushed {} buffers", flushed.len());
        (flushed, result)
    }
}

#[cfg(test)]
mod tests {
    use base::SharedMemory;
    use sync::Mutex;

    use super::*;
    use crate::config::EncoderConfig;
    use crate::config::RoiQp;
    use crate::device::fake::Call;
    use crate::device::fake::FakeDevice;
    use crate::error::ErrorKind;
    use crate::extradata::MemfdAllocator;
    use crate::format::Codec;
    use crate::format::PixelFormat;

    struct Fixture {
        device: Arc<FakeDevice>,
        shared: Arc<SessionShared>,
        queues: BufferQueueManager,
    }

    fn fixture(extradata: bool, batch_size: u32) -> Fixture {
        let device = Arc::new(FakeDevice::new().unwrap());
        let mut config = EncoderConfig::new(Codec::H264);
        config.extradata = extradata;
        config.batch_size = batch_size;
        let shared = Arc::new(SessionShared::new(Arc::new(Mutex::new(config))));
        let queues = BufferQueueManager::new(
            device.clone(),
            shared.clone(),
            ExtradataAllocator::new(Arc::new(MemfdAllocator)),
        );
        Fixture {
            device,
            shared,
            queues,
        }
    }

    fn configure(f: &mut Fixture, count: u32) {
        f.queues
            .negotiate_format(Port::Input, 320, 240, PixelFormat::Nv12.fourcc())
            .unwrap();
        f.queues
            .negotiate_format(Port::Output, 320, 240, Codec::H264.fourcc())
            .unwrap();
        f.queues.set_buffer_count(Port::Input, count).unwrap();
        f.queues.set_buffer_count(Port::Output, count).unwrap();
    }

    fn entry(shm: &SharedMemory, index: u32) -> QueueEntry {
        let mut entry = QueueEntry::new(index, shm.as_raw_descriptor(), 4096);
        entry.bytes_used = 4096;
        entry
    }

    #[test]
    fn flags_round_trip_through_v4l2() {
        let flags = EntryFlags::END_OF_STREAM | EntryFlags::DEFERRED;
        assert_eq!(EntryFlags::from_v4l2(flags.to_v4l2()), flags);
        assert!(EntryFlags::from_v4l2(V4L2_BUF_FLAG_ERROR).contains(EntryFlags::ERROR));
    }

    #[test]
    fn extradata_plane_attached() {
        let mut f = fixture(true, 1);
        configure(&mut f, 4);
        let region = f.queues.extradata_region(Port::Input).unwrap();
        assert_eq!(region.count(), 4);

        let shm = SharedMemory::new("input", 4096).unwrap();
        let mut input = entry(&shm, 2);
        input.extradata = Some(vec![7; 16]);
        f.queues.submit(Port::Input, &input).unwrap();

        let queued = f.device.queued(Port::Input);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].planes.len(), 2);
        assert_eq!(
            queued[0].planes[1].fd,
            region.buffer().as_raw_descriptor()
        );
        assert_eq!(&region.read_slot(0).unwrap()[..16], &[7; 16]);
    }

    #[test]
    fn pending_roi_written_to_input_extradata() {
        let mut f = fixture(true, 1);
        configure(&mut f, 4);
        let region = f.queues.extradata_region(Port::Input).unwrap();
        let roi = RoiQp {
            timestamp_us: 1000,
            delta_qp: vec![-4; 300],
        };
        f.shared.config.lock().roi_qp.push_back(roi.clone());

        // Frames before the map's timestamp carry only the terminator.
        let shm = SharedMemory::new("input", 4096).unwrap();
        let mut early = entry(&shm, 0);
        early.timestamp_us = 500;
        f.queues.submit(Port::Input, &early).unwrap();
        let terminator = extradata_terminator();
        assert_eq!(&region.read_slot(0).unwrap()[..terminator.len()], terminator.as_slice());

        let other = SharedMemory::new("input", 4096).unwrap();
        let mut due = entry(&other, 1);
        due.timestamp_us = 1000;
        f.queues.submit(Port::Input, &due).unwrap();
        let encoded = roi.to_extradata();
        assert_eq!(&region.read_slot(1).unwrap()[..encoded.len()], encoded.as_slice());
        assert!(f.shared.config.lock().roi_qp.is_empty());
    }

    #[test]
    fn no_extradata_plane_without_extradata() {
        let mut f = fixture(false, 1);
        configure(&mut f, 2);
        assert!(f.queues.extradata_region(Port::Input).is_none());
        let shm = SharedMemory::new("input", 4096).unwrap();
        f.queues.submit(Port::Input, &entry(&shm, 0)).unwrap();
        assert_eq!(f.device.queued(Port::Input)[0].planes.len(), 1);
    }

    #[test]
    fn duplicate_submission_rejected() {
        let mut f = fixture(false, 1);
        configure(&mut f, 2);
        let shm = SharedMemory::new("input", 4096).unwrap();
        f.queues.submit(Port::Input, &entry(&shm, 1)).unwrap();
        let err = f.queues.submit(Port::Input, &entry(&shm, 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        let err = f.queues.submit(Port::Input, &entry(&shm, 5)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    }

    #[test]
    fn failed_queue_marks_port_failed() {
        let mut f = fixture(false, 1);
        configure(&mut f, 2);
        let shm = SharedMemory::new("input", 4096).unwrap();
        f.device.fail_next("VIDIOC_QBUF", libc::EIO);
        let err = f.queues.submit(Port::Input, &entry(&shm, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DriverFailure);
        assert_eq!(f.queues.state(Port::Input), PortState::Failed);
        assert_eq!(f.queues.state(Port::Output), PortState::Idle);
        assert_eq!(f.shared.poll.lock().outstanding(), 0);

        f.queues.stop(Port::Input).1.unwrap();
        assert_eq!(f.queues.state(Port::Input), PortState::Stopped);
    }

    #[test]
    fn batch_marks_all_but_last_deferred() {
        let mut f = fixture(false, 4);
        configure(&mut f, 8);
        let shm = SharedMemory::new("input", 4096).unwrap();
        let entries: Vec<_> = (0..3).map(|i| entry(&shm, i)).collect();

        let err = f.queues.submit(Port::Input, &entries[0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);

        f.queues.submit_batch(42, &entries).unwrap();
        let queued = f.device.queued(Port::Input);
        let deferred: Vec<bool> = queued
            .iter()
            .map(|b| b.flags & V4L2_MSM_BUF_FLAG_DEFER != 0)
            .collect();
        assert_eq!(deferred, vec![true, true, false]);
        assert_eq!(f.shared.batch.lock().pending_count(42), 3);

        let more: Vec<_> = (3..5).map(|i| entry(&shm, i)).collect();
        let err = f.queues.submit_batch(42, &more).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    }

    #[test]
    fn batch_larger_than_batch_size_rejected() {
        let mut f = fixture(false, 2);
        configure(&mut f, 8);
        let shm = SharedMemory::new("input", 4096).unwrap();
        let entries: Vec<_> = (0..3).map(|i| entry(&shm, i)).collect();
        assert!(f.queues.submit_batch(1, &entries).is_err());
        assert!(f.shared.batch.lock().is_empty());
    }

    #[test]
    fn start_overload_is_resource_exhausted() {
        let mut f = fixture(false, 1);
        configure(&mut f, 2);
        f.device.fail_next("VIDIOC_STREAMON", libc::EBUSY);
        let err = f.queues.start(Port::Output).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert_eq!(f.queues.state(Port::Output), PortState::Idle);
        assert!(f.device.subscribed_events().is_empty());

        f.queues.start(Port::Output).unwrap();
        assert_eq!(f.queues.state(Port::Output), PortState::Streaming);
        assert_eq!(
            f.device.subscribed_events().len(),
            DeviceEvent::SUBSCRIBED.len()
        );
    }

    #[test]
    fn stop_never_started_port_is_silent() {
        let mut f = fixture(false, 1);
        configure(&mut f, 2);
        let before = f.device.ioctl_count();
        for _ in 0..2 {
            let (flushed, result) = f.queues.stop(Port::Input);
            result.unwrap();
            assert!(flushed.is_empty());
        }
        assert_eq!(f.device.ioctl_count(), before);
    }

    #[test]
    fn stop_returns_queued_buffers_and_frees_extradata() {
        let mut f = fixture(true, 1);
        configure(&mut f, 2);
        f.queues.start(Port::Output).unwrap();
        f.queues.start(Port::Input).unwrap();
        let shm = SharedMemory::new("input", 4096).unwrap();
        f.queues.submit(Port::Input, &entry(&shm, 0)).unwrap();

        let (flushed, result) = f.queues.stop(Port::Input);
        result.unwrap();
        assert_eq!(flushed.len(), 1);
        assert!(f.queues.extradata_region(Port::Input).is_some());
        assert!(f.shared.fd_index[Port::Input.index()].lock().is_empty());

        let (flushed, result) = f.queues.stop(Port::Output);
        result.unwrap();
        assert!(flushed.is_empty());
        assert!(f.queues.extradata_region(Port::Input).is_none());
        assert!(f.queues.extradata_region(Port::Output).is_none());
        assert!(f.device.subscribed_events().is_empty());

        // Stopped ports refuse buffers until restarted.
        let err = f.queues.submit(Port::Input, &entry(&shm, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        f.queues.start(Port::Input).unwrap();
        assert!(f.queues.extradata_region(Port::Input).is_some());
        f.queues.submit(Port::Input, &entry(&shm, 0)).unwrap();
    }

    #[test]
    fn flush_keeps_streaming() {
        let mut f = fixture(false, 1);
        configure(&mut f, 2);
        f.queues.start(Port::Output).unwrap();
        let shm = SharedMemory::new("output", 4096).unwrap();
        f.queues.submit(Port::Output, &entry(&shm, 0)).unwrap();
        f.queues.submit(Port::Output, &entry(&shm, 1)).unwrap();
        f.device.clear_calls();

        let (flushed, result) = f.queues.flush();
        result.unwrap();
        assert_eq!(flushed.len(), 2);
        assert_eq!(
            f.device.calls(),
            vec![Call::StreamOff(Port::Output), Call::StreamOn(Port::Output)]
        );
        assert!(f.device.is_streaming(Port::Output));
        assert_eq!(f.queues.state(Port::Output), PortState::Streaming);
    }

    #[test]
    fn buffer_count_bounds() {
        let mut f = fixture(false, 1);
        let err = f.queues.set_buffer_count(Port::Input, 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        configure(&mut f, 2);
        assert!(f.queues.set_buffer_count(Port::Input, 0).is_err());
        assert!(f.queues.set_buffer_count(Port::Input, MAX_BUFFERS + 1).is_err());
        f.device.set_min_buffers(Port::Input, 6);
        assert_eq!(f.queues.set_buffer_count(Port::Input, 2).unwrap(), 6);
    }

    #[test]
    fn duplicate_submission_keeps_extradata() {
        let mut f = fixture(true, 1);
        configure(&mut f, 4);
        let region = f.queues.extradata_region(Port::Input).unwrap();
        let shm = SharedMemory::new("input", 4096).unwrap();
        let mut first = entry(&shm, 1);
        first.extradata = Some(vec![1; 16]);
        f.queues.submit(Port::Input, &first).unwrap();

        let mut again = entry(&shm, 1);
        again.extradata = Some(vec![2; 16]);
        let err = f.queues.submit(Port::Input, &again).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        assert_eq!(&region.read_slot(0).unwrap()[..16], &[1; 16]);
        assert_eq!(f.device.queued(Port::Input).len(), 1);
    }

    #[test]
    fn extradata_slots_bounded_by_buffer_count() {
        let mut f = fixture(true, 1);
        configure(&mut f, 2);
        let shms: Vec<_> = (0..3)
            .map(|_| SharedMemory::new("input", 4096).unwrap())
            .collect();
        f.queues.submit(Port::Input, &entry(&shms[0], 0)).unwrap();
        f.queues.submit(Port::Input, &entry(&shms[1], 1)).unwrap();
        // Buffer 1 leaves without its slot being unbound, so a third descriptor finds no slot
        // below the buffer count.
        f.shared.poll.lock().in_flight[Port::Input.index()].remove(&1);
        let err = f.queues.submit(Port::Input, &entry(&shms[2], 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert_eq!(f.shared.fd_index[Port::Input.index()].lock().len(), 2);
        assert_eq!(f.device.queued(Port::Input).len(), 2);
    }

    #[test]
    fn flush_unbinds_extradata_slots() {
        let mut f = fixture(true, 1);
        configure(&mut f, 4);
        f.queues.start(Port::Output).unwrap();
        f.queues.start(Port::Input).unwrap();
        let shms: Vec<_> = (0..5)
            .map(|_| SharedMemory::new("input", 4096).unwrap())
            .collect();
        for (index, shm) in shms[..4].iter().enumerate() {
            f.queues
                .submit(Port::Input, &entry(shm, index as u32))
                .unwrap();
        }
        let (flushed, result) = f.queues.flush();
        result.unwrap();
        assert_eq!(flushed.len(), 4);
        assert!(f.shared.fd_index[Port::Input.index()].lock().is_empty());

        // A descriptor never seen before still gets a slot after the flush.
        f.queues.submit(Port::Input, &entry(&shms[4], 0)).unwrap();
        assert_eq!(
            f.shared.fd_index[Port::Input.index()]
                .lock()
                .lookup(shms[4].as_raw_descriptor()),
            Some(0)
        );
    }

    #[test]
    fn failed_queue_releases_extradata_slot() {
        let mut f = fixture(true, 1);
        configure(&mut f, 2);
        let shm = SharedMemory::new("input", 4096).unwrap();
        f.device.fail_next("VIDIOC_QBUF", libc::EIO);
        f.queues.submit(Port::Input, &entry(&shm, 0)).unwrap_err();
        assert!(f.shared.fd_index[Port::Input.index()].lock().is_empty());
    }

    #[test]
    fn failed_stop_still_returns_buffers() {
        let mut f = fixture(true, 1);
        configure(&mut f, 2);
        f.queues.start(Port::Output).unwrap();
        f.queues.start(Port::Input).unwrap();
        let shm = SharedMemory::new("input", 4096).unwrap();
        f.queues.submit(Port::Input, &entry(&shm, 0)).unwrap();
        f.queues.submit(Port::Input, &entry(&shm, 1)).unwrap();

        f.device.fail_next("VIDIOC_STREAMOFF", libc::EIO);
        let (flushed, result) = f.queues.stop(Port::Input);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::DriverFailure);
        assert_eq!(flushed.len(), 2);
        assert_eq!(f.queues.state(Port::Input), PortState::Stopped);
        assert_eq!(f.shared.poll.lock().outstanding(), 0);
    }

    #[test]
    fn failed_flush_returns_both_ports() {
        let mut f = fixture(false, 1);
        configure(&mut f, 2);
        f.queues.start(Port::Output).unwrap();
        f.queues.start(Port::Input).unwrap();
        let input = SharedMemory::new("input", 4096).unwrap();
        let output = SharedMemory::new("output", 4096).unwrap();
        f.queues.submit(Port::Input, &entry(&input, 0)).unwrap();
        f.queues.submit(Port::Output, &entry(&output, 0)).unwrap();
        f.queues.submit(Port::Output, &entry(&output, 1)).unwrap();

        // Input is flushed first and refuses; output must still be flushed and restarted.
        f.device.fail_next("VIDIOC_STREAMOFF", libc::EIO);
        let (flushed, result) = f.queues.flush();
        assert_eq!(result.unwrap_err().kind(), ErrorKind::DriverFailure);
        assert_eq!(flushed.len(), 3);
        assert_eq!(f.shared.poll.lock().outstanding(), 0);
        assert_eq!(f.queues.state(Port::Input), PortState::Failed);
        assert_eq!(f.queues.state(Port::Output), PortState::Streaming);
        assert!(f.device.is_streaming(Port::Output));
    }

    #[test]
    fn failed_restart_after_flush_marks_port_failed() {
        let mut f = fixture(false, 1);
        configure(&mut f, 2);
        f.queues.start(Port::Output).unwrap();
        let shm = SharedMemory::new("output", 4096).unwrap();
        f.queues.submit(Port::Output, &entry(&shm, 0)).unwrap();

        f.device.fail_next("VIDIOC_STREAMON", libc::EIO);
        let (flushed, result) = f.queues.flush();
        assert!(result.is_err());
        assert_eq!(flushed.len(), 1);
        assert_eq!(f.queues.state(Port::Output), PortState::Failed);
        let err = f.queues.submit(Port::Output, &entry(&shm, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    }

    #[test]
    fn dequeue_failure_fails_port() {
        let mut f = fixture(false, 1);
        configure(&mut f, 2);
        f.queues.start(Port::Input).unwrap();
        f.shared.poll.lock().failed[Port::Input.index()] = true;
        assert_eq!(f.queues.state(Port::Input), PortState::Failed);
        assert!(f.queues.is_streaming());

        let shm = SharedMemory::new("input", 4096).unwrap();
        let err = f.queues.submit(Port::Input, &entry(&shm, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        assert!(f.queues.start(Port::Input).is_err());

        f.queues.stop(Port::Input).1.unwrap();
        assert_eq!(f.queues.state(Port::Input), PortState::Stopped);
        f.queues.start(Port::Input).unwrap();
        f.queues.submit(Port::Input, &entry(&shm, 0)).unwrap();
    }
}
