// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! State shared between the control thread and the completion dispatcher.
//!
//! Locks are always taken in the order `fd_index`, `batch`, `config`, `poll`. The completion sink
//! is locked last, and no lock is held while the dispatcher waits for the device.

use std::collections::BTreeMap;
use std::sync::Arc;

use base::RawDescriptor;
use sync::Condvar;
use sync::Mutex;

use crate::batch::BatchRegistry;
use crate::config::EncoderConfig;
use crate::device::Port;
use crate::extradata::ExtradataRegion;
use crate::fd_index::FdIndexTable;
use crate::queue::EntryFlags;

/// An extradata slot lent to a queued buffer. Holding it keeps the region mapped.
#[derive(Clone, Debug)]
pub(crate) struct ExtradataSlot {
    pub region: Arc<ExtradataRegion>,
    pub slot: u32,
}

/// Bookkeeping for a buffer owned by the driver.
#[derive(Clone, Debug)]
pub(crate) struct InFlight {
    pub port: Port,
    pub index: u32,
    pub client_id: u64,
    pub fd: RawDescriptor,
    pub length: u32,
    pub offset: u32,
    pub bytes_used: u32,
    pub timestamp_us: i64,
    pub flags: EntryFlags,
    pub extradata: Option<ExtradataSlot>,
    /// Slot in the batch registry when the buffer is part of a batch.
    pub batch_slot: Option<u32>,
}

#[derive(Debug, Default)]
pub(crate) struct PollState {
    pub paused: bool,
    pub cancelled: bool,
    /// Ports whose dequeue failed. Nothing more is dequeued from them until they are stopped.
    pub failed: [bool; 2],
    /// Driver-owned buffers by port, keyed by buffer index.
    pub in_flight: [BTreeMap<u32, InFlight>; 2],
}

impl PollState {
    pub fn outstanding(&self) -> usize {
        self.in_flight.iter().map(BTreeMap::len).sum()
    }

    pub fn take_port(&mut self, port: Port) -> Vec<InFlight> {
        std::mem::take(&mut self.in_flight[port.index()])
            .into_values()
            .collect()
    }
}

pub(crate) struct SessionShared {
    pub fd_index: [Mutex<FdIndexTable>; 2],
    pub batch: Mutex<BatchRegistry>,
    pub config: Arc<Mutex<EncoderConfig>>,
    pub poll: Mutex<PollState>,
    /// Signaled whenever `poll.paused` or `poll.cancelled` changes.
    pub pause_cv: Condvar,
}

impl SessionShared {
    pub fn new(config: Arc<Mutex<EncoderConfig>>) -> SessionShared {
        SessionShared {
            fd_index: [
                Mutex::new(FdIndexTable::new()),
                Mutex::new(FdIndexTable::new()),
            ],
            batch: Mutex::new(BatchRegistry::new()),
            config,
            poll: Mutex::new(PollState::default()),
            pause_cv: Condvar::new(),
        }
    }

    /// Unbinds the extradata slot of a record that left the driver, unless another driver-owned
    /// buffer on the same port still uses its descriptor. `record` must already be out of
    /// `poll.in_flight`.
    pub fn release_extradata_slot(&self, record: &InFlight) {
        if record.extradata.is_none() {
            return;
        }
        let mut fd_index = self.fd_index[record.port.index()].lock();
        let poll = self.poll.lock();
        let shared_fd = poll.in_flight[record.port.index()]
            .values()
            .any(|other| other.fd == record.fd);
        if !shared_fd {
            fd_index.release(record.fd);
        }
    }
}
