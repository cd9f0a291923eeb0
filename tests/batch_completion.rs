// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Batched input: one client completion per logical buffer, after every fanned-out slot.

use std::sync::Arc;
use std::time::Duration;

use base::AsRawDescriptor;
use base::SharedMemory;
use venc::config::EncoderSettings;
use venc::device::fake::FakeDevice;
use venc::device::Port;
use venc::dispatcher::Completion;
use venc::dispatcher::CompletionStream;
use venc::extradata::MemfdAllocator;
use venc::format::Codec;
use venc::format::PixelFormat;
use venc::queue::EntryFlags;
use venc::queue::QueueEntry;
use venc::ErrorKind;
use venc::SessionOptions;
use venc::VencSession;

const QUIET: Duration = Duration::from_millis(30);
const DELIVERY: Duration = Duration::from_secs(5);

fn batched_session(batch_size: u32) -> (VencSession<FakeDevice>, CompletionStream) {
    let mut options = SessionOptions::new(Codec::H264);
    options.poll_timeout = Duration::from_millis(50);
    let mut session = VencSession::new(
        FakeDevice::new().unwrap(),
        Arc::new(MemfdAllocator),
        options,
    );
    let settings = EncoderSettings {
        batch_size,
        ..Default::default()
    };
    session.configure(&settings).unwrap();
    session
        .negotiate_format(Port::Input, 320, 240, PixelFormat::Nv12.fourcc())
        .unwrap();
    session
        .negotiate_format(Port::Output, 320, 240, Codec::H264.fourcc())
        .unwrap();
    session.set_buffer_count(Port::Input, 16).unwrap();
    session.set_buffer_count(Port::Output, 4).unwrap();
    let stream = session.completion_stream();
    session.start().unwrap();
    (session, stream)
}

fn entries(shm: &SharedMemory, count: u32) -> Vec<QueueEntry> {
    (0..count)
        .map(|i| {
            let mut entry = QueueEntry::new(i, shm.as_raw_descriptor(), 4096);
            entry.bytes_used = 4096;
            entry.timestamp_us = i as i64 * 33_333;
            entry
        })
        .collect()
}

/// Completion order that is neither queue order nor its reverse.
fn shuffled(count: u32) -> Vec<u32> {
    let mut order: Vec<u32> = (0..count).filter(|i| i % 2 == 1).collect();
    order.extend((0..count).filter(|i| i % 2 == 0).rev());
    order
}

#[test]
fn one_completion_per_logical_buffer() {
    let (mut session, stream) = batched_session(16);
    let shm = SharedMemory::new("frames", 4096).unwrap();

    for k in 1..=16u32 {
        let logical_id = 1000 + k as u64;
        session
            .submit_input_batch(logical_id, &entries(&shm, k))
            .unwrap();
        let order = shuffled(k);
        let (last, rest) = order.split_last().unwrap();
        for index in rest {
            assert!(session
                .device()
                .complete_index(Port::Input, *index, 0, 0));
        }
        assert_eq!(
            stream.recv_timeout(QUIET),
            None,
            "batch of {} completed early",
            k
        );

        assert!(session.device().complete_index(Port::Input, *last, 0, 0));
        match stream.recv_timeout(DELIVERY) {
            Some(Completion::Input(done)) => {
                assert_eq!(done.client_id, logical_id);
                assert!(!done.flushed);
                assert!(!done.flags.contains(EntryFlags::DEFERRED));
            }
            other => panic!("batch of {}: unexpected completion {:?}", k, other),
        }
        assert_eq!(stream.recv_timeout(QUIET), None);
    }
    session.stop().unwrap();
}

#[test]
fn pending_logical_id_cannot_be_reused() {
    let (mut session, stream) = batched_session(4);
    let shm = SharedMemory::new("frames", 4096).unwrap();
    let batch = entries(&shm, 4);
    session.submit_input_batch(7, &batch[..2]).unwrap();

    let err = session.submit_input_batch(7, &batch[2..]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);

    session.device().complete_all(Port::Input, 0, 0);
    match stream.recv_timeout(DELIVERY) {
        Some(Completion::Input(done)) => assert_eq!(done.client_id, 7),
        other => panic!("unexpected completion {:?}", other),
    }
    // Once retrieved, the logical id is free again.
    session.submit_input_batch(7, &batch[2..]).unwrap();
}

#[test]
fn stop_returns_unfinished_batch_buffers() {
    let (mut session, stream) = batched_session(4);
    let shm = SharedMemory::new("frames", 4096).unwrap();
    session.submit_input_batch(9, &entries(&shm, 3)).unwrap();

    session.stop().unwrap();
    let flushed: Vec<_> = std::iter::from_fn(|| stream.try_next()).collect();
    assert_eq!(flushed.len(), 3);
    for completion in flushed {
        match completion {
            Completion::Input(done) => {
                assert!(done.flushed);
                assert_eq!(done.client_id, 9);
                assert!(!done.flags.contains(EntryFlags::DEFERRED));
            }
            other => panic!("unexpected completion {:?}", other),
        }
    }

    // The batch table was cleared with the queues.
    session.start().unwrap();
    session.submit_input_batch(9, &entries(&shm, 2)).unwrap();
}

#[test]
fn oversized_batch_rejected() {
    let (mut session, _stream) = batched_session(2);
    let shm = SharedMemory::new("frames", 4096).unwrap();
    let err = session
        .submit_input_batch(1, &entries(&shm, 3))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    assert!(session.device().queued(Port::Input).is_empty());
}
