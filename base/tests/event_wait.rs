// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::thread;
use std::time::Duration;

use base::Event;
use base::EventType;
use base::WaitContext;
use base::WorkerThread;

#[test]
fn worker_wakes_on_event_from_other_thread() {
    let work = Event::new().unwrap();
    let work_clone = work.try_clone().unwrap();

    let worker = WorkerThread::start("wake_test", move |stop| {
        let ctx: WaitContext<u32> = WaitContext::new().unwrap();
        ctx.add_for_event(&work_clone, EventType::Read, 1).unwrap();
        ctx.add(&stop, 2).unwrap();
        let mut wakeups = 0u32;
        loop {
            let events = ctx.wait().unwrap();
            for e in events.iter() {
                match e.token {
                    1 => {
                        work_clone.wait().unwrap();
                        wakeups += 1;
                    }
                    _ => return wakeups,
                }
            }
        }
    })
    .unwrap();

    work.signal().unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(worker.stop(), 1);
}
