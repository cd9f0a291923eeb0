// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Lock types that treat poisoning as a fatal bug.
//!
//! The encoder control plane shares its bookkeeping between the control thread and the completion
//! dispatcher. A panic on either side while holding one of these locks leaves the session state
//! unusable, so instead of threading `PoisonError` through every call site the wrappers here panic
//! on poison and otherwise mirror the `std::sync` API.

mod condvar;
mod mutex;

pub use crate::condvar::Condvar;
pub use crate::mutex::Mutex;
