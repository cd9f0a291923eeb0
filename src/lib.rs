// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Control plane of a V4L2 memory-to-memory video encoder.
//!
//! A [`VencSession`] owns the configuration of one encoding session, the buffer lifecycle of the
//! driver's input and output queues, and a dispatcher thread that turns driver completions into
//! client completions.

pub mod batch;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod dump;
pub mod error;
pub mod extradata;
pub mod fd_index;
pub mod format;
pub mod queue;
pub mod session;
mod state;

pub use crate::error::Error;
pub use crate::error::ErrorKind;
pub use crate::error::Result;
pub use crate::session::SessionOptions;
pub use crate::session::VencSession;
