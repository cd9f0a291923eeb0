// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use remain::sorted;
use thiserror::Error;

use crate::batch::BatchError;
use crate::config::ConfigError;
use crate::device::DeviceError;
use crate::extradata::ExtradataError;
use crate::fd_index::FdIndexError;

/// How the caller is expected to react to an [`Error`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request was rejected without side effects; retry with different settings.
    InvalidConfiguration,
    /// A bounded table or the hardware is full; back off and retry.
    ResourceExhausted,
    /// The driver failed; the affected queue must be stopped.
    DriverFailure,
    /// The caller broke the session protocol.
    ProtocolViolation,
}

#[sorted]
#[derive(Error, Debug)]
pub enum Error {
    #[error("driver request {op} failed: {source}")]
    DriverFailure {
        op: &'static str,
        source: DeviceError,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("resources exhausted: {0}")]
    ResourceExhausted(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DriverFailure { .. } => ErrorKind::DriverFailure,
            Error::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            Error::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            Error::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
        }
    }
}

impl From<DeviceError> for Error {
    fn from(source: DeviceError) -> Self {
        Error::DriverFailure {
            op: source.op,
            source,
        }
    }
}

impl From<FdIndexError> for Error {
    fn from(e: FdIndexError) -> Self {
        Error::ResourceExhausted(e.to_string())
    }
}

impl From<BatchError> for Error {
    fn from(e: BatchError) -> Self {
        match e {
            BatchError::TableFull(_) => Error::ResourceExhausted(e.to_string()),
            BatchError::FanOutExceeded(_)
            | BatchError::StillPending(_)
            | BatchError::UnknownSlot(_) => Error::ProtocolViolation(e.to_string()),
        }
    }
}

impl From<ExtradataError> for Error {
    fn from(e: ExtradataError) -> Self {
        match e {
            ExtradataError::EmptyRegion { .. } | ExtradataError::SlotOutOfRange { .. } => {
                Error::ProtocolViolation(e.to_string())
            }
            _ => Error::ResourceExhausted(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(
            Error::from(FdIndexError::NoSlot(64)).kind(),
            ErrorKind::ResourceExhausted
        );
        assert_eq!(
            Error::from(BatchError::TableFull(64)).kind(),
            ErrorKind::ResourceExhausted
        );
        assert_eq!(
            Error::from(BatchError::StillPending(7)).kind(),
            ErrorKind::ProtocolViolation
        );
        assert_eq!(
            Error::from(ConfigError::LtrDisabled).kind(),
            ErrorKind::InvalidConfiguration
        );
        let driver = Error::from(DeviceError::new(
            "VIDIOC_QBUF",
            base::Error::new(libc::EINVAL),
        ));
        assert_eq!(driver.kind(), ErrorKind::DriverFailure);
        assert!(driver.to_string().contains("VIDIOC_QBUF"));
    }
}
