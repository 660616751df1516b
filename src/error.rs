use crate::wire::{Failure, FailureCode};
use std::time::Duration;
use thiserror::Error;

/// Why an acquisition failed.
///
/// The first four variants are reported by the helper over the channel.
/// The rest are detected locally, from process- or channel-level failure
/// rather than a helper-reported reason.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// The interface name does not resolve on the helper's side.
    #[error("invalid interface: {0}")]
    InvalidInterface(String),
    /// The protocol selector is not in the helper's allowlist.
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),
    /// The helper is installed without the expected elevation, or the
    /// kernel refused the creation syscall.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Kernel-level creation failure other than permissions.
    #[error("socket creation failed: {0}")]
    SocketCreateFailed(String),
    /// The helper executable could not be located or started.
    #[error("helper could not be started: {0}")]
    HelperUnavailable(String),
    /// The helper exited, or broke the protocol, without a usable response.
    #[error("helper failed without a usable response: {0}")]
    HelperCrashed(String),
    /// No response within the configured bound.
    #[error("no response from helper within {0:?}")]
    Timeout(Duration),
}

impl From<Failure> for AcquireError {
    fn from(failure: Failure) -> Self {
        match failure.code {
            FailureCode::InvalidInterface => Self::InvalidInterface(failure.reason),
            FailureCode::UnsupportedProtocol => Self::UnsupportedProtocol(failure.reason),
            FailureCode::PermissionDenied => Self::PermissionDenied(failure.reason),
            FailureCode::SocketCreateFailed => Self::SocketCreateFailed(failure.reason),
        }
    }
}
