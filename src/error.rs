// SPDX-License-Identifier: Apache-2.0
//! Error taxonomy for the driver.
//!
//! Every component has its own small error enum so callers can match on the
//! failure class they care about, and a crate-level [`Error`] consolidates
//! them. Transport and protocol faults are never retried inside the driver;
//! a silent retry over a register bus could mask a wedged device, so every
//! failure propagates with enough detail to decide between retry, reset and
//! abort. The one designed exception is [`Mi48::read`][crate::Mi48::read],
//! whose sync timeout is an expected steady-state condition and returns
//! `Ok(None)` instead of an error.

use std::time::Duration;

use thiserror::Error;

use crate::stream::StreamState;

pub type Result<T> = std::result::Result<T, Error>;

/// Faults at the physical-link level.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum TransportError {
    /// The link produced no data within the requested window.
    #[error("transport timed out")]
    Timeout,

    /// The underlying link failed. The message carries the bus or OS error.
    #[error("transport I/O fault: {0}")]
    IoFault(String),
}

/// Faults in the register command/response exchange.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ProtocolError {
    /// No (or an incomplete) response arrived within the per-call timeout.
    #[error("no register response within the timeout")]
    Timeout,

    /// The response did not decode: wrong prefix, tag, length or checksum.
    #[error("malformed register response: {0}")]
    Malformed(&'static str),
}

/// Faults while assembling a frame off the wire.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum AssemblyError {
    /// The transport returned short or errored mid-frame. This generally
    /// means the frame boundary has been lost and the stream must be
    /// restarted, not retried.
    #[error("truncated frame: got {got} of {expected} bytes")]
    Truncated { expected: usize, got: usize },
}

/// Locally-detected configuration problems; nothing was sent on the wire.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ConfigError {
    #[error("{0} out of the accepted range")]
    InvalidRange(&'static str),

    /// The edge-triggered sync strategy was requested on a transport with no
    /// data-ready signal.
    #[error("transport has no data-ready signal for edge-triggered sync")]
    SyncUnsupported,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum StartError {
    /// The first frame did not arrive within the startup window.
    #[error("no first frame within {waited:?}")]
    NoFrame { waited: Duration },
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum StopError {
    /// The device never acknowledged the stream-disable. The state machine
    /// is Idle regardless, but the device may still be capturing.
    #[error("stream-disable was not acknowledged before the stop timeout")]
    Unacknowledged,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum FlashError {
    /// `unlock` was called while the user flash was already unlocked.
    /// Overlapping unlock/write/lock brackets would corrupt the store, so
    /// this is strict rather than idempotent.
    #[error("user flash is already unlocked")]
    AlreadyUnlocked,

    #[error("calibration write rejected: {0}")]
    WriteRejected(&'static str),
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum DiscoveryError {
    #[error("no matching sensor found")]
    NotFound,

    /// More than one candidate matched and none was singled out. The driver
    /// never guesses which physical port the caller meant.
    #[error("multiple matching sensors found ({0})")]
    Ambiguous(usize),

    #[error("port could not be opened: {0}")]
    Busy(String),
}

/// Crate-level error consolidating the component taxonomies.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A frame failed to assemble. Carries the stream state the machine was
    /// in when the fault occurred, for post-mortem diagnosis without
    /// wire-level logs.
    #[error("frame assembly failed in state {state:?}: {source}")]
    Assembly {
        state: StreamState,
        #[source]
        source: AssemblyError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Start(#[from] StartError),

    #[error(transparent)]
    Stop(#[from] StopError),

    #[error(transparent)]
    Flash(#[from] FlashError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// The operation is not valid in the current stream state.
    #[error("{operation} is not valid in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: StreamState,
    },

    /// A streaming operation was attempted inside a user-flash bracket.
    /// Frame traffic between unlock and lock would corrupt the store.
    #[error("{operation} is not valid while the user flash is unlocked")]
    FlashUnlocked { operation: &'static str },
}

impl Error {
    /// True for faults that force the state machine back to Idle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Assembly { .. })
    }
}
