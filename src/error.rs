//! # Network Server Error Handling
//!
//! Defines [`NsError`], the error type for conditions the error-handling
//! design calls Transient, Capacity, Protocol, or Fatal, and
//! [`PipelineOutcome`], the explicit control-flow type that keeps
//! "nothing to send" and "frame dropped" from ever being represented as an
//! `Err`.

use thiserror::Error;

/// Errors surfaced by the network-server core.
///
/// Frame-drop conditions (unknown DevAddr, MIC mismatch, FCnt out of window,
/// malformed PHY) are deliberately NOT represented here — they are silent
/// and logged at debug, represented instead by [`PipelineOutcome::Dropped`].
#[derive(Debug, Error)]
pub enum NsError {
    /// Storage I/O failure on the session, queue, or mac-command store.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Optimistic-concurrency conflict on a session write; caller should reload.
    #[error("session write conflict for dev_eui {0}")]
    SessionConflict(String),

    /// Gateway transport timed out delivering a downlink.
    #[error("gateway transport timeout: {0}")]
    GatewayTransportTimeout(String),

    /// A queue item's payload exceeds the max payload size for the device's DR.
    #[error("device queue item exceeds max payload size: {len} > {max}")]
    QueueItemTooLarge { len: usize, max: usize },

    /// Unexpected MAC-command payload shape, or an Ans with no matching pending Req.
    #[error("mac-command protocol error: {0}")]
    MacCommandProtocol(String),

    /// Corrupted persistent state, e.g. a session with a bad key length.
    #[error("device session corrupted, quarantined: {0}")]
    SessionCorrupted(String),

    /// MAC version on a loaded session is not one this crate implements.
    #[error("unsupported MAC version: {0}")]
    UnsupportedMacVersion(String),

    /// A regional-band lookup (DR, frequency, payload size) failed.
    #[error("band parameter error: {0}")]
    BandParameter(String),

    /// PHY payload could not be marshalled or parsed.
    #[error("phy codec error: {0}")]
    PhyCodec(String),

    /// A device class does not support the action requested for it.
    #[error("invalid device class for this action")]
    InvalidDeviceClass,
}

/// Outcome of one pipeline step.
///
/// Every uplink-pipeline and downlink-builder step returns this instead of
/// threading a shared mutable context through free functions: `Continue`
/// carries the (possibly updated) step state forward, `Done` short-circuits
/// the remaining steps without it being treated as a failure, `Dropped`
/// records a silent frame-drop with its reason for debug logging, and `Fail`
/// surfaces a real error. This replaces the sentinel `ErrAbort` value of the
/// original implementation with a typed enum every step returns explicitly.
#[derive(Debug)]
pub enum PipelineOutcome<T> {
    Continue(T),
    Done,
    Dropped { reason: String },
    Fail(NsError),
}

impl<T> PipelineOutcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> PipelineOutcome<U> {
        match self {
            PipelineOutcome::Continue(t) => PipelineOutcome::Continue(f(t)),
            PipelineOutcome::Done => PipelineOutcome::Done,
            PipelineOutcome::Dropped { reason } => PipelineOutcome::Dropped { reason },
            PipelineOutcome::Fail(e) => PipelineOutcome::Fail(e),
        }
    }

    pub fn is_continue(&self) -> bool {
        matches!(self, PipelineOutcome::Continue(_))
    }
}

impl<T> From<Result<T, NsError>> for PipelineOutcome<T> {
    fn from(r: Result<T, NsError>) -> Self {
        match r {
            Ok(t) => PipelineOutcome::Continue(t),
            Err(e) => PipelineOutcome::Fail(e),
        }
    }
}

/// Runs an expression yielding `PipelineOutcome<T>` and returns early from
/// the enclosing function (which must itself return `PipelineOutcome<_>`)
/// unless it is `Continue`.
#[macro_export]
macro_rules! outcome_try {
    ($e:expr) => {
        match $e {
            $crate::error::PipelineOutcome::Continue(v) => v,
            $crate::error::PipelineOutcome::Done => return $crate::error::PipelineOutcome::Done,
            $crate::error::PipelineOutcome::Dropped { reason } => {
                return $crate::error::PipelineOutcome::Dropped { reason }
            }
            $crate::error::PipelineOutcome::Fail(e) => {
                return $crate::error::PipelineOutcome::Fail(e)
            }
        }
    };
}
