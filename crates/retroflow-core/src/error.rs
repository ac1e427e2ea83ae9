//! The closed error taxonomy of the resolution engine.
//!
//! Every variant is abort-style: an error ends the enclosing resolution run.
//! There is no retry or supervision layer in the core; the driver decides
//! whether to abandon the whole simulation or only the current order.

use crate::fixed::Mass;
use crate::time::TimePoint;

/// Errors raised by the backward-resolution engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulingError {
    #[error("unknown stream: {0}")]
    UnknownStream(String),

    #[error("unknown process state: {0}")]
    UnknownProcessState(String),

    #[error("unknown chain node: {0}")]
    UnknownNode(String),

    #[error("expected stream of a different kind: {0}")]
    UnexpectedStreamKind(String),

    /// A continuous stream state with zero duration was created or queried.
    /// This is a modeling error, never a warning.
    #[error("infinitesimal stream: zero-duration continuous state on '{stream}' at {at}")]
    InfinitesimalStream { stream: String, at: TimePoint },

    #[error("mass imbalance: expected {expected}, got {actual}")]
    MassImbalance { expected: Mass, actual: Mass },

    /// Validated inputs exceed the requested output. Over-delivery is never
    /// silently clamped.
    #[error("negative missing mass {missing} for output stream '{stream}'")]
    NegativeMissingMass { stream: String, missing: Mass },

    #[error("storage level inconsistent at {at}: level {level}")]
    StorageLevelInconsistent { at: TimePoint, level: Mass },

    #[error("found a closed loop in state switches at '{state}'")]
    ClosedLoopDetected { state: String },

    #[error("duplicate switch for connector {start} -> {end}")]
    DuplicateSwitch { start: String, end: String },

    #[error("duplicate process state: {0}")]
    DuplicateProcessState(String),

    #[error("no applicable switch into state '{state}'")]
    NoSwitchForState { state: String },

    /// An intentionally unsupported policy combination was reached, e.g. a
    /// production branch that needs a second, different input stream.
    #[error("unsupported branch shape: {0}")]
    UnsupportedBranchShape(String),

    #[error("production branch left incomplete for step '{step}'")]
    IncompleteBranch { step: String },

    #[error("message routed to '{node}' which cannot handle it: {reason}")]
    MisroutedMessage { node: String, reason: String },

    /// A rollback was requested with no stored checkpoint.
    #[error("no simulation checkpoint stored for step '{step}'")]
    MissingCheckpoint { step: String },
}
