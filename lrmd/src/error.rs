//! Error taxonomy for the LRM bridge (spec §7).
//!
//! These are *business* results, distinct from the protocol acknowledgement
//! the bridge owes its caller on every path (see [`crate::te::Ack`]).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LrmError {
    /// The executor rejected `perform-op` (non-positive call id).
    #[error("executor rejected submission for resource '{resource_id}': {reason}")]
    SubmissionFailed { resource_id: String, reason: String },

    /// Completion event carried a return code that did not match the
    /// expected rc embedded in the transition key.
    #[error("agent failure for resource '{resource_id}': rc={rc} (expected {expected_rc})")]
    AgentFailure {
        resource_id: String,
        rc: i32,
        expected_rc: i32,
    },

    /// The executor connection was lost while the bridge believed it was
    /// connected. Fence-worthy in the real controller; here it surfaces as
    /// an FSM input.
    #[error("unexpected loss of executor connection")]
    ConnectionLost,

    /// A CIB write failed. Logged, not retried; the next transition's
    /// DC-side unpack reconciles.
    #[error("CIB update failed for resource '{resource_id}': {reason}")]
    CibUpdateFailed { resource_id: String, reason: String },

    /// An ACL dry-run against the CIB denied a delete.
    #[error("permission denied deleting resource '{resource_id}'")]
    PermissionDenied { resource_id: String },

    /// The inbound request was missing required fields or malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The verb is not legal in the bridge's current FSM state.
    #[error("verb '{verb}' is not permitted in state '{state}'")]
    IllegalInState { verb: String, state: String },

    /// `connect` exceeded the configured reconnect attempt budget.
    #[error("exceeded maximum reconnect attempts ({0})")]
    ReconnectExhausted(usize),

    /// Generic resource-not-found, used by cancel/delete lookups that the
    /// spec explicitly says are *not* errors at the protocol level, but
    /// which callers may still want to distinguish internally.
    #[error("resource '{0}' is not known to the executor")]
    UnknownResource(String),
}

pub type LrmResult<T> = Result<T, LrmError>;
