//! Bridge error taxonomy
//!
//! Every fallible bridge operation returns exactly one of these variants.
//! The taxonomy is closed on purpose: callers route on the variant (retry
//! the call, fix the batch, fix deployment) and must not need to parse
//! message strings to tell failure classes apart.

use thiserror::Error;

/// Errors surfaced by the scoring bridge
#[derive(Debug, Error, PartialEq)]
pub enum BridgeError {
    /// The embedded runtime could not be brought up, or host-owned
    /// startup state (interned keys, eager function resolution) failed.
    #[error("runtime initialization failed: {reason}")]
    RuntimeInit { reason: String },

    /// The scoring function could not be resolved: module missing,
    /// attribute missing, or the attribute is not callable.
    #[error("cannot resolve {module}.{function}: {reason}")]
    Resolution {
        module: String,
        function: String,
        reason: String,
    },

    /// A native value could not be converted into its foreign form.
    /// `field` names the offending record field.
    #[error("cannot marshal field '{field}': {reason}")]
    Marshal { field: String, reason: String },

    /// The foreign function was invoked and raised. The message is the
    /// foreign exception rendered as text; the traceback is attached
    /// when the backend can produce one.
    #[error("scoring function raised: {message}")]
    Invocation {
        message: String,
        traceback: Option<String>,
    },

    /// The foreign function returned, but the returned value does not
    /// match the expected shape (sequence of `(name, score)` pairs).
    #[error("unexpected result shape: expected {expected}, got {got}")]
    ResultShape { expected: String, got: String },

    /// The bridge has been stopped; no further calls are accepted.
    #[error("bridge is stopped")]
    Stopped,

    /// The caller waited longer than the configured admission deadline
    /// for an in-flight scoring call to finish. The foreign call itself
    /// is never interrupted; only queueing time is bounded.
    #[error("gave up waiting for runtime access after {waited_ms} ms")]
    QueueDeadline { waited_ms: u64 },
}
