//! Pod Scoring Bridge - Rust Engine
//!
//! Delegates pod selection to a scoring function hosted in an embedded
//! foreign runtime, with leak-free marshalling and serialized runtime access.
//!
//! # Architecture
//!
//! - **metrics**: Wire types (`PodMetrics` in, `PodScore` out)
//! - **runtime**: The `ForeignRuntime` trait, plus stub and CPython backends
//! - **scope**: Per-call reference guards (`CallScope`, `ObjRef`)
//! - **resolver**: Scoring-function lookup with a success-only cache
//! - **marshal**: Native/foreign conversion and batch validation
//! - **scorer**: Public facade (`PodScorer`) and the runtime admission gate
//!
//! # Critical Invariants
//!
//! 1. Every foreign reference is released exactly once, on every exit path
//! 2. One caller at a time holds the runtime; the rest queue, bounded by an
//!    admission deadline that never interrupts an in-flight call
//! 3. Resolution failures are never cached

// Module declarations
pub mod error;
pub mod marshal;
pub mod metrics;
pub mod resolver;
pub mod runtime;
pub mod scope;
pub mod scorer;

mod host;
mod invoke;

// Re-exports for convenience
pub use error::BridgeError;
pub use marshal::{encode_batch, KEY_ADAPTERS, KEY_KV_CACHE_UTIL, KEY_POD_NAME, KEY_QUEUE_COUNT};
pub use metrics::{PodMetrics, PodScore};
pub use resolver::FunctionResolver;
pub use runtime::stub::{StubCounters, StubRuntime, StubValue};
pub use runtime::{ForeignRuntime, RawObj, RuntimeError, ValueKind};
pub use scope::{CallScope, ObjRef};
pub use scorer::{
    BridgeConfig, PodScorer, DEFAULT_BYTES_FUNCTION, DEFAULT_FUNCTION, DEFAULT_MODULE,
};

// CPython backend (when feature enabled)
#[cfg(feature = "pyo3")]
pub use runtime::python::PyRuntime;
