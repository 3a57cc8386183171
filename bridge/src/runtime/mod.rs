//! Foreign runtime abstraction
//!
//! The bridge core never talks to an interpreter directly. It is written
//! against [`ForeignRuntime`], a narrow object/call surface with explicit
//! reference ownership. Two backends implement it:
//!
//! - [`stub::StubRuntime`]: in-memory, instrumented with counters. The
//!   whole call path (marshal → invoke → unmarshal → release) runs
//!   hermetically against it, so the test suite needs no interpreter.
//! - [`python::PyRuntime`] (feature `pyo3`): the embedded CPython
//!   interpreter, one per process.
//!
//! # Reference ownership
//!
//! Every `Ok(RawObj)` hands the caller exactly one reference to a foreign
//! object. Inserting a value into a container (`seq_set`, `map_set`) makes
//! the container take its *own* internal reference; the caller still owns
//! the one it was handed. [`ForeignRuntime::release`] consumes the
//! caller's reference, exactly once. Using a handle after releasing it is
//! a caller bug; backends are entitled to panic on it rather than corrupt
//! the object store. Inside the bridge, [`crate::scope::CallScope`] makes
//! such misuse unrepresentable.

use thiserror::Error;

pub mod stub;

#[cfg(feature = "pyo3")]
pub mod python;

/// Opaque handle to one reference to a foreign object
///
/// A `RawObj` carries no lifetime and no release obligation by itself;
/// backends assign meaning to the inner value (the CPython backend uses
/// it as a slot index, the stub as a table key). Bridge code wraps every
/// handle in a scope guard immediately; `RawObj` itself only crosses the
/// backend boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawObj(u64);

impl RawObj {
    /// Mint a handle from a backend-chosen value
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// The backend-chosen value this handle was minted from
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Coarse classification of a foreign value
///
/// Used for result-shape checking and error messages; the bridge never
/// needs a finer-grained type model than this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Str,
    Int,
    Float,
    Bytes,
    Seq,
    Map,
    Fn,
    Other,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueKind::Str => "string",
            ValueKind::Int => "integer",
            ValueKind::Float => "float",
            ValueKind::Bytes => "bytes",
            ValueKind::Seq => "sequence",
            ValueKind::Map => "mapping",
            ValueKind::Fn => "callable",
            ValueKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Errors reported by a runtime backend
///
/// These are backend-level failures; the bridge maps them into
/// [`crate::BridgeError`] variants with call-site context attached
/// (which field was being marshalled, which function was being resolved).
#[derive(Debug, Error, PartialEq)]
pub enum RuntimeError {
    /// A function lookup failed: the module did not load, the attribute
    /// is absent, or the attribute is not callable.
    #[error("cannot resolve {module}.{function}: {reason}")]
    Resolve {
        module: String,
        function: String,
        reason: String,
    },

    /// Foreign code raised (or a foreign-side operation failed with an
    /// exception, e.g. allocation).
    #[error("{message}")]
    Raised {
        message: String,
        traceback: Option<String>,
    },

    /// A read expected one kind of value and found another.
    #[error("expected {expected}, found {found}")]
    Shape {
        expected: ValueKind,
        found: ValueKind,
    },

    /// String text could not cross the boundary in this direction
    /// (e.g. interior NUL on the way in, undecodable text on the way out).
    #[error("text conversion failed: {reason}")]
    Text { reason: String },
}

/// Object and call surface of an embedded foreign runtime
///
/// Exclusive access is assumed: the bridge serializes all use of a
/// runtime behind one critical section, so methods take `&mut self` and
/// implementations do not need internal locking.
pub trait ForeignRuntime: Send {
    // ----- construction (native → foreign) -----

    /// Create a foreign string from native text.
    ///
    /// Rejects text that cannot cross the boundary; interior NUL bytes
    /// are rejected by every backend so both backends agree on what is
    /// marshallable.
    fn intern_str(&mut self, text: &str) -> Result<RawObj, RuntimeError>;

    /// Create a foreign integer.
    fn new_int(&mut self, value: i64) -> Result<RawObj, RuntimeError>;

    /// Create a foreign float.
    fn new_float(&mut self, value: f64) -> Result<RawObj, RuntimeError>;

    /// Create a foreign byte string.
    fn new_bytes(&mut self, data: &[u8]) -> Result<RawObj, RuntimeError>;

    /// Create a foreign sequence with `len` placeholder elements, to be
    /// filled by `seq_set`.
    fn new_seq(&mut self, len: usize) -> Result<RawObj, RuntimeError>;

    /// Create an empty foreign mapping.
    fn new_map(&mut self) -> Result<RawObj, RuntimeError>;

    /// Package `arg` as the argument container for a single-argument
    /// call (a 1-tuple, in CPython terms). The container takes its own
    /// reference to `arg`.
    fn new_call_args(&mut self, arg: RawObj) -> Result<RawObj, RuntimeError>;

    // ----- container writes -----

    /// Set `seq[index] = item`. The sequence takes its own reference.
    fn seq_set(&mut self, seq: RawObj, index: usize, item: RawObj) -> Result<(), RuntimeError>;

    /// Set `map[key] = value`. The mapping takes its own references to
    /// both key and value.
    fn map_set(&mut self, map: RawObj, key: RawObj, value: RawObj) -> Result<(), RuntimeError>;

    // ----- resolution and invocation -----

    /// Load `module` and look up `function` in it, requiring a callable.
    fn load_function(&mut self, module: &str, function: &str) -> Result<RawObj, RuntimeError>;

    /// Call `function` with the argument container built by
    /// `new_call_args`. A raising callee maps to [`RuntimeError::Raised`].
    fn call(&mut self, function: RawObj, args: RawObj) -> Result<RawObj, RuntimeError>;

    // ----- reads (foreign → native) -----

    /// Classify a foreign value.
    fn kind(&self, value: RawObj) -> ValueKind;

    /// Length of a foreign sequence. Non-sequences are a `Shape` error.
    fn seq_len(&self, value: RawObj) -> Result<usize, RuntimeError>;

    /// Fetch `seq[index]` as a fresh reference owned by the caller.
    fn seq_get(&mut self, seq: RawObj, index: usize) -> Result<RawObj, RuntimeError>;

    /// Read a foreign string into native text.
    fn read_str(&self, value: RawObj) -> Result<String, RuntimeError>;

    /// Read a foreign integer. Floats are not silently truncated; a
    /// float here is a `Shape` error.
    fn read_int(&self, value: RawObj) -> Result<i64, RuntimeError>;

    // ----- release -----

    /// Give up the caller's reference to `value`. Exactly once per
    /// handed-out `RawObj`.
    fn release(&mut self, value: RawObj);
}
