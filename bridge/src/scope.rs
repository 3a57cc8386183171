//! Per-call lifetime tracking for foreign objects
//!
//! Every scoring call creates a clutch of foreign objects (strings, a
//! mapping per pod, the batch sequence, the argument container, the
//! result and everything read out of it). All of them must be given back
//! to the runtime before the call returns, on success and on every
//! failure path alike.
//!
//! Instead of a hand-maintained list of deferred release calls, the
//! bridge leans on ownership: [`CallScope`] borrows the runtime for the
//! duration of one call, and every object handle it returns is wrapped
//! in an [`ObjRef`] guard that releases its reference exactly once when
//! dropped. The borrow checker then enforces the cleanup discipline at
//! compile time:
//!
//! - a guard cannot outlive its scope, so nothing leaks past the call;
//! - a guard is not `Copy` and its handle is private, so nothing can be
//!   released twice or used after release;
//! - early returns via `?` drop live guards like any other exit.
//!
//! Releasing a guard while a container still holds the object is safe:
//! containers take their own references on insert (see
//! [`crate::runtime::ForeignRuntime`]), so guards are routinely dropped
//! as soon as the value has been parked in its container.
//!
//! # Example
//! ```
//! use pod_scoring_bridge_rs::runtime::stub::StubRuntime;
//! use pod_scoring_bridge_rs::scope::CallScope;
//!
//! let mut runtime = StubRuntime::new();
//! let counters = runtime.counters();
//! {
//!     let scope = CallScope::new(&mut runtime);
//!     let name = scope.intern_str("pod-a").unwrap();
//!     assert_eq!(scope.read_str(&name).unwrap(), "pod-a");
//! } // guard and scope dropped; the reference is back with the runtime
//! assert_eq!(counters.live(), 0);
//! ```

use std::cell::{Cell, RefCell};

use crate::runtime::{ForeignRuntime, RawObj, RuntimeError, ValueKind};

/// Release half of the scope, object-erased so that [`ObjRef`] needs
/// only one lifetime parameter.
trait ReleaseSink {
    fn release_raw(&self, raw: RawObj);
}

/// Tracks every foreign object created during one scoring call
///
/// The scope holds the exclusive runtime borrow for the call; all object
/// traffic goes through it so each handed-out reference gets a guard.
pub struct CallScope<'rt> {
    runtime: RefCell<&'rt mut dyn ForeignRuntime>,
    created: Cell<u64>,
    released: Cell<u64>,
}

/// Owned reference to one foreign object, released on drop
///
/// Obtained only from [`CallScope`] methods; there is no way to
/// duplicate one or to detach it from its scope.
pub struct ObjRef<'s> {
    raw: RawObj,
    sink: &'s dyn ReleaseSink,
}

impl std::fmt::Debug for ObjRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ObjRef").field(&self.raw).finish()
    }
}

impl ObjRef<'_> {
    /// The underlying handle, for passing back into runtime calls
    pub(crate) fn raw(&self) -> RawObj {
        self.raw
    }
}

impl Drop for ObjRef<'_> {
    fn drop(&mut self) {
        self.sink.release_raw(self.raw);
    }
}

impl ReleaseSink for CallScope<'_> {
    fn release_raw(&self, raw: RawObj) {
        self.released.set(self.released.get() + 1);
        self.runtime.borrow_mut().release(raw);
    }
}

impl<'rt> CallScope<'rt> {
    /// Open a scope over an exclusively borrowed runtime
    pub fn new(runtime: &'rt mut dyn ForeignRuntime) -> Self {
        Self {
            runtime: RefCell::new(runtime),
            created: Cell::new(0),
            released: Cell::new(0),
        }
    }

    fn adopt(&self, raw: RawObj) -> ObjRef<'_> {
        self.created.set(self.created.get() + 1);
        ObjRef { raw, sink: self }
    }

    // ----- construction -----

    /// Create a guarded foreign string
    pub fn intern_str(&self, text: &str) -> Result<ObjRef<'_>, RuntimeError> {
        let raw = self.runtime.borrow_mut().intern_str(text)?;
        Ok(self.adopt(raw))
    }

    /// Create a guarded foreign integer
    pub fn new_int(&self, value: i64) -> Result<ObjRef<'_>, RuntimeError> {
        let raw = self.runtime.borrow_mut().new_int(value)?;
        Ok(self.adopt(raw))
    }

    /// Create a guarded foreign float
    pub fn new_float(&self, value: f64) -> Result<ObjRef<'_>, RuntimeError> {
        let raw = self.runtime.borrow_mut().new_float(value)?;
        Ok(self.adopt(raw))
    }

    /// Create a guarded foreign byte string
    pub fn new_bytes(&self, data: &[u8]) -> Result<ObjRef<'_>, RuntimeError> {
        let raw = self.runtime.borrow_mut().new_bytes(data)?;
        Ok(self.adopt(raw))
    }

    /// Create a guarded pre-sized foreign sequence
    pub fn new_seq(&self, len: usize) -> Result<ObjRef<'_>, RuntimeError> {
        let raw = self.runtime.borrow_mut().new_seq(len)?;
        Ok(self.adopt(raw))
    }

    /// Create a guarded empty foreign mapping
    pub fn new_map(&self) -> Result<ObjRef<'_>, RuntimeError> {
        let raw = self.runtime.borrow_mut().new_map()?;
        Ok(self.adopt(raw))
    }

    /// Package a value as a single-argument call container
    pub fn new_call_args(&self, arg: &ObjRef<'_>) -> Result<ObjRef<'_>, RuntimeError> {
        let raw = self.runtime.borrow_mut().new_call_args(arg.raw())?;
        Ok(self.adopt(raw))
    }

    // ----- container writes -----

    /// `seq[index] = item`; the sequence takes its own reference
    pub fn seq_set(
        &self,
        seq: &ObjRef<'_>,
        index: usize,
        item: &ObjRef<'_>,
    ) -> Result<(), RuntimeError> {
        self.runtime
            .borrow_mut()
            .seq_set(seq.raw(), index, item.raw())
    }

    /// `map[key] = value` with a host-owned key (an interned field name)
    pub(crate) fn map_set(
        &self,
        map: &ObjRef<'_>,
        key: RawObj,
        value: &ObjRef<'_>,
    ) -> Result<(), RuntimeError> {
        self.runtime.borrow_mut().map_set(map.raw(), key, value.raw())
    }

    // ----- invocation -----

    /// Call a host-owned function handle; the result joins the scope
    pub(crate) fn call(&self, function: RawObj, args: &ObjRef<'_>) -> Result<ObjRef<'_>, RuntimeError> {
        let raw = self.runtime.borrow_mut().call(function, args.raw())?;
        Ok(self.adopt(raw))
    }

    // ----- reads -----

    /// Classify a scoped value
    pub fn kind(&self, value: &ObjRef<'_>) -> ValueKind {
        self.runtime.borrow().kind(value.raw())
    }

    /// Sequence length
    pub fn seq_len(&self, value: &ObjRef<'_>) -> Result<usize, RuntimeError> {
        self.runtime.borrow().seq_len(value.raw())
    }

    /// Fetch `seq[index]` as a fresh guarded reference
    pub fn seq_get(&self, seq: &ObjRef<'_>, index: usize) -> Result<ObjRef<'_>, RuntimeError> {
        let raw = self.runtime.borrow_mut().seq_get(seq.raw(), index)?;
        Ok(self.adopt(raw))
    }

    /// Read a foreign string
    pub fn read_str(&self, value: &ObjRef<'_>) -> Result<String, RuntimeError> {
        self.runtime.borrow().read_str(value.raw())
    }

    /// Read a foreign integer
    pub fn read_int(&self, value: &ObjRef<'_>) -> Result<i64, RuntimeError> {
        self.runtime.borrow().read_int(value.raw())
    }

    // ----- accounting -----

    /// References handed out by this scope so far
    pub fn created(&self) -> u64 {
        self.created.get()
    }

    /// References already given back
    pub fn released(&self) -> u64 {
        self.released.get()
    }

    /// References still outstanding (0 once all guards are dropped)
    pub fn live(&self) -> u64 {
        self.created.get() - self.released.get()
    }
}
