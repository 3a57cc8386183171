//! Scoring façade and runtime admission gate
//!
//! [`PodScorer`] is the one public entry point for scoring: it owns the
//! host core (runtime, interned keys, resolver cache) and serializes all
//! runtime access behind a checkout gate. One caller holds the core at a
//! time; everyone else queues on a condition variable. The configured
//! admission deadline bounds only that queueing time; an in-flight
//! foreign call is never interrupted.
//!
//! `stop()` (and `Drop`, as its backstop) waits its turn like any caller,
//! tears the host core down, and moves the gate to a terminal stopped
//! state; later calls fail fast with [`BridgeError::Stopped`].

use std::fmt;
use std::mem;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::BridgeError;
use crate::host::HostCore;
use crate::invoke;
use crate::marshal;
use crate::metrics::{PodMetrics, PodScore};
use crate::runtime::ForeignRuntime;
use crate::scope::CallScope;

/// Default foreign module searched for scoring functions
pub const DEFAULT_MODULE: &str = "podscore";
/// Default per-object scoring entry point
pub const DEFAULT_FUNCTION: &str = "select_pod";
/// Default serialized-batch scoring entry point
pub const DEFAULT_BYTES_FUNCTION: &str = "select_pod_json";

/// Bridge configuration
///
/// # Example
/// ```
/// use std::time::Duration;
/// use pod_scoring_bridge_rs::BridgeConfig;
///
/// let config = BridgeConfig::default()
///     .with_admission_deadline(Duration::from_millis(250));
/// assert_eq!(config.module, "podscore");
/// ```
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Foreign module to load the scoring functions from
    pub module: String,

    /// Function called by [`PodScorer::score`]
    pub function: String,

    /// Function called by [`PodScorer::score_serialized`]
    pub bytes_function: String,

    /// How long a caller may queue for runtime access before giving up
    /// with [`BridgeError::QueueDeadline`]. `None` waits indefinitely.
    pub admission_deadline: Option<Duration>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            module: DEFAULT_MODULE.to_string(),
            function: DEFAULT_FUNCTION.to_string(),
            bytes_function: DEFAULT_BYTES_FUNCTION.to_string(),
            admission_deadline: None,
        }
    }
}

impl BridgeConfig {
    /// Point both entry points at a different module
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    /// Use a different per-object scoring function
    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = function.into();
        self
    }

    /// Use a different serialized-batch scoring function
    pub fn with_bytes_function(mut self, function: impl Into<String>) -> Self {
        self.bytes_function = function.into();
        self
    }

    /// Bound queueing time for runtime access
    pub fn with_admission_deadline(mut self, deadline: Duration) -> Self {
        self.admission_deadline = Some(deadline);
        self
    }
}

/// Who currently has the host core
enum CoreSlot {
    /// Parked and ready for the next caller
    Ready(HostCore),
    /// Checked out by a caller running a scoring call
    InUse,
    /// Torn down; terminal
    Stopped,
}

struct SharedState {
    slot: Mutex<CoreSlot>,
    ready: Condvar,
}

impl SharedState {
    fn lock_slot(&self) -> MutexGuard<'_, CoreSlot> {
        // The slot is consistent on every lock release, so a poisoned
        // lock (a caller panicked while holding it) is safe to re-enter.
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Wait for the core, bounding queueing time by `deadline`
    fn checkout(&self, deadline: Option<Duration>) -> Result<CoreLease<'_>, BridgeError> {
        let started = Instant::now();
        let mut slot = self.lock_slot();
        loop {
            match mem::replace(&mut *slot, CoreSlot::InUse) {
                CoreSlot::Ready(core) => {
                    return Ok(CoreLease {
                        shared: self,
                        core: Some(core),
                    });
                }
                // Already in use; the InUse we just wrote changed nothing.
                CoreSlot::InUse => {}
                CoreSlot::Stopped => {
                    *slot = CoreSlot::Stopped;
                    return Err(BridgeError::Stopped);
                }
            }

            match deadline {
                None => {
                    slot = match self.ready.wait(slot) {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                }
                Some(limit) => {
                    let waited = started.elapsed();
                    if waited >= limit {
                        return Err(BridgeError::QueueDeadline {
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    slot = match self.ready.wait_timeout(slot, limit - waited) {
                        Ok((guard, _timed_out)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    };
                }
            }
        }
    }

    fn checkin(&self, core: HostCore) {
        let mut slot = self.lock_slot();
        *slot = CoreSlot::Ready(core);
        drop(slot);
        self.ready.notify_one();
    }

    fn mark_stopped(&self) {
        let mut slot = self.lock_slot();
        *slot = CoreSlot::Stopped;
        drop(slot);
        // Every queued waiter must wake and observe Stopped.
        self.ready.notify_all();
    }
}

/// Exclusive hold on the host core; returns it on drop, panic included
struct CoreLease<'a> {
    shared: &'a SharedState,
    core: Option<HostCore>,
}

impl CoreLease<'_> {
    fn core_mut(&mut self) -> &mut HostCore {
        self.core
            .as_mut()
            .expect("lease holds the core until dropped or retired")
    }

    /// Take the core out for teardown; the slot stays InUse until the
    /// caller marks it stopped.
    fn retire(mut self) -> HostCore {
        self.core
            .take()
            .expect("lease holds the core until dropped or retired")
    }
}

impl Drop for CoreLease<'_> {
    fn drop(&mut self) {
        if let Some(core) = self.core.take() {
            self.shared.checkin(core);
        }
    }
}

/// Scoring façade over an embedded foreign runtime
///
/// Construction is startup: the runtime is adopted, mapping keys are
/// interned and the configured scoring function is eagerly resolved.
/// There is no unstarted state to misuse. The scorer is `Sync`; share
/// it by reference across threads and calls are serialized internally.
///
/// # Example
/// ```
/// use pod_scoring_bridge_rs::{BridgeConfig, PodMetrics, PodScorer, StubRuntime};
///
/// let scorer = PodScorer::start(
///     StubRuntime::with_reference_scorer(),
///     BridgeConfig::default(),
/// ).unwrap();
///
/// let batch = vec![
///     PodMetrics::new("pod-busy", 56.6834, 3),
///     PodMetrics::new("pod-idle", 56.6834, 0),
/// ];
/// let scores = scorer.score(&batch).unwrap();
/// assert_eq!(scores[0].pod_name, "pod-idle"); // ranked best-first
///
/// scorer.stop().unwrap();
/// ```
pub struct PodScorer {
    shared: SharedState,
    config: BridgeConfig,
}

impl PodScorer {
    /// Adopt a runtime and bring the bridge up
    ///
    /// # Errors
    /// [`BridgeError::RuntimeInit`] if host startup state cannot be
    /// created, [`BridgeError::Resolution`] if the configured scoring
    /// function does not resolve.
    pub fn start<R>(runtime: R, config: BridgeConfig) -> Result<Self, BridgeError>
    where
        R: ForeignRuntime + 'static,
    {
        let core = HostCore::start(Box::new(runtime), &config)?;
        Ok(Self {
            shared: SharedState {
                slot: Mutex::new(CoreSlot::Ready(core)),
                ready: Condvar::new(),
            },
            config,
        })
    }

    /// Score a batch of pods via the per-object marshalling path
    ///
    /// Returns the scored pods in exactly the order the foreign function
    /// returned them. The result may cover fewer pods than the input;
    /// the bridge does not pad or reorder.
    ///
    /// # Errors
    /// [`BridgeError::Marshal`] for invalid batches,
    /// [`BridgeError::Invocation`] when the function raises,
    /// [`BridgeError::ResultShape`] for malformed returns,
    /// [`BridgeError::Stopped`] after `stop()`, and
    /// [`BridgeError::QueueDeadline`] when admission times out.
    pub fn score(&self, batch: &[PodMetrics]) -> Result<Vec<PodScore>, BridgeError> {
        let mut lease = self.shared.checkout(self.config.admission_deadline)?;
        let core = lease.core_mut();
        let function = core.resolver.resolve(
            core.runtime.as_mut(),
            &self.config.module,
            &self.config.function,
        )?;
        let keys = core.keys;

        let scope = CallScope::new(core.runtime.as_mut());
        let pods = marshal::to_foreign_batch(&scope, keys, batch)?;
        let result = invoke::call_scoring_fn(&scope, function, &pods)?;
        marshal::from_foreign_result(&scope, &result)
    }

    /// Score a batch already serialized by [`marshal::encode_batch`]
    ///
    /// The payload crosses the boundary as one byte string and is
    /// decoded by the configured `bytes_function` on the foreign side.
    /// Same result contract and error taxonomy as [`PodScorer::score`].
    pub fn score_serialized(&self, payload: &[u8]) -> Result<Vec<PodScore>, BridgeError> {
        let mut lease = self.shared.checkout(self.config.admission_deadline)?;
        let core = lease.core_mut();
        let function = core.resolver.resolve(
            core.runtime.as_mut(),
            &self.config.module,
            &self.config.bytes_function,
        )?;

        let scope = CallScope::new(core.runtime.as_mut());
        let pods = marshal::to_foreign_payload(&scope, payload)?;
        let result = invoke::call_scoring_fn(&scope, function, &pods)?;
        marshal::from_foreign_result(&scope, &result)
    }

    /// Tear the bridge down
    ///
    /// Waits for any in-flight call to finish (admission deadline does
    /// not apply here), releases every host-owned reference as the last
    /// runtime operation, then fails all queued and future calls with
    /// [`BridgeError::Stopped`]. Stopping twice returns
    /// [`BridgeError::Stopped`] from the second call.
    pub fn stop(&self) -> Result<(), BridgeError> {
        let lease = self.shared.checkout(None)?;
        let mut core = lease.retire();
        core.teardown();
        self.shared.mark_stopped();
        Ok(())
    }
}

impl fmt::Debug for PodScorer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PodScorer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Drop for PodScorer {
    /// Backstop teardown for scorers dropped without an explicit `stop()`
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
