//! Host-owned runtime state: startup and teardown
//!
//! The host core owns the three things that live as long as the bridge:
//! the runtime itself, the interned mapping keys, and the resolver's
//! handle cache. Startup interns the keys and eagerly resolves the
//! configured scoring function, so a bad deployment fails at
//! [`crate::PodScorer::start`] rather than on the first scoring call.
//! Teardown gives every host-owned reference back, exactly once, as the
//! last operation against the runtime.

use std::fmt;

use crate::error::BridgeError;
use crate::marshal::{KEY_ADAPTERS, KEY_KV_CACHE_UTIL, KEY_POD_NAME, KEY_QUEUE_COUNT};
use crate::resolver::FunctionResolver;
use crate::runtime::{ForeignRuntime, RawObj};
use crate::scorer::BridgeConfig;

/// The four interned mapping keys, created once at startup
///
/// Every marshalled pod mapping reuses these handles instead of
/// re-interning the key strings per call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct KeyRing {
    pub(crate) pod_name: RawObj,
    pub(crate) adapters: RawObj,
    pub(crate) kv_cache_util: RawObj,
    pub(crate) queue_count: RawObj,
}

impl KeyRing {
    /// Intern all four keys; on failure nothing stays behind
    pub(crate) fn intern(runtime: &mut dyn ForeignRuntime) -> Result<Self, BridgeError> {
        let mut interned: Vec<RawObj> = Vec::with_capacity(4);
        for key in [KEY_POD_NAME, KEY_ADAPTERS, KEY_KV_CACHE_UTIL, KEY_QUEUE_COUNT] {
            match runtime.intern_str(key) {
                Ok(handle) => interned.push(handle),
                Err(err) => {
                    for handle in interned {
                        runtime.release(handle);
                    }
                    return Err(BridgeError::RuntimeInit {
                        reason: format!("cannot intern mapping key '{key}': {err}"),
                    });
                }
            }
        }
        Ok(Self {
            pod_name: interned[0],
            adapters: interned[1],
            kv_cache_util: interned[2],
            queue_count: interned[3],
        })
    }

    /// Give all four key references back
    pub(crate) fn release(self, runtime: &mut dyn ForeignRuntime) {
        for handle in [
            self.pod_name,
            self.adapters,
            self.kv_cache_util,
            self.queue_count,
        ] {
            runtime.release(handle);
        }
    }
}

/// Everything the bridge owns between start and stop
pub(crate) struct HostCore {
    pub(crate) runtime: Box<dyn ForeignRuntime>,
    pub(crate) keys: KeyRing,
    pub(crate) resolver: FunctionResolver,
}

impl fmt::Debug for HostCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCore")
            .field("keys", &self.keys)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl HostCore {
    /// Bring up host state over a freshly constructed runtime
    ///
    /// Interns the mapping keys, then eagerly resolves the configured
    /// scoring function. Any failure releases whatever was created and
    /// surfaces as the matching error variant ([`BridgeError::RuntimeInit`]
    /// for key interning, [`BridgeError::Resolution`] for the eager
    /// resolve).
    pub(crate) fn start(
        mut runtime: Box<dyn ForeignRuntime>,
        config: &BridgeConfig,
    ) -> Result<Self, BridgeError> {
        let keys = KeyRing::intern(runtime.as_mut())?;
        let mut resolver = FunctionResolver::new();
        if let Err(err) = resolver.resolve(runtime.as_mut(), &config.module, &config.function) {
            keys.release(runtime.as_mut());
            return Err(err);
        }
        Ok(Self {
            runtime,
            keys,
            resolver,
        })
    }

    /// Release every host-owned reference; the final runtime operation
    pub(crate) fn teardown(&mut self) {
        self.resolver.release_all(self.runtime.as_mut());
        self.keys.release(self.runtime.as_mut());
    }
}
