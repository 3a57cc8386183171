//! Scoring-function resolution and handle cache
//!
//! Loading a foreign module and looking up an attribute is the slow,
//! fallible part of a call, so the resolver does it at most once per
//! `(module, function)` pair and keeps the callable handle for the life
//! of the host. Failed resolutions are not cached: once the missing
//! module is deployed, the next call retries the load and succeeds.

use std::collections::HashMap;

use crate::error::BridgeError;
use crate::runtime::{ForeignRuntime, RawObj, RuntimeError};

/// Cache of resolved callable handles, owned by the host core
#[derive(Debug, Default)]
pub struct FunctionResolver {
    cache: HashMap<(String, String), RawObj>,
}

impl FunctionResolver {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    /// Resolve `module.function` to a callable handle
    ///
    /// Warm path is a map lookup; cold path loads through the runtime
    /// and caches the handle on success only.
    ///
    /// # Errors
    /// [`BridgeError::Resolution`] when the module does not load, the
    /// attribute is absent, or the attribute is not callable.
    pub fn resolve(
        &mut self,
        runtime: &mut dyn ForeignRuntime,
        module: &str,
        function: &str,
    ) -> Result<RawObj, BridgeError> {
        let key = (module.to_string(), function.to_string());
        if let Some(&handle) = self.cache.get(&key) {
            return Ok(handle);
        }
        match runtime.load_function(module, function) {
            Ok(handle) => {
                self.cache.insert(key, handle);
                Ok(handle)
            }
            Err(RuntimeError::Resolve {
                module,
                function,
                reason,
            }) => Err(BridgeError::Resolution {
                module,
                function,
                reason,
            }),
            Err(other) => Err(BridgeError::Resolution {
                module: key.0,
                function: key.1,
                reason: other.to_string(),
            }),
        }
    }

    /// Number of handles currently cached
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Hand every cached handle back to the runtime (teardown path)
    pub fn release_all(&mut self, runtime: &mut dyn ForeignRuntime) {
        for (_, handle) in self.cache.drain() {
            runtime.release(handle);
        }
    }
}
