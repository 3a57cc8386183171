//! In-memory runtime backend with instrumentation
//!
//! `StubRuntime` implements [`ForeignRuntime`] over a plain object table,
//! with callees registered as Rust closures. It exists so the whole call
//! path (key interning, batch marshalling, invocation, result reading,
//! release) runs and is observable without an embedded interpreter.
//!
//! The stub ships in all builds: callers can use it as a no-interpreter
//! scoring backend, and the test suite uses its [`StubCounters`] to
//! assert leak-freedom and cache behavior.
//!
//! The object table has value semantics: containers own copies of their
//! elements, and `seq_get` hands out a fresh copy under a fresh handle.
//! That is all the reference-ownership contract requires, and it makes
//! over-release and use-after-release loud (the table entry is gone, so
//! the stub panics instead of reading freed state).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::marshal::{KEY_KV_CACHE_UTIL, KEY_POD_NAME, KEY_QUEUE_COUNT};
use crate::metrics::PodMetrics;
use crate::runtime::{ForeignRuntime, RawObj, RuntimeError, ValueKind};
use crate::scorer::{DEFAULT_BYTES_FUNCTION, DEFAULT_FUNCTION, DEFAULT_MODULE};

/// A value living in the stub's object table
#[derive(Debug, Clone, PartialEq)]
pub enum StubValue {
    /// Placeholder for a pre-sized sequence slot not yet written
    Unit,
    Str(String),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Seq(Vec<StubValue>),
    /// Insertion-ordered string-keyed mapping
    Map(Vec<(String, StubValue)>),
}

impl StubValue {
    /// Sequence elements, if this is a sequence
    pub fn as_seq(&self) -> Option<&[StubValue]> {
        match self {
            StubValue::Seq(items) => Some(items),
            _ => None,
        }
    }

    /// Mapping lookup, if this is a mapping
    pub fn get(&self, key: &str) -> Option<&StubValue> {
        match self {
            StubValue::Map(entries) => entries
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    /// Mapping lookup returning a string value
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            StubValue::Str(text) => Some(text),
            _ => None,
        }
    }

    /// Mapping lookup returning a float value
    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            StubValue::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Mapping lookup returning an integer value
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            StubValue::Int(value) => Some(*value),
            _ => None,
        }
    }
}

/// A callee registered with the stub: one positional argument in, one
/// value out, `Err(message)` to model a raising function.
pub type StubCallee = Box<dyn FnMut(&StubValue) -> Result<StubValue, String> + Send>;

/// Shared instrumentation for a [`StubRuntime`]
///
/// Clone the `Arc` out of [`StubRuntime::counters`] before handing the
/// runtime to the bridge; the counters stay readable after the runtime
/// has been moved and even after it has been torn down.
#[derive(Debug, Default)]
pub struct StubCounters {
    created: AtomicU64,
    released: AtomicU64,
    cold_loads: AtomicU64,
    calls: AtomicU64,
}

impl StubCounters {
    /// Total references handed out
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    /// Total references given back
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    /// References currently outstanding
    pub fn live(&self) -> u64 {
        self.created() - self.released()
    }

    /// Number of `load_function` attempts (cache misses reach here,
    /// cache hits do not)
    pub fn cold_loads(&self) -> u64 {
        self.cold_loads.load(Ordering::SeqCst)
    }

    /// Number of foreign calls dispatched
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// What a table slot holds
#[derive(Debug)]
enum Stored {
    Value(StubValue),
    Callable { module: String, function: String },
}

/// In-memory [`ForeignRuntime`] backend
pub struct StubRuntime {
    objects: HashMap<u64, Stored>,
    next_handle: u64,
    functions: HashMap<(String, String), StubCallee>,
    counters: Arc<StubCounters>,
}

impl Default for StubRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl StubRuntime {
    /// Create an empty stub with no callees registered
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            next_handle: 1,
            functions: HashMap::new(),
            counters: Arc::new(StubCounters::default()),
        }
    }

    /// Create a stub with the reference scoring functions registered
    /// under the default module and function names
    ///
    /// # Example
    /// ```
    /// use pod_scoring_bridge_rs::{BridgeConfig, PodMetrics, PodScorer, StubRuntime};
    ///
    /// let scorer = PodScorer::start(StubRuntime::with_reference_scorer(),
    ///                               BridgeConfig::default()).unwrap();
    /// let batch = vec![PodMetrics::new("pod-a", 56.6834, 0)];
    /// let scores = scorer.score(&batch).unwrap();
    /// assert_eq!(scores[0].score, 40);
    /// ```
    pub fn with_reference_scorer() -> Self {
        let mut stub = Self::new();
        stub.define(DEFAULT_MODULE, DEFAULT_FUNCTION, reference_scorer);
        stub.define(DEFAULT_MODULE, DEFAULT_BYTES_FUNCTION, reference_scorer_json);
        stub
    }

    /// Register (or replace) a callee under `module`.`function`
    pub fn define<F>(&mut self, module: &str, function: &str, callee: F)
    where
        F: FnMut(&StubValue) -> Result<StubValue, String> + Send + 'static,
    {
        self.functions
            .insert((module.to_string(), function.to_string()), Box::new(callee));
    }

    /// Instrumentation handle; survives the runtime itself
    pub fn counters(&self) -> Arc<StubCounters> {
        Arc::clone(&self.counters)
    }

    fn insert(&mut self, entry: Stored) -> RawObj {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.objects.insert(handle, entry);
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        RawObj::new(handle)
    }

    fn stored(&self, handle: RawObj) -> &Stored {
        match self.objects.get(&handle.value()) {
            Some(entry) => entry,
            None => panic!(
                "foreign object handle {} used after release (or never issued)",
                handle.value()
            ),
        }
    }

    fn value_of(&self, handle: RawObj) -> &StubValue {
        match self.stored(handle) {
            Stored::Value(value) => value,
            Stored::Callable { module, function } => {
                panic!("handle to callable {module}.{function} used where a value was expected")
            }
        }
    }

    fn kind_of(stored: &Stored) -> ValueKind {
        match stored {
            Stored::Callable { .. } => ValueKind::Fn,
            Stored::Value(StubValue::Unit) => ValueKind::Other,
            Stored::Value(StubValue::Str(_)) => ValueKind::Str,
            Stored::Value(StubValue::Int(_)) => ValueKind::Int,
            Stored::Value(StubValue::Float(_)) => ValueKind::Float,
            Stored::Value(StubValue::Bytes(_)) => ValueKind::Bytes,
            Stored::Value(StubValue::Seq(_)) => ValueKind::Seq,
            Stored::Value(StubValue::Map(_)) => ValueKind::Map,
        }
    }
}

impl ForeignRuntime for StubRuntime {
    fn intern_str(&mut self, text: &str) -> Result<RawObj, RuntimeError> {
        if text.contains('\0') {
            return Err(RuntimeError::Text {
                reason: "interior NUL byte".to_string(),
            });
        }
        Ok(self.insert(Stored::Value(StubValue::Str(text.to_string()))))
    }

    fn new_int(&mut self, value: i64) -> Result<RawObj, RuntimeError> {
        Ok(self.insert(Stored::Value(StubValue::Int(value))))
    }

    fn new_float(&mut self, value: f64) -> Result<RawObj, RuntimeError> {
        Ok(self.insert(Stored::Value(StubValue::Float(value))))
    }

    fn new_bytes(&mut self, data: &[u8]) -> Result<RawObj, RuntimeError> {
        Ok(self.insert(Stored::Value(StubValue::Bytes(data.to_vec()))))
    }

    fn new_seq(&mut self, len: usize) -> Result<RawObj, RuntimeError> {
        Ok(self.insert(Stored::Value(StubValue::Seq(vec![StubValue::Unit; len]))))
    }

    fn new_map(&mut self) -> Result<RawObj, RuntimeError> {
        Ok(self.insert(Stored::Value(StubValue::Map(Vec::new()))))
    }

    fn new_call_args(&mut self, arg: RawObj) -> Result<RawObj, RuntimeError> {
        let value = self.value_of(arg).clone();
        Ok(self.insert(Stored::Value(StubValue::Seq(vec![value]))))
    }

    fn seq_set(&mut self, seq: RawObj, index: usize, item: RawObj) -> Result<(), RuntimeError> {
        let value = self.value_of(item).clone();
        match self.objects.get_mut(&seq.value()) {
            Some(Stored::Value(StubValue::Seq(items))) if index < items.len() => {
                items[index] = value;
                Ok(())
            }
            Some(_) => panic!("seq_set target is not a sequence with index {index}"),
            None => panic!("seq_set on a released handle"),
        }
    }

    fn map_set(&mut self, map: RawObj, key: RawObj, value: RawObj) -> Result<(), RuntimeError> {
        let key_text = match self.value_of(key) {
            StubValue::Str(text) => text.clone(),
            other => panic!("mapping key must be a string, got {other:?}"),
        };
        let value = self.value_of(value).clone();
        match self.objects.get_mut(&map.value()) {
            Some(Stored::Value(StubValue::Map(entries))) => {
                match entries.iter_mut().find(|(name, _)| *name == key_text) {
                    Some(entry) => entry.1 = value,
                    None => entries.push((key_text, value)),
                }
                Ok(())
            }
            Some(_) => panic!("map_set target is not a mapping"),
            None => panic!("map_set on a released handle"),
        }
    }

    fn load_function(&mut self, module: &str, function: &str) -> Result<RawObj, RuntimeError> {
        self.counters.cold_loads.fetch_add(1, Ordering::SeqCst);
        let key = (module.to_string(), function.to_string());
        if !self.functions.contains_key(&key) {
            let known_module = self.functions.keys().any(|(name, _)| name == module);
            let reason = if known_module {
                format!("module has no attribute '{function}'")
            } else {
                format!("module '{module}' not found")
            };
            return Err(RuntimeError::Resolve {
                module: key.0,
                function: key.1,
                reason,
            });
        }
        Ok(self.insert(Stored::Callable {
            module: key.0,
            function: key.1,
        }))
    }

    fn call(&mut self, function: RawObj, args: RawObj) -> Result<RawObj, RuntimeError> {
        let key = match self.stored(function) {
            Stored::Callable { module, function } => (module.clone(), function.clone()),
            Stored::Value(_) => panic!("call target handle does not name a callable"),
        };
        // Single positional argument convention: unwrap the container
        // the way an interpreter unpacks a 1-tuple.
        let arg = match self.value_of(args) {
            StubValue::Seq(items) if items.len() == 1 => items[0].clone(),
            other => panic!("argument handle is not a 1-element container, got {other:?}"),
        };
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        let callee = self
            .functions
            .get_mut(&key)
            .expect("callable was registered when its handle was issued");
        match callee(&arg) {
            Ok(value) => Ok(self.insert(Stored::Value(value))),
            Err(message) => Err(RuntimeError::Raised {
                message,
                traceback: None,
            }),
        }
    }

    fn kind(&self, value: RawObj) -> ValueKind {
        Self::kind_of(self.stored(value))
    }

    fn seq_len(&self, value: RawObj) -> Result<usize, RuntimeError> {
        match self.stored(value) {
            Stored::Value(StubValue::Seq(items)) => Ok(items.len()),
            other => Err(RuntimeError::Shape {
                expected: ValueKind::Seq,
                found: Self::kind_of(other),
            }),
        }
    }

    fn seq_get(&mut self, seq: RawObj, index: usize) -> Result<RawObj, RuntimeError> {
        let item = match self.stored(seq) {
            Stored::Value(StubValue::Seq(items)) => match items.get(index) {
                Some(item) => item.clone(),
                None => panic!("seq_get index {index} out of range"),
            },
            other => {
                return Err(RuntimeError::Shape {
                    expected: ValueKind::Seq,
                    found: Self::kind_of(other),
                })
            }
        };
        Ok(self.insert(Stored::Value(item)))
    }

    fn read_str(&self, value: RawObj) -> Result<String, RuntimeError> {
        match self.stored(value) {
            Stored::Value(StubValue::Str(text)) => Ok(text.clone()),
            other => Err(RuntimeError::Shape {
                expected: ValueKind::Str,
                found: Self::kind_of(other),
            }),
        }
    }

    fn read_int(&self, value: RawObj) -> Result<i64, RuntimeError> {
        match self.stored(value) {
            Stored::Value(StubValue::Int(value)) => Ok(*value),
            other => Err(RuntimeError::Shape {
                expected: ValueKind::Int,
                found: Self::kind_of(other),
            }),
        }
    }

    fn release(&mut self, value: RawObj) {
        match self.objects.remove(&value.value()) {
            Some(_) => {
                self.counters.released.fetch_add(1, Ordering::SeqCst);
            }
            None => panic!(
                "foreign object handle {} released twice (or never issued)",
                value.value()
            ),
        }
    }
}

// ===== Reference scoring functions =====

/// Reference scoring function, the stub twin of `podscore.select_pod`
///
/// Scores each pod as `trunc(ln(kv_cache_util)) * 10 - 10_000 * queue_count`
/// and returns `(pod_name, score)` pairs ranked best-first (stable for
/// ties). A non-positive `kv_cache_util` raises, exactly as a logarithm
/// would in the interpreter. A score outside the 64-bit range also
/// raises; the interpreter returns a bignum there, which the bridge
/// rejects as a malformed result either way.
pub fn reference_scorer(batch: &StubValue) -> Result<StubValue, String> {
    let pods = batch
        .as_seq()
        .ok_or("select_pod expects a sequence of pod mappings")?;
    let mut records = Vec::with_capacity(pods.len());
    for pod in pods {
        let name = pod
            .get_str(KEY_POD_NAME)
            .ok_or("pod mapping is missing 'pod_name'")?;
        let util = pod
            .get_float(KEY_KV_CACHE_UTIL)
            .ok_or("pod mapping is missing 'kv_cache_util'")?;
        let depth = pod
            .get_int(KEY_QUEUE_COUNT)
            .ok_or("pod mapping is missing 'queue_count'")?;
        records.push((name.to_string(), util, depth));
    }
    Ok(scores_to_value(rank_pods(&records)?))
}

/// Reference bulk-transport scoring function, the stub twin of
/// `podscore.select_pod_json`: decodes a JSON byte payload, then ranks
/// exactly like [`reference_scorer`].
pub fn reference_scorer_json(payload: &StubValue) -> Result<StubValue, String> {
    let raw = match payload {
        StubValue::Bytes(data) => data,
        _ => return Err("select_pod_json expects a byte payload".to_string()),
    };
    let pods: Vec<PodMetrics> =
        serde_json::from_slice(raw).map_err(|err| format!("invalid metrics payload: {err}"))?;
    let records: Vec<(String, f64, i64)> = pods
        .into_iter()
        .map(|pod| (pod.pod_name, pod.kv_cache_util, pod.queue_count))
        .collect();
    Ok(scores_to_value(rank_pods(&records)?))
}

fn rank_pods(records: &[(String, f64, i64)]) -> Result<Vec<(String, i64)>, String> {
    let mut scored = Vec::with_capacity(records.len());
    for (name, util, depth) in records {
        if *util <= 0.0 {
            // What math.log raises on a non-positive argument.
            return Err("math domain error".to_string());
        }
        // int() truncates toward zero, so trunc, not floor. The queue
        // penalty can exceed i64 for extreme depths; raise rather than
        // wrap or panic.
        let base = (util.ln().trunc() as i64) * 10;
        let score = depth
            .checked_mul(-10_000)
            .and_then(|penalty| base.checked_add(penalty))
            .ok_or("score overflows a 64-bit integer")?;
        scored.push((name.clone(), score));
    }
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(scored)
}

fn scores_to_value(scored: Vec<(String, i64)>) -> StubValue {
    StubValue::Seq(
        scored
            .into_iter()
            .map(|(name, score)| StubValue::Seq(vec![StubValue::Str(name), StubValue::Int(score)]))
            .collect(),
    )
}
