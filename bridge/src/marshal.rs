//! Conversion between native records and foreign values
//!
//! Outbound, a `&[PodMetrics]` becomes one foreign sequence of mappings,
//! one mapping per pod, keyed by the `KEY_*` constants below. Inbound,
//! the scoring function's return value is read back as a sequence of
//! `(pod_name, score)` pairs; anything else is a
//! [`BridgeError::ResultShape`].
//!
//! Validation happens before any foreign object is created: empty or
//! duplicate pod names, non-finite utilization and negative queue counts
//! are rejected as [`BridgeError::Marshal`] with the offending field
//! named. Text that cannot cross the boundary (interior NUL) is caught
//! by the runtime's encode step mid-build; the scope guards make that
//! exit leak-free like any other.
//!
//! The serialized bulk transport ([`encode_batch`]) applies the same
//! validation, then emits the batch as JSON bytes for a
//! decode-on-the-foreign-side scoring function.

use std::collections::HashSet;
use std::fmt::Display;

use crate::error::BridgeError;
use crate::host::KeyRing;
use crate::metrics::{PodMetrics, PodScore};
use crate::runtime::RuntimeError;
use crate::scope::{CallScope, ObjRef};

/// Mapping key for the pod identifier
pub const KEY_POD_NAME: &str = "pod_name";
/// Mapping key for the adapter name list
pub const KEY_ADAPTERS: &str = "adapters";
/// Mapping key for KV-cache utilization
pub const KEY_KV_CACHE_UTIL: &str = "kv_cache_util";
/// Mapping key for the queue depth
pub const KEY_QUEUE_COUNT: &str = "queue_count";

fn marshal_err(field: &str, context: impl Display, err: RuntimeError) -> BridgeError {
    BridgeError::Marshal {
        field: field.to_string(),
        reason: format!("{context}: {err}"),
    }
}

fn shape_err(expected: &str, err: RuntimeError) -> BridgeError {
    let got = match err {
        RuntimeError::Shape { found, .. } => found.to_string(),
        RuntimeError::Text { reason } => format!("undecodable string ({reason})"),
        other => other.to_string(),
    };
    BridgeError::ResultShape {
        expected: expected.to_string(),
        got,
    }
}

/// Reject batches no scoring function should ever see
fn check_batch(batch: &[PodMetrics]) -> Result<(), BridgeError> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(batch.len());
    for (index, pod) in batch.iter().enumerate() {
        if pod.pod_name.is_empty() {
            return Err(BridgeError::Marshal {
                field: "pod_name".to_string(),
                reason: format!("batch index {index}: empty pod name"),
            });
        }
        if !seen.insert(pod.pod_name.as_str()) {
            return Err(BridgeError::Marshal {
                field: "pod_name".to_string(),
                reason: format!("duplicate pod name '{}'", pod.pod_name),
            });
        }
        if !pod.kv_cache_util.is_finite() {
            return Err(BridgeError::Marshal {
                field: "kv_cache_util".to_string(),
                reason: format!(
                    "pod '{}': must be finite, got {}",
                    pod.pod_name, pod.kv_cache_util
                ),
            });
        }
        if pod.queue_count < 0 {
            return Err(BridgeError::Marshal {
                field: "queue_count".to_string(),
                reason: format!(
                    "pod '{}': must be non-negative, got {}",
                    pod.pod_name, pod.queue_count
                ),
            });
        }
    }
    Ok(())
}

/// Build the foreign batch: one sequence of per-pod mappings
///
/// Per-pod object guards are dropped as each value is parked in its
/// container; only the outer sequence survives, owned by the caller's
/// scope.
pub(crate) fn to_foreign_batch<'s>(
    scope: &'s CallScope<'_>,
    keys: KeyRing,
    batch: &[PodMetrics],
) -> Result<ObjRef<'s>, BridgeError> {
    check_batch(batch)?;

    let pods = scope
        .new_seq(batch.len())
        .map_err(|e| marshal_err("batch", "sequence allocation", e))?;

    for (index, pod) in batch.iter().enumerate() {
        let ctx = format!("pod '{}'", pod.pod_name);

        let mapping = scope.new_map().map_err(|e| marshal_err("batch", &ctx, e))?;

        let name = scope
            .intern_str(&pod.pod_name)
            .map_err(|e| marshal_err("pod_name", format!("batch index {index}"), e))?;
        scope
            .map_set(&mapping, keys.pod_name, &name)
            .map_err(|e| marshal_err("pod_name", &ctx, e))?;
        drop(name);

        let adapters = scope
            .new_seq(pod.adapters.len())
            .map_err(|e| marshal_err("adapters", &ctx, e))?;
        for (slot, adapter) in pod.adapters.iter().enumerate() {
            let item = scope
                .intern_str(adapter)
                .map_err(|e| marshal_err("adapters", format!("{ctx} entry {slot}"), e))?;
            scope
                .seq_set(&adapters, slot, &item)
                .map_err(|e| marshal_err("adapters", &ctx, e))?;
        }
        scope
            .map_set(&mapping, keys.adapters, &adapters)
            .map_err(|e| marshal_err("adapters", &ctx, e))?;
        drop(adapters);

        let util = scope
            .new_float(pod.kv_cache_util)
            .map_err(|e| marshal_err("kv_cache_util", &ctx, e))?;
        scope
            .map_set(&mapping, keys.kv_cache_util, &util)
            .map_err(|e| marshal_err("kv_cache_util", &ctx, e))?;
        drop(util);

        let depth = scope
            .new_int(pod.queue_count)
            .map_err(|e| marshal_err("queue_count", &ctx, e))?;
        scope
            .map_set(&mapping, keys.queue_count, &depth)
            .map_err(|e| marshal_err("queue_count", &ctx, e))?;
        drop(depth);

        scope
            .seq_set(&pods, index, &mapping)
            .map_err(|e| marshal_err("batch", &ctx, e))?;
    }

    Ok(pods)
}

/// Wrap an already-serialized batch payload as a foreign byte string
pub(crate) fn to_foreign_payload<'s>(
    scope: &'s CallScope<'_>,
    payload: &[u8],
) -> Result<ObjRef<'s>, BridgeError> {
    scope
        .new_bytes(payload)
        .map_err(|e| marshal_err("payload", "byte transfer", e))
}

/// Serialize a batch for the bulk transport
///
/// Applies the same validation as the per-object path, then encodes the
/// records as a JSON array. The output is what
/// [`crate::PodScorer::score_serialized`] expects, and what
/// `select_pod_json` decodes on the foreign side.
///
/// # Example
/// ```
/// use pod_scoring_bridge_rs::marshal::encode_batch;
/// use pod_scoring_bridge_rs::PodMetrics;
///
/// let payload = encode_batch(&[PodMetrics::new("pod-a", 2.5, 1)]).unwrap();
/// assert!(payload.starts_with(b"[{"));
/// ```
pub fn encode_batch(batch: &[PodMetrics]) -> Result<Vec<u8>, BridgeError> {
    check_batch(batch)?;
    serde_json::to_vec(batch).map_err(|err| BridgeError::Marshal {
        field: "batch".to_string(),
        reason: format!("serialization failed: {err}"),
    })
}

/// Read the scoring function's return value back into native records
///
/// Expected shape: a sequence of 2-element sequences, element 0 a
/// string, element 1 an integer. Order is preserved exactly as the
/// function returned it.
pub(crate) fn from_foreign_result(
    scope: &CallScope<'_>,
    result: &ObjRef<'_>,
) -> Result<Vec<PodScore>, BridgeError> {
    const RESULT_SHAPE: &str = "a sequence of (pod_name, score) pairs";
    const PAIR_SHAPE: &str = "a (pod_name, score) pair";

    let count = scope
        .seq_len(result)
        .map_err(|e| shape_err(RESULT_SHAPE, e))?;

    let mut scores = Vec::with_capacity(count);
    for index in 0..count {
        let pair = scope
            .seq_get(result, index)
            .map_err(|e| shape_err(PAIR_SHAPE, e))?;
        let arity = scope.seq_len(&pair).map_err(|e| shape_err(PAIR_SHAPE, e))?;
        if arity != 2 {
            return Err(BridgeError::ResultShape {
                expected: PAIR_SHAPE.to_string(),
                got: format!("{arity}-element sequence"),
            });
        }

        let name = scope
            .seq_get(&pair, 0)
            .map_err(|e| shape_err("a string pod name", e))?;
        let pod_name = scope
            .read_str(&name)
            .map_err(|e| shape_err("a string pod name", e))?;

        let value = scope
            .seq_get(&pair, 1)
            .map_err(|e| shape_err("an integer score", e))?;
        let score = scope
            .read_int(&value)
            .map_err(|e| shape_err("an integer score", e))?;

        scores.push(PodScore { pod_name, score });
    }
    Ok(scores)
}
