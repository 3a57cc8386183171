//! Pod metrics and scoring records
//!
//! The two record types that cross the scoring boundary:
//! - `PodMetrics` describes one inference pod (in)
//! - `PodScore` is one scored pod (out)
//!
//! Field names are part of the wire contract: the foreign scoring function
//! looks pods up by exactly these keys, and the serialized bulk transport
//! emits them as JSON keys. Renaming a field here is a breaking change.

use serde::{Deserialize, Serialize};

/// Metrics snapshot for a single inference pod
///
/// # Example
/// ```
/// use pod_scoring_bridge_rs::PodMetrics;
///
/// let pod = PodMetrics::new("pod-a", 56.7, 3)
///     .with_adapters(vec!["adapter-1".to_string()]);
/// assert_eq!(pod.pod_name, "pod-a");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodMetrics {
    /// Pod identifier, unique within a batch
    pub pod_name: String,

    /// Names of the LoRA adapters currently loaded on the pod
    #[serde(default)]
    pub adapters: Vec<String>,

    /// KV-cache utilization. Finite; the reference scoring function
    /// additionally requires it to be positive (it takes a logarithm).
    pub kv_cache_util: f64,

    /// Number of requests queued on the pod (non-negative)
    pub queue_count: i64,
}

impl PodMetrics {
    /// Create a metrics record with no adapters
    pub fn new(pod_name: impl Into<String>, kv_cache_util: f64, queue_count: i64) -> Self {
        Self {
            pod_name: pod_name.into(),
            adapters: Vec::new(),
            kv_cache_util,
            queue_count,
        }
    }

    /// Attach adapter names (builder style)
    pub fn with_adapters(mut self, adapters: Vec<String>) -> Self {
        self.adapters = adapters;
        self
    }
}

/// One scored pod, as produced by the foreign scoring function
///
/// The bridge does not reorder results: whatever order the scoring
/// function returns (the reference function ranks best-first) is the
/// order callers see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodScore {
    /// Pod identifier, echoed back from the input batch
    pub pod_name: String,

    /// Integer score; higher is better under the reference function
    pub score: i64,
}

impl PodScore {
    /// Create a score record
    pub fn new(pod_name: impl Into<String>, score: i64) -> Self {
        Self {
            pod_name: pod_name.into(),
            score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_json_field_names() {
        let pod = PodMetrics::new("pod-1", 56.6834, 3)
            .with_adapters(vec!["a1".to_string(), "a2".to_string()]);
        let json = serde_json::to_value(&pod).unwrap();

        assert_eq!(json["pod_name"], "pod-1");
        assert_eq!(json["adapters"][1], "a2");
        assert_eq!(json["kv_cache_util"], 56.6834);
        assert_eq!(json["queue_count"], 3);
    }

    #[test]
    fn test_metrics_adapters_default_to_empty() {
        let json = r#"{"pod_name":"p","kv_cache_util":1.5,"queue_count":0}"#;
        let pod: PodMetrics = serde_json::from_str(json).unwrap();
        assert!(pod.adapters.is_empty());
    }

    #[test]
    fn test_score_round_trip() {
        let score = PodScore::new("pod-9", -10_000);
        let json = serde_json::to_string(&score).unwrap();
        let back: PodScore = serde_json::from_str(&json).unwrap();
        assert_eq!(back, score);
    }
}
