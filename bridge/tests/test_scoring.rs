//! Integration tests for the scoring facade
//!
//! These run the full path (marshal, invoke, unmarshal) against the
//! instrumented stub runtime with the reference scoring functions.

use pod_scoring_bridge_rs::{
    encode_batch, BridgeConfig, BridgeError, PodMetrics, PodScore, PodScorer, StubRuntime,
    StubValue, KEY_POD_NAME,
};

/// The canonical two-pod batch used throughout: ln(56.6834) truncates
/// to 4, so the idle pod scores 40 and each queued request costs 10_000.
fn canonical_batch() -> Vec<PodMetrics> {
    vec![
        PodMetrics::new("pod-busy", 56.6834, 3)
            .with_adapters(vec!["adapter-1".to_string(), "adapter-2".to_string()]),
        PodMetrics::new("pod-idle", 56.6834, 0),
    ]
}

fn reference_scorer() -> PodScorer {
    PodScorer::start(StubRuntime::with_reference_scorer(), BridgeConfig::default()).unwrap()
}

#[test]
fn test_reference_scores_match_known_values() {
    let scorer = reference_scorer();
    let scores = scorer.score(&canonical_batch()).unwrap();

    assert_eq!(
        scores,
        vec![
            PodScore::new("pod-idle", 40),
            PodScore::new("pod-busy", -29_960),
        ]
    );
}

#[test]
fn test_empty_batch_scores_empty() {
    let scorer = reference_scorer();
    assert_eq!(scorer.score(&[]).unwrap(), vec![]);
}

#[test]
fn test_single_pod_batch() {
    let scorer = reference_scorer();
    let scores = scorer.score(&[PodMetrics::new("only", 2.0, 1)]).unwrap();
    // ln(2) truncates to 0; one queued request costs 10_000.
    assert_eq!(scores, vec![PodScore::new("only", -10_000)]);
}

#[test]
fn test_repeated_scoring_is_deterministic() {
    let runtime = StubRuntime::with_reference_scorer();
    let counters = runtime.counters();
    let scorer = PodScorer::start(runtime, BridgeConfig::default()).unwrap();

    let first = scorer.score(&canonical_batch()).unwrap();
    let second = scorer.score(&canonical_batch()).unwrap();

    assert_eq!(first, second);
    assert_eq!(counters.calls(), 2);
}

#[test]
fn test_result_order_is_the_functions_order() {
    // A function that returns pods in reverse input order, unscored;
    // the bridge must pass that order through untouched.
    let mut runtime = StubRuntime::new();
    runtime.define("podscore", "select_pod", |batch: &StubValue| {
        let pods = batch.as_seq().ok_or("expected a sequence")?;
        let pairs: Vec<StubValue> = pods
            .iter()
            .rev()
            .map(|pod| -> Result<StubValue, String> {
                let name = pod.get_str(KEY_POD_NAME).ok_or("missing pod_name")?;
                Ok(StubValue::Seq(vec![
                    StubValue::Str(name.to_string()),
                    StubValue::Int(0),
                ]))
            })
            .collect::<Result<_, _>>()?;
        Ok(StubValue::Seq(pairs))
    });
    let scorer = PodScorer::start(runtime, BridgeConfig::default()).unwrap();

    let scores = scorer.score(&canonical_batch()).unwrap();
    assert_eq!(scores[0].pod_name, "pod-idle");
    assert_eq!(scores[1].pod_name, "pod-busy");
}

#[test]
fn test_result_may_cover_a_subset_of_the_batch() {
    // A shortlisting function: returns only its favorite pod.
    let mut runtime = StubRuntime::new();
    runtime.define("podscore", "select_pod", |_: &StubValue| {
        Ok(StubValue::Seq(vec![StubValue::Seq(vec![
            StubValue::Str("pod-idle".to_string()),
            StubValue::Int(40),
        ])]))
    });
    let scorer = PodScorer::start(runtime, BridgeConfig::default()).unwrap();

    let scores = scorer.score(&canonical_batch()).unwrap();
    assert_eq!(scores, vec![PodScore::new("pod-idle", 40)]);
}

#[test]
fn test_fixed_ranking_passes_through_unchanged() {
    // A function that ignores the metrics and returns a fixed ranking;
    // zero utilization marshals fine when nothing takes its logarithm.
    let mut runtime = StubRuntime::new();
    runtime.define("podscore", "select_pod", |_: &StubValue| {
        Ok(StubValue::Seq(vec![
            StubValue::Seq(vec![
                StubValue::Str("pod2".to_string()),
                StubValue::Int(10),
            ]),
            StubValue::Seq(vec![
                StubValue::Str("pod1".to_string()),
                StubValue::Int(5),
            ]),
        ]))
    });
    let scorer = PodScorer::start(runtime, BridgeConfig::default()).unwrap();

    let batch = vec![
        PodMetrics::new("pod1", 56.6834, 3).with_adapters(vec!["adapter-a".to_string()]),
        PodMetrics::new("pod2", 0.0, 0),
    ];
    let scores = scorer.score(&batch).unwrap();

    assert_eq!(
        scores,
        vec![PodScore::new("pod2", 10), PodScore::new("pod1", 5)]
    );
}

#[test]
fn test_adapters_are_visible_to_the_scoring_function() {
    // Score each pod by how many adapters it carries.
    let mut runtime = StubRuntime::new();
    runtime.define("podscore", "select_pod", |batch: &StubValue| {
        let pods = batch.as_seq().ok_or("expected a sequence")?;
        let pairs = pods
            .iter()
            .map(|pod| -> Result<StubValue, String> {
                let name = pod.get_str(KEY_POD_NAME).ok_or("missing pod_name")?;
                let adapters = pod
                    .get("adapters")
                    .and_then(|value| value.as_seq())
                    .ok_or("missing adapters")?;
                Ok(StubValue::Seq(vec![
                    StubValue::Str(name.to_string()),
                    StubValue::Int(adapters.len() as i64),
                ]))
            })
            .collect::<Result<_, _>>()?;
        Ok(StubValue::Seq(pairs))
    });
    let scorer = PodScorer::start(runtime, BridgeConfig::default()).unwrap();

    let scores = scorer.score(&canonical_batch()).unwrap();
    assert_eq!(
        scores,
        vec![PodScore::new("pod-busy", 2), PodScore::new("pod-idle", 0)]
    );
}

#[test]
fn test_serialized_transport_matches_object_path() {
    let scorer = reference_scorer();
    let batch = canonical_batch();

    let via_objects = scorer.score(&batch).unwrap();
    let payload = encode_batch(&batch).unwrap();
    let via_bytes = scorer.score_serialized(&payload).unwrap();

    assert_eq!(via_objects, via_bytes);
}

#[test]
fn test_invalid_batch_is_rejected_before_invocation() {
    let runtime = StubRuntime::with_reference_scorer();
    let counters = runtime.counters();
    let scorer = PodScorer::start(runtime, BridgeConfig::default()).unwrap();

    let batch = vec![PodMetrics::new("pod-a", f64::NAN, 0)];
    let err = scorer.score(&batch).unwrap_err();

    assert!(matches!(
        &err,
        BridgeError::Marshal { field, .. } if field == "kv_cache_util"
    ));
    assert_eq!(counters.calls(), 0);
}

#[test]
fn test_raising_function_surfaces_invocation_error() {
    let scorer = reference_scorer();

    // Zero utilization makes the reference function take ln(0).
    let batch = vec![PodMetrics::new("pod-a", 0.0, 0)];
    let err = scorer.score(&batch).unwrap_err();

    assert!(matches!(
        &err,
        BridgeError::Invocation { message, .. } if message.contains("math domain error")
    ));
}

#[test]
fn test_extreme_queue_depth_is_an_invocation_error() {
    let scorer = reference_scorer();

    // Passes batch validation (non-negative), but the queue penalty
    // leaves i64; the reference function raises instead of wrapping.
    let batch = vec![PodMetrics::new("pod-a", 2.0, 1_000_000_000_000_000)];
    let err = scorer.score(&batch).unwrap_err();

    assert!(matches!(
        &err,
        BridgeError::Invocation { message, .. } if message.contains("overflows")
    ));
}

#[test]
fn test_malformed_result_is_a_shape_error() {
    let mut runtime = StubRuntime::new();
    runtime.define("podscore", "select_pod", |_: &StubValue| {
        Ok(StubValue::Int(42))
    });
    let scorer = PodScorer::start(runtime, BridgeConfig::default()).unwrap();

    let err = scorer.score(&canonical_batch()).unwrap_err();
    assert_eq!(
        err,
        BridgeError::ResultShape {
            expected: "a sequence of (pod_name, score) pairs".to_string(),
            got: "integer".to_string(),
        }
    );
}

#[test]
fn test_custom_entry_point_names() {
    let mut runtime = StubRuntime::new();
    runtime.define("ranking", "pick", |_: &StubValue| {
        Ok(StubValue::Seq(vec![StubValue::Seq(vec![
            StubValue::Str("pod-x".to_string()),
            StubValue::Int(7),
        ])]))
    });
    let config = BridgeConfig::default()
        .with_module("ranking")
        .with_function("pick");
    let scorer = PodScorer::start(runtime, config).unwrap();

    let scores = scorer.score(&[PodMetrics::new("pod-x", 1.0, 0)]).unwrap();
    assert_eq!(scores, vec![PodScore::new("pod-x", 7)]);
}
