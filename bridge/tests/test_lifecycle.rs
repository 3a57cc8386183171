//! Lifecycle and admission gate tests
//!
//! Startup, stop, drop, and the one-caller-at-a-time discipline. The
//! slow-callee tests use a channel to know the foreign call is actually
//! in flight before the contending caller arrives.

use pod_scoring_bridge_rs::{
    BridgeConfig, BridgeError, PodMetrics, PodScorer, StubRuntime, StubValue,
};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn one_pod() -> Vec<PodMetrics> {
    vec![PodMetrics::new("pod-a", 56.6834, 0)]
}

#[test]
fn test_score_after_stop_fails_fast() {
    let scorer = PodScorer::start(StubRuntime::with_reference_scorer(), BridgeConfig::default())
        .unwrap();
    scorer.stop().unwrap();

    assert_eq!(scorer.score(&one_pod()).unwrap_err(), BridgeError::Stopped);
    assert_eq!(
        scorer.score_serialized(b"[]").unwrap_err(),
        BridgeError::Stopped
    );
}

#[test]
fn test_second_stop_reports_stopped() {
    let scorer = PodScorer::start(StubRuntime::with_reference_scorer(), BridgeConfig::default())
        .unwrap();
    scorer.stop().unwrap();
    assert_eq!(scorer.stop().unwrap_err(), BridgeError::Stopped);
}

#[test]
fn test_stop_then_drop_is_quiet() {
    let runtime = StubRuntime::with_reference_scorer();
    let counters = runtime.counters();
    let scorer = PodScorer::start(runtime, BridgeConfig::default()).unwrap();

    scorer.stop().unwrap();
    drop(scorer); // the backstop stop() observes Stopped and does nothing
    assert_eq!(counters.live(), 0);
}

#[test]
fn test_admission_deadline_bounds_queueing_only() {
    let mut runtime = StubRuntime::new();
    let (entered_tx, entered_rx) = mpsc::channel();
    runtime.define("podscore", "select_pod", move |_: &StubValue| {
        entered_tx.send(()).ok();
        thread::sleep(Duration::from_millis(300));
        Ok(StubValue::Seq(Vec::new()))
    });
    let config = BridgeConfig::default().with_admission_deadline(Duration::from_millis(50));
    let scorer = PodScorer::start(runtime, config).unwrap();
    let batch = one_pod();

    thread::scope(|s| {
        let inflight = s.spawn(|| scorer.score(&batch));
        entered_rx.recv().unwrap();

        // The core is held mid-call; this caller may queue for 50 ms.
        let err = scorer.score(&batch).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::QueueDeadline { waited_ms } if waited_ms >= 50
        ));

        // The in-flight call was never interrupted by the timeout.
        assert!(inflight.join().unwrap().is_ok());
    });
}

#[test]
fn test_deadline_does_not_bound_the_call_itself() {
    let mut runtime = StubRuntime::new();
    runtime.define("podscore", "select_pod", |_: &StubValue| {
        thread::sleep(Duration::from_millis(100));
        Ok(StubValue::Seq(Vec::new()))
    });
    let config = BridgeConfig::default().with_admission_deadline(Duration::from_millis(10));
    let scorer = PodScorer::start(runtime, config).unwrap();

    // No contention: admission is immediate and the slow call completes,
    // outliving its own admission deadline many times over.
    assert!(scorer.score(&one_pod()).is_ok());
}

#[test]
fn test_stop_waits_for_the_inflight_call() {
    let mut runtime = StubRuntime::new();
    let (entered_tx, entered_rx) = mpsc::channel();
    runtime.define("podscore", "select_pod", move |_: &StubValue| {
        entered_tx.send(()).ok();
        thread::sleep(Duration::from_millis(150));
        Ok(StubValue::Seq(Vec::new()))
    });
    let counters = runtime.counters();
    let scorer = PodScorer::start(runtime, BridgeConfig::default()).unwrap();
    let batch = one_pod();

    thread::scope(|s| {
        let inflight = s.spawn(|| scorer.score(&batch));
        entered_rx.recv().unwrap();

        // Teardown queues behind the call instead of cutting it short.
        scorer.stop().unwrap();
        assert!(inflight.join().unwrap().is_ok());
    });

    assert_eq!(counters.live(), 0);
}

#[test]
fn test_concurrent_callers_all_complete() {
    let runtime = StubRuntime::with_reference_scorer();
    let counters = runtime.counters();
    let scorer = PodScorer::start(runtime, BridgeConfig::default()).unwrap();
    let baseline = counters.live();

    thread::scope(|s| {
        for worker in 0i64..4 {
            let scorer = &scorer;
            s.spawn(move || {
                let batch = vec![PodMetrics::new(format!("pod-{worker}"), 56.6834, worker)];
                for _ in 0..5 {
                    scorer.score(&batch).unwrap();
                }
            });
        }
    });

    assert_eq!(counters.calls(), 20);
    assert_eq!(counters.live(), baseline);
}
