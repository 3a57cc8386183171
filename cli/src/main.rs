//! score-pods: exercise the scoring bridge against a synthetic fleet
//!
//! Generates a reproducible fleet of inference pods, scores it through
//! the bridge, and prints the best-ranked pods with timing. By default
//! the embedded stub runtime does the scoring; with the `pyo3` feature
//! built in, `--python` routes the same calls through the embedded
//! CPython interpreter instead.

use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};

use clap::Parser;
use uuid::Uuid;

use pod_scoring_bridge_rs::{
    encode_batch, BridgeConfig, BridgeError, PodMetrics, PodScorer, StubRuntime,
    DEFAULT_BYTES_FUNCTION, DEFAULT_FUNCTION, DEFAULT_MODULE,
};

#[cfg(feature = "pyo3")]
use pod_scoring_bridge_rs::PyRuntime;

mod rng;
use rng::FleetRng;

/// Score a synthetic inference-pod fleet through the scoring bridge
#[derive(Parser)]
#[command(name = "score-pods", version, about)]
struct Cli {
    /// Number of pods in the synthetic fleet
    #[arg(long, default_value_t = 1000)]
    pods: usize,

    /// Score only the first N pods of the fleet (default: all of it)
    #[arg(long)]
    batch: Option<usize>,

    /// LoRA adapters attached to each pod
    #[arg(long, default_value_t = 2)]
    adapters: usize,

    /// Number of scoring calls to run over the same fleet
    #[arg(long, default_value_t = 1)]
    calls: u32,

    /// How many of the best-ranked pods to print
    #[arg(long, default_value_t = 5)]
    top: usize,

    /// Fleet generation seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Foreign module holding the scoring functions
    #[arg(long, default_value = DEFAULT_MODULE)]
    module: String,

    /// Per-object scoring entry point
    #[arg(long, default_value = DEFAULT_FUNCTION)]
    function: String,

    /// Serialized-batch scoring entry point
    #[arg(long, default_value = DEFAULT_BYTES_FUNCTION)]
    bytes_function: String,

    /// Ship the batch as one JSON payload instead of per-pod objects
    #[arg(long)]
    json_bytes: bool,

    /// Give up queueing for runtime access after this many milliseconds
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Score through the embedded CPython interpreter (needs the pyo3
    /// feature built in)
    #[arg(long)]
    python: bool,

    /// Directory to prepend to the interpreter's module search path;
    /// repeatable
    #[arg(long = "py-path")]
    py_path: Vec<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), BridgeError> {
    let mut config = BridgeConfig::default()
        .with_module(cli.module.clone())
        .with_function(cli.function.clone())
        .with_bytes_function(cli.bytes_function.clone());
    if let Some(ms) = cli.deadline_ms {
        config = config.with_admission_deadline(Duration::from_millis(ms));
    }

    let fleet = synthetic_fleet(&cli);
    let batch = &fleet[..cli.batch.unwrap_or(fleet.len()).min(fleet.len())];
    let scorer = build_scorer(&cli, config)?;

    let transport = if cli.json_bytes { "json-bytes" } else { "objects" };
    let backend = if cli.python { "python" } else { "stub" };
    println!(
        "scoring {} of {} pods x {} calls ({} transport, {} backend, seed {})",
        batch.len(),
        fleet.len(),
        cli.calls,
        transport,
        backend,
        cli.seed,
    );

    let started = Instant::now();
    let mut scores = Vec::new();
    for _ in 0..cli.calls {
        scores = if cli.json_bytes {
            let payload = encode_batch(batch)?;
            scorer.score_serialized(&payload)?
        } else {
            scorer.score(batch)?
        };
    }
    let elapsed = started.elapsed();

    println!(
        "done in {:.2?} ({:.2?} per call)",
        elapsed,
        elapsed / cli.calls.max(1)
    );
    println!("top {} of {} scored pods:", cli.top.min(scores.len()), scores.len());
    for entry in scores.iter().take(cli.top) {
        println!("  {:>8}  {}", entry.score, entry.pod_name);
    }

    scorer.stop()
}

/// Generate the synthetic fleet; fully determined by the seed
fn synthetic_fleet(cli: &Cli) -> Vec<PodMetrics> {
    let mut rng = FleetRng::new(cli.seed);
    (0..cli.pods)
        .map(|index| {
            let adapters = (0..cli.adapters)
                .map(|_| {
                    let id = Uuid::from_u64_pair(rng.next(), rng.next());
                    format!("adapter-{id}")
                })
                .collect();
            PodMetrics::new(
                format!("pod-{index:04}"),
                rng.utilization(),
                rng.range(0, 10),
            )
            .with_adapters(adapters)
        })
        .collect()
}

fn build_scorer(cli: &Cli, config: BridgeConfig) -> Result<PodScorer, BridgeError> {
    if !cli.python {
        return PodScorer::start(StubRuntime::with_reference_scorer(), config);
    }
    python_scorer(&cli.py_path, config)
}

#[cfg(feature = "pyo3")]
fn python_scorer(paths: &[PathBuf], config: BridgeConfig) -> Result<PodScorer, BridgeError> {
    let runtime = PyRuntime::with_search_paths(paths)?;
    PodScorer::start(runtime, config)
}

#[cfg(not(feature = "pyo3"))]
fn python_scorer(_paths: &[PathBuf], _config: BridgeConfig) -> Result<PodScorer, BridgeError> {
    Err(BridgeError::RuntimeInit {
        reason: "this binary was built without the pyo3 feature; rebuild with --features pyo3"
            .to_string(),
    })
}
