//! Streaming pipeline
//!
//! start -> load ==Fifo==> copy -> end. `load` pushes every element into a
//! stream link while `copy` pops them as they arrive, so the two run at
//! the same time on different micro schedulers. The link is wired by the
//! top-level scheduler the first time it pops `load`. `copy` stops at end
//! of stream, once `load` has finished and the Fifo is drained.
//!
//! # Usage
//!
//! ```text
//! stream [clusters] [workers-per-cluster]
//! ```
//!
//! Needs a policy that dispatches to micro schedulers (roundrobin,
//! pushfull or workpush) and at least two workers per cluster, otherwise
//! `load` fills the Fifo with nobody draining it.
//!
//! # Environment Variables
//!
//! - `CFL_FIFO_BACKEND=lockfree` - Stream backend (soft, lockfree, msgq)
//! - `CFL_FIFO_CAPACITY=64` - Fifo capacity
//! - `CFL_LOG_LEVEL=debug` - Set log level

use codeflow::{
    Codelet, FifoBackend, PopError, ProcedureBuilder, RetryPolicy, Runtime, RuntimeConfig, SchedError,
    SchedResult, Signal, StreamLink, ThreadedProcedure, TpPolicyKind,
};
use codeflow::{fatal, kdebug, kinfo, kwarn};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const INNER: u32 = 15;
const OUTER: u32 = 15;
const ARRAY_LENGTH: usize = 10_000;
const RUN_TIMEOUT: Duration = Duration::from_secs(30);

fn pipeline(backend: FifoBackend, done: Arc<dyn Signal>) -> SchedResult<Arc<ThreadedProcedure>> {
    let link = StreamLink::<i32>::new(backend);
    let y = Arc::new(Mutex::new(Vec::with_capacity(ARRAY_LENGTH)));
    let mut b = ProcedureBuilder::new().named("stream");

    b.add(Codelet::new(0, |_| {}).named("start").signal(1));

    let out = link.clone();
    b.add(
        Codelet::new(1, move |_| {
            let policy = RetryPolicy::default();
            for v in 0..ARRAY_LENGTH as i32 {
                if let Err(e) = out.push_retry(v, &policy) {
                    fatal!("load: push {}: {}", v, e);
                }
            }
        })
        .named("load")
        .produces(&link, 2),
    );

    let inp = link.clone();
    let dst = y.clone();
    b.add(
        Codelet::new(0, move |_| {
            let policy = RetryPolicy::default();
            let mut y = dst.lock().unwrap_or_else(|e| e.into_inner());
            loop {
                match inp.pop_retry(&policy) {
                    Ok(v) => y.push(v),
                    // load finished and everything it pushed has been copied
                    Err(PopError::Closed) => break,
                    Err(e) => fatal!("copy: pop {}: {}", y.len(), e),
                }
            }
        })
        .named("copy")
        .consumes(&link)
        .signal(3),
    );

    b.add(
        Codelet::new(1, move |ctx| {
            let y = y.lock().unwrap_or_else(|e| e.into_inner());
            if y.len() != ARRAY_LENGTH {
                fatal!("end: streamed {} of {} elements", y.len(), ARRAY_LENGTH);
            }
            kdebug!("{} streamed {} elements", ctx.procedure().id(), y.len());
        })
        .named("end")
        .signal_to(done),
    );

    b.build()
}

fn arg(n: usize) -> Option<usize> {
    std::env::args().nth(n).and_then(|s| s.parse().ok())
}

fn run_once(rt: &Runtime) -> SchedResult<()> {
    let backend = rt.config().fifo_backend;
    rt.run_timeout(move |done| pipeline(backend, done), RUN_TIMEOUT)
}

// CFL_FIFO_BACKEND=lockfree cargo run -p codeflow-stream -- 1 2
fn main() {
    println!("=== codeflow streaming pipeline ===\n");

    let mut config = RuntimeConfig::from_env();
    if let Some(c) = arg(1) {
        config = config.num_clusters(c);
    }
    if let Some(w) = arg(2) {
        config = config.workers_per_cluster(w);
    }
    if !config.tp_policy.needs_sub_schedulers() || config.workers_per_cluster < 2 {
        kwarn!(
            "{} with {} workers cannot overlap load and copy, using roundrobin x 2",
            config.tp_policy,
            config.workers_per_cluster
        );
        config = config.tp_policy(TpPolicyKind::RoundRobin).workers_per_cluster(2);
    }

    let mut rt = match Runtime::from_config(config) {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("runtime: {}", e);
            std::process::exit(1);
        }
    };
    rt.config().print();

    let mut total = Duration::ZERO;
    for _ in 0..OUTER {
        if let Err(e) = run_once(&rt) {
            eprintln!("run failed: {}", e);
            std::process::exit(1);
        }
        let mut inner = Duration::ZERO;
        for _ in 0..INNER {
            let start = Instant::now();
            match run_once(&rt) {
                Ok(()) => inner += start.elapsed(),
                Err(SchedError::Timeout) => {
                    eprintln!("pipeline stalled after {:?}", RUN_TIMEOUT);
                    std::process::exit(2);
                }
                Err(e) => {
                    eprintln!("run failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        total += inner / INNER;
    }

    kinfo!("{:?}", rt.stats());
    println!("mean run: {:?}", total / OUTER);
    if let Err(e) = rt.shutdown() {
        eprintln!("shutdown: {}", e);
    }
    println!("\n=== Example Complete ===");
}
