//! Sequential four-codelet pipeline
//!
//! start -> load -> copy -> end, each stage waiting for the previous one.
//! `load` fills an array, `copy` copies it, `end` signals the runtime.
//! The pipeline is launched repeatedly and the mean run time printed.
//!
//! # Usage
//!
//! ```text
//! basic [clusters] [workers-per-cluster]
//! ```
//!
//! # Environment Variables
//!
//! - `CFL_TP_POLICY=pushfull` - Top-level policy (roundrobin, pushfull, static, dynamic, workpush)
//! - `CFL_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)
//! - `CFL_FLUSH_EPRINT=1` - Flush debug output immediately

use codeflow::{
    Codelet, ProcedureBuilder, Runtime, RuntimeConfig, SchedResult, Signal, ThreadedProcedure,
};
use codeflow::{kdebug, kinfo};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const INNER: u32 = 15;
const OUTER: u32 = 15;
const ARRAY_LENGTH: usize = 10_000;

#[derive(Default)]
struct Arrays {
    x: Mutex<Vec<i32>>,
    y: Mutex<Vec<i32>>,
}

fn pipeline(done: Arc<dyn Signal>) -> SchedResult<Arc<ThreadedProcedure>> {
    let data = Arc::new(Arrays::default());
    let mut b = ProcedureBuilder::new().named("basic");

    b.add(Codelet::new(0, |_| {}).named("start").signal(1));

    let d = data.clone();
    b.add(
        Codelet::new(1, move |_| {
            let mut x = d.x.lock().unwrap_or_else(|e| e.into_inner());
            x.extend(0..ARRAY_LENGTH as i32);
        })
        .named("load")
        .signal(2),
    );

    let d = data.clone();
    b.add(
        Codelet::new(1, move |_| {
            let x = d.x.lock().unwrap_or_else(|e| e.into_inner());
            let mut y = d.y.lock().unwrap_or_else(|e| e.into_inner());
            y.extend_from_slice(&x);
        })
        .named("copy")
        .signal(3),
    );

    b.add(
        Codelet::new(1, move |ctx| {
            let y = data.y.lock().unwrap_or_else(|e| e.into_inner());
            kdebug!("{} copied {} elements", ctx.procedure().id(), y.len());
        })
        .named("end")
        .signal_to(done),
    );

    b.build()
}

fn arg(n: usize) -> Option<usize> {
    std::env::args().nth(n).and_then(|s| s.parse().ok())
}

// CFL_LOG_LEVEL=debug cargo run -p codeflow-basic -- 1 2
fn main() {
    println!("=== codeflow basic pipeline ===\n");

    let mut config = RuntimeConfig::from_env();
    if let Some(c) = arg(1) {
        config = config.num_clusters(c);
    }
    if let Some(w) = arg(2) {
        config = config.workers_per_cluster(w);
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
        // Warm-up run, not timed
        if let Err(e) = rt.run(pipeline) {
            eprintln!("run failed: {}", e);
            std::process::exit(1);
        }
        let mut inner = Duration::ZERO;
        for _ in 0..INNER {
            let start = Instant::now();
            if let Err(e) = rt.run(pipeline) {
                eprintln!("run failed: {}", e);
                std::process::exit(1);
            }
            inner += start.elapsed();
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
