//! hetsched — run a Monte-Carlo pi workload on a simulated heterogeneous machine.
//!
//! 全タスクの後に制御ジョブを一つ置き、その callback で推定値を出す。
//! 最後に統計スナップショットとワーカーごとのレポートを JSON で出力する。

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use hetsched_core::domain::{ArchKind, Codelet, ExecContext, Job};
use hetsched_core::observability::{SchedStats, WorkerReport};
use hetsched_core::{Caller, JobGraph, MachineConfig, PolicyRegistry, SchedConf, Scheduler, WorkerPool};

// ── CLI ─────────────────────────────────────────────────────────────

/// Heterogeneous task scheduler demo.
#[derive(Parser, Debug)]
#[command(name = "hetsched", version, about)]
struct Cli {
    /// Scheduling policy (`help` lists them).
    #[arg(long, env = "SCHED")]
    sched: Option<String>,

    /// CPU workers.
    #[arg(long, default_value_t = 4)]
    ncpus: usize,

    /// Simulated CUDA workers.
    #[arg(long, default_value_t = 0)]
    ncuda: usize,

    /// Simulated SPU workers.
    #[arg(long, default_value_t = 0)]
    nspus: usize,

    /// Number of sampling tasks.
    #[arg(long, default_value_t = 64)]
    tasks: u64,

    /// Points sampled per task.
    #[arg(long, default_value_t = 100_000)]
    samples: u64,

    /// Spin instead of parking idle workers.
    #[arg(long)]
    busy_poll: bool,

    /// Scheduler configuration (JSON).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Give up waiting after this many seconds.
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,

    /// Print the available policies and exit.
    #[arg(long)]
    list_policies: bool,
}

#[derive(Serialize)]
struct Summary {
    estimate: f64,
    stats: SchedStats,
    workers: Vec<WorkerReport>,
}

fn load_conf(cli: &Cli) -> Result<SchedConf> {
    let mut conf = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            SchedConf::from_json(&raw).with_context(|| format!("invalid config {}", path.display()))?
        }
        None => SchedConf::default(),
    };
    if let Some(name) = &cli.sched {
        conf.policy_name = Some(name.clone());
    }
    if cli.busy_poll {
        conf.blocking = false;
    }
    Ok(conf)
}

fn sample(ctx: &ExecContext<'_>, hits: &AtomicU64) {
    let samples = ctx.cl_arg["samples"].as_u64().unwrap_or(0);
    let seed = ctx.cl_arg["seed"].as_u64().unwrap_or(0);
    let mut rng = StdRng::seed_from_u64(seed);

    let inside = (0..samples)
        .filter(|_| {
            let x: f64 = rng.gen_range(-1.0..1.0);
            let y: f64 = rng.gen_range(-1.0..1.0);
            x * x + y * y <= 1.0
        })
        .count() as u64;
    hits.fetch_add(inside, Ordering::Relaxed);
}

fn pi_codelet(hits: &Arc<AtomicU64>) -> Arc<Codelet> {
    let cl = ArchKind::ALL
        .into_iter()
        .fold(Codelet::new("monte_carlo_pi"), |cl, arch| {
            let hits = Arc::clone(hits);
            cl.with_kernel(arch, move |ctx| sample(ctx, &hits))
        });
    Arc::new(cl)
}

fn estimate(hits: &AtomicU64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    4.0 * hits.load(Ordering::Relaxed) as f64 / total as f64
}

/// Submit the sampling tasks plus one control job that waits for all of them.
fn submit_workload(sched: &Scheduler, cli: &Cli, hits: &Arc<AtomicU64>) -> Result<()> {
    let cl = pi_codelet(hits);
    let mut graph = JobGraph::new();

    let total = cli.tasks * cli.samples;
    let done = {
        let hits = Arc::clone(hits);
        graph.add(
            Job::control()
                .callback(move |_| info!(estimate = estimate(&hits, total), "all samples in"))
                .build(),
        )
    };

    for seed in 0..cli.tasks {
        let job = Job::builder(cl.clone())
            .cl_arg(serde_json::json!({ "samples": cli.samples, "seed": seed }))
            .build();
        let id = graph.add(job);
        graph.add_dependency(done, id)?;
    }

    graph
        .submit(sched, Caller::External)
        .context("failed to submit workload")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG が無ければ info
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.list_policies {
        println!("{}", PolicyRegistry::builtin().help());
        return Ok(());
    }

    let conf = load_conf(&cli)?;
    let machine = MachineConfig::new()
        .with_cpus(cli.ncpus)
        .with_cuda(cli.ncuda)
        .with_spus(cli.nspus);
    info!(
        cpus = cli.ncpus,
        cuda = cli.ncuda,
        spus = cli.nspus,
        tasks = cli.tasks,
        "starting"
    );

    let sched = Arc::new(
        Scheduler::builder(machine)
            .conf(conf)
            .build()
            .context("failed to build scheduler")?,
    );
    let pool = WorkerPool::spawn(Arc::clone(&sched)).context("failed to spawn workers")?;

    let hits = Arc::new(AtomicU64::new(0));
    submit_workload(&sched, &cli, &hits)?;

    // wait_all はブロッキングなので専用スレッドで待つ
    let waiter = {
        let sched = Arc::clone(&sched);
        tokio::task::spawn_blocking(move || sched.wait_all())
    };
    let timeout = Duration::from_secs(cli.timeout_secs);
    match tokio::time::timeout(timeout, waiter).await {
        Ok(joined) => joined.context("wait task failed")?,
        Err(_) => warn!(timeout_secs = cli.timeout_secs, "jobs still running at timeout"),
    }

    let stats = sched.stats();
    let workers = tokio::task::spawn_blocking(move || pool.shutdown_and_join())
        .await
        .context("worker join failed")?;

    let summary = Summary {
        estimate: estimate(&hits, cli.tasks * cli.samples),
        stats,
        workers,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
