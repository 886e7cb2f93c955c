//! # Cache Client Benchmark Harness
//!
//! Purpose: Drive a store through the pooled client from several threads so
//! throughput and pool behavior can be compared over time.
//!
//! ## Design Principles
//! 1. **Deterministic Workload**: Each worker uses a fixed PRNG seed.
//! 2. **Setup Off the Hot Path**: Keys and payloads are built before timing.
//! 3. **Shared Pool**: All workers clone one client, so pool contention is
//!    part of what gets measured.
//!
//! Usage: `pcache-bench [addr] [workers] [ops_per_worker] [key_count]`

use std::env;
use std::hint::black_box;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use pcache_client::{CacheClient, CacheError, ClientConfig, Expiration};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_ADDR: &str = "127.0.0.1:6379";
const DEFAULT_WORKERS: usize = 8;
const DEFAULT_OPS: usize = 10_000;
const DEFAULT_KEY_COUNT: usize = 1 << 12;

struct BenchConfig {
    addr: String,
    workers: usize,
    ops: usize,
    key_count: usize,
}

impl BenchConfig {
    fn from_args() -> Self {
        let mut args = env::args().skip(1);
        let addr = args.next().unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let workers = parse_usize(args.next(), DEFAULT_WORKERS).max(1);
        let ops = parse_usize(args.next(), DEFAULT_OPS);
        let key_count = parse_usize(args.next(), DEFAULT_KEY_COUNT)
            .max(1)
            .next_power_of_two();

        BenchConfig {
            addr,
            workers,
            ops,
            key_count,
        }
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

/// XorShift keeps the workload reproducible without a PRNG dependency.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    #[inline]
    fn next_index(&mut self, mask: usize) -> usize {
        (self.next_u64() as usize) & mask
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    id: u64,
    name: String,
    tags: Vec<String>,
}

fn report(label: &str, ops: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let ops_per_sec = (ops as f64) / secs;
    let micros_per_op = (secs * 1e6) / (ops as f64);
    println!("{label}: {ops} ops in {secs:.3}s ({ops_per_sec:.0} ops/s, {micros_per_op:.1} us/op)");
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pcache_bench=info,pcache_client=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(err) = run() {
        eprintln!("pcache-bench failed: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let bench = BenchConfig::from_args();
    let config = ClientConfig {
        addr: bench.addr.clone(),
        max_active: bench.workers,
        max_idle: bench.workers,
        ..ClientConfig::default()
    };
    let client = CacheClient::with_config(config).context("invalid client config")?;
    client
        .ping()
        .with_context(|| format!("store at {} is unreachable", bench.addr))?;

    info!(
        addr = %bench.addr,
        workers = bench.workers,
        ops = bench.ops,
        keys = bench.key_count,
        "starting benchmark"
    );

    let keys: Vec<String> = (0..bench.key_count).map(|i| format!("bench:{i}")).collect();
    for (idx, key) in keys.iter().enumerate() {
        client.set(key, &payload(idx as u64), Expiration::Default)?;
    }

    let total = bench.workers * bench.ops;
    let start = Instant::now();
    run_workers(&client, &keys, &bench, |client, key, idx| {
        client.set(key, &payload(idx), Expiration::Default)
    })?;
    report("SET", total, start.elapsed());

    let start = Instant::now();
    run_workers(&client, &keys, &bench, |client, key, _| {
        match client.get::<Payload>(key) {
            Ok(value) => {
                black_box(value);
                Ok(())
            }
            Err(CacheError::CacheMiss) => Ok(()),
            Err(err) => Err(err),
        }
    })?;
    report("GET", total, start.elapsed());

    let stats = client.stats();
    println!(
        "pool: open={} idle={} active={} peak_active={} dialed={}",
        stats.open, stats.idle, stats.active, stats.peak_active, stats.dialed
    );
    Ok(())
}

fn run_workers<F>(
    client: &CacheClient,
    keys: &[String],
    bench: &BenchConfig,
    op: F,
) -> anyhow::Result<()>
where
    F: Fn(&CacheClient, &str, u64) -> Result<(), CacheError> + Sync,
{
    let mask = keys.len() - 1;
    thread::scope(|scope| {
        let handles: Vec<_> = (0..bench.workers)
            .map(|worker| {
                let op = &op;
                scope.spawn(move || -> Result<(), CacheError> {
                    let mut rng = XorShift64::new(0x1234_5678_9ABC_DEF0 ^ worker as u64);
                    for _ in 0..bench.ops {
                        let idx = rng.next_index(mask);
                        op(client, &keys[idx], idx as u64)?;
                    }
                    Ok(())
                })
            })
            .collect();

        for handle in handles {
            match handle.join() {
                Ok(result) => result.context("worker failed")?,
                Err(_) => anyhow::bail!("worker panicked"),
            }
        }
        Ok(())
    })
}

fn payload(id: u64) -> Payload {
    Payload {
        id,
        name: format!("item-{id}"),
        tags: vec!["bench".to_string(), format!("shard-{}", id % 16)],
    }
}
