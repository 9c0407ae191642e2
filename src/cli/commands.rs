use crate::cli::args::OutputFormat;
use crate::core::{Manager, PoolStats};
use crate::lb::Endpoint;
use crate::net::LineConnector;
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub cluster: String,
    pub healthy: usize,
    pub endpoints: Vec<Endpoint>,
    pub stats: PoolStats,
}

/// Latency distribution in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencySummary {
    pub min_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl LatencySummary {
    /// Summarize samples, or `None` when there are none
    pub fn from_samples(samples: &mut [Duration]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        samples.sort_unstable();

        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        let percentile = |p: f64| {
            let rank = ((samples.len() as f64 * p).ceil() as usize).clamp(1, samples.len());
            ms(samples[rank - 1])
        };
        let total: Duration = samples.iter().sum();

        Some(Self {
            min_ms: ms(samples[0]),
            mean_ms: ms(total) / samples.len() as f64,
            p50_ms: percentile(0.50),
            p99_ms: percentile(0.99),
            max_ms: ms(samples[samples.len() - 1]),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub command: String,
    pub requests: usize,
    pub concurrency: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failure counts keyed by error message
    pub errors: BTreeMap<String, usize>,
    pub elapsed_ms: u128,
    pub requests_per_sec: f64,
    pub latency: Option<LatencySummary>,
    pub stats: PoolStats,
}

#[derive(Default)]
struct WorkerResult {
    latencies: Vec<Duration>,
    errors: BTreeMap<String, usize>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_stats(stats: &PoolStats) {
    println!(
        "Pool: {} idle / {} capacity, {} live / {} max, {} connected at startup",
        stats.idle, stats.capacity, stats.active, stats.max_connections, stats.connected
    );
}

/// Report fill result, endpoint health and pool statistics
pub async fn cmd_check(manager: &Manager<LineConnector>, format: OutputFormat) -> Result<()> {
    let endpoints = manager.endpoints();
    let report = CheckReport {
        cluster: manager.name().to_string(),
        healthy: endpoints.iter().filter(|e| e.healthy).count(),
        endpoints,
        stats: manager.stats(),
    };

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            println!("Cluster: {}", report.cluster);
            println!(
                "Endpoints: {} of {} healthy",
                report.healthy,
                report.endpoints.len()
            );
            for endpoint in &report.endpoints {
                let state = if endpoint.healthy { "up" } else { "DOWN" };
                println!(
                    "  {:<30} {:<5} failures={}",
                    endpoint.addr, state, endpoint.failures
                );
            }
            print_stats(&report.stats);
        }
    }

    Ok(())
}

/// Run `requests` commands from `concurrency` workers sharing one manager
pub async fn cmd_bench(
    manager: Arc<Manager<LineConnector>>,
    requests: usize,
    concurrency: usize,
    command: &str,
    format: OutputFormat,
) -> Result<()> {
    let issued = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let mut handles = Vec::with_capacity(concurrency);
    for worker in 0..concurrency {
        let manager = Arc::clone(&manager);
        let issued = Arc::clone(&issued);
        let command = command.to_string();

        handles.push(tokio::spawn(async move {
            let mut result = WorkerResult::default();
            while issued.fetch_add(1, Ordering::SeqCst) < requests {
                let sent = Instant::now();
                match manager.command(&command).await {
                    Ok(_) => result.latencies.push(sent.elapsed()),
                    Err(err) => *result.errors.entry(err.to_string()).or_insert(0) += 1,
                }
            }
            debug!(
                worker = worker,
                ok = result.latencies.len(),
                "Bench worker finished"
            );
            result
        }));
    }

    let mut latencies = Vec::with_capacity(requests);
    let mut errors: BTreeMap<String, usize> = BTreeMap::new();
    for handle in handles {
        let result = handle.await?;
        latencies.extend(result.latencies);
        for (message, count) in result.errors {
            *errors.entry(message).or_insert(0) += count;
        }
    }
    let elapsed = start.elapsed();

    let succeeded = latencies.len();
    let report = BenchReport {
        command: command.to_string(),
        requests,
        concurrency,
        succeeded,
        failed: errors.values().sum(),
        errors,
        elapsed_ms: elapsed.as_millis(),
        requests_per_sec: requests as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        latency: LatencySummary::from_samples(&mut latencies),
        stats: manager.stats(),
    };

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            println!(
                "{} x {} with {} workers in {:.2}s ({:.0} req/s)",
                report.requests,
                report.command,
                report.concurrency,
                elapsed.as_secs_f64(),
                report.requests_per_sec
            );
            println!("Succeeded: {}  Failed: {}", report.succeeded, report.failed);
            for (message, count) in &report.errors {
                println!("  {:>6}  {}", count, message);
            }
            if let Some(latency) = &report.latency {
                println!(
                    "Latency: min {:.2}ms  mean {:.2}ms  p50 {:.2}ms  p99 {:.2}ms  max {:.2}ms",
                    latency.min_ms, latency.mean_ms, latency.p50_ms, latency.p99_ms, latency.max_ms
                );
            }
            print_stats(&report.stats);
        }
    }

    Ok(())
}
