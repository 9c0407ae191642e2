//! Example demonstrating a managed pool against a line-protocol backend
//!
//! This example shows how to:
//! 1. Start a pool over several endpoints, one of which is down
//! 2. Send commands through the retry executor
//! 3. Run custom units of work on a pooled connection
//! 4. Feed topology updates and inspect endpoint health and pool statistics
//!
//! A tiny in-process server stands in for the backend.

use dialpool::pool::{AcquireMode, PoolConfig, StatsFn};
use dialpool::{LineConnector, Manager, PoolError};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Answer PING, ECHO and INCR; everything else is an error reply
async fn spawn_backend() -> std::io::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();

    tokio::spawn(async move {
        let counter = Arc::new(std::sync::atomic::AtomicU64::new(0));
        while let Ok((socket, _)) = listener.accept().await {
            let counter = Arc::clone(&counter);
            tokio::spawn(async move {
                let (read, mut write) = socket.into_split();
                let mut lines = BufReader::new(read).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let reply = match line.split_once(' ') {
                        _ if line == "PING" => "+PONG".to_string(),
                        _ if line == "INCR" => {
                            let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                            format!("+{}", n)
                        }
                        Some(("ECHO", text)) => format!("+{}", text),
                        _ => format!("-ERR unknown command '{}'", line),
                    };
                    if write.write_all(format!("{}\r\n", reply).as_bytes()).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    Ok(addr)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let live = spawn_backend().await?;
    // Nothing listens here, so dials fail and the endpoint is voted down
    let dead = "127.0.0.1:1".to_string();

    let config = PoolConfig {
        pool_size: 4,
        max_connections: 8,
        acquire_mode: AcquireMode::Timeout,
        wait_timeout: Duration::from_millis(50),
        max_retries: 2,
        keep_silent: true,
        ..PoolConfig::default()
    };

    let stats: StatsFn = Arc::new(|op, elapsed, err| match err {
        None => info!(op = %op, elapsed_us = elapsed.as_micros() as u64, "op ok"),
        Some(err) => warn!(op = %op, error = %err, "op failed"),
    });

    let manager = Manager::builder([dead.clone(), live.clone()], LineConnector)
        .name("demo")
        .config(config)
        .stats(stats)
        .build()
        .await?;

    println!("=== Startup ===");
    println!("{}", serde_json::to_string_pretty(&manager.stats())?);
    for endpoint in manager.endpoints() {
        println!("  {} healthy={}", endpoint.addr, endpoint.healthy);
    }

    println!("\n=== Commands ===");
    println!("PING -> {}", manager.command("PING").await?);
    println!("ECHO -> {}", manager.command("ECHO hello pool").await?);
    match manager.command("FLUSHALL").await {
        Err(PoolError::Operation(err)) => println!("FLUSHALL rejected: {}", err),
        other => println!("FLUSHALL -> {:?}", other),
    }

    println!("\n=== Custom unit of work ===");
    let (first, second) = manager
        .run("INCR2", |conn| {
            Box::pin(async move {
                let first = conn.request("INCR").await?;
                let second = conn.request("INCR").await?;
                Ok::<_, anyhow::Error>((first, second))
            })
        })
        .await?;
    println!("INCR twice on one connection: {} then {}", first, second);

    println!("\n=== Concurrent load ===");
    let manager = Arc::new(manager);
    let mut handles = Vec::new();
    for i in 0..16 {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            manager.command(&format!("ECHO task-{}", i)).await
        }));
    }
    let mut ok = 0;
    for handle in handles {
        if handle.await?.is_ok() {
            ok += 1;
        }
    }
    println!("{} of 16 concurrent commands succeeded", ok);
    println!("{}", serde_json::to_string_pretty(&manager.stats())?);

    println!("\n=== Topology update ===");
    let (tx, rx) = mpsc::channel(4);
    let watcher = manager.watch_topology(rx);
    tx.send(vec![live.clone(), "127.0.0.1:2".to_string()]).await?;
    drop(tx);
    watcher.await?;
    for endpoint in manager.endpoints() {
        println!("  {} healthy={}", endpoint.addr, endpoint.healthy);
    }

    let closed = manager.shutdown();
    println!("\nShut down, closed {} idle connections", closed);

    Ok(())
}
