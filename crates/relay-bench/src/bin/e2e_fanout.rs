//! End-to-end fan-out benchmark for the DnDex relay.
//!
//! Connects N clients to one room of a running relay and measures how many
//! relayed messages arrive per second with real network I/O.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8787/";
const ROOM: &str = "benchmark";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args
        .get(2)
        .cloned()
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());

    println!("DnDex relay end-to-end fan-out benchmark");
    println!("  Server:  {url} (start it with: cargo run --release -p dndex-relay-server)");
    println!("  Clients: {num_clients}, room: {ROOM}");
    println!("  Warmup:  {WARMUP_SECS}s, measurement: {BENCH_SECS}s");
    println!();

    let received = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let handles: Vec<_> = (0..num_clients)
        .map(|client_id| {
            let received = Arc::clone(&received);
            let barrier = Arc::clone(&barrier);
            let url = url.clone();
            tokio::spawn(async move {
                if let Err(e) = run_client(client_id, &url, received, barrier).await {
                    eprintln!("Client {} error: {}", client_id, e);
                }
            })
        })
        .collect();

    barrier.wait().await;
    println!("All {num_clients} clients joined {ROOM}");

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    received.store(0, Ordering::SeqCst);
    let start = Instant::now();
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total = received.load(Ordering::SeqCst);
    let per_sec = total as f64 / elapsed.as_secs_f64();

    println!();
    println!("Results");
    println!("  Duration:           {:>12.2}s", elapsed.as_secs_f64());
    println!("  Messages delivered: {:>12}", total);
    println!("  Throughput:         {:>12.0} msg/s", per_sec);
    println!("  Per client:         {:>12.0} msg/s", per_sec / num_clients as f64);

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    client_id: usize,
    url: &str,
    received: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    let join = json!({"type": "join", "room": ROOM, "name": format!("bench-{client_id}")});
    sender.send(Message::Text(join.to_string())).await?;

    // Wait for the join acknowledgement
    while let Some(msg) = receiver.next().await {
        if let Message::Text(text) = msg? {
            if text.contains("\"joined\"") {
                break;
            }
        }
    }

    barrier.wait().await;

    let message = Message::Text(
        json!({"type": "move", "from": client_id, "to": [3, 4]}).to_string(),
    );

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Text(_)) {
                received.fetch_add(1, Ordering::Relaxed);
            }
        }
    });

    loop {
        if sender.send(message.clone()).await.is_err() {
            break;
        }
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
