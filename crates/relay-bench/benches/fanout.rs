//! Fan-out benchmarks for the relay.
//!
//! These benchmarks measure routing cost through the registry and router,
//! without any network I/O.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dndex_relay_core::connection::outbound_channel;
use dndex_relay_core::{ConnectionId, HeartbeatMonitor, OutboundReceiver, Registry, Router};

/// Register `members` connections and join them all to `room`.
fn populated(members: usize, room: &str) -> (Registry, Vec<(ConnectionId, OutboundReceiver)>) {
    let mut registry = Registry::new();
    let peers = (0..members)
        .map(|i| {
            let (tx, rx) = outbound_channel();
            let id = ConnectionId::new(format!("conn-{i}"));
            registry.register(id.clone(), tx);
            registry.join(&id, room);
            (id, rx)
        })
        .collect();
    (registry, peers)
}

fn drain(peers: &mut [(ConnectionId, OutboundReceiver)]) {
    for (_, rx) in peers.iter_mut() {
        while rx.try_recv().is_ok() {}
    }
}

/// Benchmark broadcast to rooms of increasing size.
fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");
    let router = Router::new();
    let frame = br#"{"type":"chat","name":"Mira","text":"the goblin flees north"}"#;

    for members in [2usize, 8, 32, 128] {
        let (mut registry, mut peers) = populated(members, "table");
        let sender = peers[0].0.clone();

        group.throughput(Throughput::Elements((members - 1) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(members), &members, |b, _| {
            b.iter(|| {
                let outcome = router.route(&mut registry, &sender, black_box(frame));
                drain(&mut peers);
                outcome
            })
        });
    }

    group.finish();
}

/// Benchmark a connection hopping between rooms.
fn bench_rejoin(c: &mut Criterion) {
    let router = Router::new();
    let (mut registry, mut peers) = populated(16, "lobby");
    let mover = peers[0].0.clone();
    let frames = [
        br#"{"type":"join","room":"lobby"}"#.as_slice(),
        br#"{"type":"join","room":"table-42"}"#.as_slice(),
    ];

    c.bench_function("rejoin", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let outcome = router.route(&mut registry, &mover, black_box(frames[i % 2]));
            i += 1;
            drain(&mut peers);
            outcome
        })
    });
}

/// Benchmark one heartbeat sweep with every peer answering.
fn bench_heartbeat_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("heartbeat_tick");

    for members in [100usize, 1000] {
        let (mut registry, mut peers) = populated(members, "table");
        let mut monitor = HeartbeatMonitor::new();

        group.bench_with_input(BenchmarkId::from_parameter(members), &members, |b, _| {
            b.iter(|| {
                let report = monitor.tick(&mut registry);
                for (id, _) in &peers {
                    monitor.acknowledge(&mut registry, id);
                }
                drain(&mut peers);
                report
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_broadcast, bench_rejoin, bench_heartbeat_tick);
criterion_main!(benches);
