use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;

use longpoll::{resolve, ContentHolder, Fingerprint, JsonSerializer, Subscription};

fn game_state(turn: u64) -> serde_json::Value {
    json!({
        "turn": turn,
        "players": ["alice", "bob", "carol", "dave"],
        "board": (0..64).map(|i| (i + turn) % 3).collect::<Vec<_>>(),
    })
}

fn bench_fingerprint(c: &mut Criterion) {
    let state = game_state(7);
    let mut group = c.benchmark_group("fingerprint");
    group.throughput(Throughput::Elements(1));
    group.bench_function("json_blake3", |b| {
        b.iter(|| Fingerprint::of(&JsonSerializer, black_box(&state)).unwrap());
    });
    group.finish();
}

fn bench_fast_path(c: &mut Criterion) {
    let holder = Arc::new(ContentHolder::new(game_state(2)).unwrap());
    let stale = holder.fingerprint_of(&game_state(1)).unwrap();
    let current = holder.fingerprint_of_current();

    let mut group = c.benchmark_group("resolve");
    group.throughput(Throughput::Elements(1));

    let behind = Subscription::since(stale);
    group.bench_function("fast_path_behind", |b| {
        b.iter(|| resolve(&holder, black_box(&behind)).unwrap());
    });

    // Zero budget: evaluates, withholds, and times out without blocking.
    let in_sync = Subscription::since(current).with_timeout(Duration::ZERO);
    group.bench_function("in_sync_zero_timeout", |b| {
        b.iter(|| resolve(&holder, black_box(&in_sync)).unwrap());
    });

    group.finish();
}

fn bench_replace(c: &mut Criterion) {
    let holder = ContentHolder::new(game_state(0)).unwrap();
    let mut turn = 0u64;
    c.bench_function("replace_accepted", |b| {
        b.iter(|| {
            turn += 1;
            holder.replace(game_state(turn)).unwrap()
        });
    });
}

criterion_group!(benches, bench_fingerprint, bench_fast_path, bench_replace);
criterion_main!(benches);
