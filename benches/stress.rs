use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use carpark::engine::{Engine, EngineError, ReserveRequest};
use carpark::model::{FloorLayout, NewBuilding, Requester};
use carpark::notify::NotifyHub;

const HOUR: i64 = 3_600_000; // 1 hour in ms

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn request(floor: u32, slot: u32, start: i64) -> ReserveRequest {
    ReserveRequest {
        floor: Some(floor),
        slot: Some(slot),
        start: Some(start),
        end: Some(start + HOUR),
        vehicle_type: Some("car".into()),
        price: Some(10),
    }
}

async fn garage(engine: &Engine, floors: u32, slots: u32) -> Ulid {
    let id = Ulid::new();
    let layout = (1..=floors)
        .map(|number| FloorLayout {
            number,
            slots: (1..=slots).collect(),
        })
        .collect();
    engine
        .create_building(
            id,
            NewBuilding {
                name: format!("bench-{id}"),
                address: "bench".into(),
                description: None,
                price: None,
                floors: layout,
            },
        )
        .await
        .unwrap();
    id
}

async fn phase1_sequential(engine: &Engine, base: i64) {
    let bid = garage(engine, 1, 4).await;
    let who = Requester::new("bench");
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        // Two hours apart so neighbours never touch.
        let slot = (i % 4) as u32 + 1;
        let s = base + ((i / 4) as i64) * 2 * HOUR;
        let t = Instant::now();
        engine.reserve_slot(bid, request(1, slot, s), &who).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} reservations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("reserve latency", &mut latencies);
}

async fn phase2_concurrent(engine: Arc<Engine>, base: i64) {
    let n_tasks = 20;
    let n_per_task = 200;
    let buildings: Vec<Ulid> = {
        let mut v = Vec::new();
        for _ in 0..4 {
            v.push(garage(&engine, 5, 20).await);
        }
        v
    };

    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..n_tasks {
        let engine = engine.clone();
        let bid = buildings[i % buildings.len()];
        handles.push(tokio::spawn(async move {
            let who = Requester::new(format!("task-{i}"));
            for j in 0..n_per_task {
                let floor = (j % 5) as u32 + 1;
                let slot = (i % 8) as u32 + 1;
                let s = base + ((j / 5) as i64) * 2 * HOUR;
                // Tasks sharing a building and slot collide on purpose.
                let _ = engine.reserve_slot(bid, request(floor, slot, s), &who).await;
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} attempts = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

/// Every task fights for the same hour on one slot: exactly one may win.
async fn phase3_contention(engine: Arc<Engine>, base: i64) {
    let bid = garage(&engine, 1, 1).await;
    let n_tasks = 200;
    let won = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..n_tasks {
        let engine = engine.clone();
        let won = won.clone();
        let lost = lost.clone();
        handles.push(tokio::spawn(async move {
            let who = Requester::new(format!("rival-{i}"));
            match engine.reserve_slot(bid, request(1, 1, base), &who).await {
                Ok(_) => won.fetch_add(1, Ordering::Relaxed),
                Err(EngineError::SlotOverlap { .. }) => lost.fetch_add(1, Ordering::Relaxed),
                Err(e) => panic!("unexpected rejection: {e}"),
            };
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let won = won.load(Ordering::Relaxed);
    let lost = lost.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} rivals: {won} won, {lost} rejected in {:.2}s",
        start.elapsed().as_secs_f64()
    );
    assert_eq!(won, 1, "double booking under contention");
}

async fn phase4_read_under_load(engine: Arc<Engine>, base: i64) {
    let bid = garage(&engine, 2, 10).await;
    let stop = Arc::new(AtomicBool::new(false));

    let mut writer_handles = Vec::new();
    for w in 0..5u32 {
        let engine = engine.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let who = Requester::new(format!("writer-{w}"));
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let s = base + i * 2 * HOUR;
                let _ = engine.reserve_slot(bid, request(1, w + 1, s), &who).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let engine = engine.clone();
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                let b = engine.get_building(bid).await.unwrap();
                std::hint::black_box(b.reservation_count());
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("building read", &mut all_latencies);
}

#[tokio::main]
async fn main() {
    let dir = std::env::temp_dir().join(format!("carpark_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("bench.wal"), Arc::new(NotifyHub::new())).unwrap());
    // Far enough ahead that nothing starts in the past or expires mid-run.
    let base = engine.now_ms() + 24 * HOUR;

    println!("=== carpark stress benchmark ===");
    println!("wal: {}\n", dir.display());

    println!("[phase 1] sequential reserve throughput");
    phase1_sequential(&engine, base).await;

    println!("\n[phase 2] concurrent reserve throughput");
    phase2_concurrent(engine.clone(), base).await;

    println!("\n[phase 3] single-slot contention");
    phase3_contention(engine.clone(), base).await;

    println!("\n[phase 4] read latency under write load");
    phase4_read_under_load(engine.clone(), base).await;

    let start = Instant::now();
    engine.compact_wal().await.unwrap();
    println!("\n[compaction] {:.2}s", start.elapsed().as_secs_f64());

    let _ = std::fs::remove_dir_all(&dir);
}
