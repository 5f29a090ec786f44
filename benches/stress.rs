use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use slotguard::clock::{Clock, SystemClock};
use slotguard::directory::{Profile, StaticDirectory};
use slotguard::engine::{Decision, Engine, EngineError, NewBooking};
use slotguard::model::Party;
use slotguard::notify::NotifyHub;

const HOUR: i64 = 3_600_000; // 1 hour in ms

struct Bench {
    engine: Arc<Engine>,
    providers: Vec<Ulid>,
    requesters: Vec<Ulid>,
    base: i64,
}

fn bench_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("slotguard_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    dir
}

fn setup(n_providers: usize, n_requesters: usize) -> Bench {
    let providers: Vec<Ulid> = (0..n_providers).map(|_| Ulid::new()).collect();
    let requesters: Vec<Ulid> = (0..n_requesters).map(|_| Ulid::new()).collect();
    let directory = StaticDirectory::from_profiles(
        providers
            .iter()
            .enumerate()
            .map(|(i, id)| Profile::provider(*id, 40.0 + i as f64))
            .chain(requesters.iter().map(|id| Profile::requester(*id))),
    );

    let engine = Engine::new(
        bench_dir().join("bench.wal"),
        Arc::new(NotifyHub::new()),
        Arc::new(directory),
        Arc::new(SystemClock),
    )
    .expect("open engine");

    Bench {
        engine: Arc::new(engine),
        providers,
        requesters,
        base: SystemClock.now_ms() + 24 * HOUR,
    }
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
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
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn slot(provider_id: Ulid, start: i64) -> NewBooking {
    NewBooking {
        provider_id,
        start,
        end: start + HOUR,
        notes: None,
    }
}

async fn phase1_sequential() {
    let b = setup(1, 1);
    let (pid, rid) = (b.providers[0], b.requesters[0]);

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let s = b.base + (i as i64) * HOUR;
        let t = Instant::now();
        b.engine.create_booking(rid, slot(pid, s)).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("create latency", &mut latencies);
}

async fn phase2_concurrent() {
    let n_tasks = 10;
    let n_per_task = 200;
    let b = setup(n_tasks, n_tasks);

    let start = Instant::now();
    let mut handles = Vec::new();

    // One provider per task: writes only contend on the WAL writer.
    for i in 0..n_tasks {
        let engine = b.engine.clone();
        let (pid, rid, base) = (b.providers[i], b.requesters[i], b.base);
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                let s = base + (j as i64) * HOUR;
                engine.create_booking(rid, slot(pid, s)).await.unwrap();
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
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_contended_slots() {
    let n_tasks = 16;
    let n_slots = 200;
    let b = setup(1, n_tasks);
    let pid = b.providers[0];

    let start = Instant::now();
    let mut handles = Vec::new();

    // Every task tries every slot; exactly one create per slot may win.
    for i in 0..n_tasks {
        let engine = b.engine.clone();
        let (rid, base) = (b.requesters[i], b.base);
        handles.push(tokio::spawn(async move {
            let (mut won, mut conflicts) = (0usize, 0usize);
            for j in 0..n_slots {
                let s = base + (j as i64) * HOUR;
                match engine.create_booking(rid, slot(pid, s)).await {
                    Ok(_) => won += 1,
                    Err(EngineError::SchedulingConflict(_)) => conflicts += 1,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            (won, conflicts)
        }));
    }

    let (mut won, mut conflicts) = (0, 0);
    for h in handles {
        let (w, c) = h.await.unwrap();
        won += w;
        conflicts += c;
    }

    let elapsed = start.elapsed();
    println!(
        "  {n_tasks} tasks racing for {n_slots} slots: {won} won, {conflicts} conflicts in {:.2}s",
        elapsed.as_secs_f64()
    );
    assert_eq!(won, n_slots, "each slot must be booked exactly once");
}

async fn phase4_read_under_load() {
    let b = setup(1, 2);
    let pid = b.providers[0];
    let (reader, writer) = (b.requesters[0], b.requesters[1]);

    for i in 0..500 {
        let s = b.base + (i as i64) * HOUR;
        let booking = b.engine.create_booking(reader, slot(pid, s)).await.unwrap();
        if i % 2 == 0 {
            b.engine
                .decide_booking(booking.id, pid, Decision::Accept)
                .await
                .unwrap();
        }
    }

    let engine = b.engine.clone();
    let base = b.base + 1000 * HOUR;
    let load = tokio::spawn(async move {
        for j in 0..1000 {
            let s = base + (j as i64) * HOUR;
            let _ = engine.create_booking(writer, slot(pid, s)).await;
        }
    });

    let n = 1000;
    let mut latencies = Vec::with_capacity(n);
    for _ in 0..n {
        let t = Instant::now();
        let rows = b.engine.list_bookings(reader, Party::Requester, None).await;
        latencies.push(t.elapsed());
        assert_eq!(rows.len(), 500);
    }
    load.await.unwrap();

    print_latency("list latency (500 rows)", &mut latencies);
}

#[tokio::main]
async fn main() {
    println!("=== slotguard stress benchmark ===\n");

    println!("[phase 1] sequential create throughput");
    phase1_sequential().await;

    println!("\n[phase 2] concurrent create throughput");
    phase2_concurrent().await;

    println!("\n[phase 3] contended slots");
    phase3_contended_slots().await;

    println!("\n[phase 4] read latency under write load");
    phase4_read_under_load().await;

    println!("\n=== benchmark complete ===");
}
