use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, Local, NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use ulid::Ulid;

use comunal::model::{Area, Requester, TimeWindow};
use comunal::notify::NotifyHub;
use comunal::{BookingDetails, Engine, EngineError};

const SLOTS_PER_DAY: u32 = 14; // open 08:00–22:00, one-hour slots

fn t(h: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, 0, 0).unwrap()
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

fn bench_area(name: &str) -> Area {
    Area {
        id: Ulid::new(),
        name: name.into(),
        description: None,
        capacity: 20,
        price: Decimal::new(1500, 2),
        min_minutes: 60,
        max_minutes: 480,
        opening: t(8),
        closing: t(22),
        max_advance_days: 30,
        active: true,
    }
}

/// Map a slot index to a distinct (date, window) on a 14-slot/day grid.
fn slot(i: u32) -> (NaiveDate, TimeWindow) {
    let date = Local::now().date_naive() + Days::new(1 + (i / SLOTS_PER_DAY) as u64);
    let hour = 8 + i % SLOTS_PER_DAY;
    (date, TimeWindow::new(t(hour), t(hour + 1)))
}

async fn setup() -> (Arc<Engine>, Vec<Ulid>, Ulid) {
    let dir = std::env::temp_dir().join(format!("comunal_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(dir.join("bench.wal"), notify).unwrap());

    let mut areas = Vec::new();
    for i in 0..10 {
        let area = bench_area(&format!("Area {i}"));
        areas.push(area.id);
        engine.create_area(area).await.unwrap();
    }

    let requester_id = Ulid::new();
    engine
        .register_requester(Requester {
            id: requester_id,
            name: "Bench Resident".into(),
            unit: None,
        })
        .await
        .unwrap();

    (engine, areas, requester_id)
}

async fn phase1_sequential(engine: &Arc<Engine>, area: Ulid, requester: Ulid) {
    let n = 300;
    let mut latencies = Vec::with_capacity(n as usize);
    for i in 0..n {
        let (date, window) = slot(i);
        let start = Instant::now();
        engine
            .create_booking(Ulid::new(), area, requester, date, window, BookingDetails::default())
            .await
            .unwrap();
        latencies.push(start.elapsed());
    }
    print_latency("sequential create", &mut latencies);
}

async fn phase2_concurrent_areas(engine: &Arc<Engine>, areas: &[Ulid], requester: Ulid) {
    let per_area = 100u32;
    let start = Instant::now();
    let mut handles = Vec::new();
    for &area in areas {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(per_area as usize);
            for i in 0..per_area {
                let (date, window) = slot(i);
                let s = Instant::now();
                eng.create_booking(Ulid::new(), area, requester, date, window, BookingDetails::default())
                    .await
                    .unwrap();
                latencies.push(s.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in handles {
        all.extend(h.await.unwrap());
    }
    let elapsed = start.elapsed();
    let total = areas.len() as u32 * per_area;
    println!(
        "  {total} bookings across {} areas in {:.2}s ({:.0}/s)",
        areas.len(),
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
    print_latency("concurrent create (disjoint areas)", &mut all);
}

async fn phase3_contended_single_area(engine: &Arc<Engine>, area: Ulid, requester: Ulid) {
    // 8 writers fighting over one book: disjoint slots, contended lock
    let writers = 8u32;
    let per_writer = 40u32;
    let mut handles = Vec::new();
    for wr in 0..writers {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(per_writer as usize);
            let mut conflicts = 0u32;
            for i in 0..per_writer {
                let (date, window) = slot(wr * per_writer + i);
                let s = Instant::now();
                match eng
                    .create_booking(Ulid::new(), area, requester, date, window, BookingDetails::default())
                    .await
                {
                    Ok(_) => {}
                    Err(EngineError::Conflict(_)) | Err(EngineError::Contended(_)) => conflicts += 1,
                    Err(e) => panic!("unexpected error: {e}"),
                }
                latencies.push(s.elapsed());
            }
            (latencies, conflicts)
        }));
    }

    let mut all = Vec::new();
    let mut conflicts = 0;
    for h in handles {
        let (lat, c) = h.await.unwrap();
        all.extend(lat);
        conflicts += c;
    }
    println!("  conflicts: {conflicts}");
    print_latency("contended create (single area)", &mut all);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    println!("=== comunal contention benchmark ===\n");

    println!("[setup]");
    let (engine, areas, requester) = setup().await;

    println!("\n[phase 1] sequential write throughput");
    phase1_sequential(&engine, areas[0], requester).await;

    println!("\n[phase 2] concurrent writes, disjoint areas");
    phase2_concurrent_areas(&engine, &areas[1..9], requester).await;

    println!("\n[phase 3] contended writes, single area");
    phase3_contended_single_area(&engine, areas[9], requester).await;

    println!("\n=== benchmark complete ===");
}
