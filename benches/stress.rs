use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Client, Config, NoTls};
use ulid::Ulid;

/// Slots in the default business day (08:00-17:00, lunch excluded).
const SLOTS: [&str; 32] = [
    "08:00", "08:15", "08:30", "08:45", "09:00", "09:15", "09:30", "09:45", "10:00", "10:15", "10:30",
    "10:45", "11:00", "11:15", "11:30", "11:45", "13:00", "13:15", "13:30", "13:45", "14:00", "14:15",
    "14:30", "14:45", "15:00", "15:15", "15:30", "15:45", "16:00", "16:15", "16:30", "16:45",
];

async fn connect(host: &str, port: u16, salon: &str) -> Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(salon)
        .user("bench")
        .password("salon");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn fresh_salon() -> String {
    format!("bench_{}", Ulid::new()).to_lowercase()
}

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

fn day(offset: u64) -> String {
    let base = NaiveDate::from_ymd_opt(2030, 1, 7).expect("valid base date");
    (base + Days::new(offset)).format("%Y-%m-%d").to_string()
}

struct Salon {
    service: Ulid,
    client: Ulid,
}

/// One 15-minute service with no fixed professional and one registered client.
async fn setup(client: &Client) -> Salon {
    let service = Ulid::new();
    let customer = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO services (id, name, duration_minutes, price_cents) VALUES ('{service}', 'Design de sobrancelha', 15, 4500)"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO clients (id, name, phone) VALUES ('{customer}', 'Bench', '63999990000')"
        ))
        .await
        .unwrap();
    Salon {
        service,
        client: customer,
    }
}

fn booking(salon: &Salon, date: &str, slot: &str) -> String {
    format!(
        "INSERT INTO appointments (id, service_id, client_id, date, slot, origin) VALUES ('{}', '{}', '{}', '{date}', '{slot}', 'staff')",
        Ulid::new(),
        salon.service,
        salon.client
    )
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port, &fresh_salon()).await;
    let salon = setup(&client).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let sql = booking(&salon, &day((i / SLOTS.len()) as u64), SLOTS[i % SLOTS.len()]);
        let t = Instant::now();
        client.batch_execute(&sql).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("booking latency", &mut latencies);
}

/// Every task tries to take every slot of the same days. Each slot must be
/// won exactly once.
async fn phase2_contention(host: &str, port: u16) {
    let salon_name = fresh_salon();
    let setup_client = connect(host, port, &salon_name).await;
    let salon = Arc::new(setup(&setup_client).await);
    drop(setup_client);

    let n_tasks = 16;
    let n_days = 5;
    let won = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let host = host.to_string();
        let salon_name = salon_name.clone();
        let salon = salon.clone();
        let won = won.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &salon_name).await;
            for d in 0..n_days {
                let date = day(d);
                for slot in SLOTS {
                    match client.batch_execute(&booking(&salon, &date, slot)).await {
                        Ok(()) => {
                            won.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) if e.as_db_error().is_some_and(|d| d.code().code() == "23P01") => {
                            conflicts.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let won = won.load(Ordering::Relaxed);
    let conflicts = conflicts.load(Ordering::Relaxed);
    let expected = n_days as usize * SLOTS.len();
    println!(
        "  {n_tasks} tasks racing for {expected} slots: {won} booked, {conflicts} conflicts in {:.2}s",
        elapsed.as_secs_f64()
    );
    assert_eq!(won, expected, "each slot must be booked exactly once");
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let salon_name = fresh_salon();
    let setup_client = connect(host, port, &salon_name).await;
    let salon = Arc::new(setup(&setup_client).await);
    // Half of the first day is taken.
    for slot in SLOTS.iter().step_by(2) {
        setup_client.batch_execute(&booking(&salon, &day(0), slot)).await.unwrap();
    }
    drop(setup_client);

    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5u64 {
        let host = host.to_string();
        let salon_name = salon_name.clone();
        let salon = salon.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &salon_name).await;
            let mut i = 0usize;
            while !stop.load(Ordering::Relaxed) {
                let date = day(1 + w * 1000 + (i / SLOTS.len()) as u64);
                let _ = client.batch_execute(&booking(&salon, &date, SLOTS[i % SLOTS.len()])).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let host = host.to_string();
        let salon_name = salon_name.clone();
        let service = salon.service;
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &salon_name).await;
            let sql = format!(
                "SELECT * FROM availability WHERE service_id = '{service}' AND date = '{}'",
                day(0)
            );
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client.simple_query(&sql).await.unwrap();
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

    print_latency("availability query", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &fresh_salon()).await;
            let salon = setup(&client).await;
            for i in 0..ops_per_conn {
                client
                    .batch_execute(&booking(&salon, &day(0), SLOTS[i]))
                    .await
                    .unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} bookings each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("SALON_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("SALON_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid SALON_PORT");

    println!("=== salonbook stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] same-slot contention");
    phase2_contention(&host, port).await;

    println!("\n[phase 3] availability latency under booking load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
