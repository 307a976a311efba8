//! Latency bench against a running roombook server.
//!
//! Start the server, then: `cargo bench`. Override the target with
//! `ROOMBOOK_URL` (default http://127.0.0.1:3000).

use std::time::{Duration, Instant};

use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde_json::{Value, json};
use ulid::Ulid;

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

/// Weekday slots a week out, 09:00–18:00, one hour each, skipping weekends.
fn slots(n: usize) -> Vec<(String, String)> {
    let mut out = Vec::with_capacity(n);
    let mut date: NaiveDate = chrono::Local::now().date_naive() + Days::new(7);
    'outer: loop {
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            for hour in 9..18 {
                out.push((
                    format!("{date} {hour:02}:00:00"),
                    format!("{date} {:02}:00:00", hour + 1),
                ));
                if out.len() == n {
                    break 'outer;
                }
            }
        }
        date = date + Days::new(1);
    }
    out
}

async fn expect_json(response: reqwest::Response, context: &str) -> Value {
    let status = response.status();
    let body: Value = response.json().await.expect("response body");
    assert!(status.is_success(), "{context} failed ({status}): {body}");
    body
}

#[tokio::main]
async fn main() {
    let base = std::env::var("ROOMBOOK_URL").unwrap_or_else(|_| "http://127.0.0.1:3000".into());
    let client = reqwest::Client::new();

    // fresh user per run
    let email = format!("bench-{}@example.com", Ulid::new());
    let body = expect_json(
        client
            .post(format!("{base}/api/auth/register"))
            .json(&json!({ "email": email, "password": "bench-password" }))
            .send()
            .await
            .expect("server unreachable"),
        "register",
    )
    .await;
    let token = body["token"].as_str().expect("token").to_string();

    let rooms = expect_json(
        client.get(format!("{base}/api/rooms")).send().await.unwrap(),
        "list rooms",
    )
    .await;
    let room_id = rooms[0]["id"].as_str().expect("at least one room").to_string();

    println!("roombook stress @ {base}, room {room_id}");

    // ── create ───────────────────────────────────────────────────
    let n = 200;
    let mut create_latencies = Vec::with_capacity(n);
    let mut ids = Vec::with_capacity(n);
    for (start, end) in slots(n) {
        let t0 = Instant::now();
        let body = expect_json(
            client
                .post(format!("{base}/api/reservations"))
                .bearer_auth(&token)
                .json(&json!({
                    "title": "bench",
                    "start": start,
                    "end": end,
                    "room_id": room_id,
                }))
                .send()
                .await
                .unwrap(),
            "create",
        )
        .await;
        create_latencies.push(t0.elapsed());
        ids.push(body["id"].as_str().unwrap().to_string());
    }
    print_latency("create", &mut create_latencies);

    // ── availability ─────────────────────────────────────────────
    let mut avail_latencies = Vec::with_capacity(n);
    for (start, end) in slots(n) {
        let t0 = Instant::now();
        expect_json(
            client
                .get(format!(
                    "{base}/api/reservations/availability?start={}&end={}&room_id={room_id}",
                    start.replace(' ', "T"),
                    end.replace(' ', "T"),
                ))
                .bearer_auth(&token)
                .send()
                .await
                .unwrap(),
            "availability",
        )
        .await;
        avail_latencies.push(t0.elapsed());
    }
    print_latency("availability", &mut avail_latencies);

    // ── list ─────────────────────────────────────────────────────
    let mut list_latencies = Vec::with_capacity(50);
    for _ in 0..50 {
        let t0 = Instant::now();
        expect_json(
            client
                .get(format!("{base}/api/reservations"))
                .bearer_auth(&token)
                .send()
                .await
                .unwrap(),
            "list",
        )
        .await;
        list_latencies.push(t0.elapsed());
    }
    print_latency("list", &mut list_latencies);

    // ── cleanup ──────────────────────────────────────────────────
    let mut delete_latencies = Vec::with_capacity(ids.len());
    for id in ids {
        let t0 = Instant::now();
        expect_json(
            client
                .delete(format!("{base}/api/reservations/{id}"))
                .bearer_auth(&token)
                .send()
                .await
                .unwrap(),
            "delete",
        )
        .await;
        delete_latencies.push(t0.elapsed());
    }
    print_latency("delete", &mut delete_latencies);
}
