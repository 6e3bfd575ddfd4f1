//! Reconnect stress tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rpc_resilience_reconnect::{ReconnectConfig, ReconnectingEndpoint};
use tokio::sync::mpsc;

use super::{InFlight, resident_mb};
use crate::common::{Control, MockEndpoint};

async fn endpoint(control: &Arc<Control>, interval: Duration) -> ReconnectingEndpoint<MockEndpoint> {
    let config = ReconnectConfig::builder()
        .name("stress")
        .retry_interval(interval)
        .build();
    ReconnectingEndpoint::with_config(MockEndpoint::new(control), config)
        .await
        .unwrap()
}

/// Test: High volume of calls on a healthy connection
#[tokio::test]
#[ignore]
async fn stress_one_million_successful_calls() {
    println!("\n=== Reconnect: 1M successful calls (no failures) ===");

    let control = Control::new();
    let endpoint = endpoint(&control, Duration::from_millis(1)).await;

    let start = Instant::now();
    let count = 1_000_000u64;

    for i in 0..count {
        let reply = endpoint.call(i).await.unwrap();
        assert_eq!(reply.value, i);
    }

    let elapsed = start.elapsed();
    println!("Completed {} calls in {:?}", count, elapsed);
    println!(
        "Throughput: {:.0} calls/sec",
        count as f64 / elapsed.as_secs_f64()
    );

    assert_eq!(control.calls() as u64, count);
    assert_eq!(control.dials(), 1);
}

/// Test: Thousands of concurrent callers while the connection keeps dropping
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore]
async fn stress_concurrent_callers_with_flapping_connection() {
    println!("\n=== Reconnect: 1000 callers x 100 calls, flapping connection ===");

    let control = Control::new();
    control.set_call_delay(Duration::from_micros(100));
    let endpoint = endpoint(&control, Duration::from_millis(1)).await;
    let in_flight = InFlight::new();

    let stop = Arc::new(AtomicBool::new(false));
    let flapper = {
        let control = Arc::clone(&control);
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            let mut severed = 0;
            while !stop.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
                control.sever();
                severed += 1;
            }
            severed
        })
    };

    let successes = Arc::new(AtomicUsize::new(0));
    let rejections = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let mut handles = Vec::new();
    for caller in 0..1000u64 {
        let endpoint = endpoint.clone();
        let in_flight = Arc::clone(&in_flight);
        let successes = Arc::clone(&successes);
        let rejections = Arc::clone(&rejections);
        handles.push(tokio::spawn(async move {
            for i in 0..100 {
                let result = {
                    let _slot = in_flight.enter();
                    endpoint.call(caller * 1000 + i).await
                };
                match result {
                    Ok(reply) => {
                        assert_eq!(reply.value, caller * 1000 + i);
                        successes.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(error) => {
                        assert!(error.is_unavailable(), "unexpected error: {}", error);
                        rejections.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    let severed = flapper.await.unwrap();

    let elapsed = start.elapsed();
    let successes = successes.load(Ordering::Relaxed);
    let rejections = rejections.load(Ordering::Relaxed);
    println!("Completed in {:?}", elapsed);
    println!("Connection severed {} times, {} dials", severed, control.dials());
    println!("Successes: {}, rejected: {}", successes, rejections);
    println!("Peak concurrent calls: {}", in_flight.high_water());

    assert_eq!(successes + rejections, 100_000);
    assert!(successes > 0);
    assert_eq!(in_flight.now(), 0);
}

/// Test: Flood of asynchronous calls, each delivered exactly once
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore]
async fn stress_go_call_flood() {
    println!("\n=== Reconnect: 100k go_calls with periodic connection loss ===");

    let control = Control::new();
    let endpoint = endpoint(&control, Duration::from_millis(1)).await;
    let count = 100_000u64;

    let (tx, mut rx) = mpsc::channel(1024);
    let issuer = {
        let endpoint = endpoint.clone();
        let control = Arc::clone(&control);
        tokio::spawn(async move {
            for i in 0..count {
                endpoint.go_call(i, Some(tx.clone()));
                if i % 10_000 == 0 {
                    control.sever();
                    tokio::task::yield_now().await;
                }
            }
        })
    };

    let start = Instant::now();
    let mut seen = vec![false; count as usize];
    let mut delivered = 0u64;
    while let Some(call) = rx.recv().await {
        let index = *call.args() as usize;
        assert!(!seen[index], "call {} delivered twice", index);
        seen[index] = true;
        delivered += 1;
    }
    issuer.await.unwrap();

    println!("Delivered {} completions in {:?}", delivered, start.elapsed());
    assert_eq!(delivered, count);
}

/// Test: Fail-fast cost and memory during a long outage
#[tokio::test]
#[ignore]
async fn stress_long_outage_fail_fast() {
    println!("\n=== Reconnect: 1M calls during a long outage ===");

    let control = Control::new();
    let endpoint = endpoint(&control, Duration::from_millis(1)).await;

    control.sever();
    control.connect_by_default(false);
    assert!(endpoint.call(0).await.unwrap_err().is_unavailable());

    let memory_before = resident_mb();
    let start = Instant::now();
    for i in 0..1_000_000u64 {
        assert!(endpoint.call(i).await.unwrap_err().is_unavailable());
    }
    let elapsed = start.elapsed();
    let memory_after = resident_mb();

    println!("1M rejected calls in {:?}", elapsed);
    println!("Background dials so far: {}", control.dials());
    println!("Memory: {:.1} MB -> {:.1} MB", memory_before, memory_after);

    // Rejected calls never reach the underlying endpoint
    assert_eq!(control.calls(), 1);

    control.connect_by_default(true);
    tokio::time::timeout(Duration::from_secs(5), endpoint.wait_connected())
        .await
        .unwrap()
        .unwrap();
    assert!(endpoint.call(1).await.is_ok());
}
