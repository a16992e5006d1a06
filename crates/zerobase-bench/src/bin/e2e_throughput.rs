//! End-to-end throughput benchmark for zerobase.
//!
//! One publishing node on an ephemeral TCP port, N subscribing nodes, real
//! network I/O through the loopback interface.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use zerobase_bench::wait_until;
use zerobase_core::{Node, NodeSettings, PublisherConfig, SubscriberConfig};

const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;
const TOPIC: &str = "benchmark";

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_subscribers: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(4);
    let payload_size: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(64);

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║         zerobase End-to-End Throughput Benchmark             ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    run_pubsub_benchmark(num_subscribers, payload_size);
}

fn run_pubsub_benchmark(num_subscribers: usize, payload_size: usize) {
    println!(
        "📊 Pub/Sub Benchmark: {} subscribers, {}B payloads",
        num_subscribers, payload_size
    );
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let settings = NodeSettings {
        poll_timeout: Duration::from_millis(10),
        high_water_mark: 10_000,
        ..NodeSettings::default()
    };

    let publisher = Node::builder()
        .name("e2e-pub")
        .with_publisher(PublisherConfig::new("tcp://127.0.0.1:0"))
        .settings(settings.clone())
        .build();
    if let Err(e) = publisher.start() {
        eprintln!("Publisher failed to start: {}", e);
        return;
    }
    let endpoint = publisher.bound_endpoints()[0].to_string();
    println!("✓ Publisher bound on {}", endpoint);

    let message_count = Arc::new(AtomicU64::new(0));
    let subscribers: Vec<Node> = (0..num_subscribers)
        .filter_map(|i| {
            let count = Arc::clone(&message_count);
            let node = Node::builder()
                .name(format!("e2e-sub-{i}"))
                .with_subscriber(SubscriberConfig::new(endpoint.as_str(), [TOPIC]))
                .settings(settings.clone())
                .on_message(move |_, _| {
                    count.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                })
                .build();
            match node.start() {
                Ok(()) => Some(node),
                Err(e) => {
                    eprintln!("Subscriber {} failed to start: {}", i, e);
                    None
                }
            }
        })
        .collect();

    let handle = publisher.publisher();
    if !wait_until(Duration::from_secs(5), || {
        handle.subscriber_count(TOPIC) == subscribers.len()
    }) {
        eprintln!("Subscribers did not connect in time");
        return;
    }
    println!("✓ All {} subscribers connected", subscribers.len());

    // Publish from a dedicated thread until told to stop
    let running = Arc::new(AtomicBool::new(true));
    let sent = Arc::new(AtomicU64::new(0));
    let sender = {
        let running = Arc::clone(&running);
        let sent = Arc::clone(&sent);
        let payload = Bytes::from(vec![0u8; payload_size]);
        thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                if handle.send(payload.clone(), TOPIC).is_err() {
                    break;
                }
                sent.fetch_add(1, Ordering::Relaxed);
            }
        })
    };

    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    thread::sleep(Duration::from_secs(WARMUP_SECS));

    message_count.store(0, Ordering::SeqCst);
    sent.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    thread::sleep(Duration::from_secs(BENCH_SECS));

    let elapsed = start.elapsed();
    let total_received = message_count.load(Ordering::SeqCst);
    let total_sent = sent.load(Ordering::SeqCst);

    running.store(false, Ordering::SeqCst);
    let _ = sender.join();

    let sent_per_sec = total_sent as f64 / elapsed.as_secs_f64();
    let recv_per_sec = total_received as f64 / elapsed.as_secs_f64();
    let per_subscriber = recv_per_sec / subscribers.len().max(1) as f64;

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!(
        "║  Subscribers:          {:>10}                           ║",
        subscribers.len()
    );
    println!(
        "║  Duration:             {:>10.2}s                          ║",
        elapsed.as_secs_f64()
    );
    println!(
        "║  Published:            {:>10.0} msg/s                    ║",
        sent_per_sec
    );
    println!(
        "║  Delivered:            {:>10.0} msg/s                    ║",
        recv_per_sec
    );
    println!(
        "║  Per-Subscriber:       {:>10.0} msg/s                    ║",
        per_subscriber
    );
    println!("╚══════════════════════════════════════════════════════════════╝");

    for node in &subscribers {
        if let Err(e) = node.stop() {
            eprintln!("Subscriber {} failed to stop: {}", node.name(), e);
        }
    }
    if let Err(e) = publisher.stop() {
        eprintln!("Publisher failed to stop: {}", e);
    }
}
