//! Basic circuit breaker usage example
//!
//! Run with `RUST_LOG=circuit_engine=debug` to see transition logs.

use circuit_engine::{CallOptions, CircuitBreaker, ManualClock, Registry};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== Circuit Breaker Basic Example ===\n");

    // A manual clock lets the example skip the sleep window instantly
    let clock = Arc::new(ManualClock::new());

    let circuit = CircuitBreaker::builder("payment_api")
        .window(Duration::from_secs(5), 5)
        .minimum_requests(5)
        .error_threshold_percent(40.0)
        .open_duration(Duration::from_secs(2))
        .clock(clock.clone())
        .on_open(|name| println!("Circuit '{}' opened!", name))
        .on_close(|name| println!("Circuit '{}' closed!", name))
        .on_half_open(|name| println!("Circuit '{}' half-open, testing...", name))
        .build()
        .expect("valid configuration");

    println!("Initial state: {}\n", circuit.state_name());

    println!("--- Mixed traffic ---");
    for i in 1..=5 {
        let result = if i <= 3 {
            circuit.call(move || Err::<String, _>(format!("Payment failed {}", i)))
        } else {
            circuit.call(move || Ok::<_, String>(format!("Payment {}", i)))
        };
        match result {
            Ok(value) => println!("ok  {}", value),
            Err(e) => println!("err {}", e),
        }
        clock.advance(Duration::from_millis(100));
    }
    let stats = circuit.stats();
    println!(
        "State: {} (error rate {:.0}%)\n",
        stats.phase, stats.window.error_percent
    );

    println!("--- Attempting call while open ---");
    let result = circuit.call((
        || Ok::<_, String>("Should be rejected".to_string()),
        CallOptions::new().with_fallback(|ctx| {
            Ok(format!("cached response ({:?})", ctx.reason))
        }),
    ));
    println!("{:?}\n", result);

    println!("--- Waiting out the sleep window ---");
    clock.advance(Duration::from_millis(2100));
    match circuit.call(|| Ok::<_, String>("Payment successful")) {
        Ok(value) => println!("ok  {}", value),
        Err(e) => println!("err {}", e),
    }
    let stats = circuit.stats();
    println!(
        "State: {} (total requests {}, failures {})\n",
        stats.phase, stats.window.total_requests, stats.window.failure_count
    );

    println!("--- Registry ---");
    let registry = Registry::with_clock(clock);
    for name in ["inventory", "shipping"] {
        let breaker = registry
            .get_or_create(name, Default::default())
            .expect("valid configuration");
        let _ = breaker.call(|| Ok::<_, String>(()));
    }
    for stats in registry.stats() {
        match serde_json::to_string(&stats) {
            Ok(json) => println!("{}", json),
            Err(e) => println!("could not serialize stats: {}", e),
        }
    }
}
