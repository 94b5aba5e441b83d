//! Basic circuit breaker usage example

use backoff_breaker::{CircuitBreaker, CircuitError};
use std::thread;
use std::time::Duration;

fn main() {
    println!("=== Circuit Breaker Basic Example ===\n");

    let circuit = CircuitBreaker::builder("payment_api")
        .failure_threshold(3)
        .reset_timeout(Duration::from_millis(500))
        .success_threshold(2)
        .max_retries(1)
        .retry_delays(Duration::from_millis(50), Duration::from_millis(200))
        .on_open(|name| println!("Circuit '{name}' opened"))
        .on_close(|name| println!("Circuit '{name}' closed"))
        .on_half_open(|name| println!("Circuit '{name}' half-open, probing..."))
        .build()
        .expect("example configuration is valid");

    println!("Initial state: {}\n", circuit.state_name());

    println!("--- Successful calls ---");
    for i in 1..=2 {
        match circuit.call(move || Ok::<_, String>(format!("Payment {i}"))) {
            Ok(result) => println!("ok: {result}"),
            Err(e) => println!("error: {e}"),
        }
    }
    println!("State: {}\n", circuit.state_name());

    // Each call makes two attempts, so the second call trips the breaker
    println!("--- Triggering failures ---");
    for i in 1..=2 {
        match circuit.call(move || Err::<String, _>(format!("Payment failed {i}"))) {
            Ok(_) => println!("ok"),
            Err(e) => println!("error: {e}"),
        }
    }
    println!("State: {}\n", circuit.state_name());

    println!("--- Attempting call while open ---");
    match circuit.call(|| Ok::<_, String>("should be rejected")) {
        Err(CircuitError::Open { opened_at, .. }) => {
            println!("rejected, circuit opened at {opened_at:.3}s")
        }
        other => println!("unexpected: {other:?}"),
    }
    println!();

    println!("--- Waiting for reset timeout ---");
    thread::sleep(Duration::from_millis(600));
    for _ in 0..2 {
        match circuit.call(|| Ok::<_, String>("probe succeeded")) {
            Ok(result) => println!("ok: {result}"),
            Err(e) => println!("error: {e}"),
        }
    }
    println!("State: {}\n", circuit.state_name());

    let snapshot = circuit.snapshot();
    println!(
        "Totals: {} successes, {} failures, {} rejections",
        snapshot.totals.successes, snapshot.totals.failures, snapshot.totals.rejections
    );
}
