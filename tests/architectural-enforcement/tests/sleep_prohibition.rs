//! Integration Test: Sleep Prohibition
//!
//! **Policy**: production code waits on I/O, channels or cancellation tokens,
//! never on the clock. Retries are caller-driven, so there is no backoff
//! exception. Timeouts (`tokio::time::timeout`) are allowed.

use architectural_enforcement::scan;

#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan(|_, _, code| {
        if code.contains("thread::sleep") {
            Some("Thread sleep")
        } else if code.contains("time::sleep") || code.contains("sleep_until") {
            Some("Timer sleep")
        } else if code.contains("time::interval") {
            Some("Polling interval")
        } else {
            None
        }
    });

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nWait on the event channel or the cancellation token instead.");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}
