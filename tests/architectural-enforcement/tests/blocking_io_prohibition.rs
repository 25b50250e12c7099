//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async code in the conversation core and CLI must not block the
//! runtime. Use `tokio::net`, `tokio::io` and the async `reqwest` client.
//!
//! **Acceptable**: synchronous functions that run before the runtime does
//! real work (configuration loading, logging setup), and test code.

use architectural_enforcement::{is_in_async_function, scan};

#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = scan(|lines, idx, code| {
        if code.contains("reqwest::blocking") {
            return Some("Blocking HTTP client");
        }
        if !is_in_async_function(lines, idx) {
            return None;
        }
        if code.contains("std::fs::") {
            Some("Blocking file I/O")
        } else if code.contains("std::net::") {
            Some("Blocking network I/O")
        } else if code.contains("std::io::stdin()") || code.contains("std::io::stdout()") {
            Some("Blocking stdin/stdout")
        } else if code.contains("std::process::Command") {
            Some("Blocking process I/O")
        } else {
            None
        }
    });

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O found in async code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nUse tokio::fs, tokio::net, tokio::io::stdin() or async reqwest instead.");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.",
            violations.len()
        );
    }
}

#[test]
fn test_config_file_read_stays_synchronous() {
    // Loading config with std::fs is fine only while it stays out of async fns
    let violations = scan(|lines, idx, code| {
        (code.contains("std::fs::read_to_string") && is_in_async_function(lines, idx))
            .then_some("Config read inside async fn")
    });
    assert!(violations.is_empty(), "{violations:?}");
}
