//! Integration Test: Ownership Boundaries
//!
//! Each piece of shared mutable state has one owner:
//! - In-flight counts belong to the backpressure gate. Only the dispatcher
//!   asks for admission, and slots are released by dropping permits.
//! - Connection state belongs to the connection manager. Everyone else
//!   reads it through `state()` or `subscribe_state()`.
//! - Pending completions belong to the correlation table, driven by the
//!   connection manager.

use architectural_enforcement::{occurrences_outside, SourceLine};

fn report(rule: &str, found: &[SourceLine]) {
    if !found.is_empty() {
        eprintln!("\n❌ {rule}\n");
        for line in found {
            eprintln!("  ❌ {line}");
        }
        panic!("{} violation(s) of: {rule}", found.len());
    }
}

#[test]
fn test_only_dispatcher_requests_admission() {
    let found = occurrences_outside(".admit(", &["routing/gate.rs", "routing/dispatcher.rs"]);
    report("admission is requested only by the dispatcher", &found);
}

#[test]
fn test_gate_slots_released_only_by_permits() {
    let found = occurrences_outside(".release(", &["routing/gate.rs"]);
    report("gate slots are released only by dropping permits", &found);
}

#[test]
fn test_connection_state_written_only_by_manager() {
    let mut found = occurrences_outside("state_tx", &["transport/connection.rs"]);
    found.extend(occurrences_outside(
        ".transition(",
        &["transport/connection.rs"],
    ));
    report("connection state changes only inside the connection manager", &found);
}

#[test]
fn test_correlation_table_driven_only_by_manager() {
    let mut found = Vec::new();
    for call in [".try_resolve(", ".reject_all(", ".reject_sole(", ".register("] {
        found.extend(occurrences_outside(
            call,
            &["transport/connection.rs", "transport/correlation.rs"],
        ));
    }
    report("pending completions are resolved only by the connection manager", &found);
}
