// ABOUTME: Metrics facade helpers for datafeed throughput, errors, and directory size
// ABOUTME: Exporter installation lives in the binary; these calls are no-ops without a recorder

use metrics::{counter, describe_counter, describe_gauge, gauge};

pub const BATCHES_TOTAL: &str = "symphony_datafeed_batches_total";
pub const EVENTS_TOTAL: &str = "symphony_datafeed_events_total";
pub const DISPATCHED_EVENTS_TOTAL: &str = "symphony_dispatched_events_total";
pub const TRANSIENT_ERRORS_TOTAL: &str = "symphony_datafeed_transient_errors_total";
pub const CURSOR_RESETS_TOTAL: &str = "symphony_datafeed_cursor_resets_total";
pub const LISTENER_FAILURES_TOTAL: &str = "symphony_listener_failures_total";
pub const ACTIVE_CHATS: &str = "symphony_active_chats";
pub const POLLER_RUNNING: &str = "symphony_datafeed_running";

/// Register descriptions with the installed recorder
pub fn describe() {
    describe_counter!(BATCHES_TOTAL, "Datafeed reads that returned successfully");
    describe_counter!(EVENTS_TOTAL, "Events received from the datafeed");
    describe_counter!(DISPATCHED_EVENTS_TOTAL, "Events dispatched, by event type");
    describe_counter!(TRANSIENT_ERRORS_TOTAL, "Datafeed reads that failed and were retried");
    describe_counter!(CURSOR_RESETS_TOTAL, "Times the backend rejected the datafeed cursor");
    describe_counter!(
        LISTENER_FAILURES_TOTAL,
        "Listener callbacks that returned an error or panicked"
    );
    describe_gauge!(ACTIVE_CHATS, "Chats currently registered in the directory");
    describe_gauge!(POLLER_RUNNING, "1 while the datafeed poller is running");
}

/// Record a datafeed read that returned `events` events
pub fn record_batch(events: usize) {
    counter!(BATCHES_TOTAL).increment(1);
    if events > 0 {
        counter!(EVENTS_TOTAL).increment(events as u64);
    }
}

/// Record a dispatched event by type
pub fn record_event(event_type: &str) {
    counter!(DISPATCHED_EVENTS_TOTAL, "type" => event_type.to_string()).increment(1);
}

pub fn record_transient_error() {
    counter!(TRANSIENT_ERRORS_TOTAL).increment(1);
}

pub fn record_cursor_reset() {
    counter!(CURSOR_RESETS_TOTAL).increment(1);
}

pub fn record_listener_failure() {
    counter!(LISTENER_FAILURES_TOTAL).increment(1);
}

pub fn set_active_chats(count: usize) {
    gauge!(ACTIVE_CHATS).set(count as f64);
}

pub fn set_poller_running(running: bool) {
    gauge!(POLLER_RUNNING).set(if running { 1.0 } else { 0.0 });
}
