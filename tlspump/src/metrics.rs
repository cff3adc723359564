//! tlspump metrics.
//!
//! Process-wide counters for bytes moved and fetch attempts. Registered with
//! metriken, so any exposition layer that walks the metriken registry picks
//! them up.

use metriken::{Counter, metric};

// ── Bytes ────────────────────────────────────────────────────────

#[metric(
    name = "tlspump/ciphertext/received",
    description = "Encrypted bytes read from the socket"
)]
pub static CIPHERTEXT_RECEIVED: Counter = Counter::new();

#[metric(
    name = "tlspump/ciphertext/sent",
    description = "Encrypted bytes written to the socket"
)]
pub static CIPHERTEXT_SENT: Counter = Counter::new();

#[metric(
    name = "tlspump/plaintext/delivered",
    description = "Decrypted bytes forwarded to the output sink"
)]
pub static PLAINTEXT_DELIVERED: Counter = Counter::new();

// ── Event loop ───────────────────────────────────────────────────

#[metric(
    name = "tlspump/readiness/wakeups",
    description = "Readiness waits that returned"
)]
pub static READINESS_WAKEUPS: Counter = Counter::new();

// ── Attempts ─────────────────────────────────────────────────────

#[metric(
    name = "tlspump/attempts/completed",
    description = "Fetch attempts that ran to completion"
)]
pub static ATTEMPTS_COMPLETED: Counter = Counter::new();

#[metric(
    name = "tlspump/attempts/failed",
    description = "Fetch attempts that failed"
)]
pub static ATTEMPTS_FAILED: Counter = Counter::new();

/// Point-in-time copy of the counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub ciphertext_received: u64,
    pub ciphertext_sent: u64,
    pub plaintext_delivered: u64,
    pub readiness_wakeups: u64,
    pub attempts_completed: u64,
    pub attempts_failed: u64,
}

/// Read all counters.
pub fn snapshot() -> Snapshot {
    Snapshot {
        ciphertext_received: CIPHERTEXT_RECEIVED.value(),
        ciphertext_sent: CIPHERTEXT_SENT.value(),
        plaintext_delivered: PLAINTEXT_DELIVERED.value(),
        readiness_wakeups: READINESS_WAKEUPS.value(),
        attempts_completed: ATTEMPTS_COMPLETED.value(),
        attempts_failed: ATTEMPTS_FAILED.value(),
    }
}
