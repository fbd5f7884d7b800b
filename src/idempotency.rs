//! Idempotency ledger — detects re-delivery of the same logical event.
//!
//! The upstream gateway does not guarantee a message id, so the fingerprint
//! falls back to sender + timestamp + text. The ledger itself lives in the
//! store (one `INSERT OR IGNORE` per event); this module owns fingerprint
//! construction and the fail-open policy.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::store::Store;
use crate::webhook::payload::CanonicalEvent;

/// Stable hex fingerprint for an inbound event.
///
/// Uses the gateway message id when present; otherwise hashes the
/// (sender, timestamp, text) triple, which is stable across re-deliveries
/// of the same logical message.
pub fn fingerprint(event: &CanonicalEvent) -> String {
    let mut hasher = Sha256::new();
    match &event.message_id {
        Some(id) => {
            hasher.update(b"id\n");
            hasher.update(id.as_bytes());
        }
        None => {
            hasher.update(b"fallback\n");
            hasher.update(event.sender.as_bytes());
            hasher.update(b"\n");
            hasher.update(event.timestamp.to_rfc3339().as_bytes());
            hasher.update(b"\n");
            hasher.update(event.text().as_bytes());
        }
    }
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Ledger over the store's marker table.
pub struct IdempotencyLedger {
    store: Arc<dyn Store>,
    window: Duration,
}

impl IdempotencyLedger {
    pub fn new(store: Arc<dyn Store>, window: Duration) -> Self {
        Self { store, window }
    }

    /// True when this event has already been processed within the window.
    ///
    /// A storage failure fails OPEN: missing a patient reply is worse than
    /// the rare duplicate processing, so errors report "not a duplicate".
    pub async fn is_duplicate(&self, fingerprint: &str) -> bool {
        match self.store.check_and_set_marker(fingerprint, self.window).await {
            Ok(first_seen) => !first_seen,
            Err(e) => {
                warn!(error = %e, "Idempotency ledger unavailable; failing open");
                false
            }
        }
    }
}
