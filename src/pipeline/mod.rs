//! Inbound message pipeline.
//!
//! All resolved webhook events flow through `MessageRouter::route()`, which
//! evaluates the priority branches in strict order:
//! 1. active verification context → Verification State Machine (no classifier)
//! 2. active reminder-confirmation context → keyword matcher
//! 3. no context, patient still PENDING → Verification SM (expiry safety net)
//! 4. no context, VERIFIED + confirmation keyword → latest awaiting reminder
//! 5. everything else → intent classifier, with a generic-ack fallback
//!
//! Deterministic keyword matching always wins where a prior prompt created a
//! specific expectation; the classifier only sees genuinely open-ended text.

pub mod actions;
pub mod confirmation;
pub mod keywords;
pub mod router;
pub mod verification;
