//! Transport metrics.
//!
//! Process-wide counters covering every transport, registered with
//! `metriken` so whatever exposition the application runs picks them up.

use metriken::{Counter, Gauge, metric};

// ── Requests and replies ─────────────────────────────────────────

#[metric(
    name = "resp_mux/requests/written",
    description = "Requests handed to the channel's write side"
)]
pub static REQUESTS_WRITTEN: Counter = Counter::new();

#[metric(
    name = "resp_mux/replies/received",
    description = "Reply frames paired with a pending request"
)]
pub static REPLIES_RECEIVED: Counter = Counter::new();

#[metric(
    name = "resp_mux/replies/discarded",
    description = "Replies dropped because their operation was canceled"
)]
pub static REPLIES_DISCARDED: Counter = Counter::new();

#[metric(
    name = "resp_mux/pushes/received",
    description = "Out-of-band push frames received"
)]
pub static PUSHES_RECEIVED: Counter = Counter::new();

// ── Bytes ────────────────────────────────────────────────────────

#[metric(name = "resp_mux/bytes/received", description = "Total bytes received")]
pub static BYTES_RECEIVED: Counter = Counter::new();

#[metric(name = "resp_mux/bytes/sent", description = "Total bytes sent")]
pub static BYTES_SENT: Counter = Counter::new();

// ── Transport lifecycle ──────────────────────────────────────────

#[metric(
    name = "resp_mux/transports/active",
    description = "Transports not yet closed"
)]
pub static TRANSPORTS_ACTIVE: Gauge = Gauge::new();

#[metric(
    name = "resp_mux/transports/faulted",
    description = "Transports terminated by a fault"
)]
pub static TRANSPORT_FAULTS: Counter = Counter::new();
