//! Shared base for the TCPCLv3 and TCPCLv4 links: the pending-ack ring,
//! atomic telemetry counters, and the drain-on-destruct helper. Factored out
//! so neither convergence-layer crate duplicates it.

pub mod ack_ring;
pub mod drain;
pub mod telemetry;

pub use ack_ring::{AckRing, PendingAck};
pub use drain::{
    try_to_wait_for_all_bundles_to_finish_sending, DEFAULT_MAX_STALLS, DEFAULT_TIMEOUT_PER_ATTEMPT,
};
pub use telemetry::LinkTelemetry;
