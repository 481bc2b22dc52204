//! Cancellation token used to signal a cooperative task to stop.
//!
//! Cancellation is observed by the awaiting task itself, alongside its real
//! work in a `select!`, rather than by mutating state the task might be
//! reading out from under it.

/// A token for cooperative cancellation of async operations.
///
/// Each TCPCL link owns one top-level token and derives a child token per
/// timer task, so a single timer can be cancelled (e.g. the need-to-send
/// timer is reset every time a send occurs) without disturbing the others.
pub type CancellationToken = tokio_util::sync::CancellationToken;
