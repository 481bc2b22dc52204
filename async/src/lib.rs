//! Runtime-agnostic async primitives shared by the TCPCL convergence layers.
//!
//! The link state machines in `bpcore-tcpclv3`/`bpcore-tcpclv4` each bind to
//! exactly one executor and need three things from it: a way to spawn
//! cancellable background tasks (keepalive timers, the idle-timeout guard), a
//! way to cancel them cooperatively rather than by mutating state a task
//! might be reading, and a plain sleep. This crate wraps `tokio`'s primitives
//! so the link code doesn't reach for `tokio_util` directly.

pub mod cancellation_token;
pub mod notify;
pub mod task_pool;
pub mod time;

pub use cancellation_token::CancellationToken;
pub use notify::Notify;
pub use task_pool::TaskPool;
