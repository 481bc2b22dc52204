//! TCPCLv3 (RFC 7242) bidirectional convergence-layer link: contact header
//! handshake, segmented bundle transfer with cumulative-length acks, and
//! keepalive-driven session liveness.

pub mod codec;
pub mod config;
pub mod contact;
pub mod error;
pub mod handshake;
pub mod session;
pub mod timers;

pub use config::Config;
pub use contact::ContactHeader;
pub use error::Error;
pub use handshake::{perform as perform_handshake, HandshakeOutcome};
pub use session::{LinkCallbacks, Session, SessionHandle};
