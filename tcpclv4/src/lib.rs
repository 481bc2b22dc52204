//! TCPCLv4 (RFC 9174) convergence-layer link: contact header handshake with
//! optional TLS upgrade, SESSION_INIT capability negotiation, per-direction
//! transfer ids, and extension-aware segmented bundle transfer.

pub mod codec;
pub mod config;
pub mod contact;
pub mod error;
pub mod extension;
pub mod handshake;
pub mod session;
pub mod timers;
pub mod tls;

pub use config::Config;
pub use contact::ContactHeader;
pub use error::Error;
pub use handshake::{perform as perform_handshake, HandshakeOutcome, Role};
pub use session::{LinkCallbacks, Session, SessionHandle};
