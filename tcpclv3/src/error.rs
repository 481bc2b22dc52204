//! Error kinds for the TCPCLv3 link, grouped per the core's error-handling
//! design: malformed wire data, protocol violations, resource limits, and
//! transient I/O failures are distinguished so callers can tell a bad peer
//! from a local back-pressure condition.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("contact header prefix is not 'dtn!'")]
    BadMagic,

    #[error("unsupported contact header version {0}")]
    UnsupportedVersion(u8),

    #[error("remote EID {actual} does not match expected {expected}")]
    UnexpectedRemoteEid {
        expected: bpcore_bpv6::Eid,
        actual: bpcore_bpv6::Eid,
    },

    #[error("local EID for a TCPCLv3 contact header must have service id 0")]
    LocalEidMustBeServiceZero,

    #[error(transparent)]
    Eid(#[from] bpcore_bpv6::eid::EidError),

    #[error("SDNV overflow or truncation")]
    Sdnv,

    #[error("data segment has no start/end flags set and no session in progress")]
    UnexpectedSegment,

    #[error("ack cumulative length {actual} does not match expected {expected}")]
    AckMismatch { expected: u64, actual: u64 },

    #[error("peer message stream truncated")]
    Truncated,

    #[error("unknown message type byte {0:#x}")]
    UnknownMessageType(u8),

    #[error("peer sent Shutdown: reason={reason:?}")]
    PeerShutdown { reason: Option<u8> },

    #[error("no keepalive or data received within {0:?}")]
    IdleTimeout(std::time::Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
