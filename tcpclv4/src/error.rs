//! Error kinds for the TCPCLv4 link. Mirrors the v3 crate's split between
//! malformed wire data, protocol violations, resource limits, and transient
//! I/O failures, with the additional session/transfer extension and
//! transfer-id exhaustion cases v4 introduces.

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

    #[error(transparent)]
    Eid(#[from] bpcore_bpv6::eid::EidError),

    #[error("TLS required by local policy but not negotiated with peer")]
    TlsRequired,

    #[error(transparent)]
    Tls(#[from] crate::tls::TlsError),

    #[error("unknown critical session extension, type {0:#x}")]
    UnknownCriticalSessionExtension(u16),

    #[error("unknown critical transfer extension, type {0:#x}")]
    UnknownCriticalTransferExtension(u16),

    #[error("transfer id space exhausted")]
    TransferIdExhausted,

    #[error("transfer segment for unknown or out-of-order transfer id {0}")]
    UnexpectedTransferId(u64),

    #[error("xfer ack (transfer={transfer_id}, acked={actual}) does not match expected (transfer={expected_transfer_id}, acked={expected})")]
    AckMismatch {
        expected_transfer_id: u64,
        expected: u64,
        transfer_id: u64,
        actual: u64,
    },

    #[error("segment MRU exceeded: {got} > {limit}")]
    SegmentMruExceeded { got: u64, limit: u64 },

    #[error("transfer MRU exceeded: {got} > {limit}")]
    TransferMruExceeded { got: u64, limit: u64 },

    #[error("peer sent SESS_TERM: reason={reason:?} reply={reply}")]
    PeerSessTerm { reason: u8, reply: bool },

    #[error("expected {0} during handshake, got a different message")]
    UnexpectedHandshakeMessage(&'static str),

    #[error("message stream truncated")]
    Truncated,

    #[error("unknown message type byte {0:#x}")]
    UnknownMessageType(u8),

    #[error("no keepalive or data received within {0:?}")]
    IdleTimeout(std::time::Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
