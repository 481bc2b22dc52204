//! Caller-constructed session configuration, split the way the teacher's v4
//! config separates connection-level fields from TLS material.

use std::path::PathBuf;

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    pub local_eid: bpcore_bpv6::Eid,

    /// If set, the peer's SESSION_INIT node id must match exactly or the
    /// session is torn down with `CONTACT_FAILURE`.
    pub expected_remote_eid: Option<bpcore_bpv6::Eid>,

    pub keepalive_interval: u16,
    pub segment_mru: u64,
    pub transfer_mru: u64,

    /// Largest bundle this side will ever hand to `forward()`; used only to
    /// size the outgoing segment ring (`maxUnackedBundles ×
    /// ceil(max_bundle / segment_mru) + 10`).
    pub max_bundle_size: u64,
    pub max_unacked: usize,

    pub tls: TlsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_eid: bpcore_bpv6::Eid::new(0, 0),
            expected_remote_eid: None,
            keepalive_interval: 60,
            segment_mru: 16384,
            transfer_mru: 0x2_0000_0000_0000,
            max_bundle_size: 0x10_0000,
            max_unacked: 16,
            tls: TlsConfig::default(),
        }
    }
}

impl Config {
    /// `maxUnackedBundles × ceil(max_bundle / segment_mru) + 10`.
    pub fn segment_ring_capacity(&self) -> usize {
        let segments_per_bundle = self.max_bundle_size.div_ceil(self.segment_mru.max(1));
        self.max_unacked * segments_per_bundle as usize + 10
    }
}

#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TlsConfig {
    /// Require a negotiated TLS upgrade; if the peer doesn't advertise
    /// `CAN_TLS`, terminate the session with `CONTACT_FAILURE`.
    pub require_tls: bool,

    pub server_cert: Option<PathBuf>,
    pub server_key: Option<PathBuf>,
    pub ca_bundle: Option<PathBuf>,
    pub server_name: Option<String>,

    /// Skip server-certificate verification. Development only.
    pub accept_self_signed: bool,
}
