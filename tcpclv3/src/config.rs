//! Caller-constructed session configuration. No file or environment parsing
//! happens in this crate; a host picks values and builds a `Config`.

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Our local node EID, always advertised with `service_id = 0`.
    pub local_eid: bpcore_bpv6::Eid,

    /// If set, the peer's contact-header EID must match exactly or the
    /// session is shut down with a contact-failure reason.
    pub expected_remote_eid: Option<bpcore_bpv6::Eid>,

    /// Keepalive interval we advertise, in seconds. `0` disables keepalive
    /// on our side (negotiated interval is still `min(ours, theirs)`).
    pub keepalive_interval: u16,

    /// Largest single data segment we will ever build when link-layer
    /// fragmenting an outgoing bundle.
    pub max_fragment_size: usize,

    /// Capacity added to `max_unacked` when sizing the per-connection ack
    /// ring (`K` in the data model's `max_unacked + K` formula for v3).
    pub ack_ring_slack: usize,

    pub request_acks: bool,
    pub reactive_fragmentation: bool,
    pub bundle_refusals: bool,
    pub length_messages: bool,

    pub max_unacked: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_eid: bpcore_bpv6::Eid::new(0, 0),
            expected_remote_eid: None,
            keepalive_interval: 60,
            max_fragment_size: 0x1_0000,
            ack_ring_slack: 5,
            request_acks: true,
            reactive_fragmentation: true,
            bundle_refusals: true,
            length_messages: true,
            max_unacked: 16,
        }
    }
}

impl Config {
    pub fn ack_ring_capacity(&self) -> usize {
        self.max_unacked + self.ack_ring_slack
    }
}
