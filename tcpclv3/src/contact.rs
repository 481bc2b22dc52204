//! The TCPCLv3 contact header: a fixed 8-byte prefix followed by the local
//! EID string, exchanged by both sides immediately after the TCP connection
//! (or a reactive-fragmentation-capable peer's framing) is established.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};

const MAGIC: &[u8; 4] = b"dtn!";
const VERSION: u8 = 3;

const FLAG_REQUEST_ACK: u8 = 1 << 0;
const FLAG_REACTIVE_FRAGMENTATION: u8 = 1 << 1;
const FLAG_BUNDLE_REFUSALS: u8 = 1 << 2;
const FLAG_LENGTH_MESSAGES: u8 = 1 << 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactHeader {
    pub request_acks: bool,
    pub reactive_fragmentation: bool,
    pub bundle_refusals: bool,
    pub length_messages: bool,
    pub keepalive_interval: u16,
    pub local_eid: bpcore_bpv6::Eid,
}

impl ContactHeader {
    pub fn from_config(config: &crate::config::Config) -> Result<Self> {
        if config.local_eid.service_number() != Some(0) {
            return Err(Error::LocalEidMustBeServiceZero);
        }
        Ok(Self {
            request_acks: config.request_acks,
            reactive_fragmentation: config.reactive_fragmentation,
            bundle_refusals: config.bundle_refusals,
            length_messages: config.length_messages,
            keepalive_interval: config.keepalive_interval,
            local_eid: config.local_eid,
        })
    }

    fn flags(&self) -> u8 {
        let mut f = 0;
        if self.request_acks {
            f |= FLAG_REQUEST_ACK;
        }
        if self.reactive_fragmentation {
            f |= FLAG_REACTIVE_FRAGMENTATION;
        }
        if self.bundle_refusals {
            f |= FLAG_BUNDLE_REFUSALS;
        }
        if self.length_messages {
            f |= FLAG_LENGTH_MESSAGES;
        }
        f
    }

    pub fn encode(&self, out: &mut BytesMut) {
        out.extend_from_slice(MAGIC);
        out.put_u8(VERSION);
        out.put_u8(self.flags());
        out.put_u16(self.keepalive_interval);
        let eid = self.local_eid.to_string();
        out.put_u16(eid.len() as u16);
        out.extend_from_slice(eid.as_bytes());
    }

    /// Decodes a contact header from the front of `buf`, advancing it past
    /// the consumed bytes. Returns `Ok(None)` if `buf` does not yet contain
    /// a complete header (the caller should wait for more bytes).
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>> {
        if buf.len() < 8 {
            return Ok(None);
        }
        if &buf[0..4] != MAGIC {
            return Err(Error::BadMagic);
        }
        let version = buf[4];
        if version != VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let flags = buf[5];
        let keepalive_interval = u16::from_be_bytes([buf[6], buf[7]]);

        if buf.len() < 10 {
            return Ok(None);
        }
        let eid_len = u16::from_be_bytes([buf[8], buf[9]]) as usize;
        if buf.len() < 10 + eid_len {
            return Ok(None);
        }

        let eid_str = std::str::from_utf8(&buf[10..10 + eid_len])
            .map_err(|_| Error::Eid(bpcore_bpv6::eid::EidError::MissingScheme))?;
        let local_eid: bpcore_bpv6::Eid = eid_str.parse()?;

        buf.advance(10 + eid_len);

        Ok(Some(Self {
            request_acks: flags & FLAG_REQUEST_ACK != 0,
            reactive_fragmentation: flags & FLAG_REACTIVE_FRAGMENTATION != 0,
            bundle_refusals: flags & FLAG_BUNDLE_REFUSALS != 0,
            length_messages: flags & FLAG_LENGTH_MESSAGES != 0,
            keepalive_interval,
            local_eid,
        }))
    }

    /// Negotiated keepalive per RFC 7242: the lesser of both sides'
    /// intervals; either side offering `0` disables keepalive entirely.
    pub fn negotiate_keepalive(&self, peer: &ContactHeader) -> u16 {
        self.keepalive_interval.min(peer.keepalive_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ContactHeader {
        ContactHeader {
            request_acks: true,
            reactive_fragmentation: false,
            bundle_refusals: true,
            length_messages: false,
            keepalive_interval: 45,
            local_eid: bpcore_bpv6::Eid::new(7, 0),
        }
    }

    #[test]
    fn encode_decode_round_trips() {
        let header = sample();
        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        let decoded = ContactHeader::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, header);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_waits_for_more_bytes() {
        let header = sample();
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        buf.truncate(buf.len() - 1);

        assert!(ContactHeader::decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = BytesMut::from(&b"xxxx\x03\x00\x00\x00"[..]);
        assert!(matches!(ContactHeader::decode(&mut buf), Err(Error::BadMagic)));
    }

    #[test]
    fn negotiates_minimum_keepalive() {
        let mut ours = sample();
        ours.keepalive_interval = 60;
        let mut theirs = sample();
        theirs.keepalive_interval = 30;
        assert_eq!(ours.negotiate_keepalive(&theirs), 30);
    }

    #[test]
    fn rejects_non_zero_service_local_eid() {
        let mut config = crate::config::Config::default();
        config.local_eid = bpcore_bpv6::Eid::new(7, 1);
        assert!(matches!(
            ContactHeader::from_config(&config),
            Err(Error::LocalEidMustBeServiceZero)
        ));
    }
}
