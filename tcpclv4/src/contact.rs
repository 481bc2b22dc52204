//! The TCPCLv4 contact header: `"dtn!"` + version + a single-bit flags byte,
//! exchanged before any TLS upgrade or SESSION_INIT traffic.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};

const MAGIC: &[u8; 4] = b"dtn!";
const VERSION: u8 = 4;
const FLAG_CAN_TLS: u8 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContactHeader {
    pub can_tls: bool,
}

impl ContactHeader {
    pub fn encode(&self, out: &mut BytesMut) {
        out.extend_from_slice(MAGIC);
        out.put_u8(VERSION);
        out.put_u8(if self.can_tls { FLAG_CAN_TLS } else { 0 });
    }

    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>> {
        if buf.len() < 6 {
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
        buf.advance(6);
        Ok(Some(Self { can_tls: flags & FLAG_CAN_TLS != 0 }))
    }

    /// Negotiated TLS use: both sides must advertise `CAN_TLS`.
    pub fn negotiate_tls(&self, peer: &ContactHeader) -> bool {
        self.can_tls && peer.can_tls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let header = ContactHeader { can_tls: true };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        let decoded = ContactHeader::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, header);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_waits_for_more_bytes() {
        let mut buf = BytesMut::from(&b"dtn!\x04"[..]);
        assert!(ContactHeader::decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = BytesMut::from(&b"xxxx\x04\x00"[..]);
        assert!(matches!(ContactHeader::decode(&mut buf), Err(Error::BadMagic)));
    }

    #[test]
    fn tls_requires_both_sides() {
        let us = ContactHeader { can_tls: true };
        let them_no = ContactHeader { can_tls: false };
        let them_yes = ContactHeader { can_tls: true };
        assert!(!us.negotiate_tls(&them_no));
        assert!(us.negotiate_tls(&them_yes));
    }
}
