//! The primary bundle block, RFC 5050 §4.5, encoded per CBHE (RFC 6260):
//! endpoint ids are encoded directly as `(node_id, service_id)` SDNV pairs in
//! the scheme-offset/SSP-offset slots, and the dictionary length is always
//! zero.

use crate::block_flags::BundleFlags;
use crate::creation_timestamp::CreationTimestamp;
use crate::eid::{Eid, Service};
use crate::error::Error;
use crate::sdnv;

pub const VERSION: u8 = 6;

/// Marks a CBHE service number slot as carrying the wildcard service, the
/// same convention RFC 6260 compressed EIDs use for "this whole node".
const WILDCARD_SERVICE_MARKER: u64 = u64::MAX;

#[derive(Debug, Clone)]
pub struct PrimaryBlock {
    pub flags: BundleFlags,
    pub destination: Eid,
    pub source: Eid,
    pub report_to: Eid,
    pub custodian: Eid,
    pub creation_timestamp: CreationTimestamp,
    pub lifetime: u64,
    /// Offset of this fragment's payload data within the original ADU, and
    /// the original ADU's total length. `Some` iff `flags.is_fragment`.
    pub fragment: Option<(u64, u64)>,
}

fn encode_service(service: Service) -> u64 {
    match service {
        Service::Id(n) => n,
        Service::Wildcard => WILDCARD_SERVICE_MARKER,
    }
}

fn decode_service(raw: u64) -> Service {
    if raw == WILDCARD_SERVICE_MARKER {
        Service::Wildcard
    } else {
        Service::Id(raw)
    }
}

impl PrimaryBlock {
    pub fn new(
        destination: Eid,
        source: Eid,
        report_to: Eid,
        custodian: Eid,
        lifetime: u64,
    ) -> Self {
        Self {
            flags: BundleFlags::default(),
            destination,
            source,
            report_to,
            custodian,
            creation_timestamp: CreationTimestamp::default(),
            lifetime,
            fragment: None,
        }
    }

    pub fn is_fragment(&self) -> bool {
        self.flags.is_fragment
    }

    fn encoded_len_excluding_flags_and_length(&self) -> u64 {
        let mut n = 0u64;
        n += sdnv::encoded_len(self.destination.node_id) as u64;
        n += sdnv::encoded_len(encode_service(self.destination.service_id)) as u64;
        n += sdnv::encoded_len(self.source.node_id) as u64;
        n += sdnv::encoded_len(encode_service(self.source.service_id)) as u64;
        n += sdnv::encoded_len(self.report_to.node_id) as u64;
        n += sdnv::encoded_len(encode_service(self.report_to.service_id)) as u64;
        n += sdnv::encoded_len(self.custodian.node_id) as u64;
        n += sdnv::encoded_len(encode_service(self.custodian.service_id)) as u64;
        n += self.creation_timestamp.encoded_len() as u64;
        n += sdnv::encoded_len(self.lifetime) as u64;
        n += sdnv::encoded_len(0) as u64; // dictionary length, always 0
        if let Some((offset, total)) = self.fragment {
            n += sdnv::encoded_len(offset) as u64;
            n += sdnv::encoded_len(total) as u64;
        }
        n
    }

    /// The total encoded size of this primary block, version byte included.
    pub fn encoded_len(&self) -> u64 {
        let body_len = self.encoded_len_excluding_flags_and_length();
        1 + sdnv::encoded_len(u64::from(&self.flags)) as u64
            + sdnv::encoded_len(body_len) as u64
            + body_len
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(VERSION);
        sdnv::encode(u64::from(&self.flags), buf);
        sdnv::encode(self.encoded_len_excluding_flags_and_length(), buf);

        sdnv::encode(self.destination.node_id, buf);
        sdnv::encode(encode_service(self.destination.service_id), buf);
        sdnv::encode(self.source.node_id, buf);
        sdnv::encode(encode_service(self.source.service_id), buf);
        sdnv::encode(self.report_to.node_id, buf);
        sdnv::encode(encode_service(self.report_to.service_id), buf);
        sdnv::encode(self.custodian.node_id, buf);
        sdnv::encode(encode_service(self.custodian.service_id), buf);
        self.creation_timestamp.encode(buf);
        sdnv::encode(self.lifetime, buf);
        sdnv::encode(0, buf);

        if let Some((offset, total)) = self.fragment {
            sdnv::encode(offset, buf);
            sdnv::encode(total, buf);
        }
    }

    /// Decodes a primary block from the front of `data`, returning it along
    /// with the number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), Error> {
        let version = *data.first().ok_or(Error::PrimaryTruncated)?;
        if version != VERSION {
            return Err(Error::InvalidVersion(version));
        }
        let mut pos = 1;

        let (raw_flags, n) = sdnv::decode(&data[pos..])?;
        pos += n;
        let flags = BundleFlags::from(raw_flags);

        let (body_len, n) = sdnv::decode(&data[pos..])?;
        pos += n;
        let body_start = pos;

        let (dest_node, n) = sdnv::decode(&data[pos..])?;
        pos += n;
        let (dest_service, n) = sdnv::decode(&data[pos..])?;
        pos += n;
        let (src_node, n) = sdnv::decode(&data[pos..])?;
        pos += n;
        let (src_service, n) = sdnv::decode(&data[pos..])?;
        pos += n;
        let (report_node, n) = sdnv::decode(&data[pos..])?;
        pos += n;
        let (report_service, n) = sdnv::decode(&data[pos..])?;
        pos += n;
        let (cust_node, n) = sdnv::decode(&data[pos..])?;
        pos += n;
        let (cust_service, n) = sdnv::decode(&data[pos..])?;
        pos += n;

        let (creation_timestamp, n) = CreationTimestamp::decode(&data[pos..])?;
        pos += n;

        let (lifetime, n) = sdnv::decode(&data[pos..])?;
        pos += n;

        let (dict_len, n) = sdnv::decode(&data[pos..])?;
        pos += n;
        // CBHE-only: skip any dictionary bytes a non-conforming peer sent
        // rather than reject the bundle outright.
        pos += dict_len as usize;

        let fragment = if flags.is_fragment {
            let (offset, n) = sdnv::decode(&data[pos..])?;
            pos += n;
            let (total, n) = sdnv::decode(&data[pos..])?;
            pos += n;
            Some((offset, total))
        } else {
            None
        };

        if pos - body_start != body_len as usize {
            return Err(Error::PrimaryTruncated);
        }

        Ok((
            PrimaryBlock {
                flags,
                destination: Eid {
                    node_id: dest_node,
                    service_id: decode_service(dest_service),
                },
                source: Eid {
                    node_id: src_node,
                    service_id: decode_service(src_service),
                },
                report_to: Eid {
                    node_id: report_node,
                    service_id: decode_service(report_service),
                },
                custodian: Eid {
                    node_id: cust_node,
                    service_id: decode_service(cust_service),
                },
                creation_timestamp,
                lifetime,
                fragment,
            },
            pos,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PrimaryBlock {
        PrimaryBlock::new(
            Eid::new(2, 1),
            Eid::new(1, 0),
            Eid::NULL,
            Eid::new(1, 0),
            3600,
        )
    }

    #[test]
    fn roundtrips_non_fragment() {
        let pb = sample();
        let mut buf = Vec::new();
        pb.encode(&mut buf);
        assert_eq!(buf.len(), pb.encoded_len() as usize);

        let (decoded, len) = PrimaryBlock::decode(&buf).unwrap();
        assert_eq!(len, buf.len());
        assert_eq!(decoded.destination, pb.destination);
        assert_eq!(decoded.source, pb.source);
        assert_eq!(decoded.lifetime, pb.lifetime);
        assert!(!decoded.is_fragment());
    }

    #[test]
    fn roundtrips_fragment() {
        let mut pb = sample();
        pb.flags.is_fragment = true;
        pb.fragment = Some((1000, 5000));
        let mut buf = Vec::new();
        pb.encode(&mut buf);

        let (decoded, len) = PrimaryBlock::decode(&buf).unwrap();
        assert_eq!(len, buf.len());
        assert!(decoded.is_fragment());
        assert_eq!(decoded.fragment, Some((1000, 5000)));
    }

    #[test]
    fn roundtrips_wildcard_service() {
        let mut pb = sample();
        pb.destination = Eid::with_wildcard_service(42);
        let mut buf = Vec::new();
        pb.encode(&mut buf);

        let (decoded, _) = PrimaryBlock::decode(&buf).unwrap();
        assert_eq!(decoded.destination, Eid::with_wildcard_service(42));
    }

    #[test]
    fn rejects_wrong_version() {
        let data = [7u8, 0, 0];
        assert!(matches!(
            PrimaryBlock::decode(&data),
            Err(Error::InvalidVersion(7))
        ));
    }

    #[test]
    fn rejects_truncated_body() {
        let pb = sample();
        let mut buf = Vec::new();
        pb.encode(&mut buf);
        buf.truncate(buf.len() - 1);
        assert!(PrimaryBlock::decode(&buf).is_err());
    }
}
