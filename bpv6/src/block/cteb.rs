//! Custody Transfer Enhancement Block (CTEB): an SDNV custody ID followed by
//! the creator-custodian's EID, written as a raw (not null-terminated) ASCII
//! string since the block's own length field already marks the end.

use crate::eid::Eid;
use crate::error::Error;
use crate::sdnv;

/// `ipn:18446744073709551615.18446744073709551615` is the longest possible
/// CBHE `ipn:` URI; anything longer than this in a CTEB is corrupt.
const MAX_CREATOR_LEN: usize = 45;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cteb {
    pub custody_id: u64,
    pub creator: Eid,
}

impl Cteb {
    pub fn new(custody_id: u64, creator: Eid) -> Self {
        Self { custody_id, creator }
    }

    pub fn serialized_size(&self) -> u64 {
        sdnv::encoded_len(self.custody_id) as u64 + self.creator.to_string().len() as u64
    }

    pub fn serialize(&self, buf: &mut Vec<u8>) {
        sdnv::encode(self.custody_id, buf);
        buf.extend_from_slice(self.creator.to_string().as_bytes());
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, Error> {
        let (custody_id, n) = sdnv::decode(data)?;
        let rest = &data[n..];
        if rest.len() > MAX_CREATOR_LEN {
            return Err(Error::MalformedCteb);
        }
        let creator_str = std::str::from_utf8(rest).map_err(|_| Error::MalformedCteb)?;
        let creator: Eid = creator_str.parse().map_err(|_| Error::MalformedCteb)?;
        Ok(Self { custody_id, creator })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips() {
        let cteb = Cteb::new(42, Eid::new(100, 1));
        let mut buf = Vec::new();
        cteb.serialize(&mut buf);
        assert_eq!(buf.len(), cteb.serialized_size() as usize);
        assert_eq!(Cteb::deserialize(&buf).unwrap(), cteb);
    }

    #[test]
    fn rejects_oversized_creator() {
        let mut buf = Vec::new();
        sdnv::encode(1, &mut buf);
        buf.extend_from_slice(&[b'x'; MAX_CREATOR_LEN + 1]);
        assert!(matches!(Cteb::deserialize(&buf), Err(Error::MalformedCteb)));
    }

    #[test]
    fn rejects_non_eid_creator() {
        let mut buf = Vec::new();
        sdnv::encode(1, &mut buf);
        buf.extend_from_slice(b"not an eid");
        assert!(matches!(Cteb::deserialize(&buf), Err(Error::MalformedCteb)));
    }
}
