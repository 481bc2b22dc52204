//! Previous Hop Insertion Block: records the EID of the node that most
//! recently forwarded this bundle, as two consecutive null-terminated
//! strings — scheme `"ipn"` and SSP `"<node>.<service>"`.

use crate::eid::Eid;
use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phib {
    pub previous_hop: Eid,
}

impl Phib {
    pub fn new(previous_hop: Eid) -> Self {
        Self { previous_hop }
    }

    pub fn serialized_size(&self) -> u64 {
        // "ipn:N.S\0" with the ':' turned into a second '\0' is the same
        // length as the plain "ipn:N.S" string plus one terminator byte.
        self.previous_hop.to_string().len() as u64 + 1
    }

    pub fn serialize(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        buf.extend_from_slice(self.previous_hop.to_string().as_bytes());
        buf.push(0);
        let colon = buf[start..]
            .iter()
            .position(|&b| b == b':')
            .expect("ipn: EID always contains ':'");
        buf[start + colon] = 0;
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, Error> {
        let mut parts = data.splitn(3, |&b| b == 0);
        let scheme = parts.next().ok_or(Error::MalformedPhib)?;
        let ssp = parts.next().ok_or(Error::MalformedPhib)?;
        if scheme != b"ipn" {
            return Err(Error::MalformedPhib);
        }
        let ssp = std::str::from_utf8(ssp).map_err(|_| Error::MalformedPhib)?;
        let previous_hop: Eid = format!("ipn:{ssp}")
            .parse()
            .map_err(|_| Error::MalformedPhib)?;
        Ok(Self { previous_hop })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips() {
        let phib = Phib::new(Eid::new(7, 0));
        let mut buf = Vec::new();
        phib.serialize(&mut buf);
        assert_eq!(buf, b"ipn\x007.0\x00");
        assert_eq!(buf.len(), phib.serialized_size() as usize);
        assert_eq!(Phib::deserialize(&buf).unwrap(), phib);
    }

    #[test]
    fn rejects_non_ipn_scheme() {
        assert!(matches!(
            Phib::deserialize(b"dtn\x00foo\x00"),
            Err(Error::MalformedPhib)
        ));
    }
}
