//! Bundle Age Block: a single SDNV counting microseconds of age accrued
//! since the bundle was created, for nodes without a reliable clock.

use crate::error::Error;
use crate::sdnv;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleAge {
    pub age_microseconds: u64,
}

impl BundleAge {
    pub fn new(age_microseconds: u64) -> Self {
        Self { age_microseconds }
    }

    pub fn serialized_size(&self) -> u64 {
        sdnv::encoded_len(self.age_microseconds) as u64
    }

    pub fn serialize(&self, buf: &mut Vec<u8>) {
        sdnv::encode(self.age_microseconds, buf);
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, Error> {
        let (age_microseconds, _) = sdnv::decode(data)?;
        Ok(Self { age_microseconds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips() {
        let age = BundleAge::new(123_456_789);
        let mut buf = Vec::new();
        age.serialize(&mut buf);
        assert_eq!(buf.len(), age.serialized_size() as usize);
        assert_eq!(BundleAge::deserialize(&buf).unwrap(), age);
    }
}
