//! Bundle creation timestamp: seconds since the DTN epoch plus a sequence
//! number disambiguating bundles created within the same second.

use crate::error::Error;
use crate::sdnv;

/// 2000-01-01T00:00:00Z, the DTN epoch, expressed as a Unix timestamp.
pub const DTN_EPOCH_UNIX_SECS: u64 = 946_684_800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CreationTimestamp {
    /// Seconds since the DTN epoch.
    pub time: u64,
    /// Disambiguates bundles with the same source and the same `time`.
    pub sequence: u64,
}

impl CreationTimestamp {
    pub fn new(time: u64, sequence: u64) -> Self {
        Self { time, sequence }
    }

    /// Builds a timestamp from a Unix time, clamping to the DTN epoch if
    /// `unix_secs` predates it (creation timestamp 0 denotes "not indicated
    /// by the source" per RFC 5050 §4.1.1, so 0 is valid but then carries no
    /// real meaning for lifetime/expiry computations).
    pub fn from_unix_secs(unix_secs: u64, sequence: u64) -> Self {
        let time = unix_secs.saturating_sub(DTN_EPOCH_UNIX_SECS);
        Self { time, sequence }
    }

    pub fn to_unix_secs(self) -> u64 {
        self.time + DTN_EPOCH_UNIX_SECS
    }

    pub(crate) fn encode(self, buf: &mut Vec<u8>) {
        sdnv::encode(self.time, buf);
        sdnv::encode(self.sequence, buf);
    }

    pub(crate) fn decode(data: &[u8]) -> Result<(Self, usize), Error> {
        let (time, n1) = sdnv::decode(data)?;
        let (sequence, n2) = sdnv::decode(&data[n1..])?;
        Ok((Self { time, sequence }, n1 + n2))
    }

    pub(crate) fn encoded_len(self) -> usize {
        sdnv::encoded_len(self.time) + sdnv::encoded_len(self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips() {
        let ts = CreationTimestamp::new(123_456, 7);
        let mut buf = Vec::new();
        ts.encode(&mut buf);
        assert_eq!(buf.len(), ts.encoded_len());
        let (decoded, len) = CreationTimestamp::decode(&buf).unwrap();
        assert_eq!(decoded, ts);
        assert_eq!(len, buf.len());
    }

    #[test]
    fn unix_time_conversion_roundtrips() {
        let ts = CreationTimestamp::from_unix_secs(DTN_EPOCH_UNIX_SECS + 10, 0);
        assert_eq!(ts.time, 10);
        assert_eq!(ts.to_unix_secs(), DTN_EPOCH_UNIX_SECS + 10);
    }
}
