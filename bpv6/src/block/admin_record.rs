//! Administrative records (RFC 5050 §6): the payload of a bundle whose
//! primary carries the `ADMINRECORD` flag. The first byte packs the record
//! type into the upper four bits and an is-fragment bit into bit 0; the
//! remaining bits are reserved and always zero.

use crate::creation_timestamp::CreationTimestamp;
use crate::eid::Eid;
use crate::error::Error;
use crate::sdnv;

const RECORD_TYPE_BUNDLE_STATUS_REPORT: u8 = 1;
const RECORD_TYPE_CUSTODY_SIGNAL: u8 = 2;
const RECORD_TYPE_AGGREGATE_CUSTODY_SIGNAL: u8 = 4;

fn header_byte(record_type: u8, is_fragment: bool) -> u8 {
    (record_type << 4) | (is_fragment as u8)
}

fn decode_header(byte: u8) -> (u8, bool) {
    (byte >> 4, byte & 1 != 0)
}

/// Reason codes shared by custody signals and status reports (RFC 5050
/// §6.2/§6.3's overlapping reason-code table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reason {
    NoAdditionalInformation = 0,
    LifetimeExpired = 1,
    ForwardedOverUnidirectionalLink = 2,
    TransmissionCancelled = 3,
    DepletedStorage = 4,
    DestinationEidUnintelligible = 5,
    NoKnownRouteToDestination = 6,
    NoTimelyContactWithNextNode = 7,
    BlockUnintelligible = 8,
    Other(u8),
}

impl From<u8> for Reason {
    fn from(value: u8) -> Self {
        match value {
            0 => Reason::NoAdditionalInformation,
            1 => Reason::LifetimeExpired,
            2 => Reason::ForwardedOverUnidirectionalLink,
            3 => Reason::TransmissionCancelled,
            4 => Reason::DepletedStorage,
            5 => Reason::DestinationEidUnintelligible,
            6 => Reason::NoKnownRouteToDestination,
            7 => Reason::NoTimelyContactWithNextNode,
            8 => Reason::BlockUnintelligible,
            v => Reason::Other(v),
        }
    }
}

impl From<Reason> for u8 {
    fn from(value: Reason) -> Self {
        match value {
            Reason::NoAdditionalInformation => 0,
            Reason::LifetimeExpired => 1,
            Reason::ForwardedOverUnidirectionalLink => 2,
            Reason::TransmissionCancelled => 3,
            Reason::DepletedStorage => 4,
            Reason::DestinationEidUnintelligible => 5,
            Reason::NoKnownRouteToDestination => 6,
            Reason::NoTimelyContactWithNextNode => 7,
            Reason::BlockUnintelligible => 8,
            Reason::Other(v) => v,
        }
    }
}

/// A DTN time as carried in custody signals and status reports: seconds
/// since the DTN epoch plus a nanosecond fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalTime {
    pub seconds: u64,
    pub nanoseconds: u32,
}

impl SignalTime {
    fn encoded_len(self) -> u64 {
        sdnv::encoded_len(self.seconds) as u64 + sdnv::encoded_len(self.nanoseconds as u64) as u64
    }

    fn encode(self, buf: &mut Vec<u8>) {
        sdnv::encode(self.seconds, buf);
        sdnv::encode(self.nanoseconds as u64, buf);
    }

    fn decode(data: &[u8]) -> Result<(Self, usize), Error> {
        let (seconds, n1) = sdnv::decode(data)?;
        let (nanoseconds, n2) = sdnv::decode(&data[n1..])?;
        Ok((
            SignalTime {
                seconds,
                nanoseconds: nanoseconds as u32,
            },
            n1 + n2,
        ))
    }
}

/// RFC 5050 §6.3 custody signal: accept or refuse custody of a single
/// bundle, with a reason code for the refuse case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustodySignal {
    pub succeeded: bool,
    pub reason: Reason,
    pub fragment: Option<(u64, u64)>,
    pub signal_time: SignalTime,
    pub bundle_creation_timestamp: CreationTimestamp,
    pub subject_source_eid: Eid,
}

impl CustodySignal {
    fn is_fragment(&self) -> bool {
        self.fragment.is_some()
    }

    pub fn serialized_size(&self) -> u64 {
        let eid_str = self.subject_source_eid.to_string();
        let mut n = 2u64; // header byte + status byte
        if let Some((offset, length)) = self.fragment {
            n += sdnv::encoded_len(offset) as u64 + sdnv::encoded_len(length) as u64;
        }
        n += self.signal_time.encoded_len();
        n += self.bundle_creation_timestamp.encoded_len() as u64;
        n += sdnv::encoded_len(eid_str.len() as u64) as u64 + eid_str.len() as u64;
        n
    }

    pub fn serialize(&self, buf: &mut Vec<u8>) {
        buf.push(header_byte(RECORD_TYPE_CUSTODY_SIGNAL, self.is_fragment()));
        let status = ((self.succeeded as u8) << 7) | (u8::from(self.reason) & 0x7f);
        buf.push(status);
        if let Some((offset, length)) = self.fragment {
            sdnv::encode(offset, buf);
            sdnv::encode(length, buf);
        }
        self.signal_time.encode(buf);
        self.bundle_creation_timestamp.encode(buf);
        let eid_str = self.subject_source_eid.to_string();
        sdnv::encode(eid_str.len() as u64, buf);
        buf.extend_from_slice(eid_str.as_bytes());
    }

    fn deserialize(is_fragment: bool, data: &[u8]) -> Result<Self, Error> {
        let status = *data.first().ok_or(Error::MalformedAdminRecord)?;
        let mut pos = 1;
        let succeeded = status & 0x80 != 0;
        let reason = Reason::from(status & 0x7f);

        let fragment = if is_fragment {
            let (offset, n) = sdnv::decode(&data[pos..])?;
            pos += n;
            let (length, n) = sdnv::decode(&data[pos..])?;
            pos += n;
            Some((offset, length))
        } else {
            None
        };

        let (signal_time, n) = SignalTime::decode(&data[pos..])?;
        pos += n;

        let (bundle_creation_timestamp, n) = CreationTimestamp::decode(&data[pos..])?;
        pos += n;

        let (eid_len, n) = sdnv::decode(&data[pos..])?;
        pos += n;
        let eid_len = eid_len as usize;
        let eid_bytes = data
            .get(pos..pos + eid_len)
            .ok_or(Error::MalformedAdminRecord)?;
        let subject_source_eid: Eid = std::str::from_utf8(eid_bytes)
            .map_err(|_| Error::MalformedAdminRecord)?
            .parse()
            .map_err(|_| Error::MalformedAdminRecord)?;

        Ok(CustodySignal {
            succeeded,
            reason,
            fragment,
            signal_time,
            bundle_creation_timestamp,
            subject_source_eid,
        })
    }
}

/// One coalesced run of custody IDs an aggregate custody signal is
/// acknowledging or refusing together.
pub type CustodyIdRange = std::ops::Range<u64>;

/// RFC 5050 §4.2's aggregate custody signal extension: one status/reason
/// applied to a delta-compressed sorted set of custody-ID ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acs {
    pub succeeded: bool,
    pub reason: Reason,
    pub ranges: Vec<CustodyIdRange>,
}

impl Acs {
    pub fn serialized_size(&self) -> u64 {
        let mut n = 2u64; // header byte + status byte
        let mut previous_end = 0u64;
        for range in &self.ranges {
            let start_delta = range.start - previous_end;
            let length_minus_one = (range.end - range.start) - 1;
            n += sdnv::encoded_len(start_delta) as u64 + sdnv::encoded_len(length_minus_one) as u64;
            previous_end = range.end;
        }
        n
    }

    pub fn serialize(&self, buf: &mut Vec<u8>) {
        buf.push(header_byte(RECORD_TYPE_AGGREGATE_CUSTODY_SIGNAL, false));
        let status = ((self.succeeded as u8) << 7) | (u8::from(self.reason) & 0x7f);
        buf.push(status);
        let mut previous_end = 0u64;
        for range in &self.ranges {
            let start_delta = range.start - previous_end;
            let length_minus_one = (range.end - range.start) - 1;
            sdnv::encode(start_delta, buf);
            sdnv::encode(length_minus_one, buf);
            previous_end = range.end;
        }
    }

    fn deserialize(data: &[u8]) -> Result<Self, Error> {
        let status = *data.first().ok_or(Error::MalformedAcs)?;
        let succeeded = status & 0x80 != 0;
        let reason = Reason::from(status & 0x7f);

        let mut pos = 1;
        let mut previous_end = 0u64;
        let mut ranges = Vec::new();
        while pos < data.len() {
            let (start_delta, n) = sdnv::decode(&data[pos..])?;
            pos += n;
            let (length_minus_one, n) = sdnv::decode(&data[pos..])?;
            pos += n;

            let start = previous_end.checked_add(start_delta).ok_or(Error::MalformedAcs)?;
            let length = length_minus_one.checked_add(1).ok_or(Error::MalformedAcs)?;
            let end = start.checked_add(length).ok_or(Error::MalformedAcs)?;

            ranges.push(start..end);
            previous_end = end;
        }

        Ok(Acs {
            succeeded,
            reason,
            ranges,
        })
    }
}

/// RFC 5050 §6.2 bundle status report. Each per-event timestamp is present
/// iff the corresponding event occurred.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BundleStatusReport {
    pub reason: Option<Reason>,
    pub fragment: Option<(u64, u64)>,
    pub received: Option<SignalTime>,
    pub accepted_custody: Option<SignalTime>,
    pub forwarded: Option<SignalTime>,
    pub delivered: Option<SignalTime>,
    pub deleted: Option<SignalTime>,
    pub bundle_creation_timestamp: CreationTimestamp,
    pub source_eid: Eid,
}

impl BundleStatusReport {
    fn status_byte(&self) -> u8 {
        let mut b = 0u8;
        if self.received.is_some() {
            b |= 1 << 0;
        }
        if self.accepted_custody.is_some() {
            b |= 1 << 1;
        }
        if self.forwarded.is_some() {
            b |= 1 << 2;
        }
        if self.delivered.is_some() {
            b |= 1 << 3;
        }
        if self.deleted.is_some() {
            b |= 1 << 4;
        }
        b
    }

    fn is_fragment(&self) -> bool {
        self.fragment.is_some()
    }

    pub fn serialized_size(&self) -> u64 {
        let eid_str = self.source_eid.to_string();
        let mut n = 3u64; // header byte + status byte + reason byte
        if let Some((offset, length)) = self.fragment {
            n += sdnv::encoded_len(offset) as u64 + sdnv::encoded_len(length) as u64;
        }
        for time in [
            self.received,
            self.accepted_custody,
            self.forwarded,
            self.delivered,
            self.deleted,
        ]
        .into_iter()
        .flatten()
        {
            n += time.encoded_len();
        }
        n += self.bundle_creation_timestamp.encoded_len() as u64;
        n += sdnv::encoded_len(eid_str.len() as u64) as u64 + eid_str.len() as u64;
        n
    }

    pub fn serialize(&self, buf: &mut Vec<u8>) {
        buf.push(header_byte(RECORD_TYPE_BUNDLE_STATUS_REPORT, self.is_fragment()));
        buf.push(self.status_byte());
        buf.push(u8::from(self.reason.unwrap_or(Reason::NoAdditionalInformation)));
        if let Some((offset, length)) = self.fragment {
            sdnv::encode(offset, buf);
            sdnv::encode(length, buf);
        }
        for time in [
            self.received,
            self.accepted_custody,
            self.forwarded,
            self.delivered,
            self.deleted,
        ]
        .into_iter()
        .flatten()
        {
            time.encode(buf);
        }
        self.bundle_creation_timestamp.encode(buf);
        let eid_str = self.source_eid.to_string();
        sdnv::encode(eid_str.len() as u64, buf);
        buf.extend_from_slice(eid_str.as_bytes());
    }

    fn deserialize(is_fragment: bool, data: &[u8]) -> Result<Self, Error> {
        let status = *data.first().ok_or(Error::MalformedAdminRecord)?;
        let reason_byte = *data.get(1).ok_or(Error::MalformedAdminRecord)?;
        let mut pos = 2;

        let fragment = if is_fragment {
            let (offset, n) = sdnv::decode(&data[pos..])?;
            pos += n;
            let (length, n) = sdnv::decode(&data[pos..])?;
            pos += n;
            Some((offset, length))
        } else {
            None
        };

        let mut read_time_if = |flag_bit: u8, pos: &mut usize| -> Result<Option<SignalTime>, Error> {
            if status & (1 << flag_bit) == 0 {
                return Ok(None);
            }
            let (t, n) = SignalTime::decode(&data[*pos..])?;
            *pos += n;
            Ok(Some(t))
        };

        let received = read_time_if(0, &mut pos)?;
        let accepted_custody = read_time_if(1, &mut pos)?;
        let forwarded = read_time_if(2, &mut pos)?;
        let delivered = read_time_if(3, &mut pos)?;
        let deleted = read_time_if(4, &mut pos)?;

        let (bundle_creation_timestamp, n) = CreationTimestamp::decode(&data[pos..])?;
        pos += n;

        let (eid_len, n) = sdnv::decode(&data[pos..])?;
        pos += n;
        let eid_len = eid_len as usize;
        let eid_bytes = data
            .get(pos..pos + eid_len)
            .ok_or(Error::MalformedAdminRecord)?;
        let source_eid: Eid = std::str::from_utf8(eid_bytes)
            .map_err(|_| Error::MalformedAdminRecord)?
            .parse()
            .map_err(|_| Error::MalformedAdminRecord)?;

        Ok(BundleStatusReport {
            reason: Some(Reason::from(reason_byte)),
            fragment,
            received,
            accepted_custody,
            forwarded,
            delivered,
            deleted,
            bundle_creation_timestamp,
            source_eid,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminRecord {
    CustodySignal(CustodySignal),
    Acs(Acs),
    BundleStatusReport(BundleStatusReport),
}

impl AdminRecord {
    pub fn serialized_size(&self) -> u64 {
        match self {
            AdminRecord::CustodySignal(s) => s.serialized_size(),
            AdminRecord::Acs(a) => a.serialized_size(),
            AdminRecord::BundleStatusReport(r) => r.serialized_size(),
        }
    }

    pub fn serialize(&self, buf: &mut Vec<u8>) {
        match self {
            AdminRecord::CustodySignal(s) => s.serialize(buf),
            AdminRecord::Acs(a) => a.serialize(buf),
            AdminRecord::BundleStatusReport(r) => r.serialize(buf),
        }
    }

    /// Decodes an administrative record from a payload block's bytes. The
    /// primary's `ISFRAGMENT` flag is propagated in here since the
    /// is-fragment bit of the per-record header is otherwise ambiguous for
    /// custody signals and status reports sent about a fragment.
    pub fn deserialize(bundle_is_fragment: bool, data: &[u8]) -> Result<Self, Error> {
        let header = *data.first().ok_or(Error::MalformedAdminRecord)?;
        let (record_type, header_is_fragment) = decode_header(header);
        let is_fragment = bundle_is_fragment || header_is_fragment;
        let rest = &data[1..];

        match record_type {
            RECORD_TYPE_CUSTODY_SIGNAL => Ok(AdminRecord::CustodySignal(CustodySignal::deserialize(
                is_fragment,
                rest,
            )?)),
            RECORD_TYPE_AGGREGATE_CUSTODY_SIGNAL => Ok(AdminRecord::Acs(Acs::deserialize(rest)?)),
            RECORD_TYPE_BUNDLE_STATUS_REPORT => Ok(AdminRecord::BundleStatusReport(
                BundleStatusReport::deserialize(is_fragment, rest)?,
            )),
            _ => Err(Error::MalformedAdminRecord),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> CreationTimestamp {
        CreationTimestamp::new(1000, 5)
    }

    fn time(s: u64) -> SignalTime {
        SignalTime {
            seconds: s,
            nanoseconds: 0,
        }
    }

    #[test]
    fn custody_signal_roundtrips() {
        let sig = CustodySignal {
            succeeded: true,
            reason: Reason::NoAdditionalInformation,
            fragment: None,
            signal_time: time(500),
            bundle_creation_timestamp: ts(),
            subject_source_eid: Eid::new(100, 1),
        };
        let mut buf = Vec::new();
        sig.serialize(&mut buf);
        assert_eq!(buf.len(), sig.serialized_size() as usize);

        let record = AdminRecord::deserialize(false, &buf).unwrap();
        assert_eq!(record, AdminRecord::CustodySignal(sig));
    }

    #[test]
    fn custody_signal_fragment_fields_roundtrip() {
        let sig = CustodySignal {
            succeeded: false,
            reason: Reason::DepletedStorage,
            fragment: Some((10, 20)),
            signal_time: time(1),
            bundle_creation_timestamp: ts(),
            subject_source_eid: Eid::new(1, 2),
        };
        let mut buf = Vec::new();
        sig.serialize(&mut buf);
        let record = AdminRecord::deserialize(true, &buf).unwrap();
        assert_eq!(record, AdminRecord::CustodySignal(sig));
    }

    #[test]
    fn acs_roundtrips_coalesced_ranges() {
        let acs = Acs {
            succeeded: true,
            reason: Reason::NoAdditionalInformation,
            ranges: vec![0..1, 5..8, 100..101],
        };
        let mut buf = Vec::new();
        acs.serialize(&mut buf);
        assert_eq!(buf.len(), acs.serialized_size() as usize);

        let record = AdminRecord::deserialize(false, &buf).unwrap();
        assert_eq!(record, AdminRecord::Acs(acs));
    }

    #[test]
    fn acs_rejects_overflowing_length() {
        let mut buf = Vec::new();
        buf.push(header_byte(RECORD_TYPE_AGGREGATE_CUSTODY_SIGNAL, false));
        buf.push(0x80);
        sdnv::encode(0, &mut buf);
        sdnv::encode(u64::MAX, &mut buf);
        assert!(matches!(
            AdminRecord::deserialize(false, &buf),
            Err(Error::MalformedAcs)
        ));
    }

    #[test]
    fn status_report_only_emits_set_flags() {
        let report = BundleStatusReport {
            reason: Some(Reason::LifetimeExpired),
            fragment: None,
            deleted: Some(time(42)),
            bundle_creation_timestamp: ts(),
            source_eid: Eid::new(3, 4),
            ..Default::default()
        };
        let mut buf = Vec::new();
        report.serialize(&mut buf);
        assert_eq!(buf.len(), report.serialized_size() as usize);

        let record = AdminRecord::deserialize(false, &buf).unwrap();
        assert_eq!(record, AdminRecord::BundleStatusReport(report));
    }
}
