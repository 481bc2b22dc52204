//! The canonical block: a block-type byte, processing-control flags, an
//! optional EID-reference list, a length, and type-specific data
//! (RFC 5050 §4.3).
//!
//! Per-type payloads live in sibling modules; [`CanonicalBlock`] is the
//! tagged union a [`crate::bundle::BundleView`] actually stores, matching the
//! block-library shape recommended for a from-scratch re-architecture:
//! no dynamic dispatch, serialization and size dispatched on the tag.

pub mod admin_record;
pub mod bundle_age;
pub mod cteb;
pub mod metadata;
pub mod phib;

pub use admin_record::{Acs, AdminRecord, BundleStatusReport, CustodyIdRange, CustodySignal, Reason, SignalTime};
pub use bundle_age::BundleAge;
pub use cteb::Cteb;
pub use metadata::Metadata;
pub use phib::Phib;

use crate::block_flags::BlockFlags;
use crate::error::Error;
use crate::sdnv;
use bytes::Bytes;

/// The one-byte block-type code (RFC 5050 §4.3 does not SDNV-encode this
/// field, unlike every other block-header field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Payload,
    PreviousHopInsertion,
    BundleAge,
    MetadataExtension,
    CustodyTransferEnhancement,
    Unrecognised(u8),
}

impl From<u8> for Type {
    fn from(value: u8) -> Self {
        match value {
            1 => Type::Payload,
            6 => Type::PreviousHopInsertion,
            7 => Type::BundleAge,
            8 => Type::MetadataExtension,
            0x0a => Type::CustodyTransferEnhancement,
            v => Type::Unrecognised(v),
        }
    }
}

impl From<Type> for u8 {
    fn from(value: Type) -> Self {
        match value {
            Type::Payload => 1,
            Type::PreviousHopInsertion => 6,
            Type::BundleAge => 7,
            Type::MetadataExtension => 8,
            Type::CustodyTransferEnhancement => 0x0a,
            Type::Unrecognised(v) => v,
        }
    }
}

/// The tagged union of every canonical block this crate understands, plus an
/// opaque fallback for anything else.
#[derive(Debug, Clone)]
pub enum CanonicalBlock {
    Payload(Bytes),
    Cteb(Cteb),
    Phib(Phib),
    Metadata(Metadata),
    BundleAge(BundleAge),
    AdminRecord(AdminRecord),
    Unknown { block_type: u8, data: Bytes },
}

impl CanonicalBlock {
    pub fn block_type(&self) -> Type {
        match self {
            CanonicalBlock::Payload(_) => Type::Payload,
            CanonicalBlock::Cteb(_) => Type::CustodyTransferEnhancement,
            CanonicalBlock::Phib(_) => Type::PreviousHopInsertion,
            CanonicalBlock::Metadata(_) => Type::MetadataExtension,
            CanonicalBlock::BundleAge(_) => Type::BundleAge,
            // An administrative record is not its own canonical block type:
            // it is type-specific data carried inside a payload block when
            // the primary's ADMINRECORD flag is set.
            CanonicalBlock::AdminRecord(_) => Type::Payload,
            CanonicalBlock::Unknown { block_type, .. } => Type::from(*block_type),
        }
    }

    pub fn serialized_size(&self) -> u64 {
        match self {
            CanonicalBlock::Payload(b) => b.len() as u64,
            CanonicalBlock::Cteb(b) => b.serialized_size(),
            CanonicalBlock::Phib(b) => b.serialized_size(),
            CanonicalBlock::Metadata(b) => b.serialized_size(),
            CanonicalBlock::BundleAge(b) => b.serialized_size(),
            CanonicalBlock::AdminRecord(b) => b.serialized_size(),
            CanonicalBlock::Unknown { data, .. } => data.len() as u64,
        }
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        match self {
            CanonicalBlock::Payload(b) => out.extend_from_slice(b),
            CanonicalBlock::Cteb(b) => b.serialize(out),
            CanonicalBlock::Phib(b) => b.serialize(out),
            CanonicalBlock::Metadata(b) => b.serialize(out),
            CanonicalBlock::BundleAge(b) => b.serialize(out),
            CanonicalBlock::AdminRecord(b) => b.serialize(out),
            CanonicalBlock::Unknown { data, .. } => out.extend_from_slice(data),
        }
    }

    fn deserialize(block_type: Type, data: &[u8]) -> Result<Self, Error> {
        Self::deserialize_recycled(block_type, data, None)
    }

    /// As [`Self::deserialize`], but reuses `recycled`'s heap storage when
    /// its block type matches `block_type` and the content shape allows it.
    /// Only [`Metadata`]'s inner buffer benefits; every other variant has no
    /// heap storage worth keeping across a reload and falls back to a plain
    /// decode.
    fn deserialize_recycled(
        block_type: Type,
        data: &[u8],
        recycled: Option<CanonicalBlock>,
    ) -> Result<Self, Error> {
        if block_type == Type::MetadataExtension {
            if let Some(CanonicalBlock::Metadata(mut existing)) = recycled {
                existing.deserialize_into(data)?;
                return Ok(CanonicalBlock::Metadata(existing));
            }
        }
        Ok(match block_type {
            Type::Payload => CanonicalBlock::Payload(Bytes::copy_from_slice(data)),
            Type::CustodyTransferEnhancement => CanonicalBlock::Cteb(Cteb::deserialize(data)?),
            Type::PreviousHopInsertion => CanonicalBlock::Phib(Phib::deserialize(data)?),
            Type::MetadataExtension => CanonicalBlock::Metadata(Metadata::deserialize(data)?),
            Type::BundleAge => CanonicalBlock::BundleAge(BundleAge::deserialize(data)?),
            Type::Unrecognised(v) => CanonicalBlock::Unknown {
                block_type: v,
                data: Bytes::copy_from_slice(data),
            },
        })
    }
}

/// One canonical block as it sits in a bundle: the parsed/typed content plus
/// the processing-control flags that govern how a node should treat it.
#[derive(Debug, Clone)]
pub struct Block {
    pub flags: BlockFlags,
    pub content: CanonicalBlock,
}

impl Block {
    pub fn new(content: CanonicalBlock) -> Self {
        Self {
            flags: BlockFlags::default(),
            content,
        }
    }

    pub fn block_type(&self) -> Type {
        self.content.block_type()
    }

    /// The wire size of the whole canonical block, type byte through data.
    pub fn serialized_size(&self) -> u64 {
        let data_len = self.content.serialized_size();
        1 + sdnv::encoded_len(u64::from(&self.flags)) as u64
            + sdnv::encoded_len(0) as u64 // EID reference count, always 0 in CBHE
            + sdnv::encoded_len(data_len) as u64
            + data_len
    }

    pub fn serialize(&self, buf: &mut Vec<u8>) {
        buf.push(u8::from(self.block_type()));
        sdnv::encode(u64::from(&self.flags), buf);
        sdnv::encode(0, buf);
        let data_len = self.content.serialized_size();
        sdnv::encode(data_len, buf);
        self.content.serialize(buf);
    }

    /// Decodes one canonical block from the front of `data`.
    pub fn deserialize(data: &[u8]) -> Result<(Self, usize), Error> {
        Self::deserialize_recycled(data, None)
    }

    /// As [`Self::deserialize`], but offers `recycled` (a typed block moved
    /// aside by [`crate::bundle::BundleView`]'s per-type recycle slot) to
    /// the content decoder to reuse in place of a fresh allocation.
    pub(crate) fn deserialize_recycled(
        data: &[u8],
        recycled: Option<CanonicalBlock>,
    ) -> Result<(Self, usize), Error> {
        let type_byte = *data.first().ok_or(Error::BlockTruncated)?;
        let mut pos = 1;

        let (raw_flags, n) = sdnv::decode(&data[pos..])?;
        pos += n;
        let flags = BlockFlags::from(raw_flags);

        let (eid_ref_count, n) = sdnv::decode(&data[pos..])?;
        pos += n;
        if eid_ref_count != 0 {
            // CBHE carries no dictionary to resolve offsets against.
            return Err(Error::BlockTruncated);
        }

        let (data_len, n) = sdnv::decode(&data[pos..])?;
        pos += n;
        let data_len = data_len as usize;
        if pos + data_len > data.len() {
            return Err(Error::BlockTruncated);
        }

        let content = CanonicalBlock::deserialize_recycled(
            Type::from(type_byte),
            &data[pos..pos + data_len],
            recycled,
        )?;
        pos += data_len;

        Ok((Block { flags, content }, pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_block_roundtrips() {
        let block = Block::new(CanonicalBlock::Payload(Bytes::from_static(b"helloworld")));
        let mut buf = Vec::new();
        block.serialize(&mut buf);
        assert_eq!(buf.len(), block.serialized_size() as usize);

        let (decoded, len) = Block::deserialize(&buf).unwrap();
        assert_eq!(len, buf.len());
        assert_eq!(decoded.block_type(), Type::Payload);
        match decoded.content {
            CanonicalBlock::Payload(b) => assert_eq!(&b[..], b"helloworld"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_type_roundtrips() {
        let block = Block::new(CanonicalBlock::Unknown {
            block_type: 200,
            data: Bytes::from_static(b"\x01\x02\x03"),
        });
        let mut buf = Vec::new();
        block.serialize(&mut buf);
        let (decoded, _) = Block::deserialize(&buf).unwrap();
        assert_eq!(decoded.block_type(), Type::Unrecognised(200));
    }

    #[test]
    fn rejects_truncated_data() {
        let block = Block::new(CanonicalBlock::Payload(Bytes::from_static(b"abc")));
        let mut buf = Vec::new();
        block.serialize(&mut buf);
        buf.truncate(buf.len() - 1);
        assert!(matches!(Block::deserialize(&buf), Err(Error::BlockTruncated)));
    }
}
