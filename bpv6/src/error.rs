/*!
This module defines the primary error type for the `bpcore-bpv6` crate, along
with the small helper trait used to attach a field name to a lower-level
parse error without allocating on the happy path.
*/

use thiserror::Error;

/// The primary error type for the `bpcore-bpv6` crate.
///
/// Most variants here describe malformed wire input; a few
/// (`FragmentRequiresReassembly`, `DoNotFragment`, `NotAFragment`)
/// describe a caller violating a usage rule rather than a bad bundle.
#[derive(Error, Debug)]
pub enum Error {
    /// An SDNV ran out of buffer before its final byte.
    #[error("truncated SDNV")]
    SdnvTruncated,

    /// An SDNV consumed more than ten bytes without terminating.
    #[error("SDNV overflow")]
    SdnvOverflow,

    /// The bundle protocol version byte was not 6.
    #[error("unsupported bundle protocol version {0}")]
    InvalidVersion(u8),

    /// The primary block's declared length did not match the data available.
    #[error("truncated primary block")]
    PrimaryTruncated,

    /// A canonical block's declared length ran past the end of the buffer.
    #[error("truncated canonical block")]
    BlockTruncated,

    /// The bundle ended before a block carrying `IS_LAST_BLOCK` was seen.
    #[error("bundle has no block marked as last")]
    MissingLastBlock,

    /// Bytes remained in the buffer after the block marked `IS_LAST_BLOCK`.
    #[error("bundle has {0} bytes of trailing data after last block")]
    TrailingData(usize),

    /// More than one payload block is present.
    #[error("bundle has more than one payload block")]
    DuplicatePayload,

    /// No payload block is present, where one is required.
    #[error("bundle has no payload block")]
    MissingPayload,

    /// More than one CTEB is present.
    #[error("bundle has more than one custody transfer enhancement block")]
    DuplicateCteb,

    /// A CTEB's type-specific data was malformed or too long.
    #[error("malformed custody transfer enhancement block")]
    MalformedCteb,

    /// A PHIB's type-specific data was malformed.
    #[error("malformed previous hop insertion block")]
    MalformedPhib,

    /// An administrative record's first byte, or its content, was malformed.
    #[error("malformed administrative record")]
    MalformedAdminRecord,

    /// An ACS fill list had a non-monotonic or overflowing delta.
    #[error("malformed aggregate custody signal fill list")]
    MalformedAcs,

    /// An `ipn:` URI failed to parse; see [`crate::eid::EidError`].
    #[error(transparent)]
    InvalidEid(#[from] crate::eid::EidError),

    /// A field-level parse error, tagged with the field name that failed.
    #[error("failed to parse {field}: {source}")]
    InvalidField {
        field: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// `load()` was called on the standalone bundle-view path for a bundle
    /// whose primary block has `ISFRAGMENT` set; fragments must be ingested
    /// through [`crate::fragment::FragmentManager`] instead.
    #[error("fragment bundles must be loaded through the fragment manager")]
    FragmentRequiresReassembly,

    /// [`crate::fragment::fragment`] was asked to fragment at a size that is
    /// not smaller than the payload, or with a zero size.
    #[error("invalid fragment size {0} for payload of {1} bytes")]
    InvalidFragmentSize(u64, u64),

    /// [`crate::fragment::fragment`] was asked to fragment a bundle carrying
    /// `NOFRAGMENT`.
    #[error("bundle is marked do-not-fragment")]
    DoNotFragment,

    /// [`crate::fragment::assemble`] was given fragments whose primary-block
    /// identity fields (source, destination, timestamp, lifetime, total ADU
    /// length) disagree.
    #[error("fragments do not share a common bundle identity")]
    MismatchedFragments,

    /// [`crate::fragment::assemble`] was given a fragment set with gaps.
    #[error("fragment set does not entirely cover [0, {0})")]
    IncompleteFragmentSet(u64),

    /// [`crate::fragment::FragmentManager::add_fragment`] was given a
    /// bundle whose primary does not carry `ISFRAGMENT`.
    #[error("bundle is not a fragment")]
    NotAFragment,

    /// A render target buffer was smaller than the serialized bundle.
    #[error("render buffer of {0} bytes is too small for {1} serialized bytes")]
    BufferTooSmall(usize, u64),

    /// A block serialized to an impossible size (<= 2 bytes).
    #[error("block serialized to an impossible size of {0} bytes")]
    ImpossibleBlockSize(u64),
}

pub(crate) trait CaptureFieldErr<T> {
    fn map_field_err(self, field: &'static str) -> Result<T, Error>;
}

impl<T, E: Into<Box<dyn std::error::Error + Send + Sync>>> CaptureFieldErr<T>
    for std::result::Result<T, E>
{
    fn map_field_err(self, field: &'static str) -> Result<T, Error> {
        self.map_err(|e| Error::InvalidField {
            field,
            source: e.into(),
        })
    }
}
