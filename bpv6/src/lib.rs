//! BPv6 bundle codec, fragmentation, and custody transfer, implementing
//! RFC 5050 over the CBHE (`ipn:node.service`) endpoint-id scheme.

pub mod block;
pub mod block_flags;
pub mod bundle;
pub mod creation_timestamp;
pub mod custody;
pub mod eid;
pub mod error;
pub mod fragment;
pub mod primary_block;
pub mod sdnv;

pub use block_flags::{BlockFlags, BundleFlags};
pub use bundle::BundleView;
pub use creation_timestamp::CreationTimestamp;
pub use custody::CustodyManager;
pub use eid::Eid;
pub use error::Error;
pub use fragment::{FragmentManager, SharedFragmentManager};
pub use primary_block::PrimaryBlock;

/// Convenience alias for `Result<T, Error>`, used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
