pub mod config;
pub mod decode;
pub mod error;
pub mod feed;
pub mod fields;
pub mod model;
pub mod publish;
pub mod snapshot;
pub mod xml;

pub use config::{CountPolicy, RecencySource, ScanConfig};
pub use decode::{
    DecodeSummary, DecodedUnit, EntryDecoder, Fragment, FragmentDecoder, TombstoneDecoder,
};
pub use error::FeedError;
pub use feed::FeedHeader;
pub use model::{Entry, OrganizationKey, Tombstone};
pub use publish::publish_atomically;
pub use snapshot::{SnapshotFile, SnapshotNaming, list_snapshots};
