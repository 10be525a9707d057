//! Feed download: follows `rel="next"` links and mirrors each page as a snapshot file.

mod error;
pub mod mirror;

#[cfg(feature = "http")]
pub mod http;

pub use error::SyncError;
pub use mirror::{FeedPage, MirrorOptions, MirrorStats, PageSource, StopReason, mirror};

#[cfg(feature = "http")]
pub use http::FeedPager;
