use std::path::PathBuf;

use licita_core::FeedError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("snapshot file unreadable: {path}")]
    FileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed XML stream in {path}")]
    MalformedXmlStream {
        path: PathBuf,
        #[source]
        source: FeedError,
    },

    #[error("failed to write {path}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
